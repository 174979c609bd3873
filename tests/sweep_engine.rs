//! End-to-end sweep behavior against mock instruments.

use bench_daq::error::{MeasurementError, SweepError, TransportError};
use bench_daq::hardware::MockInstrument;
use bench_daq::sweep::{
    run_sweep, run_sweep_until, EnablePolicy, Measurement, Meters, Reading, StimulusCommands,
    SweepSpec,
};
use bench_daq::traits::ScpiEndpoint;
use std::sync::Arc;
use std::time::Duration;

const SET: &str = "SOUR1:VOLT:LEV:IMM:AMPL {value}";
const ON: &str = "OUTP:STAT ON";
const OFF: &str = "OUTP:STAT OFF";

fn iv_spec(stimulus: Vec<f64>) -> SweepSpec {
    SweepSpec::new(stimulus, Duration::ZERO, StimulusCommands::new(SET, ON, OFF))
        .with_measurement(Measurement::new("voltage", "dmm", "MEAS:VOLT:DC?"))
}

fn psu() -> MockInstrument {
    MockInstrument::new("mock::psu").with_output_commands(ON, OFF)
}

fn meters(devices: &[(&str, &MockInstrument)]) -> Meters {
    devices
        .iter()
        .map(|(id, mock)| (id.to_string(), Arc::new((*mock).clone()) as Arc<dyn ScpiEndpoint>))
        .collect()
}

#[tokio::test]
async fn test_samples_align_with_stimulus() {
    let psu = psu();
    let dmm = MockInstrument::new("mock::dmm").with_standing_reply("MEAS:VOLT:DC?", "1.25");
    let stimulus = vec![0.0, 0.5, 1.0, 1.5, 2.0];

    let result = run_sweep(&psu, &meters(&[("dmm", &dmm)]), &iv_spec(stimulus.clone()))
        .await
        .unwrap();

    assert_eq!(result.len(), stimulus.len());
    for (i, sample) in result.samples.iter().enumerate() {
        assert_eq!(sample.index, i);
        assert_eq!(sample.stimulus, stimulus[i]);
        assert_eq!(sample.readings.keys().collect::<Vec<_>>(), vec!["voltage"]);
    }
    assert!(result.is_complete());
    assert_eq!(psu.write_count(OFF), 1);
    assert!(!psu.output_on());
}

#[tokio::test]
async fn test_iv_scenario_with_unparseable_reply() {
    let psu = psu();
    let dmm = MockInstrument::new("mock::dmm").with_replies("MEAS:VOLT:DC?", ["0.000", "0.041", "ERR"]);

    let result = run_sweep(&psu, &meters(&[("dmm", &dmm)]), &iv_spec(vec![0.0, 0.2, 0.4]))
        .await
        .unwrap();

    assert_eq!(result.series("voltage"), vec![Some(0.0), Some(0.041), None]);
    let failures = result.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 2);
    assert_eq!(failures[0].stimulus, 0.4);
    assert!(matches!(failures[0].error, MeasurementError::Parse { reply } if reply == "ERR"));
    assert_eq!(psu.write_count(OFF), 1);
}

#[tokio::test]
async fn test_empty_sequence_still_turns_output_off() {
    let psu = psu();
    let dmm = MockInstrument::new("mock::dmm");

    let result = run_sweep(&psu, &meters(&[("dmm", &dmm)]), &iv_spec(Vec::new()))
        .await
        .unwrap();

    assert!(result.is_empty());
    assert_eq!(psu.call_log(), vec![format!("write: {}", OFF)]);
    assert_eq!(dmm.query_count(), 0);
}

#[tokio::test]
async fn test_measurement_failure_does_not_stop_later_steps() {
    let psu = psu();
    let dmm = MockInstrument::new("mock::dmm")
        .with_standing_reply("MEAS:VOLT:DC?", "0.7")
        .with_standing_reply("MEAS:CURR:DC?", "0.002");
    dmm.push_reply("MEAS:VOLT:DC?", "0.1");
    dmm.push_failure(
        "MEAS:VOLT:DC?",
        TransportError::Timeout {
            command: "MEAS:VOLT:DC?".to_string(),
            timeout: Duration::from_millis(5000),
        },
    );
    let spec = iv_spec(vec![0.0, 0.1, 0.2, 0.3])
        .with_measurement(Measurement::new("current", "dmm", "MEAS:CURR:DC?"));

    let result = run_sweep(&psu, &meters(&[("dmm", &dmm)]), &spec).await.unwrap();

    assert!(result.is_complete());
    assert_eq!(
        result.series("voltage"),
        vec![Some(0.1), None, Some(0.7), Some(0.7)]
    );
    assert_eq!(result.series("current"), vec![Some(0.002); 4]);
    assert!(matches!(
        result.samples[1].reading("voltage"),
        Some(Reading::Failed(MeasurementError::Transport(TransportError::Timeout { .. })))
    ));
}

#[tokio::test]
async fn test_stimulus_failure_aborts_with_k_samples() {
    let psu = psu();
    psu.fail_write("SOUR1:VOLT", 2);
    let dmm = MockInstrument::new("mock::dmm").with_standing_reply("MEAS:VOLT:DC?", "0.5");

    let err = run_sweep(&psu, &meters(&[("dmm", &dmm)]), &iv_spec(vec![0.0, 0.1, 0.2, 0.3]))
        .await
        .unwrap_err();

    match &err {
        SweepError::Stimulus {
            step,
            stimulus,
            partial,
            ..
        } => {
            assert_eq!(*step, 2);
            assert_eq!(*stimulus, 0.2);
            assert_eq!(partial.len(), 2);
        }
        other => panic!("expected Stimulus, got {:?}", other),
    }
    assert!(err.to_string().contains("step 2 (stimulus 0.2)"));
    assert_eq!(psu.write_count(OFF), 1);
    assert_eq!(dmm.query_count(), 2);
    assert!(!psu.output_on());
}

#[tokio::test]
async fn test_enable_every_step_is_idempotent() {
    let psu = psu();
    let dmm = MockInstrument::new("mock::dmm").with_standing_reply("MEAS:VOLT:DC?", "0.5");
    let spec = iv_spec(vec![0.0, 0.1, 0.2]).with_enable_policy(EnablePolicy::EveryStep);

    let every_step = run_sweep(&psu, &meters(&[("dmm", &dmm)]), &spec).await.unwrap();

    assert_eq!(psu.write_count(ON), 3);
    assert_eq!(psu.output_transitions(), vec![true, false]);

    let once_psu = self::psu();
    let once = run_sweep(&once_psu, &meters(&[("dmm", &dmm)]), &iv_spec(vec![0.0, 0.1, 0.2]))
        .await
        .unwrap();
    assert_eq!(once_psu.write_count(ON), 1);
    assert_eq!(once_psu.output_transitions(), psu.output_transitions());
    assert_eq!(once.samples, every_step.samples);
}

#[tokio::test]
async fn test_stimulus_device_can_also_measure() {
    let smu = MockInstrument::new("mock::smu")
        .with_output_commands(ON, OFF)
        .with_replies("MEAS:CURR?", ["0.001", "0.002"]);
    let spec = SweepSpec::new(vec![1.0, 2.0], Duration::ZERO, StimulusCommands::new(SET, ON, OFF))
        .with_measurement(Measurement::new("current", "smu", "MEAS:CURR?").with_scale(1000.0));

    let result = run_sweep(&smu, &meters(&[("smu", &smu)]), &spec).await.unwrap();

    assert_eq!(result.series("current"), vec![Some(1.0), Some(2.0)]);
    assert_eq!(
        smu.call_log(),
        vec![
            "write: SOUR1:VOLT:LEV:IMM:AMPL 1",
            "write: OUTP:STAT ON",
            "query: MEAS:CURR?",
            "write: SOUR1:VOLT:LEV:IMM:AMPL 2",
            "query: MEAS:CURR?",
            "write: OUTP:STAT OFF",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_settle_precedes_every_measurement() {
    let psu = psu();
    let dmm = MockInstrument::new("mock::dmm").with_standing_reply("MEAS:VOLT:DC?", "0.5");
    let mut spec = iv_spec(vec![0.0, 0.1, 0.2]);
    spec.settle = Duration::from_millis(750);

    let start = tokio::time::Instant::now();
    run_sweep(&psu, &meters(&[("dmm", &dmm)]), &spec).await.unwrap();

    assert!(start.elapsed() >= Duration::from_millis(3 * 750));
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_mid_sweep_keeps_samples_and_turns_off() {
    let psu = psu();
    let dmm = MockInstrument::new("mock::dmm").with_standing_reply("MEAS:VOLT:DC?", "0.5");
    let mut spec = iv_spec(vec![0.0, 0.1, 0.2, 0.3, 0.4]);
    spec.settle = Duration::from_millis(100);

    // fires during the settle of step 2
    let shutdown = tokio::time::sleep(Duration::from_millis(250));
    let err = run_sweep_until(&psu, &meters(&[("dmm", &dmm)]), &spec, shutdown)
        .await
        .unwrap_err();

    match &err {
        SweepError::Interrupted { partial } => assert_eq!(partial.len(), 2),
        other => panic!("expected Interrupted, got {:?}", other),
    }
    assert_eq!(psu.write_count(OFF), 1);
    assert!(!psu.output_on());
    assert_eq!(dmm.query_count(), 2);
}

#[tokio::test]
async fn test_enable_failure_at_first_step_aborts_empty() {
    let psu = psu();
    psu.fail_write(ON, 0);
    let dmm = MockInstrument::new("mock::dmm").with_standing_reply("MEAS:VOLT:DC?", "0.5");

    let err = run_sweep(&psu, &meters(&[("dmm", &dmm)]), &iv_spec(vec![0.0, 0.1, 0.2]))
        .await
        .unwrap_err();

    match &err {
        SweepError::Stimulus {
            step,
            stimulus,
            partial,
            ..
        } => {
            assert_eq!(*step, 0);
            assert_eq!(*stimulus, 0.0);
            assert_eq!(partial.len(), 0);
        }
        other => panic!("expected Stimulus, got {:?}", other),
    }
    assert_eq!(psu.write_count(OFF), 1);
    assert_eq!(dmm.query_count(), 0);
    assert!(!psu.output_on());
}

#[tokio::test]
async fn test_closed_stimulus_handle_is_fatal() {
    let psu = psu();
    psu.close().await.unwrap();
    let dmm = MockInstrument::new("mock::dmm").with_standing_reply("MEAS:VOLT:DC?", "0.5");

    let err = run_sweep(&psu, &meters(&[("dmm", &dmm)]), &iv_spec(vec![0.0, 0.1]))
        .await
        .unwrap_err();

    match &err {
        SweepError::Stimulus {
            step,
            source,
            partial,
            ..
        } => {
            assert_eq!(*step, 0);
            assert_eq!(*source, TransportError::Closed("mock::psu".to_string()));
            assert!(partial.is_empty());
        }
        other => panic!("expected Stimulus, got {:?}", other),
    }
    assert_eq!(dmm.query_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_during_slow_query() {
    let psu = psu();
    let dmm = MockInstrument::new("mock::dmm")
        .with_latency(Duration::from_millis(300))
        .with_standing_reply("MEAS:VOLT:DC?", "0.5");

    // step 0 finishes at 300 ms, step 1 is still waiting on its reply
    let shutdown = tokio::time::sleep(Duration::from_millis(450));
    let err = run_sweep_until(&psu, &meters(&[("dmm", &dmm)]), &iv_spec(vec![0.0, 0.1, 0.2]), shutdown)
        .await
        .unwrap_err();

    match &err {
        SweepError::Interrupted { partial } => {
            assert_eq!(partial.series("voltage"), vec![Some(0.5)]);
        }
        other => panic!("expected Interrupted, got {:?}", other),
    }
    assert_eq!(dmm.query_count(), 1);
    assert_eq!(psu.write_count(OFF), 1);
    assert!(!psu.output_on());
}

#[tokio::test(start_paused = true)]
async fn test_slow_meter_times_out_per_measurement() {
    let psu = psu();
    let dmm = MockInstrument::new("mock::dmm")
        .with_latency(Duration::from_millis(200))
        .with_standing_reply("MEAS:VOLT:DC?", "0.5");
    let spec = SweepSpec::new(vec![0.0, 0.1], Duration::ZERO, StimulusCommands::new(SET, ON, OFF))
        .with_measurement(
            Measurement::new("voltage", "dmm", "MEAS:VOLT:DC?").with_timeout(Duration::from_millis(50)),
        );

    let result = run_sweep(&psu, &meters(&[("dmm", &dmm)]), &spec).await.unwrap();

    assert!(result.is_complete());
    assert_eq!(result.series("voltage"), vec![None, None]);
    assert!(result
        .failures()
        .iter()
        .all(|f| matches!(f.error, MeasurementError::Transport(TransportError::Timeout { .. }))));
}
