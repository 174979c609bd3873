//! Session setup, discovery and resource handling without hardware.

use bench_daq::config::InstrumentConfig;
use bench_daq::error::{SweepError, TransportError};
use bench_daq::hardware::{self, MockInstrument, MockOpener, ResourceAddress};
use bench_daq::instrument::{discover, model_number};
use bench_daq::sweep::{run_sweep, Measurement, StimulusCommands, SweepSpec};
use bench_daq::BenchSession;
use std::time::Duration;

fn instrument(id: &str, resource: &str) -> InstrumentConfig {
    InstrumentConfig {
        id: id.to_string(),
        resource: resource.to_string(),
        enabled: true,
        timeout_ms: 2000,
        reset: true,
        init: Vec::new(),
    }
}

#[tokio::test]
async fn test_discover_keys_devices_by_model() {
    let opener = MockOpener::new()
        .with_instrument(MockInstrument::new("mock::a").with_identity("RIGOL TECHNOLOGIES,DP832,DP8C172001883,00.01.14\r\n"))
        .with_instrument(MockInstrument::new("mock::b").with_identity("Keysight Technologies,34461A,MY53202914,A.02.14-02.40"))
        .with_instrument(MockInstrument::new("mock::c").with_identity("RIGOL TECHNOLOGIES,DP832,DP8C172001999,00.01.14"));
    let silent = MockInstrument::new("mock::silent");
    let opener = opener.with_instrument(silent.clone());

    let devices = discover(
        &["mock::a", "mock::b", "mock::c", "mock::silent", "mock::unplugged"],
        &opener,
        Duration::from_millis(100),
    )
    .await;

    assert_eq!(
        devices.keys().collect::<Vec<_>>(),
        vec!["34461A", "DP832", "DP832#2"]
    );
    assert_eq!(devices["DP832"].resource, "mock::a");
    assert_eq!(devices["DP832#2"].identity.serial, "DP8C172001999");
    assert_eq!(devices["34461A"].identity.manufacturer, "Keysight Technologies");
    assert!(silent.is_closed());
}

#[test]
fn test_model_number_fallbacks() {
    assert_eq!(model_number("RIGOL TECHNOLOGIES,DP832,DP8C1,00.01"), "DP832");
    assert_eq!(model_number("SOMEVENDOR,X100"), "X100");
    assert_eq!(model_number("HP3478A"), "HP3478A");
}

#[tokio::test]
async fn test_session_feeds_sweep() {
    let psu = MockInstrument::new("mock::psu").with_output_commands("OUTP:STAT ON", "OUTP:STAT OFF");
    let dmm = MockInstrument::new("mock::dmm").with_replies("MEAS:CURR:DC?", ["0.001", "0.004"]);
    let opener = MockOpener::new()
        .with_instrument(psu.clone())
        .with_instrument(dmm.clone());

    let mut session = BenchSession::open(
        &[instrument("psu", "mock::psu"), instrument("dmm", "mock::dmm")],
        &opener,
    )
    .await
    .unwrap();

    let spec = SweepSpec::new(
        vec![0.6, 0.7],
        Duration::ZERO,
        StimulusCommands::new("SOUR1:VOLT {value}", "OUTP:STAT ON", "OUTP:STAT OFF"),
    )
    .with_measurement(Measurement::new("current", "dmm", "MEAS:CURR:DC?"));
    let stimulus = session.require("psu").unwrap();
    let result = run_sweep(stimulus.as_ref(), &session.meters(), &spec).await.unwrap();
    session.close_all().await;

    assert_eq!(result.series("current"), vec![Some(0.001), Some(0.004)]);
    assert_eq!(psu.call_log().first().map(String::as_str), Some("write: *RST"));
    assert!(psu.is_closed());
    assert!(dmm.is_closed());
    assert!(!psu.output_on());
}

#[tokio::test]
async fn test_setup_failure_names_device() {
    let psu = MockInstrument::new("mock::psu");
    psu.fail_writes("*RST");
    let opener = MockOpener::new().with_instrument(psu.clone());

    let err = BenchSession::open(&[instrument("psu", "mock::psu")], &opener)
        .await
        .unwrap_err();

    match err {
        SweepError::Setup { device, source } => {
            assert_eq!(device, "psu");
            assert!(matches!(source, TransportError::Communication { .. }));
        }
        other => panic!("expected Setup, got {:?}", other),
    }
    assert!(psu.is_closed());
}

#[tokio::test]
async fn test_open_rejects_malformed_resource() {
    let err = hardware::open("not a resource", Duration::from_millis(100))
        .await
        .err();
    assert!(matches!(err, Some(TransportError::Connection { .. })));
}

#[cfg(not(feature = "instrument_visa"))]
#[tokio::test]
async fn test_visa_resource_needs_feature() {
    assert!(matches!(
        ResourceAddress::parse("USB0::0x1AB1::0x0E11::DP8C172001883::INSTR"),
        Ok(ResourceAddress::Visa(_))
    ));
    let err = hardware::open("GPIB0::5::INSTR", Duration::from_millis(100))
        .await
        .err();
    assert!(matches!(err, Some(TransportError::FeatureNotEnabled(_))));
}
