//! Mock SCPI instrument for testing
//!
//! Provides a simulated instrument for exercising sweeps without physical
//! hardware. It provides:
//! - Scripted replies (and scripted failures) per query command
//! - Write failure injection, by command prefix and occurrence
//! - Output on/off transition tracking
//! - Call logging for test verification

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::resource::Opener;
use crate::error::TransportError;
use crate::traits::ScpiEndpoint;

#[derive(Default)]
struct MockState {
    replies: HashMap<String, VecDeque<Result<String, TransportError>>>,
    standing: HashMap<String, String>,
    write_failures: Vec<WriteFailure>,
    output_commands: Option<(String, String)>,
    output_on: bool,
    transitions: Vec<bool>,
    call_log: Vec<String>,
    closed: bool,
    close_calls: usize,
}

struct WriteFailure {
    prefix: String,
    occurrence: Option<usize>,
    seen: usize,
}

/// Mock SCPI instrument
///
/// # Example
///
/// ```
/// use bench_daq::hardware::MockInstrument;
///
/// let dmm = MockInstrument::new("mock::dmm")
///     .with_replies("MEAS:VOLT:DC?", ["0.000", "0.041", "ERR"]);
/// assert!(dmm.call_log().is_empty());
/// ```
#[derive(Clone)]
pub struct MockInstrument {
    resource: String,
    timeout: Duration,
    latency: Duration,
    state: Arc<Mutex<MockState>>,
}

impl MockInstrument {
    /// Create a mock with no scripted replies
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            timeout: Duration::from_millis(5000),
            latency: Duration::ZERO,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Set simulated latency per call
    ///
    /// A query whose timeout is shorter than the latency fails with
    /// `Timeout` once the timeout has elapsed.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue replies for `cmd`, consumed one per query in order
    pub fn with_replies<I, S>(self, cmd: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for reply in replies {
            self.push_reply(cmd, reply);
        }
        self
    }

    /// Answer `cmd` with `reply` whenever its queue is empty
    pub fn with_standing_reply(self, cmd: &str, reply: impl Into<String>) -> Self {
        self.lock().standing.insert(cmd.to_string(), reply.into());
        self
    }

    /// Standing `*IDN?` reply
    pub fn with_identity(self, idn: impl Into<String>) -> Self {
        self.with_standing_reply("*IDN?", idn)
    }

    /// Track output state: `enable` turns it on, `disable` turns it off
    pub fn with_output_commands(self, enable: &str, disable: &str) -> Self {
        self.lock().output_commands = Some((enable.to_string(), disable.to_string()));
        self
    }

    /// Queue one reply for `cmd`
    pub fn push_reply(&self, cmd: &str, reply: impl Into<String>) {
        self.lock()
            .replies
            .entry(cmd.to_string())
            .or_default()
            .push_back(Ok(reply.into()));
    }

    /// Queue one failure for `cmd`
    pub fn push_failure(&self, cmd: &str, error: TransportError) {
        self.lock()
            .replies
            .entry(cmd.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Fail the `occurrence`-th (0-based) write starting with `prefix`
    pub fn fail_write(&self, prefix: &str, occurrence: usize) {
        self.lock().write_failures.push(WriteFailure {
            prefix: prefix.to_string(),
            occurrence: Some(occurrence),
            seen: 0,
        });
    }

    /// Fail every write starting with `prefix`
    pub fn fail_writes(&self, prefix: &str) {
        self.lock().write_failures.push(WriteFailure {
            prefix: prefix.to_string(),
            occurrence: None,
            seen: 0,
        });
    }

    /// Get the call log
    pub fn call_log(&self) -> Vec<String> {
        self.lock().call_log.clone()
    }

    /// Number of writes that exactly matched `cmd`
    pub fn write_count(&self, cmd: &str) -> usize {
        self.lock()
            .call_log
            .iter()
            .filter(|entry| entry.strip_prefix("write: ") == Some(cmd))
            .count()
    }

    /// Number of queries sent, for any command
    pub fn query_count(&self) -> usize {
        self.lock()
            .call_log
            .iter()
            .filter(|entry| entry.starts_with("query: "))
            .count()
    }

    /// Output state changes, in order (`true` = switched on)
    pub fn output_transitions(&self) -> Vec<bool> {
        self.lock().transitions.clone()
    }

    /// Current tracked output state
    pub fn output_on(&self) -> bool {
        self.lock().output_on
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// How many times `close()` was called
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl ScpiEndpoint for MockInstrument {
    fn resource(&self) -> &str {
        &self.resource
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn write(&self, cmd: &str) -> Result<(), TransportError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Closed(self.resource.clone()));
        }
        state.call_log.push(format!("write: {}", cmd));

        let mut failed = false;
        for failure in state
            .write_failures
            .iter_mut()
            .filter(|f| cmd.starts_with(&f.prefix))
        {
            if failure.occurrence.map_or(true, |n| n == failure.seen) {
                failed = true;
            }
            failure.seen += 1;
        }
        if failed {
            return Err(TransportError::Communication {
                resource: self.resource.clone(),
                reason: format!("injected failure writing '{}'", cmd),
            });
        }

        if let Some((enable, disable)) = state.output_commands.clone() {
            let target = if cmd == enable {
                Some(true)
            } else if cmd == disable {
                Some(false)
            } else {
                None
            };
            if let Some(on) = target {
                if state.output_on != on {
                    state.output_on = on;
                    state.transitions.push(on);
                }
            }
        }
        Ok(())
    }

    async fn query_with_timeout(
        &self,
        cmd: &str,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        if self.latency > timeout {
            tokio::time::sleep(timeout).await;
            return Err(TransportError::Timeout {
                command: cmd.to_string(),
                timeout,
            });
        }
        self.simulate_latency().await;
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Closed(self.resource.clone()));
        }
        state.call_log.push(format!("query: {}", cmd));

        if let Some(reply) = state.replies.get_mut(cmd).and_then(VecDeque::pop_front) {
            return reply;
        }
        match state.standing.get(cmd) {
            Some(reply) => Ok(reply.clone()),
            None => Err(TransportError::Timeout {
                command: cmd.to_string(),
                timeout,
            }),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.close_calls += 1;
        if !state.closed {
            state.closed = true;
            state.call_log.push("close".to_string());
        }
        Ok(())
    }
}

/// Opener that hands out pre-built mocks by resource string
///
/// Unknown resources fail with `TransportError::Connection`, like an
/// unreachable device.
#[derive(Clone, Default)]
pub struct MockOpener {
    instruments: HashMap<String, MockInstrument>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl MockOpener {
    /// Opener with no instruments
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `instrument` under its own resource string
    pub fn with_instrument(mut self, instrument: MockInstrument) -> Self {
        self.instruments
            .insert(instrument.resource.clone(), instrument);
        self
    }

    /// Resources opened so far, in order
    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Opener for MockOpener {
    async fn open(
        &self,
        resource: &str,
        _timeout: Duration,
    ) -> Result<Arc<dyn ScpiEndpoint>, TransportError> {
        let instrument = self
            .instruments
            .get(resource)
            .ok_or_else(|| TransportError::Connection {
                resource: resource.to_string(),
                reason: "no such mock".to_string(),
            })?;
        self.opened
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(resource.to_string());
        Ok(Arc::new(instrument.clone()))
    }
}
