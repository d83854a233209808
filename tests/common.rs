//! Test doubles & fixtures shared by the integration suites.
//!
//! The radio and sink doubles run entirely on tokio virtual time, so suites
//! using `#[tokio::test(start_paused = true)]` get exact, deterministic
//! timing assertions.
#![allow(dead_code)] // Each suite uses a subset of these helpers.

use async_trait::async_trait;
use lorawatch::config::Config;
use lorawatch::monitor::ShutdownFlag;
use lorawatch::processing::FieldMapping;
use lorawatch::radio::RadioLink;
use lorawatch::sink::{SinkError, TimeSeriesSink};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// One scripted radio interaction, consumed per `receive_message` call.
pub enum ScriptStep {
    /// Deliver a frame after the given (virtual) delay.
    Reply { delay: Duration, text: String },
    /// Stay quiet for the full sub-timeout.
    Silence,
    /// Fail the receive with an I/O error.
    Fail,
}

impl ScriptStep {
    pub fn reply(text: &str) -> Self {
        ScriptStep::Reply {
            delay: Duration::ZERO,
            text: text.to_string(),
        }
    }

    pub fn reply_after(delay: Duration, text: &str) -> Self {
        ScriptStep::Reply {
            delay,
            text: text.to_string(),
        }
    }
}

/// Radio double replaying a canned script. Records handshake instants so
/// suites can assert on cycle cadence.
pub struct ScriptedRadio {
    script: VecDeque<ScriptStep>,
    handshake_times: Arc<Mutex<Vec<Instant>>>,
    exhausted_shutdown: Option<ShutdownFlag>,
}

impl ScriptedRadio {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script: script.into(),
            handshake_times: Arc::new(Mutex::new(Vec::new())),
            exhausted_shutdown: None,
        }
    }

    /// Trip the given flag once the script runs dry, so continuous-mode
    /// tests wind down instead of polling forever.
    pub fn shutdown_when_exhausted(mut self, flag: &ShutdownFlag) -> Self {
        self.exhausted_shutdown = Some(flag.clone());
        self
    }

    pub fn handshake_times(&self) -> Arc<Mutex<Vec<Instant>>> {
        self.handshake_times.clone()
    }
}

#[async_trait]
impl RadioLink for ScriptedRadio {
    async fn send_handshake(&mut self, _payload: &str) -> bool {
        self.handshake_times.lock().unwrap().push(Instant::now());
        true
    }

    async fn receive_message(&mut self, timeout: Duration) -> anyhow::Result<Option<String>> {
        match self.script.pop_front() {
            Some(ScriptStep::Reply { delay, text }) => {
                sleep(delay).await;
                Ok(Some(text))
            }
            Some(ScriptStep::Silence) => {
                sleep(timeout).await;
                Ok(None)
            }
            Some(ScriptStep::Fail) => Err(anyhow::anyhow!("radio I/O error")),
            None => {
                if let Some(flag) = &self.exhausted_shutdown {
                    flag.trigger();
                }
                sleep(timeout).await;
                Ok(None)
            }
        }
    }
}

/// A single write observed by [`RecordingSink`].
#[derive(Clone)]
pub struct RecordedWrite {
    pub at: Instant,
    pub measurement: String,
    pub device_id: String,
    pub timestamp_secs: i64,
    pub fields: FieldMapping,
}

#[derive(Default)]
struct SinkState {
    writes: Vec<RecordedWrite>,
    failures_remaining: u32,
    always_fail: bool,
}

/// Sink double recording every write attempt with its (virtual) instant.
/// Clones share state, so a handle kept by the test observes writes made
/// through the clone owned by the monitor.
#[derive(Clone, Default)]
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
}

impl RecordingSink {
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Fail the first `n` attempts, then succeed.
    pub fn failing_first(n: u32) -> Self {
        let sink = Self::default();
        sink.state.lock().unwrap().failures_remaining = n;
        sink
    }

    pub fn always_failing() -> Self {
        let sink = Self::default();
        sink.state.lock().unwrap().always_fail = true;
        sink
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes.len()
    }
}

#[async_trait]
impl TimeSeriesSink for RecordingSink {
    async fn write_point(
        &self,
        measurement: &str,
        device_id: &str,
        timestamp_secs: i64,
        fields: &FieldMapping,
    ) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        state.writes.push(RecordedWrite {
            at: Instant::now(),
            measurement: measurement.to_string(),
            device_id: device_id.to_string(),
            timestamp_secs,
            fields: fields.clone(),
        });
        if state.always_fail {
            return Err(SinkError::Http("connection refused".to_string()));
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(SinkError::Http("connection refused".to_string()));
        }
        Ok(())
    }
}

/// A validated config pointing its daily logs at `log_dir`, with short listen
/// windows so suites stay brisk even on virtual time.
pub fn test_config(log_dir: &Path) -> Config {
    let mut config = Config::default();
    config.influxdb.token = "test-token".to_string();
    config.storage.log_base_dir = log_dir.to_str().unwrap().to_string();
    config.device.listen_timeout_secs = 10.0;
    config.device.receive_timeout_secs = 1.0;
    config.validate().expect("test config valid");
    config
}
