//! InfluxDB persistence for validated readings.
//!
//! A reading becomes a single InfluxDB v2 Line Protocol point:
//!
//! ```text
//! sensor_data,device=Device5 Temp=25.5,status="armed" 1717420800
//! ```
//!
//! measurement `sensor_data`, one `device` tag, every field of the reading
//! (numeric fields as floats, everything else as a quoted string), and the
//! reading timestamp at second precision.
//!
//! The write path is wrapped by [`persist_with_retry`], the at-least-once
//! gateway: bounded attempts with exponential backoff, never raising — all
//! failures are absorbed into a `bool` the cycle reports on.

use crate::config::{InfluxDbConfig, RetryConfig};
use crate::metrics;
use crate::processing::{FieldMapping, FieldValue, Reading};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Measurement name for all sensor readings.
pub const MEASUREMENT: &str = "sensor_data";

/// Time-series write failures. All variants are treated as transient by the
/// retry gateway; classification only affects logging.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("write rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timeout after {0}s")]
    Timeout(u64),
}

/// Capability seam for the time-series store, substitutable in tests.
#[async_trait]
pub trait TimeSeriesSink {
    /// Write one point. Errors are folded into the retry loop by the caller.
    async fn write_point(
        &self,
        measurement: &str,
        device_id: &str,
        timestamp_secs: i64,
        fields: &FieldMapping,
    ) -> Result<(), SinkError>;
}

/// Bounded exponential-backoff retry parameters, loaded once at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_factor: f64,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the attempt with the given 0-based index:
    /// `initial_delay * backoff_factor^attempt_index`.
    pub fn backoff_delay(&self, attempt_index: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt_index as i32);
        Duration::from_secs_f64(secs)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_factor: config.backoff_factor,
            initial_delay: Duration::from_secs_f64(config.initial_delay_secs),
        }
    }
}

/// Write a reading through the sink with bounded exponential-backoff retry.
///
/// Attempts up to `policy.max_attempts` writes; any success short-circuits to
/// `true`. Between failed attempts the gateway sleeps
/// `initial_delay * backoff_factor^attempt` (no sleep after the final
/// attempt). The sleep suspends the calling task, so the cycle stalls rather
/// than overlapping a retry with the next poll. Exhaustion returns `false`;
/// the caller surfaces that as a warning, never a crash.
pub async fn persist_with_retry<S: TimeSeriesSink + ?Sized>(
    sink: &S,
    reading: &Reading,
    policy: &RetryPolicy,
) -> bool {
    for attempt in 0..policy.max_attempts {
        metrics::inc_sink_write_attempts();
        match sink
            .write_point(
                MEASUREMENT,
                &reading.device_id,
                reading.timestamp.timestamp(),
                &reading.fields,
            )
            .await
        {
            Ok(()) => {
                debug!(
                    "Successfully wrote data for {} to InfluxDB",
                    reading.device_id
                );
                return true;
            }
            Err(e) => {
                warn!("InfluxDB write error on attempt {}: {}", attempt + 1, e);
            }
        }

        if attempt + 1 < policy.max_attempts {
            let delay = policy.backoff_delay(attempt);
            info!(
                "Retrying InfluxDB write in {:.1} seconds...",
                delay.as_secs_f64()
            );
            metrics::inc_sink_write_retries();
            sleep(delay).await;
        }
    }

    error!(
        "Failed to write data to InfluxDB after {} attempts",
        policy.max_attempts
    );
    metrics::inc_sink_write_exhausted();
    false
}

/// InfluxDB v2 HTTP sink. One client is held for the process lifetime.
pub struct InfluxSink {
    config: InfluxDbConfig,
    client: reqwest::Client,
}

impl InfluxSink {
    pub fn new(config: InfluxDbConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Check the `/health` endpoint. Used by `probe` and at startup; any
    /// failure maps to `false`.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.config.url);
        let request = self.client.get(&url);
        match timeout(Duration::from_secs(self.config.timeout_secs), request.send()).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(e)) => {
                warn!("InfluxDB health check failed: {}", e);
                false
            }
            Err(_) => {
                warn!(
                    "InfluxDB health check timeout after {}s",
                    self.config.timeout_secs
                );
                false
            }
        }
    }

    fn write_url(&self) -> String {
        format!(
            "{}/api/v2/write?org={}&bucket={}&precision=s",
            self.config.url, self.config.org, self.config.bucket
        )
    }
}

#[async_trait]
impl TimeSeriesSink for InfluxSink {
    async fn write_point(
        &self,
        measurement: &str,
        device_id: &str,
        timestamp_secs: i64,
        fields: &FieldMapping,
    ) -> Result<(), SinkError> {
        let line = render_line(measurement, device_id, timestamp_secs, fields);
        debug!("Line protocol: {}", line);

        let request = self
            .client
            .post(self.write_url())
            .header("Authorization", format!("Token {}", self.config.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line);

        let response = timeout(Duration::from_secs(self.config.timeout_secs), request.send())
            .await
            .map_err(|_| SinkError::Timeout(self.config.timeout_secs))?
            .map_err(|e| SinkError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Render one Line Protocol point.
fn render_line(
    measurement: &str,
    device_id: &str,
    timestamp_secs: i64,
    fields: &FieldMapping,
) -> String {
    debug_assert!(!fields.is_empty(), "InfluxDB requires at least one field");

    let mut line = escape_name(measurement);
    line.push_str(",device=");
    line.push_str(&escape_name(device_id));
    line.push(' ');

    for (i, (name, value)) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(&escape_name(name));
        line.push('=');
        line.push_str(&render_field_value(value));
    }

    line.push(' ');
    line.push_str(&timestamp_secs.to_string());
    line
}

/// Escape a measurement name, tag value, or field key per the Line Protocol
/// spec: commas, equals signs, and spaces must be backslash-escaped.
fn escape_name(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

/// Format a field value: floats as-is, text quoted with inner escapes.
fn render_field_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Number(n) => format!("{}", n),
        FieldValue::Text(s) => {
            let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{}\"", escaped)
        }
    }
}
