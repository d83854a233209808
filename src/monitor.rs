//! # Cycle Orchestrator
//!
//! Drives the handshake → listen → parse → persist sequence, either once
//! (`run_single_cycle`) or continuously (`run_continuous`). One cycle runs to
//! completion on a single logical task before the next begins; the retry
//! backoff sleep and the inter-cycle sleep are the only suspension points.
//!
//! Failures are isolated per concern: a parse failure, a file write failure,
//! and a database write failure each mark the cycle unsuccessful without
//! cascading into the other paths. Only startup-time initialization failures
//! are fatal to the process.
//!
//! Cancellation is cooperative: a [`ShutdownFlag`] set by the signal handler
//! is polled once per loop iteration, so an in-flight listen or retry
//! sequence completes or times out naturally before the flag is observed.

use crate::config::Config;
use crate::logutil::escape_log;
use crate::metrics;
use crate::processing;
use crate::radio::RadioLink;
use crate::sink::{persist_with_retry, RetryPolicy, TimeSeriesSink};
use crate::storage::DailyLogStore;
use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Fixed delay between the handshake and the listen window, giving the
/// sensor time to respond.
const HANDSHAKE_SETTLE: Duration = Duration::from_secs(1);

/// Fixed pause after an unexpected error in a continuous-mode iteration.
const ERROR_PAUSE: Duration = Duration::from_secs(10);

/// Cooperative cancellation token. The signal task sets it; the continuous
/// loop reads it once per iteration. Eventual visibility is all that is
/// required, so relaxed ordering suffices.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Spawn a task that trips the flag on SIGINT/SIGTERM (Ctrl-C).
    pub fn arm_ctrl_c(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal, finishing current cycle...");
                flag.trigger();
            }
        });
    }
}

/// Orchestrates polling cycles over a radio link and a time-series sink.
pub struct Monitor<R, S> {
    config: Config,
    radio: R,
    sink: S,
    store: DailyLogStore,
    policy: RetryPolicy,
}

impl<R: RadioLink, S: TimeSeriesSink> Monitor<R, S> {
    /// Assemble a monitor from an already-validated configuration.
    pub fn new(config: Config, radio: R, sink: S) -> Self {
        let store = DailyLogStore::new(
            config.storage.log_base_dir.clone(),
            config.storage.daily_log_file.clone(),
        );
        let policy = RetryPolicy::from(&config.retry);
        Self {
            config,
            radio,
            sink,
            store,
            policy,
        }
    }

    /// Listen for a message carrying the expected device marker.
    ///
    /// Calls the radio with short sub-timeouts inside the overall listen
    /// window; frames without the marker are discarded and listening
    /// continues until the window elapses.
    async fn listen_for_device(&mut self) -> Result<Option<String>> {
        let device_id = self.config.device.id.clone();
        let overall = Duration::from_secs_f64(self.config.device.listen_timeout_secs);
        let sub = Duration::from_secs_f64(self.config.device.receive_timeout_secs);

        info!("Listening for messages from {}", device_id);
        let deadline = tokio::time::Instant::now() + overall;

        while tokio::time::Instant::now() < deadline {
            if let Some(message) = self.radio.receive_message(sub).await? {
                if message.contains(device_id.as_str()) {
                    info!(
                        "Received message from {}: {}",
                        device_id,
                        escape_log(&message)
                    );
                    return Ok(Some(message));
                }
                debug!(
                    "Discarding message without device marker: {}",
                    escape_log(&message)
                );
            }
        }

        info!("No message received from {} within timeout", device_id);
        Ok(None)
    }

    /// Parse a received message and persist it to both destinations.
    ///
    /// The file and database paths are attempted independently; a failure in
    /// one never prevents the other. Returns the combined success.
    async fn process_received_message(&mut self, raw: &str) -> bool {
        let reading = match processing::parse_reading(
            raw,
            &self.config.device.id,
            &self.config.processing.aliases,
            &self.config.processing.ranges,
        ) {
            Ok(reading) => reading,
            Err(e) => {
                metrics::inc_parse_failures();
                warn!("Failed to process message: {}", e);
                return false;
            }
        };
        info!("Successfully processed message from {}", reading.device_id);

        let line = processing::format_log_line(&reading);
        let file_success = match self.store.append(reading.timestamp, &line).await {
            Ok(()) => true,
            Err(e) => {
                metrics::inc_file_write_failures();
                error!("Failed to save data to file: {}", e);
                false
            }
        };

        let db_success = persist_with_retry(&self.sink, &reading, &self.policy).await;

        let stats = processing::field_stats(&reading);
        info!("Processed message: {:?}", stats);

        file_success && db_success
    }

    /// Run one handshake → listen → parse → persist cycle.
    ///
    /// `Ok(false)` covers the non-error outcomes (handshake refused, nothing
    /// heard, message rejected, persistence incomplete). `Err` is reserved
    /// for unexpected failures such as radio I/O errors; in continuous mode
    /// the loop absorbs those and keeps going.
    pub async fn run_single_cycle(&mut self) -> Result<bool> {
        metrics::inc_cycles_run();

        let payload = self.config.device.handshake_payload().to_string();
        if !self.radio.send_handshake(&payload).await {
            warn!("Failed to send handshake message");
            return Ok(false);
        }

        sleep(HANDSHAKE_SETTLE).await;

        match self.listen_for_device().await? {
            Some(message) => {
                let ok = self.process_received_message(&message).await;
                if ok {
                    metrics::inc_cycles_ok();
                }
                Ok(ok)
            }
            None => {
                info!("No message received from device");
                Ok(false)
            }
        }
    }

    /// Run cycles until the shutdown flag is observed.
    ///
    /// Each iteration subtracts its own duration from the configured
    /// interval, so the effective period stays at `interval` regardless of
    /// how long a cycle takes; a cycle running past the interval starts the
    /// next one immediately. An unexpected error is logged and followed by a
    /// fixed pause — it never terminates the loop.
    pub async fn run_continuous(&mut self, interval: Duration, shutdown: &ShutdownFlag) {
        info!(
            "Starting continuous monitoring with {}s interval",
            interval.as_secs()
        );

        while !shutdown.is_triggered() {
            let cycle_start = tokio::time::Instant::now();

            match self.run_single_cycle().await {
                Ok(true) => info!("Monitoring cycle completed successfully"),
                Ok(false) => warn!("Monitoring cycle completed with issues"),
                Err(e) => {
                    error!("Unexpected error in continuous mode: {}", e);
                    if !shutdown.is_triggered() {
                        sleep(ERROR_PAUSE).await;
                    }
                    continue;
                }
            }

            let elapsed = cycle_start.elapsed();
            let sleep_time = interval.saturating_sub(elapsed);
            if !sleep_time.is_zero() && !shutdown.is_triggered() {
                debug!("Sleeping for {:.1} seconds", sleep_time.as_secs_f64());
                sleep(sleep_time).await;
            }
        }

        info!("Continuous monitoring stopped");
    }

    /// The loaded configuration, mainly for status reporting.
    pub fn config(&self) -> &Config {
        &self.config
    }
}
