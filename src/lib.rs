//! # Lorawatch - LoRa Sensor Monitoring Daemon
//!
//! Lorawatch polls a LoRa sensor device on a fixed cycle over a serial-attached
//! modem, parses and validates its text-encoded telemetry, and records every
//! validated reading to an append-only daily log file and to InfluxDB.
//!
//! ## Features
//!
//! - **Polling Cycles**: Handshake → listen → parse → persist, as a one-shot run or
//!   a continuous loop with a fixed effective period.
//! - **Message Validation**: A permissive `ID:<device>, field:value, ...` token grammar
//!   with configurable field aliases and numeric range bounds; one bad field rejects
//!   the whole message.
//! - **Durable Storage**: Daily log files under date-derived directories plus InfluxDB
//!   line-protocol writes with bounded exponential-backoff retry.
//! - **Hardware Isolation**: The radio is a capability trait; the serial LoRa modem
//!   implementation is feature-gated so the core and its tests never need hardware.
//! - **Async Design**: Built with Tokio; a single logical task drives the whole cycle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lorawatch::config::Config;
//! use lorawatch::monitor::Monitor;
//! use lorawatch::sink::InfluxSink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     # #[cfg(feature = "serial")]
//!     # {
//!     // Load configuration
//!     let config = Config::load("config.toml").await?;
//!
//!     // Open the radio and sink, then run one cycle
//!     let radio = lorawatch::radio::LoraModem::open(&config.radio).await?;
//!     let sink = InfluxSink::new(config.influxdb.clone());
//!     let mut monitor = Monitor::new(config, radio, sink);
//!     monitor.run_single_cycle().await?;
//!     # }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`monitor`] - Cycle orchestrator: single-cycle and continuous polling modes
//! - [`processing`] - Message parsing, range validation, and log-line formatting
//! - [`sink`] - InfluxDB line-protocol sink and the retrying persistence gateway
//! - [`radio`] - LoRa transport seam and the serial modem implementation
//! - [`storage`] - Daily log file persistence
//! - [`config`] - Configuration management and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    Monitor      │ ← Cycle orchestration
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Processing    │ ← Parse + validate readings
//! └─────────────────┘
//!          │
//! ┌───────┴─────────┐
//! │ Storage │ Sink  │ ← Daily log files / InfluxDB (retried)
//! └─────────────────┘
//! ```
//!
//! The radio transport feeds the monitor from the side; see `src/main.rs` for the
//! CLI entry point wiring the pieces together.

pub mod config;
pub mod logutil;
pub mod metrics;
pub mod monitor;
pub mod processing;
pub mod radio;
pub mod sink;
pub mod storage;
