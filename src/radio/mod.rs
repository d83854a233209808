//! # Radio Transport Module
//!
//! Communication with the LoRa sensor link. The core only ever sees the
//! [`RadioLink`] capability trait — send a handshake, receive one text
//! message with a timeout — so the orchestrator and its tests never depend
//! on physical hardware. The serial-attached modem implementation is gated
//! behind the `serial` cargo feature.
//!
//! ## Configuration
//!
//! ```toml
//! [radio]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! ```
//!
//! Messages are newline-delimited text frames; payloads are decoded
//! permissively (lossy UTF-8) since the wire grammar is checked downstream
//! by the parser.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Capability seam for the radio: handshake out, text frames in.
#[async_trait]
pub trait RadioLink {
    /// Send a handshake payload to trigger a device response. Failures are
    /// logged and reported as `false`; they never abort the process.
    async fn send_handshake(&mut self, payload: &str) -> bool;

    /// Receive one text message, waiting up to `timeout`. `Ok(None)` means
    /// no frame arrived in time, which is a normal outcome.
    async fn receive_message(&mut self, timeout: Duration) -> Result<Option<String>>;
}

#[cfg(feature = "serial")]
pub use self::serial::LoraModem;

#[cfg(feature = "serial")]
mod serial {
    use super::RadioLink;
    use crate::config::RadioConfig;
    use crate::logutil::escape_log;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use log::{debug, error, info};
    use std::io::{Read, Write};
    use std::time::Duration;
    use tokio::time::sleep;

    /// Serial-attached LoRa modem speaking newline-delimited text frames.
    pub struct LoraModem {
        port_name: String,
        port: Box<dyn serialport::SerialPort>,
        rx_buf: Vec<u8>,
    }

    impl LoraModem {
        /// Open the configured serial port. Failure here is fatal at startup;
        /// the caller exits nonzero before entering the polling loop.
        pub async fn open(config: &RadioConfig) -> Result<Self> {
            info!(
                "Initializing LoRa modem on {} at {} baud",
                config.port, config.baud_rate
            );

            let mut builder =
                serialport::new(&config.port, config.baud_rate).timeout(Duration::from_millis(500));
            // Some USB serial adapters need explicit settings
            #[cfg(unix)]
            {
                builder = builder
                    .data_bits(serialport::DataBits::Eight)
                    .stop_bits(serialport::StopBits::One)
                    .parity(serialport::Parity::None);
            }
            let mut port = builder
                .open()
                .map_err(|e| anyhow!("Failed to open serial port {}: {}", config.port, e))?;

            // Toggle DTR/RTS to wake the modem (common for ESP32 based boards)
            let _ = port.write_data_terminal_ready(true);
            let _ = port.write_request_to_send(true);
            sleep(Duration::from_millis(150)).await;

            // Discard any buffered startup chatter
            let mut purge_buf = [0u8; 512];
            if let Ok(available) = port.bytes_to_read() {
                if available > 0 {
                    let _ = port.read(&mut purge_buf);
                }
            }

            Ok(Self {
                port_name: config.port.clone(),
                port,
                rx_buf: Vec::new(),
            })
        }

        pub fn port_name(&self) -> &str {
            &self.port_name
        }

        /// Pop the first complete newline-terminated frame out of the buffer.
        fn take_line(&mut self) -> Option<String> {
            let pos = self.rx_buf.iter().position(|&b| b == b'\n')?;
            let frame: Vec<u8> = self.rx_buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&frame)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            Some(text)
        }
    }

    #[async_trait]
    impl RadioLink for LoraModem {
        async fn send_handshake(&mut self, payload: &str) -> bool {
            let result = self
                .port
                .write_all(payload.as_bytes())
                .and_then(|_| self.port.write_all(b"\n"))
                .and_then(|_| self.port.flush());
            match result {
                Ok(()) => {
                    info!("Handshake message sent: {}", payload);
                    true
                }
                Err(e) => {
                    error!("Failed to send handshake message: {}", e);
                    false
                }
            }
        }

        async fn receive_message(&mut self, timeout: Duration) -> Result<Option<String>> {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                if let Some(line) = self.take_line() {
                    debug!("Received raw packet: {}", escape_log(&line));
                    return Ok(Some(line));
                }
                if tokio::time::Instant::now() >= deadline {
                    debug!("No packet received within timeout");
                    return Ok(None);
                }

                let mut buffer = [0u8; 1024];
                match self.port.read(&mut buffer) {
                    Ok(n) if n > 0 => self.rx_buf.extend_from_slice(&buffer[..n]),
                    Ok(_) => {}
                    Err(e)
                        if e.kind() == std::io::ErrorKind::TimedOut
                            || e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(anyhow!("Error receiving message: {}", e)),
                }
                sleep(Duration::from_millis(40)).await;
            }
        }
    }
}
