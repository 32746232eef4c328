//! Serial transport for the modem's AT port.
//!
//! Cellular modules (Quectel EC2x/M26, SIMCom SIM800) usually enumerate as
//! several USB serial interfaces. Only one of them speaks AT commands, and
//! it normally runs at 115200 baud with 8N1 framing and no flow control.
//!
//! # Example
//!
//! ```no_run
//! use gsmlink_transport::SerialTransport;
//! use gsmlink_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> gsmlink_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB2", 115_200).await?;
//!
//! transport.send(b"AT\r\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use gsmlink_core::error::{Error, Result};
use gsmlink_core::transport::Transport;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialPortType, SerialStream};

pub use tokio_serial::{DataBits, FlowControl, Parity, StopBits};

/// Line settings for an AT port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    /// Usually `None` on USB AT ports. Some UART wirings need RTS/CTS.
    pub flow_control: FlowControl,
    /// Hold DTR high while the port is open. Most modems hang up an
    /// active call when DTR drops.
    pub assert_dtr: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            assert_dtr: true,
        }
    }
}

/// A serial port found on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    /// OS path or name, e.g. `/dev/ttyUSB2` or `COM5`.
    pub name: String,
    /// USB vendor/product ids when the port sits on a USB device.
    pub usb_id: Option<(u16, u16)>,
    /// Manufacturer and product strings reported by the USB device.
    pub description: Option<String>,
}

impl fmt::Display for PortEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some((vid, pid)) = self.usb_id {
            write!(f, " [{vid:04x}:{pid:04x}]")?;
        }
        if let Some(desc) = &self.description {
            write!(f, " {desc}")?;
        }
        Ok(())
    }
}

/// Enumerate serial ports, sorted by name.
pub fn available_ports() -> Result<Vec<PortEntry>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| Error::Transport(format!("failed to enumerate serial ports: {e}")))?;

    let mut entries: Vec<PortEntry> = ports
        .into_iter()
        .map(|port| match port.port_type {
            SerialPortType::UsbPort(usb) => {
                let description = [usb.manufacturer, usb.product]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                PortEntry {
                    name: port.port_name,
                    usb_id: Some((usb.vid, usb.pid)),
                    description: (!description.is_empty()).then_some(description),
                }
            }
            _ => PortEntry {
                name: port.port_name,
                usb_id: None,
                description: None,
            },
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// [`Transport`] over a local serial port.
pub struct SerialTransport {
    stream: Option<SerialStream>,
    name: String,
}

impl SerialTransport {
    /// Open `port` at `baud_rate` with 8N1 framing.
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..SerialConfig::default()
        };
        Self::open_with_config(port, config).await
    }

    /// Open `port` with explicit line settings.
    ///
    /// ```no_run
    /// # use gsmlink_transport::{SerialTransport, SerialConfig, FlowControl};
    /// # async fn example() -> gsmlink_core::Result<()> {
    /// let config = SerialConfig {
    ///     flow_control: FlowControl::Hardware,
    ///     ..SerialConfig::default()
    /// };
    /// let transport = SerialTransport::open_with_config("/dev/ttyS1", config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open_with_config(port: &str, config: SerialConfig) -> Result<Self> {
        tracing::debug!(port, ?config, "opening modem port");

        let mut stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(config.data_bits)
            .stop_bits(config.stop_bits)
            .parity(config.parity)
            .flow_control(config.flow_control)
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port, error = %e, "cannot open modem port");
                Error::Transport(format!("cannot open {port}: {e}"))
            })?;

        if config.assert_dtr {
            if let Err(e) = stream.write_data_terminal_ready(true) {
                tracing::warn!(port, error = %e, "could not raise DTR");
            }
        }

        tracing::info!(port, baud_rate = config.baud_rate, "modem port open");
        Ok(Self {
            stream: Some(stream),
            name: port.to_string(),
        })
    }

    /// The port path this transport was opened on.
    pub fn port_name(&self) -> &str {
        &self.name
    }
}

fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof => {
            Error::ConnectionLost
        }
        _ => Error::Io(e),
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        tracing::trace!(
            port = %self.name,
            line = %String::from_utf8_lossy(data).trim_end(),
            "tx"
        );

        stream.write_all(data).await.map_err(map_io_error)?;
        stream.flush().await.map_err(map_io_error)
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, stream.read(buf)).await {
            Err(_) => Err(Error::Timeout),
            // USB modems read zero bytes after a reset or unplug.
            Ok(Ok(0)) => {
                tracing::warn!(port = %self.name, "modem port reached end of stream");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(port = %self.name, bytes = n, "rx");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.name, error = %e, "modem port read failed");
                Err(map_io_error(e))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.flush().await {
                tracing::debug!(port = %self.name, error = %e, "flush on close failed");
            }
            tracing::info!(port = %self.name, "modem port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
