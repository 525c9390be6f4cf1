//! Line-oriented SCPI transports
//!
//! Instrument drivers send newline-terminated SCPI commands and read
//! newline-terminated replies. The byte pipe underneath is a [`ScpiTransport`]:
//!
//! | Address form | Transport |
//! |--------------|-----------|
//! | `TCPIP0::192.168.0.20::5025::SOCKET`, `192.168.0.20:5025` | [`TcpTransport`] |
//! | `ASRL/dev/ttyUSB0::INSTR`, `/dev/ttyUSB0`, `COM3` | `SerialTransport` (feature `instrument_serial`) |
//!
//! Connections open lazily on the first command so that building a driver never
//! blocks and an unreachable instrument surfaces as `IvError::InstrumentIo` inside
//! the session, where the safe-shutdown path handles it.

use crate::error::{AppResult, IvError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Default timeout for one command/reply exchange.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Default baud rate for serial instruments.
pub const DEFAULT_BAUD: u32 = 9600;

/// A newline-terminated command channel to one instrument.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a command that produces no reply.
    async fn write(&self, command: &str) -> AppResult<()>;

    /// Send a query and return its reply with the terminator stripped.
    async fn query(&self, command: &str) -> AppResult<String>;
}

/// Parsed instrument resource address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAddress {
    /// Raw SCPI socket
    Tcp {
        /// Host name or IP address
        host: String,
        /// Socket port (5025 on most LAN instruments)
        port: u16,
    },
    /// Serial line
    Serial {
        /// Device path (e.g., "/dev/ttyUSB0", "COM3")
        path: String,
        /// Baud rate
        baud: u32,
    },
    /// Simulated instrument; the remainder of the address is a free-form label
    Mock(String),
}

impl ResourceAddress {
    /// Parse a VISA-style or shorthand address.
    pub fn parse(address: &str) -> AppResult<Self> {
        let address = address.trim();
        let upper = address.to_ascii_uppercase();

        if upper.starts_with("MOCK") {
            return Ok(ResourceAddress::Mock(address.to_string()));
        }

        if upper.starts_with("TCPIP") {
            let parts: Vec<&str> = address.split("::").collect();
            return match parts.as_slice() {
                [_, host, port, suffix] if suffix.eq_ignore_ascii_case("SOCKET") => {
                    Ok(ResourceAddress::Tcp {
                        host: host.to_string(),
                        port: parse_port(port, address)?,
                    })
                }
                _ => Err(IvError::InvalidAddress(format!(
                    "{} (only raw SOCKET resources are supported over TCP/IP)",
                    address
                ))),
            };
        }

        if upper.starts_with("ASRL") {
            let path = address[4..]
                .trim_end_matches("::INSTR")
                .trim_end_matches("::instr");
            if path.is_empty() {
                return Err(IvError::InvalidAddress(address.to_string()));
            }
            return Ok(ResourceAddress::Serial {
                path: path.to_string(),
                baud: DEFAULT_BAUD,
            });
        }

        if address.starts_with("/dev/") || upper.starts_with("COM") {
            return Ok(ResourceAddress::Serial {
                path: address.to_string(),
                baud: DEFAULT_BAUD,
            });
        }

        if let Some((host, port)) = address.rsplit_once(':') {
            if !host.is_empty() && !host.contains(':') {
                return Ok(ResourceAddress::Tcp {
                    host: host.to_string(),
                    port: parse_port(port, address)?,
                });
            }
        }

        Err(IvError::InvalidAddress(format!(
            "{} (expected TCPIP::host::port::SOCKET, host:port, or a serial port)",
            address
        )))
    }

    /// Build the transport for this address.
    ///
    /// Mock addresses have no byte pipe and are rejected here; the registry hands
    /// them to the simulated instruments instead.
    pub fn open(&self) -> AppResult<Arc<dyn ScpiTransport>> {
        match self {
            ResourceAddress::Tcp { host, port } => {
                Ok(Arc::new(TcpTransport::new(host.clone(), *port)))
            }
            ResourceAddress::Serial { path, baud } => open_serial(path, *baud),
            ResourceAddress::Mock(label) => Err(IvError::InvalidAddress(format!(
                "{} is a simulated instrument address",
                label
            ))),
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceAddress::Tcp { host, port } => write!(f, "TCPIP0::{}::{}::SOCKET", host, port),
            ResourceAddress::Serial { path, .. } => write!(f, "ASRL{}::INSTR", path),
            ResourceAddress::Mock(label) => write!(f, "{}", label),
        }
    }
}

fn parse_port(port: &str, address: &str) -> AppResult<u16> {
    port.parse::<u16>()
        .map_err(|_| IvError::InvalidAddress(format!("{} (bad port '{}')", address, port)))
}

#[cfg(feature = "instrument_serial")]
fn open_serial(path: &str, baud: u32) -> AppResult<Arc<dyn ScpiTransport>> {
    Ok(Arc::new(SerialTransport::new(path, baud)))
}

#[cfg(not(feature = "instrument_serial"))]
fn open_serial(_path: &str, _baud: u32) -> AppResult<Arc<dyn ScpiTransport>> {
    Err(IvError::FeatureNotEnabled("instrument_serial".to_string()))
}

/// Write one command and optionally read one reply line.
async fn exchange<S>(
    stream: &mut BufReader<S>,
    command: &str,
    expect_reply: bool,
    timeout: Duration,
) -> AppResult<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = format!("{}\n", command);
    tokio::time::timeout(timeout, stream.get_mut().write_all(line.as_bytes()))
        .await
        .map_err(|_| IvError::InstrumentIo(format!("write timeout for '{}'", command)))?
        .map_err(|e| IvError::InstrumentIo(format!("write failed for '{}': {}", command, e)))?;

    if !expect_reply {
        return Ok(None);
    }

    let mut reply = String::new();
    let read = tokio::time::timeout(timeout, stream.read_line(&mut reply))
        .await
        .map_err(|_| IvError::InstrumentIo(format!("read timeout for '{}'", command)))?
        .map_err(|e| IvError::InstrumentIo(format!("read failed for '{}': {}", command, e)))?;

    if read == 0 {
        return Err(IvError::InstrumentIo(format!(
            "connection closed while waiting for '{}'",
            command
        )));
    }

    Ok(Some(reply.trim_end_matches(['\r', '\n']).to_string()))
}

/// Run one exchange on an open link. A failed exchange closes the link so the
/// next command reopens it from a clean state.
async fn exchange_on<S>(
    link: &mut Option<BufReader<S>>,
    command: &str,
    expect_reply: bool,
    timeout: Duration,
) -> AppResult<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let stream = link
        .as_mut()
        .ok_or_else(|| IvError::Internal(format!("link closed before '{}'", command)))?;
    let result = exchange(stream, command, expect_reply, timeout).await;
    if result.is_err() {
        *link = None;
    }
    result
}

/// Raw SCPI socket transport
pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Mutex<Option<BufReader<TcpStream>>>,
}

impl TcpTransport {
    /// Create a transport; the socket opens on first use.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_IO_TIMEOUT,
            stream: Mutex::new(None),
        }
    }

    /// Override the per-exchange timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exchange(&self, command: &str, expect_reply: bool) -> AppResult<Option<String>> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            let addr = format!("{}:{}", self.host, self.port);
            let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| IvError::InstrumentIo(format!("connect timeout for {}", addr)))?
                .map_err(|e| IvError::InstrumentIo(format!("connect to {} failed: {}", addr, e)))?;
            tracing::debug!(%addr, "SCPI socket connected");
            *guard = Some(BufReader::new(stream));
        }

        exchange_on(&mut *guard, command, expect_reply, self.timeout).await
    }
}

#[async_trait]
impl ScpiTransport for TcpTransport {
    async fn write(&self, command: &str) -> AppResult<()> {
        self.exchange(command, false).await.map(|_| ())
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        self.exchange(command, true)
            .await?
            .ok_or_else(|| IvError::InstrumentIo(format!("no reply to '{}'", command)))
    }
}

/// Serial line transport (8N1, no flow control)
#[cfg(feature = "instrument_serial")]
pub struct SerialTransport {
    path: String,
    baud: u32,
    timeout: Duration,
    port: Mutex<Option<BufReader<tokio_serial::SerialStream>>>,
}

#[cfg(feature = "instrument_serial")]
impl SerialTransport {
    /// Create a transport; the port opens on first use.
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
            timeout: DEFAULT_IO_TIMEOUT,
            port: Mutex::new(None),
        }
    }

    async fn exchange(&self, command: &str, expect_reply: bool) -> AppResult<Option<String>> {
        use tokio_serial::SerialPortBuilderExt;

        let mut guard = self.port.lock().await;
        if guard.is_none() {
            let port = tokio_serial::new(&self.path, self.baud)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .map_err(|e| {
                    IvError::InstrumentIo(format!("failed to open {}: {}", self.path, e))
                })?;
            tracing::debug!(path = %self.path, baud = self.baud, "serial port opened");
            *guard = Some(BufReader::new(port));
        }

        exchange_on(&mut *guard, command, expect_reply, self.timeout).await
    }
}

#[cfg(feature = "instrument_serial")]
#[async_trait]
impl ScpiTransport for SerialTransport {
    async fn write(&self, command: &str) -> AppResult<()> {
        self.exchange(command, false).await.map(|_| ())
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        self.exchange(command, true)
            .await?
            .ok_or_else(|| IvError::InstrumentIo(format!("no reply to '{}'", command)))
    }
}
