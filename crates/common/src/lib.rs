use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod log_sink;
pub mod logging;
pub mod wire;

pub use config::{load_config, ClientConfig, ControlConfig, ControllerConfig, LinkConfig};
pub use error::{DecodeError, LinkError};
pub use log_sink::LogSink;

/// Tick value carried by the last datagram of a telemetry stream.
pub const SENTINEL_TICK: i32 = -1;

/// Upper bound on user plot points attached to a single sample.
pub const MAX_PLOTS: usize = 5;

/// Longest plot label in bytes. With [`MAX_PLOTS`] labels at this length a
/// sample still fits in [`wire::MAX_DATAGRAM_LEN`].
pub const MAX_LABEL_LEN: usize = 64;

/// Longest log message in bytes kept by a [`LogSink`].
pub const MAX_LOG_MESSAGE_LEN: usize = 1024;

/// Shortens `text` to at most `max_len` bytes without splitting a character.
pub fn truncate_utf8(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

/// Sensor source the controller closes its loop around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Encoder,
    Midori,
}

impl Mode {
    pub fn toggled(self) -> Self {
        match self {
            Mode::Encoder => Mode::Midori,
            Mode::Midori => Mode::Encoder,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Mode::Encoder => 0,
            Mode::Midori => 1,
        }
    }

    pub fn from_i32(value: i32) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(Mode::Encoder),
            1 => Ok(Mode::Midori),
            other => Err(DecodeError::UnknownMode(other)),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Encoder => write!(f, "Encoder"),
            Mode::Midori => write!(f, "Midori"),
        }
    }
}

/// Controller status reported in every ping response.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Status {
    pub running: bool,
    pub enabled: bool,
    pub mode: Mode,
    /// Observed loop rate in Hz.
    pub frequency: f64,
    pub misses: i32,
    /// Fraction of each period spent waiting for the next tick.
    pub wait_ratio: f64,
}

/// User supplied value streamed next to the controller state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotPoint {
    pub label: String,
    pub value: f64,
}

/// One control tick worth of telemetry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    pub tick: i32,
    /// Ideal controller time [s].
    pub time: f64,
    /// Amplifier sense voltage [V].
    pub sense: f64,
    /// Amplifier command voltage [V].
    pub command: f64,
    /// Midori potentiometer voltage [V].
    pub midori: f64,
    /// Encoder position [counts].
    pub encoder: i32,
    pub enable: bool,
    pub plots: Vec<PlotPoint>,
}

impl Sample {
    pub fn is_sentinel(&self) -> bool {
        self.tick == SENTINEL_TICK
    }
}

/// Log severities, numbered as they travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Debug,
    Verbose,
}

impl Severity {
    pub fn as_i32(self) -> i32 {
        match self {
            Severity::Error => 1,
            Severity::Warning => 2,
            Severity::Info => 3,
            Severity::Debug => 4,
            Severity::Verbose => 5,
        }
    }

    pub fn from_i32(value: i32) -> Result<Self, DecodeError> {
        match value {
            1 => Ok(Severity::Error),
            2 => Ok(Severity::Warning),
            3 => Ok(Severity::Info),
            4 => Ok(Severity::Debug),
            5 => Ok(Severity::Verbose),
            other => Err(DecodeError::UnknownSeverity(other)),
        }
    }
}

impl From<&tracing::Level> for Severity {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Severity::Error,
            tracing::Level::WARN => Severity::Warning,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::DEBUG => Severity::Debug,
            tracing::Level::TRACE => Severity::Verbose,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub severity: Severity,
    pub message: String,
}

impl LogRecord {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// Messages the client may send over the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Ping,
    Enable,
    Disable,
    ToggleMode,
    ZeroReference,
    Shutdown,
}

impl Command {
    pub fn tag(self) -> i32 {
        match self {
            Command::Ping => 0,
            Command::Enable => 1,
            Command::Disable => 2,
            Command::ToggleMode => 3,
            Command::ZeroReference => 4,
            Command::Shutdown => 5,
        }
    }

    pub fn from_tag(tag: i32) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(Command::Ping),
            1 => Ok(Command::Enable),
            2 => Ok(Command::Disable),
            3 => Ok(Command::ToggleMode),
            4 => Ok(Command::ZeroReference),
            5 => Ok(Command::Shutdown),
            other => Err(DecodeError::UnknownCommand(other)),
        }
    }
}

/// Payload answering a `Ping`: the status snapshot plus the drained logs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PingResponse {
    pub status: Status,
    pub logs: Vec<LogRecord>,
}
