use std::fmt;

/// Sensor contact status carried in the Heart Rate Measurement flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorContact {
    /// The sensor does not support contact detection.
    #[default]
    Unknown,
    Detected,
    NotDetected,
}

/// One decoded Heart Rate Measurement notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateSample {
    /// Beats per minute.
    pub value: u16,
    pub sensor_contact: SensorContact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Subscribing,
    Streaming,
    Disconnecting,
    ErrorBackoff,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Disconnecting => "disconnecting",
            Self::ErrorBackoff => "error backoff",
        };
        f.write_str(name)
    }
}

/// Events flowing from the Bluetooth worker to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HrEvent {
    /// Notifications are flowing from the device at `address`.
    Connected(String),
    StatusChanged(StatusMessage),
    SampleUpdated(HeartRateSample),
    /// A connection cycle failed. `attempts_remaining` is `None` once
    /// automatic retries are exhausted and only a command can restart.
    ErrorRaised {
        message: String,
        attempts_remaining: Option<u32>,
    },
    Disconnected,
}

/// Commands flowing from the presentation layer to the Bluetooth worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrCommand {
    /// Retry now, preferring the last connected device.
    ManualReconnect,
    /// Retry now with a fresh discovery, ignoring the last connected device.
    FullScan,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: MessageSeverity::Info,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: MessageSeverity::Success,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: MessageSeverity::Warning,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
}
