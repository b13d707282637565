use widgetsync_api::Id;

/// Failure of an outbound command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Request timed out")]
    Timeout,

    #[error("{message}")]
    Failure {
        status: Option<u16>,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Owner closed before the command completed")]
    Closed,
}

impl CommandError {
    pub fn failure<S: Into<String>>(status: Option<u16>, message: S) -> Self {
        Self::Failure {
            status,
            message: message.into(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, CommandError::Unauthorized)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Timeout)
    }

    /// Short tag a view layer can map to a message.
    pub fn label(&self) -> &'static str {
        match self {
            CommandError::Unauthorized => "unauthorized",
            CommandError::Timeout => "timeout",
            CommandError::Failure { .. } => "command_failed",
            CommandError::Network(_) => "network",
            CommandError::Decode(_) => "invalid_response",
            CommandError::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Stream closed")]
    Closed,

    #[error("Stream error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("Widget {0} has no virtual pin")]
    MissingVirtualPin(Id),

    #[error("Widget {0} has no device")]
    MissingDevice(Id),

    #[error("Pin {pin} is already used on device {device_id}")]
    PinInUse { device_id: Id, pin: String },

    #[error("Invalid layout for widget {0}")]
    InvalidLayout(Id),

    #[error("Widget {0} not found")]
    NotFound(Id),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid schedule: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
