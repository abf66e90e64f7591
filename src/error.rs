use std::fmt;

#[derive(Debug)]
pub enum ArgusError {
    ProcessStart(String),
    CaptureInvocation(String),
    CaptureParse(String),
    UnexpectedCapture(String),
    Timeout(String),
    Cancelled(String),
    Model(String),
    Config(String),
    Io(String),
}

impl ArgusError {
    /// True for the three kinds a failed `ra` run can produce.
    pub fn is_capture_error(&self) -> bool {
        matches!(
            self,
            ArgusError::CaptureInvocation(_)
                | ArgusError::CaptureParse(_)
                | ArgusError::UnexpectedCapture(_)
        )
    }
}

impl fmt::Display for ArgusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgusError::ProcessStart(msg) => write!(f, "Failed to start capture daemon: {}", msg),
            ArgusError::CaptureInvocation(msg) => write!(f, "Failed to execute command: {}", msg),
            ArgusError::CaptureParse(msg) => write!(f, "Failed to parse CSV data: {}", msg),
            ArgusError::UnexpectedCapture(msg) => write!(f, "Unexpected error: {}", msg),
            ArgusError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            ArgusError::Cancelled(msg) => write!(f, "Cancelled: {}", msg),
            ArgusError::Model(msg) => write!(f, "Model error: {}", msg),
            ArgusError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ArgusError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for ArgusError {}

impl From<std::io::Error> for ArgusError {
    fn from(err: std::io::Error) -> Self {
        ArgusError::Io(err.to_string())
    }
}

impl From<csv::Error> for ArgusError {
    fn from(err: csv::Error) -> Self {
        ArgusError::Io(err.to_string())
    }
}

impl From<&str> for ArgusError {
    fn from(msg: &str) -> Self {
        ArgusError::Config(msg.to_string())
    }
}

impl From<String> for ArgusError {
    fn from(msg: String) -> Self {
        ArgusError::Config(msg)
    }
}

impl From<ctrlc::Error> for ArgusError {
    fn from(err: ctrlc::Error) -> Self {
        ArgusError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArgusError>;
