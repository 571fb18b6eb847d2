use crate::devices::DeviceKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("failed to query {kind} devices: {reason}")]
    DeviceQuery { kind: DeviceKind, reason: String },

    #[error("device '{name}' is unavailable: {reason}")]
    DeviceUnavailable { name: String, reason: String },

    #[error("device '{name}' cannot run at {sample_rate} Hz: {reason}")]
    FormatUnsupported {
        name: String,
        sample_rate: u32,
        reason: String,
    },

    #[error("audio stream stopped after {failures} consecutive failures")]
    StreamFailure { failures: u32 },

    #[error("device engine is not running")]
    EngineStopped,
}

impl Error {
    pub(crate) fn unavailable(name: &str, reason: impl ToString) -> Self {
        Error::DeviceUnavailable {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),
}
