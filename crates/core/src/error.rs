use thiserror::Error;
use vault_providers::ProviderError;

/// Failure taxonomy for the engine. Only `Quota` and `TransientService`
/// feed back into the rate limiter; everything else leaves it untouched.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("provider quota exhausted: {0}")]
    Quota(String),
    #[error("provider temporarily unavailable: {0}")]
    TransientService(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not understand classifier response: {0}")]
    Parse(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Unknown(String),
}

impl EngineError {
    /// Short message safe to surface to a person; never a raw payload or
    /// stack trace.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Auth(_) => "The classification service rejected the API key.".into(),
            EngineError::Quota(_) => {
                "The classification service is rate limiting requests. Try again later.".into()
            }
            EngineError::TransientService(_) => {
                "The classification service had a temporary problem.".into()
            }
            EngineError::Network(_) => "Could not reach the classification service.".into(),
            EngineError::Io(_) => "The file could not be read or written.".into(),
            EngineError::Parse(_) => "The classification service returned an unusable reply.".into(),
            EngineError::Cancelled => "The operation was cancelled.".into(),
            EngineError::Unknown(_) => "Something unexpected went wrong.".into(),
        }
    }
}

impl From<ProviderError> for EngineError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Auth(m) => EngineError::Auth(m),
            ProviderError::Quota(m) => EngineError::Quota(m),
            ProviderError::TransientServer(m) => EngineError::TransientService(m),
            ProviderError::Network(m) => EngineError::Network(m),
            ProviderError::Parse(m) => EngineError::Parse(m),
            ProviderError::UnknownProvider(m) | ProviderError::Unknown(m) => {
                EngineError::Unknown(m)
            }
        }
    }
}
