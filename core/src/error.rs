use strum::IntoStaticStr;

/// Everything that can go wrong between an agent's POST and the stores.
///
/// Only [`Error::Unauthorized`] and [`Error::InvalidPayload`] are meant for
/// the HTTP caller; the remaining variants are logged and swallowed.
#[derive(thiserror::Error, Debug, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Error {
    #[error("this node is not leader")]
    Unauthorized,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("forwarding to the metric sink failed: {0}")]
    SinkUnavailable(String),
    #[error("persisting the metric store failed: {0}")]
    PersistenceFailure(String),
    #[error("leader check failed: {0}")]
    OracleFailure(String),
}

impl Error {
    /// Short machine-readable reason, e.g. `invalid_payload`.
    pub fn reason(&self) -> &'static str {
        self.into()
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
