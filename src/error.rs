use std::io::ErrorKind;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A record or collaborator that an invariant guarantees is missing.
    #[error("unexpected nil: {0}")]
    UnexpectedNil(String),

    /// Rejection of a user action; the message is shown to the user as is.
    #[error("{0}")]
    Validation(String),

    #[error("chain id {event} of event for {id} does not match stored chain id {stored}")]
    NonmatchingChainId { event: u64, stored: u64, id: Uuid },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("connectivity: {0}")]
    Connectivity(String),

    #[error("transaction failed: {0}")]
    TransactionFailed(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> anyhow::Error {
        Self::Validation(msg.into()).into()
    }

    pub fn unexpected_nil(msg: impl Into<String>) -> anyhow::Error {
        Self::UnexpectedNil(msg.into()).into()
    }

    /// True if anything in the chain says the node cannot be reached.
    pub fn is_connectivity(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            if let Some(EngineError::Connectivity(_)) = cause.downcast_ref::<EngineError>() {
                return true;
            }
            cause.downcast_ref::<std::io::Error>().is_some_and(|io| {
                matches!(
                    io.kind(),
                    ErrorKind::ConnectionRefused
                        | ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::NotConnected
                )
            })
        })
    }

    pub fn is_validation(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Validation(_))
        )
    }
}
