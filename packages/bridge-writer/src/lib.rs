pub mod chain;
pub mod classifier;
pub mod compliance;
pub mod config;
pub mod metrics;
pub mod proposal;
pub mod types;
pub mod writer;

pub use config::Config;
pub use types::{ChainId, DepositNonce, Message, MessageType, PayloadField, ResourceId};
pub use writer::Writer;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Chain connection lost: {0}")]
    ConnectionLost(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compliance check rejected: {0}")]
    ComplianceRejected(String),

    #[error("Cancelled by stop signal")]
    Cancelled,

    #[error("Malformed payload at index {index}: {reason}")]
    MalformedPayload { index: usize, reason: String },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(MessageType),

    #[error("Proposal data error: {0}")]
    ProposalData(String),
}
