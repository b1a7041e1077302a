//! Main Crate Error

use crate::query::DirectQueryError;

#[derive(thiserror::Error, Debug)]
/// kad-query crate error enum.
pub enum Error {
    /// A required input was not supplied, or was empty.
    #[error("Missing {0:?}")]
    MissingArgument(&'static str),

    /// The string is not a multiaddress ending in a `/p2p/<peer id>` component.
    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The string could not be decoded as a peer identity.
    #[error("Invalid peer identity {identity:?}: {reason}")]
    InvalidIdentity { identity: String, reason: String },

    /// The node could not be built or could not bind one of its listen addresses.
    #[error("Failed to bootstrap node: {0}")]
    Bootstrap(String),

    #[error(transparent)]
    /// A single-shot direct query failed, see [DirectQueryError::phase].
    DirectQuery(#[from] DirectQueryError),

    /// Failed to store a record or a provider announcement in the DHT.
    #[error("Failed to publish to the DHT: {0}")]
    Publish(String),

    /// A message payload could not be encoded or decoded.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The node's actor thread is no longer running.
    #[error("The node was shutdown")]
    NodeWasShutdown,

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}

/// Alias for results returned by this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
