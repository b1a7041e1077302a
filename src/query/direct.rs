//! Failures of a direct query, attributed to the phase they happened in.

use std::{
    fmt::{self, Display, Formatter},
    io,
};

use libp2p::{request_response::OutboundFailure, Multiaddr};

use crate::protocol::PROTOCOL_NAME;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Where a direct query was when it failed.
pub enum Phase {
    /// Establishing a connection to the remote peer.
    Dial,
    /// Negotiating the direct query protocol on a new stream.
    Negotiate,
    /// Writing the request or waiting for the response.
    Exchange,
    /// The response arrived but could not be decoded.
    Decode,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Phase::Dial => "dial",
            Phase::Negotiate => "protocol negotiation",
            Phase::Exchange => "exchange",
            Phase::Decode => "decode",
        };

        write!(f, "{phase}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// The deadline elapsed.
    TimedOut,
    Failed(String),
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Failure::TimedOut => write!(f, "timed out"),
            Failure::Failed(reason) => write!(f, "{reason}"),
        }
    }
}

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("Direct query to {address} failed during {phase}: {failure}")]
/// A direct query failed, nothing was received from `address`.
pub struct DirectQueryError {
    pub address: Multiaddr,
    pub phase: Phase,
    pub failure: Failure,
}

impl DirectQueryError {
    pub(crate) fn failed(address: Multiaddr, phase: Phase, reason: impl ToString) -> Self {
        Self {
            address,
            phase,
            failure: Failure::Failed(reason.to_string()),
        }
    }

    pub(crate) fn timed_out(address: Multiaddr, phase: Phase) -> Self {
        Self {
            address,
            phase,
            failure: Failure::TimedOut,
        }
    }

    pub(crate) fn from_outbound_failure(address: Multiaddr, error: &OutboundFailure) -> Self {
        #[allow(unreachable_patterns)]
        match error {
            OutboundFailure::DialFailure => Self::failed(address, Phase::Dial, "dial failed"),
            OutboundFailure::UnsupportedProtocols => Self::failed(
                address,
                Phase::Negotiate,
                format!("remote does not support {PROTOCOL_NAME}"),
            ),
            OutboundFailure::Timeout => Self::timed_out(address, Phase::Exchange),
            OutboundFailure::ConnectionClosed => {
                Self::failed(address, Phase::Exchange, "connection closed")
            }
            OutboundFailure::Io(error) if error.kind() == io::ErrorKind::InvalidData => {
                Self::failed(address, Phase::Decode, error)
            }
            OutboundFailure::Io(error) => Self::failed(address, Phase::Exchange, error),
            other => Self::failed(address, Phase::Exchange, other),
        }
    }

    /// Returns `true` if the query ran out of time rather than failing.
    pub fn is_timeout(&self) -> bool {
        self.failure == Failure::TimedOut
    }
}
