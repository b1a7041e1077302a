//! Query strategies: a DHT traversal or a single direct request.

mod direct;
mod lookup;

use std::time::Duration;

use tracing::{info, warn};

use crate::{
    common::{PeerAddress, PeerIdentity},
    protocol::{Request, Response},
    Error, Node, Result,
};

pub use direct::{DirectQueryError, Failure, Phase};
pub use lookup::{peer_record, Lookup, LookupKind, LookupRequest, LookupResult, Record};

pub(crate) use lookup::LookupEvent;

#[derive(Clone, Debug, PartialEq, Eq)]
/// What a [Query] produced.
pub enum QueryOutcome {
    Lookup(LookupResult),
    Direct {
        /// The candidate that answered.
        from: PeerAddress,
        response: Response,
    },
}

/// Something that can resolve a target identity using a running [Node].
pub trait Query {
    fn execute(&self, node: &Node, target: &PeerIdentity) -> Result<QueryOutcome>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
/// How a target should be resolved.
pub enum QueryStrategy {
    /// Traverse the DHT.
    #[default]
    #[value(name = "dht")]
    DhtLookup,
    /// Ask the bootstrap nodes directly, skipping the traversal.
    #[value(name = "direct")]
    DirectQuery,
}

impl QueryStrategy {
    pub fn into_query(
        self,
        bootnodes: Vec<PeerAddress>,
        kind: LookupKind,
        deadline: Option<Duration>,
    ) -> Box<dyn Query> {
        match self {
            QueryStrategy::DhtLookup => Box::new(DhtLookup { kind, deadline }),
            QueryStrategy::DirectQuery => Box::new(DirectQuery {
                candidates: bootnodes,
                deadline,
            }),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DhtLookup {
    pub kind: LookupKind,
    pub deadline: Option<Duration>,
}

impl Query for DhtLookup {
    fn execute(&self, node: &Node, target: &PeerIdentity) -> Result<QueryOutcome> {
        let mut request = LookupRequest::new(target.record_key()).with_kind(self.kind);
        if let Some(deadline) = self.deadline {
            request = request.with_deadline(deadline);
        }

        info!(%target, kind = ?self.kind, deadline = ?self.deadline, "Looking up target in the DHT");

        let result = node.lookup(request)?.into_result()?;

        info!(
            records = result.records.len(),
            timed_out = result.timed_out,
            "Lookup finished"
        );

        Ok(QueryOutcome::Lookup(result))
    }
}

#[derive(Clone, Debug, Default)]
/// Send a [Request] to each candidate in order, until one answers.
pub struct DirectQuery {
    pub candidates: Vec<PeerAddress>,
    /// Applies to each candidate separately.
    pub deadline: Option<Duration>,
}

impl Query for DirectQuery {
    fn execute(&self, node: &Node, target: &PeerIdentity) -> Result<QueryOutcome> {
        let mut last_error = None;

        for candidate in &self.candidates {
            info!(address = %candidate, %target, "Sending direct query");

            match node.direct_query(candidate, Request::new(target.peer_id()), self.deadline) {
                Ok(response) => {
                    return Ok(QueryOutcome::Direct {
                        from: candidate.clone(),
                        response,
                    })
                }
                Err(Error::DirectQuery(error)) => {
                    warn!(%error, "Direct query failed");
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        match last_error {
            Some(error) => Err(error.into()),
            None => Err(Error::MissingArgument("bootnodes")),
        }
    }
}
