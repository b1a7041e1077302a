//! Lookup target: a peer identity and its multihash form.

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use libp2p::{kad::RecordKey, PeerId};

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// An opaque peer identity.
///
/// The string form is base58, the hash form is the raw multihash bytes,
/// which is what the DHT indexes records and providers by.
pub struct PeerIdentity(PeerId);

impl PeerIdentity {
    pub fn peer_id(&self) -> &PeerId {
        &self.0
    }

    /// The multihash bytes of this identity.
    pub fn to_multihash_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    /// The DHT key for records and providers published under this identity.
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(&self.0.to_bytes())
    }
}

impl From<PeerId> for PeerIdentity {
    fn from(peer_id: PeerId) -> Self {
        Self(peer_id)
    }
}

impl FromStr for PeerIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PeerId::from_str(s)
            .map(Self)
            .map_err(|error| Error::InvalidIdentity {
                identity: s.to_string(),
                reason: error.to_string(),
            })
    }
}

impl Display for PeerIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse the lookup target, rejecting empty input as missing.
pub fn parse_identity(input: &str) -> Result<PeerIdentity> {
    let input = input.trim();

    if input.is_empty() {
        return Err(Error::MissingArgument("query"));
    }

    input.parse()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn string_round_trip_keeps_hash_form() {
        let identity = PeerIdentity::from(PeerId::random());

        let decoded: PeerIdentity = identity.to_string().parse().unwrap();

        assert_eq!(decoded.to_multihash_bytes(), identity.to_multihash_bytes());
        assert_eq!(decoded.record_key(), identity.record_key());
    }

    #[test]
    fn record_key_is_multihash() {
        let identity = PeerIdentity::from(PeerId::random());

        assert_eq!(
            identity.record_key().to_vec(),
            identity.peer_id().to_bytes()
        );
    }

    #[test]
    fn invalid_identity() {
        match parse_identity("not-a-peer-id") {
            Err(Error::InvalidIdentity { identity, .. }) => assert_eq!(identity, "not-a-peer-id"),
            other => panic!("expected InvalidIdentity, got {other:?}"),
        }
    }

    #[test]
    fn empty_identity_is_missing() {
        assert!(matches!(
            parse_identity("  "),
            Err(Error::MissingArgument("query"))
        ));
    }
}
