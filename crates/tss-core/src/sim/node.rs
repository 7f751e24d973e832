//! Simulated signer node
//!
//! Holds one Shamir share of the server master secret and answers the
//! client protocol for the dealer engine. Session state is keyed by the full
//! session string and dropped on cleanup or when its TTL runs out.

use crate::coefficients::lagrange_coefficient;
use crate::field::{scalar_from_hex, scalar_to_hex};
use crate::mpc::messages::{CleanupRequest, PrecomputeRequest, SignRequest};
use crate::mpc::{ClientMessage, NodeMessage};
use crate::pubkey::AggregatedPublicKey;
use crate::session::Session;
use crate::sim::engine::{signature_fragment, DealerPayload};
use crate::types::{NodeIndex, PartyIndex};
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

/// Default lifetime of an abandoned session
pub const DEFAULT_SESSION_TTL_SECS: i64 = 300;

struct NodeSession {
    party_index: PartyIndex,
    additive_share: Scalar,
    nonce_point: ProjectivePoint,
    nonce_inverse: Scalar,
    expires_at: DateTime<Utc>,
}

impl Drop for NodeSession {
    fn drop(&mut self) {
        self.additive_share.zeroize();
        self.nonce_inverse.zeroize();
    }
}

/// Share file of one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeShare {
    pub node_index: NodeIndex,
    /// Hex scalar
    pub share: String,
}

impl NodeShare {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// One signer node
pub struct SimulatedNode {
    node_index: NodeIndex,
    share: Scalar,
    sessions: DashMap<String, NodeSession>,
    ttl: Duration,
}

impl SimulatedNode {
    pub fn new(node_index: NodeIndex, share: Scalar) -> Self {
        Self::with_ttl(node_index, share, DEFAULT_SESSION_TTL_SECS)
    }

    pub fn with_ttl(node_index: NodeIndex, share: Scalar, ttl_secs: i64) -> Self {
        Self {
            node_index,
            share,
            sessions: DashMap::new(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn from_share(share: &NodeShare, ttl_secs: i64) -> Result<Self> {
        if share.node_index == 0 {
            return Err(Error::Configuration("node index 0 is reserved".into()));
        }
        Ok(Self::with_ttl(share.node_index, scalar_from_hex(&share.share)?, ttl_secs))
    }

    pub fn node_index(&self) -> NodeIndex {
        self.node_index
    }

    /// Number of sessions currently holding state
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Answer one client message received on a connection opened under
    /// `socket_scope`. Failures are reported back as [`NodeMessage::Error`].
    pub fn handle(&self, socket_scope: &str, message: &ClientMessage) -> NodeMessage {
        let result = match message {
            ClientMessage::Precompute(request) => self.precompute(socket_scope, request),
            ClientMessage::Sign(request) => self.sign(request),
            ClientMessage::Cleanup(request) => self.cleanup(request),
        };

        result.unwrap_or_else(|e| {
            warn!(node = self.node_index, kind = message.kind(), "Rejected request: {}", e);
            NodeMessage::Error {
                party_index: None,
                message: e.to_string(),
            }
        })
    }

    fn precompute(&self, socket_scope: &str, request: &PrecomputeRequest) -> Result<NodeMessage> {
        let session = Session::parse(&request.session)?;
        if session.socket_scope() != socket_scope {
            return Err(Error::Consistency(
                "session does not belong to this connection".into(),
            ));
        }
        check_signatures(&request.signatures)?;

        let parties = request.parties.len();
        let expected: Vec<PartyIndex> = (0..parties).collect();
        if parties < 3 || request.parties != expected || request.party_index + 1 >= parties {
            return Err(Error::Configuration(format!(
                "party index {} invalid for parties {:?}",
                request.party_index, request.parties
            )));
        }

        let coefficient = request
            .coefficient_for(self.node_index)
            .ok_or_else(|| {
                Error::Configuration(format!("no coefficient for node {}", self.node_index))
            })
            .and_then(scalar_from_hex)?;
        AggregatedPublicKey::from_base64(&request.public_key)?;
        let payload = DealerPayload::decode(&request.engine_payload)?;

        let party_ids: Vec<u32> = (1..=parties as u32).collect();
        let weight = lagrange_coefficient(&party_ids, request.party_index as u32 + 1, 0)?;

        let entry = NodeSession {
            party_index: request.party_index,
            additive_share: weight * coefficient * self.share,
            nonce_point: payload.nonce_point()?,
            nonce_inverse: payload.nonce_inverse()?,
            expires_at: Utc::now() + self.ttl,
        };

        match self.sessions.entry(request.session.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::Consistency("session already precomputed".into()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }

        debug!(
            node = self.node_index,
            party_index = request.party_index,
            scope = socket_scope,
            "Precompute complete"
        );
        Ok(NodeMessage::Ready {
            party_index: request.party_index,
        })
    }

    fn sign(&self, request: &SignRequest) -> Result<NodeMessage> {
        check_signatures(&request.signatures)?;

        let digest = STANDARD
            .decode(&request.msg_hash)
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        let message = STANDARD
            .decode(&request.original_message)
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        if request.hash_algo.digest(&message).as_slice() != digest.as_slice() {
            return Err(Error::Consistency(format!(
                "message does not hash to the supplied {} digest",
                request.hash_algo
            )));
        }

        let session = self
            .sessions
            .get(&request.session)
            .ok_or_else(|| Error::Consistency("unknown session".into()))?;

        let fragment = signature_fragment(
            &session.nonce_inverse,
            &session.nonce_point,
            &session.additive_share,
        );

        debug!(node = self.node_index, party_index = session.party_index, "Produced fragment");
        Ok(NodeMessage::Fragment {
            party_index: session.party_index,
            fragment: scalar_to_hex(&fragment),
        })
    }

    fn cleanup(&self, request: &CleanupRequest) -> Result<NodeMessage> {
        check_signatures(&request.signatures)?;
        if self.sessions.remove(&request.session).is_some() {
            debug!(node = self.node_index, "Session state released");
        }
        Ok(NodeMessage::CleanedUp)
    }

    /// Drop sessions past their TTL, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.expires_at > now);
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            info!(node = self.node_index, purged, "Purged expired sessions");
        }
        purged
    }
}

impl Drop for SimulatedNode {
    fn drop(&mut self) {
        self.share.zeroize();
    }
}

fn check_signatures(signatures: &[String]) -> Result<()> {
    if signatures.is_empty() || signatures.iter().any(String::is_empty) {
        return Err(Error::Attestation("request carries no session signatures".into()));
    }
    Ok(())
}
