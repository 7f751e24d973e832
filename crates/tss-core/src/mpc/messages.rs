//! Wire messages between the client and signer nodes

use crate::types::{HashAlgorithm, NodeIndex, PartyIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Precompute request: everything a node needs to set up its signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecomputeRequest {
    /// Full session string
    pub session: String,
    /// Slot of the receiving node
    pub party_index: PartyIndex,
    /// Slots of every participant, client last
    pub parties: Vec<PartyIndex>,
    /// Coefficient of every participating node (decimal node index → 64-char hex)
    pub server_coeffs: BTreeMap<String, String>,
    /// Base64 `x || y` of the signing public key
    pub public_key: String,
    /// Attestation signatures
    pub signatures: Vec<String>,
    /// Opaque engine material
    pub engine_payload: String,
}

impl PrecomputeRequest {
    /// Coefficient addressed to a node
    pub fn coefficient_for(&self, node: NodeIndex) -> Option<&str> {
        self.server_coeffs.get(&node.to_string()).map(String::as_str)
    }
}

/// Sign request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    pub session: String,
    /// Base64 message digest
    pub msg_hash: String,
    /// Base64 original message, for re-derivation of the digest
    pub original_message: String,
    pub hash_algo: HashAlgorithm,
    pub signatures: Vec<String>,
}

/// Release all state held for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupRequest {
    pub session: String,
    pub signatures: Vec<String>,
}

/// Client → node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Precompute(PrecomputeRequest),
    Sign(SignRequest),
    Cleanup(CleanupRequest),
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Precompute(_) => "precompute",
            ClientMessage::Sign(_) => "sign",
            ClientMessage::Cleanup(_) => "cleanup",
        }
    }
}

/// Node → client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeMessage {
    /// Precompute finished, node is ready to sign
    Ready { party_index: PartyIndex },
    /// Signature fragment, 64-char hex
    Fragment {
        party_index: PartyIndex,
        fragment: String,
    },
    /// Session state released
    CleanedUp,
    /// Request rejected
    Error {
        party_index: Option<PartyIndex>,
        message: String,
    },
}

impl NodeMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeMessage::Ready { .. } => "ready",
            NodeMessage::Fragment { .. } => "fragment",
            NodeMessage::CleanedUp => "cleaned_up",
            NodeMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_encoding() {
        let message = ClientMessage::Cleanup(CleanupRequest {
            session: "s".into(),
            signatures: vec!["sig".into()],
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "cleanup");
        assert_eq!(json["session"], "s");
    }

    #[test]
    fn test_node_message_decoding() {
        let ready: NodeMessage = serde_json::from_str(r#"{"type":"ready","party_index":2}"#).unwrap();
        assert_eq!(ready, NodeMessage::Ready { party_index: 2 });

        let error: NodeMessage =
            serde_json::from_str(r#"{"type":"error","party_index":null,"message":"boom"}"#).unwrap();
        assert_eq!(error.kind(), "error");
    }

    #[test]
    fn test_coefficient_keys_survive_json() {
        let request = PrecomputeRequest {
            session: "s".into(),
            party_index: 0,
            parties: vec![0, 1, 2, 3],
            server_coeffs: BTreeMap::from([("1".into(), "aa".into()), ("5".into(), "bb".into())]),
            public_key: String::new(),
            signatures: vec![],
            engine_payload: String::new(),
        };
        let json = serde_json::to_string(&ClientMessage::Precompute(request.clone())).unwrap();
        let decoded: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, ClientMessage::Precompute(request));
    }
}
