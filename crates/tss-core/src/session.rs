//! Session identity and party layout
//!
//! A session string binds the verifier identity, the key tag, the tag's
//! nonce and a fresh random nonce:
//!
//! ```text
//! verifier <D1> verifier_id <D2> tss_tag <D3> tss_nonce <D4> random_nonce
//! ```
//!
//! Every signing attempt gets its own random nonce, so two sessions built
//! from identical inputs never collide. The random nonce doubles as the
//! socket scope under which every connection of the session is opened.

use crate::types::{NodeIndex, PartyIndex};
use crate::{Error, Result};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Separates verifier name from verifier id
pub const DELIMITER_1: char = '\u{1c}';
/// Separates the identity from the key tag
pub const DELIMITER_2: char = '\u{15}';
/// Separates the key tag from the tag nonce
pub const DELIMITER_3: char = '\u{16}';
/// Separates the tag nonce from the random session nonce
pub const DELIMITER_4: char = '\u{17}';

const DELIMITERS: [char; 4] = [DELIMITER_1, DELIMITER_2, DELIMITER_3, DELIMITER_4];

/// Tag of the key every account starts with
pub const DEFAULT_TSS_TAG: &str = "default";

/// Hex length of the random session nonce (keccak256 output)
const RANDOM_NONCE_HEX_LEN: usize = 64;

/// Canonical identifier of one signing attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Session {
    verifier_name: String,
    verifier_id: String,
    tss_tag: String,
    tss_nonce: u32,
    random_nonce: String,
}

impl Session {
    /// Build a fresh session with a new random nonce
    pub fn build(
        verifier_name: &str,
        verifier_id: &str,
        tss_tag: &str,
        tss_nonce: u32,
    ) -> Result<Self> {
        Self::with_random_nonce(
            verifier_name,
            verifier_id,
            tss_tag,
            tss_nonce,
            random_session_nonce(),
        )
    }

    fn with_random_nonce(
        verifier_name: &str,
        verifier_id: &str,
        tss_tag: &str,
        tss_nonce: u32,
        random_nonce: String,
    ) -> Result<Self> {
        for (name, value) in [
            ("verifier name", verifier_name),
            ("verifier id", verifier_id),
            ("tss tag", tss_tag),
        ] {
            if value.is_empty() {
                return Err(Error::Configuration(format!("{} must not be empty", name)));
            }
            if value.contains(DELIMITERS) {
                return Err(Error::Configuration(format!(
                    "{} contains a reserved session delimiter",
                    name
                )));
            }
        }
        if random_nonce.len() != RANDOM_NONCE_HEX_LEN
            || !random_nonce.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(Error::Configuration(
                "random session nonce must be 64 hex characters".into(),
            ));
        }

        Ok(Self {
            verifier_name: verifier_name.to_string(),
            verifier_id: verifier_id.to_string(),
            tss_tag: tss_tag.to_string(),
            tss_nonce,
            random_nonce,
        })
    }

    /// Parse a session string back into its components
    pub fn parse(value: &str) -> Result<Self> {
        let malformed = || Error::Deserialization(format!("malformed session: {:?}", value));

        let (verifier_name, rest) = value.split_once(DELIMITER_1).ok_or_else(malformed)?;
        let (verifier_id, rest) = rest.split_once(DELIMITER_2).ok_or_else(malformed)?;
        let (tss_tag, rest) = rest.split_once(DELIMITER_3).ok_or_else(malformed)?;
        let (tss_nonce, random_nonce) = rest.split_once(DELIMITER_4).ok_or_else(malformed)?;
        let tss_nonce: u32 = tss_nonce.parse().map_err(|_| malformed())?;

        Self::with_random_nonce(
            verifier_name,
            verifier_id,
            tss_tag,
            tss_nonce,
            random_nonce.to_string(),
        )
        .map_err(|_| malformed())
    }

    /// Suffix after the last delimiter; scopes every connection of the session
    pub fn socket_scope(&self) -> &str {
        &self.random_nonce
    }

    /// `verifier <D1> verifier_id`
    pub fn verifier_identity(&self) -> String {
        format!("{}{}{}", self.verifier_name, DELIMITER_1, self.verifier_id)
    }

    pub fn verifier_name(&self) -> &str {
        &self.verifier_name
    }

    pub fn verifier_id(&self) -> &str {
        &self.verifier_id
    }

    pub fn tss_tag(&self) -> &str {
        &self.tss_tag
    }

    pub fn tss_nonce(&self) -> u32 {
        self.tss_nonce
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}{}{}",
            self.verifier_identity(),
            DELIMITER_2,
            self.tss_tag,
            DELIMITER_3,
            self.tss_nonce,
            DELIMITER_4,
            self.random_nonce
        )
    }
}

impl FromStr for Session {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Session::parse(s)
    }
}

/// keccak256(hex(32 random bytes) || unix millis), hex encoded
fn random_session_nonce() -> String {
    let mut entropy = [0u8; 32];
    OsRng.fill_bytes(&mut entropy);

    let mut hasher = Keccak256::new();
    hasher.update(hex::encode(entropy).as_bytes());
    hasher.update(Utc::now().timestamp_millis().to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Slot of the local client: always the last of `parties`
pub fn client_party_index(parties: usize) -> Result<PartyIndex> {
    if parties < 3 {
        return Err(Error::Configuration(format!(
            "a ceremony needs at least two signer nodes and the client, got {} parties",
            parties
        )));
    }
    Ok(parties - 1)
}

/// Endpoints and slots of every party in a session. The client's own slot
/// has no endpoint in either list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartyLayout {
    /// RPC endpoint per slot
    pub rpc_endpoints: Vec<Option<String>>,
    /// WebSocket origin per slot
    pub socket_endpoints: Vec<Option<String>>,
    /// Slot numbers, `0..parties`
    pub party_indexes: Vec<PartyIndex>,
}

impl PartyLayout {
    /// Check the layout matches the party count and client slot
    pub fn validate(&self, parties: usize, client_index: PartyIndex) -> Result<()> {
        if self.rpc_endpoints.len() != parties
            || self.socket_endpoints.len() != parties
            || self.party_indexes.len() != parties
        {
            return Err(Error::Configuration(format!(
                "party layout must have {} entries",
                parties
            )));
        }
        for slot in 0..parties {
            let is_client = slot == client_index;
            if self.party_indexes[slot] != slot {
                return Err(Error::Configuration(format!(
                    "party index {} out of order",
                    self.party_indexes[slot]
                )));
            }
            if is_client != self.socket_endpoints[slot].is_none()
                || is_client != self.rpc_endpoints[slot].is_none()
            {
                return Err(Error::Configuration(format!(
                    "slot {} must {}have an endpoint",
                    slot,
                    if is_client { "not " } else { "" }
                )));
            }
        }
        Ok(())
    }

    /// `(slot, socket endpoint)` for every remote party
    pub fn server_slots(&self) -> impl Iterator<Item = (PartyIndex, &str)> {
        self.socket_endpoints
            .iter()
            .enumerate()
            .filter_map(|(slot, endpoint)| endpoint.as_deref().map(|e| (slot, e)))
    }
}

/// Node index occupying a server slot; positional when none was supplied
pub fn slot_node_index(node_indexes: &[NodeIndex], slot: PartyIndex) -> NodeIndex {
    match node_indexes.get(slot) {
        Some(&index) if index > 0 => index,
        _ => slot as NodeIndex + 1,
    }
}
