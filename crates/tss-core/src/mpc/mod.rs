//! Transport and signing-engine seams
//!
//! The ceremony talks to every signer node over one duplex [`Connection`]
//! and delegates the MPC arithmetic of its own party to a
//! [`SigningEngine`]. Both are black boxes to the orchestration logic.

use crate::session::Session;
use crate::types::Signature;
use crate::Result;
use k256::Scalar;
use zeroize::Zeroize;

pub use ::async_trait::async_trait;

pub mod memory;
pub mod messages;

pub use memory::{ConnectionStats, Fault, MemoryNetwork};
pub use messages::{ClientMessage, NodeMessage};

/// One duplex connection to a signer node, scoped to a single session
#[async_trait]
pub trait Connection: Send {
    /// Endpoint this connection was opened against
    fn endpoint(&self) -> &str;

    /// Send a protocol message
    async fn send(&mut self, message: &ClientMessage) -> Result<()>;

    /// Wait for the next protocol message
    async fn recv(&mut self) -> Result<NodeMessage>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// Opens connections to signer nodes
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `endpoint` scoped to a session's socket scope
    async fn connect(&self, endpoint: &str, socket_scope: &str) -> Result<Box<dyn Connection>>;
}

/// Input of the local party to the signing engine
pub struct EngineInput {
    /// DKLS party id of the client
    pub party_id: u32,
    /// DKLS party ids of every participant
    pub party_ids: Vec<u32>,
    /// Denormalised client share
    pub share: Scalar,
}

impl Drop for EngineInput {
    fn drop(&mut self) {
        self.share.zeroize();
    }
}

/// The local MPC engine (the client-side half of the signing protocol)
#[async_trait]
pub trait SigningEngine: Send + Sync {
    /// Load / initialise the engine. Runs concurrently with connecting.
    async fn load(&self) -> Result<()>;

    /// Start the engine for one session
    fn begin(&self, session: &Session, input: EngineInput) -> Result<Box<dyn EngineSession>>;
}

/// Engine state for one session
pub trait EngineSession: Send {
    /// Opaque material every node receives with the precompute request
    fn precompute_payload(&self) -> Result<String>;

    /// Combine the remote signature fragments with the local one
    fn combine(&self, digest: &[u8; 32], fragments: &[Scalar]) -> Result<Signature>;
}
