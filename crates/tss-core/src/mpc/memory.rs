//! In-memory transport for testing

use super::{async_trait, ClientMessage, Connection, NodeMessage, Transport};
use crate::field::{scalar_from_hex, scalar_to_hex};
use crate::sim::SimulatedNode;
use crate::{Error, Result};
use dashmap::DashMap;
use k256::Scalar;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

/// Misbehaviour injected at one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Refuse to open connections
    RefuseConnection,
    /// Answer precompute with an error
    RejectPrecompute,
    /// Never answer precompute
    StallPrecompute,
    /// Answer sign with an error
    RejectSign,
    /// Never answer sign
    StallSign,
    /// Answer cleanup with an error
    RejectCleanup,
    /// Corrupt this node's coefficient before it is processed
    TamperCoefficient,
}

/// Per-endpoint traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub connects: usize,
    pub precomputes: usize,
    pub signs: usize,
    pub cleanups: usize,
    pub closes: usize,
}

/// Simulated nodes reachable by endpoint, with fault injection
pub struct MemoryNetwork {
    nodes: DashMap<String, Arc<SimulatedNode>>,
    faults: DashMap<String, Fault>,
    stats: Arc<DashMap<String, ConnectionStats>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            faults: DashMap::new(),
            stats: Arc::new(DashMap::new()),
        }
    }

    /// Make a node reachable at `endpoint`
    pub fn add_node(&self, endpoint: &str, node: SimulatedNode) {
        self.nodes.insert(endpoint.to_string(), Arc::new(node));
    }

    pub fn node(&self, endpoint: &str) -> Option<Arc<SimulatedNode>> {
        self.nodes.get(endpoint).map(|node| Arc::clone(&node))
    }

    pub fn inject_fault(&self, endpoint: &str, fault: Fault) {
        self.faults.insert(endpoint.to_string(), fault);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn stats(&self, endpoint: &str) -> ConnectionStats {
        self.stats.get(endpoint).map(|s| *s).unwrap_or_default()
    }

    /// Sessions still holding state across every node
    pub fn active_sessions(&self) -> usize {
        self.nodes.iter().map(|node| node.active_sessions()).sum()
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn connect(&self, endpoint: &str, socket_scope: &str) -> Result<Box<dyn Connection>> {
        let fault = self.faults.get(endpoint).map(|f| *f);
        if fault == Some(Fault::RefuseConnection) {
            return Err(Error::Connection(format!("{} refused the connection", endpoint)));
        }
        let node = self
            .node(endpoint)
            .ok_or_else(|| Error::Connection(format!("nothing listening at {}", endpoint)))?;

        self.stats.entry(endpoint.to_string()).or_default().connects += 1;
        trace!(endpoint, socket_scope, "Memory connection opened");

        Ok(Box::new(MemoryConnection {
            endpoint: endpoint.to_string(),
            socket_scope: socket_scope.to_string(),
            node,
            fault,
            inbox: VecDeque::new(),
            stats: Arc::clone(&self.stats),
            closed: false,
        }))
    }
}

struct MemoryConnection {
    endpoint: String,
    socket_scope: String,
    node: Arc<SimulatedNode>,
    fault: Option<Fault>,
    inbox: VecDeque<NodeMessage>,
    stats: Arc<DashMap<String, ConnectionStats>>,
    closed: bool,
}

impl MemoryConnection {
    fn record(&self, update: impl FnOnce(&mut ConnectionStats)) {
        update(&mut self.stats.entry(self.endpoint.clone()).or_default());
    }

    fn rejected(what: &str) -> NodeMessage {
        NodeMessage::Error {
            party_index: None,
            message: format!("{} rejected", what),
        }
    }

    fn tamper(&self, message: &ClientMessage) -> Result<ClientMessage> {
        let mut message = message.clone();
        if let ClientMessage::Precompute(request) = &mut message {
            let key = self.node.node_index().to_string();
            if let Some(coefficient) = request.server_coeffs.get_mut(&key) {
                *coefficient = scalar_to_hex(&(scalar_from_hex(coefficient)? + Scalar::ONE));
            }
        }
        Ok(message)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        if self.closed {
            return Err(Error::Connection(format!("{} is closed", self.endpoint)));
        }

        self.record(|stats| match message {
            ClientMessage::Precompute(_) => stats.precomputes += 1,
            ClientMessage::Sign(_) => stats.signs += 1,
            ClientMessage::Cleanup(_) => stats.cleanups += 1,
        });

        let reply = match (self.fault, message) {
            (Some(Fault::RejectPrecompute), ClientMessage::Precompute(_)) => {
                Some(Self::rejected("precompute"))
            }
            (Some(Fault::StallPrecompute), ClientMessage::Precompute(_)) => None,
            (Some(Fault::RejectSign), ClientMessage::Sign(_)) => Some(Self::rejected("sign")),
            (Some(Fault::StallSign), ClientMessage::Sign(_)) => None,
            (Some(Fault::RejectCleanup), ClientMessage::Cleanup(_)) => {
                Some(Self::rejected("cleanup"))
            }
            (Some(Fault::TamperCoefficient), ClientMessage::Precompute(_)) => {
                let tampered = self.tamper(message)?;
                Some(self.node.handle(&self.socket_scope, &tampered))
            }
            _ => Some(self.node.handle(&self.socket_scope, message)),
        };

        if let Some(reply) = reply {
            self.inbox.push_back(reply);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<NodeMessage> {
        match self.inbox.pop_front() {
            Some(message) => Ok(message),
            None if self.closed => Err(Error::Connection(format!("{} is closed", self.endpoint))),
            // a stalled node never answers; callers bound this with a timeout
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.record(|stats| stats.closes += 1);
            trace!(endpoint = %self.endpoint, "Memory connection closed");
        }
        Ok(())
    }
}
