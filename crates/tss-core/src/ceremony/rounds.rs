use super::prepare::{Ceremony, PartyConnection};
use super::CeremonyState;
use crate::field::{scalar_from_hex, scalar_to_hex};
use crate::mpc::messages::{CleanupRequest, PrecomputeRequest, SignRequest};
use crate::mpc::{ClientMessage, EngineInput, NodeMessage};
use crate::session::slot_node_index;
use crate::types::{HashAlgorithm, PartyIndex, Signature};
use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use k256::Scalar;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

impl<'a> Ceremony<'a> {
    /// Connect, precompute, sign and verify
    pub async fn drive(
        &mut self,
        message: &[u8],
        hash_algorithm: HashAlgorithm,
        digest: &[u8; 32],
    ) -> Result<Signature> {
        self.connect_all().await?;

        let engine = self.collaborators.engine.begin(
            &self.session,
            EngineInput {
                party_id: self.participating.client_party_id(),
                party_ids: self.participating.party_ids(),
                share: *self.share.denormalized(),
            },
        )?;

        self.transition(CeremonyState::Precomputing);
        let requests = self.precompute_requests(engine.precompute_payload()?);
        let replies = round(
            &mut self.connections,
            requests,
            self.config.round_timeout(),
            "precompute readiness",
        )
        .await?;
        for (party, reply) in replies {
            match reply {
                NodeMessage::Ready { party_index } if party_index == party => {}
                other => return Err(unexpected(party, "ready", other)),
            }
        }
        self.transition(CeremonyState::Ready);

        self.transition(CeremonyState::Signing);
        let request = SignRequest {
            session: self.session.to_string(),
            msg_hash: STANDARD.encode(digest),
            original_message: STANDARD.encode(message),
            hash_algo: hash_algorithm,
            signatures: self.signatures.clone(),
        };
        let requests = vec![ClientMessage::Sign(request); self.connections.len()];
        let replies = round(
            &mut self.connections,
            requests,
            self.config.round_timeout(),
            "signature fragments",
        )
        .await?;

        let mut fragments: Vec<Scalar> = Vec::with_capacity(replies.len());
        for (party, reply) in replies {
            match reply {
                NodeMessage::Fragment {
                    party_index,
                    fragment,
                } if party_index == party => {
                    let fragment = scalar_from_hex(&fragment).map_err(|e| Error::Protocol {
                        party,
                        reason: format!("unreadable fragment: {}", e),
                    })?;
                    fragments.push(fragment);
                }
                other => return Err(unexpected(party, "fragment", other)),
            }
        }
        let signature = engine.combine(digest, &fragments)?;

        self.transition(CeremonyState::Verifying);
        self.public_key.verify(digest, &signature)?;
        debug!(scope = self.scope(), v = signature.recovery_id, "Signature verified");

        Ok(signature)
    }

    /// Open every server connection alongside the engine load. Any failure
    /// is fatal. Each connection is recorded as soon as it opens, so an
    /// abort mid-connect still leaves it for teardown.
    async fn connect_all(&mut self) -> Result<()> {
        let transport = &self.collaborators.transport;
        let scope = self.session.socket_scope();
        let limit = self.config.connect_timeout();
        let node_indexes = self.participating.indexes();
        let connections = &mut self.connections;

        let mut pending: FuturesUnordered<_> = self
            .layout
            .server_slots()
            .map(|(slot, endpoint)| async move {
                let connection = timeout(limit, transport.connect(endpoint, scope))
                    .await
                    .map_err(|_| Error::Connection(format!("{} did not answer in time", endpoint)))?
                    .map_err(Error::into_connection)?;
                debug!(slot, endpoint, "Connected");
                Ok::<_, Error>(PartyConnection {
                    party_index: slot,
                    node_index: slot_node_index(node_indexes, slot),
                    connection,
                })
            })
            .collect();

        let opening = async {
            let mut failure = None;
            while let Some(result) = pending.next().await {
                match result {
                    Ok(connection) => connections.push(connection),
                    Err(e) => {
                        warn!("Connection failed: {}", e);
                        failure.get_or_insert(e);
                    }
                }
            }
            failure.map_or(Ok(()), Err)
        };

        let (opened, loaded) = tokio::join!(opening, self.collaborators.engine.load());
        drop(pending);
        opened?;
        self.connections.sort_by_key(|party| party.party_index);
        loaded.map_err(|e| match e {
            Error::Engine(_) => e,
            other => Error::Engine(other.to_string()),
        })?;

        info!(
            scope = self.scope(),
            connected = self.connections.len(),
            "Connected to all signer nodes"
        );
        self.transition(CeremonyState::Connected);
        Ok(())
    }

    fn precompute_requests(&self, engine_payload: String) -> Vec<ClientMessage> {
        let server_coeffs = self
            .coefficients
            .servers()
            .map(|(node, coefficient)| (node.to_string(), scalar_to_hex(coefficient)))
            .collect::<std::collections::BTreeMap<_, _>>();
        let public_key = self.public_key.to_base64();

        self.connections
            .iter()
            .map(|party| {
                ClientMessage::Precompute(PrecomputeRequest {
                    session: self.session.to_string(),
                    party_index: party.party_index,
                    parties: self.layout.party_indexes.clone(),
                    server_coeffs: server_coeffs.clone(),
                    public_key: public_key.clone(),
                    signatures: self.signatures.clone(),
                    engine_payload: engine_payload.clone(),
                })
            })
            .collect()
    }

    /// Best-effort cleanup on every connection, then close each one. Returns
    /// the cleanup failures and the number of connections closed.
    pub async fn teardown(&mut self, success: bool) -> (Vec<Error>, usize) {
        self.transition(CeremonyState::CleaningUp);

        let request = ClientMessage::Cleanup(CleanupRequest {
            session: self.session.to_string(),
            signatures: self.signatures.clone(),
        });
        let limit = self.config.cleanup_timeout();
        let releases = self
            .connections
            .iter_mut()
            .map(|party| release(party, &request, limit));

        let mut errors: Vec<Error> = join_all(releases)
            .await
            .into_iter()
            .filter_map(|result| result.err())
            .collect();

        let mut closed = 0;
        for mut party in self.connections.drain(..) {
            if let Err(e) = party.connection.close().await {
                errors.push(Error::Cleanup(format!(
                    "closing {}: {}",
                    party.connection.endpoint(),
                    e
                )));
            }
            closed += 1;
        }

        for error in &errors {
            warn!(scope = self.session.socket_scope(), "{}", error);
        }
        self.transition(CeremonyState::Terminated { success });
        (errors, closed)
    }
}

/// Send one message per connection and collect one reply from each, all
/// within `limit`
async fn round(
    connections: &mut [PartyConnection],
    requests: Vec<ClientMessage>,
    limit: Duration,
    what: &str,
) -> Result<Vec<(PartyIndex, NodeMessage)>> {
    let exchanges = connections
        .iter_mut()
        .zip(requests)
        .map(|(party, request)| async move {
            party
                .connection
                .send(&request)
                .await
                .map_err(Error::into_connection)?;
            let reply = party.connection.recv().await.map_err(Error::into_connection)?;
            trace!(party = party.party_index, kind = reply.kind(), "Reply received");
            Ok::<_, Error>((party.party_index, reply))
        });

    timeout(limit, join_all(exchanges))
        .await
        .map_err(|_| Error::Timeout(what.to_string()))?
        .into_iter()
        .collect()
}

async fn release(party: &mut PartyConnection, request: &ClientMessage, limit: Duration) -> Result<()> {
    let party_index = party.party_index;
    let acknowledged = async {
        party.connection.send(request).await?;
        loop {
            match party.connection.recv().await? {
                NodeMessage::CleanedUp => return Ok(()),
                NodeMessage::Error { message, .. } => return Err(Error::Cleanup(message)),
                stale => trace!(party = party_index, kind = stale.kind(), "Skipping stale reply"),
            }
        }
    };

    match timeout(limit, acknowledged).await {
        Ok(Ok(())) => {
            trace!(party = party_index, node = party.node_index, "Cleanup acknowledged");
            Ok(())
        }
        Ok(Err(e)) => Err(Error::Cleanup(format!("party {}: {}", party_index, e))),
        Err(_) => Err(Error::Cleanup(format!(
            "party {} did not acknowledge cleanup",
            party_index
        ))),
    }
}

fn unexpected(party: PartyIndex, expected: &str, reply: NodeMessage) -> Error {
    let reason = match reply {
        NodeMessage::Error { message, .. } => message,
        other => format!("expected {}, got {}", expected, other.kind()),
    };
    Error::Protocol { party, reason }
}
