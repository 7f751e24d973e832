//! Signing ceremony
//!
//! One call to [`Signer::sign_message`] runs one ceremony against a fresh
//! session:
//!
//! ```text
//! Initialized → Connected → Precomputing → Ready → Signing → Verifying
//!                                                               ↓
//!                         any failure or abort ──────→ CleaningUp → Terminated
//! ```
//!
//! Every remote party must take part; there is no partial quorum. Whatever
//! the outcome, every connection that was opened receives a cleanup request
//! and is closed exactly once before the call returns.

mod prepare;
mod rounds;

use crate::config::SignerConfig;
use crate::mpc::{SigningEngine, Transport};
use crate::providers::{EndpointDirectory, IdentityAttestation, KeyCustody};
use crate::types::{HashAlgorithm, Signature};
use crate::{Error, Result};
use k256::Scalar;
use prepare::Ceremony;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use zeroize::Zeroize;

/// Everything the ceremony delegates to other subsystems
#[derive(Clone)]
pub struct Collaborators {
    pub custody: Arc<dyn KeyCustody>,
    pub attestation: Arc<dyn IdentityAttestation>,
    pub directory: Arc<dyn EndpointDirectory>,
    pub transport: Arc<dyn Transport>,
    pub engine: Arc<dyn SigningEngine>,
}

/// Ceremony progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyState {
    Initialized,
    Connected,
    Precomputing,
    Ready,
    Signing,
    Verifying,
    CleaningUp,
    Terminated { success: bool },
}

impl fmt::Display for CeremonyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CeremonyState::Initialized => "initialized",
            CeremonyState::Connected => "connected",
            CeremonyState::Precomputing => "precomputing",
            CeremonyState::Ready => "ready",
            CeremonyState::Signing => "signing",
            CeremonyState::Verifying => "verifying",
            CeremonyState::CleaningUp => "cleaning_up",
            CeremonyState::Terminated { success: true } => "terminated(success)",
            CeremonyState::Terminated { success: false } => "terminated(failed)",
        };
        f.write_str(name)
    }
}

/// Outcome of one ceremony, including the cleanup side
#[derive(Debug)]
pub struct CeremonyReport {
    /// Primary outcome
    pub result: Result<Signature>,
    /// Cleanup failures; logged, never replace `result`
    pub cleanup_errors: Vec<Error>,
    /// Furthest state reached before cleanup began
    pub reached: CeremonyState,
    pub final_state: CeremonyState,
    /// Connections opened and closed
    pub connections_closed: usize,
}

impl CeremonyReport {
    pub fn into_result(self) -> Result<Signature> {
        self.result
    }
}

/// Signing client for one account
pub struct Signer {
    config: SignerConfig,
    factor_secret: Scalar,
    collaborators: Collaborators,
}

impl Signer {
    pub fn new(config: SignerConfig, factor_secret: Scalar, collaborators: Collaborators) -> Self {
        Self {
            config,
            factor_secret,
            collaborators,
        }
    }

    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// Hash `message` with `hash_algorithm` and produce a verified signature
    pub async fn sign_message(
        &self,
        message: &[u8],
        hash_algorithm: HashAlgorithm,
    ) -> Result<Signature> {
        self.sign_message_with_abort(message, hash_algorithm, std::future::pending())
            .await
    }

    /// As [`Signer::sign_message`], abandoning the ceremony with
    /// [`Error::Aborted`] as soon as `abort` completes. Cleanup still runs.
    pub async fn sign_message_with_abort<A>(
        &self,
        message: &[u8],
        hash_algorithm: HashAlgorithm,
        abort: A,
    ) -> Result<Signature>
    where
        A: Future<Output = ()>,
    {
        self.run_ceremony(message, hash_algorithm, abort)
            .await
            .into_result()
    }

    /// Run one ceremony to completion and report on every side of it
    #[instrument(skip_all, fields(verifier = %self.config.verifier, parties = self.config.parties))]
    pub async fn run_ceremony<A>(
        &self,
        message: &[u8],
        hash_algorithm: HashAlgorithm,
        abort: A,
    ) -> CeremonyReport
    where
        A: Future<Output = ()>,
    {
        let digest = hash_algorithm.digest(message);

        let mut ceremony =
            match Ceremony::prepare(&self.config, &self.factor_secret, &self.collaborators).await {
                Ok(ceremony) => ceremony,
                Err(e) => {
                    warn!("Ceremony could not start: {}", e);
                    return CeremonyReport {
                        result: Err(e),
                        cleanup_errors: Vec::new(),
                        reached: CeremonyState::Initialized,
                        final_state: CeremonyState::Terminated { success: false },
                        connections_closed: 0,
                    };
                }
            };

        let scope = ceremony.scope().to_string();
        info!(scope = %scope, hash = %hash_algorithm, "Starting signing ceremony");

        let result = tokio::select! {
            result = ceremony.drive(message, hash_algorithm, &digest) => result,
            _ = abort => {
                warn!(scope = %scope, "Ceremony aborted");
                Err(Error::Aborted)
            }
        };

        let reached = ceremony.state();
        let (cleanup_errors, connections_closed) = ceremony.teardown(result.is_ok()).await;

        match &result {
            Ok(signature) => info!(
                r = hex::encode(signature.r),
                s = hex::encode(signature.s),
                v = signature.recovery_id,
                "Signing ceremony completed"
            ),
            Err(e) => warn!(%reached, "Signing ceremony failed: {}", e),
        }

        CeremonyReport {
            result,
            cleanup_errors,
            reached,
            final_state: ceremony.state(),
            connections_closed,
        }
    }
}

impl Drop for Signer {
    fn drop(&mut self) {
        self.factor_secret.zeroize();
    }
}
