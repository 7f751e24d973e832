//! # TSS Core
//!
//! Client-side orchestration of a threshold ECDSA signing ceremony.
//!
//! The local client holds one share of the signing key; N-1 remote signer
//! nodes hold DKG shares of the server half. This crate provides:
//! - Session identity binding and party-index layout
//! - Lagrange / DKLS coefficient derivation for every participant
//! - Client share denormalisation
//! - Signing public key reconstruction and cross-checks
//! - The ceremony state machine (connect, precompute, sign, verify, cleanup)
//!
//! Key custody, identity attestation, endpoint discovery, the transport and
//! the MPC engine are collaborators behind traits, see [`providers`] and
//! [`mpc`]. The [`sim`] module wires simulated versions of all of them
//! together for tests and local demos.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tss_core::{HashAlgorithm, Signer};
//!
//! let signer = Signer::new(config, factor_secret, collaborators);
//! let signature = signer.sign_message(b"hello world", HashAlgorithm::Keccak256).await?;
//! ```

pub mod ceremony;
pub mod coefficients;
pub mod config;
pub mod error;
pub mod field;
pub mod mpc;
pub mod providers;
pub mod pubkey;
pub mod session;
pub mod share;
pub mod sim;
pub mod types;

pub use ceremony::{CeremonyReport, CeremonyState, Collaborators, Signer};
pub use coefficients::{derive_coefficient, lagrange_coefficient, CoefficientSet, ParticipatingSet};
pub use config::{NetworkConfig, SignerConfig};
pub use error::{Error, Result};
pub use pubkey::{reconcile, AggregatedPublicKey};
pub use session::{client_party_index, PartyLayout, Session};
pub use share::{denormalize, ShareMaterial};
pub use types::{HashAlgorithm, NodeIndex, PartyIndex, Signature};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of parties (three signer nodes plus the client)
pub const DEFAULT_PARTIES: usize = 4;
