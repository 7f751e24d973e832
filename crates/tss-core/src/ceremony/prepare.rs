use super::{CeremonyState, Collaborators};
use crate::coefficients::{CoefficientSet, ParticipatingSet};
use crate::config::SignerConfig;
use crate::mpc::Connection;
use crate::pubkey::{reconcile, AggregatedPublicKey};
use crate::session::{client_party_index, PartyLayout, Session};
use crate::share::ShareMaterial;
use crate::types::{NodeIndex, PartyIndex};
use crate::{Error, Result};
use k256::Scalar;
use tracing::{debug, instrument};

/// An open connection to the node in one server slot
pub(super) struct PartyConnection {
    pub party_index: PartyIndex,
    pub node_index: NodeIndex,
    pub connection: Box<dyn Connection>,
}

/// State of one ceremony between preparation and teardown
pub(super) struct Ceremony<'a> {
    pub config: &'a SignerConfig,
    pub collaborators: &'a Collaborators,
    pub session: Session,
    pub layout: PartyLayout,
    pub participating: ParticipatingSet,
    pub coefficients: CoefficientSet,
    pub share: ShareMaterial,
    pub public_key: AggregatedPublicKey,
    pub signatures: Vec<String>,
    pub connections: Vec<PartyConnection>,
    state: CeremonyState,
}

impl<'a> Ceremony<'a> {
    /// Everything up to the first network round: session, layout,
    /// coefficients, share and the reconciled public key. No connection is
    /// opened here, so failures need no cleanup.
    #[instrument(skip_all)]
    pub async fn prepare(
        config: &'a SignerConfig,
        factor_secret: &Scalar,
        collaborators: &'a Collaborators,
    ) -> Result<Ceremony<'a>> {
        config.validate()?;
        let parties = config.parties;
        let client_index = client_party_index(parties)?;

        let tss_nonce = collaborators
            .custody
            .tss_nonce(&config.tss_tag)
            .await
            .map_err(Error::into_custody)?;
        let session = Session::build(&config.verifier, &config.verifier_id, &config.tss_tag, tss_nonce)?;

        let attestation = collaborators
            .attestation
            .fetch_attestation(&config.verifier, &config.verifier_id, &config.network)
            .await
            .map_err(Error::into_attestation)?;
        if attestation.signatures.is_empty() {
            return Err(Error::Attestation("no session signatures returned".into()));
        }

        let participating = ParticipatingSet::new(attestation.node_indexes.clone())?;
        if participating.len() != parties - 1 {
            return Err(Error::Configuration(format!(
                "{} parties need {} signer nodes, attestation lists {}",
                parties,
                parties - 1,
                participating.len()
            )));
        }

        let layout = collaborators
            .directory
            .resolve(&config.network, parties, client_index, participating.indexes())
            .await?;
        layout.validate(parties, client_index)?;

        let group_public_key = collaborators
            .custody
            .get_group_public_key(&config.tss_tag, tss_nonce)
            .await
            .map_err(Error::into_custody)?;
        let (raw_share, share_index) = collaborators
            .custody
            .get_share(factor_secret)
            .await
            .map_err(Error::into_custody)?;

        let coefficients = CoefficientSet::derive(&participating, share_index)?;
        let share = ShareMaterial::new(raw_share, share_index, coefficients.client());
        let public_key = reconcile(
            &group_public_key,
            &share.public_point(),
            share_index,
            participating.indexes(),
        )?;

        debug!(
            scope = session.socket_scope(),
            nodes = ?participating.indexes(),
            share_index,
            public_key = %public_key.to_hex(),
            "Ceremony initialized"
        );

        Ok(Ceremony {
            config,
            collaborators,
            session,
            layout,
            participating,
            coefficients,
            share,
            public_key,
            signatures: attestation.signatures,
            connections: Vec::new(),
            state: CeremonyState::Initialized,
        })
    }

    pub fn scope(&self) -> &str {
        self.session.socket_scope()
    }

    pub fn state(&self) -> CeremonyState {
        self.state
    }

    pub fn transition(&mut self, next: CeremonyState) {
        debug!(
            scope = self.session.socket_scope(),
            from = %self.state,
            to = %next,
            "Ceremony state transition"
        );
        self.state = next;
    }
}
