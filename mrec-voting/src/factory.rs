//! Poll factory.
//!
//! Binds an id provider and the authority's key material so call
//! sites only describe the ballot itself.

use std::sync::Arc;

use mrec_crypto::key::secp256k1::SecretKey;
use mrec_ident::IdProvider;
use mrec_paillier::PaillierPublicKey;

use crate::method::{SupermajorityConfig, VotingMethod};
use crate::poll::{Poll, PollParams};
use crate::VoteError;

pub struct PollFactory {
    id_provider: Arc<dyn IdProvider>,
    authority_id: Vec<u8>,
    authority_signing_key: SecretKey,
    voting_key: PaillierPublicKey,
}

/// Optional knobs for [`PollFactory::create_poll`].
#[derive(Debug, Clone, Default)]
pub struct PollOptions {
    pub max_weight: Option<u64>,
    pub allow_insecure: bool,
    pub seats: Option<usize>,
    pub supermajority: Option<SupermajorityConfig>,
}

impl PollFactory {
    pub fn new(
        id_provider: Arc<dyn IdProvider>,
        authority_id: Vec<u8>,
        authority_signing_key: SecretKey,
        voting_key: PaillierPublicKey,
    ) -> Self {
        Self {
            id_provider,
            authority_id,
            authority_signing_key,
            voting_key,
        }
    }

    /// Mint an id and open a poll under this factory's authority.
    pub fn create_poll(
        &self,
        choices: Vec<String>,
        method: VotingMethod,
        options: PollOptions,
    ) -> Result<Poll, VoteError> {
        let mut params = PollParams::new(
            choices,
            method,
            self.authority_id.clone(),
            self.voting_key.clone(),
        );
        params.max_weight = options.max_weight;
        params.allow_insecure = options.allow_insecure;
        params.seats = options.seats.unwrap_or(1);
        params.supermajority = options.supermajority;

        Poll::new(
            self.id_provider.generate(),
            params,
            self.authority_signing_key.clone(),
        )
    }
}
