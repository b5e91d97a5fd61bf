use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::aggregate::ResultsMaintainer;
use crate::catalog::Catalogs;
use crate::decoder::{self, NO_CHARITY};
use crate::ledger::LedgerRelay;
use crate::models::vote::{Pence, Vote};
use crate::state::CorrelationCache;
use crate::store::{StoreError, VoteStore};

const IDENTITY_LOCK_STRIPES: usize = 64;
pub const MAX_IDENTITY_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("identity length {0} is outside 1..=128 bytes")]
    InvalidIdentity(usize),
    #[error("failed to persist vote: {0}")]
    Store(#[from] StoreError),
}

/// A webhook call reduced to the values the pipeline needs. Mandatory
/// parameters have already been checked by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub payload: String,
    pub donation_amount: Pence,
    pub identity: String,
    pub shortcode: Option<String>,
    pub transaction_id: Option<String>,
}

/// Serializes work per identity using a fixed pool of async mutexes.
/// Distinct identities may share a stripe; they then just queue briefly.
struct IdentityLocks {
    stripes: Vec<Mutex<()>>,
}

impl IdentityLocks {
    fn new(stripes: usize) -> Self {
        assert!(stripes > 0, "Lock stripe count must be positive");
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, identity: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        identity.hash(&mut hasher);
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        &self.stripes[index]
    }
}

pub struct VotePipeline {
    store: VoteStore,
    results: Arc<ResultsMaintainer>,
    correlation: Arc<CorrelationCache>,
    catalogs: Arc<Catalogs>,
    relay: Option<LedgerRelay>,
    locks: IdentityLocks,
}

impl VotePipeline {
    pub fn new(
        store: VoteStore,
        results: Arc<ResultsMaintainer>,
        correlation: Arc<CorrelationCache>,
        catalogs: Arc<Catalogs>,
        relay: Option<LedgerRelay>,
    ) -> Self {
        Self {
            store,
            results,
            correlation,
            catalogs,
            relay,
            locks: IdentityLocks::new(IDENTITY_LOCK_STRIPES),
        }
    }

    pub fn store(&self) -> &VoteStore {
        &self.store
    }

    pub fn results(&self) -> &Arc<ResultsMaintainer> {
        &self.results
    }

    pub fn correlation(&self) -> &Arc<CorrelationCache> {
        &self.correlation
    }

    pub fn catalogs(&self) -> &Arc<Catalogs> {
        &self.catalogs
    }

    /// Decodes the payload and attaches any pre-registered demographics.
    pub async fn build_vote(&self, submission: &Submission) -> Vote {
        let decoded = decoder::decode(&submission.payload, &self.catalogs);

        let mut charity_choice = decoded.charity_choice;
        if charity_choice == NO_CHARITY {
            if let Some(from_shortcode) = submission
                .shortcode
                .as_deref()
                .and_then(|shortcode| decoder::charity_from_shortcode(shortcode, &self.catalogs))
            {
                charity_choice = from_shortcode;
            }
        }

        let demographic = if decoded.complete {
            self.correlation.consume(&submission.payload).await
        } else {
            None
        };

        Vote {
            identity: submission.identity.clone(),
            main_choice: decoded.main_choice,
            representative_choice: decoded.representative_choice,
            charity_choice,
            postcode: demographic.as_ref().map(|d| d.postcode.clone()),
            birth_year: demographic.map(|d| d.birth_year),
            donation_amount: submission.donation_amount,
            transaction_id: submission.transaction_id.clone(),
        }
    }

    /// Persists the vote as this identity's only vote and moves the
    /// tallies from its old contribution to its new one. The ledger relay
    /// is only enqueued, never awaited.
    pub async fn submit(&self, submission: Submission) -> Result<Vote, IngestError> {
        let identity_len = submission.identity.len();
        if identity_len == 0 || identity_len > MAX_IDENTITY_LEN {
            return Err(IngestError::InvalidIdentity(identity_len));
        }

        let candidate = self.build_vote(&submission).await;

        let upserted = {
            let _guard = self.locks.stripe(&candidate.identity).lock().await;
            let upserted = self.store.upsert(&candidate).await?;
            self.results
                .apply_delta(upserted.prior.as_ref(), &upserted.vote)
                .await;
            upserted
        };

        info!(
            identity = %upserted.vote.identity,
            main_choice = upserted.vote.main_choice,
            representative = %upserted.vote.representative_choice,
            charity = %upserted.vote.charity_choice,
            donation = upserted.vote.donation_amount,
            overwritten = upserted.prior.is_some(),
            "Vote accepted"
        );

        match &self.relay {
            Some(relay) => relay.relay(&upserted.vote, &submission.payload),
            None => debug!("Ledger relay disabled"),
        }

        Ok(upserted.vote)
    }
}
