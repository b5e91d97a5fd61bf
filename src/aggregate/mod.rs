//! Running vote and donation tallies.
//!
//! Tallies are maintained incrementally on every upsert (subtract the
//! identity's prior vote, add its new one) and rebuilt from the store on a
//! schedule. Incremental maintenance and the store write are not one atomic
//! unit, so the periodic rebuild is what removes any drift.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::models::vote::{Pence, Vote};
use crate::store::{StoreError, VoteStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub count: u64,
    pub total_donation: Pence,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Results {
    pub main_choice_counts: BTreeMap<u8, u64>,
    pub representative_tallies: BTreeMap<String, Tally>,
    pub charity_tallies: BTreeMap<String, Tally>,
    pub total_votes: u64,
    pub total_donations: Pence,
}

impl Results {
    #[cfg(test)]
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        let mut results = Self::default();
        for vote in votes {
            results.add(vote);
        }
        results
    }

    /// Counts a vote. Sums saturate rather than wrap.
    pub fn add(&mut self, vote: &Vote) {
        let count = self.main_choice_counts.entry(vote.main_choice).or_default();
        *count = count.saturating_add(1);
        credit(
            &mut self.representative_tallies,
            &vote.representative_choice,
            vote.donation_amount,
        );
        credit(
            &mut self.charity_tallies,
            &vote.charity_choice,
            vote.donation_amount,
        );
        self.total_votes = self.total_votes.saturating_add(1);
        self.total_donations = self.total_donations.saturating_add(vote.donation_amount);
    }

    /// Removes a previously added vote. Entries that reach zero are dropped
    /// so that the result matches a rebuild over the same votes.
    pub fn subtract(&mut self, vote: &Vote) {
        let current = self
            .main_choice_counts
            .get(&vote.main_choice)
            .copied()
            .unwrap_or(0);
        match current {
            0 => warn!(
                main_choice = vote.main_choice,
                "Subtracting vote from empty main choice tally"
            ),
            1 => {
                self.main_choice_counts.remove(&vote.main_choice);
            }
            _ => {
                self.main_choice_counts
                    .insert(vote.main_choice, current - 1);
            }
        }

        debit(
            &mut self.representative_tallies,
            &vote.representative_choice,
            vote.donation_amount,
        );
        debit(
            &mut self.charity_tallies,
            &vote.charity_choice,
            vote.donation_amount,
        );
        self.total_votes = self.total_votes.saturating_sub(1);
        self.total_donations = self.total_donations.saturating_sub(vote.donation_amount);
    }
}

fn credit(tallies: &mut BTreeMap<String, Tally>, key: &str, donation: Pence) {
    let tally = tallies.entry(key.to_string()).or_default();
    tally.count = tally.count.saturating_add(1);
    if tally.total_donation.checked_add(donation).is_none() {
        warn!(key, "Tally donation total saturated");
    }
    tally.total_donation = tally.total_donation.saturating_add(donation);
}

fn debit(tallies: &mut BTreeMap<String, Tally>, key: &str, donation: Pence) {
    let Some(tally) = tallies.get_mut(key) else {
        warn!(key, "Subtracting vote from missing tally");
        return;
    };
    if tally.count == 0 || tally.total_donation < donation {
        warn!(key, "Tally underflow, waiting for recompute to correct");
    }
    tally.count = tally.count.saturating_sub(1);
    tally.total_donation = tally.total_donation.saturating_sub(donation);
    if tally.count == 0 {
        tallies.remove(key);
    }
}

/// Owner of the live [`Results`]. Every mutation takes the write lock once.
#[derive(Debug, Default)]
pub struct ResultsMaintainer {
    results: RwLock<Results>,
}

impl ResultsMaintainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn apply_delta(&self, prior: Option<&Vote>, next: &Vote) {
        let mut results = self.results.write().await;
        if let Some(prior) = prior {
            results.subtract(prior);
        }
        results.add(next);
    }

    pub async fn snapshot(&self) -> Results {
        self.results.read().await.clone()
    }

    pub async fn replace(&self, fresh: Results) {
        *self.results.write().await = fresh;
    }

    /// Rebuilds every tally from the persisted votes and swaps it in.
    pub async fn recompute(&self, store: &VoteStore) -> Result<Results, StoreError> {
        let mut fresh = Results::default();
        let scanned = store.scan(|vote| fresh.add(&vote)).await?;
        assert_eq!(
            fresh.total_votes, scanned,
            "Recomputed vote total must match scanned rows"
        );

        let previous = self.snapshot().await;
        if previous != fresh {
            info!(
                votes = scanned,
                previous_votes = previous.total_votes,
                "Recompute corrected drifted results"
            );
        } else {
            debug!(votes = scanned, "Recompute found results consistent");
        }

        self.replace(fresh.clone()).await;
        Ok(fresh)
    }
}

/// Periodic full recompute. Runs until the shutdown channel flips.
pub struct RecomputeJob {
    store: VoteStore,
    results: Arc<ResultsMaintainer>,
    interval: Duration,
}

impl RecomputeJob {
    pub fn new(store: VoteStore, results: Arc<ResultsMaintainer>, interval: Duration) -> Self {
        assert!(
            interval >= Duration::from_secs(1),
            "Recompute interval must be at least one second"
        );
        Self {
            store,
            results,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            interval_seconds = self.interval.as_secs(),
            "Starting results recompute loop"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    match changed {
                        Ok(_) => {
                            if *shutdown.borrow() {
                                info!("Recompute shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("Shutdown channel closed unexpectedly. Exiting recompute loop");
                            break;
                        }
                    }
                }
                _ = sleep(self.interval) => {
                    // A failed pass leaves the current results in place.
                    if let Err(err) = self.results.recompute(&self.store).await {
                        error!("Results recompute failed: {err}");
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_store, vote};

    #[test]
    fn add_then_subtract_leaves_empty_results() {
        let ballot = vote("X1", 2, "YOR", "AB", 5_000);
        let mut results = Results::default();
        results.add(&ballot);
        results.subtract(&ballot);
        assert_eq!(results, Results::default());
    }

    #[tokio::test]
    async fn first_vote_credits_every_tally() {
        let maintainer = ResultsMaintainer::new();
        maintainer
            .apply_delta(None, &vote("X1", 2, "YOR", "AB", 50))
            .await;

        let results = maintainer.snapshot().await;
        assert_eq!(results.main_choice_counts.get(&2), Some(&1));
        assert_eq!(
            results.representative_tallies.get("YOR"),
            Some(&Tally {
                count: 1,
                total_donation: 50
            })
        );
        assert_eq!(
            results.charity_tallies.get("AB"),
            Some(&Tally {
                count: 1,
                total_donation: 50
            })
        );
    }

    #[tokio::test]
    async fn overwrite_moves_choice_and_nets_donation() {
        let maintainer = ResultsMaintainer::new();
        let first = vote("X1", 2, "YOR", "AB", 50);
        let second = vote("X1", 3, "YOR", "AB", 100);
        maintainer.apply_delta(None, &first).await;
        maintainer.apply_delta(Some(&first), &second).await;

        let results = maintainer.snapshot().await;
        assert_eq!(results.main_choice_counts.get(&2), None);
        assert_eq!(results.main_choice_counts.get(&3), Some(&1));
        assert_eq!(
            results.representative_tallies.get("YOR"),
            Some(&Tally {
                count: 1,
                total_donation: 100
            })
        );
        assert_eq!(results.total_votes, 1);
        assert_eq!(results.total_donations, 100);
    }

    #[test]
    fn huge_donations_saturate_instead_of_overflowing() {
        let mut results = Results::default();
        for identity in ["A", "B", "C"] {
            results.add(&vote(identity, 2, "YOR", "AB", u64::MAX / 2));
        }

        assert_eq!(results.total_votes, 3);
        assert_eq!(results.total_donations, u64::MAX);
        assert_eq!(results.representative_tallies["YOR"].count, 3);
        assert_eq!(results.representative_tallies["YOR"].total_donation, u64::MAX);
        assert_eq!(results.charity_tallies["AB"].total_donation, u64::MAX);
    }

    #[test]
    fn underflow_saturates_instead_of_wrapping() {
        let mut results = Results::default();
        results.subtract(&vote("ghost", 1, "YOR", "AB", 10));
        assert_eq!(results, Results::default());
    }

    #[tokio::test]
    async fn incremental_matches_rebuild_over_final_votes() {
        let store = memory_store().await;
        let maintainer = ResultsMaintainer::new();
        let sequence = [
            vote("A", 1, "YOR", "AB", 100),
            vote("B", 2, "XXX", "AB", 300),
            vote("A", 3, "RBR", "XX", 250),
            vote("C", 1, "YOR", "CD", 50),
            vote("B", 2, "YOR", "AB", 0),
            vote("A", 1, "YOR", "AB", 100),
        ];

        for candidate in &sequence {
            let upserted = store.upsert(candidate).await.expect("upsert");
            maintainer
                .apply_delta(upserted.prior.as_ref(), &upserted.vote)
                .await;
        }

        let incremental = maintainer.snapshot().await;
        let rebuilt = maintainer.recompute(&store).await.expect("recompute");
        assert_eq!(incremental, rebuilt);

        let finals = [&sequence[3], &sequence[4], &sequence[5]];
        assert_eq!(Results::from_votes(finals), rebuilt);
    }

    #[tokio::test]
    async fn recompute_is_idempotent_and_replaces_drift() {
        let store = memory_store().await;
        let maintainer = ResultsMaintainer::new();
        store
            .upsert(&vote("A", 1, "YOR", "AB", 100))
            .await
            .expect("upsert");

        // Drift: results that no longer match the store.
        maintainer
            .replace(Results::from_votes([&vote("Z", 3, "RBR", "CD", 999)]))
            .await;

        let first = maintainer.recompute(&store).await.expect("recompute");
        let second = maintainer.recompute(&store).await.expect("recompute");
        assert_eq!(first, second);
        assert_eq!(maintainer.snapshot().await, first);
        assert_eq!(first.total_votes, 1);
        assert!(!first.charity_tallies.contains_key("CD"));
    }

    #[tokio::test]
    async fn recompute_job_stops_on_shutdown() {
        let store = memory_store().await;
        let maintainer = Arc::new(ResultsMaintainer::new());
        let job = RecomputeJob::new(store, maintainer, Duration::from_secs(3600));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(job.run(shutdown_rx));
        shutdown_tx.send(true).expect("receiver alive");
        handle
            .await
            .expect("job task joins")
            .expect("job exits cleanly");
    }
}
