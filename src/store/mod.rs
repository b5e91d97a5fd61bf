use chrono::{FixedOffset, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use thiserror::Error;
use tracing::debug;

use crate::entities::prelude::*;
use crate::entities::vote;
use crate::models::vote::Vote as VoteRecord;

pub const SCAN_PAGE_SIZE: u64 = 500;
pub const MAX_RECENT_LIMIT: u64 = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("stored vote {id} is corrupt: {reason}")]
    Corrupt { id: i32, reason: String },
    #[error("vote cannot be stored: {0}")]
    Unrepresentable(String),
}

/// The outcome of an upsert: what the identity held before (if anything)
/// and what it holds now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted {
    pub prior: Option<VoteRecord>,
    pub vote: VoteRecord,
}

#[derive(Clone)]
pub struct VoteStore {
    database: DatabaseConnection,
}

impl VoteStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &DatabaseConnection {
        &self.database
    }

    #[cfg(test)]
    pub async fn find_by_identity(&self, identity: &str) -> Result<Option<VoteRecord>, StoreError> {
        find_model(&self.database, identity)
            .await?
            .map(to_record)
            .transpose()
    }

    /// Writes `candidate` as the one vote for its identity, overwriting any
    /// earlier vote in place. The read of the prior vote and the write share
    /// a transaction.
    pub async fn upsert(&self, candidate: &VoteRecord) -> Result<Upserted, StoreError> {
        assert!(
            !candidate.identity.is_empty(),
            "Vote identity cannot be empty"
        );

        let txn = self.database.begin().await?;
        let now = fixed_now();

        let existing = find_model(&txn, &candidate.identity).await?;

        let (prior, model) = match existing {
            Some(found) => {
                let prior = to_record(found.clone())?;
                let mut active = found.into_active_model();
                apply_fields(&mut active, candidate)?;
                active.updated_at = Set(now);
                (Some(prior), active.update(&txn).await?)
            }
            None => {
                let mut active = vote::ActiveModel {
                    identity: Set(candidate.identity.clone()),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                };
                apply_fields(&mut active, candidate)?;
                (None, active.insert(&txn).await?)
            }
        };

        txn.commit().await?;

        debug!(
            identity = %candidate.identity,
            overwritten = prior.is_some(),
            "Vote persisted"
        );

        Ok(Upserted {
            prior,
            vote: to_record(model)?,
        })
    }

    /// Most recently written votes first.
    pub async fn recent(&self, limit: u64) -> Result<Vec<vote::Model>, StoreError> {
        assert!(limit > 0, "Recent vote limit must be positive");
        let limit = limit.min(MAX_RECENT_LIMIT);
        let votes = Vote::find()
            .order_by_desc(vote::Column::UpdatedAt)
            .order_by_desc(vote::Column::Id)
            .limit(limit)
            .all(&self.database)
            .await?;
        assert!(
            votes.len() <= limit as usize,
            "Returned more votes than requested"
        );
        Ok(votes)
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        Ok(Vote::find().count(&self.database).await?)
    }

    /// Visits every persisted vote, one page at a time.
    pub async fn scan<F>(&self, mut visit: F) -> Result<u64, StoreError>
    where
        F: FnMut(VoteRecord),
    {
        let mut pages = Vote::find()
            .order_by_asc(vote::Column::Id)
            .paginate(&self.database, SCAN_PAGE_SIZE);

        let mut visited = 0u64;
        while let Some(page) = pages.fetch_and_next().await? {
            for model in page {
                visit(to_record(model)?);
                visited += 1;
            }
        }
        Ok(visited)
    }
}

fn apply_fields(active: &mut vote::ActiveModel, vote: &VoteRecord) -> Result<(), StoreError> {
    let donation = i64::try_from(vote.donation_amount).map_err(|_| {
        StoreError::Unrepresentable(format!(
            "donation {} exceeds i64 bounds",
            vote.donation_amount
        ))
    })?;
    active.main_choice = Set(i16::from(vote.main_choice));
    active.representative_choice = Set(vote.representative_choice.clone());
    active.charity_choice = Set(vote.charity_choice.clone());
    active.postcode = Set(vote.postcode.clone());
    active.birth_year = Set(vote.birth_year.map(i32::from));
    active.donation_amount = Set(donation);
    active.transaction_id = Set(vote.transaction_id.clone());
    Ok(())
}

async fn find_model<C>(conn: &C, identity: &str) -> Result<Option<vote::Model>, DbErr>
where
    C: ConnectionTrait,
{
    Vote::find()
        .filter(vote::Column::Identity.eq(identity))
        .one(conn)
        .await
}

pub(crate) fn to_record(model: vote::Model) -> Result<VoteRecord, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        id: model.id,
        reason,
    };
    let main_choice = u8::try_from(model.main_choice)
        .map_err(|_| corrupt(format!("main choice {} out of range", model.main_choice)))?;
    let donation_amount = u64::try_from(model.donation_amount)
        .map_err(|_| corrupt(format!("negative donation {}", model.donation_amount)))?;
    let birth_year = model
        .birth_year
        .map(u16::try_from)
        .transpose()
        .map_err(|_| corrupt("birth year out of range".to_string()))?;

    Ok(VoteRecord {
        identity: model.identity,
        main_choice,
        representative_choice: model.representative_choice,
        charity_choice: model.charity_choice,
        postcode: model.postcode,
        birth_year,
        donation_amount,
        transaction_id: model.transaction_id,
    })
}

fn fixed_now() -> chrono::DateTime<FixedOffset> {
    Utc::now().fixed_offset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_store, vote};

    #[tokio::test]
    async fn first_submission_inserts() {
        let store = memory_store().await;
        let candidate = vote("X1", 2, "YOR", "AB", 5_000);

        let upserted = store.upsert(&candidate).await.expect("upsert");
        assert_eq!(upserted.prior, None);
        assert_eq!(upserted.vote, candidate);
        assert_eq!(store.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn resubmission_overwrites_in_place() {
        let store = memory_store().await;
        let first = vote("X1", 2, "YOR", "AB", 5_000);
        let mut second = vote("X1", 3, "XXX", "XX", 10_000);
        second.postcode = Some("SW16".to_string());
        second.birth_year = Some(1980);

        store.upsert(&first).await.expect("first upsert");
        let upserted = store.upsert(&second).await.expect("second upsert");

        assert_eq!(upserted.prior, Some(first));
        assert_eq!(upserted.vote, second);
        assert_eq!(store.count().await.expect("count"), 1);
        assert_eq!(
            store.find_by_identity("X1").await.expect("find"),
            Some(second)
        );
    }

    #[tokio::test]
    async fn overwrite_clears_demographics_absent_from_candidate() {
        let store = memory_store().await;
        let mut first = vote("X1", 1, "YOR", "AB", 100);
        first.postcode = Some("SW16".to_string());
        first.birth_year = Some(1980);
        store.upsert(&first).await.expect("first upsert");

        let second = vote("X1", 1, "YOR", "AB", 100);
        store.upsert(&second).await.expect("second upsert");
        let stored = store
            .find_by_identity("X1")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(stored.postcode, None);
        assert_eq!(stored.birth_year, None);
    }

    #[tokio::test]
    async fn recent_orders_by_latest_write() {
        let store = memory_store().await;
        for identity in ["A", "B", "C"] {
            store
                .upsert(&vote(identity, 1, "XXX", "XX", 100))
                .await
                .expect("upsert");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        store
            .upsert(&vote("A", 2, "XXX", "XX", 100))
            .await
            .expect("re-vote");

        let recent = store.recent(2).await.expect("recent");
        let identities: Vec<_> = recent.iter().map(|v| v.identity.as_str()).collect();
        assert_eq!(identities, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn scan_visits_every_vote_across_pages() {
        let store = memory_store().await;
        let total = SCAN_PAGE_SIZE + 7;
        for index in 0..total {
            store
                .upsert(&vote(&format!("id-{index}"), 1, "XXX", "XX", 1))
                .await
                .expect("upsert");
        }

        let mut donations = 0u64;
        let visited = store
            .scan(|vote| donations += vote.donation_amount)
            .await
            .expect("scan");
        assert_eq!(visited, total);
        assert_eq!(donations, total);
    }
}
