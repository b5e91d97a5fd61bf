use std::sync::Arc;

use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database};

use crate::aggregate::ResultsMaintainer;
use crate::catalog::{Catalogs, Charity, Representative};
use crate::config::{CacheConfig, WebhookConfig};
use crate::ingest::{Submission, VotePipeline};
use crate::models::vote::{Pence, Vote};
use crate::state::{AppState, CorrelationCache};
use crate::store::VoteStore;

/// In-memory SQLite with the production migrations. One pooled connection,
/// since each SQLite memory connection is its own database.
pub async fn memory_store() -> VoteStore {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let database = Database::connect(options)
        .await
        .expect("connect in-memory sqlite");
    migration::Migrator::up(&database, None)
        .await
        .expect("migrations apply");
    VoteStore::new(database)
}

pub fn catalogs() -> Catalogs {
    let representative = |id: &str, name: &str| Representative {
        id: id.to_string(),
        name: name.to_string(),
        profession: None,
        suspended: false,
    };
    let charity = |id: &str, name: &str| Charity {
        id: id.to_string(),
        name: name.to_string(),
    };
    Catalogs::from_entries(
        vec![
            representative("YOR", "Yvetta Ortega Ramon"),
            representative("RBR", "Rosa Bright"),
        ],
        vec![
            charity("AB", "A Bright Future"),
            charity("CD", "Clean Drinking"),
        ],
    )
    .expect("valid test catalogs")
}

pub async fn pipeline() -> VotePipeline {
    VotePipeline::new(
        memory_store().await,
        Arc::new(ResultsMaintainer::new()),
        Arc::new(CorrelationCache::new(&CacheConfig::default())),
        Arc::new(catalogs()),
        None,
    )
}

pub async fn app_state() -> AppState {
    let webhook = WebhookConfig {
        path: "vote-test".to_string(),
        data_param: "data".to_string(),
        donation_param: "tariff".to_string(),
        identity_param: "msisdn".to_string(),
        shortcode_param: "keyword".to_string(),
        transaction_param: "transaction_id".to_string(),
    };
    AppState::new(Arc::new(pipeline().await), webhook)
}

pub fn vote(
    identity: &str,
    main_choice: u8,
    representative: &str,
    charity: &str,
    donation: Pence,
) -> Vote {
    Vote {
        identity: identity.to_string(),
        main_choice,
        representative_choice: representative.to_string(),
        charity_choice: charity.to_string(),
        postcode: None,
        birth_year: None,
        donation_amount: donation,
        transaction_id: None,
    }
}

pub fn submission(payload: &str, donation: Pence, identity: &str) -> Submission {
    Submission {
        payload: payload.to_string(),
        donation_amount: donation,
        identity: identity.to_string(),
        shortcode: None,
        transaction_id: None,
    }
}
