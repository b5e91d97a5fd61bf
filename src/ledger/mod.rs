//! Best-effort forwarding of finalized votes to the external ledger.
//!
//! The request path only enqueues. A single worker drains the queue and
//! posts each record; failures are logged and dropped because the vote is
//! already persisted and counted.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::models::vote::{Pence, Vote};

const VOTE_ENDPOINT: &str = "vote";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("ledger request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("ledger responded with status {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerVote {
    pub main_vote: u8,
    pub rep_vote: String,
    pub charity: String,
    pub postcode: Option<String>,
    pub birth_year: Option<u16>,
    pub donation: Pence,
}

/// The document the ledger stores. `sms_code` keeps the raw SMS data as
/// proof of what the voter sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerRecord {
    pub vote: LedgerVote,
    pub identifier: String,
    pub sms_code: String,
    pub transaction_id: Option<String>,
    pub voted_at: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn new(vote: &Vote, raw_payload: &str, voted_at: DateTime<Utc>) -> Self {
        Self {
            vote: LedgerVote {
                main_vote: vote.main_choice,
                rep_vote: vote.representative_choice.clone(),
                charity: vote.charity_choice.clone(),
                postcode: vote.postcode.clone(),
                birth_year: vote.birth_year,
                donation: vote.donation_amount,
            },
            identifier: vote.identity.clone(),
            sms_code: raw_payload.to_string(),
            transaction_id: vote.transaction_id.clone(),
            voted_at,
        }
    }
}

#[derive(Clone)]
pub struct LedgerClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl LedgerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RelayError> {
        assert!(!base_url.is_empty(), "Ledger base URL must be provided");
        assert!(
            timeout >= Duration::from_millis(100),
            "Timeout below 100ms is unsafe"
        );

        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/{VOTE_ENDPOINT}", base_url.trim_end_matches('/')),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn send(&self, record: &LedgerRecord) -> Result<(), RelayError> {
        let response = self.http.post(&self.endpoint).json(record).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status(status));
        }
        Ok(())
    }
}

/// Handle used by the ingestion path. Cloning shares the same queue.
#[derive(Clone)]
pub struct LedgerRelay {
    sender: mpsc::Sender<LedgerRecord>,
}

impl LedgerRelay {
    pub fn from_config(config: &LedgerConfig) -> Result<(Self, JoinHandle<()>), RelayError> {
        let client = LedgerClient::new(&config.base_url, config.request_timeout())?;
        Ok(Self::spawn(client, config.queue_capacity))
    }

    /// Starts the worker. It exits once every relay handle is dropped and
    /// the queue is drained.
    pub fn spawn(client: LedgerClient, queue_capacity: usize) -> (Self, JoinHandle<()>) {
        assert!(queue_capacity > 0, "Ledger queue capacity must be positive");
        let (sender, mut receiver) = mpsc::channel::<LedgerRecord>(queue_capacity);

        let handle = tokio::spawn(async move {
            info!(
                endpoint = %client.endpoint,
                timeout_ms = client.timeout().as_millis() as u64,
                "Ledger relay worker started"
            );
            while let Some(record) = receiver.recv().await {
                match client.send(&record).await {
                    Ok(()) => debug!(identifier = %record.identifier, "Vote relayed to ledger"),
                    Err(err) => warn!(
                        identifier = %record.identifier,
                        "Ledger relay failed: {err}"
                    ),
                }
            }
            info!("Ledger relay worker stopped");
        });

        (Self { sender }, handle)
    }

    /// Never waits: a full or closed queue drops the record.
    pub fn relay(&self, vote: &Vote, raw_payload: &str) {
        let record = LedgerRecord::new(vote, raw_payload, Utc::now());
        match self.sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => warn!(
                identifier = %record.identifier,
                "Ledger relay queue full, dropping record"
            ),
            Err(TrySendError::Closed(record)) => warn!(
                identifier = %record.identifier,
                "Ledger relay worker gone, dropping record"
            ),
        }
    }
}
