use serde::{Deserialize, Serialize};

/// Donation amount in the minor currency unit (pence).
pub type Pence = u64;

/// The canonical vote held for one voter identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub identity: String,
    pub main_choice: u8,
    pub representative_choice: String,
    pub charity_choice: String,
    pub postcode: Option<String>,
    pub birth_year: Option<u16>,
    pub donation_amount: Pence,
    pub transaction_id: Option<String>,
}

/// Demographic data registered ahead of a vote, keyed by the SMS text the
/// voter will send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDemographic {
    pub postcode: String,
    pub birth_year: u16,
}

// Request/Response types for the app HTTP API

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreVoteRequest {
    pub sms_string: String,
    pub postcode: String,
    pub birth_year: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreVoteResponse {
    pub sms_string: String,
    pub expires_in_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteView {
    pub main_vote: u8,
    pub rep_vote: String,
    pub charity: String,
    pub postcode: Option<String>,
    pub birth_year: Option<u16>,
    pub donation: Pence,
    pub voted_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntryView {
    pub id: String,
    pub name: String,
    pub profession: Option<String>,
}
