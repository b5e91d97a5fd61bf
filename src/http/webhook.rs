//! Inbound vote webhook called by the SMS donation gateway.
//!
//! The gateway cannot act on server errors, so once the mandatory
//! parameters parse the call is always acknowledged. Persistence failures
//! are logged here and nowhere else.

use std::collections::HashMap;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use tracing::error;

use crate::config::WebhookConfig;
use crate::ingest::{MAX_IDENTITY_LEN, Submission};
use crate::models::vote::Pence;
use crate::state::AppState;

use super::HttpError;

const PENCE_PER_POUND: u64 = 100;
/// Largest single donation the gateway can bill, in whole pounds.
const MAX_DONATION_POUNDS: u64 = 10_000;

pub fn router(path: &str) -> Router<AppState> {
    assert!(!path.is_empty(), "Webhook path must be configured");
    Router::new().route(&format!("/{path}"), get(receive_vote))
}

async fn receive_vote(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<StatusCode, HttpError> {
    let submission = parse_submission(&state.webhook, &params)?;
    let identity = submission.identity.clone();

    if let Err(err) = state.pipeline.submit(submission).await {
        error!(identity = %identity, "Vote not recorded: {err}");
    }

    Ok(StatusCode::OK)
}

fn parse_submission(
    config: &WebhookConfig,
    params: &HashMap<String, String>,
) -> Result<Submission, HttpError> {
    let payload = required(params, &config.data_param)?;
    let identity = required(params, &config.identity_param)?;
    let donation_raw = required(params, &config.donation_param)?;

    if identity.len() > MAX_IDENTITY_LEN {
        return Err(HttpError::bad_request(format!(
            "{} exceeds {MAX_IDENTITY_LEN} bytes",
            config.identity_param
        )));
    }

    let donation_amount = parse_donation(donation_raw).ok_or_else(|| {
        HttpError::bad_request(format!(
            "{} must be a whole number of pounds no greater than {MAX_DONATION_POUNDS}",
            config.donation_param
        ))
    })?;

    Ok(Submission {
        payload: payload.to_string(),
        donation_amount,
        identity: identity.to_string(),
        shortcode: optional(params, &config.shortcode_param),
        transaction_id: optional(params, &config.transaction_param),
    })
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a str, HttpError> {
    params
        .get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| HttpError::bad_request(format!("missing parameter {name}")))
}

fn optional(params: &HashMap<String, String>, name: &str) -> Option<String> {
    params
        .get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Gateway amounts are whole pounds; votes store pence.
fn parse_donation(raw: &str) -> Option<Pence> {
    let pounds = raw.parse::<u64>().ok()?;
    if pounds > MAX_DONATION_POUNDS {
        return None;
    }
    pounds.checked_mul(PENCE_PER_POUND)
}
