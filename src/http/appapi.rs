use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Datelike, Utc};

use crate::aggregate::Results;
use crate::models::vote::{CatalogEntryView, PendingDemographic, PreVoteRequest, PreVoteResponse, VoteView};
use crate::state::AppState;
use crate::store::to_record;

use super::HttpError;

const RECENT_VOTES_LIMIT: u64 = 50;
const MIN_BIRTH_YEAR_EXCLUSIVE: i64 = 1850;
const MAX_SMS_STRING_LEN: usize = 160;
const MAX_POSTCODE_LEN: usize = 10;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/prevote", post(register_prevote))
        .route("/recentvotes", get(list_recent_votes))
        .route("/results", get(get_results))
        .route("/charities", get(list_charities))
        .route("/representatives", get(list_representatives))
}

async fn register_prevote(
    State(state): State<AppState>,
    request: Result<Json<PreVoteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PreVoteResponse>), HttpError> {
    let Json(request) = request.map_err(|rejection| HttpError::bad_request(rejection.body_text()))?;
    let (key, demographic) = validate_prevote(request, Utc::now().year())?;

    state
        .correlation
        .register(key.clone(), demographic)
        .await;

    let response = PreVoteResponse {
        sms_string: key,
        expires_in_seconds: state.correlation.ttl().as_secs(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

fn validate_prevote(
    request: PreVoteRequest,
    current_year: i32,
) -> Result<(String, PendingDemographic), HttpError> {
    let key = request.sms_string.trim();
    if key.is_empty() {
        return Err(HttpError::bad_request("smsString must not be empty"));
    }
    if key.len() > MAX_SMS_STRING_LEN {
        return Err(HttpError::bad_request(format!(
            "smsString exceeds {MAX_SMS_STRING_LEN} bytes"
        )));
    }

    let postcode = request.postcode.trim().to_ascii_uppercase();
    if postcode.is_empty() {
        return Err(HttpError::bad_request("postcode must not be empty"));
    }
    if postcode.len() > MAX_POSTCODE_LEN {
        return Err(HttpError::bad_request(format!(
            "postcode exceeds {MAX_POSTCODE_LEN} characters"
        )));
    }

    let year = request.birth_year;
    if year <= MIN_BIRTH_YEAR_EXCLUSIVE || year > i64::from(current_year) {
        return Err(HttpError::bad_request(format!(
            "birthYear {year} is not plausible"
        )));
    }
    let birth_year = u16::try_from(year)
        .map_err(|_| HttpError::bad_request(format!("birthYear {year} is not plausible")))?;

    Ok((
        key.to_string(),
        PendingDemographic {
            postcode,
            birth_year,
        },
    ))
}

async fn list_recent_votes(
    State(state): State<AppState>,
) -> Result<Json<Vec<VoteView>>, HttpError> {
    let models = state
        .store
        .recent(RECENT_VOTES_LIMIT)
        .await
        .map_err(|err| HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    let mut views = Vec::with_capacity(models.len());
    for model in models {
        let voted_at = model.updated_at.timestamp();
        let vote = to_record(model)
            .map_err(|err| HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;
        views.push(VoteView {
            main_vote: vote.main_choice,
            rep_vote: vote.representative_choice,
            charity: vote.charity_choice,
            postcode: vote.postcode,
            birth_year: vote.birth_year,
            donation: vote.donation_amount,
            voted_at,
        });
    }

    assert!(
        views.len() <= RECENT_VOTES_LIMIT as usize,
        "Returned more votes than requested"
    );
    Ok(Json(views))
}

async fn get_results(State(state): State<AppState>) -> Json<Results> {
    Json(state.results.snapshot().await)
}

async fn list_charities(State(state): State<AppState>) -> Json<Vec<CatalogEntryView>> {
    Json(state.catalogs.charity_views())
}

async fn list_representatives(State(state): State<AppState>) -> Json<Vec<CatalogEntryView>> {
    Json(state.catalogs.representative_views())
}
