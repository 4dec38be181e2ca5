//! Polling code routes
//!
//! - `GET /code/request?token=`: issue a code bound to `token`
//! - `GET /code/exchange?type=code&token=`: same, via the combined endpoint
//! - `GET /code/exchange?type=validate&code=&refresh_token=`: redeem a code
//! - `GET /code/poll?token=`: collect granted credentials

use axum::Json;
use axum::extract::{Query, State};
use axum::http::header::CACHE_CONTROL;
use axum::response::{IntoResponse, Response};
use device_link::PollStatus;
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::error::{ApiError, with_timeout};
use crate::metrics;

#[derive(Debug, Deserialize)]
pub struct DeviceParams {
    #[serde(rename = "type")]
    kind: Option<String>,
    token: Option<String>,
    code: Option<String>,
    refresh_token: Option<String>,
}

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("missing {name}")))
}

/// Credentials are never cached by intermediaries.
fn no_store(body: serde_json::Value) -> Response {
    ([(CACHE_CONTROL, "no-store")], Json(body)).into_response()
}

async fn issue_code(state: &AppState, token: Option<String>) -> Result<Response, ApiError> {
    let token = required(token, "token")?;
    let code = state.devices.request_code(&token).await?;
    metrics::record_code_issued();
    Ok(no_store(json!({ "code": code })))
}

/// `GET /code/request?token=`
pub async fn request_handler(
    State(state): State<AppState>,
    Query(params): Query<DeviceParams>,
) -> Result<Response, ApiError> {
    issue_code(&state, params.token).await
}

/// `GET /code/exchange?type=code|validate`
pub async fn exchange_handler(
    State(state): State<AppState>,
    Query(params): Query<DeviceParams>,
) -> Result<Response, ApiError> {
    match params.kind.as_deref() {
        Some("code") => issue_code(&state, params.token).await,
        Some("validate") => {
            let code = required(params.code, "code")?;
            let factor = required(params.refresh_token, "refresh_token")?;
            let redeem = async {
                state
                    .devices
                    .redeem_code(&code, &factor)
                    .await
                    .inspect_err(|e| metrics::record_redemption(redemption_outcome(e)))
            };
            let redemption = with_timeout(state.request_timeout, redeem)
                .await
                .inspect_err(|e| {
                    if matches!(e, ApiError::Timeout) {
                        metrics::record_redemption("timeout");
                    }
                })?;
            metrics::record_redemption("success");
            Ok(no_store(json!({
                "email": redemption.email,
                "access_token": redemption.credentials.access_token.expose(),
                "refresh_token": redemption.credentials.refresh_token.expose(),
            })))
        }
        Some(other) => Err(ApiError::BadRequest(format!("unknown type: {other}"))),
        None => Err(ApiError::BadRequest("missing type".into())),
    }
}

fn redemption_outcome(err: &device_link::Error) -> &'static str {
    match err {
        device_link::Error::InvalidCode => "invalid_code",
        device_link::Error::InvalidFactor => "invalid_factor",
        _ => "error",
    }
}

/// `GET /code/poll?token=`
pub async fn poll_handler(
    State(state): State<AppState>,
    Query(params): Query<DeviceParams>,
) -> Result<Response, ApiError> {
    let token = required(params.token, "token")?;
    match state.devices.poll(&token).await? {
        PollStatus::Waiting => Ok(no_store(json!({ "status": "waiting" }))),
        PollStatus::Granted(credentials) => Ok(no_store(json!({
            "status": "granted",
            "access_token": credentials.access_token.expose(),
            "refresh_token": credentials.refresh_token.expose(),
        }))),
    }
}
