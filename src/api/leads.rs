//! Chatbot lead submission.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::{ApiError, ErrorBody};
use super::extract::ApiJson;
use super::state::AppState;
use crate::domain::Qualification;
use crate::services::{ClientInfo, LeadOutcome, LeadProcessor, LeadSubmission};

const MIN_PHONE_CHARS: usize = 10;

/// Qualification answers collected by the chatbot.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QualificationData {
    /// `hnw`, `family_office` or `other:...`.
    #[serde(alias = "investor_type")]
    pub investor_type: String,
    /// `$100K-$250K`, `$250K-$500K`, `$500K-$1M`, `$1M+` or `other:...`.
    pub capacity: String,
    pub fit: String,
    pub process: String,
    pub timing: String,
    /// 0 to 100.
    pub score: i32,
    /// `active_intro`, `nurture` or `not_qualified`.
    pub bucket: String,
}

impl From<QualificationData> for Qualification {
    fn from(q: QualificationData) -> Self {
        Qualification {
            investor_type: q.investor_type,
            capacity: q.capacity,
            fit: q.fit,
            process: q.process,
            timing: q.timing,
            score: q.score,
            bucket: q.bucket,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeadSubmissionRequest {
    #[serde(alias = "phone_number")]
    pub phone_number: String,
    /// Must be true.
    pub consent: bool,
    /// Client-side submission time (ISO 8601).
    pub timestamp: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub qualification: Option<QualificationData>,
    #[serde(default, alias = "investment_timeline")]
    pub investment_timeline: Option<String>,
    #[serde(default, alias = "capital_available")]
    pub capital_available: Option<String>,
    #[serde(default, alias = "investment_preferences")]
    pub investment_preferences: Option<Vec<String>>,
}

impl LeadSubmissionRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.phone_number.chars().count() < MIN_PHONE_CHARS {
            return Err(ApiError::Unprocessable(format!(
                "phoneNumber must be at least {MIN_PHONE_CHARS} characters"
            )));
        }
        if let Some(q) = &self.qualification {
            if !(0..=100).contains(&q.score) {
                return Err(ApiError::Unprocessable(
                    "qualification.score must be between 0 and 100".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl From<LeadSubmissionRequest> for LeadSubmission {
    fn from(request: LeadSubmissionRequest) -> Self {
        LeadSubmission {
            phone: request.phone_number,
            name: request.name,
            qualification: request.qualification.map(Into::into),
            investment_timeline: request.investment_timeline,
            capital_available: request.capital_available,
            investment_preferences: request.investment_preferences.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeadSubmissionResponse {
    pub success: bool,
    pub message: String,
    pub lead_id: Uuid,
}

/// Client address: first `X-Forwarded-For` entry, else the peer address.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Accept a lead from the chatbot.
#[utoipa::path(
    post,
    path = "/api/v1/submit-lead",
    tag = "leads",
    request_body = LeadSubmissionRequest,
    responses(
        (status = 200, description = "Lead created or already known", body = LeadSubmissionResponse),
        (status = 400, description = "Consent missing", body = ErrorBody),
        (status = 422, description = "Validation failed", body = ErrorBody)
    )
)]
pub async fn submit_lead(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<LeadSubmissionRequest>,
) -> Result<Json<LeadSubmissionResponse>, ApiError> {
    request.validate()?;
    if !request.consent {
        return Err(ApiError::BadRequest(
            "Consent is required for lead submission".to_string(),
        ));
    }

    let client = ClientInfo {
        ip_address: client_ip(&headers, peer.map(|ConnectInfo(addr)| addr)),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    };

    let outcome = LeadProcessor::new(state.store.as_ref())
        .process_lead(request.into(), client)
        .await?;

    let message = match &outcome {
        LeadOutcome::Created(_) => "Lead submitted successfully",
        LeadOutcome::Existing(_) => "Lead already exists",
    };
    Ok(Json(LeadSubmissionResponse {
        success: true,
        message: message.to_string(),
        lead_id: outcome.investor().id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn request(phone: &str, score: i32) -> LeadSubmissionRequest {
        serde_json::from_value(serde_json::json!({
            "phoneNumber": phone,
            "consent": true,
            "timestamp": "2026-03-01T12:00:00Z",
            "qualification": {
                "investorType": "hnw",
                "capacity": "$1M+",
                "fit": "high_priority",
                "process": "toe_in",
                "timing": "actively_deploying",
                "score": score,
                "bucket": "active_intro"
            }
        }))
        .unwrap()
    }

    #[test]
    fn validates_phone_length_and_score_range() {
        assert!(request("5551234567", 80).validate().is_ok());
        assert!(request("555123", 80).validate().is_err());
        assert!(request("5551234567", 101).validate().is_err());
        assert!(request("5551234567", -1).validate().is_err());
    }

    #[test]
    fn accepts_snake_case_fields() {
        let parsed: LeadSubmissionRequest = serde_json::from_value(serde_json::json!({
            "phone_number": "5551234567",
            "consent": true,
            "timestamp": "2026-03-01T12:00:00Z",
            "capital_available": "$500K-$1M"
        }))
        .unwrap();
        let submission = LeadSubmission::from(parsed);
        assert_eq!(submission.phone, "5551234567");
        assert_eq!(submission.capital_available.as_deref(), Some("$500K-$1M"));
    }

    #[test]
    fn forwarded_for_wins_over_peer() {
        let peer: SocketAddr = "10.0.0.7:4411".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)).as_deref(), Some("10.0.0.7"));

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(
            client_ip(&headers, Some(peer)).as_deref(),
            Some("203.0.113.9")
        );
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }
}
