//! Admin dashboard: pipeline statistics and lead management.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::error::{ApiError, ErrorBody};
use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::state::AppState;
use crate::domain::{
    CallSession, InvestorProfile, LeadNote, MatchedDeal, PipelineStage, Qualification,
    StageChange, CHANGED_BY_ADMIN,
};
use crate::metrics;
use crate::store::{LeadFilter, LeadRelations, LeadSort, SortOrder};

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;
const RECENT_ACTIVITY: u64 = 5;

// === Response shapes ===

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QualificationResponse {
    pub investor_type: String,
    pub capacity: String,
    pub fit: String,
    pub process: String,
    pub timing: String,
    pub score: i32,
    pub bucket: String,
}

impl From<Qualification> for QualificationResponse {
    fn from(q: Qualification) -> Self {
        Self {
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

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallRecordResponse {
    pub id: Uuid,
    pub status: String,
    pub duration: Option<i32>,
    pub transcript: Option<String>,
    pub recording_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub initiated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl From<CallSession> for CallRecordResponse {
    fn from(call: CallSession) -> Self {
        Self {
            id: call.id,
            status: call.status.to_string(),
            duration: call.duration,
            transcript: call.transcript,
            recording_url: call.recording_url,
            initiated_at: call.initiated_at,
            completed_at: call.completed_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DealMatchResponse {
    pub id: Uuid,
    pub deal_memo_id: Uuid,
    pub deal_name: String,
    pub similarity_score: f64,
    pub match_reasons: Vec<String>,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<MatchedDeal> for DealMatchResponse {
    fn from(matched: MatchedDeal) -> Self {
        let m = matched.deal_match;
        Self {
            id: m.id,
            deal_memo_id: m.property_id,
            deal_name: matched.deal_name,
            similarity_score: m.similarity_score.to_f64().unwrap_or_default(),
            match_reasons: m.match_reasons,
            status: m.status.to_string(),
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeadNoteResponse {
    pub id: Uuid,
    pub content: String,
    pub created_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<LeadNote> for LeadNoteResponse {
    fn from(note: LeadNote) -> Self {
        Self {
            id: note.id,
            content: note.content,
            created_by: note.created_by,
            created_at: note.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StageChangeResponse {
    pub id: Uuid,
    pub from_stage: Option<PipelineStage>,
    pub to_stage: PipelineStage,
    pub changed_by: String,
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub changed_at: OffsetDateTime,
}

impl From<StageChange> for StageChangeResponse {
    fn from(change: StageChange) -> Self {
        Self {
            id: change.id,
            from_stage: change.from_stage,
            to_stage: change.to_stage,
            changed_by: change.changed_by,
            notes: change.notes,
            changed_at: change.changed_at,
        }
    }
}

/// A lead with everything the detail page shows.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeadWithDetails {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub timeline: Option<String>,
    pub capital_available: Option<i32>,
    pub investment_preferences: Vec<String>,
    pub investment_thesis: Option<String>,
    pub risk_tolerance: Option<String>,
    pub stage: PipelineStage,
    pub lead_score: i32,
    pub source: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub calls: Vec<CallRecordResponse>,
    pub matches: Vec<DealMatchResponse>,
    pub notes: Vec<LeadNoteResponse>,
    pub stage_history: Vec<StageChangeResponse>,
    pub qualification: Option<QualificationResponse>,
}

impl LeadWithDetails {
    pub fn new(lead: InvestorProfile, relations: LeadRelations) -> Self {
        let qualification = lead.qualification().map(Into::into);
        Self {
            id: lead.id,
            name: lead.name,
            phone: lead.phone,
            timeline: lead.timeline,
            capital_available: lead.capital_available,
            investment_preferences: lead.investment_preferences,
            investment_thesis: lead.investment_thesis,
            risk_tolerance: lead.risk_tolerance,
            stage: lead.stage,
            lead_score: lead.lead_score,
            source: lead.source,
            created_at: lead.created_at,
            updated_at: lead.updated_at,
            calls: relations.calls.into_iter().map(Into::into).collect(),
            matches: relations.matches.into_iter().map(Into::into).collect(),
            notes: relations.notes.into_iter().map(Into::into).collect(),
            stage_history: relations.stage_history.into_iter().map(Into::into).collect(),
            qualification,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeadListResponse {
    pub leads: Vec<LeadWithDetails>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ActivityItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdminStatsResponse {
    pub total_leads: u64,
    pub by_stage: BTreeMap<String, u64>,
    /// Rounded to one decimal place.
    pub average_score: f64,
    pub total_deals: u64,
    pub recent_activity: Vec<ActivityItem>,
}

// === Requests ===

/// Lead list filters and paging.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct LeadListQuery {
    /// Exact pipeline stage.
    pub stage: Option<String>,
    #[serde(alias = "score_min")]
    pub score_min: Option<i32>,
    #[serde(alias = "score_max")]
    pub score_max: Option<i32>,
    #[serde(alias = "capital_min")]
    pub capital_min: Option<i32>,
    #[serde(alias = "capital_max")]
    pub capital_max: Option<i32>,
    /// ISO 8601 date or timestamp; ignored when unparseable.
    #[serde(alias = "date_from")]
    pub date_from: Option<String>,
    #[serde(alias = "date_to")]
    pub date_to: Option<String>,
    /// Phone number substring.
    pub search: Option<String>,
    /// `created_at`, `lead_score` or `capital_available`.
    #[serde(alias = "sort_by")]
    pub sort_by: Option<String>,
    /// `asc` or `desc`.
    #[serde(alias = "sort_order")]
    pub sort_order: Option<String>,
    /// 1-based.
    pub page: Option<u64>,
    /// 1 to 100, default 20.
    #[serde(alias = "page_size")]
    pub page_size: Option<u64>,
}

impl LeadListQuery {
    /// Resolved `(page, page_size, filter)`. The filter is `None` when the
    /// stage names no known stage, so nothing can match.
    fn into_filter(self) -> Result<(u64, u64, Option<LeadFilter>), ApiError> {
        let page = self.page.unwrap_or(1);
        if page < 1 {
            return Err(ApiError::Unprocessable("page must be at least 1".to_string()));
        }
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ApiError::Unprocessable(format!(
                "pageSize must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let offset = (page - 1)
            .checked_mul(page_size)
            .ok_or_else(|| ApiError::Unprocessable("page is out of range".to_string()))?;

        let stage = match self.stage.as_deref().filter(|s| !s.is_empty()) {
            Some(raw) => match raw.parse::<PipelineStage>() {
                Ok(stage) => Some(stage),
                Err(_) => return Ok((page, page_size, None)),
            },
            None => None,
        };

        let filter = LeadFilter {
            stage,
            score_min: self.score_min,
            score_max: self.score_max,
            capital_min: self.capital_min,
            capital_max: self.capital_max,
            created_from: self.date_from.as_deref().and_then(parse_date_param),
            created_to: self.date_to.as_deref().and_then(parse_date_param),
            search: self.search.filter(|s| !s.is_empty()),
            sort_by: self.sort_by.as_deref().map(LeadSort::parse).unwrap_or_default(),
            sort_order: self
                .sort_order
                .as_deref()
                .map(SortOrder::parse)
                .unwrap_or_default(),
            offset,
            limit: page_size,
        };
        Ok((page, page_size, Some(filter)))
    }
}

/// Parse an ISO 8601 timestamp or date; values without an offset are UTC.
pub fn parse_date_param(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts);
    }
    let naive = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(ts) = PrimitiveDateTime::parse(raw, naive) {
        return Some(ts.assume_utc());
    }
    let date_only = format_description!("[year]-[month]-[day]");
    Date::parse(raw, date_only)
        .ok()
        .map(|date| date.midnight().assume_utc())
}

fn total_pages(total: u64, page_size: u64) -> u64 {
    total.div_ceil(page_size).max(1)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StageUpdateRequest {
    pub stage: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddNoteRequest {
    pub content: String,
}

// === Handlers ===

/// Dashboard statistics.
#[utoipa::path(
    get,
    path = "/api/v1/admin/stats",
    tag = "admin",
    responses(
        (status = 200, description = "Pipeline statistics", body = AdminStatsResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    )
)]
pub async fn stats(State(state): State<AppState>) -> Result<Json<AdminStatsResponse>, ApiError> {
    let store = &state.store;
    let total_leads = store.count_investors().await?;
    let by_stage = store
        .stage_counts()
        .await?
        .into_iter()
        .map(|(stage, count)| (stage.to_string(), count))
        .collect();
    let average_score = (store.average_lead_score().await? * 10.0).round() / 10.0;
    let total_deals = store.count_properties().await?;

    let recent = LeadFilter {
        limit: RECENT_ACTIVITY,
        ..LeadFilter::default()
    };
    let (recent_leads, _) = store.search_leads(&recent).await?;
    let recent_activity = recent_leads
        .iter()
        .map(|lead| ActivityItem {
            id: lead.id,
            kind: "new_lead".to_string(),
            message: format!("New lead from {}", lead.masked_phone()),
            timestamp: lead.created_at,
        })
        .collect();

    Ok(Json(AdminStatsResponse {
        total_leads,
        by_stage,
        average_score,
        total_deals,
        recent_activity,
    }))
}

/// One page of leads with their details.
#[utoipa::path(
    get,
    path = "/api/v1/admin/leads",
    tag = "admin",
    params(LeadListQuery),
    responses(
        (status = 200, description = "Filtered lead page", body = LeadListResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 422, description = "Invalid paging", body = ErrorBody)
    )
)]
pub async fn list_leads(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<LeadListQuery>,
) -> Result<Json<LeadListResponse>, ApiError> {
    let (page, page_size, filter) = query.into_filter()?;
    let Some(filter) = filter else {
        return Ok(Json(LeadListResponse {
            leads: Vec::new(),
            total: 0,
            page,
            page_size,
            total_pages: total_pages(0, page_size),
        }));
    };
    debug!("Lead search: {:?}", filter);

    let (leads, total) = state.store.search_leads(&filter).await?;
    let ids: Vec<Uuid> = leads.iter().map(|lead| lead.id).collect();
    let mut relations = state.store.lead_relations(&ids).await?;

    let leads = leads
        .into_iter()
        .map(|lead| {
            let related = relations.remove(&lead.id).unwrap_or_default();
            LeadWithDetails::new(lead, related)
        })
        .collect();

    Ok(Json(LeadListResponse {
        leads,
        total,
        page,
        page_size,
        total_pages: total_pages(total, page_size),
    }))
}

async fn lead_details(state: &AppState, id: Uuid) -> Result<LeadWithDetails, ApiError> {
    let lead = state
        .store
        .get_investor(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Lead not found".to_string()))?;
    let relations = state
        .store
        .lead_relations(&[id])
        .await?
        .remove(&id)
        .unwrap_or_default();
    Ok(LeadWithDetails::new(lead, relations))
}

/// A single lead.
#[utoipa::path(
    get,
    path = "/api/v1/admin/leads/{id}",
    tag = "admin",
    params(("id" = Uuid, Path, description = "Lead id")),
    responses(
        (status = 200, description = "Lead with details", body = LeadWithDetails),
        (status = 404, description = "Lead not found", body = ErrorBody)
    )
)]
pub async fn get_lead(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<LeadWithDetails>, ApiError> {
    Ok(Json(lead_details(&state, id).await?))
}

/// Move a lead to another pipeline stage.
#[utoipa::path(
    patch,
    path = "/api/v1/admin/leads/{id}/stage",
    tag = "admin",
    params(("id" = Uuid, Path, description = "Lead id")),
    request_body = StageUpdateRequest,
    responses(
        (status = 200, description = "Updated lead", body = LeadWithDetails),
        (status = 400, description = "Invalid stage", body = ErrorBody),
        (status = 404, description = "Lead not found", body = ErrorBody)
    )
)]
pub async fn update_stage(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<StageUpdateRequest>,
) -> Result<Json<LeadWithDetails>, ApiError> {
    let stage: PipelineStage = request.stage.parse().map_err(|_| {
        ApiError::BadRequest(format!(
            "Invalid stage. Must be one of: {}",
            PipelineStage::valid_values()
        ))
    })?;

    state
        .store
        .update_stage(id, stage, CHANGED_BY_ADMIN, request.notes)
        .await?
        .ok_or_else(|| ApiError::NotFound("Lead not found".to_string()))?;

    info!("Lead {} moved to {}", id, stage);
    metrics::inc_stage_changes();
    Ok(Json(lead_details(&state, id).await?))
}

/// Attach a note to a lead.
#[utoipa::path(
    post,
    path = "/api/v1/admin/leads/{id}/notes",
    tag = "admin",
    params(("id" = Uuid, Path, description = "Lead id")),
    request_body = AddNoteRequest,
    responses(
        (status = 200, description = "Created note", body = LeadNoteResponse),
        (status = 404, description = "Lead not found", body = ErrorBody)
    )
)]
pub async fn add_note(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<AddNoteRequest>,
) -> Result<Json<LeadNoteResponse>, ApiError> {
    let note = state
        .store
        .add_note(id, &request.content, CHANGED_BY_ADMIN)
        .await?
        .ok_or_else(|| ApiError::NotFound("Lead not found".to_string()))?;
    Ok(Json(note.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn total_pages_is_at_least_one() {
        assert_eq!(total_pages(0, 20), 1);
        assert_eq!(total_pages(20, 20), 1);
        assert_eq!(total_pages(21, 20), 2);
        assert_eq!(total_pages(3, 2), 2);
    }

    #[test]
    fn date_params_accept_iso_variants() {
        assert_eq!(
            parse_date_param("2026-03-01T12:30:00Z"),
            Some(datetime!(2026-03-01 12:30 UTC))
        );
        assert_eq!(
            parse_date_param("2026-03-01T12:30:00"),
            Some(datetime!(2026-03-01 12:30 UTC))
        );
        assert_eq!(
            parse_date_param("2026-03-01"),
            Some(datetime!(2026-03-01 0:00 UTC))
        );
        assert_eq!(parse_date_param("last tuesday"), None);
    }

    #[test]
    fn query_resolves_paging_and_ignores_bad_dates() {
        let query = LeadListQuery {
            page: Some(3),
            page_size: Some(10),
            date_from: Some("nonsense".to_string()),
            sort_by: Some("lead_score".to_string()),
            sort_order: Some("asc".to_string()),
            ..Default::default()
        };
        let (page, page_size, filter) = query.into_filter().unwrap();
        let filter = filter.unwrap();
        assert_eq!((page, page_size), (3, 10));
        assert_eq!(filter.offset, 20);
        assert_eq!(filter.created_from, None);
        assert_eq!(filter.sort_by, LeadSort::LeadScore);
        assert_eq!(filter.sort_order, SortOrder::Asc);
    }

    #[test]
    fn query_rejects_out_of_range_paging() {
        let zero_page = LeadListQuery {
            page: Some(0),
            ..Default::default()
        };
        assert!(zero_page.into_filter().is_err());

        let huge = LeadListQuery {
            page_size: Some(101),
            ..Default::default()
        };
        assert!(huge.into_filter().is_err());

        let overflowing = LeadListQuery {
            page: Some(u64::MAX),
            page_size: Some(100),
            ..Default::default()
        };
        assert!(matches!(
            overflowing.into_filter(),
            Err(ApiError::Unprocessable(_))
        ));

        let last_page = LeadListQuery {
            page: Some(u64::MAX),
            page_size: Some(1),
            ..Default::default()
        };
        let (_, _, filter) = last_page.into_filter().unwrap();
        assert_eq!(filter.unwrap().offset, u64::MAX - 1);
    }

    #[test]
    fn unknown_stage_matches_nothing() {
        let query = LeadListQuery {
            stage: Some("qualified".to_string()),
            page: Some(2),
            ..Default::default()
        };
        let (page, page_size, filter) = query.into_filter().unwrap();
        assert_eq!((page, page_size), (2, DEFAULT_PAGE_SIZE));
        assert!(filter.is_none());
    }
}
