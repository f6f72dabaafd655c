//! Deal memos: CRUD, document upload and AI extraction.

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::error::{ApiError, ErrorBody};
use super::extract::{ApiForm, ApiJson, ApiPath, ApiQuery};
use super::state::AppState;
use crate::domain::{
    DealStatus, NewProperty, NewPropertyFeatures, Property, PropertyFeatures, PropertyUpdate,
};
use crate::metrics;
use crate::services::documents::{is_allowed_content_type, sanitize_filename, upload_key};
use crate::services::DealMemoExtraction;
use crate::store::DealFilter;

/// Multipart framing allowed on top of the file itself.
pub const MULTIPART_OVERHEAD: usize = 64 * 1024;

// === Response shapes ===

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFeaturesResponse {
    pub asset_type: String,
    #[schema(value_type = Object)]
    pub features: Value,
    pub year_built: Option<i32>,
    pub year_renovated: Option<i32>,
    pub parking_spaces: Option<i32>,
}

impl From<PropertyFeatures> for PropertyFeaturesResponse {
    fn from(f: PropertyFeatures) -> Self {
        Self {
            asset_type: f.asset_type,
            features: f.features,
            year_built: f.year_built,
            year_renovated: f.year_renovated,
            parking_spaces: f.parking_spaces,
        }
    }
}

/// A deal memo.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DealMemoResponse {
    pub id: Uuid,
    pub name: String,
    pub deal_type: String,
    pub summary: Option<String>,
    pub thesis: Option<String>,
    pub minimum_investment: Option<i32>,
    pub target_return: Option<String>,
    pub risk_factors: Vec<String>,
    pub ideal_investor_profile: Option<String>,
    pub structure: Option<String>,
    pub timeline: Option<String>,
    pub status: DealStatus,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub purchase_price: Option<i32>,
    pub square_feet: Option<i32>,
    pub total_equity_required: Option<i32>,
    pub document_filename: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<PropertyFeaturesResponse>,
}

impl DealMemoResponse {
    fn new(deal: Property, features: Option<PropertyFeatures>) -> Self {
        Self {
            id: deal.id,
            name: deal.name,
            deal_type: deal.deal_type,
            summary: deal.summary,
            thesis: deal.thesis,
            minimum_investment: deal.minimum_investment,
            target_return: deal.target_return,
            risk_factors: deal.risk_factors,
            ideal_investor_profile: deal.ideal_investor_profile,
            structure: deal.structure,
            timeline: deal.timeline,
            status: deal.status,
            address: deal.address,
            city: deal.city,
            state: deal.state,
            zip_code: deal.zip_code,
            purchase_price: deal.purchase_price,
            square_feet: deal.square_feet,
            total_equity_required: deal.total_equity_required,
            document_filename: deal.document_filename,
            created_at: deal.created_at,
            updated_at: deal.updated_at,
            features: features.map(Into::into),
        }
    }
}

impl From<Property> for DealMemoResponse {
    fn from(deal: Property) -> Self {
        Self::new(deal, None)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DealListResponse {
    pub deals: Vec<DealMemoResponse>,
    pub total: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DealUploadResponse {
    pub upload_id: Uuid,
    pub filename: String,
    /// Always "uploaded".
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DealExtractionResponse {
    pub extraction: DealMemoExtraction,
    pub raw_text: String,
}

// === Requests ===

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct DealListQuery {
    /// `active`, `closed` or `paused`.
    pub status: Option<DealStatus>,
    #[serde(alias = "deal_type")]
    pub deal_type: Option<String>,
    /// Case-insensitive match on name or summary.
    pub search: Option<String>,
    /// Only deals whose minimum investment is at most this amount.
    #[serde(alias = "max_investment")]
    pub max_investment: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFeaturesRequest {
    #[serde(alias = "asset_type")]
    pub asset_type: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub features: Value,
    #[serde(default, alias = "year_built")]
    pub year_built: Option<i32>,
    #[serde(default, alias = "year_renovated")]
    pub year_renovated: Option<i32>,
    #[serde(default, alias = "parking_spaces")]
    pub parking_spaces: Option<i32>,
}

impl From<PropertyFeaturesRequest> for NewPropertyFeatures {
    fn from(f: PropertyFeaturesRequest) -> Self {
        NewPropertyFeatures {
            asset_type: f.asset_type,
            features: f.features,
            year_built: f.year_built,
            year_renovated: f.year_renovated,
            parking_spaces: f.parking_spaces,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DealCreateRequest {
    pub name: String,
    #[serde(alias = "deal_type")]
    pub deal_type: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub thesis: Option<String>,
    #[serde(default, alias = "minimum_investment")]
    pub minimum_investment: Option<i32>,
    #[serde(default, alias = "target_return")]
    pub target_return: Option<String>,
    #[serde(default, alias = "risk_factors")]
    pub risk_factors: Vec<String>,
    #[serde(default, alias = "ideal_investor_profile")]
    pub ideal_investor_profile: Option<String>,
    #[serde(default)]
    pub structure: Option<String>,
    #[serde(default)]
    pub timeline: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, alias = "zip_code")]
    pub zip_code: Option<String>,
    #[serde(default, alias = "purchase_price")]
    pub purchase_price: Option<i32>,
    #[serde(default, alias = "square_feet")]
    pub square_feet: Option<i32>,
    #[serde(default, alias = "total_equity_required")]
    pub total_equity_required: Option<i32>,
    /// Storage key of a previously uploaded document.
    #[serde(default, alias = "document_s3_key")]
    pub document_s3_key: Option<String>,
    #[serde(default, alias = "document_filename")]
    pub document_filename: Option<String>,
    #[serde(default)]
    pub features: Option<PropertyFeaturesRequest>,
}

impl DealCreateRequest {
    fn into_parts(self) -> Result<(NewProperty, Option<NewPropertyFeatures>), ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::Unprocessable("name must not be empty".to_string()));
        }
        let features = self.features.map(Into::into);
        let property = NewProperty {
            name: self.name,
            deal_type: self.deal_type,
            summary: self.summary,
            thesis: self.thesis,
            minimum_investment: self.minimum_investment,
            target_return: self.target_return,
            risk_factors: self.risk_factors,
            ideal_investor_profile: self.ideal_investor_profile,
            structure: self.structure,
            timeline: self.timeline,
            address: self.address,
            city: self.city,
            state: self.state,
            zip_code: self.zip_code,
            purchase_price: self.purchase_price,
            square_feet: self.square_feet,
            total_equity_required: self.total_equity_required,
            document_s3_key: self.document_s3_key,
            document_filename: self.document_filename,
        };
        Ok((property, features))
    }
}

/// Partial update; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DealUpdateRequest {
    pub name: Option<String>,
    #[serde(alias = "deal_type")]
    pub deal_type: Option<String>,
    pub summary: Option<String>,
    pub thesis: Option<String>,
    #[serde(alias = "minimum_investment")]
    pub minimum_investment: Option<i32>,
    #[serde(alias = "target_return")]
    pub target_return: Option<String>,
    #[serde(alias = "risk_factors")]
    pub risk_factors: Option<Vec<String>>,
    #[serde(alias = "ideal_investor_profile")]
    pub ideal_investor_profile: Option<String>,
    pub structure: Option<String>,
    pub timeline: Option<String>,
    pub status: Option<DealStatus>,
}

impl From<DealUpdateRequest> for PropertyUpdate {
    fn from(r: DealUpdateRequest) -> Self {
        PropertyUpdate {
            name: r.name,
            deal_type: r.deal_type,
            summary: r.summary,
            thesis: r.thesis,
            minimum_investment: r.minimum_investment,
            target_return: r.target_return,
            risk_factors: r.risk_factors,
            ideal_investor_profile: r.ideal_investor_profile,
            structure: r.structure,
            timeline: r.timeline,
            status: r.status,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExtractForm {
    #[serde(alias = "uploadId")]
    pub upload_id: String,
}

/// Multipart body of the upload endpoint.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

fn deal_not_found() -> ApiError {
    ApiError::NotFound("Deal not found".to_string())
}

// === Handlers ===

/// List deal memos.
#[utoipa::path(
    get,
    path = "/api/v1/properties",
    tag = "properties",
    params(DealListQuery),
    responses((status = 200, description = "Deals", body = DealListResponse))
)]
pub async fn list_deals(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<DealListQuery>,
) -> Result<Json<DealListResponse>, ApiError> {
    let (deals, total) = if let Some(status) = query.status {
        let deals = state.store.properties_by_status(status).await?;
        let total = deals.len() as u64;
        (deals, total)
    } else if query.deal_type.is_some() || query.search.is_some() || query.max_investment.is_some() {
        let filter = DealFilter {
            deal_type: query.deal_type,
            search: query.search,
            max_investment: query.max_investment,
            ..DealFilter::default()
        };
        state.store.search_deals(&filter).await?
    } else {
        state
            .store
            .active_deals(0, DealFilter::default().limit)
            .await?
    };

    Ok(Json(DealListResponse {
        deals: deals.into_iter().map(Into::into).collect(),
        total,
    }))
}

/// Create a deal memo (status `active`).
#[utoipa::path(
    post,
    path = "/api/v1/properties",
    tag = "properties",
    request_body = DealCreateRequest,
    responses(
        (status = 200, description = "Created deal", body = DealMemoResponse),
        (status = 422, description = "Validation failed", body = ErrorBody)
    )
)]
pub async fn create_deal(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<DealCreateRequest>,
) -> Result<Json<DealMemoResponse>, ApiError> {
    let (property, features) = request.into_parts()?;
    let (deal, features) = state.store.create_property(property, features).await?;
    info!("Created deal {} ({})", deal.id, deal.name);
    Ok(Json(DealMemoResponse::new(deal, features)))
}

/// A single deal memo.
#[utoipa::path(
    get,
    path = "/api/v1/properties/{id}",
    tag = "properties",
    params(("id" = Uuid, Path, description = "Deal id")),
    responses(
        (status = 200, description = "Deal", body = DealMemoResponse),
        (status = 404, description = "Deal not found", body = ErrorBody)
    )
)]
pub async fn get_deal(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<DealMemoResponse>, ApiError> {
    let deal = state
        .store
        .get_property(id)
        .await?
        .ok_or_else(deal_not_found)?;
    let features = state.store.get_property_features(id).await?;
    Ok(Json(DealMemoResponse::new(deal, features)))
}

/// Update the fields present in the body.
#[utoipa::path(
    put,
    path = "/api/v1/properties/{id}",
    tag = "properties",
    params(("id" = Uuid, Path, description = "Deal id")),
    request_body = DealUpdateRequest,
    responses(
        (status = 200, description = "Updated deal", body = DealMemoResponse),
        (status = 404, description = "Deal not found", body = ErrorBody)
    )
)]
pub async fn update_deal(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<DealUpdateRequest>,
) -> Result<Json<DealMemoResponse>, ApiError> {
    let update = PropertyUpdate::from(request);
    let deal = if update.is_empty() {
        state.store.get_property(id).await?
    } else {
        state.store.update_property(id, &update).await?
    }
    .ok_or_else(deal_not_found)?;

    let features = state.store.get_property_features(id).await?;
    Ok(Json(DealMemoResponse::new(deal, features)))
}

fn too_large(max_bytes: usize) -> ApiError {
    ApiError::BadRequest(format!(
        "File too large. Max size: {}MB",
        max_bytes / (1024 * 1024)
    ))
}

fn multipart_error(e: MultipartError, max_bytes: usize) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(max_bytes)
    } else {
        e.into()
    }
}

async fn read_file(field: Field<'_>, max_bytes: usize) -> Result<(String, String, Vec<u8>), ApiError> {
    let content_type = field.content_type().unwrap_or_default().to_string();
    if !is_allowed_content_type(&content_type) {
        return Err(ApiError::BadRequest(
            "Invalid file type. Allowed: PDF, DOCX".to_string(),
        ));
    }
    let filename = sanitize_filename(field.file_name().unwrap_or_default());
    let bytes = field
        .bytes()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?;
    if bytes.len() > max_bytes {
        return Err(too_large(max_bytes));
    }
    Ok((filename, content_type, bytes.to_vec()))
}

/// Upload a PDF or DOCX deal document.
#[utoipa::path(
    post,
    path = "/api/v1/properties/upload",
    tag = "properties",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Stored", body = DealUploadResponse),
        (status = 400, description = "Wrong type or too large", body = ErrorBody)
    )
)]
#[instrument(skip_all)]
pub async fn upload_document(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DealUploadResponse>, ApiError> {
    let max_bytes = state.settings.max_upload_bytes;
    let mut multipart = multipart?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let (filename, content_type, bytes) = read_file(field, max_bytes).await?;
        let upload_id = Uuid::new_v4();
        let size = bytes.len();
        state
            .documents
            .put(&upload_key(upload_id, &filename), bytes, &content_type)
            .await?;

        info!("Stored upload {} ({}, {} bytes)", upload_id, filename, size);
        metrics::inc_documents_uploaded();
        return Ok(Json(DealUploadResponse {
            upload_id,
            filename,
            status: "uploaded".to_string(),
        }));
    }

    Err(ApiError::Unprocessable("file is required".to_string()))
}

/// `upload_id` from a urlencoded or multipart form.
async fn upload_id_field(request: Request, state: &AppState) -> Result<String, ApiError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if !is_multipart {
        let ApiForm(form) = ApiForm::<ExtractForm>::from_request(request, state).await?;
        return Ok(form.upload_id);
    }

    let mut multipart = Multipart::from_request(request, state).await?;
    while let Some(field) = multipart.next_field().await? {
        if matches!(field.name(), Some("upload_id" | "uploadId")) {
            return Ok(field.text().await?);
        }
    }
    Err(ApiError::Unprocessable("upload_id is required".to_string()))
}

/// Extract deal memo fields from an uploaded document.
#[utoipa::path(
    post,
    path = "/api/v1/properties/extract",
    tag = "properties",
    request_body(content = ExtractForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Extraction (fallback when unavailable)", body = DealExtractionResponse),
        (status = 404, description = "Upload not found", body = ErrorBody)
    )
)]
pub async fn extract_document(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<DealExtractionResponse>, ApiError> {
    let raw_id = upload_id_field(request, &state).await?;
    let not_found = || ApiError::NotFound("Upload not found".to_string());

    let upload_id = Uuid::parse_str(raw_id.trim()).map_err(|_| not_found())?;
    let document = state
        .documents
        .find_upload(upload_id)
        .await?
        .ok_or_else(not_found)?;

    info!("Extracting {} ({} bytes)", document.key, document.bytes.len());
    let (extraction, raw_text) = state.extraction.extract_document(&document.bytes).await;
    Ok(Json(DealExtractionResponse {
        extraction,
        raw_text,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_accepts_both_casings() {
        let request: DealCreateRequest = serde_json::from_value(serde_json::json!({
            "name": "Harbor View",
            "deal_type": "multifamily",
            "minimumInvestment": 50000,
            "features": { "assetType": "multifamily", "parking_spaces": 120 }
        }))
        .unwrap();
        let (property, features) = request.into_parts().unwrap();
        assert_eq!(property.deal_type, "multifamily");
        assert_eq!(property.minimum_investment, Some(50_000));
        assert_eq!(features.unwrap().parking_spaces, Some(120));
    }

    #[test]
    fn blank_name_is_rejected() {
        let request: DealCreateRequest = serde_json::from_value(serde_json::json!({
            "name": "  ",
            "dealType": "office"
        }))
        .unwrap();
        assert!(matches!(
            request.into_parts(),
            Err(ApiError::Unprocessable(_))
        ));
    }

    #[test]
    fn update_request_keeps_absent_fields_empty() {
        let request: DealUpdateRequest =
            serde_json::from_value(serde_json::json!({ "status": "paused" })).unwrap();
        let update = PropertyUpdate::from(request);
        assert_eq!(update.status, Some(DealStatus::Paused));
        assert_eq!(update.name, None);
        assert!(!update.is_empty());
    }

    #[test]
    fn too_large_reports_megabytes() {
        assert_eq!(
            too_large(10 * 1024 * 1024).to_string(),
            "File too large. Max size: 10MB"
        );
    }
}
