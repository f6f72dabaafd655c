//! OpenAPI document served at `/openapi.json`.

use utoipa::OpenApi;

use super::{admin, auth, error, handlers, leads, properties};
use crate::domain::{DealStatus, PipelineStage};
use crate::services::DealMemoExtraction;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "BlackKeyX API",
        description = "Autonomous Capital Alignment System - Backend API"
    ),
    paths(
        handlers::health,
        handlers::ready,
        leads::submit_lead,
        auth::login,
        auth::logout,
        admin::stats,
        admin::list_leads,
        admin::get_lead,
        admin::update_stage,
        admin::add_note,
        properties::list_deals,
        properties::create_deal,
        properties::get_deal,
        properties::update_deal,
        properties::upload_document,
        properties::extract_document,
    ),
    components(schemas(
        error::ErrorBody,
        PipelineStage,
        DealStatus,
        DealMemoExtraction,
    )),
    tags(
        (name = "health", description = "Liveness and readiness"),
        (name = "leads", description = "Chatbot lead intake"),
        (name = "admin", description = "Admin dashboard"),
        (name = "properties", description = "Deal memos and documents")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for expected in [
            "/health",
            "/api/v1/submit-lead",
            "/api/v1/admin/auth",
            "/api/v1/admin/leads/{id}/stage",
            "/api/v1/properties/upload",
            "/api/v1/properties/extract",
        ] {
            assert!(paths.contains(&expected), "missing {expected}");
        }
    }
}
