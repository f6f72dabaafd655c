//! End-to-end tests against a real listener.
//!
//! The server runs on an ephemeral port with the in-memory store, so these
//! need no external services.
//! Run with: cargo test --test api_flow

use std::net::SocketAddr;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use blackkeyx::api::{create_router, ApiSettings, AppState};
use blackkeyx::services::{ExtractionService, MemoryDocumentStore};
use blackkeyx::store::{InvestorRepository, MemoryStore};

struct TestServer {
    base: String,
    store: Arc<MemoryStore>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(
            store.clone(),
            Arc::new(MemoryDocumentStore::new()),
            ExtractionService::disabled(),
            ApiSettings {
                admin_password: "s3cret".to_string(),
                ..ApiSettings::default()
            },
        );
        state.set_ready(true);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = create_router(state);
        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            store,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn login(&self) -> String {
        let response = self
            .client
            .post(self.url("/api/v1/admin/auth"))
            .json(&json!({ "password": "s3cret" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        cookie.split(';').next().unwrap().to_string()
    }
}

fn lead_body(phone: &str) -> Value {
    json!({
        "phoneNumber": phone,
        "consent": true,
        "timestamp": "2026-03-01T12:00:00Z",
        "name": "Dana Investor",
        "qualification": {
            "investorType": "family_office",
            "capacity": "$250K-$500K",
            "fit": "high_priority",
            "process": "meaningful_first",
            "timing": "actively_deploying",
            "score": 91,
            "bucket": "active_intro"
        }
    })
}

#[tokio::test]
async fn test_health_over_tcp() {
    let server = TestServer::start().await;
    let response = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_lead_intake_records_consent_metadata() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(server.url("/api/v1/submit-lead"))
        .header("User-Agent", "chatbot-widget/2.1")
        .header("X-Forwarded-For", "203.0.113.9, 10.0.0.1")
        .json(&lead_body("+15559876543"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    let lead_id: uuid::Uuid = body["leadId"].as_str().unwrap().parse().unwrap();

    let investor = server.store.get_investor(lead_id).await.unwrap().unwrap();
    assert_eq!(investor.capital_available, Some(375_000));
    assert_eq!(investor.lead_score, 91);
    assert_eq!(investor.name, "Dana Investor");

    let relations = server.store.lead_relations(&[lead_id]).await.unwrap();
    let consents = &relations[&lead_id].consents;
    assert_eq!(consents.len(), 1);
    assert_eq!(consents[0].ip_address.as_deref(), Some("203.0.113.9"));
    assert_eq!(consents[0].user_agent.as_deref(), Some("chatbot-widget/2.1"));
}

#[tokio::test]
async fn test_peer_address_used_without_forwarding_header() {
    let server = TestServer::start().await;

    let body: Value = server
        .client
        .post(server.url("/api/v1/submit-lead"))
        .json(&lead_body("+15550001111"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let lead_id: uuid::Uuid = body["leadId"].as_str().unwrap().parse().unwrap();

    let relations = server.store.lead_relations(&[lead_id]).await.unwrap();
    assert_eq!(
        relations[&lead_id].consents[0].ip_address.as_deref(),
        Some("127.0.0.1")
    );
}

#[tokio::test]
async fn test_admin_session_lifecycle() {
    let server = TestServer::start().await;

    let response = server
        .client
        .get(server.url("/api/v1/admin/stats"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    server
        .client
        .post(server.url("/api/v1/submit-lead"))
        .json(&lead_body("+15552223333"))
        .send()
        .await
        .unwrap();

    let cookie = server.login().await;
    let stats: Value = server
        .client
        .get(server.url("/api/v1/admin/stats"))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["totalLeads"], 1);
    assert_eq!(stats["byStage"]["new_lead"], 1);

    let response = server
        .client
        .delete(server.url("/api/v1/admin/auth"))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .client
        .get(server.url("/api/v1/admin/stats"))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deal_search_by_investment_ceiling() {
    let server = TestServer::start().await;

    for (name, minimum) in [("Small Fund", 25_000), ("Large Fund", 500_000)] {
        let response = server
            .client
            .post(server.url("/api/v1/properties"))
            .json(&json!({ "name": name, "dealType": "fund", "minimumInvestment": minimum }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let listed: Value = server
        .client
        .get(server.url("/api/v1/properties?maxInvestment=100000"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["deals"][0]["name"], "Small Fund");
}
