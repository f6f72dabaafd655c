//! AI-assisted extraction of deal memo fields from uploaded documents.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint using a strict
//! JSON-schema response format. Extraction never fails from the caller's
//! point of view: without credentials, or on any provider error, a
//! placeholder extraction flagged for manual review is returned instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;

use crate::config::Config;
use crate::error::ExtractionError;
use crate::metrics;
use crate::utils::truncate_chars;

/// System prompt sent with every extraction.
pub const EXTRACTION_PROMPT: &str = "You are an expert at extracting structured data from real estate investment memorandums.

Extract the following information from the document:
1. Deal/Property Name
2. Deal Type (multifamily, industrial, office, retail, etc.)
3. Executive Summary
4. Investment Thesis
5. Minimum Investment Amount
6. Target Return (IRR or CoC)
7. Key Risk Factors (list)
8. Ideal Investor Profile
9. Deal Structure (LP/GP, REIT, etc.)
10. Investment Timeline/Hold Period

Be precise and extract actual values from the document. If a field is not found, use reasonable defaults based on the deal type.

Return confidence score (0-1) based on how much information was clearly extractable.";

/// Characters of document text kept in `rawText`.
pub const RAW_TEXT_CHARS: usize = 1000;
/// Characters of document text sent to the provider.
const MAX_PROMPT_CHARS: usize = 100_000;
/// Shortest run of printable bytes kept from a binary document.
const MIN_TEXT_RUN: usize = 4;

/// Structured fields extracted from a deal document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DealMemoExtraction {
    pub name: String,
    #[serde(alias = "deal_type")]
    pub deal_type: String,
    pub summary: String,
    pub thesis: String,
    #[serde(alias = "minimum_investment")]
    pub minimum_investment: i64,
    #[serde(alias = "target_return")]
    pub target_return: String,
    #[serde(alias = "risk_factors")]
    pub risk_factors: Vec<String>,
    #[serde(alias = "ideal_investor_profile")]
    pub ideal_investor_profile: String,
    pub structure: String,
    pub timeline: String,
    /// 0.0 to 1.0.
    pub confidence: f64,
    #[serde(default, alias = "raw_text")]
    pub raw_text: String,
}

impl DealMemoExtraction {
    /// Placeholder returned when extraction is unavailable or fails.
    pub fn fallback(document_text: &str) -> Self {
        Self {
            name: "Untitled Deal".to_string(),
            deal_type: "unknown".to_string(),
            summary: "Extraction failed. Please review manually.".to_string(),
            thesis: String::new(),
            minimum_investment: 100_000,
            target_return: "TBD".to_string(),
            risk_factors: vec!["Extraction error - manual review needed".to_string()],
            ideal_investor_profile: "Accredited investors".to_string(),
            structure: "LP/GP".to_string(),
            timeline: "5-7 years".to_string(),
            confidence: 0.0,
            raw_text: truncate_chars(document_text, RAW_TEXT_CHARS).to_string(),
        }
    }
}

/// Best-effort text of a document.
///
/// UTF-8 content is returned unchanged; otherwise runs of at least four
/// printable ASCII characters are kept, one per line.
pub fn document_text(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }

    let mut runs: Vec<&str> = Vec::new();
    let mut start = None;
    for (idx, byte) in bytes.iter().enumerate() {
        let printable = byte.is_ascii_graphic() || *byte == b' ';
        match (printable, start) {
            (true, None) => start = Some(idx),
            (false, Some(s)) => {
                if idx - s >= MIN_TEXT_RUN {
                    runs.extend(std::str::from_utf8(&bytes[s..idx]).ok());
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        if bytes.len() - s >= MIN_TEXT_RUN {
            runs.extend(std::str::from_utf8(&bytes[s..]).ok());
        }
    }

    runs.iter()
        .map(|run| run.trim())
        .filter(|run| run.len() >= MIN_TEXT_RUN)
        .collect::<Vec<_>>()
        .join("\n")
}

/// JSON schema the provider must answer with.
fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "dealType": { "type": "string" },
            "summary": { "type": "string" },
            "thesis": { "type": "string" },
            "minimumInvestment": { "type": "integer" },
            "targetReturn": { "type": "string" },
            "riskFactors": { "type": "array", "items": { "type": "string" } },
            "idealInvestorProfile": { "type": "string" },
            "structure": { "type": "string" },
            "timeline": { "type": "string" },
            "confidence": { "type": "number" }
        },
        "required": [
            "name", "dealType", "summary", "thesis", "minimumInvestment", "targetReturn",
            "riskFactors", "idealInvestorProfile", "structure", "timeline", "confidence"
        ],
        "additionalProperties": false
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
    refusal: Option<String>,
}

/// Client for the extraction provider.
#[derive(Debug, Clone)]
pub struct ExtractionService {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ExtractionService {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ExtractionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ExtractionError> {
        Self::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone(),
            config.openai_model.clone(),
            Duration::from_secs(config.openai_timeout_secs),
        )
    }

    /// Service that always returns the fallback extraction.
    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: String::new(),
            api_key: None,
            model: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Extract from raw document bytes; returns the extraction and the text it was based on.
    pub async fn extract_document(&self, bytes: &[u8]) -> (DealMemoExtraction, String) {
        let text = document_text(bytes);
        let extraction = self.extract_from_text(&text).await;
        (extraction, text)
    }

    /// Extract from text, falling back to the placeholder on any failure.
    #[instrument(skip_all, fields(chars = document_text.len()))]
    pub async fn extract_from_text(&self, document_text: &str) -> DealMemoExtraction {
        match self.try_extract(document_text).await {
            Ok(extraction) => {
                metrics::inc_extractions("success");
                extraction
            }
            Err(ExtractionError::NotConfigured) => {
                debug!("Extraction provider not configured, using fallback");
                metrics::inc_extractions("disabled");
                DealMemoExtraction::fallback(document_text)
            }
            Err(e) => {
                warn!("Extraction failed, using fallback: {}", e);
                metrics::inc_extractions("fallback");
                DealMemoExtraction::fallback(document_text)
            }
        }
    }

    /// Extract from text, surfacing provider errors.
    pub async fn try_extract(
        &self,
        document_text: &str,
    ) -> Result<DealMemoExtraction, ExtractionError> {
        let api_key = self.api_key.as_deref().ok_or(ExtractionError::NotConfigured)?;
        let _timer = metrics::timer_extraction();

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": EXTRACTION_PROMPT },
                { "role": "user", "content": truncate_chars(document_text, MAX_PROMPT_CHARS) }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "deal_memo_extraction",
                    "strict": true,
                    "schema": response_schema()
                }
            }
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Status {
                status,
                body: truncate_chars(&text, 500).to_string(),
            });
        }

        let completion: ChatCompletion = response.json().await?;
        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(ExtractionError::EmptyResponse)?;

        if let Some(refusal) = message.refusal {
            return Err(ExtractionError::Refused(refusal));
        }
        let content = message.content.ok_or(ExtractionError::EmptyResponse)?;

        let mut extraction: DealMemoExtraction = serde_json::from_str(&content)?;
        extraction.confidence = extraction.confidence.clamp(0.0, 1.0);
        extraction.raw_text = truncate_chars(document_text, RAW_TEXT_CHARS).to_string();
        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;

    async fn mock_provider(status: StatusCode, body: Value) -> String {
        let app = Router::new().route(
            "/chat/completions",
            post(move || {
                let body = body.clone();
                async move { (status, Json(body)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn service(base_url: String) -> ExtractionService {
        ExtractionService::new(
            base_url,
            Some("sk-test".to_string()),
            "gpt-4o",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn fallback_truncates_raw_text() {
        let text = "x".repeat(1500);
        let fallback = DealMemoExtraction::fallback(&text);
        assert_eq!(fallback.name, "Untitled Deal");
        assert_eq!(fallback.minimum_investment, 100_000);
        assert_eq!(fallback.confidence, 0.0);
        assert_eq!(fallback.raw_text.len(), RAW_TEXT_CHARS);
    }

    #[test]
    fn document_text_keeps_printable_runs() {
        assert_eq!(document_text(b"plain memo"), "plain memo");
        let binary = b"\xff\xfe%PDF\x00\x01Harbor View Apartments\x00ab\x00\x9cTarget IRR 15%\xff";
        assert_eq!(
            document_text(binary),
            "%PDF\nHarbor View Apartments\nTarget IRR 15%"
        );
    }

    #[test]
    fn extraction_accepts_snake_case_aliases() {
        let parsed: DealMemoExtraction = serde_json::from_value(json!({
            "name": "Harbor View",
            "deal_type": "multifamily",
            "summary": "s",
            "thesis": "t",
            "minimum_investment": 50000,
            "target_return": "15% IRR",
            "risk_factors": ["rates"],
            "ideal_investor_profile": "HNW",
            "structure": "LP/GP",
            "timeline": "5 years",
            "confidence": 0.9
        }))
        .unwrap();
        assert_eq!(parsed.deal_type, "multifamily");
        assert_eq!(parsed.raw_text, "");
    }

    #[tokio::test]
    async fn disabled_service_returns_fallback() {
        let service = ExtractionService::disabled();
        assert!(!service.is_enabled());
        let extraction = service.extract_from_text("Deal memo text").await;
        assert_eq!(extraction, DealMemoExtraction::fallback("Deal memo text"));
    }

    #[tokio::test]
    async fn parses_structured_completion() {
        let content = json!({
            "name": "Harbor View",
            "dealType": "multifamily",
            "summary": "120-unit value-add",
            "thesis": "Below-market rents",
            "minimumInvestment": 50000,
            "targetReturn": "16% IRR",
            "riskFactors": ["Interest rate risk"],
            "idealInvestorProfile": "Accredited investors",
            "structure": "LP/GP",
            "timeline": "5 years",
            "confidence": 0.92
        })
        .to_string();
        let base_url = mock_provider(
            StatusCode::OK,
            json!({ "choices": [{ "message": { "content": content, "refusal": null } }] }),
        )
        .await;

        let extraction = service(base_url).try_extract("Harbor View memo").await.unwrap();
        assert_eq!(extraction.name, "Harbor View");
        assert_eq!(extraction.minimum_investment, 50_000);
        assert_eq!(extraction.raw_text, "Harbor View memo");
    }

    #[tokio::test]
    async fn provider_error_falls_back() {
        let base_url = mock_provider(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": { "message": "boom" } }),
        )
        .await;
        let service = service(base_url);

        assert!(matches!(
            service.try_extract("memo").await,
            Err(ExtractionError::Status { status: 500, .. })
        ));
        let extraction = service.extract_from_text("memo").await;
        assert_eq!(extraction.deal_type, "unknown");
    }

    #[tokio::test]
    async fn refusal_is_an_error() {
        let base_url = mock_provider(
            StatusCode::OK,
            json!({ "choices": [{ "message": { "content": null, "refusal": "no" } }] }),
        )
        .await;
        assert!(matches!(
            service(base_url).try_extract("memo").await,
            Err(ExtractionError::Refused(_))
        ));
    }
}
