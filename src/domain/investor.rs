//! Investor profiles (leads) and their compliance and pipeline records.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use time::OffsetDateTime;
use uuid::Uuid;

/// Who made a pipeline change when no person was involved.
pub const CHANGED_BY_SYSTEM: &str = "system";
/// Author recorded for dashboard actions.
pub const CHANGED_BY_ADMIN: &str = "admin";

/// Position of a lead in the investor pipeline.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineStage {
    #[default]
    NewLead,
    CallDispatched,
    CallCompleted,
    InsightsExtracted,
    DealsMatched,
    UnderReview,
    Closed,
}

impl PipelineStage {
    /// Database / wire representation.
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Comma separated list of every stage, for error messages.
    pub fn valid_values() -> String {
        Self::iter().map(Self::as_str).collect::<Vec<_>>().join(", ")
    }
}

/// An investor (lead) as stored in `investor_profiles`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestorProfile {
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
    pub investor_type: Option<String>,
    pub capacity: Option<String>,
    pub fit: Option<String>,
    pub process: Option<String>,
    pub timing: Option<String>,
    pub qualification_bucket: Option<String>,
    pub qualification_score: Option<i32>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Chatbot qualification answers attached to a lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qualification {
    pub investor_type: String,
    pub capacity: String,
    pub fit: String,
    pub process: String,
    pub timing: String,
    pub score: i32,
    pub bucket: String,
}

impl InvestorProfile {
    /// Fresh profile with the column defaults applied.
    pub fn new(phone: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            phone: phone.into(),
            timeline: None,
            capital_available: None,
            investment_preferences: Vec::new(),
            investment_thesis: None,
            risk_tolerance: None,
            stage: PipelineStage::NewLead,
            lead_score: 0,
            source: "web".to_string(),
            investor_type: None,
            capacity: None,
            fit: None,
            process: None,
            timing: None,
            qualification_bucket: None,
            qualification_score: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Qualification summary, present only once the chatbot classified the lead.
    pub fn qualification(&self) -> Option<Qualification> {
        let investor_type = self.investor_type.clone().filter(|s| !s.is_empty())?;
        let bucket = self.qualification_bucket.clone().filter(|s| !s.is_empty())?;
        let score = match self.qualification_score {
            Some(score) if score != 0 => score,
            _ => self.lead_score,
        };

        Some(Qualification {
            investor_type,
            capacity: self.capacity.clone().unwrap_or_default(),
            fit: self.fit.clone().unwrap_or_default(),
            process: self.process.clone().unwrap_or_default(),
            timing: self.timing.clone().unwrap_or_default(),
            score,
            bucket,
        })
    }

    /// Phone number shortened for activity feeds, e.g. `+15550***`.
    pub fn masked_phone(&self) -> String {
        let prefix: String = self.phone.chars().take(6).collect();
        format!("{prefix}***")
    }
}

/// TCPA consent captured at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consent {
    pub id: Uuid,
    pub investor_id: Uuid,
    pub consent_text: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Consent to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConsent {
    pub consent_text: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Free-form note left on a lead by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadNote {
    pub id: Uuid,
    pub investor_id: Uuid,
    pub content: String,
    pub created_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One row of `stage_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageChange {
    pub id: Uuid,
    pub investor_id: Uuid,
    pub from_stage: Option<PipelineStage>,
    pub to_stage: PipelineStage,
    pub changed_by: String,
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub changed_at: OffsetDateTime,
}

/// Everything written when a lead is first submitted.
#[derive(Debug, Clone)]
pub struct NewLead {
    pub profile: InvestorProfile,
    pub consent: NewConsent,
    pub initial_stage_notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn stage_round_trips_through_strings() {
        assert_eq!(PipelineStage::UnderReview.as_str(), "under_review");
        assert_eq!(
            PipelineStage::from_str("deals_matched").unwrap(),
            PipelineStage::DealsMatched
        );
        assert!(PipelineStage::from_str("qualified").is_err());
    }

    #[test]
    fn valid_values_lists_every_stage_in_order() {
        assert_eq!(
            PipelineStage::valid_values(),
            "new_lead, call_dispatched, call_completed, insights_extracted, \
             deals_matched, under_review, closed"
        );
    }

    #[test]
    fn qualification_requires_type_and_bucket() {
        let mut profile = InvestorProfile::new("5551234567", OffsetDateTime::UNIX_EPOCH);
        profile.investor_type = Some("hnw".to_string());
        assert!(profile.qualification().is_none());

        profile.qualification_bucket = Some("nurture".to_string());
        profile.lead_score = 42;
        profile.qualification_score = Some(0);
        let q = profile.qualification().unwrap();
        assert_eq!(q.score, 42);
        assert_eq!(q.capacity, "");

        profile.qualification_score = Some(77);
        assert_eq!(profile.qualification().unwrap().score, 77);
    }

    #[test]
    fn blank_type_or_bucket_means_unqualified() {
        let mut profile = InvestorProfile::new("5551234567", OffsetDateTime::UNIX_EPOCH);
        profile.investor_type = Some(String::new());
        profile.qualification_bucket = Some("nurture".to_string());
        assert!(profile.qualification().is_none());

        profile.investor_type = Some("hnw".to_string());
        profile.qualification_bucket = Some(String::new());
        assert!(profile.qualification().is_none());
    }

    #[test]
    fn masked_phone_keeps_six_chars() {
        let profile = InvestorProfile::new("+15551234567", OffsetDateTime::UNIX_EPOCH);
        assert_eq!(profile.masked_phone(), "+15551***");
    }
}
