//! Outreach records: voice call sessions and deal matches.
//!
//! Nothing in the backend computes these; they are stored and reported.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use time::OffsetDateTime;
use uuid::Uuid;

/// Voice call lifecycle.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
    utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CallStatus {
    #[default]
    Initiated,
    Ringing,
    Answered,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Investor response to a matched deal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
    utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MatchStatus {
    #[default]
    Pending,
    Presented,
    Accepted,
    Rejected,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// A voice call placed to an investor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    pub id: Uuid,
    pub investor_id: Uuid,
    pub status: CallStatus,
    pub duration: Option<i32>,
    pub transcript: Option<String>,
    pub recording_url: Option<String>,
    pub room_name: Option<String>,
    pub livekit_participant_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub initiated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

/// A deal proposed to an investor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealMatch {
    pub id: Uuid,
    pub investor_id: Uuid,
    pub property_id: Uuid,
    pub similarity_score: Decimal,
    pub match_reasons: Vec<String>,
    pub status: MatchStatus,
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl DealMatch {
    /// Fresh pending match.
    pub fn pending(
        investor_id: Uuid,
        property_id: Uuid,
        similarity_score: Decimal,
        match_reasons: Vec<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            investor_id,
            property_id,
            similarity_score,
            match_reasons,
            status: MatchStatus::Pending,
            notes: None,
            created_at: now,
        }
    }
}

/// A deal match joined with the matched deal's name.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedDeal {
    pub deal_match: DealMatch,
    pub deal_name: String,
}
