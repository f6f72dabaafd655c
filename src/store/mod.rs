//! Persistence for investors and deal memos.
//!
//! Handlers depend on the [`Store`] trait object; [`PgStore`] backs it with
//! PostgreSQL and [`MemoryStore`] with plain vectors behind a lock. Both
//! honour the same filter, ordering and paging semantics.

pub mod memory;
pub mod postgres;

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{
    CallSession, Consent, DealMatch, DealStatus, InvestorProfile, LeadNote, MatchedDeal,
    NewConsent, NewLead, NewProperty, NewPropertyFeatures, PipelineStage, Property,
    PropertyFeatures, PropertyUpdate, StageChange,
};
use crate::error::StoreError;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Column a lead list is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeadSort {
    #[default]
    CreatedAt,
    LeadScore,
    CapitalAvailable,
}

impl LeadSort {
    /// Lenient parse; anything unrecognised sorts by creation time.
    pub fn parse(value: &str) -> Self {
        match value {
            "lead_score" | "leadScore" => LeadSort::LeadScore,
            "capital_available" | "capitalAvailable" => LeadSort::CapitalAvailable,
            _ => LeadSort::CreatedAt,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            LeadSort::CreatedAt => "created_at",
            LeadSort::LeadScore => "lead_score",
            LeadSort::CapitalAvailable => "capital_available",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// `desc` (any case) is descending; everything else ascending.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Dashboard lead search.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadFilter {
    pub stage: Option<PipelineStage>,
    pub score_min: Option<i32>,
    pub score_max: Option<i32>,
    pub capital_min: Option<i32>,
    pub capital_max: Option<i32>,
    pub created_from: Option<OffsetDateTime>,
    pub created_to: Option<OffsetDateTime>,
    /// Phone number substring.
    pub search: Option<String>,
    pub sort_by: LeadSort,
    pub sort_order: SortOrder,
    pub offset: u64,
    pub limit: u64,
}

impl Default for LeadFilter {
    fn default() -> Self {
        Self {
            stage: None,
            score_min: None,
            score_max: None,
            capital_min: None,
            capital_max: None,
            created_from: None,
            created_to: None,
            search: None,
            sort_by: LeadSort::default(),
            sort_order: SortOrder::default(),
            offset: 0,
            limit: 20,
        }
    }
}

impl LeadFilter {
    /// Whether `lead` passes every filter (paging aside).
    pub fn matches(&self, lead: &InvestorProfile) -> bool {
        fn in_range(value: Option<i32>, min: Option<i32>, max: Option<i32>) -> bool {
            if min.is_none() && max.is_none() {
                return true;
            }
            match value {
                Some(v) => min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m),
                None => false,
            }
        }

        self.stage.map_or(true, |s| lead.stage == s)
            && in_range(Some(lead.lead_score), self.score_min, self.score_max)
            && in_range(lead.capital_available, self.capital_min, self.capital_max)
            && self.created_from.map_or(true, |from| lead.created_at >= from)
            && self.created_to.map_or(true, |to| lead.created_at <= to)
            && self
                .search
                .as_deref()
                .map_or(true, |needle| lead.phone.contains(needle))
    }
}

/// Deal memo search.
#[derive(Debug, Clone, PartialEq)]
pub struct DealFilter {
    pub status: Option<DealStatus>,
    pub deal_type: Option<String>,
    /// Only deals whose minimum investment is at most this amount.
    pub max_investment: Option<i32>,
    /// Case-insensitive substring of name or summary.
    pub search: Option<String>,
    pub offset: u64,
    pub limit: u64,
}

impl Default for DealFilter {
    fn default() -> Self {
        Self {
            status: None,
            deal_type: None,
            max_investment: None,
            search: None,
            offset: 0,
            limit: 100,
        }
    }
}

impl DealFilter {
    pub fn matches(&self, deal: &Property) -> bool {
        let search_ok = match self.search.as_deref() {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                deal.name.to_lowercase().contains(&needle)
                    || deal
                        .summary
                        .as_deref()
                        .is_some_and(|s| s.to_lowercase().contains(&needle))
            }
        };

        search_ok
            && self.status.map_or(true, |s| deal.status == s)
            && self
                .deal_type
                .as_deref()
                .map_or(true, |t| deal.deal_type == t)
            && self.max_investment.map_or(true, |max| {
                deal.minimum_investment.is_some_and(|min| min <= max)
            })
    }
}

/// Records hanging off a lead, as shown on the detail page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadRelations {
    pub calls: Vec<CallSession>,
    pub matches: Vec<MatchedDeal>,
    /// Newest first.
    pub notes: Vec<LeadNote>,
    /// Newest first.
    pub stage_history: Vec<StageChange>,
    pub consents: Vec<Consent>,
}

/// Investor (lead) persistence.
#[async_trait]
pub trait InvestorRepository: Send + Sync {
    async fn get_investor(&self, id: Uuid) -> StoreResult<Option<InvestorProfile>>;

    async fn get_investor_by_phone(&self, phone: &str) -> StoreResult<Option<InvestorProfile>>;

    /// Investors in `stage`, highest lead score first.
    async fn investors_by_stage(&self, stage: PipelineStage) -> StoreResult<Vec<InvestorProfile>>;

    /// Insert the profile, its consent and its initial stage change together.
    async fn create_lead(&self, lead: NewLead) -> StoreResult<InvestorProfile>;

    async fn count_investors(&self) -> StoreResult<u64>;

    /// Number of investors per stage; stages without investors are absent.
    async fn stage_counts(&self) -> StoreResult<BTreeMap<PipelineStage, u64>>;

    /// Mean lead score, `0.0` with no investors.
    async fn average_lead_score(&self) -> StoreResult<f64>;

    /// One page of matching leads plus the unpaged total.
    async fn search_leads(&self, filter: &LeadFilter) -> StoreResult<(Vec<InvestorProfile>, u64)>;

    async fn lead_relations(&self, ids: &[Uuid]) -> StoreResult<HashMap<Uuid, LeadRelations>>;

    /// Move a lead to `stage` and record the change. `None` if unknown.
    async fn update_stage(
        &self,
        id: Uuid,
        stage: PipelineStage,
        changed_by: &str,
        notes: Option<String>,
    ) -> StoreResult<Option<InvestorProfile>>;

    /// `None` if the investor is unknown.
    async fn add_note(
        &self,
        investor_id: Uuid,
        content: &str,
        created_by: &str,
    ) -> StoreResult<Option<LeadNote>>;

    async fn add_consent(&self, investor_id: Uuid, consent: NewConsent) -> StoreResult<Consent>;

    async fn add_call_session(&self, call: CallSession) -> StoreResult<CallSession>;

    async fn add_deal_match(&self, deal_match: DealMatch) -> StoreResult<DealMatch>;
}

/// Deal memo persistence.
#[async_trait]
pub trait PropertyRepository: Send + Sync {
    async fn get_property(&self, id: Uuid) -> StoreResult<Option<Property>>;

    async fn get_property_features(&self, property_id: Uuid)
        -> StoreResult<Option<PropertyFeatures>>;

    /// Deals with `status`, newest first.
    async fn properties_by_status(&self, status: DealStatus) -> StoreResult<Vec<Property>>;

    /// Active deals, newest first, plus the active total.
    async fn active_deals(&self, offset: u64, limit: u64) -> StoreResult<(Vec<Property>, u64)>;

    async fn search_deals(&self, filter: &DealFilter) -> StoreResult<(Vec<Property>, u64)>;

    async fn create_property(
        &self,
        property: NewProperty,
        features: Option<NewPropertyFeatures>,
    ) -> StoreResult<(Property, Option<PropertyFeatures>)>;

    /// Apply `update`. `None` if unknown.
    async fn update_property(
        &self,
        id: Uuid,
        update: &PropertyUpdate,
    ) -> StoreResult<Option<Property>>;

    async fn update_property_status(
        &self,
        id: Uuid,
        status: DealStatus,
    ) -> StoreResult<Option<Property>>;

    async fn count_properties(&self) -> StoreResult<u64>;
}

/// Everything the API needs from persistence.
#[async_trait]
pub trait Store: InvestorRepository + PropertyRepository {
    /// Cheap liveness probe.
    async fn ping(&self) -> StoreResult<()>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Parse a stored enum column, reporting the offending table on failure.
pub(crate) fn parse_column<T: FromStr>(entity: &'static str, value: &str) -> StoreResult<T> {
    value.parse().map_err(|_| StoreError::Corrupt {
        entity,
        reason: format!("unexpected value {value:?}"),
    })
}
