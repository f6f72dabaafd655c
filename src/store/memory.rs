//! In-memory store for tests and `DATABASE_URL=memory://`.
//!
//! Mirrors the PostgreSQL semantics closely enough that the API tests can
//! run against it: the same filters, NULL ordering and paging.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    DealFilter, InvestorRepository, LeadFilter, LeadRelations, LeadSort, PropertyRepository,
    SortOrder, Store, StoreResult,
};
use crate::domain::{
    CallSession, Consent, DealMatch, DealStatus, InvestorProfile, LeadNote, MatchedDeal,
    NewConsent, NewLead, NewProperty, NewPropertyFeatures, PipelineStage, Property,
    PropertyFeatures, PropertyUpdate, StageChange, CHANGED_BY_SYSTEM,
};
use crate::error::StoreError;
use crate::utils::now_utc;

#[derive(Debug, Default)]
struct MemoryState {
    investors: Vec<InvestorProfile>,
    consents: Vec<Consent>,
    notes: Vec<LeadNote>,
    stage_history: Vec<StageChange>,
    calls: Vec<CallSession>,
    matches: Vec<DealMatch>,
    properties: Vec<Property>,
    features: Vec<PropertyFeatures>,
}

impl MemoryState {
    fn investor_exists(&self, id: Uuid) -> bool {
        self.investors.iter().any(|i| i.id == id)
    }

    fn property_exists(&self, id: Uuid) -> bool {
        self.properties.iter().any(|p| p.id == id)
    }
}

/// Store kept entirely in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

/// Ascending comparison with NULLs last; `Desc` reverses it (NULLs first).
fn compare_leads(a: &InvestorProfile, b: &InvestorProfile, sort: LeadSort) -> Ordering {
    match sort {
        LeadSort::CreatedAt => a.created_at.cmp(&b.created_at),
        LeadSort::LeadScore => a.lead_score.cmp(&b.lead_score),
        LeadSort::CapitalAvailable => match (a.capital_available, b.capital_available) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    }
}

fn page<T>(items: Vec<T>, offset: u64, limit: u64) -> Vec<T> {
    items
        .into_iter()
        .skip(usize::try_from(offset).unwrap_or(usize::MAX))
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .collect()
}

/// Newest first; among equal timestamps the later insert wins.
fn newest_first<T, K: Ord>(
    items: impl DoubleEndedIterator<Item = T>,
    key: impl Fn(&T) -> K,
) -> Vec<T> {
    let mut out: Vec<T> = items.rev().collect();
    out.sort_by(|a, b| key(b).cmp(&key(a)));
    out
}

#[async_trait]
impl InvestorRepository for MemoryStore {
    async fn get_investor(&self, id: Uuid) -> StoreResult<Option<InvestorProfile>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.investors.iter().find(|i| i.id == id).cloned())
    }

    async fn get_investor_by_phone(&self, phone: &str) -> StoreResult<Option<InvestorProfile>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.investors.iter().find(|i| i.phone == phone).cloned())
    }

    async fn investors_by_stage(&self, stage: PipelineStage) -> StoreResult<Vec<InvestorProfile>> {
        self.check()?;
        let state = self.state.read().await;
        let mut found: Vec<_> = state
            .investors
            .iter()
            .filter(|i| i.stage == stage)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.lead_score.cmp(&a.lead_score));
        Ok(found)
    }

    async fn create_lead(&self, lead: NewLead) -> StoreResult<InvestorProfile> {
        self.check()?;
        let mut state = self.state.write().await;
        let profile = lead.profile;
        let now = profile.created_at;

        state.consents.push(Consent {
            id: Uuid::new_v4(),
            investor_id: profile.id,
            consent_text: lead.consent.consent_text,
            ip_address: lead.consent.ip_address,
            user_agent: lead.consent.user_agent,
            created_at: now,
        });
        state.stage_history.push(StageChange {
            id: Uuid::new_v4(),
            investor_id: profile.id,
            from_stage: None,
            to_stage: profile.stage,
            changed_by: CHANGED_BY_SYSTEM.to_string(),
            notes: lead.initial_stage_notes,
            changed_at: now,
        });
        state.investors.push(profile.clone());

        Ok(profile)
    }

    async fn count_investors(&self) -> StoreResult<u64> {
        self.check()?;
        Ok(self.state.read().await.investors.len() as u64)
    }

    async fn stage_counts(&self) -> StoreResult<BTreeMap<PipelineStage, u64>> {
        self.check()?;
        let state = self.state.read().await;
        let mut counts = BTreeMap::new();
        for investor in &state.investors {
            *counts.entry(investor.stage).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn average_lead_score(&self) -> StoreResult<f64> {
        self.check()?;
        let state = self.state.read().await;
        if state.investors.is_empty() {
            return Ok(0.0);
        }
        let total: i64 = state.investors.iter().map(|i| i64::from(i.lead_score)).sum();
        Ok(total as f64 / state.investors.len() as f64)
    }

    async fn search_leads(&self, filter: &LeadFilter) -> StoreResult<(Vec<InvestorProfile>, u64)> {
        self.check()?;
        let state = self.state.read().await;
        let mut matched: Vec<_> = state
            .investors
            .iter()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        let total = matched.len() as u64;

        matched.sort_by(|a, b| {
            let ordering = compare_leads(a, b, filter.sort_by);
            match filter.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        Ok((page(matched, filter.offset, filter.limit), total))
    }

    async fn lead_relations(&self, ids: &[Uuid]) -> StoreResult<HashMap<Uuid, LeadRelations>> {
        self.check()?;
        let state = self.state.read().await;
        let mut out = HashMap::with_capacity(ids.len());

        for &id in ids {
            let calls = state
                .calls
                .iter()
                .filter(|c| c.investor_id == id)
                .cloned()
                .collect();
            let matches = state
                .matches
                .iter()
                .filter(|m| m.investor_id == id)
                .map(|m| MatchedDeal {
                    deal_match: m.clone(),
                    deal_name: state
                        .properties
                        .iter()
                        .find(|p| p.id == m.property_id)
                        .map(|p| p.name.clone())
                        .unwrap_or_default(),
                })
                .collect();
            let notes = newest_first(
                state.notes.iter().filter(|n| n.investor_id == id).cloned(),
                |n: &LeadNote| n.created_at,
            );
            let stage_history = newest_first(
                state
                    .stage_history
                    .iter()
                    .filter(|h| h.investor_id == id)
                    .cloned(),
                |h: &StageChange| h.changed_at,
            );
            let consents = state
                .consents
                .iter()
                .filter(|c| c.investor_id == id)
                .cloned()
                .collect();

            out.insert(
                id,
                LeadRelations {
                    calls,
                    matches,
                    notes,
                    stage_history,
                    consents,
                },
            );
        }

        Ok(out)
    }

    async fn update_stage(
        &self,
        id: Uuid,
        stage: PipelineStage,
        changed_by: &str,
        notes: Option<String>,
    ) -> StoreResult<Option<InvestorProfile>> {
        self.check()?;
        let mut state = self.state.write().await;
        let now = now_utc();

        let Some(investor) = state.investors.iter_mut().find(|i| i.id == id) else {
            return Ok(None);
        };
        let from_stage = investor.stage;
        investor.stage = stage;
        investor.updated_at = now;
        let updated = investor.clone();

        state.stage_history.push(StageChange {
            id: Uuid::new_v4(),
            investor_id: id,
            from_stage: Some(from_stage),
            to_stage: stage,
            changed_by: changed_by.to_string(),
            notes,
            changed_at: now,
        });

        Ok(Some(updated))
    }

    async fn add_note(
        &self,
        investor_id: Uuid,
        content: &str,
        created_by: &str,
    ) -> StoreResult<Option<LeadNote>> {
        self.check()?;
        let mut state = self.state.write().await;
        if !state.investor_exists(investor_id) {
            return Ok(None);
        }
        let note = LeadNote {
            id: Uuid::new_v4(),
            investor_id,
            content: content.to_string(),
            created_by: created_by.to_string(),
            created_at: now_utc(),
        };
        state.notes.push(note.clone());
        Ok(Some(note))
    }

    async fn add_consent(&self, investor_id: Uuid, consent: NewConsent) -> StoreResult<Consent> {
        self.check()?;
        let mut state = self.state.write().await;
        if !state.investor_exists(investor_id) {
            return Err(StoreError::Corrupt {
                entity: "consents",
                reason: format!("investor {investor_id} does not exist"),
            });
        }
        let consent = Consent {
            id: Uuid::new_v4(),
            investor_id,
            consent_text: consent.consent_text,
            ip_address: consent.ip_address,
            user_agent: consent.user_agent,
            created_at: now_utc(),
        };
        state.consents.push(consent.clone());
        Ok(consent)
    }

    async fn add_call_session(&self, call: CallSession) -> StoreResult<CallSession> {
        self.check()?;
        let mut state = self.state.write().await;
        if !state.investor_exists(call.investor_id) {
            return Err(StoreError::Corrupt {
                entity: "call_sessions",
                reason: format!("investor {} does not exist", call.investor_id),
            });
        }
        state.calls.push(call.clone());
        Ok(call)
    }

    async fn add_deal_match(&self, deal_match: DealMatch) -> StoreResult<DealMatch> {
        self.check()?;
        let mut state = self.state.write().await;
        if !state.investor_exists(deal_match.investor_id)
            || !state.property_exists(deal_match.property_id)
        {
            return Err(StoreError::Corrupt {
                entity: "deal_matches",
                reason: "investor or property does not exist".to_string(),
            });
        }
        state.matches.push(deal_match.clone());
        Ok(deal_match)
    }
}

#[async_trait]
impl PropertyRepository for MemoryStore {
    async fn get_property(&self, id: Uuid) -> StoreResult<Option<Property>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state.properties.iter().find(|p| p.id == id).cloned())
    }

    async fn get_property_features(
        &self,
        property_id: Uuid,
    ) -> StoreResult<Option<PropertyFeatures>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(state
            .features
            .iter()
            .find(|f| f.property_id == property_id)
            .cloned())
    }

    async fn properties_by_status(&self, status: DealStatus) -> StoreResult<Vec<Property>> {
        self.check()?;
        let state = self.state.read().await;
        Ok(newest_first(
            state.properties.iter().filter(|p| p.status == status).cloned(),
            |p: &Property| p.created_at,
        ))
    }

    async fn active_deals(&self, offset: u64, limit: u64) -> StoreResult<(Vec<Property>, u64)> {
        self.search_deals(&DealFilter {
            status: Some(DealStatus::Active),
            offset,
            limit,
            ..DealFilter::default()
        })
        .await
    }

    async fn search_deals(&self, filter: &DealFilter) -> StoreResult<(Vec<Property>, u64)> {
        self.check()?;
        let state = self.state.read().await;
        let matched = newest_first(
            state.properties.iter().filter(|p| filter.matches(p)).cloned(),
            |p: &Property| p.created_at,
        );
        let total = matched.len() as u64;
        Ok((page(matched, filter.offset, filter.limit), total))
    }

    async fn create_property(
        &self,
        property: NewProperty,
        features: Option<NewPropertyFeatures>,
    ) -> StoreResult<(Property, Option<PropertyFeatures>)> {
        self.check()?;
        let mut state = self.state.write().await;
        let now = now_utc();

        let property = property.into_property(now);
        let features = features.map(|f| f.into_features(property.id, now));

        state.properties.push(property.clone());
        if let Some(f) = &features {
            state.features.push(f.clone());
        }
        Ok((property, features))
    }

    async fn update_property(
        &self,
        id: Uuid,
        update: &PropertyUpdate,
    ) -> StoreResult<Option<Property>> {
        self.check()?;
        let mut state = self.state.write().await;
        let Some(property) = state.properties.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        update.apply(property);
        property.updated_at = now_utc();
        Ok(Some(property.clone()))
    }

    async fn update_property_status(
        &self,
        id: Uuid,
        status: DealStatus,
    ) -> StoreResult<Option<Property>> {
        self.update_property(
            id,
            &PropertyUpdate {
                status: Some(status),
                ..PropertyUpdate::default()
            },
        )
        .await
    }

    async fn count_properties(&self) -> StoreResult<u64> {
        self.check()?;
        Ok(self.state.read().await.properties.len() as u64)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewConsent, CHANGED_BY_ADMIN};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use time::Duration;

    fn new_lead(phone: &str, score: i32, capital: Option<i32>, minutes: i64) -> NewLead {
        let mut profile = InvestorProfile::new(
            phone,
            time::macros::datetime!(2026-03-01 12:00 UTC) + Duration::minutes(minutes),
        );
        profile.lead_score = score;
        profile.capital_available = capital;
        NewLead {
            profile,
            consent: NewConsent {
                consent_text: "TCPA consent granted via web chatbot".to_string(),
                ip_address: Some("203.0.113.9".to_string()),
                user_agent: None,
            },
            initial_stage_notes: Some("Lead submitted via chatbot".to_string()),
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_lead(new_lead("5550000001", 90, Some(175_000), 0)).await.unwrap();
        store.create_lead(new_lead("5550000002", 40, None, 1)).await.unwrap();
        store.create_lead(new_lead("5550000003", 70, Some(1_500_000), 2)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn create_lead_records_consent_and_initial_stage() {
        let store = MemoryStore::new();
        let lead = store.create_lead(new_lead("5551112222", 10, None, 0)).await.unwrap();

        let relations = store.lead_relations(&[lead.id]).await.unwrap();
        let relations = &relations[&lead.id];
        assert_eq!(relations.consents.len(), 1);
        assert_eq!(relations.stage_history.len(), 1);
        assert_eq!(relations.stage_history[0].from_stage, None);
        assert_eq!(relations.stage_history[0].to_stage, PipelineStage::NewLead);
        assert_eq!(relations.stage_history[0].changed_by, "system");
    }

    #[tokio::test]
    async fn capital_sort_puts_nulls_last_ascending_and_first_descending() {
        let store = seeded().await;

        let asc = LeadFilter {
            sort_by: LeadSort::CapitalAvailable,
            sort_order: SortOrder::Asc,
            ..LeadFilter::default()
        };
        let (leads, total) = store.search_leads(&asc).await.unwrap();
        assert_eq!(total, 3);
        let phones: Vec<_> = leads.iter().map(|l| l.phone.as_str()).collect();
        assert_eq!(phones, vec!["5550000001", "5550000003", "5550000002"]);

        let desc = LeadFilter {
            sort_order: SortOrder::Desc,
            ..asc
        };
        let (leads, _) = store.search_leads(&desc).await.unwrap();
        let phones: Vec<_> = leads.iter().map(|l| l.phone.as_str()).collect();
        assert_eq!(phones, vec!["5550000002", "5550000003", "5550000001"]);
    }

    #[tokio::test]
    async fn paging_reports_unpaged_total() {
        let store = seeded().await;
        let filter = LeadFilter {
            offset: 2,
            limit: 2,
            ..LeadFilter::default()
        };
        let (leads, total) = store.search_leads(&filter).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(leads.len(), 1);
        // Default order is newest first.
        assert_eq!(leads[0].phone, "5550000001");
    }

    #[tokio::test]
    async fn stats_cover_stages_and_scores() {
        let store = seeded().await;
        assert_eq!(store.count_investors().await.unwrap(), 3);
        assert_eq!(
            store.stage_counts().await.unwrap().get(&PipelineStage::NewLead),
            Some(&3)
        );
        let avg = store.average_lead_score().await.unwrap();
        assert!((avg - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(MemoryStore::new().average_lead_score().await.unwrap(), 0.0);

        let by_stage = store.investors_by_stage(PipelineStage::NewLead).await.unwrap();
        let scores: Vec<_> = by_stage.iter().map(|l| l.lead_score).collect();
        assert_eq!(scores, vec![90, 70, 40]);
    }

    #[tokio::test]
    async fn update_stage_appends_history_newest_first() {
        let store = seeded().await;
        let lead = store.get_investor_by_phone("5550000002").await.unwrap().unwrap();

        let updated = store
            .update_stage(
                lead.id,
                PipelineStage::UnderReview,
                CHANGED_BY_ADMIN,
                Some("Strong fit".to_string()),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.stage, PipelineStage::UnderReview);
        assert!(updated.updated_at >= lead.updated_at);

        let relations = store.lead_relations(&[lead.id]).await.unwrap();
        let history = &relations[&lead.id].stage_history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from_stage, Some(PipelineStage::NewLead));
        assert_eq!(history[0].to_stage, PipelineStage::UnderReview);

        assert!(store
            .update_stage(Uuid::new_v4(), PipelineStage::Closed, CHANGED_BY_ADMIN, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn notes_require_existing_investor() {
        let store = seeded().await;
        assert!(store
            .add_note(Uuid::new_v4(), "hello", CHANGED_BY_ADMIN)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn matches_carry_deal_name() {
        let store = seeded().await;
        let lead = store.get_investor_by_phone("5550000001").await.unwrap().unwrap();
        let (deal, _) = store
            .create_property(
                NewProperty {
                    name: "Cedar Flats".to_string(),
                    deal_type: "multifamily".to_string(),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        store
            .add_deal_match(DealMatch::pending(
                lead.id,
                deal.id,
                dec!(0.8125),
                vec!["capacity".to_string()],
                now_utc(),
            ))
            .await
            .unwrap();

        let relations = store.lead_relations(&[lead.id]).await.unwrap();
        assert_eq!(relations[&lead.id].matches[0].deal_name, "Cedar Flats");
    }

    #[tokio::test]
    async fn deals_list_newest_first_and_filter_by_status() {
        let store = MemoryStore::new();
        for name in ["One", "Two", "Three"] {
            store
                .create_property(
                    NewProperty {
                        name: name.to_string(),
                        deal_type: "retail".to_string(),
                        ..Default::default()
                    },
                    None,
                )
                .await
                .unwrap();
        }
        let (deals, total) = store.active_deals(0, 100).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(deals[0].name, "Three");

        store
            .update_property_status(deals[0].id, DealStatus::Closed)
            .await
            .unwrap();
        assert_eq!(store.properties_by_status(DealStatus::Closed).await.unwrap().len(), 1);
        assert_eq!(store.active_deals(0, 100).await.unwrap().1, 2);
        assert_eq!(store.count_properties().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn unavailable_store_fails_ping() {
        let store = MemoryStore::new();
        assert!(store.ping().await.is_ok());
        store.set_unavailable(true);
        assert!(store.ping().await.unwrap_err().is_unavailable());
    }
}
