//! Lead intake: turns a chatbot submission into an investor record.

use tracing::{info, instrument};

use crate::domain::{InvestorProfile, NewConsent, NewLead, Qualification};
use crate::metrics;
use crate::store::{InvestorRepository, StoreResult};
use crate::utils::now_utc;

/// Consent wording stored with every web submission.
pub const WEB_CONSENT_TEXT: &str = "TCPA consent granted via web chatbot";
/// Note attached to the initial `new_lead` stage change.
pub const INITIAL_STAGE_NOTE: &str = "Lead submitted via chatbot";

/// Map a capacity option to the midpoint of its range.
///
/// Free-text answers (`other:...`) and unknown options have no amount.
pub fn parse_capital(capacity: Option<&str>) -> Option<i32> {
    match capacity? {
        c if c.starts_with("other:") => None,
        "$100K-$250K" => Some(175_000),
        "$250K-$500K" => Some(375_000),
        "$500K-$1M" => Some(750_000),
        "$1M+" => Some(1_500_000),
        _ => None,
    }
}

/// Validated chatbot submission.
#[derive(Debug, Clone, Default)]
pub struct LeadSubmission {
    pub phone: String,
    pub name: Option<String>,
    pub qualification: Option<Qualification>,
    pub investment_timeline: Option<String>,
    pub capital_available: Option<String>,
    pub investment_preferences: Vec<String>,
}

/// Request metadata recorded with the consent.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// What happened to a submission.
#[derive(Debug, Clone)]
pub enum LeadOutcome {
    /// The phone number was already known; nothing was written.
    Existing(InvestorProfile),
    /// A new investor was created.
    Created(InvestorProfile),
}

impl LeadOutcome {
    pub fn investor(&self) -> &InvestorProfile {
        match self {
            LeadOutcome::Existing(investor) | LeadOutcome::Created(investor) => investor,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, LeadOutcome::Created(_))
    }
}

/// Processes submissions against any investor repository.
pub struct LeadProcessor<'a, R: ?Sized> {
    repo: &'a R,
}

impl<'a, R: InvestorRepository + ?Sized> LeadProcessor<'a, R> {
    pub fn new(repo: &'a R) -> Self {
        Self { repo }
    }

    /// Create the investor, its consent and its first stage change, unless
    /// the phone number already belongs to an investor.
    #[instrument(skip_all)]
    pub async fn process_lead(
        &self,
        submission: LeadSubmission,
        client: ClientInfo,
    ) -> StoreResult<LeadOutcome> {
        if let Some(existing) = self.repo.get_investor_by_phone(&submission.phone).await? {
            info!("Duplicate submission for lead {}", existing.id);
            metrics::inc_leads_duplicate();
            return Ok(LeadOutcome::Existing(existing));
        }

        let capital_available = match &submission.qualification {
            Some(q) => parse_capital(Some(&q.capacity)),
            None => parse_capital(submission.capital_available.as_deref()),
        };

        let mut profile = InvestorProfile::new(submission.phone, now_utc());
        profile.name = submission.name.unwrap_or_default();
        profile.timeline = submission.investment_timeline;
        profile.capital_available = capital_available;
        profile.investment_preferences = submission.investment_preferences;

        if let Some(q) = submission.qualification {
            profile.investor_type = Some(q.investor_type);
            profile.capacity = Some(q.capacity);
            profile.fit = Some(q.fit);
            profile.process = Some(q.process);
            profile.timing = Some(q.timing);
            profile.qualification_bucket = Some(q.bucket);
            profile.qualification_score = Some(q.score);
            profile.lead_score = q.score;
        }

        let created = self
            .repo
            .create_lead(NewLead {
                profile,
                consent: NewConsent {
                    consent_text: WEB_CONSENT_TEXT.to_string(),
                    ip_address: client.ip_address,
                    user_agent: client.user_agent,
                },
                initial_stage_notes: Some(INITIAL_STAGE_NOTE.to_string()),
            })
            .await?;

        info!("Created lead {} (score {})", created.id, created.lead_score);
        metrics::inc_leads_submitted();
        Ok(LeadOutcome::Created(created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PipelineStage;
    use crate::store::MemoryStore;

    fn qualification(capacity: &str, score: i32) -> Qualification {
        Qualification {
            investor_type: "hnw".to_string(),
            capacity: capacity.to_string(),
            fit: "high_priority".to_string(),
            process: "meaningful_first".to_string(),
            timing: "actively_deploying".to_string(),
            score,
            bucket: "active_intro".to_string(),
        }
    }

    #[test]
    fn capital_maps_to_range_midpoints() {
        assert_eq!(parse_capital(Some("$100K-$250K")), Some(175_000));
        assert_eq!(parse_capital(Some("$250K-$500K")), Some(375_000));
        assert_eq!(parse_capital(Some("$500K-$1M")), Some(750_000));
        assert_eq!(parse_capital(Some("$1M+")), Some(1_500_000));
        assert_eq!(parse_capital(Some("other:$2M in a 1031")), None);
        assert_eq!(parse_capital(Some("lots")), None);
        assert_eq!(parse_capital(None), None);
    }

    #[tokio::test]
    async fn creates_qualified_lead() {
        let store = MemoryStore::new();
        let processor = LeadProcessor::new(&store);

        let outcome = processor
            .process_lead(
                LeadSubmission {
                    phone: "5551234567".to_string(),
                    qualification: Some(qualification("$250K-$500K", 82)),
                    capital_available: Some("$1M+".to_string()),
                    ..Default::default()
                },
                ClientInfo {
                    ip_address: Some("198.51.100.4".to_string()),
                    user_agent: Some("test-agent".to_string()),
                },
            )
            .await
            .unwrap();

        assert!(outcome.is_new());
        let lead = outcome.investor();
        assert_eq!(lead.capital_available, Some(375_000));
        assert_eq!(lead.lead_score, 82);
        assert_eq!(lead.qualification_score, Some(82));
        assert_eq!(lead.stage, PipelineStage::NewLead);
        assert_eq!(lead.source, "web");

        let relations = store.lead_relations(&[lead.id]).await.unwrap();
        let consent = &relations[&lead.id].consents[0];
        assert_eq!(consent.consent_text, WEB_CONSENT_TEXT);
        assert_eq!(consent.ip_address.as_deref(), Some("198.51.100.4"));
        assert_eq!(
            relations[&lead.id].stage_history[0].notes.as_deref(),
            Some(INITIAL_STAGE_NOTE)
        );
    }

    #[tokio::test]
    async fn capital_falls_back_to_free_field_without_qualification() {
        let store = MemoryStore::new();
        let outcome = LeadProcessor::new(&store)
            .process_lead(
                LeadSubmission {
                    phone: "5550001111".to_string(),
                    capital_available: Some("$500K-$1M".to_string()),
                    ..Default::default()
                },
                ClientInfo::default(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.investor().capital_available, Some(750_000));
        assert_eq!(outcome.investor().lead_score, 0);
    }

    #[tokio::test]
    async fn duplicate_phone_returns_existing_lead() {
        let store = MemoryStore::new();
        let processor = LeadProcessor::new(&store);
        let submission = LeadSubmission {
            phone: "5559876543".to_string(),
            ..Default::default()
        };

        let first = processor
            .process_lead(submission.clone(), ClientInfo::default())
            .await
            .unwrap();
        let second = processor
            .process_lead(submission, ClientInfo::default())
            .await
            .unwrap();

        assert!(!second.is_new());
        assert_eq!(first.investor().id, second.investor().id);
        assert_eq!(store.count_investors().await.unwrap(), 1);
    }
}
