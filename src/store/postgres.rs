//! PostgreSQL store built on a sqlx connection pool.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{ConnectOptions, FromRow, Postgres, QueryBuilder};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{
    parse_column, DealFilter, InvestorRepository, LeadFilter, LeadRelations, PropertyRepository,
    Store, StoreResult,
};
use crate::config::Config;
use crate::domain::{
    CallSession, Consent, DealMatch, DealStatus, InvestorProfile, LeadNote, MatchedDeal,
    NewConsent, NewLead, NewProperty, NewPropertyFeatures, PipelineStage, Property,
    PropertyFeatures, PropertyUpdate, StageChange, CHANGED_BY_SYSTEM,
};
use crate::utils::now_utc;

const INVESTOR_COLUMNS: &str = "id, name, phone, timeline, capital_available, \
     investment_preferences, investment_thesis, risk_tolerance, stage, lead_score, source, \
     investor_type, capacity, fit, process, timing, qualification_bucket, qualification_score, \
     created_at, updated_at";

const PROPERTY_COLUMNS: &str = "id, name, deal_type, summary, thesis, minimum_investment, \
     target_return, risk_factors, ideal_investor_profile, structure, timeline, status, address, \
     city, state, zip_code, purchase_price, square_feet, total_equity_required, document_s3_key, \
     document_filename, created_at, updated_at";

const FEATURE_COLUMNS: &str = "id, property_id, asset_type, features, year_built, \
     year_renovated, parking_spaces, created_at, updated_at";

#[derive(Debug, FromRow)]
struct InvestorRow {
    id: Uuid,
    name: String,
    phone: String,
    timeline: Option<String>,
    capital_available: Option<i32>,
    investment_preferences: Vec<String>,
    investment_thesis: Option<String>,
    risk_tolerance: Option<String>,
    stage: String,
    lead_score: i32,
    source: String,
    investor_type: Option<String>,
    capacity: Option<String>,
    fit: Option<String>,
    process: Option<String>,
    timing: Option<String>,
    qualification_bucket: Option<String>,
    qualification_score: Option<i32>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<InvestorRow> for InvestorProfile {
    type Error = crate::error::StoreError;

    fn try_from(row: InvestorRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            phone: row.phone,
            timeline: row.timeline,
            capital_available: row.capital_available,
            investment_preferences: row.investment_preferences,
            investment_thesis: row.investment_thesis,
            risk_tolerance: row.risk_tolerance,
            stage: parse_column("investor_profiles", &row.stage)?,
            lead_score: row.lead_score,
            source: row.source,
            investor_type: row.investor_type,
            capacity: row.capacity,
            fit: row.fit,
            process: row.process,
            timing: row.timing,
            qualification_bucket: row.qualification_bucket,
            qualification_score: row.qualification_score,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConsentRow {
    id: Uuid,
    investor_id: Uuid,
    consent_text: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: OffsetDateTime,
}

impl From<ConsentRow> for Consent {
    fn from(row: ConsentRow) -> Self {
        Self {
            id: row.id,
            investor_id: row.investor_id,
            consent_text: row.consent_text,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct NoteRow {
    id: Uuid,
    investor_id: Uuid,
    content: String,
    created_by: String,
    created_at: OffsetDateTime,
}

impl From<NoteRow> for LeadNote {
    fn from(row: NoteRow) -> Self {
        Self {
            id: row.id,
            investor_id: row.investor_id,
            content: row.content,
            created_by: row.created_by,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct StageChangeRow {
    id: Uuid,
    investor_id: Uuid,
    from_stage: Option<String>,
    to_stage: String,
    changed_by: String,
    notes: Option<String>,
    changed_at: OffsetDateTime,
}

impl TryFrom<StageChangeRow> for StageChange {
    type Error = crate::error::StoreError;

    fn try_from(row: StageChangeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            investor_id: row.investor_id,
            from_stage: row
                .from_stage
                .as_deref()
                .map(|s| parse_column("stage_history", s))
                .transpose()?,
            to_stage: parse_column("stage_history", &row.to_stage)?,
            changed_by: row.changed_by,
            notes: row.notes,
            changed_at: row.changed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CallRow {
    id: Uuid,
    investor_id: Uuid,
    status: String,
    duration: Option<i32>,
    transcript: Option<String>,
    recording_url: Option<String>,
    room_name: Option<String>,
    livekit_participant_id: Option<String>,
    initiated_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
}

impl TryFrom<CallRow> for CallSession {
    type Error = crate::error::StoreError;

    fn try_from(row: CallRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            investor_id: row.investor_id,
            status: parse_column("call_sessions", &row.status)?,
            duration: row.duration,
            transcript: row.transcript,
            recording_url: row.recording_url,
            room_name: row.room_name,
            livekit_participant_id: row.livekit_participant_id,
            initiated_at: row.initiated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MatchRow {
    id: Uuid,
    investor_id: Uuid,
    property_id: Uuid,
    similarity_score: Decimal,
    match_reasons: Vec<String>,
    status: String,
    notes: Option<String>,
    created_at: OffsetDateTime,
    deal_name: String,
}

impl TryFrom<MatchRow> for MatchedDeal {
    type Error = crate::error::StoreError;

    fn try_from(row: MatchRow) -> Result<Self, Self::Error> {
        Ok(Self {
            deal_match: DealMatch {
                id: row.id,
                investor_id: row.investor_id,
                property_id: row.property_id,
                similarity_score: row.similarity_score,
                match_reasons: row.match_reasons,
                status: parse_column("deal_matches", &row.status)?,
                notes: row.notes,
                created_at: row.created_at,
            },
            deal_name: row.deal_name,
        })
    }
}

#[derive(Debug, FromRow)]
struct PropertyRow {
    id: Uuid,
    name: String,
    deal_type: String,
    summary: Option<String>,
    thesis: Option<String>,
    minimum_investment: Option<i32>,
    target_return: Option<String>,
    risk_factors: Vec<String>,
    ideal_investor_profile: Option<String>,
    structure: Option<String>,
    timeline: Option<String>,
    status: String,
    address: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip_code: Option<String>,
    purchase_price: Option<i32>,
    square_feet: Option<i32>,
    total_equity_required: Option<i32>,
    document_s3_key: Option<String>,
    document_filename: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<PropertyRow> for Property {
    type Error = crate::error::StoreError;

    fn try_from(row: PropertyRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            deal_type: row.deal_type,
            summary: row.summary,
            thesis: row.thesis,
            minimum_investment: row.minimum_investment,
            target_return: row.target_return,
            risk_factors: row.risk_factors,
            ideal_investor_profile: row.ideal_investor_profile,
            structure: row.structure,
            timeline: row.timeline,
            status: parse_column("properties", &row.status)?,
            address: row.address,
            city: row.city,
            state: row.state,
            zip_code: row.zip_code,
            purchase_price: row.purchase_price,
            square_feet: row.square_feet,
            total_equity_required: row.total_equity_required,
            document_s3_key: row.document_s3_key,
            document_filename: row.document_filename,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct FeaturesRow {
    id: Uuid,
    property_id: Uuid,
    asset_type: String,
    features: serde_json::Value,
    year_built: Option<i32>,
    year_renovated: Option<i32>,
    parking_spaces: Option<i32>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<FeaturesRow> for PropertyFeatures {
    fn from(row: FeaturesRow) -> Self {
        Self {
            id: row.id,
            property_id: row.property_id,
            asset_type: row.asset_type,
            features: row.features,
            year_built: row.year_built,
            year_renovated: row.year_renovated,
            parking_spaces: row.parking_spaces,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn collect<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = crate::error::StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Escape `%`, `_` and `\` for use inside a LIKE pattern.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn push_lead_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &LeadFilter) {
    if let Some(stage) = filter.stage {
        qb.push(" AND stage = ").push_bind(stage.as_str());
    }
    if let Some(min) = filter.score_min {
        qb.push(" AND lead_score >= ").push_bind(min);
    }
    if let Some(max) = filter.score_max {
        qb.push(" AND lead_score <= ").push_bind(max);
    }
    if let Some(min) = filter.capital_min {
        qb.push(" AND capital_available >= ").push_bind(min);
    }
    if let Some(max) = filter.capital_max {
        qb.push(" AND capital_available <= ").push_bind(max);
    }
    if let Some(from) = filter.created_from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.created_to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
    if let Some(search) = filter.search.as_deref() {
        qb.push(" AND phone LIKE ").push_bind(like_pattern(search));
    }
}

fn push_deal_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &DealFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(deal_type) = filter.deal_type.clone() {
        qb.push(" AND deal_type = ").push_bind(deal_type);
    }
    if let Some(max) = filter.max_investment {
        qb.push(" AND minimum_investment <= ").push_bind(max);
    }
    if let Some(search) = filter.search.as_deref() {
        let pattern = like_pattern(search);
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR summary ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Build a pool from the configured URL and limits.
    pub async fn connect(config: &Config) -> StoreResult<Self> {
        let mut options = PgConnectOptions::from_str(&config.database_url)?;
        if !config.debug {
            options = options.disable_statement_logging();
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(config.database_acquire_timeout_secs))
            .connect_with(options)
            .await?;

        info!(
            "Connected to PostgreSQL (max {} connections)",
            config.database_max_connections
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_investor(&self, id: Uuid) -> StoreResult<Option<InvestorProfile>> {
        let row: Option<InvestorRow> = sqlx::query_as(&format!(
            "SELECT {INVESTOR_COLUMNS} FROM investor_profiles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(InvestorProfile::try_from).transpose()
    }
}

#[async_trait]
impl InvestorRepository for PgStore {
    async fn get_investor(&self, id: Uuid) -> StoreResult<Option<InvestorProfile>> {
        self.fetch_investor(id).await
    }

    async fn get_investor_by_phone(&self, phone: &str) -> StoreResult<Option<InvestorProfile>> {
        let row: Option<InvestorRow> = sqlx::query_as(&format!(
            "SELECT {INVESTOR_COLUMNS} FROM investor_profiles WHERE phone = $1 \
             ORDER BY created_at LIMIT 1"
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        row.map(InvestorProfile::try_from).transpose()
    }

    async fn investors_by_stage(&self, stage: PipelineStage) -> StoreResult<Vec<InvestorProfile>> {
        let rows: Vec<InvestorRow> = sqlx::query_as(&format!(
            "SELECT {INVESTOR_COLUMNS} FROM investor_profiles WHERE stage = $1 \
             ORDER BY lead_score DESC"
        ))
        .bind(stage.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    #[instrument(skip(self, lead), fields(investor_id = %lead.profile.id))]
    async fn create_lead(&self, lead: NewLead) -> StoreResult<InvestorProfile> {
        let p = lead.profile;
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO investor_profiles ({INVESTOR_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
             $19, $20)"
        ))
        .bind(p.id)
        .bind(&p.name)
        .bind(&p.phone)
        .bind(&p.timeline)
        .bind(p.capital_available)
        .bind(&p.investment_preferences)
        .bind(&p.investment_thesis)
        .bind(&p.risk_tolerance)
        .bind(p.stage.as_str())
        .bind(p.lead_score)
        .bind(&p.source)
        .bind(&p.investor_type)
        .bind(&p.capacity)
        .bind(&p.fit)
        .bind(&p.process)
        .bind(&p.timing)
        .bind(&p.qualification_bucket)
        .bind(p.qualification_score)
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO consents (id, investor_id, consent_text, ip_address, user_agent, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(p.id)
        .bind(&lead.consent.consent_text)
        .bind(&lead.consent.ip_address)
        .bind(&lead.consent.user_agent)
        .bind(p.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO stage_history (id, investor_id, from_stage, to_stage, changed_by, notes, changed_at) \
             VALUES ($1, $2, NULL, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(p.id)
        .bind(p.stage.as_str())
        .bind(CHANGED_BY_SYSTEM)
        .bind(&lead.initial_stage_notes)
        .bind(p.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Lead persisted");
        Ok(p)
    }

    async fn count_investors(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM investor_profiles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn stage_counts(&self) -> StoreResult<BTreeMap<PipelineStage, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT stage, COUNT(*) FROM investor_profiles GROUP BY stage")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(stage, count)| {
                Ok((parse_column("investor_profiles", &stage)?, count as u64))
            })
            .collect()
    }

    async fn average_lead_score(&self) -> StoreResult<f64> {
        let avg: f64 = sqlx::query_scalar(
            "SELECT COALESCE(AVG(lead_score)::float8, 0.0) FROM investor_profiles",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(avg)
    }

    #[instrument(skip(self))]
    async fn search_leads(&self, filter: &LeadFilter) -> StoreResult<(Vec<InvestorProfile>, u64)> {
        let mut count_qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM investor_profiles WHERE TRUE");
        push_lead_filters(&mut count_qb, filter);
        let total = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "SELECT {INVESTOR_COLUMNS} FROM investor_profiles WHERE TRUE"
        ));
        push_lead_filters(&mut qb, filter);
        qb.push(format!(
            " ORDER BY {} {}",
            filter.sort_by.column(),
            filter.sort_order.keyword()
        ));
        qb.push(" LIMIT ").push_bind(to_i64(filter.limit));
        qb.push(" OFFSET ").push_bind(to_i64(filter.offset));

        let rows = qb
            .build_query_as::<InvestorRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok((collect(rows)?, total as u64))
    }

    async fn lead_relations(&self, ids: &[Uuid]) -> StoreResult<HashMap<Uuid, LeadRelations>> {
        let mut out: HashMap<Uuid, LeadRelations> = ids
            .iter()
            .map(|id| (*id, LeadRelations::default()))
            .collect();
        if ids.is_empty() {
            return Ok(out);
        }
        let ids = ids.to_vec();

        let calls: Vec<CallRow> = sqlx::query_as(
            "SELECT id, investor_id, status, duration, transcript, recording_url, room_name, \
             livekit_participant_id, initiated_at, completed_at \
             FROM call_sessions WHERE investor_id = ANY($1) ORDER BY initiated_at DESC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        for call in collect::<_, CallSession>(calls)? {
            if let Some(rel) = out.get_mut(&call.investor_id) {
                rel.calls.push(call);
            }
        }

        let matches: Vec<MatchRow> = sqlx::query_as(
            "SELECT m.id, m.investor_id, m.property_id, m.similarity_score, m.match_reasons, \
             m.status, m.notes, m.created_at, COALESCE(p.name, '') AS deal_name \
             FROM deal_matches m LEFT JOIN properties p ON p.id = m.property_id \
             WHERE m.investor_id = ANY($1) ORDER BY m.similarity_score DESC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        for matched in collect::<_, MatchedDeal>(matches)? {
            if let Some(rel) = out.get_mut(&matched.deal_match.investor_id) {
                rel.matches.push(matched);
            }
        }

        let notes: Vec<NoteRow> = sqlx::query_as(
            "SELECT id, investor_id, content, created_by, created_at FROM lead_notes \
             WHERE investor_id = ANY($1) ORDER BY created_at DESC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        for note in notes.into_iter().map(LeadNote::from) {
            if let Some(rel) = out.get_mut(&note.investor_id) {
                rel.notes.push(note);
            }
        }

        let history: Vec<StageChangeRow> = sqlx::query_as(
            "SELECT id, investor_id, from_stage, to_stage, changed_by, notes, changed_at \
             FROM stage_history WHERE investor_id = ANY($1) ORDER BY changed_at DESC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        for change in collect::<_, StageChange>(history)? {
            if let Some(rel) = out.get_mut(&change.investor_id) {
                rel.stage_history.push(change);
            }
        }

        let consents: Vec<ConsentRow> = sqlx::query_as(
            "SELECT id, investor_id, consent_text, ip_address, user_agent, created_at \
             FROM consents WHERE investor_id = ANY($1) ORDER BY created_at",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        for consent in consents.into_iter().map(Consent::from) {
            if let Some(rel) = out.get_mut(&consent.investor_id) {
                rel.consents.push(consent);
            }
        }

        Ok(out)
    }

    #[instrument(skip(self, notes))]
    async fn update_stage(
        &self,
        id: Uuid,
        stage: PipelineStage,
        changed_by: &str,
        notes: Option<String>,
    ) -> StoreResult<Option<InvestorProfile>> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT stage FROM investor_profiles WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = current else {
            return Ok(None);
        };
        let from_stage: PipelineStage = parse_column("investor_profiles", &current)?;
        let now = now_utc();

        let row: InvestorRow = sqlx::query_as(&format!(
            "UPDATE investor_profiles SET stage = $2, updated_at = $3 WHERE id = $1 \
             RETURNING {INVESTOR_COLUMNS}"
        ))
        .bind(id)
        .bind(stage.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO stage_history (id, investor_id, from_stage, to_stage, changed_by, notes, changed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(from_stage.as_str())
        .bind(stage.as_str())
        .bind(changed_by)
        .bind(&notes)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(row.try_into()?))
    }

    async fn add_note(
        &self,
        investor_id: Uuid,
        content: &str,
        created_by: &str,
    ) -> StoreResult<Option<LeadNote>> {
        let row: Option<NoteRow> = sqlx::query_as(
            "INSERT INTO lead_notes (id, investor_id, content, created_by, created_at) \
             SELECT $1, id, $3, $4, $5 FROM investor_profiles WHERE id = $2 \
             RETURNING id, investor_id, content, created_by, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(investor_id)
        .bind(content)
        .bind(created_by)
        .bind(now_utc())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(LeadNote::from))
    }

    async fn add_consent(&self, investor_id: Uuid, consent: NewConsent) -> StoreResult<Consent> {
        let row: ConsentRow = sqlx::query_as(
            "INSERT INTO consents (id, investor_id, consent_text, ip_address, user_agent, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, investor_id, consent_text, ip_address, user_agent, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(investor_id)
        .bind(&consent.consent_text)
        .bind(&consent.ip_address)
        .bind(&consent.user_agent)
        .bind(now_utc())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn add_call_session(&self, call: CallSession) -> StoreResult<CallSession> {
        sqlx::query(
            "INSERT INTO call_sessions (id, investor_id, status, duration, transcript, \
             recording_url, room_name, livekit_participant_id, initiated_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(call.id)
        .bind(call.investor_id)
        .bind(call.status.as_str())
        .bind(call.duration)
        .bind(&call.transcript)
        .bind(&call.recording_url)
        .bind(&call.room_name)
        .bind(&call.livekit_participant_id)
        .bind(call.initiated_at)
        .bind(call.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(call)
    }

    async fn add_deal_match(&self, deal_match: DealMatch) -> StoreResult<DealMatch> {
        sqlx::query(
            "INSERT INTO deal_matches (id, investor_id, property_id, similarity_score, \
             match_reasons, status, notes, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(deal_match.id)
        .bind(deal_match.investor_id)
        .bind(deal_match.property_id)
        .bind(deal_match.similarity_score)
        .bind(&deal_match.match_reasons)
        .bind(deal_match.status.as_str())
        .bind(&deal_match.notes)
        .bind(deal_match.created_at)
        .execute(&self.pool)
        .await?;
        Ok(deal_match)
    }
}

#[async_trait]
impl PropertyRepository for PgStore {
    async fn get_property(&self, id: Uuid) -> StoreResult<Option<Property>> {
        let row: Option<PropertyRow> = sqlx::query_as(&format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Property::try_from).transpose()
    }

    async fn get_property_features(
        &self,
        property_id: Uuid,
    ) -> StoreResult<Option<PropertyFeatures>> {
        let row: Option<FeaturesRow> = sqlx::query_as(&format!(
            "SELECT {FEATURE_COLUMNS} FROM property_features WHERE property_id = $1"
        ))
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PropertyFeatures::from))
    }

    async fn properties_by_status(&self, status: DealStatus) -> StoreResult<Vec<Property>> {
        let rows: Vec<PropertyRow> = sqlx::query_as(&format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties WHERE status = $1 ORDER BY created_at DESC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
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

    #[instrument(skip(self))]
    async fn search_deals(&self, filter: &DealFilter) -> StoreResult<(Vec<Property>, u64)> {
        let mut count_qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM properties WHERE TRUE");
        push_deal_filters(&mut count_qb, filter);
        let total = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {PROPERTY_COLUMNS} FROM properties WHERE TRUE"));
        push_deal_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(to_i64(filter.limit));
        qb.push(" OFFSET ").push_bind(to_i64(filter.offset));

        let rows = qb
            .build_query_as::<PropertyRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok((collect(rows)?, total as u64))
    }

    async fn create_property(
        &self,
        property: NewProperty,
        features: Option<NewPropertyFeatures>,
    ) -> StoreResult<(Property, Option<PropertyFeatures>)> {
        let now = now_utc();
        let p = property.into_property(now);
        let features = features.map(|f| f.into_features(p.id, now));
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO properties ({PROPERTY_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
             $19, $20, $21, $22, $23)"
        ))
        .bind(p.id)
        .bind(&p.name)
        .bind(&p.deal_type)
        .bind(&p.summary)
        .bind(&p.thesis)
        .bind(p.minimum_investment)
        .bind(&p.target_return)
        .bind(&p.risk_factors)
        .bind(&p.ideal_investor_profile)
        .bind(&p.structure)
        .bind(&p.timeline)
        .bind(p.status.as_str())
        .bind(&p.address)
        .bind(&p.city)
        .bind(&p.state)
        .bind(&p.zip_code)
        .bind(p.purchase_price)
        .bind(p.square_feet)
        .bind(p.total_equity_required)
        .bind(&p.document_s3_key)
        .bind(&p.document_filename)
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&mut *tx)
        .await?;

        if let Some(f) = &features {
            sqlx::query(&format!(
                "INSERT INTO property_features ({FEATURE_COLUMNS}) VALUES \
                 ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
            ))
            .bind(f.id)
            .bind(f.property_id)
            .bind(&f.asset_type)
            .bind(&f.features)
            .bind(f.year_built)
            .bind(f.year_renovated)
            .bind(f.parking_spaces)
            .bind(f.created_at)
            .bind(f.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok((p, features))
    }

    #[instrument(skip(self, update))]
    async fn update_property(
        &self,
        id: Uuid,
        update: &PropertyUpdate,
    ) -> StoreResult<Option<Property>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<PropertyRow> = sqlx::query_as(&format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut p = Property::try_from(row)?;
        update.apply(&mut p);
        p.updated_at = now_utc();

        sqlx::query(
            "UPDATE properties SET name = $2, deal_type = $3, summary = $4, thesis = $5, \
             minimum_investment = $6, target_return = $7, risk_factors = $8, \
             ideal_investor_profile = $9, structure = $10, timeline = $11, status = $12, \
             updated_at = $13 WHERE id = $1",
        )
        .bind(p.id)
        .bind(&p.name)
        .bind(&p.deal_type)
        .bind(&p.summary)
        .bind(&p.thesis)
        .bind(p.minimum_investment)
        .bind(&p.target_return)
        .bind(&p.risk_factors)
        .bind(&p.ideal_investor_profile)
        .bind(&p.structure)
        .bind(&p.timeline)
        .bind(p.status.as_str())
        .bind(p.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(p))
    }

    async fn update_property_status(
        &self,
        id: Uuid,
        status: DealStatus,
    ) -> StoreResult<Option<Property>> {
        let row: Option<PropertyRow> = sqlx::query_as(&format!(
            "UPDATE properties SET status = $2, updated_at = $3 WHERE id = $1 \
             RETURNING {PROPERTY_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(now_utc())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Property::try_from).transpose()
    }

    async fn count_properties(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM properties")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
