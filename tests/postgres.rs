//! PostgreSQL integration tests.
//!
//! These tests require a disposable database in DATABASE_URL; they drop and
//! recreate the schema.
//! Run with: cargo test --test postgres -- --ignored

use pretty_assertions::assert_eq;
use tokio::sync::Mutex;

use blackkeyx::config::Config;
use blackkeyx::domain::{PipelineStage, CHANGED_BY_ADMIN};
use blackkeyx::migrate::{MigrationHistory, Migrator, PgSchemaBackend, Target};
use blackkeyx::services::{ClientInfo, LeadProcessor, LeadSubmission};
use blackkeyx::store::{InvestorRepository, PgStore, Store};

/// Schema changes must not interleave across tests.
static SCHEMA_LOCK: Mutex<()> = Mutex::const_new(());

/// Get a test config from environment.
fn test_config() -> Option<Config> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL").ok()?;
    if !database_url.starts_with("postgres") {
        return None;
    }

    Some(Config {
        database_url,
        database_max_connections: 2,
        ..Config::default()
    })
}

async fn migrator(config: &Config) -> Migrator<PgSchemaBackend> {
    let backend = PgSchemaBackend::connect(&config.database_url)
        .await
        .expect("connect for migrations");
    Migrator::new(MigrationHistory::embedded().unwrap(), backend)
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_schema_downgrade_and_upgrade() {
    let Some(config) = test_config() else {
        println!("Skipping: DATABASE_URL not set");
        return;
    };
    let _guard = SCHEMA_LOCK.lock().await;

    let mut migrator = migrator(&config).await;
    migrator.upgrade(&Target::Head).await.unwrap();
    assert!(migrator.is_at_head().await.unwrap());

    let again = migrator.upgrade(&Target::Head).await.unwrap();
    assert!(again.is_noop());

    let down = migrator.downgrade(&Target::Base).await.unwrap();
    assert_eq!(down.to, None);
    assert_eq!(down.applied.len(), migrator.history().revisions().len());
    assert_eq!(migrator.current().await.unwrap(), None);

    let up = migrator.upgrade(&Target::Head).await.unwrap();
    assert_eq!(up.to.as_deref(), Some(migrator.history().head().revision));

    migrator.into_backend().close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_lead_round_trip() {
    let Some(config) = test_config() else {
        println!("Skipping: DATABASE_URL not set");
        return;
    };
    let _guard = SCHEMA_LOCK.lock().await;

    let mut migrator = migrator(&config).await;
    migrator.upgrade(&Target::Head).await.unwrap();
    migrator.into_backend().close().await.unwrap();

    let store = PgStore::connect(&config).await.unwrap();
    store.ping().await.unwrap();

    let phone = format!("+1555{}", &uuid::Uuid::new_v4().simple().to_string()[..7]);
    let submission = LeadSubmission {
        phone: phone.clone(),
        name: Some("Pat Example".to_string()),
        capital_available: Some("$500K-$1M".to_string()),
        ..LeadSubmission::default()
    };
    let client = ClientInfo {
        ip_address: Some("198.51.100.7".to_string()),
        user_agent: None,
    };

    let outcome = LeadProcessor::new(&store)
        .process_lead(submission.clone(), client.clone())
        .await
        .unwrap();
    assert!(outcome.is_new());
    let id = outcome.investor().id;

    let repeat = LeadProcessor::new(&store)
        .process_lead(submission, client)
        .await
        .unwrap();
    assert!(!repeat.is_new());
    assert_eq!(repeat.investor().id, id);

    let fetched = store.get_investor_by_phone(&phone).await.unwrap().unwrap();
    assert_eq!(fetched.name, "Pat Example");
    assert_eq!(fetched.capital_available, Some(750_000));
    assert_eq!(fetched.stage, PipelineStage::NewLead);

    store
        .update_stage(id, PipelineStage::CallDispatched, CHANGED_BY_ADMIN, None)
        .await
        .unwrap()
        .unwrap();
    let relations = store.lead_relations(&[id]).await.unwrap();
    let history = &relations[&id].stage_history;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].to_stage, PipelineStage::CallDispatched);
    assert_eq!(relations[&id].consents[0].ip_address.as_deref(), Some("198.51.100.7"));
}
