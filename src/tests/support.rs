//! tests/support.rs
//! Helpers compartidos: pool en memoria, colaboradores falsos y datos semilla.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};

use crate::collaborators::{
    Collaborators, ContentResolver, RenderedContent, ReputationSignal, SendOutcome,
    SuppressionOracle, Transport,
};
use crate::config::engine_config::EngineConfig;
use crate::models::{
    campaign_model::{Campaign, CampaignStatus, CreateCampaignRequest, VariantRequest},
    sender_model::{CreateSenderRequest, HealthScore, SenderProfile},
};
use crate::services::{
    campaign_service::CampaignService, dispatch_service::DispatchService,
    queue_service::QueueService, sender_service::SenderService, sweeper_service::SweeperService,
    tracking_service::TrackingService, worker_service::Worker,
};

/// Una sola conexión: cada conexión `sqlite::memory:` es una base distinta.
pub async fn test_pool() -> Pool<Sqlite> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

#[derive(Default)]
pub struct FakeSuppression {
    addresses: Mutex<HashSet<String>>,
}

impl FakeSuppression {
    pub fn suppress(&self, address: &str) {
        self.addresses
            .lock()
            .unwrap()
            .insert(address.to_ascii_lowercase());
    }
}

#[async_trait]
impl SuppressionOracle for FakeSuppression {
    async fn is_suppressed(&self, address: &str) -> Result<bool> {
        Ok(self
            .addresses
            .lock()
            .unwrap()
            .contains(&address.to_ascii_lowercase()))
    }
}

/// Transporte con resultados guionados por destinatario. Sin guion: éxito.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<SendOutcome>>>,
    always: Mutex<HashMap<String, SendOutcome>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    /// Resultados consumidos en orden; después del último, éxito.
    pub fn script(&self, recipient: &str, outcomes: Vec<SendOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(recipient.to_string(), outcomes.into());
    }

    pub fn always(&self, recipient: &str, outcome: SendOutcome) {
        self.always
            .lock()
            .unwrap()
            .insert(recipient.to_string(), outcome);
    }

    pub fn calls_for(&self, recipient: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.as_str() == recipient)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        _sender: &SenderProfile,
        recipient: &str,
        _content: &RenderedContent,
    ) -> SendOutcome {
        self.calls.lock().unwrap().push(recipient.to_string());
        if let Some(outcome) = self.always.lock().unwrap().get(recipient) {
            return outcome.clone();
        }
        self.scripts
            .lock()
            .unwrap()
            .get_mut(recipient)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(SendOutcome::Success)
    }
}

pub struct FixedReputation {
    score: Mutex<HealthScore>,
}

impl FixedReputation {
    pub fn new(score: HealthScore) -> Self {
        Self {
            score: Mutex::new(score),
        }
    }

    pub fn set(&self, score: HealthScore) {
        *self.score.lock().unwrap() = score;
    }
}

#[async_trait]
impl ReputationSignal for FixedReputation {
    async fn get_health_score(&self, _sender_id: &str) -> Result<HealthScore> {
        Ok(*self.score.lock().unwrap())
    }
}

pub struct StaticContent;

#[async_trait]
impl ContentResolver for StaticContent {
    async fn render(
        &self,
        campaign_id: &str,
        variant_id: Option<&str>,
        recipient: &str,
        tracking_id: &str,
    ) -> Result<RenderedContent> {
        Ok(RenderedContent {
            subject: format!("{campaign_id}/{}", variant_id.unwrap_or("base")),
            html: format!("<p>{recipient}</p><img src=\"/t/{tracking_id}\"/>"),
        })
    }
}

pub struct TestEngine {
    pub pool: Pool<Sqlite>,
    pub config: EngineConfig,
    pub queue: QueueService,
    pub tracking: TrackingService,
    pub senders: SenderService,
    pub campaigns: CampaignService,
    pub dispatcher: DispatchService,
    pub sweeper: SweeperService,
    pub worker: Arc<Worker>,
    pub suppression: Arc<FakeSuppression>,
    pub transport: Arc<ScriptedTransport>,
    pub reputation: Arc<FixedReputation>,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        dispatch_batch_size: 50,
        job_max_attempts: 3,
        retry_base_delay_secs: 30,
        retry_max_delay_secs: 600,
        capacity_defer_secs: 900,
        send_timeout_secs: 2,
        oracle_timeout_secs: 2,
        ..EngineConfig::default()
    }
}

pub async fn engine() -> TestEngine {
    engine_with(test_config()).await
}

pub async fn engine_with(config: EngineConfig) -> TestEngine {
    let pool = test_pool().await;
    let suppression = Arc::new(FakeSuppression::default());
    let transport = Arc::new(ScriptedTransport::default());
    let reputation = Arc::new(FixedReputation::new(HealthScore::Healthy));

    let oracle: Arc<dyn SuppressionOracle> = suppression.clone();
    let collaborators = Collaborators {
        suppression: oracle.clone(),
        transport: transport.clone(),
        reputation: reputation.clone(),
        content: Arc::new(StaticContent),
    };

    let queue = QueueService::new(pool.clone(), &config);
    let tracking = TrackingService::new(pool.clone());
    let senders = SenderService::new(pool.clone());
    let campaigns = CampaignService::new(
        pool.clone(),
        queue.clone(),
        tracking.clone(),
        oracle.clone(),
        config.clone(),
    );
    let dispatcher = DispatchService::new(
        pool.clone(),
        campaigns.clone(),
        senders.clone(),
        queue.clone(),
        oracle,
        config.clone(),
    );
    let sweeper = SweeperService::new(
        pool.clone(),
        campaigns.clone(),
        tracking.clone(),
        queue.clone(),
        &config,
    );
    let worker = Arc::new(Worker::new(
        pool.clone(),
        queue.clone(),
        tracking.clone(),
        senders.clone(),
        campaigns.clone(),
        dispatcher.clone(),
        collaborators,
        config.clone(),
    ));

    TestEngine {
        pool,
        config,
        queue,
        tracking,
        senders,
        campaigns,
        dispatcher,
        sweeper,
        worker,
        suppression,
        transport,
        reputation,
    }
}

/// Direcciones con índice con ceros a la izquierda: el orden alfabético
/// coincide con el de creación.
pub fn recipients(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("user{i:03}@example.com")).collect()
}

pub async fn seed_sender(engine: &TestEngine, current: i64, max: i64) -> String {
    engine
        .senders
        .create_sender(CreateSenderRequest {
            owner_id: "owner-1".to_string(),
            from_address: "news@example.com".to_string(),
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            smtp_user: "news".to_string(),
            smtp_pass: "secret".to_string(),
            current_daily_limit: current,
            max_daily_limit: Some(max),
            training_mode: None,
            manual_daily_increase_pct: None,
        })
        .await
        .expect("create sender")
        .id
}

pub fn campaign_request(recipients: Vec<String>, sender_ids: Vec<String>) -> CreateCampaignRequest {
    CreateCampaignRequest {
        owner_id: "owner-1".to_string(),
        name: "Spring sale".to_string(),
        subject: "Hello {{email}}".to_string(),
        content: "<p>Hi {{email}}</p>".to_string(),
        recipients,
        sender_ids,
        variants: None,
    }
}

pub fn variant(subject: &str, weight: u32) -> VariantRequest {
    VariantRequest {
        subject: subject.to_string(),
        content: format!("<p>{subject}</p>"),
        weight: Some(weight),
    }
}

pub async fn seed_campaign(engine: &TestEngine, count: usize, sender_id: &str) -> Campaign {
    engine
        .campaigns
        .create_campaign(campaign_request(
            recipients(count),
            vec![sender_id.to_string()],
        ))
        .await
        .expect("create campaign")
}

/// Crea remitente + campaña y la arranca. Devuelve (campaign_id, sender_id).
pub async fn started_campaign(engine: &TestEngine, count: usize, limit: i64) -> (String, String) {
    let sender_id = seed_sender(engine, limit, limit.max(500)).await;
    let campaign = seed_campaign(engine, count, &sender_id).await;
    engine
        .campaigns
        .start_campaign(&campaign.id)
        .await
        .expect("start campaign");
    (campaign.id, sender_id)
}

/// Procesa jobs listos a `now` hasta vaciar la cola.
pub async fn drain_at(engine: &TestEngine, now: DateTime<Utc>) -> usize {
    let mut processed = 0;
    while engine.worker.process_next(now).await.expect("process_next") {
        processed += 1;
        assert!(processed < 10_000, "queue never drained");
    }
    processed
}

pub async fn drain(engine: &TestEngine) -> usize {
    drain_at(engine, Utc::now()).await
}

pub async fn status_of(engine: &TestEngine, campaign_id: &str) -> CampaignStatus {
    engine
        .campaigns
        .get_campaign(campaign_id)
        .await
        .expect("get campaign")
        .status
}

/// (kind, status, attempts) de cada job de la campaña.
pub async fn jobs_of(engine: &TestEngine, campaign_id: &str) -> Vec<(String, String, i64)> {
    sqlx::query_as("SELECT kind, status, attempts FROM jobs WHERE campaign_id = ?1 ORDER BY created_at")
        .bind(campaign_id)
        .fetch_all(&engine.pool)
        .await
        .expect("read jobs")
}

/// Los contadores nunca superan el total de destinatarios.
pub fn assert_counters_bounded(campaign: &Campaign) {
    assert!(
        campaign.total_sent + campaign.total_failed <= campaign.recipient_count,
        "sent={} failed={} recipients={}",
        campaign.total_sent,
        campaign.total_failed,
        campaign.recipient_count
    );
}
