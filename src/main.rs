use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use chrono::Utc;
use dotenv::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::collaborators::{
    content::TemplateContentResolver,
    reputation::{HttpReputationSignal, LedgerReputationSignal},
    smtp_transport::SmtpTransport,
    suppression::DbSuppressionOracle,
    Collaborators, ReputationSignal,
};
use crate::config::engine_config::EngineConfig;
use crate::logger::init_logger;
use crate::services::{
    campaign_service::CampaignService,
    dispatch_service::DispatchService,
    queue_service::QueueService,
    sender_service::SenderService,
    sweeper_service::SweeperService,
    tracking_service::TrackingService,
    training_service::{ReputationCurve, TrainingService},
    worker_service::{Worker, WorkerPool},
};

mod app;
mod collaborators;
mod config;
mod errors;
mod handlers;
mod logger;
mod models;
mod services;

#[cfg(test)]
mod tests;

async fn setup_database(config: &EngineConfig) -> Result<Pool<Sqlite>> {
    // Carpeta "data" para la base por defecto
    std::fs::create_dir_all("data").context("No se pudo crear directorio 'data'")?;

    log::info!("Conectando a SQLite en {}", config.database_url);
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .context("No se pudo conectar a la base de datos SQLite")?;

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Fallo en migraciones")?;

    Ok(db_pool)
}

fn reputation_signal(
    config: &EngineConfig,
    db_pool: &Pool<Sqlite>,
) -> Result<Arc<dyn ReputationSignal>> {
    match &config.reputation_api_url {
        Some(url) => {
            log::info!("Reputación de remitentes vía {}", url);
            Ok(Arc::new(HttpReputationSignal::new(
                url.clone(),
                config.oracle_timeout(),
            )?))
        }
        None => {
            log::info!("Reputación de remitentes derivada del ledger");
            Ok(Arc::new(LedgerReputationSignal::new(db_pool.clone())))
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok(); // Cargar .env al inicio
    init_logger();

    let config = EngineConfig::from_env();
    let db_pool = setup_database(&config).await?;

    let collaborators = Collaborators {
        suppression: Arc::new(DbSuppressionOracle::new(db_pool.clone())),
        transport: Arc::new(SmtpTransport::new()),
        reputation: reputation_signal(&config, &db_pool)?,
        content: Arc::new(TemplateContentResolver::new(
            db_pool.clone(),
            config.tracking_base_url.clone(),
        )),
    };

    let queue_service = QueueService::new(db_pool.clone(), &config);
    let tracking_service = TrackingService::new(db_pool.clone());
    let sender_service = SenderService::new(db_pool.clone());
    let campaign_service = CampaignService::new(
        db_pool.clone(),
        queue_service.clone(),
        tracking_service.clone(),
        collaborators.suppression.clone(),
        config.clone(),
    );
    let dispatch_service = DispatchService::new(
        db_pool.clone(),
        campaign_service.clone(),
        sender_service.clone(),
        queue_service.clone(),
        collaborators.suppression.clone(),
        config.clone(),
    );
    let sweeper_service = SweeperService::new(
        db_pool.clone(),
        campaign_service.clone(),
        tracking_service.clone(),
        queue_service.clone(),
        &config,
    );
    let training_service = TrainingService::new(
        sender_service.clone(),
        collaborators.reputation.clone(),
        Arc::new(ReputationCurve {
            healthy_increase_pct: config.auto_healthy_increase_pct,
            critical_decrease_pct: config.auto_critical_decrease_pct,
        }),
        config.default_training_mode,
    );

    let worker = Arc::new(Worker::new(
        db_pool.clone(),
        queue_service.clone(),
        tracking_service.clone(),
        sender_service.clone(),
        campaign_service.clone(),
        dispatch_service,
        collaborators,
        config.clone(),
    ));
    let workers = WorkerPool::spawn(worker, config.worker_count, config.poll_interval());
    log::info!("{} workers de cola iniciados", config.worker_count);

    // Sweeper de reconciliación periódico
    let sweeper = sweeper_service.clone();
    let sweep_every = Duration::from_secs(config.sweep_interval_secs);
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            if let Err(e) = sweeper.run_reconciliation_sweep(Utc::now()).await {
                log::error!("Error en sweep de reconciliación: {:?}", e);
            }
        }
    });

    // Entrenamiento de remitentes periódico
    let trainer = training_service.clone();
    let train_every = Duration::from_secs(config.training_interval_secs);
    let training_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(train_every);
        loop {
            interval.tick().await;
            if let Err(e) = trainer.run_sender_training(Utc::now()).await {
                log::error!("Error en entrenamiento de remitentes: {:?}", e);
            }
        }
    });

    // Levantar servidor
    log::info!("Levantando servidor en {}:{}", config.bind_addr, config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(campaign_service.clone()))
            .app_data(web::Data::new(tracking_service.clone()))
            .app_data(web::Data::new(sender_service.clone()))
            .app_data(web::Data::new(queue_service.clone()))
            .app_data(web::Data::new(sweeper_service.clone()))
            .app_data(web::Data::new(training_service.clone()))
            .configure(app::init_app)
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await?;

    log::info!("Servidor detenido; esperando a los workers");
    sweep_task.abort();
    training_task.abort();
    workers.shutdown().await;
    db_pool.close().await;
    Ok(())
}
