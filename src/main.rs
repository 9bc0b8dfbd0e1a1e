mod config;
mod error;
mod routes;
mod storage;

use std::path::Path;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use job_runner::{spawn_worker_pool, JobRunner};
use plate_detector::{FallbackDetector, ModelBackedDetector, PlateDetector};
use plate_ocr::{OcrEngine, TesseractOcrEngine};
use recognition_core::RecognitionOrchestrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const JOB_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = config::Settings::load()?;
    info!(app_name = %settings.app_name, "starting recognition service");

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(settings.database_url.trim_start_matches("sqlite://"))
                .create_if_missing(true),
        )
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let storage = Arc::new(storage::LocalStorageService::new(&settings.upload_dir).await?);

    let detector: Box<dyn PlateDetector> = if Path::new(&settings.plate_detection_model).exists() {
        Box::new(ModelBackedDetector::new(
            &settings.plate_detection_model,
            settings.recognition.plate_detection_confidence,
        ))
    } else {
        info!(path = %settings.plate_detection_model, "plate detection model not found, using centred-crop fallback");
        Box::new(FallbackDetector::default())
    };

    let ocr_engine: Box<dyn OcrEngine> = Box::new(TesseractOcrEngine::new(
        &settings.recognition.ocr_languages,
        settings.recognition.ocr_min_confidence,
    ));

    let orchestrator = Arc::new(RecognitionOrchestrator::new(
        detector,
        ocr_engine,
        settings.into_recognition_config(),
    ));

    let job_runner = Arc::new(JobRunner::new(pool.clone(), orchestrator, &settings.upload_dir));
    let (job_sender, job_receiver) = mpsc::channel(JOB_QUEUE_CAPACITY);
    spawn_worker_pool(job_runner, job_receiver, settings.worker_pool_size);

    let state = web::Data::new(routes::AppState { pool, storage, job_sender });
    let bind_address = (settings.server_host.clone(), settings.server_port);

    info!(host = %bind_address.0, port = bind_address.1, "listening");
    HttpServer::new(move || App::new().app_data(state.clone()).configure(routes::configure))
        .bind(bind_address)?
        .run()
        .await?;

    Ok(())
}
