//! Translates `recognition_requests` rows into [`RecognitionOrchestrator`]
//! calls and writes the outcome back, retrying queue-transient failures with
//! backoff. Image decode or detection/OCR errors are terminal for the job and
//! are written straight to `FAILED`; only database-layer failures are retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use recognition_core::RecognitionOrchestrator;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_SECS: u64 = 5;
const JOB_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionStatus {
    NotStarted,
    Pending,
    Completed,
    Failed,
    NeedsReview,
}

impl RecognitionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecognitionStatus::NotStarted => "NOT_STARTED",
            RecognitionStatus::Pending => "PENDING",
            RecognitionStatus::Completed => "COMPLETED",
            RecognitionStatus::Failed => "FAILED",
            RecognitionStatus::NeedsReview => "NEEDS_REVIEW",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobRunnerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("recognition request {0} not found")]
    NotFound(Uuid),
    #[error("recognition task panicked: {0}")]
    TaskPanicked(String),
}

impl JobRunnerError {
    /// Only database-layer errors are treated as queue-transient; a missing
    /// row or a panicked recognition task is not retried.
    fn is_transient(&self) -> bool {
        matches!(self, JobRunnerError::Database(_))
    }
}

/// Payload carried on the in-process job queue. Stands in for whatever
/// external transport (SQS, Redis, a message broker) a deployment wires up;
/// the worker pool here only needs the request id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueMessage {
    pub request_id: Uuid,
}

pub struct JobRunner {
    pool: SqlitePool,
    orchestrator: Arc<RecognitionOrchestrator>,
    upload_dir: PathBuf,
}

impl JobRunner {
    pub fn new(
        pool: SqlitePool,
        orchestrator: Arc<RecognitionOrchestrator>,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self { pool, orchestrator, upload_dir: upload_dir.into() }
    }

    /// Drives one job to a terminal status, retrying queue-transient
    /// failures up to [`MAX_RETRIES`] times with `5s * (attempt + 1)`
    /// backoff, matching the original Celery task's retry policy.
    pub async fn process_job(&self, request_id: Uuid) -> Result<(), JobRunnerError> {
        let mut retry_count = 0u32;
        loop {
            match self.run_once(request_id).await {
                Ok(()) => return Ok(()),
                Err(error) if error.is_transient() && retry_count < MAX_RETRIES => {
                    let backoff = Duration::from_secs(BASE_BACKOFF_SECS * (retry_count + 1) as u64);
                    warn!(%request_id, retry_count, ?backoff, %error, "transient failure, retrying");
                    tokio::time::sleep(backoff).await;
                    retry_count += 1;
                }
                Err(error) => {
                    error!(%request_id, %error, "job failed permanently");
                    let _ = self.mark_failed(request_id, &error.to_string()).await;
                    return Err(error);
                }
            }
        }
    }

    async fn run_once(&self, request_id: Uuid) -> Result<(), JobRunnerError> {
        let id_str = request_id.to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query("UPDATE recognition_requests SET status = ?, updated_at = ? WHERE id = ?")
            .bind(RecognitionStatus::Pending.as_str())
            .bind(&now)
            .bind(&id_str)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query("SELECT image_url FROM recognition_requests WHERE id = ?")
            .bind(&id_str)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(JobRunnerError::NotFound(request_id))?;
        let image_url: String = row.try_get("image_url")?;
        let image_path = resolve_image_path(&self.upload_dir, &image_url);

        debug!(%request_id, path = %image_path.display(), "starting recognition");

        let orchestrator = Arc::clone(&self.orchestrator);
        let path_for_task = image_path.clone();
        let join = tokio::task::spawn_blocking(move || orchestrator.process_image(&path_for_task));

        match tokio::time::timeout(JOB_TIMEOUT, join).await {
            Ok(Ok(Ok(result))) => self.write_result(&id_str, &result).await,
            Ok(Ok(Err(processing_error))) => {
                self.mark_failed(request_id, &processing_error.to_string()).await
            }
            Ok(Err(join_error)) => {
                self.mark_failed(request_id, &format!("recognition task panicked: {join_error}")).await
            }
            Err(_elapsed) => self.mark_failed(request_id, "recognition timed out").await,
        }
    }

    async fn write_result(
        &self,
        id_str: &str,
        result: &recognition_core::RecognitionResult,
    ) -> Result<(), JobRunnerError> {
        let status = match (&result.plate_number, result.needs_review) {
            (Some(_), true) => RecognitionStatus::NeedsReview,
            (Some(_), false) => RecognitionStatus::Completed,
            (None, _) => RecognitionStatus::Failed,
        };
        let error_message = if result.plate_number.is_none() {
            Some("No plate detected".to_string())
        } else {
            None
        };
        let bounding_box_json = result
            .bounding_box
            .map(|bbox| serde_json::to_string(&bbox))
            .transpose()
            .unwrap_or(None);
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "UPDATE recognition_requests \
             SET plate_number = ?, status = ?, error_message = ?, \
                 confidence_score = ?, detection_confidence = ?, ocr_confidence = ?, \
                 needs_review = ?, bounding_box = ?, plate_region = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&result.plate_number)
        .bind(status.as_str())
        .bind(&error_message)
        .bind(result.confidence_score as f64)
        .bind(result.detection_confidence as f64)
        .bind(result.ocr_confidence as f64)
        .bind(result.needs_review)
        .bind(&bounding_box_json)
        .bind(&result.plate_region)
        .bind(&now)
        .bind(id_str)
        .execute(&self.pool)
        .await?;

        info!(id = id_str, status = status.as_str(), needs_review = result.needs_review, "job finished");
        Ok(())
    }

    async fn mark_failed(&self, request_id: Uuid, message: &str) -> Result<(), JobRunnerError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE recognition_requests SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(RecognitionStatus::Failed.as_str())
        .bind(message)
        .bind(&now)
        .bind(request_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

}

/// `image_url` is stored as `/uploads/<filename>`; resolve it against the
/// configured upload directory the way the original storage service does.
fn resolve_image_path(upload_dir: &Path, image_url: &str) -> PathBuf {
    let filename = Path::new(image_url)
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| image_url.to_string());
    upload_dir.join(filename)
}

/// Spawns `worker_count` tasks consuming from a single shared receiver.
/// `tokio::sync::mpsc::Receiver` has no built-in fan-out, so workers take
/// turns behind a mutex — acceptable since `recv` already yields exclusivity
/// one message at a time.
pub fn spawn_worker_pool(
    job_runner: Arc<JobRunner>,
    receiver: mpsc::Receiver<QueueMessage>,
    worker_count: usize,
) -> Vec<tokio::task::JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));

    (0..worker_count.max(1))
        .map(|worker_id| {
            let job_runner = Arc::clone(&job_runner);
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move {
                loop {
                    let message = { receiver.lock().await.recv().await };
                    match message {
                        Some(message) => {
                            info!(worker_id, request_id = %message.request_id, "dequeued recognition job");
                            if let Err(error) = job_runner.process_job(message.request_id).await {
                                error!(worker_id, %error, "job processing failed after retries");
                            }
                        }
                        None => {
                            debug!(worker_id, "queue closed, worker exiting");
                            break;
                        }
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_as_str_matches_migration_check_constraint() {
        assert_eq!(RecognitionStatus::NotStarted.as_str(), "NOT_STARTED");
        assert_eq!(RecognitionStatus::Pending.as_str(), "PENDING");
        assert_eq!(RecognitionStatus::Completed.as_str(), "COMPLETED");
        assert_eq!(RecognitionStatus::Failed.as_str(), "FAILED");
        assert_eq!(RecognitionStatus::NeedsReview.as_str(), "NEEDS_REVIEW");
    }

    #[test]
    fn database_errors_are_transient_not_found_is_not() {
        let db_error = JobRunnerError::Database(sqlx::Error::RowNotFound);
        assert!(db_error.is_transient());

        let not_found = JobRunnerError::NotFound(Uuid::nil());
        assert!(!not_found.is_transient());
    }

    #[test]
    fn resolve_image_path_joins_filename_onto_upload_dir() {
        let resolved = resolve_image_path(Path::new("/data/uploads"), "/uploads/plate-42.jpg");
        assert_eq!(resolved, PathBuf::from("/data/uploads/plate-42.jpg"));
    }

    #[test]
    fn resolve_image_path_handles_bare_filename() {
        let resolved = resolve_image_path(Path::new("/data/uploads"), "plate-7.png");
        assert_eq!(resolved, PathBuf::from("/data/uploads/plate-7.png"));
    }
}
