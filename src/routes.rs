//! HTTP surface: upload, reprocess, fetch, paginated list, health.
//! Routes and response shapes are fixed for compatibility (spec.md §6).

use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures_util::TryStreamExt;
use job_runner::QueueMessage;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::storage::StorageService;

pub struct AppState {
    pub pool: SqlitePool,
    pub storage: Arc<dyn StorageService>,
    pub job_sender: mpsc::Sender<QueueMessage>,
}

#[derive(Debug, Serialize)]
struct CreateResponse {
    request_id: Uuid,
    status: &'static str,
    created_at: String,
}

#[derive(Debug, Serialize)]
pub struct RecognitionRequestView {
    pub id: String,
    pub image_url: String,
    pub plate_number: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub confidence_score: Option<f64>,
    pub detection_confidence: Option<f64>,
    pub ocr_confidence: Option<f64>,
    pub needs_review: bool,
    pub bounding_box: Option<serde_json::Value>,
    pub plate_region: Option<String>,
}

impl RecognitionRequestView {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let bounding_box: Option<String> = row.try_get("bounding_box")?;
        Ok(Self {
            id: row.try_get("id")?,
            image_url: row.try_get("image_url")?,
            plate_number: row.try_get("plate_number")?,
            status: row.try_get("status")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            confidence_score: row.try_get("confidence_score")?,
            detection_confidence: row.try_get("detection_confidence")?,
            ocr_confidence: row.try_get("ocr_confidence")?,
            needs_review: row.try_get("needs_review")?,
            bounding_box: bounding_box.and_then(|text| serde_json::from_str(&text).ok()),
            plate_region: row.try_get("plate_region")?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_page_size")]
    page_size: i64,
}

fn default_page() -> i64 {
    1
}
fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Serialize)]
struct PaginatedResponse {
    items: Vec<RecognitionRequestView>,
    page: i64,
    page_size: i64,
    total: i64,
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "healthy" }))
}

pub async fn create_recognition(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut content_type = String::new();

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::InvalidUpload(e.to_string()))?
    {
        if field.name() != "file" {
            continue;
        }
        content_type = field
            .content_type()
            .map(|m| m.to_string())
            .unwrap_or_default();

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| ApiError::InvalidUpload(e.to_string()))?
        {
            bytes.extend_from_slice(&chunk);
        }
        file_bytes = Some(bytes);
    }

    let bytes = file_bytes.ok_or_else(|| ApiError::InvalidUpload("missing 'file' field".into()))?;
    if !crate::storage::is_image_content_type(&content_type) {
        return Err(ApiError::InvalidUpload(format!(
            "unsupported content type: {content_type}"
        )));
    }

    let request_id = Uuid::new_v4();
    let filename = format!("{request_id}.jpg");
    let image_url = state.storage.save(&filename, &bytes).await?;
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO recognition_requests (id, image_url, status, created_at, updated_at, needs_review) \
         VALUES (?, ?, 'NOT_STARTED', ?, ?, 0)",
    )
    .bind(request_id.to_string())
    .bind(&image_url)
    .bind(&now)
    .bind(&now)
    .execute(&state.pool)
    .await?;

    let _ = state.job_sender.send(QueueMessage { request_id }).await;

    Ok(HttpResponse::Ok().json(CreateResponse {
        request_id,
        status: "NOT_STARTED",
        created_at: now,
    }))
}

pub async fn reprocess(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let request_id = path.into_inner();
    let id_str = request_id.to_string();

    let row = sqlx::query("SELECT status FROM recognition_requests WHERE id = ?")
        .bind(&id_str)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::NotFound(request_id))?;
    let status: String = row.try_get("status")?;
    if status != "FAILED" && status != "NEEDS_REVIEW" {
        return Err(ApiError::ReprocessNotPermitted);
    }

    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "UPDATE recognition_requests \
         SET status = 'NOT_STARTED', plate_number = NULL, error_message = NULL, \
             confidence_score = NULL, detection_confidence = NULL, ocr_confidence = NULL, \
             bounding_box = NULL, plate_region = NULL, needs_review = 0, updated_at = ? \
         WHERE id = ?",
    )
    .bind(&now)
    .bind(&id_str)
    .execute(&state.pool)
    .await?;

    let _ = state.job_sender.send(QueueMessage { request_id }).await;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "request_id": request_id, "status": "NOT_STARTED" })))
}

pub async fn get_recognition(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let request_id = path.into_inner();
    let row = sqlx::query("SELECT * FROM recognition_requests WHERE id = ?")
        .bind(request_id.to_string())
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::NotFound(request_id))?;

    Ok(HttpResponse::Ok().json(RecognitionRequestView::from_row(&row)?))
}

pub async fn list_recognitions(
    state: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    if query.page < 1 || query.page_size < 1 || query.page_size > 100 {
        return Err(ApiError::InvalidUpload(
            "page must be >= 1 and page_size must be in [1, 100]".into(),
        ));
    }
    let (page, page_size) = (query.page, query.page_size);

    let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM recognition_requests")
        .fetch_one(&state.pool)
        .await?
        .try_get("count")?;

    let rows = sqlx::query(
        "SELECT * FROM recognition_requests ORDER BY created_at DESC LIMIT ? OFFSET ?",
    )
    .bind(page_size)
    .bind((page - 1) * page_size)
    .fetch_all(&state.pool)
    .await?;

    let items = rows
        .iter()
        .map(RecognitionRequestView::from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HttpResponse::Ok().json(PaginatedResponse { items, page, page_size, total }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .service(
            web::scope("/api/v1")
                .route("/recognition", web::post().to(create_recognition))
                .route("/recognition", web::get().to(list_recognitions))
                .route("/recognition/{id}/reprocess", web::post().to(reprocess))
                .route("/recognition/{id}", web::get().to(get_recognition)),
        );
}
