use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::error::AppError;
use crate::models::{Intervention, Student, StudentEvent, StudentStatus};
use crate::state::AppState;
use crate::status;
use crate::ws;

/// `Json` with the extractor rejection folded into our error taxonomy:
/// a malformed or mistyped body is a validation error (400), not axum's
/// default 422.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
        Ok(AppJson(value))
    }
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origin);

    Router::new()
        .route("/api/students", post(create_student).get(list_students))
        .route("/api/daily-checkin", post(daily_checkin))
        .route("/api/student-status/{id}", get(student_status))
        .route("/api/assign-intervention", post(assign_intervention))
        .route("/api/complete-intervention", post(complete_intervention))
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    if origin == "*" {
        return layer.allow_origin(Any);
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => layer.allow_origin(value),
        Err(_) => {
            warn!("invalid CORS_ORIGIN {origin:?}, falling back to any origin");
            layer.allow_origin(Any)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateStudentRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatedStudentResponse {
    id: Uuid,
    name: String,
    email: String,
    status: StudentStatus,
    created_at: DateTime<Utc>,
}

impl From<Student> for CreatedStudentResponse {
    fn from(student: Student) -> Self {
        Self {
            id: student.id,
            name: student.name,
            email: student.email,
            status: student.status,
            created_at: student.created_at,
        }
    }
}

async fn create_student(
    State(state): State<AppState>,
    AppJson(payload): AppJson<CreateStudentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (name, email) = validate_registration(&payload)?;
    let student = db::create_student(&state.pool, name, email).await?;
    info!("created student {}", student.id);
    Ok((
        StatusCode::CREATED,
        Json(CreatedStudentResponse::from(student)),
    ))
}

async fn list_students(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let summaries = db::list_students(&state.pool).await?;
    Ok(Json(summaries))
}

#[derive(Debug, Deserialize)]
pub struct CheckinRequest {
    pub student_id: Option<Uuid>,
    // Raw JSON values so "not a number" is our 400, not a body rejection.
    pub quiz_score: Option<serde_json::Value>,
    pub focus_minutes: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct CheckinResponse {
    status: &'static str,
    message: &'static str,
    passed: bool,
}

async fn daily_checkin(
    State(state): State<AppState>,
    AppJson(payload): AppJson<CheckinRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (student_id, quiz_score, focus_minutes) = validate_checkin(&payload)?;

    let student = db::find_student(&state.pool, student_id)
        .await?
        .ok_or(AppError::StudentNotFound)?;

    let outcome = status::evaluate_checkin(quiz_score, focus_minutes);
    db::record_checkin(&state.pool, student_id, quiz_score, focus_minutes, outcome.status)
        .await?;

    state
        .notifier
        .publish(
            student_id,
            StudentEvent::StatusUpdate {
                status: outcome.status,
            },
        )
        .await;

    if !outcome.passed {
        // Fire-and-forget: the check-in is already committed and the
        // caller never waits on the hook.
        let webhook = state.webhook.clone();
        tokio::spawn(async move {
            webhook
                .notify_failed_checkin(&student, quiz_score, focus_minutes)
                .await;
        });
    }

    Ok(Json(CheckinResponse {
        status: outcome.label(),
        message: outcome.message(),
        passed: outcome.passed,
    }))
}

#[derive(Debug, Serialize)]
struct StudentStatusResponse {
    #[serde(flatten)]
    student: Student,
    current_task: Option<String>,
    current_intervention: Option<Intervention>,
}

async fn student_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let student = db::find_student(&state.pool, id)
        .await?
        .ok_or(AppError::StudentNotFound)?;

    let current_intervention = db::active_intervention(&state.pool, id).await?;
    let current_task = current_intervention
        .as_ref()
        .map(|intervention| intervention.task.clone());

    Ok(Json(StudentStatusResponse {
        student,
        current_task,
        current_intervention,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AssignInterventionRequest {
    pub student_id: Option<Uuid>,
    pub task_description: Option<String>,
    pub assigned_by: Option<String>,
}

#[derive(Debug, Serialize)]
struct InterventionResponse {
    success: bool,
    message: &'static str,
    intervention: Intervention,
}

async fn assign_intervention(
    State(state): State<AppState>,
    AppJson(payload): AppJson<AssignInterventionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (student_id, task) = validate_assignment(&payload)?;
    let assigned_by = payload.assigned_by.as_deref().unwrap_or("mentor");

    db::find_student(&state.pool, student_id)
        .await?
        .ok_or(AppError::StudentNotFound)?;

    let assignment = db::assign_intervention(&state.pool, student_id, task, assigned_by).await?;

    // Re-assigning over an active intervention creates no new row but
    // still republishes the existing one.
    let (code, message, intervention) = match assignment {
        db::Assignment::Created(intervention) => {
            info!("intervention assigned to student {student_id}");
            (
                StatusCode::CREATED,
                "Intervention assigned successfully",
                intervention,
            )
        }
        db::Assignment::Existing(intervention) => {
            warn!("student {student_id} already has an active intervention");
            (
                StatusCode::OK,
                "Student already had an active intervention",
                intervention,
            )
        }
    };

    state
        .notifier
        .publish(
            student_id,
            StudentEvent::InterventionAssigned {
                intervention: intervention.clone(),
            },
        )
        .await;

    Ok((
        code,
        Json(InterventionResponse {
            success: true,
            message,
            intervention,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CompleteInterventionRequest {
    pub student_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct CompletionResponse {
    success: bool,
    message: &'static str,
    completed: Vec<Intervention>,
}

async fn complete_intervention(
    State(state): State<AppState>,
    AppJson(payload): AppJson<CompleteInterventionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = payload
        .student_id
        .ok_or_else(|| AppError::Validation("student_id is required".to_string()))?;

    let completed = db::complete_interventions(&state.pool, student_id).await?;
    if completed.is_empty() {
        return Err(AppError::NoActiveIntervention);
    }

    info!("intervention completed for student {student_id}");
    state
        .notifier
        .publish(
            student_id,
            StudentEvent::InterventionCompleted {
                interventions: completed.clone(),
            },
        )
        .await;

    Ok(Json(CompletionResponse {
        success: true,
        message: "Intervention completed successfully",
        completed,
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match db::ping(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "database": "connected",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ),
        Err(err) => {
            warn!("health check failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "database": "disconnected",
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                })),
            )
        }
    }
}

fn validate_registration(payload: &CreateStudentRequest) -> Result<(&str, &str), AppError> {
    let name = payload
        .name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::Validation("name and email required".to_string()))?;
    let email = payload
        .email
        .as_deref()
        .filter(|email| !email.trim().is_empty())
        .ok_or_else(|| AppError::Validation("name and email required".to_string()))?;
    Ok((name, email))
}

fn numeric_field(value: Option<&serde_json::Value>, field: &str) -> Result<i32, AppError> {
    value
        .and_then(serde_json::Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| AppError::Validation(format!("{field} must be a number")))
}

fn validate_checkin(payload: &CheckinRequest) -> Result<(Uuid, i32, i32), AppError> {
    let student_id = payload
        .student_id
        .ok_or_else(|| AppError::Validation("student_id is required".to_string()))?;
    let quiz_score = numeric_field(payload.quiz_score.as_ref(), "quiz_score")?;
    let focus_minutes = numeric_field(payload.focus_minutes.as_ref(), "focus_minutes")?;
    Ok((student_id, quiz_score, focus_minutes))
}

fn validate_assignment(
    payload: &AssignInterventionRequest,
) -> Result<(Uuid, &str), AppError> {
    let student_id = payload.student_id.ok_or_else(|| {
        AppError::Validation("student_id and task_description are required".to_string())
    })?;
    let task = payload
        .task_description
        .as_deref()
        .filter(|task| !task.trim().is_empty())
        .ok_or_else(|| {
            AppError::Validation("student_id and task_description are required".to_string())
        })?;
    Ok((student_id, task))
}
