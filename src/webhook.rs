use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::models::Student;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct FailedCheckinPayload<'a> {
    student_id: uuid::Uuid,
    student_name: &'a str,
    student_email: &'a str,
    quiz_score: i32,
    focus_minutes: i32,
    timestamp: String,
}

/// Outbound notification to the mentor automation webhook. Strictly
/// fire-and-forget: failures are logged and never retried, and the
/// check-in that triggered the call has already been committed.
#[derive(Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    url: Option<String>,
}

impl WebhookClient {
    pub fn new(url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }

    pub async fn notify_failed_checkin(
        &self,
        student: &Student,
        quiz_score: i32,
        focus_minutes: i32,
    ) {
        let Some(url) = &self.url else {
            return;
        };

        let payload = FailedCheckinPayload {
            student_id: student.id,
            student_name: &student.name,
            student_email: &student.email,
            quiz_score,
            focus_minutes,
            timestamp: Utc::now().to_rfc3339(),
        };

        let result = self
            .http
            .post(url.as_str())
            .timeout(WEBHOOK_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => info!("webhook triggered for student {}", student.id),
            Err(err) => warn!("webhook error for student {}: {err}", student.id),
        }
    }
}
