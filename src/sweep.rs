use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db;
use crate::models::StudentEvent;
use crate::state::AppState;
use crate::status;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Background escalation of students stuck in `needs_intervention`.
/// Runs once at startup and then hourly.
pub fn spawn(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            run_once(&state).await;
        }
    })
}

pub async fn run_once(state: &AppState) {
    let cutoff = status::stale_cutoff(Utc::now());
    info!("fail-safe sweep: escalating students untouched since {cutoff}");

    let students = match db::stale_needs_intervention(&state.pool, cutoff).await {
        Ok(students) => students,
        Err(err) => {
            error!("fail-safe sweep query failed: {err}");
            return;
        }
    };

    for student in students {
        // One student's failure never aborts the rest of the batch.
        match db::escalate_stale(&state.pool, student.id).await {
            Ok(Some(intervention)) => {
                info!("fail-safe intervention assigned to student {}", student.id);
                state
                    .notifier
                    .publish(
                        student.id,
                        StudentEvent::InterventionAssigned { intervention },
                    )
                    .await;
            }
            Ok(None) => {
                // Status said needs_intervention but an active task
                // already existed; forced back to remedial, no event.
                warn!(
                    "student {} already had an active intervention, status forced to remedial",
                    student.id
                );
            }
            Err(err) => {
                error!("fail-safe escalation failed for student {}: {err}", student.id);
            }
        }
    }
}
