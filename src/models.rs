use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Where a student sits in the progress cycle. Drives which screen the
/// mobile client renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    Normal,
    NeedsIntervention,
    Remedial,
}

impl StudentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StudentStatus::Normal => "normal",
            StudentStatus::NeedsIntervention => "needs_intervention",
            StudentStatus::Remedial => "remedial",
        }
    }
}

impl fmt::Display for StudentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StudentStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "normal" => Ok(StudentStatus::Normal),
            "needs_intervention" => Ok(StudentStatus::NeedsIntervention),
            "remedial" => Ok(StudentStatus::Remedial),
            other => Err(anyhow::anyhow!("unknown student status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub status: StudentStatus,
    pub last_checkin: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Roster row with aggregate counts, for the listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StudentSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub status: StudentStatus,
    pub last_checkin: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub total_checkins: i64,
    pub total_interventions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Intervention {
    pub id: Uuid,
    pub student_id: Uuid,
    pub task: String,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Events fanned out to a student's subscriber group. Wire shape is
/// `{"event": "<kind>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StudentEvent {
    StatusUpdate { status: StudentStatus },
    InterventionAssigned { intervention: Intervention },
    InterventionCompleted { interventions: Vec<Intervention> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            StudentStatus::Normal,
            StudentStatus::NeedsIntervention,
            StudentStatus::Remedial,
        ] {
            assert_eq!(status.as_str().parse::<StudentStatus>().unwrap(), status);
        }
        assert!("locked".parse::<StudentStatus>().is_err());
    }

    #[test]
    fn events_serialize_with_tagged_envelope() {
        let event = StudentEvent::StatusUpdate {
            status: StudentStatus::NeedsIntervention,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "status_update");
        assert_eq!(json["data"]["status"], "needs_intervention");
    }

    #[test]
    fn assigned_event_carries_the_intervention() {
        let intervention = Intervention {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            task: "Review chapter 4 with your mentor".to_string(),
            assigned_by: "mentor".to_string(),
            assigned_at: Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap(),
            completed: false,
            completed_at: None,
        };
        let json = serde_json::to_value(StudentEvent::InterventionAssigned { intervention })
            .unwrap();
        assert_eq!(json["event"], "intervention_assigned");
        assert_eq!(
            json["data"]["intervention"]["task"],
            "Review chapter 4 with your mentor"
        );
        assert_eq!(json["data"]["intervention"]["completed"], false);
    }
}
