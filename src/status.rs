use chrono::{DateTime, Duration, Utc};

use crate::models::StudentStatus;

/// Quiz scores must be strictly above this to pass a check-in.
pub const QUIZ_PASS_OVER: i32 = 7;
/// Focus minutes must be strictly above this to pass a check-in.
pub const FOCUS_PASS_OVER: i32 = 60;

/// How long a student may sit in `needs_intervention` before the
/// fail-safe sweep escalates them.
pub const STALE_AFTER_HOURS: i64 = 12;

pub const FAILSAFE_ASSIGNER: &str = "system_failsafe";
pub const FAILSAFE_TASK: &str =
    "Complete a focused review session and check in with your mentor.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckinOutcome {
    pub passed: bool,
    pub status: StudentStatus,
}

impl CheckinOutcome {
    /// Short label shown on the client's status banner.
    pub fn label(self) -> &'static str {
        if self.passed {
            "On Track"
        } else {
            "Pending Mentor Review"
        }
    }

    pub fn message(self) -> &'static str {
        if self.passed {
            "Great job! Keep up the good work."
        } else {
            "Your mentor has been notified and will review your progress."
        }
    }
}

/// Both thresholds are exclusive: a quiz score of exactly 7 or exactly
/// 60 focus minutes fails.
pub fn evaluate_checkin(quiz_score: i32, focus_minutes: i32) -> CheckinOutcome {
    let passed = quiz_score > QUIZ_PASS_OVER && focus_minutes > FOCUS_PASS_OVER;
    let status = if passed {
        StudentStatus::Normal
    } else {
        StudentStatus::NeedsIntervention
    };
    CheckinOutcome { passed, status }
}

/// Cutoff for the fail-safe sweep: anything not touched since this
/// instant is considered stuck.
pub fn stale_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(STALE_AFTER_HOURS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passing_checkin_keeps_status_normal() {
        let outcome = evaluate_checkin(8, 61);
        assert!(outcome.passed);
        assert_eq!(outcome.status, StudentStatus::Normal);
        assert_eq!(outcome.label(), "On Track");
    }

    #[test]
    fn thresholds_are_exclusive() {
        assert!(!evaluate_checkin(7, 61).passed);
        assert!(!evaluate_checkin(8, 60).passed);
        assert!(!evaluate_checkin(7, 60).passed);
        assert!(evaluate_checkin(8, 61).passed);
    }

    #[test]
    fn failing_either_axis_needs_intervention() {
        let outcome = evaluate_checkin(10, 15);
        assert!(!outcome.passed);
        assert_eq!(outcome.status, StudentStatus::NeedsIntervention);
        assert_eq!(outcome.label(), "Pending Mentor Review");
    }

    #[test]
    fn stale_cutoff_is_twelve_hours_back() {
        let now = Utc::now();
        assert_eq!(now - stale_cutoff(now), Duration::hours(12));
    }
}
