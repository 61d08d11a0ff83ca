//! Lateness evaluation
//!
//! Lateness is derived on every read from the deadline and the elapsed active
//! time. Nothing here writes; persisting `late` is the reconciliation job's call.

use chrono::{DateTime, Duration, Utc};

use super::work_item::WorkItemStatus;

/// Upper bound on `allowed_duration_minutes` (ten years)
pub const MAX_ALLOWED_DURATION_MINUTES: i64 = 10 * 365 * 24 * 60;

pub fn is_late(
    status: WorkItemStatus,
    deadline: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    allowed_duration_minutes: Option<i64>,
    now: DateTime<Utc>,
) -> bool {
    match status {
        WorkItemStatus::Completed | WorkItemStatus::Cancelled => return false,
        WorkItemStatus::Late => return true,
        WorkItemStatus::Active => {
            // A duration chrono cannot represent never runs out
            let allowed = allowed_duration_minutes.and_then(Duration::try_minutes);
            if let (Some(started_at), Some(allowed)) = (started_at, allowed) {
                if now - started_at > allowed {
                    return true;
                }
            }
        }
        _ => {}
    }

    matches!(deadline, Some(deadline) if now > deadline)
}
