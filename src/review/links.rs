//! Review link tokens and usability rules

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ReviewLink, ReviewTarget};

/// Length of a generated token (alphanumeric characters)
pub const TOKEN_LENGTH: usize = 40;

/// Default lifetime of a review link
pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Longest lifetime a link may be issued with
pub const MAX_TTL_DAYS: i64 = 365;

pub fn default_ttl() -> Duration {
    Duration::days(DEFAULT_TTL_DAYS)
}

pub fn max_ttl() -> Duration {
    Duration::days(MAX_TTL_DAYS)
}

/// Generate an unguessable token
pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Why a link was refused. Logged only; callers always see one `InvalidLink`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRejection {
    Unknown,
    Revoked,
    Expired,
    Internal,
}

impl LinkRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkRejection::Unknown => "unknown",
            LinkRejection::Revoked => "revoked",
            LinkRejection::Expired => "expired",
            LinkRejection::Internal => "internal",
        }
    }
}

impl ReviewLink {
    /// A fresh externally usable link. Fails if `now + ttl` is not representable.
    pub fn issue(
        target: ReviewTarget,
        work_item_id: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| AppError::Validation("Review link TTL is out of range".to_string()))?;
        Ok(Self {
            expires_at,
            is_active: true,
            internal: false,
            ..Self::internal_tracking(target, work_item_id, now)
        })
    }

    /// An inactive link that only anchors feedback in the audit trail
    pub fn internal_tracking(target: ReviewTarget, work_item_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            token: generate_token(),
            target,
            work_item_id,
            expires_at: now,
            is_active: false,
            internal: true,
            view_count: 0,
            last_viewed_at: None,
            created_at: now,
        }
    }

    /// Usable only while active and strictly before expiry
    pub fn check(&self, now: DateTime<Utc>) -> Result<(), LinkRejection> {
        if self.internal {
            return Err(LinkRejection::Internal);
        }
        if !self.is_active {
            return Err(LinkRejection::Revoked);
        }
        if now >= self.expires_at {
            return Err(LinkRejection::Expired);
        }
        Ok(())
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.check(now).is_ok()
    }
}
