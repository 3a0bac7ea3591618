//! Database-backed fixed-window rate limiting.
//!
//! Requests up to `limit` per window pass; past that they are refused until
//! the window resets; past `2 * limit` the identifier is blocked outright for
//! the block duration.

use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};
use tracing::warn;

use crate::config;
use crate::database::DatabaseError;

#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub limit: u32,
    pub window: Duration,
    pub block: Duration,
}

impl Policy {
    /// Admin and tenant password login attempts.
    pub fn login() -> Self {
        let security = &config::config().security;
        Self {
            limit: security.login_rate_limit,
            window: Duration::seconds(security.login_rate_window_secs),
            block: Duration::seconds(security.login_block_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Window {
    pub count: i32,
    pub reset_at: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: i64 },
    Blocked { until: DateTime<Utc> },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> i64 {
        match self {
            Decision::Allowed { .. } => 0,
            Decision::Limited { retry_after_secs } => *retry_after_secs,
            Decision::Blocked { until } => (*until - now).num_seconds().max(1),
        }
    }
}

/// Classify the window stored after counting a request.
pub fn decide(policy: &Policy, window: &Window, now: DateTime<Utc>) -> Decision {
    if let Some(until) = window.blocked_until {
        if until > now {
            return Decision::Blocked { until };
        }
    }
    let limit = policy.limit as i32;
    if window.count > limit {
        let retry_after_secs = (window.reset_at - now).num_seconds().max(1);
        return Decision::Limited { retry_after_secs };
    }
    Decision::Allowed {
        remaining: (limit - window.count).max(0) as u32,
    }
}

pub struct RateLimiter {
    pool: PgPool,
}

impl RateLimiter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a hit for `identifier` and return whether it may proceed.
    ///
    /// Counting happens in a single upsert so concurrent attempts against
    /// the same identifier serialize on its row:
    /// - an active block is left untouched;
    /// - inside an open window the count goes up, and passing twice the
    ///   limit starts a block;
    /// - otherwise a fresh window opens with a count of one.
    pub async fn hit(&self, identifier: &str, policy: &Policy) -> Result<Decision, DatabaseError> {
        let now = Utc::now();
        let window: Window = sqlx::query_as(
            r#"
            INSERT INTO rate_limits AS r (identifier, count, reset_at, blocked_until, updated_at)
            VALUES ($1, 1, $3, NULL, now())
            ON CONFLICT (identifier) DO UPDATE SET
                count = CASE
                    WHEN r.blocked_until > $2 THEN r.count
                    WHEN r.reset_at > $2 THEN r.count + 1
                    ELSE 1
                END,
                reset_at = CASE
                    WHEN r.blocked_until > $2 OR r.reset_at > $2 THEN r.reset_at
                    ELSE $3
                END,
                blocked_until = CASE
                    WHEN r.blocked_until > $2 THEN r.blocked_until
                    WHEN r.reset_at > $2 AND r.count + 1 > $4 THEN $5
                    ELSE NULL
                END,
                updated_at = now()
            RETURNING count, reset_at, blocked_until
            "#,
        )
        .bind(identifier)
        .bind(now)
        .bind(now + policy.window)
        .bind((policy.limit as i32).saturating_mul(2))
        .bind(now + policy.block)
        .fetch_one(&self.pool)
        .await?;

        let decision = decide(policy, &window, now);
        if !decision.is_allowed() {
            warn!("Rate limit hit for {}: {:?}", identifier, decision);
        }
        Ok(decision)
    }

    /// Forget an identifier, e.g. after a successful login.
    pub async fn reset(&self, identifier: &str) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM rate_limits WHERE identifier = $1")
            .bind(identifier)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop windows that have expired and are not blocking anything.
    pub async fn purge_expired(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM rate_limits WHERE reset_at < now() AND (blocked_until IS NULL OR blocked_until < now())",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> Policy {
        Policy {
            limit: 3,
            window: Duration::minutes(5),
            block: Duration::minutes(10),
        }
    }

    fn window(count: i32, reset_in: Duration, blocked_for: Option<Duration>, now: DateTime<Utc>) -> Window {
        Window {
            count,
            reset_at: now + reset_in,
            blocked_until: blocked_for.map(|d| now + d),
        }
    }

    #[test]
    fn counts_up_to_limit_are_allowed() {
        let now = Utc::now();
        let first = window(1, Duration::minutes(5), None, now);
        assert_eq!(decide(&policy(), &first, now), Decision::Allowed { remaining: 2 });
        let last = window(3, Duration::minutes(5), None, now);
        assert_eq!(decide(&policy(), &last, now), Decision::Allowed { remaining: 0 });
    }

    #[test]
    fn over_limit_waits_for_window_reset() {
        let now = Utc::now();
        let over = window(4, Duration::seconds(90), None, now);
        let decision = decide(&policy(), &over, now);
        assert_eq!(decision, Decision::Limited { retry_after_secs: 90 });
        assert_eq!(decision.retry_after_secs(now), 90);
    }

    #[test]
    fn active_block_wins_over_count() {
        let now = Utc::now();
        let blocked = window(7, Duration::minutes(-1), Some(Duration::minutes(4)), now);
        let decision = decide(&policy(), &blocked, now);
        assert!(matches!(decision, Decision::Blocked { .. }));
        assert_eq!(decision.retry_after_secs(now), 240);
    }

    #[test]
    fn lapsed_block_is_ignored() {
        let now = Utc::now();
        let lapsed = window(1, Duration::minutes(5), Some(Duration::seconds(-1)), now);
        assert!(decide(&policy(), &lapsed, now).is_allowed());
    }
}
