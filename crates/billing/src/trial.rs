//! Free trial tracking
//!
//! A user gets at most one trial, ever. The used flag is monotonic: once a
//! trial has been started it can never be granted again, even after the
//! trial is interrupted or canceled.

use serde::Serialize;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Compute the trial end date: midnight (UTC) at `days` days after `start`.
/// Day granularity, not time-of-day: a trial started at 15:00 on the 1st
/// with 7 days ends at 00:00 on the 8th.
pub fn trial_end_for(start: OffsetDateTime, days: u32) -> OffsetDateTime {
    let end_day = start.date() + Duration::days(i64::from(days));
    end_day.midnight().assume_utc()
}

/// Whole days remaining until `end`, rounded up. Zero once `end` has passed.
pub fn days_remaining(now: OffsetDateTime, end: OffsetDateTime) -> u32 {
    let seconds = (end - now).whole_seconds();
    if seconds <= 0 {
        return 0;
    }
    ((seconds + 86_399) / 86_400) as u32
}

/// Snapshot of a user's trial state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialStatus {
    pub is_active: bool,
    pub has_used: bool,
    pub canceled: bool,
    pub end_date: Option<OffsetDateTime>,
    pub days_left: Option<u32>,
}

/// Trial service managing the per-user trial window
pub struct TrialService {
    pool: PgPool,
}

impl TrialService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Check whether a user may still start a trial
    pub async fn can_start_trial(&self, user_id: Uuid) -> BillingResult<bool> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT has_trial_used FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((has_used,)) => Ok(!has_used),
            None => Err(BillingError::NotFound(user_id.to_string())),
        }
    }

    /// Start a trial of `days` days. Returns false if the user has already
    /// used their trial. The guard is in the WHERE clause so two concurrent
    /// calls cannot both succeed.
    pub async fn start_trial(&self, user_id: Uuid, days: u32) -> BillingResult<bool> {
        let now = OffsetDateTime::now_utc();
        let end = trial_end_for(now, days);

        let result = sqlx::query(
            r#"
            UPDATE users
            SET is_trial_active = TRUE,
                has_trial_used = TRUE,
                trial_canceled = FALSE,
                trial_start_date = $2,
                trial_end_date = $3,
                updated_at = NOW()
            WHERE id = $1 AND has_trial_used = FALSE
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(end)
        .execute(&self.pool)
        .await?;

        let started = result.rows_affected() > 0;
        if started {
            tracing::info!(
                user_id = %user_id,
                trial_end = %end,
                "Started trial"
            );
        } else {
            tracing::debug!(user_id = %user_id, "Trial already used, not starting");
        }

        Ok(started)
    }

    /// Stop an active trial immediately (used when a paid subscription
    /// begins mid-trial). The end date is pulled back to now.
    pub async fn interrupt_trial(&self, user_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET is_trial_active = FALSE,
                trial_end_date = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(user_id = %user_id, "Interrupted trial");

        Ok(())
    }

    /// Re-activate a trial whose end date is still in the future.
    /// Returns false (no-op) when the window has already closed.
    pub async fn resume_trial(&self, user_id: Uuid) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET is_trial_active = TRUE,
                updated_at = NOW()
            WHERE id = $1
              AND trial_end_date IS NOT NULL
              AND trial_end_date > NOW()
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Report the user's trial state, lazily expiring a trial whose window
    /// has closed. Users with a provider subscription are left alone: the
    /// webhook flow owns their trial transitions.
    pub async fn check_trial_status(&self, user_id: Uuid) -> BillingResult<TrialStatus> {
        let row: Option<(bool, bool, bool, Option<OffsetDateTime>, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT is_trial_active, has_trial_used, trial_canceled,
                       trial_end_date, stripe_subscription_id
                FROM users WHERE id = $1
                "#,
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let (mut is_active, has_used, canceled, end_date, subscription_id) =
            row.ok_or_else(|| BillingError::NotFound(user_id.to_string()))?;

        let now = OffsetDateTime::now_utc();

        let expired = matches!(end_date, Some(end) if end < now);
        if is_active && expired && subscription_id.is_none() {
            sqlx::query(
                "UPDATE users SET is_trial_active = FALSE, updated_at = NOW() WHERE id = $1",
            )
            .bind(user_id)
            .execute(&self.pool)
            .await?;

            tracing::info!(user_id = %user_id, "Deactivated expired trial on read");
            is_active = false;
        }

        let days_left = if is_active {
            end_date.map(|end| days_remaining(now, end))
        } else {
            None
        };

        Ok(TrialStatus {
            is_active,
            has_used,
            canceled,
            end_date,
            days_left,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_trial_end_is_midnight() {
        let start = datetime!(2025-03-01 15:42:07 UTC);
        let end = trial_end_for(start, 7);
        assert_eq!(end, datetime!(2025-03-08 00:00:00 UTC));
    }

    #[test]
    fn test_trial_end_crosses_month_boundary() {
        let start = datetime!(2025-01-28 09:00:00 UTC);
        let end = trial_end_for(start, 7);
        assert_eq!(end, datetime!(2025-02-04 00:00:00 UTC));
    }

    #[test]
    fn test_trial_end_zero_days() {
        let start = datetime!(2025-03-01 15:42:07 UTC);
        let end = trial_end_for(start, 0);
        assert_eq!(end, datetime!(2025-03-01 00:00:00 UTC));
    }

    #[test]
    fn test_days_remaining_rounds_up() {
        let now = datetime!(2025-03-01 12:00:00 UTC);
        // 2.5 days left rounds up to 3
        assert_eq!(days_remaining(now, datetime!(2025-03-04 00:00:00 UTC)), 3);
        // Exactly 2 days stays 2
        assert_eq!(days_remaining(now, datetime!(2025-03-03 12:00:00 UTC)), 2);
    }

    #[test]
    fn test_days_remaining_past_end() {
        let now = datetime!(2025-03-10 00:00:00 UTC);
        assert_eq!(days_remaining(now, datetime!(2025-03-08 00:00:00 UTC)), 0);
        assert_eq!(days_remaining(now, now), 0);
    }
}
