//! Trial expiry sweeps
//!
//! Runs hourly from the scheduler. Three sweeps per tick. Expiry compares
//! against the exact end timestamp; the reminder sweeps compare on
//! calendar days and claim rows by stamping `trial_reminder_sent_on` in
//! the same UPDATE, so each user gets at most one reminder per matching
//! day. The expiry sweep is naturally once-only because it flips
//! `is_trial_active`.

use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use plume_billing::BillingEmailService;

/// Run all trial sweeps once
pub async fn run_trial_sweeps(pool: &PgPool, email: &BillingEmailService) {
    expire_ended_trials(pool, email).await;
    send_last_day_reminders(pool, email).await;
    for days_left in [2u32, 3] {
        send_ending_soon_reminders(pool, email, days_left).await;
    }
}

/// Sweep 1: deactivate canceled trials whose window has closed without a
/// subscription and tell the user. Uncanceled trials are left to the
/// lazy on-read expiry.
async fn expire_ended_trials(pool: &PgPool, email: &BillingEmailService) {
    let expired: Vec<(Uuid, String)> = match sqlx::query_as(
        r#"
        UPDATE users
        SET is_trial_active = FALSE, updated_at = NOW()
        WHERE is_trial_active = TRUE
          AND trial_canceled = TRUE
          AND trial_end_date IS NOT NULL
          AND trial_end_date < NOW()
          AND stripe_subscription_id IS NULL
        RETURNING id, email
        "#,
    )
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "Failed to expire ended trials");
            return;
        }
    };

    if expired.is_empty() {
        return;
    }

    info!(count = expired.len(), "Expired ended trials");

    for (user_id, user_email) in expired {
        if let Err(e) = email.send_trial_ended(&user_email).await {
            error!(user_id = %user_id, error = %e, "Failed to send trial ended email");
        }
    }
}

/// Sweep 2: trial ends tomorrow, send the last-day warning.
async fn send_last_day_reminders(pool: &PgPool, email: &BillingEmailService) {
    let due: Vec<(Uuid, String)> = match sqlx::query_as(
        r#"
        UPDATE users
        SET trial_reminder_sent_on = CURRENT_DATE, updated_at = NOW()
        WHERE is_trial_active = TRUE
          AND trial_end_date IS NOT NULL
          AND trial_end_date::date = CURRENT_DATE + 1
          AND (trial_reminder_sent_on IS NULL OR trial_reminder_sent_on < CURRENT_DATE)
        RETURNING id, email
        "#,
    )
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "Failed to claim last-day trial reminders");
            return;
        }
    };

    if due.is_empty() {
        return;
    }

    info!(count = due.len(), "Sending last-day trial reminders");

    for (user_id, user_email) in due {
        if let Err(e) = email.send_trial_last_day(&user_email).await {
            error!(user_id = %user_id, error = %e, "Failed to send last day email");
        }
    }
}

/// Sweep 3: trial ends in exactly `days_left` days, send the countdown
/// reminder.
async fn send_ending_soon_reminders(pool: &PgPool, email: &BillingEmailService, days_left: u32) {
    let due: Vec<(Uuid, String)> = match sqlx::query_as(
        r#"
        UPDATE users
        SET trial_reminder_sent_on = CURRENT_DATE, updated_at = NOW()
        WHERE is_trial_active = TRUE
          AND trial_end_date IS NOT NULL
          AND trial_end_date::date = CURRENT_DATE + $1
          AND (trial_reminder_sent_on IS NULL OR trial_reminder_sent_on < CURRENT_DATE)
        RETURNING id, email
        "#,
    )
    .bind(days_left as i32)
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            error!(days_left = days_left, error = %e, "Failed to claim trial reminders");
            return;
        }
    };

    if due.is_empty() {
        return;
    }

    info!(
        count = due.len(),
        days_left = days_left,
        "Sending trial ending soon reminders"
    );

    for (user_id, user_email) in due {
        if let Err(e) = email.send_trial_ending(&user_email, days_left).await {
            error!(user_id = %user_id, error = %e, "Failed to send trial ending email");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plume_shared::db::create_pool;

    async fn insert_trial_user(
        pool: &PgPool,
        email: &str,
        canceled: bool,
        ended: bool,
    ) -> Uuid {
        let offset = if ended { "- INTERVAL '2 hours'" } else { "+ INTERVAL '2 hours'" };
        let sql = format!(
            "INSERT INTO users (email, is_trial_active, has_trial_used, trial_canceled, \
             trial_start_date, trial_end_date) \
             VALUES ($1, TRUE, TRUE, $2, NOW() - INTERVAL '7 days', NOW() {offset}) \
             RETURNING id"
        );
        let (id,): (Uuid,) = sqlx::query_as(&sql)
            .bind(email)
            .bind(canceled)
            .fetch_one(pool)
            .await
            .expect("insert user");
        id
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_expiry_sweep_only_takes_canceled_ended_trials() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = create_pool(&url).await.expect("pool");
        let email = BillingEmailService::from_env();

        let canceled_ended =
            insert_trial_user(&pool, "sweep-canceled-ended@test.invalid", true, true).await;
        let canceled_running =
            insert_trial_user(&pool, "sweep-canceled-running@test.invalid", true, false).await;
        let uncanceled_ended =
            insert_trial_user(&pool, "sweep-uncanceled-ended@test.invalid", false, true).await;

        expire_ended_trials(&pool, &email).await;

        let active_of = |id: Uuid| {
            let pool = pool.clone();
            async move {
                let (active,): (bool,) =
                    sqlx::query_as("SELECT is_trial_active FROM users WHERE id = $1")
                        .bind(id)
                        .fetch_one(&pool)
                        .await
                        .expect("fetch user");
                active
            }
        };

        // Only the canceled trial past its end gets swept; a running
        // canceled trial and an uncanceled ended trial both stay active
        assert!(!active_of(canceled_ended).await);
        assert!(active_of(canceled_running).await);
        assert!(active_of(uncanceled_ended).await);

        for id in [canceled_ended, canceled_running, uncanceled_ended] {
            sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id)
                .execute(&pool)
                .await
                .expect("cleanup");
        }
    }
}
