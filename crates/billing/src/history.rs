//! Subscription History Module
//!
//! Append-only log of subscription lifecycle actions. Entries capture every
//! trial and subscription transition and can be used to:
//! - Answer "why does this user have access?" questions
//! - Reconstruct a user's billing history
//! - Back the invoice list shown in the account UI
//!
//! Entries are never mutated or deleted.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Lifecycle actions recorded in the history log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryAction {
    // Trial lifecycle
    TrialStarted,
    TrialInterrupted,
    TrialCanceled,

    // Subscription lifecycle
    SubscriptionCreated,
    SubscriptionChanged,
    SubscriptionCanceled,

    // Invoicing
    InvoicePaid,
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HistoryAction::TrialStarted => "trial_started",
            HistoryAction::TrialInterrupted => "trial_interrupted",
            HistoryAction::TrialCanceled => "trial_canceled",
            HistoryAction::SubscriptionCreated => "subscription_created",
            HistoryAction::SubscriptionChanged => "subscription_changed",
            HistoryAction::SubscriptionCanceled => "subscription_canceled",
            HistoryAction::InvoicePaid => "invoice_paid",
        };
        write!(f, "{}", s)
    }
}

/// A subscription history record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action: String,
    pub old_plan: Option<String>,
    pub new_plan: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub status: Option<String>,
    pub invoice_url: Option<String>,
    pub interval: Option<String>,
    pub stripe_event_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Builder for creating history entries
pub struct HistoryEntryBuilder {
    user_id: Uuid,
    action: HistoryAction,
    old_plan: Option<String>,
    new_plan: Option<String>,
    amount_cents: Option<i64>,
    currency: Option<String>,
    status: Option<String>,
    invoice_url: Option<String>,
    interval: Option<String>,
    stripe_event_id: Option<String>,
}

impl HistoryEntryBuilder {
    /// Create a new entry builder
    pub fn new(user_id: Uuid, action: HistoryAction) -> Self {
        Self {
            user_id,
            action,
            old_plan: None,
            new_plan: None,
            amount_cents: None,
            currency: None,
            status: None,
            invoice_url: None,
            interval: None,
            stripe_event_id: None,
        }
    }

    /// Set the plan the user moved away from
    pub fn old_plan(mut self, plan: impl Into<String>) -> Self {
        self.old_plan = Some(plan.into());
        self
    }

    /// Set the plan the user moved to
    pub fn new_plan(mut self, plan: impl Into<String>) -> Self {
        self.new_plan = Some(plan.into());
        self
    }

    /// Set the amount in minor currency units
    pub fn amount_cents(mut self, amount: i64) -> Self {
        self.amount_cents = Some(amount);
        self
    }

    /// Set the currency code
    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Set a free-form status (e.g. proration direction)
    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Set the hosted invoice URL
    pub fn invoice_url(mut self, url: impl Into<String>) -> Self {
        self.invoice_url = Some(url.into());
        self
    }

    /// Set the billing interval
    pub fn interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = Some(interval.into());
        self
    }

    /// Set the originating Stripe event ID
    pub fn stripe_event(mut self, event_id: impl Into<String>) -> Self {
        self.stripe_event_id = Some(event_id.into());
        self
    }
}

/// Service for appending and querying subscription history
pub struct SubscriptionHistoryLog {
    pool: PgPool,
}

impl SubscriptionHistoryLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a history entry
    pub async fn log(&self, builder: HistoryEntryBuilder) -> BillingResult<Uuid> {
        let entry_id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO subscription_history (
                user_id,
                action,
                old_plan,
                new_plan,
                amount_cents,
                currency,
                status,
                invoice_url,
                interval,
                stripe_event_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(builder.user_id)
        .bind(builder.action.to_string())
        .bind(&builder.old_plan)
        .bind(&builder.new_plan)
        .bind(builder.amount_cents)
        .bind(&builder.currency)
        .bind(&builder.status)
        .bind(&builder.invoice_url)
        .bind(&builder.interval)
        .bind(&builder.stripe_event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(entry_id.0)
    }

    /// Get recent history for a user
    pub async fn get_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<HistoryEntry>> {
        let entries: Vec<HistoryEntry> = sqlx::query_as(
            r#"
            SELECT
                id,
                user_id,
                action,
                old_plan,
                new_plan,
                amount_cents,
                currency,
                status,
                invoice_url,
                interval,
                stripe_event_id,
                created_at
            FROM subscription_history
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Get paid-invoice entries for a user (backs the invoice list)
    pub async fn get_invoices_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<HistoryEntry>> {
        let entries: Vec<HistoryEntry> = sqlx::query_as(
            r#"
            SELECT
                id,
                user_id,
                action,
                old_plan,
                new_plan,
                amount_cents,
                currency,
                status,
                invoice_url,
                interval,
                stripe_event_id,
                created_at
            FROM subscription_history
            WHERE user_id = $1 AND action = $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(HistoryAction::InvoicePaid.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

// Implement FromRow for HistoryEntry
impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for HistoryEntry {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            action: row.try_get("action")?,
            old_plan: row.try_get("old_plan")?,
            new_plan: row.try_get("new_plan")?,
            amount_cents: row.try_get("amount_cents")?,
            currency: row.try_get("currency")?,
            status: row.try_get("status")?,
            invoice_url: row.try_get("invoice_url")?,
            interval: row.try_get("interval")?,
            stripe_event_id: row.try_get("stripe_event_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_action_display() {
        assert_eq!(HistoryAction::TrialStarted.to_string(), "trial_started");
        assert_eq!(
            HistoryAction::TrialInterrupted.to_string(),
            "trial_interrupted"
        );
        assert_eq!(
            HistoryAction::SubscriptionCanceled.to_string(),
            "subscription_canceled"
        );
        assert_eq!(HistoryAction::InvoicePaid.to_string(), "invoice_paid");
    }

    #[test]
    fn test_entry_builder() {
        let user_id = Uuid::new_v4();
        let builder = HistoryEntryBuilder::new(user_id, HistoryAction::SubscriptionChanged)
            .old_plan("Starter")
            .new_plan("Pro")
            .amount_cents(1250)
            .currency("eur")
            .status("payment")
            .interval("month");

        assert_eq!(builder.user_id, user_id);
        assert_eq!(builder.action, HistoryAction::SubscriptionChanged);
        assert_eq!(builder.old_plan, Some("Starter".to_string()));
        assert_eq!(builder.new_plan, Some("Pro".to_string()));
        assert_eq!(builder.amount_cents, Some(1250));
        assert_eq!(builder.status, Some("payment".to_string()));
    }
}
