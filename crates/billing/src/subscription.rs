//! Subscription reconciliation
//!
//! Trial fields, the Stripe subscription link, and the Stripe period end
//! live on the user row and can disagree (webhooks lag, trials outlive the
//! checkout that replaced them). Everything user-facing is therefore derived
//! through one pure projection: the row is first collapsed into a
//! [`SubscriptionPhase`], and cancellation/expiry are computed from that
//! phase, never from the raw fields. A started paid period always wins over
//! stale trial data.
//!
//! Commands (create, change, cancel) live here too. Create deliberately
//! mutates nothing locally: the user row is only updated when the
//! `checkout.session.completed` webhook confirms payment.

use serde::Serialize;
use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionSubscriptionData, Invoice, Subscription, SubscriptionId,
    UpdateSubscription, UpdateSubscriptionItems,
};
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use time::OffsetDateTime;
use uuid::Uuid;

use plume_shared::{PlanInterval, User};

use crate::client::StripeClient;
use crate::customer::CustomerService;
use crate::error::{BillingError, BillingResult};
use crate::history::{HistoryAction, HistoryEntryBuilder, SubscriptionHistoryLog};
use crate::plans::Plan;
use crate::trial::{days_remaining, TrialService};

// =============================================================================
// Pure projection
// =============================================================================

/// Billing-relevant fields of a user row, as read at one instant
#[derive(Debug, Clone)]
pub struct BillingSnapshot {
    pub is_trial_active: bool,
    pub trial_canceled: bool,
    pub trial_end_date: Option<OffsetDateTime>,
    pub has_subscription: bool,
    pub current_period_end: Option<OffsetDateTime>,
}

/// The one authoritative reading of a user's subscription state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPhase {
    /// Never subscribed, or trial window closed without payment
    Unsubscribed,
    OnTrial {
        end_date: OffsetDateTime,
        canceled: bool,
    },
    Paid {
        period_end: Option<OffsetDateTime>,
        /// Set when the subscription link is gone but a paid period remains
        canceled: bool,
    },
}

impl SubscriptionPhase {
    /// Collapse raw row fields into a phase. Paid state takes precedence
    /// over trial fields, an inactive trial counts as unsubscribed.
    pub fn from_snapshot(s: &BillingSnapshot) -> Self {
        if s.has_subscription {
            return Self::Paid {
                period_end: s.current_period_end,
                canceled: false,
            };
        }
        if let Some(period_end) = s.current_period_end {
            return Self::Paid {
                period_end: Some(period_end),
                canceled: true,
            };
        }
        if s.is_trial_active {
            if let Some(end_date) = s.trial_end_date {
                return Self::OnTrial {
                    end_date,
                    canceled: s.trial_canceled,
                };
            }
        }
        Self::Unsubscribed
    }
}

/// Derived access view computed from a phase at a given instant
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessProjection {
    pub is_canceled: bool,
    /// When cancellation was requested, the date access actually stops
    pub access_ends_at: Option<OffsetDateTime>,
    pub active_until: Option<OffsetDateTime>,
    pub is_expired: bool,
    pub is_trial: bool,
    pub trial_days_left: Option<u32>,
}

/// Project a snapshot to its access view. Pure: all time handling goes
/// through the `now` argument.
pub fn project_access(snapshot: &BillingSnapshot, now: OffsetDateTime) -> AccessProjection {
    let phase = SubscriptionPhase::from_snapshot(snapshot);

    // Cancellation is read off the raw trial fields before the phase
    // collapse: a canceled-but-running trial reports as canceled with
    // access to the trial's natural end even when provider fields are
    // already populated. The phase keeps Paid-wins precedence for the
    // entitlement window below.
    let (is_canceled, access_ends_at) = if snapshot.is_trial_active && snapshot.trial_canceled {
        (true, snapshot.trial_end_date)
    } else if !snapshot.has_subscription && snapshot.current_period_end.is_some() {
        (true, snapshot.current_period_end)
    } else {
        (false, None)
    };

    let (active_until, is_trial, trial_days_left) = match phase {
        SubscriptionPhase::Unsubscribed => (None, false, None),
        SubscriptionPhase::OnTrial { end_date, .. } => {
            (Some(end_date), true, Some(days_remaining(now, end_date)))
        }
        SubscriptionPhase::Paid { period_end, .. } => (period_end, false, None),
    };

    // No end date at all means nothing was ever granted
    let is_expired = match active_until {
        Some(end) => end < now,
        None => true,
    };

    AccessProjection {
        is_canceled,
        access_ends_at,
        active_until,
        is_expired,
        is_trial,
        trial_days_left,
    }
}

/// Trial days to grant in a checkout session. Mid-trial users keep their
/// remaining days, first-timers get the full default, everyone else zero.
pub fn trial_days_to_grant(
    has_trial_used: bool,
    is_trial_active: bool,
    trial_end_date: Option<OffsetDateTime>,
    now: OffsetDateTime,
    default_days: u32,
) -> u32 {
    if has_trial_used {
        return 0;
    }
    if is_trial_active {
        if let Some(end) = trial_end_date {
            if end > now {
                return days_remaining(now, end);
            }
        }
    }
    default_days
}

/// Direction of a proration invoice after a plan change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProrationAdjustment {
    Payment,
    Refund,
    None,
}

impl ProrationAdjustment {
    pub fn from_total_cents(total: i64) -> Self {
        match total {
            t if t > 0 => Self::Payment,
            t if t < 0 => Self::Refund,
            _ => Self::None,
        }
    }
}

impl std::fmt::Display for ProrationAdjustment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Payment => write!(f, "payment"),
            Self::Refund => write!(f, "refund"),
            Self::None => write!(f, "none"),
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

/// Response for creating a checkout session
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

impl From<CheckoutSession> for CheckoutResponse {
    fn from(session: CheckoutSession) -> Self {
        Self {
            session_id: session.id.to_string(),
            url: session.url,
        }
    }
}

/// Result of a plan change, including the proration report
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeOutcome {
    pub plan_name: String,
    pub proration_amount_cents: Option<i64>,
    pub adjustment: ProrationAdjustment,
    pub currency: Option<String>,
    pub invoice_url: Option<String>,
    pub status: String,
}

/// What a cancel request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Trial flagged canceled, access keeps running to the trial's end
    TrialCanceled,
    /// Paid subscription set to cancel at period end
    SubscriptionCanceled,
}

/// Plan columns joined into the status view
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPlan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub usage_limit: Option<i32>,
}

/// Full status view: trial fields, plan join, and the access projection
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatusView {
    pub is_trial_active: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_start_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_end_date: Option<OffsetDateTime>,
    pub trial_canceled: bool,
    pub stripe_subscription_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub stripe_current_period_end: Option<OffsetDateTime>,
    pub plan: Option<StatusPlan>,
    pub is_canceled: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub access_ends_at: Option<OffsetDateTime>,
}

/// Compact view backing the customer-facing "current subscription" panel
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSubscription {
    pub plan_id: Option<Uuid>,
    pub plan_name: Option<String>,
    pub usage_limit: Option<i32>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub active_until: Option<OffsetDateTime>,
    pub is_trial: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_end_date: Option<OffsetDateTime>,
    pub trial_days_left: Option<u32>,
    pub is_expired: bool,
    pub is_canceled: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub access_ends_at: Option<OffsetDateTime>,
}

// =============================================================================
// Service
// =============================================================================

/// Subscription service: projection reads plus create/change/cancel commands
pub struct SubscriptionService {
    stripe: StripeClient,
    pool: PgPool,
    history: SubscriptionHistoryLog,
}

fn snapshot_of(user: &User) -> BillingSnapshot {
    BillingSnapshot {
        is_trial_active: user.is_trial_active,
        trial_canceled: user.trial_canceled,
        trial_end_date: user.trial_end_date,
        has_subscription: user.stripe_subscription_id.is_some(),
        current_period_end: user.stripe_current_period_end,
    }
}

impl SubscriptionService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            history: SubscriptionHistoryLog::new(pool.clone()),
            stripe,
            pool,
        }
    }

    async fn get_user(&self, user_id: Uuid) -> BillingResult<User> {
        let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| BillingError::NotFound(user_id.to_string()))
    }

    async fn get_plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as("SELECT * FROM subscription_plans WHERE id = $1")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await?;

        plan.ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))
    }

    /// Open a checkout session for a new subscription. Local state is not
    /// touched here: the webhook persists everything once payment clears.
    pub async fn create_subscription(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        interval: PlanInterval,
    ) -> BillingResult<CheckoutResponse> {
        let user = self.get_user(user_id).await?;
        let plan = self.get_plan(plan_id).await?;

        let price_id = plan
            .price_id_for_interval(interval)
            .ok_or_else(|| BillingError::MissingPriceForInterval(interval.to_string()))?
            .to_string();

        let customers = CustomerService::new(self.stripe.clone(), self.pool.clone());
        let customer = customers
            .get_or_create_customer(user_id, &user.email, user.name.as_deref())
            .await?;

        let trial_days = trial_days_to_grant(
            user.has_trial_used,
            user.is_trial_active,
            user.trial_end_date,
            OffsetDateTime::now_utc(),
            self.stripe.config().free_trial_days,
        );

        let base_url = &self.stripe.config().app_base_url;
        let success_url = format!(
            "{}/subscription/success?session_id={{CHECKOUT_SESSION_ID}}",
            base_url
        );
        let cancel_url = format!("{}/subscription/cancel", base_url);

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("userId".to_string(), user_id.to_string());
        metadata.insert("planId".to_string(), plan.id.to_string());
        metadata.insert("interval".to_string(), interval.to_string());

        let subscription_data = if trial_days > 0 {
            Some(CreateCheckoutSessionSubscriptionData {
                trial_period_days: Some(trial_days),
                ..Default::default()
            })
        } else {
            None
        };

        let params = CreateCheckoutSession {
            customer: Some(customer.id.clone()),
            mode: Some(CheckoutSessionMode::Subscription),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(price_id),
                quantity: Some(interval.quantity()),
                ..Default::default()
            }]),
            success_url: Some(&success_url),
            cancel_url: Some(&cancel_url),
            metadata: Some(metadata),
            subscription_data,
            ..Default::default()
        };

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        tracing::info!(
            user_id = %user_id,
            plan_id = %plan.id,
            session_id = %session.id,
            interval = %interval,
            trial_days = trial_days,
            "Created subscription checkout session"
        );

        Ok(session.into())
    }

    /// Move an existing subscription to a new plan/interval in place,
    /// with prorations, and report the resulting adjustment invoice.
    pub async fn change_subscription(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        interval: PlanInterval,
    ) -> BillingResult<ChangeOutcome> {
        let user = self.get_user(user_id).await?;

        let sub_id = user
            .stripe_subscription_id
            .as_deref()
            .ok_or_else(|| {
                BillingError::SubscriptionRequired("no active subscription to change".to_string())
            })?
            .parse::<SubscriptionId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))?;

        let plan = self.get_plan(plan_id).await?;
        let price_id = plan
            .price_id_for_interval(interval)
            .ok_or_else(|| BillingError::MissingPriceForInterval(interval.to_string()))?
            .to_string();

        // Current subscription, for the item ID to swap
        let current = Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;
        let item_id = current
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| BillingError::Internal("No subscription items found".to_string()))?;

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("interval".to_string(), interval.to_string());

        let params = UpdateSubscription {
            cancel_at_period_end: Some(false),
            items: Some(vec![UpdateSubscriptionItems {
                id: Some(item_id),
                price: Some(price_id),
                quantity: Some(interval.quantity()),
                ..Default::default()
            }]),
            metadata: Some(metadata),
            proration_behavior: Some(SubscriptionProrationBehavior::CreateProrations),
            ..Default::default()
        };

        let updated = Subscription::update(self.stripe.inner(), &sub_id, params).await?;

        sqlx::query("UPDATE users SET plan_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(plan.id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        // Proration report from the invoice the update generated
        let mut proration_amount_cents = None;
        let mut adjustment = ProrationAdjustment::None;
        let mut currency = None;
        let mut invoice_url = None;
        if let Some(latest_invoice) = &updated.latest_invoice {
            let invoice =
                Invoice::retrieve(self.stripe.inner(), &latest_invoice.id(), &[]).await?;
            if let Some(total) = invoice.total {
                proration_amount_cents = Some(total);
                adjustment = ProrationAdjustment::from_total_cents(total);
            }
            currency = invoice.currency.map(|c| c.to_string());
            invoice_url = invoice.hosted_invoice_url;
        }

        let status = updated.status.to_string();

        let mut entry = HistoryEntryBuilder::new(user_id, HistoryAction::SubscriptionChanged)
            .new_plan(&plan.name)
            .status(adjustment.to_string())
            .interval(interval.to_string());
        if let Some(old_plan) = user.plan_id {
            entry = entry.old_plan(old_plan.to_string());
        }
        if let Some(amount) = proration_amount_cents {
            entry = entry.amount_cents(amount);
        }
        if let Some(currency) = &currency {
            entry = entry.currency(currency.clone());
        }
        if let Some(url) = &invoice_url {
            entry = entry.invoice_url(url.clone());
        }
        self.history.log(entry).await?;

        tracing::info!(
            user_id = %user_id,
            plan_id = %plan.id,
            subscription_id = %updated.id,
            adjustment = %adjustment,
            "Changed subscription plan"
        );

        Ok(ChangeOutcome {
            plan_name: plan.name,
            proration_amount_cents,
            adjustment,
            currency,
            invoice_url,
            status,
        })
    }

    /// Cancel whatever the user currently has. Trial users keep access to
    /// the trial's natural end; paid users keep access to the period end,
    /// and the local subscription link is cleared right away.
    pub async fn cancel_subscription(&self, user_id: Uuid) -> BillingResult<CancelOutcome> {
        let user = self.get_user(user_id).await?;

        let sub_id = match &user.stripe_subscription_id {
            None if user.is_trial_active => {
                sqlx::query(
                    "UPDATE users SET trial_canceled = TRUE, updated_at = NOW() WHERE id = $1",
                )
                .bind(user_id)
                .execute(&self.pool)
                .await?;

                self.history
                    .log(
                        HistoryEntryBuilder::new(user_id, HistoryAction::TrialCanceled)
                            .old_plan("trial")
                            .status("canceled"),
                    )
                    .await?;

                tracing::info!(user_id = %user_id, "Canceled trial (deferred to trial end)");

                return Ok(CancelOutcome::TrialCanceled);
            }
            None => {
                return Err(BillingError::SubscriptionRequired(
                    "no active subscription to cancel".to_string(),
                ))
            }
            Some(id) => id
                .parse::<SubscriptionId>()
                .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))?,
        };

        let params = UpdateSubscription {
            cancel_at_period_end: Some(true),
            ..Default::default()
        };
        Subscription::update(self.stripe.inner(), &sub_id, params).await?;

        // Clear the link, keep the period end so access runs out naturally
        sqlx::query(
            "UPDATE users SET stripe_subscription_id = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let mut entry = HistoryEntryBuilder::new(user_id, HistoryAction::SubscriptionCanceled)
            .status("canceled");
        if let Some(old_plan) = user.plan_id {
            entry = entry.old_plan(old_plan.to_string());
        }
        self.history.log(entry).await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %sub_id,
            "Canceled subscription at period end"
        );

        Ok(CancelOutcome::SubscriptionCanceled)
    }

    /// Trial fields, plan join, and cancellation projection
    pub async fn get_status(&self, user_id: Uuid) -> BillingResult<SubscriptionStatusView> {
        // Lazily expire an overrun trial before reading, so the view never
        // reports a trial the scheduler has not swept yet
        let trials = TrialService::new(self.pool.clone());
        trials.check_trial_status(user_id).await?;

        let user = self.get_user(user_id).await?;

        let plan = match user.plan_id {
            Some(plan_id) => {
                let row: Option<(Uuid, String, Option<String>, Option<i32>)> = sqlx::query_as(
                    "SELECT id, name, description, usage_limit FROM subscription_plans WHERE id = $1",
                )
                .bind(plan_id)
                .fetch_optional(&self.pool)
                .await?;
                row.map(|(id, name, description, usage_limit)| StatusPlan {
                    id,
                    name,
                    description,
                    usage_limit,
                })
            }
            None => None,
        };

        let projection = project_access(&snapshot_of(&user), OffsetDateTime::now_utc());

        Ok(SubscriptionStatusView {
            is_trial_active: user.is_trial_active,
            trial_start_date: user.trial_start_date,
            trial_end_date: user.trial_end_date,
            trial_canceled: user.trial_canceled,
            stripe_subscription_id: user.stripe_subscription_id,
            stripe_current_period_end: user.stripe_current_period_end,
            plan,
            is_canceled: projection.is_canceled,
            access_ends_at: projection.access_ends_at,
        })
    }

    /// The customer-facing view: plan, expiry, and trial countdown
    pub async fn get_current(&self, user_id: Uuid) -> BillingResult<CurrentSubscription> {
        let status = self.get_status(user_id).await?;
        let user = self.get_user(user_id).await?;

        let projection = project_access(&snapshot_of(&user), OffsetDateTime::now_utc());

        Ok(CurrentSubscription {
            plan_id: status.plan.as_ref().map(|p| p.id),
            plan_name: status.plan.as_ref().map(|p| p.name.clone()),
            usage_limit: status.plan.as_ref().and_then(|p| p.usage_limit),
            active_until: projection.active_until,
            is_trial: projection.is_trial,
            trial_end_date: if projection.is_trial {
                user.trial_end_date
            } else {
                None
            },
            trial_days_left: projection.trial_days_left,
            is_expired: projection.is_expired,
            is_canceled: projection.is_canceled,
            access_ends_at: projection.access_ends_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn snapshot() -> BillingSnapshot {
        BillingSnapshot {
            is_trial_active: false,
            trial_canceled: false,
            trial_end_date: None,
            has_subscription: false,
            current_period_end: None,
        }
    }

    const NOW: OffsetDateTime = datetime!(2025-06-15 12:00:00 UTC);

    #[test]
    fn test_phase_unsubscribed() {
        assert_eq!(
            SubscriptionPhase::from_snapshot(&snapshot()),
            SubscriptionPhase::Unsubscribed
        );
    }

    #[test]
    fn test_phase_inactive_trial_is_unsubscribed() {
        let s = BillingSnapshot {
            trial_end_date: Some(datetime!(2025-06-01 00:00:00 UTC)),
            ..snapshot()
        };
        assert_eq!(
            SubscriptionPhase::from_snapshot(&s),
            SubscriptionPhase::Unsubscribed
        );
    }

    #[test]
    fn test_phase_paid_wins_over_trial() {
        let s = BillingSnapshot {
            is_trial_active: true,
            trial_end_date: Some(datetime!(2025-06-20 00:00:00 UTC)),
            has_subscription: true,
            current_period_end: Some(datetime!(2025-07-15 00:00:00 UTC)),
            ..snapshot()
        };
        assert_eq!(
            SubscriptionPhase::from_snapshot(&s),
            SubscriptionPhase::Paid {
                period_end: Some(datetime!(2025-07-15 00:00:00 UTC)),
                canceled: false,
            }
        );
    }

    #[test]
    fn test_phase_canceled_paid_without_link() {
        // Subscription link cleared at cancel, period end retained
        let s = BillingSnapshot {
            current_period_end: Some(datetime!(2025-07-01 00:00:00 UTC)),
            ..snapshot()
        };
        assert_eq!(
            SubscriptionPhase::from_snapshot(&s),
            SubscriptionPhase::Paid {
                period_end: Some(datetime!(2025-07-01 00:00:00 UTC)),
                canceled: true,
            }
        );
    }

    #[test]
    fn test_project_deferred_trial_cancellation() {
        let end = datetime!(2025-06-20 00:00:00 UTC);
        let s = BillingSnapshot {
            is_trial_active: true,
            trial_canceled: true,
            trial_end_date: Some(end),
            ..snapshot()
        };
        let p = project_access(&s, NOW);
        assert!(p.is_canceled);
        assert_eq!(p.access_ends_at, Some(end));
        // Access persists to the trial's natural end
        assert!(!p.is_expired);
        assert!(p.is_trial);
    }

    #[test]
    fn test_project_canceled_trial_wins_over_subscription_link() {
        // Webhook lag can leave a provider subscription next to a canceled
        // trial, the cancellation still reports with the trial's end date
        let trial_end = datetime!(2025-06-20 00:00:00 UTC);
        let s = BillingSnapshot {
            is_trial_active: true,
            trial_canceled: true,
            trial_end_date: Some(trial_end),
            has_subscription: true,
            current_period_end: Some(datetime!(2025-07-15 00:00:00 UTC)),
            ..snapshot()
        };
        let p = project_access(&s, NOW);
        assert!(p.is_canceled);
        assert_eq!(p.access_ends_at, Some(trial_end));
        // Entitlement window still follows the paid period
        assert_eq!(p.active_until, Some(datetime!(2025-07-15 00:00:00 UTC)));
        assert!(!p.is_trial);
    }

    #[test]
    fn test_project_canceled_trial_wins_over_period_end() {
        let trial_end = datetime!(2025-06-20 00:00:00 UTC);
        let s = BillingSnapshot {
            is_trial_active: true,
            trial_canceled: true,
            trial_end_date: Some(trial_end),
            current_period_end: Some(datetime!(2025-07-15 00:00:00 UTC)),
            ..snapshot()
        };
        let p = project_access(&s, NOW);
        assert!(p.is_canceled);
        assert_eq!(p.access_ends_at, Some(trial_end));
    }

    #[test]
    fn test_project_canceled_paid_keeps_access_until_period_end() {
        let period_end = datetime!(2025-07-01 00:00:00 UTC);
        let s = BillingSnapshot {
            current_period_end: Some(period_end),
            ..snapshot()
        };
        let p = project_access(&s, NOW);
        assert!(p.is_canceled);
        assert_eq!(p.access_ends_at, Some(period_end));
        assert!(!p.is_expired);
        assert_eq!(p.active_until, Some(period_end));

        // After the period end, access has expired
        let later = datetime!(2025-07-02 00:00:00 UTC);
        assert!(project_access(&s, later).is_expired);
    }

    #[test]
    fn test_project_no_end_date_is_expired() {
        let p = project_access(&snapshot(), NOW);
        assert!(p.is_expired);
        assert!(!p.is_canceled);
        assert_eq!(p.active_until, None);
    }

    #[test]
    fn test_project_period_end_overrides_trial_end() {
        let s = BillingSnapshot {
            is_trial_active: true,
            trial_end_date: Some(datetime!(2025-06-16 00:00:00 UTC)),
            has_subscription: true,
            current_period_end: Some(datetime!(2025-07-15 00:00:00 UTC)),
            ..snapshot()
        };
        let p = project_access(&s, NOW);
        assert_eq!(p.active_until, Some(datetime!(2025-07-15 00:00:00 UTC)));
        assert!(!p.is_trial);
        assert_eq!(p.trial_days_left, None);
    }

    #[test]
    fn test_project_trial_days_left() {
        let s = BillingSnapshot {
            is_trial_active: true,
            trial_end_date: Some(datetime!(2025-06-18 00:00:00 UTC)),
            ..snapshot()
        };
        let p = project_access(&s, NOW);
        assert!(p.is_trial);
        // 2.5 days out rounds up to 3
        assert_eq!(p.trial_days_left, Some(3));
    }

    #[test]
    fn test_trial_days_to_grant_first_timer() {
        assert_eq!(trial_days_to_grant(false, false, None, NOW, 7), 7);
    }

    #[test]
    fn test_trial_days_to_grant_already_used() {
        assert_eq!(trial_days_to_grant(true, false, None, NOW, 7), 0);
        assert_eq!(
            trial_days_to_grant(
                true,
                true,
                Some(datetime!(2025-06-20 00:00:00 UTC)),
                NOW,
                7
            ),
            0
        );
    }

    #[test]
    fn test_trial_days_to_grant_mid_trial_unused() {
        // Remaining days, rounded up
        assert_eq!(
            trial_days_to_grant(
                false,
                true,
                Some(datetime!(2025-06-18 00:00:00 UTC)),
                NOW,
                7
            ),
            3
        );
        // Window already closed falls back to the default
        assert_eq!(
            trial_days_to_grant(
                false,
                true,
                Some(datetime!(2025-06-10 00:00:00 UTC)),
                NOW,
                7
            ),
            7
        );
    }

    #[test]
    fn test_proration_adjustment() {
        assert_eq!(
            ProrationAdjustment::from_total_cents(1250),
            ProrationAdjustment::Payment
        );
        assert_eq!(
            ProrationAdjustment::from_total_cents(-300),
            ProrationAdjustment::Refund
        );
        assert_eq!(
            ProrationAdjustment::from_total_cents(0),
            ProrationAdjustment::None
        );
        assert_eq!(ProrationAdjustment::Payment.to_string(), "payment");
        assert_eq!(ProrationAdjustment::Refund.to_string(), "refund");
        assert_eq!(ProrationAdjustment::None.to_string(), "none");
    }
}
