//! Stripe webhook handling
//!
//! Handles Stripe events for checkout, subscriptions, and invoices. Each
//! delivery is verified, claimed atomically for dedup, then dispatched to
//! exactly one handler.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{
    CheckoutSession, Event, EventObject, EventType, Expandable, Invoice, Subscription,
    SubscriptionId, Webhook,
};
use time::{Date, Month, OffsetDateTime};
use uuid::Uuid;

use plume_shared::PlanInterval;

use crate::client::StripeClient;
use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::history::{HistoryAction, HistoryEntryBuilder, SubscriptionHistoryLog};
use crate::plans::{Plan, PlanService};
use crate::trial::{days_remaining, TrialService};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Pull the timestamp and v1 signature out of a `Stripe-Signature` header
/// (`t=<unix>,v1=<hex>,v0=..`).
fn parse_signature_header(header: &str) -> Option<(i64, String)> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in header.split(',') {
        match part.splitn(2, '=').collect::<Vec<_>>().as_slice() {
            ["t", value] => timestamp = value.parse().ok(),
            ["v1", value] => v1_signature = Some((*value).to_string()),
            _ => {}
        }
    }

    Some((timestamp?, v1_signature?))
}

/// One calendar year after `start`, Feb 29 clamping to Feb 28 when the
/// target year is not a leap year. Used for yearly billing: the plan's
/// yearly price bills as twelve monthly units, so the provider reports a
/// one-month period and the real entitlement window is computed here.
pub fn one_year_after(start: OffsetDateTime) -> OffsetDateTime {
    let date = start.date();
    let next_year = date.year() + 1;
    let next = match date.replace_year(next_year) {
        Ok(d) => d,
        Err(_) => Date::from_calendar_date(next_year, Month::February, 28).unwrap_or(date),
    };
    start.replace_date(next)
}

/// Entitlement end from the event's own period fields, if they are usable.
/// Yearly subscriptions derive it from the period start plus one calendar
/// year; monthly subscriptions take the period end as-is. Returns `None`
/// when the needed field is missing or zero and a fresh fetch is required.
fn period_end_from_event(
    interval: PlanInterval,
    period_start: i64,
    period_end: i64,
) -> Option<OffsetDateTime> {
    match interval {
        PlanInterval::Year if period_start > 0 => OffsetDateTime::from_unix_timestamp(period_start)
            .ok()
            .map(one_year_after),
        PlanInterval::Month if period_end > 0 => {
            OffsetDateTime::from_unix_timestamp(period_end).ok()
        }
        _ => None,
    }
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
    email: BillingEmailService,
    history: SubscriptionHistoryLog,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool, email: BillingEmailService) -> Self {
        let history = SubscriptionHistoryLog::new(pool.clone());
        Self {
            stripe,
            pool,
            email,
            history,
        }
    }

    /// Verify and parse a Stripe webhook delivery. The library verifier
    /// runs first; when it rejects the payload over an API version it does
    /// not know, the signature is checked by hand against the raw body and
    /// the event parsed directly.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "Library webhook verification failed, checking signature manually"
                );
            }
        }

        let (timestamp, v1_signature) =
            parse_signature_header(signature).ok_or(BillingError::WebhookSignatureInvalid)?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                skew = (now - timestamp).abs(),
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        // HMAC-SHA256 over "timestamp.payload", keyed without the whsec_ prefix
        let secret_key = webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(webhook_secret);
        let signed_payload = format!("{}.{}", timestamp, payload);
        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: Event =
            serde_json::from_str(payload).map_err(|_| BillingError::WebhookSignatureInvalid)?;

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Webhook verified manually"
        );

        Ok(event)
    }

    /// Handle a verified Stripe event
    ///
    /// Uses INSERT...ON CONFLICT...RETURNING to atomically claim exclusive
    /// processing rights, so a redelivered or concurrently-delivered event is
    /// acknowledged without being processed twice. Failed events stay
    /// claimable, so the redelivery requested by the non-2xx response gets
    /// reprocessed, and events stuck in "processing" for over 30 minutes
    /// can be re-claimed.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type_str = event.type_.to_string();

        let event_timestamp = OffsetDateTime::from_unix_timestamp(event.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        if !self
            .claim_event(&event_id, &event_type_str, event_timestamp)
            .await?
        {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type_str,
                "Duplicate webhook event, acknowledging without reprocessing"
            );
            return Ok(());
        }

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Processing Stripe webhook event"
        );

        let result = self.process_event_internal(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success".to_string(), None),
            Err(e) => ("error".to_string(), Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(&processing_result)
        .bind(&error_message)
        .bind(&event_id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(
                event_id = %event_id,
                processing_result = %processing_result,
                error = %e,
                "Failed to update webhook audit record, event may appear stuck in processing"
            );
        }

        result
    }

    /// Claim a delivery for exclusive processing. Returns false when
    /// another delivery of the same event already succeeded or is still
    /// being worked on within the timeout.
    async fn claim_event(
        &self,
        event_id: &str,
        event_type: &str,
        event_timestamp: OffsetDateTime,
    ) -> BillingResult<bool> {
        const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = CONCAT('Reclaimed at ', NOW()::TEXT)
            WHERE stripe_webhook_events.processing_result = 'error'
               OR (stripe_webhook_events.processing_result = 'processing'
                   AND stripe_webhook_events.processing_started_at < NOW() - ($4 || ' minutes')::INTERVAL)
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(event_timestamp)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn process_event_internal(&self, event: &Event) -> BillingResult<()> {
        let event_owned = event.clone();

        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event_owned).await?;
            }
            EventType::CustomerSubscriptionUpdated => {
                self.handle_subscription_updated(event_owned).await?;
            }
            EventType::CustomerSubscriptionDeleted => {
                self.handle_subscription_deleted(event_owned).await?;
            }
            EventType::CustomerSubscriptionTrialWillEnd => {
                self.handle_trial_will_end(event_owned).await?;
            }
            EventType::InvoicePaid => {
                self.handle_invoice_paid(event_owned).await?;
            }
            EventType::InvoicePaymentFailed => {
                self.handle_invoice_payment_failed(event_owned).await?;
            }
            _ => {
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
            }
        }

        Ok(())
    }

    /// Checkout completed: the payment cleared, persist the subscription
    /// link and entitlement window, and settle the trial state.
    async fn handle_checkout_completed(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let session = self.extract_checkout_session(event)?;

        let metadata = session.metadata.clone().unwrap_or_default();
        let user_id = metadata
            .get("userId")
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| BillingError::Internal("userId not found in metadata".to_string()))?;
        let plan_id = metadata
            .get("planId")
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| BillingError::Internal("planId not found in metadata".to_string()))?;
        let interval: PlanInterval = metadata
            .get("interval")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        let subscription_id = match &session.subscription {
            Some(Expandable::Id(id)) => id.to_string(),
            Some(Expandable::Object(sub)) => sub.id.to_string(),
            None => {
                return Err(BillingError::Internal(
                    "No subscription on checkout session".to_string(),
                ))
            }
        };
        let customer_id = match &session.customer {
            Some(Expandable::Id(id)) => Some(id.to_string()),
            Some(Expandable::Object(c)) => Some(c.id.to_string()),
            None => None,
        };

        let period_end = self
            .resolve_period_end(&subscription_id, interval, None)
            .await;

        sqlx::query(
            r#"
            UPDATE users
            SET plan_id = $2,
                stripe_subscription_id = $3,
                stripe_customer_id = COALESCE($4, stripe_customer_id),
                stripe_current_period_end = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(plan_id)
        .bind(&subscription_id)
        .bind(&customer_id)
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        // Settle the trial: an active trial is interrupted by the paid
        // subscription, a never-used trial is recorded as consumed by the
        // trial days Stripe granted in checkout.
        let trial_state: Option<(bool, bool, String)> = sqlx::query_as(
            "SELECT is_trial_active, has_trial_used, email FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let (is_trial_active, has_trial_used, user_email) =
            trial_state.ok_or_else(|| BillingError::NotFound(user_id.to_string()))?;

        let trials = TrialService::new(self.pool.clone());
        if is_trial_active {
            trials.interrupt_trial(user_id).await?;
            self.history
                .log(
                    HistoryEntryBuilder::new(user_id, HistoryAction::TrialInterrupted)
                        .old_plan("trial")
                        .stripe_event(&event_id),
                )
                .await?;
        } else if !has_trial_used {
            let days = self.stripe.config().free_trial_days;
            if trials.start_trial(user_id, days).await? {
                self.history
                    .log(
                        HistoryEntryBuilder::new(user_id, HistoryAction::TrialStarted)
                            .new_plan("trial")
                            .stripe_event(&event_id),
                    )
                    .await?;
            }
        }

        let plan_name = self
            .get_plan(plan_id)
            .await
            .map(|p| p.name)
            .unwrap_or_else(|_| "subscription".to_string());

        self.history
            .log(
                HistoryEntryBuilder::new(user_id, HistoryAction::SubscriptionCreated)
                    .new_plan(&plan_name)
                    .interval(interval.to_string())
                    .status("active")
                    .stripe_event(&event_id),
            )
            .await?;

        if let Err(e) = self
            .email
            .send_subscription_welcome(&user_email, &plan_name)
            .await
        {
            tracing::error!(error = %e, "Failed to send subscription welcome email");
        }

        tracing::info!(
            user_id = %user_id,
            plan_id = %plan_id,
            subscription_id = %subscription_id,
            interval = %interval,
            period_end = ?period_end,
            "Checkout completed, subscription activated"
        );

        Ok(())
    }

    /// Subscription updated: re-derive plan and period end from the event.
    async fn handle_subscription_updated(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let subscription = self.extract_subscription(event)?;

        let (user_id, is_trial_active) = self
            .get_user_by_customer(&subscription.customer)
            .await?;

        // Match the plan by price, monthly column first then yearly
        let plans = PlanService::new(self.stripe.clone(), self.pool.clone());
        let price_id = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.to_string());

        let (plan, interval) = match &price_id {
            Some(price_id) => match plans.get_plan_by_price_id(price_id).await? {
                Some((plan, interval)) => (Some(plan), interval),
                None => (None, PlanInterval::default()),
            },
            None => (None, PlanInterval::default()),
        };

        // Period end from event fields, falling back to a fresh fetch
        let event_end =
            (subscription.current_period_end > 0).then(|| subscription.current_period_end);
        let period_end = match period_end_from_event(
            interval,
            subscription.current_period_start,
            subscription.current_period_end,
        ) {
            Some(end) => Some(end),
            None => {
                self.resolve_period_end(subscription.id.as_str(), interval, event_end)
                    .await
            }
        };

        sqlx::query(
            r#"
            UPDATE users
            SET plan_id = COALESCE($2, plan_id),
                stripe_subscription_id = $3,
                stripe_current_period_end = COALESCE($4, stripe_current_period_end),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(plan.as_ref().map(|p| p.id))
        .bind(subscription.id.as_str())
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        if is_trial_active {
            let trials = TrialService::new(self.pool.clone());
            trials.interrupt_trial(user_id).await?;
            self.history
                .log(
                    HistoryEntryBuilder::new(user_id, HistoryAction::TrialInterrupted)
                        .old_plan("trial")
                        .stripe_event(&event_id),
                )
                .await?;
        }

        self.history
            .log(
                HistoryEntryBuilder::new(user_id, HistoryAction::SubscriptionChanged)
                    .new_plan(
                        plan.as_ref()
                            .map(|p| p.name.clone())
                            .unwrap_or_else(|| "subscription".to_string()),
                    )
                    .interval(interval.to_string())
                    .status(subscription.status.to_string())
                    .stripe_event(&event_id),
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            status = ?subscription.status,
            period_end = ?period_end,
            "Subscription updated"
        );

        Ok(())
    }

    /// Subscription deleted: the entitlement is gone, clear both the link
    /// and the period end.
    async fn handle_subscription_deleted(&self, event: Event) -> BillingResult<()> {
        let subscription = self.extract_subscription(event)?;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET stripe_subscription_id = NULL,
                stripe_current_period_end = NULL,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1 OR stripe_customer_id = $2
            "#,
        )
        .bind(subscription.id.as_str())
        .bind(customer_id_of(&subscription.customer))
        .execute(&self.pool)
        .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            users_updated = result.rows_affected(),
            "Subscription deleted, entitlement cleared"
        );

        Ok(())
    }

    /// Trial ending soon: reminder email, no state change.
    async fn handle_trial_will_end(&self, event: Event) -> BillingResult<()> {
        let subscription = self.extract_subscription(event)?;
        let (user_id, _) = self.get_user_by_customer(&subscription.customer).await?;

        let days_left = subscription
            .trial_end
            .and_then(|end| OffsetDateTime::from_unix_timestamp(end).ok())
            .map(|end| days_remaining(OffsetDateTime::now_utc(), end).max(1))
            .unwrap_or(3);

        if let Some(email) = self.get_user_email(user_id).await? {
            if let Err(e) = self.email.send_trial_ending(&email, days_left).await {
                tracing::error!(error = %e, "Failed to send trial ending email");
            }
        }

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            days_left = days_left,
            "Trial period ending soon"
        );

        Ok(())
    }

    /// Invoice paid: append to history (this backs the invoice list) and
    /// send a receipt. Zero-amount invoices (trial starts) are skipped.
    async fn handle_invoice_paid(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let invoice = self.extract_invoice(event)?;
        let (user_id, _) = self.get_user_by_invoice_customer(&invoice).await?;

        let amount_cents = invoice.amount_paid.or(invoice.total).unwrap_or(0);
        if amount_cents <= 0 {
            tracing::debug!(user_id = %user_id, "Skipping zero-amount invoice");
            return Ok(());
        }

        let mut entry = HistoryEntryBuilder::new(user_id, HistoryAction::InvoicePaid)
            .amount_cents(amount_cents)
            .status("paid")
            .stripe_event(&event_id);
        if let Some(currency) = invoice.currency {
            entry = entry.currency(currency.to_string());
        }
        if let Some(url) = &invoice.hosted_invoice_url {
            entry = entry.invoice_url(url.clone());
        }
        self.history.log(entry).await?;

        if let Some(email) = self.get_user_email(user_id).await? {
            if let Err(e) = self
                .email
                .send_payment_succeeded(&email, amount_cents, invoice.hosted_invoice_url.as_deref())
                .await
            {
                tracing::error!(error = %e, "Failed to send payment receipt email");
            }
        }

        tracing::info!(
            user_id = %user_id,
            amount_cents = amount_cents,
            "Invoice paid"
        );

        Ok(())
    }

    /// Invoice payment failed: notify the user, leave state alone. Stripe
    /// retries the charge and emits subscription events on final failure.
    async fn handle_invoice_payment_failed(&self, event: Event) -> BillingResult<()> {
        let invoice = self.extract_invoice(event)?;
        let (user_id, _) = self.get_user_by_invoice_customer(&invoice).await?;

        let amount_cents = invoice.amount_due.or(invoice.total).unwrap_or(0);

        if let Some(email) = self.get_user_email(user_id).await? {
            if let Err(e) = self
                .email
                .send_payment_failed(&email, amount_cents, invoice.hosted_invoice_url.as_deref())
                .await
            {
                tracing::error!(error = %e, "Failed to send payment failed email");
            }
        }

        tracing::warn!(
            user_id = %user_id,
            amount_cents = amount_cents,
            "Invoice payment failed"
        );

        Ok(())
    }

    /// Compute the period end for a subscription, fetching it when the
    /// event did not carry usable period fields. Yearly subscriptions get
    /// one calendar year from the period start; as a last resort the
    /// reported period end is pushed out by a year minus the month the
    /// provider already counted.
    async fn resolve_period_end(
        &self,
        subscription_id: &str,
        interval: PlanInterval,
        event_period_end: Option<i64>,
    ) -> Option<OffsetDateTime> {
        let fetched = match subscription_id.parse::<SubscriptionId>() {
            Ok(sub_id) => Subscription::retrieve(self.stripe.inner(), &sub_id, &[])
                .await
                .ok(),
            Err(_) => None,
        };

        match interval {
            PlanInterval::Year => {
                let start = fetched
                    .as_ref()
                    .map(|s| s.current_period_start)
                    .filter(|ts| *ts > 0)
                    .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());
                match start {
                    Some(start) => Some(one_year_after(start)),
                    None => {
                        // Derive the start from the reported period end
                        let end = fetched
                            .as_ref()
                            .map(|s| s.current_period_end)
                            .filter(|ts| *ts > 0)
                            .or(event_period_end)?;
                        let end = OffsetDateTime::from_unix_timestamp(end).ok()?;
                        Some(one_year_after(end - time::Duration::days(30)))
                    }
                }
            }
            PlanInterval::Month => fetched
                .as_ref()
                .map(|s| s.current_period_end)
                .filter(|ts| *ts > 0)
                .or(event_period_end)
                .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
        }
    }

    fn extract_subscription(&self, event: Event) -> BillingResult<Subscription> {
        match event.data.object {
            EventObject::Subscription(subscription) => Ok(subscription),
            _ => Err(BillingError::WebhookEventNotSupported(
                "Expected Subscription".to_string(),
            )),
        }
    }

    fn extract_invoice(&self, event: Event) -> BillingResult<Invoice> {
        match event.data.object {
            EventObject::Invoice(invoice) => Ok(invoice),
            _ => Err(BillingError::WebhookEventNotSupported(
                "Expected Invoice".to_string(),
            )),
        }
    }

    fn extract_checkout_session(&self, event: Event) -> BillingResult<CheckoutSession> {
        match event.data.object {
            EventObject::CheckoutSession(session) => Ok(session),
            _ => Err(BillingError::WebhookEventNotSupported(
                "Expected CheckoutSession".to_string(),
            )),
        }
    }

    async fn get_user_by_customer(
        &self,
        customer: &Expandable<stripe::Customer>,
    ) -> BillingResult<(Uuid, bool)> {
        let customer_id = match customer {
            Expandable::Id(id) => id.to_string(),
            Expandable::Object(c) => c.id.to_string(),
        };

        let result: Option<(Uuid, bool)> = sqlx::query_as(
            "SELECT id, is_trial_active FROM users WHERE stripe_customer_id = $1",
        )
        .bind(&customer_id)
        .fetch_optional(&self.pool)
        .await?;

        result.ok_or(BillingError::CustomerNotFound(customer_id))
    }

    async fn get_user_by_invoice_customer(
        &self,
        invoice: &Invoice,
    ) -> BillingResult<(Uuid, bool)> {
        let customer = invoice
            .customer
            .as_ref()
            .ok_or_else(|| BillingError::Internal("No customer on invoice".to_string()))?;
        self.get_user_by_customer(customer).await
    }

    async fn get_user_email(&self, user_id: Uuid) -> BillingResult<Option<String>> {
        let result: Option<(String,)> = sqlx::query_as("SELECT email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(result.map(|(email,)| email))
    }

    async fn get_plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as("SELECT * FROM subscription_plans WHERE id = $1")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await?;

        plan.ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))
    }
}

fn customer_id_of(customer: &Expandable<stripe::Customer>) -> String {
    match customer {
        Expandable::Id(id) => id.to_string(),
        Expandable::Object(c) => c.id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_one_year_after() {
        assert_eq!(
            one_year_after(datetime!(2025-03-15 10:30:00 UTC)),
            datetime!(2026-03-15 10:30:00 UTC)
        );
    }

    #[test]
    fn test_one_year_after_clamps_leap_day() {
        // Feb 29 2024 has no counterpart in 2025
        assert_eq!(
            one_year_after(datetime!(2024-02-29 00:00:00 UTC)),
            datetime!(2025-02-28 00:00:00 UTC)
        );
    }

    #[test]
    fn test_one_year_after_year_boundary() {
        assert_eq!(
            one_year_after(datetime!(2025-12-31 23:59:59 UTC)),
            datetime!(2026-12-31 23:59:59 UTC)
        );
    }

    #[test]
    fn test_period_end_yearly_derives_from_start() {
        let start = datetime!(2025-06-01 00:00:00 UTC);
        assert_eq!(
            period_end_from_event(PlanInterval::Year, start.unix_timestamp(), 0),
            Some(datetime!(2026-06-01 00:00:00 UTC))
        );
    }

    #[test]
    fn test_period_end_yearly_ignores_event_end() {
        // The provider's period end covers one month of a quantity-12
        // subscription, the start is what the window derives from
        let start = datetime!(2025-06-01 00:00:00 UTC);
        let end = datetime!(2025-07-01 00:00:00 UTC);
        assert_eq!(
            period_end_from_event(
                PlanInterval::Year,
                start.unix_timestamp(),
                end.unix_timestamp()
            ),
            Some(datetime!(2026-06-01 00:00:00 UTC))
        );
    }

    #[test]
    fn test_period_end_monthly_takes_event_end() {
        let end = datetime!(2025-07-01 00:00:00 UTC);
        assert_eq!(
            period_end_from_event(PlanInterval::Month, 0, end.unix_timestamp()),
            Some(end)
        );
    }

    #[test]
    fn test_period_end_missing_fields_defers_to_fetch() {
        assert_eq!(period_end_from_event(PlanInterval::Year, 0, 12345), None);
        assert_eq!(period_end_from_event(PlanInterval::Month, 12345, 0), None);
    }

    #[test]
    fn test_parse_signature_header() {
        assert_eq!(
            parse_signature_header("t=1718000000,v1=abc123,v0=ignored"),
            Some((1_718_000_000, "abc123".to_string()))
        );
        assert_eq!(parse_signature_header("v1=abc123"), None);
        assert_eq!(parse_signature_header("t=1718000000"), None);
        assert_eq!(parse_signature_header("t=notanumber,v1=abc123"), None);
        assert_eq!(parse_signature_header(""), None);
    }

    async fn test_handler() -> WebhookHandler {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = plume_shared::db::create_pool(&url).await.expect("pool");
        let stripe = StripeClient::new(crate::client::StripeConfig {
            secret_key: "sk_test_webhook_claim".to_string(),
            webhook_secret: String::new(),
            app_base_url: "http://localhost:3000".to_string(),
            free_trial_days: 7,
        });
        WebhookHandler::new(stripe, pool, BillingEmailService::from_env())
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_claim_reprocesses_failed_deliveries() {
        let handler = test_handler().await;
        let event_id = format!("evt_test_{}", Uuid::new_v4().simple());
        let now = OffsetDateTime::now_utc();

        // First delivery claims, a concurrent duplicate does not
        assert!(handler
            .claim_event(&event_id, "invoice.paid", now)
            .await
            .expect("claim"));
        assert!(!handler
            .claim_event(&event_id, "invoice.paid", now)
            .await
            .expect("claim"));

        // A successful event stays closed to redelivery
        sqlx::query(
            "UPDATE stripe_webhook_events SET processing_result = 'success' WHERE stripe_event_id = $1",
        )
        .bind(&event_id)
        .execute(&handler.pool)
        .await
        .expect("mark success");
        assert!(!handler
            .claim_event(&event_id, "invoice.paid", now)
            .await
            .expect("claim"));

        // A failed event is claimable again on redelivery
        sqlx::query(
            "UPDATE stripe_webhook_events SET processing_result = 'error' WHERE stripe_event_id = $1",
        )
        .bind(&event_id)
        .execute(&handler.pool)
        .await
        .expect("mark error");
        assert!(handler
            .claim_event(&event_id, "invoice.paid", now)
            .await
            .expect("claim"));

        sqlx::query("DELETE FROM stripe_webhook_events WHERE stripe_event_id = $1")
            .bind(&event_id)
            .execute(&handler.pool)
            .await
            .expect("cleanup");
    }
}
