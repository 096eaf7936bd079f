//! Subscription routes
//!
//! Customer-facing subscription lifecycle plus the Stripe webhook endpoint.

use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use plume_billing::{
    CancelOutcome, ChangeOutcome, CheckoutResponse, CurrentSubscription, HistoryEntry,
    PortalResponse, SubscriptionStatusView,
};
use plume_shared::PlanInterval;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

const INVOICE_LIST_LIMIT: i64 = 50;

/// Request to start a subscription checkout
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    pub plan_id: Uuid,
    #[serde(default)]
    pub interval: PlanInterval,
}

/// Request to move to a different plan or interval
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSubscriptionRequest {
    pub plan_id: Uuid,
    #[serde(default)]
    pub interval: PlanInterval,
}

/// Response after a cancel request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub outcome: CancelOutcome,
    pub message: String,
}

/// Start a Stripe checkout session for a new subscription
pub async fn create_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let checkout = state
        .billing
        .subscriptions
        .create_subscription(auth_user.id, req.plan_id, req.interval)
        .await?;

    Ok(Json(checkout))
}

/// Change the current subscription to another plan or interval
pub async fn change_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ChangeSubscriptionRequest>,
) -> Result<Json<ChangeOutcome>, ApiError> {
    let outcome = state
        .billing
        .subscriptions
        .change_subscription(auth_user.id, req.plan_id, req.interval)
        .await?;

    Ok(Json(outcome))
}

/// Cancel the subscription (or flag an active trial as canceled)
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<CancelResponse>, ApiError> {
    let outcome = state
        .billing
        .subscriptions
        .cancel_subscription(auth_user.id)
        .await?;

    let message = match outcome {
        CancelOutcome::TrialCanceled => {
            "Trial canceled. Access continues until the trial ends.".to_string()
        }
        CancelOutcome::SubscriptionCanceled => {
            "Subscription canceled. Access continues until the end of the billing period."
                .to_string()
        }
    };

    Ok(Json(CancelResponse { outcome, message }))
}

/// Current subscription view for the account page
pub async fn get_current(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<CurrentSubscription>, ApiError> {
    let current = state.billing.subscriptions.get_current(auth_user.id).await?;
    Ok(Json(current))
}

/// Full subscription status including trial fields and plan details
pub async fn get_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<SubscriptionStatusView>, ApiError> {
    let status = state.billing.subscriptions.get_status(auth_user.id).await?;
    Ok(Json(status))
}

/// Paid invoices, served from the subscription history log
pub async fn list_invoices(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let invoices = state
        .billing
        .history
        .get_invoices_for_user(auth_user.id, INVOICE_LIST_LIMIT)
        .await?;

    Ok(Json(invoices))
}

/// Open a billing portal session so the user can update their payment method
pub async fn update_payment_method(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<PortalResponse>, ApiError> {
    let customer_id = state.billing.customers.get_customer_id(auth_user.id).await?;

    let session = state
        .billing
        .portal
        .create_portal_session(auth_user.id, customer_id.as_str())
        .await?;

    Ok(Json(session.into()))
}

/// Stripe webhook endpoint. Verifies the signature against the raw body
/// before any parsing; processing failures return non-2xx so Stripe
/// redelivers.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    let event = state.billing.webhooks.verify_event(&body, signature)?;

    state.billing.webhooks.handle_event(event).await.map_err(|e| {
        tracing::error!(error = %e, "Webhook processing failed");
        ApiError::Internal
    })?;

    Ok(StatusCode::OK)
}
