//! Plume Billing
//!
//! Stripe-backed billing for the Plume platform: plan catalog management,
//! free trials, subscription checkout and lifecycle, webhook processing,
//! and the subscription history log.

pub mod client;
pub mod customer;
pub mod email;
pub mod error;
pub mod history;
pub mod plans;
pub mod portal;
pub mod subscription;
pub mod trial;
pub mod webhooks;

pub use client::{StripeClient, StripeConfig, DEFAULT_FREE_TRIAL_DAYS};
pub use customer::CustomerService;
pub use email::{BillingEmailService, EmailConfig};
pub use error::{BillingError, BillingResult};
pub use history::{HistoryAction, HistoryEntry, HistoryEntryBuilder, SubscriptionHistoryLog};
pub use plans::{CreatePlanRequest, Plan, PlanService, UpdatePlanRequest};
pub use portal::{PortalResponse, PortalService};
pub use subscription::{
    AccessProjection, BillingSnapshot, CancelOutcome, ChangeOutcome, CheckoutResponse,
    CurrentSubscription, ProrationAdjustment, SubscriptionPhase, SubscriptionService,
    SubscriptionStatusView,
};
pub use trial::{TrialService, TrialStatus};
pub use webhooks::WebhookHandler;
