//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use plume_billing::{
    BillingEmailService, CustomerService, PlanService, PortalService, StripeClient, StripeConfig,
    SubscriptionHistoryLog, SubscriptionService, WebhookHandler,
};

use crate::config::Config;

/// Billing service handles, constructed once at startup
pub struct BillingServices {
    pub subscriptions: SubscriptionService,
    pub plans: PlanService,
    pub customers: CustomerService,
    pub portal: PortalService,
    pub history: SubscriptionHistoryLog,
    pub webhooks: WebhookHandler,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub billing: Arc<BillingServices>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let stripe = StripeClient::new(StripeConfig {
            secret_key: config.stripe_secret_key.clone(),
            webhook_secret: config.stripe_webhook_secret.clone(),
            app_base_url: config.public_url.clone(),
            free_trial_days: config.free_trial_days,
        });
        let email = BillingEmailService::from_env();

        let billing = BillingServices {
            subscriptions: SubscriptionService::new(stripe.clone(), pool.clone()),
            plans: PlanService::new(stripe.clone(), pool.clone()),
            customers: CustomerService::new(stripe.clone(), pool.clone()),
            portal: PortalService::new(stripe.clone()),
            history: SubscriptionHistoryLog::new(pool.clone()),
            webhooks: WebhookHandler::new(stripe, pool.clone(), email),
        };

        Self {
            pool,
            config: Arc::new(config),
            billing: Arc::new(billing),
        }
    }
}
