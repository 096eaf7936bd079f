//! Stripe customer management

use sqlx::PgPool;
use stripe::{CreateCustomer, Customer, CustomerId};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Customer service for managing Stripe customers
pub struct CustomerService {
    stripe: StripeClient,
    pool: PgPool,
}

impl CustomerService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Create or get a Stripe customer for a user
    pub async fn get_or_create_customer(
        &self,
        user_id: Uuid,
        email: &str,
        name: Option<&str>,
    ) -> BillingResult<Customer> {
        // Check if the user already has a Stripe customer ID
        let existing: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((Some(customer_id),)) = existing {
            // Retrieve existing customer
            let customer_id = customer_id
                .parse::<CustomerId>()
                .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

            let customer = Customer::retrieve(self.stripe.inner(), &customer_id, &[]).await?;

            return Ok(customer);
        }

        // Create new customer
        let customer = self.create_customer(user_id, email, name).await?;
        Ok(customer)
    }

    /// Create a new Stripe customer
    pub async fn create_customer(
        &self,
        user_id: Uuid,
        email: &str,
        name: Option<&str>,
    ) -> BillingResult<Customer> {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("platform".to_string(), "plume".to_string());

        let params = CreateCustomer {
            email: Some(email),
            name,
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(self.stripe.inner(), params).await?;

        // Store customer ID in database
        sqlx::query("UPDATE users SET stripe_customer_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(customer.id.as_str())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer.id,
            "Created Stripe customer"
        );

        Ok(customer)
    }

    /// Get the Stripe customer ID for a user
    pub async fn get_customer_id(&self, user_id: Uuid) -> BillingResult<CustomerId> {
        let result: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        match result {
            Some((Some(id),)) => id
                .parse::<CustomerId>()
                .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e))),
            _ => Err(BillingError::CustomerNotFound(user_id.to_string())),
        }
    }

    /// Check if a user has a default payment method on file in Stripe
    pub async fn has_payment_method(&self, user_id: Uuid) -> BillingResult<bool> {
        let result: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let customer_id_str = match result {
            Some((Some(id),)) => id,
            _ => return Ok(false), // No customer = no payment method
        };

        let customer_id = customer_id_str
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

        let customer = Customer::retrieve(self.stripe.inner(), &customer_id, &[]).await?;

        let has_pm = customer
            .invoice_settings
            .and_then(|settings| settings.default_payment_method)
            .is_some();

        tracing::debug!(
            user_id = %user_id,
            customer_id = %customer.id,
            has_payment_method = has_pm,
            "Checked payment method status"
        );

        Ok(has_pm)
    }
}
