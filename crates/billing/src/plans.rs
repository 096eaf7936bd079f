//! Subscription plan catalog
//!
//! Plans are mirrored to Stripe as one product plus two recurring prices.
//! Both prices bill monthly: the yearly price stores the monthly-equivalent
//! unit amount and is billed at quantity 12 when a yearly subscription is
//! created. Stripe prices are immutable once created, so price changes
//! create fresh prices and deactivate the old ones. Deleting a plan only
//! deactivates its Stripe objects so past invoices keep resolving.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use stripe::{
    CreatePrice, CreatePriceRecurring, CreatePriceRecurringInterval, CreateProduct, Currency,
    IdOrCreate, Price, PriceId, Product, ProductId, UpdatePrice, UpdateProduct,
};
use time::OffsetDateTime;
use uuid::Uuid;

use plume_shared::PlanInterval;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// A subscription plan
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub usage_limit: Option<i32>,
    pub price_monthly_cents: i64,
    pub price_yearly_cents: i64,
    pub displayed_monthly_cents: i64,
    pub displayed_yearly_cents: i64,
    /// Struck-through marketing price shown next to the yearly offer
    pub displayed_yearly_bar_cents: i64,
    pub currency: String,
    pub stripe_product_id: Option<String>,
    pub stripe_price_id_monthly: Option<String>,
    pub stripe_price_id_yearly: Option<String>,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Plan {
    /// Stripe price ID for the given billing interval
    pub fn price_id_for_interval(&self, interval: PlanInterval) -> Option<&str> {
        match interval {
            PlanInterval::Month => self.stripe_price_id_monthly.as_deref(),
            PlanInterval::Year => self.stripe_price_id_yearly.as_deref(),
        }
    }
}

/// Monthly-equivalent unit amount for a yearly price. Billed at quantity 12,
/// so the rounded unit keeps the total within 6 cents of the yearly price.
pub fn yearly_unit_amount(price_yearly_cents: i64) -> i64 {
    (price_yearly_cents + 6) / 12
}

/// Request to create a plan
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    pub name: String,
    pub description: Option<String>,
    pub usage_limit: Option<i32>,
    pub price_monthly_cents: i64,
    pub price_yearly_cents: i64,
    pub displayed_monthly_cents: Option<i64>,
    pub displayed_yearly_cents: Option<i64>,
    pub displayed_yearly_bar_cents: Option<i64>,
    pub currency: String,
}

/// Request to update a plan; absent fields keep their current value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlanRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub usage_limit: Option<i32>,
    pub price_monthly_cents: Option<i64>,
    pub price_yearly_cents: Option<i64>,
    pub displayed_monthly_cents: Option<i64>,
    pub displayed_yearly_cents: Option<i64>,
    pub displayed_yearly_bar_cents: Option<i64>,
    pub currency: Option<String>,
}

/// Plan service managing the catalog and its Stripe mirror
pub struct PlanService {
    stripe: StripeClient,
    pool: PgPool,
}

impl PlanService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Create a plan: one Stripe product, two prices, one catalog row
    pub async fn create_plan(&self, req: CreatePlanRequest) -> BillingResult<Plan> {
        let currency = parse_currency(&req.currency)?;

        let product = Product::create(self.stripe.inner(), CreateProduct::new(&req.name)).await?;

        let monthly_price = self
            .create_recurring_price(&product.id, currency, req.price_monthly_cents)
            .await?;
        let yearly_price = self
            .create_recurring_price(&product.id, currency, yearly_unit_amount(req.price_yearly_cents))
            .await?;

        let plan: Plan = sqlx::query_as(
            r#"
            INSERT INTO subscription_plans (
                name, description, usage_limit,
                price_monthly_cents, price_yearly_cents,
                displayed_monthly_cents, displayed_yearly_cents, displayed_yearly_bar_cents,
                currency, stripe_product_id, stripe_price_id_monthly, stripe_price_id_yearly
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(&req.name)
        .bind(&req.description)
        .bind(req.usage_limit)
        .bind(req.price_monthly_cents)
        .bind(req.price_yearly_cents)
        .bind(req.displayed_monthly_cents.unwrap_or(req.price_monthly_cents))
        .bind(req.displayed_yearly_cents.unwrap_or(req.price_yearly_cents))
        .bind(req.displayed_yearly_bar_cents.unwrap_or(req.price_yearly_cents))
        .bind(req.currency.to_lowercase())
        .bind(product.id.as_str())
        .bind(monthly_price.id.as_str())
        .bind(yearly_price.id.as_str())
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            plan_id = %plan.id,
            product_id = %product.id,
            "Created subscription plan"
        );

        Ok(plan)
    }

    /// Update a plan. Stripe prices are immutable, so two new prices are
    /// created and the old pair is deactivated, whatever field changed.
    pub async fn update_plan(&self, plan_id: Uuid, req: UpdatePlanRequest) -> BillingResult<Plan> {
        let current = self.get_plan(plan_id).await?;

        let (product_id, old_monthly, old_yearly) = match (
            &current.stripe_product_id,
            &current.stripe_price_id_monthly,
            &current.stripe_price_id_yearly,
        ) {
            (Some(prod), Some(m), Some(y)) => (prod.clone(), m.clone(), y.clone()),
            _ => {
                return Err(BillingError::InvalidInput(format!(
                    "Plan {} has no Stripe ids",
                    plan_id
                )))
            }
        };

        let name = req.name.clone().unwrap_or_else(|| current.name.clone());
        let monthly_cents = req.price_monthly_cents.unwrap_or(current.price_monthly_cents);
        let yearly_cents = req.price_yearly_cents.unwrap_or(current.price_yearly_cents);
        let currency_code = req
            .currency
            .clone()
            .unwrap_or_else(|| current.currency.clone());
        let currency = parse_currency(&currency_code)?;

        let product_id = product_id
            .parse::<ProductId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid product ID: {}", e)))?;

        let update = UpdateProduct {
            name: Some(&name),
            ..Default::default()
        };
        Product::update(self.stripe.inner(), &product_id, update).await?;

        let new_monthly = self
            .create_recurring_price(&product_id, currency, monthly_cents)
            .await?;
        let new_yearly = self
            .create_recurring_price(&product_id, currency, yearly_unit_amount(yearly_cents))
            .await?;

        self.deactivate_price(&old_monthly).await?;
        self.deactivate_price(&old_yearly).await?;

        let plan: Plan = sqlx::query_as(
            r#"
            UPDATE subscription_plans
            SET name = $2,
                description = COALESCE($3, description),
                usage_limit = COALESCE($4, usage_limit),
                price_monthly_cents = $5,
                price_yearly_cents = $6,
                displayed_monthly_cents = COALESCE($7, displayed_monthly_cents),
                displayed_yearly_cents = COALESCE($8, displayed_yearly_cents),
                displayed_yearly_bar_cents = COALESCE($9, displayed_yearly_bar_cents),
                currency = $10,
                stripe_price_id_monthly = $11,
                stripe_price_id_yearly = $12,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(plan_id)
        .bind(&name)
        .bind(&req.description)
        .bind(req.usage_limit)
        .bind(monthly_cents)
        .bind(yearly_cents)
        .bind(req.displayed_monthly_cents)
        .bind(req.displayed_yearly_cents)
        .bind(req.displayed_yearly_bar_cents)
        .bind(currency_code.to_lowercase())
        .bind(new_monthly.id.as_str())
        .bind(new_yearly.id.as_str())
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            plan_id = %plan.id,
            old_price_monthly = %old_monthly,
            old_price_yearly = %old_yearly,
            "Updated subscription plan, rotated Stripe prices"
        );

        Ok(plan)
    }

    /// Deactivate a plan and its Stripe objects. The row is kept so
    /// history entries and existing subscriptions keep resolving.
    pub async fn delete_plan(&self, plan_id: Uuid) -> BillingResult<()> {
        let plan = self.get_plan(plan_id).await?;

        if let Some(price_id) = &plan.stripe_price_id_monthly {
            self.deactivate_price(price_id).await?;
        }
        if let Some(price_id) = &plan.stripe_price_id_yearly {
            self.deactivate_price(price_id).await?;
        }
        if let Some(product_id) = &plan.stripe_product_id {
            let product_id = product_id
                .parse::<ProductId>()
                .map_err(|e| BillingError::StripeApi(format!("Invalid product ID: {}", e)))?;
            let update = UpdateProduct {
                active: Some(false),
                ..Default::default()
            };
            Product::update(self.stripe.inner(), &product_id, update).await?;
        }

        sqlx::query(
            "UPDATE subscription_plans SET active = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(plan_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(plan_id = %plan_id, "Deactivated subscription plan");

        Ok(())
    }

    /// Get a plan by ID
    pub async fn get_plan(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as("SELECT * FROM subscription_plans WHERE id = $1")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await?;

        plan.ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))
    }

    /// List active plans, cheapest first
    pub async fn list_plans(&self) -> BillingResult<Vec<Plan>> {
        let plans: Vec<Plan> = sqlx::query_as(
            "SELECT * FROM subscription_plans WHERE active = TRUE ORDER BY price_monthly_cents ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    /// Resolve a plan from a Stripe price ID, checking the monthly column
    /// first, then the yearly one
    pub async fn get_plan_by_price_id(
        &self,
        price_id: &str,
    ) -> BillingResult<Option<(Plan, PlanInterval)>> {
        let plan: Option<Plan> = sqlx::query_as(
            "SELECT * FROM subscription_plans WHERE stripe_price_id_monthly = $1",
        )
        .bind(price_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(plan) = plan {
            return Ok(Some((plan, PlanInterval::Month)));
        }

        let plan: Option<Plan> = sqlx::query_as(
            "SELECT * FROM subscription_plans WHERE stripe_price_id_yearly = $1",
        )
        .bind(price_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(plan.map(|plan| (plan, PlanInterval::Year)))
    }

    async fn create_recurring_price(
        &self,
        product_id: &ProductId,
        currency: Currency,
        unit_amount_cents: i64,
    ) -> BillingResult<Price> {
        let mut params = CreatePrice::new(currency);
        params.product = Some(IdOrCreate::Id(product_id.as_str()));
        params.unit_amount = Some(unit_amount_cents);
        params.recurring = Some(CreatePriceRecurring {
            interval: CreatePriceRecurringInterval::Month,
            ..Default::default()
        });

        let price = Price::create(self.stripe.inner(), params).await?;
        Ok(price)
    }

    async fn deactivate_price(&self, price_id: &str) -> BillingResult<()> {
        let price_id = price_id
            .parse::<PriceId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid price ID: {}", e)))?;

        let update = UpdatePrice {
            active: Some(false),
            ..Default::default()
        };
        Price::update(self.stripe.inner(), &price_id, update).await?;

        Ok(())
    }
}

fn parse_currency(code: &str) -> BillingResult<Currency> {
    code.to_lowercase()
        .parse::<Currency>()
        .map_err(|_| BillingError::InvalidInput(format!("Unsupported currency: {}", code)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn sample_plan() -> Plan {
        Plan {
            id: Uuid::new_v4(),
            name: "Pro".to_string(),
            description: None,
            usage_limit: Some(10),
            price_monthly_cents: 990,
            price_yearly_cents: 9900,
            displayed_monthly_cents: 990,
            displayed_yearly_cents: 9900,
            displayed_yearly_bar_cents: 11880,
            currency: "eur".to_string(),
            stripe_product_id: Some("prod_123".to_string()),
            stripe_price_id_monthly: Some("price_m".to_string()),
            stripe_price_id_yearly: Some("price_y".to_string()),
            active: true,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_price_id_for_interval() {
        let plan = sample_plan();
        assert_eq!(
            plan.price_id_for_interval(PlanInterval::Month),
            Some("price_m")
        );
        assert_eq!(
            plan.price_id_for_interval(PlanInterval::Year),
            Some("price_y")
        );

        let mut bare = sample_plan();
        bare.stripe_price_id_yearly = None;
        assert_eq!(bare.price_id_for_interval(PlanInterval::Year), None);
    }

    #[test]
    fn test_yearly_unit_amount() {
        // Divides evenly
        assert_eq!(yearly_unit_amount(12_000), 1_000);
        // Rounds to the nearest cent
        assert_eq!(yearly_unit_amount(9_900), 825);
        assert_eq!(yearly_unit_amount(10_000), 833);
    }
}
