//! Subscription plan routes
//!
//! Public listing for the pricing page, plus admin CRUD over the catalog.
//! Every catalog mutation is mirrored to Stripe by the plan service.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use plume_billing::{CreatePlanRequest, Plan, UpdatePlanRequest};

use crate::{error::ApiError, state::AppState};

/// List active plans (public, backs the pricing page)
pub async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<Plan>>, ApiError> {
    let plans = state.billing.plans.list_plans().await?;
    Ok(Json(plans))
}

/// Get a single plan by id (public)
pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<Plan>, ApiError> {
    let plan = state.billing.plans.get_plan(plan_id).await?;
    Ok(Json(plan))
}

/// Create a plan with its Stripe product and prices (admin)
pub async fn create_plan(
    State(state): State<AppState>,
    Json(req): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<Plan>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("Plan name is required".to_string()));
    }
    if req.price_monthly_cents < 0 || req.price_yearly_cents < 0 {
        return Err(ApiError::Validation(
            "Plan prices must not be negative".to_string(),
        ));
    }

    let plan = state.billing.plans.create_plan(req).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

/// Update a plan, rotating Stripe prices when amounts change (admin)
pub async fn update_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    Json(req): Json<UpdatePlanRequest>,
) -> Result<Json<Plan>, ApiError> {
    if matches!(req.price_monthly_cents, Some(p) if p < 0)
        || matches!(req.price_yearly_cents, Some(p) if p < 0)
    {
        return Err(ApiError::Validation(
            "Plan prices must not be negative".to_string(),
        ));
    }

    let plan = state.billing.plans.update_plan(plan_id, req).await?;
    Ok(Json(plan))
}

/// Soft-delete a plan and deactivate its Stripe objects (admin)
pub async fn delete_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.billing.plans.delete_plan(plan_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
