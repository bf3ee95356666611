//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{FromRequest, Path, State},
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use fund_allocator::{CharityProject, Donation, FundableKind};
use serde::Serialize;
use tracing::info;

use crate::allocation::Allocator;
use crate::db;
use crate::errors::{FundError, Result};
use crate::models::{self, AllocationRecord, DonationCreate, ProjectCreate, ProjectUpdate};
use crate::validators;

#[derive(Clone)]
pub struct ApiState {
    pub allocator: Allocator,
    pub title: String,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/charity_project/",
            get(get_all_projects).post(create_project),
        )
        .route(
            "/charity_project/:id",
            patch(update_project).delete(remove_project),
        )
        .route(
            "/charity_project/:id/allocations",
            get(get_project_allocations),
        )
        .route("/donation/", get(get_all_donations).post(create_donation))
        .route("/allocations", get(get_all_allocations))
        .with_state(state)
}

/// JSON request body. Malformed or unexpected fields are answered with
/// the usual `{"detail": ...}` error body.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(FundError))]
pub struct Payload<T>(pub T);

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct AllocationsResponse {
    pub count: usize,
    pub allocations: Vec<AllocationRecord>,
}

#[derive(Serialize)]
pub struct ProjectAllocationsResponse {
    pub project_id: i64,
    pub count: usize,
    pub allocations: Vec<AllocationRecord>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub title: String,
    pub version: &'static str,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        title: state.title.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /charity_project/`
///
/// Stores the project and fills it from open donations. Nothing is stored
/// when the allocation fails.
pub async fn create_project(
    State(state): State<Arc<ApiState>>,
    Payload(input): Payload<ProjectCreate>,
) -> Result<Json<CharityProject>> {
    validators::check_project_create(&input)?;
    validators::check_name_duplicate(state.allocator.pool(), &input.name, None).await?;

    let project = state
        .allocator
        .create_project(&input)
        .await
        .map_err(duplicate_name)?;
    info!("Created charity project {} ({:?})", project.id, project.name);
    Ok(Json(project))
}

/// `GET /charity_project/`
pub async fn get_all_projects(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<CharityProject>>> {
    let projects = db::fetch_all::<CharityProject>(state.allocator.pool()).await?;
    Ok(Json(projects))
}

/// `PATCH /charity_project/:id`
///
/// Edits name, description or target of an open project. Lowering the
/// target to the invested amount closes the project.
pub async fn update_project(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<i64>,
    Payload(input): Payload<ProjectUpdate>,
) -> Result<Json<CharityProject>> {
    validators::check_project_update(&input)?;
    let pool = state.allocator.pool();

    let _guard = state.allocator.write_guard().await;
    let mut project = validators::get_project_or_404(pool, project_id).await?;
    validators::check_project_open(&project)?;

    if let Some(name) = &input.name {
        validators::check_name_duplicate(pool, name, Some(project_id)).await?;
    }
    if let Some(full_amount) = input.full_amount {
        validators::check_not_below_invested(&project, full_amount)?;
    }

    let invested_before = project.funding.invested_amount;
    if let Some(name) = input.name {
        project.name = name;
    }
    if let Some(description) = input.description {
        project.description = description;
    }
    if let Some(full_amount) = input.full_amount {
        project.funding.full_amount = full_amount;
        if project.funding.deficit() == 0 {
            project.funding.close(models::now());
        }
    }

    let saved = db::update_project(pool, &project, invested_before)
        .await
        .map_err(duplicate_name)?;
    if !saved {
        return Err(FundError::NotFound(format!(
            "charity project {project_id} not found"
        )));
    }
    info!("Updated charity project {project_id}");
    Ok(Json(project))
}

/// `DELETE /charity_project/:id`
///
/// Only projects that never received funds can be removed.
pub async fn remove_project(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<i64>,
) -> Result<Json<CharityProject>> {
    let pool = state.allocator.pool();

    let _guard = state.allocator.write_guard().await;
    let project = validators::get_project_or_404(pool, project_id).await?;
    validators::check_nothing_invested(&project)?;

    if !db::delete_project(pool, project_id).await? {
        return Err(FundError::NotFound(format!(
            "charity project {project_id} not found"
        )));
    }
    info!("Deleted charity project {project_id}");
    Ok(Json(project))
}

/// `POST /donation/`
///
/// Stores the donation and spreads it over open projects. Nothing is
/// stored when the allocation fails.
pub async fn create_donation(
    State(state): State<Arc<ApiState>>,
    Payload(input): Payload<DonationCreate>,
) -> Result<Json<Donation>> {
    validators::check_donation_create(&input)?;
    let donation = state.allocator.create_donation(&input).await?;
    info!(
        "Created donation {} of {}",
        donation.id, donation.funding.full_amount
    );
    Ok(Json(donation))
}

/// `GET /donation/`
pub async fn get_all_donations(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<Donation>>> {
    let donations = db::fetch_all::<Donation>(state.allocator.pool()).await?;
    Ok(Json(donations))
}

/// `GET /allocations`
///
/// Returns every transfer made so far, oldest first.
pub async fn get_all_allocations(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<AllocationsResponse>> {
    let allocations = db::get_all_allocations(state.allocator.pool()).await?;
    Ok(Json(AllocationsResponse {
        count: allocations.len(),
        allocations,
    }))
}

/// `GET /charity_project/:id/allocations`
///
/// Returns the transfers the given project took part in.
pub async fn get_project_allocations(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<i64>,
) -> Result<Json<ProjectAllocationsResponse>> {
    let pool = state.allocator.pool();
    validators::get_project_or_404(pool, project_id).await?;
    let allocations =
        db::get_allocations_for(pool, FundableKind::CharityProject, project_id).await?;
    Ok(Json(ProjectAllocationsResponse {
        project_id,
        count: allocations.len(),
        allocations,
    }))
}

/// A unique-constraint hit on insert/update means the name was taken
/// between the duplicate check and the write.
fn duplicate_name(err: FundError) -> FundError {
    if db::is_unique_violation(&err) {
        FundError::Validation("a project with this name already exists".to_string())
    } else {
        err
    }
}
