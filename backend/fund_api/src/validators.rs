//! Request checks that run before anything reaches the allocator.

use fund_allocator::CharityProject;
use sqlx::SqlitePool;

use crate::db;
use crate::errors::{FundError, Result};
use crate::models::{DonationCreate, ProjectCreate, ProjectUpdate};

pub const NAME_MAX_LEN: usize = 100;

pub fn check_full_amount(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(FundError::Unprocessable(
            "full_amount must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(FundError::Unprocessable("name must not be empty".to_string()));
    }
    if name.chars().count() > NAME_MAX_LEN {
        return Err(FundError::Unprocessable(format!(
            "name must be at most {NAME_MAX_LEN} characters"
        )));
    }
    Ok(())
}

fn check_description(description: &str) -> Result<()> {
    if description.trim().is_empty() {
        return Err(FundError::Unprocessable(
            "description must not be empty".to_string(),
        ));
    }
    Ok(())
}

pub fn check_project_create(input: &ProjectCreate) -> Result<()> {
    check_name(&input.name)?;
    check_description(&input.description)?;
    check_full_amount(input.full_amount)
}

pub fn check_donation_create(input: &DonationCreate) -> Result<()> {
    check_full_amount(input.full_amount)
}

/// Shape checks for a PATCH body, independent of the stored project.
pub fn check_project_update(input: &ProjectUpdate) -> Result<()> {
    if input.is_empty() {
        return Err(FundError::Unprocessable("no fields to update".to_string()));
    }
    if let Some(name) = &input.name {
        check_name(name)?;
    }
    if let Some(description) = &input.description {
        check_description(description)?;
    }
    if let Some(amount) = input.full_amount {
        check_full_amount(amount)?;
    }
    Ok(())
}

pub async fn check_name_duplicate(
    pool: &SqlitePool,
    name: &str,
    exclude_id: Option<i64>,
) -> Result<()> {
    if db::project_id_by_name(pool, name, exclude_id).await?.is_some() {
        return Err(FundError::Validation(
            "a project with this name already exists".to_string(),
        ));
    }
    Ok(())
}

pub async fn get_project_or_404(pool: &SqlitePool, id: i64) -> Result<CharityProject> {
    db::get::<CharityProject>(pool, id)
        .await?
        .ok_or_else(|| FundError::NotFound(format!("charity project {id} not found")))
}

pub fn check_project_open(project: &CharityProject) -> Result<()> {
    if project.funding.fully_invested {
        return Err(FundError::Validation(
            "a closed project cannot be edited".to_string(),
        ));
    }
    Ok(())
}

pub fn check_not_below_invested(project: &CharityProject, full_amount: i64) -> Result<()> {
    if full_amount < project.funding.invested_amount {
        return Err(FundError::Unprocessable(format!(
            "full_amount cannot be set below the invested amount ({})",
            project.funding.invested_amount
        )));
    }
    Ok(())
}

pub fn check_nothing_invested(project: &CharityProject) -> Result<()> {
    if project.funding.invested_amount > 0 {
        return Err(FundError::Validation(
            "funds were already invested in this project, it cannot be deleted".to_string(),
        ));
    }
    Ok(())
}
