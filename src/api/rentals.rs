//! Rental endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use crate::{
    error::AppResult,
    models::rental::{CreateRental, OverdueSweep, RentalDetails, RentalQuery, ReturnRental},
};

use super::FacilityScope;

/// Create a rental, reserving device items
#[utoipa::path(
    post,
    path = "/rentals",
    tag = "rentals",
    params(("X-Facility-Id" = i64, Header, description = "Facility scope")),
    request_body = CreateRental,
    responses(
        (status = 201, description = "Rental created", body = RentalDetails),
        (status = 400, description = "Invalid request", body = crate::error::ErrorResponse),
        (status = 409, description = "Not enough available devices", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_rental(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Json(data): Json<CreateRental>,
) -> AppResult<(StatusCode, Json<RentalDetails>)> {
    let rental = state.services.rentals.create_rental(facility_id, &data).await?;
    Ok((StatusCode::CREATED, Json(rental)))
}

/// List rentals
#[utoipa::path(
    get,
    path = "/rentals",
    tag = "rentals",
    params(
        ("X-Facility-Id" = i64, Header, description = "Facility scope"),
        ("status" = Option<crate::models::enums::RentalStatus>, Query, description = "Filter by status"),
        ("overdue_only" = Option<bool>, Query, description = "Only open rentals past due")
    ),
    responses(
        (status = 200, description = "Rentals", body = Vec<RentalDetails>)
    )
)]
pub async fn list_rentals(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Query(query): Query<RentalQuery>,
) -> AppResult<Json<Vec<RentalDetails>>> {
    let rentals = state.services.rentals.list_rentals(facility_id, &query).await?;
    Ok(Json(rentals))
}

/// Get a rental with its devices and overdue state
#[utoipa::path(
    get,
    path = "/rentals/{id}",
    tag = "rentals",
    params(
        ("X-Facility-Id" = i64, Header, description = "Facility scope"),
        ("id" = i64, Path, description = "Rental ID")
    ),
    responses(
        (status = 200, description = "Rental details", body = RentalDetails),
        (status = 404, description = "Rental not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_rental(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Path(id): Path<i64>,
) -> AppResult<Json<RentalDetails>> {
    let rental = state.services.rentals.get_rental(facility_id, id).await?;
    Ok(Json(rental))
}

/// Return a rental, releasing its devices
#[utoipa::path(
    post,
    path = "/rentals/{id}/return",
    tag = "rentals",
    params(
        ("X-Facility-Id" = i64, Header, description = "Facility scope"),
        ("id" = i64, Path, description = "Rental ID")
    ),
    request_body = ReturnRental,
    responses(
        (status = 200, description = "Rental returned", body = RentalDetails),
        (status = 404, description = "Rental not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Rental already returned", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_rental(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Path(id): Path<i64>,
    data: Option<Json<ReturnRental>>,
) -> AppResult<Json<RentalDetails>> {
    let data = data.map(|Json(d)| d).unwrap_or_default();
    let rental = state.services.rentals.return_rental(facility_id, id, &data).await?;
    Ok(Json(rental))
}

/// Open rentals past due, most overdue first
#[utoipa::path(
    get,
    path = "/rentals/overdue",
    tag = "rentals",
    params(("X-Facility-Id" = i64, Header, description = "Facility scope")),
    responses(
        (status = 200, description = "Overdue rentals", body = Vec<RentalDetails>)
    )
)]
pub async fn list_overdue(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
) -> AppResult<Json<Vec<RentalDetails>>> {
    let rentals = state.services.rentals.list_overdue(facility_id, Utc::now()).await?;
    Ok(Json(rentals))
}

/// Persist the overdue status on active rentals past due
#[utoipa::path(
    post,
    path = "/rentals/overdue/mark",
    tag = "rentals",
    params(("X-Facility-Id" = i64, Header, description = "Facility scope")),
    responses(
        (status = 200, description = "Number of rentals marked", body = OverdueSweep)
    )
)]
pub async fn mark_overdue(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
) -> AppResult<Json<OverdueSweep>> {
    let sweep = state.services.rentals.mark_overdue(facility_id, Utc::now()).await?;
    Ok(Json(sweep))
}
