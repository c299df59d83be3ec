//! Repair endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::AppResult,
    models::repair::{CreateRepair, Repair, RepairQuery, UpdateRepair},
};

use super::FacilityScope;

/// List repairs
#[utoipa::path(
    get,
    path = "/repairs",
    tag = "repairs",
    params(
        ("X-Facility-Id" = i64, Header, description = "Facility scope"),
        ("status" = Option<crate::models::enums::RepairStatus>, Query, description = "Filter by status"),
        ("device_item_id" = Option<i64>, Query, description = "Filter by device item")
    ),
    responses(
        (status = 200, description = "Repairs", body = Vec<Repair>)
    )
)]
pub async fn list_repairs(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Query(query): Query<RepairQuery>,
) -> AppResult<Json<Vec<Repair>>> {
    let repairs = state.services.repairs.list_repairs(facility_id, &query).await?;
    Ok(Json(repairs))
}

/// Get a repair
#[utoipa::path(
    get,
    path = "/repairs/{id}",
    tag = "repairs",
    params(
        ("X-Facility-Id" = i64, Header, description = "Facility scope"),
        ("id" = i64, Path, description = "Repair ID")
    ),
    responses(
        (status = 200, description = "Repair", body = Repair),
        (status = 404, description = "Repair not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_repair(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Path(id): Path<i64>,
) -> AppResult<Json<Repair>> {
    let repair = state.services.repairs.get_repair(facility_id, id).await?;
    Ok(Json(repair))
}

/// Report a broken device
#[utoipa::path(
    post,
    path = "/repairs",
    tag = "repairs",
    params(("X-Facility-Id" = i64, Header, description = "Facility scope")),
    request_body = CreateRepair,
    responses(
        (status = 201, description = "Repair opened", body = Repair),
        (status = 409, description = "Item already has an open repair", body = crate::error::ErrorResponse),
        (status = 422, description = "Item cannot be sent to repair", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_repair(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Json(data): Json<CreateRepair>,
) -> AppResult<(StatusCode, Json<Repair>)> {
    let repair = state.services.repairs.create_repair(facility_id, &data).await?;
    Ok((StatusCode::CREATED, Json(repair)))
}

/// Update a repair
#[utoipa::path(
    put,
    path = "/repairs/{id}",
    tag = "repairs",
    params(
        ("X-Facility-Id" = i64, Header, description = "Facility scope"),
        ("id" = i64, Path, description = "Repair ID")
    ),
    request_body = UpdateRepair,
    responses(
        (status = 200, description = "Repair updated", body = Repair),
        (status = 422, description = "Device item not in the expected state", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_repair(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Path(id): Path<i64>,
    Json(data): Json<UpdateRepair>,
) -> AppResult<Json<Repair>> {
    let repair = state.services.repairs.update_repair(facility_id, id, &data).await?;
    Ok(Json(repair))
}

/// Delete a repair
#[utoipa::path(
    delete,
    path = "/repairs/{id}",
    tag = "repairs",
    params(
        ("X-Facility-Id" = i64, Header, description = "Facility scope"),
        ("id" = i64, Path, description = "Repair ID")
    ),
    responses(
        (status = 204, description = "Repair deleted")
    )
)]
pub async fn delete_repair(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    state.services.repairs.delete_repair(facility_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
