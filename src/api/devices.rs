//! Device item and aggregate counter endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    error::AppResult,
    models::{
        aggregate::{AggregateDrift, DeviceTypeAggregate},
        device_item::{CreateDeviceItem, DeviceItem, DeviceItemQuery, UpdateDeviceItem},
        enums::DeviceType,
    },
};

use super::FacilityScope;

/// List device items of the facility
#[utoipa::path(
    get,
    path = "/devices",
    tag = "devices",
    params(
        ("X-Facility-Id" = i64, Header, description = "Facility scope"),
        ("device_type" = Option<DeviceType>, Query, description = "Filter by device type"),
        ("status" = Option<crate::models::enums::DeviceStatus>, Query, description = "Filter by status")
    ),
    responses(
        (status = 200, description = "Device items", body = Vec<DeviceItem>)
    )
)]
pub async fn list_devices(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Query(query): Query<DeviceItemQuery>,
) -> AppResult<Json<Vec<DeviceItem>>> {
    let items = state.services.inventory.list_items(facility_id, &query).await?;
    Ok(Json(items))
}

/// Get a device item
#[utoipa::path(
    get,
    path = "/devices/{id}",
    tag = "devices",
    params(
        ("X-Facility-Id" = i64, Header, description = "Facility scope"),
        ("id" = i64, Path, description = "Device item ID")
    ),
    responses(
        (status = 200, description = "Device item", body = DeviceItem),
        (status = 404, description = "Device item not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_device(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Path(id): Path<i64>,
) -> AppResult<Json<DeviceItem>> {
    let item = state.services.inventory.get_item(facility_id, id).await?;
    Ok(Json(item))
}

/// Register a device item
#[utoipa::path(
    post,
    path = "/devices",
    tag = "devices",
    params(("X-Facility-Id" = i64, Header, description = "Facility scope")),
    request_body = CreateDeviceItem,
    responses(
        (status = 201, description = "Device item registered", body = DeviceItem),
        (status = 409, description = "Device code already exists", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_device(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Json(data): Json<CreateDeviceItem>,
) -> AppResult<(StatusCode, Json<DeviceItem>)> {
    let item = state.services.inventory.create_item(facility_id, &data).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// Update a device item
#[utoipa::path(
    put,
    path = "/devices/{id}",
    tag = "devices",
    params(
        ("X-Facility-Id" = i64, Header, description = "Facility scope"),
        ("id" = i64, Path, description = "Device item ID")
    ),
    request_body = UpdateDeviceItem,
    responses(
        (status = 200, description = "Device item updated", body = DeviceItem),
        (status = 409, description = "Device code already exists", body = crate::error::ErrorResponse),
        (status = 422, description = "Status change not allowed", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_device(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Path(id): Path<i64>,
    Json(data): Json<UpdateDeviceItem>,
) -> AppResult<Json<DeviceItem>> {
    let item = state.services.inventory.update_item(facility_id, id, &data).await?;
    Ok(Json(item))
}

/// Delete a device item
#[utoipa::path(
    delete,
    path = "/devices/{id}",
    tag = "devices",
    params(
        ("X-Facility-Id" = i64, Header, description = "Facility scope"),
        ("id" = i64, Path, description = "Device item ID")
    ),
    responses(
        (status = 204, description = "Device item deleted"),
        (status = 422, description = "Device item is rented", body = crate::error::ErrorResponse)
    )
)]
pub async fn delete_device(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    state.services.inventory.delete_item(facility_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List aggregate counters of the facility
#[utoipa::path(
    get,
    path = "/aggregates",
    tag = "devices",
    params(("X-Facility-Id" = i64, Header, description = "Facility scope")),
    responses(
        (status = 200, description = "Counters per device type", body = Vec<DeviceTypeAggregate>)
    )
)]
pub async fn list_aggregates(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
) -> AppResult<Json<Vec<DeviceTypeAggregate>>> {
    let aggregates = state.services.inventory.list_aggregates(facility_id).await?;
    Ok(Json(aggregates))
}

/// Get the counters of one device type
#[utoipa::path(
    get,
    path = "/aggregates/{device_type}",
    tag = "devices",
    params(
        ("X-Facility-Id" = i64, Header, description = "Facility scope"),
        ("device_type" = DeviceType, Path, description = "Device type")
    ),
    responses(
        (status = 200, description = "Counters", body = DeviceTypeAggregate)
    )
)]
pub async fn get_aggregate(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
    Path(device_type): Path<DeviceType>,
) -> AppResult<Json<DeviceTypeAggregate>> {
    let aggregate = state
        .services
        .inventory
        .get_aggregate(facility_id, device_type)
        .await?;
    Ok(Json(aggregate))
}

/// Recount counters from device items and fix any drift
#[utoipa::path(
    post,
    path = "/aggregates/reconcile",
    tag = "devices",
    params(("X-Facility-Id" = i64, Header, description = "Facility scope")),
    responses(
        (status = 200, description = "Corrected drift (empty when consistent)", body = Vec<AggregateDrift>)
    )
)]
pub async fn reconcile_aggregates(
    State(state): State<crate::AppState>,
    FacilityScope(facility_id): FacilityScope,
) -> AppResult<Json<Vec<AggregateDrift>>> {
    let drift = state.services.inventory.reconcile_aggregates(facility_id).await?;
    Ok(Json(drift))
}
