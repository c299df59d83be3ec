//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{devices, health, rentals, repairs};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Device Rental API",
        version = "1.0.0",
        description = "Assistive device inventory, rental and repair REST API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Devices
        devices::list_devices,
        devices::get_device,
        devices::create_device,
        devices::update_device,
        devices::delete_device,
        devices::list_aggregates,
        devices::get_aggregate,
        devices::reconcile_aggregates,
        // Rentals
        rentals::create_rental,
        rentals::list_rentals,
        rentals::get_rental,
        rentals::return_rental,
        rentals::list_overdue,
        rentals::mark_overdue,
        // Repairs
        repairs::list_repairs,
        repairs::get_repair,
        repairs::create_repair,
        repairs::update_repair,
        repairs::delete_repair,
    ),
    components(
        schemas(
            // Enums
            crate::models::enums::DeviceType,
            crate::models::enums::DeviceStatus,
            crate::models::enums::RentalStatus,
            crate::models::enums::RepairStatus,
            // Devices
            crate::models::device_item::DeviceItem,
            crate::models::device_item::DeviceItemQuery,
            crate::models::device_item::CreateDeviceItem,
            crate::models::device_item::UpdateDeviceItem,
            crate::models::aggregate::DeviceTypeAggregate,
            crate::models::aggregate::StatusCounts,
            crate::models::aggregate::AggregateDrift,
            // Rentals
            crate::models::rental::Rental,
            crate::models::rental::RentalDevice,
            crate::models::rental::RentalDeviceBinding,
            crate::models::rental::RentalDetails,
            crate::models::rental::RentalDeviceLine,
            crate::models::rental::CreateRental,
            crate::models::rental::ReturnRental,
            crate::models::rental::RentalQuery,
            crate::models::rental::OverdueInfo,
            crate::models::rental::OverdueSeverity,
            crate::models::rental::OverdueSweep,
            // Repairs
            crate::models::repair::Repair,
            crate::models::repair::CreateRepair,
            crate::models::repair::UpdateRepair,
            crate::models::repair::RepairQuery,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "devices", description = "Device items and inventory counters"),
        (name = "rentals", description = "Rentals, returns and overdue tracking"),
        (name = "repairs", description = "Repair workflow")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
