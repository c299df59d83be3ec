//! API handlers for device rental REST endpoints

pub mod devices;
pub mod health;
pub mod openapi;
pub mod rentals;
pub mod repairs;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderName},
};

use crate::{error::AppError, AppState};

/// Header carrying the facility every request is scoped to
pub const FACILITY_HEADER: HeaderName = HeaderName::from_static("x-facility-id");

/// Extractor for the facility a request operates on
pub struct FacilityScope(pub i64);

#[async_trait]
impl FromRequestParts<AppState> for FacilityScope {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(&FACILITY_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::BadRequest("Missing X-Facility-Id header".to_string()))?;

        match raw.trim().parse::<i64>() {
            Ok(id) if id > 0 => Ok(FacilityScope(id)),
            _ => Err(AppError::BadRequest(format!("Invalid X-Facility-Id header '{}'", raw))),
        }
    }
}
