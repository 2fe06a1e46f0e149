//! Scan-session issuance: the one flow that touches the vehicle/geo lookup.
//!
//! The lookup itself lives in the vehicle service; here it is a collaborator
//! behind [`VehicleDirectory`]. The flow validates the QR short code, matches
//! the supplied vehicle number, checks scanner proximity and seals a
//! [`SessionClaims`] token.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use tracing::debug;
use utoipa::ToSchema;

use crate::token::{self, SessionClaims, KEY_LEN};

/// Scanner must be within this distance of the vehicle's registered location
/// when the record carries one.
pub const MAX_SCAN_DISTANCE_METERS: f64 = 500.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    pub short_code: String,
    pub vehicle_number: String,
    pub location: GeoPoint,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueResponse {
    pub session_token: String,
    pub vehicle_number: String,
    pub make: String,
    pub model: String,
    pub color: String,
}

/// What the vehicle service knows about a tagged vehicle.
#[derive(Debug, Clone)]
pub struct VehicleRecord {
    pub vehicle_id: String,
    pub owner_id: String,
    /// Canonical form: uppercase, no separators.
    pub vehicle_number: String,
    pub make: String,
    pub model: String,
    pub color: String,
    /// Registered location, when the owner provided one.
    pub location: Option<GeoPoint>,
}

/// Collaborator seam over the vehicle service.
pub trait VehicleDirectory: Send + Sync {
    fn find_by_short_code<'a>(
        &'a self,
        short_code: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<VehicleRecord>>> + Send + 'a>>;
}

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    /// Unknown short code. Same external message as a mismatch so vehicle
    /// numbers cannot be enumerated against known codes.
    #[error("vehicle verification failed")]
    UnknownCode,
    /// Short code exists but the supplied number does not match.
    #[error("vehicle verification failed")]
    VehicleMismatch,
    #[error("invalid vehicle number")]
    InvalidVehicleNumber,
    #[error("scanner too far from vehicle")]
    TooFar { distance_meters: f64 },
    #[error("vehicle lookup failed")]
    Lookup(#[from] anyhow::Error),
    #[error("failed to seal session token")]
    Seal(#[from] token::Error),
}

/// Run the full issuance flow and mint a session token.
///
/// # Errors
/// See [`IssueError`]; `UnknownCode` and `VehicleMismatch` must be collapsed
/// to one message at the HTTP boundary.
pub async fn issue(
    directory: &dyn VehicleDirectory,
    request: &IssueRequest,
    key: &[u8; KEY_LEN],
    now: i64,
) -> Result<IssueResponse, IssueError> {
    let number = canonicalize_vehicle_number(&request.vehicle_number)?;

    let record = directory
        .find_by_short_code(&request.short_code)
        .await?
        .ok_or(IssueError::UnknownCode)?;

    if record.vehicle_number != number {
        debug!(short_code = %request.short_code, "vehicle number mismatch");
        return Err(IssueError::VehicleMismatch);
    }

    if let Some(registered) = record.location {
        let distance_meters = haversine_meters(request.location, registered);
        if distance_meters > MAX_SCAN_DISTANCE_METERS {
            debug!(distance_meters, "scanner outside proximity radius");
            return Err(IssueError::TooFar { distance_meters });
        }
    }

    let claims = SessionClaims::new(
        record.vehicle_number.clone(),
        record.vehicle_id,
        record.owner_id,
        request.location.latitude,
        request.location.longitude,
        now,
    );
    let session_token = token::seal(&claims, key)?;

    Ok(IssueResponse {
        session_token,
        vehicle_number: record.vehicle_number,
        make: record.make,
        model: record.model,
        color: record.color,
    })
}

/// Uppercase, strip separators, validate shape.
///
/// # Errors
/// Returns `IssueError::InvalidVehicleNumber` if the result is not 5-12
/// alphanumerics.
pub fn canonicalize_vehicle_number(raw: &str) -> Result<String, IssueError> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Z0-9]{5,12}$").unwrap_or_else(|err| {
            // pattern is a literal, this cannot fail
            unreachable!("vehicle number pattern: {err}")
        })
    });

    let canonical: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase();

    if pattern.is_match(&canonical) {
        Ok(canonical)
    } else {
        Err(IssueError::InvalidVehicleNumber)
    }
}

/// Great-circle distance in meters.
#[must_use]
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}
