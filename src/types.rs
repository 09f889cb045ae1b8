//! Core data types for nearby-aircraft tracking.

use crate::geo::{haversine_km, Coordinates};
use crate::route::resolve_route;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Callsign shown when the transponder reports none.
pub const UNKNOWN_CALLSIGN: &str = "Unknown";

/// One decoded state-vector row.
#[derive(Debug, Clone, PartialEq)]
pub struct AircraftState {
    /// ICAO 24-bit address as lowercase hex
    pub icao24: String,
    /// Trimmed callsign, possibly empty
    pub callsign: String,
    pub longitude: f64,
    pub latitude: f64,
    /// Barometric altitude in meters
    pub altitude_m: f64,
    /// Ground speed in m/s
    pub velocity_ms: f64,
}

impl AircraftState {
    pub fn position(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// An aircraft seen in one sighting cycle, ranked by distance.
///
/// The aircraft type is not part of this record; it is looked up from the
/// metadata cache by `icao24` when needed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aircraft {
    pub icao24: String,
    pub callsign: String,
    pub altitude_m: f64,
    pub position: Coordinates,
    pub distance_km: f64,
    /// Ground speed in m/s, absent when not reported
    pub speed_ms: Option<f64>,
    pub route: Option<String>,
}

impl Aircraft {
    /// Derive the display record for `state` relative to `reference`.
    pub fn from_state(state: AircraftState, reference: Coordinates) -> Self {
        let position = state.position();
        let route = resolve_route(&state.callsign);
        let callsign = if state.callsign.is_empty() {
            UNKNOWN_CALLSIGN.to_string()
        } else {
            state.callsign
        };

        Self {
            icao24: state.icao24,
            callsign,
            altitude_m: state.altitude_m,
            position,
            distance_km: haversine_km(reference, position),
            speed_ms: (state.velocity_ms > 0.0).then_some(state.velocity_ms),
            route,
        }
    }
}

impl fmt::Display for Aircraft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {:.2} km, {:.0} m",
            self.callsign, self.icao24, self.distance_km, self.altitude_m
        )?;
        if let Some(speed) = self.speed_ms {
            write!(f, ", {:.0} km/h", speed * 3.6)?;
        }
        if let Some(ref route) = self.route {
            write!(f, ", {}", route)?;
        }
        Ok(())
    }
}

/// Static per-aircraft metadata. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AircraftMetadata {
    #[serde(default)]
    pub registration: Option<String>,
    #[serde(default)]
    pub manufacturer_name: Option<String>,
    #[serde(default)]
    pub manufacturer_icao: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, rename = "typecode")]
    pub type_code: Option<String>,
    #[serde(default, rename = "operator")]
    pub operator_name: Option<String>,
    #[serde(default)]
    pub operator_callsign: Option<String>,
    #[serde(default)]
    pub operator_icao: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// Build year, or a full build date from which the year is taken
    #[serde(default, rename = "built", deserialize_with = "lenient_string")]
    pub build_year: Option<String>,
}

/// Accept a string, a number or null.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Human-readable aircraft type, e.g. `"2015 AIRBUS A320 IBERIA"`.
///
/// Falls back to the type code when none of year, manufacturer, model or
/// operator is present.
pub fn describe_type(metadata: &AircraftMetadata) -> Option<String> {
    let year = present(&metadata.build_year).map(|b| b.split('-').next().unwrap_or(b).to_string());

    let parts: Vec<String> = year
        .into_iter()
        .chain(present(&metadata.manufacturer_name).map(str::to_uppercase))
        .chain(present(&metadata.model).map(str::to_uppercase))
        .chain(present(&metadata.operator_name).map(str::to_uppercase))
        .collect();

    if !parts.is_empty() {
        return Some(parts.join(" "));
    }

    present(&metadata.type_code).map(str::to_uppercase)
}

/// A first sighting recorded in the history list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SightingHistoryEntry {
    pub icao24: String,
    pub callsign: String,
    pub route: Option<String>,
    /// Type description as known at the time of the sighting
    pub aircraft_type: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SightingHistoryEntry {
    pub fn capture(aircraft: &Aircraft, aircraft_type: Option<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            icao24: aircraft.icao24.clone(),
            callsign: aircraft.callsign.clone(),
            route: aircraft.route.clone(),
            aircraft_type,
            timestamp,
        }
    }
}

impl fmt::Display for SightingHistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}]",
            self.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S"),
            self.callsign,
            self.icao24
        )?;
        if let Some(ref t) = self.aircraft_type {
            write!(f, " {}", t)?;
        }
        if let Some(ref r) = self.route {
            write!(f, " ({})", r)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(callsign: &str, velocity: f64) -> AircraftState {
        AircraftState {
            icao24: "34520d".to_string(),
            callsign: callsign.to_string(),
            longitude: -3.704,
            latitude: 40.43,
            altitude_m: 1200.0,
            velocity_ms: velocity,
        }
    }

    #[test]
    fn test_blank_callsign_is_unknown() {
        let aircraft = Aircraft::from_state(state("", 0.0), Coordinates::new(40.417, -3.704));
        assert_eq!(aircraft.callsign, UNKNOWN_CALLSIGN);
        assert_eq!(aircraft.route, None);
    }

    #[test]
    fn test_speed_absent_when_zero() {
        let reference = Coordinates::new(40.417, -3.704);
        assert_eq!(Aircraft::from_state(state("IB3170", 0.0), reference).speed_ms, None);

        let moving = Aircraft::from_state(state("IB3170", 120.5), reference);
        assert_eq!(moving.speed_ms, Some(120.5));
        assert_eq!(moving.route.as_deref(), Some("Iberia 3170"));
        assert!((moving.distance_km - 1.445).abs() < 0.01);
    }

    #[test]
    fn test_metadata_from_json() {
        let json = r#"{
            "registration": "EC-MXV",
            "manufacturerName": "Airbus",
            "manufacturerIcao": "AIRBUS",
            "model": "A320 251N",
            "typecode": "A20N",
            "operator": "Iberia",
            "operatorCallsign": "IBERIA",
            "operatorIcao": "IBE",
            "country": "Spain",
            "built": "2019-03-01",
            "unknownField": 1
        }"#;

        let metadata: AircraftMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.type_code.as_deref(), Some("A20N"));
        assert_eq!(
            describe_type(&metadata).as_deref(),
            Some("2019 AIRBUS A320 251N IBERIA")
        );
    }

    #[test]
    fn test_describe_type_partial_fields() {
        let metadata = AircraftMetadata {
            model: Some("Cessna 172".to_string()),
            operator_name: Some("".to_string()),
            build_year: Some("1998".to_string()),
            ..Default::default()
        };
        assert_eq!(describe_type(&metadata).as_deref(), Some("1998 CESSNA 172"));
    }

    #[test]
    fn test_describe_type_falls_back_to_type_code() {
        let metadata = AircraftMetadata {
            type_code: Some("b738".to_string()),
            registration: Some("EC-ABC".to_string()),
            ..Default::default()
        };
        assert_eq!(describe_type(&metadata).as_deref(), Some("B738"));

        assert_eq!(describe_type(&AircraftMetadata::default()), None);
    }

    #[test]
    fn test_numeric_build_year() {
        let metadata: AircraftMetadata = serde_json::from_str(r#"{"built": 2004, "model": null}"#).unwrap();
        assert_eq!(metadata.build_year.as_deref(), Some("2004"));
        assert_eq!(describe_type(&metadata).as_deref(), Some("2004"));
    }
}
