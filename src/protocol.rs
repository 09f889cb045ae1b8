//! Decoder for the `/states/all` JSON response.
//!
//! Each state vector arrives as a positional array whose columns mix strings,
//! numbers, booleans and nulls:
//!
//! ```text
//! [0] icao24  [1] callsign  [2] origin_country  [3] time_position
//! [4] last_contact  [5] longitude  [6] latitude  [7] baro_altitude
//! [8] on_ground  [9] velocity  ...
//! ```
//!
//! Rows that lack a required column are dropped one by one; only a response
//! that is not valid JSON fails as a whole.

use crate::types::AircraftState;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Malformed response: {0}")]
    Json(#[from] serde_json::Error),
}

const COL_ICAO24: usize = 0;
const COL_CALLSIGN: usize = 1;
const COL_LONGITUDE: usize = 5;
const COL_LATITUDE: usize = 6;
const COL_ALTITUDE: usize = 7;
const COL_VELOCITY: usize = 9;

/// Rows with this many columns or fewer are rejected.
const MIN_COLUMNS_EXCLUSIVE: usize = 9;

/// A single cell of a state-vector row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RowValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl RowValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RowValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value, with integers coerced to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RowValue::Float(v) => Some(*v),
            RowValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// Top-level `/states/all` payload.
#[derive(Debug, Deserialize)]
pub struct StatesResponse {
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub states: Option<Vec<Vec<RowValue>>>,
}

/// Parse a response body into the rows that decode cleanly.
pub fn parse_states(data: &[u8]) -> Result<Vec<AircraftState>, ParseError> {
    let response: StatesResponse = serde_json::from_slice(data)?;
    let rows = response.states.unwrap_or_default();
    let total = rows.len();

    let states: Vec<AircraftState> = rows.iter().filter_map(|row| decode_row(row)).collect();

    if states.len() < total {
        tracing::debug!("Dropped {} of {} state vectors", total - states.len(), total);
    }

    Ok(states)
}

/// Decode one row, or `None` if it is unusable.
pub fn decode_row(row: &[RowValue]) -> Option<AircraftState> {
    if row.len() <= MIN_COLUMNS_EXCLUSIVE {
        return None;
    }

    let icao24 = row[COL_ICAO24].as_str()?;
    let longitude = row[COL_LONGITUDE].as_f64()?;
    let latitude = row[COL_LATITUDE].as_f64()?;
    if longitude.is_nan() || latitude.is_nan() {
        return None;
    }

    let number_or_zero = |col: usize| row[col].as_f64().unwrap_or(0.0);

    Some(AircraftState {
        icao24: icao24.to_string(),
        callsign: row[COL_CALLSIGN].as_str().map(str::trim).unwrap_or("").to_string(),
        longitude,
        latitude,
        altitude_m: number_or_zero(COL_ALTITUDE),
        velocity_ms: number_or_zero(COL_VELOCITY),
    })
}
