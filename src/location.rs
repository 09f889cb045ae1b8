//! Source of the reference point.

use crate::geo::Coordinates;
use parking_lot::RwLock;

/// Supplies the reference position and, optionally, a place name for it.
pub trait LocationProvider: Send + Sync {
    fn current_coordinates(&self) -> Option<Coordinates>;

    /// Best-effort human-readable name. Not needed for correctness.
    fn current_place_name(&self) -> Option<String> {
        None
    }
}

/// A location that only changes when updated explicitly.
#[derive(Debug, Default)]
pub struct FixedLocation {
    coordinates: RwLock<Option<Coordinates>>,
    place_name: RwLock<Option<String>>,
}

impl FixedLocation {
    pub fn new(coordinates: Option<Coordinates>, place_name: Option<String>) -> Self {
        Self {
            coordinates: RwLock::new(coordinates),
            place_name: RwLock::new(place_name),
        }
    }

    /// Record a new fix, as a location service would on update.
    pub fn update(&self, coordinates: Coordinates, place_name: Option<String>) {
        *self.coordinates.write() = Some(coordinates);
        *self.place_name.write() = place_name;
    }
}

impl LocationProvider for FixedLocation {
    fn current_coordinates(&self) -> Option<Coordinates> {
        *self.coordinates.read()
    }

    fn current_place_name(&self) -> Option<String> {
        self.place_name.read().clone()
    }
}

/// Resolve the reference point, falling back when there is no valid fix.
pub fn reference_point(provider: &dyn LocationProvider, fallback: Coordinates) -> Coordinates {
    match provider.current_coordinates() {
        Some(c) if c.is_valid() => c,
        Some(c) => {
            tracing::warn!("Ignoring invalid location fix {}, using {}", c, fallback);
            fallback
        }
        None => fallback,
    }
}
