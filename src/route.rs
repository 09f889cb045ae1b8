//! Route labels derived from callsigns.
//!
//! The lookup table is closed; there is no external route database.

/// Two-letter airline designator → display name.
const AIRLINE_CODES: &[(&str, &str)] = &[
    ("AA", "American"),
    ("UA", "United"),
    ("DL", "Delta"),
    ("BA", "British Airways"),
    ("LH", "Lufthansa"),
    ("AF", "Air France"),
    ("KL", "KLM"),
    ("IB", "Iberia"),
    ("UX", "Air Europa"),
    ("VY", "Vueling"),
    ("FR", "Ryanair"),
    ("U2", "easyJet"),
    ("EK", "Emirates"),
    ("QR", "Qatar Airways"),
];

/// Resolve a callsign such as `"AA1234"` into `"American 1234"`.
pub fn resolve_route(callsign: &str) -> Option<String> {
    let callsign = callsign.trim();
    if callsign.chars().count() < 4 {
        return None;
    }

    let (code, flight) = callsign.split_at(callsign.char_indices().nth(2)?.0);

    AIRLINE_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| format!("{} {}", name, flight))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_airline() {
        assert_eq!(resolve_route("AA1234").as_deref(), Some("American 1234"));
        assert_eq!(resolve_route("  IB3170 ").as_deref(), Some("Iberia 3170"));
    }

    #[test]
    fn test_unknown_airline() {
        assert_eq!(resolve_route("ZZ99"), None);
    }

    #[test]
    fn test_too_short() {
        assert_eq!(resolve_route("AB"), None);
        assert_eq!(resolve_route("AA1"), None);
        assert_eq!(resolve_route("   "), None);
    }

    #[test]
    fn test_non_ascii_callsign() {
        assert_eq!(resolve_route("ÄÖ123"), None);
    }
}
