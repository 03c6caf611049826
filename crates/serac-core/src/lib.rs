//! Core types for Serac
//!
//! This crate provides the vocabulary shared by every other Serac crate:
//! host-compliant entity ids, the identifier sanitizer, the fixed massif
//! enumeration, jurisdiction lookup for weather alerts, and the classified
//! error a data source returns when a fetch fails.

mod entity_id;
mod jurisdiction;
mod massif;
mod sanitize;
mod source;

pub use entity_id::{EntityId, EntityIdError};
pub use jurisdiction::{resolve_department, Department, DEPARTMENTS};
pub use massif::{MassifError, MassifId, MASSIFS};
pub use sanitize::{sanitize_identifier, FALLBACK_IDENTIFIER};
pub use source::{FetchErrorKind, SourceError, SourceKind};

/// Integration domain, used as the platform name and device identifier domain
pub const DOMAIN: &str = "serac";

/// Manufacturer reported on every device
pub const MANUFACTURER: &str = "Météo-France";

/// Format a coordinate the way it appears in unique ids and device identifiers.
///
/// Whole numbers keep a trailing `.0` so that `46.0` and `46` never produce
/// two different identifiers for the same location.
pub fn format_coordinate(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_coordinate() {
        assert_eq!(format_coordinate(45.92), "45.92");
        assert_eq!(format_coordinate(46.0), "46.0");
        assert_eq!(format_coordinate(-1.5), "-1.5");
        assert_eq!(format_coordinate(6.87), "6.87");
    }
}
