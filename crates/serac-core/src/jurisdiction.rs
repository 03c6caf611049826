//! Weather-alert jurisdiction lookup
//!
//! Vigilance alerts are published per French department. A location only gets
//! an alert engine when its coordinates fall inside one of the boxes below.

use serde::Serialize;

/// A French department covered by vigilance alerts
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Department {
    pub code: &'static str,
    pub name: &'static str,
    /// (min_lat, max_lat, min_lon, max_lon)
    #[serde(skip)]
    pub bounds: (f64, f64, f64, f64),
}

impl Department {
    fn contains(&self, lat: f64, lon: f64) -> bool {
        let (min_lat, max_lat, min_lon, max_lon) = self.bounds;
        (min_lat..=max_lat).contains(&lat) && (min_lon..=max_lon).contains(&lon)
    }
}

/// Approximate bounding boxes. Boxes overlap at borders; first match wins, so
/// the higher-altitude department of each pair comes first.
pub const DEPARTMENTS: &[Department] = &[
    Department { code: "74", name: "Haute-Savoie", bounds: (45.68, 46.41, 5.80, 7.05) },
    Department { code: "73", name: "Savoie", bounds: (45.05, 45.94, 5.62, 7.19) },
    Department { code: "05", name: "Hautes-Alpes", bounds: (44.18, 45.13, 5.42, 7.08) },
    Department { code: "38", name: "Isère", bounds: (44.69, 45.89, 4.74, 6.36) },
    Department { code: "04", name: "Alpes-de-Haute-Provence", bounds: (43.67, 44.66, 5.49, 6.97) },
    Department { code: "06", name: "Alpes-Maritimes", bounds: (43.48, 44.36, 6.64, 7.72) },
    Department { code: "26", name: "Drôme", bounds: (44.12, 45.34, 4.64, 5.83) },
    Department { code: "01", name: "Ain", bounds: (45.61, 46.52, 4.73, 6.17) },
    Department { code: "64", name: "Pyrénées-Atlantiques", bounds: (42.78, 43.60, -1.79, -0.01) },
    Department { code: "65", name: "Hautes-Pyrénées", bounds: (42.67, 43.61, -0.33, 0.65) },
    Department { code: "09", name: "Ariège", bounds: (42.57, 43.32, 0.83, 2.18) },
    Department { code: "31", name: "Haute-Garonne", bounds: (42.69, 43.92, 0.44, 2.05) },
    Department { code: "66", name: "Pyrénées-Orientales", bounds: (42.33, 42.92, 1.72, 3.18) },
    Department { code: "2B", name: "Haute-Corse", bounds: (42.38, 43.03, 8.53, 9.56) },
    Department { code: "2A", name: "Corse-du-Sud", bounds: (41.33, 42.38, 8.53, 9.41) },
];

/// Resolve the department whose alerts apply to a location
pub fn resolve_department(lat: f64, lon: f64) -> Option<&'static Department> {
    DEPARTMENTS.iter().find(|d| d.contains(lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpine_locations() {
        assert_eq!(resolve_department(45.92, 6.87).map(|d| d.code), Some("74"));
        assert_eq!(resolve_department(45.45, 6.98).map(|d| d.code), Some("73"));
        assert_eq!(resolve_department(44.66, 5.89).map(|d| d.code), Some("05"));
    }

    #[test]
    fn test_pyrenees_and_corsica() {
        assert_eq!(resolve_department(42.90, -0.45).map(|d| d.code), Some("64"));
        assert_eq!(resolve_department(42.50, 2.20).map(|d| d.code), Some("66"));
        assert_eq!(resolve_department(41.90, 8.80).map(|d| d.code), Some("2A"));
    }

    #[test]
    fn test_outside_france() {
        // Zermatt
        assert!(resolve_department(46.02, 7.75).is_none());
        // Innsbruck
        assert!(resolve_department(47.26, 11.39).is_none());
    }
}
