//! Config Entry types
//!
//! A ConfigurationEntry is one user-defined location plus its credentials and
//! massif selection.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serac_core::{format_coordinate, sanitize_identifier, MassifId};
use serde::Serialize;
use thiserror::Error;

use crate::state_machine::InvalidTransition;

/// Longest prefix accepted for entity ids
pub const MAX_PREFIX_LEN: usize = 20;

/// Prefix used when nothing usable can be derived from the location name
pub const DEFAULT_PREFIX: &str = "mountain";

const PREFIX_PATTERN: &str = r"^[a-z][a-z0-9_]{0,19}$";

/// Config entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigEntryState {
    /// Initial state, not yet set up
    #[default]
    NotLoaded,
    /// Engines and registrations being created
    SetupInProgress,
    /// Successfully set up
    Loaded,
    /// Setup failed (recoverable)
    SetupError,
}

/// Why an entry failed validation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EntryValidationError {
    #[error("Location name must not be empty")]
    EmptyName,

    #[error("Latitude {0} is outside -90..90")]
    Latitude(f64),

    #[error("Longitude {0} is outside -180..180")]
    Longitude(f64),

    #[error("Invalid entity prefix '{0}': must start with a letter and contain only a-z, 0-9 and _, at most 20 characters")]
    Prefix(String),
}

/// A configuration entry for one location
#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationEntry {
    /// Unique identifier (ULID)
    pub entry_id: String,

    /// Human-readable display name
    pub location_name: String,

    pub latitude: f64,
    pub longitude: f64,

    /// Fragment every entity id of this entry starts with
    pub entity_prefix: String,

    /// Token for the avalanche bulletin API
    #[serde(skip)]
    pub bulletin_token: Option<SecretString>,

    /// Selected massifs, ordered by id
    pub massif_ids: BTreeSet<MassifId>,

    /// Token for the vigilance API
    #[serde(skip)]
    pub alert_token: Option<SecretString>,

    /// Current lifecycle state
    pub state: ConfigEntryState,

    /// Human-readable explanation for failed states
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl ConfigurationEntry {
    /// Create a new entry; the prefix is suggested from the location name
    pub fn new(location_name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        let location_name = location_name.into();
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            entity_prefix: suggest_prefix(&location_name),
            location_name,
            latitude,
            longitude,
            bulletin_token: None,
            massif_ids: BTreeSet::new(),
            alert_token: None,
            state: ConfigEntryState::NotLoaded,
            reason: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.entity_prefix = prefix.into();
        self
    }

    pub fn with_bulletin_token(mut self, token: impl Into<String>) -> Self {
        self.bulletin_token = non_blank_token(token.into());
        self
    }

    pub fn with_massifs(mut self, massifs: impl IntoIterator<Item = MassifId>) -> Self {
        self.massif_ids = massifs.into_iter().collect();
        self
    }

    pub fn with_alert_token(mut self, token: impl Into<String>) -> Self {
        self.alert_token = non_blank_token(token.into());
        self
    }

    /// Duplicate-prevention key: one entry per coordinate pair
    pub fn unique_id(&self) -> String {
        format!(
            "{}_{}",
            format_coordinate(self.latitude),
            format_coordinate(self.longitude)
        )
    }

    /// Check if entry is loaded
    pub fn is_loaded(&self) -> bool {
        self.state == ConfigEntryState::Loaded
    }

    pub fn has_bulletin_token(&self) -> bool {
        self.bulletin_token.is_some()
    }

    pub fn has_alert_token(&self) -> bool {
        self.alert_token.is_some()
    }

    /// Whether both entries carry the same bulletin token
    pub fn same_bulletin_token(&self, other: &ConfigurationEntry) -> bool {
        same_token(&self.bulletin_token, &other.bulletin_token)
    }

    /// Whether both entries carry the same alert token
    pub fn same_alert_token(&self, other: &ConfigurationEntry) -> bool {
        same_token(&self.alert_token, &other.alert_token)
    }

    pub fn validate(&self) -> Result<(), EntryValidationError> {
        if self.location_name.trim().is_empty() {
            return Err(EntryValidationError::EmptyName);
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(EntryValidationError::Latitude(self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(EntryValidationError::Longitude(self.longitude));
        }
        if !is_valid_prefix(&self.entity_prefix) {
            return Err(EntryValidationError::Prefix(self.entity_prefix.clone()));
        }
        Ok(())
    }

    /// Attempt to transition to a new state with validation.
    ///
    /// On success, updates the state and reason fields.
    pub fn try_set_state(
        &mut self,
        new_state: ConfigEntryState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        self.state.try_transition(new_state)?;
        self.state = new_state;
        self.reason = reason;
        Ok(())
    }
}

/// Options a user can change on an existing entry
///
/// Applying options replaces the massif selection and both tokens wholesale:
/// a missing or blank token removes the stored one.
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    pub massif_ids: BTreeSet<MassifId>,
    pub bulletin_token: Option<SecretString>,
    pub alert_token: Option<SecretString>,
}

impl EntryOptions {
    pub fn new(massifs: impl IntoIterator<Item = MassifId>) -> Self {
        Self {
            massif_ids: massifs.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Current options of an entry, as a starting point for edits
    pub fn from_entry(entry: &ConfigurationEntry) -> Self {
        Self {
            massif_ids: entry.massif_ids.clone(),
            bulletin_token: entry.bulletin_token.clone(),
            alert_token: entry.alert_token.clone(),
        }
    }

    pub fn bulletin_token(mut self, token: impl Into<String>) -> Self {
        self.bulletin_token = non_blank_token(token.into());
        self
    }

    pub fn alert_token(mut self, token: impl Into<String>) -> Self {
        self.alert_token = non_blank_token(token.into());
        self
    }
}

fn non_blank_token(token: String) -> Option<SecretString> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(SecretString::from(trimmed.to_string()))
    }
}

fn same_token(a: &Option<SecretString>, b: &Option<SecretString>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.expose_secret() == b.expose_secret(),
        _ => false,
    }
}

fn prefix_regex() -> Option<&'static Regex> {
    static PREFIX_RE: OnceLock<Option<Regex>> = OnceLock::new();
    PREFIX_RE
        .get_or_init(|| Regex::new(PREFIX_PATTERN).ok())
        .as_ref()
}

/// Whether `prefix` can head an entity id
pub fn is_valid_prefix(prefix: &str) -> bool {
    prefix_regex().is_some_and(|re| re.is_match(prefix))
}

/// Suggest an entity prefix from a location name
///
/// Takes the first word, drops everything that is not a letter or digit
/// (accents are folded first), and makes sure the result starts with a letter.
pub fn suggest_prefix(location_name: &str) -> String {
    let first_word = location_name.split_whitespace().next().unwrap_or_default();
    let mut prefix: String = sanitize_identifier(first_word)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    if prefix.is_empty() {
        return DEFAULT_PREFIX.to_string();
    }
    if !prefix.starts_with(|c: char| c.is_ascii_lowercase()) {
        prefix.insert(0, 'm');
    }
    prefix.truncate(MAX_PREFIX_LEN);
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn massif(id: u16) -> MassifId {
        MassifId::new(id).unwrap()
    }

    #[test]
    fn test_entry_new() {
        let entry = ConfigurationEntry::new("Chamonix Mont-Blanc", 45.92, 6.87);
        assert_eq!(entry.entity_prefix, "chamonix");
        assert_eq!(entry.state, ConfigEntryState::NotLoaded);
        assert_eq!(entry.unique_id(), "45.92_6.87");
        assert!(!entry.entry_id.is_empty());
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn test_entry_builder() {
        let entry = ConfigurationEntry::new("Briançon", 44.9, 6.64)
            .with_prefix("brianconnais")
            .with_bulletin_token("abc")
            .with_alert_token("  ")
            .with_massifs([massif(4), massif(3), massif(4)]);

        assert!(entry.has_bulletin_token());
        assert!(!entry.has_alert_token());
        let ids: Vec<u16> = entry.massif_ids.iter().map(|m| m.get()).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[test]
    fn test_whole_coordinates_in_unique_id() {
        let entry = ConfigurationEntry::new("Col", 45.0, 6.0);
        assert_eq!(entry.unique_id(), "45.0_6.0");
    }

    #[test]
    fn test_validate() {
        let bad_lat = ConfigurationEntry::new("X", 91.0, 6.0);
        assert!(matches!(
            bad_lat.validate(),
            Err(EntryValidationError::Latitude(_))
        ));

        let bad_lon = ConfigurationEntry::new("X", 45.0, -181.0);
        assert!(matches!(
            bad_lon.validate(),
            Err(EntryValidationError::Longitude(_))
        ));

        let empty = ConfigurationEntry::new("  ", 45.0, 6.0);
        assert_eq!(empty.validate(), Err(EntryValidationError::EmptyName));

        let bad_prefix = ConfigurationEntry::new("Les Arcs", 45.57, 6.8).with_prefix("Arcs!");
        assert!(matches!(
            bad_prefix.validate(),
            Err(EntryValidationError::Prefix(_))
        ));
    }

    #[test]
    fn test_prefix_rules() {
        assert!(is_valid_prefix("chamonix"));
        assert!(is_valid_prefix("les_2_alpes"));
        assert!(is_valid_prefix("a"));
        assert!(!is_valid_prefix(""));
        assert!(!is_valid_prefix("2alpes"));
        assert!(!is_valid_prefix("_alpes"));
        assert!(!is_valid_prefix("dévoluy"));
        assert!(!is_valid_prefix("abcdefghijklmnopqrstu"));
    }

    #[test]
    fn test_suggest_prefix() {
        assert_eq!(suggest_prefix("Chamonix Mont-Blanc"), "chamonix");
        assert_eq!(suggest_prefix("Dévoluy"), "devoluy");
        assert_eq!(suggest_prefix("Val-d'Isère"), "valdisere");
        assert_eq!(suggest_prefix("2 Alpes"), "m2");
        assert_eq!(suggest_prefix(""), "mountain");
        assert_eq!(suggest_prefix("!!!"), "mountain");
        assert_eq!(
            suggest_prefix("Saintjeandemauriennevillage"),
            "saintjeandemaurienne"
        );
        for name in ["Chamonix", "Dévoluy 2", "2 Alpes", "", "Val-d'Isère"] {
            assert!(is_valid_prefix(&suggest_prefix(name)), "{name}");
        }
    }

    #[test]
    fn test_token_comparison() {
        let a = ConfigurationEntry::new("A", 45.0, 6.0).with_bulletin_token("t1");
        let b = a.clone();
        let c = a.clone().with_bulletin_token("t2");
        let d = ConfigurationEntry::new("A", 45.0, 6.0);
        assert!(a.same_bulletin_token(&b));
        assert!(!a.same_bulletin_token(&c));
        assert!(!a.same_bulletin_token(&d));
        assert!(a.same_alert_token(&d));
    }

    #[test]
    fn test_options_from_entry() {
        let entry = ConfigurationEntry::new("A", 45.0, 6.0)
            .with_bulletin_token("t1")
            .with_massifs([massif(3)]);
        let options = EntryOptions::from_entry(&entry).bulletin_token("");
        assert!(options.bulletin_token.is_none());
        assert_eq!(options.massif_ids.len(), 1);
    }

    #[test]
    fn test_serialize_skips_tokens() {
        let entry = ConfigurationEntry::new("A", 45.0, 6.0).with_bulletin_token("secret-token");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("secret-token"));
        assert!(json.contains("\"entity_prefix\":\"a\""));
    }
}
