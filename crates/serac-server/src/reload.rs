//! Applying the locations of serac.yaml to the configuration entries
//!
//! Locations are matched to entries by coordinates. Every add, option update,
//! prefix migration and removal goes through [`ConfigEntries`], so the
//! integration sees the same change notifications a user edit would produce.

use std::collections::HashSet;

use serac_config::{ConfigResult, LocationConfig, SeracConfig};
use serac_config_entries::{ConfigEntries, ConfigurationEntry, EntryOptions};
use tracing::{debug, error, info};

/// What one reload did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: usize,
    pub updated: usize,
    pub migrated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Build the entry a location describes
pub fn entry_from_location(location: &LocationConfig) -> ConfigResult<ConfigurationEntry> {
    let mut entry =
        ConfigurationEntry::new(&location.location_name, location.latitude, location.longitude)
            .with_massifs(location.massifs()?);
    if let Some(prefix) = &location.entity_prefix {
        entry = entry.with_prefix(prefix);
    }
    entry.bulletin_token = location.bulletin_secret();
    entry.alert_token = location.alert_secret();
    Ok(entry)
}

pub async fn apply_locations(entries: &ConfigEntries, config: &SeracConfig) -> ReloadSummary {
    let mut summary = ReloadSummary::default();
    let mut wanted = HashSet::new();

    for location in &config.locations {
        let key = location.key();
        wanted.insert(key.clone());

        let candidate = match entry_from_location(location) {
            Ok(entry) => entry,
            Err(e) => {
                error!(location = %location.location_name, "Skipping location: {}", e);
                summary.failed += 1;
                continue;
            }
        };

        match entries.get_by_unique_id(&key) {
            None => match entries.add(candidate).await {
                Ok(entry) => {
                    debug!(entry_id = %entry.entry_id, "Added {}", entry.location_name);
                    summary.added += 1;
                }
                Err(e) => {
                    error!(location = %location.location_name, "Cannot add location: {}", e);
                    summary.failed += 1;
                }
            },
            Some(existing) => {
                update_existing(entries, &existing, &candidate, location, &mut summary).await
            }
        }
    }

    let stale: Vec<ConfigurationEntry> = entries
        .iter()
        .filter(|entry| !wanted.contains(&entry.unique_id()))
        .collect();
    for entry in stale {
        match entries.remove(&entry.entry_id).await {
            Ok(_) => summary.removed += 1,
            Err(e) => {
                error!(entry_id = %entry.entry_id, "Cannot remove entry: {}", e);
                summary.failed += 1;
            }
        }
    }

    info!(
        added = summary.added,
        updated = summary.updated,
        migrated = summary.migrated,
        removed = summary.removed,
        failed = summary.failed,
        "Applied {} locations",
        config.locations.len()
    );
    summary
}

async fn update_existing(
    entries: &ConfigEntries,
    existing: &ConfigurationEntry,
    candidate: &ConfigurationEntry,
    location: &LocationConfig,
    summary: &mut ReloadSummary,
) {
    let entry_id = existing.entry_id.as_str();
    let mut changed = false;

    let options_changed = existing.massif_ids != candidate.massif_ids
        || !existing.same_bulletin_token(candidate)
        || !existing.same_alert_token(candidate);
    if options_changed {
        changed = true;
        match entries
            .update_options(entry_id, EntryOptions::from_entry(candidate))
            .await
        {
            Ok(_) => summary.updated += 1,
            Err(e) => {
                error!(entry_id, "Cannot update options: {}", e);
                summary.failed += 1;
            }
        }
    }

    // Suggested prefixes never move an existing entry
    if location.entity_prefix.is_some() && existing.entity_prefix != candidate.entity_prefix {
        changed = true;
        match entries
            .migrate_prefix(entry_id, &candidate.entity_prefix)
            .await
        {
            Ok(_) => summary.migrated += 1,
            Err(e) => {
                error!(entry_id, "Cannot migrate prefix: {}", e);
                summary.failed += 1;
            }
        }
    }

    if !changed {
        summary.unchanged += 1;
    }
}
