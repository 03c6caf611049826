//! Météo-France vigilance alerts
//!
//! The upstream publishes one map for the whole country; the fetcher keeps
//! only the block of its own department.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serac_coordinator::{FetchResult, Fetcher};
use serac_core::{Department, SourceError};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::http::{cancellable, get_json};

pub struct VigilanceFetcher {
    client: Client,
    url: String,
    department: &'static Department,
    headers: HeaderMap,
    timeout: Duration,
}

impl VigilanceFetcher {
    pub fn new(
        client: Client,
        base_url: &str,
        department: &'static Department,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            url: format!("{}/cartevigilance/encours", base_url.trim_end_matches('/')),
            department,
            headers,
            timeout,
        }
    }

    async fn alerts(&self) -> FetchResult {
        let request = self.client.get(&self.url).headers(self.headers.clone());
        let map = get_json(request, "vigilance map").await?;

        let Some(domain) = department_block(&map, self.department.code) else {
            return Err(SourceError::not_found(format!(
                "no vigilance data for department {}",
                self.department.code
            )));
        };

        debug!(department = self.department.code, "Fetched vigilance");
        Ok(json!({
            "department": self.department.code,
            "department_name": self.department.name,
            "update_time": map
                .pointer("/product/update_time")
                .or_else(|| map.get("update_time"))
                .cloned()
                .unwrap_or(Value::Null),
            "max_color_id": domain.get("max_color_id").cloned().unwrap_or(json!(1)),
            "phenomenon_items": domain.get("phenomenon_items").cloned().unwrap_or(json!([])),
        }))
    }
}

/// The current period's entry for `code`
fn department_block<'a>(map: &'a Value, code: &str) -> Option<&'a Value> {
    map.pointer("/product/periods/0/timelaps/domain_ids")?
        .as_array()?
        .iter()
        .find(|d| d.get("domain_id").and_then(Value::as_str) == Some(code))
}

#[async_trait]
impl Fetcher for VigilanceFetcher {
    async fn fetch(&self, cancel: &CancellationToken) -> FetchResult {
        cancellable(cancel, self.alerts()).await
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_department_block() {
        let map = json!({
            "product": {
                "periods": [
                    {"echeance": "J", "timelaps": {"domain_ids": [
                        {"domain_id": "73", "max_color_id": 1},
                        {"domain_id": "74", "max_color_id": 3},
                    ]}},
                    {"echeance": "J1", "timelaps": {"domain_ids": [
                        {"domain_id": "74", "max_color_id": 2},
                    ]}},
                ]
            }
        });
        let block = department_block(&map, "74").unwrap();
        assert_eq!(block["max_color_id"], 3);
        assert!(department_block(&map, "05").is_none());
        assert!(department_block(&json!({}), "74").is_none());
    }
}
