//! Client configuration: region, API key and transport extras.
//!
//! # Design
//! Values come from code, from the environment (`ALMA_KEY`, `ALMA_REGION`,
//! `ALMA_BASE_URL`), or from a JSON patch layered on top with the same deep
//! merge the resource registry uses. The API key is optional here and only
//! required when a client is actually built, so a config can be assembled
//! in stages.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AlmaError, Result};
use crate::merge::merged;
use crate::transport::{AlmaApi, HttpExecutor};

pub const API_KEY_VAR: &str = "ALMA_KEY";
pub const REGION_VAR: &str = "ALMA_REGION";
pub const BASE_URL_VAR: &str = "ALMA_BASE_URL";

pub const DEFAULT_REGION: &str = "eu";

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub region: String,
    pub api_key: Option<String>,
    pub extra: ExtraConfig,
}

/// Transport settings beyond region and key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraConfig {
    /// Replaces the regional Alma URL, e.g. to target a mock server.
    pub base_url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            api_key: None,
            extra: ExtraConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            ..Self::default()
        }
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.extra.base_url = Some(base_url.to_string());
        self
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`; absent or empty values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();
        if let Some(region) = lookup(REGION_VAR) {
            config.region = region;
        }
        config.api_key = lookup(API_KEY_VAR);
        config.extra.base_url = lookup(BASE_URL_VAR);
        config
    }

    /// Deep-merge a JSON patch over this config.
    pub fn with_overrides(&self, patch: Value) -> Result<Self> {
        let base = serde_json::to_value(self)
            .map_err(|e| AlmaError::Configuration(e.to_string()))?;
        serde_json::from_value(merged(&base, patch))
            .map_err(|e| AlmaError::Configuration(format!("invalid client config: {e}")))
    }

    /// The explicit key, else the one `lookup` finds under `ALMA_KEY`.
    pub fn resolve_api_key(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| lookup(API_KEY_VAR).filter(|k| !k.trim().is_empty()))
            .ok_or_else(|| AlmaError::Configuration("Missing API key".to_string()))
    }

    pub fn build_api(&self, api_key: &str, executor: Arc<dyn HttpExecutor>) -> AlmaApi {
        let mut api = AlmaApi::new(&self.region, api_key, executor);
        if let Some(base_url) = &self.extra.base_url {
            api = api.with_base_url(base_url);
        }
        for (name, value) in &self.extra.headers {
            api = api.with_header(name, value);
        }
        for (name, value) in &self.extra.query {
            api = api.with_query(name, value);
        }
        api
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("region", &self.region)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("extra", &self.extra)
            .finish()
    }
}
