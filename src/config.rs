//! Module configuration.
//!
//! Configuration is a JSON document naming the engine, the hosts to poll
//! and the metric sets to collect from each of them.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::collector::{MetricCollector, QuerySource, QueryVariant};
use crate::driver::{Connector, DuckDbConnector, SessionProfile};
use crate::error::Error;
use crate::schema::{Rule, Schema};

/// Default collection period in seconds.
pub const DEFAULT_PERIOD_SECS: u64 = 10;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    /// Engine to connect to.
    #[serde(default = "default_module")]
    pub module: String,
    /// Database locators to poll.
    pub hosts: Vec<String>,
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    /// Open database files read-only.
    #[serde(default)]
    pub read_only: bool,
    /// Settings pinned on every session.
    #[serde(default)]
    pub session: SessionProfile,
    pub metricsets: Vec<MetricSetConfig>,
}

/// One metric set: a query (or version-gated variants) and its schema.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricSetConfig {
    pub name: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub variants: Option<Vec<VariantConfig>>,
    #[serde(default)]
    pub fallback: Option<String>,
    pub schema: Schema,
    #[serde(default)]
    pub experimental: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantConfig {
    pub low: String,
    pub high: String,
    pub query: String,
}

fn default_module() -> String {
    "duckdb".to_string()
}

fn default_period_secs() -> u64 {
    DEFAULT_PERIOD_SECS
}

impl ModuleConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let buf = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: '{}'", path.display()))?;
        Self::from_json(&buf)
            .with_context(|| format!("Failed to load config file: '{}'", path.display()))
    }

    /// Parse and validate a configuration document.
    pub fn from_json(buf: &str) -> Result<Self> {
        let config: ModuleConfig = serde_json::from_str(buf)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), Error> {
        if self.module != "duckdb" {
            return Err(Error::config(format!("unsupported module '{}'", self.module)));
        }
        if self.hosts.is_empty() {
            return Err(Error::config("at least one host is required"));
        }
        if self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(Error::config("host locators must not be empty"));
        }
        if self.period_secs == 0 {
            return Err(Error::config("period_secs must be greater than 0"));
        }
        if self.metricsets.is_empty() {
            return Err(Error::config("at least one metricset is required"));
        }

        let mut names = HashSet::new();
        for metricset in &self.metricsets {
            metricset.validate()?;
            if !names.insert(metricset.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate metricset '{}'",
                    metricset.name
                )));
            }
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    /// The connector for the configured engine.
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(DuckDbConnector {
            read_only: self.read_only,
            ..DuckDbConnector::default()
        })
    }

    /// Build one collector per metric set, sharing `connector`.
    pub fn collectors(&self, connector: Arc<dyn Connector>) -> Vec<MetricCollector> {
        self.metricsets
            .iter()
            .map(|m| m.collector(connector.clone(), &self.session))
            .collect()
    }
}

impl MetricSetConfig {
    fn validate(&self) -> std::result::Result<(), Error> {
        let name = &self.name;
        if name.trim().is_empty() {
            return Err(Error::config("metricset name must not be empty"));
        }
        match (&self.query, &self.variants) {
            (Some(_), Some(_)) => {
                return Err(Error::config(format!(
                    "{name}: 'query' and 'variants' are mutually exclusive"
                )))
            }
            (None, None) => {
                return Err(Error::config(format!(
                    "{name}: one of 'query' or 'variants' is required"
                )))
            }
            (Some(query), None) => {
                if query.trim().is_empty() {
                    return Err(Error::config(format!("{name}: query must not be empty")));
                }
                if self.fallback.is_some() {
                    return Err(Error::config(format!(
                        "{name}: 'fallback' requires 'variants'"
                    )));
                }
            }
            (None, Some(variants)) => {
                if variants.is_empty() {
                    return Err(Error::config(format!("{name}: 'variants' is empty")));
                }
                for variant in variants {
                    if variant.low.trim().is_empty() || variant.high.trim().is_empty() {
                        return Err(Error::config(format!(
                            "{name}: variant version bounds must not be empty"
                        )));
                    }
                    if variant.query.trim().is_empty() {
                        return Err(Error::config(format!(
                            "{name}: variant query must not be empty"
                        )));
                    }
                }
            }
        }
        if self.schema.is_empty() {
            return Err(Error::config(format!("{name}: schema is empty")));
        }
        validate_schema(name, &self.schema)
    }

    fn query_source(&self) -> QuerySource {
        match (&self.query, &self.variants) {
            (Some(query), _) => QuerySource::Fixed(query.clone()),
            (None, variants) => QuerySource::Versioned {
                variants: variants
                    .iter()
                    .flatten()
                    .map(|v| QueryVariant::new(&v.low, &v.high, v.query.clone()))
                    .collect(),
                fallback: self.fallback.clone(),
            },
        }
    }

    fn collector(&self, connector: Arc<dyn Connector>, profile: &SessionProfile) -> MetricCollector {
        if self.experimental {
            tracing::warn!("EXPERIMENTAL: the {} metricset is experimental", self.name);
        }
        MetricCollector::new(
            self.name.clone(),
            connector,
            self.query_source(),
            self.schema.clone(),
        )
        .with_profile(profile.clone())
    }
}

fn validate_schema(metricset: &str, schema: &Schema) -> std::result::Result<(), Error> {
    for (field, rule) in schema.fields() {
        if field.trim().is_empty() {
            return Err(Error::config(format!("{metricset}: empty field name")));
        }
        match rule {
            Rule::Field { column, .. } if column.trim().is_empty() => {
                return Err(Error::config(format!(
                    "{metricset}.{field}: column must not be empty"
                )))
            }
            Rule::Field { .. } => {}
            Rule::Object { object } => {
                if object.is_empty() {
                    return Err(Error::config(format!(
                        "{metricset}.{field}: object is empty"
                    )));
                }
                validate_schema(metricset, object)?;
            }
        }
    }
    Ok(())
}
