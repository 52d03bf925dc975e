//! Parameter and secret resolution.
//!
//! Declared parameters (e.g. the database administrator password) are
//! resolved through a [`SecretSource`] the first time a starting node needs
//! them, then cached for the rest of the run.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, StagehandError};

/// A resolved parameter value. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

/// Where parameter values come from.
#[cfg_attr(test, mockall::automock)]
pub trait SecretSource: Send + Sync {
    /// Resolve the value of a declared parameter.
    fn resolve_secret(&self, name: &str) -> Result<SecretValue>;
}

// ============================================================================
// Environment source
// ============================================================================

/// Reads `Parameters__<name>` or `STAGEHAND_PARAM_<NAME>` from the process
/// environment (after `.env` has been loaded).
///
/// Missing values are generated when `generate_missing` is set, otherwise
/// resolution fails.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretSource {
    generate_missing: bool,
}

impl EnvSecretSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate_missing(mut self, generate: bool) -> Self {
        self.generate_missing = generate;
        self
    }

    /// Environment variable names checked for a parameter, in order.
    pub fn env_keys(name: &str) -> [String; 2] {
        let upper: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        [
            format!("Parameters__{}", name),
            format!("STAGEHAND_PARAM_{}", upper),
        ]
    }
}

impl SecretSource for EnvSecretSource {
    fn resolve_secret(&self, name: &str) -> Result<SecretValue> {
        let keys = Self::env_keys(name);
        for key in &keys {
            if let Ok(value) = std::env::var(key) {
                if !value.is_empty() {
                    return Ok(SecretValue::new(value));
                }
            }
        }
        if self.generate_missing {
            crate::log_component!(
                info,
                "secrets",
                "No value supplied, generating one",
                parameter = name
            );
            return GeneratedSecretSource.resolve_secret(name);
        }
        Err(StagehandError::Secret(format!(
            "parameter '{}' has no value; set {} or {}",
            name, keys[0], keys[1]
        )))
    }
}

// ============================================================================
// Generated source
// ============================================================================

/// Mints a fresh strong password for every parameter. The value contains
/// upper and lower case letters, digits and a symbol.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratedSecretSource;

impl SecretSource for GeneratedSecretSource {
    fn resolve_secret(&self, _name: &str) -> Result<SecretValue> {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        let (head, tail) = raw.split_at(16);
        Ok(SecretValue::new(format!(
            "Sh7#{}{}",
            head,
            tail.to_ascii_uppercase()
        )))
    }
}

// ============================================================================
// Static source
// ============================================================================

/// Fixed values, for tests and pre-seeded runs.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretSource {
    values: HashMap<String, String>,
}

impl StaticSecretSource {
    pub fn new<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl SecretSource for StaticSecretSource {
    fn resolve_secret(&self, name: &str) -> Result<SecretValue> {
        self.values
            .get(name)
            .map(SecretValue::new)
            .ok_or_else(|| StagehandError::Secret(format!("parameter '{}' has no value", name)))
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Resolves each declared parameter at most once per run.
pub struct SecretCache {
    source: Arc<dyn SecretSource>,
    declared: BTreeSet<String>,
    resolved: HashMap<String, SecretValue>,
}

impl SecretCache {
    pub fn new(
        source: Arc<dyn SecretSource>,
        declared: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            source,
            declared: declared.into_iter().collect(),
            resolved: HashMap::new(),
        }
    }

    /// Value of a declared parameter, consulting the source on first use.
    pub fn get(&mut self, name: &str) -> Result<&SecretValue> {
        if !self.declared.contains(name) {
            return Err(StagehandError::UnknownParameter(name.to_string()));
        }
        if !self.resolved.contains_key(name) {
            let value = self.source.resolve_secret(name)?;
            crate::log_component!(debug, "secrets", "Parameter resolved", parameter = name);
            self.resolved.insert(name.to_string(), value);
        }
        self.resolved
            .get(name)
            .ok_or_else(|| StagehandError::Secret(format!("parameter '{}' has no value", name)))
    }

    pub fn is_resolved(&self, name: &str) -> bool {
        self.resolved.contains_key(name)
    }
}

impl fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretCache")
            .field("declared", &self.declared)
            .field("resolved", &self.resolved.keys().collect::<Vec<_>>())
            .finish()
    }
}
