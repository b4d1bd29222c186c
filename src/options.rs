// src/options.rs

//! Provisioning options and their reconciliation
//!
//! Options come from three sources: the persisted configuration, user
//! overrides supplied with a single operation, and the declarations of the
//! built-in set plus every discovered install plugin. Reconciliation decides
//! the effective option map for the run and which edits flow back into the
//! configuration, distinguishing *persistent* options (written back) from
//! transient overrides (config entry removed so the override only applies to
//! this run).

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Name of the built-in option deciding what happens when two dependency
/// paths converge on different builds of the same producer
pub const VERSION_CONVERGENCE: &str = "version-convergence";

/// Accept the build of whichever path was processed first
pub const FIRST_PROCESSED: &str = "FIRST_PROCESSED";

/// Fail the build enumerating the disagreeing feature packs
pub const FAIL: &str = "FAIL";

/// Declaration of a single provisioning option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningOption {
    name: String,
    default_value: Option<String>,
    required: bool,
    persistent: bool,
    value_set: Vec<String>,
}

impl ProvisioningOption {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_value: None,
            required: false,
            persistent: false,
            value_set: Vec::new(),
        }
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn value_set<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.value_set = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn allowed_values(&self) -> &[String] {
        &self.value_set
    }
}

/// The options every installation recognizes regardless of plugins
pub fn builtin_options() -> Vec<ProvisioningOption> {
    vec![ProvisioningOption::new(VERSION_CONVERGENCE)
        .default_value(FIRST_PROCESSED)
        .persistent()
        .value_set([FIRST_PROCESSED, FAIL])]
}

/// An edit to the configuration's option map produced by reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOptionEdit {
    Set(String, String),
    Remove(String),
}

/// Result of reconciling the three option sources
#[derive(Debug, Default)]
pub struct OptionsOutcome {
    /// The option map in effect for this run
    pub effective: BTreeMap<String, String>,
    /// Edits to apply to the configuration's options
    pub config_edits: Vec<ConfigOptionEdit>,
    /// Whether the configuration has to be re-emitted even when no edit is
    /// visible (an override matched the persisted value)
    pub rebuild_config: bool,
}

/// Reconcile configured options, user overrides and recognized declarations.
///
/// Fails when a required option is unset or when set options remain that no
/// declaration claims (after optionally dropping unclaimed options that came
/// from the configuration itself).
pub fn reconcile(
    config_options: &BTreeMap<String, String>,
    extra: &BTreeMap<String, String>,
    recognized_defs: &[ProvisioningOption],
    cleanup_config_options: bool,
) -> Result<OptionsOutcome> {
    let mut effective = config_options.clone();
    effective.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut recognized: BTreeMap<&str, &ProvisioningOption> = BTreeMap::new();
    let mut overridden: Vec<&ProvisioningOption> = Vec::new();
    for def in recognized_defs {
        if !effective.contains_key(def.name()) {
            if def.is_required() {
                return Err(Error::PluginOptionRequired(def.name().to_string()));
            }
            continue;
        }
        if let Some(existing) = recognized.insert(def.name(), def) {
            // a persistent declaration wins over a non-persistent duplicate
            if existing.is_persistent() && !def.is_persistent() {
                recognized.insert(existing.name(), existing);
                continue;
            }
        }
        if def.is_persistent()
            || extra.contains_key(def.name()) && config_options.contains_key(def.name())
        {
            overridden.push(def);
        }
    }

    let mut outcome = OptionsOutcome {
        effective,
        ..OptionsOutcome::default()
    };

    if recognized.len() != outcome.effective.len() {
        let mut non_recognized: Vec<String> = outcome
            .effective
            .keys()
            .filter(|name| !recognized.contains_key(name.as_str()))
            .cloned()
            .collect();
        if cleanup_config_options {
            non_recognized.retain(|name| {
                if config_options.contains_key(name) {
                    outcome.config_edits.push(ConfigOptionEdit::Remove(name.clone()));
                    false
                } else {
                    true
                }
            });
        }
        if !non_recognized.is_empty() {
            return Err(Error::PluginOptionsNotRecognized(non_recognized));
        }
    }

    for def in overridden {
        let Some(value) = extra.get(def.name()) else {
            continue;
        };
        outcome.rebuild_config = true;
        if def.is_persistent() {
            outcome
                .config_edits
                .push(ConfigOptionEdit::Set(def.name().to_string(), value.clone()));
        } else if config_options.get(def.name()) != Some(value) {
            // transient override differing from the persisted value applies
            // to this run only
            outcome
                .config_edits
                .push(ConfigOptionEdit::Remove(def.name().to_string()));
        }
    }

    Ok(outcome)
}
