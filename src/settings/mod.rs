//! Layered settings: sections of named parameters.
//!
//! Section names are unique within a [`Settings`] set and parameter names are
//! unique within a [`SettingsSection`], both compared ASCII case-insensitively.
//! Insertion order is preserved and is the order written to disk.
//!
//! - [`ClusterSettings`]: the cluster-wide snapshot built from the manifest
//!   plus derived sections.
//! - [`NodeSettings`]: a cluster snapshot extended with per-node sections.

mod cluster_settings;
mod node_settings;

pub use cluster_settings::ClusterSettings;
pub use node_settings::{NodeSettings, local_nodes};
pub(crate) use node_settings::work_dir;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DeployerError, DeployerResult};
use crate::manifest::SettingsOverridesSection;

/// A single named setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub must_override: bool,
    #[serde(default)]
    pub is_encrypted: bool,
}

impl Parameter {
    /// A plain, unencrypted parameter.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            must_override: false,
            is_encrypted: false,
        }
    }

    pub fn encrypted(mut self, is_encrypted: bool) -> Self {
        self.is_encrypted = is_encrypted;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSection {
    pub name: String,
    #[serde(default)]
    parameters: Vec<Parameter>,
}

impl SettingsSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    /// Builds a section from `(name, value)` pairs; later duplicates win.
    pub fn from_pairs<I, K, V>(name: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut section = Self::new(name);
        for (key, value) in pairs {
            section.upsert(Parameter::new(key, value));
        }
        section
    }

    /// Converts an operator-authored section into plain settings.
    ///
    /// `must_override` is always cleared; encryption is preserved.
    pub fn from_override(section: &SettingsOverridesSection) -> Self {
        let mut converted = Self::new(section.name.clone());
        for parameter in &section.parameters {
            converted.upsert(
                Parameter::new(parameter.name.clone(), parameter.value.clone())
                    .encrypted(parameter.is_encrypted),
            );
        }
        converted
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.parameter(name).map(|p| p.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parameter(name).is_some()
    }

    /// Replaces a parameter in place, or appends it.
    pub fn upsert(&mut self, parameter: Parameter) {
        match self
            .parameters
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&parameter.name))
        {
            Some(existing) => *existing = parameter,
            None => self.parameters.push(parameter),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        let index = self
            .parameters
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))?;
        Some(self.parameters.remove(index))
    }

    /// Reads a boolean parameter. Absent or malformed values are `false`.
    pub fn bool_value(&self, name: &str) -> bool {
        self.value(name)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

/// Ordered set of sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    sections: Vec<SettingsSection>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sections(&self) -> &[SettingsSection] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&SettingsSection> {
        self.sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut SettingsSection> {
        self.sections
            .iter_mut()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Find-or-create a section by name.
    pub fn section_entry(&mut self, name: &str) -> &mut SettingsSection {
        let index = match self
            .sections
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
        {
            Some(index) => index,
            None => {
                self.sections.push(SettingsSection::new(name));
                self.sections.len() - 1
            }
        };
        &mut self.sections[index]
    }

    /// Inserts a section, replacing any section with the same name in place.
    pub fn insert_section(&mut self, section: SettingsSection) {
        match self.section_mut(&section.name) {
            Some(existing) => *existing = section,
            None => self.sections.push(section),
        }
    }

    pub fn remove_section(&mut self, name: &str) -> Option<SettingsSection> {
        let index = self
            .sections
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))?;
        Some(self.sections.remove(index))
    }

    pub fn value(&self, section: &str, parameter: &str) -> Option<&str> {
        self.section(section).and_then(|s| s.value(parameter))
    }

    pub fn to_json(&self) -> DeployerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> DeployerResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeployerError::io(parent, e))?;
        }
        std::fs::write(path, self.to_json()?).map_err(|e| DeployerError::io(path, e))
    }

    pub fn load(path: &Path) -> DeployerResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| DeployerError::io(path, e))?;
        Ok(serde_json::from_str(&json)?)
    }
}
