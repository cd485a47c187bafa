//! Manifest validation and upgrade comparison.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;
use tracing::{error, warn};

use crate::constants::{
    PARAM_FABRIC_DATA_ROOT, PARAM_FABRIC_LOG_ROOT, SECTION_SETUP, SECTION_VOTES, SQL_VOTE_TYPE,
};
use crate::error::{DeployerError, DeployerResult};
use crate::infrastructure::InfrastructureKind;
use crate::manifest::{ClusterManifest, InfrastructureDescription};

/// Findings of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// `(section, parameter)` pairs that differ between two manifests.
    pub modified_settings: Vec<(String, String)>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.modified_settings.extend(other.modified_settings);
    }

    /// `Err(ManifestValidation)` when any error was found.
    pub fn into_result(self) -> DeployerResult<Self> {
        for warning in &self.warnings {
            warn!(warning = %warning, "Manifest validation warning");
        }
        if self.is_valid() {
            Ok(self)
        } else {
            for e in &self.errors {
                error!(error = %e, "Manifest validation error");
            }
            Err(DeployerError::ManifestValidation(self.errors))
        }
    }
}

/// Static checks of a single manifest.
pub fn validate_manifest(manifest: &ClusterManifest) -> ValidationReport {
    let mut report = ValidationReport::default();

    let mut seen = HashSet::new();
    for node_type in &manifest.node_types {
        if !seen.insert(node_type.name.as_str()) {
            report
                .errors
                .push(format!("Duplicate node type {}", node_type.name));
        }
    }

    if let Some(nodes) = manifest.infrastructure.declared_nodes() {
        if !nodes.iter().any(|n| n.is_seed_node) {
            report.errors.push(format!(
                "{} infrastructure declares no seed nodes",
                manifest.infrastructure
            ));
        }
        for node in nodes {
            if !seen.contains(node.node_type_ref.as_str()) {
                report.errors.push(format!(
                    "Node {} references unknown node type {}",
                    node.node_name, node.node_type_ref
                ));
            }
        }
    }

    if let InfrastructureDescription::WindowsAzure(roles) | InfrastructureDescription::Paas(roles) =
        &manifest.infrastructure
    {
        for role in &roles.roles {
            if !seen.contains(role.node_type_ref.as_str()) {
                report.warnings.push(format!(
                    "Role {} references unknown node type {}",
                    role.role_name, role.node_type_ref
                ));
            }
        }
    }

    for section in &manifest.fabric_settings {
        for parameter in &section.parameters {
            if parameter.name.trim() != parameter.name {
                report.warnings.push(format!(
                    "Parameter {:?} in section {} has surrounding whitespace",
                    parameter.name, section.name
                ));
            }
            if parameter.is_encrypted && parameter.value.trim().is_empty() {
                report.errors.push(format!(
                    "Encrypted parameter {}.{} has no value",
                    section.name, parameter.name
                ));
            }
        }

        if section.name.eq_ignore_ascii_case(SECTION_VOTES) {
            for vote in &section.parameters {
                let vote_type = vote.value.split(',').next().unwrap_or_default().trim();
                if !vote_type.eq_ignore_ascii_case(SQL_VOTE_TYPE) {
                    report.errors.push(format!(
                        "Vote {} has type {vote_type:?}; only {SQL_VOTE_TYPE} votes may be declared",
                        vote.name
                    ));
                }
            }
        }
    }

    report
}

/// Checks an upgrade from `current` to `proposed`.
pub fn compare_manifests(current: &ClusterManifest, proposed: &ClusterManifest) -> ValidationReport {
    let mut report = ValidationReport::default();

    let current_kind = InfrastructureKind::classify(&current.infrastructure);
    let proposed_kind = InfrastructureKind::classify(&proposed.infrastructure);
    if current_kind != proposed_kind {
        report.errors.push(format!(
            "Infrastructure kind cannot change from {} to {}",
            current.infrastructure, proposed.infrastructure
        ));
    }

    for parameter in [PARAM_FABRIC_DATA_ROOT, PARAM_FABRIC_LOG_ROOT] {
        let before = current.parameter(SECTION_SETUP, parameter);
        let after = proposed.parameter(SECTION_SETUP, parameter);
        if before != after {
            report.errors.push(format!(
                "{SECTION_SETUP}.{parameter} cannot change ({} -> {})",
                before.unwrap_or("<unset>"),
                after.unwrap_or("<unset>")
            ));
        }
    }

    for before in &current.node_types {
        let Some(after) = proposed.node_type(&before.name) else {
            if let Some(node) = proposed
                .infrastructure
                .declared_nodes()
                .unwrap_or(&[])
                .iter()
                .find(|n| n.node_type_ref == before.name)
            {
                report.errors.push(format!(
                    "Node type {} was removed but node {} still references it",
                    before.name, node.node_name
                ));
            }
            continue;
        };

        let old_ports = before.endpoints.named();
        let new_ports = after.endpoints.named();
        for (name, endpoint) in &old_ports {
            let new_port = new_ports.iter().find(|(n, _)| n == name).map(|(_, e)| e.port);
            if new_port != Some(endpoint.port) {
                report.warnings.push(format!(
                    "Node type {} endpoint {name} changes from {} to {}",
                    before.name,
                    endpoint.port,
                    new_port.map_or_else(|| "<removed>".to_string(), |p| p.to_string())
                ));
            }
        }
        for (name, endpoint) in &new_ports {
            if !old_ports.iter().any(|(n, _)| n == name) {
                report.warnings.push(format!(
                    "Node type {} adds endpoint {name} on port {}",
                    before.name, endpoint.port
                ));
            }
        }
    }

    let mut modified = BTreeSet::new();
    for section in &current.fabric_settings {
        for parameter in &section.parameters {
            if proposed.parameter(&section.name, &parameter.name) != Some(parameter.value.as_str()) {
                modified.insert((section.name.clone(), parameter.name.clone()));
            }
        }
    }
    for section in &proposed.fabric_settings {
        for parameter in &section.parameters {
            if current.parameter(&section.name, &parameter.name).is_none() {
                modified.insert((section.name.clone(), parameter.name.clone()));
            }
        }
    }
    report.modified_settings = modified.into_iter().collect();

    report
}
