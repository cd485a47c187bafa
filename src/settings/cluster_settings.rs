//! Cluster-wide settings snapshot.

use std::ops::Deref;

use tracing::{debug, error};

use super::{Parameter, Settings, SettingsSection};
use crate::constants::{
    PARAM_APP_LOG_DIRECTORY_QUOTA_IN_MB, PARAM_IS_APP_LOG_COLLECTION_ENABLED,
    PARAM_MONITORING_AGENT_DIRECTORY_QUOTA, PARAM_MONITORING_AGENT_STORAGE_ACCOUNT,
    PARAM_MONITORING_AGENT_TRANSFER_INTERVAL, PARAM_STORE_CONNECTION_STRING,
    PARAM_UPLOAD_INTERVAL_IN_MINUTES, SECTION_DIAGNOSTIC_FILE_STORE, SECTION_MANAGEMENT,
    SECTION_SECURITY, SECTION_SEED_NODE_CLIENT_CONNECTION_ADDRESSES,
    SECTION_UNRELIABLE_TRANSPORT, SECTION_VOTES, X509_STORE_NAME_PATTERN,
};
use crate::error::{DeployerError, DeployerResult};
use crate::manifest::{FabricCertificate, SettingsOverridesSection};

/// Authoritative settings shared by every node of the cluster.
///
/// Built once per operation. Snapshots derived from it (see
/// [`ClusterSettings::without_section`]) are independent copies, so the host
/// settings and the per-node runtime settings can never observe each other's
/// edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSettings {
    settings: Settings,
}

impl ClusterSettings {
    /// Merge override sections with the infrastructure-derived sections.
    ///
    /// 1. `votes` and `seed_addresses` are taken verbatim.
    /// 2. Every other override section is copied as plain settings. Override
    ///    sections named like the two mandatory sections are skipped.
    /// 3. A secrets certificate upserts `Security.SettingsX509StoreName`.
    /// 4. Enabled application log collection derives monitoring agent
    ///    parameters into `Management`. Parameters already present in
    ///    `Management` win over derived ones.
    pub fn build(
        override_sections: &[SettingsOverridesSection],
        votes: &SettingsSection,
        seed_addresses: &SettingsSection,
        secrets_certificate: Option<&FabricCertificate>,
    ) -> DeployerResult<Self> {
        let mut settings = Settings::new();
        settings.insert_section(votes.clone());
        settings.insert_section(seed_addresses.clone());

        for section in override_sections {
            if section.name.eq_ignore_ascii_case(SECTION_VOTES)
                || section
                    .name
                    .eq_ignore_ascii_case(SECTION_SEED_NODE_CLIENT_CONNECTION_ADDRESSES)
            {
                continue;
            }
            settings.insert_section(SettingsSection::from_override(section));
        }

        if let Some(certificate) = secrets_certificate {
            settings
                .section_entry(SECTION_SECURITY)
                .upsert(Parameter::new(
                    format!("Settings{X509_STORE_NAME_PATTERN}"),
                    certificate.x509_store_name.clone(),
                ));
        }

        let derived = derive_monitoring_agent_parameters(&settings)?;
        if !derived.is_empty() {
            merge_management(&mut settings, derived);
        }

        debug!(
            sections = settings.sections().len(),
            "Cluster settings built"
        );
        Ok(Self { settings })
    }

    /// Independent snapshot with one section removed.
    pub fn without_section(&self, name: &str) -> ClusterSettings {
        let mut settings = self.settings.clone();
        settings.remove_section(name);
        ClusterSettings { settings }
    }

    /// Snapshot written to the host settings file; fault injection is node-local only.
    pub fn host_settings(&self) -> ClusterSettings {
        self.without_section(SECTION_UNRELIABLE_TRANSPORT)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn into_settings(self) -> Settings {
        self.settings
    }
}

impl Deref for ClusterSettings {
    type Target = Settings;

    fn deref(&self) -> &Settings {
        &self.settings
    }
}

fn derive_monitoring_agent_parameters(settings: &Settings) -> DeployerResult<Vec<Parameter>> {
    let Some(store) = settings.section(SECTION_DIAGNOSTIC_FILE_STORE) else {
        return Ok(Vec::new());
    };
    if !store.bool_value(PARAM_IS_APP_LOG_COLLECTION_ENABLED) {
        return Ok(Vec::new());
    }

    let mut derived = Vec::with_capacity(3);

    if let Some(connection) = store.parameter(PARAM_STORE_CONNECTION_STRING) {
        derived.push(
            Parameter::new(PARAM_MONITORING_AGENT_STORAGE_ACCOUNT, connection.value.clone())
                .encrypted(connection.is_encrypted),
        );
    }

    if let Some(interval) = store.value(PARAM_UPLOAD_INTERVAL_IN_MINUTES) {
        let minutes: u64 = interval.trim().parse().map_err(|_| {
            error!(
                value = interval,
                "Upload interval is not a whole number of minutes"
            );
            DeployerError::InvalidParameterValue {
                section: SECTION_DIAGNOSTIC_FILE_STORE.to_string(),
                parameter: PARAM_UPLOAD_INTERVAL_IN_MINUTES.to_string(),
                value: interval.to_string(),
            }
        })?;
        let seconds = minutes.saturating_mul(60);
        derived.push(Parameter::new(
            PARAM_MONITORING_AGENT_TRANSFER_INTERVAL,
            seconds.to_string(),
        ));
    }

    if let Some(quota) = store.value(PARAM_APP_LOG_DIRECTORY_QUOTA_IN_MB) {
        derived.push(Parameter::new(PARAM_MONITORING_AGENT_DIRECTORY_QUOTA, quota));
    }

    Ok(derived)
}

/// Derived parameters that do not collide come first, then the operator's
/// parameters in their original order.
fn merge_management(settings: &mut Settings, derived: Vec<Parameter>) {
    let management = settings.section_entry(SECTION_MANAGEMENT);
    let mut merged = SettingsSection::new(management.name.clone());

    for parameter in derived {
        if management.contains(&parameter.name) {
            debug!(
                parameter = %parameter.name,
                "Keeping operator-provided management parameter"
            );
            continue;
        }
        merged.upsert(parameter);
    }
    for parameter in management.parameters() {
        merged.upsert(parameter.clone());
    }

    *management = merged;
}
