//! Endpoints registry file: one CSV row of ports per node type.
//!
//! The format has no quoting; fields are plain port numbers or empty, and a
//! field that contains a separator or line break cannot be written. Data
//! fields are read back verbatim.

use std::path::Path;

use crate::constants::ENDPOINTS_HEADER;
use crate::error::{DeployerError, DeployerResult};
use crate::manifest::{Endpoint, NodeTypeDescription};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub role: String,
    pub client_connection: String,
    pub lease_driver: String,
    pub cluster_connection: String,
    pub default_replicator: String,
    pub naming_replicator: String,
    pub fm_replicator: String,
    pub cm_replicator: String,
    pub application_start: String,
    pub application_end: String,
}

fn port(endpoint: Option<Endpoint>) -> String {
    endpoint.map(|e| e.port.to_string()).unwrap_or_default()
}

impl Endpoints {
    pub fn from_node_type(node_type: &NodeTypeDescription) -> Self {
        let endpoints = &node_type.endpoints;
        Self {
            role: node_type.name.clone(),
            client_connection: port(endpoints.client_connection_endpoint),
            lease_driver: port(endpoints.lease_driver_endpoint),
            cluster_connection: port(endpoints.cluster_connection_endpoint),
            default_replicator: port(endpoints.default_replicator_endpoint),
            naming_replicator: port(endpoints.naming_replicator_endpoint),
            fm_replicator: port(endpoints.failover_manager_replicator_endpoint),
            cm_replicator: port(endpoints.cluster_manager_replicator_endpoint),
            application_start: endpoints
                .application_endpoints
                .map(|r| r.start_port.to_string())
                .unwrap_or_default(),
            application_end: endpoints
                .application_endpoints
                .map(|r| r.end_port.to_string())
                .unwrap_or_default(),
        }
    }

    fn fields(&self) -> [&str; 10] {
        [
            self.role.as_str(),
            self.client_connection.as_str(),
            self.lease_driver.as_str(),
            self.cluster_connection.as_str(),
            self.default_replicator.as_str(),
            self.naming_replicator.as_str(),
            self.fm_replicator.as_str(),
            self.cm_replicator.as_str(),
            self.application_start.as_str(),
            self.application_end.as_str(),
        ]
    }

    fn parse_row(line_number: usize, line: &str) -> DeployerResult<Self> {
        let fields: Vec<String> = line.split(',').map(str::to_string).collect();
        let Ok([role, client, lease, cluster, default, naming, fm, cm, start, end]) =
            <[String; 10]>::try_from(fields)
        else {
            return Err(DeployerError::Serialization(format!(
                "endpoints line {line_number}: expected {} fields",
                ENDPOINTS_HEADER.len()
            )));
        };
        Ok(Self {
            role,
            client_connection: client,
            lease_driver: lease,
            cluster_connection: cluster,
            default_replicator: default,
            naming_replicator: naming,
            fm_replicator: fm,
            cm_replicator: cm,
            application_start: start,
            application_end: end,
        })
    }
}

pub fn render(rows: &[Endpoints]) -> DeployerResult<String> {
    let mut out = ENDPOINTS_HEADER.join(",");
    out.push('\n');
    for row in rows {
        let fields = row.fields();
        if let Some((column, field)) = ENDPOINTS_HEADER
            .iter()
            .zip(fields)
            .find(|(_, field)| field.contains([',', '\r', '\n']))
        {
            return Err(DeployerError::Serialization(format!(
                "endpoints row {}: {column} field {field:?} contains a separator or line break",
                row.role
            )));
        }
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    Ok(out)
}

/// Parse registry contents. The header row (with or without spaces after
/// the commas) and blank lines are skipped.
pub fn parse(contents: &str) -> DeployerResult<Vec<Endpoints>> {
    let header = ENDPOINTS_HEADER.join(",");
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter(|(_, line)| line.replace(' ', "") != header)
        .map(|(index, line)| Endpoints::parse_row(index + 1, line))
        .collect()
}

pub fn write(path: &Path, rows: &[Endpoints]) -> DeployerResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DeployerError::io(parent, e))?;
    }
    let contents = render(rows)?;
    std::fs::write(path, contents).map_err(|e| DeployerError::io(path, e))
}

pub fn read(path: &Path) -> DeployerResult<Vec<Endpoints>> {
    let contents = std::fs::read_to_string(path).map_err(|e| DeployerError::io(path, e))?;
    parse(&contents)
}
