//! Fault-injection rules for the cluster's internal transport.
//!
//! Rules come from the `UnreliableTransport` settings section and from a flat
//! file in each node's work directory, one `name=specification` per line.
//! The node runtime re-reads the file, so rules written there take effect
//! without a configuration upgrade.

use std::fmt::Write as _;
use std::path::Path;

use tracing::warn;

use crate::constants::SECTION_UNRELIABLE_TRANSPORT;
use crate::error::{DeployerError, DeployerResult};
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreliableTransportSpecification {
    pub name: String,
    pub specification: String,
}

/// Outcome of parsing one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedSpecification {
    Valid(UnreliableTransportSpecification),
    Malformed { input: String, reason: &'static str },
}

impl ParsedSpecification {
    /// Parse one file line. Blank lines yield `None`.
    ///
    /// The line is split on the first `=`; a line without `=` is a rule
    /// with an empty specification.
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }
        let (name, specification) = line.split_once('=').unwrap_or((line, ""));
        if name.trim().is_empty() {
            return Some(ParsedSpecification::Malformed {
                input: line.to_string(),
                reason: "empty rule name",
            });
        }
        Some(ParsedSpecification::Valid(UnreliableTransportSpecification {
            name: name.to_string(),
            specification: specification.to_string(),
        }))
    }

    /// Validate a `(name, value)` settings entry.
    pub fn from_entry(name: &str, specification: &str) -> Self {
        if name.contains('=') {
            return ParsedSpecification::Malformed {
                input: name.to_string(),
                reason: "rule name contains '='",
            };
        }
        if name.trim().is_empty() {
            return ParsedSpecification::Malformed {
                input: name.to_string(),
                reason: "empty rule name",
            };
        }
        if has_line_break(name) || has_line_break(specification) {
            return ParsedSpecification::Malformed {
                input: name.to_string(),
                reason: "rule contains a line break",
            };
        }
        ParsedSpecification::Valid(UnreliableTransportSpecification {
            name: name.to_string(),
            specification: specification.to_string(),
        })
    }
}

/// Each rule is written as one file line.
fn has_line_break(value: &str) -> bool {
    value.contains(['\r', '\n'])
}

/// Ordered set of rules; names are unique, compared ASCII case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreliableTransportSettings {
    specifications: Vec<UnreliableTransportSpecification>,
}

impl UnreliableTransportSettings {
    pub fn specifications(&self) -> &[UnreliableTransportSpecification] {
        &self.specifications
    }

    pub fn is_empty(&self) -> bool {
        self.specifications.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.specifications
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.specification.as_str())
    }

    fn accept(&mut self, parsed: ParsedSpecification) {
        match parsed {
            ParsedSpecification::Valid(spec) => {
                match self
                    .specifications
                    .iter_mut()
                    .find(|s| s.name.eq_ignore_ascii_case(&spec.name))
                {
                    Some(existing) => *existing = spec,
                    None => self.specifications.push(spec),
                }
            }
            ParsedSpecification::Malformed { input, reason } => {
                warn!(input = %input, reason, "Dropping malformed unreliable transport rule");
            }
        }
    }

    /// Rules from the `UnreliableTransport` section of a settings set.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut rules = Self::default();
        if let Some(section) = settings.section(SECTION_UNRELIABLE_TRANSPORT) {
            for parameter in section.parameters() {
                rules.accept(ParsedSpecification::from_entry(
                    &parameter.name,
                    &parameter.value,
                ));
            }
        }
        rules
    }

    pub fn parse(contents: &str) -> Self {
        let mut rules = Self::default();
        for parsed in contents.lines().filter_map(ParsedSpecification::from_line) {
            rules.accept(parsed);
        }
        rules
    }

    /// Load rules from a file; a missing file is an empty rule set.
    pub fn load(path: &Path) -> DeployerResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(DeployerError::io(path, e)),
        }
    }

    /// Union of both sets. On a name conflict this set's rule is kept.
    pub fn merge(&self, overlay: &Self) -> Self {
        let mut merged = self.clone();
        for spec in &overlay.specifications {
            match self.get(&spec.name) {
                Some(existing) => {
                    if existing != spec.specification {
                        warn!(
                            rule = %spec.name,
                            kept = existing,
                            dropped = %spec.specification,
                            "Conflicting unreliable transport rule"
                        );
                    }
                }
                None => merged.specifications.push(spec.clone()),
            }
        }
        merged
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for spec in &self.specifications {
            let _ = writeln!(out, "{}={}", spec.name, spec.specification);
        }
        out
    }

    pub fn write(&self, path: &Path) -> DeployerResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeployerError::io(parent, e))?;
        }
        std::fs::write(path, self.render()).map_err(|e| DeployerError::io(path, e))
    }
}
