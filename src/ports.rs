//! Dynamic port range planning.
//!
//! Each node may declare the ephemeral port range the OS should hand out
//! (`FabricNode.StartDynamicPortRange` / `EndDynamicPortRange`). The planner
//! turns those into reduction requests for the
//! [`PortRangeManager`](crate::platform::PortRangeManager).

use tracing::debug;

use crate::constants::{PARAM_END_DYNAMIC_PORT_RANGE, PARAM_START_DYNAMIC_PORT_RANGE, SECTION_FABRIC_NODE};
use crate::infrastructure::is_loopback_address;
use crate::settings::NodeSettings;

/// Request to narrow the OS dynamic port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRangeReduction {
    pub start_port: u16,
    pub count: u32,
}

/// Plan port range reductions for the given nodes.
///
/// A scale-min cluster whose first node is on loopback is a single-machine
/// development topology and gets no reductions. A `(0, 0)` range (absent or
/// unparseable values) leaves the OS default untouched.
pub fn plan(nodes: &[NodeSettings], is_scale_min: bool) -> Vec<PortRangeReduction> {
    if is_scale_min && nodes.first().is_some_and(|n| is_loopback_address(n.ip_address_or_fqdn())) {
        debug!("Scale-min loopback topology, skipping port range reduction");
        return Vec::new();
    }

    nodes
        .iter()
        .filter_map(|node| {
            let (start, end) = dynamic_port_range(node);
            if start == 0 && end == 0 {
                return None;
            }
            let count = if end >= start {
                u32::from(end - start) + 1
            } else {
                0
            };
            Some(PortRangeReduction {
                start_port: start,
                count,
            })
        })
        .collect()
}

fn dynamic_port_range(node: &NodeSettings) -> (u16, u16) {
    let Some(section) = node.settings().section(SECTION_FABRIC_NODE) else {
        return (0, 0);
    };
    let start = section
        .value(PARAM_START_DYNAMIC_PORT_RANGE)
        .and_then(|v| v.trim().parse::<u16>().ok());
    let end = section
        .value(PARAM_END_DYNAMIC_PORT_RANGE)
        .and_then(|v| v.trim().parse::<u16>().ok());
    match (start, end) {
        (Some(start), Some(end)) => (start, end),
        _ => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Parameter, Settings, SettingsSection};

    fn node(address: &str, range: Option<(&str, &str)>) -> NodeSettings {
        let mut section = SettingsSection::new(SECTION_FABRIC_NODE);
        if let Some((start, end)) = range {
            section.upsert(Parameter::new(PARAM_START_DYNAMIC_PORT_RANGE, start));
            section.upsert(Parameter::new(PARAM_END_DYNAMIC_PORT_RANGE, end));
        }
        let mut settings = Settings::new();
        settings.insert_section(section);
        NodeSettings::from_parts("N", address, settings)
    }

    #[test]
    fn test_scale_min_loopback_short_circuits() {
        let nodes = [node("127.0.0.1", Some(("49152", "65534")))];
        assert!(plan(&nodes, true).is_empty());
    }

    #[test]
    fn test_scale_min_non_loopback_plans() {
        let nodes = [node("10.0.0.1", Some(("49152", "49251")))];
        assert_eq!(
            plan(&nodes, true),
            vec![PortRangeReduction {
                start_port: 49152,
                count: 100
            }]
        );
    }

    #[test]
    fn test_loopback_without_scale_min_plans() {
        let nodes = [node("127.0.0.1", Some(("20000", "20009")))];
        assert_eq!(plan(&nodes, false).len(), 1);
    }

    #[test]
    fn test_missing_or_malformed_ranges_are_skipped() {
        let nodes = [
            node("10.0.0.1", None),
            node("10.0.0.2", Some(("abc", "100"))),
            node("10.0.0.3", Some(("0", "0"))),
            node("10.0.0.4", Some(("30000", "30001"))),
        ];
        assert_eq!(
            plan(&nodes, false),
            vec![PortRangeReduction {
                start_port: 30000,
                count: 2
            }]
        );
    }

    #[test]
    fn test_empty_node_list() {
        assert!(plan(&[], true).is_empty());
    }
}
