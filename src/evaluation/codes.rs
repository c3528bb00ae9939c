//! Correlation code registry: stable wire values shared by health reports and
//! telemetry. Codes are `FOxxx`, a short prefix plus a three-digit number, and
//! are fixed rather than auto-numbered, because downstream parsers depend on
//! exact values.

use crate::health::Entity;
use crate::series::MetricProperty;

/// Severity tier a series was classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Warning,
    Error,
}

/// Looks up the stable code for a metric/entity/tier combination. Disk and
/// firewall metrics are node-scoped only in this agent; an app-entity lookup
/// for one of them falls back to the app CPU codes rather than panicking,
/// since no such series is ever constructed by the observers.
pub fn code_for(entity: &Entity, metric: MetricProperty, tier: Tier) -> &'static str {
    use MetricProperty::*;
    use Tier::*;
    match entity {
        Entity::Node { .. } => match (metric, tier) {
            (TotalCpuTime, Warning) => "FO001",
            (TotalCpuTime, Error) => "FO002",
            (TotalMemoryConsumptionMb, Warning) => "FO003",
            (TotalMemoryConsumptionMb, Error) => "FO004",
            (TotalMemoryConsumptionPct, Warning) => "FO005",
            (TotalMemoryConsumptionPct, Error) => "FO006",
            (DiskSpaceUsagePercentage, Warning) => "FO007",
            (DiskSpaceUsagePercentage, Error) => "FO008",
            (DiskSpaceUsageMb | DiskSpaceAvailableMb | DiskSpaceTotalMb, Warning) => "FO009",
            (DiskSpaceUsageMb | DiskSpaceAvailableMb | DiskSpaceTotalMb, Error) => "FO010",
            (DiskAverageQueueLength, Warning) => "FO011",
            (DiskAverageQueueLength, Error) => "FO012",
            (TotalActivePorts, Warning) => "FO013",
            (TotalActivePorts, Error) => "FO014",
            (TotalEphemeralPorts, Warning) => "FO015",
            (TotalEphemeralPorts, Error) => "FO016",
            (TotalActiveFirewallRules, Warning) => "FO017",
            (TotalActiveFirewallRules, Error) => "FO018",
        },
        Entity::Application { .. } => match (metric, tier) {
            (TotalMemoryConsumptionMb, Warning) => "FO021",
            (TotalMemoryConsumptionMb, Error) => "FO022",
            (TotalMemoryConsumptionPct, Warning) => "FO023",
            (TotalMemoryConsumptionPct, Error) => "FO024",
            (TotalActivePorts, Warning) => "FO025",
            (TotalActivePorts, Error) => "FO026",
            (TotalEphemeralPorts, Warning) => "FO027",
            (TotalEphemeralPorts, Error) => "FO028",
            (TotalCpuTime, Warning) => "FO019",
            (_, Warning) => "FO019",
            (_, Error) => "FO020",
        },
    }
}

/// Code used for Ok-clear emissions, regardless of metric or entity.
pub const OK_CODE: &str = "FO000";

/// Short title for a code, for log lines and docs links. `None` if unknown.
pub fn short_title(code: &str) -> Option<&'static str> {
    match code {
        "FO000" => Some("Cleared"),
        "FO001" => Some("Node CPU warning"),
        "FO002" => Some("Node CPU error"),
        "FO003" => Some("Node memory (MB) warning"),
        "FO004" => Some("Node memory (MB) error"),
        "FO005" => Some("Node memory (%) warning"),
        "FO006" => Some("Node memory (%) error"),
        "FO007" => Some("Node disk usage (%) warning"),
        "FO008" => Some("Node disk usage (%) error"),
        "FO009" => Some("Node disk usage (MB) warning"),
        "FO010" => Some("Node disk usage (MB) error"),
        "FO011" => Some("Node disk queue length warning"),
        "FO012" => Some("Node disk queue length error"),
        "FO013" => Some("Node active ports warning"),
        "FO014" => Some("Node active ports error"),
        "FO015" => Some("Node ephemeral ports warning"),
        "FO016" => Some("Node ephemeral ports error"),
        "FO017" => Some("Firewall rules warning"),
        "FO018" => Some("Firewall rules error"),
        "FO019" => Some("App CPU warning"),
        "FO020" => Some("App CPU error"),
        "FO021" => Some("App memory (MB) warning"),
        "FO022" => Some("App memory (MB) error"),
        "FO023" => Some("App memory (%) warning"),
        "FO024" => Some("App memory (%) error"),
        "FO025" => Some("App active ports warning"),
        "FO026" => Some("App active ports error"),
        "FO027" => Some("App ephemeral ports warning"),
        "FO028" => Some("App ephemeral ports error"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_cpu_codes_match_table() {
        let node = Entity::Node { node_name: "n1".into() };
        assert_eq!(code_for(&node, MetricProperty::TotalCpuTime, Tier::Warning), "FO001");
        assert_eq!(code_for(&node, MetricProperty::TotalCpuTime, Tier::Error), "FO002");
    }

    #[test]
    fn app_cpu_codes_match_table() {
        let app = Entity::Application {
            node_name: "n1".into(),
            application_name: "fabric:/app1".into(),
            service_name: None,
        };
        assert_eq!(code_for(&app, MetricProperty::TotalCpuTime, Tier::Error), "FO020");
    }

    #[test]
    fn every_code_has_a_title() {
        for code in ["FO000", "FO001", "FO020", "FO028"] {
            assert!(short_title(code).is_some());
        }
        assert!(short_title("FOXXX").is_none());
    }
}
