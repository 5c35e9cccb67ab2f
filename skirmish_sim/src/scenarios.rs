//! Chaos scenarios for the match harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SKM-001: host crashes mid-match
    HostFailover,

    /// SKM-002: two factions race for one city
    CaptureRace,

    /// SKM-003: client prediction against a lagging host
    Reconciliation,

    /// SKM-004: one client cut off, then healed
    Partition,

    /// SKM-005: bots only, invariants checked every tick
    BotSkirmish,
}

impl ScenarioId {
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::HostFailover,
            ScenarioId::CaptureRace,
            ScenarioId::Reconciliation,
            ScenarioId::Partition,
            ScenarioId::BotSkirmish,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::HostFailover => "host_failover",
            ScenarioId::CaptureRace => "capture_race",
            ScenarioId::Reconciliation => "reconciliation",
            ScenarioId::Partition => "partition",
            ScenarioId::BotSkirmish => "bot_skirmish",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::HostFailover => "Kill the host; survivors agree on the lowest id and play on",
            ScenarioId::CaptureRace => "Two factions attack one city; it ends with a single agreed owner",
            ScenarioId::Reconciliation => "150ms host lag; client visuals never jump",
            ScenarioId::Partition => "Isolate a client until it self-promotes, heal, converge on one host",
            ScenarioId::BotSkirmish => "AI-only match; world invariants hold on every tick",
        }
    }

    /// Minimum peers the scenario needs to mean anything.
    pub fn min_peers(&self) -> usize {
        match self {
            ScenarioId::HostFailover | ScenarioId::Partition => 3,
            ScenarioId::CaptureRace | ScenarioId::Reconciliation | ScenarioId::BotSkirmish => 2,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "host_failover" | "failover" | "skm-001" => Ok(ScenarioId::HostFailover),
            "capture_race" | "capture" | "skm-002" => Ok(ScenarioId::CaptureRace),
            "reconciliation" | "reconcile" | "skm-003" => Ok(ScenarioId::Reconciliation),
            "partition" | "split_brain" | "skm-004" => Ok(ScenarioId::Partition),
            "bot_skirmish" | "bots" | "skm-005" => Ok(ScenarioId::BotSkirmish),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
