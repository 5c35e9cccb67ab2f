//! Scenario runner - executes chaos scenarios against a SimWorld.

use std::collections::BTreeMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use skirmish_core::{skirmish_terrain, ActionKind, GeoPoint, MatchSetup, TargetRef, UnitId};
use skirmish_env::PeerId;

use crate::scenarios::ScenarioId;
use crate::world::{peer_id, SimConfig, SimError, SimWorld};

/// Largest per-tick visual displacement that still reads as motion.
pub const VISUAL_JUMP_LIMIT: f64 = 5.0;

/// Starting hp of the contested city in `capture_race`.
const PRIZE_HP: f64 = 300.0;

/// One-way latency between host and clients in `reconciliation`.
const LAG_MS: u64 = 150;

/// Ticks allowed for peers to converge after the scripted part.
const SETTLE_TICKS: u64 = 75;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub scenario: ScenarioId,

    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Units alive on the host at the end
    pub final_unit_count: usize,

    pub failure_reason: Option<String>,

    pub metrics: ScenarioMetrics,
}

impl ScenarioResult {
    fn failed(scenario: ScenarioId, seed: u64, reason: String) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_unit_count: 0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub packets_sent: u64,

    /// Packets dropped by partitions or dead peers
    pub packets_dropped: u64,

    /// Actions applied across live peers, predictions included
    pub actions_applied: u64,

    pub snapshots_applied: u64,

    pub promotions: u64,

    /// Owner changes of the contested city
    pub captures: u64,

    /// Largest per-tick visual displacement seen on a client
    pub max_visual_step: f64,

    /// Ticks on which world invariants were checked
    pub invariant_checks: u64,
}

/// Runs chaos scenarios.
pub struct ScenarioRunner {
    seed: u64,
    num_peers: usize,
    tick_rate_hz: u32,
    max_duration_secs: f64,
}

impl ScenarioRunner {
    pub fn new(seed: u64, num_peers: usize) -> Self {
        Self {
            seed,
            num_peers,
            tick_rate_hz: 25,
            max_duration_secs: 10.0,
        }
    }

    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Runs a scenario on a fresh single-threaded runtime.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
            Ok(runtime) => runtime,
            Err(e) => return ScenarioResult::failed(scenario, self.seed, format!("runtime: {}", e)),
        };
        runtime.block_on(self.run_async(scenario))
    }

    pub async fn run_async(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        let outcome = match scenario {
            ScenarioId::HostFailover => self.run_host_failover().await,
            ScenarioId::CaptureRace => self.run_capture_race().await,
            ScenarioId::Reconciliation => self.run_reconciliation().await,
            ScenarioId::Partition => self.run_partition().await,
            ScenarioId::BotSkirmish => self.run_bot_skirmish().await,
        };
        outcome.unwrap_or_else(|e| {
            warn!(scenario = scenario.name(), error = %e, "scenario aborted");
            ScenarioResult::failed(scenario, self.seed, e.to_string())
        })
    }

    fn sim_config(&self, scenario: ScenarioId) -> SimConfig {
        SimConfig {
            seed: self.seed,
            // Stock map has eight cities and two go to bots
            num_peers: self.num_peers.max(scenario.min_peers()).min(6),
            tick_rate_hz: self.tick_rate_hz,
            max_duration_secs: self.max_duration_secs,
            ..SimConfig::default()
        }
    }

    /// SKM-001: HostFailover - kill the host a third of the way in.
    async fn run_host_failover(&self) -> Result<ScenarioResult, SimError> {
        info!("SKM-001: HostFailover - host crash test");
        let config = self.sim_config(ScenarioId::HostFailover);
        let total = config.total_ticks();
        let mut world = SimWorld::new(config)?;
        world.start().await?;

        let kill_at = total / 3;
        let mut tick_at_kill = 0;
        for tick in 0..total {
            if tick == kill_at {
                tick_at_kill = world.host_world().map_or(0, |w| w.tick);
                world.kill(&peer_id(0));
            }
            issue_patrols(&mut world, tick);
            world.tick().await;
            if tick % 25 == 0 {
                debug!("  t={:.1}s | hosts=[{}]", world.time(), join_ids(&world.host_ids()));
            }
        }
        let settled = world.settle(SETTLE_TICKS).await;

        let expected = world.live_ids().into_iter().min();
        let hosts = world.host_ids();
        let failure = if hosts.len() != 1 || hosts.first() != expected.as_ref() {
            Some(format!("expected host {:?}, found [{}]", expected.map(|p| p.to_string()), join_ids(&hosts)))
        } else if !settled {
            Some("survivors did not converge on the new host".to_string())
        } else if world.host_world().map_or(0, |w| w.tick) <= tick_at_kill {
            Some("match stalled after failover".to_string())
        } else {
            None
        };
        Ok(self.finish(ScenarioId::HostFailover, &world, ScenarioMetrics::default(), failure))
    }

    /// SKM-002: CaptureRace - both players send their garrison at one city.
    async fn run_capture_race(&self) -> Result<ScenarioResult, SimError> {
        info!("SKM-002: CaptureRace - contested capture test");
        let config = self.sim_config(ScenarioId::CaptureRace);
        let total = config.total_ticks();
        let (a, b) = (peer_id(0), peer_id(1));

        let mut state = MatchSetup::new()
            .human(a.as_str(), "#e6194b")
            .human(b.as_str(), "#3cb44b")
            .city("base-a", GeoPoint::new(50.0, 25.0), 1, false)
            .city("base-b", GeoPoint::new(50.0, 75.0), 1, false)
            .city("prize", GeoPoint::new(50.0, 50.0), 1, false)
            .assign_base(a.as_str(), "base-a")
            .assign_base(b.as_str(), "base-b")
            .build()?;
        if let Some(prize) = state.pois.get_mut("prize") {
            prize.hp = PRIZE_HP;
        }
        let mut world = SimWorld::with_world(config, state, Arc::new(skirmish_terrain()))?;
        world.start().await?;

        for racer in [&a, &b] {
            let Some(peer) = world.peer(racer) else { continue };
            let player = peer.player_id();
            let unit_ids: Vec<UnitId> = peer
                .units()
                .values()
                .filter(|u| u.faction_id == player && u.class.is_mobile())
                .map(|u| u.id.clone())
                .collect();
            world.issue(
                racer,
                ActionKind::Attack {
                    unit_ids,
                    target: TargetRef::Poi("prize".into()),
                },
            );
        }

        let mut metrics = ScenarioMetrics::default();
        let mut owner = None;
        for tick in 0..total {
            world.tick().await;
            let current = world
                .host_world()
                .and_then(|w| w.pois.get("prize"))
                .and_then(|p| p.owner.clone());
            if current != owner {
                info!("  ⚑ prize taken by {:?} at tick {}", current, tick);
                metrics.captures += 1;
                owner = current;
            }
        }
        let settled = world.settle(SETTLE_TICKS).await;

        let host_owner = world
            .host_world()
            .and_then(|w| w.pois.get("prize"))
            .and_then(|p| p.owner.clone());
        let disagreeing: Vec<String> = world
            .live_peers()
            .filter(|p| p.pois().get("prize").and_then(|poi| poi.owner.clone()) != host_owner)
            .map(|p| p.local_id().to_string())
            .collect();
        let failure = match host_owner {
            None => Some("nobody captured the prize".to_string()),
            Some(_) if !settled => Some("peers never converged".to_string()),
            Some(_) if !disagreeing.is_empty() => Some(format!("owner disputed by {}", disagreeing.join(","))),
            Some(_) => None,
        };
        Ok(self.finish(ScenarioId::CaptureRace, &world, metrics, failure))
    }

    /// SKM-003: Reconciliation - a client drives units through a laggy link.
    async fn run_reconciliation(&self) -> Result<ScenarioResult, SimError> {
        info!("SKM-003: Reconciliation - prediction under lag");
        let config = self.sim_config(ScenarioId::Reconciliation);
        let total = config.total_ticks();
        let mut world = SimWorld::new(config)?;
        let host = peer_id(0);
        for client in world.live_ids().into_iter().filter(|p| *p != host) {
            world.controller.set_latency(&host, &client, LAG_MS);
            world.controller.set_latency(&client, &host, LAG_MS);
        }
        world.start().await?;

        let client = peer_id(1);
        let mut metrics = ScenarioMetrics::default();
        let mut previous: BTreeMap<UnitId, GeoPoint> = BTreeMap::new();
        for tick in 0..total {
            issue_patrols(&mut world, tick);
            world.tick().await;

            let Some(peer) = world.peer(&client) else { break };
            let visuals = peer.replica().visuals();
            for (id, visual) in visuals {
                if let Some(before) = previous.get(id) {
                    let step = before.distance_to(&visual.position);
                    if step > metrics.max_visual_step {
                        metrics.max_visual_step = step;
                    }
                }
            }
            previous = visuals.iter().map(|(id, v)| (id.clone(), v.position)).collect();
        }
        let settled = world.settle(SETTLE_TICKS).await;

        let snapshots = world.peer(&client).map_or(0, |p| p.stats().snapshots_applied);
        let failure = if metrics.max_visual_step > VISUAL_JUMP_LIMIT {
            Some(format!("visual jumped {:.2} in one tick", metrics.max_visual_step))
        } else if snapshots == 0 {
            Some("client never reconciled a snapshot".to_string())
        } else if !settled {
            Some("client never caught up with the host".to_string())
        } else {
            None
        };
        info!("  max visual step {:.3}", metrics.max_visual_step);
        Ok(self.finish(ScenarioId::Reconciliation, &world, metrics, failure))
    }

    /// SKM-004: Partition - cut the last peer off, then heal.
    async fn run_partition(&self) -> Result<ScenarioResult, SimError> {
        info!("SKM-004: Partition - split brain test");
        let config = self.sim_config(ScenarioId::Partition);
        let total = config.total_ticks();
        let mut world = SimWorld::new(config)?;
        world.start().await?;

        let mut ids = world.live_ids();
        let Some(isolated) = ids.pop() else { return Err(SimError::NoPeers) };
        let partition_start = total / 4;
        let partition_end = total * 3 / 4;
        let mut promoted_in_isolation = false;

        for tick in 0..total {
            if tick == partition_start {
                info!("  ⚡ Isolating {} at t={:.1}s", isolated, world.time());
                world.partition(&ids, &[isolated.clone()]);
            }
            if tick == partition_end {
                info!("  ✓ Healing network at t={:.1}s", world.time());
                world.heal();
            }
            issue_patrols(&mut world, tick);
            world.tick().await;
            if (partition_start..partition_end).contains(&tick) {
                promoted_in_isolation |= world.peer(&isolated).is_some_and(|p| p.is_host());
            }
        }
        let settled = world.settle(SETTLE_TICKS).await;

        let hosts = world.host_ids();
        let failure = if !promoted_in_isolation {
            Some(format!("{} never promoted itself while cut off", isolated))
        } else if hosts != [peer_id(0)] {
            Some(format!("expected host peer-00 after healing, found [{}]", join_ids(&hosts)))
        } else if !settled {
            Some("peers did not converge after healing".to_string())
        } else {
            None
        };
        Ok(self.finish(ScenarioId::Partition, &world, ScenarioMetrics::default(), failure))
    }

    /// SKM-005: BotSkirmish - AI only, check invariants every tick.
    async fn run_bot_skirmish(&self) -> Result<ScenarioResult, SimError> {
        info!("SKM-005: BotSkirmish - AI match test");
        let config = SimConfig {
            human_players: false,
            num_bots: 4,
            ..self.sim_config(ScenarioId::BotSkirmish)
        };
        let total = config.total_ticks();
        let mut world = SimWorld::new(config)?;
        world.start().await?;

        let mut metrics = ScenarioMetrics::default();
        let mut failure = None;
        for _ in 0..total {
            world.tick().await;
            let Some(state) = world.host_world() else {
                failure = Some("no single host".to_string());
                break;
            };
            metrics.invariant_checks += 1;
            if let Some(violation) = state.invariant_violations().into_iter().next() {
                failure = Some(format!("tick {}: {}", state.tick, violation));
                break;
            }
        }
        if failure.is_none() && !world.settle(SETTLE_TICKS).await {
            failure = Some("clients fell behind the host".to_string());
        }
        Ok(self.finish(ScenarioId::BotSkirmish, &world, metrics, failure))
    }

    fn finish(
        &self,
        scenario: ScenarioId,
        world: &SimWorld,
        mut metrics: ScenarioMetrics,
        failure: Option<String>,
    ) -> ScenarioResult {
        metrics.packets_sent = world.metrics.packets_sent;
        metrics.packets_dropped = world.metrics.packets_dropped;
        for peer in world.live_peers() {
            let stats = peer.stats();
            metrics.actions_applied += stats.actions_applied;
            metrics.snapshots_applied += stats.snapshots_applied;
            metrics.promotions += stats.promotions;
        }
        match &failure {
            None => info!(
                "✓ {} complete: {} packets, {} dropped, {} promotions",
                scenario.name(),
                metrics.packets_sent,
                metrics.packets_dropped,
                metrics.promotions
            ),
            Some(reason) => warn!("✗ {} failed: {}", scenario.name(), reason),
        }
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure.is_none(),
            total_ticks: world.tick_count(),
            final_time_secs: world.time(),
            final_unit_count: world.host_world().map_or(0, |w| w.units.len()),
            failure_reason: failure,
            metrics,
        }
    }
}

/// Every two seconds each live player sends its mobile units to a waypoint.
fn issue_patrols(world: &mut SimWorld, tick: u64) {
    const PERIOD: u64 = 50;
    if tick % PERIOD != 0 {
        return;
    }
    let leg = tick / PERIOD;
    let destination = if leg % 2 == 0 {
        GeoPoint::new(25.0, 65.0)
    } else {
        GeoPoint::new(40.0, 45.0)
    };

    let mut orders: Vec<(PeerId, Vec<UnitId>)> = Vec::new();
    for peer in world.live_peers() {
        let player = peer.player_id();
        let unit_ids: Vec<UnitId> = peer
            .units()
            .values()
            .filter(|u| u.faction_id == player && u.class.is_mobile())
            .map(|u| u.id.clone())
            .collect();
        if !unit_ids.is_empty() {
            orders.push((peer.local_id().clone(), unit_ids));
        }
    }
    for (peer, unit_ids) in orders {
        world.issue(
            &peer,
            ActionKind::MoveUnits {
                unit_ids,
                destination,
                boost: leg % 4 == 3,
            },
        );
    }
}

fn join_ids(ids: &[PeerId]) -> String {
    ids.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(42, 3)
    }

    #[test]
    fn test_host_failover_passes() {
        let result = runner().run(ScenarioId::HostFailover);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.promotions, 1);
        assert!(result.metrics.packets_dropped > 0);
    }

    #[test]
    fn test_capture_race_has_one_owner() {
        let result = runner().run(ScenarioId::CaptureRace);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.captures >= 1);
    }

    #[test]
    fn test_partition_converges() {
        let result = runner().run(ScenarioId::Partition);
        assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn test_reconciliation_visuals_stay_smooth() {
        let result = runner().run(ScenarioId::Reconciliation);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.max_visual_step <= VISUAL_JUMP_LIMIT);
        assert!(result.metrics.snapshots_applied > 0);
    }

    #[test]
    fn test_bot_skirmish_keeps_invariants() {
        let result = runner().run(ScenarioId::BotSkirmish);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.invariant_checks, 250);
    }

    #[test]
    fn test_same_seed_same_result() {
        let first = runner().run(ScenarioId::HostFailover);
        let second = runner().run(ScenarioId::HostFailover);
        assert_eq!(first.total_ticks, second.total_ticks);
        assert_eq!(first.final_unit_count, second.final_unit_count);
        assert_eq!(first.metrics.packets_sent, second.metrics.packets_sent);
    }
}
