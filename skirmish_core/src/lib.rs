//! Skirmish Core - peer-hosted RTS simulation and replication
//!
//! One peer hosts the authoritative world and the others replicate it:
//! 1. **Commands**: idempotent actions with per-player sequence ids
//! 2. **Simulation**: fixed-rate deterministic ticks plus bot AI
//! 3. **Replication**: versioned snapshots reconciled against client prediction
//! 4. **Failover**: heartbeat timeouts and a min-id host election

pub mod action;
pub mod ai;
pub mod authority;
pub mod config;
pub mod election;
pub mod error;
pub mod model;
pub mod peer;
pub mod protocol;
pub mod replica;
pub mod rules;
pub mod runtime;
pub mod setup;
pub mod simulator;
pub mod snapshot;
pub mod terrain;

// Re-export key types for convenience
pub use action::{apply_action, Action, ActionFactory, ActionId, ActionKind, ApplyOutcome, RejectReason};
pub use ai::{AiConfig, AiEngine};
pub use authority::HostAuthority;
pub use config::MatchConfig;
pub use election::{elect_successor, HostMonitor, MigrationDecision, PeerRole, PeerRoster};
pub use error::SessionError;
pub use model::{
    Explosion, Faction, FactionId, FactionKind, GeoPoint, MatchPhase, Poi, PoiId, PoiKind, Projectile, Relation,
    TargetRef, Unit, UnitClass, UnitId, WorldState,
};
pub use peer::{ConnectionStatus, MatchPeer, Outgoing, PeerStats};
pub use protocol::{decode, encode, PeerMessage, ProtocolError};
pub use replica::{ClientReplica, SnapshotOutcome, VisualState};
pub use runtime::{connect_with_retry, PeerRuntime};
pub use setup::{skirmish_map, skirmish_map_placed, skirmish_terrain, MatchSetup, SetupError};
pub use simulator::{advance_world, TickReport, TickSimulator};
pub use snapshot::Snapshot;
pub use terrain::{OpenTerrain, RegionTerrain, Terrain};
