//! Deterministic simulation harness for skirmish matches.
//!
//! Every peer of a match runs in one process against a shared virtual
//! clock and a simulated network. The harness owns routing, so latency,
//! partitions and crashes are injected without touching peer code.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        SimWorld                          │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │ SimContext (virtual clock + seeded RNG streams)    │  │
//! │  └────────────────────────────────────────────────────┘  │
//! │       │                       │                          │
//! │  ┌────▼──────┐           ┌────▼──────┐                   │
//! │  │PeerRuntime│◄─────────►│PeerRuntime│    ...            │
//! │  │ (host)    │  router   │ (client)  │                   │
//! │  └───────────┘  + faults └───────────┘                   │
//! │                     ▲                                    │
//! │             SimNetworkController                         │
//! │        (latency, partitions, dead peers)                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use skirmish_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 3).run(ScenarioId::HostFailover);
//! assert!(result.passed);
//! ```

mod context;
mod network;
mod runner;
pub mod scenarios;
mod world;

pub use context::SimContext;
pub use network::{NetworkMessage, SimNetwork, SimNetworkController};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner, VISUAL_JUMP_LIMIT};
pub use world::{bot_ids, peer_id, NetworkMetrics, SimConfig, SimError, SimWorld};
