//! Skirmish Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing Skirmish peers
//! to run both in **Production** (tokio + a real transport) and inside the
//! deterministic **Simulation** harness.
//!
//! # Core Concept
//!
//! Everything a peer needs from the outside world goes through two traits:
//! - [`MatchContext`]: time (`now()`, `sleep()`) and
//!   seeded randomness (`derive_rng()`)
//! - [`PeerTransport`]: reliable-ordered, peer-addressable delivery
//!   (`send()`, `broadcast()`, `try_recv()`, `connect()`)
//!
//! Deriving all entropy from one 64-bit seed makes any simulated match
//! reproducible from its seed number.
//!
//! # Example
//!
//! ```ignore
//! use skirmish_env::{MatchContext, PeerTransport};
//!
//! async fn peer_loop<Ctx: MatchContext, Net: PeerTransport>(ctx: &Ctx, net: &Net) {
//!     loop {
//!         while let Some((from, event)) = net.try_recv() {
//!             queue(from, event);
//!         }
//!         tick(ctx.now());
//!         ctx.sleep(Duration::from_millis(40)).await;
//!     }
//! }
//! ```

mod context;
mod error;
mod network;
mod tokio_impl;
mod types;

pub use context::MatchContext;
pub use error::EnvError;
pub use network::{NetworkController, PeerTransport};
pub use tokio_impl::TokioContext;
pub use types::{PacketEnvelope, PeerId, TransportEvent};
