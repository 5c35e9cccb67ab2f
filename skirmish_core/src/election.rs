//! Host liveness tracking and deterministic failover.
//!
//! Every peer keeps the same sorted roster. When the host goes quiet each
//! survivor removes it and picks the lexicographically first remaining id.
//! Nobody coordinates: identical rosters give identical answers.

use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, warn};

use skirmish_env::PeerId;

/// Sorted set of peers in the match, the local peer included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerRoster {
    peers: BTreeSet<PeerId>,
}

impl PeerRoster {
    pub fn new(peers: impl IntoIterator<Item = PeerId>) -> Self {
        Self {
            peers: peers.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, peer: PeerId) -> bool {
        self.peers.insert(peer)
    }

    pub fn remove(&mut self, peer: &PeerId) -> bool {
        self.peers.remove(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.iter()
    }

    pub fn to_vec(&self) -> Vec<PeerId> {
        self.peers.iter().cloned().collect()
    }
}

/// First id in `roster` other than `failed`.
pub fn elect_successor(roster: &PeerRoster, failed: &PeerId) -> Option<PeerId> {
    roster.iter().find(|p| *p != failed).cloned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Host,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationPhase {
    Stable,
    /// Another peer won; waiting for its `NewHost`
    AwaitingAnnouncement { successor: PeerId },
    /// This peer won and is taking over
    Promoting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationDecision {
    /// Host is alive, or an election is already under way
    Idle,
    /// This peer must become host
    Promote,
    /// Another peer should become host
    AwaitAnnouncement(PeerId),
    /// Nobody is left to elect
    Stranded,
}

/// Watches the host's heartbeats from a client.
#[derive(Debug, Clone)]
pub struct HostMonitor {
    local_id: PeerId,
    host: Option<PeerId>,
    last_heartbeat: Duration,
    timeout: Duration,
    phase: MigrationPhase,
}

impl HostMonitor {
    pub fn new(local_id: PeerId, host: Option<PeerId>, timeout: Duration, now: Duration) -> Self {
        Self {
            local_id,
            host,
            last_heartbeat: now,
            timeout,
            phase: MigrationPhase::Stable,
        }
    }

    pub fn host(&self) -> Option<&PeerId> {
        self.host.as_ref()
    }

    pub fn phase(&self) -> &MigrationPhase {
        &self.phase
    }

    /// True while an election is in progress.
    pub fn is_migrating(&self) -> bool {
        self.phase != MigrationPhase::Stable
    }

    /// Records a heartbeat. Returns false if `from` is not the current host.
    ///
    /// A heartbeat from the successor being waited on counts as its
    /// announcement.
    pub fn observe_heartbeat(&mut self, from: &PeerId, now: Duration) -> bool {
        if let MigrationPhase::AwaitingAnnouncement { successor } = &self.phase {
            if successor == from {
                self.adopt_host(from.clone(), now);
                return true;
            }
        }
        if self.host.as_ref() != Some(from) {
            return false;
        }
        self.last_heartbeat = now;
        true
    }

    /// Checks liveness and runs the election when the host timed out.
    ///
    /// The failed host is removed from `roster`. While a migration is in
    /// progress further timeouts are ignored.
    pub fn poll(&mut self, now: Duration, roster: &mut PeerRoster) -> MigrationDecision {
        if self.phase == MigrationPhase::Promoting {
            return MigrationDecision::Idle;
        }
        if now.saturating_sub(self.last_heartbeat) <= self.timeout {
            return MigrationDecision::Idle;
        }

        // An announced successor that never showed up is itself dead
        let failed = match &self.phase {
            MigrationPhase::AwaitingAnnouncement { successor } => Some(successor.clone()),
            _ => self.host.clone(),
        };
        let Some(failed) = failed else { return MigrationDecision::Idle };

        warn!(local = %self.local_id, host = %failed, "host timed out, running election");
        roster.remove(&failed);
        self.host = None;

        match elect_successor(roster, &failed) {
            None => {
                self.phase = MigrationPhase::Stable;
                MigrationDecision::Stranded
            }
            Some(successor) if successor == self.local_id => {
                info!(local = %self.local_id, "elected as new host");
                self.phase = MigrationPhase::Promoting;
                MigrationDecision::Promote
            }
            Some(successor) => {
                info!(local = %self.local_id, successor = %successor, "awaiting new host");
                self.last_heartbeat = now;
                self.phase = MigrationPhase::AwaitingAnnouncement {
                    successor: successor.clone(),
                };
                MigrationDecision::AwaitAnnouncement(successor)
            }
        }
    }

    /// Called once this peer is host.
    pub fn finish_promotion(&mut self) {
        self.host = Some(self.local_id.clone());
        self.phase = MigrationPhase::Stable;
    }

    /// Follows `host`, unlocking any election in progress.
    pub fn adopt_host(&mut self, host: PeerId, now: Duration) {
        self.host = Some(host);
        self.last_heartbeat = now;
        self.phase = MigrationPhase::Stable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roster(ids: &[&str]) -> PeerRoster {
        PeerRoster::new(ids.iter().map(|s| PeerId::new(*s)))
    }

    #[test]
    fn test_election_scenario() {
        // Roster {A, B, C}, host B fails, everyone picks A
        let mut r = roster(&["C", "A", "B"]);
        r.remove(&PeerId::new("B"));
        assert_eq!(elect_successor(&r, &PeerId::new("B")), Some(PeerId::new("A")));
    }

    #[test]
    fn test_election_skips_failed_host() {
        let r = roster(&["A", "B"]);
        assert_eq!(elect_successor(&r, &PeerId::new("A")), Some(PeerId::new("B")));
        assert_eq!(elect_successor(&roster(&["A"]), &PeerId::new("A")), None);
    }

    #[test]
    fn test_monitor_promotes_winner() {
        let mut r = roster(&["A", "B", "C"]);
        let mut monitor = HostMonitor::new(PeerId::new("A"), Some(PeerId::new("B")), Duration::from_secs(3), Duration::ZERO);

        assert_eq!(monitor.poll(Duration::from_secs(2), &mut r), MigrationDecision::Idle);
        assert!(monitor.observe_heartbeat(&PeerId::new("B"), Duration::from_secs(2)));
        assert!(!monitor.observe_heartbeat(&PeerId::new("C"), Duration::from_secs(2)));

        assert_eq!(monitor.poll(Duration::from_secs(6), &mut r), MigrationDecision::Promote);
        assert!(!r.contains(&PeerId::new("B")));
        assert!(monitor.is_migrating());

        // Lock holds until promotion completes
        assert_eq!(monitor.poll(Duration::from_secs(60), &mut r), MigrationDecision::Idle);
        monitor.finish_promotion();
        assert_eq!(monitor.host(), Some(&PeerId::new("A")));
        assert!(!monitor.is_migrating());
    }

    #[test]
    fn test_monitor_waits_for_announcement() {
        let mut r = roster(&["A", "B", "C"]);
        let mut monitor = HostMonitor::new(PeerId::new("C"), Some(PeerId::new("B")), Duration::from_secs(3), Duration::ZERO);

        assert_eq!(
            monitor.poll(Duration::from_secs(4), &mut r),
            MigrationDecision::AwaitAnnouncement(PeerId::new("A"))
        );
        // Still locked inside the timeout window
        assert_eq!(monitor.poll(Duration::from_secs(5), &mut r), MigrationDecision::Idle);

        monitor.adopt_host(PeerId::new("A"), Duration::from_secs(5));
        assert!(!monitor.is_migrating());
        assert!(monitor.observe_heartbeat(&PeerId::new("A"), Duration::from_secs(6)));
    }

    #[test]
    fn test_successor_heartbeat_counts_as_announcement() {
        let mut r = roster(&["A", "B", "C"]);
        let mut monitor = HostMonitor::new(PeerId::new("C"), Some(PeerId::new("B")), Duration::from_secs(3), Duration::ZERO);
        monitor.poll(Duration::from_secs(4), &mut r);

        assert!(!monitor.observe_heartbeat(&PeerId::new("B"), Duration::from_secs(5)));
        assert!(monitor.observe_heartbeat(&PeerId::new("A"), Duration::from_secs(5)));
        assert_eq!(monitor.host(), Some(&PeerId::new("A")));
        assert_eq!(*monitor.phase(), MigrationPhase::Stable);
    }

    #[test]
    fn test_silent_successor_is_skipped() {
        let mut r = roster(&["A", "B", "C"]);
        let mut monitor = HostMonitor::new(PeerId::new("C"), Some(PeerId::new("A")), Duration::from_secs(3), Duration::ZERO);

        assert_eq!(
            monitor.poll(Duration::from_secs(4), &mut r),
            MigrationDecision::AwaitAnnouncement(PeerId::new("B"))
        );
        // B never announces
        assert_eq!(monitor.poll(Duration::from_secs(8), &mut r), MigrationDecision::Promote);
    }

    #[test]
    fn test_last_peer_is_stranded_without_others() {
        let mut r = roster(&["B"]);
        let mut monitor = HostMonitor::new(PeerId::new("B"), Some(PeerId::new("A")), Duration::from_secs(1), Duration::ZERO);
        // Roster no longer holds A; B is the only candidate and wins
        assert_eq!(monitor.poll(Duration::from_secs(2), &mut r), MigrationDecision::Promote);

        let mut empty = PeerRoster::default();
        let mut monitor = HostMonitor::new(PeerId::new("Z"), Some(PeerId::new("A")), Duration::from_secs(1), Duration::ZERO);
        assert_eq!(monitor.poll(Duration::from_secs(2), &mut empty), MigrationDecision::Stranded);
    }

    proptest! {
        #[test]
        fn prop_survivors_agree_on_successor(
            ids in prop::collection::btree_set("[a-z]{1,6}", 2..8),
            host_index in 0usize..8,
        ) {
            let ids: Vec<PeerId> = ids.into_iter().map(PeerId::new).collect();
            let host = ids[host_index % ids.len()].clone();
            let survivors: Vec<&PeerId> = ids.iter().filter(|p| **p != host).collect();

            let mut winners = BTreeSet::new();
            for local in &survivors {
                // Each survivor builds its roster independently, in any order
                let mut shuffled = ids.clone();
                shuffled.rotate_left(local.as_str().len() % ids.len());
                let mut r = PeerRoster::new(shuffled);
                r.remove(&host);
                winners.insert(elect_successor(&r, &host));
            }
            prop_assert_eq!(winners.len(), 1);
            let expected = survivors.iter().min().map(|p| (*p).clone());
            prop_assert_eq!(winners.into_iter().next().flatten(), expected);
        }
    }
}
