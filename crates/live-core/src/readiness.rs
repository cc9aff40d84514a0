//! ReadinessGate: decides when it is safe to mint new guids locally.
//!
//! A brand-new shared folder must not assign guids to local files while
//! offline: a peer could be doing the same for the same intended file, and
//! two guids for one logical document is an unrecoverable split. A folder
//! with prior collaborative history can proceed offline, because its guids
//! were already reconciled by an earlier online session.
//!
//! Readiness is re-derived on demand from the gate's inputs, except for the
//! "has known peers" sub-fact, which is memoized once resolved - that fact,
//! once learned, cannot become false again for this folder instance.

use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

/// History threshold for "this folder has known peers": more than this many
/// applied remote update batches implies a previous online session already
/// reconciled identities.
pub const BOOTSTRAP_HISTORY: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Inputs not yet evaluated (store still loading).
    Unresolved,
    /// No known peer history; minting is forbidden until a live connection
    /// confirms the replica is caught up.
    WaitingForPeers,
    /// Safe to mint guids locally.
    Ready,
}

#[derive(Debug, Clone, Copy, Default)]
struct GateInputs {
    persistence_synced: bool,
    connected: bool,
    server_synced: bool,
}

pub struct ReadinessGate {
    inputs: watch::Sender<GateInputs>,
    /// Memoized "has known peers"; `None` until first resolved.
    known_peers: Mutex<Option<bool>>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self {
            inputs: watch::Sender::new(GateInputs::default()),
            known_peers: Mutex::new(None),
        }
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the "has known peers" heuristic from the folder store's
    /// applied-update count. Memoized: later calls keep the first answer
    /// (except that `false` may still be promoted to `true` by a completed
    /// server sync).
    pub fn resolve_known_peers(&self, history_len: u64) -> bool {
        let mut memo = self.known_peers.lock().unwrap_or_else(|e| e.into_inner());
        match *memo {
            Some(known) => known,
            None => {
                let known = history_len > BOOTSTRAP_HISTORY;
                if !known {
                    warn!("No known peers -- waiting for connection before allowing edits");
                }
                *memo = Some(known);
                drop(memo);
                // Wake any wait_ready callers re-deriving state
                self.inputs.send_modify(|_| {});
                known
            }
        }
    }

    pub fn set_persistence_synced(&self, synced: bool) {
        self.inputs.send_modify(|i| i.persistence_synced = synced);
    }

    pub fn set_connected(&self, connected: bool) {
        self.inputs.send_modify(|i| i.connected = connected);
        self.maybe_promote();
    }

    /// Signal that the remote replica confirmed it is caught up.
    pub fn set_server_synced(&self, synced: bool) {
        self.inputs.send_modify(|i| i.server_synced = synced);
        self.maybe_promote();
    }

    /// A completed live sync leaves real history behind, so the memoized
    /// "has known peers" flips to true and stays true.
    fn maybe_promote(&self) {
        let inputs = *self.inputs.borrow();
        if inputs.connected && inputs.server_synced {
            let mut memo = self.known_peers.lock().unwrap_or_else(|e| e.into_inner());
            if *memo == Some(false) {
                debug!("Folder synchronized with server; peers are now known");
                *memo = Some(true);
            }
        }
    }

    /// Whether both local persistence and the remote connection currently
    /// report fully synced. Destructive deletes are only allowed here.
    pub fn fully_synced(&self) -> bool {
        let inputs = *self.inputs.borrow();
        inputs.persistence_synced && inputs.connected && inputs.server_synced
    }

    /// Current readiness, re-derived from the inputs.
    pub fn state(&self) -> Readiness {
        let inputs = *self.inputs.borrow();
        if !inputs.persistence_synced {
            return Readiness::Unresolved;
        }
        let known = *self.known_peers.lock().unwrap_or_else(|e| e.into_inner());
        match known {
            None => Readiness::Unresolved,
            Some(true) => Readiness::Ready,
            Some(false) => {
                if inputs.connected && inputs.server_synced {
                    Readiness::Ready
                } else {
                    Readiness::WaitingForPeers
                }
            }
        }
    }

    /// Whether minting new guids for local files is currently allowed.
    pub fn can_mint(&self) -> bool {
        self.state() == Readiness::Ready
    }

    /// Suspend until the gate reports `Ready`.
    ///
    /// All concurrent callers share the same underlying watch condition;
    /// none blocks other folders or the host. Resolution is global: once
    /// the gate passes, every waiter wakes.
    pub async fn wait_ready(&self) {
        let mut rx = self.inputs.subscribe();
        loop {
            if self.state() == Readiness::Ready {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_unresolved_until_evaluated() {
        let gate = ReadinessGate::new();
        assert_eq!(gate.state(), Readiness::Unresolved);

        gate.set_persistence_synced(true);
        // Persistence synced but history not yet resolved
        assert_eq!(gate.state(), Readiness::Unresolved);
    }

    #[test]
    fn test_history_allows_offline_ready() {
        let gate = ReadinessGate::new();
        gate.set_persistence_synced(true);

        assert!(gate.resolve_known_peers(BOOTSTRAP_HISTORY + 1));
        assert_eq!(gate.state(), Readiness::Ready);
        assert!(gate.can_mint());
        // Offline with history is not "fully synced" though
        assert!(!gate.fully_synced());
    }

    #[test]
    fn test_fresh_folder_waits_for_peers() {
        let gate = ReadinessGate::new();
        gate.set_persistence_synced(true);

        assert!(!gate.resolve_known_peers(0));
        assert_eq!(gate.state(), Readiness::WaitingForPeers);
        assert!(!gate.can_mint());

        gate.set_connected(true);
        assert_eq!(gate.state(), Readiness::WaitingForPeers);

        gate.set_server_synced(true);
        assert_eq!(gate.state(), Readiness::Ready);
        assert!(gate.fully_synced());
    }

    #[test]
    fn test_known_peers_is_monotonic() {
        let gate = ReadinessGate::new();
        gate.set_persistence_synced(true);
        gate.resolve_known_peers(0);

        gate.set_connected(true);
        gate.set_server_synced(true);
        assert_eq!(gate.state(), Readiness::Ready);

        // Going offline again: peers stay known, the folder stays ready
        gate.set_connected(false);
        gate.set_server_synced(false);
        assert_eq!(gate.state(), Readiness::Ready);
        assert!(!gate.fully_synced());
    }

    #[test]
    fn test_memo_keeps_first_answer() {
        let gate = ReadinessGate::new();
        gate.set_persistence_synced(true);
        assert!(gate.resolve_known_peers(10));
        // A later call with an empty history cannot unlearn peers
        assert!(gate.resolve_known_peers(0));
    }

    #[tokio::test]
    async fn test_wait_ready_shared_by_many_callers() {
        let gate = Arc::new(ReadinessGate::new());
        gate.set_persistence_synced(true);
        gate.resolve_known_peers(0);

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let gate = Arc::clone(&gate);
            waiters.push(tokio::spawn(async move {
                gate.wait_ready().await;
            }));
        }

        // Give the waiters a chance to register, then resolve the gate
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.set_connected(true);
        gate.set_server_synced(true);

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should resolve")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_wait_ready_immediate_when_ready() {
        let gate = ReadinessGate::new();
        gate.set_persistence_synced(true);
        gate.resolve_known_peers(BOOTSTRAP_HISTORY + 1);
        gate.wait_ready().await;
    }
}
