// Copyright (c) 2022 MASSA LABS <info@massa.net>

use lattice_models::node::NodeId;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// Live peer roster, fed by transport connection events.
///
/// Readers get a snapshot; the set may change while a sync pass is running
/// and workers must tolerate peers disappearing under them.
#[derive(Clone, Default)]
pub struct Peers(Arc<RwLock<Vec<NodeId>>>);

impl Peers {
    /// Creates an empty roster.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a peer if not already present.
    pub fn add(&self, peer: NodeId) {
        let mut peers = self.0.write();
        if !peers.contains(&peer) {
            info!("peer {} connected", peer);
            peers.push(peer);
        }
    }

    /// Removes a peer.
    pub fn remove(&self, peer: &NodeId) {
        let mut peers = self.0.write();
        if let Some(pos) = peers.iter().position(|p| p == peer) {
            info!("peer {} disconnected", peer);
            peers.swap_remove(pos);
        }
    }

    /// Snapshot of the current peers.
    pub fn get_peers(&self) -> Vec<NodeId> {
        self.0.read().clone()
    }

    /// Number of live peers.
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}
