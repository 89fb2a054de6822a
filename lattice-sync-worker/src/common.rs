// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::messages::{SyncRequest, SyncResponse};
use crate::peers::Peers;
use crate::server::{send_request, MessageServerHandle};
use lattice_hash::Hash;
use lattice_models::node::NodeId;
use lattice_storage::Storage;
use lattice_sync_exports::{BlockEligibilityValidator, Mesh, SyncConfig, SyncError};
use rand::seq::SliceRandom;
use rand::RngCore;
use std::sync::Arc;
use tokio::sync::watch;

/// Everything the sync machinery shares: configuration, the local stores, the
/// collaborator capabilities and the network plumbing.
pub(crate) struct SyncCore {
    pub cfg: SyncConfig,
    pub storage: Storage,
    pub mesh: Arc<dyn Mesh>,
    pub validator: Arc<dyn BlockEligibilityValidator>,
    pub peers: Peers,
    pub server: MessageServerHandle,
    pub shutdown: watch::Receiver<bool>,
}

impl SyncCore {
    /// Whether the process-wide shutdown signal fired.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// One request to one peer, bounded by the configured request timeout.
    pub async fn request_peer(
        &self,
        peer: NodeId,
        request: SyncRequest,
    ) -> Result<Option<SyncResponse>, SyncError> {
        let mut shutdown = self.shutdown.clone();
        send_request(
            &self.server,
            &mut shutdown,
            self.cfg.request_timeout,
            peer,
            request,
        )
        .await
    }

    /// Peer snapshot in randomized order, rotating the load between peers.
    pub fn shuffled_peers(&self) -> Vec<NodeId> {
        let mut peers = self.peers.get_peers();
        peers.shuffle(&mut rand::thread_rng());
        peers
    }
}

/// Randomized identity for one-shot dependency jobs, so they never collide
/// with a block job keyed by content hash.
pub(crate) fn random_job_hash() -> Hash {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    Hash::compute_from(&bytes)
}
