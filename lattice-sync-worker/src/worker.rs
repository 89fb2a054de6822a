// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! The sync controller: a tick-driven state machine that reconciles the node
//! with the network, one layer at a time, and gates gossip admission while
//! doing so.

use crate::block_queue::{BlockQueue, JobId};
use crate::common::SyncCore;
use crate::fetch_queue::AtxQueue;
use crate::messages::{SyncRequest, SyncResponse};
use crate::workers::{fetch_input_vector_from_peers, spawn_peers_hash_worker};
use lattice_hash::Hash;
use lattice_logging::lattice_trace;
use lattice_models::activation::AtxId;
use lattice_models::block::{Block, BlockId};
use lattice_models::layer::{EpochId, Layer, LayerId};
use lattice_models::node::NodeId;
use lattice_models::prehash::{CapacityAllocator, PreHashMap, PreHashSet};
use lattice_sync_exports::{
    GossipStatus, LayerClock, SyncCommand, SyncError, SyncStatusHandle,
};
use lattice_time::LatticeTime;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

/// The synchronise flows, shared between the run loop's spawned passes.
pub(crate) struct Synchroniser {
    core: Arc<SyncCore>,
    clock: Arc<dyn LayerClock>,
    status: SyncStatusHandle,
    block_queue: Arc<BlockQueue>,
    atx_queue: Arc<AtxQueue>,
    /// re-entrance guard: overlapping synchronise invocations are dropped
    sync_lock: tokio::sync::Mutex<()>,
    /// layer currently under consensus validation, one at a time
    validating_layer: tokio::sync::Mutex<Option<LayerId>>,
}

impl Synchroniser {
    pub(crate) fn new(
        core: Arc<SyncCore>,
        clock: Arc<dyn LayerClock>,
        status: SyncStatusHandle,
        block_queue: Arc<BlockQueue>,
        atx_queue: Arc<AtxQueue>,
    ) -> Self {
        Synchroniser {
            core,
            clock,
            status,
            block_queue,
            atx_queue,
            sync_lock: tokio::sync::Mutex::new(()),
            validating_layer: tokio::sync::Mutex::new(None),
        }
    }

    /// We have the data of the previous layer, only the current tick can be
    /// outstanding.
    fn weakly_synced(&self, layer: LayerId) -> bool {
        LayerId(self.core.mesh.latest_layer().0.saturating_add(1)) >= layer
    }

    /// One synchronisation pass. Guarded by a try-lock: a pass started while
    /// another is running returns immediately.
    pub(crate) async fn synchronise(self: Arc<Self>) {
        let _guard = match self.sync_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        lattice_trace!("sync.worker.synchronise", {});
        let current = self.clock.current_layer();

        // node is synced and blocks from the current layer are validated
        if self.core.mesh.processed_layer() == current {
            debug!("node is synced");
            self.status.set_status(GossipStatus::Done);
            return;
        }

        if self.weakly_synced(current) {
            self.handle_weakly_synced().await;
            let epoch = current.epoch(self.core.cfg.layers_per_epoch);
            if let Err(err) = self.sync_epoch_activations(epoch).await {
                if epoch.is_genesis() {
                    info!(
                        "cannot fetch epoch {} atxs (expected during genesis): {}",
                        epoch, err
                    );
                } else {
                    error!("cannot fetch epoch {} atxs: {}", epoch, err);
                }
            }
        } else {
            let from = match self.core.mesh.processed_layer().next() {
                Ok(from) => from,
                Err(err) => {
                    error!("cannot advance past processed layer: {}", err);
                    return;
                }
            };
            self.handle_not_synced(from).await;
        }
    }

    /// All previous layers are local, validate them and open gossip.
    async fn handle_weakly_synced(&self) {
        info!(
            "node is weakly synced (latest_layer: {}, current_layer: {})",
            self.core.mesh.latest_layer(),
            self.clock.current_layer()
        );

        self.handle_layers_till_current().await;

        if self.core.is_shutdown() {
            return;
        }

        if let Err(err) = self.handle_current_layer().await {
            error!("node is out of sync: {}", err);
            self.status.set_status(GossipStatus::Pending);
            return;
        }

        if self.core.is_shutdown() {
            return;
        }

        self.status.set_status(GossipStatus::Done);
        info!("node is synced");
    }

    /// Validates every layer between the processed one and the current tick.
    async fn handle_layers_till_current(&self) {
        let mut layer = match self.core.mesh.processed_layer().next() {
            Ok(layer) => layer,
            Err(_) => return,
        };
        if layer >= self.clock.current_layer() {
            return;
        }
        info!(
            "handle layers {} to {}",
            layer,
            self.clock.current_layer().saturating_prev()
        );
        while layer < self.clock.current_layer() {
            if self.core.is_shutdown() {
                return;
            }
            if let Err(err) = self.get_and_validate_layer(layer).await {
                if layer.epoch(self.core.cfg.layers_per_epoch).is_genesis() {
                    info!(
                        "failed getting layer {} even though weakly synced (expected during genesis): {}",
                        layer, err
                    );
                } else {
                    // a layer below the ticker horizon must be retrievable
                    panic!(
                        "failed getting layer {} even though weakly synced, current layer {}: {}",
                        layer,
                        self.clock.current_layer(),
                        err
                    );
                }
            }
            layer = match layer.next() {
                Ok(layer) => layer,
                Err(_) => return,
            };
        }
    }

    /// Validates the current layer once it is older than `validation_delta`,
    /// recording it as empty when nothing arrived at all.
    async fn handle_current_layer(&self) -> Result<(), SyncError> {
        let current = self.clock.current_layer();
        let latest = self.core.mesh.latest_layer();
        if latest == current
            && LatticeTime::now()?.saturating_sub(self.clock.layer_to_time(latest))
                > self.core.cfg.validation_delta
        {
            if let Err(err) = self.get_and_validate_layer(latest).await {
                if !matches!(err, SyncError::NotFound) {
                    panic!(
                        "failed handling current layer {}, current tick {}: {}",
                        latest, current, err
                    );
                }
                self.core.mesh.set_zero_block_layer(current)?;
            }
        }

        if LayerId(latest.0.saturating_add(1)) == current
            && current.epoch(self.core.cfg.layers_per_epoch).is_genesis()
        {
            if let Err(err) = self.core.mesh.get_layer(latest) {
                if matches!(err, SyncError::NotFound) {
                    self.core.mesh.set_zero_block_layer(latest)?;
                }
            }
        }
        Ok(())
    }

    /// Full catch-up: fetch and validate every missing layer from neighbors,
    /// then listen to gossip over two full ticks before opening up.
    async fn handle_not_synced(&self, from: LayerId) {
        info!("node is out of sync, setting gossip-synced to false and starting sync");
        self.status.set_status(GossipStatus::Pending);

        let mut layer = from;
        // the current layer is re-read on every round, ticks keep coming
        while layer < self.clock.current_layer() {
            info!(
                "syncing layer {} (last ticked layer {})",
                layer,
                self.clock.current_layer()
            );

            if self.core.is_shutdown() {
                return;
            }

            let lyr = match self.get_layer_from_neighbors(layer).await {
                Ok(lyr) => lyr,
                Err(err) => {
                    info!("could not get layer {} from neighbors: {}", layer, err);
                    return;
                }
            };

            if lyr.blocks.is_empty() {
                if let Err(err) = self.core.mesh.set_zero_block_layer(layer) {
                    error!("handle_not_synced failed for layer {}: {}", layer, err);
                    return;
                }
            }

            self.sync_atxs(layer).await;

            let input_vector = self.core.storage.get_input_vector(layer);
            if input_vector.is_none() {
                warn!("validating layer {} without input vector", layer);
            }
            // wait for layer validation
            self.core.mesh.validate_layer(&lyr, input_vector);

            layer = match layer.next() {
                Ok(layer) => layer,
                Err(_) => return,
            };
        }

        // wait two ticks so we listened to gossip for one full layer before
        // opening gossip and validating the current layer
        if let Err(err) = self.gossip_sync_for_one_full_layer(layer).await {
            error!(
                "failed getting layer {} even though we listened to gossip: {}",
                layer, err
            );
        }
    }

    /// At the end of each epoch, pull the epoch's activation set.
    async fn sync_atxs(&self, layer: LayerId) {
        let layers_per_epoch = self.core.cfg.layers_per_epoch;
        let epoch = layer.epoch(layers_per_epoch);
        if epoch.0 == 0 {
            info!("skipping ATX sync in epoch 0");
            return;
        }
        if layer == epoch.last_layer(layers_per_epoch) {
            if let Err(err) = self.sync_epoch_activations(epoch).await {
                if epoch.is_genesis() {
                    info!(
                        "cannot fetch epoch {} atxs (expected during genesis): {}",
                        epoch, err
                    );
                } else {
                    error!("cannot fetch epoch {} atxs: {}", epoch, err);
                }
            }
        }
    }

    /// Waits two tick edges while gossip is buffering, re-syncing the layers
    /// that ticked in between, and opens gossip after the second edge.
    async fn gossip_sync_for_one_full_layer(
        &self,
        current_sync_layer: LayerId,
    ) -> Result<(), SyncError> {
        info!(
            "waiting for two ticks while p2p is open, epoch {}",
            current_sync_layer.epoch(self.core.cfg.layers_per_epoch)
        );
        let mut ticker = self.clock.subscribe();

        let first_ticked = self.wait_layer(&mut ticker).await?;

        self.sync_single_layer(current_sync_layer).await?;
        if let Err(err) = self.get_and_validate_layer(current_sync_layer).await {
            if !matches!(err, SyncError::NotFound) {
                return Err(err);
            }
            self.core.mesh.set_zero_block_layer(current_sync_layer)?;
        }

        self.status.set_status(GossipStatus::InProgressSecondary);

        self.wait_layer(&mut ticker).await?;

        self.sync_single_layer(first_ticked).await?;
        if let Err(err) = self.get_and_validate_layer(first_ticked).await {
            if !matches!(err, SyncError::NotFound) {
                return Err(err);
            }
            self.core.mesh.set_zero_block_layer(first_ticked)?;
        }

        info!("done waiting for ticks and validation, setting gossip true");
        self.status.set_status(GossipStatus::Done);
        Ok(())
    }

    /// Fetches and validates one layer during the gossip-sync window.
    async fn sync_single_layer(&self, layer: LayerId) -> Result<(), SyncError> {
        info!(
            "syncing single layer {} (last ticked layer {})",
            layer,
            self.clock.current_layer()
        );
        if self.core.is_shutdown() {
            return Err(SyncError::Interrupted);
        }
        let lyr = match self.get_layer_from_neighbors(layer).await {
            Ok(lyr) => lyr,
            Err(err) => {
                info!("could not get layer {} from neighbors: {}", layer, err);
                return Err(err);
            }
        };
        if lyr.blocks.is_empty() {
            self.core.mesh.set_zero_block_layer(layer)?;
        }
        self.sync_atxs(layer).await;
        Ok(())
    }

    /// One tick edge, or `Interrupted` on shutdown.
    async fn wait_layer(
        &self,
        ticker: &mut broadcast::Receiver<LayerId>,
    ) -> Result<LayerId, SyncError> {
        let mut shutdown = self.core.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("exit while buffering");
                    return Err(SyncError::Interrupted);
                }
                res = ticker.recv() => match res {
                    Ok(layer) => {
                        debug!("waited one layer");
                        return Ok(layer);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Err(SyncError::Interrupted),
                }
            }
        }
    }

    /// Assembles one layer from the network: hash poll, id lists grouped by
    /// hash, block fetch through the dependency queue, input vector.
    async fn get_layer_from_neighbors(&self, layer: LayerId) -> Result<Layer, SyncError> {
        if self.core.peers.is_empty() {
            return Err(SyncError::NoPeers);
        }

        info!("fetch layer {} hash", layer);
        let hashes = match self.fetch_layer_hashes(layer).await {
            Ok(hashes) => hashes,
            Err(SyncError::NoBlocksInLayer) => return Ok(Layer::new(layer)),
            Err(err) => return Err(err),
        };

        if self.core.is_shutdown() {
            return Err(SyncError::Interrupted);
        }

        info!("fetch layer {} ids", layer);
        let block_ids = self.fetch_layer_block_ids(hashes, layer).await?;

        if self.core.is_shutdown() {
            return Err(SyncError::Interrupted);
        }

        let blocks = self.sync_layer(layer, &block_ids).await?;
        if blocks.is_empty() {
            return Err(SyncError::GeneralSyncError(format!(
                "could not get blocks for layer {}",
                layer
            )));
        }

        if let Ok(input_vector) = self.sync_input_vector(layer).await {
            self.core.storage.save_input_vector(layer, input_vector);
        }

        Ok(Layer::from_blocks(layer, blocks))
    }

    /// Polls every peer for the layer hash and groups the answers.
    ///
    /// All-sentinel answers mean a known-empty layer; no answer at all is an
    /// error so the controller retries the layer on the next tick.
    async fn fetch_layer_hashes(
        &self,
        layer: LayerId,
    ) -> Result<PreHashMap<Hash, Vec<NodeId>>, SyncError> {
        let peers = self.core.peers.get_peers();
        let mut output = spawn_peers_hash_worker(
            self.core.clone(),
            peers,
            SyncRequest::LayerHash(layer),
            |response| match response {
                SyncResponse::LayerHash(hash) => Some(hash),
                _ => None,
            },
        );
        let mut hashes: PreHashMap<Hash, Vec<NodeId>> = PreHashMap::default();
        let mut responses = 0usize;
        while let Some(pair) = output.recv().await {
            responses += 1;
            if pair.hash != Layer::empty_hash() {
                hashes.entry(pair.hash).or_default().push(pair.peer);
            }
        }
        if self.core.is_shutdown() {
            return Err(SyncError::Interrupted);
        }
        if responses == 0 {
            return Err(SyncError::GeneralSyncError(
                "could not get layer hashes from any peer".into(),
            ));
        }
        if hashes.is_empty() {
            info!("layer {} has no blocks", layer);
            return Err(SyncError::NoBlocksInLayer);
        }
        info!("layer {} has blocks", layer);
        Ok(hashes)
    }

    /// Requests the id list behind each reported hash, from the peers that
    /// reported it, cross-checking the hash over the sorted id set.
    async fn fetch_layer_block_ids(
        &self,
        hashes: PreHashMap<Hash, Vec<NodeId>>,
        layer: LayerId,
    ) -> Result<Vec<BlockId>, SyncError> {
        let mut id_set: PreHashSet<BlockId> =
            PreHashSet::with_capacity(self.core.cfg.layer_size);
        let mut ids: Vec<BlockId> = Vec::with_capacity(self.core.cfg.layer_size);
        for (expected_hash, peers) in hashes {
            'next_hash: for peer in peers {
                if self.core.is_shutdown() {
                    return Err(SyncError::Interrupted);
                }
                debug!("send layer ids request to peer {}", peer);
                match self
                    .core
                    .request_peer(peer, SyncRequest::LayerIds(layer))
                    .await
                {
                    Ok(Some(SyncResponse::LayerIds(peer_ids))) => {
                        if Layer::hash_of_ids(&peer_ids) != expected_hash {
                            warn!("layer ids hash from peer {} does not match request", peer);
                            continue;
                        }
                        for id in peer_ids {
                            if id_set.insert(id) {
                                ids.push(id);
                            }
                        }
                        break 'next_hash;
                    }
                    Ok(Some(_)) => {
                        warn!("peer {} answered a layer ids request with the wrong type", peer)
                    }
                    Ok(None) => debug!("peer {} has no ids for layer {}", peer, layer),
                    Err(SyncError::RequestTimeout) => {
                        error!("layer ids request to peer {} timed out", peer)
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        if ids.is_empty() {
            info!("could not get layer ids from any peer");
        }
        Ok(ids)
    }

    /// Schedules the layer's blocks in the dependency queue and waits for the
    /// whole layer to resolve.
    async fn sync_layer(
        &self,
        layer: LayerId,
        block_ids: &[BlockId],
    ) -> Result<Vec<Block>, SyncError> {
        info!(
            "wait for {} blocks of layer {}",
            block_ids.len(),
            layer
        );
        if !self
            .block_queue
            .fetch_block_ids(JobId::Layer(layer), block_ids)
            .await?
        {
            return Err(SyncError::GeneralSyncError(format!(
                "could not get all blocks for layer {}",
                layer
            )));
        }
        info!("sync layer {} done", layer);
        Ok(self.core.mesh.get_layer(layer)?.blocks)
    }

    /// Layer-scoped consensus result: local copy if present, first neighbor
    /// holding one otherwise.
    async fn sync_input_vector(&self, layer: LayerId) -> Result<Vec<BlockId>, SyncError> {
        if let Some(input_vector) = self.core.storage.get_input_vector(layer) {
            return Ok(input_vector);
        }
        match fetch_input_vector_from_peers(&self.core, layer).await? {
            Some(input_vector) => Ok(input_vector),
            None => Err(SyncError::GeneralSyncError(
                "could not find input vector with any neighbor".into(),
            )),
        }
    }

    /// Pulls the activation set of an epoch: hash poll, id lists grouped by
    /// hash, then the activations themselves through the atx queue.
    pub(crate) async fn sync_epoch_activations(&self, epoch: EpochId) -> Result<(), SyncError> {
        info!("syncing atxs of epoch {}", epoch);
        let hashes = self.fetch_epoch_atx_hashes(epoch).await?;
        let atx_ids = self.fetch_epoch_atx_ids(hashes, epoch).await?;
        info!("fetched {} atx ids for epoch {}", atx_ids.len(), epoch);
        self.atx_queue.handle_atxs(&atx_ids).await?;
        Ok(())
    }

    /// Same poll as `fetch_layer_hashes`, for the epoch activation set.
    async fn fetch_epoch_atx_hashes(
        &self,
        epoch: EpochId,
    ) -> Result<PreHashMap<Hash, Vec<NodeId>>, SyncError> {
        let peers = self.core.peers.get_peers();
        if peers.is_empty() {
            return Err(SyncError::NoPeers);
        }
        let mut output = spawn_peers_hash_worker(
            self.core.clone(),
            peers,
            SyncRequest::EpochAtxIdsHash(epoch),
            |response| match response {
                SyncResponse::EpochAtxIdsHash(hash) => Some(hash),
                _ => None,
            },
        );
        let mut hashes: PreHashMap<Hash, Vec<NodeId>> = PreHashMap::default();
        let mut responses = 0usize;
        while let Some(pair) = output.recv().await {
            responses += 1;
            if pair.hash != AtxId::hash_of_ids(&[]) {
                hashes.entry(pair.hash).or_default().push(pair.peer);
            }
        }
        if self.core.is_shutdown() {
            return Err(SyncError::Interrupted);
        }
        if responses == 0 {
            return Err(SyncError::GeneralSyncError(
                "could not get epoch hashes from any peer".into(),
            ));
        }
        if hashes.is_empty() {
            info!("epoch {} has no atxs", epoch);
            return Err(SyncError::NoBlocksInLayer);
        }
        info!("epoch {} has atxs", epoch);
        Ok(hashes)
    }

    /// Requests the activation id list behind each reported hash, with the
    /// same cross-check as layer ids.
    async fn fetch_epoch_atx_ids(
        &self,
        hashes: PreHashMap<Hash, Vec<NodeId>>,
        epoch: EpochId,
    ) -> Result<Vec<AtxId>, SyncError> {
        let mut id_set: PreHashSet<AtxId> = PreHashSet::default();
        let mut ids: Vec<AtxId> = Vec::new();
        for (expected_hash, peers) in hashes {
            'next_hash: for peer in peers {
                if self.core.is_shutdown() {
                    return Err(SyncError::Interrupted);
                }
                debug!("send epoch atx ids request to peer {}", peer);
                match self
                    .core
                    .request_peer(peer, SyncRequest::EpochAtxIds(epoch))
                    .await
                {
                    Ok(Some(SyncResponse::EpochAtxIds(peer_ids))) => {
                        if AtxId::hash_of_ids(&peer_ids) != expected_hash {
                            warn!(
                                "epoch atx ids hash from peer {} does not match request",
                                peer
                            );
                            continue;
                        }
                        for id in peer_ids {
                            if id_set.insert(id) {
                                ids.push(id);
                            }
                        }
                        break 'next_hash;
                    }
                    Ok(Some(_)) => warn!(
                        "peer {} answered an epoch atx ids request with the wrong type",
                        peer
                    ),
                    Ok(None) => debug!("peer {} has no atx ids for epoch {}", peer, epoch),
                    Err(SyncError::RequestTimeout) => {
                        error!("epoch atx ids request to peer {} timed out", peer)
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        if ids.is_empty() {
            info!("could not get atx ids from any peer");
        }
        Ok(ids)
    }

    /// Serialized consensus validation of one locally known layer.
    async fn get_and_validate_layer(&self, layer: LayerId) -> Result<(), SyncError> {
        let mut validating = self.validating_layer.lock().await;
        *validating = Some(layer);
        let result: Result<(), SyncError> = (|| {
            let lyr = self.core.mesh.get_layer(layer)?;
            let input_vector = self.core.storage.get_input_vector(layer);
            info!(
                "validating layer {} ({} blocks, input vector: {})",
                layer,
                lyr.blocks.len(),
                input_vector.is_some()
            );
            // wait for layer validation
            self.core.mesh.validate_layer(&lyr, input_vector);
            Ok(())
        })();
        *validating = None;
        result
    }
}

/// Owns the run loop: fires a synchronisation pass on every sync-interval
/// tick and on every forced-sync command.
pub(crate) struct SyncWorker {
    synchroniser: Arc<Synchroniser>,
    command_rx: mpsc::Receiver<SyncCommand>,
    shutdown: watch::Receiver<bool>,
    sync_interval: LatticeTime,
}

impl SyncWorker {
    pub(crate) fn new(
        synchroniser: Arc<Synchroniser>,
        command_rx: mpsc::Receiver<SyncCommand>,
        shutdown: watch::Receiver<bool>,
        sync_interval: LatticeTime,
    ) -> Self {
        SyncWorker {
            synchroniser,
            command_rx,
            shutdown,
            sync_interval,
        }
    }

    /// Runs until the shutdown signal fires. The first interval tick fires
    /// immediately, so a fresh node starts syncing right away.
    pub(crate) async fn run_loop(mut self) -> Result<(), SyncError> {
        let mut interval = tokio::time::interval(self.sync_interval.to_duration());
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    debug!("sync worker stopped");
                    return Ok(());
                }
                Some(command) = self.command_rx.recv() => {
                    match command {
                        SyncCommand::ForceSync => {
                            lattice_trace!("sync.worker.force_sync", {});
                            let synchroniser = self.synchroniser.clone();
                            tokio::spawn(synchroniser.synchronise());
                        }
                    }
                }
                _ = interval.tick() => {
                    let synchroniser = self.synchroniser.clone();
                    tokio::spawn(synchroniser.synchronise());
                }
            }
        }
    }
}
