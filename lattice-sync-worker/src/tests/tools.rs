// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Test fixtures: a scripted transport standing in for the whole
//! neighborhood, plus mock mesh / clock / eligibility collaborators.

use crate::block_queue::BlockQueue;
use crate::common::SyncCore;
use crate::fetch_queue::{AtxQueue, PoetQueue, TxQueue};
use crate::fetcher::SyncFetcher;
use crate::handlers::RequestHandlers;
use crate::messages::{
    Envelope, EnvelopeDeserializer, EnvelopeSerializer, SyncRequest, SyncResponse,
};
use crate::peers::Peers;
use crate::server::{MessageServer, MessageServerHandle, TransportCommand, TransportEvent};
use crate::worker::Synchroniser;
use lattice_hash::Hash;
use lattice_models::activation::{ActivationTx, AtxId};
use lattice_models::block::{Block, BlockId};
use lattice_models::layer::{EpochId, Layer, LayerId};
use lattice_models::node::NodeId;
use lattice_models::poet::{PoetProof, PoetProofRef};
use lattice_models::prehash::{PreHashMap, PreHashSet};
use lattice_models::transaction::{Transaction, TxId};
use lattice_serialization::{DeserializeError, Deserializer, Serializer};
use lattice_storage::Storage;
use lattice_sync_exports::{
    BlockEligibilityValidator, LayerClock, Mesh, SyncConfig, SyncError, SyncStatusHandle,
    CHANNEL_SIZE,
};
use lattice_time::LatticeTime;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

pub const LAYERS_PER_EPOCH: u64 = 10;

/// A config with short timeouts, suitable for scripted-peer tests.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        layers_per_epoch: LAYERS_PER_EPOCH,
        concurrency: 4,
        layer_size: 50,
        request_timeout: LatticeTime::from_millis(300),
        sync_interval: LatticeTime::from_millis(30_000),
        validation_delta: LatticeTime::from_millis(1),
        atxs_limit: 1024,
        hdist: 5,
        always_listen: false,
        golden_atx_id: AtxId(Hash::compute_from(b"golden")),
    }
}

/// What one scripted peer serves for each request kind.
#[derive(Default, Clone)]
pub struct PeerBehavior {
    /// a silent peer never answers, requests to it time out
    pub silent: bool,
    /// artificial answer delay
    pub response_delay: Option<Duration>,
    pub layer_hashes: HashMap<LayerId, Hash>,
    pub layer_ids: HashMap<LayerId, Vec<BlockId>>,
    pub blocks: PreHashMap<BlockId, Block>,
    pub txs: PreHashMap<TxId, Transaction>,
    pub atxs: PreHashMap<AtxId, ActivationTx>,
    pub poets: PreHashMap<PoetProofRef, PoetProof>,
    pub epoch_hashes: HashMap<EpochId, Hash>,
    pub epoch_ids: HashMap<EpochId, Vec<AtxId>>,
    pub input_vectors: HashMap<LayerId, Vec<BlockId>>,
}

impl PeerBehavior {
    /// Registers a full layer: hash, id list and the blocks themselves.
    pub fn serve_layer(&mut self, layer: LayerId, blocks: &[Block]) {
        let ids: Vec<BlockId> = blocks.iter().map(|b| b.compute_id().unwrap()).collect();
        self.layer_hashes.insert(layer, Layer::hash_of_ids(&ids));
        self.layer_ids.insert(layer, ids.clone());
        for (id, block) in ids.into_iter().zip(blocks.iter().cloned()) {
            self.blocks.insert(id, block);
        }
    }

    /// Registers an activation together with its PoET proof.
    pub fn serve_atx(&mut self, atx: &ActivationTx, proof: &PoetProof) {
        self.atxs.insert(atx.compute_id().unwrap(), atx.clone());
        self.poets.insert(proof.compute_ref().unwrap(), proof.clone());
    }

    fn respond(&self, request: &SyncRequest) -> Option<SyncResponse> {
        match request {
            SyncRequest::Block(id) => self.blocks.get(id).cloned().map(SyncResponse::Block),
            // unscripted layers read as known-empty, like a fully synced
            // network with no traffic
            SyncRequest::LayerHash(layer) => Some(SyncResponse::LayerHash(
                self.layer_hashes
                    .get(layer)
                    .copied()
                    .unwrap_or_else(Layer::empty_hash),
            )),
            SyncRequest::LayerIds(layer) => self
                .layer_ids
                .get(layer)
                .cloned()
                .map(SyncResponse::LayerIds),
            SyncRequest::Txs(ids) => {
                let found: Vec<Transaction> = ids
                    .iter()
                    .filter_map(|id| self.txs.get(id).cloned())
                    .collect();
                if found.is_empty() {
                    None
                } else {
                    Some(SyncResponse::Txs(found))
                }
            }
            SyncRequest::Atxs(ids) => {
                let found: Vec<ActivationTx> = ids
                    .iter()
                    .filter_map(|id| self.atxs.get(id).cloned())
                    .collect();
                if found.is_empty() {
                    None
                } else {
                    Some(SyncResponse::Atxs(found))
                }
            }
            SyncRequest::Poet(proof_ref) => {
                self.poets.get(proof_ref).cloned().map(SyncResponse::Poet)
            }
            SyncRequest::EpochAtxIds(epoch) => Some(SyncResponse::EpochAtxIds(
                self.epoch_ids.get(epoch).cloned().unwrap_or_default(),
            )),
            SyncRequest::EpochAtxIdsHash(epoch) => Some(SyncResponse::EpochAtxIdsHash(
                self.epoch_hashes
                    .get(epoch)
                    .copied()
                    .unwrap_or_else(|| AtxId::hash_of_ids(&[])),
            )),
            SyncRequest::InputVector(layer) => self
                .input_vectors
                .get(layer)
                .cloned()
                .map(SyncResponse::InputVector),
        }
    }
}

/// Scripted neighborhood: answers the controller's outbound requests from
/// per-peer behaviors and logs every request for assertions.
pub struct MockNet {
    pub behaviors: Arc<Mutex<HashMap<NodeId, PeerBehavior>>>,
    pub request_log: Arc<Mutex<Vec<(NodeId, SyncRequest)>>>,
    pub event_tx: mpsc::Sender<TransportEvent>,
}

impl MockNet {
    pub fn spawn(
        command_rx: mpsc::Receiver<TransportCommand>,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        let behaviors: Arc<Mutex<HashMap<NodeId, PeerBehavior>>> = Default::default();
        let request_log: Arc<Mutex<Vec<(NodeId, SyncRequest)>>> = Default::default();
        let net = MockNet {
            behaviors: behaviors.clone(),
            request_log: request_log.clone(),
            event_tx: event_tx.clone(),
        };
        tokio::spawn(run_responder(command_rx, event_tx, behaviors, request_log));
        net
    }

    /// Announces a scripted peer to the controller.
    pub async fn connect_peer(&self, peer: NodeId, behavior: PeerBehavior) {
        self.behaviors.lock().insert(peer, behavior);
        self.event_tx
            .send(TransportEvent::PeerConnected(peer))
            .await
            .expect("transport closed");
    }

    pub async fn disconnect_peer(&self, peer: NodeId) {
        self.event_tx
            .send(TransportEvent::PeerDisconnected(peer))
            .await
            .expect("transport closed");
    }

    /// Number of logged requests matching the filter.
    pub fn count_requests(&self, filter: impl Fn(&SyncRequest) -> bool) -> usize {
        self.request_log
            .lock()
            .iter()
            .filter(|(_, req)| filter(req))
            .count()
    }
}

async fn run_responder(
    mut command_rx: mpsc::Receiver<TransportCommand>,
    event_tx: mpsc::Sender<TransportEvent>,
    behaviors: Arc<Mutex<HashMap<NodeId, PeerBehavior>>>,
    request_log: Arc<Mutex<Vec<(NodeId, SyncRequest)>>>,
) {
    let serializer = EnvelopeSerializer::new();
    let deserializer = EnvelopeDeserializer::new(1024);
    while let Some(TransportCommand::SendData { peer, data }) = command_rx.recv().await {
        let envelope = match deserializer.deserialize::<DeserializeError>(&data) {
            Ok((_, envelope)) => envelope,
            Err(_) => continue,
        };
        let (id, request) = match envelope {
            Envelope::Request { id, request } => (id, request),
            // the controller answering one of "our" requests, nothing to do
            Envelope::Response { .. } => continue,
        };
        request_log.lock().push((peer, request.clone()));
        let (silent, delay, response) = {
            let behaviors = behaviors.lock();
            match behaviors.get(&peer) {
                Some(behavior) => (
                    behavior.silent,
                    behavior.response_delay,
                    behavior.respond(&request),
                ),
                None => (true, None, None),
            }
        };
        if silent {
            continue;
        }
        let mut data = Vec::new();
        serializer
            .serialize(&Envelope::Response { id, response }, &mut data)
            .expect("response serialization failed");
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let _ = event_tx
                .send(TransportEvent::ReceivedData { peer, data })
                .await;
        });
    }
}

#[derive(Default)]
struct MockMeshState {
    layers: HashMap<LayerId, Vec<BlockId>>,
    blocks: PreHashMap<BlockId, Block>,
    latest: LayerId,
    processed: LayerId,
    admitted: Vec<BlockId>,
    validated: Vec<LayerId>,
}

/// Mesh double: records admissions and layer validations in order.
#[derive(Default)]
pub struct MockMesh {
    state: Mutex<MockMeshState>,
}

impl MockMesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Default::default())
    }

    /// Pre-populates a known-empty layer, as bootstrapped nodes have.
    pub fn seed_zero_block_layer(&self, layer: LayerId) {
        let mut state = self.state.lock();
        state.layers.entry(layer).or_default();
        state.latest = state.latest.max(layer);
    }

    pub fn admitted_order(&self) -> Vec<BlockId> {
        self.state.lock().admitted.clone()
    }

    pub fn validated_layers(&self) -> Vec<LayerId> {
        self.state.lock().validated.clone()
    }
}

impl Mesh for MockMesh {
    fn latest_layer(&self) -> LayerId {
        self.state.lock().latest
    }

    fn processed_layer(&self) -> LayerId {
        self.state.lock().processed
    }

    fn get_layer(&self, id: LayerId) -> Result<Layer, SyncError> {
        let state = self.state.lock();
        let ids = state.layers.get(&id).ok_or(SyncError::NotFound)?;
        let blocks = ids
            .iter()
            .filter_map(|block_id| state.blocks.get(block_id).cloned())
            .collect();
        Ok(Layer::from_blocks(id, blocks))
    }

    fn set_zero_block_layer(&self, id: LayerId) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        state.layers.entry(id).or_default();
        state.latest = state.latest.max(id);
        Ok(())
    }

    fn add_block_with_data(
        &self,
        block: Block,
        _txs: Vec<Transaction>,
        _atxs: Vec<ActivationTx>,
    ) -> Result<(), SyncError> {
        let block_id = block.compute_id()?;
        let mut state = self.state.lock();
        if state.blocks.contains_key(&block_id) {
            // duplicate admission is not an error
            return Ok(());
        }
        state.latest = state.latest.max(block.layer);
        state.layers.entry(block.layer).or_default().push(block_id);
        state.blocks.insert(block_id, block);
        state.admitted.push(block_id);
        Ok(())
    }

    fn validate_layer(&self, layer: &Layer, _input_vector: Option<Vec<BlockId>>) {
        let mut state = self.state.lock();
        state.processed = state.processed.max(layer.id);
        state.validated.push(layer.id);
    }

    fn get_block(&self, id: &BlockId) -> Option<Block> {
        self.state.lock().blocks.get(id).cloned()
    }
}

/// Eligibility double: every block passes unless its id was rejected.
#[derive(Default)]
pub struct MockValidator {
    rejected: Mutex<PreHashSet<BlockId>>,
}

impl MockValidator {
    pub fn new() -> Arc<Self> {
        Arc::new(Default::default())
    }

    pub fn reject(&self, block_id: BlockId) {
        self.rejected.lock().insert(block_id);
    }
}

impl BlockEligibilityValidator for MockValidator {
    fn block_signed_and_eligible(&self, block: &Block) -> Result<bool, SyncError> {
        Ok(!self.rejected.lock().contains(&block.compute_id()?))
    }
}

/// Clock double: the current layer moves only when a test ticks it.
pub struct MockClock {
    current: Mutex<LayerId>,
    tick_tx: broadcast::Sender<LayerId>,
}

impl MockClock {
    pub fn new(current: LayerId) -> Arc<Self> {
        let (tick_tx, _) = broadcast::channel(16);
        Arc::new(MockClock {
            current: Mutex::new(current),
            tick_tx,
        })
    }

    /// Advances the clock one layer and publishes the tick.
    pub fn tick(&self) {
        let mut current = self.current.lock();
        *current = LayerId(current.0 + 1);
        let _ = self.tick_tx.send(*current);
    }
}

impl LayerClock for MockClock {
    fn current_layer(&self) -> LayerId {
        *self.current.lock()
    }

    fn layer_to_time(&self, _layer: LayerId) -> LatticeTime {
        // far in the past: the validation delta is always elapsed
        LatticeTime::from_millis(0)
    }

    fn subscribe(&self) -> broadcast::Receiver<LayerId> {
        self.tick_tx.subscribe()
    }
}

/// Everything a scenario needs, wired like `start_sync_controller` but with
/// the internals exposed.
pub struct TestHarness {
    pub net: MockNet,
    pub mesh: Arc<MockMesh>,
    pub validator: Arc<MockValidator>,
    pub clock: Arc<MockClock>,
    pub storage: Storage,
    pub status: SyncStatusHandle,
    pub core: Arc<SyncCore>,
    pub synchroniser: Arc<Synchroniser>,
    pub block_queue: Arc<BlockQueue>,
    pub tx_queue: Arc<TxQueue>,
    pub atx_queue: Arc<AtxQueue>,
    pub fetcher: SyncFetcher,
    pub shutdown_tx: watch::Sender<bool>,
}

pub fn setup(cfg: SyncConfig, current_layer: LayerId) -> TestHarness {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (transport_command_tx, transport_command_rx) = mpsc::channel(CHANNEL_SIZE);
    let (transport_event_tx, transport_event_rx) = mpsc::channel(CHANNEL_SIZE);

    let storage = Storage::new(cfg.layers_per_epoch);
    let mesh = MockMesh::new();
    let validator = MockValidator::new();
    let clock = MockClock::new(current_layer);
    let peers = Peers::new();

    let (server_command_tx, server_command_rx) = mpsc::channel(CHANNEL_SIZE);
    let handlers = RequestHandlers::new(storage.clone(), mesh.clone());
    let server = MessageServer::new(
        peers.clone(),
        handlers,
        cfg.atxs_limit as u32,
        transport_command_tx,
        transport_event_rx,
        server_command_rx,
        shutdown_rx.clone(),
    );
    tokio::spawn(server.run());

    let net = MockNet::spawn(transport_command_rx, transport_event_tx);

    let core = Arc::new(SyncCore {
        cfg: cfg.clone(),
        storage: storage.clone(),
        mesh: mesh.clone(),
        validator: validator.clone(),
        peers,
        server: MessageServerHandle(server_command_tx),
        shutdown: shutdown_rx,
    });

    let tx_queue = TxQueue::new(core.clone());
    let poet_queue = PoetQueue::new(core.clone());
    let atx_queue = AtxQueue::new(core.clone(), poet_queue.clone());
    let block_queue = BlockQueue::new(core.clone(), tx_queue.clone(), atx_queue.clone());

    let status = SyncStatusHandle::new(cfg.always_listen);
    let synchroniser = Arc::new(Synchroniser::new(
        core.clone(),
        clock.clone(),
        status.clone(),
        block_queue.clone(),
        atx_queue.clone(),
    ));

    let fetcher = SyncFetcher::new(
        core.clone(),
        block_queue.clone(),
        tx_queue.clone(),
        atx_queue.clone(),
        poet_queue,
    );

    TestHarness {
        net,
        mesh,
        validator,
        clock,
        storage,
        status,
        core,
        synchroniser,
        block_queue,
        tx_queue,
        atx_queue,
        fetcher,
        shutdown_tx,
    }
}

/// An activation plus the PoET proof it references.
pub fn create_atx_with_poet(seed: &[u8], pub_layer: LayerId) -> (ActivationTx, PoetProof) {
    let proof = PoetProof {
        service_id: Hash::compute_from(seed),
        round: 1,
        proof: seed.to_vec(),
    };
    let atx = ActivationTx {
        node_id: NodeId(Hash::compute_from(seed)),
        pub_layer_id: pub_layer,
        positioning_atx: AtxId(Hash::compute_from(b"golden")),
        prev_atx: AtxId::empty(),
        poet_ref: proof.compute_ref().unwrap(),
        num_units: 1,
    };
    (atx, proof)
}

/// A block with sensible defaults for protocol-level tests.
pub fn create_block(
    seed: &[u8],
    layer: LayerId,
    atx_id: AtxId,
    view_edges: Vec<BlockId>,
) -> Block {
    Block {
        miner_id: NodeId(Hash::compute_from(seed)),
        layer,
        atx_id,
        ref_block: None,
        active_set: Some(vec![atx_id]),
        tx_ids: Vec::new(),
        view_edges,
        for_diff: Vec::new(),
        against_diff: Vec::new(),
        neutral_diff: Vec::new(),
    }
}

/// Polls `condition` until it holds or the timeout elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn peer(seed: &[u8]) -> NodeId {
    NodeId(Hash::compute_from(seed))
}
