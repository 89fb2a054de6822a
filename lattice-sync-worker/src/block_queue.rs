// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! The dependency-resolution queue: a DAG scheduler over block view edges.
//!
//! Blocks enter when first referenced, are fetched from peers, fast-validated
//! and recursively scheduled behind their view edges. When all transitive
//! dependencies of a job resolve, its completion callback runs exactly once
//! with the boolean outcome; failure propagates `false` through the whole
//! downstream cone.

use crate::common::{random_job_hash, SyncCore};
use crate::fetch_queue::{AtxQueue, TxQueue};
use crate::validation::{fast_validation, validate_votes};
use crate::workers::fetch_block_from_peers;
use futures::future::BoxFuture;
use lattice_hash::Hash;
use lattice_logging::lattice_trace;
use lattice_models::block::{Block, BlockId};
use lattice_models::layer::LayerId;
use lattice_models::prehash::{PreHashMap, PreHashSet};
use lattice_sync_exports::SyncError;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const BATCH_QUEUE_SIZE: usize = 1000;

/// Discriminates the owners of dependency sets, so completion knows whether
/// the finished job is itself a block that must relax its own waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobId {
    /// a whole layer waiting for its blocks
    Layer(LayerId),
    /// a block waiting for its view edges
    Block(BlockId),
    /// a one-shot job with a randomized identity (single-block fetches, view
    /// checks); never relaxes anything downstream
    Single(Hash),
}

impl JobId {
    /// Key under which the job's dependency set and callback are stored.
    pub(crate) fn key(&self) -> Hash {
        match self {
            // layer ids are tiny integers, domain-separate them from content hashes
            JobId::Layer(layer) => {
                let mut bytes = b"layer-job:".to_vec();
                bytes.extend(layer.0.to_le_bytes());
                Hash::compute_from(&bytes)
            }
            JobId::Block(id) => id.0,
            JobId::Single(hash) => *hash,
        }
    }
}

/// Completion callback of a job; invoked exactly once, outside the queue
/// mutex, with `true` iff every dependency resolved positively.
pub(crate) type DepsCallback =
    Box<dyn FnOnce(bool) -> BoxFuture<'static, Result<(), SyncError>> + Send>;

#[derive(Default)]
struct QueueState {
    /// job key -> outstanding dependency hashes
    dep_map: PreHashMap<Hash, PreHashSet<Hash>>,
    /// dependency hash -> jobs waiting on it
    reverse_dep_map: PreHashMap<Hash, Vec<JobId>>,
    /// job key -> completion callback
    callbacks: PreHashMap<Hash, DepsCallback>,
    /// block hashes currently resident in the queue
    visited: PreHashSet<Hash>,
}

impl QueueState {
    fn in_queue(&self, hash: &Hash) -> bool {
        self.reverse_dep_map.contains_key(hash) || self.visited.contains(hash)
    }

    /// Whether making `parent` wait on `child` would close a cycle, i.e.
    /// whether `parent` is reachable from `child` along dependency edges.
    /// Impossible for honest chains (parents precede children by layer), so
    /// this walk is over a queue that stays small.
    fn creates_cycle(&self, parent: Hash, child: Hash) -> bool {
        let mut frontier = vec![child];
        let mut seen: PreHashSet<Hash> = PreHashSet::default();
        while let Some(hash) = frontier.pop() {
            if hash == parent {
                return true;
            }
            if !seen.insert(hash) {
                continue;
            }
            if let Some(deps) = self.dep_map.get(&hash) {
                frontier.extend(deps.iter().copied());
            }
        }
        false
    }
}

/// The DAG scheduler.
pub(crate) struct BlockQueue {
    core: Arc<SyncCore>,
    tx_queue: Arc<TxQueue>,
    atx_queue: Arc<AtxQueue>,
    state: Mutex<QueueState>,
    batch_tx: mpsc::Sender<Vec<Hash>>,
    // handed to completion callbacks that re-enter the queue
    self_weak: Weak<BlockQueue>,
}

impl BlockQueue {
    /// Creates the queue and spawns its block fetch workers.
    pub(crate) fn new(
        core: Arc<SyncCore>,
        tx_queue: Arc<TxQueue>,
        atx_queue: Arc<AtxQueue>,
    ) -> Arc<Self> {
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE_SIZE);
        let queue = Arc::new_cyclic(|self_weak| BlockQueue {
            core: core.clone(),
            tx_queue,
            atx_queue,
            state: Mutex::new(QueueState::default()),
            batch_tx,
            self_weak: self_weak.clone(),
        });
        queue.clone().spawn_workers(batch_rx);
        queue
    }

    fn spawn_workers(self: Arc<Self>, batch_rx: mpsc::Receiver<Vec<Hash>>) {
        let batch_rx = Arc::new(tokio::sync::Mutex::new(batch_rx));
        for _ in 0..self.core.cfg.concurrency.max(1) {
            let queue = self.clone();
            let batch_rx = batch_rx.clone();
            tokio::spawn(async move {
                let mut shutdown = queue.core.shutdown.clone();
                loop {
                    let mut batch = {
                        let mut rx = batch_rx.lock().await;
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            batch = rx.recv() => match batch {
                                Some(batch) => batch,
                                None => return,
                            }
                        }
                    };
                    let hash = match batch.pop() {
                        Some(hash) => hash,
                        None => continue,
                    };
                    // hand the rest back so sibling workers share the batch;
                    // admitting a block can block this worker on one of them
                    // (ref block in the same batch)
                    if !batch.is_empty() && queue.batch_tx.send(batch).await.is_err() {
                        return;
                    }
                    let block_id = BlockId(hash);
                    match fetch_block_from_peers(&queue.core, block_id).await {
                        Ok(Some(block)) => queue.handle_fetched_block(block_id, block).await,
                        Ok(None) => {
                            warn!("block {} could not be fetched from any peer", block_id);
                            queue.update_dependencies(hash, false).await;
                        }
                        Err(_) => return,
                    }
                }
            });
        }
    }

    /// Registers `children` as dependencies of `job`.
    ///
    /// Children already in flight just gain a reverse edge; children in the
    /// mesh count as satisfied; unknown children gain a reverse edge and go
    /// to the fetch pipeline. When nothing is outstanding the callback runs
    /// right away with `true` and the call returns `Ok(false)` ("no
    /// pending"); otherwise the set and callback are stored and `Ok(true)` is
    /// returned.
    pub(crate) async fn add_dependencies(
        &self,
        job: JobId,
        children: &[BlockId],
        callback: DepsCallback,
    ) -> Result<bool, SyncError> {
        if let JobId::Block(own_id) = &job {
            if children.contains(own_id) {
                return Err(SyncError::GeneralSyncError(format!(
                    "block {} references itself",
                    own_id
                )));
            }
        }
        let job_key = job.key();
        let mut callback = Some(callback);
        enum AddOutcome {
            NoPending,
            Pending(Vec<Hash>),
            Cycle(Hash),
        }
        let outcome = {
            let mut state = self.state.lock();
            // a dependency edge that closes a cycle would deadlock both
            // participants, fail them instead
            let cycle_with = children
                .iter()
                .find(|child| state.in_queue(&child.0) && state.creates_cycle(job_key, child.0))
                .map(|child| child.0);
            match cycle_with {
                Some(cycle_hash) => AddOutcome::Cycle(cycle_hash),
                None => {
                    let mut deps: PreHashSet<Hash> = PreHashSet::default();
                    let mut to_push = Vec::new();
                    for child in children {
                        let child_hash = child.0;
                        if deps.contains(&child_hash) {
                            continue;
                        }
                        if state.in_queue(&child_hash) {
                            lattice_trace!("sync.block_queue.add_pending", { "child": child, "job": format!("{:?}", job) });
                            state
                                .reverse_dep_map
                                .entry(child_hash)
                                .or_default()
                                .push(job);
                            deps.insert(child_hash);
                        } else if self.core.mesh.get_block(child).is_none() {
                            lattice_trace!("sync.block_queue.add_fetch", { "child": child, "job": format!("{:?}", job) });
                            state
                                .reverse_dep_map
                                .entry(child_hash)
                                .or_default()
                                .push(job);
                            deps.insert(child_hash);
                            to_push.push(child_hash);
                        }
                    }
                    if deps.is_empty() {
                        AddOutcome::NoPending
                    } else {
                        // the set and the callback must appear atomically, a
                        // child could resolve right after the lock drops
                        state.dep_map.insert(job_key, deps);
                        state
                            .callbacks
                            .insert(job_key, callback.take().expect("callback consumed twice"));
                        AddOutcome::Pending(to_push)
                    }
                }
            }
        };
        match outcome {
            AddOutcome::Cycle(cycle_hash) => {
                warn!(
                    "dependency cycle between job {:?} and block {}",
                    job, cycle_hash
                );
                self.update_dependencies(cycle_hash, false).await;
                Err(SyncError::GeneralSyncError(format!(
                    "dependency cycle on block {}",
                    cycle_hash
                )))
            }
            AddOutcome::NoPending => {
                // nothing outstanding: complete synchronously
                (callback.take().expect("callback consumed twice"))(true).await?;
                Ok(false)
            }
            AddOutcome::Pending(to_push) => {
                if !to_push.is_empty() {
                    self.batch_tx
                        .send(to_push)
                        .await
                        .map_err(|_| SyncError::ChannelError("block fetch queue closed".into()))?;
                }
                Ok(true)
            }
        }
    }

    /// A block arrived from the fetch pipeline: fast-validate it and schedule
    /// it behind its view edges.
    pub(crate) async fn handle_fetched_block(&self, block_id: BlockId, block: Block) {
        info!("fetched block {}", block_id);
        self.state.lock().visited.insert(block_id.0);
        if let Err(err) = fast_validation(&self.core, &block) {
            warn!("block {} failed fast validation: {}", block_id, err);
            self.update_dependencies(block_id.0, false).await;
            return;
        }
        let view_edges = block.view_edges.clone();
        let callback = self.finish_block_callback(block_id, block);
        match self
            .add_dependencies(JobId::Block(block_id), &view_edges, callback)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("no missing view edges for block {}", block_id);
                self.update_dependencies(block_id.0, true).await;
            }
            Err(err) => {
                warn!("failed to add pending for block {}: {}", block_id, err);
                self.update_dependencies(block_id.0, false).await;
            }
        }
    }

    /// Topological relaxation: `hash` resolved with `valid`. Every job
    /// waiting on it loses that dependency; jobs whose sets empty run their
    /// callbacks (outside the lock), and finished block jobs relax their own
    /// waiters in turn, draining iteratively.
    pub(crate) async fn update_dependencies(&self, hash: Hash, valid: bool) {
        let mut work = vec![(hash, valid)];
        while let Some((hash, valid)) = work.pop() {
            let completed = {
                let mut state = self.state.lock();
                state.dep_map.remove(&hash);
                // a callback stored under this hash is dropped unrun: the job
                // itself failed or completed through another path
                state.callbacks.remove(&hash);
                state.visited.remove(&hash);
                let mut completed = Vec::new();
                if let Some(waiters) = state.reverse_dep_map.remove(&hash) {
                    for job in waiters {
                        let job_key = job.key();
                        let now_empty = match state.dep_map.get_mut(&job_key) {
                            Some(deps) => {
                                deps.remove(&hash);
                                deps.is_empty()
                            }
                            None => false,
                        };
                        if now_empty {
                            state.dep_map.remove(&job_key);
                            let callback = state.callbacks.remove(&job_key);
                            completed.push((job, callback));
                        }
                    }
                }
                completed
            };
            for (job, callback) in completed {
                lattice_trace!("sync.block_queue.job_done", { "job": format!("{:?}", job), "valid": valid });
                let mut downstream_valid = valid;
                if let Some(callback) = callback {
                    if let Err(err) = callback(valid).await {
                        warn!("callback for job {:?} failed: {}", job, err);
                        downstream_valid = false;
                    }
                }
                if let JobId::Block(block_id) = job {
                    work.push((block_id.0, downstream_valid));
                }
            }
        }
    }

    /// Schedules `ids` under `job` and waits for the outcome. `Ok(true)` when
    /// every id resolved (or nothing was missing), `Ok(false)` when any
    /// transitive dependency failed.
    pub(crate) async fn fetch_block_ids(
        &self,
        job: JobId,
        ids: &[BlockId],
    ) -> Result<bool, SyncError> {
        let (done_tx, done_rx) = oneshot::channel();
        let callback: DepsCallback = Box::new(move |res| {
            Box::pin(async move {
                let _ = done_tx.send(res);
                Ok(())
            })
        });
        if !self.add_dependencies(job, ids, callback).await? {
            return Ok(true);
        }
        let mut shutdown = self.core.shutdown.clone();
        tokio::select! {
            _ = shutdown.changed() => Err(SyncError::Interrupted),
            res = done_rx => Ok(res.unwrap_or(false)),
        }
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> (usize, usize, usize, usize) {
        let state = self.state.lock();
        (
            state.dep_map.len(),
            state.reverse_dep_map.len(),
            state.callbacks.len(),
            state.visited.len(),
        )
    }

    /// Builds the completion callback of a fetched block: once its view edges
    /// resolved, check data availability (transactions and the activation
    /// closure), validate its votes, and admit it into the mesh.
    fn finish_block_callback(&self, block_id: BlockId, block: Block) -> DepsCallback {
        let core = self.core.clone();
        let tx_queue = self.tx_queue.clone();
        let atx_queue = self.atx_queue.clone();
        let weak_queue: Weak<BlockQueue> = self.self_weak.clone();
        Box::new(move |res: bool| {
            Box::pin(async move {
                if !res {
                    info!("finished block {}: view invalid", block_id);
                    return Ok(());
                }

                // the epoch active set: inline, or carried by the ref block
                let mut referenced_atxs = vec![block.atx_id];
                match &block.active_set {
                    Some(active_set) if !active_set.is_empty() => {
                        referenced_atxs.extend(active_set.iter().copied())
                    }
                    Some(_) => return Err(SyncError::ZeroActiveSet),
                    None => {
                        let ref_id = block.ref_block.ok_or(SyncError::NoActiveSet)?;
                        if core.mesh.get_block(&ref_id).is_none() {
                            let queue = weak_queue.upgrade().ok_or(SyncError::Interrupted)?;
                            // resolve the ref block through the queue like a
                            // view edge: a ref block that fails to fetch or
                            // validate turns this block negative
                            if !queue
                                .fetch_block_ids(JobId::Single(random_job_hash()), &[ref_id])
                                .await?
                            {
                                return Err(SyncError::GeneralSyncError(format!(
                                    "failed to fetch ref block {}",
                                    ref_id
                                )));
                            }
                        }
                        let ref_block = core.mesh.get_block(&ref_id).ok_or_else(|| {
                            SyncError::GeneralSyncError(format!(
                                "ref block {} was not admitted",
                                ref_id
                            ))
                        })?;
                        match &ref_block.active_set {
                            Some(active_set) if !active_set.is_empty() => {
                                referenced_atxs.extend(active_set.iter().copied())
                            }
                            _ => return Err(SyncError::NoActiveSet),
                        }
                    }
                }
                let atxs = atx_queue.handle_atxs(&referenced_atxs).await?;

                let txs = if block.tx_ids.is_empty() {
                    Vec::new()
                } else {
                    tx_queue.handle_txs(&block.tx_ids).await?
                };

                if !validate_votes(&core, &block) {
                    return Err(SyncError::GeneralSyncError(format!(
                        "validate votes failed for block {}",
                        block_id
                    )));
                }

                core.mesh.add_block_with_data(block, txs, atxs)?;
                info!("block {} admitted to the mesh", block_id);
                Ok(())
            })
        })
    }
}
