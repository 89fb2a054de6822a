// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Deduplicated, batched fetch pipelines for transactions, activations and
//! PoET proofs.
//!
//! Each queue consults the local storage first, coalesces concurrent
//! requests for the same id onto a single network fetch, and completes every
//! waiter with the shared outcome. Structurally invalid answers complete
//! negatively and are not re-enqueued.

use crate::common::SyncCore;
use crate::messages::{SyncRequest, SyncResponse};
use crate::workers::{fetch_items_from_peers, fetch_poet_from_peers};
use lattice_hash::Hash;
use lattice_logging::lattice_trace;
use lattice_models::activation::{ActivationTx, AtxId};
use lattice_models::poet::PoetProofRef;
use lattice_models::prehash::PreHashMap;
use lattice_models::transaction::{Transaction, TxId};
use lattice_sync_exports::SyncError;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const BATCH_QUEUE_SIZE: usize = 1000;

/// The coalescing heart shared by the item queues: a pending map from id to
/// its waiters, plus the batch channel feeding the fetch workers.
///
/// For any id, at most one network request is in flight: the first waiter
/// puts the id into a batch, later waiters just attach to the pending entry.
pub(crate) struct PendingQueue {
    name: &'static str,
    pending: Mutex<PreHashMap<Hash, Vec<oneshot::Sender<bool>>>>,
    batch_tx: mpsc::Sender<Vec<Hash>>,
}

impl PendingQueue {
    pub(crate) fn new(name: &'static str, batch_tx: mpsc::Sender<Vec<Hash>>) -> Self {
        PendingQueue {
            name,
            pending: Mutex::new(PreHashMap::default()),
            batch_tx,
        }
    }

    /// Registers a waiter for each id. Returns the receivers plus the subset
    /// of ids that were not pending yet and must be enqueued for fetch.
    pub(crate) fn register(&self, ids: &[Hash]) -> (Vec<oneshot::Receiver<bool>>, Vec<Hash>) {
        let mut pending = self.pending.lock();
        let mut receivers = Vec::with_capacity(ids.len());
        let mut to_push = Vec::new();
        for id in ids {
            let (tx, rx) = oneshot::channel();
            receivers.push(rx);
            match pending.get_mut(id) {
                Some(waiters) => waiters.push(tx),
                None => {
                    pending.insert(*id, vec![tx]);
                    to_push.push(*id);
                }
            }
        }
        (receivers, to_push)
    }

    /// Puts a batch of ids into the fetch pipeline.
    pub(crate) async fn enqueue(&self, ids: Vec<Hash>) -> Result<(), SyncError> {
        if ids.is_empty() {
            return Ok(());
        }
        lattice_trace!("sync.fetch_queue.enqueue", { "queue": self.name, "count": ids.len() });
        self.batch_tx
            .send(ids)
            .await
            .map_err(|_| SyncError::ChannelError(format!("{} fetch queue closed", self.name)))
    }

    /// Completes every waiter registered for `id` with the same outcome.
    pub(crate) fn complete(&self, id: Hash, ok: bool) {
        let waiters = self.pending.lock().remove(&id);
        if let Some(waiters) = waiters {
            for waiter in waiters {
                let _ = waiter.send(ok);
            }
        }
    }
}

/// Waits for a registered outcome, honoring the shutdown signal.
async fn await_outcome(
    core: &SyncCore,
    rx: oneshot::Receiver<bool>,
) -> Result<bool, SyncError> {
    let mut shutdown = core.shutdown.clone();
    tokio::select! {
        _ = shutdown.changed() => Err(SyncError::Interrupted),
        res = rx => Ok(res.unwrap_or(false)),
    }
}

/// Hands batches from the shared channel to `concurrency` sibling tasks.
fn spawn_batch_workers<F, Fut>(core: Arc<SyncCore>, batch_rx: mpsc::Receiver<Vec<Hash>>, work: F)
where
    F: Fn(Arc<SyncCore>, Vec<Hash>) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let batch_rx = Arc::new(tokio::sync::Mutex::new(batch_rx));
    for _ in 0..core.cfg.concurrency.max(1) {
        let core = core.clone();
        let batch_rx = batch_rx.clone();
        let work = work.clone();
        tokio::spawn(async move {
            let mut shutdown = core.shutdown.clone();
            loop {
                let batch = {
                    let mut rx = batch_rx.lock().await;
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        batch = rx.recv() => match batch {
                            Some(batch) => batch,
                            None => return,
                        }
                    }
                };
                work(core.clone(), batch).await;
            }
        });
    }
}

/// Transaction fetch queue.
pub(crate) struct TxQueue {
    core: Arc<SyncCore>,
    pending: PendingQueue,
}

impl TxQueue {
    /// Creates the queue and spawns its fetch workers.
    pub(crate) fn new(core: Arc<SyncCore>) -> Arc<Self> {
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE_SIZE);
        let queue = Arc::new(TxQueue {
            core: core.clone(),
            pending: PendingQueue::new("tx", batch_tx),
        });
        let worker_queue = queue.clone();
        spawn_batch_workers(core, batch_rx, move |core, batch| {
            let queue = worker_queue.clone();
            async move { queue.process_batch(core, batch).await }
        });
        queue
    }

    async fn process_batch(&self, core: Arc<SyncCore>, batch: Vec<Hash>) {
        let found = match fetch_items_from_peers(
            &core,
            batch.clone(),
            |ids| SyncRequest::Txs(ids.into_iter().map(TxId).collect()),
            |response| match response {
                SyncResponse::Txs(txs) => Some(txs),
                _ => None,
            },
            |tx: &Transaction| tx.compute_id().map(|id| id.0),
        )
        .await
        {
            Ok(found) => found,
            Err(err) => {
                debug!("tx batch fetch aborted: {}", err);
                for id in batch {
                    self.pending.complete(id, false);
                }
                return;
            }
        };
        for id in batch {
            match found.get(&id) {
                Some(tx) => {
                    core.storage.store_transaction(TxId(id), tx.clone());
                    self.pending.complete(id, true);
                }
                None => {
                    warn!("transaction {} could not be fetched from any peer", id);
                    self.pending.complete(id, false);
                }
            }
        }
    }

    /// Resolves the given transactions, fetching the locally missing ones.
    pub(crate) async fn handle_txs(&self, ids: &[TxId]) -> Result<Vec<Transaction>, SyncError> {
        let (_found, missing) = self.core.storage.find_transactions(ids);
        if !missing.is_empty() {
            let hashes: Vec<Hash> = missing.iter().map(|id| id.0).collect();
            let (receivers, to_push) = self.pending.register(&hashes);
            self.pending.enqueue(to_push).await?;
            for rx in receivers {
                if !await_outcome(&self.core, rx).await? {
                    return Err(SyncError::GeneralSyncError(
                        "could not fetch all block transactions".into(),
                    ));
                }
            }
        }
        ids.iter()
            .map(|id| {
                self.core
                    .storage
                    .retrieve_transaction(id)
                    .ok_or(SyncError::NotFound)
            })
            .collect()
    }
}

/// PoET proof fetch queue.
pub(crate) struct PoetQueue {
    core: Arc<SyncCore>,
    pending: PendingQueue,
}

impl PoetQueue {
    /// Creates the queue and spawns its fetch workers.
    pub(crate) fn new(core: Arc<SyncCore>) -> Arc<Self> {
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE_SIZE);
        let queue = Arc::new(PoetQueue {
            core: core.clone(),
            pending: PendingQueue::new("poet", batch_tx),
        });
        let worker_queue = queue.clone();
        spawn_batch_workers(core, batch_rx, move |core, batch| {
            let queue = worker_queue.clone();
            async move { queue.process_batch(core, batch).await }
        });
        queue
    }

    async fn process_batch(&self, core: Arc<SyncCore>, batch: Vec<Hash>) {
        for id in batch {
            let proof_ref = PoetProofRef(id);
            match fetch_poet_from_peers(&core, proof_ref).await {
                Ok(Some(proof)) => match core.storage.validate_and_store_poet(proof) {
                    Ok(_) => self.pending.complete(id, true),
                    Err(err) => {
                        warn!("PoET proof {} failed validation: {}", proof_ref, err);
                        self.pending.complete(id, false);
                    }
                },
                Ok(None) => {
                    warn!("PoET proof {} not found with any neighbor", proof_ref);
                    self.pending.complete(id, false);
                }
                Err(err) => {
                    debug!("PoET fetch aborted: {}", err);
                    self.pending.complete(id, false);
                }
            }
        }
    }

    /// Makes sure the given proof is locally available.
    pub(crate) async fn fetch_poet_proof(&self, proof_ref: PoetProofRef) -> Result<(), SyncError> {
        if self.core.storage.has_poet_proof(&proof_ref) {
            return Ok(());
        }
        let (receivers, to_push) = self.pending.register(&[proof_ref.0]);
        self.pending.enqueue(to_push).await?;
        for rx in receivers {
            if !await_outcome(&self.core, rx).await? {
                return Err(SyncError::GeneralSyncError(
                    "could not find PoET proof with any neighbor".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Activation fetch queue. A fetched activation is admitted only once its
/// PoET proof is locally available.
pub(crate) struct AtxQueue {
    core: Arc<SyncCore>,
    pending: PendingQueue,
    poet_queue: Arc<PoetQueue>,
}

impl AtxQueue {
    /// Creates the queue and spawns its fetch workers.
    pub(crate) fn new(core: Arc<SyncCore>, poet_queue: Arc<PoetQueue>) -> Arc<Self> {
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE_SIZE);
        let queue = Arc::new(AtxQueue {
            core: core.clone(),
            pending: PendingQueue::new("atx", batch_tx),
            poet_queue,
        });
        let worker_queue = queue.clone();
        spawn_batch_workers(core, batch_rx, move |core, batch| {
            let queue = worker_queue.clone();
            async move { queue.process_batch(core, batch).await }
        });
        queue
    }

    async fn process_batch(&self, core: Arc<SyncCore>, batch: Vec<Hash>) {
        let found = match fetch_items_from_peers(
            &core,
            batch.clone(),
            |ids| SyncRequest::Atxs(ids.into_iter().map(AtxId).collect()),
            |response| match response {
                SyncResponse::Atxs(atxs) => Some(atxs),
                _ => None,
            },
            |atx: &ActivationTx| atx.compute_id().map(|id| id.0),
        )
        .await
        {
            Ok(found) => found,
            Err(err) => {
                debug!("atx batch fetch aborted: {}", err);
                for id in batch {
                    self.pending.complete(id, false);
                }
                return;
            }
        };
        for id in batch {
            match found.get(&id) {
                Some(atx) => {
                    self.pending.complete(id, self.admit(&core, id, atx).await);
                }
                None => {
                    warn!("activation {} could not be fetched from any peer", id);
                    self.pending.complete(id, false);
                }
            }
        }
    }

    async fn admit(&self, core: &SyncCore, id: Hash, atx: &ActivationTx) -> bool {
        if let Err(err) = self.poet_queue.fetch_poet_proof(atx.poet_ref).await {
            warn!(
                "dropping activation {}: PoET proof {} unavailable: {}",
                id, atx.poet_ref, err
            );
            return false;
        }
        core.storage.process_activation(AtxId(id), atx.clone());
        true
    }

    /// Resolves the given activations, fetching the locally missing ones.
    pub(crate) async fn handle_atxs(&self, ids: &[AtxId]) -> Result<Vec<ActivationTx>, SyncError> {
        let (_found, missing) = self.core.storage.find_activations(ids);
        if !missing.is_empty() {
            let hashes: Vec<Hash> = missing.iter().map(|id| id.0).collect();
            let (receivers, to_push) = self.pending.register(&hashes);
            self.pending.enqueue(to_push).await?;
            for rx in receivers {
                if !await_outcome(&self.core, rx).await? {
                    return Err(SyncError::GeneralSyncError(
                        "could not fetch all referenced activations".into(),
                    ));
                }
            }
        }
        ids.iter()
            .map(|id| {
                self.core
                    .storage
                    .retrieve_activation(id)
                    .ok_or(SyncError::NotFound)
            })
            .collect()
    }
}
