// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::block_queue::{BlockQueue, JobId};
use crate::common::{random_job_hash, SyncCore};
use crate::fetch_queue::{AtxQueue, PoetQueue, TxQueue};
use crate::validation::fast_validation;
use lattice_models::activation::{ActivationTx, AtxId};
use lattice_models::block::{Block, BlockId};
use lattice_models::poet::PoetProofRef;
use lattice_models::transaction::{Transaction, TxId};
use lattice_sync_exports::SyncError;
use std::sync::Arc;
use tracing::info;

/// On-demand fetch surface of the sync engine, used by the gossip admission
/// paths: resolve content-addressed items against the local stores and the
/// network, reusing the coalescing queues of the background sync.
#[derive(Clone)]
pub struct SyncFetcher {
    core: Arc<SyncCore>,
    block_queue: Arc<BlockQueue>,
    tx_queue: Arc<TxQueue>,
    atx_queue: Arc<AtxQueue>,
    poet_queue: Arc<PoetQueue>,
}

impl SyncFetcher {
    pub(crate) fn new(
        core: Arc<SyncCore>,
        block_queue: Arc<BlockQueue>,
        tx_queue: Arc<TxQueue>,
        atx_queue: Arc<AtxQueue>,
        poet_queue: Arc<PoetQueue>,
    ) -> Self {
        SyncFetcher {
            core,
            block_queue,
            tx_queue,
            atx_queue,
            poet_queue,
        }
    }

    /// Fetches a list of blocks and their transitive dependencies from peers.
    pub async fn get_blocks(&self, block_ids: Vec<BlockId>) -> Result<(), SyncError> {
        if self
            .block_queue
            .fetch_block_ids(JobId::Single(random_job_hash()), &block_ids)
            .await?
        {
            Ok(())
        } else {
            Err(SyncError::GeneralSyncError(
                "could not fetch all requested blocks".into(),
            ))
        }
    }

    /// Fetches a single block and its transitive dependencies from peers.
    pub async fn fetch_block(&self, block_id: BlockId) -> Result<(), SyncError> {
        self.get_blocks(vec![block_id]).await
    }

    /// Fetches transactions from peers if missing locally.
    pub async fn get_txs(&self, tx_ids: &[TxId]) -> Result<(), SyncError> {
        self.tx_queue.handle_txs(tx_ids).await.map(|_| ())
    }

    /// Fetches activations from peers if missing locally.
    pub async fn get_atxs(&self, atx_ids: &[AtxId]) -> Result<(), SyncError> {
        self.atx_queue.handle_atxs(atx_ids).await.map(|_| ())
    }

    /// Fetches a single activation.
    pub async fn fetch_atx(&self, atx_id: AtxId) -> Result<ActivationTx, SyncError> {
        self.atx_queue
            .handle_atxs(&[atx_id])
            .await?
            .pop()
            .ok_or(SyncError::NotFound)
    }

    /// Fetches the positioning and previous activations referenced by `atx`,
    /// skipping the golden and empty sentinels.
    pub async fn fetch_atx_references(&self, atx: &ActivationTx) -> Result<(), SyncError> {
        if atx.positioning_atx != self.core.cfg.golden_atx_id {
            info!("fetching positioning atx {}", atx.positioning_atx);
            self.fetch_atx(atx.positioning_atx).await?;
        }
        if atx.prev_atx != AtxId::empty() {
            info!("fetching prev atx {}", atx.prev_atx);
            self.fetch_atx(atx.prev_atx).await?;
        }
        Ok(())
    }

    /// Makes sure a PoET proof is locally available, fetching it if needed.
    pub async fn fetch_poet_proof(&self, proof_ref: PoetProofRef) -> Result<(), SyncError> {
        self.poet_queue.fetch_poet_proof(proof_ref).await
    }

    /// Full syntactic validation of a gossiped block: activation-reference
    /// sanity, referenced-data fetch, fast validation, data availability and
    /// view validation. Returns the block's transactions and activations on
    /// success.
    pub async fn block_syntactic_validation(
        &self,
        block: Block,
    ) -> Result<(Vec<Transaction>, Vec<ActivationTx>), SyncError> {
        // a block whose activation reference is the empty or golden sentinel
        // is syntactically invalid: reject before any fetch, the referenced
        // data is attacker-chosen
        if block.atx_id == AtxId::empty() || block.atx_id == self.core.cfg.golden_atx_id {
            return Err(SyncError::InvalidAtxId);
        }

        let block_id = block.compute_id()?;

        // referenced data: ref block and the activation closure
        let mut referenced_atxs = vec![block.atx_id];
        match &block.active_set {
            Some(active_set) if !active_set.is_empty() => {
                referenced_atxs.extend(active_set.iter().copied())
            }
            Some(_) => return Err(SyncError::ZeroActiveSet),
            None => {
                let ref_id = block.ref_block.ok_or(SyncError::NoActiveSet)?;
                if self.core.mesh.get_block(&ref_id).is_none() {
                    info!("fetching ref block {}", ref_id);
                    self.fetch_block(ref_id).await.map_err(|err| {
                        SyncError::GeneralSyncError(format!(
                            "failed to fetch ref block {}: {}",
                            ref_id, err
                        ))
                    })?;
                }
                let ref_block = self.core.mesh.get_block(&ref_id).ok_or_else(|| {
                    SyncError::GeneralSyncError(format!("ref block {} was not admitted", ref_id))
                })?;
                match &ref_block.active_set {
                    Some(active_set) if !active_set.is_empty() => {
                        referenced_atxs.extend(active_set.iter().copied())
                    }
                    _ => return Err(SyncError::NoActiveSet),
                }
            }
        }
        let atxs = self.atx_queue.handle_atxs(&referenced_atxs).await?;

        fast_validation(&self.core, &block)?;

        // data availability
        let txs = if block.tx_ids.is_empty() {
            Vec::new()
        } else {
            self.tx_queue.handle_txs(&block.tx_ids).await?
        };

        if !self.validate_block_view(&block).await? {
            return Err(SyncError::GeneralSyncError(format!(
                "block {} not syntactically valid",
                block_id
            )));
        }

        Ok((txs, atxs))
    }

    /// Resolves every vote-diff reference of the block through the dependency
    /// queue and reports whether the whole view closed positively.
    async fn validate_block_view(&self, block: &Block) -> Result<bool, SyncError> {
        let diffs = block.combine_diffs();
        self.block_queue
            .fetch_block_ids(JobId::Single(random_job_hash()), &diffs)
            .await
    }
}
