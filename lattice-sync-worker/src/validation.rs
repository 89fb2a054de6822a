// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::common::SyncCore;
use lattice_models::activation::AtxId;
use lattice_models::block::Block;
use lattice_models::prehash::PreHashSet;
use lattice_models::transaction::TxId;
use lattice_sync_exports::SyncError;
use tracing::debug;

/// Rejects blocks carrying a repeated transaction or activation id.
pub(crate) fn validate_unique_tx_atx(block: &Block) -> Result<(), SyncError> {
    let mut seen_txs: PreHashSet<TxId> = PreHashSet::default();
    for tx in &block.tx_ids {
        if !seen_txs.insert(*tx) {
            return Err(SyncError::DuplicateTx);
        }
    }
    if let Some(active_set) = &block.active_set {
        let mut seen_atxs: PreHashSet<AtxId> = PreHashSet::default();
        for atx in active_set {
            if !seen_atxs.insert(*atx) {
                return Err(SyncError::DuplicateAtx);
            }
        }
    }
    Ok(())
}

/// Cheap structural screening of a fetched block: miner eligibility, sane
/// activation reference, no duplicate ids, no declared-but-empty active set.
/// Runs before any dependency of the block is fetched.
pub(crate) fn fast_validation(core: &SyncCore, block: &Block) -> Result<(), SyncError> {
    if block.atx_id == AtxId::empty() || block.atx_id == core.cfg.golden_atx_id {
        return Err(SyncError::InvalidAtxId);
    }
    if matches!(&block.active_set, Some(set) if set.is_empty()) {
        return Err(SyncError::ZeroActiveSet);
    }
    match core.validator.block_signed_and_eligible(block) {
        Ok(true) => {}
        Ok(false) => {
            return Err(SyncError::GeneralSyncError(
                "block eligibility check failed".into(),
            ))
        }
        Err(err) => {
            return Err(SyncError::GeneralSyncError(format!(
                "block eligibility check failed: {}",
                err
            )))
        }
    }
    validate_unique_tx_atx(block)
}

/// Vote validation: every block referenced by the for/against/neutral diffs
/// must exist in the mesh and lie within `hdist` layers of the voting block.
pub(crate) fn validate_votes(core: &SyncCore, block: &Block) -> bool {
    for id in block.combine_diffs() {
        let referenced = match core.mesh.get_block(&id) {
            Some(referenced) => referenced,
            None => {
                debug!("vote reference {} is not in the mesh", id);
                return false;
            }
        };
        if block.layer.saturating_distance(referenced.layer) > core.cfg.hdist {
            debug!(
                "vote reference {} is {} layers back, over the permitted {}",
                id,
                block.layer.saturating_distance(referenced.layer),
                core.cfg.hdist
            );
            return false;
        }
    }
    true
}
