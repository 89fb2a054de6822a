// Copyright (c) 2022 MASSA LABS <info@massa.net>

use lattice_logging::lattice_trace;
use lattice_models::activation::{ActivationTx, AtxId};
use lattice_models::block::{Block, BlockId};
use lattice_models::error::ModelsError;
use lattice_models::layer::{EpochId, LayerId};
use lattice_models::poet::{PoetProof, PoetProofRef};
use lattice_models::prehash::{PreHashMap, PreHashSet};
use lattice_models::transaction::{Transaction, TxId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A storage of blocks, transactions, activations, PoET proofs and layer
/// input vectors, shared by various components.
///
/// Every lookup snapshots under a read lock; mutation locks are held only for
/// the map operation itself. An item present here is "locally known": the
/// item queues consult this storage before going to the network.
#[derive(Clone)]
pub struct Storage {
    layers_per_epoch: u64,
    blocks: Arc<RwLock<PreHashMap<BlockId, Block>>>,
    transactions: Arc<RwLock<PreHashMap<TxId, Transaction>>>,
    activations: Arc<RwLock<PreHashMap<AtxId, ActivationTx>>>,
    activations_by_epoch: Arc<RwLock<HashMap<EpochId, PreHashSet<AtxId>>>>,
    poet_proofs: Arc<RwLock<PreHashMap<PoetProofRef, PoetProof>>>,
    input_vectors: Arc<RwLock<HashMap<LayerId, Vec<BlockId>>>>,
}

impl Storage {
    /// Creates a storage. `layers_per_epoch` drives the per-epoch activation
    /// index.
    pub fn new(layers_per_epoch: u64) -> Self {
        Storage {
            layers_per_epoch,
            blocks: Default::default(),
            transactions: Default::default(),
            activations: Default::default(),
            activations_by_epoch: Default::default(),
            poet_proofs: Default::default(),
            input_vectors: Default::default(),
        }
    }

    /// Store a block. Re-storing a known block is a no-op.
    pub fn store_block(&self, block_id: BlockId, block: Block) {
        lattice_trace!("storage.storage.store_block", { "block_id": block_id });
        self.blocks.write().entry(block_id).or_insert(block);
    }

    /// Get a clone of the potentially stored block.
    pub fn retrieve_block(&self, block_id: &BlockId) -> Option<Block> {
        self.blocks.read().get(block_id).cloned()
    }

    /// Split `block_ids` into those found in storage and those missing.
    pub fn find_blocks(&self, block_ids: &[BlockId]) -> (PreHashMap<BlockId, Block>, Vec<BlockId>) {
        let blocks = self.blocks.read();
        let mut found = PreHashMap::default();
        let mut missing = Vec::new();
        for id in block_ids {
            match blocks.get(id) {
                Some(block) => {
                    found.insert(*id, block.clone());
                }
                None => missing.push(*id),
            }
        }
        (found, missing)
    }

    /// Blocks of a layer, in storage order.
    pub fn blocks_of_layer(&self, layer: LayerId) -> Vec<Block> {
        self.blocks
            .read()
            .values()
            .filter(|b| b.layer == layer)
            .cloned()
            .collect()
    }

    /// Store a transaction. Re-storing a known transaction is a no-op.
    pub fn store_transaction(&self, tx_id: TxId, transaction: Transaction) {
        lattice_trace!("storage.storage.store_transaction", { "tx_id": tx_id });
        self.transactions.write().entry(tx_id).or_insert(transaction);
    }

    /// Get a clone of the potentially stored transaction.
    pub fn retrieve_transaction(&self, tx_id: &TxId) -> Option<Transaction> {
        self.transactions.read().get(tx_id).cloned()
    }

    /// Split `tx_ids` into those found in storage and those missing.
    pub fn find_transactions(&self, tx_ids: &[TxId]) -> (PreHashMap<TxId, Transaction>, Vec<TxId>) {
        let transactions = self.transactions.read();
        let mut found = PreHashMap::default();
        let mut missing = Vec::new();
        for id in tx_ids {
            match transactions.get(id) {
                Some(tx) => {
                    found.insert(*id, tx.clone());
                }
                None => missing.push(*id),
            }
        }
        (found, missing)
    }

    /// Store an activation and index it under its target epoch.
    /// Re-processing a known activation is a no-op.
    pub fn process_activation(&self, atx_id: AtxId, atx: ActivationTx) {
        lattice_trace!("storage.storage.process_activation", { "atx_id": atx_id });
        let epoch = atx.target_epoch(self.layers_per_epoch);
        let mut activations = self.activations.write();
        if activations.contains_key(&atx_id) {
            return;
        }
        activations.insert(atx_id, atx);
        drop(activations);
        self.activations_by_epoch
            .write()
            .entry(epoch)
            .or_default()
            .insert(atx_id);
    }

    /// Get a clone of the potentially stored activation.
    pub fn retrieve_activation(&self, atx_id: &AtxId) -> Option<ActivationTx> {
        self.activations.read().get(atx_id).cloned()
    }

    /// Split `atx_ids` into those found in storage and those missing.
    pub fn find_activations(
        &self,
        atx_ids: &[AtxId],
    ) -> (PreHashMap<AtxId, ActivationTx>, Vec<AtxId>) {
        let activations = self.activations.read();
        let mut found = PreHashMap::default();
        let mut missing = Vec::new();
        for id in atx_ids {
            match activations.get(id) {
                Some(atx) => {
                    found.insert(*id, atx.clone());
                }
                None => missing.push(*id),
            }
        }
        (found, missing)
    }

    /// Ids of the activations eligible in `epoch`.
    pub fn epoch_activations(&self, epoch: EpochId) -> Vec<AtxId> {
        self.activations_by_epoch
            .read()
            .get(&epoch)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether the given PoET proof is stored.
    pub fn has_poet_proof(&self, proof_ref: &PoetProofRef) -> bool {
        self.poet_proofs.read().contains_key(proof_ref)
    }

    /// Recompute the content ref of `proof` and store it under it.
    pub fn validate_and_store_poet(&self, proof: PoetProof) -> Result<PoetProofRef, ModelsError> {
        let proof_ref = proof.compute_ref()?;
        lattice_trace!("storage.storage.validate_and_store_poet", {
            "proof_ref": proof_ref
        });
        self.poet_proofs.write().entry(proof_ref).or_insert(proof);
        Ok(proof_ref)
    }

    /// Get a clone of the potentially stored PoET proof.
    pub fn retrieve_poet_proof(&self, proof_ref: &PoetProofRef) -> Option<PoetProof> {
        self.poet_proofs.read().get(proof_ref).cloned()
    }

    /// Persist the consensus input vector of a layer.
    pub fn save_input_vector(&self, layer: LayerId, ids: Vec<BlockId>) {
        lattice_trace!("storage.storage.save_input_vector", { "layer": layer });
        self.input_vectors.write().insert(layer, ids);
    }

    /// Input vector of a layer, if the consensus recorded one.
    pub fn get_input_vector(&self, layer: LayerId) -> Option<Vec<BlockId>> {
        self.input_vectors.read().get(&layer).cloned()
    }
}
