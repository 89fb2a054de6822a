// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::messages::{SyncRequest, SyncResponse};
use lattice_models::activation::AtxId;
use lattice_storage::Storage;
use lattice_sync_exports::Mesh;
use std::sync::Arc;

/// Serves inbound sync requests from local state, one resolution rule per
/// message type. `None` means the item is unknown here; the requester will
/// try its next peer.
pub(crate) struct RequestHandlers {
    storage: Storage,
    mesh: Arc<dyn Mesh>,
}

impl RequestHandlers {
    pub(crate) fn new(storage: Storage, mesh: Arc<dyn Mesh>) -> Self {
        RequestHandlers { storage, mesh }
    }

    pub(crate) fn handle(&self, request: SyncRequest) -> Option<SyncResponse> {
        match request {
            SyncRequest::Block(block_id) => self
                .mesh
                .get_block(&block_id)
                .or_else(|| self.storage.retrieve_block(&block_id))
                .map(SyncResponse::Block),
            // a layer marked zero-block hashes to the empty-layer sentinel
            SyncRequest::LayerHash(layer) => match self.mesh.get_layer(layer) {
                Ok(layer) => layer.hash().ok().map(SyncResponse::LayerHash),
                Err(_) => None,
            },
            SyncRequest::LayerIds(layer) => match self.mesh.get_layer(layer) {
                Ok(layer) => layer.block_ids().ok().map(SyncResponse::LayerIds),
                Err(_) => None,
            },
            SyncRequest::Txs(ids) => {
                let (found, _missing) = self.storage.find_transactions(&ids);
                if found.is_empty() {
                    return None;
                }
                Some(SyncResponse::Txs(found.into_values().collect()))
            }
            SyncRequest::Atxs(ids) => {
                let (found, _missing) = self.storage.find_activations(&ids);
                if found.is_empty() {
                    return None;
                }
                Some(SyncResponse::Atxs(found.into_values().collect()))
            }
            SyncRequest::Poet(proof_ref) => self
                .storage
                .retrieve_poet_proof(&proof_ref)
                .map(SyncResponse::Poet),
            SyncRequest::EpochAtxIds(epoch) => Some(SyncResponse::EpochAtxIds(
                self.storage.epoch_activations(epoch),
            )),
            SyncRequest::EpochAtxIdsHash(epoch) => Some(SyncResponse::EpochAtxIdsHash(
                AtxId::hash_of_ids(&self.storage.epoch_activations(epoch)),
            )),
            SyncRequest::InputVector(layer) => self
                .storage
                .get_input_vector(layer)
                .map(SyncResponse::InputVector),
        }
    }
}
