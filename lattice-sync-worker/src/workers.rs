// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Peer fan-out primitives.
//!
//! Two shapes, matching the two ways the controller talks to the network:
//! the peers worker queries every live peer for the same key and streams the
//! answers; the neighborhood helpers walk a shuffled peer snapshot and accept
//! the first answer whose content hashes to the requested identifier.

use crate::common::SyncCore;
use crate::messages::{SyncRequest, SyncResponse};
use lattice_hash::Hash;
use lattice_models::block::{Block, BlockId};
use lattice_models::layer::LayerId;
use lattice_models::node::NodeId;
use lattice_models::poet::{PoetProof, PoetProofRef};
use lattice_models::prehash::{PreHashMap, PreHashSet};
use lattice_sync_exports::{SyncError, CHANNEL_SIZE};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One peer's answer to a hash query.
pub(crate) struct PeerHashPair {
    pub peer: NodeId,
    pub hash: Hash,
}

/// Queries every peer of the snapshot concurrently for the same key and
/// streams the `(peer, hash)` answers. The channel closes when all peers
/// answered or timed out.
pub(crate) fn spawn_peers_hash_worker(
    core: Arc<SyncCore>,
    peers: Vec<NodeId>,
    request: SyncRequest,
    extract: fn(SyncResponse) -> Option<Hash>,
) -> mpsc::Receiver<PeerHashPair> {
    let (output_tx, output_rx) = mpsc::channel(CHANNEL_SIZE);
    tokio::spawn(async move {
        let mut queries = futures::stream::FuturesUnordered::new();
        for peer in peers {
            let core = core.clone();
            let request = request.clone();
            queries.push(async move {
                let res = core.request_peer(peer, request).await;
                (peer, res)
            });
        }
        use futures::StreamExt;
        while let Some((peer, res)) = queries.next().await {
            match res {
                Ok(Some(response)) => {
                    if let Some(hash) = extract(response) {
                        if output_tx.send(PeerHashPair { peer, hash }).await.is_err() {
                            return;
                        }
                    } else {
                        warn!("peer {} answered a hash query with the wrong type", peer);
                    }
                }
                Ok(None) => debug!("peer {} does not know the requested hash", peer),
                Err(SyncError::RequestTimeout) => {
                    warn!("hash request to peer {} timed out", peer)
                }
                Err(_) => return,
            }
        }
    });
    output_rx
}

/// Fetches one block from the neighborhood: walks the shuffled peer snapshot
/// and accepts the first response whose content hashes to `block_id`.
///
/// `Ok(None)` means no peer could provide a valid copy in time.
pub(crate) async fn fetch_block_from_peers(
    core: &SyncCore,
    block_id: BlockId,
) -> Result<Option<Block>, SyncError> {
    for peer in core.shuffled_peers() {
        match core.request_peer(peer, SyncRequest::Block(block_id)).await {
            Ok(Some(SyncResponse::Block(block))) => {
                let computed = block.compute_id()?;
                if computed != block_id {
                    warn!(
                        "peer {} sent block hashing to {} instead of {}",
                        peer, computed, block_id
                    );
                    continue;
                }
                return Ok(Some(block));
            }
            Ok(Some(_)) => warn!("peer {} answered a block request with the wrong type", peer),
            Ok(None) => debug!("peer {} does not hold block {}", peer, block_id),
            Err(SyncError::RequestTimeout) => {
                warn!("block request to peer {} timed out", peer)
            }
            Err(err) => return Err(err),
        }
    }
    Ok(None)
}

/// Fetches one PoET proof from the neighborhood, hash-checked like blocks.
pub(crate) async fn fetch_poet_from_peers(
    core: &SyncCore,
    proof_ref: PoetProofRef,
) -> Result<Option<PoetProof>, SyncError> {
    for peer in core.shuffled_peers() {
        match core.request_peer(peer, SyncRequest::Poet(proof_ref)).await {
            Ok(Some(SyncResponse::Poet(proof))) => {
                let computed = proof.compute_ref()?;
                if computed != proof_ref {
                    warn!(
                        "peer {} sent PoET proof hashing to {} instead of {}",
                        peer, computed, proof_ref
                    );
                    continue;
                }
                return Ok(Some(proof));
            }
            Ok(Some(_)) => warn!("peer {} answered a PoET request with the wrong type", peer),
            Ok(None) => debug!("peer {} does not hold PoET proof {}", peer, proof_ref),
            Err(SyncError::RequestTimeout) => {
                warn!("PoET request to peer {} timed out", peer)
            }
            Err(err) => return Err(err),
        }
    }
    Ok(None)
}

/// Fetches a batch of content-addressed items from the neighborhood.
///
/// Walks the shuffled peer snapshot asking each for the ids still missing,
/// keeps every returned item whose recomputed hash is one of them, and stops
/// once the batch is complete or the peers are exhausted. Items a peer sends
/// with a hash we never asked for are dropped with a warning.
pub(crate) async fn fetch_items_from_peers<T>(
    core: &SyncCore,
    ids: Vec<Hash>,
    make_request: fn(Vec<Hash>) -> SyncRequest,
    extract: fn(SyncResponse) -> Option<Vec<T>>,
    compute_hash: fn(&T) -> Result<Hash, lattice_models::error::ModelsError>,
) -> Result<PreHashMap<Hash, T>, SyncError> {
    let mut found: PreHashMap<Hash, T> = PreHashMap::default();
    let mut missing: PreHashSet<Hash> = ids.into_iter().collect();
    for peer in core.shuffled_peers() {
        if missing.is_empty() {
            break;
        }
        let request = make_request(missing.iter().copied().collect());
        match core.request_peer(peer, request).await {
            Ok(Some(response)) => {
                let items = match extract(response) {
                    Some(items) => items,
                    None => {
                        warn!("peer {} answered a batch request with the wrong type", peer);
                        continue;
                    }
                };
                for item in items {
                    let hash = compute_hash(&item)?;
                    if missing.remove(&hash) {
                        found.insert(hash, item);
                    } else {
                        warn!("peer {} sent an item with unrequested hash {}", peer, hash);
                    }
                }
            }
            Ok(None) => debug!("peer {} held none of the requested items", peer),
            Err(SyncError::RequestTimeout) => {
                warn!("batch request to peer {} timed out", peer)
            }
            Err(err) => return Err(err),
        }
    }
    Ok(found)
}

/// Fetches a layer's consensus input vector from the first neighbor holding
/// one. The vector is not content-addressed, so the first well-typed answer
/// wins.
pub(crate) async fn fetch_input_vector_from_peers(
    core: &SyncCore,
    layer: LayerId,
) -> Result<Option<Vec<BlockId>>, SyncError> {
    for peer in core.shuffled_peers() {
        match core.request_peer(peer, SyncRequest::InputVector(layer)).await {
            Ok(Some(SyncResponse::InputVector(ids))) => return Ok(Some(ids)),
            Ok(Some(_)) => warn!(
                "peer {} answered an input-vector request with the wrong type",
                peer
            ),
            Ok(None) => debug!("peer {} has no input vector for layer {}", peer, layer),
            Err(SyncError::RequestTimeout) => {
                warn!("input vector request to peer {} timed out", peer)
            }
            Err(err) => return Err(err),
        }
    }
    Ok(None)
}
