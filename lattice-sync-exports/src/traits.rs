// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::error::SyncError;
use lattice_models::activation::ActivationTx;
use lattice_models::block::{Block, BlockId};
use lattice_models::layer::{Layer, LayerId};
use lattice_models::transaction::Transaction;
use lattice_time::LatticeTime;
use tokio::sync::broadcast;

/// Layer bookkeeping and block admission, implemented by the mesh/consensus
/// subsystem. The sync controller is the only writer of layer state and it
/// writes exclusively through this trait.
pub trait Mesh: Send + Sync {
    /// Highest layer for which any block or zero-block marker is known.
    fn latest_layer(&self) -> LayerId;

    /// Highest layer that went through consensus validation.
    fn processed_layer(&self) -> LayerId;

    /// Returns the layer, `SyncError::NotFound` if nothing is recorded for
    /// it. A layer explicitly recorded as empty is returned with no blocks.
    fn get_layer(&self, id: LayerId) -> Result<Layer, SyncError>;

    /// Records that the layer is known to contain no blocks.
    fn set_zero_block_layer(&self, id: LayerId) -> Result<(), SyncError>;

    /// Admits a block with its referenced data. Re-admitting a known block is
    /// not an error.
    fn add_block_with_data(
        &self,
        block: Block,
        txs: Vec<Transaction>,
        atxs: Vec<ActivationTx>,
    ) -> Result<(), SyncError>;

    /// Hands a fetched layer to consensus validation, advancing the processed
    /// layer. Blocks until validation completed.
    fn validate_layer(&self, layer: &Layer, input_vector: Option<Vec<BlockId>>);

    /// Block lookup in the mesh view.
    fn get_block(&self, id: &BlockId) -> Option<Block>;
}

/// Block-eligibility cryptography, implemented outside the sync engine.
pub trait BlockEligibilityValidator: Send + Sync {
    /// Whether the block is signed by a miner eligible for its layer.
    fn block_signed_and_eligible(&self, block: &Block) -> Result<bool, SyncError>;
}

/// The NTP-adjusted wall clock driving layer progression.
pub trait LayerClock: Send + Sync {
    /// Layer of the current wall-clock instant.
    fn current_layer(&self) -> LayerId;

    /// Wall-clock start time of a layer.
    fn layer_to_time(&self, layer: LayerId) -> LatticeTime;

    /// Subscription to layer ticks. Lagging subscribers may miss ticks, they
    /// only ever observe newer layers.
    fn subscribe(&self) -> broadcast::Receiver<LayerId>;
}
