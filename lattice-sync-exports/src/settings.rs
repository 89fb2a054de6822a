// Copyright (c) 2022 MASSA LABS <info@massa.net>

use lattice_models::activation::AtxId;
use lattice_time::LatticeTime;
use serde::Deserialize;

/// Size of the bounded channels between the sync components
pub const CHANNEL_SIZE: usize = 256;

/// Sync Configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// epoch boundary arithmetic
    pub layers_per_epoch: u64,
    /// fetch-worker fan-out count (>= 1)
    pub concurrency: usize,
    /// expected blocks per layer, used as a capacity hint
    pub layer_size: usize,
    /// per-peer request ceiling
    pub request_timeout: LatticeTime,
    /// tick period of the self-triggered sync loop
    pub sync_interval: LatticeTime,
    /// minimum elapsed wall time before the current layer may be validated
    /// speculatively
    pub validation_delta: LatticeTime,
    /// max activations honored per block
    pub atxs_limit: usize,
    /// permitted history depth for vote-diff references
    pub hdist: u64,
    /// if true, gossip is never buffered and the admission status is ignored
    pub always_listen: bool,
    /// sentinel for genesis-epoch activation references
    pub golden_atx_id: AtxId,
}
