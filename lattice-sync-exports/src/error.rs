// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use lattice_models::error::ModelsError;
use thiserror::Error;

/// sync error
#[non_exhaustive]
#[derive(Display, Error, Debug)]
pub enum SyncError {
    /// duplicate transaction id in block
    DuplicateTx,
    /// duplicate activation id in block
    DuplicateAtx,
    /// layer has no blocks
    NoBlocksInLayer,
    /// block does not declare an active set
    NoActiveSet,
    /// block declares an empty active set
    ZeroActiveSet,
    /// invalid activation id
    InvalidAtxId,
    /// peer request timed out
    RequestTimeout,
    /// no peers to sync against
    NoPeers,
    /// interrupted by shutdown
    Interrupted,
    /// not found
    NotFound,
    /// sync err: {0}
    GeneralSyncError(String),
    /// An error occurred during channel communication: {0}
    ChannelError(String),
    /// A tokio task has crashed err: {0}
    TokioTaskJoinError(#[from] tokio::task::JoinError),
    /// models error: {0}
    ModelsError(#[from] ModelsError),
    /// Time error {0}
    TimeError(#[from] lattice_time::TimeError),
}
