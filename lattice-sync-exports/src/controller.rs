// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::error::SyncError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// Commands that the sync worker can process
#[derive(Debug)]
pub enum SyncCommand {
    /// Run a synchronisation pass now instead of waiting for the next tick.
    ForceSync,
}

/// Channel-backed handle used to send commands to the sync worker.
#[derive(Clone)]
pub struct SyncCommandSender(pub mpsc::Sender<SyncCommand>);

impl SyncCommandSender {
    /// Signals the worker to run the synchronise flow.
    pub async fn force_sync(&self) -> Result<(), SyncError> {
        self.0
            .send(SyncCommand::ForceSync)
            .await
            .map_err(|_| SyncError::ChannelError("could not send ForceSync command".into()))
    }
}

/// Owns the sync worker task and the process-wide shutdown signal.
pub struct SyncManager {
    shutdown_tx: watch::Sender<bool>,
    join_handle: JoinHandle<Result<(), SyncError>>,
}

impl SyncManager {
    /// Builds a manager from the worker's shutdown sender and join handle.
    pub fn new(shutdown_tx: watch::Sender<bool>, join_handle: JoinHandle<Result<(), SyncError>>) -> Self {
        SyncManager {
            shutdown_tx,
            join_handle,
        }
    }

    /// Fires the shutdown signal and waits for the worker to terminate.
    /// Every blocking operation of the engine selects on the signal and
    /// returns `SyncError::Interrupted`.
    pub async fn stop(self) -> Result<(), SyncError> {
        info!("stopping sync worker...");
        let _ = self.shutdown_tx.send(true);
        let res = self.join_handle.await?;
        info!("sync worker stopped");
        res
    }
}
