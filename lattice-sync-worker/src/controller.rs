// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::block_queue::BlockQueue;
use crate::common::SyncCore;
use crate::fetch_queue::{AtxQueue, PoetQueue, TxQueue};
use crate::fetcher::SyncFetcher;
use crate::handlers::RequestHandlers;
use crate::peers::Peers;
use crate::server::{MessageServer, MessageServerHandle, TransportCommand, TransportEvent};
use crate::worker::{SyncWorker, Synchroniser};
use lattice_storage::Storage;
use lattice_sync_exports::{
    BlockEligibilityValidator, LayerClock, Mesh, SyncCommandSender, SyncConfig, SyncError,
    SyncManager, SyncStatusHandle, CHANNEL_SIZE,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Starts the sync subsystem over a peer transport.
///
/// Spawns the message server, the item-queue and block-queue fetch workers,
/// and the tick-driven sync worker. Returns the command sender, the on-demand
/// fetcher, the gossip status handle and the manager owning the shutdown
/// signal.
#[allow(clippy::too_many_arguments)]
pub fn start_sync_controller(
    cfg: SyncConfig,
    storage: Storage,
    mesh: Arc<dyn Mesh>,
    validator: Arc<dyn BlockEligibilityValidator>,
    clock: Arc<dyn LayerClock>,
    transport_command_tx: mpsc::Sender<TransportCommand>,
    transport_event_rx: mpsc::Receiver<TransportEvent>,
) -> Result<
    (
        SyncCommandSender,
        SyncFetcher,
        SyncStatusHandle,
        SyncManager,
    ),
    SyncError,
> {
    debug!("starting sync controller");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let peers = Peers::new();

    let (server_command_tx, server_command_rx) = mpsc::channel(CHANNEL_SIZE);
    let handlers = RequestHandlers::new(storage.clone(), mesh.clone());
    let server = MessageServer::new(
        peers.clone(),
        handlers,
        cfg.atxs_limit as u32,
        transport_command_tx,
        transport_event_rx,
        server_command_rx,
        shutdown_rx.clone(),
    );
    tokio::spawn(server.run());

    let core = Arc::new(SyncCore {
        cfg: cfg.clone(),
        storage,
        mesh,
        validator,
        peers,
        server: MessageServerHandle(server_command_tx),
        shutdown: shutdown_rx.clone(),
    });

    let tx_queue = TxQueue::new(core.clone());
    let poet_queue = PoetQueue::new(core.clone());
    let atx_queue = AtxQueue::new(core.clone(), poet_queue.clone());
    let block_queue = BlockQueue::new(core.clone(), tx_queue.clone(), atx_queue.clone());

    let status = SyncStatusHandle::new(cfg.always_listen);
    let synchroniser = Arc::new(Synchroniser::new(
        core.clone(),
        clock,
        status.clone(),
        block_queue.clone(),
        atx_queue.clone(),
    ));

    let (command_tx, command_rx) = mpsc::channel(CHANNEL_SIZE);
    let worker = SyncWorker::new(synchroniser, command_rx, shutdown_rx, cfg.sync_interval);
    let join_handle = tokio::spawn(async move {
        let res = worker.run_loop().await;
        match res {
            Err(ref err) => info!("sync worker crashed: {}", err),
            Ok(_) => info!("sync worker finished cleanly"),
        }
        res
    });

    let fetcher = SyncFetcher::new(core, block_queue, tx_queue, atx_queue, poet_queue);
    info!("sync controller started");
    Ok((
        SyncCommandSender(command_tx),
        fetcher,
        status,
        SyncManager::new(shutdown_tx, join_handle),
    ))
}
