// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::handlers::RequestHandlers;
use crate::messages::{
    Envelope, EnvelopeDeserializer, EnvelopeSerializer, SyncRequest, SyncResponse,
};
use crate::peers::Peers;
use lattice_logging::lattice_trace;
use lattice_models::node::NodeId;
use lattice_serialization::{DeserializeError, Deserializer, Serializer};
use lattice_sync_exports::SyncError;
use lattice_time::LatticeTime;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Commands understood by the peer transport, the layer below the message
/// server. The transport owns connections and framing; the sync engine only
/// ever hands it opaque payloads.
#[derive(Debug)]
pub enum TransportCommand {
    /// Send `data` to `peer`.
    SendData {
        /// destination peer
        peer: NodeId,
        /// serialized envelope
        data: Vec<u8>,
    },
}

/// Events emitted by the peer transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A peer completed its handshake and can be queried.
    PeerConnected(NodeId),
    /// A peer went away; outstanding requests to it will never be answered.
    PeerDisconnected(NodeId),
    /// A payload arrived from a peer.
    ReceivedData {
        /// origin peer
        peer: NodeId,
        /// serialized envelope
        data: Vec<u8>,
    },
}

/// Commands processed by the message server worker.
#[derive(Debug)]
pub(crate) enum ServerCommand {
    /// Send a request to a peer; the answer (or `None`) comes back through
    /// `response_tx`.
    SendRequest {
        peer: NodeId,
        request: SyncRequest,
        response_tx: oneshot::Sender<Option<SyncResponse>>,
    },
}

/// Clonable handle to the message server worker.
#[derive(Clone)]
pub(crate) struct MessageServerHandle(pub(crate) mpsc::Sender<ServerCommand>);

/// Sends `request` to `peer` and waits for the matching response.
///
/// `Ok(None)` means the peer answered that it does not hold the item.
/// A peer that stays silent past `timeout` yields `SyncError::RequestTimeout`
/// so callers can skip it and try the next one.
pub(crate) async fn send_request(
    server: &MessageServerHandle,
    shutdown: &mut watch::Receiver<bool>,
    timeout: LatticeTime,
    peer: NodeId,
    request: SyncRequest,
) -> Result<Option<SyncResponse>, SyncError> {
    let (response_tx, response_rx) = oneshot::channel();
    server
        .0
        .send(ServerCommand::SendRequest {
            peer,
            request,
            response_tx,
        })
        .await
        .map_err(|_| SyncError::ChannelError("message server disappeared".into()))?;
    tokio::select! {
        _ = shutdown.changed() => Err(SyncError::Interrupted),
        _ = tokio::time::sleep(timeout.to_duration()) => Err(SyncError::RequestTimeout),
        response = response_rx => Ok(response.unwrap_or(None)),
    }
}

/// Request/response RPC worker over the peer transport.
///
/// Correlates responses with requests by envelope id, dispatches inbound
/// requests to the local handlers, and keeps the peer roster current from
/// transport connection events.
pub(crate) struct MessageServer {
    peers: Peers,
    handlers: RequestHandlers,
    transport_command_tx: mpsc::Sender<TransportCommand>,
    transport_event_rx: mpsc::Receiver<TransportEvent>,
    server_command_rx: mpsc::Receiver<ServerCommand>,
    shutdown: watch::Receiver<bool>,
    envelope_serializer: EnvelopeSerializer,
    envelope_deserializer: EnvelopeDeserializer,
    pending: HashMap<u64, (NodeId, oneshot::Sender<Option<SyncResponse>>)>,
    next_request_id: u64,
}

impl MessageServer {
    pub(crate) fn new(
        peers: Peers,
        handlers: RequestHandlers,
        max_atxs_per_block: u32,
        transport_command_tx: mpsc::Sender<TransportCommand>,
        transport_event_rx: mpsc::Receiver<TransportEvent>,
        server_command_rx: mpsc::Receiver<ServerCommand>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        MessageServer {
            peers,
            handlers,
            transport_command_tx,
            transport_event_rx,
            server_command_rx,
            shutdown,
            envelope_serializer: EnvelopeSerializer::new(),
            envelope_deserializer: EnvelopeDeserializer::new(max_atxs_per_block),
            pending: HashMap::new(),
            next_request_id: 0,
        }
    }

    /// Main loop: runs until the shutdown signal fires.
    pub(crate) async fn run(mut self) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("message server stopped");
                    return;
                }
                Some(cmd) = self.server_command_rx.recv() => {
                    self.process_command(cmd).await;
                }
                event = self.transport_event_rx.recv() => {
                    match event {
                        Some(event) => self.process_transport_event(event).await,
                        None => {
                            debug!("transport closed, stopping message server");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn process_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::SendRequest {
                peer,
                request,
                response_tx,
            } => {
                let id = self.next_request_id;
                self.next_request_id += 1;
                lattice_trace!("sync.message_server.send_request", {
                    "peer": peer,
                    "request_id": id
                });
                let envelope = Envelope::Request { id, request };
                let mut data = Vec::new();
                if self
                    .envelope_serializer
                    .serialize(&envelope, &mut data)
                    .is_err()
                {
                    // request cannot be represented on the wire, report a miss
                    let _ = response_tx.send(None);
                    return;
                }
                self.pending.insert(id, (peer, response_tx));
                if self
                    .transport_command_tx
                    .send(TransportCommand::SendData { peer, data })
                    .await
                    .is_err()
                {
                    if let Some((_, tx)) = self.pending.remove(&id) {
                        let _ = tx.send(None);
                    }
                }
            }
        }
    }

    async fn process_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected(peer) => self.peers.add(peer),
            TransportEvent::PeerDisconnected(peer) => {
                self.peers.remove(&peer);
                // outstanding requests to that peer will never be answered
                let dead: Vec<u64> = self
                    .pending
                    .iter()
                    .filter(|(_, (p, _))| *p == peer)
                    .map(|(id, _)| *id)
                    .collect();
                for id in dead {
                    if let Some((_, tx)) = self.pending.remove(&id) {
                        let _ = tx.send(None);
                    }
                }
            }
            TransportEvent::ReceivedData { peer, data } => {
                let envelope = match self
                    .envelope_deserializer
                    .deserialize::<DeserializeError>(&data)
                {
                    Ok((_, envelope)) => envelope,
                    Err(err) => {
                        warn!("dropping undecodable message from peer {}: {}", peer, err);
                        return;
                    }
                };
                match envelope {
                    Envelope::Request { id, request } => {
                        let response = self.handlers.handle(request);
                        let reply = Envelope::Response { id, response };
                        let mut data = Vec::new();
                        if self.envelope_serializer.serialize(&reply, &mut data).is_ok() {
                            let _ = self
                                .transport_command_tx
                                .send(TransportCommand::SendData { peer, data })
                                .await;
                        }
                    }
                    Envelope::Response { id, response } => {
                        match self.pending.remove(&id) {
                            Some((expected_peer, tx)) => {
                                if expected_peer != peer {
                                    warn!(
                                        "response for request {} came from {} instead of {}",
                                        id, peer, expected_peer
                                    );
                                    // do not let a third party answer for the queried peer
                                    self.pending.insert(id, (expected_peer, tx));
                                    return;
                                }
                                let _ = tx.send(response);
                            }
                            None => {
                                // requester gave up already, routine after a timeout
                                debug!("late response {} from peer {}", id, peer);
                            }
                        }
                    }
                }
            }
        }
    }
}
