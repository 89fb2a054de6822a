// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Layer synchronization engine.
//!
//! Reconciles a lagging node with the network: fetches layers of blocks and
//! their transitively referenced data from peers, validates them in
//! dependency order, admits them into the mesh, and gates gossip admission
//! while doing so.

#![warn(unused_crate_dependencies)]

mod block_queue;
mod common;
mod controller;
mod fetch_queue;
mod fetcher;
mod handlers;
mod messages;
mod peers;
mod server;
mod validation;
mod worker;
mod workers;

pub use controller::start_sync_controller;
pub use fetcher::SyncFetcher;
pub use messages::{Envelope, SyncRequest, SyncResponse};
pub use peers::Peers;
pub use server::{TransportCommand, TransportEvent};

#[cfg(test)]
mod tests;
