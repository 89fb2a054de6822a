// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Shared definitions of the sync subsystem: configuration, errors, gossip
//! admission status, the capability traits the sync controller consumes, and
//! the controller handle types.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod controller;
mod error;
mod gossip;
mod settings;
mod traits;

pub use controller::{SyncCommand, SyncCommandSender, SyncManager};
pub use error::SyncError;
pub use gossip::{GossipStatus, SyncStatusHandle};
pub use settings::{SyncConfig, CHANNEL_SIZE};
pub use traits::{BlockEligibilityValidator, LayerClock, Mesh};
