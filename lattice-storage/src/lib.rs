// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Shared object storage, used by the sync engine as its local lookup layer
//! and by the request handlers to serve peers.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod storage;

pub use storage::Storage;
