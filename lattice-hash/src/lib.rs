// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Content hashing for all content-addressed identifiers of the node.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod error;
mod hash;
mod settings;

pub use error::LatticeHashError;
pub use hash::{Hash, HashDeserializer, HashSerializer};
pub use settings::HASH_SIZE_BYTES;
