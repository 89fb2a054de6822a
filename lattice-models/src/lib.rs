// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! All the structures that are used everywhere
//!
#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

/// activation transactions and their ids
pub mod activation;
/// block structure and block ids
pub mod block;
/// models error
pub mod error;
/// layers and epochs
pub mod layer;
/// node identity
pub mod node;
/// PoET proofs and proof refs
pub mod poet;
/// pre-hashed trait, for hash-less hashmap/set
pub mod prehash;
/// transactions and their ids
pub mod transaction;
