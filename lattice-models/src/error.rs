// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use lattice_serialization::SerializeError;
use thiserror::Error;

/// models result
pub type ModelsResult<T, E = ModelsError> = core::result::Result<T, E>;

/// models error
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum ModelsError {
    /// hashing error
    HashError,
    /// Serialization error: {0}
    SerializeError(String),
    /// Serialization error: {0}
    SerializationError(#[from] SerializeError),
    /// Deserialization error: {0}
    DeserializeError(String),
    /// `LatticeHash` error: {0}
    LatticeHashError(#[from] lattice_hash::LatticeHashError),
    /// layer overflow error
    LayerOverflowError,
    /// node id parsing error
    NodeIdParseError,
    /// block id parsing error
    BlockIdParseError,
    /// transaction id parsing error
    TxIdParseError,
    /// activation id parsing error
    AtxIdParseError,
    /// PoET proof ref parsing error
    PoetProofRefParseError,
    /// Time error {0}
    TimeError(#[from] lattice_time::TimeError),
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for ModelsError {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        ModelsError::DeserializeError(err.to_string())
    }
}
