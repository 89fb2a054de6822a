// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::block::{Block, BlockId};
use crate::error::ModelsError;
use crate::error::ModelsResult;
use lattice_hash::Hash;
use lattice_serialization::{
    Deserializer, SerializeError, Serializer, U64VarIntDeserializer, U64VarIntSerializer,
};
use nom::error::{context, ContextError, ParseError};
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::ops::Bound::Included;

/// A time-indexed slot in which zero or more blocks may be produced.
#[derive(
    Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LayerId(pub u64);

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl LayerId {
    /// the genesis layer
    pub const GENESIS: LayerId = LayerId(0);

    /// epoch this layer belongs to, given the epoch length
    pub fn epoch(&self, layers_per_epoch: u64) -> EpochId {
        EpochId(self.0 / layers_per_epoch)
    }

    /// following layer
    pub fn next(&self) -> Result<LayerId, ModelsError> {
        self.0
            .checked_add(1)
            .map(LayerId)
            .ok_or(ModelsError::LayerOverflowError)
    }

    /// preceding layer, saturating at genesis
    pub fn saturating_prev(&self) -> LayerId {
        LayerId(self.0.saturating_sub(1))
    }

    /// number of layers between `earlier` and `self`, zero if `earlier` is
    /// not actually earlier
    pub fn saturating_distance(&self, earlier: LayerId) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// A fixed-size run of consecutive layers. Activation transactions are
/// published per epoch.
#[derive(
    Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EpochId(pub u64);

impl std::fmt::Display for EpochId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl EpochId {
    /// first layer of the epoch, given the epoch length
    pub fn first_layer(&self, layers_per_epoch: u64) -> LayerId {
        LayerId(self.0.saturating_mul(layers_per_epoch))
    }

    /// last layer of the epoch, given the epoch length
    pub fn last_layer(&self, layers_per_epoch: u64) -> LayerId {
        LayerId(
            self.0
                .saturating_add(1)
                .saturating_mul(layers_per_epoch)
                .saturating_sub(1),
        )
    }

    /// following epoch
    pub fn next(&self) -> EpochId {
        EpochId(self.0.saturating_add(1))
    }

    /// The two first epochs are bootstrapped without a full activation set;
    /// several invariants are relaxed inside them.
    pub fn is_genesis(&self) -> bool {
        self.0 <= 1
    }
}

/// A layer together with the blocks it aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    /// layer index
    pub id: LayerId,
    /// blocks of the layer
    pub blocks: Vec<Block>,
}

impl Layer {
    /// Creates an empty layer
    pub fn new(id: LayerId) -> Self {
        Layer {
            id,
            blocks: Vec::new(),
        }
    }

    /// Creates a layer from already-fetched blocks
    pub fn from_blocks(id: LayerId, blocks: Vec<Block>) -> Self {
        Layer { id, blocks }
    }

    /// Canonical hash of an id set: Blake3 over the concatenation of the
    /// sorted id bytes. Peers exchanging a layer must agree on this value
    /// whatever order they hold the blocks in.
    pub fn hash_of_ids(ids: &[BlockId]) -> Hash {
        let mut sorted: Vec<&BlockId> = ids.iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut bytes = Vec::with_capacity(sorted.len() * lattice_hash::HASH_SIZE_BYTES);
        for id in sorted {
            bytes.extend_from_slice(id.to_bytes());
        }
        Hash::compute_from(&bytes)
    }

    /// The zero-block sentinel: what `hash_of_ids` yields for an empty layer.
    pub fn empty_hash() -> Hash {
        Hash::compute_from(&[])
    }

    /// Content ids of this layer's blocks
    pub fn block_ids(&self) -> ModelsResult<Vec<BlockId>> {
        self.blocks.iter().map(|b| b.compute_id()).collect()
    }

    /// Hash of this layer's block-id set
    pub fn hash(&self) -> ModelsResult<Hash> {
        Ok(Layer::hash_of_ids(&self.block_ids()?))
    }
}

/// Serializer for `LayerId`
#[derive(Clone)]
pub struct LayerIdSerializer {
    u64_serializer: U64VarIntSerializer,
}

impl LayerIdSerializer {
    /// Creates a new serializer for `LayerId`
    pub const fn new() -> Self {
        Self {
            u64_serializer: U64VarIntSerializer::new(),
        }
    }
}

impl Default for LayerIdSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<LayerId> for LayerIdSerializer {
    fn serialize(&self, value: &LayerId, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u64_serializer.serialize(&value.0, buffer)
    }
}

/// Deserializer for `LayerId`
#[derive(Clone)]
pub struct LayerIdDeserializer {
    u64_deserializer: U64VarIntDeserializer,
}

impl LayerIdDeserializer {
    /// Creates a new deserializer for `LayerId`
    pub const fn new() -> Self {
        Self {
            u64_deserializer: U64VarIntDeserializer::new(Included(0), Included(u64::MAX)),
        }
    }
}

impl Default for LayerIdDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<LayerId> for LayerIdDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], LayerId, E> {
        context("Failed LayerId deserialization", |input| {
            self.u64_deserializer
                .deserialize(input)
                .map(|(rest, res)| (rest, LayerId(res)))
        })(buffer)
    }
}

/// Serializer for `EpochId`
#[derive(Clone)]
pub struct EpochIdSerializer {
    u64_serializer: U64VarIntSerializer,
}

impl EpochIdSerializer {
    /// Creates a new serializer for `EpochId`
    pub const fn new() -> Self {
        Self {
            u64_serializer: U64VarIntSerializer::new(),
        }
    }
}

impl Default for EpochIdSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<EpochId> for EpochIdSerializer {
    fn serialize(&self, value: &EpochId, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u64_serializer.serialize(&value.0, buffer)
    }
}

/// Deserializer for `EpochId`
#[derive(Clone)]
pub struct EpochIdDeserializer {
    u64_deserializer: U64VarIntDeserializer,
}

impl EpochIdDeserializer {
    /// Creates a new deserializer for `EpochId`
    pub const fn new() -> Self {
        Self {
            u64_deserializer: U64VarIntDeserializer::new(Included(0), Included(u64::MAX)),
        }
    }
}

impl Default for EpochIdDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<EpochId> for EpochIdDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], EpochId, E> {
        context("Failed EpochId deserialization", |input| {
            self.u64_deserializer
                .deserialize(input)
                .map(|(rest, res)| (rest, EpochId(res)))
        })(buffer)
    }
}
