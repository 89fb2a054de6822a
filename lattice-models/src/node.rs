// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::error::ModelsError;
use crate::prehash::PreHashed;
use lattice_hash::{Hash, HashDeserializer};
use lattice_serialization::{Deserializer, SerializeError, Serializer};
use nom::error::{context, ContextError, ParseError};
use nom::IResult;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::str::FromStr;

const NODEID_PREFIX: char = 'N';

/// Identity of a node on the network, derived from its transport-level public
/// key. Also used as the miner identity carried by blocks.
#[derive(
    Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct NodeId(pub Hash);

impl PreHashed for NodeId {}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}{}",
            NODEID_PREFIX,
            bs58::encode(self.0.to_bytes()).with_check().into_string()
        )
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for NodeId {
    type Err = ModelsError;
    /// ## Example
    /// ```rust
    /// # use lattice_hash::Hash;
    /// # use std::str::FromStr;
    /// # use lattice_models::node::NodeId;
    /// # let node_id = NodeId(Hash::compute_from(b"test"));
    /// let ser = node_id.to_string();
    /// let res_node_id = NodeId::from_str(&ser).unwrap();
    /// assert_eq!(node_id, res_node_id);
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match chars.next() {
            Some(prefix) if prefix == NODEID_PREFIX => {
                let data = chars.collect::<String>();
                let decoded = bs58::decode(data)
                    .with_check(None)
                    .into_vec()
                    .map_err(|_| ModelsError::NodeIdParseError)?;
                Ok(NodeId(Hash::from_bytes(
                    decoded
                        .as_slice()
                        .try_into()
                        .map_err(|_| ModelsError::NodeIdParseError)?,
                )))
            }
            _ => Err(ModelsError::NodeIdParseError),
        }
    }
}

/// Serializer for `NodeId`
#[derive(Default, Clone)]
pub struct NodeIdSerializer;

impl NodeIdSerializer {
    /// Creates a new serializer for `NodeId`
    pub fn new() -> Self {
        Self
    }
}

impl Serializer<NodeId> for NodeIdSerializer {
    fn serialize(&self, value: &NodeId, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        buffer.extend(value.0.to_bytes());
        Ok(())
    }
}

/// Deserializer for `NodeId`
#[derive(Default, Clone)]
pub struct NodeIdDeserializer {
    hash_deserializer: HashDeserializer,
}

impl NodeIdDeserializer {
    /// Creates a new deserializer for `NodeId`
    pub const fn new() -> Self {
        Self {
            hash_deserializer: HashDeserializer::new(),
        }
    }
}

impl Deserializer<NodeId> for NodeIdDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], NodeId, E> {
        context("Failed NodeId deserialization", |input| {
            let (rest, hash) = self.hash_deserializer.deserialize(input)?;
            Ok((rest, NodeId(hash)))
        })(buffer)
    }
}
