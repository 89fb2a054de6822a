// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::activation::AtxId;
use crate::error::ModelsError;
use crate::layer::{LayerId, LayerIdDeserializer, LayerIdSerializer};
use crate::node::{NodeId, NodeIdDeserializer, NodeIdSerializer};
use crate::prehash::PreHashed;
use crate::transaction::TxId;
use lattice_hash::{Hash, HashDeserializer};
use lattice_serialization::{
    DeserializeError, Deserializer, SerializeError, Serializer, U32VarIntDeserializer,
    U32VarIntSerializer, U64VarIntDeserializer, U64VarIntSerializer,
};
use nom::error::{context, ContextError, ParseError};
use nom::IResult;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::ops::Bound::Included;
use std::str::FromStr;

/// Size in bytes of a serialized block ID
pub const BLOCK_ID_SIZE_BYTES: usize = lattice_hash::HASH_SIZE_BYTES;

const BLOCKID_PREFIX: char = 'B';
const BLOCKID_VERSION: u64 = 0;

/// block id: hash of the serialized block body
#[derive(
    Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, SerializeDisplay, DeserializeFromStr,
)]
pub struct BlockId(pub Hash);

impl PreHashed for BlockId {}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let u64_serializer = U64VarIntSerializer::new();
        let mut bytes: Vec<u8> = Vec::new();
        u64_serializer
            .serialize(&BLOCKID_VERSION, &mut bytes)
            .map_err(|_| std::fmt::Error)?;
        bytes.extend(self.0.to_bytes());
        write!(
            f,
            "{}{}",
            BLOCKID_PREFIX,
            bs58::encode(bytes).with_check().into_string()
        )
    }
}

impl std::fmt::Debug for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for BlockId {
    type Err = ModelsError;
    /// ## Example
    /// ```rust
    /// # use lattice_hash::Hash;
    /// # use std::str::FromStr;
    /// # use lattice_models::block::BlockId;
    /// # let hash = Hash::compute_from(b"test");
    /// # let block_id = BlockId(hash);
    /// let ser = block_id.to_string();
    /// let res_block_id = BlockId::from_str(&ser).unwrap();
    /// assert_eq!(block_id, res_block_id);
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match chars.next() {
            Some(prefix) if prefix == BLOCKID_PREFIX => {
                let data = chars.collect::<String>();
                let decoded_bs58_check = bs58::decode(data)
                    .with_check(None)
                    .into_vec()
                    .map_err(|_| ModelsError::BlockIdParseError)?;
                let u64_deserializer = U64VarIntDeserializer::new(Included(0), Included(u64::MAX));
                let (rest, _version) = u64_deserializer
                    .deserialize::<DeserializeError>(&decoded_bs58_check[..])
                    .map_err(|_| ModelsError::BlockIdParseError)?;
                Ok(BlockId(Hash::from_bytes(
                    rest.try_into()
                        .map_err(|_| ModelsError::BlockIdParseError)?,
                )))
            }
            _ => Err(ModelsError::BlockIdParseError),
        }
    }
}

impl BlockId {
    /// block id to bytes
    pub fn to_bytes(&self) -> &[u8; BLOCK_ID_SIZE_BYTES] {
        self.0.to_bytes()
    }

    /// block id into bytes
    pub fn into_bytes(self) -> [u8; BLOCK_ID_SIZE_BYTES] {
        self.0.into_bytes()
    }

    /// block id from bytes
    pub fn from_bytes(data: &[u8; BLOCK_ID_SIZE_BYTES]) -> BlockId {
        BlockId(Hash::from_bytes(data))
    }
}

/// A block of the mesh.
///
/// `view_edges` are the DAG parents carrying the block's view of its causal
/// history; the three diff lists refine that view vote-wise. The activation
/// set eligible in the block's epoch is either carried inline (`active_set`)
/// or borrowed from `ref_block`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// identity that produced the block
    pub miner_id: NodeId,
    /// layer the block belongs to
    pub layer: LayerId,
    /// activation backing the miner's eligibility
    pub atx_id: AtxId,
    /// block carrying the shared active set for this epoch, if not inline
    pub ref_block: Option<BlockId>,
    /// inline active set
    pub active_set: Option<Vec<AtxId>>,
    /// transactions included in the block
    pub tx_ids: Vec<TxId>,
    /// DAG parents
    pub view_edges: Vec<BlockId>,
    /// blocks explicitly voted for
    pub for_diff: Vec<BlockId>,
    /// blocks explicitly voted against
    pub against_diff: Vec<BlockId>,
    /// blocks explicitly voted neutral on
    pub neutral_diff: Vec<BlockId>,
}

impl Block {
    /// Content id of the block
    pub fn compute_id(&self) -> Result<BlockId, ModelsError> {
        let mut buffer = Vec::new();
        BlockSerializer::new().serialize(self, &mut buffer)?;
        Ok(BlockId(Hash::compute_from(&buffer)))
    }

    /// Content id as a plain hash
    pub fn compute_hash(&self) -> Result<Hash, ModelsError> {
        Ok(self.compute_id()?.0)
    }

    /// Union of the three vote-diff lists. Every id in it must be resolvable
    /// within the permitted history window for the block to be valid.
    pub fn combine_diffs(&self) -> Vec<BlockId> {
        let mut out =
            Vec::with_capacity(self.for_diff.len() + self.against_diff.len() + self.neutral_diff.len());
        out.extend(&self.for_diff);
        out.extend(&self.against_diff);
        out.extend(&self.neutral_diff);
        out
    }
}

fn serialize_id_list<T, F>(
    u32_serializer: &U32VarIntSerializer,
    ids: &[T],
    id_bytes: F,
    buffer: &mut Vec<u8>,
) -> Result<(), SerializeError>
where
    F: Fn(&T) -> &[u8; lattice_hash::HASH_SIZE_BYTES],
{
    let len: u32 = ids
        .len()
        .try_into()
        .map_err(|_| SerializeError::GeneralError("could not encode id list length as u32".into()))?;
    u32_serializer.serialize(&len, buffer)?;
    for id in ids {
        buffer.extend(id_bytes(id));
    }
    Ok(())
}

/// Serializer for `Block`
#[derive(Clone)]
pub struct BlockSerializer {
    node_id_serializer: NodeIdSerializer,
    layer_id_serializer: LayerIdSerializer,
    u32_serializer: U32VarIntSerializer,
}

impl BlockSerializer {
    /// Creates a new serializer for `Block`
    pub fn new() -> Self {
        Self {
            node_id_serializer: NodeIdSerializer,
            layer_id_serializer: LayerIdSerializer::new(),
            u32_serializer: U32VarIntSerializer::new(),
        }
    }
}

impl Default for BlockSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<Block> for BlockSerializer {
    fn serialize(&self, value: &Block, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.node_id_serializer.serialize(&value.miner_id, buffer)?;
        self.layer_id_serializer.serialize(&value.layer, buffer)?;
        buffer.extend(value.atx_id.to_bytes());
        match &value.ref_block {
            Some(id) => {
                buffer.push(1);
                buffer.extend(id.to_bytes());
            }
            None => buffer.push(0),
        }
        match &value.active_set {
            Some(ids) => {
                buffer.push(1);
                serialize_id_list(&self.u32_serializer, ids, AtxId::to_bytes, buffer)?;
            }
            None => buffer.push(0),
        }
        serialize_id_list(&self.u32_serializer, &value.tx_ids, TxId::to_bytes, buffer)?;
        serialize_id_list(&self.u32_serializer, &value.view_edges, BlockId::to_bytes, buffer)?;
        serialize_id_list(&self.u32_serializer, &value.for_diff, BlockId::to_bytes, buffer)?;
        serialize_id_list(&self.u32_serializer, &value.against_diff, BlockId::to_bytes, buffer)?;
        serialize_id_list(&self.u32_serializer, &value.neutral_diff, BlockId::to_bytes, buffer)?;
        Ok(())
    }
}

/// Deserializer for `Block`
#[derive(Clone)]
pub struct BlockDeserializer {
    node_id_deserializer: NodeIdDeserializer,
    layer_id_deserializer: LayerIdDeserializer,
    hash_deserializer: HashDeserializer,
    tx_count_deserializer: U32VarIntDeserializer,
    atx_count_deserializer: U32VarIntDeserializer,
    edge_count_deserializer: U32VarIntDeserializer,
}

impl BlockDeserializer {
    /// Creates a new deserializer for `Block`.
    ///
    /// The bounds cap the collection lengths an untrusted peer can make us
    /// allocate for: `max_tx_ids` for the transaction list, `max_atx_ids` for
    /// the inline active set, `max_edges` for the view-edge and each
    /// vote-diff list.
    pub const fn new(max_tx_ids: u32, max_atx_ids: u32, max_edges: u32) -> Self {
        Self {
            node_id_deserializer: NodeIdDeserializer::new(),
            layer_id_deserializer: LayerIdDeserializer::new(),
            hash_deserializer: HashDeserializer::new(),
            tx_count_deserializer: U32VarIntDeserializer::new(Included(0), Included(max_tx_ids)),
            atx_count_deserializer: U32VarIntDeserializer::new(Included(0), Included(max_atx_ids)),
            edge_count_deserializer: U32VarIntDeserializer::new(Included(0), Included(max_edges)),
        }
    }

    fn deserialize_hash_list<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        count_deserializer: &U32VarIntDeserializer,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Vec<Hash>, E> {
        let (mut rest, count) = count_deserializer.deserialize(buffer)?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (next, hash) = self.hash_deserializer.deserialize(rest)?;
            out.push(hash);
            rest = next;
        }
        Ok((rest, out))
    }
}

impl Deserializer<Block> for BlockDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Block, E> {
        context("Failed Block deserialization", |input: &'a [u8]| {
            let (rest, miner_id) = self.node_id_deserializer.deserialize(input)?;
            let (rest, layer) = self.layer_id_deserializer.deserialize(rest)?;
            let (rest, atx_id) = self.hash_deserializer.deserialize(rest)?;

            let (rest, has_ref_block) = nom::number::complete::be_u8(rest)?;
            let (rest, ref_block) = if has_ref_block == 1 {
                let (rest, hash) = self.hash_deserializer.deserialize(rest)?;
                (rest, Some(BlockId(hash)))
            } else {
                (rest, None)
            };

            let (rest, has_active_set) = nom::number::complete::be_u8(rest)?;
            let (rest, active_set) = if has_active_set == 1 {
                let (rest, hashes) =
                    self.deserialize_hash_list(&self.atx_count_deserializer, rest)?;
                (rest, Some(hashes.into_iter().map(AtxId).collect()))
            } else {
                (rest, None)
            };

            let (rest, tx_hashes) = self.deserialize_hash_list(&self.tx_count_deserializer, rest)?;
            let (rest, view_hashes) =
                self.deserialize_hash_list(&self.edge_count_deserializer, rest)?;
            let (rest, for_hashes) =
                self.deserialize_hash_list(&self.edge_count_deserializer, rest)?;
            let (rest, against_hashes) =
                self.deserialize_hash_list(&self.edge_count_deserializer, rest)?;
            let (rest, neutral_hashes) =
                self.deserialize_hash_list(&self.edge_count_deserializer, rest)?;

            Ok((
                rest,
                Block {
                    miner_id,
                    layer,
                    atx_id: AtxId(atx_id),
                    ref_block,
                    active_set,
                    tx_ids: tx_hashes.into_iter().map(TxId).collect(),
                    view_edges: view_hashes.into_iter().map(BlockId).collect(),
                    for_diff: for_hashes.into_iter().map(BlockId).collect(),
                    against_diff: against_hashes.into_iter().map(BlockId).collect(),
                    neutral_diff: neutral_hashes.into_iter().map(BlockId).collect(),
                },
            ))
        })(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn example_block() -> Block {
        Block {
            miner_id: NodeId(Hash::compute_from(b"miner")),
            layer: LayerId(4),
            atx_id: AtxId(Hash::compute_from(b"atx")),
            ref_block: Some(BlockId(Hash::compute_from(b"ref"))),
            active_set: None,
            tx_ids: vec![TxId(Hash::compute_from(b"tx1")), TxId(Hash::compute_from(b"tx2"))],
            view_edges: vec![BlockId(Hash::compute_from(b"parent"))],
            for_diff: vec![BlockId(Hash::compute_from(b"for"))],
            against_diff: vec![],
            neutral_diff: vec![],
        }
    }

    #[test]
    #[serial]
    fn test_block_roundtrip() {
        let block = example_block();
        let mut buffer = Vec::new();
        BlockSerializer::new().serialize(&block, &mut buffer).unwrap();
        let (rest, decoded) = BlockDeserializer::new(1024, 1024, 128)
            .deserialize::<DeserializeError>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, block);
        assert_eq!(decoded.compute_id().unwrap(), block.compute_id().unwrap());
    }

    #[test]
    #[serial]
    fn test_block_id_depends_on_content() {
        let block = example_block();
        let mut other = block.clone();
        other.layer = LayerId(5);
        assert_ne!(block.compute_id().unwrap(), other.compute_id().unwrap());
    }

    #[test]
    #[serial]
    fn test_combine_diffs_keeps_duplicates_across_lists() {
        let shared = BlockId(Hash::compute_from(b"shared"));
        let mut block = example_block();
        block.for_diff = vec![shared];
        block.against_diff = vec![shared];
        block.neutral_diff = vec![];
        assert_eq!(block.combine_diffs(), vec![shared, shared]);
    }
}
