// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::error::ModelsError;
use crate::layer::{EpochId, LayerId, LayerIdDeserializer, LayerIdSerializer};
use crate::node::{NodeId, NodeIdDeserializer, NodeIdSerializer};
use crate::poet::PoetProofRef;
use crate::prehash::PreHashed;
use lattice_hash::{Hash, HashDeserializer};
use lattice_serialization::{
    Deserializer, SerializeError, Serializer, U32VarIntDeserializer, U32VarIntSerializer,
};
use nom::error::{context, ContextError, ParseError};
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::ops::Bound::Included;
use std::str::FromStr;

const ATXID_PREFIX: char = 'A';

/// activation transaction id
#[derive(
    Clone,
    Copy,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
)]
pub struct AtxId(pub Hash);

impl PreHashed for AtxId {}

impl std::fmt::Display for AtxId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}{}",
            ATXID_PREFIX,
            bs58::encode(self.0.to_bytes()).with_check().into_string()
        )
    }
}

impl std::fmt::Debug for AtxId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for AtxId {
    type Err = ModelsError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match chars.next() {
            Some(prefix) if prefix == ATXID_PREFIX => {
                let data = chars.collect::<String>();
                let decoded = bs58::decode(data)
                    .with_check(None)
                    .into_vec()
                    .map_err(|_| ModelsError::AtxIdParseError)?;
                Ok(AtxId(Hash::from_bytes(
                    decoded
                        .as_slice()
                        .try_into()
                        .map_err(|_| ModelsError::AtxIdParseError)?,
                )))
            }
            _ => Err(ModelsError::AtxIdParseError),
        }
    }
}

impl AtxId {
    /// The all-zero id: marks an absent previous-activation reference.
    pub fn empty() -> AtxId {
        AtxId(Hash::zero())
    }

    /// atx id to bytes
    pub fn to_bytes(&self) -> &[u8; lattice_hash::HASH_SIZE_BYTES] {
        self.0.to_bytes()
    }

    /// Canonical hash of an id set: Blake3 over the concatenation of the
    /// sorted id bytes. Used when cross-checking per-epoch activation sets
    /// between peers.
    pub fn hash_of_ids(ids: &[AtxId]) -> Hash {
        let mut sorted: Vec<&AtxId> = ids.iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut bytes = Vec::with_capacity(sorted.len() * lattice_hash::HASH_SIZE_BYTES);
        for id in sorted {
            bytes.extend_from_slice(id.to_bytes());
        }
        Hash::compute_from(&bytes)
    }
}

/// A per-identity proof-of-space-time record that gates block eligibility for
/// one epoch. Activations chain per identity through `prev_atx` and position
/// themselves in the network through `positioning_atx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationTx {
    /// identity the activation belongs to
    pub node_id: NodeId,
    /// layer the activation was published in
    pub pub_layer_id: LayerId,
    /// positioning reference, the configured golden id for first-epoch identities
    pub positioning_atx: AtxId,
    /// previous activation of the same identity, `AtxId::empty()` for the first one
    pub prev_atx: AtxId,
    /// PoET proof backing the activation
    pub poet_ref: PoetProofRef,
    /// committed space units
    pub num_units: u32,
}

impl ActivationTx {
    /// Content id of the activation
    pub fn compute_id(&self) -> Result<AtxId, ModelsError> {
        let mut buffer = Vec::new();
        ActivationTxSerializer::new().serialize(self, &mut buffer)?;
        Ok(AtxId(Hash::compute_from(&buffer)))
    }

    /// Epoch in which the activation grants eligibility: the one after its
    /// publication epoch.
    pub fn target_epoch(&self, layers_per_epoch: u64) -> EpochId {
        self.pub_layer_id.epoch(layers_per_epoch).next()
    }
}

/// Serializer for `ActivationTx`
#[derive(Clone)]
pub struct ActivationTxSerializer {
    node_id_serializer: NodeIdSerializer,
    layer_id_serializer: LayerIdSerializer,
    u32_serializer: U32VarIntSerializer,
}

impl ActivationTxSerializer {
    /// Creates a new serializer for `ActivationTx`
    pub fn new() -> Self {
        Self {
            node_id_serializer: NodeIdSerializer,
            layer_id_serializer: LayerIdSerializer::new(),
            u32_serializer: U32VarIntSerializer::new(),
        }
    }
}

impl Default for ActivationTxSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<ActivationTx> for ActivationTxSerializer {
    fn serialize(&self, value: &ActivationTx, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.node_id_serializer.serialize(&value.node_id, buffer)?;
        self.layer_id_serializer
            .serialize(&value.pub_layer_id, buffer)?;
        buffer.extend(value.positioning_atx.to_bytes());
        buffer.extend(value.prev_atx.to_bytes());
        buffer.extend(value.poet_ref.to_bytes());
        self.u32_serializer.serialize(&value.num_units, buffer)?;
        Ok(())
    }
}

/// Deserializer for `ActivationTx`
#[derive(Clone)]
pub struct ActivationTxDeserializer {
    node_id_deserializer: NodeIdDeserializer,
    layer_id_deserializer: LayerIdDeserializer,
    hash_deserializer: HashDeserializer,
    u32_deserializer: U32VarIntDeserializer,
}

impl ActivationTxDeserializer {
    /// Creates a new deserializer for `ActivationTx`
    pub fn new() -> Self {
        Self {
            node_id_deserializer: NodeIdDeserializer::new(),
            layer_id_deserializer: LayerIdDeserializer::new(),
            hash_deserializer: HashDeserializer::new(),
            u32_deserializer: U32VarIntDeserializer::new(Included(0), Included(u32::MAX)),
        }
    }
}

impl Default for ActivationTxDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<ActivationTx> for ActivationTxDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], ActivationTx, E> {
        context("Failed ActivationTx deserialization", |input: &'a [u8]| {
            let (rest, node_id) = self.node_id_deserializer.deserialize(input)?;
            let (rest, pub_layer_id) = self.layer_id_deserializer.deserialize(rest)?;
            let (rest, positioning) = self.hash_deserializer.deserialize(rest)?;
            let (rest, prev) = self.hash_deserializer.deserialize(rest)?;
            let (rest, poet_ref) = self.hash_deserializer.deserialize(rest)?;
            let (rest, num_units) = self.u32_deserializer.deserialize(rest)?;
            Ok((
                rest,
                ActivationTx {
                    node_id,
                    pub_layer_id,
                    positioning_atx: AtxId(positioning),
                    prev_atx: AtxId(prev),
                    poet_ref: PoetProofRef(poet_ref),
                    num_units,
                },
            ))
        })(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_serialization::DeserializeError;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_activation_roundtrip() {
        let atx = ActivationTx {
            node_id: NodeId(Hash::compute_from(b"node")),
            pub_layer_id: LayerId(15),
            positioning_atx: AtxId(Hash::compute_from(b"pos")),
            prev_atx: AtxId::empty(),
            poet_ref: PoetProofRef(Hash::compute_from(b"poet")),
            num_units: 7,
        };
        let mut buffer = Vec::new();
        ActivationTxSerializer::new()
            .serialize(&atx, &mut buffer)
            .unwrap();
        let (rest, decoded) = ActivationTxDeserializer::new()
            .deserialize::<DeserializeError>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, atx);
        // published in epoch 1 (layers_per_epoch = 10), eligible in epoch 2
        assert_eq!(atx.target_epoch(10), EpochId(2));
    }
}
