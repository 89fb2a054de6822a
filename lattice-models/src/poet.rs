// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::error::ModelsError;
use crate::prehash::PreHashed;
use lattice_hash::{Hash, HashDeserializer, HashSerializer};
use lattice_serialization::{
    Deserializer, SerializeError, Serializer, U32VarIntDeserializer, U32VarIntSerializer,
    U64VarIntDeserializer, U64VarIntSerializer,
};
use nom::bytes::complete::take;
use nom::error::{context, ContextError, ParseError};
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::ops::Bound::Included;
use std::str::FromStr;

const POET_REF_PREFIX: char = 'P';

/// Content reference of a PoET proof
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
pub struct PoetProofRef(pub Hash);

impl PreHashed for PoetProofRef {}

impl std::fmt::Display for PoetProofRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}{}",
            POET_REF_PREFIX,
            bs58::encode(self.0.to_bytes()).with_check().into_string()
        )
    }
}

impl std::fmt::Debug for PoetProofRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for PoetProofRef {
    type Err = ModelsError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match chars.next() {
            Some(prefix) if prefix == POET_REF_PREFIX => {
                let data = chars.collect::<String>();
                let decoded = bs58::decode(data)
                    .with_check(None)
                    .into_vec()
                    .map_err(|_| ModelsError::PoetProofRefParseError)?;
                Ok(PoetProofRef(Hash::from_bytes(
                    decoded
                        .as_slice()
                        .try_into()
                        .map_err(|_| ModelsError::PoetProofRefParseError)?,
                )))
            }
            _ => Err(ModelsError::PoetProofRefParseError),
        }
    }
}

impl PoetProofRef {
    /// proof ref to bytes
    pub fn to_bytes(&self) -> &[u8; lattice_hash::HASH_SIZE_BYTES] {
        self.0.to_bytes()
    }
}

/// A proof-of-elapsed-time artifact, referenced by activation transactions.
/// The statement proved is opaque to the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoetProof {
    /// identity of the PoET service that produced the proof
    pub service_id: Hash,
    /// PoET round the proof closes
    pub round: u64,
    /// opaque proof bytes
    pub proof: Vec<u8>,
}

impl PoetProof {
    /// Content ref of the proof
    pub fn compute_ref(&self) -> Result<PoetProofRef, ModelsError> {
        let mut buffer = Vec::new();
        PoetProofSerializer::new().serialize(self, &mut buffer)?;
        Ok(PoetProofRef(Hash::compute_from(&buffer)))
    }
}

/// Serializer for `PoetProof`
#[derive(Clone)]
pub struct PoetProofSerializer {
    hash_serializer: HashSerializer,
    u64_serializer: U64VarIntSerializer,
    u32_serializer: U32VarIntSerializer,
}

impl PoetProofSerializer {
    /// Creates a new serializer for `PoetProof`
    pub const fn new() -> Self {
        Self {
            hash_serializer: HashSerializer::new(),
            u64_serializer: U64VarIntSerializer::new(),
            u32_serializer: U32VarIntSerializer::new(),
        }
    }
}

impl Default for PoetProofSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<PoetProof> for PoetProofSerializer {
    fn serialize(&self, value: &PoetProof, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.hash_serializer.serialize(&value.service_id, buffer)?;
        self.u64_serializer.serialize(&value.round, buffer)?;
        let proof_len: u32 = value.proof.len().try_into().map_err(|_| {
            SerializeError::GeneralError("could not encode proof length as u32".into())
        })?;
        self.u32_serializer.serialize(&proof_len, buffer)?;
        buffer.extend(&value.proof);
        Ok(())
    }
}

/// Deserializer for `PoetProof`
#[derive(Clone)]
pub struct PoetProofDeserializer {
    hash_deserializer: HashDeserializer,
    u64_deserializer: U64VarIntDeserializer,
    proof_len_deserializer: U32VarIntDeserializer,
}

impl PoetProofDeserializer {
    /// Creates a new deserializer for `PoetProof` with a proof-size bound
    pub const fn new(max_proof_size: u32) -> Self {
        Self {
            hash_deserializer: HashDeserializer::new(),
            u64_deserializer: U64VarIntDeserializer::new(Included(0), Included(u64::MAX)),
            proof_len_deserializer: U32VarIntDeserializer::new(
                Included(0),
                Included(max_proof_size),
            ),
        }
    }
}

impl Deserializer<PoetProof> for PoetProofDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], PoetProof, E> {
        context("Failed PoetProof deserialization", |input: &'a [u8]| {
            let (rest, service_id) = self.hash_deserializer.deserialize(input)?;
            let (rest, round) = self.u64_deserializer.deserialize(rest)?;
            let (rest, proof_len) = self.proof_len_deserializer.deserialize(rest)?;
            let (rest, proof) = take(proof_len as usize)(rest)?;
            Ok((
                rest,
                PoetProof {
                    service_id,
                    round,
                    proof: proof.to_vec(),
                },
            ))
        })(buffer)
    }
}
