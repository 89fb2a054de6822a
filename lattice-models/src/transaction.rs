// Copyright (c) 2022 MASSA LABS <info@massa.net>

use crate::error::ModelsError;
use crate::prehash::PreHashed;
use lattice_hash::{Hash, HashDeserializer};
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

const TXID_PREFIX: char = 'T';

/// transaction id
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
pub struct TxId(pub Hash);

impl PreHashed for TxId {}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}{}",
            TXID_PREFIX,
            bs58::encode(self.0.to_bytes()).with_check().into_string()
        )
    }
}

impl std::fmt::Debug for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for TxId {
    type Err = ModelsError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match chars.next() {
            Some(prefix) if prefix == TXID_PREFIX => {
                let data = chars.collect::<String>();
                let decoded = bs58::decode(data)
                    .with_check(None)
                    .into_vec()
                    .map_err(|_| ModelsError::TxIdParseError)?;
                Ok(TxId(Hash::from_bytes(
                    decoded
                        .as_slice()
                        .try_into()
                        .map_err(|_| ModelsError::TxIdParseError)?,
                )))
            }
            _ => Err(ModelsError::TxIdParseError),
        }
    }
}

impl TxId {
    /// transaction id to bytes
    pub fn to_bytes(&self) -> &[u8; lattice_hash::HASH_SIZE_BYTES] {
        self.0.to_bytes()
    }
}

/// A transfer order, content-addressed by the hash of its serialized form.
/// Execution semantics live in the VM, the sync engine only moves the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// fee offered to the miner
    pub fee: u64,
    /// sender-side sequence number
    pub nonce: u64,
    /// opaque call payload
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Content id of the transaction
    pub fn compute_id(&self) -> Result<TxId, ModelsError> {
        let mut buffer = Vec::new();
        TransactionSerializer::new().serialize(self, &mut buffer)?;
        Ok(TxId(Hash::compute_from(&buffer)))
    }
}

/// Serializer for `Transaction`
#[derive(Clone)]
pub struct TransactionSerializer {
    u64_serializer: U64VarIntSerializer,
    u32_serializer: U32VarIntSerializer,
}

impl TransactionSerializer {
    /// Creates a new serializer for `Transaction`
    pub const fn new() -> Self {
        Self {
            u64_serializer: U64VarIntSerializer::new(),
            u32_serializer: U32VarIntSerializer::new(),
        }
    }
}

impl Default for TransactionSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<Transaction> for TransactionSerializer {
    fn serialize(&self, value: &Transaction, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u64_serializer.serialize(&value.fee, buffer)?;
        self.u64_serializer.serialize(&value.nonce, buffer)?;
        let payload_len: u32 = value.payload.len().try_into().map_err(|_| {
            SerializeError::GeneralError("could not encode payload length as u32".into())
        })?;
        self.u32_serializer.serialize(&payload_len, buffer)?;
        buffer.extend(&value.payload);
        Ok(())
    }
}

/// Deserializer for `Transaction`
#[derive(Clone)]
pub struct TransactionDeserializer {
    u64_deserializer: U64VarIntDeserializer,
    payload_len_deserializer: U32VarIntDeserializer,
}

impl TransactionDeserializer {
    /// Creates a new deserializer for `Transaction` with a payload bound
    pub const fn new(max_payload_size: u32) -> Self {
        Self {
            u64_deserializer: U64VarIntDeserializer::new(Included(0), Included(u64::MAX)),
            payload_len_deserializer: U32VarIntDeserializer::new(
                Included(0),
                Included(max_payload_size),
            ),
        }
    }
}

impl Deserializer<Transaction> for TransactionDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Transaction, E> {
        context("Failed Transaction deserialization", |input: &'a [u8]| {
            let (rest, fee) = self.u64_deserializer.deserialize(input)?;
            let (rest, nonce) = self.u64_deserializer.deserialize(rest)?;
            let (rest, payload_len) = self.payload_len_deserializer.deserialize(rest)?;
            let (rest, payload) = take(payload_len as usize)(rest)?;
            Ok((
                rest,
                Transaction {
                    fee,
                    nonce,
                    payload: payload.to_vec(),
                },
            ))
        })(buffer)
    }
}

/// Serializer for `TxId`
#[derive(Default, Clone)]
pub struct TxIdSerializer;

impl TxIdSerializer {
    /// Creates a new serializer for `TxId`
    pub const fn new() -> Self {
        Self
    }
}

impl Serializer<TxId> for TxIdSerializer {
    fn serialize(&self, value: &TxId, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        buffer.extend(value.to_bytes());
        Ok(())
    }
}

/// Deserializer for `TxId`
#[derive(Default, Clone)]
pub struct TxIdDeserializer {
    hash_deserializer: HashDeserializer,
}

impl TxIdDeserializer {
    /// Creates a new deserializer for `TxId`
    pub const fn new() -> Self {
        Self {
            hash_deserializer: HashDeserializer::new(),
        }
    }
}

impl Deserializer<TxId> for TxIdDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], TxId, E> {
        context("Failed TxId deserialization", |input| {
            let (rest, hash) = self.hash_deserializer.deserialize(input)?;
            Ok((rest, TxId(hash)))
        })(buffer)
    }
}
