// Copyright (c) 2022 MASSA LABS <info@massa.net>

use lattice_hash::{Hash, HashDeserializer, HashSerializer};
use lattice_models::activation::{
    ActivationTx, ActivationTxDeserializer, ActivationTxSerializer, AtxId,
};
use lattice_models::block::{Block, BlockDeserializer, BlockId, BlockSerializer};
use lattice_models::layer::{
    EpochId, EpochIdDeserializer, EpochIdSerializer, LayerId, LayerIdDeserializer,
    LayerIdSerializer,
};
use lattice_models::poet::{PoetProof, PoetProofDeserializer, PoetProofRef, PoetProofSerializer};
use lattice_models::transaction::{
    Transaction, TransactionDeserializer, TransactionSerializer, TxId,
};
use lattice_serialization::{
    Deserializer, SerializeError, Serializer, U32VarIntDeserializer, U32VarIntSerializer,
    U64VarIntDeserializer, U64VarIntSerializer,
};
use nom::error::{context, ContextError, ParseError};
use nom::IResult;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::ops::Bound::Included;

/// Hard bound on the number of ids a single sync message may carry.
pub const MAX_IDS_PER_MESSAGE: u32 = 4096;
/// Hard bound on a serialized transaction payload.
pub const MAX_TX_PAYLOAD_SIZE: u32 = 512 * 1024;
/// Hard bound on a serialized PoET proof.
pub const MAX_POET_PROOF_SIZE: u32 = 1024 * 1024;
/// Hard bound on the per-list edge references of a block on the wire.
pub const MAX_BLOCK_EDGES: u32 = 1024;

/// Requests of the `sync/1.0` sub-protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    /// Ask a peer for a block by content id.
    Block(BlockId),
    /// Ask a peer for the hash of the sorted block-id set of a layer.
    LayerHash(LayerId),
    /// Ask a peer for the block-id list of a layer.
    LayerIds(LayerId),
    /// Ask a peer for a batch of transactions.
    Txs(Vec<TxId>),
    /// Ask a peer for a batch of activations.
    Atxs(Vec<AtxId>),
    /// Ask a peer for a PoET proof by ref.
    Poet(PoetProofRef),
    /// Ask a peer for the activation ids of an epoch.
    EpochAtxIds(EpochId),
    /// Ask a peer for the hash of the sorted activation-id set of an epoch.
    EpochAtxIdsHash(EpochId),
    /// Ask a peer for the consensus input vector of a layer.
    InputVector(LayerId),
}

/// Responses of the `sync/1.0` sub-protocol, tagged like their requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResponse {
    /// A serialized block.
    Block(Block),
    /// Hash of the sorted block-id set of a layer, the empty-layer sentinel
    /// for a zero-block layer.
    LayerHash(Hash),
    /// Block-id list of a layer.
    LayerIds(Vec<BlockId>),
    /// A batch of transactions; peers may answer partially.
    Txs(Vec<Transaction>),
    /// A batch of activations; peers may answer partially.
    Atxs(Vec<ActivationTx>),
    /// A serialized PoET proof.
    Poet(PoetProof),
    /// Activation ids of an epoch.
    EpochAtxIds(Vec<AtxId>),
    /// Hash of the sorted activation-id set of an epoch.
    EpochAtxIdsHash(Hash),
    /// Consensus input vector of a layer.
    InputVector(Vec<BlockId>),
}

#[derive(IntoPrimitive, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
enum MessageTypeId {
    Block = 1u8,
    LayerHash = 2,
    LayerIds = 3,
    Txs = 4,
    Atxs = 5,
    Poet = 6,
    EpochAtxIds = 7,
    EpochAtxIdsHash = 8,
    InputVector = 9,
}

#[derive(IntoPrimitive, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
enum EnvelopeKind {
    Request = 0u8,
    Response = 1,
}

/// One framed message of the request/response sub-protocol. The id correlates
/// a response with the request it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// A request to be served by the remote peer.
    Request {
        /// requester-chosen correlation id
        id: u64,
        /// the request itself
        request: SyncRequest,
    },
    /// The answer to a previously received request. `None` means the peer
    /// does not hold the requested item.
    Response {
        /// correlation id of the request being answered
        id: u64,
        /// the payload, if the peer had one
        response: Option<SyncResponse>,
    },
}

fn serialize_hashes(
    u32_serializer: &U32VarIntSerializer,
    hashes: impl ExactSizeIterator<Item = Hash>,
    buffer: &mut Vec<u8>,
) -> Result<(), SerializeError> {
    let len: u32 = hashes
        .len()
        .try_into()
        .map_err(|_| SerializeError::GeneralError("could not encode id list length as u32".into()))?;
    u32_serializer.serialize(&len, buffer)?;
    for hash in hashes {
        buffer.extend(hash.to_bytes());
    }
    Ok(())
}

/// Serializer for `SyncRequest`
#[derive(Clone)]
pub struct SyncRequestSerializer {
    layer_id_serializer: LayerIdSerializer,
    epoch_id_serializer: EpochIdSerializer,
    u32_serializer: U32VarIntSerializer,
}

impl SyncRequestSerializer {
    /// Creates a new serializer for `SyncRequest`
    pub fn new() -> Self {
        Self {
            layer_id_serializer: LayerIdSerializer::new(),
            epoch_id_serializer: EpochIdSerializer::new(),
            u32_serializer: U32VarIntSerializer::new(),
        }
    }
}

impl Default for SyncRequestSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<SyncRequest> for SyncRequestSerializer {
    fn serialize(&self, value: &SyncRequest, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        match value {
            SyncRequest::Block(id) => {
                buffer.push(MessageTypeId::Block.into());
                buffer.extend(id.to_bytes());
            }
            SyncRequest::LayerHash(layer) => {
                buffer.push(MessageTypeId::LayerHash.into());
                self.layer_id_serializer.serialize(layer, buffer)?;
            }
            SyncRequest::LayerIds(layer) => {
                buffer.push(MessageTypeId::LayerIds.into());
                self.layer_id_serializer.serialize(layer, buffer)?;
            }
            SyncRequest::Txs(ids) => {
                buffer.push(MessageTypeId::Txs.into());
                serialize_hashes(&self.u32_serializer, ids.iter().map(|id| id.0), buffer)?;
            }
            SyncRequest::Atxs(ids) => {
                buffer.push(MessageTypeId::Atxs.into());
                serialize_hashes(&self.u32_serializer, ids.iter().map(|id| id.0), buffer)?;
            }
            SyncRequest::Poet(proof_ref) => {
                buffer.push(MessageTypeId::Poet.into());
                buffer.extend(proof_ref.to_bytes());
            }
            SyncRequest::EpochAtxIds(epoch) => {
                buffer.push(MessageTypeId::EpochAtxIds.into());
                self.epoch_id_serializer.serialize(epoch, buffer)?;
            }
            SyncRequest::EpochAtxIdsHash(epoch) => {
                buffer.push(MessageTypeId::EpochAtxIdsHash.into());
                self.epoch_id_serializer.serialize(epoch, buffer)?;
            }
            SyncRequest::InputVector(layer) => {
                buffer.push(MessageTypeId::InputVector.into());
                self.layer_id_serializer.serialize(layer, buffer)?;
            }
        }
        Ok(())
    }
}

/// Deserializer for `SyncRequest`
#[derive(Clone)]
pub struct SyncRequestDeserializer {
    layer_id_deserializer: LayerIdDeserializer,
    epoch_id_deserializer: EpochIdDeserializer,
    hash_deserializer: HashDeserializer,
    id_count_deserializer: U32VarIntDeserializer,
}

impl SyncRequestDeserializer {
    /// Creates a new deserializer for `SyncRequest`
    pub fn new() -> Self {
        Self {
            layer_id_deserializer: LayerIdDeserializer::new(),
            epoch_id_deserializer: EpochIdDeserializer::new(),
            hash_deserializer: HashDeserializer::new(),
            id_count_deserializer: U32VarIntDeserializer::new(
                Included(0),
                Included(MAX_IDS_PER_MESSAGE),
            ),
        }
    }

    fn deserialize_hash_list<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Vec<Hash>, E> {
        let (mut rest, count) = self.id_count_deserializer.deserialize(buffer)?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (next, hash) = self.hash_deserializer.deserialize(rest)?;
            out.push(hash);
            rest = next;
        }
        Ok((rest, out))
    }
}

impl Default for SyncRequestDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<SyncRequest> for SyncRequestDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], SyncRequest, E> {
        context("Failed SyncRequest deserialization", |input: &'a [u8]| {
            let (rest, raw_id) = nom::number::complete::be_u8(input)?;
            let type_id = MessageTypeId::try_from(raw_id).map_err(|_| {
                nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Fail,
                ))
            })?;
            match type_id {
                MessageTypeId::Block => {
                    let (rest, hash) = self.hash_deserializer.deserialize(rest)?;
                    Ok((rest, SyncRequest::Block(BlockId(hash))))
                }
                MessageTypeId::LayerHash => {
                    let (rest, layer) = self.layer_id_deserializer.deserialize(rest)?;
                    Ok((rest, SyncRequest::LayerHash(layer)))
                }
                MessageTypeId::LayerIds => {
                    let (rest, layer) = self.layer_id_deserializer.deserialize(rest)?;
                    Ok((rest, SyncRequest::LayerIds(layer)))
                }
                MessageTypeId::Txs => {
                    let (rest, hashes) = self.deserialize_hash_list(rest)?;
                    Ok((rest, SyncRequest::Txs(hashes.into_iter().map(TxId).collect())))
                }
                MessageTypeId::Atxs => {
                    let (rest, hashes) = self.deserialize_hash_list(rest)?;
                    Ok((
                        rest,
                        SyncRequest::Atxs(hashes.into_iter().map(AtxId).collect()),
                    ))
                }
                MessageTypeId::Poet => {
                    let (rest, hash) = self.hash_deserializer.deserialize(rest)?;
                    Ok((rest, SyncRequest::Poet(PoetProofRef(hash))))
                }
                MessageTypeId::EpochAtxIds => {
                    let (rest, epoch) = self.epoch_id_deserializer.deserialize(rest)?;
                    Ok((rest, SyncRequest::EpochAtxIds(epoch)))
                }
                MessageTypeId::EpochAtxIdsHash => {
                    let (rest, epoch) = self.epoch_id_deserializer.deserialize(rest)?;
                    Ok((rest, SyncRequest::EpochAtxIdsHash(epoch)))
                }
                MessageTypeId::InputVector => {
                    let (rest, layer) = self.layer_id_deserializer.deserialize(rest)?;
                    Ok((rest, SyncRequest::InputVector(layer)))
                }
            }
        })(buffer)
    }
}

/// Serializer for `SyncResponse`
#[derive(Clone)]
pub struct SyncResponseSerializer {
    block_serializer: BlockSerializer,
    transaction_serializer: TransactionSerializer,
    activation_serializer: ActivationTxSerializer,
    poet_serializer: PoetProofSerializer,
    hash_serializer: HashSerializer,
    u32_serializer: U32VarIntSerializer,
}

impl SyncResponseSerializer {
    /// Creates a new serializer for `SyncResponse`
    pub fn new() -> Self {
        Self {
            block_serializer: BlockSerializer::new(),
            transaction_serializer: TransactionSerializer::new(),
            activation_serializer: ActivationTxSerializer::new(),
            poet_serializer: PoetProofSerializer::new(),
            hash_serializer: HashSerializer::new(),
            u32_serializer: U32VarIntSerializer::new(),
        }
    }

    fn serialize_count(&self, len: usize, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        let len: u32 = len.try_into().map_err(|_| {
            SerializeError::GeneralError("could not encode item count as u32".into())
        })?;
        self.u32_serializer.serialize(&len, buffer)
    }
}

impl Default for SyncResponseSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<SyncResponse> for SyncResponseSerializer {
    fn serialize(&self, value: &SyncResponse, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        match value {
            SyncResponse::Block(block) => {
                buffer.push(MessageTypeId::Block.into());
                self.block_serializer.serialize(block, buffer)?;
            }
            SyncResponse::LayerHash(hash) => {
                buffer.push(MessageTypeId::LayerHash.into());
                self.hash_serializer.serialize(hash, buffer)?;
            }
            SyncResponse::LayerIds(ids) => {
                buffer.push(MessageTypeId::LayerIds.into());
                serialize_hashes(&self.u32_serializer, ids.iter().map(|id| id.0), buffer)?;
            }
            SyncResponse::Txs(txs) => {
                buffer.push(MessageTypeId::Txs.into());
                self.serialize_count(txs.len(), buffer)?;
                for tx in txs {
                    self.transaction_serializer.serialize(tx, buffer)?;
                }
            }
            SyncResponse::Atxs(atxs) => {
                buffer.push(MessageTypeId::Atxs.into());
                self.serialize_count(atxs.len(), buffer)?;
                for atx in atxs {
                    self.activation_serializer.serialize(atx, buffer)?;
                }
            }
            SyncResponse::Poet(proof) => {
                buffer.push(MessageTypeId::Poet.into());
                self.poet_serializer.serialize(proof, buffer)?;
            }
            SyncResponse::EpochAtxIds(ids) => {
                buffer.push(MessageTypeId::EpochAtxIds.into());
                serialize_hashes(&self.u32_serializer, ids.iter().map(|id| id.0), buffer)?;
            }
            SyncResponse::EpochAtxIdsHash(hash) => {
                buffer.push(MessageTypeId::EpochAtxIdsHash.into());
                self.hash_serializer.serialize(hash, buffer)?;
            }
            SyncResponse::InputVector(ids) => {
                buffer.push(MessageTypeId::InputVector.into());
                serialize_hashes(&self.u32_serializer, ids.iter().map(|id| id.0), buffer)?;
            }
        }
        Ok(())
    }
}

/// Deserializer for `SyncResponse`
#[derive(Clone)]
pub struct SyncResponseDeserializer {
    block_deserializer: BlockDeserializer,
    transaction_deserializer: TransactionDeserializer,
    activation_deserializer: ActivationTxDeserializer,
    poet_deserializer: PoetProofDeserializer,
    hash_deserializer: HashDeserializer,
    id_count_deserializer: U32VarIntDeserializer,
}

impl SyncResponseDeserializer {
    /// Creates a new deserializer for `SyncResponse`.
    ///
    /// `max_atxs_per_block` bounds the inline active set a peer can send in a
    /// block, it comes from the `atxs_limit` configuration option.
    pub fn new(max_atxs_per_block: u32) -> Self {
        Self {
            block_deserializer: BlockDeserializer::new(
                MAX_IDS_PER_MESSAGE,
                max_atxs_per_block,
                MAX_BLOCK_EDGES,
            ),
            transaction_deserializer: TransactionDeserializer::new(MAX_TX_PAYLOAD_SIZE),
            activation_deserializer: ActivationTxDeserializer::new(),
            poet_deserializer: PoetProofDeserializer::new(MAX_POET_PROOF_SIZE),
            hash_deserializer: HashDeserializer::new(),
            id_count_deserializer: U32VarIntDeserializer::new(
                Included(0),
                Included(MAX_IDS_PER_MESSAGE),
            ),
        }
    }

    fn deserialize_hash_list<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Vec<Hash>, E> {
        let (mut rest, count) = self.id_count_deserializer.deserialize(buffer)?;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (next, hash) = self.hash_deserializer.deserialize(rest)?;
            out.push(hash);
            rest = next;
        }
        Ok((rest, out))
    }
}

impl Deserializer<SyncResponse> for SyncResponseDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], SyncResponse, E> {
        context("Failed SyncResponse deserialization", |input: &'a [u8]| {
            let (rest, raw_id) = nom::number::complete::be_u8(input)?;
            let type_id = MessageTypeId::try_from(raw_id).map_err(|_| {
                nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Fail,
                ))
            })?;
            match type_id {
                MessageTypeId::Block => {
                    let (rest, block) = self.block_deserializer.deserialize(rest)?;
                    Ok((rest, SyncResponse::Block(block)))
                }
                MessageTypeId::LayerHash => {
                    let (rest, hash) = self.hash_deserializer.deserialize(rest)?;
                    Ok((rest, SyncResponse::LayerHash(hash)))
                }
                MessageTypeId::LayerIds => {
                    let (rest, hashes) = self.deserialize_hash_list(rest)?;
                    Ok((
                        rest,
                        SyncResponse::LayerIds(hashes.into_iter().map(BlockId).collect()),
                    ))
                }
                MessageTypeId::Txs => {
                    let (mut rest, count) = self.id_count_deserializer.deserialize(rest)?;
                    let mut txs = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        let (next, tx) = self.transaction_deserializer.deserialize(rest)?;
                        txs.push(tx);
                        rest = next;
                    }
                    Ok((rest, SyncResponse::Txs(txs)))
                }
                MessageTypeId::Atxs => {
                    let (mut rest, count) = self.id_count_deserializer.deserialize(rest)?;
                    let mut atxs = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        let (next, atx) = self.activation_deserializer.deserialize(rest)?;
                        atxs.push(atx);
                        rest = next;
                    }
                    Ok((rest, SyncResponse::Atxs(atxs)))
                }
                MessageTypeId::Poet => {
                    let (rest, proof) = self.poet_deserializer.deserialize(rest)?;
                    Ok((rest, SyncResponse::Poet(proof)))
                }
                MessageTypeId::EpochAtxIds => {
                    let (rest, hashes) = self.deserialize_hash_list(rest)?;
                    Ok((
                        rest,
                        SyncResponse::EpochAtxIds(hashes.into_iter().map(AtxId).collect()),
                    ))
                }
                MessageTypeId::EpochAtxIdsHash => {
                    let (rest, hash) = self.hash_deserializer.deserialize(rest)?;
                    Ok((rest, SyncResponse::EpochAtxIdsHash(hash)))
                }
                MessageTypeId::InputVector => {
                    let (rest, hashes) = self.deserialize_hash_list(rest)?;
                    Ok((
                        rest,
                        SyncResponse::InputVector(hashes.into_iter().map(BlockId).collect()),
                    ))
                }
            }
        })(buffer)
    }
}

/// Serializer for `Envelope`
#[derive(Clone)]
pub struct EnvelopeSerializer {
    u64_serializer: U64VarIntSerializer,
    request_serializer: SyncRequestSerializer,
    response_serializer: SyncResponseSerializer,
}

impl EnvelopeSerializer {
    /// Creates a new serializer for `Envelope`
    pub fn new() -> Self {
        Self {
            u64_serializer: U64VarIntSerializer::new(),
            request_serializer: SyncRequestSerializer::new(),
            response_serializer: SyncResponseSerializer::new(),
        }
    }
}

impl Default for EnvelopeSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<Envelope> for EnvelopeSerializer {
    fn serialize(&self, value: &Envelope, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        match value {
            Envelope::Request { id, request } => {
                buffer.push(EnvelopeKind::Request.into());
                self.u64_serializer.serialize(id, buffer)?;
                self.request_serializer.serialize(request, buffer)?;
            }
            Envelope::Response { id, response } => {
                buffer.push(EnvelopeKind::Response.into());
                self.u64_serializer.serialize(id, buffer)?;
                match response {
                    Some(response) => {
                        buffer.push(1);
                        self.response_serializer.serialize(response, buffer)?;
                    }
                    None => buffer.push(0),
                }
            }
        }
        Ok(())
    }
}

/// Deserializer for `Envelope`
#[derive(Clone)]
pub struct EnvelopeDeserializer {
    u64_deserializer: U64VarIntDeserializer,
    request_deserializer: SyncRequestDeserializer,
    response_deserializer: SyncResponseDeserializer,
}

impl EnvelopeDeserializer {
    /// Creates a new deserializer for `Envelope`, see
    /// [`SyncResponseDeserializer::new`] for the bound.
    pub fn new(max_atxs_per_block: u32) -> Self {
        Self {
            u64_deserializer: U64VarIntDeserializer::new(Included(0), Included(u64::MAX)),
            request_deserializer: SyncRequestDeserializer::new(),
            response_deserializer: SyncResponseDeserializer::new(max_atxs_per_block),
        }
    }
}

impl Deserializer<Envelope> for EnvelopeDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Envelope, E> {
        context("Failed Envelope deserialization", |input: &'a [u8]| {
            let (rest, raw_kind) = nom::number::complete::be_u8(input)?;
            let kind = EnvelopeKind::try_from(raw_kind).map_err(|_| {
                nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Fail,
                ))
            })?;
            let (rest, id) = self.u64_deserializer.deserialize(rest)?;
            match kind {
                EnvelopeKind::Request => {
                    let (rest, request) = self.request_deserializer.deserialize(rest)?;
                    Ok((rest, Envelope::Request { id, request }))
                }
                EnvelopeKind::Response => {
                    let (rest, present) = nom::number::complete::be_u8(rest)?;
                    if present == 1 {
                        let (rest, response) = self.response_deserializer.deserialize(rest)?;
                        Ok((
                            rest,
                            Envelope::Response {
                                id,
                                response: Some(response),
                            },
                        ))
                    } else {
                        Ok((rest, Envelope::Response { id, response: None }))
                    }
                }
            }
        })(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_serialization::DeserializeError;
    use serial_test::serial;

    fn roundtrip(envelope: Envelope) {
        let mut buffer = Vec::new();
        EnvelopeSerializer::new()
            .serialize(&envelope, &mut buffer)
            .unwrap();
        let (rest, decoded) = EnvelopeDeserializer::new(1024)
            .deserialize::<DeserializeError>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, envelope);
    }

    #[test]
    #[serial]
    fn test_request_roundtrip() {
        roundtrip(Envelope::Request {
            id: 7,
            request: SyncRequest::LayerHash(LayerId(12)),
        });
        roundtrip(Envelope::Request {
            id: 8,
            request: SyncRequest::Txs(vec![
                TxId(Hash::compute_from(b"tx1")),
                TxId(Hash::compute_from(b"tx2")),
            ]),
        });
    }

    #[test]
    #[serial]
    fn test_response_roundtrip() {
        roundtrip(Envelope::Response {
            id: 7,
            response: Some(SyncResponse::LayerIds(vec![BlockId(Hash::compute_from(
                b"block",
            ))])),
        });
        roundtrip(Envelope::Response {
            id: 9,
            response: None,
        });
    }

    #[test]
    #[serial]
    fn test_unknown_tag_is_rejected() {
        // kind byte 0 (request), id 0, tag 42
        let buffer = [0u8, 0, 42];
        assert!(EnvelopeDeserializer::new(1024)
            .deserialize::<DeserializeError>(&buffer)
            .is_err());
    }
}
