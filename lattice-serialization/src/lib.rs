// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Binary serialization traits and basic varint serializers used by every
//! wire-visible type of the node.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

use std::{
    collections::VecDeque,
    fmt::{Debug, Display},
};

use displaydoc::Display;
use nom::{
    error::{ContextError, ParseError},
    IResult,
};
use thiserror::Error;

/// Serialization error
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum SerializeError {
    /// Number {0} is too big to be serialized
    NumberTooBig(String),
    /// General error {0}
    GeneralError(String),
}

/// Deserialization error keeping the nom context chain
#[derive(Clone, Error)]
pub struct DeserializeError<'a> {
    errors: VecDeque<(&'a [u8], String)>,
}

impl<'a> ContextError<&'a [u8]> for DeserializeError<'a> {
    fn add_context(input: &'a [u8], ctx: &'static str, mut other: Self) -> Self {
        other.errors.push_front((input, ctx.to_string()));
        other
    }
}

impl<'a> ParseError<&'a [u8]> for DeserializeError<'a> {
    fn append(input: &'a [u8], kind: nom::error::ErrorKind, mut other: Self) -> Self {
        other
            .errors
            .push_front((input, kind.description().to_string()));
        other
    }
    fn from_error_kind(input: &'a [u8], kind: nom::error::ErrorKind) -> Self {
        let mut errors = VecDeque::new();
        errors.push_front((input, kind.description().to_string()));
        Self { errors }
    }
    fn from_char(input: &'a [u8], _: char) -> Self {
        Self::from_error_kind(input, nom::error::ErrorKind::Char)
    }
    fn or(self, other: Self) -> Self {
        other
    }
}

impl<'a> Display for DeserializeError<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for error in &self.errors {
            write!(f, "{} / ", error.1)?;
        }
        Ok(())
    }
}

impl<'a> Debug for DeserializeError<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut last_input = None;
        for error in &self.errors {
            write!(f, "{} / ", error.1)?;
            last_input = Some(error.0);
        }
        if let Some(last_input) = last_input {
            writeln!(f, "Input: {:?}", last_input)?;
        }
        Ok(())
    }
}

/// Trait implemented by the dedicated serializer object of each type.
///
/// A serializer is constructed once with its constraints and then reused for
/// every value, appending the binary form to a caller-provided buffer.
pub trait Serializer<T> {
    /// Serialize `value`, appending its binary form to `buffer`.
    fn serialize(&self, value: &T, buffer: &mut Vec<u8>) -> Result<(), SerializeError>;
}

/// Trait implemented by the dedicated deserializer object of each type.
///
/// A deserializer is constructed once with its bounds (ranges, maximum
/// collection lengths) and then reused for every buffer.
pub trait Deserializer<T> {
    /// Deserialize a value of type `T` from the start of `buffer`.
    ///
    /// Returns the remaining bytes alongside the decoded value, following the
    /// nom convention.
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], T, E>;
}

macro_rules! gen_varint {
    ($($type:ident, $s:ident, $bs:ident, $ds:ident, $d:expr);*) => {
        use std::ops::{Bound, RangeBounds};
        use nom::error::context;
        use unsigned_varint::nom as unsigned_nom;
        $(
            use unsigned_varint::encode::{$type, $bs};
            #[doc = " Varint serializer for "]
            #[doc = $d]
            #[derive(Clone)]
            pub struct $s;

            impl $s {
                #[doc = "Creates a varint serializer for "]
                #[doc = $d]
                #[allow(dead_code)]
                pub const fn new() -> Self {
                    Self
                }
            }

            impl Default for $s {
                fn default() -> $s {
                    $s::new()
                }
            }

            impl Serializer<$type> for $s {
                fn serialize(&self, value: &$type, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
                    buffer.extend_from_slice($type(*value, &mut $bs()));
                    Ok(())
                }
            }

            #[doc = " Range-checked varint deserializer for "]
            #[doc = $d]
            #[derive(Clone)]
            pub struct $ds {
                range: (Bound<$type>, Bound<$type>)
            }

            impl $ds {
                #[doc = "Creates a varint deserializer for "]
                #[doc = $d]
                #[doc = " accepting only the given range."]
                #[allow(dead_code)]
                pub const fn new(min: Bound<$type>, max: Bound<$type>) -> Self {
                    Self {
                        range: (min, max)
                    }
                }
            }

            impl Deserializer<$type> for $ds {
                fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(&self, buffer: &'a [u8]) -> IResult<&'a [u8], $type, E> {
                    context(concat!("Failed ", stringify!($type), " deserialization"), |input: &'a [u8]| {
                        let (rest, value) = unsigned_nom::$type(input).map_err(|_| nom::Err::Error(ParseError::from_error_kind(input, nom::error::ErrorKind::Fail)))?;
                        if !self.range.contains(&value) {
                            return Err(nom::Err::Error(ParseError::from_error_kind(input, nom::error::ErrorKind::Fail)));
                        }
                        Ok((rest, value))
                    })(buffer)
                }
            }
        )*
    };
}

gen_varint! {
u32, U32VarIntSerializer, u32_buffer, U32VarIntDeserializer, "`u32`";
u64, U64VarIntSerializer, u64_buffer, U64VarIntDeserializer, "`u64`"
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::ops::Bound::Included;

    #[test]
    #[serial]
    fn test_u64_varint_roundtrip() {
        let serializer = U64VarIntSerializer::new();
        let deserializer = U64VarIntDeserializer::new(Included(0), Included(u64::MAX));
        for value in [0u64, 1, 127, 128, 300_000, u64::MAX] {
            let mut buffer = Vec::new();
            serializer.serialize(&value, &mut buffer).unwrap();
            let (rest, decoded) = deserializer
                .deserialize::<DeserializeError>(&buffer)
                .unwrap();
            assert!(rest.is_empty());
            assert_eq!(decoded, value);
        }
    }

    #[test]
    #[serial]
    fn test_u32_varint_out_of_range() {
        let serializer = U32VarIntSerializer::new();
        let deserializer = U32VarIntDeserializer::new(Included(0), Included(100));
        let mut buffer = Vec::new();
        serializer.serialize(&101, &mut buffer).unwrap();
        assert!(deserializer
            .deserialize::<DeserializeError>(&buffer)
            .is_err());
    }
}
