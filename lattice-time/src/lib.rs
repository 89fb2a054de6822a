// Copyright (c) 2022 MASSA LABS <info@massa.net>
//! Unsigned millisecond time management

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

mod error;
pub use error::TimeError;
use lattice_serialization::{Deserializer, Serializer, U64VarIntDeserializer, U64VarIntSerializer};
use nom::error::{context, ContextError, ParseError};
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time structure used everywhere.
/// Milliseconds since 01/01/1970.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LatticeTime(u64);

/// Serializer for `LatticeTime`
pub struct LatticeTimeSerializer {
    u64_serializer: U64VarIntSerializer,
}

impl LatticeTimeSerializer {
    /// Creates a `LatticeTimeSerializer`
    pub fn new() -> Self {
        Self {
            u64_serializer: U64VarIntSerializer::new(),
        }
    }
}

impl Default for LatticeTimeSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<LatticeTime> for LatticeTimeSerializer {
    /// ```
    /// use lattice_serialization::Serializer;
    /// use lattice_time::{LatticeTime, LatticeTimeSerializer};
    ///
    /// let time: LatticeTime = LatticeTime::from_millis(30);
    /// let mut serialized = Vec::new();
    /// let serializer = LatticeTimeSerializer::new();
    /// serializer.serialize(&time, &mut serialized).unwrap();
    /// ```
    fn serialize(
        &self,
        value: &LatticeTime,
        buffer: &mut Vec<u8>,
    ) -> Result<(), lattice_serialization::SerializeError> {
        self.u64_serializer.serialize(&value.to_millis(), buffer)
    }
}

/// Deserializer for `LatticeTime`
pub struct LatticeTimeDeserializer {
    u64_deserializer: U64VarIntDeserializer,
}

impl LatticeTimeDeserializer {
    /// Creates a `LatticeTimeDeserializer` accepting only the given range
    pub fn new(range: (Bound<LatticeTime>, Bound<LatticeTime>)) -> Self {
        let to_millis_bound = |bound: Bound<LatticeTime>| match bound {
            Bound::Included(time) => Bound::Included(time.to_millis()),
            Bound::Excluded(time) => Bound::Excluded(time.to_millis()),
            Bound::Unbounded => Bound::Unbounded,
        };
        Self {
            u64_deserializer: U64VarIntDeserializer::new(
                to_millis_bound(range.0),
                to_millis_bound(range.1),
            ),
        }
    }
}

impl Deserializer<LatticeTime> for LatticeTimeDeserializer {
    /// ```
    /// use std::ops::Bound::Included;
    /// use lattice_serialization::{Serializer, Deserializer, DeserializeError};
    /// use lattice_time::{LatticeTime, LatticeTimeSerializer, LatticeTimeDeserializer};
    ///
    /// let time: LatticeTime = LatticeTime::from_millis(30);
    /// let mut serialized = Vec::new();
    /// let serializer = LatticeTimeSerializer::new();
    /// let deserializer = LatticeTimeDeserializer::new((Included(LatticeTime::from_millis(0)), Included(LatticeTime::from_millis(u64::MAX))));
    /// serializer.serialize(&time, &mut serialized).unwrap();
    /// let (rest, time_deser) = deserializer.deserialize::<DeserializeError>(&serialized).unwrap();
    /// assert!(rest.is_empty());
    /// assert_eq!(time, time_deser);
    /// ```
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], LatticeTime, E> {
        context("Failed LatticeTime deserialization", |input| {
            self.u64_deserializer
                .deserialize(input)
                .map(|(rest, res)| (rest, LatticeTime::from_millis(res)))
        })(buffer)
    }
}

impl fmt::Display for LatticeTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_millis())
    }
}

impl TryFrom<Duration> for LatticeTime {
    type Error = TimeError;

    /// Conversion from `std::time::Duration`.
    /// ```
    /// # use std::time::Duration;
    /// # use lattice_time::*;
    /// let duration: Duration = Duration::from_millis(42);
    /// let time : LatticeTime = LatticeTime::from_millis(42);
    /// assert_eq!(time, LatticeTime::try_from(duration).unwrap());
    /// ```
    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        Ok(LatticeTime(
            value
                .as_millis()
                .try_into()
                .map_err(|_| TimeError::ConversionError)?,
        ))
    }
}

impl From<LatticeTime> for Duration {
    fn from(value: LatticeTime) -> Self {
        value.to_duration()
    }
}

impl FromStr for LatticeTime {
    type Err = crate::TimeError;

    /// Conversion from `&str`.
    ///
    /// ```
    /// # use lattice_time::*;
    /// # use std::str::FromStr;
    /// let duration: &str = "42";
    /// let time : LatticeTime = LatticeTime::from_millis(42);
    ///
    /// assert_eq!(time, LatticeTime::from_str(duration).unwrap());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(LatticeTime(
            u64::from_str(s).map_err(|_| Self::Err::ConversionError)?,
        ))
    }
}

impl LatticeTime {
    /// Conversion from `u64`, representing a timestamp in milliseconds.
    /// ```
    /// # use lattice_time::*;
    /// let time : LatticeTime = LatticeTime::from_millis(42);
    /// ```
    pub const fn from_millis(value: u64) -> Self {
        LatticeTime(value)
    }

    /// Smallest time interval
    pub const EPSILON: LatticeTime = LatticeTime(1);

    /// Gets the current UNIX timestamp (resolution: milliseconds).
    pub fn now() -> Result<Self, TimeError> {
        let now: u64 = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| TimeError::TimeOverflowError)?
            .as_millis()
            .try_into()
            .map_err(|_| TimeError::TimeOverflowError)?;
        Ok(LatticeTime(now))
    }

    /// Conversion to `std::time::Duration`.
    /// ```
    /// # use std::time::Duration;
    /// # use lattice_time::*;
    /// let duration: Duration = Duration::from_millis(42);
    /// let time : LatticeTime = LatticeTime::from_millis(42);
    /// let res: Duration = time.to_duration();
    /// assert_eq!(res, duration);
    /// ```
    pub fn to_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }

    /// Conversion to `u64`, representing milliseconds.
    /// ```
    /// # use lattice_time::*;
    /// let time : LatticeTime = LatticeTime::from_millis(42);
    /// let res: u64 = time.to_millis();
    /// assert_eq!(res, 42);
    /// ```
    pub const fn to_millis(&self) -> u64 {
        self.0
    }

    /// Builds the `std::time::Instant` the timestamp is expected to happen
    /// at, for timer arming purposes.
    pub fn estimate_instant(self) -> Result<Instant, TimeError> {
        let (cur_timestamp, cur_instant) = (LatticeTime::now()?, Instant::now());
        if self >= cur_timestamp {
            cur_instant.checked_add(self.saturating_sub(cur_timestamp).to_duration())
        } else {
            cur_instant.checked_sub(cur_timestamp.saturating_sub(self).to_duration())
        }
        .ok_or(TimeError::TimeOverflowError)
    }

    /// ```
    /// # use lattice_time::*;
    /// let time_1 : LatticeTime = LatticeTime::from_millis(42);
    /// let time_2 : LatticeTime = LatticeTime::from_millis(7);
    /// let res : LatticeTime = time_1.saturating_sub(time_2);
    /// assert_eq!(res, LatticeTime::from_millis(42-7))
    /// ```
    #[must_use]
    pub fn saturating_sub(self, t: LatticeTime) -> Self {
        LatticeTime(self.0.saturating_sub(t.0))
    }

    /// ```
    /// # use lattice_time::*;
    /// let time_1 : LatticeTime = LatticeTime::from_millis(42);
    /// let time_2 : LatticeTime = LatticeTime::from_millis(7);
    /// let res : LatticeTime = time_1.saturating_add(time_2);
    /// assert_eq!(res, LatticeTime::from_millis(42+7))
    /// ```
    #[must_use]
    pub fn saturating_add(self, t: LatticeTime) -> Self {
        LatticeTime(self.0.saturating_add(t.0))
    }

    /// ```
    /// # use lattice_time::*;
    /// let time_1 : LatticeTime = LatticeTime::from_millis(42);
    /// let time_2 : LatticeTime = LatticeTime::from_millis(7);
    /// let res : LatticeTime = time_1.checked_sub(time_2).unwrap();
    /// assert_eq!(res, LatticeTime::from_millis(42-7))
    /// ```
    pub fn checked_sub(self, t: LatticeTime) -> Result<Self, TimeError> {
        self.0
            .checked_sub(t.0)
            .ok_or_else(|| TimeError::CheckedOperationError("subtraction error".to_string()))
            .map(LatticeTime)
    }

    /// ```
    /// # use lattice_time::*;
    /// let time_1 : LatticeTime = LatticeTime::from_millis(42);
    /// let time_2 : LatticeTime = LatticeTime::from_millis(7);
    /// let res : LatticeTime = time_1.checked_add(time_2).unwrap();
    /// assert_eq!(res, LatticeTime::from_millis(42+7))
    /// ```
    pub fn checked_add(self, t: LatticeTime) -> Result<Self, TimeError> {
        self.0
            .checked_add(t.0)
            .ok_or_else(|| TimeError::CheckedOperationError("addition error".to_string()))
            .map(LatticeTime)
    }

    /// ```
    /// # use lattice_time::*;
    /// let time_1 : LatticeTime = LatticeTime::from_millis(42);
    /// let res : LatticeTime = time_1.checked_mul(7).unwrap();
    /// assert_eq!(res, LatticeTime::from_millis(42*7))
    /// ```
    pub fn checked_mul(self, n: u64) -> Result<Self, TimeError> {
        self.0
            .checked_mul(n)
            .ok_or_else(|| TimeError::CheckedOperationError("multiplication error".to_string()))
            .map(LatticeTime)
    }

    /// ```
    /// # use lattice_time::*;
    /// let time_1 : LatticeTime = LatticeTime::from_millis(42);
    /// let res : LatticeTime = time_1.saturating_mul(7);
    /// assert_eq!(res, LatticeTime::from_millis(42*7))
    /// ```
    #[must_use]
    pub const fn saturating_mul(self, n: u64) -> LatticeTime {
        LatticeTime(self.0.saturating_mul(n))
    }

    /// ```
    /// # use lattice_time::*;
    ///
    /// let time1 = LatticeTime::from_millis(42);
    /// let time2 = LatticeTime::from_millis(84);
    ///
    /// assert_eq!(time1.abs_diff(time2), LatticeTime::from_millis(42));
    /// assert_eq!(time2.abs_diff(time1), LatticeTime::from_millis(42));
    /// ```
    pub fn abs_diff(&self, t: LatticeTime) -> LatticeTime {
        LatticeTime(self.0.abs_diff(t.0))
    }

    /// Get the maximum `LatticeTime` value
    pub fn max() -> LatticeTime {
        LatticeTime::from_millis(u64::MAX)
    }
}
