// Copyright (c) 2022 MASSA LABS <info@massa.net>

use displaydoc::Display;
use thiserror::Error;

/// Hash error
#[non_exhaustive]
#[derive(Display, Error, Debug, Clone)]
pub enum LatticeHashError {
    /// Parsing error: {0}
    ParsingError(String),
}
