// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::layout::Key;

/// Represents errors that can occur in the cuckoo table
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The allocator strategy returned storage that is not aligned to a
    /// cache line
    UnalignedAllocation,

    /// The bucket array allocation failed
    Alloc(std::io::Error),

    /// The requested capacity overflows the bucket array layout
    CapacityOverflow,

    /// Tried to insert a key that is already present
    KeyAlreadyPresent(Key),

    /// The displacement walk exceeded its depth budget; the table should be
    /// treated as saturated for this key
    Saturated(Key),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CuckooTableError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Alloc(e) => Some(e),
            Self::UnalignedAllocation
            | Self::CapacityOverflow
            | Self::KeyAlreadyPresent(_)
            | Self::Saturated(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Alloc(value)
    }
}

/// Table result
pub type Result<T> = std::result::Result<T, Error>;
