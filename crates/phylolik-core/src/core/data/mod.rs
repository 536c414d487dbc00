//! Sequence containers: aligned sequences and their compressed site patterns.

pub mod alignment;
pub mod patterns;

pub use alignment::Alignment;
pub use patterns::SitePatterns;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    #[error("Sequence '{name}' already exists in the alignment")]
    DuplicateName { name: String },

    #[error("Sequence '{name}' has {found} site(s), expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid character '{character}' at position {position} in sequence '{name}'")]
    InvalidCharacter {
        name: String,
        character: char,
        position: usize,
    },

    #[error("No sequence named '{name}'")]
    MissingSequence { name: String },

    #[error("Site {site} is out of range for an alignment of {len} site(s)")]
    SiteOutOfRange { site: usize, len: usize },

    #[error("The alignment contains no site")]
    Empty,
}
