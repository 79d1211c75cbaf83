//! Error types for the descry-core library.
//!
//! This module provides comprehensive error handling using the `thiserror` crate,
//! with detailed error variants for different failure modes.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for descry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all descry operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Path traversal attempt detected (security error)
    #[error("path traversal detected: '{path}' would escape output directory")]
    PathTraversal {
        /// The suspicious path
        path: PathBuf,
    },

    /// Invalid protobuf wire format
    #[error("invalid protobuf wire format at offset {offset}: {details}")]
    InvalidWireFormat {
        /// Byte offset where the error occurred
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// Failed to decode varint
    #[error("failed to decode varint at offset {offset}: buffer too small or invalid encoding")]
    VarintDecode {
        /// Byte offset where the error occurred
        offset: usize,
    },

    /// Failed to parse an embedded FileDescriptorProto
    #[error("failed to parse FileDescriptorProto at offset {offset}: {source}")]
    DescriptorParse {
        /// Byte offset of the candidate record
        offset: usize,
        /// Underlying prost decode error
        #[source]
        source: prost::DecodeError,
    },

    /// A descriptor path was registered twice in the same pool
    #[error("duplicate descriptor path '{path}' in pool")]
    DuplicatePath {
        /// The conflicting path
        path: String,
    },

    /// A descriptor path was referenced but never registered
    #[error("descriptor path '{path}' is not present in the pool")]
    MissingRecord {
        /// The unresolved path
        path: String,
    },

    /// Invalid field number in descriptor
    #[error("invalid field number {number}: must be between 1 and {max}")]
    InvalidFieldNumber {
        /// The invalid field number
        number: u32,
        /// Maximum valid field number
        max: u32,
    },

    /// Unsupported proto syntax version
    #[error("unsupported proto syntax: '{syntax}'")]
    UnsupportedSyntax {
        /// The unsupported syntax string
        syntax: String,
    },

    /// The resolver could not reach a stable, collision-free layout
    #[error("unresolved naming conflict involving: {}", paths.join(", "))]
    UnresolvedConflict {
        /// Descriptor paths still in conflict when resolution stopped
        paths: Vec<String>,
    },
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new path traversal error
    pub fn path_traversal(path: impl Into<PathBuf>) -> Self {
        Self::PathTraversal { path: path.into() }
    }

    /// Creates a new wire format error
    pub fn invalid_wire_format(offset: usize, details: impl Into<String>) -> Self {
        Self::InvalidWireFormat {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new varint decode error
    pub fn varint_decode(offset: usize) -> Self {
        Self::VarintDecode { offset }
    }

    /// Creates a new descriptor parse error
    pub fn descriptor_parse(offset: usize, source: prost::DecodeError) -> Self {
        Self::DescriptorParse { offset, source }
    }

    /// Creates a new duplicate path error
    pub fn duplicate_path(path: impl Into<String>) -> Self {
        Self::DuplicatePath { path: path.into() }
    }

    /// Creates a new missing record error
    pub fn missing_record(path: impl Into<String>) -> Self {
        Self::MissingRecord { path: path.into() }
    }

    /// Creates a new unresolved conflict error
    pub fn unresolved_conflict(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::UnresolvedConflict {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if this is a recoverable error that should be skipped
    ///
    /// Recoverable errors affect a single candidate occurrence during a scan;
    /// the surrounding buffer can still yield further descriptors.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DescriptorParse { .. } | Self::InvalidWireFormat { .. } | Self::VarintDecode { .. }
        )
    }
}
