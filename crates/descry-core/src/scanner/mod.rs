//! Locating serialized `FileDescriptorProto` records in arbitrary binaries.
//!
//! Compilers for most protobuf-enabled runtimes embed the serialized
//! descriptor of every compiled `.proto` file somewhere in the output
//! artifact. This module finds those records without any knowledge of
//! the surrounding container format.
//!
//! ## Algorithm Overview
//!
//! 1. Search for the `.proto` byte sequence (extended to `.protodevel`
//!    when that suffix follows); every descriptor starts with its own
//!    file name, so the marker is cheap and high-recall
//! 2. Backtrack to the most recent `0x0A` byte (field 1, wire type LEN)
//!    within a bounded window and verify that its length prefix lands
//!    exactly at the end of the marker
//! 3. Walk forward over the tag bytes that may legally follow the name
//!    field, skipping each payload by wire type; the allow-list narrows
//!    as it goes because field numbers in descriptors never decrease
//! 4. Reject candidates that recognize zero subsequent fields (bare
//!    string constants that merely end in `.proto`)
//! 5. Parse the delimited span as a `FileDescriptorProto`; parse
//!    failures are reported per occurrence and never abort the scan

mod wire;

use std::ops::Range;

use prost::Message;
use prost_types::FileDescriptorProto;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::pool::SchemaFile;

pub use wire::{decode_varint, payload_len, WireType};

/// Marker every descriptor's file name ends with
const PROTO_MARKER: &[u8] = b".proto";

/// Legacy extended marker suffix (`.protodevel`)
const DEVEL_SUFFIX: &[u8] = b"devel";

/// Tag of the name field: field 1, wire type 2 (LEN)
const NAME_TAG: u8 = 0x0A;

/// How far behind the marker the record start may be
const BACKTRACK_WINDOW: usize = 1024;

/// Tag bytes that may follow the name field of a `FileDescriptorProto`,
/// in ascending field number order: package, dependency, message_type,
/// enum_type, service, extension, options, source_code_info,
/// public_dependency, weak_dependency, syntax
const SUBSEQUENT_TAGS: [u8; 11] = [
    0x12, 0x1A, 0x22, 0x2A, 0x32, 0x3A, 0x42, 0x4A, 0x50, 0x58, 0x62,
];

/// A descriptor recovered from a binary scan.
#[derive(Debug, Clone)]
pub struct LocatedFile {
    /// The parsed descriptor
    pub file: FileDescriptorProto,
    /// Byte range in the scanned input the descriptor occupied
    pub range: Range<usize>,
}

impl LocatedFile {
    /// Returns the descriptor's declared file name.
    pub fn name(&self) -> &str {
        self.file.name()
    }

    /// Converts the descriptor into a renderable schema and pool.
    pub fn to_schema(&self) -> Result<SchemaFile> {
        crate::pool::convert::from_file_descriptor(&self.file)
    }
}

/// Configuration for the locator
#[derive(Debug, Clone)]
pub struct LocatorConfig {
    /// Maximum number of descriptors to find (0 = unlimited)
    pub max_results: usize,
    /// Minimum size for a valid descriptor (filters noise)
    pub min_descriptor_size: usize,
    /// Maximum size for a valid descriptor (filters garbage)
    pub max_descriptor_size: usize,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            max_results: 0,
            min_descriptor_size: 10,
            max_descriptor_size: 10 * 1024 * 1024, // 10 MB
        }
    }
}

impl LocatorConfig {
    /// Creates a new locator config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of results to return
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Sets the minimum descriptor size filter
    pub fn min_descriptor_size(mut self, size: usize) -> Self {
        self.min_descriptor_size = size;
        self
    }

    /// Sets the maximum descriptor size filter
    pub fn max_descriptor_size(mut self, size: usize) -> Self {
        self.max_descriptor_size = size;
        self
    }
}

/// Finds embedded descriptors in raw byte buffers.
#[derive(Debug, Clone, Default)]
pub struct Locator {
    config: LocatorConfig,
}

impl Locator {
    /// Creates a new locator with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new locator with custom configuration
    pub fn with_config(config: LocatorConfig) -> Self {
        Self { config }
    }

    /// Scans `data` lazily, yielding descriptors as they are found.
    ///
    /// Occurrences that pass all structural checks but fail to parse are
    /// yielded as errors; the iterator remains usable afterwards and
    /// resumes after the bad span.
    pub fn locate<'a>(&self, data: &'a [u8]) -> Locations<'a> {
        debug!("scanning {} bytes for embedded descriptors", data.len());
        Locations {
            data,
            config: self.config.clone(),
            cursor: 0,
            found: 0,
        }
    }
}

/// Lazy iterator over descriptors found in a byte buffer.
#[derive(Debug)]
pub struct Locations<'a> {
    data: &'a [u8],
    config: LocatorConfig,
    cursor: usize,
    found: usize,
}

impl Iterator for Locations<'_> {
    type Item = Result<LocatedFile>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.config.max_results > 0 && self.found >= self.config.max_results {
                return None;
            }

            let marker = find_subsequence(&self.data[self.cursor..], PROTO_MARKER)?;
            let marker_pos = self.cursor + marker;
            let mut name_end = marker_pos + PROTO_MARKER.len();
            if self.data[name_end..].starts_with(DEVEL_SUFFIX) {
                name_end += DEVEL_SUFFIX.len();
            }
            trace!("candidate marker at {}", marker_pos);

            let Some(start) = find_record_start(self.data, name_end) else {
                self.cursor = name_end;
                continue;
            };

            let (span_end, recognized) = walk_subsequent_fields(self.data, name_end);
            if recognized == 0 {
                // a string constant that merely ends in ".proto"
                self.cursor = name_end;
                continue;
            }

            // resume strictly after the consumed span, found or not
            self.cursor = span_end;

            let length = span_end - start;
            if length < self.config.min_descriptor_size
                || length > self.config.max_descriptor_size
            {
                trace!("candidate at {} filtered by size ({} bytes)", start, length);
                continue;
            }

            match FileDescriptorProto::decode(&self.data[start..span_end]) {
                Ok(file) => {
                    self.found += 1;
                    debug!(
                        "located descriptor '{}' at {}..{} ({} bytes)",
                        file.name(),
                        start,
                        span_end,
                        length
                    );
                    return Some(Ok(LocatedFile {
                        file,
                        range: start..span_end,
                    }));
                }
                Err(source) => return Some(Err(Error::descriptor_parse(start, source))),
            }
        }
    }
}

/// Find the start of a candidate record by backtracking from the marker end.
///
/// The record starts `0x0A [varint length] [file name]`, so a start is
/// coherent only when tag byte + length prefix + name land exactly at
/// `name_end`.
fn find_record_start(data: &[u8], name_end: usize) -> Option<usize> {
    let window_start = name_end.saturating_sub(BACKTRACK_WINDOW);
    let window = &data[window_start..name_end];
    let mut start = window_start + window.iter().rposition(|&b| b == NAME_TAG)?;

    // A 10-character file name has a length byte equal to the tag byte,
    // and the backward search lands on the length byte instead
    if start > 0 && data[start - 1] == NAME_TAG && name_end - start - 1 == NAME_TAG as usize {
        start -= 1;
    }

    let (length, varint_len) = decode_varint(&data[start + 1..]).ok()?;
    let value_end = start + 1 + varint_len;
    if value_end > name_end || name_end - value_end != length as usize {
        return None;
    }
    Some(start)
}

/// Walk fields that may follow the name field, returning the end of the
/// consumed span and how many fields were recognized.
fn walk_subsequent_fields(data: &[u8], from: usize) -> (usize, usize) {
    let mut tags: &[u8] = &SUBSEQUENT_TAGS;
    let mut cursor = from;
    let mut recognized = 0;

    while cursor < data.len() {
        let Some(index) = tags.iter().position(|&t| t == data[cursor]) else {
            break;
        };
        // field numbers never decrease within a record
        tags = &tags[index..];

        let Ok(wire_type) = WireType::try_from(data[cursor] & 0x07) else {
            break;
        };
        let Ok(len) = payload_len(&data[cursor + 1..], wire_type) else {
            break;
        };
        cursor += 1 + len;
        recognized += 1;
    }

    (cursor, recognized)
}

/// Find a subsequence within a byte slice
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Scan a file for embedded protobuf descriptors.
///
/// This is a convenience function that reads the file, scans it with
/// the default configuration, and drops undecodable candidates.
pub fn locate_file(path: impl AsRef<std::path::Path>) -> Result<Vec<LocatedFile>> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;

    let mut results = Vec::new();
    for located in Locator::new().locate(&data) {
        match located {
            Ok(found) => results.push(found),
            Err(e) if e.is_recoverable() => trace!("skipping undecodable candidate: {}", e),
            Err(e) => return Err(e),
        }
    }
    Ok(results)
}
