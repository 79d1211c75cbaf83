//! # descry-core
//!
//! A library for recovering Protocol Buffer schemas from artifacts that
//! no longer carry `.proto` source: compiled binaries, decompiled
//! bytecode, and captured traffic.
//!
//! This crate provides the core functionality for:
//! - Locating serialized file descriptors embedded in arbitrary binaries
//! - Collecting flat, partially-inconsistent schema fragments into a pool
//! - Reconstructing nesting, file boundaries, and conflict-free names
//! - Rendering deterministic, compilable `.proto` source text
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`scanner`]: Binary scanning for embedded file descriptors
//! - [`pool`]: The flat descriptor pool and reference table
//! - [`resolver`]: Nesting reconstruction and conflict resolution
//! - [`render`]: `.proto` source text rendering
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use descry_core::{Locator, ProtoRenderer};
//! use std::fs;
//!
//! // Read a binary file
//! let data = fs::read("./target/release/my_app")?;
//!
//! // Scan for embedded descriptors and render each one
//! let locator = Locator::new();
//! let renderer = ProtoRenderer::new();
//! for located in locator.locate(&data) {
//!     let schema = located?.to_schema()?;
//!     println!("{}", renderer.render_file(&schema.file, &schema.pool)?);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Front ends that produce flat fragments instead of complete
//! descriptors go through [`Resolver`], which rebuilds the nesting
//! tree before rendering.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod error;
pub mod pool;
pub mod render;
pub mod resolver;
pub mod scanner;

// Re-export primary types for convenience
pub use error::{Error, Result};
pub use pool::{DescriptorPool, DescriptorRecord, FileSchema, ReferrerTable, SchemaFile};
pub use render::{ProtoRenderer, RenderConfig};
pub use resolver::{ResolvedSet, Resolver};
pub use scanner::{LocatedFile, Locations, Locator, LocatorConfig};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum valid protobuf field number (2^29 - 1)
/// Used for `reserved X to max` ranges
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;
