//! # wiretap-storage
//!
//! Durable output for the capture pipeline.
//!
//! - [`rotate::RotatingFile`]: size-rotated append-only file with backup
//!   retention and optional gzip
//! - [`jsonl::JsonlWriter`]: bounded-queue JSON-lines writer that also
//!   rotates by UTC day
//! - [`registry::WriterRegistry`]: one writer per (route, kind, identity)
//! - [`resource::ResourceWriter`]: raw static resources on disk
//!
//! Output layout:
//!
//! ```text
//! <base>/<YYYY-MM-DD>/<route>/<http|websocket>/<identity>.jsonl
//! <base>/<YYYY-MM-DD>/<route>/resources/<kind>/<filename>
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod jsonl;
pub mod registry;
pub mod resource;
pub mod rotate;

pub use errors::StorageError;
pub use jsonl::{JsonlWriter, WriterConfig};
pub use registry::{WriterKey, WriterRegistry};
pub use resource::{ResourceWriter, filename_from_url, static_resource_dir};
pub use rotate::{RotatingFile, RotationPolicy};
