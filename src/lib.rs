//! # pe-forge: parse, inspect, edit, and rebuild Portable Executables.
//!
//! `pe-forge` reads whole PE32 and PE32+ images from bytes, exposes their
//! headers, sections, and data directories as native structs, lets you edit
//! them, and emits a loadable image back out.
//! - Headers and directory records are plain documented structs
//! - Every data directory has a parser and, where it makes sense, a rebuilder
//! - Address translation (RVA / VA / file offset) lives in one place
//!
//! ## Examples
//! ```no_run
//! # use std::{fs, io};
//! use pe_forge::pe::parse_pe;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Read the binary from a file
//! let binary = fs::read("some.dll")?;
//!
//! // Parse it!
//! match parse_pe(binary.as_slice())? {
//!     pe_forge::pe::PeFile::Pe32(image) => println!("{}", image),
//!     pe_forge::pe::PeFile::Pe64(image) => println!("{}", image),
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// PE32/PE32+ width dispatch
pub mod arch;
/// Bound import directory definitions and parsing
pub mod bound_import;
/// COFF file header definitions and helper functions
pub mod coff;
/// Debug directory definitions and advanced payload decoding
pub mod debug;
/// DOS header and "Rich" overlay decoding
pub mod dos;
/// .NET (COR20) header definitions
pub mod dotnet;
/// Shannon entropy over sections and images
pub mod entropy;
/// Failure taxonomy shared by the whole crate
pub mod error;
/// Exception directory definitions and unwind-info decoding (PE32+)
pub mod exception;
/// Export directory codec
pub mod export;
/// Import directory codec
pub mod import;
/// Load configuration directory codec
pub mod load_config;
/// Optional header definitions and helper functions
pub mod optional;
/// Image container: parsing, address model, section table, rebuild
pub mod pe;
/// Base relocation codec and image rebasing
pub mod relocation;
/// Resource tree model and codec
pub mod resource;
/// Resource editing: add/remove resources, icons, cursors, bitmaps
pub mod resource_manager;
/// Format-aware resource reading: bitmaps, icons, cursors, strings, messages
pub mod resource_viewer;
/// Byte-level primitives shared by every codec
pub mod scribe;
/// Section header definitions and section data views
pub mod section;
/// TLS directory codec
pub mod tls;
/// Version-information block codec and editing
pub mod version_info;

pub use error::{Error, Result};
