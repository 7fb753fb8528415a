//! # trellis-unit
//!
//! Compiled unit format and unit sources for the Trellis loader.
//!
//! This crate provides:
//! - The `.tcu` compiled unit format: a marker-carrying description of one
//!   code unit, resolved and transformed by the loader before definition
//! - The `UnitSource` capability for locating named resources and loading
//!   raw unit bytes across a storage backend
//! - Pack stores over directory trees and single-file `.tpk` bundle
//!   archives, including bundles nested inside other bundles
//!
//! ## Unit structure
//!
//! A compiled unit file starts with the magic bytes `TCU\x01` followed by a
//! JSON body describing the unit: its qualified name, its markers, and its
//! function and field members with their own markers. Marker payloads are
//! ordered key/value lists over a closed tagged value type, so every payload
//! consumer can match exhaustively.

pub mod bundle;
pub mod error;
pub mod source;
pub mod store;
pub mod unit;

pub use bundle::{Bundle, BundleBuilder, BUNDLE_EXTENSION, BUNDLE_MAGIC};
pub use error::{UnitError, UnitResult};
pub use source::{Location, UnitSource};
pub use store::{PackStore, StoreChild};
pub use unit::{
    unit_path, FieldMember, FunctionMember, Marker, MarkerValue, MemberFlags, Retention, Unit,
    UnitFlags, UNIT_EXTENSION, UNIT_MAGIC,
};
