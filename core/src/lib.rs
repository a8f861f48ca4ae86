//! Core library for Magpie.
//!
//! Magpie tracks the images embedded in markdown notes. Each note gets an
//! asset folder next to it (its location resolved from a user-configurable
//! template), a JSON sidecar recording every image's local and remote state,
//! and operations to add, remove, upload, download, and relocate those
//! images. See [`images`] for the main entry points.

pub mod images;
pub mod remote;
pub mod settings;
pub mod template;
pub mod vault;
