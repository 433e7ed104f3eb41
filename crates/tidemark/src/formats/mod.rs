//! Source formats shipped with Tidemark.
//!
//! Each submodule implements [`crate::extract::SourceFormat`] for one file
//! format and is registered under its identifier in
//! [`crate::extract::FormatRegistry::builtin`].

pub mod csv;
