//! Compression algorithms.
//!
//! This module includes compression algorithms used in storage.
//! Floating point columns use the Chimp codec; see [`chimp`] for the
//! segment layout and the scan interface.

pub mod chimp;
