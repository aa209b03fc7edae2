// adc-perf/src/lib.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//
//!
//! ADC sample collection and decoding for the Blixt Zero.
//!
//! The device samples a number of multiplexed ADC channels and streams the
//! results to a host in blocks. Each block is a CBOR array holding a
//! sequence number, the sampling parameters, and a packed payload of
//! little-endian samples, channel-interleaved.
//!
//! Blocks are received either over TCP, where the client acknowledges each
//! block with a single byte, or over UDP, where the client periodically
//! asks the device to keep sending. Over UDP, blocks can be lost, so the
//! sequence numbers are used to reconstruct a gap-aware stream in which
//! every sample keeps its true time position.
//!
//! The reconstructed streams are written as CSV files, which can be loaded
//! back for a simple noise analysis of each channel.
//!

// Lints
// This may be overkill.
#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

pub use crate::block::*;
pub use crate::csv::{read_captures, CsvLayout, CsvWriter, LoadedCapture};
pub use crate::datagram::*;
pub use crate::errors::*;
pub use crate::progress::*;
pub use crate::reconstruct::*;
pub use crate::stats::*;
pub use crate::stream::*;
pub use crate::wire::*;

pub mod block;
pub mod config;
pub mod csv;
pub mod datagram;
pub mod demux;
pub mod errors;
pub mod progress;
pub mod reconstruct;
pub mod stats;
pub mod stream;
pub mod wire;

#[cfg(feature = "utilities")]
pub mod logging;
