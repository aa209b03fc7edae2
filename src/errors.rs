// adc-perf/src/errors.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//
//!
//! Error definitions for the ADC sample collection library.

use std::io;
use thiserror::Error;

/// The Error type for the ADC sample collection library
#[derive(Error, Debug)]
pub enum Error {
    /// A low-level I/O error
    #[error("{0}")]
    Io(#[from] io::Error),
    /// A low-level Unix-style error
    #[error("{0}")]
    Nix(#[from] nix::Error),
    /// The CBOR data could not be decoded.
    #[error("CBOR decode error: {0}")]
    Cbor(#[from] minicbor::decode::Error),
    /// A block could not be encoded to CBOR.
    #[error("CBOR encode error: {0}")]
    CborEncode(String),
    /// The CBOR item was valid, but not shaped like a sample block.
    #[error("Malformed sample block: {0}")]
    MalformedBlock(String),
    /// The sample payload is not a whole number of frames.
    #[error("Invalid samples: {len} payload bytes, frame stride {stride}")]
    InvalidSampleLayout {
        /// The observed payload length, in bytes
        len: usize,
        /// The expected frame stride (bytes/sample * channels)
        stride: usize,
    },
    /// The calibration prefix does not hold one gain/offset pair per channel.
    #[error("Invalid calibration: {len} bytes, expected {expected}")]
    InvalidCalibrationLayout {
        /// The observed calibration length, in bytes
        len: usize,
        /// The expected length (4 bytes per channel)
        expected: usize,
    },
    /// The sample resolution is outside 1..=32 bits.
    #[error("Invalid sample resolution: {0} bits")]
    InvalidResolution(u32),
    /// A block reported zero channels, or more than are supported.
    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),
    /// The session layout changed in the middle of a session.
    #[error("Session layout changed: expected {expected}, got {found}")]
    SessionMismatch {
        /// The layout established by the first block
        expected: String,
        /// The layout of the offending block
        found: String,
    },
    /// A block index was not strictly after the previous one.
    #[error("Out of order block {index} after block {last}")]
    OutOfOrderBlock {
        /// Index of the rejected block
        index: u32,
        /// Index of the last accepted block
        last: u32,
    },
    /// The remote end closed the connection.
    #[error("Connection closed by peer")]
    Disconnected,
    /// No data arrived within the receive timeout.
    #[error("Timed out waiting for data")]
    Timeout,
    /// The session ended without a single valid block.
    #[error("No samples received")]
    NoData,
    /// An address could not be parsed or resolved.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    /// An unknown log level name.
    #[error("Log level should be (i)nfo, (w)arn or (d)ebug, got '{0}'")]
    InvalidLogLevel(String),
    /// A CSV file could not be parsed.
    #[error("CSV line {line}: {msg}")]
    Csv {
        /// The 1-based line number
        line: usize,
        /// What went wrong
        msg: String,
    },
}

impl Error {
    /// Determines if this error only affects a single block.
    ///
    /// Such blocks are logged and discarded, and the session continues.
    /// Everything else is fatal to the session.
    pub fn is_block_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidSampleLayout { .. }
                | Error::InvalidCalibrationLayout { .. }
                | Error::InvalidResolution(_)
                | Error::InvalidChannelCount(_)
        )
    }
}

/// The default result type for the ADC sample collection library
pub type Result<T> = std::result::Result<T, Error>;

// --------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_errors() {
        assert!(Error::InvalidSampleLayout { len: 3, stride: 2 }.is_block_error());
        assert!(Error::InvalidCalibrationLayout { len: 3, expected: 8 }.is_block_error());
        assert!(Error::InvalidResolution(0).is_block_error());
        assert!(!Error::OutOfOrderBlock { index: 1, last: 2 }.is_block_error());
        assert!(!Error::Disconnected.is_block_error());
        assert!(!Error::NoData.is_block_error());
    }

    #[test]
    fn messages() {
        let err = Error::InvalidSampleLayout { len: 7, stride: 4 };
        assert_eq!(err.to_string(), "Invalid samples: 7 payload bytes, frame stride 4");
    }
}
