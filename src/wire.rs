// adc-perf/src/wire.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//
//! Wire framing of sample blocks.
//!
//! The device sends every block as a single CBOR array with a fixed field
//! order:
//!
//! ```text
//! [index, sample_interval, sample_time, channels, resolution, (calibration,) samples]
//! ```
//!
//! The first five fields are unsigned integers, the last one or two are byte
//! strings. The calibration byte string is only sent by the datagram (UDP)
//! variant of the device firmware. The device encodes the array with an
//! indefinite length, but definite length arrays are accepted as well.
//!
//! This module only deals with the framing. The sample payload is validated
//! and unpacked by [`SampleBlock::decode()`](crate::SampleBlock::decode).

use crate::{Error, Result};
use minicbor::{data::Type, Decoder, Encoder};

/// Acknowledgement sent to the device after each block on a stream socket.
pub const ACK: u8 = 0x00;

/// Request sent to the device to start (or keep) a datagram stream.
pub const START_REQUEST: u8 = 0x01;

// The CBOR "break" byte that terminates an indefinite length item.
const CBOR_BREAK: u8 = 0xFF;

// Number of unsigned integer fields at the front of a block.
const NUM_HEADER_FIELDS: usize = 5;

/// The raw fields of a single sample block, as found on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    /// The block sequence number
    pub index: u32,
    /// The nominal time between samples
    pub sample_interval: u64,
    /// The device timestamp of the block
    pub sample_time: u64,
    /// The number of multiplexed channels
    pub channel_count: usize,
    /// The bit width of each raw sample
    pub resolution_bits: u32,
    /// The optional per-channel calibration prefix
    pub calibration: Option<Vec<u8>>,
    /// The packed sample payload
    pub payload: Vec<u8>,
}

impl RawBlock {
    /// Decodes a block from a complete buffer, such as a single datagram.
    ///
    /// Any bytes after the end of the block are ignored.
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        let (block, _) = Self::decode_with_len(data)?;
        Ok(block)
    }

    /// Tries to decode a block from the front of a buffer.
    ///
    /// This is used to frame blocks out of a byte stream. On success it
    /// returns the block and the number of bytes it occupied. If the buffer
    /// doesn't yet hold a complete block, this returns `None`, and the
    /// caller should read more data and try again.
    pub fn decode_prefix(data: &[u8]) -> Result<Option<(Self, usize)>> {
        match Self::decode_with_len(data) {
            Ok(res) => Ok(Some(res)),
            Err(Error::Cbor(err)) if err.is_end_of_input() => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn decode_with_len(data: &[u8]) -> Result<(Self, usize)> {
        let mut d = Decoder::new(data);
        let len = d.array()?;

        if let Some(n) = len {
            if n != 6 && n != 7 {
                return Err(Error::MalformedBlock(format!(
                    "expected 6 or 7 fields, got {}",
                    n
                )));
            }
        }

        let index = d.u32()?;
        let sample_interval = d.u64()?;
        let sample_time = d.u64()?;
        let channel_count = d.u32()? as usize;
        let resolution_bits = d.u32()?;

        let mut strings: Vec<Vec<u8>> = Vec::with_capacity(2);

        match len {
            Some(n) => {
                for _ in NUM_HEADER_FIELDS..n as usize {
                    strings.push(Self::decode_bytes(&mut d)?);
                }
            }
            None => loop {
                match d.datatype()? {
                    Type::Break => break,
                    _ if strings.len() == 2 => {
                        return Err(Error::MalformedBlock("too many fields".into()));
                    }
                    _ => strings.push(Self::decode_bytes(&mut d)?),
                }
            },
        }

        let mut consumed = d.position();
        if len.is_none() {
            // The decoder leaves the break marker in place.
            debug_assert_eq!(data.get(consumed), Some(&CBOR_BREAK));
            consumed += 1;
        }

        let payload = strings
            .pop()
            .ok_or_else(|| Error::MalformedBlock("missing sample payload".into()))?;
        let calibration = strings.pop();

        let block = RawBlock {
            index,
            sample_interval,
            sample_time,
            channel_count,
            resolution_bits,
            calibration,
            payload,
        };
        Ok((block, consumed))
    }

    fn decode_bytes(d: &mut Decoder<'_>) -> Result<Vec<u8>> {
        match d.datatype()? {
            Type::Bytes => Ok(d.bytes()?.to_vec()),
            other => Err(Error::MalformedBlock(format!(
                "expected a byte string, got {:?}",
                other
            ))),
        }
    }

    /// Encodes the block the same way the device firmware does.
    ///
    /// This is an indefinite length CBOR array.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut e = Encoder::new(Vec::new());
        self.encode(&mut e)
            .map_err(|err| Error::CborEncode(err.to_string()))?;
        Ok(e.into_writer())
    }

    fn encode(
        &self,
        e: &mut Encoder<Vec<u8>>,
    ) -> std::result::Result<(), minicbor::encode::Error<std::convert::Infallible>> {
        e.begin_array()?
            .u32(self.index)?
            .u64(self.sample_interval)?
            .u64(self.sample_time)?
            .u32(self.channel_count as u32)?
            .u32(self.resolution_bits)?;
        if let Some(cal) = &self.calibration {
            e.bytes(cal)?;
        }
        e.bytes(&self.payload)?.end()?;
        Ok(())
    }
}

// --------------------------------------------------------------------------
