// adc-perf/src/block.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//
//! Decoded ADC sample blocks.
//!
//! A [`SampleBlock`] is created from the raw wire fields of one block by
//! [`SampleBlock::decode()`]. Decoding is a pure function of the input; a
//! block is either fully decoded or rejected with an error. Once decoded, a
//! block is immutable.

use std::fmt;

use crate::{
    demux::{self, MAX_CHANNELS},
    Error, RawBlock, Result,
};

/// The size of one channel's calibration entry, in bytes.
pub const CALIBRATION_ENTRY_SIZE: usize = 4;

/// The largest supported sample resolution, in bits.
pub const MAX_RESOLUTION_BITS: u32 = 32;

/// Per-channel calibration parameters, as sent by the device.
///
/// On the wire, each entry is a little-endian 16-bit gain followed by a
/// little-endian 16-bit offset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    /// The calibration gain ("a" parameter)
    pub gain: u16,
    /// The calibration offset ("b" parameter)
    pub offset: u16,
}

impl Calibration {
    /// Decodes one calibration entry per channel from the prefix bytes.
    pub fn decode_all(bytes: &[u8], channel_count: usize) -> Result<Vec<Calibration>> {
        let expected = CALIBRATION_ENTRY_SIZE
            .checked_mul(channel_count)
            .ok_or(Error::InvalidChannelCount(channel_count))?;
        if bytes.len() != expected {
            return Err(Error::InvalidCalibrationLayout {
                len: bytes.len(),
                expected,
            });
        }

        let cal = bytes
            .chunks_exact(CALIBRATION_ENTRY_SIZE)
            .map(|b| Calibration {
                gain: u16::from_le_bytes([b[0], b[1]]),
                offset: u16::from_le_bytes([b[2], b[3]]),
            })
            .collect();
        Ok(cal)
    }
}

/// The parameters of a sample block that must stay the same for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLayout {
    /// The nominal time between samples
    pub sample_interval: u64,
    /// The number of channels
    pub channel_count: usize,
    /// The bit width of each sample
    pub resolution_bits: u32,
}

impl fmt::Display for SessionLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} channel(s), {} bit(s), interval {}",
            self.channel_count, self.resolution_bits, self.sample_interval
        )
    }
}

/// A single decoded block of ADC samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBlock {
    /// The block sequence number
    pub index: u32,
    /// The nominal time between samples
    pub sample_interval: u64,
    /// The device timestamp of the block (informational only)
    pub sample_time: u64,
    /// The number of channels
    pub channel_count: usize,
    /// The bit width of each raw sample
    pub resolution_bits: u32,
    /// The calibration for each channel, if the device sent it
    pub calibration: Option<Vec<Calibration>>,
    /// The samples, indexed by channel. All channels have the same length.
    pub samples: Vec<Vec<u32>>,
}

impl SampleBlock {
    /// Validates and unpacks the raw fields of a block.
    ///
    /// Fails with [`Error::InvalidCalibrationLayout`] if a calibration
    /// prefix is present but doesn't hold one entry per channel, and with
    /// [`Error::InvalidSampleLayout`] if the payload isn't a whole number of
    /// frames. Nothing is partially decoded.
    pub fn decode(raw: RawBlock) -> Result<Self> {
        if raw.channel_count == 0 || raw.channel_count > MAX_CHANNELS {
            return Err(Error::InvalidChannelCount(raw.channel_count));
        }
        if raw.resolution_bits == 0 || raw.resolution_bits > MAX_RESOLUTION_BITS {
            return Err(Error::InvalidResolution(raw.resolution_bits));
        }

        let calibration = raw
            .calibration
            .as_deref()
            .map(|bytes| Calibration::decode_all(bytes, raw.channel_count))
            .transpose()?;

        let bps = demux::bytes_per_sample(raw.resolution_bits);
        let samples = demux::demux(&raw.payload, bps, raw.channel_count)?;

        Ok(Self {
            index: raw.index,
            sample_interval: raw.sample_interval,
            sample_time: raw.sample_time,
            channel_count: raw.channel_count,
            resolution_bits: raw.resolution_bits,
            calibration,
            samples,
        })
    }

    /// Decodes a block from a CBOR buffer, such as a datagram.
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        Self::decode(RawBlock::from_cbor(data)?)
    }

    /// Gets the number of bytes used by each raw sample.
    pub fn bytes_per_sample(&self) -> usize {
        demux::bytes_per_sample(self.resolution_bits)
    }

    /// Gets the number of samples in each channel.
    pub fn samples_per_channel(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    /// Gets the samples for a single channel.
    pub fn channel(&self, idx: usize) -> Option<&[u32]> {
        self.samples.get(idx).map(Vec::as_slice)
    }

    /// Gets the parameters that must stay constant for a session.
    pub fn layout(&self) -> SessionLayout {
        SessionLayout {
            sample_interval: self.sample_interval,
            channel_count: self.channel_count,
            resolution_bits: self.resolution_bits,
        }
    }

    /// Gets an iterator over the sample frames of the block.
    ///
    /// Each item holds one sample from every channel, in channel order.
    pub fn frames(&self) -> impl Iterator<Item = Vec<u32>> + '_ {
        (0..self.samples_per_channel()).map(move |i| self.samples.iter().map(|c| c[i]).collect())
    }
}

impl TryFrom<RawBlock> for SampleBlock {
    type Error = Error;

    fn try_from(raw: RawBlock) -> Result<Self> {
        Self::decode(raw)
    }
}

// --------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(channels: usize, resolution: u32, payload: Vec<u8>) -> RawBlock {
        RawBlock {
            index: 1,
            sample_interval: 10_000,
            sample_time: 800,
            channel_count: channels,
            resolution_bits: resolution,
            calibration: None,
            payload,
        }
    }

    #[test]
    fn decode_single_sample() {
        let blk = SampleBlock::decode(raw(1, 16, vec![0x34, 0x12])).unwrap();
        assert_eq!(blk.samples, vec![vec![0x1234]]);
        assert_eq!(blk.samples_per_channel(), 1);
        assert_eq!(blk.bytes_per_sample(), 2);
    }

    #[test]
    fn decode_odd_resolution() {
        // 12-bit samples still take two bytes each.
        let blk = SampleBlock::decode(raw(2, 12, vec![0xFF, 0x0F, 0x01, 0x00])).unwrap();
        assert_eq!(blk.channel(0), Some(&[0x0FFF][..]));
        assert_eq!(blk.channel(1), Some(&[1][..]));
        assert_eq!(blk.channel(2), None);
    }

    #[test]
    fn calibration_pairs() {
        let mut r = raw(2, 16, vec![0; 8]);
        r.calibration = Some(vec![0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x00]);
        let blk = SampleBlock::decode(r).unwrap();
        let cal = blk.calibration.unwrap();
        assert_eq!(cal[0], Calibration { gain: 1, offset: 2 });
        assert_eq!(cal[1], Calibration { gain: 3, offset: 4 });
    }

    #[test]
    fn bad_calibration_rejected() {
        let mut r = raw(2, 16, vec![0; 8]);
        r.calibration = Some(vec![0x01, 0x00, 0x02, 0x00]);
        match SampleBlock::decode(r) {
            Err(Error::InvalidCalibrationLayout { len, expected }) => {
                assert_eq!(len, 4);
                assert_eq!(expected, 8);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn bad_stride_rejected() {
        let err = SampleBlock::decode(raw(3, 16, vec![0; 8])).unwrap_err();
        assert!(matches!(err, Error::InvalidSampleLayout { len: 8, stride: 6 }));
        assert!(err.is_block_error());
    }

    #[test]
    fn bad_header_rejected() {
        assert!(matches!(
            SampleBlock::decode(raw(0, 16, vec![])),
            Err(Error::InvalidChannelCount(0))
        ));
        assert!(matches!(
            SampleBlock::decode(raw(1, 0, vec![])),
            Err(Error::InvalidResolution(0))
        ));
        assert!(matches!(
            SampleBlock::decode(raw(1, 33, vec![0; 5])),
            Err(Error::InvalidResolution(33))
        ));
    }

    #[test]
    fn huge_channel_count_rejected() {
        // A tiny block claiming billions of channels is skipped, not decoded.
        let r = raw(u32::MAX as usize, 16, vec![]);
        let data = r.to_cbor().unwrap();
        let err = SampleBlock::from_cbor(&data).unwrap_err();
        assert!(matches!(err, Error::InvalidChannelCount(n) if n == u32::MAX as usize));
        assert!(err.is_block_error());

        let mut r = raw(MAX_CHANNELS + 1, 16, vec![]);
        r.calibration = Some(vec![]);
        assert!(matches!(
            SampleBlock::decode(r),
            Err(Error::InvalidChannelCount(_))
        ));

        assert!(matches!(
            Calibration::decode_all(&[], usize::MAX),
            Err(Error::InvalidChannelCount(usize::MAX))
        ));
    }

    #[test]
    fn from_cbor() {
        let r = raw(2, 16, vec![1, 0, 2, 0, 3, 0, 4, 0]);
        let data = r.to_cbor().unwrap();
        let blk = SampleBlock::from_cbor(&data).unwrap();
        assert_eq!(blk.layout(), SessionLayout {
            sample_interval: 10_000,
            channel_count: 2,
            resolution_bits: 16,
        });
        let frames: Vec<_> = blk.frames().collect();
        assert_eq!(frames, vec![vec![1, 2], vec![3, 4]]);
    }
}
