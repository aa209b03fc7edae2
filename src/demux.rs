// adc-perf/src/demux.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//
//! Channel demultiplexing of packed sample payloads.
//!
//! A payload is a sequence of frames. Each frame holds one sample for every
//! channel, channel 0 first. Each sample is an unsigned little-endian
//! integer, `bytes_per_sample` bytes wide:
//!
//! ```text
//! | ch0[0] | ch1[0] | ... | chN[0] | ch0[1] | ch1[1] | ... | chN[1] | ...
//! ```

use crate::{Error, Result};

/// The largest number of multiplexed channels accepted in a block.
pub const MAX_CHANNELS: usize = 256;

/// Gets the number of bytes used to hold a sample of the given resolution.
pub fn bytes_per_sample(resolution_bits: u32) -> usize {
    ((resolution_bits + 7) / 8) as usize
}

/// Gets the size of one frame (one sample from every channel), in bytes.
/// Returns `None` if the size overflows.
pub fn frame_stride(bytes_per_sample: usize, channel_count: usize) -> Option<usize> {
    bytes_per_sample.checked_mul(channel_count)
}

/// Makes sure the channel count is in range and the payload holds a whole
/// number of frames.
///
/// Returns the number of frames in the payload.
pub fn check_layout(payload: &[u8], bytes_per_sample: usize, channel_count: usize) -> Result<usize> {
    if channel_count == 0 || channel_count > MAX_CHANNELS {
        return Err(Error::InvalidChannelCount(channel_count));
    }
    let stride = frame_stride(bytes_per_sample, channel_count)
        .ok_or(Error::InvalidChannelCount(channel_count))?;
    if stride == 0 || payload.len() % stride != 0 {
        return Err(Error::InvalidSampleLayout {
            len: payload.len(),
            stride,
        });
    }
    Ok(payload.len() / stride)
}

/// Assembles an unsigned value from little-endian bytes.
#[inline]
fn assemble(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .enumerate()
        .fold(0u32, |val, (i, &b)| val | (u32::from(b) << (8 * i)))
}

/// Splits a payload into per-channel sample sequences.
///
/// The layout is checked before anything is decoded, so this either returns
/// every sample of every channel, or an error and nothing at all.
pub fn demux(payload: &[u8], bytes_per_sample: usize, channel_count: usize) -> Result<Vec<Vec<u32>>> {
    if !(1..=4).contains(&bytes_per_sample) {
        return Err(Error::InvalidResolution(8 * bytes_per_sample as u32));
    }
    let nframes = check_layout(payload, bytes_per_sample, channel_count)?;

    let channels = (0..channel_count)
        .map(|c| ChannelIter::new(payload, bytes_per_sample, channel_count, c).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    debug_assert!(channels.iter().all(|c| c.len() == nframes));
    Ok(channels)
}

/// An iterator over the samples of a single channel in a packed payload.
///
/// This walks the payload with a step of one frame, starting at the
/// channel's offset in the first frame. The payload layout should have
/// been checked with [`check_layout()`] beforehand. Any trailing partial
/// frame is ignored.
#[derive(Debug, Clone)]
pub struct ChannelIter<'a> {
    // The remaining payload, starting at the current sample
    data: &'a [u8],
    // Size of each sample in bytes
    sample_size: usize,
    // The offset to the next sample for the channel
    step: usize,
}

impl<'a> ChannelIter<'a> {
    /// Creates an iterator over `channel` in the payload.
    pub fn new(payload: &'a [u8], bytes_per_sample: usize, channel_count: usize, channel: usize) -> Self {
        let offset = channel.saturating_mul(bytes_per_sample).min(payload.len());
        Self {
            data: &payload[offset..],
            sample_size: bytes_per_sample,
            step: frame_stride(bytes_per_sample, channel_count).unwrap_or(usize::MAX),
        }
    }
}

impl<'a> Iterator for ChannelIter<'a> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.sample_size == 0 || self.data.len() < self.sample_size {
            return None;
        }
        let val = assemble(&self.data[..self.sample_size]);
        // The last frame may not have a full step left after the sample.
        self.data = self.data.get(self.step..).unwrap_or(&[]);
        Some(val)
    }
}

// --------------------------------------------------------------------------
