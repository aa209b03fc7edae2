// adc-perf/src/reconstruct.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//
//! Reconstruction of a gap-aware sample stream from a sequence of blocks.
//!
//! Blocks travel over transports that may lose them, such as UDP. Each
//! block carries a sequence number, and the [`Reconstructor`] uses it to
//! detect the blocks that never arrived. Every sample is given a global
//! index, its position in the whole logical session stream, so that the
//! samples following a gap are set apart from the ones before it.
//!
//! When a block arrives `d` sequence numbers after the last one, the running
//! sample offset advances by `d` times the number of samples in the arriving
//! block before it is placed. Consecutive blocks (`d == 1`) are placed back to
//! back.
//!
//! # Preconditions
//!
//! The number of samples skipped for a gap is computed from the size of the
//! block that follows it. This is only correct if the device sends blocks of
//! a uniform size, which it does for the whole of a session. A change in the
//! block size is logged, but otherwise trusted.
//!
//! Blocks must arrive in order and without duplicates. Anything else is
//! reported as [`Error::OutOfOrderBlock`].

use std::ops::Range;

use crate::{Calibration, Error, Result, SampleBlock, SessionLayout};

/// Half the range of the 32-bit block counter.
/// A forward step larger than this is taken as a step backward.
const MAX_FORWARD_STEP: u32 = u32::MAX / 2;

/// The summary information for a reconstructed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    /// The nominal time between samples
    pub sample_interval: u64,
    /// The device timestamp of the first block
    pub sample_time: u64,
    /// The bit width of each sample
    pub resolution_bits: u32,
    /// Whether any block was missed during the session
    pub missed: bool,
    /// The number of channels
    pub channel_count: usize,
    /// The number of samples received for each channel
    pub sample_count: usize,
}

/// The samples from one accepted block, placed in the global index space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The sequence number of the block
    pub block_index: u32,
    /// The global index of the first sample of the block
    pub first_index: u64,
    /// The calibration sent with the block, if any
    pub calibration: Option<Vec<Calibration>>,
    /// The samples, indexed by channel
    pub samples: Vec<Vec<u32>>,
}

impl Segment {
    /// Gets the number of samples in each channel of the segment.
    pub fn len(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    /// Determines if the segment holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets the global indices covered by the segment.
    pub fn range(&self) -> Range<u64> {
        self.first_index..self.first_index + self.len() as u64
    }
}

/// A single sample instant of a reconstructed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRow<'a> {
    /// The gap-corrected global sample index
    pub index: u64,
    /// The calibration of the block that carried the sample
    pub calibration: Option<&'a [Calibration]>,
    /// One value for each channel
    pub values: Vec<u32>,
}

/// A complete, reconstructed sample stream.
///
/// This is the final result of a session, and is not changed after it is
/// created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleStream {
    header: StreamHeader,
    segments: Vec<Segment>,
}

impl SampleStream {
    /// Gets the stream header.
    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    /// Whether any block was missed during the session.
    pub fn missed(&self) -> bool {
        self.header.missed
    }

    /// Gets the number of samples received for each channel.
    pub fn sample_count(&self) -> usize {
        self.header.sample_count
    }

    /// Gets the blocks that make up the stream, in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Gets an iterator over every sample instant, in order.
    pub fn rows(&self) -> impl Iterator<Item = SampleRow<'_>> + '_ {
        self.segments.iter().flat_map(|seg| {
            (0..seg.len()).map(move |i| SampleRow {
                index: seg.first_index + i as u64,
                calibration: seg.calibration.as_deref(),
                values: seg.samples.iter().map(|c| c[i]).collect(),
            })
        })
    }

    /// Gets all the samples of a single channel, in order.
    ///
    /// Missed blocks leave no placeholder, so use [`rows()`](Self::rows)
    /// when the time position matters.
    pub fn channel(&self, idx: usize) -> Vec<u32> {
        self.segments
            .iter()
            .filter_map(|seg| seg.samples.get(idx))
            .flatten()
            .copied()
            .collect()
    }
}

/// Rebuilds a single, gap-aware sample stream from a sequence of blocks.
///
/// Each device session gets its own reconstructor. Blocks must be pushed in
/// the order in which they arrive.
#[derive(Debug, Default)]
pub struct Reconstructor {
    // The layout and first timestamp, from the first block
    layout: Option<SessionLayout>,
    first_time: u64,
    // Sequence number of the last accepted block
    last_index: Option<u32>,
    // The global index of the next sample
    next_index: u64,
    // Sticky flag for any gap in the sequence
    missed: bool,
    // Number of samples received for each channel
    sample_count: usize,
    // Samples per channel in the last accepted block
    block_len: Option<usize>,
    // The number of samples to stop at
    quota: Option<usize>,
    segments: Vec<Segment>,
}

impl Reconstructor {
    /// Creates a reconstructor without a sample quota.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reconstructor that stops accepting blocks once `quota`
    /// samples per channel have been received.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// Whether any block was missed so far.
    pub fn missed(&self) -> bool {
        self.missed
    }

    /// Gets the number of samples received for each channel.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Gets the sequence number of the last accepted block.
    pub fn last_index(&self) -> Option<u32> {
        self.last_index
    }

    /// Gets the session layout, once the first block arrived.
    pub fn layout(&self) -> Option<SessionLayout> {
        self.layout
    }

    /// Determines if no block has been accepted yet.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Determines if the sample quota has been reached.
    pub fn is_complete(&self) -> bool {
        self.quota.map_or(false, |n| self.sample_count >= n)
    }

    /// Adds the next block that arrived.
    ///
    /// Returns the range of global indices given to the samples of the
    /// block, or `None` if the quota was already reached and the block was
    /// not accepted.
    ///
    /// A block with a different layout than the rest of the session fails
    /// with [`Error::SessionMismatch`], and one that does not come after the
    /// last accepted block fails with [`Error::OutOfOrderBlock`]. In either
    /// case the state of the reconstructor is unchanged.
    pub fn push(&mut self, block: SampleBlock) -> Result<Option<Range<u64>>> {
        if self.is_complete() {
            return Ok(None);
        }

        let layout = block.layout();
        match self.layout {
            Some(expected) if expected != layout => {
                return Err(Error::SessionMismatch {
                    expected: expected.to_string(),
                    found: layout.to_string(),
                });
            }
            _ => {}
        }

        let n = block.samples_per_channel();

        if let Some(last) = self.last_index {
            let step = block.index.wrapping_sub(last);
            if step == 0 || step > MAX_FORWARD_STEP {
                return Err(Error::OutOfOrderBlock {
                    index: block.index,
                    last,
                });
            }
            if step != 1 {
                log::warn!("{} sample block(s) missed before block {}", step - 1, block.index);
                self.missed = true;
                self.next_index += u64::from(step) * n as u64;
            }
        }

        match self.block_len {
            Some(len) if len != n => {
                log::warn!("Block size changed from {} to {} samples", len, n);
            }
            _ => {}
        }

        if self.layout.is_none() {
            self.layout = Some(layout);
            self.first_time = block.sample_time;
        }

        let first_index = self.next_index;
        self.next_index += n as u64;
        self.sample_count += n;
        self.last_index = Some(block.index);
        self.block_len = Some(n);

        self.segments.push(Segment {
            block_index: block.index,
            first_index,
            calibration: block.calibration,
            samples: block.samples,
        });

        Ok(Some(first_index..self.next_index))
    }

    /// Adds a block, discarding it if it fails to decode.
    ///
    /// Blocks with a bad layout are logged and skipped, and don't change the
    /// state of the session. Fatal errors are returned.
    pub fn push_decoded(&mut self, block: Result<SampleBlock>) -> Result<Option<Range<u64>>> {
        match block {
            Ok(block) => self.push(block),
            Err(err) if err.is_block_error() => {
                log::error!("{}", err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Finishes the session, returning the reconstructed stream.
    ///
    /// A session that never accepted a block fails with [`Error::NoData`].
    pub fn finish(self) -> Result<SampleStream> {
        let layout = self.layout.ok_or(Error::NoData)?;
        let header = StreamHeader {
            sample_interval: layout.sample_interval,
            sample_time: self.first_time,
            resolution_bits: layout.resolution_bits,
            missed: self.missed,
            channel_count: layout.channel_count,
            sample_count: self.sample_count,
        };
        Ok(SampleStream {
            header,
            segments: self.segments,
        })
    }
}

// --------------------------------------------------------------------------
