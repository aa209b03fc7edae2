// adc-perf/src/progress.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//
//! A single-line live sample counter for the console.

use std::io::{self, Write};

/// Redraws a `samples N` line in place on a terminal.
#[derive(Debug)]
pub struct Progress<W: Write> {
    out: W,
    // The last count drawn, to skip redundant redraws
    last: Option<usize>,
}

impl<W: Write> Progress<W> {
    /// Creates a progress line on the given output.
    pub fn new(out: W) -> Self {
        Self { out, last: None }
    }

    /// Redraws the line, if the count changed.
    ///
    /// A count that fails to draw is drawn again on the next call.
    pub fn update(&mut self, samples: usize) -> io::Result<()> {
        if self.last == Some(samples) {
            return Ok(());
        }
        write!(self.out, "\rsamples {:<10}", samples)?;
        self.out.flush()?;
        self.last = Some(samples);
        Ok(())
    }

    /// Draws the final count and ends the line.
    pub fn finish(&mut self, samples: usize) -> io::Result<()> {
        self.last = Some(samples);
        writeln!(self.out, "\rsamples {:<10}", samples)?;
        self.out.flush()
    }

    /// Gets the underlying writer back.
    pub fn into_inner(self) -> W {
        self.out
    }
}

// --------------------------------------------------------------------------
