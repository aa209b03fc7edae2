// adc-perf/src/csv.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//
//! CSV output of reconstructed sample streams, and loading them back.
//!
//! A capture starts with six `key,value` header rows, followed by one row
//! for every sample instant:
//!
//! ```text
//! sample_interval,10000
//! sample_time,1250
//! sample_resolution,16
//! sample_missed,False
//! channels,2
//! sample_len,1020
//! 0,2051,1988
//! 1,2049,1990
//! ...
//! ```
//!
//! Depending on the [`CsvLayout`], every row may be prefixed with the
//! address of the device that sent the samples, and the data rows may
//! carry the calibration gain/offset pair of every channel before the
//! sample values. With an address column, captures from several devices
//! may follow each other in a single file.

use std::{
    io::{BufRead, Write},
    net::IpAddr,
};

use crate::{Error, Result, SampleStream, StreamHeader};

/// Header key for the nominal sample interval.
pub const KEY_SAMPLE_INTERVAL: &str = "sample_interval";
/// Header key for the timestamp of the first block.
pub const KEY_SAMPLE_TIME: &str = "sample_time";
/// Header key for the sample resolution.
pub const KEY_SAMPLE_RESOLUTION: &str = "sample_resolution";
/// Header key for the missed-block flag.
pub const KEY_SAMPLE_MISSED: &str = "sample_missed";
/// Header key for the number of channels.
pub const KEY_CHANNELS: &str = "channels";
/// Header key for the number of samples per channel.
pub const KEY_SAMPLE_LEN: &str = "sample_len";

/// The number of header rows in a capture.
pub const HEADER_ROWS: usize = 6;

/// The optional columns of a CSV capture file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CsvLayout {
    /// Every row starts with the address of the sending device.
    pub source: bool,
    /// Data rows carry the gain and offset of every channel.
    pub calibration: bool,
}

fn format_bool(val: bool) -> &'static str {
    if val { "True" } else { "False" }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

// --------------------------------------------------------------------------

/// Writes reconstructed sample streams as CSV.
#[derive(Debug)]
pub struct CsvWriter<W: Write> {
    out: W,
    layout: CsvLayout,
}

impl<W: Write> CsvWriter<W> {
    /// Creates a writer with the given column layout.
    pub fn new(out: W, layout: CsvLayout) -> Self {
        Self { out, layout }
    }

    /// Writes a complete capture: the header rows, then the data rows.
    ///
    /// The `source` address is required if the layout has a source column.
    pub fn write_stream(&mut self, source: Option<IpAddr>, stream: &SampleStream) -> Result<()> {
        let prefix = match (self.layout.source, source) {
            (true, Some(addr)) => format!("{},", addr),
            (true, None) => {
                return Err(Error::InvalidAddress("missing source address".into()));
            }
            (false, _) => String::new(),
        };

        let hdr = stream.header();
        let rows: [(&str, String); HEADER_ROWS] = [
            (KEY_SAMPLE_INTERVAL, hdr.sample_interval.to_string()),
            (KEY_SAMPLE_TIME, hdr.sample_time.to_string()),
            (KEY_SAMPLE_RESOLUTION, hdr.resolution_bits.to_string()),
            (KEY_SAMPLE_MISSED, format_bool(hdr.missed).to_string()),
            (KEY_CHANNELS, hdr.channel_count.to_string()),
            (KEY_SAMPLE_LEN, hdr.sample_count.to_string()),
        ];
        for (key, val) in rows.iter() {
            writeln!(self.out, "{}{},{}", prefix, key, val)?;
        }

        for row in stream.rows() {
            write!(self.out, "{}{}", prefix, row.index)?;
            if self.layout.calibration {
                match row.calibration {
                    Some(cal) => {
                        for c in cal {
                            write!(self.out, ",{},{}", c.gain, c.offset)?;
                        }
                    }
                    // Blocks without calibration get empty columns.
                    None => {
                        for _ in 0..hdr.channel_count {
                            write!(self.out, ",,")?;
                        }
                    }
                }
            }
            for val in &row.values {
                write!(self.out, ",{}", val)?;
            }
            writeln!(self.out)?;
        }
        Ok(())
    }

    /// Flushes the output.
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    /// Gets the underlying writer back.
    pub fn into_inner(self) -> W {
        self.out
    }
}

// --------------------------------------------------------------------------

/// A capture loaded back from a CSV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedCapture {
    /// The address of the device, for files with a source column
    pub source: Option<IpAddr>,
    /// The header of the capture
    pub header: StreamHeader,
    /// The global index of every row
    pub indices: Vec<u64>,
    /// The samples, indexed by channel
    pub channels: Vec<Vec<u32>>,
}

// A capture in the middle of being parsed.
#[derive(Default)]
struct PartialCapture {
    source: Option<IpAddr>,
    fields: Vec<(String, String)>,
    header: Option<StreamHeader>,
    indices: Vec<u64>,
    channels: Vec<Vec<u32>>,
}

impl PartialCapture {
    fn field<T: std::str::FromStr>(&self, key: &str, line: usize) -> Result<T> {
        let val = self
            .fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::Csv {
                line,
                msg: format!("missing header '{}'", key),
            })?;
        val.parse().map_err(|_| Error::Csv {
            line,
            msg: format!("bad value for '{}': {}", key, val),
        })
    }

    // Builds the header once the data rows start.
    fn header(&mut self, line: usize) -> Result<StreamHeader> {
        if let Some(hdr) = self.header {
            return Ok(hdr);
        }
        let missed: String = self.field(KEY_SAMPLE_MISSED, line)?;
        let hdr = StreamHeader {
            sample_interval: self.field(KEY_SAMPLE_INTERVAL, line)?,
            sample_time: self.field(KEY_SAMPLE_TIME, line)?,
            resolution_bits: self.field(KEY_SAMPLE_RESOLUTION, line)?,
            missed: parse_bool(&missed).ok_or_else(|| Error::Csv {
                line,
                msg: format!("bad value for '{}': {}", KEY_SAMPLE_MISSED, missed),
            })?,
            channel_count: self.field(KEY_CHANNELS, line)?,
            sample_count: self.field(KEY_SAMPLE_LEN, line)?,
        };
        self.channels = vec![Vec::new(); hdr.channel_count];
        self.header = Some(hdr);
        Ok(hdr)
    }

    fn finish(mut self, line: usize) -> Result<LoadedCapture> {
        let header = self.header(line)?;
        Ok(LoadedCapture {
            source: self.source,
            header,
            indices: self.indices,
            channels: self.channels,
        })
    }
}

/// Loads every capture from a CSV file.
pub fn read_captures<R: BufRead>(input: R, layout: CsvLayout) -> Result<Vec<LoadedCapture>> {
    let mut captures = Vec::new();
    let mut cur: Option<PartialCapture> = None;
    let mut lineno = 0;

    for line in input.lines() {
        let line = line?;
        lineno += 1;

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut cols = line.split(',').map(str::trim);

        let source = if layout.source {
            let addr = cols.next().unwrap_or_default();
            let addr = addr.parse::<IpAddr>().map_err(|_| Error::Csv {
                line: lineno,
                msg: format!("bad source address: {}", addr),
            })?;
            Some(addr)
        }
        else {
            None
        };

        let first = cols.next().unwrap_or_default();

        if let Ok(index) = first.parse::<u64>() {
            // A data row
            let cap = cur.as_mut().ok_or_else(|| Error::Csv {
                line: lineno,
                msg: "data row before header".into(),
            })?;
            if cap.source != source {
                return Err(Error::Csv {
                    line: lineno,
                    msg: "source address changed within a capture".into(),
                });
            }
            let nchan = cap.header(lineno)?.channel_count;
            let vals: Vec<&str> = cols.collect();

            let skip = if layout.calibration { 2 * nchan } else { 0 };
            if vals.len() != skip + nchan {
                return Err(Error::Csv {
                    line: lineno,
                    msg: format!("expected {} columns, got {}", skip + nchan + 1, vals.len() + 1),
                });
            }

            cap.indices.push(index);
            for (chan, val) in cap.channels.iter_mut().zip(&vals[skip..]) {
                let val = val.parse::<u32>().map_err(|_| Error::Csv {
                    line: lineno,
                    msg: format!("bad sample value: {}", val),
                })?;
                chan.push(val);
            }
        }
        else {
            // A header row. It starts a new capture if the current one
            // already has data, already has this key, or came from
            // another device.
            let val = cols.next().unwrap_or_default();
            let new_capture = match &cur {
                None => true,
                Some(cap) => {
                    cap.header.is_some()
                        || cap.source != source
                        || cap.fields.iter().any(|(k, _)| k == first)
                }
            };
            if new_capture {
                if let Some(cap) = cur.take() {
                    captures.push(cap.finish(lineno)?);
                }
                cur = Some(PartialCapture {
                    source,
                    ..PartialCapture::default()
                });
            }
            if let Some(cap) = cur.as_mut() {
                cap.fields.push((first.to_string(), val.to_string()));
            }
        }
    }

    if let Some(cap) = cur.take() {
        captures.push(cap.finish(lineno)?);
    }
    Ok(captures)
}

// --------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Calibration, Reconstructor, SampleBlock};

    fn block(index: u32, calibration: bool) -> SampleBlock {
        SampleBlock {
            index,
            sample_interval: 10_000,
            sample_time: 1_250,
            channel_count: 2,
            resolution_bits: 16,
            calibration: if calibration {
                Some(vec![
                    Calibration { gain: 1, offset: 2 },
                    Calibration { gain: 3, offset: 4 },
                ])
            }
            else {
                None
            },
            samples: vec![vec![index * 10, index * 10 + 1], vec![index, index]],
        }
    }

    fn stream(indices: &[u32], calibration: bool) -> SampleStream {
        let mut rc = Reconstructor::new();
        for &i in indices {
            rc.push(block(i, calibration)).unwrap();
        }
        rc.finish().unwrap()
    }

    fn write(source: Option<IpAddr>, stream: &SampleStream, layout: CsvLayout) -> String {
        let mut w = CsvWriter::new(Vec::new(), layout);
        w.write_stream(source, stream).unwrap();
        String::from_utf8(w.into_inner()).unwrap()
    }

    #[test]
    fn plain_layout() {
        let s = stream(&[1, 3], false);
        let text = write(None, &s, CsvLayout::default());
        let expected = "\
sample_interval,10000
sample_time,1250
sample_resolution,16
sample_missed,True
channels,2
sample_len,4
0,10,1
1,11,1
6,30,3
7,31,3
";
        assert_eq!(text, expected);
    }

    #[test]
    fn source_and_calibration_columns() {
        let s = stream(&[1], true);
        let addr: IpAddr = "192.168.1.20".parse().unwrap();
        let layout = CsvLayout {
            source: true,
            calibration: true,
        };
        let text = write(Some(addr), &s, layout);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "192.168.1.20,sample_interval,10000");
        assert_eq!(lines[3], "192.168.1.20,sample_missed,False");
        assert_eq!(lines[6], "192.168.1.20,0,1,2,3,4,10,1");
    }

    #[test]
    fn source_required() {
        let s = stream(&[1], false);
        let mut w = CsvWriter::new(Vec::new(), CsvLayout { source: true, calibration: false });
        assert!(w.write_stream(None, &s).is_err());
    }

    #[test]
    fn load_plain() {
        let s = stream(&[1, 2, 4], false);
        let text = write(None, &s, CsvLayout::default());

        let caps = read_captures(text.as_bytes(), CsvLayout::default()).unwrap();
        assert_eq!(caps.len(), 1);
        let cap = &caps[0];
        assert_eq!(cap.header, *s.header());
        assert_eq!(cap.indices, vec![0, 1, 2, 3, 8, 9]);
        assert_eq!(cap.channels[0], s.channel(0));
        assert_eq!(cap.channels[1], s.channel(1));
    }

    #[test]
    fn load_multiple_sources() {
        let layout = CsvLayout {
            source: true,
            calibration: true,
        };
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        let mut w = CsvWriter::new(Vec::new(), layout);
        w.write_stream(Some(a), &stream(&[1, 2], true)).unwrap();
        w.write_stream(Some(b), &stream(&[5], true)).unwrap();
        let text = String::from_utf8(w.into_inner()).unwrap();

        let caps = read_captures(text.as_bytes(), layout).unwrap();
        assert_eq!(caps.len(), 2);
        assert_eq!(caps[0].source, Some(a));
        assert_eq!(caps[0].header.sample_count, 4);
        assert_eq!(caps[0].channels[0], vec![10, 11, 20, 21]);
        assert_eq!(caps[1].source, Some(b));
        assert_eq!(caps[1].indices, vec![0, 1]);
        assert_eq!(caps[1].channels[1], vec![5, 5]);
    }

    #[test]
    fn load_lowercase_bool() {
        let text = "sample_interval,1\nsample_time,2\nsample_resolution,12\n\
                    sample_missed,false\nchannels,1\nsample_len,2\n0,7\n1,8\n";
        let caps = read_captures(text.as_bytes(), CsvLayout::default()).unwrap();
        assert!(!caps[0].header.missed);
        assert_eq!(caps[0].channels, vec![vec![7, 8]]);
    }

    #[test]
    fn load_errors() {
        let no_header = "0,1,2\n";
        assert!(matches!(
            read_captures(no_header.as_bytes(), CsvLayout::default()),
            Err(Error::Csv { line: 1, .. })
        ));

        let short_row = "sample_interval,1\nsample_time,2\nsample_resolution,12\n\
                         sample_missed,False\nchannels,2\nsample_len,1\n0,7\n";
        assert!(matches!(
            read_captures(short_row.as_bytes(), CsvLayout::default()),
            Err(Error::Csv { line: 7, .. })
        ));

        let missing_key = "sample_interval,1\nchannels,1\n0,7\n";
        assert!(read_captures(missing_key.as_bytes(), CsvLayout::default()).is_err());
    }
}
