// adc-perf/src/config.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//
//! Capture configuration shared by the sample collection clients.

use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

use log::LevelFilter;

use crate::{Error, Result};

/// The default number of samples (per channel) to collect.
pub const DFLT_NUM_SAMPLES: usize = 1000;

/// The default time to wait for data, in seconds.
pub const DFLT_TIMEOUT_SECS: u64 = 5;

/// The default local UDP port for the datagram client.
pub const DFLT_LOCAL_PORT: u16 = 56789;

/// How often the datagram client asks the device to keep streaming.
pub const REQUEST_PERIOD: Duration = Duration::from_secs(1);

/// How often the progress line is redrawn by the datagram client.
pub const PROGRESS_PERIOD: Duration = Duration::from_millis(100);

/// Parses a `host:port` address.
///
/// The host may be an IP address or a name to be resolved. The first
/// resolved address is used.
pub fn parse_address(s: &str) -> Result<SocketAddr> {
    s.to_socket_addrs()
        .map_err(|err| Error::InvalidAddress(format!("{}: {}", s, err)))?
        .next()
        .ok_or_else(|| Error::InvalidAddress(s.to_string()))
}

/// Parses a log level name.
///
/// This accepts `info`, `warn` or `debug`, or just their first letter,
/// in any case.
pub fn parse_log_level(s: &str) -> Result<LevelFilter> {
    match s.to_ascii_lowercase().as_str() {
        "info" | "i" => Ok(LevelFilter::Info),
        "warn" | "w" => Ok(LevelFilter::Warn),
        "debug" | "d" => Ok(LevelFilter::Debug),
        _ => Err(Error::InvalidLogLevel(s.to_string())),
    }
}

/// The settings for a single capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// The address of the device
    pub address: SocketAddr,
    /// Where to write the CSV capture
    pub output: PathBuf,
    /// The number of samples per channel to collect
    pub samples: usize,
    /// How long to wait for data before ending the session
    pub timeout: Duration,
    /// The level of log output
    pub log_level: LevelFilter,
}

impl CaptureConfig {
    /// Creates a configuration with the default limits.
    pub fn new<P: Into<PathBuf>>(address: SocketAddr, output: P) -> Self {
        Self {
            address,
            output: output.into(),
            samples: DFLT_NUM_SAMPLES,
            timeout: Duration::from_secs(DFLT_TIMEOUT_SECS),
            log_level: LevelFilter::Info,
        }
    }
}

// --------------------------------------------------------------------------
