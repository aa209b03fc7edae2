// adc-perf/src/logging.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//
//! Console logging for the utility applications.
//!
//! Each line is prefixed with a local timestamp and the level, like:
//!
//! ```text
//! 19-10-2026 14:02:17 INFO     Connected to 192.168.1.10:5555
//! ```
//!
//! Multi-line messages get the prefix on every line.

use std::io::Write;

use log::{Level, LevelFilter};

/// The timestamp format for log lines.
pub const TIME_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Gets the name printed for a log level.
pub fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Formats a message, putting the prefix in front of each of its lines.
pub fn format_lines(time: &str, level: Level, msg: &str) -> String {
    let prefix = format!("{} {:<8} ", time, level_name(level));
    msg.split('\n')
        .map(|line| format!("{}{}", prefix, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Installs the console logger at the given level.
///
/// The `RUST_LOG` environment variable, if set, overrides the level.
pub fn init(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            let time = chrono::Local::now().format(TIME_FORMAT).to_string();
            let msg = record.args().to_string();
            writeln!(buf, "{}", format_lines(&time, record.level(), &msg))
        })
        .init();
}

// --------------------------------------------------------------------------
