// adc-perf/src/bin/adc_perf_tool.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//

//! Application to print noise statistics of captured ADC samples.
//!
//! This reads a CSV file written by one of the collection clients and
//! prints the mean, standard deviation, and peak-to-peak range of every
//! channel of every capture in it.
//!

use adc_perf::{self as adc, ChannelStats};
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use std::{fs::File, io::BufReader, process};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// --------------------------------------------------------------------------

fn run() -> Result<()> {
    let args = Command::new("adc_perf_tool")
        .version(VERSION)
        .author("Frank Pagliughi")
        .about("Prints noise statistics for captured ADC samples.")
        .arg(
            Arg::new("input")
                .required(true)
                .action(ArgAction::Set)
                .help("The CSV capture file to read"),
        )
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .action(ArgAction::SetTrue)
                .help("The rows start with the device address"),
        )
        .arg(
            Arg::new("calibration")
                .short('g')
                .long("calibration")
                .action(ArgAction::SetTrue)
                .help("The rows have calibration gain/offset columns"),
        )
        .get_matches();

    let input = args.get_one::<String>("input").context("No input file")?;

    let layout = adc::CsvLayout {
        source: args.get_one::<bool>("address").copied().unwrap_or(false),
        calibration: args.get_one::<bool>("calibration").copied().unwrap_or(false),
    };

    let file = File::open(input).with_context(|| format!("Unable to open {}", input))?;
    let captures = adc::read_captures(BufReader::new(file), layout)
        .with_context(|| format!("Error reading {}", input))?;

    for cap in &captures {
        if let Some(addr) = cap.source {
            println!("{}", addr);
        }

        let hdr = &cap.header;
        println!(
            "interval: {}, resolution: {}, channels: {}, samples: {}{}",
            hdr.sample_interval,
            hdr.resolution_bits,
            hdr.channel_count,
            hdr.sample_count,
            if hdr.missed { " (missed blocks)" } else { "" }
        );

        for (i, chan) in cap.channels.iter().enumerate() {
            match ChannelStats::from_samples(chan) {
                Some(st) => println!("{} {}", i, st),
                None => println!("{} -", i),
            }
        }
    }

    Ok(())
}

// --------------------------------------------------------------------------

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        process::exit(1);
    }
}
