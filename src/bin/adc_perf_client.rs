// adc-perf/src/bin/adc_perf_client.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//

//! Application to collect ADC samples from a device over TCP.
//!
//! The samples are written to a CSV file for later analysis.
//!

use adc_perf::{
    self as adc,
    config::{self, CaptureConfig},
    logging,
};
use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{debug, warn};
use std::{
    fs::File,
    io::{self, BufWriter},
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// --------------------------------------------------------------------------

fn parse_args() -> ArgMatches {
    Command::new("adc_perf_client")
        .version(VERSION)
        .author("Frank Pagliughi")
        .about("Collects ADC samples from a device over TCP.")
        .arg(
            Arg::new("address")
                .required(true)
                .action(ArgAction::Set)
                .help("The address of the device, as host:port"),
        )
        .arg(
            Arg::new("output")
                .required(true)
                .action(ArgAction::Set)
                .help("The CSV file to write"),
        )
        .arg(
            Arg::new("samples")
                .short('s')
                .long("samples")
                .action(ArgAction::Set)
                .value_parser(value_parser!(usize))
                .help("The number of samples per channel to collect"),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .action(ArgAction::Set)
                .value_parser(value_parser!(u64))
                .help("The time to wait for data, in seconds"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .action(ArgAction::Set)
                .default_value("info")
                .help("The log level: info, warn, or debug"),
        )
        .get_matches()
}

fn run() -> Result<()> {
    let args = parse_args();

    let addr = args
        .get_one::<String>("address")
        .context("No device address")?;
    let addr = config::parse_address(addr)?;

    let output = args.get_one::<String>("output").context("No output file")?;

    let mut cfg = CaptureConfig::new(addr, output);
    if let Some(level) = args.get_one::<String>("log-level") {
        cfg.log_level = config::parse_log_level(level)?;
    }
    if let Some(&n) = args.get_one::<usize>("samples") {
        cfg.samples = n;
    }
    if let Some(&secs) = args.get_one::<u64>("timeout") {
        cfg.timeout = Duration::from_secs(secs);
    }

    logging::init(cfg.log_level);

    // ---- Handle ^C for a graceful shutdown -----

    let quit = Arc::new(AtomicBool::new(false));
    let q = quit.clone();

    ctrlc::set_handler(move || {
        q.store(true, Ordering::SeqCst);
    })
    .context("Error setting Ctrl-C handler")?;

    // ----- Collect the samples -----

    let mut cli = adc::StreamClient::connect(cfg.address, Some(cfg.timeout))
        .with_context(|| format!("Unable to connect to {}", cfg.address))?;

    let mut rc = adc::Reconstructor::with_quota(cfg.samples);
    let mut progress = adc::Progress::new(io::stdout());

    let res = cli.capture(&mut rc, &quit, |n| {
        if let Err(err) = progress.update(n) {
            debug!("Error drawing progress: {}", err);
        }
    });
    if let Err(err) = progress.finish(rc.sample_count()) {
        debug!("Error drawing progress: {}", err);
    }

    match res {
        Err(adc::Error::Disconnected) => warn!("The device closed the connection"),
        res => res.context("Error collecting samples")?,
    }
    cli.close()?;

    // ----- Write the capture -----

    let stream = match rc.finish() {
        Err(adc::Error::NoData) => {
            warn!("No samples received. Nothing written.");
            return Ok(());
        }
        res => res?,
    };

    let file = File::create(&cfg.output)
        .with_context(|| format!("Unable to create {}", cfg.output.display()))?;

    let mut wr = adc::CsvWriter::new(BufWriter::new(file), adc::CsvLayout::default());
    wr.write_stream(None, &stream)?;
    wr.flush()?;

    if stream.missed() {
        warn!("Some sample blocks were missed");
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
