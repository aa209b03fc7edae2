// adc-perf/src/bin/adc_perf_client_udp.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//

//! Application to collect ADC samples from one or more devices over UDP.
//!
//! In broadcast mode, every device that answers the start request is
//! captured, and the rows of the CSV file are prefixed with the address of
//! the device.
//!

use adc_perf::{self as adc, config, logging, DatagramConfig};
use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{debug, info, warn};
use std::{
    fs::File,
    io::{self, BufWriter},
    net::SocketAddr,
    process,
    time::Duration,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// --------------------------------------------------------------------------

fn parse_args() -> ArgMatches {
    Command::new("adc_perf_client_udp")
        .version(VERSION)
        .author("Frank Pagliughi")
        .about("Collects ADC samples from devices over UDP.")
        .arg(
            Arg::new("address")
                .required(true)
                .action(ArgAction::Set)
                .help("The address of the device (or broadcast address), as host:port"),
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
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .action(ArgAction::Set)
                .value_parser(value_parser!(u16))
                .help("The local UDP port"),
        )
        .arg(
            Arg::new("broadcast")
                .short('b')
                .long("broadcast")
                .action(ArgAction::SetTrue)
                .help("Collect from every device that answers a broadcast"),
        )
        .get_matches()
}

fn run() -> Result<()> {
    let args = parse_args();

    let level = args
        .get_one::<String>("log-level")
        .map_or(Ok(log::LevelFilter::Info), |s| config::parse_log_level(s))?;
    logging::init(level);

    let addr = args
        .get_one::<String>("address")
        .context("No device address")?;
    let addr = config::parse_address(addr)?;

    let output = args.get_one::<String>("output").context("No output file")?;

    let mut cfg = DatagramConfig::new(addr);
    cfg.broadcast = args.get_one::<bool>("broadcast").copied().unwrap_or(false);
    if let Some(&n) = args.get_one::<usize>("samples") {
        cfg.samples = n;
    }
    if let Some(&secs) = args.get_one::<u64>("timeout") {
        cfg.idle_timeout = Duration::from_secs(secs);
    }
    if let Some(&port) = args.get_one::<u16>("port") {
        cfg.local = SocketAddr::new(cfg.local.ip(), port);
    }

    // ----- Collect the samples -----

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Unable to start the runtime")?;

    let res = rt.block_on(async {
        let cli = adc::DatagramClient::bind(cfg)
            .with_context(|| format!("Unable to bind {}", cfg.local))?;

        let shutdown = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Unable to listen for Ctrl-C: {}", err);
                std::future::pending::<()>().await;
            }
        };

        let mut progress = adc::Progress::new(io::stdout());
        cli.capture(shutdown, move |n| {
            if let Err(err) = progress.update(n) {
                debug!("Error drawing progress: {}", err);
            }
        })
        .await
        .map_err(anyhow::Error::from)
    });
    println!();

    let streams = match res {
        Err(err) if matches!(err.downcast_ref::<adc::Error>(), Some(adc::Error::NoData)) => {
            warn!("No samples received. Nothing written.");
            return Ok(());
        }
        res => res.context("Error collecting samples")?,
    };

    // ----- Write the capture -----

    let file = File::create(output).with_context(|| format!("Unable to create {}", output))?;

    let layout = adc::CsvLayout {
        source: cfg.broadcast,
        calibration: true,
    };
    let mut wr = adc::CsvWriter::new(BufWriter::new(file), layout);

    for (ip, stream) in &streams {
        info!(
            "{}: {} samples per channel{}",
            ip,
            stream.sample_count(),
            if stream.missed() { ", with missed blocks" } else { "" }
        );
        let source = if cfg.broadcast { Some(*ip) } else { None };
        wr.write_stream(source, stream)?;
    }
    wr.flush()?;

    Ok(())
}

// --------------------------------------------------------------------------

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        process::exit(1);
    }
}
