use std::fs;
use std::path::PathBuf;
use std::process::exit;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use _core::assessment::{Assessment, Calibration, TaskSession};
use _core::config::{LinkConfig, ProtocolConfig, BAUD_RATE};
use _core::framing::FrameDecoder;
use _core::logging::init_rust_logging;
use _core::telemetry::{unpack, Mechanism, SensorValues};
use _core::{Pluto, PlutoDevice};

#[derive(Parser, Debug)]
#[command(name = "pluto", about = "PLUTO rehabilitation robot tools")]
struct Args {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print live telemetry
    Stream {
        /// Serial port (e.g., /dev/ttyUSB0 or COM4)
        port: String,
        /// Stop after this many packets
        #[arg(short, long, default_value_t = 100)]
        count: usize,
        /// Request the diagnostics stream instead of sensor data
        #[arg(long)]
        diagnostics: bool,
        #[arg(long, default_value_t = BAUD_RATE)]
        baud: u32,
    },
    /// Ask the device for its firmware version
    Version {
        port: String,
    },
    /// Run the calibration protocol for one mechanism
    Calibrate {
        port: String,
        /// WFE, URD, FPS or HOC
        mechanism: String,
        /// Protocol configuration JSON
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory for the raw and summary CSV logs
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Decode a binary capture of the serial stream
    Replay {
        capture: PathBuf,
    },
}

fn main() {
    let args = Args::parse();
    init_rust_logging(args.verbose);
    if let Err(e) = run(args.command) {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run(command: Cmd) -> Result<()> {
    match command {
        Cmd::Stream {
            port,
            count,
            diagnostics,
            baud,
        } => stream(&port, count, diagnostics, baud),
        Cmd::Version { port } => version(&port),
        Cmd::Calibrate {
            port,
            mechanism,
            config,
            out,
        } => calibrate(&port, &mechanism, config, out),
        Cmd::Replay { capture } => replay(capture),
    }
}

fn stream(port: &str, count: usize, diagnostics: bool, baud: u32) -> Result<()> {
    let mut config = LinkConfig::new(port);
    config.baud_rate = baud;
    let mut pluto = Pluto::connect(&config)?;
    if diagnostics {
        pluto.set_diagnostic_mode()?;
    }
    pluto.start_stream()?;

    let mut seen = 0;
    while seen < count {
        let Some(events) = pluto.wait_packet(Duration::from_secs(1)) else {
            if !pluto.is_connected() {
                bail!("link to {port} lost");
            }
            warn!("no data from {port}");
            continue;
        };
        if events.is_empty() {
            continue;
        }
        seen += 1;
        if let Some(s) = pluto.snapshot() {
            println!(
                "[{:8.3}] {} {:<10} angle={:8.2} torque={:6.3} button={} err={:?}",
                s.timestamp.as_secs_f64(),
                s.mechanism,
                s.control_type,
                s.angle(),
                s.torque(),
                s.button,
                s.error.names()
            );
        }
    }
    println!(
        "{} packets, {:.1} Hz, {:?}",
        seen,
        pluto.frame_rate(),
        pluto.decoder_stats()
    );
    pluto.stop_stream()?;
    Ok(())
}

fn version(port: &str) -> Result<()> {
    let mut pluto = Pluto::connect_serial(port)?;
    pluto.request_version()?;
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        pluto.wait_packet(Duration::from_millis(100));
        if let Some(v) = pluto.version() {
            println!("Version: {}", v.trim());
            return Ok(());
        }
    }
    bail!("no version reply from {port}")
}

fn calibrate(
    port: &str,
    mechanism: &str,
    config: Option<PathBuf>,
    out: Option<PathBuf>,
) -> Result<()> {
    let mech = Mechanism::from_name(mechanism)
        .with_context(|| format!("unknown mechanism {mechanism}"))?;
    let config = match config {
        Some(path) => ProtocolConfig::from_json_file(&path)?,
        None => ProtocolConfig::default(),
    };
    let machine = Calibration::new(mech, config.calibration);
    let mut session = match out {
        Some(dir) => TaskSession::with_logs(
            machine,
            dir.join(format!("calib_{}_raw.csv", mech.name())),
            dir.join(format!("calib_{}_summary.csv", mech.name())),
        )?,
        None => TaskSession::new(machine),
    };

    let mut pluto = Pluto::connect_serial(port)?;
    pluto.start_stream()?;
    let mut last = String::new();
    while !session.machine().is_done() {
        let Some(events) = pluto.wait_packet(Duration::from_secs(1)) else {
            if !pluto.is_connected() {
                session.close(&mut pluto)?;
                bail!("link to {port} lost during calibration");
            }
            continue;
        };
        for event in events {
            session.handle(event, &mut pluto)?;
        }
        let instruction = session.machine().instruction();
        if instruction != last {
            println!("{instruction}");
            last = instruction;
        }
    }
    info!(
        "calibration of {} finished in {}",
        mech,
        session.machine().state()
    );
    session.close(&mut pluto)?;
    Ok(())
}

fn replay(capture: PathBuf) -> Result<()> {
    let bytes = fs::read(&capture)
        .with_context(|| format!("Failed to read capture {}", capture.display()))?;
    let mut decoder = FrameDecoder::default();
    let mut malformed = 0usize;
    for (i, payload) in decoder.push(&bytes).into_iter().enumerate() {
        match unpack(&payload, Duration::ZERO) {
            Ok(s) => match &s.values {
                SensorValues::Version(v) => println!("{i:6} VERSION {v}"),
                _ => println!(
                    "{i:6} {:?} {} {} angle={:.2} button={}",
                    s.data_type,
                    s.mechanism,
                    s.control_type,
                    s.angle(),
                    s.button
                ),
            },
            Err(e) => {
                malformed += 1;
                warn!("frame {i}: {e}");
            }
        }
    }
    let stats = decoder.stats();
    println!(
        "{} frames, {} checksum errors, {} malformed",
        stats.packets, stats.checksum_errors, malformed
    );
    Ok(())
}
