// Live streaming from a serial UART bridge
//
// This example sets the device clock, records sweeps for a fixed duration and
// writes the session to a CSV file.

use clap::Parser;
use nervous_eda_rs::{EdaSession, SerialLink, SessionConfig};
use std::fs::File;
use std::time::{Duration, Instant, SystemTime};

#[derive(Parser)]
#[command(name = "stream_serial")]
#[command(about = "Record impedance sweeps from an EDA sensor behind a serial bridge")]
struct Args {
    /// Serial port of the UART bridge
    port: Option<String>,

    #[arg(short, long, default_value_t = 115_200, help = "Baud rate of the bridge")]
    baud: u32,

    #[arg(short, long, default_value_t = 60, help = "Recording duration in seconds")]
    duration: u64,

    #[arg(short, long, default_value = "session.csv", help = "CSV file to write")]
    output: String,

    #[arg(long, help = "Drop undelimited data beyond this many bytes")]
    max_pending: Option<usize>,

    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let port = match args.port {
        Some(port) => port,
        None => {
            let ports = SerialLink::available_ports()?;
            println!("Available ports:");
            for port in &ports {
                println!("  {}", port);
            }
            ports.into_iter().next().ok_or("No serial port found")?
        }
    };

    let mut config = SessionConfig::default();
    if let Some(limit) = args.max_pending {
        config = config.with_max_pending_bytes(limit);
    }

    let mut link = SerialLink::open(&port, args.baud)?;
    println!("Connected to {}", link.port());

    let mut session = EdaSession::new(config);
    session.sync_clock(&mut link, SystemTime::now())?;
    session.start(SystemTime::now());
    println!("Recording for {} s...\n", args.duration);

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut skipped = 0usize;
    while Instant::now() < deadline {
        for result in session.pump(&mut link)? {
            match result {
                Ok(sweep) => {
                    let lowest = sweep.magnitudes.first().map_or(f64::NAN, |m| m.magnitude);
                    println!(
                        "t={:7.2}s  |Y|@12Hz={:9.2}  circle=({:.0}, {:.0}) r={:.0}",
                        sweep.time,
                        lowest,
                        sweep.circle.center_x,
                        sweep.circle.center_y,
                        sweep.circle.radius
                    );
                }
                Err(e) => {
                    skipped += 1;
                    log::debug!("Skipped frame: {}", e);
                }
            }
        }
    }

    let history = session.pipeline().history().len();
    session.pipeline().write_csv(File::create(&args.output)?)?;
    println!(
        "\nWrote {} sweeps to {} ({} frames skipped)",
        history, args.output, skipped
    );
    Ok(())
}
