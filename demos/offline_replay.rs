// Offline replay of a synthetic sensor stream
//
// Builds the byte stream a sensor would send for a slowly drifting R-(R||C)
// tissue model, replays it in BLE-sized notifications and prints the fits.

use clap::Parser;
use nervous_eda_rs::{
    encode_frame, encode_measurement, DeviceTimestamp, EdaSession, ReplayLink, FREQUENCY_TABLE,
};
use std::f64::consts::PI;

#[derive(Parser)]
#[command(name = "offline_replay")]
#[command(about = "Replay a synthetic EDA stream through the decoder")]
struct Args {
    #[arg(short, long, default_value_t = 90, help = "Number of sweeps, one per second")]
    sweeps: u64,

    #[arg(short, long, default_value_t = 20, help = "Notification payload size in bytes")]
    mtu: usize,

    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,
}

/// Series resistance, parallel resistance and capacitance for sweep `n`.
fn tissue_model(n: u64) -> (f64, f64, f64) {
    let drift = (n as f64 / 20.0).sin();
    (10_000.0, 60_000.0 + 5_000.0 * drift, 150e-9)
}

fn sweep(n: u64) -> Vec<(f32, f32)> {
    let (rs, rp, c) = tissue_model(n);
    FREQUENCY_TABLE
        .iter()
        .map(|&f| {
            let wrc = 2.0 * PI * f64::from(f) * rp * c;
            let denom = 1.0 + wrc * wrc;
            let real = rs + rp / denom;
            let imag = -rp * wrc / denom;
            (real as f32, imag as f32)
        })
        .collect()
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

    let start = 1_700_000_000u64;
    let stream: Vec<u8> = (0..args.sweeps)
        .flat_map(|n| encode_frame(&encode_measurement(&DeviceTimestamp::new(start + n, 0), &sweep(n))))
        .collect();
    println!(
        "Replaying {} bytes in {}-byte notifications",
        stream.len(),
        args.mtu
    );

    let mut link = ReplayLink::from_stream(&stream, args.mtu);
    let mut session = EdaSession::default();
    session.pipeline_mut().reset(start as f64);

    while !link.is_exhausted() {
        for result in session.pump(&mut link)? {
            let sweep = result?;
            let (_, rp, _) = tissue_model(sweep.time as u64);
            println!(
                "t={:5.1}s  fitted r={:8.1}  expected r={:8.1}",
                sweep.time,
                sweep.circle.radius,
                rp / 2.0
            );
        }
    }

    let window = session.pipeline().magnitude_window();
    println!(
        "\nLive window spans {:.0}..{:.0} s with {} points per frequency",
        window.x_min,
        window.x_max,
        window.series[0].points.len()
    );

    session.pipeline().write_csv(std::io::stdout().lock())?;
    Ok(())
}
