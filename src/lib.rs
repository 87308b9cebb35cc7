//! # Nervous EDA RS
//!
//! A Rust library for decoding and summarising the measurement stream of a
//! wearable bioimpedance (EDA) sensor.
//!
//! The sensor sends one impedance sweep per message over a BLE UART link. This
//! library turns those raw notification bytes into typed measurements, fits a
//! circle to every sweep and keeps a session history ready for plotting and
//! export. The transport itself (BLE stack, serial bridge, recorded file) stays
//! outside: anything that yields bytes can feed a session.
//!
//! ## Features
//!
//! - **Framing**: COBS byte stuffing with `0x00` delimiters, tolerant of any chunk boundaries
//! - **Message decoding**: Protobuf wire format parsed directly with `bytes`
//! - **Circle fit**: Linear least-squares fit of each sweep in the impedance plane
//! - **Session history**: Relative timing, live magnitude window and full history series
//! - **DataFrame output**: Uses `polars` for tabular export and CSV writing
//! - **Transports**: `serialport` link for UART bridges and an in-memory replay link
//!
//! ## Examples
//!
//! ### Feeding a Session
//!
//! ```rust
//! use nervous_eda_rs::{encode_frame, encode_measurement, DeviceTimestamp, EdaSession};
//!
//! let payload = encode_measurement(
//!     &DeviceTimestamp::new(100, 500_000),
//!     &[(70_000.0, 0.0), (40_000.0, -30_000.0), (10_000.0, 0.0)],
//! );
//! let frame = encode_frame(&payload);
//!
//! let mut session = EdaSession::default();
//! session.pipeline_mut().reset(100.0);
//!
//! // Notifications may split a frame anywhere.
//! let (head, tail) = frame.split_at(7);
//! assert!(session.feed(head).is_empty());
//! let results = session.feed(tail);
//!
//! let sweep = results[0].as_ref().unwrap();
//! assert!((sweep.time - 0.5).abs() < 1e-9);
//! assert!((sweep.circle.radius - 30_000.0).abs() < 1.0);
//! ```
//!
//! ### Circle Fit
//!
//! ```rust
//! use nervous_eda_rs::circle_fit::{fit, Point};
//!
//! let points = [Point::new(8.0, 4.0), Point::new(3.0, 9.0), Point::new(-2.0, 4.0)];
//! let circle = fit(&points).unwrap();
//! assert!((circle.radius - 5.0).abs() < 1e-9);
//! ```
//!
//! ### Streaming from a Serial Bridge
//!
//! ```rust,no_run
//! use nervous_eda_rs::{EdaSession, SerialLink};
//! use std::time::SystemTime;
//!
//! let mut link = SerialLink::open("/dev/ttyACM0", 115_200)?;
//! let mut session = EdaSession::default();
//! session.sync_clock(&mut link, SystemTime::now())?;
//! session.start(SystemTime::now());
//!
//! for result in session.pump(&mut link)? {
//!     match result {
//!         Ok(sweep) => println!("t={:.2}s radius={:.0}", sweep.time, sweep.circle.radius),
//!         Err(e) => eprintln!("skipped frame: {}", e),
//!     }
//! }
//!
//! session.pipeline().write_csv(std::fs::File::create("session.csv")?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod circle_fit;
pub mod eda_device;
pub mod eda_message;
pub mod eda_session;
pub mod frame_decoder;
pub mod serial_link;

// Re-export the main types for convenience
pub use circle_fit::{CircleFit, DegenerateInputError, Point};

pub use eda_message::{
    decode_measurement, encode_measurement, ComplexSample, DeviceTimestamp, Measurement,
    ParseError, FREQUENCY_TABLE,
};

pub use eda_session::{
    DerivedResult, EdaSession, HistoryEntry, MagnitudeSample, MagnitudeSeries, MagnitudeWindow,
    MeasurementPipeline, SessionConfig, SessionError,
};

pub use frame_decoder::{cobs_decode, cobs_encode, encode_frame, Frame, FrameDecodeError, FrameDecoder};

pub use serial_link::{ByteSource, FrameSink, LinkError, ReplayLink, SerialLink};
