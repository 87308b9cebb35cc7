//! Measurement session: framing, decoding, fitting and history in one place.
//!
//! [`EdaSession`] is fed raw notification bytes by whatever transport is in
//! use and returns one [`DerivedResult`] per decoded sweep, for plotting. The
//! [`MeasurementPipeline`] behind it keeps the history used for export.

use std::io::Write;
use std::time::SystemTime;

use polars::prelude::{Column, CsvWriter, DataFrame, NamedFrom, PolarsError, SerWriter, Series};

use crate::circle_fit::{self, CircleFit, Point};
use crate::eda_message::{decode_measurement, DeviceTimestamp, Measurement, ParseError, FREQUENCY_TABLE};
use crate::frame_decoder::{encode_frame, Frame, FrameDecodeError, FrameDecoder};
use crate::serial_link::{ByteSource, FrameSink, LinkError};

const TIME_COLUMN_NAME: &str = "Time(s)";
const CIRCLE_COLUMN_NAMES: [&str; 3] = ["Cx", "Cy", "Cr"];

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Width of the live magnitude window, in seconds.
    pub display_window: f64,
    /// Cap on undelimited bytes held by the frame decoder. `None` is unbounded.
    pub max_pending_bytes: Option<usize>,
    /// Decimal places written to CSV exports.
    pub export_precision: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_window: 60.0,
            max_pending_bytes: None,
            export_precision: 4,
        }
    }
}

impl SessionConfig {
    pub fn with_display_window(mut self, seconds: f64) -> Self {
        self.display_window = seconds;
        self
    }

    pub fn with_max_pending_bytes(mut self, limit: usize) -> Self {
        self.max_pending_bytes = Some(limit);
        self
    }

    pub fn with_export_precision(mut self, digits: usize) -> Self {
        self.export_precision = digits;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameDecodeError),

    #[error("Message error: {0}")]
    Parse(#[from] ParseError),

    #[error("Measurement at {current:.6} s precedes the previous one at {previous:.6} s")]
    NonMonotonicTimestamp { previous: f64, current: f64 },

    #[error("Export error: {0}")]
    Export(#[from] PolarsError),
}

/// One stored sweep, with its time relative to the session start.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub time: f64,
    pub measurement: Measurement,
    pub circle: CircleFit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagnitudeSample {
    pub frequency_hz: u32,
    pub magnitude: f64,
}

/// Everything a display needs from one processed sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedResult {
    pub time: f64,
    /// Impedance-plane points, `(real, imag)`.
    pub points: Vec<Point>,
    /// Frequency label of each point.
    pub frequencies: Vec<u32>,
    pub magnitudes: Vec<MagnitudeSample>,
    /// Fitted circle, or [`CircleFit::empty`] when the sweep is degenerate.
    pub circle: CircleFit,
}

/// Magnitude against time for one frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct MagnitudeSeries {
    pub frequency_hz: u32,
    pub points: Vec<Point>,
}

/// The live slice of history plus the x-axis range to show it with.
#[derive(Debug, Clone, PartialEq)]
pub struct MagnitudeWindow {
    pub x_min: f64,
    pub x_max: f64,
    pub series: Vec<MagnitudeSeries>,
}

/// Turns measurements into display data and keeps the session history.
#[derive(Debug)]
pub struct MeasurementPipeline {
    config: SessionConfig,
    session_start: f64,
    history: Vec<HistoryEntry>,
}

impl MeasurementPipeline {
    pub fn new(config: SessionConfig, session_start: f64) -> Self {
        Self {
            config,
            session_start,
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session_start(&self) -> f64 {
        self.session_start
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Process one sweep and append it to the history.
    ///
    /// A sweep whose points cannot be fitted still counts; it carries the empty
    /// circle. A sweep older than the last stored one is rejected.
    #[tracing::instrument(level = "debug", skip_all, fields(timestamp = measurement.timestamp))]
    pub fn on_measurement(&mut self, measurement: Measurement) -> Result<DerivedResult, SessionError> {
        let time = measurement.timestamp - self.session_start;
        if let Some(last) = self.history.last() {
            if time < last.time {
                return Err(SessionError::NonMonotonicTimestamp {
                    previous: last.time,
                    current: time,
                });
            }
        }

        let points: Vec<Point> = measurement
            .samples
            .iter()
            .map(|s| Point::new(s.real, s.imag))
            .collect();
        let frequencies = measurement.samples.iter().map(|s| s.frequency_hz).collect();
        let magnitudes = measurement
            .samples
            .iter()
            .map(|s| MagnitudeSample {
                frequency_hz: s.frequency_hz,
                magnitude: s.magnitude(),
            })
            .collect();

        let circle = match circle_fit::fit(&points) {
            Ok(circle) => circle,
            Err(e) => {
                log::debug!("No circle for sweep at {:.3} s: {}", time, e);
                CircleFit::empty()
            }
        };

        self.history.push(HistoryEntry {
            time,
            measurement,
            circle: circle.clone(),
        });

        Ok(DerivedResult {
            time,
            points,
            frequencies,
            magnitudes,
            circle,
        })
    }

    /// Drop the history and start counting time from `session_start`.
    pub fn reset(&mut self, session_start: f64) {
        log::debug!(
            "Resetting session at {:.6} ({} entries dropped)",
            session_start,
            self.history.len()
        );
        self.history.clear();
        self.session_start = session_start;
    }

    /// Column names matching [`MeasurementPipeline::export_rows`].
    pub fn export_header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(1 + 2 * FREQUENCY_TABLE.len() + 3);
        header.push(TIME_COLUMN_NAME.to_string());
        for freq in FREQUENCY_TABLE {
            header.push(format!("{}Hz(Re)", freq));
            header.push(format!("{}Hz(Im)", freq));
        }
        header.extend(CIRCLE_COLUMN_NAMES.iter().map(|name| name.to_string()));
        header
    }

    /// One flat row per sweep: time, real/imag pairs, then circle center and radius.
    pub fn export_rows(&self) -> Vec<Vec<f64>> {
        self.history
            .iter()
            .map(|entry| {
                let mut row = Vec::with_capacity(1 + 2 * entry.measurement.samples.len() + 3);
                row.push(entry.time);
                for sample in &entry.measurement.samples {
                    row.push(sample.real);
                    row.push(sample.imag);
                }
                row.push(entry.circle.center_x);
                row.push(entry.circle.center_y);
                row.push(entry.circle.radius);
                row
            })
            .collect()
    }

    /// Per-frequency magnitudes over the last `display_window` seconds.
    pub fn magnitude_window(&self) -> MagnitudeWindow {
        let window = self.config.display_window;
        let Some(latest) = self.history.last().map(|e| e.time) else {
            return MagnitudeWindow {
                x_min: 0.0,
                x_max: window,
                series: FREQUENCY_TABLE
                    .iter()
                    .map(|&frequency_hz| MagnitudeSeries {
                        frequency_hz,
                        points: Vec::new(),
                    })
                    .collect(),
            };
        };

        let cutoff = latest - window;
        let first_visible = self.history.partition_point(|e| e.time < cutoff);
        let visible = &self.history[first_visible..];
        let earliest = visible.first().map_or(latest, |e| e.time);

        MagnitudeWindow {
            x_min: earliest.floor(),
            x_max: window.max(latest.ceil()),
            series: (0..FREQUENCY_TABLE.len())
                .map(|i| magnitude_series(visible, i))
                .collect(),
        }
    }

    /// Magnitude series of one frequency over the whole session.
    pub fn history_series(&self, index: usize) -> Option<MagnitudeSeries> {
        (index < FREQUENCY_TABLE.len()).then(|| magnitude_series(&self.history, index))
    }

    /// History as a table; samples missing from short sweeps are null.
    pub fn to_dataframe(&self) -> Result<DataFrame, PolarsError> {
        let header = self.export_header();
        let mut columns: Vec<Column> = Vec::with_capacity(header.len());

        let times: Vec<f64> = self.history.iter().map(|e| e.time).collect();
        columns.push(Series::new(TIME_COLUMN_NAME.into(), times).into());

        for i in 0..FREQUENCY_TABLE.len() {
            let real: Vec<Option<f64>> = self
                .history
                .iter()
                .map(|e| e.measurement.samples.get(i).map(|s| s.real))
                .collect();
            let imag: Vec<Option<f64>> = self
                .history
                .iter()
                .map(|e| e.measurement.samples.get(i).map(|s| s.imag))
                .collect();
            columns.push(Series::new(header[1 + 2 * i].as_str().into(), real).into());
            columns.push(Series::new(header[2 + 2 * i].as_str().into(), imag).into());
        }

        let [cx_name, cy_name, cr_name] = CIRCLE_COLUMN_NAMES;
        let cx: Vec<f64> = self.history.iter().map(|e| e.circle.center_x).collect();
        let cy: Vec<f64> = self.history.iter().map(|e| e.circle.center_y).collect();
        let cr: Vec<f64> = self.history.iter().map(|e| e.circle.radius).collect();
        columns.push(Series::new(cx_name.into(), cx).into());
        columns.push(Series::new(cy_name.into(), cy).into());
        columns.push(Series::new(cr_name.into(), cr).into());

        DataFrame::new(columns)
    }

    /// Write the history as CSV with the configured number of decimals.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), SessionError> {
        let mut df = self.to_dataframe()?;
        CsvWriter::new(writer)
            .include_header(true)
            .with_float_precision(Some(self.config.export_precision))
            .finish(&mut df)?;
        Ok(())
    }
}

fn magnitude_series(entries: &[HistoryEntry], index: usize) -> MagnitudeSeries {
    MagnitudeSeries {
        frequency_hz: FREQUENCY_TABLE[index],
        points: entries
            .iter()
            .filter_map(|e| {
                e.measurement
                    .samples
                    .get(index)
                    .map(|s| Point::new(e.time, s.magnitude()))
            })
            .collect(),
    }
}

/// Owns the inbound byte stream and the measurement history of one connection.
#[derive(Debug)]
pub struct EdaSession {
    decoder: FrameDecoder,
    pipeline: MeasurementPipeline,
}

impl Default for EdaSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl EdaSession {
    pub fn new(config: SessionConfig) -> Self {
        let decoder = match config.max_pending_bytes {
            Some(limit) => FrameDecoder::with_max_pending(limit),
            None => FrameDecoder::new(),
        };
        Self {
            decoder,
            pipeline: MeasurementPipeline::new(config, 0.0),
        }
    }

    pub fn pipeline(&self) -> &MeasurementPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut MeasurementPipeline {
        &mut self.pipeline
    }

    /// Bytes received but not yet terminated by a delimiter.
    pub fn pending_bytes(&self) -> usize {
        self.decoder.pending_len()
    }

    /// Feed one transport notification.
    ///
    /// Returns one entry per completed frame, in order. Failed frames are
    /// logged and reported without affecting the frames around them.
    #[tracing::instrument(level = "trace", skip_all, fields(len = bytes.len()))]
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<DerivedResult, SessionError>> {
        let mut results: Vec<_> = self
            .decoder
            .feed(bytes)
            .into_iter()
            .map(|frame| self.process_frame(&frame))
            .collect();

        if let Err(e) = self.decoder.check_overflow() {
            log::warn!("Dropping pending bytes: {}", e);
            results.push(Err(e.into()));
        }
        results
    }

    /// Read one chunk from `source` and feed it.
    pub fn pump<S: ByteSource>(
        &mut self,
        source: &mut S,
    ) -> Result<Vec<Result<DerivedResult, SessionError>>, LinkError> {
        let chunk = source.read_chunk()?;
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.feed(&chunk))
    }

    /// Begin a new recording: clear the history and take `now` as time zero.
    pub fn start(&mut self, now: SystemTime) {
        let start = DeviceTimestamp::from_system_time(now).as_seconds();
        self.pipeline.reset(start);
    }

    /// Delimited control frame that sets the device clock to `now`.
    pub fn timestamp_frame(now: SystemTime) -> Vec<u8> {
        encode_frame(&DeviceTimestamp::from_system_time(now).encode())
    }

    /// Send the clock-setting frame through `sink`.
    pub fn sync_clock<K: FrameSink>(&self, sink: &mut K, now: SystemTime) -> Result<(), LinkError> {
        let frame = Self::timestamp_frame(now);
        log::debug!("Sending device timestamp ({} bytes)", frame.len());
        sink.send_frame(&frame)
    }

    fn process_frame(&mut self, frame: &Frame) -> Result<DerivedResult, SessionError> {
        let result = frame
            .decode()
            .map_err(SessionError::from)
            .and_then(|payload| decode_measurement(&payload).map_err(SessionError::from))
            .and_then(|measurement| self.pipeline.on_measurement(measurement));

        if let Err(e) = &result {
            log::warn!("Discarding frame of {} bytes: {}", frame.len(), e);
        }
        result
    }
}
