//! DRS4 file decoding: time calibration, event records, and the
//! decode→calibrate→clean pipeline.

use crate::config::ParserConfig;
use crate::format::{
    parse_channel_tag, DrsError, Result, SegmentIndex, EVENT_CHANNEL_BLOCK, EVENT_HEADER_LEN,
    TIME_CHANNEL_BLOCK,
};
use crate::waveform::WaveformEvent;
use chrono::{NaiveDate, NaiveDateTime};
use rayon::prelude::*;
use std::fs;
use std::path::Path;
use tracing::debug;

// Callers validate span lengths before slicing.
fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn read_i16(bytes: &[u8]) -> i16 {
    i16::from_le_bytes([bytes[0], bytes[1]])
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Calibrated bin widths (ns) for one channel, one entry per sampling cell.
#[derive(Clone, Debug)]
pub struct ChannelWidths {
    pub number: u8,
    pub widths: Vec<f32>,
}

/// Per-board time calibration decoded from the `TIME` segment.
#[derive(Clone, Debug)]
pub struct TimeCalibration {
    pub board: u16,
    pub channels: Vec<ChannelWidths>,
}

impl TimeCalibration {
    /// Decode the bytes between the `TIME` tag and the first `EHDR`.
    pub fn parse(span: &[u8]) -> Result<Self> {
        if span.len() < 4 || (span.len() - 4) % TIME_CHANNEL_BLOCK != 0 {
            return Err(DrsError::InconsistentTimeSpan(span.len()));
        }
        let board = read_u16(&span[2..4]);

        let mut channels = Vec::new();
        for block in span[4..].chunks_exact(TIME_CHANNEL_BLOCK) {
            let number = parse_channel_tag(&block[..4])?;
            if channels.iter().any(|c: &ChannelWidths| c.number == number) {
                return Err(DrsError::DuplicateChannel(number));
            }
            let widths = block[4..]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            channels.push(ChannelWidths { number, widths });
        }

        Ok(TimeCalibration { board, channels })
    }

    /// Bin widths for the given channel number, if calibrated.
    pub fn channel(&self, number: u8) -> Option<&ChannelWidths> {
        self.channels.iter().find(|c| c.number == number)
    }
}

/// Raw ADC samples and pass-through scaler for one channel of one event.
#[derive(Clone, Debug)]
pub struct RawChannel {
    pub number: u8,
    pub scaler: i32,
    pub samples: Vec<u16>,
}

/// One trigger record decoded from an `EHDR` segment, still in ADC counts.
#[derive(Clone, Debug)]
pub struct RawEvent {
    pub serial: u32,
    pub timestamp: NaiveDateTime,
    pub range_center: i16,
    pub board: u16,
    pub trigger_cell: u16,
    pub channels: Vec<RawChannel>,
}

impl RawEvent {
    /// Decode the bytes between one `EHDR` tag and the next.
    pub fn parse(span: &[u8]) -> Result<Self> {
        if span.len() < EVENT_HEADER_LEN
            || (span.len() - EVENT_HEADER_LEN) % EVENT_CHANNEL_BLOCK != 0
        {
            return Err(DrsError::InconsistentEventSpan(span.len()));
        }

        let serial = read_u32(&span[0..4]);
        let year = read_u16(&span[4..6]);
        let month = read_u16(&span[6..8]);
        let day = read_u16(&span[8..10]);
        let hour = read_u16(&span[10..12]);
        let minute = read_u16(&span[12..14]);
        let second = read_u16(&span[14..16]);
        let millisecond = read_u16(&span[16..18]);
        let range_center = read_i16(&span[18..20]);
        // bytes 20..22 reserved
        let board = read_u16(&span[22..24]);
        // bytes 24..26 reserved
        let trigger_cell = read_u16(&span[26..28]);

        // chrono admits ms 1000..=1999 as a leap second when second is 59;
        // the acquisition software never emits one, so ms > 999 is corrupt.
        let timestamp = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
            .filter(|_| millisecond <= 999)
            .and_then(|d| {
                d.and_hms_milli_opt(hour as u32, minute as u32, second as u32, millisecond as u32)
            })
            .ok_or_else(|| {
                DrsError::InvalidTimestamp(
                    serial,
                    format!(
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
                        year, month, day, hour, minute, second, millisecond
                    ),
                )
            })?;

        let mut channels = Vec::new();
        for block in span[EVENT_HEADER_LEN..].chunks_exact(EVENT_CHANNEL_BLOCK) {
            let number = parse_channel_tag(&block[..4])?;
            let scaler = read_i32(&block[4..8]);
            let samples = block[8..]
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect();
            channels.push(RawChannel { number, scaler, samples });
        }

        Ok(RawEvent {
            serial,
            timestamp,
            range_center,
            board,
            trigger_cell,
            channels,
        })
    }
}

/// Counts of events dropped by the pipeline. Neither is an error.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct ProcessStats {
    /// Events in the decoded file.
    pub events_total: usize,
    /// Events whose board did not match the file's calibration board.
    pub board_mismatches: usize,
    /// Events excluded for amplifier saturation.
    pub saturated: usize,
}

/// A decoded DRS4 binary file: format version, the single time calibration,
/// and every trigger record.
#[derive(Debug)]
pub struct DrsFile {
    pub file_path: String,
    pub version: u8,
    pub time: TimeCalibration,
    pub events: Vec<RawEvent>,
}

impl DrsFile {
    /// Read and decode a DRS4 binary file from disk.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(&path)?;
        let mut file = Self::parse(&bytes)?;
        file.file_path = path.as_ref().to_string_lossy().into_owned();
        Ok(file)
    }

    /// Decode a DRS4 file image held in memory.
    ///
    /// Scanning produces the full offset index first; the time segment and
    /// every event segment are then decoded as a parallel map over their
    /// disjoint byte ranges. Any malformed segment fails the whole file.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let index = SegmentIndex::build(bytes)?;
        let version = bytes[3] - b'0';

        let time = TimeCalibration::parse(&bytes[index.time_span.clone()])?;
        let events = index
            .event_spans
            .par_iter()
            .map(|span| RawEvent::parse(&bytes[span.clone()]))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            version,
            board = time.board,
            events = events.len(),
            "decoded DRS4 file"
        );

        Ok(DrsFile {
            file_path: String::new(),
            version,
            time,
            events,
        })
    }

    /// Run the calibrate→normalize→trim→saturation pipeline over every
    /// event, in parallel with order-preserving collection.
    ///
    /// Board-mismatched and saturated events are dropped and counted in the
    /// returned [`ProcessStats`]; only format defects (a channel without
    /// calibration) are errors.
    pub fn to_waveforms(&self, config: &ParserConfig) -> Result<(Vec<WaveformEvent>, ProcessStats)> {
        let calibrated = self
            .events
            .par_iter()
            .map(|event| {
                WaveformEvent::calibrate(event, &self.time, config).map(|maybe| {
                    maybe.map(|mut wave| {
                        wave.normalize_time();
                        if config.trim {
                            wave.trim(config);
                        }
                        wave
                    })
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut stats = ProcessStats {
            events_total: self.events.len(),
            ..Default::default()
        };
        let mut waves: Vec<WaveformEvent> = calibrated.into_iter().flatten().collect();
        stats.board_mismatches = stats.events_total - waves.len();

        if config.exclude_saturated {
            let before = waves.len();
            waves.retain(|wave| !wave.is_saturated(config.saturation_margin));
            stats.saturated = before - waves.len();
        }

        debug!(
            total = stats.events_total,
            mismatched = stats.board_mismatches,
            saturated = stats.saturated,
            retained = waves.len(),
            "calibrated waveform events"
        );

        Ok((waves, stats))
    }
}
