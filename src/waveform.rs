//! Calibrated waveforms: voltage/time conversion, normalization, saturation
//! detection, and edge trimming.

use crate::config::{ParserConfig, RangeCenterSign};
use crate::file::{RawEvent, TimeCalibration};
use crate::format::{DrsError, Result};
use chrono::NaiveDateTime;

/// One calibrated sample: time in nanoseconds from an arbitrary per-event
/// origin, voltage in millivolts.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct WaveformSample {
    pub time: f64,
    pub voltage: f64,
}

/// One channel's ordered sample sequence.
#[derive(Clone, Debug)]
pub struct WaveformChannel {
    pub number: u8,
    pub samples: Vec<WaveformSample>,
}

impl WaveformChannel {
    /// Shift every sample time by the given offset.
    pub fn shift_time(&mut self, offset: f64) {
        for sample in &mut self.samples {
            sample.time += offset;
        }
    }

    /// Piecewise-linear interpolation at time `t`.
    ///
    /// The bracketing pair is the latest sample with `time <= t` and the
    /// earliest with `time >= t`. Outside the sampled range the nearest edge
    /// pair extrapolates. Two bracketing samples at the same time yield a
    /// flat (slope 0) segment instead of dividing by zero.
    pub fn interpolate(&self, t: f64) -> f64 {
        let s = &self.samples;
        match s.len() {
            0 => 0.0,
            1 => s[0].voltage,
            _ => {
                let hi = s.partition_point(|p| p.time < t).clamp(1, s.len() - 1);
                let (a, b) = (s[hi - 1], s[hi]);
                if t == a.time {
                    return a.voltage;
                }
                if t == b.time {
                    return b.voltage;
                }
                let dt = b.time - a.time;
                let slope = if dt == 0.0 { 0.0 } else { (b.voltage - a.voltage) / dt };
                a.voltage + slope * (t - a.time)
            }
        }
    }

    /// Drop leading samples up to the first rising-activity crossing.
    ///
    /// Scans forward comparing the mean of the trailing window `[i-w, i)`
    /// against the leading window `[i, i+w)`; at the first index where the
    /// leading mean dominates and the sample itself clears `threshold`,
    /// everything before `i - w` is removed. Without a crossing the channel
    /// is left untouched.
    pub fn trim_start(&mut self, window: usize, threshold: f64) {
        let n = self.samples.len();
        if window == 0 || n <= window {
            return;
        }
        for i in window..n {
            let trailing = self.window_mean(i - window, i, window);
            let leading = self.window_mean(i, (i + window).min(n), window);
            if leading.abs() > trailing.abs() && self.samples[i].voltage.abs() >= threshold {
                self.samples.drain(..i - window);
                return;
            }
        }
    }

    /// Mirror image of [`trim_start`](Self::trim_start): scans backward and
    /// truncates everything after `i + w` at the first crossing.
    pub fn trim_end(&mut self, window: usize, threshold: f64) {
        let n = self.samples.len();
        if window == 0 || n <= window {
            return;
        }
        for i in (0..n - window).rev() {
            let trailing = self.window_mean(i + 1, i + window + 1, window);
            let leading = self.window_mean(i.saturating_sub(window - 1), i + 1, window);
            if leading.abs() > trailing.abs() && self.samples[i].voltage.abs() >= threshold {
                self.samples.truncate(i + window + 1);
                return;
            }
        }
    }

    // Sum over [lo, hi), always divided by the nominal window size so
    // clipped windows near the array bounds weigh less.
    fn window_mean(&self, lo: usize, hi: usize, window: usize) -> f64 {
        let sum: f64 = self.samples[lo..hi].iter().map(|s| s.voltage).sum();
        sum / window as f64
    }
}

/// A fully calibrated trigger record: per-channel (time, voltage) samples
/// plus the event header fields carried over from the raw record.
#[derive(Clone, Debug)]
pub struct WaveformEvent {
    pub timestamp: NaiveDateTime,
    pub board: u16,
    pub serial: u32,
    pub range_center: i16,
    pub trigger_cell: u16,
    pub channels: Vec<WaveformChannel>,
}

impl WaveformEvent {
    /// Calibrate one raw event against the file's time calibration.
    ///
    /// Returns `Ok(None)` when the event's board does not match the
    /// calibration board; such events are dropped, never calibrated. An
    /// event channel without a matching calibration channel is a format
    /// error.
    pub fn calibrate(
        event: &RawEvent,
        time: &TimeCalibration,
        config: &ParserConfig,
    ) -> Result<Option<WaveformEvent>> {
        if event.board != time.board {
            return Ok(None);
        }

        let mut channels = Vec::with_capacity(event.channels.len());
        for raw in &event.channels {
            let widths = time
                .channel(raw.number)
                .ok_or(DrsError::MissingChannelCalibration {
                    serial: event.serial,
                    channel: raw.number,
                })?;
            channels.push(calibrate_channel(raw.number, &raw.samples, &widths.widths, event, config));
        }

        Ok(Some(WaveformEvent {
            timestamp: event.timestamp,
            board: time.board,
            serial: event.serial,
            range_center: event.range_center,
            trigger_cell: event.trigger_cell,
            channels,
        }))
    }

    /// Align every channel's first sample to the first channel's time origin.
    ///
    /// The first channel is the reference and is never shifted. This is a
    /// first-sample alignment, not a cable-delay correction.
    pub fn normalize_time(&mut self) {
        let reference = match self.channels.first().and_then(|c| c.samples.first()) {
            Some(sample) => sample.time,
            None => return,
        };
        for channel in &mut self.channels[1..] {
            if let Some(first) = channel.samples.first() {
                let offset = reference - first.time;
                channel.shift_time(offset);
            }
        }
    }

    /// True iff any sample in any channel lies strictly outside
    /// `range_center ± margin`.
    pub fn is_saturated(&self, margin: f64) -> bool {
        let center = self.range_center as f64;
        self.channels.iter().any(|channel| {
            channel
                .samples
                .iter()
                .any(|s| s.voltage > center + margin || s.voltage < center - margin)
        })
    }

    /// Trim transient edges from every channel per the configuration.
    pub fn trim(&mut self, config: &ParserConfig) {
        for channel in &mut self.channels {
            channel.trim_start(config.trim_window, config.trim_threshold);
            if config.trim_end {
                channel.trim_end(config.trim_window, config.trim_threshold);
            }
        }
    }
}

fn calibrate_channel(
    number: u8,
    adc: &[u16],
    widths: &[f32],
    event: &RawEvent,
    config: &ParserConfig,
) -> WaveformChannel {
    let cell = event.trigger_cell as usize;
    let mut samples = Vec::with_capacity(adc.len());
    let mut time = 0.0f64;
    for (i, &raw) in adc.iter().enumerate() {
        // Inclusive prefix sum over the ring buffer, starting at the
        // trigger cell: time(i) = sum of widths[(0..=i + cell) % len].
        time += widths[(i + cell) % widths.len()] as f64;
        samples.push(WaveformSample {
            time,
            voltage: convert_voltage(raw, event.range_center, config.range_center_sign),
        });
    }
    WaveformChannel { number, samples }
}

fn convert_voltage(adc: u16, range_center: i16, sign: RangeCenterSign) -> f64 {
    let base = 1000.0 * adc as f64 / 65535.0 - 500.0;
    match sign {
        RangeCenterSign::Additive => base + range_center as f64,
        RangeCenterSign::Subtractive => base - range_center as f64,
    }
}
