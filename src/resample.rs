//! Resampling calibrated waveforms onto a common time axis and writing the
//! result as quoted CSV.

use crate::config::{ParserConfig, ResamplePolicy};
use crate::format::Result;
use crate::waveform::WaveformEvent;
use chrono::Timelike;
use csv::{QuoteStyle, WriterBuilder};
use rayon::prelude::*;
use std::io::Write;
use tracing::trace;

/// Deterministic CSV name for one event:
/// `DRS4_<board>_<date>_<time+ffff>_<serial>.csv`, with `ffff` the
/// millisecond field scaled to ten-thousandths of a second.
pub fn csv_file_name(event: &WaveformEvent) -> String {
    let tenthous = event.timestamp.nanosecond() / 1_000_000 * 10;
    format!(
        "DRS4_{}_{}{:04}_{}.csv",
        event.board,
        event.timestamp.format("%Y-%m-%d_%H%M%S"),
        tenthous,
        event.serial
    )
}

/// Ascending row times for the event under the given policy.
pub fn row_times(event: &WaveformEvent, policy: ResamplePolicy) -> Vec<f64> {
    match policy {
        ResamplePolicy::FixedStep { step } => fixed_step_times(event, step),
        ResamplePolicy::NativeGrid => native_grid_times(event),
    }
}

// Regular grid from one step before the earliest sample to one step past
// the latest, each row time rounded to the step's decimal precision.
fn fixed_step_times(event: &WaveformEvent, step: f64) -> Vec<f64> {
    let starts = event.channels.iter().filter_map(|c| c.samples.first());
    let ends = event.channels.iter().filter_map(|c| c.samples.last());
    let start = starts.map(|s| s.time).fold(f64::INFINITY, f64::min);
    let stop = ends.map(|s| s.time).fold(f64::NEG_INFINITY, f64::max);
    if !start.is_finite() || !stop.is_finite() || step <= 0.0 {
        return Vec::new();
    }

    let digits = step.log10().abs().ceil() as i32;
    let factor = 10f64.powi(digits);

    let mut times = Vec::new();
    let stop = stop + step;
    let mut t = start - step;
    while t < stop {
        t = (t * factor).round() / factor;
        times.push(t);
        t += step;
    }
    times
}

// Sorted union of every raw sample time across all channels.
fn native_grid_times(event: &WaveformEvent) -> Vec<f64> {
    let mut times: Vec<f64> = event
        .channels
        .iter()
        .flat_map(|c| c.samples.iter().map(|s| s.time))
        .collect();
    times.sort_unstable_by(f64::total_cmp);
    times.dedup();
    times
}

/// Serialize one event as a quoted CSV table.
///
/// Header row is `"Time","Channel <n>",...`; each following row holds the
/// rounded row time and every channel's interpolated voltage. Rows are
/// computed as an order-preserving parallel map before any byte is written,
/// so output order never depends on scheduling. Decimals always use `.`
/// (Rust's float formatting is locale-independent).
pub fn write_csv<W: Write>(event: &WaveformEvent, wtr: W, config: &ParserConfig) -> Result<()> {
    let times = row_times(event, config.resample);
    trace!(serial = event.serial, rows = times.len(), "resampling event");

    let rows: Vec<Vec<String>> = times
        .par_iter()
        .map(|&t| {
            let mut row = Vec::with_capacity(event.channels.len() + 1);
            row.push(t.to_string());
            row.extend(event.channels.iter().map(|c| c.interpolate(t).to_string()));
            row
        })
        .collect();

    let mut csv = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(wtr);
    let mut header = vec!["Time".to_string()];
    header.extend(event.channels.iter().map(|c| format!("Channel {}", c.number)));
    csv.write_record(&header)?;
    for row in &rows {
        csv.write_record(row)?;
    }
    csv.flush()?;
    Ok(())
}

/// Convenience wrapper returning the CSV table as a string.
pub fn to_csv_string(event: &WaveformEvent, config: &ParserConfig) -> Result<String> {
    let mut buf = Vec::new();
    write_csv(event, &mut buf, config)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::{WaveformChannel, WaveformSample};
    use chrono::NaiveDate;

    fn test_event(channels: Vec<WaveformChannel>) -> WaveformEvent {
        WaveformEvent {
            timestamp: NaiveDate::from_ymd_opt(2021, 5, 3)
                .unwrap()
                .and_hms_milli_opt(14, 30, 27, 123)
                .unwrap(),
            board: 2760,
            serial: 42,
            range_center: 0,
            trigger_cell: 0,
            channels,
        }
    }

    fn channel(number: u8, samples: &[(f64, f64)]) -> WaveformChannel {
        WaveformChannel {
            number,
            samples: samples
                .iter()
                .map(|&(time, voltage)| WaveformSample { time, voltage })
                .collect(),
        }
    }

    #[test]
    fn file_name_is_deterministic() {
        let event = test_event(vec![]);
        assert_eq!(csv_file_name(&event), "DRS4_2760_2021-05-03_1430271230_42.csv");
    }

    #[test]
    fn fixed_step_grid_pads_one_step_each_side() {
        let event = test_event(vec![channel(1, &[(0.2, 0.0), (0.8, 0.0)])]);
        let times = row_times(&event, ResamplePolicy::FixedStep { step: 0.1 });
        // Grid runs from 0.1 up to (exclusive) the padded stop at 0.9.
        assert!((times[0] - 0.1).abs() < 1e-9);
        assert!((times.last().unwrap() - 0.8).abs() < 1e-9);
        assert_eq!(times.len(), 8);
        for pair in times.windows(2) {
            assert!((pair[1] - pair[0] - 0.1).abs() < 1e-9);
        }
    }

    #[test]
    fn native_grid_is_sorted_union_of_sample_times() {
        let event = test_event(vec![
            channel(1, &[(0.3, 0.0), (0.1, 0.0)]),
            channel(2, &[(0.2, 0.0), (0.3, 0.0)]),
        ]);
        let times = row_times(&event, ResamplePolicy::NativeGrid);
        assert_eq!(times, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn empty_event_yields_no_rows() {
        let event = test_event(vec![channel(1, &[])]);
        assert!(row_times(&event, ResamplePolicy::FixedStep { step: 0.1 }).is_empty());
        assert!(row_times(&event, ResamplePolicy::NativeGrid).is_empty());
    }

    #[test]
    fn csv_table_shape_and_quoting() {
        let event = test_event(vec![
            channel(1, &[(0.0, -500.0), (1.0, 500.0)]),
            channel(3, &[(0.0, 0.0), (1.0, 100.0)]),
        ]);
        let config = ParserConfig {
            resample: ResamplePolicy::NativeGrid,
            ..ParserConfig::default()
        };
        let text = to_csv_string(&event, &config).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "\"Time\",\"Channel 1\",\"Channel 3\"");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "\"0\",\"-500\",\"0\"");
        assert_eq!(lines[2], "\"1\",\"500\",\"100\"");
    }

    #[test]
    fn csv_interpolates_between_samples() {
        let event = test_event(vec![channel(1, &[(0.0, 0.0), (1.0, 100.0)])]);
        let config = ParserConfig {
            resample: ResamplePolicy::FixedStep { step: 0.5 },
            ..ParserConfig::default()
        };
        let text = to_csv_string(&event, &config).unwrap();
        // Rows at -0.5, 0, 0.5, 1; the mid-row interpolates to 50 mV.
        assert!(text.lines().any(|l| l == "\"0.5\",\"50\""));
    }
}
