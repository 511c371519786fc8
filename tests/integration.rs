// tests/integration.rs
// End-to-end tests for DRS Reader over synthetic DRS4 files

use drs_reader::{
    csv_file_name, validate, DrsError, DrsFile, ParserConfig, RangeCenterSign, ResamplePolicy,
};
use std::io::Write;
use tempfile::NamedTempFile;

const SAMPLES: usize = 1024;

struct EventSpec {
    serial: u32,
    board: u16,
    range_center: i16,
    trigger_cell: u16,
    /// (channel number, constant ADC level)
    channels: Vec<(u8, u16)>,
}

impl EventSpec {
    fn flat(serial: u32, board: u16, level: u16) -> Self {
        EventSpec {
            serial,
            board,
            range_center: 0,
            trigger_cell: 0,
            channels: vec![(1, level)],
        }
    }
}

/// Build a complete synthetic DRS4 file image: file tag, TIME segment with
/// constant per-channel bin widths, then one EHDR segment per `EventSpec`.
fn build_drs_file(board: u16, channels: &[(u8, f32)], events: &[EventSpec]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"DRS4");

    bytes.extend_from_slice(b"TIME");
    bytes.extend_from_slice(&[0u8; 2]);
    bytes.extend_from_slice(&board.to_le_bytes());
    for &(number, width) in channels {
        bytes.extend_from_slice(format!("C{:03}", number).as_bytes());
        for _ in 0..SAMPLES {
            bytes.extend_from_slice(&width.to_le_bytes());
        }
    }

    for event in events {
        bytes.extend_from_slice(b"EHDR");
        bytes.extend_from_slice(&event.serial.to_le_bytes());
        for field in [2021u16, 5, 3, 14, 30, 27, 123] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        bytes.extend_from_slice(&event.range_center.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 2]);
        bytes.extend_from_slice(&event.board.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 2]);
        bytes.extend_from_slice(&event.trigger_cell.to_le_bytes());
        for &(number, level) in &event.channels {
            bytes.extend_from_slice(format!("C{:03}", number).as_bytes());
            bytes.extend_from_slice(&0i32.to_le_bytes());
            for _ in 0..SAMPLES {
                bytes.extend_from_slice(&level.to_le_bytes());
            }
        }
    }

    bytes
}

fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(bytes).expect("Failed to write temp file");
    file.flush().unwrap();
    file
}

#[test]
fn test_load_and_calibrate() {
    let events = vec![EventSpec::flat(1, 2760, 32768), EventSpec::flat(2, 2760, 32768)];
    let bytes = build_drs_file(2760, &[(1, 0.2)], &events);
    let temp = write_temp(&bytes);

    let file = DrsFile::load_file(temp.path()).expect("Failed to load DRS4 file");
    assert_eq!(file.version, 4);
    assert_eq!(file.time.board, 2760);
    assert_eq!(file.time.channels[0].widths.len(), SAMPLES);
    assert_eq!(file.events.len(), 2);
    assert_eq!(file.events[0].channels[0].samples.len(), SAMPLES);

    let config = ParserConfig::default();
    let (waves, stats) = file.to_waveforms(&config).expect("Calibration failed");
    assert_eq!(waves.len(), 2);
    assert_eq!(stats.board_mismatches, 0);
    assert_eq!(stats.saturated, 0);

    // Constant 0.2 ns bin widths: time(i) = 0.2 * (i + 1).
    let samples = &waves[0].channels[0].samples;
    assert!((samples[0].time - 0.2).abs() < 1e-6);
    assert!((samples[9].time - 2.0).abs() < 1e-5);
    // ADC midpoint sits just above 0 mV.
    assert!(samples.iter().all(|s| s.voltage.abs() < 0.01));
}

#[test]
fn test_validate_rejects_foreign_files() {
    let bytes = build_drs_file(2760, &[(1, 0.2)], &[EventSpec::flat(1, 2760, 0)]);
    assert!(validate(&bytes));
    assert!(!validate(b"RIFF1234"));

    let temp = write_temp(b"This is not a DRS4 file");
    let result = DrsFile::load_file(temp.path());
    assert!(matches!(result, Err(DrsError::InvalidFileTag(_))));
}

#[test]
fn test_truncated_final_event_is_rejected() {
    let bytes = build_drs_file(2760, &[(1, 0.2)], &[EventSpec::flat(1, 2760, 0)]);
    let cut = &bytes[..bytes.len() - 100];
    let temp = write_temp(cut);
    let result = DrsFile::load_file(temp.path());
    assert!(matches!(result, Err(DrsError::TruncatedEvent { .. })));
}

#[test]
fn test_board_mismatch_and_saturation_counts() {
    let events = vec![
        EventSpec::flat(1, 2760, 32768),
        EventSpec::flat(2, 9999, 32768), // wrong board
        EventSpec::flat(3, 2760, 65535), // saturated at +500 mV
    ];
    let bytes = build_drs_file(2760, &[(1, 0.2)], &events);
    let file = DrsFile::parse(&bytes).expect("Failed to parse");

    let (waves, stats) = file.to_waveforms(&ParserConfig::default()).unwrap();
    assert_eq!(stats.events_total, 3);
    assert_eq!(stats.board_mismatches, 1);
    assert_eq!(stats.saturated, 1);
    assert_eq!(waves.len(), 1);
    assert_eq!(waves[0].serial, 1);
}

#[test]
fn test_multi_channel_time_normalization() {
    // Channel 2 has wider bins, so its raw time origin differs;
    // normalization aligns the first samples to channel 1's origin.
    let mut event = EventSpec::flat(1, 2760, 32768);
    event.channels = vec![(1, 32768), (2, 32768)];
    let bytes = build_drs_file(2760, &[(1, 0.2), (2, 0.3)], &[event]);
    let file = DrsFile::parse(&bytes).expect("Failed to parse");

    let config = ParserConfig {
        trim: false,
        ..ParserConfig::default()
    };
    let (waves, _) = file.to_waveforms(&config).unwrap();
    let wave = &waves[0];
    assert_eq!(wave.channels.len(), 2);
    let first_times: Vec<f64> = wave
        .channels
        .iter()
        .map(|c| c.samples[0].time)
        .collect();
    assert!((first_times[0] - 0.2).abs() < 1e-6);
    assert!((first_times[0] - first_times[1]).abs() < 1e-9);
}

#[test]
fn test_csv_export_shape_and_name() {
    let bytes = build_drs_file(2760, &[(1, 0.2)], &[EventSpec::flat(7, 2760, 32768)]);
    let file = DrsFile::parse(&bytes).expect("Failed to parse");
    let config = ParserConfig {
        resample: ResamplePolicy::NativeGrid,
        trim: false,
        ..ParserConfig::default()
    };
    let (waves, _) = file.to_waveforms(&config).unwrap();

    assert_eq!(csv_file_name(&waves[0]), "DRS4_2760_2021-05-03_1430271230_7.csv");

    let text = drs_reader::to_csv_string(&waves[0], &config).expect("Failed to serialize");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "\"Time\",\"Channel 1\"");
    assert_eq!(lines.len(), 1 + SAMPLES); // native grid: one row per sample time
    assert!(lines[1..].iter().all(|l| l.starts_with('"') && l.contains(',')));
}

#[test]
fn test_subtractive_range_center_convention() {
    let mut event = EventSpec::flat(1, 2760, 0);
    event.range_center = 100;
    let bytes = build_drs_file(2760, &[(1, 0.2)], &[event]);
    let file = DrsFile::parse(&bytes).expect("Failed to parse");

    let config = ParserConfig {
        trim: false,
        exclude_saturated: false,
        range_center_sign: RangeCenterSign::Subtractive,
        ..ParserConfig::default()
    };
    let (waves, _) = file.to_waveforms(&config).unwrap();
    // adc = 0 with subtractive convention: -500 - 100 mV.
    assert!((waves[0].channels[0].samples[0].voltage + 600.0).abs() < 1e-9);
}
