// src/lib.rs
// DRS Reader Library - Public API

//! # DRS Reader
//!
//! A Rust library for reading DRS4 evaluation board binary files.
//!
//! ## Features
//!
//! - Decode the `TIME` calibration segment and every `EHDR` event record
//! - Convert raw ADC counts into calibrated (time, voltage) waveforms
//! - Exclude amplifier-saturated events and trim transient edges
//! - Resample channels onto a common time axis and export CSV
//! - Parallel per-event decoding and calibration
//!
//! ## Example
//!
//! ```no_run
//! use drs_reader::{csv_file_name, DrsFile, ParserConfig};
//! use std::fs::File;
//!
//! let file = DrsFile::load_file("capture.dat").expect("Failed to load file");
//! println!("Board: {}", file.time.board);
//! println!("Events: {}", file.events.len());
//!
//! let config = ParserConfig::default();
//! let (waves, stats) = file.to_waveforms(&config).expect("Calibration failed");
//! println!("Dropped {} saturated events", stats.saturated);
//!
//! for wave in &waves {
//!     let out = File::create(csv_file_name(wave)).expect("Failed to create output");
//!     drs_reader::write_csv(wave, out, &config).expect("Failed to write CSV");
//! }
//! ```

mod config;
mod file;
mod format;
mod resample;
mod waveform;

pub use config::{ParserConfig, RangeCenterSign, ResamplePolicy};
pub use file::{ChannelWidths, DrsFile, ProcessStats, RawChannel, RawEvent, TimeCalibration};
pub use format::{validate, DrsError, Result, SegmentIndex, TagKind};
pub use resample::{csv_file_name, row_times, to_csv_string, write_csv};
pub use waveform::{WaveformChannel, WaveformEvent, WaveformSample};
