// DRS4 binary layout: tags, segment spans, and format errors

use std::collections::BTreeMap;
use std::io;
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DrsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Not a DRS4 file: leading tag {0:?} does not match DRS<digit>")]
    InvalidFileTag(String),

    #[error("No TIME segment found")]
    MissingTimeSegment,

    #[error("No EHDR segments found")]
    NoEvents,

    #[error("Time segment length {0} is not 4 + a multiple of 4100 bytes")]
    InconsistentTimeSpan(usize),

    #[error("Event segment length {0} is not 28 + a multiple of 2056 bytes")]
    InconsistentEventSpan(usize),

    #[error("Final event at offset {offset} is truncated ({len} bytes)")]
    TruncatedEvent { offset: u64, len: usize },

    #[error("Invalid channel tag {0:?}")]
    InvalidChannelTag(String),

    #[error("Duplicate channel {0} in time calibration")]
    DuplicateChannel(u8),

    #[error("Event {0}: impossible timestamp {1}")]
    InvalidTimestamp(u32, String),

    #[error("Event {serial}: channel {channel} has no time calibration")]
    MissingChannelCalibration { serial: u32, channel: u8 },
}

pub type Result<T> = std::result::Result<T, DrsError>;

/// Samples per channel in every DRS4 record.
pub const SAMPLES_PER_CHANNEL: usize = 1024;
/// Channel tag (4) + 1024 f32 bin widths.
pub const TIME_CHANNEL_BLOCK: usize = 4 + 4 * SAMPLES_PER_CHANNEL;
/// Fixed event header size after the EHDR tag.
pub const EVENT_HEADER_LEN: usize = 28;
/// Channel tag (4) + i32 scaler (4) + 1024 u16 ADC samples.
pub const EVENT_CHANNEL_BLOCK: usize = 4 + 4 + 2 * SAMPLES_PER_CHANNEL;

const TAG_LEN: usize = 4;

/// Kind of a 4-byte ASCII marker found in the byte stream.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TagKind {
    /// `DRS<digit>` file header, offset 0 only.
    File,
    /// `TIME` calibration segment header.
    Time,
    /// `EHDR` event segment header.
    Event,
    /// `C<3 digits>` channel block marker.
    Channel,
}

fn is_file_tag(word: &[u8]) -> bool {
    word.len() == TAG_LEN && &word[..3] == b"DRS" && word[3].is_ascii_digit()
}

fn classify(word: &[u8]) -> Option<TagKind> {
    match word {
        [b'T', b'I', b'M', b'E'] => Some(TagKind::Time),
        [b'E', b'H', b'D', b'R'] => Some(TagKind::Event),
        [b'C', rest @ ..] if rest.len() == 3 && rest.iter().all(u8::is_ascii_digit) => {
            Some(TagKind::Channel)
        }
        _ => None,
    }
}

/// Returns true iff the buffer starts with a `DRS<digit>` file tag.
pub fn validate(bytes: &[u8]) -> bool {
    bytes.len() >= TAG_LEN && is_file_tag(&bytes[..TAG_LEN])
}

/// Parse a `C<3 digits>` channel tag into its channel number.
pub fn parse_channel_tag(word: &[u8]) -> Result<u8> {
    let invalid = || DrsError::InvalidChannelTag(String::from_utf8_lossy(word).into_owned());
    if word.len() != TAG_LEN || word[0] != b'C' || !word[1..].iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    let number = word[1..]
        .iter()
        .fold(0u16, |acc, d| acc * 10 + (d - b'0') as u16);
    u8::try_from(number).map_err(|_| invalid())
}

/// Offset-ordered tag index plus the byte spans derived from it.
///
/// The Time span covers the bytes between the `TIME` tag and the first
/// `EHDR`; each event span runs from the end of one `EHDR` to the start of
/// the next, the final one to end of file. All record sizes are multiples
/// of 4, so tags sit on 4-byte word boundaries and the scanner steps the
/// stream one word at a time.
#[derive(Debug)]
pub struct SegmentIndex {
    pub tags: BTreeMap<u64, TagKind>,
    pub time_span: Range<usize>,
    pub event_spans: Vec<Range<usize>>,
}

impl SegmentIndex {
    /// Scan the whole buffer and derive the decode spans.
    ///
    /// Fails fast when the leading tag is wrong, when the `TIME` segment or
    /// all events are missing, or when the final event span cannot hold a
    /// whole number of channel blocks (a truncated file).
    pub fn build(bytes: &[u8]) -> Result<Self> {
        if !validate(bytes) {
            let head = &bytes[..bytes.len().min(TAG_LEN)];
            return Err(DrsError::InvalidFileTag(String::from_utf8_lossy(head).into_owned()));
        }

        let mut tags = BTreeMap::new();
        tags.insert(0, TagKind::File);
        let mut offset = TAG_LEN;
        while offset + TAG_LEN <= bytes.len() {
            if let Some(kind) = classify(&bytes[offset..offset + TAG_LEN]) {
                tags.insert(offset as u64, kind);
            }
            offset += TAG_LEN;
        }

        let time_off = tags
            .iter()
            .find(|(_, k)| **k == TagKind::Time)
            .map(|(off, _)| *off as usize)
            .ok_or(DrsError::MissingTimeSegment)?;
        let event_offs: Vec<usize> = tags
            .iter()
            .filter(|(_, k)| **k == TagKind::Event)
            .map(|(off, _)| *off as usize)
            .collect();
        let first_event = *event_offs.first().ok_or(DrsError::NoEvents)?;
        if first_event < time_off + TAG_LEN {
            return Err(DrsError::InconsistentTimeSpan(0));
        }
        let time_span = time_off + TAG_LEN..first_event;

        let mut event_spans = Vec::with_capacity(event_offs.len());
        for (i, &off) in event_offs.iter().enumerate() {
            let end = event_offs.get(i + 1).copied().unwrap_or(bytes.len());
            event_spans.push(off + TAG_LEN..end);
        }

        // The last event has no closing marker, so a short read would
        // otherwise go unnoticed until calibration.
        if let Some(last) = event_spans.last() {
            let last_len = last.end - last.start;
            if last_len < EVENT_HEADER_LEN || (last_len - EVENT_HEADER_LEN) % EVENT_CHANNEL_BLOCK != 0 {
                return Err(DrsError::TruncatedEvent {
                    offset: (last.start - TAG_LEN) as u64,
                    len: last_len,
                });
            }
        }

        Ok(SegmentIndex { tags, time_span, event_spans })
    }
}
