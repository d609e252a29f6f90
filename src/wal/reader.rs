//! WAL Reader
//!
//! Reads frames back from the WAL file in order. A truncated or
//! checksum-corrupt frame ends the stream: both are treated as a tail torn
//! by a crash, and everything from that point on is discarded.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::Result;
use super::entry::{LogEntry, FRAME_HEADER_SIZE, MAX_ENTRY_SIZE};

/// A frame read back from the WAL
#[derive(Debug, Clone)]
pub struct WalRecord {
    /// Local frame sequence (dense, per data dir)
    pub frame_seq: u64,

    /// The logged entry
    pub entry: LogEntry,
}

/// Reads records from a WAL file
pub struct WalReader {
    /// `None` when the file does not exist (reads as empty)
    reader: Option<BufReader<File>>,
    /// Set once the end of the valid prefix was hit
    tail_reached: bool,
    /// Whether the stream ended because of a torn/corrupt frame
    tail_torn: bool,
    /// Byte length of the valid frame prefix read so far
    valid_len: u64,
}

impl WalReader {
    /// Open a WAL file for reading. A missing file reads as empty.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = match File::open(path) {
            Ok(f) => Some(BufReader::new(f)),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(WalReader {
            reader,
            tail_reached: false,
            tail_torn: false,
            valid_len: 0,
        })
    }

    /// Read the next record, or `None` at the end of the valid prefix.
    pub fn next_record(&mut self) -> Result<Option<WalRecord>> {
        if self.tail_reached {
            return Ok(None);
        }

        let outcome = match self.reader.as_mut() {
            Some(reader) => read_frame(reader)?,
            None => FrameOutcome::Eof,
        };

        match outcome {
            FrameOutcome::Record(record, frame_len) => {
                self.valid_len += frame_len;
                Ok(Some(record))
            }
            FrameOutcome::Eof => {
                self.tail_reached = true;
                Ok(None)
            }
            FrameOutcome::Torn(why) => {
                tracing::warn!("WAL tail discarded: {}", why);
                self.tail_reached = true;
                self.tail_torn = true;
                Ok(None)
            }
        }
    }

    /// Iterate records with frame sequence strictly greater than `after_seq`.
    pub fn replay(self, after_seq: u64) -> WalIterator {
        WalIterator {
            reader: self,
            after_seq,
        }
    }

    /// Whether reading ended at a torn/corrupt frame (vs. a clean EOF)
    pub fn tail_was_torn(&self) -> bool {
        self.tail_torn
    }

    /// Byte length of the valid frame prefix consumed so far. After the
    /// stream ends this is where a torn tail should be truncated.
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }
}

/// Iterator over WAL records after a given frame sequence
pub struct WalIterator {
    reader: WalReader,
    after_seq: u64,
}

impl Iterator for WalIterator {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.next_record() {
                Ok(Some(record)) if record.frame_seq <= self.after_seq => continue,
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

enum FrameOutcome {
    /// A valid record and its total frame length in bytes
    Record(WalRecord, u64),
    Eof,
    Torn(&'static str),
}

/// Read one complete frame. Only hard IO errors become `Err`; any shortfall
/// or mismatch is reported as a torn tail.
fn read_frame(reader: &mut BufReader<File>) -> Result<FrameOutcome> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match read_exact_or_eof(reader, &mut header)? {
        ReadOutcome::Eof => return Ok(FrameOutcome::Eof),
        ReadOutcome::Partial => return Ok(FrameOutcome::Torn("truncated frame header")),
        ReadOutcome::Full => {}
    }

    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let frame_seq = u64::from_be_bytes([
        header[4], header[5], header[6], header[7], header[8], header[9], header[10], header[11],
    ]);
    let crc = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);

    if len > MAX_ENTRY_SIZE {
        return Ok(FrameOutcome::Torn("frame length exceeds maximum"));
    }

    let mut payload = vec![0u8; len];
    match read_exact_or_eof(reader, &mut payload)? {
        ReadOutcome::Full => {}
        ReadOutcome::Eof | ReadOutcome::Partial => {
            return Ok(FrameOutcome::Torn("truncated frame payload"));
        }
    }

    if LogEntry::compute_crc(&payload) != crc {
        return Ok(FrameOutcome::Torn("checksum mismatch"));
    }

    match LogEntry::deserialize(&payload) {
        Ok(entry) => Ok(FrameOutcome::Record(
            WalRecord { frame_seq, entry },
            (FRAME_HEADER_SIZE + len) as u64,
        )),
        Err(_) => Ok(FrameOutcome::Torn("undecodable payload")),
    }
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

/// Fill `buf`, distinguishing a clean EOF (no bytes) from a partial read.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ReadOutcome::Full)
}
