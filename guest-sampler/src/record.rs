//! Binary sample record codec.
//!
//! `frame_count:u8` followed by `frame_count` little-endian `u64` frames,
//! no padding, no stream header.

use std::io::{self, Read};

use guest_sampler_common::{read_u64_le, record_len, FRAME_SIZE, MAX_DEPTH, MAX_RECORD_SIZE};

use crate::walker::Sample;

/// A sample encoded in wire format, ready to be written in one go.
pub struct EncodedRecord {
    buf: [u8; MAX_RECORD_SIZE],
    len: usize,
}

impl EncodedRecord {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub fn encode(sample: &Sample) -> EncodedRecord {
    let frames = sample.frames();
    let mut buf = [0u8; MAX_RECORD_SIZE];
    buf[0] = frames.len() as u8;
    for (slot, frame) in buf[1..]
        .chunks_exact_mut(FRAME_SIZE)
        .zip(frames.iter())
    {
        slot.copy_from_slice(&frame.to_le_bytes());
    }

    EncodedRecord {
        buf,
        len: record_len(frames.len()),
    }
}

/// Sequential reader over a profile stream.
///
/// Iteration ends at end of stream or at a truncated trailing record, which
/// is what an interrupted writer leaves behind.
pub struct RecordReader<R> {
    reader: R,
    records: usize,
    truncated: bool,
    failed: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            records: 0,
            truncated: false,
            failed: false,
        }
    }

    /// Number of complete records decoded so far.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Whether the stream ended in the middle of a record.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn next_record(&mut self) -> io::Result<Option<Sample>> {
        let mut count = [0u8; 1];
        if read_full(&mut self.reader, &mut count)? == 0 {
            return Ok(None);
        }

        let count = count[0] as usize;
        if count > MAX_DEPTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "record {} declares {} frames (max {})",
                    self.records, count, MAX_DEPTH
                ),
            ));
        }

        let mut body = [0u8; MAX_DEPTH * FRAME_SIZE];
        let body = &mut body[..count * FRAME_SIZE];
        if read_full(&mut self.reader, body)? < body.len() {
            tracing::debug!(
                "profile truncated after {} records, dropping partial record",
                self.records
            );
            self.truncated = true;
            return Ok(None);
        }

        let mut frames = [0u64; MAX_DEPTH];
        for (frame, chunk) in frames.iter_mut().zip(body.chunks_exact(FRAME_SIZE)) {
            let mut bytes = [0u8; FRAME_SIZE];
            bytes.copy_from_slice(chunk);
            *frame = read_u64_le(bytes);
        }

        self.records += 1;
        Ok(Sample::from_frames(&frames[..count]))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = io::Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.truncated || self.failed {
            return None;
        }
        let next = self.next_record();
        // record boundaries are lost after an error
        self.failed = next.is_err();
        next.transpose()
    }
}

/// Reads until `buf` is full or end of stream, returning the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
