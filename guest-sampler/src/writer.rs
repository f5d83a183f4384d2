//! Append-only record output shared by all vCPU threads.

use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};

use crate::error::EmitError;
use crate::record::encode;
use crate::walker::Sample;

/// Upper bound on write calls spent on a single record.
pub const MAX_WRITE_ATTEMPTS: usize = 8;

/// Serializes records into a sink, one whole record at a time.
///
/// Writes are done under a lock so records from concurrent vCPUs only ever
/// interleave at record boundaries. If a record is left half written, the
/// sink is closed: nothing may follow a partial record in the stream.
pub struct SampleWriter<W> {
    sink: Mutex<Option<W>>,
    max_attempts: usize,
}

impl<W: Write> SampleWriter<W> {
    pub fn new(sink: W) -> Self {
        Self::with_attempts(sink, MAX_WRITE_ATTEMPTS)
    }

    pub fn with_attempts(sink: W, max_attempts: usize) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
            max_attempts: max_attempts.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<W>> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Appends one sample to the sink.
    pub fn emit(&self, sample: &Sample) -> Result<(), EmitError> {
        let record = encode(sample);
        let bytes = record.as_bytes();

        let mut guard = self.lock();
        let sink = guard.as_mut().ok_or(EmitError::Closed)?;

        let mut written = 0;
        let mut attempts = 0;
        let result = loop {
            if written == bytes.len() {
                break Ok(());
            }
            if attempts == self.max_attempts {
                break Err(EmitError::Exhausted {
                    attempts,
                    written,
                    expected: bytes.len(),
                });
            }
            attempts += 1;

            match sink.write(&bytes[written..]) {
                Ok(0) => break Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(e)
                    if e.kind() == io::ErrorKind::Interrupted
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    continue
                }
                Err(e) => break Err(e.into()),
            }
        };

        if result.is_err() && written > 0 {
            tracing::error!(
                "record left half written ({} of {} bytes), closing output",
                written,
                bytes.len()
            );
            *guard = None;
        }

        result
    }

    /// Flushes and detaches the sink. Later emits fail with `Closed`.
    pub fn close(&self) -> Option<W> {
        let mut sink = self.lock().take()?;
        if let Err(e) = sink.flush() {
            tracing::warn!("could not flush output file: {}", e);
        }
        Some(sink)
    }
}
