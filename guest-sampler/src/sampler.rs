//! Sampler state and the per-instruction sampling path.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::clock::{Clock, ClockGate};
use crate::error::{EmitError, RegisterError};
use crate::memory::GuestMemory;
use crate::regs::{CpuIndex, RegisterAccessor};
use crate::walker::{walk, Sample};
use crate::writer::SampleWriter;

/// Output sink of a sampler.
pub type Sink = Box<dyn Write + Send>;

/// Counters of what happened to accepted samples.
#[derive(Debug, Default)]
pub struct SamplerStats {
    accepted: AtomicU64,
    written: AtomicU64,
    abandoned: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`SamplerStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Samples that passed the clock gate
    pub accepted: u64,
    pub written: u64,
    /// Samples given up because registers could not be read
    pub abandoned: u64,
    /// Samples lost to a failed or closed sink
    pub dropped: u64,
}

impl SamplerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Samples accepted: {}, written: {}, abandoned: {}, dropped: {}",
            s.accepted, s.written, s.abandoned, s.dropped
        )
    }
}

/// Process-wide sampling state, shared by every vCPU callback.
///
/// Only the clock gate threshold and the sink are mutated after
/// construction, each behind its own synchronization.
pub struct Sampler {
    gate: ClockGate,
    clock: Box<dyn Clock>,
    registers: Box<dyn RegisterAccessor>,
    memory: Box<dyn GuestMemory>,
    writer: SampleWriter<Sink>,
    stats: SamplerStats,
    shut_down: AtomicBool,
    /// Set once the closed output has been reported
    output_lost: AtomicBool,
}

impl Sampler {
    pub fn new(
        gate: ClockGate,
        clock: Box<dyn Clock>,
        registers: Box<dyn RegisterAccessor>,
        memory: Box<dyn GuestMemory>,
        sink: Sink,
    ) -> Self {
        Self {
            gate,
            clock,
            registers,
            memory,
            writer: SampleWriter::new(sink),
            stats: SamplerStats::default(),
            shut_down: AtomicBool::new(false),
            output_lost: AtomicBool::new(false),
        }
    }

    pub fn gate(&self) -> &ClockGate {
        &self.gate
    }

    pub fn stats(&self) -> &SamplerStats {
        &self.stats
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Instruction execution callback: samples the stack of `cpu` if the
    /// sampling delay has expired. Never fails.
    #[inline]
    pub fn on_instruction(&self, cpu: CpuIndex, ip: u64) {
        if self.is_shut_down() || !self.gate.should_sample(self.clock.now()) {
            return;
        }
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);

        let sample = match self.capture(cpu, ip) {
            Ok(sample) => sample,
            Err(e) => {
                tracing::debug!("abandoning sample on cpu {}: {}", cpu, e);
                self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match self.writer.emit(&sample) {
            Ok(()) => {
                self.stats.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(EmitError::Closed) => {
                if !self.is_shut_down() && !self.output_lost.swap(true, Ordering::Relaxed) {
                    tracing::warn!("output closed before exit, dropping all further samples");
                }
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!("{}", e);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Reads the registers of `cpu` and walks its stack.
    pub fn capture(&self, cpu: CpuIndex, ip: u64) -> Result<Sample, RegisterError> {
        let regs = self.registers.snapshot(cpu)?;
        Ok(walk(ip, regs.frame_pointer, regs.width, &*self.memory))
    }

    /// Stops sampling and closes the sink. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.writer.close();
        tracing::info!("{}", self.stats.summary());
    }
}
