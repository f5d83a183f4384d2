//! Register snapshot access for the supported targets.
//!
//! The host exposes no register API to instrumentation callbacks, so
//! registers are read out of the opaque per-CPU host structure at known
//! byte offsets. Those offsets are tied to a specific host release and are
//! kept in [`CpuStateLayout`], never in the walker.

use guest_sampler_common::{read_pointer, PointerWidth};

use crate::error::RegisterError;

pub type CpuIndex = u32;

/// x86 general purpose register holding the frame pointer (EBP/RBP).
pub const X86_FRAME_POINTER_REG: usize = 5;

/// EFER.LME
const EFER_LONG_MODE: u64 = 1 << 8;

/// Raw access to the host's per-CPU state structure.
pub trait CpuStateSource: Send + Sync {
    fn read_state(
        &self,
        cpu: CpuIndex,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<(), RegisterError>;
}

/// Register values needed to start a stack walk.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegisterSnapshot {
    /// Zero-extended from the current pointer width
    pub frame_pointer: u64,
    pub width: PointerWidth,
}

/// Reads the frame pointer and current pointer width of a vCPU.
pub trait RegisterAccessor: Send + Sync {
    fn snapshot(&self, cpu: CpuIndex) -> Result<RegisterSnapshot, RegisterError>;
}

/// How the pointer width of a sample is determined.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WidthPolicy {
    /// Width never changes for the process lifetime.
    Fixed(PointerWidth),
    /// Re-read every sample from the long mode bit of EFER.
    LongMode { efer_offset: usize },
}

/// Byte offsets into the host CPU structure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CpuStateLayout {
    /// Start of the `target_ulong regs[]` general purpose register file
    pub regs_offset: usize,
    pub width: WidthPolicy,
}

/// Guest architectures that can be sampled.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Target {
    X86_64,
    I386,
}

impl Target {
    /// Resolves the host's target name (`x86_64`, `i386`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x86_64" => Some(Target::X86_64),
            "i386" => Some(Target::I386),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Target::X86_64 => "x86_64",
            Target::I386 => "i386",
        }
    }

    /// Width of the host's `target_ulong` for this target.
    pub fn ulong_width(&self) -> PointerWidth {
        match self {
            Target::X86_64 => PointerWidth::Eight,
            Target::I386 => PointerWidth::Four,
        }
    }

    /// Layout of the CPU structure for the supported host release.
    pub fn layout(&self) -> CpuStateLayout {
        // the register file offset is the same for both builds
        const REGS_OFFSET: usize = 10176;

        match self {
            Target::X86_64 => CpuStateLayout {
                regs_offset: REGS_OFFSET,
                width: WidthPolicy::LongMode {
                    efer_offset: 0x2a18,
                },
            },
            // an i386 guest can't enter long mode
            Target::I386 => CpuStateLayout {
                regs_offset: REGS_OFFSET,
                width: WidthPolicy::Fixed(PointerWidth::Four),
            },
        }
    }

    /// Builds the register accessor for this target.
    pub fn accessor<S: CpuStateSource + 'static>(&self, source: S) -> Box<dyn RegisterAccessor> {
        Box::new(X86Accessor::new(source, *self))
    }
}

/// Register accessor for x86 and x86-64 guests.
pub struct X86Accessor<S> {
    source: S,
    ulong_width: PointerWidth,
    layout: CpuStateLayout,
}

impl<S: CpuStateSource> X86Accessor<S> {
    pub fn new(source: S, target: Target) -> Self {
        Self::with_layout(source, target.ulong_width(), target.layout())
    }

    pub fn with_layout(source: S, ulong_width: PointerWidth, layout: CpuStateLayout) -> Self {
        Self {
            source,
            ulong_width,
            layout,
        }
    }

    fn register(&self, cpu: CpuIndex, id: usize) -> Result<u64, RegisterError> {
        let len = self.ulong_width.bytes();
        let offset = self.layout.regs_offset + id * len;
        let mut buf = [0u8; 8];
        self.source.read_state(cpu, offset, &mut buf[..len])?;
        read_pointer(&buf[..len], self.ulong_width)
            .ok_or(RegisterError::OutOfBounds { offset, len })
    }

    fn pointer_width(&self, cpu: CpuIndex) -> Result<PointerWidth, RegisterError> {
        match self.layout.width {
            WidthPolicy::Fixed(width) => Ok(width),
            WidthPolicy::LongMode { efer_offset } => {
                let mut buf = [0u8; 8];
                self.source.read_state(cpu, efer_offset, &mut buf)?;
                let efer = u64::from_le_bytes(buf);
                Ok(if efer & EFER_LONG_MODE != 0 {
                    PointerWidth::Eight
                } else {
                    PointerWidth::Four
                })
            }
        }
    }
}

impl<S: CpuStateSource> RegisterAccessor for X86Accessor<S> {
    fn snapshot(&self, cpu: CpuIndex) -> Result<RegisterSnapshot, RegisterError> {
        let width = self.pointer_width(cpu)?;
        let mut frame_pointer = self.register(cpu, X86_FRAME_POINTER_REG)?;
        if width == PointerWidth::Four {
            frame_pointer &= u32::MAX as u64;
        }

        Ok(RegisterSnapshot {
            frame_pointer,
            width,
        })
    }
}
