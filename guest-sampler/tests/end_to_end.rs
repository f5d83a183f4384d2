//! End to end tests driving the sampler through a fake instrumentation host.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use guest_sampler::clock::{Clock, Timestamp};
use guest_sampler::error::{InstallError, RegisterError};
use guest_sampler::host::{install_with_clock, InstructionCallback, ShutdownHook};
use guest_sampler::memory::RegionMemory;
use guest_sampler::record::RecordReader;
use guest_sampler::regs::{CpuIndex, CpuStateSource, Target, WidthPolicy};
use guest_sampler::{HostRuntime, PointerWidth, Sample};

const START_US: u64 = 1_700_000_000_000_000;

struct FakeHost {
    target: String,
    on_insn: Option<InstructionCallback>,
    on_exit: Option<ShutdownHook>,
}

impl FakeHost {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_owned(),
            on_insn: None,
            on_exit: None,
        }
    }

    fn execute(&self, cpu: CpuIndex, ip: u64) {
        (self.on_insn.as_ref().expect("callback registered"))(cpu, ip)
    }

    fn exit(&mut self) {
        (self.on_exit.take().expect("shutdown hook registered"))()
    }
}

impl HostRuntime for FakeHost {
    fn target_name(&self) -> &str {
        &self.target
    }

    fn register_instruction_executed(&mut self, callback: InstructionCallback) {
        self.on_insn = Some(callback);
    }

    fn register_shutdown_hook(&mut self, hook: ShutdownHook) {
        self.on_exit = Some(hook);
    }
}

/// Clock moved by hand, in microseconds.
#[derive(Clone)]
struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    fn new() -> Self {
        Self(Arc::new(AtomicU64::new(START_US)))
    }

    fn set_offset_ms(&self, ms: u64) {
        self.0.store(START_US + ms * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from(Duration::from_micros(self.0.load(Ordering::SeqCst)))
    }
}

/// x86_64 CPU state images, one per vCPU, all in long mode.
struct LongModeCpus {
    images: Vec<Vec<u8>>,
}

impl LongModeCpus {
    fn new(frame_pointers: &[u64]) -> Self {
        let layout = Target::X86_64.layout();
        let WidthPolicy::LongMode { efer_offset } = layout.width else {
            panic!("x86_64 width must follow long mode");
        };
        let fp_offset = layout.regs_offset + 5 * 8;
        let size = efer_offset.max(fp_offset) + 8;

        let images = frame_pointers
            .iter()
            .map(|fp| {
                let mut image = vec![0u8; size];
                image[fp_offset..fp_offset + 8].copy_from_slice(&fp.to_le_bytes());
                image[efer_offset..efer_offset + 8].copy_from_slice(&(1u64 << 8).to_le_bytes());
                image
            })
            .collect();

        Self { images }
    }
}

impl CpuStateSource for LongModeCpus {
    fn read_state(
        &self,
        cpu: CpuIndex,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<(), RegisterError> {
        let image = self
            .images
            .get(cpu as usize)
            .ok_or(RegisterError::NoSuchCpu(cpu))?;
        let src = image
            .get(offset..offset + buf.len())
            .ok_or(RegisterError::OutOfBounds {
                offset,
                len: buf.len(),
            })?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

/// Three valid frames, the last one pointing at unmapped memory.
fn three_frame_stack() -> RegionMemory {
    let mut mem = RegionMemory::new();
    mem.map_pointers(0x7000, PointerWidth::Eight, &[0x7100, 0xffff_ffff_8100_0001]);
    mem.map_pointers(0x7100, PointerWidth::Eight, &[0x7200, 0xffff_ffff_8100_0002]);
    mem.map_pointers(0x7200, PointerWidth::Eight, &[0xdead_0000, 0xffff_ffff_8100_0003]);
    mem
}

fn output_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "guest-sampler-{}-{}.prof",
        name,
        std::process::id()
    ))
}

fn read_profile(path: &Path) -> Vec<Sample> {
    let bytes = std::fs::read(path).unwrap();
    std::fs::remove_file(path).unwrap_or_default();
    RecordReader::new(bytes.as_slice())
        .collect::<std::io::Result<Vec<_>>>()
        .unwrap()
}

#[test]
fn walks_until_invalid_address() {
    let path = output_path("walk");
    let out = format!("out={}", path.display());
    let mut host = FakeHost::new("x86_64");

    let sampler = install_with_clock(
        &mut host,
        three_frame_stack(),
        LongModeCpus::new(&[0x7000]),
        &[out.as_str(), "delay=0"],
        ManualClock::new(),
    )
    .unwrap();

    host.execute(0, 0xffff_ffff_8100_1000);
    host.execute(0, 0xffff_ffff_8100_2000);
    host.exit();

    let samples = read_profile(&path);
    assert_eq!(samples.len(), 2);
    assert_eq!(
        samples[0].frames(),
        &[
            0xffff_ffff_8100_1000,
            0xffff_ffff_8100_0001,
            0xffff_ffff_8100_0002,
            0xffff_ffff_8100_0003
        ]
    );
    assert_eq!(samples[1].len(), 4);
    assert_eq!(samples[1].frames()[0], 0xffff_ffff_8100_2000);
    assert_eq!(sampler.stats().snapshot().written, 2);
}

#[test]
fn null_frame_pointer_records_only_ip() {
    let path = output_path("nullfp");
    let out = format!("out={}", path.display());
    let mut host = FakeHost::new("x86_64");

    install_with_clock(
        &mut host,
        three_frame_stack(),
        LongModeCpus::new(&[0]),
        &[out.as_str(), "delay=0"],
        ManualClock::new(),
    )
    .unwrap();

    host.execute(0, 0x40_1000);
    host.exit();

    let samples = read_profile(&path);
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].frames(), &[0x40_1000]);
}

#[test]
fn one_second_delay_gates_samples() {
    let path = output_path("delay");
    let out = format!("out={}", path.display());
    let mut host = FakeHost::new("x86_64");
    let clock = ManualClock::new();

    install_with_clock(
        &mut host,
        three_frame_stack(),
        LongModeCpus::new(&[0]),
        &[out.as_str(), "delay=1000000"],
        clock.clone(),
    )
    .unwrap();

    host.execute(0, 0x1);
    clock.set_offset_ms(500);
    host.execute(0, 0x2);
    clock.set_offset_ms(1100);
    host.execute(0, 0x3);
    host.exit();

    let ips = read_profile(&path)
        .iter()
        .map(|s| s.frames()[0])
        .collect::<Vec<_>>();
    assert_eq!(ips, vec![0x1, 0x3]);
}

#[test]
fn events_after_exit_are_dropped() {
    let path = output_path("exit");
    let out = format!("out={}", path.display());
    let mut host = FakeHost::new("x86_64");

    let sampler = install_with_clock(
        &mut host,
        three_frame_stack(),
        LongModeCpus::new(&[0]),
        &[out.as_str(), "delay=0"],
        ManualClock::new(),
    )
    .unwrap();

    host.execute(0, 0x1);
    host.exit();
    host.execute(0, 0x2);

    assert!(sampler.is_shut_down());
    assert_eq!(read_profile(&path).len(), 1);
}

#[test]
fn concurrent_vcpus_write_whole_records() {
    let path = output_path("smp");
    let out = format!("out={}", path.display());
    let mut host = FakeHost::new("x86_64");

    // odd CPUs walk the three frame chain, even ones have no frame pointer
    let fps = (0..8)
        .map(|cpu| if cpu % 2 == 1 { 0x7000 } else { 0 })
        .collect::<Vec<_>>();
    install_with_clock(
        &mut host,
        three_frame_stack(),
        LongModeCpus::new(&fps),
        &[out.as_str(), "delay=0"],
        ManualClock::new(),
    )
    .unwrap();

    let callback = Arc::new(host.on_insn.take().expect("callback registered"));
    let handles = (0..8u32)
        .map(|cpu| {
            let callback = callback.clone();
            std::thread::spawn(move || {
                for i in 0..500u64 {
                    callback(cpu, ((cpu as u64) << 32) | i);
                }
            })
        })
        .collect::<Vec<_>>();
    for h in handles {
        h.join().unwrap();
    }
    host.exit();

    let samples = read_profile(&path);
    assert_eq!(samples.len(), 8 * 500);
    for sample in &samples {
        let cpu = sample.frames()[0] >> 32;
        let expected = if cpu % 2 == 1 { 4 } else { 1 };
        assert_eq!(sample.len(), expected, "bad record {:?}", sample);
    }
}

#[test]
fn unsupported_target_is_rejected() {
    let mut host = FakeHost::new("aarch64");
    let err = install_with_clock(
        &mut host,
        RegionMemory::new(),
        LongModeCpus::new(&[0]),
        &[],
        ManualClock::new(),
    )
    .err()
    .unwrap();

    assert!(matches!(err, InstallError::UnsupportedTarget(_)));
    assert_eq!(err.exit_code(), 3);
    assert!(host.on_insn.is_none());
    assert!(host.on_exit.is_none());
}

#[test]
fn unknown_option_is_rejected() {
    let mut host = FakeHost::new("i386");
    let err = install_with_clock(
        &mut host,
        RegionMemory::new(),
        LongModeCpus::new(&[0]),
        &["frequency=99"],
        ManualClock::new(),
    )
    .err()
    .unwrap();

    assert_eq!(err.exit_code(), 1);
    assert_eq!(err.to_string(), "invalid argument: frequency");
    assert!(host.on_insn.is_none());
}

#[test]
fn unopenable_output_is_rejected() {
    let mut host = FakeHost::new("x86_64");
    let missing = std::env::temp_dir()
        .join(format!("guest-sampler-missing-{}", std::process::id()))
        .join("profile");
    let out = format!("out={}", missing.display());

    let err = install_with_clock(
        &mut host,
        RegionMemory::new(),
        LongModeCpus::new(&[0]),
        &[out.as_str()],
        ManualClock::new(),
    )
    .err()
    .unwrap();

    assert!(matches!(err, InstallError::Sink { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(host.on_insn.is_none());
}
