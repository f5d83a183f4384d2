//! Glue between the sampler and the host instrumentation runtime.
//!
//! The host translates guest code into blocks and lets the plugin attach a
//! callback to every translated instruction. That callback is what drives
//! sampling: it is the clock tick of the profiler.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use crate::clock::{Clock, ClockGate, SystemClock};
use crate::config::SamplerConfig;
use crate::error::InstallError;
use crate::memory::GuestMemory;
use crate::regs::{CpuIndex, CpuStateSource, Target};
use crate::sampler::Sampler;

/// Called with the executing vCPU and the address of the instruction.
pub type InstructionCallback = Box<dyn Fn(CpuIndex, u64) + Send + Sync>;
pub type ShutdownHook = Box<dyn FnOnce() + Send>;

/// Services offered by the host instrumentation runtime.
pub trait HostRuntime {
    /// Guest architecture name, e.g. `x86_64`
    fn target_name(&self) -> &str;

    /// Attaches `callback` to every instruction the host translates.
    fn register_instruction_executed(&mut self, callback: InstructionCallback);

    /// Runs `hook` once when the host exits.
    fn register_shutdown_hook(&mut self, hook: ShutdownHook);
}

/// Sets up sampling from the plugin arguments and hooks it into the host.
///
/// Nothing is registered if this fails; the error's
/// [`exit_code`](InstallError::exit_code) is what the host should report.
pub fn install<H, M, S>(
    host: &mut H,
    memory: M,
    cpu_state: S,
    args: &[&str],
) -> Result<Arc<Sampler>, InstallError>
where
    H: HostRuntime + ?Sized,
    M: GuestMemory + 'static,
    S: CpuStateSource + 'static,
{
    install_with_clock(host, memory, cpu_state, args, SystemClock)
}

pub fn install_with_clock<H, M, S, C>(
    host: &mut H,
    memory: M,
    cpu_state: S,
    args: &[&str],
    clock: C,
) -> Result<Arc<Sampler>, InstallError>
where
    H: HostRuntime + ?Sized,
    M: GuestMemory + 'static,
    S: CpuStateSource + 'static,
    C: Clock + 'static,
{
    let target = Target::from_name(host.target_name())
        .ok_or_else(|| InstallError::UnsupportedTarget(host.target_name().to_owned()))?;
    let config = SamplerConfig::from_args(args)?;
    let out = open_output(&config.out).map_err(|source| InstallError::Sink {
        path: config.out.clone(),
        source,
    })?;

    let gate = ClockGate::new(config.delay_us, clock.now());
    let sampler = Arc::new(Sampler::new(
        gate,
        Box::new(clock),
        target.accessor(cpu_state),
        Box::new(memory),
        Box::new(out),
    ));

    let on_insn = sampler.clone();
    host.register_instruction_executed(Box::new(move |cpu, ip| on_insn.on_instruction(cpu, ip)));

    let on_exit = sampler.clone();
    host.register_shutdown_hook(Box::new(move || on_exit.shutdown()));

    tracing::info!(
        "sampling {} guest every {}us into {}",
        target.name(),
        config.delay_us,
        config.out.display()
    );

    Ok(sampler)
}

/// Creates (or truncates) the output file.
fn open_output(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666);
    }
    options.open(path)
}
