use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use guest_sampler::fold::{collapse_lines, fold_stacks, total_samples, AddressFilter};
use guest_sampler::output::{
    CollapseSink, JsonFileSink, MultiplexSink, OutputSink, PrintSink, SvgSink,
};
use guest_sampler::record::RecordReader;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Opt {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Print every record of a profile file
    Dump {
        /// Profile file written by the sampler
        profile: PathBuf,
    },
    /// Fold a profile file into counted stacks
    Fold {
        /// Profile file written by the sampler
        profile: PathBuf,

        /// Drop frames below this address (eg. start of kernel text)
        #[arg(long, value_parser = parse_addr)]
        min_addr: Option<u64>,

        /// Drop frames above this address
        #[arg(long, value_parser = parse_addr)]
        max_addr: Option<u64>,

        /// Filename to write in stackcollapse format
        #[arg(short, long)]
        collapse: Option<PathBuf>,

        /// Filename to generate flamegraph svg
        #[arg(short, long)]
        svg: Option<PathBuf>,

        /// Generate json data format in d3 flamegraph format
        #[arg(long)]
        json: Option<PathBuf>,

        /// Profile holds allocation traces, render the flamegraph in memory colors
        #[arg(long)]
        alloc: bool,
    },
}

fn main() -> std::result::Result<(), anyhow::Error> {
    let opt = Opt::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match opt.cmd {
        Cmd::Dump { profile } => dump(&profile),
        Cmd::Fold {
            profile,
            min_addr,
            max_addr,
            collapse,
            svg,
            json,
            alloc,
        } => {
            let filter = (min_addr.is_some() || max_addr.is_some())
                .then(|| AddressFilter::new(min_addr, max_addr));

            let mut sinks: Vec<Box<dyn OutputSink>> = Vec::new();
            if let Some(path) = collapse {
                sinks.push(Box::new(CollapseSink::new(path)));
            }
            if let Some(path) = svg {
                let title = format!("Flamegraph of {}", profile.display());
                sinks.push(Box::new(SvgSink::new(path, title).with_alloc(alloc)));
            }
            if let Some(path) = json {
                sinks.push(Box::new(JsonFileSink::new(path)));
            }
            if sinks.is_empty() {
                sinks.push(Box::new(PrintSink::stdout()));
            }

            fold(&profile, filter.as_ref(), MultiplexSink::new(sinks))
        }
    }
}

fn open_profile(path: &Path) -> anyhow::Result<RecordReader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Could not open {}", path.display()))?;
    Ok(RecordReader::new(BufReader::new(file)))
}

fn dump(path: &Path) -> anyhow::Result<()> {
    let mut reader = open_profile(path)?;

    for (i, sample) in reader.by_ref().enumerate() {
        let sample = sample.with_context(|| format!("Could not read record {}", i))?;
        let frames = sample
            .frames()
            .iter()
            .map(|addr| format!("{:#x}", addr))
            .collect::<Vec<_>>()
            .join(" ");
        println!("{}\t{}\t{}", i, sample.len(), frames);
    }

    if reader.truncated() {
        tracing::warn!("profile ends with a truncated record");
    }
    tracing::info!("Total records: {}", reader.records());

    Ok(())
}

fn fold(
    path: &Path,
    filter: Option<&AddressFilter>,
    mut sink: MultiplexSink,
) -> anyhow::Result<()> {
    let reader = open_profile(path)?;
    let folded = fold_stacks(reader, filter).context("Could not read profile")?;

    tracing::info!(
        "Total samples: {}, distinct stacks: {}",
        total_samples(&folded),
        folded.len()
    );

    sink.finish(&collapse_lines(&folded))
}

/// Parses an address in hex (`0x` prefixed) or decimal.
fn parse_addr(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address {:?}: {}", s, e))
}
