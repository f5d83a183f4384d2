//! Output sinks for folded profiles.
//!
//! Every sink receives the final stackcollapse lines once; adding a format
//! only requires implementing `OutputSink`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use inferno::flamegraph::color::{BasicPalette, Palette};
use inferno::flamegraph::{self, Options};

use crate::json::collapse_to_json;

/// Trait for consuming folded stacks.
pub trait OutputSink {
    /// Called once with the final stacks, sorted.
    fn finish(&mut self, final_stacks: &[String]) -> Result<()>;
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file =
        File::create(path).with_context(|| format!("Unable to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Fans out to multiple sinks.
///
/// Every sink gets the stacks even if an earlier one failed; the first
/// error is returned.
pub struct MultiplexSink {
    sinks: Vec<Box<dyn OutputSink>>,
}

impl MultiplexSink {
    pub fn new(sinks: Vec<Box<dyn OutputSink>>) -> Self {
        Self { sinks }
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl OutputSink for MultiplexSink {
    fn finish(&mut self, final_stacks: &[String]) -> Result<()> {
        self.sinks
            .iter_mut()
            .map(|sink| sink.finish(final_stacks))
            .fold(Ok(()), |first, res| {
                if let Err(e) = &res {
                    tracing::warn!("output failed: {:#}", e);
                }
                first.and(res)
            })
    }
}

/// Writes an SVG flamegraph.
pub struct SvgSink {
    path: PathBuf,
    title: String,
    alloc: bool,
}

impl SvgSink {
    pub fn new(path: PathBuf, title: String) -> Self {
        Self {
            path,
            title,
            alloc: false,
        }
    }

    /// Renders allocation traces: memory palette, counted in allocations.
    pub fn with_alloc(mut self, alloc: bool) -> Self {
        self.alloc = alloc;
        self
    }

    fn options(&self) -> Options<'static> {
        let mut opts = Options::default();
        opts.title = self.title.clone();
        if self.alloc {
            opts.colors = Palette::Basic(BasicPalette::Mem);
            opts.count_name = "allocations".to_string();
        } else {
            opts.count_name = "samples".to_string();
        }
        opts
    }
}

impl OutputSink for SvgSink {
    fn finish(&mut self, final_stacks: &[String]) -> Result<()> {
        let mut opts = self.options();
        let mut writer = create(&self.path)?;
        flamegraph::from_lines(&mut opts, final_stacks.iter().map(String::as_str), &mut writer)
            .with_context(|| format!("Failed to render {}", self.path.display()))?;
        writer.flush()?;
        Ok(())
    }
}

/// Writes d3-flamegraph JSON.
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl OutputSink for JsonFileSink {
    fn finish(&mut self, final_stacks: &[String]) -> Result<()> {
        let mut writer = create(&self.path)?;
        writer.write_all(collapse_to_json(final_stacks)?.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

/// Writes a stackcollapse file, one stack per line.
pub struct CollapseSink {
    path: PathBuf,
}

impl CollapseSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl OutputSink for CollapseSink {
    fn finish(&mut self, final_stacks: &[String]) -> Result<()> {
        tracing::info!("Writing {} stacks to {}", final_stacks.len(), self.path.display());
        PrintSink::new(create(&self.path)?).finish(final_stacks)
    }
}

/// Prints stackcollapse lines to any writer, stdout by default.
pub struct PrintSink<W> {
    out: W,
}

impl PrintSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write> PrintSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> OutputSink for PrintSink<W> {
    fn finish(&mut self, final_stacks: &[String]) -> Result<()> {
        for line in final_stacks {
            writeln!(self.out, "{}", line)?;
        }
        self.out.flush()?;
        Ok(())
    }
}
