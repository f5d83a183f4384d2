//! Offline folding of recorded samples into counted stacks.

use std::collections::HashMap;
use std::io;

use crate::walker::Sample;

/// Inclusive range of addresses kept when folding.
///
/// The walker records every address it recovers; restricting a profile to
/// e.g. kernel text happens here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressFilter {
    pub min: u64,
    pub max: u64,
}

impl AddressFilter {
    pub fn new(min: Option<u64>, max: Option<u64>) -> Self {
        Self {
            min: min.unwrap_or(0),
            max: max.unwrap_or(u64::MAX),
        }
    }

    pub fn contains(&self, addr: u64) -> bool {
        (self.min..=self.max).contains(&addr)
    }
}

/// A distinct stack, root first, with the number of times it was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCount {
    pub frames: Vec<u64>,
    pub count: u64,
}

/// Counts identical stacks.
///
/// With a filter, out of range frames split a stack into sub-stacks
/// (an interrupt on top of a task, a kernel entry below user code) and each
/// sub-stack is counted on its own. The result is sorted by stack.
pub fn fold_stacks<I>(samples: I, filter: Option<&AddressFilter>) -> io::Result<Vec<FrameCount>>
where
    I: IntoIterator<Item = io::Result<Sample>>,
{
    let mut counts: HashMap<Vec<u64>, u64> = HashMap::new();

    for sample in samples {
        let sample = sample?;
        let frames = sample.frames();

        match filter {
            None => {
                if !frames.is_empty() {
                    *counts.entry(root_first(frames)).or_insert(0) += 1;
                }
            }
            Some(filter) => {
                for substack in frames.split(|addr| !filter.contains(*addr)) {
                    if substack.is_empty() {
                        continue;
                    }
                    *counts.entry(root_first(substack)).or_insert(0) += 1;
                }
            }
        }
    }

    let mut folded = counts
        .into_iter()
        .map(|(frames, count)| FrameCount { frames, count })
        .collect::<Vec<_>>();
    folded.sort_by(|a, b| a.frames.cmp(&b.frames));

    Ok(folded)
}

fn root_first(frames: &[u64]) -> Vec<u64> {
    frames.iter().rev().copied().collect()
}

/// Formats folded stacks in stackcollapse format, `0x..;0x.. count`.
pub fn collapse_lines(folded: &[FrameCount]) -> Vec<String> {
    let mut out = folded
        .iter()
        .map(|stack| {
            let key = stack
                .frames
                .iter()
                .map(|addr| format!("{:#x}", addr))
                .collect::<Vec<_>>()
                .join(";");
            format!("{} {}", key, stack.count)
        })
        .collect::<Vec<_>>();
    out.sort();
    out
}

pub fn total_samples(folded: &[FrameCount]) -> u64 {
    folded.iter().map(|f| f.count).sum()
}
