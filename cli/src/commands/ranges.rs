use std::path::PathBuf;

use anyhow::Context;
use colored::*;
use rangeping_common::network::range::AddressRange;
use rangeping_core::source::{FileRangeSource, HttpRangeSource, RangeSource};
use tracing::warn;

use crate::terminal::{colors, print};

/// Ranges to work on: the explicit `cidrs` if any, else the list from
/// `ranges_file`, else the published list.
pub async fn load(
    cidrs: Vec<String>,
    ranges_file: Option<PathBuf>,
) -> anyhow::Result<Vec<AddressRange>> {
    if !cidrs.is_empty() {
        let ranges: Vec<AddressRange> = cidrs.into_iter().map(AddressRange::new).collect();
        for range in ranges.iter().filter(|range| range.is_empty()) {
            warn!("{range} is not a valid IPv4 CIDR block, skipping");
        }
        return Ok(ranges);
    }

    let source: Box<dyn RangeSource> = match ranges_file {
        Some(path) => Box::new(FileRangeSource::new(path)),
        None => Box::new(HttpRangeSource::default()),
    };
    source.fetch().await.context("loading the range list")
}

pub async fn ranges(ranges_file: Option<PathBuf>) -> anyhow::Result<()> {
    let ranges = load(Vec::new(), ranges_file).await?;

    print::header("published ranges");
    print::set_key_width(ranges.iter().map(AddressRange::cidr));
    for range in &ranges {
        let count: ColoredString = range.len().to_string().color(colors::ACCENT);
        print::aligned_line(range.cidr(), format!("{count} addresses"));
    }

    let total: u64 = ranges.iter().map(AddressRange::len).sum();
    let output: ColoredString = format!(
        "{} ranges covering {} addresses",
        ranges.len().to_string().bold().green(),
        total.to_string().bold().yellow()
    )
    .color(colors::TEXT_DEFAULT);
    print::fat_separator();
    print::centerln(&output.to_string());
    Ok(())
}
