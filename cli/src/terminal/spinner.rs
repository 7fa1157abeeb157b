//! Subscriber setup and the live progress bar.
//!
//! Log lines and plain output are written through the indicatif layer, so
//! they are printed above the bar instead of tearing it.

use colored::*;
use indicatif::ProgressStyle;
use tracing::{Span, info_span};
use tracing_indicatif::IndicatifLayer;
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::terminal::logging::{PRINT_TARGET, RangepingFormatter};

const TICK_STRINGS: &[&str] = &[
    "▁▁▁▁▁",
    "▁▂▂▂▁",
    "▁▄▂▄▁",
    "▂▄▆▄▂",
    "▄▆█▆▄",
    "▂▄▆▄▂",
    "▁▄▂▄▁",
    "▁▂▂▂▁",
];
const TIP: &str = "You can press 'q' to finish early";

pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,rangeping={level},rangeping_core={level},rangeping_common={level}"
        ))
    });
    if let Ok(directive) = format!("{PRINT_TARGET}=info").parse() {
        filter = filter.add_directive(directive);
    }

    let indicatif_layer = IndicatifLayer::new().with_progress_style(probe_style());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(RangepingFormatter)
        .with_writer(indicatif_layer.get_stdout_writer());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(indicatif_layer)
        .try_init();
}

fn probe_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.blue} [{bar:32.green/black}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_strings(TICK_STRINGS)
        .progress_chars("█▓░")
}

/// Span carrying the progress bar of a probe run over `total` targets.
///
/// The bar appears once the span is entered, e.g. by instrumenting the run.
pub fn probe_span(total: usize, interactive: bool) -> Span {
    let span = info_span!("probe");
    span.pb_set_length(total as u64);
    if interactive {
        span.pb_set_message(&format!("{}", TIP.italic().white()));
    }
    span
}

pub fn report_probe_progress(span: &Span, completed: usize) {
    span.pb_set_position(completed as u64);
}
