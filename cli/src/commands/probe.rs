use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::*;
use rangeping_common::config::{Config, ProbeMethod};
use rangeping_common::network::probe::ProbeResult;
use rangeping_common::network::range::{self, AddressRange};
use rangeping_core::echo::MethodProvider;
use rangeping_core::limiter::ConcurrencyLimiter;
use rangeping_core::orchestrator::ProbeOrchestrator;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};

use crate::commands::ranges;
use crate::mprint;
use crate::terminal::{colors, format, input::InputHandle, print, spinner};

/// Above this many targets a run takes long enough to suggest sampling.
const LARGE_RUN: u64 = 1 << 16;

pub async fn probe(
    cidrs: Vec<String>,
    ranges_file: Option<PathBuf>,
    cfg: &Config,
) -> anyhow::Result<()> {
    if cfg.method == ProbeMethod::Icmp && !is_root::is_root() {
        warn!("ICMP echo needs root privileges, try --method tcp otherwise");
    }

    let ranges = ranges::load(cidrs, ranges_file).await?;
    let targets = collect_targets(&ranges, cfg.sample);
    if targets.is_empty() {
        print::header("nothing to probe");
        print::no_results();
        return Ok(());
    }
    print_plan(&ranges, targets.len(), cfg);

    let span = spinner::probe_span(targets.len(), !cfg.no_input);
    let progress_span = span.clone();
    let limiter = Arc::new(ConcurrencyLimiter::new(cfg.concurrency));
    let provider = MethodProvider::new(cfg.method, cfg.echo());
    let orchestrator = ProbeOrchestrator::new(limiter, provider, cfg.echo_limit)
        .with_progress_observer(move |progress| {
            spinner::report_probe_progress(&progress_span, progress.completed)
        });

    let cancel = orchestrator.cancellation_token();
    let input = (!cfg.no_input).then(|| InputHandle::start(cancel.clone()));
    let ctrl_c = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let start_time = Instant::now();
    let mut results = orchestrator.run(targets).instrument(span).await;
    let total_time = start_time.elapsed();

    ctrl_c.abort();
    drop(input);
    if cancel.is_cancelled() {
        info!("Stopped early, showing what was gathered so far");
    }

    probe_ends(&mut results, total_time, cfg);
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        cancel.cancel();
    }
}

fn collect_targets(ranges: &[AddressRange], sample: Option<usize>) -> Vec<String> {
    match sample {
        Some(amount) => ranges.iter().flat_map(|range| range.sample(amount)).collect(),
        None => {
            let total: u64 = ranges.iter().map(AddressRange::len).sum();
            if total > LARGE_RUN {
                warn!("About to probe {total} addresses, consider --sample");
            }
            range::expand_all(ranges)
        }
    }
}

/// Best first: lowest loss, then lowest mean round trip.
fn rank_results(results: &mut [ProbeResult]) {
    results.sort_by(|a, b| {
        a.loss_fraction()
            .partial_cmp(&b.loss_fraction())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.mean_round_trip.cmp(&b.mean_round_trip))
    });
}

fn print_plan(ranges: &[AddressRange], targets: usize, cfg: &Config) {
    let method = match cfg.method {
        ProbeMethod::Icmp => "icmp".to_string(),
        ProbeMethod::Tcp => format!("tcp/{}", cfg.port),
    };

    print::header("getting ready to probe");
    print::set_key_width(["Ranges", "Targets", "Method", "Echoes", "Parallel"]);
    print::aligned_line("Ranges", ranges.len().to_string());
    print::aligned_line("Targets", targets.to_string().color(colors::ACCENT));
    print::aligned_line("Method", method);
    print::aligned_line("Echoes", cfg.echo_limit.to_string());
    print::aligned_line("Parallel", cfg.concurrency.to_string());
}

fn probe_ends(results: &mut [ProbeResult], total_time: Duration, cfg: &Config) {
    let answered = results.iter().filter(|result| result.received > 0).count();
    if answered == 0 {
        print::header("no target answered");
        print::no_results();
        return;
    }

    rank_results(results);
    print::header("best addresses");
    let shown = &results[..cfg.top.min(results.len())];
    for (idx, result) in shown.iter().enumerate() {
        print::tree_head(idx, &result.target);
        print::as_tree_one_level(format::result_to_details(result));
        if idx + 1 != shown.len() {
            mprint!();
        }
    }

    print_summary(answered, results.len(), total_time);
}

fn print_summary(answered: usize, probed: usize, total_time: Duration) {
    let answered: ColoredString = format!("{answered} of {probed}").bold().green();
    let total_time: ColoredString = format!("{:.2}s", total_time.as_secs_f64()).bold().yellow();
    let output: ColoredString = format!("Probe Complete: {answered} answered in {total_time}")
        .color(colors::TEXT_DEFAULT);

    print::fat_separator();
    print::centerln(&output.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(target: &str, received: u64, millis: u64) -> ProbeResult {
        ProbeResult::new(target, 4, received, Duration::from_millis(millis))
    }

    #[test]
    fn ranking_prefers_loss_then_latency() {
        let mut results = vec![
            result("slow", 4, 90),
            result("lossy", 2, 10),
            result("dead", 0, 0),
            result("fast", 4, 20),
        ];
        rank_results(&mut results);

        let order: Vec<&str> = results.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(order, ["fast", "slow", "lossy", "dead"]);
    }

    #[test]
    fn sampling_limits_each_range() {
        let ranges = [AddressRange::new("10.0.0.0/24"), AddressRange::new("10.0.1.0/30")];
        let targets = collect_targets(&ranges, Some(8));
        assert_eq!(targets.len(), 8 + 4);

        let everything = collect_targets(&ranges, None);
        assert_eq!(everything.len(), 256 + 4);
    }
}
