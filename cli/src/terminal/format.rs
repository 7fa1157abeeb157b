use std::time::Duration;

use crate::terminal::colors;
use colored::*;
use rangeping_common::network::probe::ProbeResult;

const FAST: Duration = Duration::from_millis(50);
const SLOW: Duration = Duration::from_millis(150);

pub fn loss_text(loss: f64) -> String {
    format!("{:.1}%", loss * 100.0)
}

pub fn loss_to_colored(loss: f64) -> ColoredString {
    let color = match loss {
        l if l <= 0.0 => colors::GOOD,
        l if l < 0.5 => colors::FAIR,
        _ => colors::POOR,
    };
    loss_text(loss).color(color)
}

/// Mean round trip in milliseconds, `-` when nothing answered.
pub fn latency_text(result: &ProbeResult) -> String {
    if result.received == 0 {
        return "-".to_string();
    }
    format!("{:.1} ms", result.mean_round_trip.as_secs_f64() * 1000.0)
}

pub fn latency_to_colored(result: &ProbeResult) -> ColoredString {
    let color = match result.mean_round_trip {
        _ if result.received == 0 => colors::SEPARATOR,
        rtt if rtt <= FAST => colors::GOOD,
        rtt if rtt <= SLOW => colors::FAIR,
        _ => colors::POOR,
    };
    latency_text(result).color(color)
}

pub fn result_to_details(result: &ProbeResult) -> Vec<(String, ColoredString)> {
    let replies: ColoredString = format!("{}/{}", result.received, result.transmitted)
        .color(colors::TEXT_DEFAULT);
    vec![
        ("Loss".to_string(), loss_to_colored(result.loss_fraction())),
        ("RTT".to_string(), latency_to_colored(result)),
        ("Replies".to_string(), replies),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_is_printed_as_percentage() {
        assert_eq!(loss_text(0.0), "0.0%");
        assert_eq!(loss_text(0.375), "37.5%");
        assert_eq!(loss_text(1.0), "100.0%");
    }

    #[test]
    fn latency_of_silent_target_is_a_dash() {
        let silent = ProbeResult::new("1.1.1.1", 8, 0, Duration::ZERO);
        assert_eq!(latency_text(&silent), "-");

        let answered = ProbeResult::new("1.1.1.1", 8, 8, Duration::from_micros(12_340));
        assert_eq!(latency_text(&answered), "12.3 ms");
    }

    #[test]
    fn details_have_short_keys() {
        let result = ProbeResult::new("1.1.1.1", 8, 6, Duration::from_millis(20));
        let details = result_to_details(&result);
        assert_eq!(details.len(), 3);
        assert!(details.iter().all(|(key, _)| key.len() <= 7));
    }
}
