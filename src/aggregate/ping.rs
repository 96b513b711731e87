use std::collections::VecDeque;

use serde::Serialize;

/// Display colour of a single timeline cell.
/// Shared contract with the dashboard and any other consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    /// ping = 0, service was down
    Red,
    /// 0 < ping ≤ slow threshold
    Green,
    /// ping > slow threshold
    Yellow,
}

impl Color {
    pub fn for_ping(ping_ms: u64, slow_threshold_ms: u64) -> Self {
        match ping_ms {
            0 => Self::Red,
            p if p <= slow_threshold_ms => Self::Green,
            _ => Self::Yellow,
        }
    }
}

/// Median of the successful latencies, or 0 ("down") when there are
/// none. Even counts average the two middle values, rounding half up.
pub fn representative_ping(latencies: &[u64]) -> u64 {
    if latencies.is_empty() {
        return 0;
    }
    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        let (lo, hi) = (sorted[mid - 1], sorted[mid]);
        lo + (hi - lo + 1) / 2
    }
}

/// Ping for the still-open bucket: two trailing failures force 0
/// regardless of earlier successes, otherwise the median rule.
pub fn live_ping(latencies: &[u64], recent: &VecDeque<bool>) -> u64 {
    let mut tail = recent.iter().rev();
    if let (Some(false), Some(false)) = (tail.next(), tail.next()) {
        return 0;
    }
    representative_ping(latencies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_even_count_averages_middle() {
        assert_eq!(representative_ping(&[100, 5000]), 2550);
        assert_eq!(representative_ping(&[5000, 100]), 2550);
        assert_eq!(representative_ping(&[10, 11]), 11);
    }

    #[test]
    fn median_of_odd_count_takes_middle() {
        assert_eq!(representative_ping(&[100, 300, 5000]), 300);
        assert_eq!(representative_ping(&[5000, 100, 300]), 300);
        assert_eq!(representative_ping(&[42]), 42);
    }

    #[test]
    fn no_successes_means_down() {
        assert_eq!(representative_ping(&[]), 0);
    }

    #[test]
    fn colour_thresholds() {
        assert_eq!(Color::for_ping(2550, 1000), Color::Yellow);
        assert_eq!(Color::for_ping(0, 1000), Color::Red);
        assert_eq!(Color::for_ping(400, 1000), Color::Green);
        assert_eq!(Color::for_ping(1000, 1000), Color::Green);
        assert_eq!(serde_json::to_string(&Color::Yellow).unwrap(), "\"yellow\"");
    }

    #[test]
    fn two_trailing_failures_force_down() {
        let recent = VecDeque::from(vec![true, false, false]);
        assert_eq!(live_ping(&[50], &recent), 0);
    }

    #[test]
    fn single_trailing_failure_keeps_median() {
        let recent = VecDeque::from(vec![true, false]);
        assert_eq!(live_ping(&[50], &recent), 50);

        let recovered = VecDeque::from(vec![false, false, true]);
        assert_eq!(live_ping(&[80], &recovered), 80);

        assert_eq!(live_ping(&[], &VecDeque::from(vec![false])), 0);
    }
}
