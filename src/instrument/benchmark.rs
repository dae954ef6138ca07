//! Settling-delay benchmark.
//!
//! Polling an FFT instrument faster than it recomputes returns the same
//! spectrum again. A round takes ten captures at a given delay and passes when
//! at most one of them repeats (compared by mean); the delay is halved after a
//! pass and doubled after a failure.

use crate::error::{AppResult, ScanError};
use crate::instrument::capabilities::{Acquisition, SampleRange};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

pub const CAPTURES_PER_ROUND: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkRound {
    pub delay: Duration,
    pub distinct: usize,
    pub passed: bool,
}

/// Captures whose means are pairwise distinct.
pub fn distinct_means(captures: &[Vec<f64>]) -> usize {
    captures
        .iter()
        .map(|c| {
            let mean = if c.is_empty() {
                0.0
            } else {
                c.iter().sum::<f64>() / c.len() as f64
            };
            mean.to_bits()
        })
        .collect::<HashSet<u64>>()
        .len()
}

/// Run one round at `delay`. Corrupt captures count as sentinel rows.
pub async fn test_delay(
    device: &dyn Acquisition,
    range: &SampleRange,
    delay: Duration,
) -> AppResult<BenchmarkRound> {
    device.prepare(range).await?;
    let expected = device.capture_window(range).len();
    let mut captures = Vec::with_capacity(CAPTURES_PER_ROUND);
    for _ in 0..CAPTURES_PER_ROUND {
        match device.fetch_capture(range).await {
            Ok(c) => captures.push(c),
            Err(e @ ScanError::CorruptSample(_)) => {
                warn!(error = %e, "Corrupt capture during benchmark");
                captures.push(vec![device.sentinel(); expected]);
            }
            Err(e) => return Err(e),
        }
        tokio::time::sleep(delay).await;
    }
    let distinct = distinct_means(&captures);
    Ok(BenchmarkRound {
        delay,
        distinct,
        passed: distinct + 1 >= CAPTURES_PER_ROUND,
    })
}

/// Adaptive search starting at `initial_delay`.
pub async fn run(
    device: &dyn Acquisition,
    range: &SampleRange,
    initial_delay: Duration,
    rounds: usize,
) -> AppResult<Vec<BenchmarkRound>> {
    let mut delay = initial_delay;
    let mut results = Vec::with_capacity(rounds);
    for _ in 0..rounds {
        let round = test_delay(device, range, delay).await?;
        info!(
            delay = ?round.delay,
            distinct = round.distinct,
            result = if round.passed { "passed" } else { "bad" },
            "Benchmark round"
        );
        delay = if round.passed { delay / 2 } else { delay * 2 };
        results.push(round);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockAcquisition;

    #[test]
    fn distinct_counts_by_mean() {
        let captures = vec![vec![1.0, 3.0], vec![2.0, 2.0], vec![0.0, 5.0]];
        assert_eq!(distinct_means(&captures), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn search_halves_on_pass_and_doubles_on_fail() {
        let device = MockAcquisition::new().settle_time(Duration::from_millis(150));
        let range = SampleRange::new(190, 210).unwrap();

        let rounds = run(&device, &range, Duration::from_millis(400), 4)
            .await
            .unwrap();
        let delays: Vec<u64> = rounds.iter().map(|r| r.delay.as_millis() as u64).collect();
        let passed: Vec<bool> = rounds.iter().map(|r| r.passed).collect();

        assert_eq!(delays, vec![400, 200, 100, 200]);
        assert_eq!(passed, vec![true, true, false, true]);
        assert_eq!(rounds[2].distinct, 5);
    }
}
