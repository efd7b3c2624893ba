//! Backoff policy for retry-in-place and the per-node retry budget.

use std::time::Duration;

use trellis_dot::{Graph, Node};

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max, then scaled by a
    /// random factor in [0.5, 1.0).
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Delay before retry `attempt` (0-indexed) without jitter.
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                base.checked_mul(factor).unwrap_or(*max).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }

    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for_attempt(attempt);
        match self {
            BackoffPolicy::Exponential { .. } => {
                ceiling.mul_f64(0.5 + rand::random::<f64>() * 0.5)
            }
            _ => ceiling,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(200),
            max: Duration::from_secs(60),
        }
    }
}

/// Retry budget for `node`: its `max_retries`, else the graph's
/// `default_max_retry`, else 0.
pub fn max_retries_for(node: &Node, graph: &Graph) -> u32 {
    let graph_default = graph.integer_attr("default_max_retry", 0);
    let budget = node.integer_attr("max_retries", graph_default);
    u32::try_from(budget.max(0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_ceiling_doubles_then_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.ceiling_for_attempt(0), Duration::from_millis(200));
        assert_eq!(policy.ceiling_for_attempt(1), Duration::from_millis(400));
        assert_eq!(policy.ceiling_for_attempt(3), Duration::from_millis(1600));
        assert_eq!(policy.ceiling_for_attempt(9), Duration::from_secs(60));
        assert_eq!(policy.ceiling_for_attempt(40), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_in_upper_half() {
        let policy = BackoffPolicy::default();
        for attempt in 0..6 {
            let ceiling = policy.ceiling_for_attempt(attempt);
            for _ in 0..50 {
                let delay = policy.delay_for_attempt(attempt);
                assert!(delay <= ceiling, "{delay:?} > {ceiling:?}");
                assert!(delay >= ceiling / 2, "{delay:?} < half of {ceiling:?}");
            }
        }
    }

    #[test]
    fn fixed_and_none_are_exact() {
        let fixed = BackoffPolicy::Fixed(Duration::from_millis(75));
        assert_eq!(fixed.delay_for_attempt(0), Duration::from_millis(75));
        assert_eq!(fixed.delay_for_attempt(7), Duration::from_millis(75));
        assert_eq!(BackoffPolicy::None.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn retry_budget_lookup() {
        let g = trellis_dot::parse(
            r#"digraph G {
            default_max_retry = 3
            own [max_retries=1]
            inherit
            negative [max_retries=-4]
            text [max_retries="2"]
        }"#,
        )
        .unwrap();
        let budget = |id: &str| max_retries_for(g.node(id).unwrap(), &g);
        assert_eq!(budget("own"), 1);
        assert_eq!(budget("inherit"), 3);
        assert_eq!(budget("negative"), 0);
        assert_eq!(budget("text"), 2);

        let bare = trellis_dot::parse("digraph G { n }").unwrap();
        assert_eq!(max_retries_for(bare.node("n").unwrap(), &bare), 0);
    }
}
