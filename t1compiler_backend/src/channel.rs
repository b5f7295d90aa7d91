//! Edge lists on a single sequencer channel.
//!
//! A [`ChannelEvents`] is an ordered-on-demand list of tick timestamps on one
//! channel. Pairs `(t[2k], t[2k+1])` denote rising and falling edges: the
//! channel is high during `[t[2k], t[2k+1])`. Timestamps may be pushed in any
//! order while editing; [`ChannelEvents::frozen_ticks`] sorts and validates
//! them when the compiler needs a canonical form.
//!
//! Invariants enforced at freeze time:
//! - even number of edges (every rise has a fall),
//! - all timestamps non-negative after rounding to ticks.
//!
//! Overlap between pulses on the same channel cannot be detected from a
//! sorted edge list alone (sorting re-pairs the edges); the compiler's state
//! walk catches it instead and reports a [`CompileError::ChannelConflict`].
//!
//! [`CompileError::ChannelConflict`]: crate::CompileError::ChannelConflict

use crate::instruction::N_CH;
use crate::CompileError;

/// Edge timestamps (in ticks, possibly fractional until rounding) on one
/// channel.
///
/// # Examples
///
/// ```
/// use t1compiler_backend::channel::ChannelEvents;
///
/// let mut ev = ChannelEvents::new(3);
/// ev.pulse(10.0, 20.0);
/// ev.pulse(2.0, 5.0); // out of order is fine while editing
/// assert_eq!(ev.frozen_ticks().unwrap(), vec![2, 5, 10, 20]);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelEvents {
    channel: usize,
    times: Vec<f64>,
}

impl ChannelEvents {
    /// Creates an empty edge list on `channel`.
    ///
    /// # Panics
    ///
    /// Panics if `channel` is outside `[0, N_CH)`. Channel indices come from
    /// static configuration, so a bad index is a wiring mistake, not a
    /// runtime condition.
    pub fn new(channel: usize) -> Self {
        assert!(
            channel < N_CH,
            "Channel index {} out of range 0..{}",
            channel,
            N_CH
        );
        Self {
            channel,
            times: Vec::new(),
        }
    }

    /// Creates an edge list from raw timestamps (ticks). The list may be
    /// unordered; it is sorted at freeze time.
    pub fn from_times(channel: usize, times: Vec<f64>) -> Self {
        let mut ev = Self::new(channel);
        ev.times = times;
        ev
    }

    /// Appends one pulse: high during `[t_on, t_off)`.
    ///
    /// # Panics
    ///
    /// Panics if `t_off < t_on`.
    pub fn pulse(&mut self, t_on: f64, t_off: f64) {
        assert!(
            t_off >= t_on,
            "Channel {} pulse with t_off {} before t_on {}",
            self.channel,
            t_off,
            t_on
        );
        self.times.push(t_on);
        self.times.push(t_off);
    }

    /// Appends a single raw edge timestamp.
    pub fn push_edge(&mut self, t: f64) {
        self.times.push(t);
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Returns the canonical form used by the compiler: timestamps rounded to
    /// the nearest tick and sorted ascending.
    ///
    /// Fails with [`CompileError::OddEdgeCount`] on an odd edge list and
    /// [`CompileError::NegativeTimestamp`] if any rounded timestamp is
    /// negative (typically the result of a negative channel delay pushing an
    /// edge before the block origin).
    pub fn frozen_ticks(&self) -> Result<Vec<i64>, CompileError> {
        if self.times.len() % 2 != 0 {
            return Err(CompileError::OddEdgeCount {
                channel: self.channel,
                count: self.times.len(),
            });
        }
        let mut ticks: Vec<i64> = self.times.iter().map(|&t| t.round() as i64).collect();
        ticks.sort_unstable();
        if let Some(&first) = ticks.first() {
            if first < 0 {
                return Err(CompileError::NegativeTimestamp {
                    channel: self.channel,
                    tick: first,
                });
            }
        }
        Ok(ticks)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn freeze_sorts_and_rounds() {
        let ev = ChannelEvents::from_times(0, vec![10.4, 2.6, 5.0, 20.0]);
        assert_eq!(ev.frozen_ticks().unwrap(), vec![3, 5, 10, 20]);
    }

    #[test]
    fn odd_edge_count_rejected() {
        let ev = ChannelEvents::from_times(1, vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            ev.frozen_ticks(),
            Err(CompileError::OddEdgeCount { channel: 1, count: 3 })
        ));
    }

    #[test]
    fn negative_timestamp_rejected() {
        let ev = ChannelEvents::from_times(2, vec![-1.0, 4.0]);
        assert!(matches!(
            ev.frozen_ticks(),
            Err(CompileError::NegativeTimestamp { channel: 2, tick: -1 })
        ));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn channel_index_checked() {
        ChannelEvents::new(16);
    }

    #[test]
    #[should_panic(expected = "before t_on")]
    fn inverted_pulse_rejected() {
        let mut ev = ChannelEvents::new(0);
        ev.pulse(5.0, 3.0);
    }
}
