//! Cross-channel retransmission timers
//!
//! Each channel has at most one packet in flight and therefore one deadline.
//! The control loop has a single suspension point, so [`TimerMux`] picks the
//! channel whose deadline is nearest and hands its remaining time to the
//! readiness wait. After the wait, every deadline that was not re-armed in
//! that iteration is decreased by the time actually spent waiting.

use crate::packet::{ChannelId, CHANNEL_COUNT};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tracing::debug;

/// Remaining time before a channel's retransmission is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Retransmission due after the remaining duration
    Armed(Duration),
    /// Channel finished or idle; never selected
    Never,
}

impl Deadline {
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Deadline::Armed(remaining) => Some(*remaining),
            Deadline::Never => None,
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, Deadline::Armed(_))
    }

    /// Subtract elapsed wall-clock time, clamping at "due now"
    pub fn elapse(&mut self, elapsed: Duration) {
        if let Deadline::Armed(remaining) = self {
            *remaining = remaining.saturating_sub(elapsed);
        }
    }
}

/// The channel to wait on and how long to wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wakeup {
    pub channel: ChannelId,
    pub wait: Duration,
}

/// Deadline multiplexer over both channels
pub struct TimerMux<R = StdRng> {
    deadlines: [Deadline; CHANNEL_COUNT],
    rng: R,
    ties: u64,
}

impl TimerMux<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        TimerMux::new(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        TimerMux::new(StdRng::from_os_rng())
    }
}

impl<R: Rng> TimerMux<R> {
    /// Create a multiplexer with every channel disarmed
    pub fn new(rng: R) -> Self {
        TimerMux {
            deadlines: [Deadline::Never; CHANNEL_COUNT],
            rng,
            ties: 0,
        }
    }

    /// Reset a channel's deadline to a full timeout
    pub fn arm(&mut self, channel: ChannelId, timeout: Duration) {
        self.deadlines[channel.index()] = Deadline::Armed(timeout);
    }

    /// Give a channel an infinite deadline
    pub fn disarm(&mut self, channel: ChannelId) {
        self.deadlines[channel.index()] = Deadline::Never;
    }

    pub fn deadline(&self, channel: ChannelId) -> Deadline {
        self.deadlines[channel.index()]
    }

    /// Number of exact ties broken so far
    pub fn ties(&self) -> u64 {
        self.ties
    }

    /// Channel with the nearest deadline, or `None` when no channel is armed
    ///
    /// An exact tie is broken uniformly at random.
    pub fn next_wakeup(&mut self) -> Option<Wakeup> {
        let first = self.deadlines[0].remaining();
        let second = self.deadlines[1].remaining();

        let channel = match (first, second) {
            (None, None) => return None,
            (Some(_), None) => ChannelId::ZERO,
            (None, Some(_)) => ChannelId::ONE,
            (Some(a), Some(b)) if a < b => ChannelId::ZERO,
            (Some(a), Some(b)) if a > b => ChannelId::ONE,
            (Some(_), Some(_)) => {
                self.ties += 1;
                if self.rng.random_bool(0.5) {
                    ChannelId::ONE
                } else {
                    ChannelId::ZERO
                }
            }
        };

        let wait = self.deadlines[channel.index()].remaining()?;
        debug!("Next wakeup on channel {} in {:?}", channel, wait);
        Some(Wakeup { channel, wait })
    }

    /// Charge `elapsed` to every armed deadline not re-armed this iteration
    pub fn advance(&mut self, elapsed: Duration, rearmed: [bool; CHANNEL_COUNT]) {
        for (deadline, rearmed) in self.deadlines.iter_mut().zip(rearmed) {
            if !rearmed {
                deadline.elapse(elapsed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE_REARMED: [bool; CHANNEL_COUNT] = [false; CHANNEL_COUNT];

    #[test]
    fn test_nearest_wins() {
        let mut mux = TimerMux::seeded(0);
        mux.arm(ChannelId::ZERO, Duration::from_millis(500));
        mux.arm(ChannelId::ONE, Duration::from_millis(200));

        let wakeup = mux.next_wakeup().unwrap();
        assert_eq!(wakeup.channel, ChannelId::ONE);
        assert_eq!(wakeup.wait, Duration::from_millis(200));
    }

    #[test]
    fn test_sub_second_remainder_compared() {
        let mut mux = TimerMux::seeded(0);
        mux.arm(ChannelId::ZERO, Duration::new(1, 1_000));
        mux.arm(ChannelId::ONE, Duration::new(1, 2_000));
        assert_eq!(mux.next_wakeup().unwrap().channel, ChannelId::ZERO);
    }

    #[test]
    fn test_disarmed_never_selected() {
        let mut mux = TimerMux::seeded(0);
        mux.arm(ChannelId::ONE, Duration::from_secs(2));
        assert_eq!(mux.next_wakeup().unwrap().channel, ChannelId::ONE);

        mux.disarm(ChannelId::ONE);
        assert_eq!(mux.next_wakeup(), None);
    }

    #[test]
    fn test_tie_is_random_but_reproducible() {
        let picks = |seed: u64| -> Vec<ChannelId> {
            let mut mux = TimerMux::seeded(seed);
            (0..64)
                .map(|_| {
                    mux.arm(ChannelId::ZERO, Duration::from_secs(2));
                    mux.arm(ChannelId::ONE, Duration::from_secs(2));
                    mux.next_wakeup().unwrap().channel
                })
                .collect()
        };

        let run = picks(99);
        assert_eq!(run, picks(99));
        assert!(run.contains(&ChannelId::ZERO));
        assert!(run.contains(&ChannelId::ONE));
    }

    #[test]
    fn test_advance_clamps_to_due_now() {
        let mut mux = TimerMux::seeded(0);
        mux.arm(ChannelId::ZERO, Duration::from_millis(100));
        mux.advance(Duration::from_millis(250), NONE_REARMED);
        assert_eq!(mux.deadline(ChannelId::ZERO), Deadline::Armed(Duration::ZERO));
        assert_eq!(mux.deadline(ChannelId::ONE), Deadline::Never);
    }

    #[test]
    fn test_advance_skips_rearmed() {
        let mut mux = TimerMux::seeded(0);
        mux.arm(ChannelId::ZERO, Duration::from_secs(2));
        mux.arm(ChannelId::ONE, Duration::from_secs(2));
        mux.advance(Duration::from_millis(700), [true, false]);

        assert_eq!(mux.deadline(ChannelId::ZERO), Deadline::Armed(Duration::from_secs(2)));
        assert_eq!(
            mux.deadline(ChannelId::ONE),
            Deadline::Armed(Duration::from_millis(1300))
        );
        assert_eq!(mux.next_wakeup().unwrap().channel, ChannelId::ONE);
    }
}
