//! Fault injection for exercising the recovery paths.
//!
//! Real networks drop packets.  To exercise retransmission without depending
//! on actual network conditions, [`crate::socket::Socket`] consults a
//! [`FaultInjector`] after every datagram it reads.  When the injector says
//! "drop", the datagram is discarded and the read reports a timeout, exactly
//! as if the datagram had been lost on the wire.
//!
//! Loss is only ever injected on reads that already run under a deadline.
//! An unbounded read (a listener waiting for its first SYN) is never
//! sabotaged, so a passive endpoint stays reachable.
//!
//! | Injector        | Behaviour                                          |
//! |-----------------|----------------------------------------------------|
//! | [`NoFaults`]    | Never drops.  The production default.              |
//! | [`RandomLoss`]  | Drops with probability `loss_rate` (seedable RNG). |
//! | [`ScriptedLoss`]| Replays a fixed drop pattern, then never drops.    |
//!
//! Any `Fn(bool) -> bool` closure is an injector too.

use std::collections::VecDeque;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Decides whether a received datagram should be treated as lost.
pub trait FaultInjector: Send + Sync {
    /// Return `true` to drop the datagram just read.
    ///
    /// `has_deadline` is `true` when the read is bounded.  Implementations
    /// must return `false` when it is not.
    fn maybe_drop(&self, has_deadline: bool) -> bool;
}

impl<F> FaultInjector for F
where
    F: Fn(bool) -> bool + Send + Sync,
{
    fn maybe_drop(&self, has_deadline: bool) -> bool {
        has_deadline && self(has_deadline)
    }
}

/// Pass-through injector.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn maybe_drop(&self, _has_deadline: bool) -> bool {
        false
    }
}

/// Configuration for [`RandomLoss`].
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    /// Probability in `[0.0, 1.0]` that a bounded read loses its datagram.
    pub loss_rate: f64,
    /// Seed for a reproducible drop sequence; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl SimulatorConfig {
    /// The loss rate the demo endpoints were tuned against.
    pub const CLASSIC_LOSS_RATE: f64 = 0.2;

    pub fn with_loss(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            seed: None,
        }
    }

    /// Build the injector this configuration describes.
    ///
    /// A zero (or NaN) loss rate yields [`NoFaults`] so the RNG is never
    /// touched.
    pub fn build(&self) -> Box<dyn FaultInjector> {
        if self.loss_rate.is_nan() || self.loss_rate <= 0.0 {
            Box::new(NoFaults)
        } else {
            Box::new(RandomLoss::new(self))
        }
    }
}

/// Probability-driven packet loss.
#[derive(Debug)]
pub struct RandomLoss {
    loss_rate: f64,
    rng: Mutex<StdRng>,
}

impl RandomLoss {
    /// `loss_rate` is clamped into `[0.0, 1.0]`; NaN disables loss.
    pub fn new(config: &SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self {
            loss_rate: if config.loss_rate.is_nan() {
                0.0
            } else {
                config.loss_rate.clamp(0.0, 1.0)
            },
            rng: Mutex::new(rng),
        }
    }

    pub fn loss_rate(&self) -> f64 {
        self.loss_rate
    }
}

impl FaultInjector for RandomLoss {
    fn maybe_drop(&self, has_deadline: bool) -> bool {
        if !has_deadline {
            return false;
        }
        // A poisoned lock only means another thread panicked mid-draw; the
        // RNG state itself is still usable.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.random_bool(self.loss_rate)
    }
}

/// Deterministic drop pattern for tests.
///
/// Each bounded read consumes one verdict from the front of the pattern.
/// Once the pattern is exhausted nothing more is dropped.  Unbounded reads
/// neither drop nor consume a verdict.
#[derive(Debug, Default)]
pub struct ScriptedLoss {
    pattern: Mutex<VecDeque<bool>>,
}

impl ScriptedLoss {
    pub fn new(pattern: impl IntoIterator<Item = bool>) -> Self {
        Self {
            pattern: Mutex::new(pattern.into_iter().collect()),
        }
    }

    /// Drop the first `n` bounded reads, then deliver everything.
    pub fn drop_first(n: usize) -> Self {
        Self::new(std::iter::repeat(true).take(n))
    }

    /// Verdicts not yet consumed.
    pub fn remaining(&self) -> usize {
        self.pattern.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl FaultInjector for ScriptedLoss {
    fn maybe_drop(&self, has_deadline: bool) -> bool {
        if !has_deadline {
            return false;
        }
        let mut pattern = self.pattern.lock().unwrap_or_else(|e| e.into_inner());
        pattern.pop_front().unwrap_or(false)
    }
}
