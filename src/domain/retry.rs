//! Retry bookkeeping for the reconnection controller.
//!
//! Everything here is synchronous and free of I/O so the policy can be
//! exercised without a Bluetooth stack. The controller owns one
//! [`RetryContext`] for its whole lifetime.

/// Default number of counted failures tolerated before automatic retries stop.
pub const MAX_ATTEMPTS: u32 = 5;

/// Operator request waiting to be honoured at the next scanning decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingOverride {
    #[default]
    None,
    ManualReconnect,
    FullScan,
}

impl PendingOverride {
    pub fn is_some(self) -> bool {
        self != Self::None
    }
}

/// Where an acquisition attempt looks for its peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTarget {
    KnownAddress(String),
    DiscoverFresh,
}

/// The targets one cycle tries in order, and what triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePlan {
    pub trigger: PendingOverride,
    pub targets: Vec<ScanTarget>,
}

/// What the controller does after a cycle in which every target failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// An operator override is in play: retry now, nothing counted.
    RetryNow(PendingOverride),
    /// Counted failure with budget left; retries still to come, including
    /// the one after this backoff.
    Backoff { attempts_remaining: u32 },
    /// Budget spent. The counter has been reset for the next manual cycle.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_known_address: Option<String>,
    pub pending_override: PendingOverride,
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS)
    }
}

impl RetryContext {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
            last_known_address: None,
            pending_override: PendingOverride::None,
        }
    }

    /// Record an operator request. The latest request replaces an earlier one.
    pub fn request(&mut self, request: PendingOverride) {
        self.pending_override = request;
    }

    /// Consume the pending override and decide which targets to try.
    ///
    /// A full scan ignores the cached address. Otherwise the cached address is
    /// tried first and fresh discovery follows within the same cycle.
    pub fn begin_cycle(&mut self) -> CyclePlan {
        let trigger = std::mem::take(&mut self.pending_override);
        let targets = match (&self.last_known_address, trigger) {
            (Some(address), PendingOverride::None | PendingOverride::ManualReconnect) => vec![
                ScanTarget::KnownAddress(address.clone()),
                ScanTarget::DiscoverFresh,
            ],
            _ => vec![ScanTarget::DiscoverFresh],
        };
        CyclePlan { trigger, targets }
    }

    /// The session reached streaming against `address`.
    pub fn record_streaming(&mut self, address: &str) {
        self.attempt_count = 0;
        self.last_known_address = Some(address.to_string());
    }

    /// Classify a failed cycle started by `trigger`.
    ///
    /// An override that arrived while the cycle was running also earns an
    /// immediate retry; it stays pending for the next [`begin_cycle`].
    ///
    /// [`begin_cycle`]: Self::begin_cycle
    pub fn record_failure(&mut self, trigger: PendingOverride) -> FailureVerdict {
        if trigger.is_some() {
            return FailureVerdict::RetryNow(trigger);
        }
        if self.pending_override.is_some() {
            return FailureVerdict::RetryNow(self.pending_override);
        }

        self.attempt_count += 1;
        if self.attempt_count <= self.max_attempts {
            FailureVerdict::Backoff {
                attempts_remaining: self.max_attempts - self.attempt_count + 1,
            }
        } else {
            self.attempt_count = 0;
            FailureVerdict::Exhausted
        }
    }
}
