//! Priority-tiered creation throttling
//!
//! Sliding-window counters keep low-priority ticket storms from flooding the
//! store: P2 is capped per rolling hour, P3 per four hours, P4 per day (all
//! windows and caps configurable), and one short global window acts as an
//! emergency brake across all tiers.
//! P0 and P1 bypass the tier caps and the brake entirely, but their
//! creations still count toward the emergency window, so a P0 storm shuts
//! the background tiers down.
//!
//! State is ephemeral and process-local. Loss on restart fails open, and
//! separate worker processes each see their own counters; throttling is
//! best-effort, never a hard global invariant. Stale events are evicted
//! lazily when a window is consulted; there is no background sweep.

use crate::config::ThrottleConfig;
use crate::core::{Priority, TicketId};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of a throttle check
///
/// A deny is not an error; the intake treats it as "not created".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allow,
    /// The tier's own rolling window is at its cap
    DenyTier {
        priority: Priority,
        count: u32,
        cap: u32,
    },
    /// The global short window is at its cap
    DenyEmergency { count: u32, cap: u32 },
}

impl ThrottleDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Usage of one window against its cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowUsage {
    pub count: u32,
    pub cap: u32,
    pub window_secs: u64,
}

/// Current counts vs. limits, for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThrottleStats {
    pub p2: WindowUsage,
    pub p3: WindowUsage,
    pub p4: WindowUsage,
    pub emergency: WindowUsage,
}

#[derive(Debug, Default)]
struct Windows {
    p2: VecDeque<Instant>,
    p3: VecDeque<Instant>,
    p4: VecDeque<Instant>,
    emergency: VecDeque<Instant>,
}

/// Sliding-window throttle gate consulted before a ticket is admitted
#[derive(Debug)]
pub struct ThrottleGate {
    config: ThrottleConfig,
    windows: Mutex<Windows>,
}

impl ThrottleGate {
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Decide whether a creation at `priority` is admitted right now
    pub fn check(&self, priority: Priority, error_type: &str) -> ThrottleDecision {
        self.check_at(priority, error_type, Instant::now())
    }

    pub(crate) fn check_at(
        &self,
        priority: Priority,
        error_type: &str,
        now: Instant,
    ) -> ThrottleDecision {
        if priority.is_throttle_exempt() {
            return ThrottleDecision::Allow;
        }

        let mut windows = self.windows.lock().expect("throttle mutex poisoned");
        let (tier_window, tier_cap) = tier_limits(&self.config, priority);
        let tier = tier_deque(&mut windows, priority);
        evict(tier, tier_window, now);
        let tier_count = tier.len() as u32;
        if tier_count >= tier_cap {
            warn!(
                %priority,
                error_type,
                count = tier_count,
                cap = tier_cap,
                "creation throttled by tier window"
            );
            return ThrottleDecision::DenyTier {
                priority,
                count: tier_count,
                cap: tier_cap,
            };
        }

        evict(&mut windows.emergency, self.config.emergency_window(), now);
        let emergency_count = windows.emergency.len() as u32;
        if emergency_count >= self.config.emergency_cap {
            warn!(
                %priority,
                error_type,
                count = emergency_count,
                cap = self.config.emergency_cap,
                "creation throttled by emergency brake"
            );
            return ThrottleDecision::DenyEmergency {
                count: emergency_count,
                cap: self.config.emergency_cap,
            };
        }

        ThrottleDecision::Allow
    }

    /// Record an admitted creation so future checks see it
    pub fn record(&self, priority: Priority, ticket_id: &TicketId, error_type: &str) {
        self.record_at(priority, ticket_id, error_type, Instant::now());
    }

    pub(crate) fn record_at(
        &self,
        priority: Priority,
        ticket_id: &TicketId,
        error_type: &str,
        now: Instant,
    ) {
        let mut windows = self.windows.lock().expect("throttle mutex poisoned");
        if !priority.is_throttle_exempt() {
            tier_deque(&mut windows, priority).push_back(now);
        }
        // Exempt tiers still feed the brake
        windows.emergency.push_back(now);
        debug!(%priority, id = %ticket_id.short(), error_type, "creation recorded");
    }

    /// Current counts vs. limits per window
    pub fn stats(&self) -> ThrottleStats {
        self.stats_at(Instant::now())
    }

    pub(crate) fn stats_at(&self, now: Instant) -> ThrottleStats {
        let mut windows = self.windows.lock().expect("throttle mutex poisoned");
        evict(&mut windows.p2, self.config.p2_window(), now);
        evict(&mut windows.p3, self.config.p3_window(), now);
        evict(&mut windows.p4, self.config.p4_window(), now);
        evict(&mut windows.emergency, self.config.emergency_window(), now);

        ThrottleStats {
            p2: WindowUsage {
                count: windows.p2.len() as u32,
                cap: self.config.p2_hourly_cap,
                window_secs: self.config.p2_window_secs,
            },
            p3: WindowUsage {
                count: windows.p3.len() as u32,
                cap: self.config.p3_four_hour_cap,
                window_secs: self.config.p3_window_secs,
            },
            p4: WindowUsage {
                count: windows.p4.len() as u32,
                cap: self.config.p4_daily_cap,
                window_secs: self.config.p4_window_secs,
            },
            emergency: WindowUsage {
                count: windows.emergency.len() as u32,
                cap: self.config.emergency_cap,
                window_secs: self.config.emergency_window_secs,
            },
        }
    }
}

fn tier_limits(config: &ThrottleConfig, priority: Priority) -> (Duration, u32) {
    match priority {
        Priority::P2 => (config.p2_window(), config.p2_hourly_cap),
        Priority::P3 => (config.p3_window(), config.p3_four_hour_cap),
        Priority::P4 => (config.p4_window(), config.p4_daily_cap),
        // Callers filter exempt tiers before reaching here
        Priority::P0 | Priority::P1 => (Duration::ZERO, u32::MAX),
    }
}

fn tier_deque(windows: &mut Windows, priority: Priority) -> &mut VecDeque<Instant> {
    match priority {
        Priority::P3 => &mut windows.p3,
        Priority::P4 => &mut windows.p4,
        _ => &mut windows.p2,
    }
}

fn evict(deque: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while deque
        .front()
        .is_some_and(|t| now.saturating_duration_since(*t) >= window)
    {
        deque.pop_front();
    }
}
