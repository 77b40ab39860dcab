//! Cooperative timing primitives for the main loop.
//!
//! The loop has no preemptive timers of its own: every cadence (sampling,
//! publishing, flash commits, reconnect backoff) is a deadline compared
//! against the current uptime once per iteration.
//!
//! Uptime is a `u32` millisecond counter, which wraps after ~49.7 days.
//! All comparisons here use wrapping arithmetic and treat a deadline as
//! reached when `now - deadline` (mod 2³²) lies in the lower half of the
//! range, so a deadline up to ~24.8 days ahead is ordered correctly across
//! the wrap.

/// `true` once `now_ms` has reached or passed `deadline_ms`.
pub fn deadline_reached(now_ms: u32, deadline_ms: u32) -> bool {
    now_ms.wrapping_sub(deadline_ms) < u32::MAX / 2
}

/// Milliseconds from `earlier_ms` to `now_ms`, wrap-safe.
pub fn elapsed_ms(now_ms: u32, earlier_ms: u32) -> u32 {
    now_ms.wrapping_sub(earlier_ms)
}

/// A fixed-period cadence.
///
/// Fires at most once per call to [`Interval::poll`]; if the loop stalls
/// across several periods the missed periods are skipped, not replayed.
#[derive(Debug, Clone)]
pub struct Interval {
    period_ms: u32,
    next_due_ms: u32,
}

impl Interval {
    /// First fire happens one full period after `now_ms`.
    pub fn new(period_ms: u32, now_ms: u32) -> Self {
        Self {
            period_ms,
            next_due_ms: now_ms.wrapping_add(period_ms),
        }
    }

    /// Returns `true` if the period elapsed, and schedules the next one.
    pub fn poll(&mut self, now_ms: u32) -> bool {
        if !deadline_reached(now_ms, self.next_due_ms) {
            return false;
        }
        let late = elapsed_ms(now_ms, self.next_due_ms);
        if late >= self.period_ms {
            // Stalled past a whole period: re-anchor on now.
            self.next_due_ms = now_ms.wrapping_add(self.period_ms);
        } else {
            self.next_due_ms = self.next_due_ms.wrapping_add(self.period_ms);
        }
        true
    }
}
