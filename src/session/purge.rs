//! Self-throttled expiry sweep shared by the memory and file backends.
//!
//! Every request asks the schedule whether a sweep is due. At most one sweep
//! runs at a time, and a new one starts only once `interval` has passed since
//! the previous sweep finished. The decision and the in-flight flag live
//! under one lock, so two requests can never both claim the same sweep.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

#[derive(Debug)]
struct PurgeState {
    last_purge: SystemTime,
    in_flight: bool,
}

/// When to sweep, and what counts as expired.
#[derive(Debug)]
pub struct PurgeSchedule {
    interval: Duration,
    ttl: Duration,
    state: Mutex<PurgeState>,
}

impl PurgeSchedule {
    /// A schedule whose first sweep is due `interval` from now.
    pub fn new(interval: Duration, ttl: Duration) -> Self {
        Self::starting_at(interval, ttl, SystemTime::now())
    }

    /// A schedule that treats `last_purge` as the previous sweep.
    pub fn starting_at(interval: Duration, ttl: Duration, last_purge: SystemTime) -> Self {
        Self {
            interval,
            ttl,
            state: Mutex::new(PurgeState { last_purge, in_flight: false }),
        }
    }

    pub fn interval(&self) -> Duration { self.interval }
    pub fn ttl(&self) -> Duration { self.ttl }

    pub fn last_purge(&self) -> SystemTime {
        self.state.lock().last_purge
    }

    /// Claims the sweep if one is due at `now` and none is running.
    ///
    /// The returned ticket carries the expiry cutoff: records last modified
    /// before it must go. Dropping the ticket stamps `now` as the last purge
    /// and releases the in-flight flag, whether or not the sweep succeeded.
    pub fn begin(&self, now: SystemTime) -> Option<PurgeTicket<'_>> {
        let mut state = self.state.lock();
        if state.in_flight || now <= state.last_purge + self.interval {
            return None;
        }
        state.in_flight = true;
        let cutoff = now.checked_sub(self.ttl).unwrap_or(UNIX_EPOCH);
        Some(PurgeTicket { schedule: self, now, cutoff })
    }
}

/// An in-flight sweep. See [`PurgeSchedule::begin`].
#[derive(Debug)]
pub struct PurgeTicket<'a> {
    schedule: &'a PurgeSchedule,
    now: SystemTime,
    cutoff: SystemTime,
}

impl PurgeTicket<'_> {
    pub fn cutoff(&self) -> SystemTime { self.cutoff }

    /// Whether a record last modified at `modified` has outlived the TTL.
    pub fn is_expired(&self, modified: SystemTime) -> bool {
        modified < self.cutoff
    }
}

impl Drop for PurgeTicket<'_> {
    fn drop(&mut self) {
        let mut state = self.schedule.state.lock();
        state.last_purge = self.now;
        state.in_flight = false;
    }
}
