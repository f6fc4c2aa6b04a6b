// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Moments, periodics, etc.
use super::sync::KCondvar;
use super::sync::KMutex;
use alloc::sync::Arc;
use core::time::Duration;
use std::thread::JoinHandle;
use std::time::Instant;

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;
/// The number of nanoseconds in a second.
pub const NANOS: u64 = 1_000_000_000;
/// The conversion from nanoseconds to milliseconds.
pub const NANOS_TO_MILLIS: u64 = NANOS / MILLIS;

/// A moment in time, taken from a monotonic clock.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Moment {
    inner: Instant,
}

impl Moment {
    pub fn now() -> Self {
        Self { inner: Instant::now() }
    }

    /// The number of milliseconds from `earlier` to `self`. A moment
    /// that is in fact later than `self` yields zero.
    pub fn delta_as_millis(&self, earlier: Moment) -> u64 {
        let d = self.inner.saturating_duration_since(earlier.inner);
        u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
    }

    /// Return a new moment `ms` milliseconds after this one.
    pub fn add_millis(&self, ms: u64) -> Self {
        Self { inner: self.inner + Duration::from_millis(ms) }
    }
}

struct PeriodicState {
    stop: bool,
}

/// A callback fired on a fixed interval from a dedicated thread.
///
/// Dropping the `Periodic` (or calling [`Periodic::stop`]) wakes the
/// thread and joins it, so once either returns no further invocation
/// is in flight.
pub struct Periodic {
    shared: Arc<(KMutex<PeriodicState>, KCondvar)>,
    handle: Option<JoinHandle<()>>,
}

impl Periodic {
    pub fn new<F>(
        name: &str,
        interval: Duration,
        mut cb: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let state = KMutex::new(PeriodicState { stop: false });
        let shared = Arc::new((state, KCondvar::new()));
        let thread_shared = shared.clone();

        let handle = std::thread::Builder::new().name(name.into()).spawn(
            move || {
                let (lock, cv) = &*thread_shared;
                loop {
                    let deadline = Instant::now() + interval;
                    let mut state = lock.lock();
                    loop {
                        if state.stop {
                            return;
                        }
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        state = cv.wait_timeout(state, deadline - now);
                    }
                    drop(state);
                    cb();
                }
            },
        )?;

        Ok(Self { shared, handle: Some(handle) })
    }

    /// Stop the periodic and wait for an in-flight invocation to
    /// finish.
    pub fn stop(&mut self) {
        {
            let (lock, cv) = &*self.shared;
            lock.lock().stop = true;
            cv.notify_all();
        }

        if let Some(handle) = self.handle.take() {
            // The last owner may be the callback itself; the thread
            // exits on its own once the callback returns.
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            // A panic in the callback has already been reported on
            // that thread.
            let _ = handle.join();
        }
    }
}

impl Drop for Periodic {
    fn drop(&mut self) {
        self.stop();
    }
}
