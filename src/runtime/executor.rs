//! The dispatcher.
//!
//! An [`Executor`] owns a fixed-capacity table of callback registrations
//! (timers and subscriptions, capacity set by the `SLOTS` const parameter)
//! and a small queue
//! of inbound frames awaiting dispatch. Capacity is fixed at construction;
//! the table never resizes, and a registration that does not fit is refused
//! loudly rather than dropped.
//!
//! [`Executor::spin`] is the steady-state operation: ingest whatever the
//! session has (waiting at most the given budget, and only when nothing is
//! already pending), then walk the slot table once in registration order
//! and invoke every callback whose source is ready. Ready sources are
//! therefore always served first-registered, first-served.

use embassy_time::{Duration, Instant};

use crate::error::ClientError;
use crate::runtime::traits::{Callback, Event, PublishSink, Source};
use crate::session::{OwnedFrame, Session};
use crate::transport::Transport;

/// Number of inbound frames that can await dispatch within one spin pass.
pub const INBOX_DEPTH: usize = 8;

/// Returned when a registration does not fit the executor's slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterError {
    /// All slots are taken. The capacity is a build-time decision; raising
    /// it means rebuilding the firmware image.
    Exhausted,
}

impl RegisterError {
    /// Numeric status code for the diagnostics boundary.
    pub fn code(&self) -> u8 {
        match self {
            RegisterError::Exhausted => 10,
        }
    }
}

/// Counters describing one spin pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpinReport {
    pub timers_fired: usize,
    pub messages: usize,
    /// Inbound frames that matched no registration and were discarded.
    pub dropped: usize,
}

struct Slot<'a> {
    source: Source<'a>,
    callback: &'a mut dyn Callback,
    next_fire: Option<Instant>,
}

/// Fixed-capacity callback dispatcher. See the module documentation.
pub struct Executor<'a, const SLOTS: usize> {
    slots: heapless::Vec<Slot<'a>, SLOTS>,
    inbox: heapless::Vec<OwnedFrame, INBOX_DEPTH>,
}

impl<'a, const SLOTS: usize> Executor<'a, SLOTS> {
    pub fn new() -> Self {
        Self {
            slots: heapless::Vec::new(),
            inbox: heapless::Vec::new(),
        }
    }

    /// Binds a callback to an inbound source.
    ///
    /// All registrations happen during initialization, before the first
    /// spin; the slot table is not meant to change while the loop runs.
    pub fn register(
        &mut self,
        source: Source<'a>,
        callback: &'a mut dyn Callback,
    ) -> Result<(), RegisterError> {
        let next_fire = match source {
            Source::Timer(period) => Some(Instant::now() + period),
            Source::Topic(_) => None,
        };
        self.slots
            .push(Slot {
                source,
                callback,
                next_fire,
            })
            .map_err(|_| RegisterError::Exhausted)
    }

    /// Registered callbacks.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot capacity fixed at construction.
    pub const fn capacity(&self) -> usize {
        SLOTS
    }

    /// One dispatch pass, bounded by `budget`.
    ///
    /// The budget is spent waiting for new transport data only while the
    /// inbox is empty; once anything is pending, ingest degrades to
    /// poll-only reads. Each registered source is examined exactly once, in
    /// registration order, so the pass itself is bounded by the slot and
    /// inbox capacities regardless of traffic.
    ///
    /// Transport trouble during ingest is returned *after* the dispatch
    /// pass has run: frames already queued are still delivered, and the
    /// caller decides whether the error is worth more than a log line.
    pub async fn spin<T: Transport>(
        &mut self,
        session: &mut Session<'_, T>,
        budget: Duration,
        outbox: &mut dyn PublishSink,
    ) -> Result<SpinReport, ClientError<T::Error>> {
        let mut pump_error = None;
        let mut window = budget;
        while !self.inbox.is_full() {
            match session.poll_frame(window).await {
                Ok(Some(frame)) => {
                    // is_full was checked above; the push cannot fail.
                    if self.inbox.push(frame).is_err() {
                        break;
                    }
                    window = Duration::from_ticks(0);
                }
                Ok(None) => break,
                Err(e) => {
                    pump_error = Some(e);
                    break;
                }
            }
        }

        let mut report = SpinReport::default();
        let now = Instant::now();
        for slot in self.slots.iter_mut() {
            match slot.source {
                Source::Timer(period) => {
                    if let Some(due) = slot.next_fire {
                        if now >= due {
                            slot.callback.on_event(Event::Timer { now }, outbox);
                            report.timers_fired += 1;
                            let mut next = due + period;
                            if next <= now {
                                // Fell behind; skip the missed periods
                                // instead of bursting to catch up.
                                next = now + period;
                            }
                            slot.next_fire = Some(next);
                        }
                    }
                }
                Source::Topic(topic) => {
                    let mut i = 0;
                    while i < self.inbox.len() {
                        if self.inbox[i].topic.as_str() == topic {
                            let frame = self.inbox.remove(i);
                            slot.callback.on_event(
                                Event::Message {
                                    topic: frame.topic.as_str(),
                                    payload: &frame.payload,
                                },
                                outbox,
                            );
                            report.messages += 1;
                        } else {
                            i += 1;
                        }
                    }
                }
            }
        }

        if !self.inbox.is_empty() {
            // Whatever is left matched no registration this pass and never
            // will; letting it sit would only silt up the inbox.
            report.dropped = self.inbox.len();
            debug!("dropping {} frames with no matching subscription", report.dropped);
            self.inbox.clear();
        }

        match pump_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

impl<const SLOTS: usize> Default for Executor<'_, SLOTS> {
    fn default() -> Self {
        Self::new()
    }
}
