//! Callback and extension-point traits.
//!
//! These are the seams where application firmware plugs into the runtime.
//! All traits here are dyn-compatible so handler objects can live in
//! `StaticCell`s and be handed to the client task as `&'static mut dyn`
//! references, without generic parameters leaking into task signatures.
//!
//! # Publishing Pattern
//!
//! Callbacks never perform async I/O. They queue outbound messages through
//! the [`PublishSink`] they are handed; the runtime performs the actual
//! transmission after the dispatch pass returns. This keeps the traits
//! object-safe and every callback invocation synchronous and bounded.

use embassy_time::{Duration, Instant};

/// Object-safe sink for queueing outbound publishes.
///
/// Returns `false` when the message was not queued (sink full, or the
/// topic/payload exceed their wire maxima): the message is dropped, never
/// truncated.
pub trait PublishSink {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool;
}

/// What woke a callback up.
#[derive(Debug)]
pub enum Event<'a> {
    /// An inbound message on the callback's subscribed topic.
    Message { topic: &'a str, payload: &'a [u8] },
    /// The callback's timer came due.
    Timer { now: Instant },
}

/// A registered callback. Invoked by the executor whenever its source is
/// ready; synchronous processing only.
pub trait Callback {
    fn on_event(&mut self, event: Event<'_>, outbox: &mut dyn PublishSink);
}

/// Fixed-period outbound work performed at the end of every loop cycle
/// (state publishing, heartbeats).
pub trait CyclicTask {
    fn on_cycle(&mut self, outbox: &mut dyn PublishSink);
}

/// The inbound source a callback is bound to.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Source<'a> {
    /// Messages published on a topic.
    Topic(&'a str),
    /// A periodic timer with the given period.
    Timer(Duration),
}

/// One entry of the application's callback table: a source and the handler
/// to invoke for it. The handler reference is moved into the executor
/// during initialization, which is why it sits behind an `Option`.
pub struct Registration<'a> {
    pub source: Source<'a>,
    pub callback: Option<&'a mut dyn Callback>,
}

impl<'a> Registration<'a> {
    pub fn new(source: Source<'a>, callback: &'a mut dyn Callback) -> Self {
        Self {
            source,
            callback: Some(callback),
        }
    }
}

/// The fixed set of insertion points the application hands to the client
/// task. Everything else an application needs (its own state, its own
/// additional tasks) stays on the application's side of this boundary.
pub struct Hooks<'a> {
    /// Callbacks to register with the executor, in invocation-priority
    /// order (the executor dispatches in registration order).
    pub registrations: &'a mut [Registration<'a>],
    /// Optional per-cycle outbound work.
    pub cyclic: Option<&'a mut dyn CyclicTask>,
}

impl<'a> Hooks<'a> {
    pub fn new(registrations: &'a mut [Registration<'a>]) -> Self {
        Self {
            registrations,
            cyclic: None,
        }
    }

    pub fn with_cyclic(mut self, cyclic: &'a mut dyn CyclicTask) -> Self {
        self.cyclic = Some(cyclic);
        self
    }
}

impl Default for Hooks<'_> {
    fn default() -> Self {
        Self {
            registrations: &mut [],
            cyclic: None,
        }
    }
}

/// A callback that does nothing. Useful as a placeholder while wiring up
/// a device, or in tests.
pub struct NoopCallback;

impl Callback for NoopCallback {
    fn on_event(&mut self, _event: Event<'_>, _outbox: &mut dyn PublishSink) {}
}
