//! Client Runtime
//!
//! Everything that happens after a transport binding exists: the ordered
//! initialization sequence, the fixed-capacity callback dispatcher, and the
//! steady-state loop that coexists with the rest of the firmware on one
//! core.
//!
//! # Object-Safe Design
//!
//! Application callbacks implement the dyn-compatible [`Callback`] and
//! [`CyclicTask`] traits and are handed in as `&'static mut dyn` references
//! (typically out of `StaticCell`s), so no generic parameters leak into
//! task functions. Callbacks never perform async I/O; they queue publishes
//! through a [`PublishSink`] and the runtime transmits them afterwards.
//!
//! # Ownership
//!
//! One client task owns one arena, one session, one node and one executor.
//! Nothing here is shared across tasks, which is why the whole runtime gets
//! by without a single lock.

pub(crate) mod executor;
pub(crate) mod outbox;
pub(crate) mod task;
pub(crate) mod traits;

pub use executor::{Executor, INBOX_DEPTH, RegisterError, SpinReport};
pub use outbox::{BufferedOutbox, OUTBOX_DEPTH, OwnedPublish};
pub use task::{
    BOOT_TOPIC, ClientConfig, InitFailure, InitStep, LaunchError, Phase, Runtime, Severity,
    bring_up, client_task, launch,
};
pub use traits::{
    Callback, CyclicTask, Event, Hooks, NoopCallback, PublishSink, Registration, Source,
};
