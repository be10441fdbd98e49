//! # Agent-Bridged Pub/Sub Node Runtime for Embedded Systems
//!
//! `agentlink` is a `no_std` client runtime that lets a microcontroller act
//! as a node in a distributed pub/sub messaging graph. It brings up a
//! communication transport (serial link or UDP), performs a handshake with a
//! remote bridging agent, announces a node identity, and then drives a
//! bounded, periodic dispatch loop for the lifetime of the device, all
//! inside a single task scheduled cooperatively alongside the rest of the
//! firmware.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** Designed for bare-metal targets. Working
//!   buffers are carved from one caller-provided [`Arena`]; tables are
//!   `heapless` and sized at compile time.
//! - **Fully Async:** Built with `async/await` on the
//!   [Embassy](https://embassy.dev/) ecosystem. Every blocking primitive
//!   takes an explicit timeout; nothing in the steady state waits
//!   unboundedly.
//! - **Rust 2024 Edition:** Native `async fn` in traits, no `async-trait`.
//! - **Build-Time Transport Selection:** Exactly one binding, serial byte
//!   stream (`transport-serial`) or UDP socket (`transport-net`), is
//!   compiled in; selecting zero or both fails the build.
//! - **Fail-Fast Initialization:** A strictly ordered bring-up chain with a
//!   static fatal/soft policy per step. A fatal step terminates the client
//!   task permanently; recovery is a device reset.
//! - **Bounded Dispatch:** The executor owns a fixed number of callback
//!   slots, serves ready sources in registration order, and returns within
//!   its budget plus a bounded dispatch pass.
//!
//! ## Architecture
//!
//! ```text
//! launch ──► transport binding up ──► spawn client task
//!                                          │
//!                                          ▼
//!                              bring_up (options → transport →
//!                               support → node → executor → diag)
//!                                          │
//!                                          ▼
//!                              loop { spin · yield · cyclic work }
//! ```
//!
//! The firmware's side of the boundary is the [`runtime::Hooks`] record: a
//! table of callback [`runtime::Registration`]s (topics and timers) plus an
//! optional per-cycle [`runtime::CyclicTask`]. Handler objects live in
//! `StaticCell`s and are handed in as `&'static mut dyn` references:
//!
//! ```ignore
//! struct Blinker;
//!
//! impl Callback for Blinker {
//!     fn on_event(&mut self, event: Event<'_>, outbox: &mut dyn PublishSink) {
//!         if let Event::Message { payload, .. } = event {
//!             // toggle the LED, queue a state report
//!             outbox.publish("lamp/state", payload);
//!         }
//!     }
//! }
//!
//! static BLINKER: StaticCell<Blinker> = StaticCell::new();
//! static REGS: StaticCell<[Registration<'static>; 1]> = StaticCell::new();
//!
//! let regs = REGS.init([Registration::new(
//!     Source::Topic("lamp/cmd"),
//!     BLINKER.init(Blinker),
//! )]);
//! let hooks = Hooks::new(regs);
//! ```
//!
//! See the documentation of [`client_task`] and [`launch`] for the
//! task-wrapping and launch pattern.

#![no_std]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
mod fmt;

pub mod error;
pub mod runtime;
pub mod session;
pub mod transport;
pub mod util;
pub mod wire;

// Re-export key types for easier access at the crate root.
pub use error::ClientError;
pub use runtime::{
    Callback, ClientConfig, CyclicTask, Event, Executor, Hooks, InitFailure, InitStep, Phase,
    PublishSink, Registration, Runtime, Source, bring_up, client_task, launch,
};
pub use session::{Arena, Node, Session, SessionOptions};
pub use transport::{SerialTransport, Transport, TransportError};
#[cfg(feature = "transport-net")]
pub use transport::{AgentLocator, UdpChannel, UdpTransport, interface_up};
