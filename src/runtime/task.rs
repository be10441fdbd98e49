//! Client task lifecycle.
//!
//! The life of a device splits into three pieces, all of which live here:
//!
//! 1. **Initialization sequence** ([`bring_up`]): the strictly ordered,
//!    short-circuiting chain
//!    `OptionsCreated → TransportConfigured → SupportReady → NodeReady →
//!    ExecutorReady → Spinning`. Each transition is a single fallible call;
//!    a static policy table ([`InitStep::severity`]) decides per step
//!    whether a failure is fatal (log `{step, code}` and give up for good)
//!    or soft (log and continue). Nothing is torn down on the fatal path;
//!    recovery is a device reset.
//! 2. **Steady-state loop** ([`Runtime::run`]): spin the executor with a
//!    bounded budget, yield to the scheduler, perform cyclic outbound work,
//!    flush the outbox. Errors inside a cycle are logged and the loop
//!    continues; there is no exit condition.
//! 3. **Launcher** ([`launch`]): brings the transport binding up (for the
//!    networked binding this waits for the interface, blocking from the
//!    caller's point of view), schedules the client task through a
//!    caller-supplied spawn hook, and returns immediately. It makes no
//!    session calls itself.
//!
//! Because `embassy_executor::task` functions cannot be generic, the
//! firmware wraps [`client_task`] in its own task function with concrete
//! types, exactly like any other runner:
//!
//! ```ignore
//! #[embassy_executor::task]
//! async fn node_task(
//!     transport: UdpTransport<'static>,
//!     config: ClientConfig<'static, UdpChannel>,
//!     arena: &'static mut Arena<'static>,
//!     hooks: Hooks<'static>,
//! ) {
//!     agentlink::runtime::client_task::<_, 4>(transport, config, arena, hooks).await
//! }
//!
//! // In main, after building the network stack:
//! launch(stack, Duration::from_secs(30), || {
//!     spawner.spawn(node_task(transport, config, arena, hooks))
//! })
//! .await?;
//! ```
//!
//! Core affinity and priority are properties of the executor whose
//! `Spawner` the hook captures; hand in the spawner of the executor pinned
//! to the core the client task should own.

use embassy_executor::SpawnError;
use embassy_time::{Duration, Timer};

use crate::error::ClientError;
use crate::runtime::executor::Executor;
use crate::runtime::outbox::{BufferedOutbox, OUTBOX_DEPTH};
use crate::runtime::traits::{CyclicTask, Hooks};
use crate::session::{Arena, Node, Session, SessionOptions};
use crate::transport::Transport;

/// Reserved topic the boot banner is published on (the soft diagnostics
/// step at the end of initialization).
pub const BOOT_TOPIC: &str = "_diag/boot";

/// One step of the initialization sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitStep {
    /// Building and validating the consumed-once options record.
    Options,
    /// Opening the transport channel with the options' addressing.
    Transport,
    /// Establishing the agent session (handshake).
    Support,
    /// Creating and announcing the node identity.
    Node,
    /// Constructing the executor and registering all callbacks.
    Executor,
    /// Publishing the boot banner.
    Diagnostics,
}

/// Failure classification of an initialization step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Severity {
    /// The step cannot be skipped; its failure terminates the task.
    Fatal,
    /// The step's absence degrades but does not invalidate the node.
    Soft,
}

impl InitStep {
    /// The static failure policy table. A partially initialized node (say,
    /// a session without an executor) is never useful on a single-task
    /// device (continuing would only defer the same failure to the first
    /// dispatch call), so every structural step fails fast.
    pub const fn severity(self) -> Severity {
        match self {
            InitStep::Options
            | InitStep::Transport
            | InitStep::Support
            | InitStep::Node
            | InitStep::Executor => Severity::Fatal,
            InitStep::Diagnostics => Severity::Soft,
        }
    }

    /// Step identifier for the diagnostics boundary.
    pub const fn name(self) -> &'static str {
        match self {
            InitStep::Options => "options-init",
            InitStep::Transport => "transport-open",
            InitStep::Support => "support-init",
            InitStep::Node => "node-init",
            InitStep::Executor => "executor-init",
            InitStep::Diagnostics => "boot-diagnostics",
        }
    }
}

/// How far a client has come. Phases are strictly ordered and never
/// revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    Boot,
    OptionsCreated,
    TransportConfigured,
    SupportReady,
    NodeReady,
    ExecutorReady,
    Spinning,
}

/// The terminal outcome of a failed initialization: the step that failed,
/// its numeric status, and the last phase that was reached. Fatal failures
/// are absorbing: the task never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InitFailure {
    pub step: InitStep,
    pub code: u8,
    pub reached: Phase,
}

/// Everything a client needs to come up, gathered in one record.
///
/// `channel` is the transport binding's addressing (a [`UdpChannel`] for
/// the networked binding, `()` for serial); the rest parameterizes the
/// session, the node identity, and the steady-state loop. The spin budget
/// bounds dispatch latency; the yield interval bounds how much of its core
/// the client task may monopolize. They are deliberately independent.
///
/// [`UdpChannel`]: crate::transport::UdpChannel
#[derive(Debug, Clone)]
pub struct ClientConfig<'a, C> {
    pub channel: C,
    pub client_key: u32,
    pub node_name: &'a str,
    pub namespace: &'a str,
    pub handshake_timeout: Duration,
    pub spin_budget: Duration,
    pub yield_interval: Duration,
}

impl<'a, C> ClientConfig<'a, C> {
    /// A configuration with the default timings: 2 s handshake window,
    /// 10 ms spin budget, 10 ms yield interval.
    pub fn new(channel: C, client_key: u32, node_name: &'a str) -> Self {
        Self {
            channel,
            client_key,
            node_name,
            namespace: "",
            handshake_timeout: Duration::from_secs(2),
            spin_budget: Duration::from_millis(10),
            yield_interval: Duration::from_millis(10),
        }
    }

    pub fn with_namespace(mut self, namespace: &'a str) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_spin_budget(mut self, budget: Duration) -> Self {
        self.spin_budget = budget;
        self
    }

    pub fn with_yield_interval(mut self, interval: Duration) -> Self {
        self.yield_interval = interval;
        self
    }
}

fn fatal(step: InitStep, code: u8, reached: Phase) -> InitFailure {
    debug_assert!(matches!(step.severity(), Severity::Fatal));
    error!(
        "initialization failed at {}: status {}, giving up",
        step.name(),
        code
    );
    InitFailure {
        step,
        code,
        reached,
    }
}

fn soft(step: InitStep, code: u8) {
    debug_assert!(matches!(step.severity(), Severity::Soft));
    warn!(
        "setup step {} failed with status {}, continuing",
        step.name(),
        code
    );
}

/// Runs the initialization sequence once.
///
/// Steps execute strictly in order; the first fatal failure short-circuits
/// the chain and nothing built so far is torn down. On success the returned
/// [`Runtime`] is in the `Spinning` phase and ready for [`Runtime::run`].
pub async fn bring_up<'a, T, const SLOTS: usize>(
    mut transport: T,
    config: ClientConfig<'a, T::Config>,
    arena: &mut Arena<'a>,
    hooks: Hooks<'a>,
) -> Result<Runtime<'a, T, SLOTS>, InitFailure>
where
    T: Transport,
{
    let mut reached = Phase::Boot;

    // Options: build the consumed-once record, validating everything the
    // rest of the sequence depends on.
    if config.yield_interval.as_ticks() == 0 {
        let code = ClientError::<T::Error>::InvalidConfig.code();
        return Err(fatal(InitStep::Options, code, reached));
    }
    let options =
        SessionOptions::new(config.channel, config.client_key, config.handshake_timeout)
            .map_err(|e: ClientError<T::Error>| fatal(InitStep::Options, e.code(), reached))?;
    reached = Phase::OptionsCreated;

    // Transport: open the bound channel with the options' addressing.
    transport
        .open(options.channel())
        .await
        .map_err(|e| fatal(InitStep::Transport, ClientError::Transport(e).code(), reached))?;
    reached = Phase::TransportConfigured;

    // Support: establish the agent session. Consumes the options.
    let mut session = Session::establish(transport, options, arena)
        .await
        .map_err(|e| fatal(InitStep::Support, e.code(), reached))?;
    reached = Phase::SupportReady;

    // Node: validate and announce the identity.
    let node = Node::init(&mut session, config.node_name, config.namespace)
        .await
        .map_err(|e| fatal(InitStep::Node, e.code(), reached))?;
    reached = Phase::NodeReady;

    // Executor: build the dispatcher and register every application
    // callback. Overflowing the slot table is fatal here, before the first
    // spin: a subscription that silently never fires has no diagnostic.
    let mut executor: Executor<'a, SLOTS> = Executor::new();
    for registration in hooks.registrations.iter_mut() {
        let callback = registration.callback.take().ok_or_else(|| {
            let code = ClientError::<T::Error>::HookConsumed.code();
            fatal(InitStep::Executor, code, reached)
        })?;
        executor
            .register(registration.source, callback)
            .map_err(|e| fatal(InitStep::Executor, e.code(), reached))?;
    }
    reached = Phase::ExecutorReady;

    // Diagnostics: boot banner. The one step the node can live without.
    if let Err(e) = session.publish(BOOT_TOPIC, node.name().as_bytes()).await {
        soft(InitStep::Diagnostics, e.code());
    }

    reached = Phase::Spinning;
    info!("node {} spinning", node.name());
    Ok(Runtime {
        session,
        node,
        executor,
        cyclic: hooks.cyclic,
        outbox: BufferedOutbox::new(),
        spin_budget: config.spin_budget,
        yield_interval: config.yield_interval,
        phase: reached,
    })
}

/// A fully initialized client: session, node, executor and loop
/// configuration, owned together by the one task that drives them.
pub struct Runtime<'a, T: Transport, const SLOTS: usize> {
    session: Session<'a, T>,
    node: Node,
    executor: Executor<'a, SLOTS>,
    cyclic: Option<&'a mut dyn CyclicTask>,
    outbox: BufferedOutbox<OUTBOX_DEPTH>,
    spin_budget: Duration,
    yield_interval: Duration,
    phase: Phase,
}

impl<'a, T: Transport, const SLOTS: usize> core::fmt::Debug for Runtime<'a, T, SLOTS> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("node", &self.node)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl<'a, T: Transport, const SLOTS: usize> Runtime<'a, T, SLOTS> {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn session(&self) -> &Session<'a, T> {
        &self.session
    }

    /// The steady-state loop. Never returns; the only ways out are the
    /// fatal path in [`bring_up`] (which precedes this) and a device reset.
    pub async fn run(&mut self) -> ! {
        loop {
            self.cycle().await;
        }
    }

    /// One loop iteration: bounded dispatch, voluntary yield, cyclic
    /// outbound work, outbox flush.
    ///
    /// A failure surfaced by the dispatcher itself is soft: the dispatcher
    /// staying alive is worth more than crashing on one bad cycle.
    pub async fn cycle(&mut self) {
        match self
            .executor
            .spin(&mut self.session, self.spin_budget, &mut self.outbox)
            .await
        {
            Ok(report) => {
                if report.dropped > 0 {
                    trace!("{} unroutable frames dropped", report.dropped);
                }
            }
            Err(e) => warn!("dispatch cycle error: status {}", e.code()),
        }

        // Yield so other tasks on this core are guaranteed forward
        // progress, independent of how much of the spin budget was used.
        Timer::after(self.yield_interval).await;

        if let Some(cyclic) = self.cyclic.as_mut() {
            cyclic.on_cycle(&mut self.outbox);
        }
        self.flush_outbox().await;
    }

    async fn flush_outbox(&mut self) {
        for i in 0..self.outbox.len() {
            if let Some(entry) = self.outbox.get(i) {
                if let Err(e) = self
                    .session
                    .publish(entry.topic.as_str(), &entry.payload)
                    .await
                {
                    warn!("outbound publish failed: status {}", e.code());
                }
            }
        }
        self.outbox.clear();
    }
}

/// The client task body: one initialization sequence, then the loop.
///
/// On fatal initialization failure the task terminates permanently: no
/// retry, no restart; an external watchdog or power cycle is the recovery
/// path. Firmware wraps this in a concrete `#[embassy_executor::task]`
/// function (see the module documentation).
pub async fn client_task<'a, T, const SLOTS: usize>(
    transport: T,
    config: ClientConfig<'a, T::Config>,
    arena: &mut Arena<'a>,
    hooks: Hooks<'a>,
) where
    T: Transport,
{
    match bring_up::<T, SLOTS>(transport, config, arena, hooks).await {
        Ok(mut runtime) => runtime.run().await,
        Err(_failure) => {
            // Already reported at the failing step; the task simply ceases
            // to run.
        }
    }
}

/// Reported by [`launch`] when the bootstrap cannot complete.
#[derive(Debug)]
pub enum LaunchError {
    /// The network interface did not come up. Fatal to the whole
    /// bootstrap: there is no degraded mode without a transport.
    #[cfg(feature = "transport-net")]
    InterfaceDown,
    /// The scheduler refused the client task.
    Spawn(SpawnError),
}

/// Brings the networked transport binding up, then schedules the client
/// task and returns immediately.
///
/// Waiting for the interface (link up, DHCP lease) happens here, *before*
/// the task is spawned, because the binding must exist before the task's
/// first initialization step runs. The spawn hook receives no arguments;
/// it captures the concrete task token and the spawner of the executor the
/// task should run on.
#[cfg(feature = "transport-net")]
pub async fn launch(
    stack: embassy_net::Stack<'_>,
    interface_timeout: Duration,
    spawn: impl FnOnce() -> Result<(), SpawnError>,
) -> Result<(), LaunchError> {
    crate::transport::interface_up(stack, interface_timeout)
        .await
        .map_err(|_| LaunchError::InterfaceDown)?;
    spawn().map_err(LaunchError::Spawn)
}

/// Schedules the client task over the serial binding and returns
/// immediately. The serial channel needs no bring-up of its own, so this
/// variant is synchronous and touches no network machinery at all.
#[cfg(feature = "transport-serial")]
pub fn launch(spawn: impl FnOnce() -> Result<(), SpawnError>) -> Result<(), LaunchError> {
    spawn().map_err(LaunchError::Spawn)
}
