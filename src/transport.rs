//! # Transport Binding
//!
//! This module defines the [`Transport`] trait, which abstracts the byte
//! channel carrying session traffic to the bridging agent, so the rest of the
//! runtime is hardware and network-stack agnostic.
//!
//! Two concrete bindings exist: [`SerialTransport`] over any
//! `embedded-io-async` byte stream, and [`UdpTransport`] over an `embassy-net`
//! UDP socket. Which one backs the device is a build-time choice made through
//! the `transport-serial` / `transport-net` cargo features; a build that
//! enables zero or both of them is rejected below, before anything else can
//! go wrong at runtime.
//!
//! With the Rust 2024 Edition, the trait uses native `async fn`, removing the
//! need for the `#[async_trait]` macro.

use core::pin::pin;

use embassy_time::{Duration, Timer};
use futures::future::{Either, select};

#[cfg(all(feature = "transport-net", feature = "transport-serial"))]
compile_error!(
    "exactly one transport binding must be selected: \
     enable either `transport-net` or `transport-serial`, not both"
);

#[cfg(not(any(feature = "transport-net", feature = "transport-serial")))]
compile_error!(
    "a transport binding is required: enable the `transport-net` or \
     `transport-serial` feature"
);

/// A marker trait for transport-related errors.
pub trait TransportError: core::fmt::Debug {}

/// A byte channel to the bridging agent.
///
/// Every potentially blocking operation is bounded: `recv` takes an explicit
/// timeout and reports an elapsed window as a zero-length read, so callers
/// can poll (`Duration::from_ticks(0)`) or wait without ever blocking
/// unboundedly.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Channel addressing/configuration consumed by [`Transport::open`].
    type Config;
    /// The error type returned by the transport.
    type Error: TransportError;

    /// Brings the channel up. Must be called once before any traffic.
    async fn open(&mut self, config: &Self::Config) -> Result<(), Self::Error>;

    /// Tears the channel down. The steady-state runtime never calls this
    /// (recovery from a dead session is a device reset), but the operation
    /// is part of the channel contract.
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Sends a buffer of data, returning the number of bytes accepted.
    async fn send(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;

    /// Receives data into `buf`, waiting at most `timeout`.
    ///
    /// Returns the number of bytes read; `0` means the window elapsed with
    /// no data available.
    async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Self::Error>;
}

/// Error type of [`SerialTransport`], wrapping the stream's own error.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SerialError<E> {
    /// The underlying stream failed.
    Io(E),
    /// The stream reported end-of-input, which a serial link never does
    /// unless the far side went away.
    Closed,
}

impl<E: core::fmt::Debug> TransportError for SerialError<E> {}

/// Byte-stream binding over any `embedded-io-async` reader/writer (UART,
/// USB CDC, a pipe in tests).
pub struct SerialTransport<S> {
    stream: S,
}

impl<S> SerialTransport<S> {
    /// Wraps an already-configured byte stream.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S> Transport for SerialTransport<S>
where
    S: embedded_io_async::Read + embedded_io_async::Write,
{
    type Config = ();
    type Error = SerialError<S::Error>;

    async fn open(&mut self, _config: &()) -> Result<(), Self::Error> {
        // The stream is configured (baud rate, pins) before it is handed in.
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.stream.flush().await.map_err(SerialError::Io)
    }

    async fn send(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.stream.write_all(buf).await.map_err(SerialError::Io)?;
        // Flush so frames actually leave the device instead of sitting in a
        // FIFO until the next unrelated write.
        self.stream.flush().await.map_err(SerialError::Io)?;
        Ok(buf.len())
    }

    async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Self::Error> {
        let read = pin!(self.stream.read(buf));
        let window = pin!(Timer::after(timeout));
        match select(read, window).await {
            Either::Left((Ok(0), _)) => Err(SerialError::Closed),
            Either::Left((Ok(n), _)) => Ok(n),
            Either::Left((Err(e), _)) => Err(SerialError::Io(e)),
            Either::Right(((), _)) => Ok(0),
        }
    }
}

#[cfg(feature = "transport-net")]
mod net {
    use super::*;
    use embassy_net::udp::{BindError, RecvError, SendError, UdpSocket};
    use embassy_net::{IpAddress, IpEndpoint, Ipv4Address, Stack};

    /// How the device finds its agent on the network.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum AgentLocator {
        /// Talk to a known address and port.
        Static(IpEndpoint),
        /// Probe the subnet broadcast address on `port` and lock onto the
        /// first agent that answers.
        Broadcast { port: u16 },
    }

    /// Channel configuration for the networked binding.
    #[derive(Debug, Clone, Copy)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct UdpChannel {
        /// Local port the socket binds to.
        pub local_port: u16,
        /// Where the agent lives.
        pub agent: AgentLocator,
    }

    /// Error type of [`UdpTransport`].
    #[derive(Debug)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub enum UdpError {
        Bind(BindError),
        Send(SendError),
        Recv(RecvError),
        /// No agent endpoint is known yet and none is discoverable.
        NoAgent,
    }

    impl TransportError for UdpError {}

    /// Datagram binding over an `embassy-net` UDP socket.
    ///
    /// The socket is created by the firmware (it owns the buffer storage) and
    /// handed in; `open` binds it and resolves the agent locator.
    pub struct UdpTransport<'a> {
        socket: UdpSocket<'a>,
        agent: Option<IpEndpoint>,
        probe: Option<IpEndpoint>,
    }

    impl<'a> UdpTransport<'a> {
        pub fn new(socket: UdpSocket<'a>) -> Self {
            Self {
                socket,
                agent: None,
                probe: None,
            }
        }

        /// The agent endpoint, once known (immediately for static addressing,
        /// after the first reply in broadcast discovery).
        pub fn agent(&self) -> Option<IpEndpoint> {
            self.agent
        }
    }

    impl Transport for UdpTransport<'_> {
        type Config = UdpChannel;
        type Error = UdpError;

        async fn open(&mut self, config: &UdpChannel) -> Result<(), Self::Error> {
            self.socket.bind(config.local_port).map_err(UdpError::Bind)?;
            match config.agent {
                AgentLocator::Static(endpoint) => self.agent = Some(endpoint),
                AgentLocator::Broadcast { port } => {
                    self.probe = Some(IpEndpoint::new(
                        IpAddress::Ipv4(Ipv4Address::BROADCAST),
                        port,
                    ));
                }
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), Self::Error> {
            self.socket.close();
            Ok(())
        }

        async fn send(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            let target = self.agent.or(self.probe).ok_or(UdpError::NoAgent)?;
            self.socket
                .send_to(buf, target)
                .await
                .map_err(UdpError::Send)?;
            Ok(buf.len())
        }

        async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Self::Error> {
            let read = pin!(self.socket.recv_from(buf));
            let window = pin!(Timer::after(timeout));
            match select(read, window).await {
                Either::Left((Ok((n, meta)), _)) => {
                    match self.agent {
                        None => {
                            info!("agent discovered at {}", meta.endpoint);
                            self.agent = Some(meta.endpoint);
                        }
                        Some(agent) if agent != meta.endpoint => {
                            // A datagram from a third party is not session
                            // traffic; report the window as empty.
                            debug!("dropping datagram from unexpected peer");
                            return Ok(0);
                        }
                        Some(_) => {}
                    }
                    Ok(n)
                }
                Either::Left((Err(e), _)) => Err(UdpError::Recv(e)),
                Either::Right(((), _)) => Ok(0),
            }
        }
    }

    /// Reported by [`interface_up`] when the network interface did not come
    /// up within its allotted time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct InterfaceDown;

    /// Waits for the network interface to be configured (link up, DHCP
    /// lease or static config applied), at most `timeout`.
    ///
    /// The launcher calls this before the client task is scheduled; a
    /// failure here is fatal to the whole bootstrap.
    pub async fn interface_up(stack: Stack<'_>, timeout: Duration) -> Result<(), InterfaceDown> {
        let up = pin!(stack.wait_config_up());
        let window = pin!(Timer::after(timeout));
        match select(up, window).await {
            Either::Left(((), _)) => Ok(()),
            Either::Right(((), _)) => Err(InterfaceDown),
        }
    }
}

#[cfg(feature = "transport-net")]
pub use net::{AgentLocator, InterfaceDown, UdpChannel, UdpError, UdpTransport, interface_up};

/// The binding selected for this build.
#[cfg(feature = "transport-net")]
pub type Binding<'a> = UdpTransport<'a>;

/// The binding selected for this build.
#[cfg(feature = "transport-serial")]
pub type Binding<S> = SerialTransport<S>;
