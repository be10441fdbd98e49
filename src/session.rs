//! # Session Layer
//!
//! The live state tying this device to its bridging agent:
//!
//! - [`Arena`]: the single memory-allocation strategy object. Construction
//!   calls carve their working buffers from one caller-provided region, so
//!   everything inside one session shares one allocation source and one
//!   lifetime.
//! - [`SessionOptions`]: the consumed-once configuration record for a
//!   connection attempt.
//! - [`Session`]: the connection itself. Performs the CONNECT/CONNACK
//!   handshake, reassembles inbound frames across reads, and encodes
//!   outbound publishes.
//! - [`Node`]: this device's validated identity in the messaging graph,
//!   announced to the agent on creation.

use embassy_time::{Duration, Instant};

use crate::error::ClientError;
use crate::transport::Transport;
use crate::wire;

/// Size of the inbound reassembly buffer a session carves from the arena.
/// Any valid frame fits with room for a partial successor.
pub const RX_BUFFER_LEN: usize = 512;
/// Size of the outbound encode buffer a session carves from the arena.
pub const TX_BUFFER_LEN: usize = 512;

/// A bump allocator over a caller-provided byte region.
///
/// One arena serves one messaging context; every buffer-owning construction
/// call carves from the same instance, and the carved slices share the
/// region's lifetime. There is no free: the context lives until device reset.
pub struct Arena<'a> {
    remaining: &'a mut [u8],
}

impl<'a> Arena<'a> {
    pub fn new(region: &'a mut [u8]) -> Self {
        Self { remaining: region }
    }

    /// Carves `len` bytes off the front of the region, or `None` if the
    /// region is exhausted.
    pub fn take(&mut self, len: usize) -> Option<&'a mut [u8]> {
        if len > self.remaining.len() {
            return None;
        }
        let region = core::mem::take(&mut self.remaining);
        let (carved, rest) = region.split_at_mut(len);
        self.remaining = rest;
        Some(carved)
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

/// Configuration for one connection attempt. Built from the client
/// configuration during initialization and consumed by
/// [`Session::establish`]; never reused.
pub struct SessionOptions<C> {
    channel: C,
    client_key: u32,
    handshake_timeout: Duration,
}

impl<C> SessionOptions<C> {
    /// Validates and captures the session parameters.
    ///
    /// The client key identifies this device to the agent and must be
    /// non-zero; the handshake timeout bounds the wait for the agent's
    /// answer and must be non-zero as well.
    pub fn new<E>(
        channel: C,
        client_key: u32,
        handshake_timeout: Duration,
    ) -> Result<Self, ClientError<E>> {
        if client_key == 0 || handshake_timeout.as_ticks() == 0 {
            return Err(ClientError::InvalidConfig);
        }
        Ok(Self {
            channel,
            client_key,
            handshake_timeout,
        })
    }

    /// The channel configuration the transport binding opens with.
    pub fn channel(&self) -> &C {
        &self.channel
    }
}

/// An inbound DATA frame copied out of the reassembly buffer, so it can be
/// queued for dispatch without borrowing the session.
#[derive(Debug, Clone)]
pub struct OwnedFrame {
    pub topic: heapless::String<{ wire::MAX_TOPIC_LEN }>,
    pub payload: heapless::Vec<u8, { wire::MAX_PAYLOAD_LEN }>,
}

impl OwnedFrame {
    fn new(topic: &str, payload: &[u8]) -> Option<Self> {
        let mut owned_topic = heapless::String::new();
        owned_topic.push_str(topic).ok()?;
        let mut owned_payload = heapless::Vec::new();
        owned_payload.extend_from_slice(payload).ok()?;
        Some(Self {
            topic: owned_topic,
            payload: owned_payload,
        })
    }
}

/// The live connection to the bridging agent.
///
/// Exactly one session exists per client task. It is created during the
/// initialization sequence and never torn down in the steady state; the
/// device either runs forever or resets.
pub struct Session<'a, T: Transport> {
    transport: T,
    rx: &'a mut [u8],
    rx_len: usize,
    tx: &'a mut [u8],
    connected: bool,
}

impl<'a, T: Transport> core::fmt::Debug for Session<'a, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("rx_len", &self.rx_len)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl<'a, T: Transport> Session<'a, T> {
    /// Establishes the session: carves working buffers from the arena,
    /// sends CONNECT, and waits for the agent's CONNACK within the
    /// handshake timeout.
    ///
    /// The transport must already have been opened.
    pub async fn establish(
        transport: T,
        options: SessionOptions<T::Config>,
        arena: &mut Arena<'a>,
    ) -> Result<Self, ClientError<T::Error>> {
        let rx = arena.take(RX_BUFFER_LEN).ok_or(ClientError::OutOfMemory)?;
        let tx = arena.take(TX_BUFFER_LEN).ok_or(ClientError::OutOfMemory)?;
        let mut session = Session {
            transport,
            rx,
            rx_len: 0,
            tx,
            connected: false,
        };

        let len = wire::encode_connect(session.tx, options.client_key)
            .map_err(|_| ClientError::BufferTooSmall)?;
        session.transport.send(&session.tx[..len]).await?;

        let deadline = Instant::now() + options.handshake_timeout;
        loop {
            match wire::decode(&session.rx[..session.rx_len]) {
                Ok(Some((wire::Frame::ConnAck { status }, used))) => {
                    session.advance_rx(used);
                    if status == 0 {
                        session.connected = true;
                        info!("session established");
                        return Ok(session);
                    }
                    return Err(ClientError::AgentRefused(status));
                }
                Ok(Some((_, used))) => {
                    debug!("ignoring pre-session frame");
                    session.advance_rx(used);
                    continue;
                }
                Ok(None) => {}
                Err(_) => {
                    warn!("malformed bytes during handshake, resynchronizing");
                    session.rx_len = 0;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ClientError::Timeout);
            }
            let n = session.recv_some(deadline - now).await?;
            if n == 0 {
                // The window elapsed inside the transport with no data.
                return Err(ClientError::Timeout);
            }
        }
    }

    /// Whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Yields at most one inbound DATA frame.
    ///
    /// The first transport read waits up to `window`; once any bytes have
    /// arrived, further reads only poll, so the call cannot overrun its
    /// budget reassembling a dribbling stream. Frames other than DATA are
    /// ignored, garbage resynchronizes the buffer, and `Ok(None)` means the
    /// window elapsed with no complete frame.
    pub async fn poll_frame(
        &mut self,
        window: Duration,
    ) -> Result<Option<OwnedFrame>, ClientError<T::Error>> {
        if !self.connected {
            return Err(ClientError::NotConnected);
        }
        let mut window = window;
        loop {
            match wire::decode(&self.rx[..self.rx_len]) {
                Ok(Some((frame, used))) => {
                    let owned = match frame {
                        wire::Frame::Data { topic, payload } => OwnedFrame::new(topic, payload),
                        _ => {
                            debug!("ignoring non-data frame in steady state");
                            None
                        }
                    };
                    self.advance_rx(used);
                    if let Some(frame) = owned {
                        return Ok(Some(frame));
                    }
                    continue;
                }
                Ok(None) => {}
                Err(_) => {
                    warn!("malformed inbound bytes, resynchronizing");
                    self.rx_len = 0;
                }
            }

            let n = self.recv_some(window).await?;
            if n == 0 {
                return Ok(None);
            }
            window = Duration::from_ticks(0);
        }
    }

    /// Encodes and sends a DATA frame to the agent.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), ClientError<T::Error>> {
        if !self.connected {
            return Err(ClientError::NotConnected);
        }
        let len = wire::encode_data(self.tx, topic, payload)
            .map_err(|_| ClientError::BufferTooSmall)?;
        self.transport.send(&self.tx[..len]).await?;
        Ok(())
    }

    /// Sends the node identity to the agent.
    pub(crate) async fn announce(
        &mut self,
        name: &str,
        namespace: &str,
    ) -> Result<(), ClientError<T::Error>> {
        if !self.connected {
            return Err(ClientError::NotConnected);
        }
        let len = wire::encode_announce(self.tx, name, namespace)
            .map_err(|_| ClientError::BufferTooSmall)?;
        self.transport.send(&self.tx[..len]).await?;
        Ok(())
    }

    async fn recv_some(&mut self, window: Duration) -> Result<usize, ClientError<T::Error>> {
        if self.rx_len == self.rx.len() {
            // A full buffer with no extractable frame can only be garbage;
            // any valid frame fits whole.
            warn!("rx buffer overflow, resynchronizing");
            self.rx_len = 0;
        }
        let n = self.transport.recv(&mut self.rx[self.rx_len..], window).await?;
        self.rx_len += n;
        Ok(n)
    }

    fn advance_rx(&mut self, used: usize) {
        self.rx.copy_within(used..self.rx_len, 0);
        self.rx_len -= used;
    }
}

/// This device's identity in the messaging graph. One node per task; the
/// node is created against a live session and announced to the agent.
#[derive(Debug)]
pub struct Node {
    name: heapless::String<{ wire::MAX_NAME_LEN }>,
    namespace: heapless::String<{ wire::MAX_NAME_LEN }>,
}

impl Node {
    /// Validates the identity and announces it to the agent.
    pub async fn init<T: Transport>(
        session: &mut Session<'_, T>,
        name: &str,
        namespace: &str,
    ) -> Result<Node, ClientError<T::Error>> {
        if !valid_name(name) || !valid_namespace(namespace) {
            return Err(ClientError::BadName);
        }
        session.announce(name, namespace).await?;

        let mut node = Node {
            name: heapless::String::new(),
            namespace: heapless::String::new(),
        };
        node.name.push_str(name).map_err(|_| ClientError::BadName)?;
        node.namespace
            .push_str(namespace)
            .map_err(|_| ClientError::BadName)?;
        Ok(node)
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_str()
    }
}

fn valid_token(s: &str) -> bool {
    let mut chars = s.chars();
    let leading_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    leading_ok && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn valid_name(s: &str) -> bool {
    s.len() <= wire::MAX_NAME_LEN && valid_token(s)
}

fn valid_namespace(s: &str) -> bool {
    if s.is_empty() {
        return true;
    }
    if s.len() > wire::MAX_NAME_LEN || !s.starts_with('/') {
        return false;
    }
    s[1..].split('/').all(valid_token)
}
