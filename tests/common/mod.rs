//! Shared test doubles: a scriptable in-memory transport and a recording
//! callback.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use agentlink::runtime::{Callback, Event, PublishSink};
use agentlink::session::{Arena, Session, SessionOptions};
use agentlink::transport::{Transport, TransportError};
use agentlink::wire;
use embassy_time::Duration;

/// Error type of [`MockTransport`]; the payload is a scripted status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError(pub u8);

impl TransportError for MockError {}

#[derive(Default)]
pub struct MockState {
    /// Scripted inbound chunks, one per `recv` call.
    pub rx: VecDeque<Vec<u8>>,
    /// Everything the client wrote, one entry per `send` call.
    pub sent: Vec<Vec<u8>>,
    /// Number of `send` calls observed (including failed ones).
    pub sends: usize,
    /// Number of `close` calls observed.
    pub closes: usize,
    /// Fail `open` with a scripted error.
    pub fail_open: bool,
    /// Fail the nth `send` call (1-based).
    pub fail_send_at: Option<usize>,
    /// Fail `recv` once the scripted chunks run out (instead of reporting
    /// an empty window).
    pub fail_recv_when_empty: bool,
}

pub type SharedState = Rc<RefCell<MockState>>;

/// An in-memory [`Transport`] driven entirely by its [`MockState`] script.
/// Timeouts are ignored: a `recv` either pops the next scripted chunk or
/// reports the window as elapsed, so tests never depend on wall-clock time.
pub struct MockTransport {
    state: SharedState,
}

impl MockTransport {
    pub fn new() -> (Self, SharedState) {
        let state = Rc::new(RefCell::new(MockState::default()));
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

impl Transport for MockTransport {
    type Config = ();
    type Error = MockError;

    async fn open(&mut self, _config: &()) -> Result<(), MockError> {
        if self.state.borrow().fail_open {
            return Err(MockError(0xE0));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MockError> {
        self.state.borrow_mut().closes += 1;
        Ok(())
    }

    async fn send(&mut self, buf: &[u8]) -> Result<usize, MockError> {
        let mut state = self.state.borrow_mut();
        state.sends += 1;
        if state.fail_send_at == Some(state.sends) {
            return Err(MockError(0xE1));
        }
        state.sent.push(buf.to_vec());
        Ok(buf.len())
    }

    async fn recv(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, MockError> {
        let mut state = self.state.borrow_mut();
        match state.rx.pop_front() {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                Ok(n)
            }
            None if state.fail_recv_when_empty => Err(MockError(0xE2)),
            None => Ok(0),
        }
    }
}

/// Builds a connected session over a fresh mock transport. The scripted
/// CONNACK is consumed by the handshake, so the returned state's `rx` queue
/// is empty and ready for test frames.
pub async fn establish_session<'a>(
    arena: &mut Arena<'a>,
) -> (Session<'a, MockTransport>, SharedState) {
    let (mut transport, state) = MockTransport::new();
    state.borrow_mut().rx.push_back(connack(0));
    transport.open(&()).await.unwrap();
    let options =
        SessionOptions::new::<MockError>((), 0xAA55, Duration::from_secs(1)).unwrap();
    let session = Session::establish(transport, options, arena).await.unwrap();
    (session, state)
}

/// Pre-encoded CONNACK bytes.
pub fn connack(status: u8) -> Vec<u8> {
    let mut buf = [0u8; 8];
    let len = wire::encode_connack(&mut buf, status).unwrap();
    buf[..len].to_vec()
}

/// Pre-encoded DATA bytes.
pub fn data(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut buf = [0u8; 512];
    let len = wire::encode_data(&mut buf, topic, payload).unwrap();
    buf[..len].to_vec()
}

/// Journal shared between recording callbacks and the test body.
pub type Journal = Rc<RefCell<Vec<String>>>;

pub fn journal() -> Journal {
    Rc::new(RefCell::new(Vec::new()))
}

/// A callback that notes every invocation in a shared journal and can queue
/// a canned response publish.
pub struct Recorder {
    pub label: &'static str,
    pub journal: Journal,
    pub respond: Option<(&'static str, Vec<u8>)>,
}

impl Recorder {
    pub fn new(label: &'static str, journal: &Journal) -> Self {
        Self {
            label,
            journal: journal.clone(),
            respond: None,
        }
    }

    pub fn responding(
        label: &'static str,
        journal: &Journal,
        topic: &'static str,
        payload: &[u8],
    ) -> Self {
        Self {
            label,
            journal: journal.clone(),
            respond: Some((topic, payload.to_vec())),
        }
    }
}

impl Callback for Recorder {
    fn on_event(&mut self, event: Event<'_>, outbox: &mut dyn PublishSink) {
        let entry = match event {
            Event::Message { topic, .. } => format!("{}:msg:{}", self.label, topic),
            Event::Timer { .. } => format!("{}:timer", self.label),
        };
        self.journal.borrow_mut().push(entry);
        if let Some((topic, payload)) = &self.respond {
            outbox.publish(topic, payload);
        }
    }
}
