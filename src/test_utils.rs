//! Scripted in-memory transport for tests and benchmarks.
//!
//! [`MockConnector`] hands out [`MockLink`]s in place of sockets. Tests drive
//! the read side with [`MockLink::inject_frame`], inspect what the gateway
//! wrote with [`MockLink::written_frames`], and simulate faults with
//! [`MockLink::disconnect`] and [`MockLink::fail_writes`]. An optional
//! [`Responder`] plays the devices on the bus by answering written frames.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Frame, FrameParser, TYPE_SEND, WALLPAD, cmd};
use crate::transport::{ByteSink, ByteSource, Connector, Link};
use crate::types::DeviceType;
use crate::{Result, WallpadError};

/// Answers a frame written by the gateway with frames to feed back.
pub type Responder = Arc<dyn Fn(&Frame) -> Vec<Frame> + Send + Sync>;

/// Devices that acknowledge every command by echoing its state back, and
/// stay silent on queries.
pub fn ack_responder() -> Responder {
    Arc::new(|frame: &Frame| {
        if frame.type_byte() == TYPE_SEND && frame.command() != cmd::QUERY {
            vec![frame.as_reply()]
        } else {
            Vec::new()
        }
    })
}

/// Replays the written frame unchanged, the way a half-duplex bus echoes.
pub fn echo_responder() -> Responder {
    Arc::new(|frame: &Frame| vec![*frame])
}

/// State reports the way a busy apartment bus carries them: every family,
/// a few rooms each, with line noise between some frames.
pub fn sample_bus_traffic(frames: usize) -> Vec<u8> {
    let reports: [(DeviceType, [u8; 8]); 6] = [
        (DeviceType::Light, [0xFF, 0x00, 0xFF, 0, 0, 0, 0, 0]),
        (DeviceType::Outlet, [0xFF, 0xFF, 0, 0, 0, 0, 0, 0]),
        (DeviceType::Thermostat, [0x11, 0x00, 23, 45, 21, 38, 0, 0]),
        (DeviceType::AirConditioner, [0x10, 0x00, 0x02, 0, 26, 24, 0, 0]),
        (DeviceType::Ventilation, [0x11, 0x01, 0x80, 0, 0, 0, 0, 0]),
        (DeviceType::GasValve, [0; 8]),
    ];
    let mut bytes = Vec::with_capacity(frames * 24);
    for i in 0..frames {
        let (device, payload) = reports[i % reports.len()];
        let room = (i % 4) as u8;
        let frame =
            Frame::build_with_type(0xDC, WALLPAD, [device.code(), room], cmd::STATE, payload);
        bytes.extend_from_slice(frame.as_bytes());
        if i % 7 == 0 {
            bytes.extend_from_slice(&[0x00, 0xAA, 0x13]);
        }
    }
    bytes
}

/// Outcome of one scripted connect attempt.
#[derive(Debug, Clone)]
pub enum ConnectStep {
    Succeed,
    Fail(String),
}

struct ConnectorState {
    script: Mutex<VecDeque<ConnectStep>>,
    responder: Mutex<Option<Responder>>,
    attempts: AtomicUsize,
    links: Mutex<Vec<MockLink>>,
    new_links: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockLink>>,
    new_links_tx: mpsc::UnboundedSender<MockLink>,
}

/// Connector whose connect results follow a script.
///
/// Once the script is exhausted every connect succeeds.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<ConnectorState>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        let (new_links_tx, new_links) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(ConnectorState {
                script: Mutex::new(VecDeque::new()),
                responder: Mutex::new(None),
                attempts: AtomicUsize::new(0),
                links: Mutex::new(Vec::new()),
                new_links: tokio::sync::Mutex::new(new_links),
                new_links_tx,
            }),
        }
    }

    /// Prepends scripted outcomes for the next connect attempts.
    pub fn with_script(self, steps: impl IntoIterator<Item = ConnectStep>) -> Self {
        lock(&self.state.script).extend(steps);
        self
    }

    /// Makes every connect fail.
    pub fn unreachable(self) -> Self {
        let steps = std::iter::repeat_n(ConnectStep::Fail("unreachable".into()), 10_000);
        self.with_script(steps)
    }

    /// Installs a responder on this and every later link.
    pub fn with_responder(self, responder: Responder) -> Self {
        *lock(&self.state.responder) = Some(responder);
        self
    }

    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Every link handed out so far.
    pub fn links(&self) -> Vec<MockLink> {
        lock(&self.state.links).clone()
    }

    /// Waits for the next link to be handed out.
    pub async fn next_link(&self) -> MockLink {
        let mut rx = self.state.new_links.lock().await;
        match rx.recv().await {
            Some(link) => link,
            // The connector holds a sender, so the channel never closes.
            None => unreachable!("mock connector channel closed"),
        }
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Link> {
        let attempt = self.state.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let step = lock(&self.state.script).pop_front().unwrap_or(ConnectStep::Succeed);
        if let ConnectStep::Fail(reason) = step {
            return Err(WallpadError::transport(reason));
        }

        let (inbound, rx) = mpsc::unbounded_channel();
        let link = MockLink {
            id: attempt,
            inbound,
            written: Arc::new(Mutex::new(Vec::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
            dropped: CancellationToken::new(),
        };
        let source = MockSource { rx, pending: VecDeque::new(), dropped: link.dropped.clone() };
        let sink = MockSink { link: link.clone(), responder: lock(&self.state.responder).clone() };

        lock(&self.state.links).push(link.clone());
        let _ = self.state.new_links_tx.send(link);
        Ok(Link::new(source, sink, format!("mock#{attempt}")))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// Test-side handle to one mock link.
#[derive(Clone)]
pub struct MockLink {
    id: usize,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
    fail_writes: Arc<AtomicBool>,
    dropped: CancellationToken,
}

impl MockLink {
    /// One-based connect attempt that produced this link.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Delivers raw bytes to the gateway's read side.
    pub fn inject(&self, bytes: &[u8]) {
        let _ = self.inbound.send(bytes.to_vec());
    }

    pub fn inject_frame(&self, frame: &Frame) {
        self.inject(frame.as_bytes());
    }

    /// Fails the read side, as a dropped TCP connection would.
    pub fn disconnect(&self) {
        self.dropped.cancel();
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn written_bytes(&self) -> Vec<u8> {
        lock(&self.written).clone()
    }

    /// Frames the gateway wrote, in order.
    pub fn written_frames(&self) -> Vec<Frame> {
        FrameParser::new().feed(&self.written_bytes())
    }
}

struct MockSource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: VecDeque<u8>,
    dropped: CancellationToken,
}

#[async_trait::async_trait]
impl ByteSource for MockSource {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending.is_empty() {
            tokio::select! {
                biased;
                _ = self.dropped.cancelled() => {
                    return Err(WallpadError::transport("connection reset by peer"));
                }
                chunk = self.rx.recv() => match chunk {
                    Some(chunk) => self.pending.extend(chunk),
                    None => return Ok(0),
                },
            }
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

struct MockSink {
    link: MockLink,
    responder: Option<Responder>,
}

#[async_trait::async_trait]
impl ByteSink for MockSink {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        if self.link.dropped.is_cancelled() || self.link.fail_writes.load(Ordering::SeqCst) {
            return Err(WallpadError::transport("broken pipe"));
        }
        lock(&self.link.written).extend_from_slice(bytes);
        if let (Some(responder), Ok(frame)) = (&self.responder, Frame::from_bytes(bytes)) {
            for reply in responder(&frame) {
                self.link.inject_frame(&reply);
            }
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
