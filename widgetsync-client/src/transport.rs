use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::hub::SubscriptionHub;

/// Raw frame off the live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(bytes) => bytes,
        }
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

/// Connection state of the live stream. Reconnecting is the transport's job.
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// Source of inbound frames. `Ok(None)` marks a clean end of stream.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError>;
}

struct Link {
    connected: AtomicBool,
    closed: Notify,
}

/// Sending half of an in-process stream.
#[derive(Clone)]
pub struct ChannelTransport {
    sender: mpsc::Sender<Frame>,
    link: Arc<Link>,
}

impl ChannelTransport {
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        self.sender.send(frame).await.map_err(|_| TransportError::Closed)
    }

    pub fn try_send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TransportError::Io("Stream buffer full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Ends the stream; the pump finishes after draining buffered frames.
    pub fn disconnect(&self) {
        self.link.connected.store(false, Ordering::Release);
        self.link.closed.notify_one();
    }
}

impl Transport for ChannelTransport {
    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Acquire) && !self.sender.is_closed()
    }
}

/// Receiving half of an in-process stream.
pub struct ChannelSource {
    receiver: mpsc::Receiver<Frame>,
    link: Arc<Link>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        if !self.link.connected.load(Ordering::Acquire) {
            return Ok(self.receiver.try_recv().ok());
        }

        tokio::select! {
            biased;
            frame = self.receiver.recv() => Ok(frame),
            _ = self.link.closed.notified() => Ok(self.receiver.try_recv().ok()),
        }
    }
}

/// Creates a connected in-process stream with room for `capacity` frames.
pub fn channel(capacity: usize) -> (ChannelTransport, ChannelSource) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let link = Arc::new(Link {
        connected: AtomicBool::new(true),
        closed: Notify::new(),
    });

    (
        ChannelTransport {
            sender,
            link: link.clone(),
        },
        ChannelSource { receiver, link },
    )
}

/// Drives frames from a source into the hub until the stream ends.
pub struct StreamPump<S> {
    hub: Arc<SubscriptionHub>,
    source: S,
}

impl StreamPump<ChannelSource> {
    pub fn channel(hub: Arc<SubscriptionHub>, capacity: usize) -> (ChannelTransport, Self) {
        let (transport, source) = channel(capacity);
        (transport, Self::new(hub, source))
    }
}

impl<S: FrameSource + 'static> StreamPump<S> {
    pub fn new(hub: Arc<SubscriptionHub>, source: S) -> Self {
        Self { hub, source }
    }

    /// Returns the number of frames handed to the hub.
    pub async fn run(mut self) -> Result<u64, TransportError> {
        let mut frames = 0u64;

        loop {
            match self.source.next_frame().await {
                Ok(Some(frame)) => {
                    self.hub.ingest(&frame);
                    frames += 1;
                }
                Ok(None) => {
                    tracing::info!("Stream ended after {} frames", frames);
                    return Ok(frames);
                }
                Err(e) => {
                    tracing::warn!("Stream failed after {} frames: {}", frames, e);
                    return Err(e);
                }
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<u64, TransportError>> {
        tokio::spawn(self.run())
    }
}
