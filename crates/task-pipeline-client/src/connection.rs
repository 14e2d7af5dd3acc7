use crate::{ClientError, Result};
use task_pipeline_core::{Broker, Delivery, Subscription, SubscriptionHandle};
use task_pipeline_protocol::{
    Frame, FrameCodec, Message, PublishRequest, SubscribeRequest, UnsubscribeRequest,
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type FramedStream = Framed<TcpStream, FrameCodec>;

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Deliveries buffered per subscription
    pub subscription_buffer: usize,
    pub request_timeout: Duration,
    pub outbound_buffer: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            subscription_buffer: 64,
            request_timeout: Duration::from_secs(30),
            outbound_buffer: 256,
        }
    }
}

struct Inner {
    outbound: mpsc::Sender<Frame>,
    pending: DashMap<u64, oneshot::Sender<Message>>,
    subscriptions: DashMap<u64, mpsc::Sender<Delivery>>,
    next_request: AtomicU64,
    next_sid: AtomicU64,
    closed: CancellationToken,
    options: ConnectionOptions,
}

/// Multiplexed client connection to `tq-broker`.
///
/// One socket carries concurrent requests (matched by request id) and the
/// deliveries of every subscription opened on it (matched by sid).
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub async fn connect(address: &str) -> Result<Self> {
        Self::connect_with(address, ConnectionOptions::default()).await
    }

    pub async fn connect_with(address: &str, options: ConnectionOptions) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| ClientError::ConnectionError(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true)?;

        let (sink, stream) = Framed::new(stream, FrameCodec).split();
        let (outbound, outbound_rx) = mpsc::channel(options.outbound_buffer.max(1));

        let inner = Arc::new(Inner {
            outbound,
            pending: DashMap::new(),
            subscriptions: DashMap::new(),
            next_request: AtomicU64::new(0),
            next_sid: AtomicU64::new(0),
            closed: CancellationToken::new(),
            options,
        });

        tokio::spawn(write_loop(sink, outbound_rx, inner.closed.clone()));
        tokio::spawn(read_loop(stream, inner.clone()));

        debug!("Connected to broker at {}", address);
        Ok(Connection { inner })
    }

    /// Send a request and wait for its response
    pub async fn request(&self, message: Message) -> Result<Message> {
        self.inner.request(message).await
    }

    pub async fn ping(&self) -> Result<()> {
        match self.request(Message::Ping).await? {
            Message::Ack(_) => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

impl Inner {
    async fn request(&self, message: Message) -> Result<Message> {
        if self.closed.is_cancelled() {
            return Err(ClientError::Closed);
        }

        // Request id 0 is reserved for server pushes
        let id = self.next_request.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if self.closed.is_cancelled() || self.outbound.send(Frame::new(id, message)).await.is_err() {
            self.pending.remove(&id);
            return Err(ClientError::Closed);
        }

        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Ok(Ok(Message::Nack(nack))) => Err(ClientError::ServerError(nack.error)),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending.remove(&id);
                Err(ClientError::Timeout)
            }
        }
    }

    fn shut(&self) {
        self.closed.cancel();
        // Dropping the senders wakes every waiter
        self.pending.clear();
        self.subscriptions.clear();
    }
}

pub(crate) fn unexpected(message: &Message) -> ClientError {
    ClientError::ProtocolError(format!("Unexpected response: {:?}", message.message_type()))
}

async fn write_loop(
    mut sink: SplitSink<FramedStream, Frame>,
    mut outbound: mpsc::Receiver<Frame>,
    closed: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            frame = outbound.recv() => frame,
            _ = closed.cancelled() => None,
        };

        let Some(frame) = frame else {
            break;
        };

        if let Err(e) = sink.send(frame).await {
            warn!("Broker write failed: {}", e);
            closed.cancel();
            break;
        }
    }

    let _ = sink.close().await;
}

async fn read_loop(mut stream: SplitStream<FramedStream>, inner: Arc<Inner>) {
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = inner.closed.cancelled() => break,
        };

        match next {
            Some(Ok(Frame { message: Message::Deliver(deliver), .. })) => {
                let sender = inner
                    .subscriptions
                    .get(&deliver.sid)
                    .map(|entry| entry.value().clone());

                let Some(sender) = sender else {
                    debug!("Delivery for unknown subscription {}", deliver.sid);
                    continue;
                };

                let delivery = Delivery {
                    subject: deliver.subject,
                    payload: deliver.payload,
                };
                if sender.send(delivery).await.is_err() {
                    inner.subscriptions.remove(&deliver.sid);
                }
            }
            Some(Ok(frame)) => {
                if let Some((_, waiter)) = inner.pending.remove(&frame.request_id) {
                    let _ = waiter.send(frame.message);
                } else {
                    debug!("Response for unknown request {}", frame.request_id);
                }
            }
            Some(Err(e)) => {
                warn!("Broker connection error: {}", e);
                break;
            }
            None => {
                debug!("Broker closed the connection");
                break;
            }
        }
    }

    inner.shut();
}

#[async_trait]
impl Broker for Connection {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> task_pipeline_core::Result<()> {
        let response = self
            .request(Message::Publish(PublishRequest {
                subject: subject.to_string(),
                payload,
            }))
            .await?;

        match response {
            Message::Ack(_) => Ok(()),
            other => Err(unexpected(&other).into()),
        }
    }

    async fn subscribe(
        &self,
        subject: &str,
        group: Option<&str>,
    ) -> task_pipeline_core::Result<Subscription> {
        let sid = self.inner.next_sid.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(self.inner.options.subscription_buffer.max(1));

        // Registered before the request so no early delivery is lost
        self.inner.subscriptions.insert(sid, tx);

        let response = self
            .request(Message::Subscribe(SubscribeRequest {
                sid,
                subject: subject.to_string(),
                group: group.map(str::to_string),
            }))
            .await;

        match response {
            Ok(Message::Ack(_)) => {}
            Ok(other) => {
                self.inner.subscriptions.remove(&sid);
                return Err(unexpected(&other).into());
            }
            Err(e) => {
                self.inner.subscriptions.remove(&sid);
                return Err(e.into());
            }
        }

        Ok(Subscription::new(
            subject,
            group.map(str::to_string),
            rx,
            RemoteHandle {
                sid,
                inner: self.inner.clone(),
            },
        ))
    }

    fn is_connected(&self) -> bool {
        !self.inner.closed.is_cancelled()
    }

    async fn close(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        self.inner.shut();
        debug!("Broker connection closed");
    }
}

struct RemoteHandle {
    sid: u64,
    inner: Arc<Inner>,
}

#[async_trait]
impl SubscriptionHandle for RemoteHandle {
    /// The server acknowledges only after pushing every delivery it had
    /// routed to this sid, so the sid is released once the Ack is read. The
    /// wait runs in the background: the reader may be parked on this
    /// subscription's buffer until its consumer takes the remaining deliveries.
    async fn unsubscribe(&self) {
        let sid = self.sid;
        let inner = self.inner.clone();

        tokio::spawn(async move {
            if !inner.closed.is_cancelled() {
                if let Err(e) = inner
                    .request(Message::Unsubscribe(UnsubscribeRequest { sid }))
                    .await
                {
                    warn!("Unsubscribe {} failed: {}", sid, e);
                }
            }
            inner.subscriptions.remove(&sid);
        });
    }
}
