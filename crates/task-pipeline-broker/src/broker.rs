use crate::{config::BrokerConfig, metrics::BrokerMetrics};
use task_pipeline_core::router::MemberId;
use task_pipeline_core::{Delivery, QueueGroupRouter, ResultStore};
use task_pipeline_protocol::{
    CountResponse, DeliverMessage, Frame, FrameCodec, Message, PublishRequest, PutRequest,
    SubscribeRequest, UnsubscribeRequest, ValueResponse,
};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use futures::{SinkExt, StreamExt};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn, error, debug};

/// Frames queued per connection before the writer applies backpressure
const OUTBOUND_BUFFER: usize = 256;

/// One client subscription: its routing entry and the task pushing its
/// deliveries onto the connection
struct Subscriber {
    member: MemberId,
    forwarder: JoinHandle<()>,
}

/// Subscriptions owned by one client connection
struct ConnectionSubscriptions {
    by_sid: HashMap<u64, Subscriber>,
    /// Cancelled when the connection ends; stops every forwarder it started
    closed: CancellationToken,
}

/// Broker server: queue-group pub/sub plus the shared result store
pub struct Broker {
    config: Arc<BrokerConfig>,
    router: Arc<QueueGroupRouter>,
    store: Arc<dyn ResultStore>,
    metrics: Arc<BrokerMetrics>,
    connection_slots: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> anyhow::Result<Self> {
        let store = task_pipeline_store::open_store(&config.store)?;
        Self::with_store(config, store)
    }

    pub fn with_store(config: BrokerConfig, store: Arc<dyn ResultStore>) -> anyhow::Result<Self> {
        let metrics = BrokerMetrics::new()?;
        let slots = config.broker.max_connections.max(1);

        Ok(Broker {
            config: Arc::new(config),
            router: Arc::new(QueueGroupRouter::new()),
            store,
            metrics: Arc::new(metrics),
            connection_slots: Arc::new(Semaphore::new(slots)),
            shutdown: CancellationToken::new(),
        })
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = self.config.listen_address();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!("Broker listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.clone().accept(stream, addr),
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutting down broker");
                    break;
                }
            }
        }

        Ok(())
    }

    fn accept(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let Ok(permit) = self.connection_slots.clone().try_acquire_owned() else {
            warn!("Connection limit reached, rejecting {}", addr);
            return;
        };

        debug!("New connection from {}", addr);
        tokio::spawn(async move {
            let _permit = permit;
            self.metrics.connections.inc();
            if let Err(e) = self.handle_connection(stream).await {
                error!("Connection error from {}: {}", addr, e);
            }
            self.metrics.connections.dec();
            debug!("Connection from {} closed", addr);
        });
    }

    /// Handle a client connection
    async fn handle_connection(&self, stream: TcpStream) -> anyhow::Result<()> {
        let (mut sink, mut stream) = Framed::new(stream, FrameCodec).split();
        let (outbound, mut outbound_rx) = mpsc::channel::<Frame>(OUTBOUND_BUFFER);

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    debug!("Write failed: {}", e);
                    break;
                }
            }
        });

        let mut subscriptions = ConnectionSubscriptions {
            by_sid: HashMap::new(),
            closed: self.shutdown.child_token(),
        };
        let mut result = Ok(());

        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = self.shutdown.cancelled() => break,
            };

            match next {
                Some(Ok(Frame { request_id, message })) => {
                    let response = match message {
                        Message::Unsubscribe(req) => {
                            self.handle_unsubscribe(request_id, req, &outbound, &mut subscriptions)
                        }
                        message => Some(
                            self.handle_message(message, &outbound, &mut subscriptions)
                                .await,
                        ),
                    };
                    let Some(response) = response else {
                        continue;
                    };
                    if outbound.send(Frame::new(request_id, response)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("Protocol error: {}", e);
                    result = Err(e.into());
                    break;
                }
                None => break,
            }
        }

        for (_, subscriber) in subscriptions.by_sid.drain() {
            self.router.remove(subscriber.member);
            self.metrics.subscriptions.dec();
        }
        subscriptions.closed.cancel();

        drop(outbound);
        let _ = writer.await;

        result
    }

    /// Handle a protocol message
    async fn handle_message(
        &self,
        message: Message,
        outbound: &mpsc::Sender<Frame>,
        subscriptions: &mut ConnectionSubscriptions,
    ) -> Message {
        match message {
            Message::Publish(req) => self.handle_publish(req).await,
            Message::Subscribe(req) => self.handle_subscribe(req, outbound, subscriptions),
            Message::Put(req) => self.handle_put(req).await,
            Message::Get(req) => {
                self.metrics.inc_store_op("get");
                match self.store.get(&req.key).await {
                    Ok(value) => Message::Value(ValueResponse { value }),
                    Err(e) => Message::nack(e.to_string()),
                }
            }
            Message::Incr(req) => {
                self.metrics.inc_store_op("incr");
                match self.store.incr(&req.key).await {
                    Ok(value) => Message::Count(CountResponse { value }),
                    Err(e) => Message::nack(e.to_string()),
                }
            }
            Message::GetCounter(req) => {
                self.metrics.inc_store_op("counter");
                match self.store.counter(&req.key).await {
                    Ok(value) => Message::Count(CountResponse { value }),
                    Err(e) => Message::nack(e.to_string()),
                }
            }
            Message::DbSize => {
                self.metrics.inc_store_op("size");
                match self.store.size().await {
                    Ok(value) => Message::Count(CountResponse { value }),
                    Err(e) => Message::nack(e.to_string()),
                }
            }
            Message::Ping => Message::ack(),
            _ => Message::nack("Unsupported message type"),
        }
    }

    async fn handle_publish(&self, req: PublishRequest) -> Message {
        let subject = req.subject;
        self.metrics.messages_published.inc();

        let outcome = self
            .router
            .route(Delivery {
                subject: subject.clone(),
                payload: req.payload,
            })
            .await;

        if outcome.is_dropped() {
            self.metrics.messages_dropped.inc();
            debug!("No live subscriber on {}", subject);
        }

        Message::ack()
    }

    fn handle_subscribe(
        &self,
        req: SubscribeRequest,
        outbound: &mpsc::Sender<Frame>,
        subscriptions: &mut ConnectionSubscriptions,
    ) -> Message {
        if subscriptions.by_sid.contains_key(&req.sid) {
            return Message::nack(format!("Subscription {} already exists", req.sid));
        }

        let (tx, rx) = mpsc::channel::<Delivery>(self.config.broker.subscriber_buffer.max(1));
        let member = self.router.register(&req.subject, req.group.as_deref(), tx);

        let forwarder = tokio::spawn(forward(
            req.sid,
            rx,
            outbound.clone(),
            subscriptions.closed.clone(),
            self.router.clone(),
            self.metrics.clone(),
        ));

        subscriptions
            .by_sid
            .insert(req.sid, Subscriber { member, forwarder });
        self.metrics.subscriptions.inc();

        info!(
            "Subscription {} on {} (group: {})",
            req.sid,
            req.subject,
            req.group.as_deref().unwrap_or("-")
        );
        Message::ack()
    }

    /// Stop routing to a subscription. The acknowledgement is queued only
    /// after every delivery already routed to it, so the client sees the
    /// complete remainder before the Ack.
    fn handle_unsubscribe(
        &self,
        request_id: u64,
        req: UnsubscribeRequest,
        outbound: &mpsc::Sender<Frame>,
        subscriptions: &mut ConnectionSubscriptions,
    ) -> Option<Message> {
        let Some(subscriber) = subscriptions.by_sid.remove(&req.sid) else {
            return Some(Message::nack(format!("Unknown subscription {}", req.sid)));
        };

        self.router.remove(subscriber.member);
        self.metrics.subscriptions.dec();
        debug!("Removed subscription {}", req.sid);

        let outbound = outbound.clone();
        tokio::spawn(async move {
            let _ = subscriber.forwarder.await;
            let _ = outbound.send(Frame::new(request_id, Message::ack())).await;
        });
        None
    }

    async fn handle_put(&self, req: PutRequest) -> Message {
        self.metrics.inc_store_op("put");
        match self.store.put(&req.key, req.value).await {
            Ok(()) => Message::ack(),
            Err(e) => {
                error!("Failed to store {}: {}", req.key, e);
                Message::nack(e.to_string())
            }
        }
    }

    /// Get metrics registry
    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    /// Get the routing table
    pub fn router(&self) -> Arc<QueueGroupRouter> {
        self.router.clone()
    }

    /// Get the result store
    pub fn store(&self) -> Arc<dyn ResultStore> {
        self.store.clone()
    }

    /// Shutdown the broker
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Push a subscription's deliveries to its connection until every sender is
/// gone. If the connection goes away first, whatever the member still holds
/// is routed again to the rest of its group.
async fn forward(
    sid: u64,
    mut rx: mpsc::Receiver<Delivery>,
    outbound: mpsc::Sender<Frame>,
    stop: CancellationToken,
    router: Arc<QueueGroupRouter>,
    metrics: Arc<BrokerMetrics>,
) {
    let mut stranded = None;

    loop {
        let delivery = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            delivery = rx.recv() => delivery,
        };
        let Some(delivery) = delivery else {
            return;
        };

        let slot = tokio::select! {
            biased;
            _ = stop.cancelled() => Err(()),
            slot = outbound.reserve() => slot.map_err(|_| ()),
        };
        let Ok(slot) = slot else {
            stranded = Some(delivery);
            break;
        };

        slot.send(Frame::push(Message::Deliver(DeliverMessage {
            sid,
            subject: delivery.subject,
            payload: delivery.payload,
        })));
        metrics.messages_delivered.inc();
    }
    drop(outbound);

    rx.close();
    let mut leftover: Vec<Delivery> = stranded.into_iter().collect();
    while let Some(delivery) = rx.recv().await {
        leftover.push(delivery);
    }
    if leftover.is_empty() {
        return;
    }

    debug!("Requeueing {} deliveries from closed subscription {}", leftover.len(), sid);
    for delivery in leftover {
        if router.route(delivery).await.is_dropped() {
            metrics.messages_dropped.inc();
        }
    }
}
