use crate::broker::{Broker, Delivery, Subscription, SubscriptionHandle};
use crate::router::{MemberId, QueueGroupRouter};
use crate::{PipelineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default per-subscription delivery buffer
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 64;

/// In-process broker. Every [`MemoryConnection`] obtained from it shares one
/// routing table, so several workers in one process behave like separate
/// clients of a networked broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    router: Arc<QueueGroupRouter>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection::new(self.router.clone(), DEFAULT_SUBSCRIPTION_BUFFER)
    }

    pub fn connect_with_buffer(&self, buffer: usize) -> MemoryConnection {
        MemoryConnection::new(self.router.clone(), buffer.max(1))
    }

    pub fn router(&self) -> &Arc<QueueGroupRouter> {
        &self.router
    }
}

/// Client handle onto a [`MemoryBroker`]
pub struct MemoryConnection {
    router: Arc<QueueGroupRouter>,
    connected: AtomicBool,
    members: Arc<Mutex<Vec<MemberId>>>,
    buffer: usize,
}

impl MemoryConnection {
    fn new(router: Arc<QueueGroupRouter>, buffer: usize) -> Self {
        MemoryConnection {
            router,
            connected: AtomicBool::new(true),
            members: Arc::new(Mutex::new(Vec::new())),
            buffer,
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PipelineError::Unavailable("connection closed".to_string()))
        }
    }
}

#[async_trait]
impl Broker for MemoryConnection {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_connected()?;

        let outcome = self
            .router
            .route(Delivery {
                subject: subject.to_string(),
                payload,
            })
            .await;

        if outcome.is_dropped() {
            warn!("No live subscriber on {}, message dropped", subject);
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str, group: Option<&str>) -> Result<Subscription> {
        self.ensure_connected()?;

        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.router.register(subject, group, tx);
        self.members.lock().push(id);

        Ok(Subscription::new(
            subject,
            group.map(str::to_string),
            rx,
            MemoryHandle {
                id,
                router: self.router.clone(),
                members: self.members.clone(),
            },
        ))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn close(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        let members = std::mem::take(&mut *self.members.lock());
        for id in members {
            self.router.remove(id);
        }
        debug!("Memory connection closed");
    }
}

struct MemoryHandle {
    id: MemberId,
    router: Arc<QueueGroupRouter>,
    members: Arc<Mutex<Vec<MemberId>>>,
}

#[async_trait]
impl SubscriptionHandle for MemoryHandle {
    async fn unsubscribe(&self) {
        self.router.remove(self.id);
        self.members.lock().retain(|id| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let broker = MemoryBroker::new();
        let conn = broker.connect();

        let mut sub = conn.subscribe("tasks", Some("workers")).await.unwrap();
        conn.publish("tasks", b"hello".to_vec()).await.unwrap();

        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.subject, "tasks");
        assert_eq!(delivery.payload, b"hello");
    }

    #[tokio::test]
    async fn test_closed_connection_fails_fast() {
        let broker = MemoryBroker::new();
        let conn = broker.connect();
        conn.close().await;
        conn.close().await;

        assert!(!conn.is_connected());
        assert!(matches!(
            conn.publish("tasks", vec![]).await,
            Err(PipelineError::Unavailable(_))
        ));
        assert!(conn.subscribe("tasks", None).await.is_err());
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let broker = MemoryBroker::new();
        let conn = broker.connect();
        let mut sub = conn.subscribe("tasks", Some("workers")).await.unwrap();

        conn.close().await;
        assert_eq!(broker.router().subscription_count(), 0);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drain_hands_over_routed_deliveries() {
        let broker = MemoryBroker::new();
        let conn = broker.connect();
        let mut sub = conn.subscribe("tasks", Some("workers")).await.unwrap();

        for n in 0..3u8 {
            conn.publish("tasks", vec![n]).await.unwrap();
        }
        assert_eq!(sub.next().await.unwrap().payload, vec![0]);

        sub.drain().await;
        assert_eq!(broker.router().member_count("tasks", Some("workers")), 0);

        // Published after drain: nobody left in the group
        conn.publish("tasks", vec![9]).await.unwrap();

        assert_eq!(sub.next().await.unwrap().payload, vec![1]);
        assert_eq!(sub.next().await.unwrap().payload, vec![2]);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drain_releases_parked_publisher() {
        let broker = MemoryBroker::new();
        let conn = Arc::new(broker.connect_with_buffer(1));
        let mut sub = conn.subscribe("tasks", Some("workers")).await.unwrap();

        conn.publish("tasks", vec![0]).await.unwrap();
        let parked = tokio::spawn({
            let conn = conn.clone();
            async move { conn.publish("tasks", vec![1]).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        sub.drain().await;

        let mut received = Vec::new();
        while let Some(delivery) = sub.next().await {
            received.push(delivery.payload[0]);
        }
        parked.await.unwrap().unwrap();
        assert_eq!(received, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_unsubscribe_discards_buffered() {
        let broker = MemoryBroker::new();
        let conn = broker.connect();
        let mut sub = conn.subscribe("tasks", Some("workers")).await.unwrap();

        for n in 0..3u8 {
            conn.publish("tasks", vec![n]).await.unwrap();
        }
        assert_eq!(sub.next().await.unwrap().payload, vec![0]);

        assert_eq!(sub.unsubscribe().await, 2);
        assert_eq!(broker.router().member_count("tasks", Some("workers")), 0);
        assert!(sub.next().await.is_none());
    }
}
