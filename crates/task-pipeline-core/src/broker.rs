use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Default subject tasks are published on
pub const DEFAULT_SUBJECT: &str = "tasks";

/// Default queue group shared by all workers
pub const DEFAULT_GROUP: &str = "workers";

/// One message handed to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub subject: String,
    pub payload: Vec<u8>,
}

/// Connection state reported by the status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerStatus {
    Connected,
    Disconnected,
}

/// Publish/subscribe transport with queue-group delivery.
///
/// A message published on a subject reaches exactly one live member of
/// every queue group subscribed to it, plus every plain (group-less)
/// subscriber. Messages published while a group has no live member are
/// dropped.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload; resolves once the transport has accepted it.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a subject, optionally as a member of a queue group.
    async fn subscribe(&self, subject: &str, group: Option<&str>) -> Result<Subscription>;

    fn is_connected(&self) -> bool;

    fn status(&self) -> BrokerStatus {
        if self.is_connected() {
            BrokerStatus::Connected
        } else {
            BrokerStatus::Disconnected
        }
    }

    /// Release transport resources. Calling it twice is a no-op.
    async fn close(&self);
}

/// Transport-side half of a subscription, used to stop routing to it.
///
/// Deliveries the transport already routed to the subscription must still
/// reach its receiver; the transport drops its sender once they have, which
/// ends the stream.
#[async_trait]
pub trait SubscriptionHandle: Send + Sync {
    async fn unsubscribe(&self);
}

/// Stream of deliveries for one (subject, group) binding
pub struct Subscription {
    subject: String,
    group: Option<String>,
    receiver: mpsc::Receiver<Delivery>,
    handle: Option<Box<dyn SubscriptionHandle>>,
}

impl Subscription {
    pub fn new(
        subject: impl Into<String>,
        group: Option<String>,
        receiver: mpsc::Receiver<Delivery>,
        handle: impl SubscriptionHandle + 'static,
    ) -> Self {
        Subscription {
            subject: subject.into(),
            group,
            receiver,
            handle: Some(Box::new(handle)),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Wait for the next delivery. `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Stop routing new messages to this subscription.
    ///
    /// Everything already routed here stays owned by the caller: keep calling
    /// [`next`](Self::next) until it returns `None` to receive the remainder.
    pub async fn drain(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.unsubscribe().await;
        }
    }

    /// Stop routing and close the buffer immediately.
    ///
    /// Deliveries that were buffered but never taken with [`next`](Self::next)
    /// are discarded; their count is returned.
    pub async fn unsubscribe(&mut self) -> usize {
        // Close first so a sender parked on a full buffer fails instead of
        // blocking the unsubscribe below.
        self.receiver.close();

        if let Some(handle) = self.handle.take() {
            handle.unsubscribe().await;
        }

        let mut discarded = 0;
        while self.receiver.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subject", &self.subject)
            .field("group", &self.group)
            .field("active", &self.handle.is_some())
            .finish()
    }
}
