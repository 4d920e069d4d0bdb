//! Typed access to the broker channels.
//!
//! `MessageBus` pairs a `TaskQueue` handle with the configured channel
//! names. It is the only place where payloads are encoded or decoded.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ChannelNames;

use super::messages::{Channel, DispatchPayload, MessageError, QueueMessage};
use super::queue::{QueueConnector, QueueError, TaskQueue};

/// Outcome of a successful pop.
#[derive(Debug)]
pub enum Delivery<T> {
    /// The payload decoded into its typed form.
    Message(T),
    /// The payload was removed from the broker but could not be decoded.
    Undecodable { channel: String, error: MessageError },
}

/// Broker handle plus channel names, owned by one component.
#[derive(Clone)]
pub struct MessageBus {
    queue: Arc<dyn TaskQueue>,
    channels: ChannelNames,
    state_channels: Vec<String>,
    dispatch_channel: Vec<String>,
}

impl MessageBus {
    pub fn new(queue: Arc<dyn TaskQueue>, channels: ChannelNames) -> Self {
        let state_channels = vec![
            channels.init.clone(),
            channels.progress.clone(),
            channels.result.clone(),
        ];
        let dispatch_channel = vec![channels.dispatch.clone()];
        Self {
            queue,
            channels,
            state_channels,
            dispatch_channel,
        }
    }

    /// Opens a dedicated broker handle through `connector`.
    pub async fn connect(
        connector: &dyn QueueConnector,
        channels: ChannelNames,
    ) -> Result<Self, QueueError> {
        let queue = connector.connect().await?;
        Ok(Self::new(queue, channels))
    }

    pub fn channels(&self) -> &ChannelNames {
        &self.channels
    }

    fn channel_name(&self, channel: Channel) -> &str {
        match channel {
            Channel::Init => &self.channels.init,
            Channel::Progress => &self.channels.progress,
            Channel::Result => &self.channels.result,
        }
    }

    fn channel_of(&self, name: &str) -> Option<Channel> {
        if name == self.channels.init {
            Some(Channel::Init)
        } else if name == self.channels.progress {
            Some(Channel::Progress)
        } else if name == self.channels.result {
            Some(Channel::Result)
        } else {
            None
        }
    }

    /// Pushes a state message onto its channel.
    pub async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let payload = message.encode()?;
        self.queue
            .push(self.channel_name(message.channel()), &payload)
            .await
    }

    /// Enqueues a work item for exactly one worker.
    pub async fn dispatch(&self, payload: &DispatchPayload) -> Result<(), QueueError> {
        let body = serde_json::to_string(payload)?;
        self.queue.push(&self.channels.dispatch, &body).await
    }

    /// Waits up to `timeout` for the next message on any state channel.
    pub async fn next_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<Delivery<QueueMessage>>, QueueError> {
        let Some((name, raw)) = self.queue.blocking_pop(&self.state_channels, timeout).await? else {
            return Ok(None);
        };

        let delivery = match self.channel_of(&name) {
            Some(channel) => match QueueMessage::decode(channel, &raw) {
                Ok(message) => Delivery::Message(message),
                Err(error) => Delivery::Undecodable {
                    channel: name,
                    error,
                },
            },
            None => Delivery::Undecodable {
                error: MessageError::UnknownChannel(name.clone()),
                channel: name,
            },
        };

        Ok(Some(delivery))
    }

    /// Waits up to `timeout` for the next work item.
    pub async fn next_dispatch(
        &self,
        timeout: Duration,
    ) -> Result<Option<Delivery<DispatchPayload>>, QueueError> {
        let Some((name, raw)) = self
            .queue
            .blocking_pop(&self.dispatch_channel, timeout)
            .await?
        else {
            return Ok(None);
        };

        let delivery = match serde_json::from_str::<DispatchPayload>(&raw) {
            Ok(payload) if payload.pid.trim().is_empty() || payload.jid.trim().is_empty() => {
                Delivery::Undecodable {
                    channel: name,
                    error: MessageError::MissingIdentity,
                }
            }
            Ok(payload) => Delivery::Message(payload),
            Err(e) => Delivery::Undecodable {
                channel: name,
                error: MessageError::Malformed(e),
            },
        };

        Ok(Some(delivery))
    }

    /// Number of work items waiting for a worker.
    pub async fn pending_dispatch(&self) -> Result<usize, QueueError> {
        self.queue.len(&self.channels.dispatch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::JobConfig;
    use crate::scheduler::messages::ProgressMsg;
    use crate::scheduler::queue::MemoryTaskQueue;

    fn bus() -> (MemoryTaskQueue, MessageBus) {
        let queue = MemoryTaskQueue::new();
        let bus = MessageBus::new(Arc::new(queue.clone()), ChannelNames::default());
        (queue, bus)
    }

    #[tokio::test]
    async fn test_publish_routes_to_channel() {
        let (queue, bus) = bus();
        let msg = QueueMessage::Progress(ProgressMsg::new("p1", "job-1", 10, 100));
        bus.publish(&msg).await.expect("publish");

        assert_eq!(queue.len("state-queue").await.expect("len"), 1);
        assert_eq!(queue.len("init-queue").await.expect("len"), 0);

        match bus.next_message(Duration::from_millis(10)).await.expect("pop") {
            Some(Delivery::Message(received)) => assert_eq!(received, msg),
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_reported() {
        let (queue, bus) = bus();
        queue.push("results-queue", "{oops").await.expect("push");

        match bus.next_message(Duration::from_millis(10)).await.expect("pop") {
            Some(Delivery::Undecodable { channel, error }) => {
                assert_eq!(channel, "results-queue");
                assert!(matches!(error, MessageError::Malformed(_)));
            }
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_roundtrip() {
        let (_queue, bus) = bus();
        let payload = DispatchPayload::new("p1", "job-1", JobConfig::new());
        bus.dispatch(&payload).await.expect("dispatch");
        assert_eq!(bus.pending_dispatch().await.expect("len"), 1);

        match bus.next_dispatch(Duration::from_millis(10)).await.expect("pop") {
            Some(Delivery::Message(received)) => assert_eq!(received, payload),
            other => panic!("unexpected delivery: {:?}", other),
        }
        assert!(bus
            .next_dispatch(Duration::from_millis(10))
            .await
            .expect("pop")
            .is_none());
    }
}
