//! In-memory messaging: order activity logs and broadcast channels.
//!
//! Channel names are unique per tenant, so `ensure_channel` is a lookup-or-create
//! under a single write lock. Every recorded message is also published on an
//! `EventBus` so listeners (e.g. a websocket gateway) can fan it out.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use tillerp_core::TenantId;
use tillerp_events::{EventBus, InMemoryEventBus, Subscription};
use tillerp_sales::{ChannelId, ChannelSpec, NotificationSink, OutboundMessage, SalesOrderId};

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("messaging state lock poisoned")]
    Poisoned,

    #[error("channel name must not be empty")]
    EmptyChannelName,

    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    #[error("message publication failed: {0}")]
    Publish(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub tenant_id: TenantId,
    pub spec: ChannelSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MessageTarget {
    Order(SalesOrderId),
    Channel(ChannelId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedMessage {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub target: MessageTarget,
    pub message: OutboundMessage,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    channels: HashMap<(TenantId, String), Channel>,
    messages: Vec<PostedMessage>,
}

#[derive(Debug)]
pub struct InMemoryMessaging<B = InMemoryEventBus<PostedMessage>> {
    state: RwLock<State>,
    bus: B,
}

impl InMemoryMessaging {
    pub fn new() -> Self {
        Self::with_bus(InMemoryEventBus::new())
    }
}

impl Default for InMemoryMessaging {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> InMemoryMessaging<B>
where
    B: EventBus<PostedMessage>,
{
    pub fn with_bus(bus: B) -> Self {
        Self {
            state: RwLock::new(State::default()),
            bus,
        }
    }

    pub fn subscribe(&self) -> Subscription<PostedMessage> {
        self.bus.subscribe()
    }

    pub fn channel_by_name(&self, tenant_id: TenantId, name: &str) -> Result<Option<Channel>, MessagingError> {
        let state = self.state.read().map_err(|_| MessagingError::Poisoned)?;
        Ok(state.channels.get(&(tenant_id, name.to_string())).cloned())
    }

    pub fn channels(&self, tenant_id: TenantId) -> Result<Vec<Channel>, MessagingError> {
        let state = self.state.read().map_err(|_| MessagingError::Poisoned)?;
        Ok(state
            .channels
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    /// Activity log of an order, oldest first.
    pub fn notes_for(&self, tenant_id: TenantId, order_id: SalesOrderId) -> Result<Vec<PostedMessage>, MessagingError> {
        self.messages_matching(tenant_id, MessageTarget::Order(order_id))
    }

    pub fn channel_messages(
        &self,
        tenant_id: TenantId,
        channel_id: ChannelId,
    ) -> Result<Vec<PostedMessage>, MessagingError> {
        self.messages_matching(tenant_id, MessageTarget::Channel(channel_id))
    }

    fn messages_matching(&self, tenant_id: TenantId, target: MessageTarget) -> Result<Vec<PostedMessage>, MessagingError> {
        let state = self.state.read().map_err(|_| MessagingError::Poisoned)?;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.tenant_id == tenant_id && m.target == target)
            .cloned()
            .collect())
    }

    fn record(&self, tenant_id: TenantId, target: MessageTarget, message: OutboundMessage) -> Result<(), MessagingError> {
        let posted = PostedMessage {
            id: Uuid::now_v7(),
            tenant_id,
            target,
            message,
            posted_at: Utc::now(),
        };

        {
            let mut state = self.state.write().map_err(|_| MessagingError::Poisoned)?;
            if let MessageTarget::Channel(channel_id) = target {
                let known = state
                    .channels
                    .values()
                    .any(|c| c.id == channel_id && c.tenant_id == tenant_id);
                if !known {
                    return Err(MessagingError::UnknownChannel(channel_id));
                }
            }
            state.messages.push(posted.clone());
        }

        tracing::debug!(%tenant_id, message_id = %posted.id, ?target, "message posted");
        self.bus
            .publish(posted)
            .map_err(|e| MessagingError::Publish(format!("{e:?}")))
    }
}

impl<B> NotificationSink for InMemoryMessaging<B>
where
    B: EventBus<PostedMessage>,
{
    type Error = MessagingError;

    fn post_note(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        message: OutboundMessage,
    ) -> Result<(), Self::Error> {
        self.record(tenant_id, MessageTarget::Order(order_id), message)
    }

    fn ensure_channel(&self, tenant_id: TenantId, spec: &ChannelSpec) -> Result<ChannelId, Self::Error> {
        let name = spec.name.trim();
        if name.is_empty() {
            return Err(MessagingError::EmptyChannelName);
        }

        let mut state = self.state.write().map_err(|_| MessagingError::Poisoned)?;
        let channel = state
            .channels
            .entry((tenant_id, name.to_string()))
            .or_insert_with(|| {
                let channel = Channel {
                    id: ChannelId::new(),
                    tenant_id,
                    spec: ChannelSpec {
                        name: name.to_string(),
                        ..spec.clone()
                    },
                };
                tracing::info!(%tenant_id, channel_id = %channel.id, channel = name, "channel created");
                channel
            });

        Ok(channel.id)
    }

    fn post_to_channel(
        &self,
        tenant_id: TenantId,
        channel_id: ChannelId,
        message: OutboundMessage,
    ) -> Result<(), Self::Error> {
        self.record(tenant_id, MessageTarget::Channel(channel_id), message)
    }
}
