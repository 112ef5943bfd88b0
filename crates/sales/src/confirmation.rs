//! Sale-order confirmation notifications.
//!
//! After an order has been confirmed, the application layer calls [`on_confirm`] with
//! the confirmed aggregate and a [`NotificationSink`]. The sink is the boundary to the
//! messaging system: activity-log notes on the order and broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tillerp_core::TenantId;

use crate::order::{SaleOrderState, SalesOrder, SalesOrderId};

pub const DEFAULT_NOTIFICATION_CHANNEL: &str = "Sales Notifications";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelVisibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Channel,
    Chat,
}

/// Channel to look up by name, or create with these attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub visibility: ChannelVisibility,
    pub kind: ChannelKind,
}

impl ChannelSpec {
    pub fn public_channel(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility: ChannelVisibility::Public,
            kind: ChannelKind::Channel,
        }
    }
}

/// Note: internal, shown in the record's activity log. Comment: visible to followers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSubtype {
    Note,
    Comment,
}

/// A system-generated notification message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub body: String,
    pub subtype: MessageSubtype,
}

impl OutboundMessage {
    pub fn note(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            subtype: MessageSubtype::Note,
        }
    }

    pub fn comment(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            subtype: MessageSubtype::Comment,
        }
    }
}

/// Messaging boundary used by [`on_confirm`].
///
/// `ensure_channel` must be idempotent: channel names are unique per tenant, and a
/// second call with the same name returns the existing channel.
pub trait NotificationSink {
    type Error: std::error::Error + Send + Sync + 'static;

    fn post_note(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        message: OutboundMessage,
    ) -> Result<(), Self::Error>;

    fn ensure_channel(&self, tenant_id: TenantId, spec: &ChannelSpec) -> Result<ChannelId, Self::Error>;

    fn post_to_channel(
        &self,
        tenant_id: TenantId,
        channel_id: ChannelId,
        message: OutboundMessage,
    ) -> Result<(), Self::Error>;
}

pub fn confirmation_message(order_name: &str) -> String {
    format!("Sales Order {order_name} has been confirmed.")
}

/// Announce a confirmed order.
///
/// Posts a note on the order and a comment on the `channel_name` channel (created
/// public on first use). Returns the channel used, or `None` when the order is not
/// in the `sale` state, in which case nothing is posted.
pub fn on_confirm<S>(
    order: &SalesOrder,
    channel_name: &str,
    sink: &S,
) -> Result<Option<ChannelId>, S::Error>
where
    S: NotificationSink + ?Sized,
{
    if order.state() != SaleOrderState::Sale {
        return Ok(None);
    }
    let Some(tenant_id) = order.tenant_id() else {
        return Ok(None);
    };

    let body = confirmation_message(order.name());
    sink.post_note(tenant_id, order.id_typed(), OutboundMessage::note(body.clone()))?;

    let channel_id = sink.ensure_channel(tenant_id, &ChannelSpec::public_channel(channel_name))?;
    sink.post_to_channel(tenant_id, channel_id, OutboundMessage::comment(body))?;

    Ok(Some(channel_id))
}
