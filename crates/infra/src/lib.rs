//! Infrastructure layer: event store, dispatcher, messaging, config and the
//! application services built on them.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod messaging;
pub mod services;


use std::sync::Arc;

use serde_json::Value as JsonValue;
use tillerp_events::{EventEnvelope, InMemoryEventBus};

use crate::command_dispatcher::CommandDispatcher;
use crate::config::AppConfig;
use crate::event_store::InMemoryEventStore;
use crate::messaging::InMemoryMessaging;
use crate::services::ErpServices;

pub type DocumentBus = InMemoryEventBus<EventEnvelope<JsonValue>>;

/// Services wired to the in-process store, bus and messaging.
pub type InMemoryServices = ErpServices<Arc<InMemoryEventStore>, Arc<DocumentBus>, InMemoryMessaging>;

pub fn in_memory_services(config: AppConfig) -> InMemoryServices {
    let dispatcher = CommandDispatcher::new(Arc::new(InMemoryEventStore::new()), Arc::new(DocumentBus::new()));
    ErpServices::new(dispatcher, InMemoryMessaging::new(), config)
}

/// Process entry: install tracing, validate configuration and build the services.
pub fn bootstrap(config: AppConfig) -> anyhow::Result<InMemoryServices> {
    tillerp_observability::init();

    config.validate()?;
    tracing::info!(
        transaction_id_journals = ?config.transaction_id_journals,
        notification_channel = %config.notification_channel,
        untaxed_basis = ?config.untaxed_basis,
        "tillerp services starting"
    );

    Ok(in_memory_services(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_rejects_invalid_config() {
        let config = AppConfig {
            notification_channel: " ".to_string(),
            ..AppConfig::default()
        };
        assert!(bootstrap(config).is_err());

        let services = bootstrap(AppConfig::default()).unwrap();
        assert_eq!(services.config().notification_channel, "Sales Notifications");
    }
}
