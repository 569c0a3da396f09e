// Relay storage layer
//
// Postgres persistence for triggers, tasks, and the durable task-event log,
// plus the event bus that fans events out to live subscribers.

pub mod database;
pub mod event_bus;
pub mod event_store;
pub mod models;
pub mod task_store;
pub mod trigger_store;

pub use database::Database;
pub use event_bus::EventBus;
pub use event_store::PgTaskEventStore;
pub use task_store::PgTaskStore;
pub use trigger_store::{
    list_active_cron_triggers, lookup_trigger, lookup_webhook_triggers, PgTriggerStore,
};
