pub mod bridge_client;
pub mod exit_signal;
pub mod notification;
pub mod order_cache;
pub mod order_poller;
pub mod position_monitor;
pub mod position_registry;
pub mod pubsub;
pub mod retry;
pub mod symbol_mapper;
