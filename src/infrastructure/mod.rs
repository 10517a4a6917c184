pub mod alarm_store;
pub mod calendar_client;
pub mod calendar_gateway;
pub mod config;
pub mod credential_store;
pub mod error;
pub mod event_mapper;
pub mod orphan_ledger;
pub mod parse_alarm_store;
