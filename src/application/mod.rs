pub mod alarm_lifecycle;
pub mod bootstrap;
pub mod commands;
