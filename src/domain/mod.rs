pub mod confirmation;
pub mod error;
pub mod models;
