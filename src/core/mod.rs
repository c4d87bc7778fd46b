pub mod alerts;
pub mod channel;
pub mod config;
pub mod ids;
pub mod model;
pub mod store;
