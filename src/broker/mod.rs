//! Broker Module
//!
//! Listening side of the relay: accepts downstream connections and hands
//! each one to the relay engine.

pub mod manager;

pub use manager::{Broker, BrokerHandle};
