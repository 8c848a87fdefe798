//! Helpers for connecting to an AMQP broker through [`lapin`].

pub mod configuration;
mod factory;
mod session;

pub use factory::ConnectionFactory;

pub use lapin::{options, types, BasicProperties};
