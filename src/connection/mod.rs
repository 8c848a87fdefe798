//! A broker connection owning one transport session and one channel, and the client
//! configuration it is bound to.
//!
//! The lifecycle of a [`BrokerConnection`] goes through the states of [`ConnectionState`]:
//!
//! ```text
//! Idle -> Creating -> Open -> Established <-> Operating
//!   ^                                |
//!   |                              close()
//!   +------------- Closed <----------+
//!
//! Broken: transport creation, a protocol call or reconnect() failed.
//! ```
//!
//! Any state can go back to `Creating`: [`BrokerConnection::create`] always opens a fresh session.
mod broker;
mod client;
mod handler;

pub use broker::BrokerConnection;
pub use client::Client;
pub use handler::DeliveryHandler;

/// Where a [`BrokerConnection`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// A transport session is being opened.
    Creating,
    /// The session is open, the topology has not been declared yet.
    Open,
    /// Channel open, queue and exchange declared and bound.
    Established,
    /// A publish, fetch or consume is in progress.
    Operating,
    /// Channel and session were torn down by [`BrokerConnection::close`].
    Closed,
    /// The last transport or protocol call failed.
    Broken,
}
