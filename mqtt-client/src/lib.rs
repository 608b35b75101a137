//! MQTT v3.1 / v3.1.1 client session engine.
//!
//! [`mqtt_core`] is a pure codec; this crate owns everything stateful built on top of it — opening
//! a connection, keeping it alive, tracking acknowledgements with retransmission, and transparently
//! reconnecting. The transport is generic (see [`Transport`]): the crate only ever constructs a
//! plain TCP stream itself, never a TLS handshake — callers who need TLS wrap their own stream type
//! in [`Transport`] and connect through [`Client::connect_with`].

#[macro_use]
extern crate log;

mod client;
mod config;
mod error;
mod reader;
mod session;
mod transport;
mod writer;

pub use crate::client::{BatchScope, Client};
pub use crate::config::{ClientConfig, ClientConfigBuilder, Tls, Will, MQTT_SERVER_ENV};
pub use crate::error::{Error, Result};
pub use crate::transport::{connect_tcp, Transport};

pub use mqtt_core::{ProtocolVersion, Publish, QoS};
