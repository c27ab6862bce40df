//! oscroute router
//!
//! Receives OSC packets over UDP and dispatches each message to every
//! handler whose pattern matches its address.
//!
//! # Example
//!
//! ```no_run
//! use oscroute_router::{Dispatcher, Message, Server, ServerConfig};
//!
//! # async fn run() -> oscroute_router::Result<()> {
//! let dispatcher = Dispatcher::new();
//! dispatcher.map("/tracking/trackers/*", |msg: &Message| {
//!     println!("{} {:?}", msg.address, msg.args);
//! })?;
//!
//! let server = Server::listen(ServerConfig::new("0.0.0.0", 9000), dispatcher).await?;
//! tokio::signal::ctrl_c().await?;
//! server.shutdown().await
//! # }
//! ```
//!
//! # Delivery guarantees
//!
//! - Handlers run on a pool of worker threads, never on the receive loop.
//! - Each handler sees messages in the order they arrived.
//! - Handlers matching the same message run in registration order.
//! - A panicking or failing handler is reported and does not affect others.
//! - After [`Dispatcher::unmap`] returns, the handler is not called again.
//! - When the work queue is full, new messages are dropped and counted.

pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod sender;
pub mod server;
pub mod stats;

pub use config::{ConfigError, ServerConfig};
pub use delivery::ErrorObserver;
pub use dispatch::{fallible, Dispatcher, Fallible, Handler, HandlerResult, RegistrationId};
pub use error::{DeliveryError, HandlerError, Result, RouterError};
pub use sender::OscSender;
pub use server::{listen, Server, ServerBuilder, ServerState};
pub use stats::{ServerStats, StatsSnapshot};

pub use oscroute_core::{Argument, Bundle, Message, Packet, TimeTag};
