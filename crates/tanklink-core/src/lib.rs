//! Session engine for Navien NWP500 heat-pump water heaters.
//!
//! One [`Session`] owns a broker connection (through the [`Transport`]
//! trait), tracks per-device state snapshots, derives change events from
//! consecutive payloads, sequences outbound commands with per-command
//! deadlines, and recovers from connection interruptions with exponential
//! backoff. Listeners observe everything through the event bus:
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tanklink_core::{ConnectionState, Event, EventKind, Session, SessionConfig, Transport};
//! use tanklink_proto::Device;
//!
//! async fn run(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::spawn(SessionConfig::default(), transport);
//!     let device = Device::new("04:78:63:aa:bb:cc");
//!
//!     session
//!         .on(EventKind::HeatingStarted, |event| {
//!             if let Event::HeatingStarted { snapshot } = event {
//!                 println!("{} started heating", snapshot.device);
//!             }
//!             Ok(())
//!         })
//!         .await?;
//!
//!     session.watch(&device).await?;
//!     session.connect().await?;
//!     let status = session.request_status(&device).await?;
//!     println!("tank at {:?} °F", status.number("dhw_temperature"));
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod config;
pub mod control;
pub mod detect;
pub mod error;
pub mod event;
pub mod session;
pub mod snapshot;
pub mod transport;

pub use bus::{Callback, EventBus, ListenerError, ListenerId};
pub use config::{ReconnectConfig, SessionConfig};
pub use detect::WatchedFields;
pub use error::{CommandError, SessionError};
pub use event::{Event, EventKind};
pub use session::{CommandAck, ConnectionState, Session};
pub use snapshot::{DeviceSnapshot, SnapshotCategory};
pub use transport::{Transport, TransportError, TransportEvent};
