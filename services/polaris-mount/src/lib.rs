//! Benro Polaris Mount Driver
//!
//! Protocol bridge between a control application and the Benro Polaris
//! mount head, which speaks a numeric-opcode ASCII protocol over TCP.
//!
//! The driver translates high-level intents (goto, track, park, abort) into
//! wire commands, decodes the head's asynchronous replies into a
//! freshness-checked cache, and drives periodic refresh traffic so the host
//! always has a recent view of mount orientation and health.

pub mod cache;
pub mod capabilities;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod io;
#[cfg(feature = "mock")]
pub mod mock;
pub mod protocol;
pub mod session;
pub mod state;
pub mod tcp;
pub mod transform;

pub use cache::{CachedResponse, ResponseCache};
pub use capabilities::{MotionControllable, Parkable, TrackSettable};
pub use clock::{Clock, SystemClock};
pub use config::{load_config, Config, ConnectionConfig, RefreshConfig, SiteConfig};
pub use error::{PolarisError, Result};
pub use events::MountEvent;
pub use protocol::{MountCommand, Response};
pub use session::MountSession;
pub use state::{MountOrientation, MountStateMachine, TrackingState};
pub use tcp::TcpConnectionFactory;
pub use transform::{
    equatorial_to_horizontal, horizontal_to_equatorial, EquatorialCoordinates,
    HorizontalCoordinates, ObserverLocation,
};

#[cfg(feature = "mock")]
pub use mock::MockConnectionFactory;
