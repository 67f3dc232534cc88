//! Events broadcast to the host
//!
//! The host subscribes to a broadcast channel instead of registering
//! callbacks; each variant mirrors one notification of the driver's
//! host-facing interface.

use crate::protocol::{BatteryInfo, StorageInfo, VersionInfo};
use crate::state::TrackingState;

/// Notifications emitted by the session as device state changes
#[derive(Debug, Clone, PartialEq)]
pub enum MountEvent {
    /// Tracking state changed, either from a decoded response or a local
    /// abort/park/unpark call
    TrackingStateChanged { state: TrackingState },
    /// Orientation moved by more than the dead-band; coordinates already
    /// transformed to the equatorial frame
    OrientationUpdated {
        right_ascension: f64,
        declination: f64,
    },
    /// Hardware/software version report arrived
    DeviceInfoUpdated(VersionInfo),
    /// Storage report arrived
    StorageUpdated(StorageInfo),
    /// Battery report arrived
    BatteryUpdated(BatteryInfo),
    /// The transport write path gave up; the connection is no longer usable
    ConnectionLost { reason: String },
}
