//! Mount state machine
//!
//! Interprets decoded responses to maintain tracking state, orientation and
//! the device-info mirrors. Transitions are driven exclusively by response
//! content dispatched on the command code; local abort/park/unpark calls use
//! the `force_*` entry points. Unrecognized codes are a no-op here; the
//! session still caches them for diagnostics.

use std::fmt;

use tracing::debug;

use crate::events::MountEvent;
use crate::protocol::{
    codes, parse_ahrs, parse_battery, parse_goto_ack, parse_storage, parse_track_ack,
    parse_version, BatteryInfo, Response, StorageInfo, VersionInfo,
};
use crate::transform::{
    horizontal_to_equatorial, EquatorialCoordinates, HorizontalCoordinates, ObserverLocation,
};

/// Orientation delta below which AHRS updates are ignored, in degrees
const ORIENTATION_DEAD_BAND: f64 = 0.001;

/// Motion state of the mount head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    #[default]
    Idle,
    Slewing,
    Tracking,
    Parked,
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackingState::Idle => "Idle",
            TrackingState::Slewing => "Slewing",
            TrackingState::Tracking => "Tracking",
            TrackingState::Parked => "Parked",
        };
        f.write_str(name)
    }
}

/// Current pointing of the head in both frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MountOrientation {
    pub horizontal: HorizontalCoordinates,
    pub equatorial: EquatorialCoordinates,
}

/// Response-driven state machine for tracking state and orientation
#[derive(Debug, Default)]
pub struct MountStateMachine {
    tracking: TrackingState,
    orientation: Option<MountOrientation>,
    version: Option<VersionInfo>,
    storage: Option<StorageInfo>,
    battery: Option<BatteryInfo>,
}

impl MountStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracking_state(&self) -> TrackingState {
        self.tracking
    }

    pub fn orientation(&self) -> Option<MountOrientation> {
        self.orientation
    }

    pub fn version(&self) -> Option<&VersionInfo> {
        self.version.as_ref()
    }

    pub fn storage(&self) -> Option<&StorageInfo> {
        self.storage.as_ref()
    }

    pub fn battery(&self) -> Option<&BatteryInfo> {
        self.battery.as_ref()
    }

    /// Apply one decoded response and return the events it produced.
    ///
    /// MODE responses are consulted by the handshake from the cache and
    /// cause no transition here.
    pub fn apply_response(
        &mut self,
        response: &Response,
        location: &ObserverLocation,
        julian_date: f64,
    ) -> Vec<MountEvent> {
        match response.code {
            codes::TRACK => self.apply_track_ack(response),
            codes::GOTO => self.apply_goto_ack(response),
            codes::AHRS => self.apply_ahrs(response, location, julian_date),
            codes::VERSION => {
                let info = parse_version(response);
                self.version = Some(info.clone());
                vec![MountEvent::DeviceInfoUpdated(info)]
            }
            codes::STORAGE => match parse_storage(response) {
                Ok(info) => {
                    self.storage = Some(info.clone());
                    vec![MountEvent::StorageUpdated(info)]
                }
                Err(e) => {
                    debug!("Ignoring bad storage response: {}", e);
                    Vec::new()
                }
            },
            codes::BATTERY => match parse_battery(response) {
                Ok(info) => {
                    self.battery = Some(info.clone());
                    vec![MountEvent::BatteryUpdated(info)]
                }
                Err(e) => {
                    debug!("Ignoring bad battery response: {}", e);
                    Vec::new()
                }
            },
            codes::MODE | codes::UNKNOWN => Vec::new(),
            _ => Vec::new(),
        }
    }

    /// A TRACK acknowledgment reports the resulting state: `ret` of `0`
    /// means tracking stopped, anything else means it is running.
    fn apply_track_ack(&mut self, response: &Response) -> Vec<MountEvent> {
        let ack = parse_track_ack(response);
        let next = if ack.ret == "0" {
            TrackingState::Idle
        } else {
            TrackingState::Tracking
        };
        self.transition_to(next)
    }

    /// `ret` of `1` acknowledges the slew; otherwise the `track` flag tells
    /// whether the head fell back to tracking or idled.
    fn apply_goto_ack(&mut self, response: &Response) -> Vec<MountEvent> {
        let ack = parse_goto_ack(response);
        let next = if ack.ret == "1" {
            TrackingState::Slewing
        } else if ack.track == "1" {
            TrackingState::Tracking
        } else {
            TrackingState::Idle
        };
        self.transition_to(next)
    }

    fn apply_ahrs(
        &mut self,
        response: &Response,
        location: &ObserverLocation,
        julian_date: f64,
    ) -> Vec<MountEvent> {
        let report = match parse_ahrs(response) {
            Ok(report) => report,
            Err(e) => {
                debug!("Ignoring bad AHRS response: {}", e);
                return Vec::new();
            }
        };

        let horizontal = HorizontalCoordinates {
            altitude: report.altitude,
            azimuth: report.azimuth,
        };

        if let Some(current) = &self.orientation {
            let alt_delta = (current.horizontal.altitude - horizontal.altitude).abs();
            let az_delta = (current.horizontal.azimuth - horizontal.azimuth).abs();
            if alt_delta <= ORIENTATION_DEAD_BAND && az_delta <= ORIENTATION_DEAD_BAND {
                return Vec::new();
            }
        }

        let equatorial = horizontal_to_equatorial(&horizontal, location, julian_date);
        self.orientation = Some(MountOrientation {
            horizontal,
            equatorial,
        });

        vec![MountEvent::OrientationUpdated {
            right_ascension: equatorial.right_ascension,
            declination: equatorial.declination,
        }]
    }

    /// Local abort: the head is commanded to stop without waiting for an
    /// acknowledgment, so the state flips immediately.
    pub fn force_idle(&mut self) -> Vec<MountEvent> {
        self.transition_to(TrackingState::Idle)
    }

    /// Local park: forced regardless of wire replies.
    pub fn force_parked(&mut self) -> Vec<MountEvent> {
        self.transition_to(TrackingState::Parked)
    }

    /// Unpark has no wire effect in this protocol revision; it only releases
    /// the local parked state.
    pub fn unpark(&mut self) -> Vec<MountEvent> {
        if self.tracking == TrackingState::Parked {
            self.transition_to(TrackingState::Idle)
        } else {
            Vec::new()
        }
    }

    fn transition_to(&mut self, next: TrackingState) -> Vec<MountEvent> {
        if self.tracking == next {
            return Vec::new();
        }
        debug!("Tracking state {} -> {}", self.tracking, next);
        self.tracking = next;
        vec![MountEvent::TrackingStateChanged { state: next }]
    }
}
