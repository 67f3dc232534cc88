//! Capability traits queried by host adapters
//!
//! Instead of inheriting a telescope framework base class, the session
//! implements a small set of capability interfaces. A host adapter holds a
//! `MountSession` and exposes whichever capabilities its own framework asks
//! about.

use async_trait::async_trait;

use crate::error::Result;
use crate::session::MountSession;

/// Point the mount and stop it again
#[async_trait]
pub trait MotionControllable {
    /// Slew to equatorial coordinates (right ascension in hours,
    /// declination in degrees)
    async fn goto(&self, right_ascension: f64, declination: f64) -> Result<()>;

    /// Abort any in-flight motion
    async fn abort(&self) -> Result<()>;
}

/// Park and unpark the mount
#[async_trait]
pub trait Parkable {
    async fn park(&self) -> Result<()>;
    async fn unpark(&self) -> Result<()>;
}

/// Engage and disengage tracking
#[async_trait]
pub trait TrackSettable {
    async fn set_track_enabled(&self, enabled: bool) -> Result<()>;
}

#[async_trait]
impl MotionControllable for MountSession {
    async fn goto(&self, right_ascension: f64, declination: f64) -> Result<()> {
        MountSession::goto(self, right_ascension, declination).await
    }

    async fn abort(&self) -> Result<()> {
        MountSession::abort(self).await
    }
}

#[async_trait]
impl Parkable for MountSession {
    async fn park(&self) -> Result<()> {
        MountSession::park(self).await
    }

    async fn unpark(&self) -> Result<()> {
        MountSession::unpark(self).await
    }
}

#[async_trait]
impl TrackSettable for MountSession {
    async fn set_track_enabled(&self, enabled: bool) -> Result<()> {
        MountSession::set_track_enabled(self, enabled).await
    }
}
