//! Mount session: handshake, periodic refresh and motion intents
//!
//! The session owns the codec, the response cache and the state machine,
//! writes requests through the transport and feeds decoded frames back into
//! the cache and state machine. Two paths mutate state (the background
//! reader draining frames and the keepalive tick issuing refresh requests),
//! and both funnel through one mutex-guarded pipeline so cache writes and
//! transitions always observe a consistent prior state.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::cache::{CachedResponse, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, RefreshConfig};
use crate::error::{PolarisError, Result};
use crate::events::MountEvent;
use crate::io::{ConnectionFactory, FrameReader};
use crate::protocol::{codes, parse_mode, MountCommand, Response};
use crate::state::{MountOrientation, MountStateMachine, TrackingState};
use crate::tcp::TcpConnectionFactory;
use crate::transform::{equatorial_to_horizontal, EquatorialCoordinates, ObserverLocation};

/// The decode -> cache -> state-machine pipeline. Guarded by one mutex;
/// never re-entered concurrently.
struct Pipeline {
    cache: ResponseCache,
    machine: MountStateMachine,
}

/// State shared between the session, the reader task and the tick task
#[derive(Clone)]
pub(crate) struct SharedState {
    pipeline: Arc<Mutex<Pipeline>>,
    writer: Arc<Mutex<Option<Box<dyn crate::io::FrameWriter>>>>,
    pending: Arc<Mutex<HashMap<i32, Vec<oneshot::Sender<Response>>>>>,
    event_sender: broadcast::Sender<MountEvent>,
    connected: Arc<AtomicBool>,
    site: Arc<RwLock<ObserverLocation>>,
    clock: Arc<dyn Clock>,
}

impl SharedState {
    fn new(site: ObserverLocation, clock: Arc<dyn Clock>) -> Self {
        let (event_sender, _) = broadcast::channel(100);
        Self {
            pipeline: Arc::new(Mutex::new(Pipeline {
                cache: ResponseCache::new(),
                machine: MountStateMachine::new(),
            })),
            writer: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            event_sender,
            connected: Arc::new(AtomicBool::new(false)),
            site: Arc::new(RwLock::new(site)),
            clock,
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(PolarisError::NotConnected)
        }
    }

    /// Encode and send one request. Write failures get a single immediate
    /// retry; a second failure marks the connection unusable and surfaces a
    /// disconnect to subscribers.
    async fn send_command(&self, command: &MountCommand) -> Result<()> {
        let frame = command.encode();

        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(PolarisError::NotConnected)?;

        match writer.write_frame(&frame).await {
            Ok(()) => {
                debug!("Sent request: {}", frame);
                Ok(())
            }
            Err(first) => {
                warn!("Failed to send request '{}' ({}), retrying", frame, first);
                match writer.write_frame(&frame).await {
                    Ok(()) => {
                        debug!("Sent request on retry: {}", frame);
                        Ok(())
                    }
                    Err(second) => {
                        error!("Failed to send request '{}' after retry: {}", frame, second);
                        drop(writer_guard);
                        self.connection_lost(format!("write failed: {}", second))
                            .await;
                        Err(second)
                    }
                }
            }
        }
    }

    /// Send a request and wait for the next response carrying its code
    async fn request(&self, command: MountCommand, timeout: Duration) -> Result<Response> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.entry(command.code()).or_default().push(tx);
        }

        self.send_command(&command).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(PolarisError::Communication(
                "Connection closed while waiting for response".to_string(),
            )),
            Err(_) => Err(PolarisError::Timeout(format!(
                "No response for command {} within {:?}",
                command.code(),
                timeout
            ))),
        }
    }

    /// Decode one raw frame and run it through the pipeline.
    ///
    /// Malformed frames decode to the sentinel and are dropped here; that is
    /// the recognized recovery for framing errors, not a fault.
    async fn handle_frame(&self, frame: &str) {
        let response = Response::decode(frame);
        if response.is_sentinel() {
            debug!("Discarding unparseable frame: {:?}", frame.trim());
            return;
        }

        let now = self.clock.now();
        let julian_date = self.clock.julian_date();
        let location = *self.site.read().await;

        let events = {
            let mut pipeline = self.pipeline.lock().await;
            pipeline
                .cache
                .put(response.code, response.fields.clone(), now);
            pipeline
                .machine
                .apply_response(&response, &location, julian_date)
        };

        for event in events {
            let _ = self.event_sender.send(event);
        }

        let mut pending = self.pending.lock().await;
        if let Some(waiters) = pending.remove(&response.code) {
            for waiter in waiters {
                let _ = waiter.send(response.clone());
            }
        }
    }

    /// One keepalive tick: warn on stale orientation, refresh orientation
    /// and mode on their own thresholds. The two policies watch different
    /// responses and stay decoupled.
    async fn tick(&self, refresh: &RefreshConfig) {
        if !self.is_connected() {
            return;
        }

        let now = self.clock.now();
        let (position_age, mode_age) = {
            let pipeline = self.pipeline.lock().await;
            (
                pipeline.cache.age_of(codes::AHRS, now),
                pipeline.cache.age_of(codes::MODE, now),
            )
        };

        if position_age.is_none_or(|age| age >= refresh.position_max_age) {
            warn!(
                "Last orientation update more than {:?} ago, tracking?",
                refresh.position_max_age
            );
        }
        if position_age.is_none_or(|age| age >= refresh.position_refresh_age) {
            debug!("Orientation data stale, requesting new update");
            if let Err(e) = self.send_command(&MountCommand::RequestPosition).await {
                warn!("Failed to request orientation refresh: {}", e);
                return;
            }
        }

        if mode_age.is_none_or(|age| age >= refresh.mode_refresh_age) {
            debug!("Mode data stale, requesting new update");
            if let Err(e) = self.send_command(&MountCommand::GetMode).await {
                warn!("Failed to request mode refresh: {}", e);
            }
        }
    }

    async fn broadcast_all(&self, events: Vec<MountEvent>) {
        for event in events {
            let _ = self.event_sender.send(event);
        }
    }

    /// Mark the connection unusable, drop the writer and wake every pending
    /// waiter with a closed channel.
    async fn connection_lost(&self, reason: String) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        warn!("Polaris connection lost: {}", reason);

        {
            let mut writer_guard = self.writer.lock().await;
            if let Some(mut writer) = writer_guard.take() {
                let _ = writer.shutdown().await;
            }
        }
        self.pending.lock().await.clear();

        let _ = self
            .event_sender
            .send(MountEvent::ConnectionLost { reason });
    }
}

/// Background reader: drains `#`-terminated frames one at a time and feeds
/// them through the pipeline. Bounded read timeouts are not fatal: the loop
/// simply polls again, so the tick path is never starved.
fn spawn_reader_task(
    mut reader: Box<dyn FrameReader>,
    shared: SharedState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    debug!("Reader stopped: shutdown signal received");
                    break;
                }
                result = reader.read_frame() => match result {
                    Ok(Some(frame)) => shared.handle_frame(&frame).await,
                    Ok(None) => {
                        shared
                            .connection_lost("connection closed by remote".to_string())
                            .await;
                        break;
                    }
                    Err(PolarisError::Timeout(_)) => continue,
                    Err(e) => {
                        shared.connection_lost(format!("read error: {}", e)).await;
                        break;
                    }
                }
            }
        }
    })
}

/// Keepalive tick task driving the refresh policies
fn spawn_tick_task(
    refresh: RefreshConfig,
    shared: SharedState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick_interval = interval(refresh.tick_interval);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {}
                _ = shutdown_rx.changed() => {
                    debug!("Tick task stopped: shutdown signal received");
                    break;
                }
            }

            if !shared.is_connected() {
                debug!("Tick task stopped: connection closed");
                break;
            }

            shared.tick(&refresh).await;
        }
    })
}

/// Session driving one Polaris mount head.
///
/// Constructed and owned by whatever composes the host adapter; hosts
/// subscribe to [`MountEvent`]s instead of registering callbacks.
pub struct MountSession {
    config: Config,
    factory: Arc<dyn ConnectionFactory>,
    shared: SharedState,
    reader_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    tick_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl MountSession {
    /// Create a session over TCP with the system clock
    pub fn new(config: Config) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(TcpConnectionFactory::new()),
            Arc::new(SystemClock::new()),
        )
    }

    /// Create a session with explicit transport and time collaborators
    pub fn with_collaborators(
        config: Config,
        factory: Arc<dyn ConnectionFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let site = ObserverLocation {
            latitude: config.site.latitude,
            longitude: config.site.longitude,
            elevation: config.site.elevation,
        };
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            shared: SharedState::new(site, clock),
            config,
            factory,
            reader_handle: Arc::new(Mutex::new(None)),
            tick_handle: Arc::new(Mutex::new(None)),
            shutdown_tx,
        }
    }

    /// Connect to the head, run the handshake gate and start the background
    /// reader and keepalive tick.
    ///
    /// A failed handshake tears the connection down again and returns the
    /// failure instead of pretending the mount is usable.
    pub async fn connect(&self) -> Result<()> {
        if self.shared.is_connected() {
            debug!("connect() called while already connected");
            return Ok(());
        }

        let timeout = Duration::from_secs(self.config.connection.connection_timeout_seconds);
        let addr = self.config.connection.addr();
        let pair = self.factory.connect(&addr, timeout).await?;

        *self.shared.writer.lock().await = Some(pair.writer);
        self.shared.connected.store(true, Ordering::SeqCst);
        self.shutdown_tx.send_replace(false);

        let reader_handle =
            spawn_reader_task(pair.reader, self.shared.clone(), self.shutdown_tx.subscribe());
        *self.reader_handle.lock().await = Some(reader_handle);

        if let Err(e) = self.handshake().await {
            self.disconnect().await;
            return Err(e);
        }

        // Populate the device-info mirrors once; later refreshes are
        // host-driven diagnostics.
        if let Err(e) = self.request_device_info().await {
            self.disconnect().await;
            return Err(e);
        }

        let tick_handle = spawn_tick_task(
            self.config.refresh.clone(),
            self.shared.clone(),
            self.shutdown_tx.subscribe(),
        );
        *self.tick_handle.lock().await = Some(tick_handle);

        info!("Connected to Polaris at {}", addr);
        Ok(())
    }

    /// Validate that the head is in astro mode, aligned and tracking, then
    /// announce the connection and request an initial orientation update.
    ///
    /// This is a gate, not a negotiation: nothing is configured, the mode
    /// is only checked. Failures name the app-side action the user must
    /// take before reconnecting.
    pub async fn handshake(&self) -> Result<()> {
        info!("Handshake");

        let timeout = Duration::from_secs(self.config.connection.handshake_timeout_seconds);
        let response = self
            .shared
            .request(MountCommand::GetMode, timeout)
            .await
            .map_err(|e| {
                PolarisError::HandshakeFailed(format!(
                    "no mode response from Polaris ({}), reconnect wifi and driver",
                    e
                ))
            })?;

        let report = parse_mode(&response);
        if !report.is_astro_mode() {
            info!("Invalid mode {}, expected 8", report.mode);
            return Err(PolarisError::HandshakeFailed(
                "Polaris is not in astro mode, use the app to switch to astro mode and reconnect"
                    .to_string(),
            ));
        }
        if !report.is_aligned_and_tracking() {
            info!("Invalid track {}, expected 3", report.track);
            return Err(PolarisError::HandshakeFailed(
                "Polaris is not aligned and tracking, use the app to do a basic alignment and reconnect"
                    .to_string(),
            ));
        }

        self.shared
            .send_command(&MountCommand::OpenConnection)
            .await?;
        self.shared
            .send_command(&MountCommand::RequestPosition)
            .await?;
        Ok(())
    }

    async fn request_device_info(&self) -> Result<()> {
        self.shared.send_command(&MountCommand::GetVersion).await?;
        self.shared.send_command(&MountCommand::GetStorage).await?;
        self.shared.send_command(&MountCommand::GetBattery).await?;
        Ok(())
    }

    /// Run one refresh tick. The background task calls this on its own
    /// interval; hosts may also drive it manually.
    pub async fn tick(&self) {
        self.shared.tick(&self.config.refresh).await;
    }

    /// Feed one raw frame into the decode pipeline.
    ///
    /// The background reader uses this path internally; it is public so a
    /// host owning its own transport can push frames instead.
    pub async fn handle_frame(&self, frame: &str) {
        self.shared.handle_frame(frame).await;
    }

    /// Slew to equatorial coordinates.
    ///
    /// When the mount is not idle the slew is preceded by an abort; the
    /// abort is not acknowledged before the goto goes out, matching the
    /// head's expectations.
    pub async fn goto(&self, right_ascension: f64, declination: f64) -> Result<()> {
        self.shared.ensure_connected()?;

        if self.tracking_state().await != TrackingState::Idle {
            self.abort().await?;
        }

        let location = *self.shared.site.read().await;
        let equatorial = EquatorialCoordinates {
            right_ascension,
            declination,
        };
        let horizontal =
            equatorial_to_horizontal(&equatorial, &location, self.shared.clock.julian_date());

        info!(
            "GOTO: RA {} DEC {} -> Alt {} Az {}",
            right_ascension, declination, horizontal.altitude, horizontal.azimuth
        );

        let tracking = self.tracking_state().await == TrackingState::Tracking;
        self.shared
            .send_command(&MountCommand::Goto {
                azimuth: horizontal.azimuth,
                altitude: horizontal.altitude,
                latitude: location.latitude,
                longitude: location.longitude,
                tracking,
            })
            .await
    }

    /// Stop any motion and force the state machine to idle without waiting
    /// for an acknowledgment
    pub async fn abort(&self) -> Result<()> {
        self.shared.ensure_connected()?;
        info!("Abort");

        let location = *self.shared.site.read().await;
        self.shared
            .send_command(&MountCommand::StopGoto {
                latitude: location.latitude,
                longitude: location.longitude,
            })
            .await?;

        let events = {
            let mut pipeline = self.shared.pipeline.lock().await;
            pipeline.machine.force_idle()
        };
        self.shared.broadcast_all(events).await;
        Ok(())
    }

    /// Enable or disable tracking. The state transition happens when the
    /// TRACK response arrives, not optimistically here.
    pub async fn set_track_enabled(&self, enabled: bool) -> Result<()> {
        self.shared.ensure_connected()?;
        info!("SetTrackEnabled: {}", enabled);
        self.shared
            .send_command(&MountCommand::SetTracking { enabled })
            .await
    }

    /// Park: stop tracking if needed, home all three axes and force the
    /// parked state. The axis resets are fire-and-forget; the head sends no
    /// useful acknowledgment for them.
    pub async fn park(&self) -> Result<()> {
        self.shared.ensure_connected()?;
        info!("Park");

        if self.tracking_state().await == TrackingState::Tracking {
            self.set_track_enabled(false).await?;
        }

        for axis in 1..=3u8 {
            self.shared
                .send_command(&MountCommand::ResetAxis { axis })
                .await?;
        }

        let events = {
            let mut pipeline = self.shared.pipeline.lock().await;
            pipeline.machine.force_parked()
        };
        self.shared.broadcast_all(events).await;
        Ok(())
    }

    /// Unpark releases the local parked state; this protocol revision has no
    /// wire command for it.
    pub async fn unpark(&self) -> Result<()> {
        info!("UnPark");
        let events = {
            let mut pipeline = self.shared.pipeline.lock().await;
            pipeline.machine.unpark()
        };
        self.shared.broadcast_all(events).await;
        Ok(())
    }

    /// Diagnostics passthrough for opcodes without a typed command
    pub async fn send_raw(
        &self,
        code: i32,
        kind: i32,
        fields: Vec<(String, String)>,
    ) -> Result<()> {
        self.shared.ensure_connected()?;
        self.shared
            .send_command(&MountCommand::Raw { code, kind, fields })
            .await
    }

    /// Subscribe to state, orientation and device-info notifications
    pub fn subscribe(&self) -> broadcast::Receiver<MountEvent> {
        self.shared.event_sender.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub async fn tracking_state(&self) -> TrackingState {
        self.shared.pipeline.lock().await.machine.tracking_state()
    }

    pub async fn orientation(&self) -> Option<MountOrientation> {
        self.shared.pipeline.lock().await.machine.orientation()
    }

    /// Most recent response for a command code, for host diagnostics.
    /// Unrecognized codes are retrievable here too.
    pub async fn cached_response(&self, code: i32) -> Option<CachedResponse> {
        self.shared.pipeline.lock().await.cache.get(code).cloned()
    }

    /// Age of the most recent response for a code, or `None` if never seen
    pub async fn response_age(&self, code: i32) -> Option<Duration> {
        let now = self.shared.clock.now();
        self.shared.pipeline.lock().await.cache.age_of(code, now)
    }

    /// Update the observer site used for coordinate conversion
    pub async fn set_location(&self, location: ObserverLocation) {
        info!(
            "updateLocation: {}, {}, {}",
            location.latitude, location.longitude, location.elevation
        );
        *self.shared.site.write().await = location;
    }

    /// Tear down the reader and tick tasks and drop the transport. In-flight
    /// requests are not cancelled explicitly; they stop being retried once
    /// the writer is gone.
    pub async fn disconnect(&self) {
        self.shutdown_tx.send_replace(true);

        for handle in [&self.reader_handle, &self.tick_handle] {
            let mut guard = handle.lock().await;
            if let Some(task) = guard.take() {
                if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                    warn!("Background task did not stop within 5 seconds, dropping it");
                }
            }
        }

        self.shared.connected.store(false, Ordering::SeqCst);
        {
            let mut writer_guard = self.shared.writer.lock().await;
            if let Some(mut writer) = writer_guard.take() {
                let _ = writer.shutdown().await;
            }
        }
        self.shared.pending.lock().await.clear();

        info!("Disconnected from Polaris");
    }
}

impl fmt::Debug for MountSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountSession")
            .field("config", &self.config)
            .field("connected", &self.shared.is_connected())
            .finish_non_exhaustive()
    }
}
