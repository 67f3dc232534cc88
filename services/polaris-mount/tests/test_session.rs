//! Session tests against a scripted transport
//!
//! The factory below captures every frame the session writes and can answer
//! the handshake MODE query; everything else is injected through the public
//! `handle_frame` path, the same way the background reader feeds frames.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use polaris_mount::io::{ConnectionFactory, ConnectionPair, FrameReader, FrameWriter};
use polaris_mount::protocol::codes;
use polaris_mount::{
    Clock, Config, ConnectionConfig, MountEvent, MountSession, PolarisError, RefreshConfig,
    Result, SiteConfig, TrackingState,
};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

// ============================================================================
// Scripted transport
// ============================================================================

const MODE_OK: &str = "284@mode:8;state:0;track:3;speed:0;halfSpeed:0;#";

struct ChannelReader {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameReader for ChannelReader {
    async fn read_frame(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

struct ScriptedWriter {
    sent: Arc<Mutex<Vec<String>>>,
    mode_response: Option<String>,
    fail_on: Option<String>,
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl FrameWriter for ScriptedWriter {
    async fn write_frame(&mut self, frame: &str) -> Result<()> {
        if let Some(marker) = &self.fail_on {
            if frame.contains(marker) {
                return Err(PolarisError::SendError("scripted write failure".to_string()));
            }
        }

        self.sent.lock().await.push(frame.to_string());

        if frame.starts_with("1&284&") {
            if let Some(response) = &self.mode_response {
                let _ = self.tx.send(response.clone());
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

struct ScriptedFactory {
    sent: Arc<Mutex<Vec<String>>>,
    mode_response: Option<String>,
    fail_on: Option<String>,
}

impl ScriptedFactory {
    fn new(mode_response: Option<&str>) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            mode_response: mode_response.map(str::to_string),
            fail_on: None,
        }
    }

    fn failing_on(mode_response: &str, marker: &str) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            mode_response: Some(mode_response.to_string()),
            fail_on: Some(marker.to_string()),
        }
    }

    async fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn connect(&self, _addr: &str, _timeout: Duration) -> Result<ConnectionPair> {
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(ConnectionPair {
            reader: Box::new(ChannelReader { rx }),
            writer: Box::new(ScriptedWriter {
                sent: Arc::clone(&self.sent),
                mode_response: self.mode_response.clone(),
                fail_on: self.fail_on.clone(),
                tx,
            }),
        })
    }
}

// ============================================================================
// Pinned clock
// ============================================================================

struct FakeClock {
    base: Instant,
    offset: StdMutex<Duration>,
    julian_date: f64,
}

impl FakeClock {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: StdMutex::new(Duration::ZERO),
            julian_date: 2_460_893.5,
        }
    }

    fn advance(&self, delta: Duration) {
        let mut offset = self.offset.lock().unwrap();
        *offset += delta;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    fn julian_date(&self) -> f64 {
        self.julian_date
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config() -> Config {
    Config {
        connection: ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: 9090,
            connection_timeout_seconds: 1,
            handshake_timeout_seconds: 1,
        },
        site: SiteConfig {
            latitude: 48.1379,
            longitude: 11.5755,
            elevation: 519.0,
        },
        refresh: RefreshConfig {
            // Keep the background tick out of the way; tests drive tick()
            // themselves.
            tick_interval: Duration::from_secs(3600),
            ..RefreshConfig::default()
        },
    }
}

struct Harness {
    session: MountSession,
    factory: Arc<ScriptedFactory>,
    clock: Arc<FakeClock>,
}

fn harness_with(factory: ScriptedFactory) -> Harness {
    let factory = Arc::new(factory);
    let clock = Arc::new(FakeClock::new());
    let session = MountSession::with_collaborators(
        test_config(),
        Arc::clone(&factory) as Arc<dyn ConnectionFactory>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    Harness {
        session,
        factory,
        clock,
    }
}

fn connected_harness_setup() -> Harness {
    harness_with(ScriptedFactory::new(Some(MODE_OK)))
}

async fn recv_event(
    events: &mut tokio::sync::broadcast::Receiver<MountEvent>,
) -> MountEvent {
    tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

// ============================================================================
// Handshake gate
// ============================================================================

#[tokio::test]
async fn connect_runs_handshake_and_initial_requests() {
    let harness = connected_harness_setup();
    harness.session.connect().await.unwrap();
    assert!(harness.session.is_connected());

    let sent = harness.factory.sent_frames().await;
    let expected_prefix = [
        "1&284&2&-1#",
        "1&808&2&type:0;#",
        "1&520&2&state:1;#",
        "1&780&2&-1#",
        "1&775&2&-1#",
        "1&778&2&-1#",
    ];
    assert!(sent.len() >= expected_prefix.len(), "sent: {:?}", sent);
    assert_eq!(sent[..expected_prefix.len()].to_vec(), expected_prefix);

    harness.session.disconnect().await;
}

#[tokio::test]
async fn connect_fails_when_not_in_astro_mode() {
    let harness = harness_with(ScriptedFactory::new(Some("284@mode:1;track:0;#")));

    let err = harness.session.connect().await.unwrap_err();
    assert!(matches!(err, PolarisError::HandshakeFailed(_)));
    assert!(!harness.session.is_connected());

    // The gate stops before the connection announcement
    let sent = harness.factory.sent_frames().await;
    assert!(!sent.iter().any(|frame| frame.starts_with("1&808&")));
}

#[tokio::test]
async fn connect_fails_when_not_aligned_and_tracking() {
    let harness = harness_with(ScriptedFactory::new(Some("284@mode:8;track:1;#")));

    let err = harness.session.connect().await.unwrap_err();
    match err {
        PolarisError::HandshakeFailed(message) => {
            assert!(message.contains("aligned"), "message: {}", message)
        }
        other => panic!("expected HandshakeFailed, got {:?}", other),
    }
    assert!(!harness.session.is_connected());
}

#[tokio::test]
async fn connect_fails_without_mode_response() {
    let harness = harness_with(ScriptedFactory::new(None));

    let err = harness.session.connect().await.unwrap_err();
    assert!(matches!(err, PolarisError::HandshakeFailed(_)));
    assert!(!harness.session.is_connected());
}

// ============================================================================
// Intents
// ============================================================================

#[tokio::test]
async fn goto_from_tracking_sends_abort_before_goto() {
    let harness = connected_harness_setup();
    harness.session.connect().await.unwrap();

    harness.session.handle_frame("531@ret:3;#").await;
    assert_eq!(
        harness.session.tracking_state().await,
        TrackingState::Tracking
    );

    harness.session.goto(5.5, -5.39).await.unwrap();

    let sent = harness.factory.sent_frames().await;
    let abort_index = sent
        .iter()
        .position(|frame| frame.starts_with("1&519&3&state:0;yaw:0.0;pitch:0.0;"))
        .expect("abort frame not sent");
    let goto_index = sent
        .iter()
        .position(|frame| frame.starts_with("1&519&3&state:1;"))
        .expect("goto frame not sent");
    assert!(abort_index < goto_index);

    // The abort forced idle, so the goto rides with tracking off
    assert!(sent[goto_index].contains("track:0;"));

    harness.session.disconnect().await;
}

#[tokio::test]
async fn goto_when_idle_sends_no_abort() {
    let harness = connected_harness_setup();
    harness.session.connect().await.unwrap();

    harness.session.goto(18.615, 38.78).await.unwrap();

    let sent = harness.factory.sent_frames().await;
    assert!(!sent.iter().any(|frame| frame.starts_with("1&519&3&state:0;")));
    let goto_frame = sent
        .iter()
        .find(|frame| frame.starts_with("1&519&3&state:1;"))
        .expect("goto frame not sent");

    // Site coordinates ride along, rounded to four decimals
    assert!(goto_frame.contains("lat:48.1379;"));
    assert!(goto_frame.contains("lng:11.5755;"));
    assert!(goto_frame.contains("speed:0;"));

    harness.session.disconnect().await;
}

#[tokio::test]
async fn abort_forces_idle_without_waiting_for_acknowledgment() {
    let harness = connected_harness_setup();
    let mut events = harness.session.subscribe();
    harness.session.connect().await.unwrap();

    harness.session.handle_frame("531@ret:3;#").await;
    assert!(matches!(
        recv_event(&mut events).await,
        MountEvent::TrackingStateChanged {
            state: TrackingState::Tracking
        }
    ));

    harness.session.abort().await.unwrap();
    assert_eq!(harness.session.tracking_state().await, TrackingState::Idle);
    assert!(matches!(
        recv_event(&mut events).await,
        MountEvent::TrackingStateChanged {
            state: TrackingState::Idle
        }
    ));

    harness.session.disconnect().await;
}

#[tokio::test]
async fn set_track_enabled_is_not_optimistic() {
    let harness = connected_harness_setup();
    harness.session.connect().await.unwrap();

    harness.session.set_track_enabled(true).await.unwrap();
    assert_eq!(harness.session.tracking_state().await, TrackingState::Idle);

    let sent = harness.factory.sent_frames().await;
    assert!(sent.contains(&"1&531&3&state:1;speed:0;#".to_string()));

    // The transition happens when the acknowledgment arrives
    harness.session.handle_frame("531@ret:3;#").await;
    assert_eq!(
        harness.session.tracking_state().await,
        TrackingState::Tracking
    );

    harness.session.disconnect().await;
}

#[tokio::test]
async fn park_stops_tracking_and_homes_all_axes() {
    let harness = connected_harness_setup();
    harness.session.connect().await.unwrap();

    harness.session.handle_frame("531@ret:3;#").await;
    harness.session.park().await.unwrap();
    assert_eq!(
        harness.session.tracking_state().await,
        TrackingState::Parked
    );

    let sent = harness.factory.sent_frames().await;
    let track_off_index = sent
        .iter()
        .position(|frame| frame == "1&531&3&state:0;speed:0;#")
        .expect("track-off frame not sent");
    let axis_indices: Vec<usize> = (1..=3)
        .map(|axis| {
            sent.iter()
                .position(|frame| frame == &format!("1&523&3&axis:{};#", axis))
                .unwrap_or_else(|| panic!("axis {} reset not sent", axis))
        })
        .collect();

    assert!(track_off_index < axis_indices[0]);
    assert!(axis_indices[0] < axis_indices[1]);
    assert!(axis_indices[1] < axis_indices[2]);

    harness.session.unpark().await.unwrap();
    assert_eq!(harness.session.tracking_state().await, TrackingState::Idle);

    harness.session.disconnect().await;
}

#[tokio::test]
async fn park_when_idle_skips_track_off() {
    let harness = connected_harness_setup();
    harness.session.connect().await.unwrap();

    harness.session.park().await.unwrap();

    let sent = harness.factory.sent_frames().await;
    assert!(!sent.contains(&"1&531&3&state:0;speed:0;#".to_string()));
    assert_eq!(
        harness.session.tracking_state().await,
        TrackingState::Parked
    );

    harness.session.disconnect().await;
}

// ============================================================================
// Periodic refresh
// ============================================================================

#[tokio::test]
async fn tick_requests_position_when_orientation_is_stale() {
    let harness = connected_harness_setup();
    harness.session.connect().await.unwrap();

    // Fresh orientation: no refresh traffic. The sleep lets the background
    // tick task run its immediate first tick before the capture is cleared.
    harness
        .session
        .handle_frame("518@compass:175.15;alt:-19.02;#")
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.factory.sent.lock().await.clear();

    harness.session.tick().await;
    assert!(harness.factory.sent_frames().await.is_empty());

    // Orientation crosses the refresh age, mode is still fresh
    harness.clock.advance(Duration::from_millis(2500));
    harness.session.tick().await;

    let sent = harness.factory.sent_frames().await;
    assert_eq!(sent, vec!["1&520&2&state:1;#".to_string()]);

    harness.session.disconnect().await;
}

#[tokio::test]
async fn tick_refreshes_mode_on_its_own_threshold() {
    let harness = connected_harness_setup();
    harness.session.connect().await.unwrap();

    harness
        .session
        .handle_frame("518@compass:175.15;alt:-19.02;#")
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.factory.sent.lock().await.clear();

    // Past the mode refresh age; the orientation is stale too by now
    harness.clock.advance(Duration::from_secs(16));
    harness.session.tick().await;

    let sent = harness.factory.sent_frames().await;
    assert!(sent.contains(&"1&520&2&state:1;#".to_string()));
    assert!(sent.contains(&"1&284&2&-1#".to_string()));

    harness.session.disconnect().await;
}

#[tokio::test]
async fn tick_requests_position_when_orientation_was_never_seen() {
    let harness = connected_harness_setup();
    harness.session.connect().await.unwrap();
    harness.factory.sent.lock().await.clear();

    harness.session.tick().await;

    let sent = harness.factory.sent_frames().await;
    assert!(sent.contains(&"1&520&2&state:1;#".to_string()));

    harness.session.disconnect().await;
}

// ============================================================================
// Frame handling and diagnostics
// ============================================================================

#[tokio::test]
async fn malformed_frames_are_dropped_not_cached() {
    let harness = connected_harness_setup();
    harness.session.connect().await.unwrap();

    harness.session.handle_frame("abc@x:1#").await;
    harness.session.handle_frame("garbled nonsense").await;

    assert!(harness.session.cached_response(-1).await.is_none());
    assert_eq!(harness.session.tracking_state().await, TrackingState::Idle);

    harness.session.disconnect().await;
}

#[tokio::test]
async fn unrecognized_codes_are_cached_for_diagnostics() {
    let harness = connected_harness_setup();
    harness.session.connect().await.unwrap();

    harness.session.handle_frame("802@band:0;#").await;

    let cached = harness.session.cached_response(802).await.unwrap();
    assert_eq!(cached.fields["band"], "0");
    assert_eq!(harness.session.response_age(802).await, Some(Duration::ZERO));
    assert_eq!(harness.session.tracking_state().await, TrackingState::Idle);

    harness.session.disconnect().await;
}

#[tokio::test]
async fn orientation_update_reaches_subscribers() {
    let harness = connected_harness_setup();
    let mut events = harness.session.subscribe();
    harness.session.connect().await.unwrap();

    harness
        .session
        .handle_frame("518@compass:175.1536255;alt:-19.0213356;#")
        .await;

    match recv_event(&mut events).await {
        MountEvent::OrientationUpdated {
            right_ascension,
            declination,
        } => {
            assert!((0.0..24.0).contains(&right_ascension));
            assert!((-90.0..=90.0).contains(&declination));
        }
        other => panic!("expected orientation update, got {:?}", other),
    }

    let orientation = harness.session.orientation().await.unwrap();
    assert_eq!(orientation.horizontal.azimuth, 175.1536255);

    harness.session.disconnect().await;
}

#[tokio::test]
async fn ahrs_responses_land_in_the_cache() {
    let harness = connected_harness_setup();
    harness.session.connect().await.unwrap();

    harness
        .session
        .handle_frame("518@compass:175.15;alt:-19.02;#")
        .await;

    let cached = harness.session.cached_response(codes::AHRS).await.unwrap();
    assert_eq!(cached.fields["compass"], "175.15");

    harness.session.disconnect().await;
}

// ============================================================================
// Write failures
// ============================================================================

#[tokio::test]
async fn exhausted_write_retry_surfaces_disconnect() {
    let harness = harness_with(ScriptedFactory::failing_on(MODE_OK, "1&531&"));
    let mut events = harness.session.subscribe();
    harness.session.connect().await.unwrap();

    let err = harness.session.set_track_enabled(true).await.unwrap_err();
    assert!(matches!(err, PolarisError::SendError(_)));
    assert!(!harness.session.is_connected());

    // Skip events from the connect sequence until the disconnect shows up
    loop {
        match recv_event(&mut events).await {
            MountEvent::ConnectionLost { .. } => break,
            _ => continue,
        }
    }

    let err = harness.session.goto(5.5, -5.39).await.unwrap_err();
    assert!(matches!(err, PolarisError::NotConnected));
}

#[tokio::test]
async fn operations_require_a_connection() {
    let harness = connected_harness_setup();

    assert!(matches!(
        harness.session.goto(5.5, -5.39).await,
        Err(PolarisError::NotConnected)
    ));
    assert!(matches!(
        harness.session.abort().await,
        Err(PolarisError::NotConnected)
    ));
    assert!(matches!(
        harness.session.set_track_enabled(true).await,
        Err(PolarisError::NotConnected)
    ));
    assert!(matches!(
        harness.session.park().await,
        Err(PolarisError::NotConnected)
    ));
}
