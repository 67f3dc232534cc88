//! Mock mount implementation for testing
//!
//! Simulates a Polaris head that is already aligned and in astro mode, so
//! the driver can be exercised end to end without hardware. The writer
//! parses each request and queues the frames a real head would answer with;
//! the reader hands them back one at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::error::Result;
use crate::io::{ConnectionFactory, ConnectionPair, FrameReader, FrameWriter};
use crate::protocol::codes;

/// Shared state between mock reader and writer
#[derive(Debug, Default)]
struct MockState {
    response_queue: VecDeque<String>,
    device: MockDeviceState,
    closed: bool,
}

/// Simulated head state
#[derive(Debug)]
struct MockDeviceState {
    mode: String,
    track: String,
    tracking: bool,
    altitude: f64,
    azimuth: f64,
}

impl Default for MockDeviceState {
    fn default() -> Self {
        Self {
            mode: "8".to_string(),
            track: "3".to_string(),
            tracking: false,
            altitude: 45.0,
            azimuth: 180.0,
        }
    }
}

impl MockState {
    /// Process one request frame and queue the responses it provokes
    fn process_request(&mut self, request: &str) {
        let request = request.trim();
        debug!("Mock processing request: '{}'", request);

        let parts: Vec<&str> = request.trim_end_matches('#').split('&').collect();
        if parts.len() < 4 || parts[0] != "1" {
            debug!("Mock: unrecognized request '{}'", request);
            return;
        }
        let code: i32 = match parts[1].parse() {
            Ok(code) => code,
            Err(_) => return,
        };
        let payload = parts[3];

        match code {
            codes::MODE => {
                self.response_queue.push_back(format!(
                    "284@mode:{};state:0;track:{};speed:0;halfSpeed:0;#",
                    self.device.mode, self.device.track
                ));
            }
            codes::CONNECTION => {
                self.response_queue.push_back("808@ret:0;#".to_string());
            }
            codes::POSITION => {
                self.response_queue.push_back(format!(
                    "518@w:0.4402258;x:-0.5703645;y:-0.5810719;z:-0.3784723;compass:{};alt:{};#",
                    self.device.azimuth, self.device.altitude
                ));
            }
            codes::GOTO => {
                let state_on = payload.contains("state:1;");
                if state_on {
                    if let Some(yaw) = extract_field(payload, "yaw") {
                        self.device.azimuth = yaw;
                    }
                    if let Some(pitch) = extract_field(payload, "pitch") {
                        self.device.altitude = pitch;
                    }
                }
                let track = if self.device.tracking { "1" } else { "0" };
                let ret = if state_on { "1" } else { "0" };
                self.response_queue
                    .push_back(format!("519@ret:{};track:{};#", ret, track));
            }
            codes::TRACK => {
                self.device.tracking = payload.contains("state:1;");
                let ret = if self.device.tracking { "3" } else { "0" };
                self.response_queue
                    .push_back(format!("531@ret:{};#", ret));
            }
            codes::RESET_AXIS => {
                // The real head answers axis resets with nothing useful
            }
            codes::STORAGE => {
                self.response_queue.push_back(
                    "775@status:1;totalspace:30417;freespace:30373;usespace:43;#".to_string(),
                );
            }
            codes::BATTERY => {
                self.response_queue
                    .push_back("778@capacity:99;charge:0;#".to_string());
            }
            codes::VERSION => {
                self.response_queue.push_back(
                    "780@hw:1.2.1.2;sw:6.0.0.48;exAxis:1.0.2.14;sv:1;ov: ;#".to_string(),
                );
            }
            _ => {
                debug!("Mock: no canned response for code {}", code);
            }
        }
    }
}

fn extract_field(payload: &str, key: &str) -> Option<f64> {
    payload
        .split(';')
        .find_map(|pair| pair.strip_prefix(&format!("{}:", key)))
        .and_then(|value| value.parse().ok())
}

struct MockMountReader {
    state: Arc<Mutex<MockState>>,
    notify: Arc<Notify>,
}

#[async_trait]
impl FrameReader for MockMountReader {
    async fn read_frame(&mut self) -> Result<Option<String>> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(frame) = state.response_queue.pop_front() {
                    return Ok(Some(frame));
                }
                if state.closed {
                    return Ok(None);
                }
            }
            // Wake on the next queued response, or look again shortly; the
            // notify can race with the queue check above.
            let _ = tokio::time::timeout(Duration::from_millis(50), self.notify.notified()).await;
        }
    }
}

struct MockMountWriter {
    state: Arc<Mutex<MockState>>,
    notify: Arc<Notify>,
}

#[async_trait]
impl FrameWriter for MockMountWriter {
    async fn write_frame(&mut self, frame: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.process_request(frame);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.closed = true;
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Connection factory producing a simulated Polaris head
#[derive(Debug, Default, Clone)]
pub struct MockConnectionFactory;

impl MockConnectionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, addr: &str, _timeout: Duration) -> Result<ConnectionPair> {
        debug!("Mock connection to {}", addr);
        let state = Arc::new(Mutex::new(MockState::default()));
        let notify = Arc::new(Notify::new());

        Ok(ConnectionPair {
            reader: Box::new(MockMountReader {
                state: Arc::clone(&state),
                notify: Arc::clone(&notify),
            }),
            writer: Box::new(MockMountWriter { state, notify }),
        })
    }
}
