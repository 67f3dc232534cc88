//! Benro Polaris ASCII command/response protocol
//!
//! The Polaris head speaks a numeric-opcode text protocol over TCP. Requests
//! look like `1&{code}&{kind}&{payload}#` where `kind` selects read (2) or
//! write (3) and `payload` is `key:value;` pairs, or the literal `-1` when a
//! request carries no payload. Responses look like `{code}@{key:value;...}#`
//! with a three-digit code. Frames that do not match the response grammar
//! decode to a sentinel and are dropped by the caller, never treated as
//! errors.

use std::collections::HashMap;

use crate::error::{PolarisError, Result};

/// Known command codes of the Polaris protocol.
///
/// Codes outside this registry are still cached for diagnostics but have no
/// state-machine effect.
pub mod codes {
    pub const MODE: i32 = 284;
    pub const AHRS: i32 = 518;
    pub const GOTO: i32 = 519;
    pub const POSITION: i32 = 520;
    pub const RESET_AXIS: i32 = 523;
    pub const UNKNOWN: i32 = 525;
    pub const TRACK: i32 = 531;
    pub const STORAGE: i32 = 775;
    pub const BATTERY: i32 = 778;
    pub const VERSION: i32 = 780;
    pub const CONNECTION: i32 = 808;
}

/// Request kind selector: query a value.
pub const KIND_READ: i32 = 2;
/// Request kind selector: change a value.
pub const KIND_WRITE: i32 = 3;

/// Code carried by [`Response`] values decoded from unparseable frames.
pub const SENTINEL_CODE: i32 = -1;

/// Commands that can be sent to the Polaris head
#[derive(Debug, Clone, PartialEq)]
pub enum MountCommand {
    /// Query operating mode and alignment/track status (code 284)
    GetMode,
    /// Announce the controlling connection (code 808)
    OpenConnection,
    /// Request an orientation (AHRS) update (code 520)
    RequestPosition,
    /// Slew to a horizontal target and optionally keep tracking (code 519)
    Goto {
        /// Target azimuth in degrees, compass convention
        azimuth: f64,
        /// Target altitude in degrees
        altitude: f64,
        /// Site latitude in degrees
        latitude: f64,
        /// Site longitude in degrees
        longitude: f64,
        /// Whether tracking should continue after the slew
        tracking: bool,
    },
    /// Stop an in-flight slew (code 519 with state 0)
    StopGoto { latitude: f64, longitude: f64 },
    /// Enable or disable tracking (code 531)
    SetTracking { enabled: bool },
    /// Reset one axis to its home position (code 523)
    ResetAxis { axis: u8 },
    /// Query hardware/software versions (code 780)
    GetVersion,
    /// Query storage status (code 775)
    GetStorage,
    /// Query battery status (code 778)
    GetBattery,
    /// Escape hatch for opcodes without a typed variant
    Raw {
        code: i32,
        kind: i32,
        fields: Vec<(String, String)>,
    },
}

impl MountCommand {
    /// Get the wire code for this command
    pub fn code(&self) -> i32 {
        match self {
            MountCommand::GetMode => codes::MODE,
            MountCommand::OpenConnection => codes::CONNECTION,
            MountCommand::RequestPosition => codes::POSITION,
            MountCommand::Goto { .. } | MountCommand::StopGoto { .. } => codes::GOTO,
            MountCommand::SetTracking { .. } => codes::TRACK,
            MountCommand::ResetAxis { .. } => codes::RESET_AXIS,
            MountCommand::GetVersion => codes::VERSION,
            MountCommand::GetStorage => codes::STORAGE,
            MountCommand::GetBattery => codes::BATTERY,
            MountCommand::Raw { code, .. } => *code,
        }
    }

    /// Get the read/write kind selector for this command
    pub fn kind(&self) -> i32 {
        match self {
            MountCommand::GetMode
            | MountCommand::OpenConnection
            | MountCommand::RequestPosition
            | MountCommand::GetVersion
            | MountCommand::GetStorage
            | MountCommand::GetBattery => KIND_READ,
            MountCommand::Goto { .. }
            | MountCommand::StopGoto { .. }
            | MountCommand::SetTracking { .. }
            | MountCommand::ResetAxis { .. } => KIND_WRITE,
            MountCommand::Raw { kind, .. } => *kind,
        }
    }

    /// Payload fields in wire order.
    ///
    /// Field values must not contain `;`, `:`, `#` or `&`; the protocol has
    /// no escaping. All typed variants render numbers and flags, so only
    /// `Raw` can violate this precondition.
    pub fn fields(&self) -> Vec<(String, String)> {
        match self {
            MountCommand::GetMode
            | MountCommand::GetVersion
            | MountCommand::GetStorage
            | MountCommand::GetBattery => Vec::new(),
            MountCommand::OpenConnection => vec![("type".into(), "0".into())],
            MountCommand::RequestPosition => vec![("state".into(), "1".into())],
            MountCommand::Goto {
                azimuth,
                altitude,
                latitude,
                longitude,
                tracking,
            } => vec![
                ("state".into(), "1".into()),
                ("yaw".into(), format_angle(*azimuth)),
                ("pitch".into(), format_angle(*altitude)),
                ("lat".into(), format_angle(*latitude)),
                ("track".into(), (if *tracking { "1" } else { "0" }).into()),
                ("speed".into(), "0".into()),
                ("lng".into(), format_angle(*longitude)),
            ],
            MountCommand::StopGoto {
                latitude,
                longitude,
            } => vec![
                ("state".into(), "0".into()),
                ("yaw".into(), "0.0".into()),
                ("pitch".into(), "0.0".into()),
                ("lat".into(), format_angle(*latitude)),
                ("track".into(), "0".into()),
                ("speed".into(), "0".into()),
                ("lng".into(), format_angle(*longitude)),
            ],
            MountCommand::SetTracking { enabled } => vec![
                ("state".into(), (if *enabled { "1" } else { "0" }).into()),
                ("speed".into(), "0".into()),
            ],
            MountCommand::ResetAxis { axis } => vec![("axis".into(), axis.to_string())],
            MountCommand::Raw { fields, .. } => fields.clone(),
        }
    }

    /// Serialize the command to a wire frame
    pub fn encode(&self) -> String {
        encode_request(self.code(), self.kind(), &self.fields())
    }
}

/// Round an angle to four decimal places and render it without trailing
/// zero padding, matching what the head accepts.
fn format_angle(value: f64) -> String {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    format!("{}", rounded)
}

/// Encode a request frame from its raw parts.
///
/// An empty field list is encoded as the `-1` placeholder payload the head
/// expects for no-payload queries.
pub fn encode_request(code: i32, kind: i32, fields: &[(String, String)]) -> String {
    let payload = if fields.is_empty() {
        "-1".to_string()
    } else {
        let mut payload = String::new();
        for (key, value) in fields {
            payload.push_str(key);
            payload.push(':');
            payload.push_str(value);
            payload.push(';');
        }
        payload
    };

    format!("1&{}&{}&{}#", code, kind, payload)
}

/// One decoded response frame from the head
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Three-digit command code, or [`SENTINEL_CODE`] for unparseable frames
    pub code: i32,
    pub fields: HashMap<String, String>,
}

impl Response {
    /// The "discard this frame" value produced for malformed wire text
    pub fn sentinel() -> Self {
        Self {
            code: SENTINEL_CODE,
            fields: HashMap::new(),
        }
    }

    /// Whether this response is the malformed-frame sentinel
    pub fn is_sentinel(&self) -> bool {
        self.code == SENTINEL_CODE
    }

    /// Decode one wire frame.
    ///
    /// A valid response frame is `DDD@key:value;...#`; content after the
    /// first `#` is ignored. Echoed request frames (`1&code&kind&payload#`)
    /// decode symmetrically so loopback diagnostics round-trip. Anything
    /// else decodes to the sentinel, which the caller drops; it is not an
    /// error. Duplicate keys keep the last occurrence (live AHRS frames
    /// repeat the quaternion keys).
    pub fn decode(frame: &str) -> Self {
        let frame = frame.trim_start();

        let Some(hash) = frame.find('#') else {
            return Self::sentinel();
        };
        let frame = &frame[..hash];

        if let Some(rest) = frame.strip_prefix("1&") {
            return Self::decode_request_body(rest);
        }

        let bytes = frame.as_bytes();
        if bytes.len() < 4
            || !bytes[..3].iter().all(|b| b.is_ascii_digit())
            || bytes[3] != b'@'
        {
            return Self::sentinel();
        }

        // Three ASCII digits always parse
        let code: i32 = frame[..3].parse().unwrap_or(SENTINEL_CODE);

        let mut fields = HashMap::new();
        for pair in frame[4..].split(';') {
            if let Some((key, value)) = pair.split_once(':') {
                fields.insert(key.to_string(), value.to_string());
            }
        }

        Self { code, fields }
    }

    /// Decode the `{code}&{kind}&{payload}` body of a request frame. The
    /// `-1` placeholder payload is opaque: it carries no pairs and yields an
    /// empty field map.
    fn decode_request_body(rest: &str) -> Self {
        let mut parts = rest.splitn(3, '&');
        let (Some(code), Some(kind), Some(payload)) = (parts.next(), parts.next(), parts.next())
        else {
            return Self::sentinel();
        };
        let Ok(code) = code.parse::<i32>() else {
            return Self::sentinel();
        };
        if code < 0 || kind.parse::<i32>().map_or(true, |kind| kind < 0) {
            return Self::sentinel();
        }

        let mut fields = HashMap::new();
        for pair in payload.split(';') {
            if let Some((key, value)) = pair.split_once(':') {
                fields.insert(key.to_string(), value.to_string());
            }
        }

        Self { code, fields }
    }

    fn text_field(&self, key: &str) -> String {
        self.fields.get(key).cloned().unwrap_or_default()
    }

    fn numeric_field(&self, key: &str) -> Result<f64> {
        let raw = self.fields.get(key).ok_or_else(|| {
            PolarisError::ParseError(format!("Missing '{}' field in response {}", key, self.code))
        })?;
        raw.trim().parse::<f64>().map_err(|_| {
            PolarisError::ParseError(format!("Invalid '{}' value: {}", key, raw))
        })
    }
}

/// Orientation report from an AHRS response (code 518)
#[derive(Debug, Clone, PartialEq)]
pub struct AhrsReport {
    /// Altitude in degrees
    pub altitude: f64,
    /// Azimuth in degrees, reported under the `compass` key
    pub azimuth: f64,
}

/// Mode/alignment report from a MODE response (code 284)
#[derive(Debug, Clone, PartialEq)]
pub struct ModeReport {
    pub mode: String,
    pub track: String,
}

impl ModeReport {
    /// The head only accepts motion commands in astro mode
    pub fn is_astro_mode(&self) -> bool {
        self.mode == "8"
    }

    /// Aligned and tracking, the state required at connect time
    pub fn is_aligned_and_tracking(&self) -> bool {
        self.track == "3"
    }
}

/// Version report from a VERSION response (code 780)
#[derive(Debug, Clone, PartialEq)]
pub struct VersionInfo {
    pub hardware: String,
    pub software: String,
    pub astro_module: String,
    pub sv: String,
    pub ov: String,
}

/// Storage report from a STORAGE response (code 775)
#[derive(Debug, Clone, PartialEq)]
pub struct StorageInfo {
    pub total: f64,
    pub free: f64,
    pub used: f64,
    pub ok: bool,
}

/// Battery report from a BATTERY response (code 778)
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryInfo {
    pub capacity: f64,
    pub charging: bool,
}

/// Acknowledgment of a GOTO write (code 519)
#[derive(Debug, Clone, PartialEq)]
pub struct GotoAck {
    pub ret: String,
    pub track: String,
}

/// Acknowledgment of a TRACK write (code 531)
#[derive(Debug, Clone, PartialEq)]
pub struct TrackAck {
    pub ret: String,
}

/// Parse an AHRS response (code 518)
pub fn parse_ahrs(response: &Response) -> Result<AhrsReport> {
    Ok(AhrsReport {
        altitude: response.numeric_field("alt")?,
        azimuth: response.numeric_field("compass")?,
    })
}

/// Parse a MODE response (code 284). Missing keys read as empty strings so
/// the handshake can report exactly which precondition failed.
pub fn parse_mode(response: &Response) -> ModeReport {
    ModeReport {
        mode: response.text_field("mode"),
        track: response.text_field("track"),
    }
}

/// Parse a VERSION response (code 780)
pub fn parse_version(response: &Response) -> VersionInfo {
    VersionInfo {
        hardware: response.text_field("hw"),
        software: response.text_field("sw"),
        astro_module: response.text_field("exAxis"),
        sv: response.text_field("sv"),
        ov: response.text_field("ov"),
    }
}

/// Parse a STORAGE response (code 775)
pub fn parse_storage(response: &Response) -> Result<StorageInfo> {
    Ok(StorageInfo {
        total: response.numeric_field("totalspace")?,
        free: response.numeric_field("freespace")?,
        used: response.numeric_field("usespace")?,
        ok: response.text_field("status") == "1",
    })
}

/// Parse a BATTERY response (code 778)
pub fn parse_battery(response: &Response) -> Result<BatteryInfo> {
    Ok(BatteryInfo {
        capacity: response.numeric_field("capacity")?,
        charging: response.text_field("charge") == "1",
    })
}

/// Parse a GOTO acknowledgment (code 519)
pub fn parse_goto_ack(response: &Response) -> GotoAck {
    GotoAck {
        ret: response.text_field("ret"),
        track: response.text_field("track"),
    }
}

/// Parse a TRACK acknowledgment (code 531)
pub fn parse_track_ack(response: &Response) -> TrackAck {
    TrackAck {
        ret: response.text_field("ret"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_no_payload_request_with_placeholder() {
        assert_eq!(MountCommand::GetMode.encode(), "1&284&2&-1#");
        assert_eq!(MountCommand::GetVersion.encode(), "1&780&2&-1#");
    }

    #[test]
    fn encodes_track_command_in_field_order() {
        let cmd = MountCommand::SetTracking { enabled: true };
        assert_eq!(cmd.encode(), "1&531&3&state:1;speed:0;#");
    }

    #[test]
    fn encodes_position_request() {
        assert_eq!(MountCommand::RequestPosition.encode(), "1&520&2&state:1;#");
    }

    #[test]
    fn encodes_goto_with_rounded_angles() {
        let cmd = MountCommand::Goto {
            azimuth: 175.153_625_5,
            altitude: -19.021_335_6,
            latitude: 48.123_456,
            longitude: 11.5,
            tracking: false,
        };
        assert_eq!(
            cmd.encode(),
            "1&519&3&state:1;yaw:175.1536;pitch:-19.0213;lat:48.1235;track:0;speed:0;lng:11.5;#"
        );
    }

    #[test]
    fn format_angle_drops_trailing_zeros() {
        assert_eq!(format_angle(0.0), "0");
        assert_eq!(format_angle(90.0), "90");
        assert_eq!(format_angle(12.30001), "12.3");
    }

    #[test]
    fn decodes_duplicate_keys_last_wins() {
        let frame = "518@w:0.44;x:-0.57;w:-0.37;x:-0.56;compass:175.15;alt:-19.02;#";
        let response = Response::decode(frame);
        assert_eq!(response.code, 518);
        assert_eq!(response.fields["w"], "-0.37");
        assert_eq!(response.fields["x"], "-0.56");
    }

    #[test]
    fn decode_ignores_content_after_terminator() {
        let response = Response::decode("808@ret:0;#1&284&2&-1#");
        assert_eq!(response.code, 808);
        assert_eq!(response.fields["ret"], "0");
    }

    #[test]
    fn decode_rejects_missing_terminator() {
        assert!(Response::decode("775@status:1;").is_sentinel());
    }

    #[test]
    fn decode_rejects_short_code() {
        assert!(Response::decode("75@status:1;#").is_sentinel());
    }

    #[test]
    fn decode_skips_pairs_without_separator() {
        let response = Response::decode("284@mode:8;garbage;track:3;#");
        assert_eq!(response.fields.len(), 2);
        assert_eq!(response.fields["mode"], "8");
    }

    #[test]
    fn decodes_echoed_request_symmetrically() {
        let response = Response::decode("1&531&3&state:1;speed:0;#");
        assert_eq!(response.code, 531);
        assert_eq!(response.fields["state"], "1");
        assert_eq!(response.fields["speed"], "0");
    }

    #[test]
    fn placeholder_payload_stays_unparsed() {
        let response = Response::decode(&MountCommand::GetMode.encode());
        assert_eq!(response.code, 284);
        assert!(response.fields.is_empty());
    }

    #[test]
    fn mode_report_gates() {
        let response = Response::decode("284@mode:8;track:3;state:0;#");
        let report = parse_mode(&response);
        assert!(report.is_astro_mode());
        assert!(report.is_aligned_and_tracking());

        let response = Response::decode("284@mode:1;track:0;#");
        let report = parse_mode(&response);
        assert!(!report.is_astro_mode());
        assert!(!report.is_aligned_and_tracking());
    }

    #[test]
    fn parse_ahrs_requires_numeric_fields() {
        let response = Response::decode("518@compass:abc;alt:1.0;#");
        assert!(parse_ahrs(&response).is_err());

        let response = Response::decode("518@alt:1.0;#");
        assert!(parse_ahrs(&response).is_err());
    }

    #[test]
    fn parse_version_tolerates_missing_keys() {
        let response = Response::decode("780@hw:1.2.1.2;sw:6.0.0.48;#");
        let info = parse_version(&response);
        assert_eq!(info.hardware, "1.2.1.2");
        assert_eq!(info.astro_module, "");
    }
}
