// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TLM wire protocol: message kinds, header layout and payload structs.
//!
//! Every message on the wire is a fixed 20-byte header followed by
//! `data_size` payload bytes:
//!
//! ```text
//! +---------------+---------------+---------------+---------------+---------------+
//! | MessageType   | InterfaceID   | ParameterID   | SourceBigEnd  | DataSize      |
//! | i32           | i32           | i32           | i32 (0/1)     | i32           |
//! +---------------+---------------+---------------+---------------+---------------+
//! | payload (DataSize bytes)                                                      |
//! +-------------------------------------------------------------------------------+
//! ```
//!
//! The header integers travel in the byte order of the *sending* system and
//! the `SourceIsBigEndianSystem` flag names that order: any non-zero flag
//! byte marks a big-endian sender, so a receiver can decode the remaining
//! fields with the right endianness without negotiation. Time-data payloads
//! are packed `f64` lanes in the same byte order; the manager forwards them
//! untouched and the receiving side reconciles.
//!
//! Registration payloads are small colon-delimited strings, parsed by
//! [`InterfaceSpec::parse`] and [`parse_parameter_spec`].

pub mod codec;

/// Wire size of the fixed message header.
pub const HEADER_SIZE: usize = 20;

/// Wire size of a [`ConnectionParams`] payload: 28 doubles, the mode word
/// and four bytes of trailing padding (the layout of the original C struct
/// that clients still expect).
pub const CONNECTION_PARAMS_SIZE: usize = 28 * 8 + 4 + 4;

/// Wire size of a [`TimeData3D`] payload (19 doubles).
pub const TIME_DATA_3D_SIZE: usize = 19 * 8;

/// Wire size of a [`TimeData1D`] payload (3 doubles).
pub const TIME_DATA_1D_SIZE: usize = 3 * 8;

/// Wire size of a [`TimeDataSignal`] payload (2 doubles).
pub const TIME_DATA_SIGNAL_SIZE: usize = 2 * 8;

/// Fixed size of a parameter-value reply payload. Longer values are
/// truncated to 99 bytes plus a terminator.
pub const PARAMETER_VALUE_SIZE: usize = 100;

/// Message kinds exchanged between clients, monitors and the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// First message on a fresh connection: component name in the payload.
    RegComponent,
    /// Interface registration: `name[:dims[:causality[:domain]]]`.
    RegInterface,
    /// Parameter registration: `name:value`.
    RegParameter,
    /// End-of-registration rendezvous; the reply carries the global status.
    CheckModel,
    /// Packed time-stamped interface state.
    TimeData,
    /// Client asks to leave the session.
    CloseRequest,
    /// Manager grants the close.
    ClosePermission,
}

impl MessageKind {
    /// Wire value of this kind.
    pub fn to_wire(self) -> i32 {
        match self {
            MessageKind::RegComponent => 1,
            MessageKind::RegInterface => 2,
            MessageKind::RegParameter => 3,
            MessageKind::CheckModel => 4,
            MessageKind::TimeData => 5,
            MessageKind::CloseRequest => 6,
            MessageKind::ClosePermission => 7,
        }
    }

    /// Decode a wire value; `None` for anything out of range.
    pub fn from_wire(raw: i32) -> Option<Self> {
        Some(match raw {
            1 => MessageKind::RegComponent,
            2 => MessageKind::RegInterface,
            3 => MessageKind::RegParameter,
            4 => MessageKind::CheckModel,
            5 => MessageKind::TimeData,
            6 => MessageKind::CloseRequest,
            7 => MessageKind::ClosePermission,
            _ => return None,
        })
    }
}

/// Whether this host is big-endian.
pub const fn local_big_endian() -> bool {
    cfg!(target_endian = "big")
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Message kind.
    pub kind: MessageKind,
    /// Interface id; doubles as the component id in a `RegComponent` reply
    /// and as the status word in a `CheckModel` reply.
    pub interface_id: i32,
    /// Component-parameter id (used by `RegParameter` replies).
    pub parameter_id: i32,
    /// Byte order the header and payload were encoded in.
    pub source_big_endian: bool,
    /// Payload length in bytes.
    pub data_size: usize,
}

impl MessageHeader {
    /// A reply header in the local byte order with an empty payload.
    pub fn reply(kind: MessageKind) -> Self {
        Self {
            kind,
            interface_id: 0,
            parameter_id: 0,
            source_big_endian: local_big_endian(),
            data_size: 0,
        }
    }

    /// Decode a header from its 20 wire bytes.
    ///
    /// The endian flag (bytes 12..16) is inspected first; a non-zero flag
    /// marks a big-endian sender and selects the byte order for all five
    /// fields. Fails on unknown message kinds and on negative or oversized
    /// payload lengths.
    pub fn decode(raw: &[u8; HEADER_SIZE], max_data: usize) -> std::io::Result<Self> {
        let big = raw[12..16].iter().any(|&b| b != 0);
        let kind_raw = get_i32(&raw[0..4], big);
        let kind = MessageKind::from_wire(kind_raw).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown message kind {}", kind_raw),
            )
        })?;
        let data_size = get_i32(&raw[16..20], big);
        if data_size < 0 || data_size as usize > max_data {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bad payload length {} (max {})", data_size, max_data),
            ));
        }
        Ok(Self {
            kind,
            interface_id: get_i32(&raw[4..8], big),
            parameter_id: get_i32(&raw[8..12], big),
            source_big_endian: big,
            data_size: data_size as usize,
        })
    }

    /// Encode this header into 20 wire bytes, in the byte order named by
    /// its own endian flag.
    pub fn encode(&self, out: &mut [u8; HEADER_SIZE]) {
        let big = self.source_big_endian;
        put_i32(&mut out[0..4], self.kind.to_wire(), big);
        put_i32(&mut out[4..8], self.interface_id, big);
        put_i32(&mut out[8..12], self.parameter_id, big);
        put_i32(&mut out[12..16], i32::from(big), big);
        put_i32(&mut out[16..20], self.data_size as i32, big);
    }
}

fn get_i32(b: &[u8], big: bool) -> i32 {
    let bytes = [b[0], b[1], b[2], b[3]];
    if big {
        i32::from_be_bytes(bytes)
    } else {
        i32::from_le_bytes(bytes)
    }
}

fn put_i32(out: &mut [u8], v: i32, big: bool) {
    let bytes = if big { v.to_be_bytes() } else { v.to_le_bytes() };
    out[..4].copy_from_slice(&bytes);
}

fn get_f64(b: &[u8], big: bool) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&b[..8]);
    if big {
        f64::from_be_bytes(bytes)
    } else {
        f64::from_le_bytes(bytes)
    }
}

fn put_f64(out: &mut Vec<u8>, v: f64, big: bool) {
    let bytes = if big { v.to_be_bytes() } else { v.to_le_bytes() };
    out.extend_from_slice(&bytes);
}

/// Declared causality of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Causality {
    /// Exchanges state in both directions (the TLM default).
    #[default]
    Bidirectional,
    /// Consumes state only.
    Input,
    /// Produces state only.
    Output,
}

impl Causality {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "bidirectional" => Causality::Bidirectional,
            "input" => Causality::Input,
            "output" => Causality::Output,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Causality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Causality::Bidirectional => "bidirectional",
            Causality::Input => "input",
            Causality::Output => "output",
        })
    }
}

/// Parsed `RegInterface` payload.
///
/// The payload is `name[:dims[:causality[:domain]]]`; missing fields default
/// to a 6-dimensional bidirectional mechanical interface. The legacy
/// dimension string `"3D"` is normalised to 6, and a colon-free payload is
/// accepted for old clients that only send the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSpec {
    /// Interface name, local to the registering component.
    pub name: String,
    /// 1 for reduced/signal couplings, 6 for full mechanical ones.
    pub dimensions: i32,
    /// Declared causality.
    pub causality: Causality,
    /// Physical domain label (`mechanical`, `hydraulic`, `signal`, ...).
    pub domain: String,
}

impl InterfaceSpec {
    /// Parse a registration payload. Malformed specifications are protocol
    /// violations and abort the session.
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        // The domain is the remainder: it may itself contain colons.
        let mut fields = raw.splitn(4, ':');
        let name = fields.next().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(format!("interface specification {:?} has no name", raw));
        }
        let dim_str = fields.next().unwrap_or_default();
        let dimensions = match dim_str {
            "" => 6,
            "3D" => 6,
            other => other
                .parse::<i32>()
                .map_err(|_| format!("bad interface dimensions {:?}", other))?,
        };
        if dimensions != 1 && dimensions != 6 {
            return Err(format!("unsupported interface dimensions {}", dimensions));
        }
        let causality = match fields.next().unwrap_or_default() {
            "" => Causality::Bidirectional,
            other => {
                Causality::parse(other).ok_or_else(|| format!("bad causality {:?}", other))?
            }
        };
        let domain = match fields.next().unwrap_or_default() {
            "" => "mechanical".to_string(),
            other => other.to_string(),
        };
        Ok(Self {
            name,
            dimensions,
            causality,
            domain,
        })
    }
}

/// Split a `RegParameter` payload at the first colon. Everything after the
/// first colon belongs to the value, which may itself contain colons.
pub fn parse_parameter_spec(raw: &str) -> (&str, &str) {
    match raw.split_once(':') {
        Some((name, value)) => (name, value),
        None => (raw, ""),
    }
}

/// Extract the full interface name from a monitor registration payload
/// (monitors may append a legacy `:type` suffix).
pub fn parse_monitor_name(raw: &str) -> &str {
    raw.split(':').next().unwrap_or(raw)
}

/// Static coupling data agreed at registration time.
///
/// Sent as the `RegInterface` reply payload: the connection's line
/// parameters plus the registering component's inertial transform and the
/// interface's nominal time-zero pose.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    /// Transmission-line delay in seconds.
    pub delay: f64,
    /// Line impedance.
    pub impedance: f64,
    /// Rotational line impedance.
    pub rotational_impedance: f64,
    /// Numerical damping factor.
    pub alpha: f64,
    /// Position of the component frame in the global frame.
    pub component_position: [f64; 3],
    /// Orientation of the component frame in the global frame (row-major 3x3).
    pub component_orientation: [f64; 9],
    /// Nominal interface position in the component frame.
    pub nominal_position: [f64; 3],
    /// Nominal interface orientation in the component frame.
    pub nominal_orientation: [f64; 9],
    /// Coupling mode word.
    pub mode: i32,
}

/// Row-major 3x3 identity.
pub const IDENTITY_3X3: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            delay: 0.0,
            impedance: 0.0,
            rotational_impedance: 0.0,
            alpha: 0.0,
            component_position: [0.0; 3],
            component_orientation: IDENTITY_3X3,
            nominal_position: [0.0; 3],
            nominal_orientation: IDENTITY_3X3,
            mode: 0,
        }
    }
}

impl ConnectionParams {
    /// Line parameters with the given delay and defaults elsewhere.
    pub fn with_delay(delay: f64) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// The reply sent in interface-request mode, where no real connection
    /// exists yet.
    pub fn interface_request_defaults() -> Self {
        Self {
            delay: 0.1,
            mode: 1,
            ..Self::default()
        }
    }

    /// Encode into the 232-byte wire layout.
    pub fn encode(&self, big: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(CONNECTION_PARAMS_SIZE);
        put_f64(&mut out, self.delay, big);
        put_f64(&mut out, self.impedance, big);
        put_f64(&mut out, self.rotational_impedance, big);
        put_f64(&mut out, self.alpha, big);
        for v in self.component_position {
            put_f64(&mut out, v, big);
        }
        for v in self.component_orientation {
            put_f64(&mut out, v, big);
        }
        for v in self.nominal_position {
            put_f64(&mut out, v, big);
        }
        for v in self.nominal_orientation {
            put_f64(&mut out, v, big);
        }
        let mode = if big {
            self.mode.to_be_bytes()
        } else {
            self.mode.to_le_bytes()
        };
        out.extend_from_slice(&mode);
        out.extend_from_slice(&[0u8; 4]);
        out
    }

    /// Decode from the wire layout.
    pub fn decode(raw: &[u8], big: bool) -> std::result::Result<Self, String> {
        if raw.len() < CONNECTION_PARAMS_SIZE {
            return Err(format!(
                "connection params payload too short: {} bytes",
                raw.len()
            ));
        }
        fn take(raw: &[u8], at: &mut usize, big: bool) -> f64 {
            let v = get_f64(&raw[*at..], big);
            *at += 8;
            v
        }
        let mut at = 0usize;
        let delay = take(raw, &mut at, big);
        let impedance = take(raw, &mut at, big);
        let rotational_impedance = take(raw, &mut at, big);
        let alpha = take(raw, &mut at, big);
        let mut component_position = [0.0; 3];
        for v in &mut component_position {
            *v = take(raw, &mut at, big);
        }
        let mut component_orientation = [0.0; 9];
        for v in &mut component_orientation {
            *v = take(raw, &mut at, big);
        }
        let mut nominal_position = [0.0; 3];
        for v in &mut nominal_position {
            *v = take(raw, &mut at, big);
        }
        let mut nominal_orientation = [0.0; 9];
        for v in &mut nominal_orientation {
            *v = take(raw, &mut at, big);
        }
        let mode = get_i32(&raw[at..at + 4], big);
        Ok(Self {
            delay,
            impedance,
            rotational_impedance,
            alpha,
            component_position,
            component_orientation,
            nominal_position,
            nominal_orientation,
            mode,
        })
    }
}

/// Full 6-D interface state at one instant: pose and twist.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeData3D {
    /// Simulation time of the sample.
    pub time: f64,
    /// Interface position.
    pub position: [f64; 3],
    /// Interface orientation (row-major 3x3).
    pub orientation: [f64; 9],
    /// Linear and angular velocity.
    pub velocity: [f64; 6],
}

impl Default for TimeData3D {
    fn default() -> Self {
        Self {
            time: 0.0,
            position: [0.0; 3],
            orientation: IDENTITY_3X3,
            velocity: [0.0; 6],
        }
    }
}

impl TimeData3D {
    /// Encode into the 152-byte wire layout.
    pub fn encode(&self, big: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(TIME_DATA_3D_SIZE);
        put_f64(&mut out, self.time, big);
        for v in self.position {
            put_f64(&mut out, v, big);
        }
        for v in self.orientation {
            put_f64(&mut out, v, big);
        }
        for v in self.velocity {
            put_f64(&mut out, v, big);
        }
        out
    }

    /// Decode from the wire layout.
    pub fn decode(raw: &[u8], big: bool) -> std::result::Result<Self, String> {
        if raw.len() < TIME_DATA_3D_SIZE {
            return Err(format!("3D time data too short: {} bytes", raw.len()));
        }
        let mut out = Self::default();
        out.time = get_f64(&raw[0..], big);
        for (i, v) in out.position.iter_mut().enumerate() {
            *v = get_f64(&raw[8 + i * 8..], big);
        }
        for (i, v) in out.orientation.iter_mut().enumerate() {
            *v = get_f64(&raw[32 + i * 8..], big);
        }
        for (i, v) in out.velocity.iter_mut().enumerate() {
            *v = get_f64(&raw[104 + i * 8..], big);
        }
        Ok(out)
    }
}

/// Reduced 1-D interface state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeData1D {
    /// Simulation time of the sample.
    pub time: f64,
    /// Scalar position.
    pub position: f64,
    /// Scalar velocity.
    pub velocity: f64,
}

impl TimeData1D {
    /// Encode into the 24-byte wire layout.
    pub fn encode(&self, big: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(TIME_DATA_1D_SIZE);
        put_f64(&mut out, self.time, big);
        put_f64(&mut out, self.position, big);
        put_f64(&mut out, self.velocity, big);
        out
    }

    /// Decode from the wire layout.
    pub fn decode(raw: &[u8], big: bool) -> std::result::Result<Self, String> {
        if raw.len() < TIME_DATA_1D_SIZE {
            return Err(format!("1D time data too short: {} bytes", raw.len()));
        }
        Ok(Self {
            time: get_f64(&raw[0..], big),
            position: get_f64(&raw[8..], big),
            velocity: get_f64(&raw[16..], big),
        })
    }

    /// Normalise into the canonical 3D slot: the scalar lanes land in the
    /// first position/velocity component, the orientation is identity.
    pub fn into_3d(self) -> TimeData3D {
        let mut out = TimeData3D::default();
        out.time = self.time;
        out.position[0] = self.position;
        out.velocity[0] = self.velocity;
        out
    }
}

/// Scalar signal sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeDataSignal {
    /// Simulation time of the sample.
    pub time: f64,
    /// Signal value.
    pub value: f64,
}

impl TimeDataSignal {
    /// Encode into the 16-byte wire layout.
    pub fn encode(&self, big: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(TIME_DATA_SIGNAL_SIZE);
        put_f64(&mut out, self.time, big);
        put_f64(&mut out, self.value, big);
        out
    }

    /// Decode from the wire layout.
    pub fn decode(raw: &[u8], big: bool) -> std::result::Result<Self, String> {
        if raw.len() < TIME_DATA_SIGNAL_SIZE {
            return Err(format!("signal time data too short: {} bytes", raw.len()));
        }
        Ok(Self {
            time: get_f64(&raw[0..], big),
            value: get_f64(&raw[8..], big),
        })
    }

    /// Normalise into the canonical 3D slot: zero pose and twist with an
    /// identity orientation, keeping only the timestamp.
    pub fn into_3d(self) -> TimeData3D {
        let mut out = TimeData3D::default();
        out.time = self.time;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for raw in 1..=7 {
            let kind = MessageKind::from_wire(raw).unwrap();
            assert_eq!(kind.to_wire(), raw);
        }
        assert!(MessageKind::from_wire(0).is_none());
        assert!(MessageKind::from_wire(8).is_none());
    }

    #[test]
    fn test_header_roundtrip_little_endian() {
        let header = MessageHeader {
            kind: MessageKind::TimeData,
            interface_id: 3,
            parameter_id: -1,
            source_big_endian: false,
            data_size: 152,
        };
        let mut raw = [0u8; HEADER_SIZE];
        header.encode(&mut raw);
        let back = MessageHeader::decode(&raw, 1024).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn test_header_roundtrip_big_endian() {
        let header = MessageHeader {
            kind: MessageKind::RegInterface,
            interface_id: 1,
            parameter_id: 0,
            source_big_endian: true,
            data_size: 17,
        };
        let mut raw = [0u8; HEADER_SIZE];
        header.encode(&mut raw);
        // The flag word must be non-zero however the receiver looks at it.
        assert!(raw[12..16].iter().any(|&b| b != 0));
        let back = MessageHeader::decode(&raw, 1024).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn test_header_rejects_unknown_kind() {
        let mut raw = [0u8; HEADER_SIZE];
        put_i32(&mut raw[0..4], 42, false);
        assert!(MessageHeader::decode(&raw, 1024).is_err());
    }

    #[test]
    fn test_header_rejects_oversized_payload() {
        let header = MessageHeader {
            kind: MessageKind::TimeData,
            interface_id: 0,
            parameter_id: 0,
            source_big_endian: false,
            data_size: 4096,
        };
        let mut raw = [0u8; HEADER_SIZE];
        header.encode(&mut raw);
        assert!(MessageHeader::decode(&raw, 1024).is_err());
    }

    #[test]
    fn test_interface_spec_full() {
        let spec = InterfaceSpec::parse("flange:6:bidirectional:mechanical").unwrap();
        assert_eq!(spec.name, "flange");
        assert_eq!(spec.dimensions, 6);
        assert_eq!(spec.causality, Causality::Bidirectional);
        assert_eq!(spec.domain, "mechanical");
    }

    #[test]
    fn test_interface_spec_defaults() {
        // Colon-free legacy form gets all defaults.
        let spec = InterfaceSpec::parse("tcp1").unwrap();
        assert_eq!(spec.dimensions, 6);
        assert_eq!(spec.causality, Causality::Bidirectional);
        assert_eq!(spec.domain, "mechanical");

        // Partially specified forms fill in the tail.
        let spec = InterfaceSpec::parse("x:1").unwrap();
        assert_eq!(spec.dimensions, 1);
        assert_eq!(spec.causality, Causality::Bidirectional);

        let spec = InterfaceSpec::parse("x:1:input").unwrap();
        assert_eq!(spec.causality, Causality::Input);
        assert_eq!(spec.domain, "mechanical");

        let spec = InterfaceSpec::parse("x:1:input:signal").unwrap();
        assert_eq!(spec.domain, "signal");
    }

    #[test]
    fn test_interface_spec_legacy_3d() {
        let spec = InterfaceSpec::parse("hub:3D").unwrap();
        assert_eq!(spec.dimensions, 6);
    }

    #[test]
    fn test_interface_spec_rejects_garbage() {
        assert!(InterfaceSpec::parse("").is_err());
        assert!(InterfaceSpec::parse("x:seven").is_err());
        assert!(InterfaceSpec::parse("x:2").is_err());
        assert!(InterfaceSpec::parse("x:6:sideways").is_err());
    }

    #[test]
    fn test_parameter_spec_split() {
        assert_eq!(parse_parameter_spec("mass:12.5"), ("mass", "12.5"));
        // Only the first colon separates; the rest belongs to the value.
        assert_eq!(parse_parameter_spec("path:a:b:c"), ("path", "a:b:c"));
        assert_eq!(parse_parameter_spec("flag"), ("flag", ""));
    }

    #[test]
    fn test_monitor_name_strips_suffix() {
        assert_eq!(parse_monitor_name("pump.flange:6"), "pump.flange");
        assert_eq!(parse_monitor_name("pump.flange"), "pump.flange");
    }

    #[test]
    fn test_connection_params_wire_size() {
        let params = ConnectionParams::default();
        assert_eq!(params.encode(false).len(), CONNECTION_PARAMS_SIZE);
        assert_eq!(params.encode(true).len(), CONNECTION_PARAMS_SIZE);
    }

    #[test]
    fn test_connection_params_roundtrip() {
        let params = ConnectionParams {
            delay: 1e-4,
            impedance: 2.5,
            rotational_impedance: 0.75,
            alpha: 0.1,
            component_position: [1.0, 2.0, 3.0],
            component_orientation: IDENTITY_3X3,
            nominal_position: [0.5, 0.0, -0.5],
            nominal_orientation: IDENTITY_3X3,
            mode: 1,
        };
        for big in [false, true] {
            let wire = params.encode(big);
            let back = ConnectionParams::decode(&wire, big).unwrap();
            assert_eq!(back, params);
        }
    }

    #[test]
    fn test_time_data_3d_roundtrip() {
        let data = TimeData3D {
            time: 0.25,
            position: [1.0, 2.0, 3.0],
            orientation: IDENTITY_3X3,
            velocity: [0.1, 0.2, 0.3, 0.0, 0.0, 0.0],
        };
        for big in [false, true] {
            let wire = data.encode(big);
            assert_eq!(wire.len(), TIME_DATA_3D_SIZE);
            assert_eq!(TimeData3D::decode(&wire, big).unwrap(), data);
        }
    }

    #[test]
    fn test_time_data_1d_normalises() {
        let data = TimeData1D {
            time: 1.5,
            position: 0.7,
            velocity: -0.2,
        };
        let full = data.into_3d();
        assert_eq!(full.time, 1.5);
        assert_eq!(full.position, [0.7, 0.0, 0.0]);
        assert_eq!(full.orientation, IDENTITY_3X3);
        assert_eq!(full.velocity, [-0.2, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_time_data_signal_normalises() {
        let data = TimeDataSignal {
            time: 2.0,
            value: 42.0,
        };
        let full = data.into_3d();
        assert_eq!(full.time, 2.0);
        assert_eq!(full.position, [0.0; 3]);
        assert_eq!(full.orientation, IDENTITY_3X3);
        assert_eq!(full.velocity, [0.0; 6]);
    }

    #[test]
    fn test_big_endian_payload_decodes_on_little_host() {
        // A big-endian sender and a little-endian sender carrying the same
        // values must decode to bit-identical doubles.
        let data = TimeData3D {
            time: 0.125,
            position: [1.0, 2.0, 3.0],
            orientation: IDENTITY_3X3,
            velocity: [0.0; 6],
        };
        let from_big = TimeData3D::decode(&data.encode(true), true).unwrap();
        let from_little = TimeData3D::decode(&data.encode(false), false).unwrap();
        assert_eq!(from_big, from_little);
    }
}
