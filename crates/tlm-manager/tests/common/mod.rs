// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking mock client for exercising a live manager over loopback.
//!
//! The client speaks the wire protocol from scratch (its own header
//! encode/decode, its own endianness handling) so the tests check the wire
//! contract rather than the crate against itself.

#![allow(dead_code)]

use parking_lot::RwLock;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tlm_manager::{
    Causality, CommunicationMode, CompositeModel, ConnectionParams, Manager, ManagerConfig,
    SimulationParams, TimeData3D,
};

pub const REG_COMPONENT: i32 = 1;
pub const REG_INTERFACE: i32 = 2;
pub const REG_PARAMETER: i32 = 3;
pub const CHECK_MODEL: i32 = 4;
pub const TIME_DATA: i32 = 5;
pub const CLOSE_REQUEST: i32 = 6;
pub const CLOSE_PERMISSION: i32 = 7;

const IO_TIMEOUT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(5);

/// Header fields as read off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    pub kind: i32,
    pub interface_id: i32,
    pub parameter_id: i32,
    pub big: bool,
    pub size: usize,
}

/// One mock simulator (or monitor) connection.
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    /// Connect to the manager, retrying while the listener comes up.
    pub fn connect(port: u16) -> Self {
        let deadline = Instant::now() + IO_TIMEOUT;
        loop {
            match TcpStream::connect(("127.0.0.1", port)) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
                    stream.set_nodelay(true).unwrap();
                    return Self { stream };
                }
                Err(e) => {
                    assert!(Instant::now() < deadline, "connect to {} failed: {}", port, e);
                    std::thread::sleep(POLL);
                }
            }
        }
    }

    /// Send one framed message in the chosen byte order.
    pub fn send(&mut self, kind: i32, interface_id: i32, parameter_id: i32, big: bool, payload: &[u8]) {
        let mut frame = Vec::with_capacity(20 + payload.len());
        let fields = [
            kind,
            interface_id,
            parameter_id,
            i32::from(big),
            payload.len() as i32,
        ];
        for field in fields {
            let bytes = if big {
                field.to_be_bytes()
            } else {
                field.to_le_bytes()
            };
            frame.extend_from_slice(&bytes);
        }
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).unwrap();
    }

    /// Read one framed message, decoding the header by its endian flag.
    pub fn recv(&mut self) -> (RawHeader, Vec<u8>) {
        let mut raw = [0u8; 20];
        self.stream.read_exact(&mut raw).unwrap();
        let big = raw[12..16].iter().any(|&b| b != 0);
        let field = |at: usize| {
            let bytes = [raw[at], raw[at + 1], raw[at + 2], raw[at + 3]];
            if big {
                i32::from_be_bytes(bytes)
            } else {
                i32::from_le_bytes(bytes)
            }
        };
        let size = field(16) as usize;
        let mut payload = vec![0u8; size];
        self.stream.read_exact(&mut payload).unwrap();
        (
            RawHeader {
                kind: field(0),
                interface_id: field(4),
                parameter_id: field(8),
                big,
                size,
            },
            payload,
        )
    }

    /// Register this connection as `name`; returns the assigned component
    /// id from the reply.
    pub fn register_component(&mut self, name: &str) -> i32 {
        self.send(REG_COMPONENT, 0, 0, false, name.as_bytes());
        let (header, payload) = self.recv();
        assert_eq!(header.kind, REG_COMPONENT);
        assert!(payload.is_empty());
        header.interface_id
    }

    /// Register an interface; returns the reply header and payload.
    pub fn register_interface(&mut self, spec: &str) -> (RawHeader, Vec<u8>) {
        self.send(REG_INTERFACE, 0, 0, false, spec.as_bytes());
        let reply = self.recv();
        assert_eq!(reply.0.kind, REG_INTERFACE);
        reply
    }

    /// Register a parameter; returns the reply header and payload.
    pub fn register_parameter(&mut self, spec: &str) -> (RawHeader, Vec<u8>) {
        self.send(REG_PARAMETER, 0, 0, false, spec.as_bytes());
        let reply = self.recv();
        assert_eq!(reply.0.kind, REG_PARAMETER);
        reply
    }

    /// Send the check-model message; the reply is deferred until every
    /// component has checked in, so it is read separately.
    pub fn send_check_model(&mut self) {
        self.send(CHECK_MODEL, 0, 0, false, &[]);
    }

    /// Await the deferred check-model reply; returns the status word.
    pub fn recv_check_model(&mut self) -> i32 {
        let (header, _) = self.recv();
        assert_eq!(header.kind, CHECK_MODEL);
        header.interface_id
    }

    /// Ask to leave the session. The permission only arrives once every
    /// participant has asked, so it is awaited separately.
    pub fn request_close(&mut self) {
        self.send(CLOSE_REQUEST, 0, 0, false, &[]);
    }

    /// Await the close permission.
    pub fn await_close_permission(&mut self) {
        let (header, _) = self.recv();
        assert_eq!(header.kind, CLOSE_PERMISSION);
    }

    /// Request-and-await, for clients that are the last one out.
    pub fn close(&mut self) {
        self.request_close();
        self.await_close_permission();
    }
}

/// Shared handle to a running manager's model.
pub type SharedModel = Arc<RwLock<CompositeModel>>;

/// A manager session running on its own thread.
pub struct ManagerUnderTest {
    pub model: SharedModel,
    handle: JoinHandle<tlm_manager::Result<()>>,
}

impl ManagerUnderTest {
    /// Spawn `run(mode)` with the default configuration.
    pub fn start(model: CompositeModel, mode: CommunicationMode) -> Self {
        init_tracing();
        let manager = Manager::new(model, ManagerConfig::default());
        let model = manager.model().clone();
        let handle = std::thread::spawn(move || manager.run(mode));
        Self { model, handle }
    }

    /// The primary port, once the manager has published it.
    pub fn port(&self) -> u16 {
        wait_port(|| self.model.read().sim_params().port())
    }

    /// The monitor port from the model's simulation parameters.
    pub fn monitor_port(&self) -> u16 {
        wait_port(|| self.model.read().sim_params().monitor_port())
    }

    /// Join the session and require a clean exit.
    pub fn finish(self) {
        self.handle.join().unwrap().unwrap();
    }

    /// Join the session and return the failure it reported.
    pub fn finish_err(self) -> tlm_manager::ManagerError {
        self.handle.join().unwrap().unwrap_err()
    }
}

/// The delay configured on the test connection.
pub const LINE_DELAY: f64 = 1e-4;

/// A minimal coupled pair: components `A` and `B`, each with a 6-D
/// bidirectional interface `p`, connected. `B` carries a non-trivial
/// inertial transform and time-zero pose so replies are distinguishable.
pub fn two_component_model(monitor_port: u16) -> CompositeModel {
    let mut model = CompositeModel::new(SimulationParams::new(
        0,
        monitor_port,
        Duration::from_secs(10),
    ));
    let a = model.add_component("A");
    let b = model.add_component("B");
    model
        .add_interface(a, "p", 6, Causality::Bidirectional, "mechanical")
        .unwrap();
    let b_p = model
        .add_interface(b, "p", 6, Causality::Bidirectional, "mechanical")
        .unwrap();
    model
        .set_component_inertial(b, [0.1, 0.2, 0.3], tlm_manager::protocol::IDENTITY_3X3)
        .unwrap();
    let mut time0 = TimeData3D::default();
    time0.position = [9.0, 8.0, 7.0];
    model.set_interface_time0(b_p, time0).unwrap();
    model
        .connect("A.p", "B.p", ConnectionParams::with_delay(LINE_DELAY))
        .unwrap();
    model
}

/// A 19-double 3-D time-data payload in the chosen byte order.
pub fn encode_time_data_3d(
    big: bool,
    time: f64,
    position: [f64; 3],
    velocity: [f64; 6],
) -> Vec<u8> {
    let identity = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    let mut lanes = Vec::with_capacity(19);
    lanes.push(time);
    lanes.extend_from_slice(&position);
    lanes.extend_from_slice(&identity);
    lanes.extend_from_slice(&velocity);

    let mut out = Vec::with_capacity(19 * 8);
    for lane in lanes {
        let bytes = if big {
            lane.to_be_bytes()
        } else {
            lane.to_le_bytes()
        };
        out.extend_from_slice(&bytes);
    }
    out
}

/// A 2-double signal payload.
pub fn encode_time_data_signal(big: bool, time: f64, value: f64) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    for lane in [time, value] {
        let bytes = if big {
            lane.to_be_bytes()
        } else {
            lane.to_le_bytes()
        };
        out.extend_from_slice(&bytes);
    }
    out
}

/// Poll a port accessor until the manager has published a bound port.
pub fn wait_port<F: Fn() -> u16>(read_port: F) -> u16 {
    let deadline = Instant::now() + IO_TIMEOUT;
    loop {
        let port = read_port();
        if port != 0 {
            return port;
        }
        assert!(Instant::now() < deadline, "manager never published its port");
        std::thread::sleep(POLL);
    }
}

/// Reserve a free TCP port (for the monitor listener, where 0 would mean
/// "disabled" rather than "OS-chosen").
pub fn free_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Route manager logs through the test harness when `RUST_LOG` is set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
