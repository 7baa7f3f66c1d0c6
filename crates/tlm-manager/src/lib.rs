// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # TLM Manager - coupling broker for TLM co-simulation
//!
//! The manager is the central process of a Transmission-Line-Modelling
//! co-simulation. Independently running simulator clients connect over TCP,
//! register their named components, interfaces and parameters against a
//! pre-loaded [`CompositeModel`], and - once every component has checked in -
//! exchange time-stamped state frames that the manager forwards between
//! paired interfaces and copies to passive monitoring observers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tlm_manager::{
//!     CompositeModel, CommunicationMode, ConnectionParams, Manager,
//!     ManagerConfig, SimulationParams,
//! };
//!
//! fn main() -> tlm_manager::Result<()> {
//!     let mut model = CompositeModel::new(SimulationParams::default());
//!     let pump = model.add_component("pump");
//!     let pipe = model.add_component("pipe");
//!     model.add_interface(pump, "flange", 6, tlm_manager::Causality::Bidirectional, "mechanical")?;
//!     model.add_interface(pipe, "flange", 6, tlm_manager::Causality::Bidirectional, "mechanical")?;
//!     model.connect("pump.flange", "pipe.flange", ConnectionParams::with_delay(1e-4))?;
//!
//!     let manager = Manager::new(model, ManagerConfig::default());
//!     manager.run(CommunicationMode::CoSimulation)
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                            Manager                                 |
//! |                                                                    |
//! |  client --> SocketSet --> reader thread --> routing --+            |
//! |                            (startup state machine)    |            |
//! |                                                       v            |
//! |  monitor -> SocketSet --> monitor thread --------> MessageQueue    |
//! |                            (subscriptions)            |            |
//! |                                                       v            |
//! |  client <---------------- writer thread <-------- take_write       |
//! +--------------------------------------------------------------------+
//! ```
//!
//! Three worker threads share the model and a bounded queue of reusable
//! message buffers: the *reader* runs the startup registration protocol and
//! then the forwarding loop, the *writer* drains the queue onto the sockets,
//! and the optional *monitor* thread accepts observers on a second port.
//! The orchestrator ([`Manager::run`]) spawns and joins all of them and
//! re-raises the first error any of them captured.

pub mod config;
pub mod manager;
pub mod model;
pub mod net;
pub mod protocol;
pub mod queue;

use std::time::Duration;

pub use config::ManagerConfig;
pub use manager::{CommunicationMode, Manager};
pub use model::{
    CompositeModel, ComponentProxy, Connection, InterfaceProxy, ParameterProxy, SimulationParams,
};
pub use net::{SocketHandle, INVALID_SOCKET};
pub use protocol::{
    Causality, ConnectionParams, InterfaceSpec, MessageHeader, MessageKind, TimeData1D, TimeData3D,
    TimeDataSignal,
};
pub use queue::{Message, MessageQueue};

/// Errors surfaced by the manager.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Socket or poll failure outside an established client connection.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Could not bind a listening socket.
    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        /// Requested port (0 = OS-chosen).
        port: u16,
        /// Underlying bind error.
        source: std::io::Error,
    },

    /// A client spoke out of turn or sent a malformed registration.
    /// Fatal for the session.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Not every component registered and checked in within the configured
    /// startup timeout.
    #[error("startup timeout: components failed to register within {limit:?}")]
    StartupTimeout {
        /// Timeout taken from the model's simulation parameters.
        limit: Duration,
    },

    /// Inconsistent composite model (duplicate entity, bad reference, ...).
    #[error("invalid model: {0}")]
    Model(String),

    /// Rejected manager configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// One or more worker threads failed; the message aggregates every
    /// captured error in arrival order.
    #[error("session aborted: {0}")]
    Session(String),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, ManagerError>;
