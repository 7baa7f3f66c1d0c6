// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Manager orchestration: thread lifecycle, shared session state and the
//! writer loop.
//!
//! [`Manager::run`] executes the protocols in order - startup, check,
//! simulate - by spawning three workers over shared state:
//!
//! - *reader*: startup registration state machine, then run-phase routing
//! - *writer*: drains the message queue onto the destination sockets
//! - *monitor* (co-simulation only): accepts observers on a second port
//!
//! A worker never terminates the process. Failures are pushed into a shared
//! error buffer, the queue is terminated and every socket is shut down,
//! which unblocks the other workers; after joining, `run()` re-raises the
//! captured errors.

mod monitor;
mod registration;
mod routing;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::model::CompositeModel;
use crate::net::{SocketHandle, SocketSet, StreamTable};
use crate::protocol::codec::{self, FrameDecoder};
use crate::protocol::{local_big_endian, MessageHeader, MessageKind};
use crate::queue::MessageQueue;
use crate::{ManagerError, Result};

use self::monitor::MonitorRoster;

/// What the manager does with run-phase time data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationMode {
    /// Forward frames between paired client interfaces.
    CoSimulation,
    /// Ingest frames into the model only, creating declared entities on
    /// the fly.
    InterfaceRequest,
}

/// Session phase, observed by every worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunPhase {
    Startup,
    Run,
    Shutdown,
}

/// Atomic wrapper so workers can watch the phase without locks.
#[derive(Debug)]
pub(crate) struct PhaseFlag(AtomicU8);

impl PhaseFlag {
    fn new() -> Self {
        Self(AtomicU8::new(RunPhase::Startup as u8))
    }

    pub(crate) fn set(&self, phase: RunPhase) {
        self.0.store(phase as u8, Ordering::Release);
    }

    pub(crate) fn get(&self) -> RunPhase {
        match self.0.load(Ordering::Acquire) {
            0 => RunPhase::Startup,
            1 => RunPhase::Run,
            _ => RunPhase::Shutdown,
        }
    }
}

/// State shared by every worker thread of one session.
pub(crate) struct Ctx {
    pub(crate) mode: CommunicationMode,
    pub(crate) config: ManagerConfig,
    pub(crate) model: Arc<RwLock<CompositeModel>>,
    pub(crate) queue: MessageQueue,
    pub(crate) streams: Arc<StreamTable>,
    pub(crate) phase: PhaseFlag,
    pub(crate) roster: Mutex<MonitorRoster>,
    /// True when no monitor can receive fan-out (port unconfigured, or all
    /// monitors have left); routing skips the fan-out branch entirely.
    pub(crate) monitors_offline: AtomicBool,
    errors: Mutex<Vec<String>>,
}

impl Ctx {
    /// Capture a worker failure and force the session down.
    fn fail(&self, who: &str, err: ManagerError) {
        error!(thread = who, error = %err, "worker thread failed");
        let mut errors = self.errors.lock();
        errors.push(format!("{}: {}", who, err));
        self.phase.set(RunPhase::Shutdown);
        self.queue.terminate();
        self.streams.shutdown_all();
    }

    fn record_panic(&self, who: &str) {
        let mut errors = self.errors.lock();
        errors.push(format!("{}: thread panicked", who));
        self.phase.set(RunPhase::Shutdown);
        self.queue.terminate();
        self.streams.shutdown_all();
    }

    /// Whether another worker already forced the session down.
    pub(crate) fn shutting_down(&self) -> bool {
        self.phase.get() == RunPhase::Shutdown
    }
}

/// The coupling manager. Owns the composite model and drives one session
/// per [`Manager::run`] call.
pub struct Manager {
    model: Arc<RwLock<CompositeModel>>,
    config: ManagerConfig,
}

impl Manager {
    /// Wrap a loaded model with the given configuration.
    pub fn new(model: CompositeModel, config: ManagerConfig) -> Self {
        Self {
            model: Arc::new(RwLock::new(model)),
            config,
        }
    }

    /// Shared handle to the model; the bound ports appear in its
    /// simulation parameters once `run()` has started.
    pub fn model(&self) -> &Arc<RwLock<CompositeModel>> {
        &self.model
    }

    /// Execute a full session: bind, register every component, then route
    /// (or ingest) time data until every client has closed.
    ///
    /// Returns when the session is over; any worker-thread failure is
    /// re-raised here.
    pub fn run(&self, mode: CommunicationMode) -> Result<()> {
        self.config.validate()?;

        let streams = Arc::new(StreamTable::new());
        let port = self.model.read().sim_params().port();
        let sock_set = SocketSet::bind(port, Arc::clone(&streams))?;
        self.model
            .write()
            .sim_params_mut()
            .set_port(sock_set.port());
        info!(port = sock_set.port(), "manager listening");

        let monitor_port = self.model.read().sim_params().monitor_port();
        let monitors_enabled = mode == CommunicationMode::CoSimulation && monitor_port != 0;

        let ctx = Arc::new(Ctx {
            mode,
            config: self.config.clone(),
            model: Arc::clone(&self.model),
            queue: MessageQueue::new(self.config.queue_slots, self.config.payload_capacity),
            streams,
            phase: PhaseFlag::new(),
            roster: Mutex::new(MonitorRoster::new()),
            monitors_offline: AtomicBool::new(!monitors_enabled),
            errors: Mutex::new(Vec::new()),
        });

        let mut workers = Vec::new();

        if monitors_enabled {
            let c = Arc::clone(&ctx);
            workers.push((
                "monitor",
                thread::Builder::new()
                    .name("tlm-monitor".to_string())
                    .spawn(move || {
                        if let Err(e) = monitor::monitor_thread(&c) {
                            c.fail("monitor", e);
                        }
                    })?,
            ));
        }

        let c = Arc::clone(&ctx);
        workers.push((
            "reader",
            thread::Builder::new()
                .name("tlm-reader".to_string())
                .spawn(move || {
                    if let Err(e) = reader_thread(&c, sock_set) {
                        c.fail("reader", e);
                    }
                })?,
        ));

        let c = Arc::clone(&ctx);
        workers.push((
            "writer",
            thread::Builder::new()
                .name("tlm-writer".to_string())
                .spawn(move || {
                    if let Err(e) = writer_thread(&c) {
                        c.fail("writer", e);
                    }
                })?,
        ));

        for (who, handle) in workers {
            if handle.join().is_err() {
                ctx.record_panic(who);
            }
        }

        let errors = ctx.errors.lock();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ManagerError::Session(errors.join("; ")))
        }
    }
}

/// Reader worker: startup protocol, check-model rendezvous, then the
/// run-phase loop.
fn reader_thread(ctx: &Arc<Ctx>, mut sock_set: SocketSet) -> Result<()> {
    let mut decoders: HashMap<SocketHandle, FrameDecoder> = HashMap::new();

    registration::run_startup(ctx, &mut sock_set, &mut decoders)?;
    if ctx.shutting_down() {
        return Ok(());
    }

    let status = ctx.model.read().check_proxy_comm();

    // Every component gets the global status in the interface-id field.
    let component_count = ctx.model.read().component_count() as i32;
    for comp_id in 0..component_count {
        let socket = match ctx.model.read().component(comp_id) {
            Some(comp) => comp.socket(),
            None => continue,
        };
        let mut msg = ctx.queue.acquire_read();
        msg.socket = socket;
        msg.header = MessageHeader {
            kind: MessageKind::CheckModel,
            interface_id: i32::from(status),
            parameter_id: 0,
            source_big_endian: local_big_endian(),
            data_size: 0,
        };
        msg.data.clear();
        ctx.queue.publish_write(msg);
    }

    if !status {
        error!("composite model check failed, aborting before the run phase");
        ctx.phase.set(RunPhase::Shutdown);
        ctx.queue.terminate();
        return Ok(());
    }

    info!("starting time data exchange");
    sock_set.switch_to_running_mode();
    ctx.phase.set(RunPhase::Run);

    routing::run_loop(ctx, &mut sock_set, &mut decoders)
}

/// Writer worker: transmit queued messages until the queue terminates.
fn writer_thread(ctx: &Ctx) -> Result<()> {
    info!("manager is ready to send messages");
    while let Some(msg) = ctx.queue.take_write() {
        if msg.socket < 0 {
            // Marked for discard by the routing engine.
            ctx.queue.release(msg);
            continue;
        }
        match ctx.streams.get(msg.socket) {
            None => {
                debug!(socket = msg.socket, "destination socket gone, dropping frame");
            }
            Some(stream) => {
                if let Err(e) = codec::send_message(&stream, &msg.header, &msg.data) {
                    warn!(socket = msg.socket, error = %e, "write failed, closing socket");
                    if let Some(stream) = ctx.streams.remove(msg.socket) {
                        let _ = stream.shutdown(std::net::Shutdown::Both);
                    }
                }
            }
        }
        ctx.queue.release(msg);
    }
    Ok(())
}
