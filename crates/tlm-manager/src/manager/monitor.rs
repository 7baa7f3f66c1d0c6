// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monitor engine: passive observers of the routed traffic.
//!
//! A dedicated thread listens on a second port. Observers register the full
//! `component.interface` names they want to watch and receive the same
//! coupling parameters the owning component got; thereafter every frame
//! routed *to* that interface is copied to them (monitors see the value the
//! paired component is about to consume).
//!
//! The subscription multimap is the only state shared between the monitor
//! thread (which mutates it) and the reader thread (which fans out under
//! it); one mutex guards the whole roster. A fan-out failure never touches
//! the primary forward path.

use std::collections::HashMap;
use std::io;
use std::net::TcpStream;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::net::{SocketHandle, SocketSet};
use crate::protocol::codec::{DecodeStatus, FrameDecoder};
use crate::protocol::{local_big_endian, parse_monitor_name, MessageHeader, MessageKind};
use crate::queue::Message;
use crate::{ManagerError, Result};

use super::{registration, Ctx, RunPhase};

/// Sleep between checks while a monitored interface is not yet connected.
const CONNECT_WAIT: Duration = Duration::from_millis(10);

/// Observer bookkeeping, guarded by one mutex in [`Ctx`].
#[derive(Debug, Default)]
pub(crate) struct MonitorRoster {
    /// interface id -> observer sockets watching it.
    subscriptions: HashMap<i32, Vec<SocketHandle>>,
    /// Every currently accepted observer socket.
    connected: Vec<SocketHandle>,
    /// Observers that sent a close request, in arrival order.
    disconnected: Vec<SocketHandle>,
}

impl MonitorRoster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether a connected observer has not requested close yet.
    pub(crate) fn pending_close(&self) -> bool {
        self.disconnected.len() < self.connected.len()
    }

    /// Observers owed a close permission.
    pub(crate) fn disconnected(&self) -> &[SocketHandle] {
        &self.disconnected
    }

    fn add_monitor(&mut self, handle: SocketHandle) {
        self.connected.push(handle);
    }

    fn subscribe(&mut self, interface_id: i32, handle: SocketHandle) {
        self.subscriptions
            .entry(interface_id)
            .or_default()
            .push(handle);
    }

    fn request_close(&mut self, handle: SocketHandle) {
        self.disconnected.push(handle);
    }

    /// Drop a crashed observer everywhere so the close quorum stays
    /// reachable.
    fn forget(&mut self, handle: SocketHandle) {
        self.connected.retain(|&h| h != handle);
        self.disconnected.retain(|&h| h != handle);
        for subscribers in self.subscriptions.values_mut() {
            subscribers.retain(|&h| h != handle);
        }
    }

    fn subscribers(&self, interface_id: i32) -> Option<&[SocketHandle]> {
        self.subscriptions
            .get(&interface_id)
            .map(|subs| subs.as_slice())
    }
}

/// Copy a routed frame to every observer of the destination interface.
/// Called by the routing engine with the frame still addressed as the
/// source sent it.
pub(crate) fn forward_to_monitor(
    ctx: &Ctx,
    dest_interface: i32,
    header: &MessageHeader,
    data: &[u8],
) {
    if ctx.monitors_offline.load(Ordering::Acquire) {
        return;
    }
    let roster = ctx.roster.lock();
    let Some(subscribers) = roster.subscribers(dest_interface) else {
        return;
    };
    for &handle in subscribers {
        let mut copy = ctx.queue.acquire_read();
        copy.socket = handle;
        copy.header = *header;
        copy.header.interface_id = dest_interface;
        copy.header.data_size = data.len();
        copy.data.clear();
        copy.data.extend_from_slice(data);
        ctx.queue.publish_write(copy);
    }
}

/// Monitor worker: accept observers and serve their registrations until
/// the session shuts down.
pub(super) fn monitor_thread(ctx: &Arc<Ctx>) -> Result<()> {
    let monitor_port = ctx.model.read().sim_params().monitor_port();
    if monitor_port == 0 {
        info!("monitoring disabled");
        return Ok(());
    }

    let mut sock_set = SocketSet::bind(monitor_port, Arc::clone(&ctx.streams))?;
    if sock_set.port() != monitor_port {
        warn!(port = sock_set.port(), "monitoring moved to a free port");
    }
    ctx.model
        .write()
        .sim_params_mut()
        .set_monitor_port(sock_set.port());
    info!(port = sock_set.port(), "waiting for monitor connections");

    let mut decoders: HashMap<SocketHandle, FrameDecoder> = HashMap::new();

    while ctx.phase.get() != RunPhase::Shutdown && !ctx.monitors_offline.load(Ordering::Acquire) {
        sock_set.select_readable(ctx.config.poll_interval())?;
        if ctx.phase.get() == RunPhase::Shutdown {
            break;
        }

        while sock_set.has_pending_accept() {
            match sock_set.accept_client()? {
                Some(handle) => {
                    info!(socket = handle, "monitor connected");
                    decoders.insert(handle, FrameDecoder::new(ctx.config.max_message_size));
                    ctx.roster.lock().add_monitor(handle);
                }
                None => break,
            }
        }

        for handle in sock_set.ready_handles() {
            let Some(stream) = ctx.streams.get(handle) else {
                sock_set.clear_data(handle);
                continue;
            };

            loop {
                let Some(decoder) = decoders.get_mut(&handle) else {
                    sock_set.clear_data(handle);
                    break;
                };
                let mut msg = ctx.queue.acquire_read();
                let mut reader: &TcpStream = &stream;
                match decoder.read_message(&mut reader, &mut msg.header, &mut msg.data) {
                    Ok(DecodeStatus::Pending) => {
                        ctx.queue.release(msg);
                        sock_set.clear_data(handle);
                        break;
                    }
                    Ok(DecodeStatus::Complete) => {
                        msg.socket = handle;
                        match msg.header.kind {
                            MessageKind::CheckModel => {
                                // Out-of-protocol probe; answer and move on.
                                warn!(
                                    socket = handle,
                                    "unexpected check-model on the monitoring port, answering"
                                );
                                msg.header = MessageHeader::reply(MessageKind::CheckModel);
                                msg.header.interface_id = 1;
                                msg.data.clear();
                                ctx.queue.publish_write(msg);
                            }
                            MessageKind::CloseRequest => {
                                info!(socket = handle, "monitor requested close");
                                ctx.queue.release(msg);
                                ctx.roster.lock().request_close(handle);
                                break;
                            }
                            MessageKind::RegInterface => {
                                process_monitor_registration(ctx, handle, msg)?;
                            }
                            other => {
                                ctx.queue.release(msg);
                                return Err(ManagerError::Protocol(format!(
                                    "unexpected {:?} on the monitoring port",
                                    other
                                )));
                            }
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                        ctx.queue.release(msg);
                        return Err(ManagerError::Protocol(format!(
                            "malformed message from monitor socket {}: {}",
                            handle, e
                        )));
                    }
                    Err(_) => {
                        ctx.queue.release(msg);
                        warn!(socket = handle, "monitor disconnected");
                        sock_set.drop_active(handle);
                        if let Some(stream) = ctx.streams.remove(handle) {
                            let _ = stream.shutdown(std::net::Shutdown::Both);
                        }
                        decoders.remove(&handle);
                        ctx.roster.lock().forget(handle);
                        break;
                    }
                }
            }
        }
    }

    sock_set.close_all();
    info!("monitoring stopped");
    Ok(())
}

/// Serve one observer registration: resolve the full interface name, wait
/// for the primary connection, subscribe the observer and reply with the
/// same coupling parameters the component received. The subscription is
/// entered before the reply is published, so no frame routed after the
/// reply can miss the observer.
fn process_monitor_registration(ctx: &Ctx, handle: SocketHandle, msg: Box<Message>) -> Result<()> {
    let raw = match std::str::from_utf8(&msg.data) {
        Ok(raw) => raw.to_string(),
        Err(_) => {
            ctx.queue.release(msg);
            return Err(ManagerError::Protocol(
                "monitor registration is not valid utf-8".into(),
            ));
        }
    };
    let full_name = parse_monitor_name(&raw).to_string();
    info!(socket = handle, interface = %full_name, "monitor registration");

    let mut msg = msg;
    msg.header.source_big_endian = local_big_endian();
    msg.data.clear();

    let Some(interface_id) = ctx.model.read().interface_id_by_full_name(&full_name) else {
        warn!(interface = %full_name, "not in the composite model, monitoring refused");
        msg.header.interface_id = -1;
        msg.header.data_size = 0;
        ctx.queue.publish_write(msg);
        return Ok(());
    };

    // Monitors join only after the primary connection exists for the
    // interface; the registration may be early, so wait it out.
    loop {
        let connected = ctx
            .model
            .read()
            .interface(interface_id)
            .map(|ifc| ifc.connected())
            .unwrap_or(false);
        if connected {
            break;
        }
        if ctx.phase.get() == RunPhase::Shutdown {
            ctx.queue.release(msg);
            return Ok(());
        }
        thread::sleep(CONNECT_WAIT);
    }

    msg.header.interface_id = interface_id;
    let params = {
        let model = ctx.model.read();
        registration::connection_reply_params(&model, interface_id)
    };
    match params {
        None => {
            warn!(interface = %full_name, "interface is not part of a connection");
            msg.header.interface_id = -1;
        }
        Some(params) => {
            msg.data
                .extend_from_slice(&params.encode(local_big_endian()));
        }
    }
    msg.header.data_size = msg.data.len();

    if msg.header.interface_id >= 0 {
        ctx.roster.lock().subscribe(interface_id, handle);
    }
    ctx.queue.publish_write(msg);
    Ok(())
}
