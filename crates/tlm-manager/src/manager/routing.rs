// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Run-phase message routing and the close protocol.
//!
//! In co-simulation mode every `TimeData` frame is re-addressed to the
//! paired interface's component socket and queued for the writer; payload
//! bytes and the endian flag transit untouched, the destination client
//! reconciles byte order itself. Frames for unknown or unpaired interfaces
//! are stamped for discard and warned about. Each routed frame also
//! branches into the monitor fan-out, keyed by the destination interface.
//!
//! In interface-request mode nothing is forwarded: frames are decoded by
//! the source interface's declared shape and stored into its canonical
//! time-zero slot.
//!
//! The loop runs until every component (and every connected monitor) has
//! requested close or vanished; announced closers then receive
//! `ClosePermission` directly on their socket, bypassing the queue.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::TcpStream;
use tracing::{debug, info, warn};

use crate::net::{SocketHandle, SocketSet};
use crate::protocol::codec::{self, DecodeStatus, FrameDecoder};
use crate::protocol::{
    Causality, MessageHeader, MessageKind, TimeData1D, TimeData3D, TimeDataSignal,
};
use crate::queue::Message;
use crate::{ManagerError, Result};

use super::{monitor, CommunicationMode, Ctx, RunPhase};

/// Drive the run phase to completion, then tear the session down.
pub(super) fn run_loop(
    ctx: &Ctx,
    sock_set: &mut SocketSet,
    decoders: &mut HashMap<SocketHandle, FrameDecoder>,
) -> Result<()> {
    let component_count = ctx.model.read().component_count();

    // Components that sent a close request, in arrival order; they get a
    // permission reply. `closed` additionally covers unannounced closes.
    let mut announced: Vec<i32> = Vec::new();
    let mut closed: HashSet<i32> = HashSet::new();

    while closed.len() < component_count || monitors_pending(ctx) {
        if ctx.shutting_down() {
            return Ok(());
        }
        sock_set.select_readable(ctx.config.poll_interval())?;

        for comp_id in 0..component_count as i32 {
            if closed.contains(&comp_id) {
                continue;
            }
            let socket = match ctx.model.read().component(comp_id) {
                Some(comp) => comp.socket(),
                None => continue,
            };
            if socket < 0 || !sock_set.has_data(socket) {
                continue;
            }
            let Some(stream) = ctx.streams.get(socket) else {
                // Shut down underneath us (writer-side failure).
                closed.insert(comp_id);
                sock_set.drop_active(socket);
                decoders.remove(&socket);
                continue;
            };

            loop {
                let Some(decoder) = decoders.get_mut(&socket) else {
                    sock_set.clear_data(socket);
                    break;
                };
                let mut msg = ctx.queue.acquire_read();
                let mut reader: &TcpStream = &stream;
                match decoder.read_message(&mut reader, &mut msg.header, &mut msg.data) {
                    Ok(DecodeStatus::Pending) => {
                        ctx.queue.release(msg);
                        sock_set.clear_data(socket);
                        break;
                    }
                    Ok(DecodeStatus::Complete) => {
                        msg.socket = socket;
                        if msg.header.kind == MessageKind::CloseRequest {
                            ctx.queue.release(msg);
                            info!(
                                component = %component_name(ctx, comp_id),
                                "received close request"
                            );
                            announced.push(comp_id);
                            closed.insert(comp_id);
                            break;
                        }
                        handle_time_data(ctx, comp_id, msg)?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                        ctx.queue.release(msg);
                        return Err(ManagerError::Protocol(format!(
                            "malformed message from component {}: {}",
                            component_name(ctx, comp_id),
                            e
                        )));
                    }
                    Err(_) => {
                        // Unannounced close: counts toward the quorum but
                        // earns no permission reply.
                        ctx.queue.release(msg);
                        warn!(
                            component = %component_name(ctx, comp_id),
                            "socket closed without permission"
                        );
                        closed.insert(comp_id);
                        sock_set.drop_active(socket);
                        if let Some(stream) = ctx.streams.remove(socket) {
                            let _ = stream.shutdown(std::net::Shutdown::Both);
                        }
                        decoders.remove(&socket);
                        break;
                    }
                }
            }
        }
    }

    finish_session(ctx, sock_set, &announced);
    Ok(())
}

/// Whether connected monitors still owe a close request.
fn monitors_pending(ctx: &Ctx) -> bool {
    let roster = ctx.roster.lock();
    roster.pending_close()
}

/// Route (co-simulation) or ingest (interface-request) one time-data frame.
fn handle_time_data(ctx: &Ctx, comp_id: i32, msg: Box<Message>) -> Result<()> {
    if msg.header.kind != MessageKind::TimeData {
        let kind = msg.header.kind;
        ctx.queue.release(msg);
        return Err(ManagerError::Protocol(format!(
            "unexpected {:?} from component {} during the run phase",
            kind,
            component_name(ctx, comp_id),
        )));
    }
    match ctx.mode {
        CommunicationMode::CoSimulation => {
            route_time_data(ctx, msg);
            Ok(())
        }
        CommunicationMode::InterfaceRequest => {
            store_time_data(ctx, &msg);
            ctx.queue.release(msg);
            Ok(())
        }
    }
}

/// Re-address a frame to the paired interface and queue it; fan a copy out
/// to the monitors of the destination. Payload and endian flag stay as the
/// source sent them.
fn route_time_data(ctx: &Ctx, mut msg: Box<Message>) {
    let source_id = msg.header.interface_id;
    let destination = {
        let model = ctx.model.read();
        model.linked_interface(source_id).map(|dest_id| {
            let dest_socket = model
                .interface(dest_id)
                .and_then(|ifc| model.component(ifc.component_id()))
                .map(|comp| comp.socket())
                .unwrap_or(crate::net::INVALID_SOCKET);
            (dest_id, dest_socket)
        })
    };

    match destination {
        None => {
            warn!(
                interface = source_id,
                "received time data for an unconnected interface, ignored"
            );
            msg.socket = crate::net::INVALID_SOCKET;
            msg.header.interface_id = -1;
            ctx.queue.publish_write(msg);
        }
        Some((dest_id, dest_socket)) => {
            // Monitors see the frame under the destination id, i.e. the
            // value the paired component is about to consume.
            monitor::forward_to_monitor(ctx, dest_id, &msg.header, &msg.data);

            debug!(source = source_id, destination = dest_id, "forwarding time data");
            msg.header.interface_id = dest_id;
            msg.socket = dest_socket;
            ctx.queue.publish_write(msg);
        }
    }
}

/// Interface-request mode: decode the payload by the source interface's
/// declared shape and store it in the canonical 3-D time-zero slot.
fn store_time_data(ctx: &Ctx, msg: &Message) {
    let big = msg.header.source_big_endian;
    let interface_id = msg.header.interface_id;

    let shape = {
        let model = ctx.model.read();
        model
            .interface(interface_id)
            .map(|ifc| (ifc.dimensions(), ifc.causality()))
    };
    let Some((dimensions, causality)) = shape else {
        warn!(interface = interface_id, "time data for an unknown interface, ignored");
        return;
    };

    let decoded = if dimensions == 6 && causality == Causality::Bidirectional {
        TimeData3D::decode(&msg.data, big)
    } else if dimensions == 1 && causality == Causality::Bidirectional {
        TimeData1D::decode(&msg.data, big).map(TimeData1D::into_3d)
    } else {
        TimeDataSignal::decode(&msg.data, big).map(TimeDataSignal::into_3d)
    };

    match decoded {
        Ok(data) => {
            debug!(interface = interface_id, time = data.time, "stored time data");
            let _ = ctx.model.write().set_interface_time0(interface_id, data);
        }
        Err(e) => {
            warn!(interface = interface_id, error = %e, "undecodable time data, ignored");
        }
    }
}

/// Send close permissions, detach every socket and terminate the queue.
fn finish_session(ctx: &Ctx, sock_set: &mut SocketSet, announced: &[i32]) {
    info!("simulation complete");

    for &comp_id in announced {
        let socket = match ctx.model.read().component(comp_id) {
            Some(comp) => comp.socket(),
            None => continue,
        };
        if socket < 0 {
            continue;
        }
        let name = component_name(ctx, comp_id);
        info!(component = %name, "sending close permission");
        send_permission(ctx, socket);
        sock_set.drop_active(socket);
        ctx.model.write().clear_socket(comp_id);
        info!(component = %name, "connection closed");
    }

    // Monitors that asked to leave get their permission too; the roster
    // lock is released before the writes so the monitor thread never
    // contends with a blocking send.
    let disconnected: Vec<SocketHandle> = ctx.roster.lock().disconnected().to_vec();
    for handle in disconnected {
        info!(socket = handle, "sending close permission to monitor");
        send_permission(ctx, handle);
    }
    ctx.monitors_offline
        .store(true, std::sync::atomic::Ordering::Release);

    ctx.phase.set(RunPhase::Shutdown);
    ctx.queue.terminate();
    sock_set.close_all();
    info!("all sockets are closed");
}

/// Direct send, bypassing the queue; failures only cost the permission.
fn send_permission(ctx: &Ctx, socket: SocketHandle) {
    let Some(stream) = ctx.streams.get(socket) else {
        return;
    };
    let header = MessageHeader::reply(MessageKind::ClosePermission);
    if let Err(e) = codec::send_message(&stream, &header, &[]) {
        warn!(socket, error = %e, "failed to deliver close permission");
    }
}

fn component_name(ctx: &Ctx, comp_id: i32) -> String {
    ctx.model
        .read()
        .component(comp_id)
        .map(|c| c.name().to_string())
        .unwrap_or_else(|| format!("#{}", comp_id))
}
