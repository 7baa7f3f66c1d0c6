// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Startup registration protocol.
//!
//! Per component the protocol is a straight line:
//!
//! ```text
//! Unbound --RegComponent--> Bound --RegInterface/RegParameter*--> Registering
//!     Registering --CheckModel--> Ready
//! ```
//!
//! A freshly accepted socket is *unbound* until its first message names a
//! known component (the first read is deferred to the next readiness round,
//! so a silent client cannot stall the others). Interface registrations are
//! answered with the connection's coupling parameters; parameter
//! registrations with the manager-assigned value. `CheckModel` marks the
//! component ready; the reply is deferred until every component is ready
//! and carries the global model-check status.
//!
//! The whole startup is bounded by the wall-clock timeout from the model's
//! simulation parameters; exceeding it is fatal and closes every socket.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::TcpStream;
use std::time::Instant;
use tracing::{info, warn};

use crate::model::CompositeModel;
use crate::net::{SocketHandle, SocketSet};
use crate::protocol::codec::{DecodeStatus, FrameDecoder};
use crate::protocol::{
    local_big_endian, ConnectionParams, InterfaceSpec, MessageKind, parse_parameter_spec,
    PARAMETER_VALUE_SIZE,
};
use crate::queue::Message;
use crate::{ManagerError, Result};

use super::{CommunicationMode, Ctx};

/// What a dispatched startup message did to the per-socket state.
enum Dispatch {
    /// Keep draining this socket.
    Continue,
    /// The component checked in; leave any further bytes buffered for the
    /// run phase.
    ComponentReady,
}

/// Run the startup protocol until every component has registered and
/// checked in, or the timeout hits.
pub(super) fn run_startup(
    ctx: &Ctx,
    sock_set: &mut SocketSet,
    decoders: &mut HashMap<SocketHandle, FrameDecoder>,
) -> Result<()> {
    let component_count = ctx.model.read().component_count();
    let timeout = ctx.model.read().sim_params().timeout();

    let mut to_register = component_count;
    let mut ready_count = 0usize;
    let mut unbound: HashSet<SocketHandle> = HashSet::new();

    info!("waiting for registration requests");
    let started = Instant::now();

    while to_register > 0 || ready_count < component_count {
        if ctx.shutting_down() {
            return Ok(());
        }
        sock_set.select_readable(ctx.config.poll_interval())?;

        if started.elapsed() > timeout {
            sock_set.close_all();
            return Err(ManagerError::StartupTimeout { limit: timeout });
        }

        // New connections are only interesting while components are
        // missing; their first message is read on a later round.
        if to_register > 0 && sock_set.has_pending_accept() {
            while let Some(handle) = sock_set.accept_client()? {
                decoders.insert(handle, FrameDecoder::new(ctx.config.max_message_size));
                unbound.insert(handle);
            }
        }

        for handle in sock_set.ready_handles() {
            // A component that already checked in is not read again until
            // the run phase.
            let ready_component = {
                let model = ctx.model.read();
                model
                    .component_by_socket(handle)
                    .and_then(|id| model.component(id))
                    .map(|comp| comp.ready())
                    .unwrap_or(false)
            };
            if ready_component {
                continue;
            }

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
                        match dispatch(
                            ctx,
                            handle,
                            msg,
                            &mut unbound,
                            &mut to_register,
                            &mut ready_count,
                        )? {
                            Dispatch::Continue => {}
                            Dispatch::ComponentReady => break,
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                        ctx.queue.release(msg);
                        return Err(ManagerError::Protocol(format!(
                            "malformed message on socket {}: {}",
                            handle, e
                        )));
                    }
                    Err(e) => {
                        ctx.queue.release(msg);
                        return Err(ManagerError::Protocol(format!(
                            "connection lost during startup on socket {}: {}",
                            handle, e
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn dispatch(
    ctx: &Ctx,
    handle: SocketHandle,
    msg: Box<Message>,
    unbound: &mut HashSet<SocketHandle>,
    to_register: &mut usize,
    ready_count: &mut usize,
) -> Result<Dispatch> {
    if unbound.contains(&handle) {
        register_component(ctx, handle, msg)?;
        unbound.remove(&handle);
        *to_register -= 1;
        if *to_register == 0 {
            info!("all expected components are registered");
        }
        return Ok(Dispatch::Continue);
    }

    let comp_id = ctx
        .model
        .read()
        .component_by_socket(handle)
        .ok_or_else(|| {
            ManagerError::Protocol(format!("message on socket {} bound to no component", handle))
        })?;

    match msg.header.kind {
        MessageKind::CheckModel => {
            ctx.queue.release(msg);
            let name = component_name(&ctx.model.read(), comp_id);
            ctx.model.write().mark_component_ready(comp_id);
            *ready_count += 1;
            info!(component = %name, "component is ready to simulate");
            Ok(Dispatch::ComponentReady)
        }
        MessageKind::RegInterface => {
            let mut msg = msg;
            if let Err(e) = process_reg_interface(ctx, comp_id, &mut msg) {
                ctx.queue.release(msg);
                return Err(e);
            }
            ctx.queue.publish_write(msg);
            Ok(Dispatch::Continue)
        }
        MessageKind::RegParameter => {
            let mut msg = msg;
            if let Err(e) = process_reg_parameter(ctx, comp_id, &mut msg) {
                ctx.queue.release(msg);
                return Err(e);
            }
            ctx.queue.publish_write(msg);
            Ok(Dispatch::Continue)
        }
        other => {
            ctx.queue.release(msg);
            Err(ManagerError::Protocol(format!(
                "unexpected {:?} from component {} during startup",
                other, comp_id
            )))
        }
    }
}

/// First message on a fresh socket: bind it to the named component and
/// reply with the assigned component id.
fn register_component(ctx: &Ctx, handle: SocketHandle, msg: Box<Message>) -> Result<()> {
    if msg.header.kind != MessageKind::RegComponent {
        let kind = msg.header.kind;
        ctx.queue.release(msg);
        return Err(ManagerError::Protocol(format!(
            "component registration message expected, got {:?}",
            kind
        )));
    }

    let name = match std::str::from_utf8(&msg.data) {
        Ok(name) => name.to_string(),
        Err(_) => {
            ctx.queue.release(msg);
            return Err(ManagerError::Protocol(
                "component name is not valid utf-8".into(),
            ));
        }
    };

    let bind = {
        let mut model = ctx.model.write();
        match model.component_id_by_name(&name) {
            Some(comp_id) => model.bind_socket(comp_id, handle).map(|_| comp_id),
            None => Err(ManagerError::Protocol(format!(
                "component registration for {} failed: not in the composite model",
                name
            ))),
        }
    };
    let comp_id = match bind {
        Ok(comp_id) => comp_id,
        Err(e) => {
            ctx.queue.release(msg);
            return Err(e);
        }
    };

    let mut msg = msg;
    msg.header.kind = MessageKind::RegComponent;
    msg.header.interface_id = comp_id;
    msg.header.parameter_id = 0;
    msg.header.source_big_endian = local_big_endian();
    msg.data.clear();
    msg.header.data_size = 0;
    ctx.queue.publish_write(msg);

    info!(component = %name, socket = handle, "component is connected");
    Ok(())
}

/// Answer an interface registration in place: resolve (or, in
/// interface-request mode, create) the interface and attach the coupling
/// parameters the client needs.
fn process_reg_interface(ctx: &Ctx, comp_id: i32, msg: &mut Message) -> Result<()> {
    let raw = std::str::from_utf8(&msg.data)
        .map_err(|_| ManagerError::Protocol("interface specification is not valid utf-8".into()))?
        .to_string();
    let spec = InterfaceSpec::parse(&raw).map_err(ManagerError::Protocol)?;

    let mut model = ctx.model.write();
    let comp_name = component_name(&model, comp_id);
    info!(component = %comp_name, spec = %raw, "interface registration");

    let mut ifc_id = model.interface_id_by_component_and_local_name(comp_id, &spec.name);
    if ifc_id.is_none() && ctx.mode == CommunicationMode::InterfaceRequest {
        ifc_id = Some(model.add_interface(
            comp_id,
            &spec.name,
            spec.dimensions,
            spec.causality,
            &spec.domain,
        )?);
    }

    msg.header.source_big_endian = local_big_endian();
    msg.data.clear();

    match ifc_id {
        None => {
            warn!(
                interface = %format!("{}.{}", comp_name, spec.name),
                "interface not defined in composite model, ignored"
            );
            msg.header.interface_id = -1;
        }
        Some(ifc_id) => {
            model.mark_interface_connected(ifc_id);
            msg.header.interface_id = ifc_id;
            match ctx.mode {
                CommunicationMode::CoSimulation => {
                    match connection_reply_params(&model, ifc_id) {
                        None => {
                            // Registered but unpaired in the model: the
                            // client learns there is nothing to exchange.
                            msg.header.interface_id = -1;
                        }
                        Some(params) => {
                            info!(
                                interface = %model.full_interface_name(ifc_id),
                                "interface is connected"
                            );
                            msg.data
                                .extend_from_slice(&params.encode(local_big_endian()));
                        }
                    }
                }
                CommunicationMode::InterfaceRequest => {
                    info!(
                        interface = %model.full_interface_name(ifc_id),
                        id = ifc_id,
                        "assigned interface id"
                    );
                    let params = ConnectionParams::interface_request_defaults();
                    msg.data
                        .extend_from_slice(&params.encode(local_big_endian()));
                }
            }
        }
    }
    msg.header.data_size = msg.data.len();
    Ok(())
}

/// Answer a parameter registration in place with the manager-assigned
/// value (fixed 100-byte buffer, truncated as needed).
fn process_reg_parameter(ctx: &Ctx, comp_id: i32, msg: &mut Message) -> Result<()> {
    let raw = std::str::from_utf8(&msg.data)
        .map_err(|_| ManagerError::Protocol("parameter specification is not valid utf-8".into()))?
        .to_string();
    let (name, value) = parse_parameter_spec(&raw);

    let mut model = ctx.model.write();
    let comp_name = component_name(&model, comp_id);
    info!(component = %comp_name, parameter = name, "parameter registration");

    let mut par_id = model.parameter_id(comp_id, name);
    if par_id.is_none() && ctx.mode == CommunicationMode::InterfaceRequest {
        par_id = Some(model.add_parameter(comp_id, name, value)?);
    }

    msg.header.source_big_endian = local_big_endian();
    msg.data.clear();

    match par_id {
        None => {
            warn!(
                parameter = %format!("{}.{}", comp_name, name),
                "parameter not defined in composite model, ignored"
            );
            msg.header.parameter_id = -1;
        }
        Some(par_id) => {
            msg.header.parameter_id = par_id;
            let stored = model
                .parameter(par_id)
                .map(|p| p.value().as_bytes())
                .unwrap_or_default();
            if stored.len() > PARAMETER_VALUE_SIZE - 1 {
                warn!(
                    parameter = %format!("{}.{}", comp_name, name),
                    "parameter value exceeds the wire buffer, truncated to 99 bytes"
                );
            }
            let mut buf = [0u8; PARAMETER_VALUE_SIZE];
            let n = stored.len().min(PARAMETER_VALUE_SIZE - 1);
            buf[..n].copy_from_slice(&stored[..n]);
            msg.data.extend_from_slice(&buf);
            info!(parameter = %format!("{}.{}", comp_name, name), id = par_id, "assigned parameter id");
        }
    }
    msg.header.data_size = msg.data.len();
    Ok(())
}

/// The coupling parameters an interface registration reply carries: the
/// connection's line parameters with the registering component's inertial
/// transform and the interface's time-zero pose filled in. `None` when the
/// interface has no connection in the model.
pub(super) fn connection_reply_params(
    model: &CompositeModel,
    interface_id: i32,
) -> Option<ConnectionParams> {
    let ifc = model.interface(interface_id)?;
    let conn = model.connection(ifc.connection_id())?;
    let comp = model.component(ifc.component_id())?;

    let mut params = conn.params().clone();
    let (position, orientation) = comp.inertial_transform();
    params.component_position = position;
    params.component_orientation = orientation;
    params.nominal_position = ifc.time0().position;
    params.nominal_orientation = ifc.time0().orientation;
    Some(params)
}

fn component_name(model: &CompositeModel, comp_id: i32) -> String {
    model
        .component(comp_id)
        .map(|c| c.name().to_string())
        .unwrap_or_else(|| format!("#{}", comp_id))
}
