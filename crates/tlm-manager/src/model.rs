// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Composite-model facade.
//!
//! The composite model describes the coupled simulation: which simulator
//! components exist, the coupling interfaces and parameters they declare,
//! and which interface pairs are connected. Parsing it (from XML or
//! otherwise) is outside this crate; embedders build the model through the
//! mutators here and the manager core reads it through the lookups.
//!
//! Entities are flat, index-addressed tables cross-referenced by id - no
//! back-pointers. Ids are `i32` because they travel in wire headers, with
//! `-1` meaning "none".
//!
//! The model is mutated by the reader thread during startup and close, and
//! only read during the run phase; the manager wraps it in a `RwLock` to
//! let the monitor thread observe registration progress.

use std::time::Duration;
use tracing::warn;

use crate::net::{SocketHandle, INVALID_SOCKET};
use crate::protocol::{Causality, ConnectionParams, TimeData3D, IDENTITY_3X3};
use crate::{ManagerError, Result};

/// Global settings of the simulation session.
#[derive(Debug, Clone)]
pub struct SimulationParams {
    port: u16,
    monitor_port: u16,
    timeout: Duration,
}

impl SimulationParams {
    /// `port` 0 lets the OS choose; `monitor_port` 0 disables monitoring.
    pub fn new(port: u16, monitor_port: u16, timeout: Duration) -> Self {
        Self {
            port,
            monitor_port,
            timeout,
        }
    }

    /// Primary listener port. Updated with the actual port once bound.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Monitor listener port (0 = monitoring disabled).
    pub fn monitor_port(&self) -> u16 {
        self.monitor_port
    }

    /// Wall-clock limit for the whole startup protocol.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Publish the bound primary port back to the model.
    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// Publish the bound monitor port back to the model.
    pub fn set_monitor_port(&mut self, port: u16) {
        self.monitor_port = port;
    }
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            port: 0,
            monitor_port: 0,
            timeout: Duration::from_secs(60),
        }
    }
}

/// One simulator process in the coupled model.
#[derive(Debug)]
pub struct ComponentProxy {
    name: String,
    socket: SocketHandle,
    ready: bool,
    inertial_position: [f64; 3],
    inertial_orientation: [f64; 9],
}

impl ComponentProxy {
    /// Component name as declared in the model.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Socket handle bound at registration, `-1` before and after.
    pub fn socket(&self) -> SocketHandle {
        self.socket
    }

    /// Whether the component has sent its check-model message.
    pub fn ready(&self) -> bool {
        self.ready
    }

    /// Inertial transform of the component frame (position, row-major 3x3
    /// orientation), copied into every interface reply.
    pub fn inertial_transform(&self) -> ([f64; 3], [f64; 9]) {
        (self.inertial_position, self.inertial_orientation)
    }
}

/// One coupling port on a component.
#[derive(Debug)]
pub struct InterfaceProxy {
    component_id: i32,
    name: String,
    dimensions: i32,
    causality: Causality,
    domain: String,
    connection_id: i32,
    connected: bool,
    optional: bool,
    time0: TimeData3D,
}

impl InterfaceProxy {
    /// Owning component id.
    pub fn component_id(&self) -> i32 {
        self.component_id
    }

    /// Interface name, local to the component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared dimensionality (1 or 6).
    pub fn dimensions(&self) -> i32 {
        self.dimensions
    }

    /// Declared causality.
    pub fn causality(&self) -> Causality {
        self.causality
    }

    /// Physical domain label.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Index into the connection table, `-1` if unpaired.
    pub fn connection_id(&self) -> i32 {
        self.connection_id
    }

    /// Whether a client has registered this interface.
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Optional interfaces may stay unregistered without failing the
    /// model check.
    pub fn optional(&self) -> bool {
        self.optional
    }

    /// Canonical time-zero state (1-D and signal forms are normalised into
    /// this 3-D slot).
    pub fn time0(&self) -> &TimeData3D {
        &self.time0
    }
}

/// A named string parameter on a component.
#[derive(Debug)]
pub struct ParameterProxy {
    component_id: i32,
    name: String,
    value: String,
}

impl ParameterProxy {
    /// Owning component id.
    pub fn component_id(&self) -> i32 {
        self.component_id
    }

    /// Parameter name, local to the component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value; the manager-assigned value wins over what a client
    /// declares at registration.
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A designated pair of interfaces exchanging time data.
#[derive(Debug)]
pub struct Connection {
    interface_a: i32,
    interface_b: i32,
    params: ConnectionParams,
}

impl Connection {
    /// The two paired interface ids.
    pub fn interfaces(&self) -> (i32, i32) {
        (self.interface_a, self.interface_b)
    }

    /// The id paired with `interface_id`, if it belongs to this connection.
    pub fn peer_of(&self, interface_id: i32) -> Option<i32> {
        if interface_id == self.interface_a {
            Some(self.interface_b)
        } else if interface_id == self.interface_b {
            Some(self.interface_a)
        } else {
            None
        }
    }

    /// Static line parameters of the connection.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }
}

/// The pre-loaded description of the coupled simulation.
#[derive(Debug, Default)]
pub struct CompositeModel {
    components: Vec<ComponentProxy>,
    interfaces: Vec<InterfaceProxy>,
    parameters: Vec<ParameterProxy>,
    connections: Vec<Connection>,
    sim_params: SimulationParams,
}

impl CompositeModel {
    /// Empty model with the given simulation parameters.
    pub fn new(sim_params: SimulationParams) -> Self {
        Self {
            sim_params,
            ..Self::default()
        }
    }

    // ------------------------------------------------------------------
    // Assembly (model loading and interface-request mode)
    // ------------------------------------------------------------------

    /// Add a component; returns its id.
    pub fn add_component(&mut self, name: &str) -> i32 {
        let id = self.components.len() as i32;
        self.components.push(ComponentProxy {
            name: name.to_string(),
            socket: INVALID_SOCKET,
            ready: false,
            inertial_position: [0.0; 3],
            inertial_orientation: IDENTITY_3X3,
        });
        id
    }

    /// Declare an interface on a component; returns the new interface id.
    pub fn add_interface(
        &mut self,
        component_id: i32,
        name: &str,
        dimensions: i32,
        causality: Causality,
        domain: &str,
    ) -> Result<i32> {
        self.component(component_id)
            .ok_or_else(|| ManagerError::Model(format!("no component {}", component_id)))?;
        if self
            .interface_id_by_component_and_local_name(component_id, name)
            .is_some()
        {
            return Err(ManagerError::Model(format!(
                "duplicate interface {} on component {}",
                name, component_id
            )));
        }
        let id = self.interfaces.len() as i32;
        self.interfaces.push(InterfaceProxy {
            component_id,
            name: name.to_string(),
            dimensions,
            causality,
            domain: domain.to_string(),
            connection_id: -1,
            connected: false,
            optional: false,
            time0: TimeData3D::default(),
        });
        Ok(id)
    }

    /// Declare a parameter on a component; returns the new parameter id.
    pub fn add_parameter(&mut self, component_id: i32, name: &str, value: &str) -> Result<i32> {
        self.component(component_id)
            .ok_or_else(|| ManagerError::Model(format!("no component {}", component_id)))?;
        if self.parameter_id(component_id, name).is_some() {
            return Err(ManagerError::Model(format!(
                "duplicate parameter {} on component {}",
                name, component_id
            )));
        }
        let id = self.parameters.len() as i32;
        self.parameters.push(ParameterProxy {
            component_id,
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(id)
    }

    /// Pair two interfaces (by full `component.interface` name) with the
    /// given line parameters; returns the connection id.
    pub fn connect(&mut self, a: &str, b: &str, params: ConnectionParams) -> Result<i32> {
        let ifc_a = self
            .interface_id_by_full_name(a)
            .ok_or_else(|| ManagerError::Model(format!("no interface {}", a)))?;
        let ifc_b = self
            .interface_id_by_full_name(b)
            .ok_or_else(|| ManagerError::Model(format!("no interface {}", b)))?;
        for &ifc in &[ifc_a, ifc_b] {
            if self.interfaces[ifc as usize].connection_id >= 0 {
                return Err(ManagerError::Model(format!(
                    "interface {} is already part of a connection",
                    self.full_interface_name(ifc)
                )));
            }
        }
        let id = self.connections.len() as i32;
        self.connections.push(Connection {
            interface_a: ifc_a,
            interface_b: ifc_b,
            params,
        });
        self.interfaces[ifc_a as usize].connection_id = id;
        self.interfaces[ifc_b as usize].connection_id = id;
        Ok(id)
    }

    /// Set a component's inertial transform.
    pub fn set_component_inertial(
        &mut self,
        component_id: i32,
        position: [f64; 3],
        orientation: [f64; 9],
    ) -> Result<()> {
        let comp = self
            .component_mut(component_id)
            .ok_or_else(|| ManagerError::Model(format!("no component {}", component_id)))?;
        comp.inertial_position = position;
        comp.inertial_orientation = orientation;
        Ok(())
    }

    /// Set an interface's time-zero state (3-D canonical form).
    pub fn set_interface_time0(&mut self, interface_id: i32, time0: TimeData3D) -> Result<()> {
        let ifc = self
            .interface_mut(interface_id)
            .ok_or_else(|| ManagerError::Model(format!("no interface {}", interface_id)))?;
        ifc.time0 = time0;
        Ok(())
    }

    /// Mark an interface as allowed to stay unregistered.
    pub fn set_interface_optional(&mut self, interface_id: i32, optional: bool) -> Result<()> {
        let ifc = self
            .interface_mut(interface_id)
            .ok_or_else(|| ManagerError::Model(format!("no interface {}", interface_id)))?;
        ifc.optional = optional;
        Ok(())
    }

    /// Overwrite a parameter value (the manager-assigned value sent back
    /// in registration replies).
    pub fn set_parameter_value(&mut self, parameter_id: i32, value: &str) -> Result<()> {
        let par = self
            .parameters
            .get_mut(usize::try_from(parameter_id).map_err(|_| {
                ManagerError::Model(format!("no parameter {}", parameter_id))
            })?)
            .ok_or_else(|| ManagerError::Model(format!("no parameter {}", parameter_id)))?;
        par.value = value.to_string();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Number of declared components.
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Number of declared interfaces.
    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    /// Component by id.
    pub fn component(&self, id: i32) -> Option<&ComponentProxy> {
        self.components.get(usize::try_from(id).ok()?)
    }

    /// Interface by id.
    pub fn interface(&self, id: i32) -> Option<&InterfaceProxy> {
        self.interfaces.get(usize::try_from(id).ok()?)
    }

    /// Parameter by id.
    pub fn parameter(&self, id: i32) -> Option<&ParameterProxy> {
        self.parameters.get(usize::try_from(id).ok()?)
    }

    /// Connection by id.
    pub fn connection(&self, id: i32) -> Option<&Connection> {
        self.connections.get(usize::try_from(id).ok()?)
    }

    /// Component id by declared name.
    pub fn component_id_by_name(&self, name: &str) -> Option<i32> {
        self.components
            .iter()
            .position(|c| c.name == name)
            .map(|i| i as i32)
    }

    /// Interface id by `component.interface` full name.
    pub fn interface_id_by_full_name(&self, full_name: &str) -> Option<i32> {
        let (comp_name, ifc_name) = full_name.split_once('.')?;
        let comp_id = self.component_id_by_name(comp_name)?;
        self.interface_id_by_component_and_local_name(comp_id, ifc_name)
    }

    /// Interface id by owning component and local name.
    pub fn interface_id_by_component_and_local_name(
        &self,
        component_id: i32,
        name: &str,
    ) -> Option<i32> {
        self.interfaces
            .iter()
            .position(|i| i.component_id == component_id && i.name == name)
            .map(|i| i as i32)
    }

    /// Parameter id by owning component and local name.
    pub fn parameter_id(&self, component_id: i32, name: &str) -> Option<i32> {
        self.parameters
            .iter()
            .position(|p| p.component_id == component_id && p.name == name)
            .map(|i| i as i32)
    }

    /// `component.interface` display name.
    pub fn full_interface_name(&self, interface_id: i32) -> String {
        match self.interface(interface_id) {
            Some(ifc) => {
                let comp = self
                    .component(ifc.component_id)
                    .map(|c| c.name.as_str())
                    .unwrap_or("?");
                format!("{}.{}", comp, ifc.name)
            }
            None => format!("#{}", interface_id),
        }
    }

    /// The interface paired with `interface_id`, if any.
    pub fn linked_interface(&self, interface_id: i32) -> Option<i32> {
        let ifc = self.interface(interface_id)?;
        self.connection(ifc.connection_id)?.peer_of(interface_id)
    }

    /// Component bound to `socket`, if any.
    pub fn component_by_socket(&self, socket: SocketHandle) -> Option<i32> {
        self.components
            .iter()
            .position(|c| c.socket == socket)
            .map(|i| i as i32)
    }

    /// Simulation parameters.
    pub fn sim_params(&self) -> &SimulationParams {
        &self.sim_params
    }

    /// Mutable simulation parameters (port publication).
    pub fn sim_params_mut(&mut self) -> &mut SimulationParams {
        &mut self.sim_params
    }

    // ------------------------------------------------------------------
    // Registration-time mutation
    // ------------------------------------------------------------------

    /// Bind a freshly accepted socket to a component. A socket belongs to
    /// at most one component and a component holds at most one socket.
    pub fn bind_socket(&mut self, component_id: i32, socket: SocketHandle) -> Result<()> {
        if let Some(holder) = self.component_by_socket(socket) {
            return Err(ManagerError::Protocol(format!(
                "socket {} is already bound to component {}",
                socket, holder
            )));
        }
        let comp = self
            .component_mut(component_id)
            .ok_or_else(|| ManagerError::Model(format!("no component {}", component_id)))?;
        if comp.socket != INVALID_SOCKET {
            return Err(ManagerError::Protocol(format!(
                "component {} registered twice",
                comp.name
            )));
        }
        comp.socket = socket;
        Ok(())
    }

    /// Detach a component's socket at close.
    pub fn clear_socket(&mut self, component_id: i32) {
        if let Some(comp) = self.component_mut(component_id) {
            comp.socket = INVALID_SOCKET;
        }
    }

    /// Record that a component sent its check-model message.
    pub fn mark_component_ready(&mut self, component_id: i32) {
        if let Some(comp) = self.component_mut(component_id) {
            comp.ready = true;
        }
    }

    /// Record that a client registered this interface.
    pub fn mark_interface_connected(&mut self, interface_id: i32) {
        if let Some(ifc) = self.interface_mut(interface_id) {
            ifc.connected = true;
        }
    }

    /// Startup sanity check: every component has a socket and every
    /// non-optional interface was registered.
    pub fn check_proxy_comm(&self) -> bool {
        let mut ok = true;
        for comp in &self.components {
            if comp.socket == INVALID_SOCKET {
                warn!(component = %comp.name, "component never connected");
                ok = false;
            }
        }
        for (id, ifc) in self.interfaces.iter().enumerate() {
            if !ifc.connected && !ifc.optional {
                warn!(
                    interface = %self.full_interface_name(id as i32),
                    "required interface was not registered"
                );
                ok = false;
            }
        }
        ok
    }

    fn component_mut(&mut self, id: i32) -> Option<&mut ComponentProxy> {
        self.components.get_mut(usize::try_from(id).ok()?)
    }

    fn interface_mut(&mut self, id: i32) -> Option<&mut InterfaceProxy> {
        self.interfaces.get_mut(usize::try_from(id).ok()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_component_model() -> CompositeModel {
        let mut model = CompositeModel::new(SimulationParams::default());
        let a = model.add_component("A");
        let b = model.add_component("B");
        model
            .add_interface(a, "p", 6, Causality::Bidirectional, "mechanical")
            .unwrap();
        model
            .add_interface(b, "p", 6, Causality::Bidirectional, "mechanical")
            .unwrap();
        model
            .connect("A.p", "B.p", ConnectionParams::with_delay(1e-4))
            .unwrap();
        model
    }

    #[test]
    fn test_lookups() {
        let model = two_component_model();
        assert_eq!(model.component_count(), 2);
        assert_eq!(model.component_id_by_name("A"), Some(0));
        assert_eq!(model.component_id_by_name("missing"), None);
        assert_eq!(model.interface_id_by_full_name("B.p"), Some(1));
        assert_eq!(model.interface_id_by_full_name("B.q"), None);
        assert_eq!(model.interface_id_by_component_and_local_name(0, "p"), Some(0));
        assert_eq!(model.full_interface_name(1), "B.p");
    }

    #[test]
    fn test_connection_pairing() {
        let model = two_component_model();
        assert_eq!(model.linked_interface(0), Some(1));
        assert_eq!(model.linked_interface(1), Some(0));
        let conn = model.connection(0).unwrap();
        assert_eq!(conn.peer_of(0), Some(1));
        assert_eq!(conn.peer_of(7), None);
    }

    #[test]
    fn test_duplicate_connection_rejected() {
        let mut model = two_component_model();
        let err = model
            .connect("A.p", "B.p", ConnectionParams::default())
            .unwrap_err();
        assert!(matches!(err, ManagerError::Model(_)));
    }

    #[test]
    fn test_socket_binding_invariants() {
        let mut model = two_component_model();
        model.bind_socket(0, 11).unwrap();
        assert_eq!(model.component(0).unwrap().socket(), 11);
        assert_eq!(model.component_by_socket(11), Some(0));

        // Same socket on a second component.
        assert!(model.bind_socket(1, 11).is_err());
        // Second socket on the same component.
        assert!(model.bind_socket(0, 12).is_err());

        model.clear_socket(0);
        assert_eq!(model.component(0).unwrap().socket(), INVALID_SOCKET);
    }

    #[test]
    fn test_dynamic_registration() {
        let mut model = CompositeModel::new(SimulationParams::default());
        let c = model.add_component("solo");
        let ifc = model
            .add_interface(c, "dynamic", 1, Causality::Input, "signal")
            .unwrap();
        assert_eq!(model.interface(ifc).unwrap().dimensions(), 1);
        assert!(model.add_interface(c, "dynamic", 1, Causality::Input, "signal").is_err());

        let par = model.add_parameter(c, "mass", "1.0").unwrap();
        assert_eq!(model.parameter(par).unwrap().value(), "1.0");
        model.set_parameter_value(par, "2.5").unwrap();
        assert_eq!(model.parameter(par).unwrap().value(), "2.5");
    }

    #[test]
    fn test_check_proxy_comm() {
        let mut model = two_component_model();
        assert!(!model.check_proxy_comm());

        model.bind_socket(0, 5).unwrap();
        model.bind_socket(1, 6).unwrap();
        model.mark_interface_connected(0);
        assert!(!model.check_proxy_comm());

        model.mark_interface_connected(1);
        assert!(model.check_proxy_comm());
    }

    #[test]
    fn test_optional_interface_may_stay_unregistered() {
        let mut model = two_component_model();
        model.bind_socket(0, 5).unwrap();
        model.bind_socket(1, 6).unwrap();
        model.mark_interface_connected(0);
        model.set_interface_optional(1, true).unwrap();
        assert!(model.check_proxy_comm());
    }
}
