//! Components, connections and symmetry candidates of one layout cell.
//!
//! The netlist is produced by an external extraction step and consumed
//! here as plain data. Only the placement engine writes to it, and only
//! the [`Transform`] of placeable components.

use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{NetlistError, Result};

pub mod geometry;

pub use geometry::{Axis, Int, Orientation, Point, Rect, Size, Transform};

pub type ComponentId = usize;

/// The device classes handled by the placement engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Transistor,
    Resistor,
    Capacitor,
}

impl Display for DeviceClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceClass::Transistor => write!(f, "transistor"),
            DeviceClass::Resistor => write!(f, "resistor"),
            DeviceClass::Capacitor => write!(f, "capacitor"),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinDirection {
    Input,
    Output,
    #[default]
    Inout,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentKind {
    Transistor {
        /// Device type, e.g. `nmos` or `pmos`.
        device: ArcStr,
    },
    Resistor {
        device: ArcStr,
    },
    Capacitor {
        device: ArcStr,
    },
    Pin {
        #[serde(default)]
        direction: PinDirection,
    },
    CircuitCell,
}

impl ComponentKind {
    /// The placement class, or `None` for structural components.
    pub fn class(&self) -> Option<DeviceClass> {
        match self {
            ComponentKind::Transistor { .. } => Some(DeviceClass::Transistor),
            ComponentKind::Resistor { .. } => Some(DeviceClass::Resistor),
            ComponentKind::Capacitor { .. } => Some(DeviceClass::Capacitor),
            ComponentKind::Pin { .. } | ComponentKind::CircuitCell => None,
        }
    }

    pub fn device_type(&self) -> &str {
        match self {
            ComponentKind::Transistor { device }
            | ComponentKind::Resistor { device }
            | ComponentKind::Capacitor { device } => device.as_str(),
            ComponentKind::Pin { .. } => "pin",
            ComponentKind::CircuitCell => "cell",
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Port {
    /// Terminal label, e.g. `G`, `D`, `S` or `B`.
    pub label: ArcStr,
    /// Port area relative to the component origin.
    pub area: Rect,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub number_id: ComponentId,
    pub name: ArcStr,
    #[serde(default)]
    pub cell: ArcStr,
    #[serde(flatten)]
    pub kind: ComponentKind,
    pub size: Size,
    #[serde(default)]
    pub ports: Vec<Port>,
    /// Maps a port label to the net it is connected to in the schematic.
    #[serde(default)]
    pub schematic_connections: IndexMap<ArcStr, ArcStr>,
    /// Symmetry family.
    #[serde(default)]
    pub group: Option<ArcStr>,
    #[serde(default)]
    pub transform: Transform,
}

impl Component {
    #[inline]
    pub fn is_placeable(&self) -> bool {
        self.kind.class().is_some()
    }

    #[inline]
    pub fn class(&self) -> Option<DeviceClass> {
        self.kind.class()
    }

    /// All ports carrying the given label, in declaration order.
    pub fn ports_labeled<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a Port> + 'a {
        self.ports.iter().filter(move |p| p.label.as_str() == label)
    }

    /// The absolute area of a port under the current transform.
    pub fn port_area(&self, port: &Port) -> Rect {
        self.transform.apply(port.area, self.size)
    }

    /// The absolute bounding box under the current transform.
    pub fn bbox(&self) -> Rect {
        Rect::from_sides(
            self.transform.x,
            self.transform.y,
            self.transform.x + self.size.width,
            self.transform.y + self.size.height,
        )
    }

    pub fn net_of(&self, label: &str) -> Option<&ArcStr> {
        self.schematic_connections.get(label)
    }
}

/// One side of a [`Connection`].
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub component: ComponentId,
    #[serde(rename = "type", default)]
    pub device: ArcStr,
    /// Port labels shorted together at this endpoint.
    pub ports: Vec<ArcStr>,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub start: Endpoint,
    /// `None` for a single connection.
    #[serde(default)]
    pub end: Option<Endpoint>,
    pub net: ArcStr,
}

impl Connection {
    #[inline]
    pub fn is_single(&self) -> bool {
        self.end.is_none()
    }

    /// Returns true if every endpoint lies on a component in `ids`.
    pub fn is_internal_to(&self, ids: &HashSet<ComponentId>) -> bool {
        ids.contains(&self.start.component)
            && self
                .end
                .as_ref()
                .map(|e| ids.contains(&e.component))
                .unwrap_or(true)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        std::iter::once(&self.start).chain(self.end.iter())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OverlapClass {
    None,
    Top,
    Side,
    Both,
}

/// Pairs of same-type, same-size components eligible for symmetric placement.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Overlap {
    #[serde(default)]
    pub top: Vec<[ComponentId; 2]>,
    #[serde(default)]
    pub side: Vec<[ComponentId; 2]>,
}

fn contains_pair(pairs: &[[ComponentId; 2]], a: ComponentId, b: ComponentId) -> bool {
    pairs
        .iter()
        .any(|&[p, q]| (p == a && q == b) || (p == b && q == a))
}

impl Overlap {
    pub fn classify(&self, a: ComponentId, b: ComponentId) -> OverlapClass {
        match (contains_pair(&self.top, a, b), contains_pair(&self.side, a, b)) {
            (true, true) => OverlapClass::Both,
            (true, false) => OverlapClass::Top,
            (false, true) => OverlapClass::Side,
            (false, false) => OverlapClass::None,
        }
    }

    /// Pairs classified both `top` and `side`, in `top` order.
    pub fn mirror_pairs(&self) -> Vec<(ComponentId, ComponentId)> {
        self.top
            .iter()
            .filter(|&&[a, b]| contains_pair(&self.side, a, b))
            .map(|&[a, b]| (a, b))
            .collect()
    }
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Netlist {
    pub components: Vec<Component>,
    #[serde(default)]
    pub component_connections: Vec<Connection>,
    #[serde(default)]
    pub single_connections: Vec<Connection>,
    #[serde(default)]
    pub overlap: Overlap,
}

impl Netlist {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let netlist = serde_json::from_str(&contents)?;
        Ok(netlist)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.component_connections
            .iter()
            .chain(self.single_connections.iter())
    }

    /// Net names in order of first appearance, component connections first.
    pub fn nets(&self) -> Vec<ArcStr> {
        let mut seen = HashSet::new();
        self.connections()
            .filter(|c| seen.insert(c.net.clone()))
            .map(|c| c.net.clone())
            .collect()
    }

    pub fn connections_on<'a>(&'a self, net: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections().filter(move |c| c.net.as_str() == net)
    }

    /// Checks the structural invariants of the connection lists.
    pub fn validate(&self) -> std::result::Result<(), NetlistError> {
        let mut by_id = HashMap::new();
        for c in self.components.iter() {
            if by_id.insert(c.number_id, c).is_some() {
                return Err(NetlistError::DuplicateComponent(c.number_id));
            }
        }

        let mut seen_ports = HashSet::new();
        let mut nets_with_ports: HashMap<ArcStr, bool> = HashMap::new();

        for conn in self.connections() {
            let resolved = nets_with_ports.entry(conn.net.clone()).or_insert(false);
            for ep in conn.endpoints() {
                let component =
                    by_id
                        .get(&ep.component)
                        .ok_or_else(|| NetlistError::UnknownComponent {
                            net: conn.net.clone(),
                            id: ep.component,
                        })?;
                if ep
                    .ports
                    .iter()
                    .any(|label| component.ports_labeled(label).next().is_some())
                {
                    *resolved = true;
                }
            }

            let peers = match &conn.end {
                Some(end) => {
                    if end.component == conn.start.component {
                        return Err(NetlistError::SelfConnection {
                            net: conn.net.clone(),
                            id: end.component,
                        });
                    }
                    vec![
                        (&conn.start, Some(end.component)),
                        (end, Some(conn.start.component)),
                    ]
                }
                None => vec![(&conn.start, None)],
            };
            for (ep, peer) in peers {
                for port in ep.ports.iter() {
                    if !seen_ports.insert((ep.component, port.clone(), peer)) {
                        return Err(NetlistError::DuplicatePort {
                            id: ep.component,
                            port: port.clone(),
                            peer,
                        });
                    }
                }
            }
        }

        if let Some((net, _)) = nets_with_ports.into_iter().find(|(_, ok)| !ok) {
            return Err(NetlistError::DanglingNet(net));
        }

        Ok(())
    }
}
