//! Maps placed ports onto the discrete routing grid.
//!
//! The routing grid has two layers of the same shape. The vertical layer
//! gates north/south moves and the horizontal layer gates east/west moves.
//! Every port is painted as a blocked keep-out zone on both layers; the
//! router unlocks the zones of the net it is routing.

use std::fmt::{Display, Formatter};

use ::grid::Grid;
use arcstr::ArcStr;
use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{GridConfig, RoutingConfig};
use crate::netlist::{Axis, Component, ComponentId, Int, Point, Rect};

/// A routing grid cell, addressed by column `x` and row `y`.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub x: Int,
    pub y: Int,
}

impl Cell {
    #[inline]
    pub const fn new(x: Int, y: Int) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn manhattan(&self, other: &Cell) -> Int {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

impl Display for Cell {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CellState {
    #[default]
    Free,
    Blocked,
    /// Covered by a committed trace running along the given axis.
    Trace(Axis),
}

impl CellState {
    /// Returns true if a move along `axis` may enter a cell in this state.
    #[inline]
    pub fn walkable_along(&self, axis: Axis) -> bool {
        match self {
            CellState::Free => true,
            CellState::Blocked => false,
            CellState::Trace(a) => *a == axis,
        }
    }

    /// The state after painting a trace along `axis` over this cell.
    fn painted(self, axis: Axis) -> Self {
        match self {
            CellState::Free => CellState::Trace(axis),
            CellState::Trace(a) if a == axis => self,
            CellState::Trace(_) | CellState::Blocked => CellState::Blocked,
        }
    }
}

/// The two obstacle layers of the routing grid.
#[derive(Debug, Clone)]
pub struct ObstacleGrid {
    vertical: Grid<CellState>,
    horizontal: Grid<CellState>,
}

impl ObstacleGrid {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            vertical: Grid::init(height, width, CellState::Free),
            horizontal: Grid::init(height, width, CellState::Free),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.vertical.cols()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.vertical.rows()
    }

    #[inline]
    pub fn in_bounds(&self, cell: Cell) -> bool {
        cell.x >= 0
            && cell.y >= 0
            && (cell.x as usize) < self.width()
            && (cell.y as usize) < self.height()
    }

    fn layer(&self, axis: Axis) -> &Grid<CellState> {
        match axis {
            Axis::Vertical => &self.vertical,
            Axis::Horizontal => &self.horizontal,
        }
    }

    fn layer_mut(&mut self, axis: Axis) -> &mut Grid<CellState> {
        match axis {
            Axis::Vertical => &mut self.vertical,
            Axis::Horizontal => &mut self.horizontal,
        }
    }

    /// The state of `cell` in the layer gating moves along `axis`.
    /// Cells outside the grid read as blocked.
    pub fn state(&self, cell: Cell, axis: Axis) -> CellState {
        if !self.in_bounds(cell) {
            return CellState::Blocked;
        }
        self.layer(axis)
            .get(cell.y as usize, cell.x as usize)
            .copied()
            .unwrap_or(CellState::Blocked)
    }

    pub fn set(&mut self, cell: Cell, axis: Axis, state: CellState) {
        if !self.in_bounds(cell) {
            return;
        }
        if let Some(s) = self.layer_mut(axis).get_mut(cell.y as usize, cell.x as usize) {
            *s = state;
        }
    }

    /// Returns true if a move along `axis` may enter `cell`.
    #[inline]
    pub fn is_walkable(&self, cell: Cell, axis: Axis) -> bool {
        self.state(cell, axis).walkable_along(axis)
    }

    /// Both layer states of a cell, vertical first.
    pub fn states(&self, cell: Cell) -> (CellState, CellState) {
        (
            self.state(cell, Axis::Vertical),
            self.state(cell, Axis::Horizontal),
        )
    }

    pub fn set_states(&mut self, cell: Cell, (vertical, horizontal): (CellState, CellState)) {
        self.set(cell, Axis::Vertical, vertical);
        self.set(cell, Axis::Horizontal, horizontal);
    }

    /// Marks the cells of `area` blocked on both layers.
    pub fn block(&mut self, area: &CellRect) {
        for cell in area.clipped(self).cells() {
            self.set_states(cell, (CellState::Blocked, CellState::Blocked));
        }
    }

    /// Paints a trace running along `axis` over `area` on both layers.
    pub fn paint(&mut self, area: &CellRect, axis: Axis) {
        for cell in area.clipped(self).cells() {
            let (v, h) = self.states(cell);
            self.set_states(cell, (v.painted(axis), h.painted(axis)));
        }
    }
}

/// An inclusive rectangle of grid cells.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CellRect {
    pub min: Cell,
    pub max: Cell,
}

impl CellRect {
    pub fn new(a: Cell, b: Cell) -> Self {
        Self {
            min: Cell::new(a.x.min(b.x), a.y.min(b.y)),
            max: Cell::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// The rectangle of cells within `dx` and `dy` of `center`.
    pub fn around(center: Cell, dx: Int, dy: Int) -> Self {
        Self::new(
            Cell::new(center.x - dx, center.y - dy),
            Cell::new(center.x + dx, center.y + dy),
        )
    }

    #[inline]
    pub fn contains(&self, cell: Cell) -> bool {
        cell.x >= self.min.x && cell.x <= self.max.x && cell.y >= self.min.y && cell.y <= self.max.y
    }

    pub fn expand(&self, d: Int) -> Self {
        Self::new(
            Cell::new(self.min.x - d, self.min.y - d),
            Cell::new(self.max.x + d, self.max.y + d),
        )
    }

    pub fn union(&self, other: &CellRect) -> Self {
        Self {
            min: Cell::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Cell::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    fn clipped(&self, grid: &ObstacleGrid) -> Self {
        Self {
            min: Cell::new(self.min.x.max(0), self.min.y.max(0)),
            max: Cell::new(
                self.max.x.min(grid.width() as Int - 1),
                self.max.y.min(grid.height() as Int - 1),
            ),
        }
    }

    pub fn cells(&self) -> impl Iterator<Item = Cell> {
        let (x0, x1) = (self.min.x, self.max.x);
        (self.min.y..=self.max.y).flat_map(move |y| (x0..=x1).map(move |x| Cell::new(x, y)))
    }
}

/// A blocked zone around one port instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepOut {
    pub component: ComponentId,
    pub label: ArcStr,
    /// The schematic net of the port, if known.
    pub net: Option<ArcStr>,
    /// The cell under the port center.
    pub cell: Cell,
    /// The port center in layout units.
    pub real: (f64, f64),
    pub area: CellRect,
}

impl KeepOut {
    #[inline]
    pub fn is_on(&self, net: &str) -> bool {
        self.net.as_ref().map(|n| n.as_str() == net).unwrap_or(false)
    }
}

/// Grid-unit constants shared with the router.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RoutingParams {
    pub trace_width_scaled: Int,
    pub minimum_segment_length: Int,
    pub trace_margin: Int,
}

impl RoutingParams {
    pub fn new(scale: Int, config: &RoutingConfig) -> Self {
        let via = config.via_clearance + config.via_padding;
        Self {
            trace_width_scaled: ceil_div(config.trace_width, scale),
            minimum_segment_length: ceil_div(config.trace_width + 2 * via, scale).max(1),
            trace_margin: ceil_div(config.trace_spacing, scale),
        }
    }

    /// Cells painted on each side of a committed trace center line.
    #[inline]
    pub fn paint_half_width(&self) -> Int {
        self.trace_width_scaled / 2 + self.trace_margin
    }
}

#[inline]
fn ceil_div(a: Int, b: Int) -> Int {
    (a + b - 1).div_euclid(b)
}

/// The obstacle layers and port sites of one placed cell.
#[derive(Debug, Clone)]
pub struct GridMap {
    pub obstacles: ObstacleGrid,
    /// Keep-out zones, one per port instance, in component and port order.
    pub keep_outs: Vec<KeepOut>,
    /// Indices into `keep_outs` by component and port label.
    pub ports: IndexMap<(ComponentId, ArcStr), Vec<usize>>,
    pub params: RoutingParams,
    origin: Point,
    leeway: (Int, Int),
    scale: Int,
}

impl GridMap {
    /// The keep-out zones of the given port label on a component.
    pub fn sites(&self, component: ComponentId, label: &str) -> impl Iterator<Item = &KeepOut> {
        self.ports
            .get(&(component, ArcStr::from(label)))
            .into_iter()
            .flatten()
            .map(|&i| &self.keep_outs[i])
    }

    /// Scaled cell coordinates of every port center, by component and label.
    pub fn scaled_ports(&self) -> impl Iterator<Item = (ComponentId, &ArcStr, Cell)> {
        self.keep_outs.iter().map(|k| (k.component, &k.label, k.cell))
    }

    /// Layout coordinates of every port center, by component and label.
    pub fn real_ports(&self) -> impl Iterator<Item = (ComponentId, &ArcStr, (f64, f64))> {
        self.keep_outs.iter().map(|k| (k.component, &k.label, k.real))
    }

    /// Layout coordinates of the lower left corner of `cell`.
    pub fn to_real(&self, cell: Cell) -> Point {
        Point::new(
            cell.x * self.scale + self.origin.x - self.leeway.0,
            cell.y * self.scale + self.origin.y - self.leeway.1,
        )
    }

    /// Maps a layout coordinate to its cell, discarding the fractional part.
    /// Returns `None` for points outside the grid.
    pub fn to_cell(&self, (x, y): (f64, f64)) -> Option<Cell> {
        let sx = (x - self.origin.x as f64 + self.leeway.0 as f64) / self.scale as f64;
        let sy = (y - self.origin.y as f64 + self.leeway.1 as f64) / self.scale as f64;
        if sx < 0.0 || sy < 0.0 {
            return None;
        }
        let cell = Cell::new(sx.trunc() as Int, sy.trunc() as Int);
        self.obstacles.in_bounds(cell).then_some(cell)
    }
}

fn placed_bounds(components: &[Component]) -> Rect {
    let placeable = components
        .iter()
        .filter(|c| c.is_placeable())
        .map(|c| c.bbox())
        .reduce(|a, b| a.union(&b));
    placeable
        .or_else(|| components.iter().map(|c| c.bbox()).reduce(|a, b| a.union(&b)))
        .unwrap_or_default()
}

/// Builds the obstacle layers of a placed cell.
///
/// Ports whose centers fall outside the grid are dropped with a warning.
pub fn build_grid(components: &[Component], grid: &GridConfig, routing: &RoutingConfig) -> GridMap {
    let bounds = placed_bounds(components);
    let scale = grid.scale_factor;
    let width = ((bounds.width() + 2 * grid.leeway_x) / scale + 1) as usize;
    let height = ((bounds.height() + 2 * grid.leeway_y) / scale + 1) as usize;
    let params = RoutingParams::new(scale, routing);

    let mut map = GridMap {
        obstacles: ObstacleGrid::new(width, height),
        keep_outs: Vec::new(),
        ports: IndexMap::new(),
        params,
        origin: bounds.p0,
        leeway: (grid.leeway_x, grid.leeway_y),
        scale,
    };
    debug!(
        "routing grid is {width} x {height} cells, origin {:?}, {params:?}",
        bounds.p0
    );

    let clearance = routing.via_clearance + routing.via_padding;
    for c in components.iter() {
        for port in c.ports.iter() {
            let area = c.port_area(port);
            let real = area.center();
            let Some(cell) = map.to_cell(real) else {
                warn!(
                    "port {} of component {} ({}) lies outside the routing grid; dropped",
                    port.label, c.number_id, c.name
                );
                continue;
            };

            let net = c.net_of(&port.label).cloned();
            let power = net
                .as_ref()
                .map(|n| routing.is_power_net(n))
                .unwrap_or(false);
            let mut dx = ceil_div(area.width() + 2 * clearance, 2 * scale);
            let mut dy = ceil_div(area.height() + 2 * clearance, 2 * scale);
            if power {
                dx += params.trace_width_scaled;
                dy += params.trace_width_scaled;
            }

            let keep_out = KeepOut {
                component: c.number_id,
                label: port.label.clone(),
                net,
                cell,
                real,
                area: CellRect::around(cell, dx, dy),
            };
            map.obstacles.block(&keep_out.area);
            map.ports
                .entry((c.number_id, port.label.clone()))
                .or_default()
                .push(map.keep_outs.len());
            map.keep_outs.push(keep_out);
        }
    }

    map
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::netlist::tests::transistor;
    use crate::netlist::Transform;

    pub(crate) fn grid_config() -> GridConfig {
        GridConfig::builder()
            .scale_factor(1)
            .leeway_x(5)
            .leeway_y(5)
            .build()
            .unwrap()
    }

    pub(crate) fn routing_config() -> RoutingConfig {
        RoutingConfig::builder()
            .trace_width(1)
            .trace_spacing(1)
            .via_clearance(1)
            .via_padding(0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_routing_params_round_up() {
        let config = RoutingConfig::builder()
            .trace_width(10)
            .trace_spacing(10)
            .via_clearance(5)
            .via_padding(5)
            .build()
            .unwrap();
        let params = RoutingParams::new(4, &config);
        assert_eq!(params.trace_width_scaled, 3);
        assert_eq!(params.minimum_segment_length, 8);
        assert_eq!(params.trace_margin, 3);
        assert_eq!(params.paint_half_width(), 4);
    }

    #[test]
    fn test_ports_are_scaled_and_blocked() {
        let mut a = transistor(0, 10, 10);
        let mut b = transistor(1, 10, 10);
        b.transform = Transform::new(30, 0);
        a.schematic_connections.insert(arcstr::literal!("D"), arcstr::literal!("out"));
        b.schematic_connections.insert(arcstr::literal!("G"), arcstr::literal!("out"));

        let map = build_grid(&[a, b], &grid_config(), &routing_config());
        assert_eq!(map.obstacles.width(), 51);
        assert_eq!(map.obstacles.height(), 21);

        let d = map.sites(0, "D").next().unwrap();
        assert_eq!(d.cell, Cell::new(14, 14));
        assert_eq!(d.area, CellRect::around(Cell::new(14, 14), 2, 2));
        assert!(d.is_on("out"));
        let g = map.sites(1, "G").next().unwrap();
        assert_eq!(g.cell, Cell::new(36, 6));

        assert_eq!(
            map.obstacles.states(Cell::new(12, 16)),
            (CellState::Blocked, CellState::Blocked)
        );
        assert!(map.obstacles.is_walkable(Cell::new(20, 10), Axis::Horizontal));
        assert_eq!(map.to_real(Cell::new(14, 14)), Point::new(9, 9));
    }

    #[test]
    fn test_power_ports_get_wider_keep_out() {
        let mut a = transistor(0, 10, 10);
        a.schematic_connections.insert(arcstr::literal!("G"), arcstr::literal!("VDD"));
        a.schematic_connections.insert(arcstr::literal!("D"), arcstr::literal!("out"));
        let map = build_grid(&[a], &grid_config(), &routing_config());
        let g = map.sites(0, "G").next().unwrap();
        let d = map.sites(0, "D").next().unwrap();
        assert_eq!(g.area, CellRect::around(g.cell, 3, 3));
        assert_eq!(d.area, CellRect::around(d.cell, 2, 2));
    }

    #[test]
    fn test_ports_outside_grid_are_dropped() {
        let a = transistor(0, 10, 10);
        let mut pin = transistor(9, 2, 2);
        pin.kind = crate::netlist::ComponentKind::Pin {
            direction: Default::default(),
        };
        pin.transform = Transform::new(-100, 0);
        let map = build_grid(&[a, pin], &grid_config(), &routing_config());
        assert_eq!(map.sites(9, "G").count(), 0);
        assert_eq!(map.sites(0, "G").count(), 1);
    }

    #[test]
    fn test_painting_crossing_traces_blocks() {
        let mut grid = ObstacleGrid::new(5, 5);
        let row = CellRect::new(Cell::new(0, 2), Cell::new(4, 2));
        let col = CellRect::new(Cell::new(2, 0), Cell::new(2, 4));
        grid.paint(&row, Axis::Horizontal);
        assert!(grid.is_walkable(Cell::new(1, 2), Axis::Horizontal));
        assert!(!grid.is_walkable(Cell::new(1, 2), Axis::Vertical));

        grid.paint(&col, Axis::Vertical);
        assert_eq!(
            grid.states(Cell::new(2, 2)),
            (CellState::Blocked, CellState::Blocked)
        );
        assert!(grid.is_walkable(Cell::new(2, 0), Axis::Vertical));
        grid.paint(&row, Axis::Horizontal);
        assert_eq!(grid.state(Cell::new(2, 2), Axis::Horizontal), CellState::Blocked);
    }
}
