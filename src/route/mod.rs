//! Sequential routing of nets over the obstacle grid.
//!
//! Nets are routed one at a time. Each committed path is painted onto the
//! grid, so later nets see the traces of earlier ones.

use std::collections::HashSet;

use arcstr::ArcStr;
use log::{debug, error, info, warn};
use serde::{Serialize, Serializer};

use crate::config::{RouteStrategy, RoutingConfig};
use crate::context::RunContext;
use crate::error::{Result, RoutingError};
use crate::grid::{CellState, GridMap};
use crate::netlist::{Connection, Endpoint, Netlist, Point};

pub mod path;
pub mod search;

pub use crate::grid::Cell;
pub use path::{segments, Segment};
pub use search::{Direction, Search, SearchResult, MAX_GOALS};

fn serialize_display<T: std::fmt::Display, S: Serializer>(
    value: &T,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(value)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Routed,
    /// Power and ground nets are left to a dedicated rail router.
    Skipped,
    Failed(#[serde(serialize_with = "serialize_display")] RoutingError),
}

/// The routing result of one net.
#[derive(Debug, Clone, Serialize)]
pub struct NetRoute {
    pub net: ArcStr,
    pub goals: Vec<Cell>,
    /// Layout coordinates of the goal cells.
    pub real_goals: Vec<Point>,
    pub path: Vec<Cell>,
    pub segments: Vec<Segment>,
    pub cost: i64,
    pub status: RouteStatus,
}

impl NetRoute {
    fn new(net: ArcStr, status: RouteStatus) -> Self {
        Self {
            net,
            goals: Vec::new(),
            real_goals: Vec::new(),
            path: Vec::new(),
            segments: Vec::new(),
            cost: 0,
            status,
        }
    }

    #[inline]
    pub fn is_routed(&self) -> bool {
        matches!(self.status, RouteStatus::Routed)
    }
}

/// Receives each net's route as soon as it is committed.
pub trait TraceWriter {
    fn write_route(&mut self, route: &NetRoute, map: &GridMap) -> Result<()>;
}

impl TraceWriter for Vec<NetRoute> {
    fn write_route(&mut self, route: &NetRoute, _map: &GridMap) -> Result<()> {
        self.push(route.clone());
        Ok(())
    }
}

/// The goal cells of a net and the keep-out zones they were taken from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Goals {
    pub cells: Vec<Cell>,
    pub keep_outs: Vec<usize>,
}

impl Goals {
    fn add(&mut self, cell: Cell, keep_out: usize) {
        if !self.keep_outs.contains(&keep_out) {
            self.keep_outs.push(keep_out);
        }
        if !self.cells.contains(&cell) {
            self.cells.push(cell);
        }
    }
}

fn endpoint_sites(map: &GridMap, ep: &Endpoint) -> Vec<usize> {
    ep.ports
        .iter()
        .filter_map(|label| map.ports.get(&(ep.component, label.clone())))
        .flatten()
        .copied()
        .collect()
}

/// Maps the connections of a net to goal cells.
///
/// For a component connection, the pair of port sites with the smallest
/// Manhattan distance is chosen; the first pair wins ties. A single
/// connection contributes the first site of its endpoint.
pub fn resolve_goals(
    map: &GridMap,
    net: &ArcStr,
    connections: &[&Connection],
) -> std::result::Result<Goals, RoutingError> {
    let mut goals = Goals::default();
    for conn in connections.iter() {
        let starts = endpoint_sites(map, &conn.start);
        let ends = conn
            .end
            .as_ref()
            .map(|e| endpoint_sites(map, e))
            .unwrap_or_default();

        let best = starts
            .iter()
            .flat_map(|&a| ends.iter().map(move |&b| (a, b)))
            .min_by_key(|&(a, b)| map.keep_outs[a].cell.manhattan(&map.keep_outs[b].cell));
        match best {
            Some((a, b)) => {
                goals.add(map.keep_outs[a].cell, a);
                goals.add(map.keep_outs[b].cell, b);
            }
            None => {
                if conn.end.is_some() {
                    warn!(
                        "connection {} - {:?} on net `{net}` resolves on one side only",
                        conn.start.component,
                        conn.end.as_ref().map(|e| e.component)
                    );
                }
                if let Some(&site) = starts.first().or_else(|| ends.first()) {
                    goals.add(map.keep_outs[site].cell, site);
                }
            }
        }
    }

    if goals.cells.is_empty() {
        return Err(RoutingError::UnresolvedGoals { net: net.clone() });
    }
    if goals.cells.len() > MAX_GOALS {
        return Err(RoutingError::TooManyGoals {
            net: net.clone(),
            count: goals.cells.len(),
            max: MAX_GOALS,
        });
    }
    Ok(goals)
}

/// Orders nets for routing.
///
/// Nets named in `custom` come first, in that order; the rest follow in
/// `default` order. Custom names that match no net are ignored.
pub fn order_nets(default: &[ArcStr], custom: &[ArcStr]) -> Vec<ArcStr> {
    let known = default.iter().collect::<HashSet<_>>();
    let mut seen = HashSet::new();
    let mut order = Vec::with_capacity(default.len());
    for net in custom.iter() {
        if !known.contains(net) {
            warn!("net `{net}` in the routing order does not exist; ignored");
            continue;
        }
        if seen.insert(net.clone()) {
            order.push(net.clone());
        }
    }
    for net in default.iter() {
        if seen.insert(net.clone()) {
            order.push(net.clone());
        }
    }
    order
}

/// Saved layer states of cells unlocked for one net.
struct Unlocked(Vec<(Cell, (CellState, CellState))>);

pub struct RoutingEngine {
    config: RoutingConfig,
}

impl RoutingEngine {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Routes every net of `netlist` in priority order, handing each result
    /// to `writer`.
    pub fn route<W: TraceWriter>(
        &self,
        map: &mut GridMap,
        netlist: &Netlist,
        ctx: &mut RunContext,
        writer: &mut W,
    ) -> Result<Vec<NetRoute>> {
        let order = order_nets(&netlist.nets(), &self.config.net_order);
        let mut routes = Vec::with_capacity(order.len());
        for net in order {
            let connections = netlist.connections_on(&net).collect::<Vec<_>>();
            let route = self.route_net(map, &net, &connections, ctx);
            writer.write_route(&route, map)?;
            routes.push(route);
        }
        info!(
            "routing done: {} routed, {} failed, {} skipped",
            ctx.nets_routed, ctx.nets_failed, ctx.nets_skipped
        );
        Ok(routes)
    }

    /// Routes one net and commits its path to the grid.
    ///
    /// Failures are logged and reported in the returned status; the grid is
    /// left unchanged for a failed net.
    pub fn route_net(
        &self,
        map: &mut GridMap,
        net: &ArcStr,
        connections: &[&Connection],
        ctx: &mut RunContext,
    ) -> NetRoute {
        if self.config.is_power_net(net) {
            debug!("skipping power net `{net}`");
            ctx.nets_skipped += 1;
            return NetRoute::new(net.clone(), RouteStatus::Skipped);
        }

        let goals = match resolve_goals(map, net, connections) {
            Ok(goals) => goals,
            Err(e) => return self.fail(net, Vec::new(), e, map, ctx),
        };
        debug!("net `{net}`: goals {:?}", goals.cells);

        let unlocked = unlock(map, net, &goals);
        let found = self.search(map, net, &goals.cells, ctx);
        relock(map, unlocked);

        let found = match found {
            Ok(found) => found,
            Err(e) => return self.fail(net, goals.cells, e, map, ctx),
        };

        let segments = segments(&found.path);
        let half_width = map.params.paint_half_width();
        for seg in segments.iter() {
            map.obstacles.paint(&seg.footprint(half_width), seg.axis());
        }

        info!(
            "routed net `{net}`: {} goals, {} segments, cost {}",
            goals.cells.len(),
            segments.len(),
            found.cost
        );
        ctx.nets_routed += 1;
        NetRoute {
            net: net.clone(),
            real_goals: goals.cells.iter().map(|&c| map.to_real(c)).collect(),
            goals: goals.cells,
            path: found.path,
            segments,
            cost: found.cost,
            status: RouteStatus::Routed,
        }
    }

    fn fail(
        &self,
        net: &ArcStr,
        goals: Vec<Cell>,
        e: RoutingError,
        map: &GridMap,
        ctx: &mut RunContext,
    ) -> NetRoute {
        error!("failed to route net `{net}`: {e}");
        ctx.nets_failed += 1;
        let mut route = NetRoute::new(net.clone(), RouteStatus::Failed(e));
        route.real_goals = goals.iter().map(|&c| map.to_real(c)).collect();
        route.goals = goals;
        route
    }

    fn search(
        &self,
        map: &GridMap,
        net: &ArcStr,
        goals: &[Cell],
        ctx: &mut RunContext,
    ) -> std::result::Result<SearchResult, RoutingError> {
        let Some(search) = Search::new(&map.obstacles, goals, map.params.minimum_segment_length)
        else {
            return Err(RoutingError::TooManyGoals {
                net: net.clone(),
                count: goals.len(),
                max: MAX_GOALS,
            });
        };
        let mut best: Option<SearchResult> = None;
        for start in 0..goals.len() {
            let outcome = search.run(start);
            ctx.search_expansions += outcome.expansions;
            let Some(result) = outcome.result else {
                debug!("no path from start goal {}", goals[start]);
                continue;
            };
            match self.config.strategy {
                RouteStrategy::Once => return Ok(result),
                RouteStrategy::BestStart => {
                    if best.as_ref().map(|b| result.cost < b.cost).unwrap_or(true) {
                        best = Some(result);
                    }
                }
            }
        }
        best.ok_or_else(|| RoutingError::NoPath {
            net: net.clone(),
            goals: goals.to_vec(),
        })
    }
}

/// Frees the keep-out zones of a net's goal ports, except cells that also
/// lie in a keep-out of another net.
fn unlock(map: &mut GridMap, net: &str, goals: &Goals) -> Unlocked {
    let foreign = map
        .keep_outs
        .iter()
        .enumerate()
        .filter(|(i, k)| !goals.keep_outs.contains(i) && !k.is_on(net))
        .map(|(_, k)| k.area)
        .collect::<Vec<_>>();

    let mut saved = Vec::new();
    let mut done = HashSet::new();
    for &i in goals.keep_outs.iter() {
        let area = map.keep_outs[i].area;
        for cell in area.cells() {
            if !map.obstacles.in_bounds(cell)
                || foreign.iter().any(|f| f.contains(cell))
                || !done.insert(cell)
            {
                continue;
            }
            saved.push((cell, map.obstacles.states(cell)));
            map.obstacles
                .set_states(cell, (CellState::Free, CellState::Free));
        }
    }
    Unlocked(saved)
}

fn relock(map: &mut GridMap, unlocked: Unlocked) {
    for (cell, states) in unlocked.0 {
        map.obstacles.set_states(cell, states);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::tests::{grid_config, routing_config};
    use crate::grid::{build_grid, CellRect};
    use crate::netlist::tests::{connect, transistor};
    use crate::netlist::{Axis, Component, ComponentId, Int, Port, Rect, Transform};

    /// Two transistors side by side, drain of 0 to gate of 1 on `out`.
    fn pair() -> Netlist {
        let mut a = transistor(0, 10, 10);
        let mut b = transistor(1, 10, 10);
        b.transform = Transform::new(30, 0);
        a.schematic_connections.insert(arcstr::literal!("G"), arcstr::literal!("in"));
        a.schematic_connections.insert(arcstr::literal!("D"), arcstr::literal!("out"));
        b.schematic_connections.insert(arcstr::literal!("G"), arcstr::literal!("out"));
        b.schematic_connections.insert(arcstr::literal!("D"), arcstr::literal!("vdd"));
        Netlist {
            components: vec![a, b],
            component_connections: vec![connect(0, "D", 1, "G", "out")],
            ..Default::default()
        }
    }

    #[test]
    fn test_order_nets_puts_custom_first() {
        let default = vec![arcstr::literal!("a"), arcstr::literal!("b"), arcstr::literal!("c")];
        let custom = vec![arcstr::literal!("c"), arcstr::literal!("zz"), arcstr::literal!("a")];
        assert_eq!(
            order_nets(&default, &custom),
            vec![arcstr::literal!("c"), arcstr::literal!("a"), arcstr::literal!("b")]
        );
    }

    #[test]
    fn test_goals_pick_closest_port_pair() {
        let mut netlist = pair();
        // Give the gate of component 1 a second, closer site.
        netlist.components[1].ports.push(crate::netlist::Port {
            label: arcstr::literal!("G"),
            area: crate::netlist::Rect::from_sides(0, 8, 2, 10),
        });
        let map = build_grid(&netlist.components, &grid_config(), &routing_config());
        let conns = netlist.connections_on("out").collect::<Vec<_>>();
        let goals = resolve_goals(&map, &arcstr::literal!("out"), &conns).unwrap();
        assert_eq!(goals.cells, vec![Cell::new(14, 14), Cell::new(36, 14)]);
    }

    #[test]
    fn test_route_pair_and_relock() {
        let netlist = pair();
        let mut map = build_grid(&netlist.components, &grid_config(), &routing_config());
        let engine = RoutingEngine::new(routing_config());
        let mut ctx = RunContext::new();
        let mut written = Vec::new();
        let routes = engine.route(&mut map, &netlist, &mut ctx, &mut written).unwrap();

        assert_eq!(routes.len(), 1);
        assert_eq!(written.len(), 1);
        let route = &routes[0];
        assert!(route.is_routed(), "{:?}", route.status);
        assert_eq!(ctx.nets_routed, 1);
        assert_eq!(route.goals, vec![Cell::new(14, 14), Cell::new(36, 6)]);
        assert_eq!(route.real_goals, vec![Point::new(9, 9), Point::new(31, 1)]);
        assert!(!route.segments.is_empty());

        let ends = [route.path[0], *route.path.last().unwrap()];
        assert!(ends.contains(&Cell::new(14, 14)) && ends.contains(&Cell::new(36, 6)));
        // Goal ports are blocked again after routing.
        assert_eq!(
            map.obstacles.states(Cell::new(14, 14)),
            (CellState::Blocked, CellState::Blocked)
        );
        // The keep-out of the unrelated gate of component 0 is never entered.
        let foreign = CellRect::around(Cell::new(6, 6), 2, 2);
        assert!(route.path.iter().all(|c| !foreign.contains(*c)));
    }

    #[test]
    fn test_power_nets_are_skipped() {
        let mut netlist = pair();
        netlist.single_connections.push(Connection {
            start: Endpoint {
                component: 1,
                device: arcstr::literal!("nmos"),
                ports: vec![arcstr::literal!("D")],
            },
            end: None,
            net: arcstr::literal!("VDD"),
        });
        let mut map = build_grid(&netlist.components, &grid_config(), &routing_config());
        let engine = RoutingEngine::new(routing_config());
        let mut ctx = RunContext::new();
        let routes = engine
            .route(&mut map, &netlist, &mut ctx, &mut Vec::new())
            .unwrap();
        assert_eq!(routes.len(), 2);
        assert!(matches!(routes[1].status, RouteStatus::Skipped));
        assert_eq!(ctx.nets_skipped, 1);
    }

    #[test]
    fn test_unresolvable_net_fails_without_aborting() {
        let mut netlist = pair();
        netlist.component_connections.insert(0, connect(0, "X", 1, "Y", "ghost"));
        let mut map = build_grid(&netlist.components, &grid_config(), &routing_config());
        let engine = RoutingEngine::new(routing_config());
        let mut ctx = RunContext::new();
        let routes = engine
            .route(&mut map, &netlist, &mut ctx, &mut Vec::new())
            .unwrap();
        assert!(matches!(
            routes[0].status,
            RouteStatus::Failed(RoutingError::UnresolvedGoals { .. })
        ));
        assert!(routes[0].segments.is_empty());
        assert!(routes[1].is_routed());
        assert_eq!(ctx.nets_failed, 1);
    }

    #[test]
    fn test_later_net_cannot_cross_earlier_trace() {
        let netlist = pair();
        let mut map = build_grid(&netlist.components, &grid_config(), &routing_config());
        // A committed horizontal trace across the full grid width on row 10.
        let width = map.obstacles.width() as i64;
        map.obstacles.paint(
            &CellRect::new(Cell::new(0, 10), Cell::new(width - 1, 10)),
            Axis::Horizontal,
        );
        let engine = RoutingEngine::new(routing_config());
        let mut ctx = RunContext::new();
        let conns = netlist.connections_on("out").collect::<Vec<_>>();
        let route = engine.route_net(&mut map, &arcstr::literal!("out"), &conns, &mut ctx);
        assert!(matches!(
            route.status,
            RouteStatus::Failed(RoutingError::NoPath { .. })
        ));
        assert_eq!(route.goals.len(), 2);
    }

    /// A 2 x 2 device at `(x, y)` with one point port `P` at its center.
    fn pad(id: ComponentId, x: Int, y: Int, net: &str) -> Component {
        let mut c = transistor(id, 2, 2);
        c.ports = vec![Port {
            label: arcstr::literal!("P"),
            area: Rect::from_sides(1, 1, 1, 1),
        }];
        c.schematic_connections.clear();
        c.schematic_connections
            .insert(arcstr::literal!("P"), ArcStr::from(net));
        c.transform = Transform::new(x, y);
        c
    }

    #[test]
    fn test_committed_trace_is_shared_only_along_its_axis() {
        // `across` runs on row 26 from x = 6 to 46, `along` on row 25 from
        // x = 50 to 30, and `up` from (26, 6) to (26, 46).
        let netlist = Netlist {
            components: vec![
                pad(0, 0, 20, "across"),
                pad(1, 40, 20, "across"),
                pad(2, 20, 0, "up"),
                pad(3, 20, 40, "up"),
                pad(4, 44, 19, "along"),
                pad(5, 24, 19, "along"),
            ],
            component_connections: vec![
                connect(0, "P", 1, "P", "across"),
                connect(4, "P", 5, "P", "along"),
                connect(2, "P", 3, "P", "up"),
            ],
            ..Default::default()
        };
        let routing = RoutingConfig::builder()
            .trace_width(1)
            .trace_spacing(1)
            .via_clearance(0)
            .via_padding(0)
            .build()
            .unwrap();
        let mut map = build_grid(&netlist.components, &grid_config(), &routing);
        assert_eq!(map.params.paint_half_width(), 1);

        let engine = RoutingEngine::new(routing);
        let mut ctx = RunContext::new();
        let routes = engine
            .route(&mut map, &netlist, &mut ctx, &mut Vec::new())
            .unwrap();
        assert_eq!(ctx.nets_routed, 3);
        let names = routes.iter().map(|r| r.net.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["across", "along", "up"]);

        let across = &routes[0];
        assert_eq!(across.cost, 40);
        assert!(across.path.iter().all(|c| c.y == 26));

        // Row 25 lies inside the painted footprint of `across`; `along`
        // enters it from the open end and follows it at unit cost.
        let along = &routes[1];
        assert_eq!(along.cost, 20);
        assert!(along.path.iter().all(|c| c.y == 25));

        // `up` has to go around the horizontal traces instead of crossing.
        let up = &routes[2];
        assert!(up.is_routed());
        assert!(up.cost > 40);
        assert!(up
            .path
            .iter()
            .filter(|c| (25..=27).contains(&c.y))
            .all(|c| c.x < 5 || c.x > 47));
    }

    #[test]
    fn test_best_start_is_no_worse_than_once() {
        let netlist = pair();
        let conns = netlist.connections_on("out").collect::<Vec<_>>();
        let net = arcstr::literal!("out");

        let mut map = build_grid(&netlist.components, &grid_config(), &routing_config());
        let once = RoutingEngine::new(routing_config()).route_net(
            &mut map,
            &net,
            &conns,
            &mut RunContext::new(),
        );

        let mut config = routing_config();
        config.strategy = RouteStrategy::BestStart;
        let mut map = build_grid(&netlist.components, &grid_config(), &routing_config());
        let best =
            RoutingEngine::new(config).route_net(&mut map, &net, &conns, &mut RunContext::new());

        assert!(once.is_routed() && best.is_routed());
        assert!(best.cost <= once.cost);
    }
}
