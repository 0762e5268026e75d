//! Builds the placement MILP of one stage.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use log::debug;

use crate::config::{MirrorAxis, PlacementConfig};
use crate::error::PlacementError;
use crate::netlist::{
    Axis, Component, ComponentId, Connection, Endpoint, Int, Overlap, OverlapClass,
};

use super::candidates::{axis_steps, candidate_positions, fitting};
use super::model::{Assignment, LinExpr, Model, Sense, VarId};

/// The components and connections solved together as one sub-problem.
pub struct Stage<'a> {
    pub name: String,
    pub components: Vec<&'a Component>,
    /// Connections whose endpoints all lie in `components`.
    pub connections: Vec<&'a Connection>,
}

struct Indicators {
    id: ComponentId,
    x: Vec<(Int, VarId)>,
    y: Vec<(Int, VarId)>,
}

fn coord(indicators: &[(Int, VarId)]) -> LinExpr {
    indicators
        .iter()
        .fold(LinExpr::new(), |e, &(v, var)| e.term(var, v as f64))
}

/// Picks the candidate with the largest indicator; the first one on ties.
fn decode_axis(indicators: &[(Int, VarId)], values: &Assignment) -> Int {
    let mut best = indicators[0];
    for &cand in indicators.iter().skip(1) {
        if values.value(cand.1) > values.value(best.1) {
            best = cand;
        }
    }
    best.0
}

/// The clearance `(x, y)` required between two components on the side
/// where they are separated.
pub fn clearance(
    a: &Component,
    b: &Component,
    overlap: &Overlap,
    config: &PlacementConfig,
) -> (Int, Int) {
    let oa = a.class().map(|c| config.offset(c)).unwrap_or_default();
    let ob = b.class().map(|c| config.offset(c)).unwrap_or_default();
    match overlap.classify(a.number_id, b.number_id) {
        OverlapClass::Both => (0, 0),
        OverlapClass::Top => (oa.x, 0),
        OverlapClass::Side => (0, oa.y),
        OverlapClass::None => (oa.x.max(ob.x), oa.y.max(ob.y)),
    }
}

fn anchor(component: &Component, endpoint: &Endpoint) -> Option<(f64, f64)> {
    endpoint
        .ports
        .iter()
        .find_map(|label| component.ports_labeled(label).next())
        .map(|port| port.area.center())
}

pub struct Formulation {
    pub model: Model,
    indicators: Vec<Indicators>,
}

impl Formulation {
    pub fn build(
        stage: &Stage<'_>,
        overlap: &Overlap,
        grid_size: Int,
        config: &PlacementConfig,
    ) -> Result<Self, PlacementError> {
        let g = grid_size as f64;
        let mut model = Model::new();
        let comps = &stage.components;

        let mut seen = HashSet::new();
        if let Some(c) = comps.iter().find(|c| !seen.insert(c.number_id)) {
            return Err(PlacementError::DuplicateComponent {
                stage: stage.name.clone(),
                id: c.number_id,
            });
        }

        let xs = candidate_positions(
            grid_size,
            config.unit(Axis::Horizontal),
            &axis_steps(comps, Axis::Horizontal, config),
        );
        let ys = candidate_positions(
            grid_size,
            config.unit(Axis::Vertical),
            &axis_steps(comps, Axis::Vertical, config),
        );

        let mut indicators = Vec::with_capacity(comps.len());
        for c in comps.iter() {
            let offset = c.class().map(|k| config.offset(k)).unwrap_or_default();
            let fx = fitting(&xs, c.size.width, offset.x / 2, grid_size);
            let fy = fitting(&ys, c.size.height, offset.y / 2, grid_size);
            if fx.is_empty() || fy.is_empty() {
                return Err(PlacementError::NoCandidates {
                    id: c.number_id,
                    name: c.name.clone(),
                });
            }

            let id = c.number_id;
            let x = fx
                .into_iter()
                .map(|v| Ok((v, model.add_binary(format!("x[{id},{v}]"))?)))
                .collect::<Result<Vec<_>, PlacementError>>()?;
            let y = fy
                .into_iter()
                .map(|v| Ok((v, model.add_binary(format!("y[{id},{v}]"))?)))
                .collect::<Result<Vec<_>, PlacementError>>()?;

            let one_x = x.iter().fold(LinExpr::new(), |e, &(_, var)| e.term(var, 1.0));
            let one_y = y.iter().fold(LinExpr::new(), |e, &(_, var)| e.term(var, 1.0));
            model.constrain(format!("one_x[{id}]"), one_x, Sense::Eq, 1.0);
            model.constrain(format!("one_y[{id}]"), one_y, Sense::Eq, 1.0);

            indicators.push(Indicators { id, x, y });
        }

        let xe = indicators.iter().map(|i| coord(&i.x)).collect::<Vec<_>>();
        let ye = indicators.iter().map(|i| coord(&i.y)).collect::<Vec<_>>();

        // Non-overlap: exactly one of left, right, below, above holds.
        for ((i, a), (j, b)) in comps.iter().enumerate().tuple_combinations() {
            let (cx, cy) = clearance(a, b, overlap, config);
            let (ia, ib) = (a.number_id, b.number_id);
            let mx = g + cx as f64;
            let my = g + cy as f64;
            let (wa, ha) = (a.size.width as f64, a.size.height as f64);
            let (wb, hb) = (b.size.width as f64, b.size.height as f64);

            let left = model.add_binary(format!("left[{ia},{ib}]"))?;
            let right = model.add_binary(format!("right[{ia},{ib}]"))?;
            let below = model.add_binary(format!("below[{ia},{ib}]"))?;
            let above = model.add_binary(format!("above[{ia},{ib}]"))?;

            model.constrain(
                format!("left[{ia},{ib}]"),
                xe[i].clone().plus(&xe[j], -1.0).term(left, mx),
                Sense::Le,
                mx - wa - cx as f64,
            );
            model.constrain(
                format!("right[{ia},{ib}]"),
                xe[j].clone().plus(&xe[i], -1.0).term(right, mx),
                Sense::Le,
                mx - wb - cx as f64,
            );
            model.constrain(
                format!("below[{ia},{ib}]"),
                ye[i].clone().plus(&ye[j], -1.0).term(below, my),
                Sense::Le,
                my - ha - cy as f64,
            );
            model.constrain(
                format!("above[{ia},{ib}]"),
                ye[j].clone().plus(&ye[i], -1.0).term(above, my),
                Sense::Le,
                my - hb - cy as f64,
            );
            model.constrain(
                format!("disjoint[{ia},{ib}]"),
                LinExpr::from(left)
                    .term(right, 1.0)
                    .term(below, 1.0)
                    .term(above, 1.0),
                Sense::Eq,
                1.0,
            );
        }

        let index: HashMap<ComponentId, usize> = comps
            .iter()
            .enumerate()
            .map(|(i, c)| (c.number_id, i))
            .collect();

        if config.mirror.enabled {
            for (a, b) in overlap.mirror_pairs() {
                let (Some(&i), Some(&j)) = (index.get(&a), index.get(&b)) else {
                    continue;
                };
                let (wa, ha) = (comps[i].size.width as f64, comps[i].size.height as f64);
                let vertical = matches!(config.mirror.axis, MirrorAxis::Vertical | MirrorAxis::Both);
                let horizontal =
                    matches!(config.mirror.axis, MirrorAxis::Horizontal | MirrorAxis::Both);
                if vertical {
                    model.constrain(
                        format!("mirror_v_x[{a},{b}]"),
                        xe[i].clone().plus(&xe[j], 1.0),
                        Sense::Eq,
                        g - wa,
                    );
                }
                if horizontal {
                    model.constrain(
                        format!("mirror_h_y[{a},{b}]"),
                        ye[i].clone().plus(&ye[j], 1.0),
                        Sense::Eq,
                        g - ha,
                    );
                }
                if vertical && !horizontal {
                    model.constrain(
                        format!("mirror_v_y[{a},{b}]"),
                        ye[i].clone().plus(&ye[j], -1.0),
                        Sense::Eq,
                        0.0,
                    );
                }
                if horizontal && !vertical {
                    model.constrain(
                        format!("mirror_h_x[{a},{b}]"),
                        xe[i].clone().plus(&xe[j], -1.0),
                        Sense::Eq,
                        0.0,
                    );
                }
            }
        }

        // Wirelength: |dx| and |dy| per connection, anchored at the first
        // matching port of each endpoint.
        let mut wirelength = LinExpr::new();
        for (n, conn) in stage.connections.iter().enumerate() {
            let Some(end) = conn.end.as_ref() else {
                continue;
            };
            let (Some(&i), Some(&j)) = (index.get(&conn.start.component), index.get(&end.component))
            else {
                continue;
            };
            let (Some(pa), Some(pb)) = (anchor(comps[i], &conn.start), anchor(comps[j], end)) else {
                debug!(
                    "connection {n} on net `{}` has no matching ports; left out of the objective",
                    conn.net
                );
                continue;
            };

            let dx = model.add_continuous(format!("dx[{n}]"), 0.0, g)?;
            let dy = model.add_continuous(format!("dy[{n}]"), 0.0, g)?;
            let delta_x = xe[i].clone().plus(&xe[j], -1.0);
            let delta_y = ye[i].clone().plus(&ye[j], -1.0);
            model.constrain(
                format!("dx_pos[{n}]"),
                LinExpr::from(dx).plus(&delta_x, -1.0),
                Sense::Ge,
                pa.0 - pb.0,
            );
            model.constrain(
                format!("dx_neg[{n}]"),
                LinExpr::from(dx).plus(&delta_x, 1.0),
                Sense::Ge,
                pb.0 - pa.0,
            );
            model.constrain(
                format!("dy_pos[{n}]"),
                LinExpr::from(dy).plus(&delta_y, -1.0),
                Sense::Ge,
                pa.1 - pb.1,
            );
            model.constrain(
                format!("dy_neg[{n}]"),
                LinExpr::from(dy).plus(&delta_y, 1.0),
                Sense::Ge,
                pb.1 - pa.1,
            );
            wirelength.add_term(dx, 1.0);
            wirelength.add_term(dy, 1.0);
        }

        // Bounding box of the stage.
        let x_min = model.add_continuous("x_min", 0.0, g)?;
        let x_max = model.add_continuous("x_max", 0.0, g)?;
        let y_min = model.add_continuous("y_min", 0.0, g)?;
        let y_max = model.add_continuous("y_max", 0.0, g)?;
        for (i, c) in comps.iter().enumerate() {
            let id = c.number_id;
            model.constrain(
                format!("x_max[{id}]"),
                LinExpr::from(x_max).plus(&xe[i], -1.0),
                Sense::Ge,
                c.size.width as f64,
            );
            model.constrain(
                format!("x_min[{id}]"),
                LinExpr::from(x_min).plus(&xe[i], -1.0),
                Sense::Le,
                0.0,
            );
            model.constrain(
                format!("y_max[{id}]"),
                LinExpr::from(y_max).plus(&ye[i], -1.0),
                Sense::Ge,
                c.size.height as f64,
            );
            model.constrain(
                format!("y_min[{id}]"),
                LinExpr::from(y_min).plus(&ye[i], -1.0),
                Sense::Le,
                0.0,
            );
        }

        let w = config.weights;
        let objective = LinExpr::new()
            .plus(&wirelength, w.alpha)
            .term(x_max, w.beta)
            .term(x_min, -w.beta)
            .term(y_max, w.theta)
            .term(y_min, -w.theta);
        model.set_objective(objective);

        debug!(
            "stage `{}`: {} variables, {} constraints, {} x candidates, {} y candidates",
            stage.name,
            model.vars().len(),
            model.constraints().len(),
            xs.len(),
            ys.len()
        );

        Ok(Self { model, indicators })
    }

    /// Reads component coordinates out of an assignment.
    pub fn decode(&self, values: &Assignment) -> Vec<(ComponentId, Int, Int)> {
        self.indicators
            .iter()
            .map(|i| (i.id, decode_axis(&i.x, values), decode_axis(&i.y, values)))
            .collect()
    }
}
