//! MILP placement of placeable components on a discrete candidate grid.
//!
//! Components are grouped into stages by device class. Each stage is
//! formulated and solved on its own, seeing only the connections internal
//! to it, and the stage results are then stacked along the configured axis.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use itertools::Itertools;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{PlacementConfig, SolveMode};
use crate::context::RunContext;
use crate::error::PlacementError;
use crate::netlist::{Axis, Component, ComponentId, Connection, DeviceClass, Int, Overlap, Rect};

pub mod candidates;
pub mod formulation;
pub mod model;
pub mod solver;

use formulation::{clearance, Formulation, Stage};
use model::Assignment;
use solver::{BackendError, DefaultBackend, MilpBackend, SolveOptions, SolveStatus, WarmStart};

/// Tolerance used when checking assignments against a model.
const FEASIBILITY_TOL: f64 = 1e-5;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionSource {
    Solver,
    WarmStart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub components: usize,
    pub objective: f64,
    pub source: SolutionSource,
    pub status: SolveStatus,
}

/// Placement coordinates keyed by component id.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementResult {
    pub x: BTreeMap<ComponentId, Int>,
    pub y: BTreeMap<ComponentId, Int>,
    pub stages: Vec<StageReport>,
}

impl PlacementResult {
    pub fn position(&self, id: ComponentId) -> Option<(Int, Int)> {
        Some((*self.x.get(&id)?, *self.y.get(&id)?))
    }

    /// Writes the placement into the transforms of `components`.
    ///
    /// Components without a placed position keep their transform.
    pub fn apply(&self, components: &mut [Component]) {
        for c in components.iter_mut() {
            if let Some((x, y)) = self.position(c.number_id) {
                c.transform.x = x;
                c.transform.y = y;
            }
        }
    }
}

fn separated(a: &Rect, b: &Rect, cx: Int, cy: Int) -> bool {
    a.p1.x + cx <= b.p0.x
        || b.p1.x + cx <= a.p0.x
        || a.p1.y + cy <= b.p0.y
        || b.p1.y + cy <= a.p0.y
}

fn overlapping_pairs(
    boxes: &[(&Component, Rect)],
    overlap: &Overlap,
    config: &PlacementConfig,
) -> Vec<(ComponentId, ComponentId)> {
    boxes
        .iter()
        .tuple_combinations()
        .filter(|((a, ra), (b, rb))| {
            let (cx, cy) = clearance(a, b, overlap, config);
            !separated(ra, rb, cx, cy)
        })
        .map(|((a, _), (b, _))| (a.number_id, b.number_id))
        .collect()
}

/// Returns every pair of placeable components that violates the
/// non-overlap rule under the current transforms.
pub fn check_overlaps(
    components: &[Component],
    overlap: &Overlap,
    config: &PlacementConfig,
) -> Vec<(ComponentId, ComponentId)> {
    let boxes = components
        .iter()
        .filter(|c| c.is_placeable())
        .map(|c| (c, c.bbox()))
        .collect::<Vec<_>>();
    overlapping_pairs(&boxes, overlap, config)
}

struct SolvedStage {
    classes: Vec<DeviceClass>,
    positions: Vec<(ComponentId, Int, Int)>,
    sizes: BTreeMap<ComponentId, (Int, Int)>,
}

impl SolvedStage {
    /// Lowest and highest extent of the stage along `axis`.
    fn span(&self, axis: Axis) -> (Int, Int) {
        let (mut lo, mut hi) = (Int::MAX, Int::MIN);
        for &(id, x, y) in self.positions.iter() {
            let (w, h) = self.sizes[&id];
            let (start, extent) = match axis {
                Axis::Horizontal => (x, w),
                Axis::Vertical => (y, h),
            };
            lo = lo.min(start);
            hi = hi.max(start + extent);
        }
        (lo, hi)
    }
}

pub struct PlacementEngine<B = DefaultBackend> {
    config: PlacementConfig,
    backend: B,
}

impl PlacementEngine<DefaultBackend> {
    pub fn new(config: PlacementConfig) -> Self {
        Self::with_backend(config, DefaultBackend::default())
    }
}

impl<B: MilpBackend> PlacementEngine<B> {
    pub fn with_backend(config: PlacementConfig, backend: B) -> Self {
        Self { config, backend }
    }

    #[inline]
    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    pub fn solve_placement(
        &self,
        components: &[Component],
        connections: &[Connection],
        overlap: &Overlap,
        grid_size: Int,
        ctx: &mut RunContext,
    ) -> Result<PlacementResult, PlacementError> {
        let solver = &self.config.solver;
        let warm_path = solver.warm_start.as_ref();
        let mut warm = match warm_path {
            Some(path) => Some(WarmStart::load(path)?),
            None => None,
        };

        let staged = self.config.stages.iter().flatten().collect::<HashSet<_>>();
        for c in components.iter() {
            if let Some(class) = c.class() {
                if !staged.contains(&class) {
                    warn!(
                        "component {} ({}) is a {class}, which no placement stage covers; left in place",
                        c.number_id, c.name
                    );
                }
            }
        }

        let mut solved = Vec::new();
        let mut reports = Vec::new();

        for classes in self.config.stages.iter() {
            let name = classes.iter().join("+");
            let members = components
                .iter()
                .filter(|c| c.class().map(|k| classes.contains(&k)).unwrap_or(false))
                .collect::<Vec<_>>();
            if members.is_empty() {
                debug!("stage `{name}` has no components; skipping");
                continue;
            }

            let ids = members.iter().map(|c| c.number_id).collect::<HashSet<_>>();
            let stage = Stage {
                name: name.clone(),
                components: members,
                connections: connections
                    .iter()
                    .filter(|c| !c.is_single() && c.is_internal_to(&ids))
                    .collect(),
            };
            info!(
                "placing stage `{name}`: {} components, {} connections",
                stage.components.len(),
                stage.connections.len()
            );

            let formulation = Formulation::build(&stage, overlap, grid_size, &self.config)?;
            let model = &formulation.model;

            let hint = warm
                .as_ref()
                .map(|w| w.hint_for(&name, model))
                .unwrap_or_default();
            let incumbent = Assignment::from_matched(model, &hint).filter(|values| {
                match model.first_violation(values, FEASIBILITY_TOL) {
                    None => true,
                    Some(reason) => {
                        debug!("warm start for stage `{name}` is not a feasible incumbent: {reason}");
                        false
                    }
                }
            });

            let opts = SolveOptions {
                mode: solver.mode,
                gap: solver.gap_for(classes),
                time_limit: solver.time_limit(),
                threads: solver.threads,
                verbose: solver.verbose,
            };

            let start = Instant::now();
            let outcome = self.backend.solve(model, &opts, &hint);
            ctx.solve_time += start.elapsed();

            let outcome = match outcome {
                Ok(solved)
                    if solved.status == SolveStatus::TimeLimit
                        && opts.mode == SolveMode::Mip
                        && !model.is_feasible(&solved.values, FEASIBILITY_TOL) =>
                {
                    debug!("stage `{name}` stopped at the time limit without a feasible solution");
                    Err(BackendError::TimedOut)
                }
                other => other,
            };

            let (values, source, status) = match outcome {
                Ok(solved) => (solved.values, SolutionSource::Solver, solved.status),
                Err(BackendError::TimedOut) => match incumbent {
                    Some(values) => {
                        warn!("stage `{name}` hit the time limit; using the warm start solution");
                        ctx.stages_from_warm_start += 1;
                        (values, SolutionSource::WarmStart, SolveStatus::TimeLimit)
                    }
                    None => {
                        return Err(PlacementError::Timeout {
                            stage: name,
                            limit: opts.time_limit.unwrap_or_default(),
                        })
                    }
                },
                Err(BackendError::Infeasible) => {
                    return Err(PlacementError::Infeasible { stage: name })
                }
                Err(e @ (BackendError::Unbounded | BackendError::Other(_))) => {
                    return Err(PlacementError::Solver {
                        stage: name,
                        reason: e.to_string(),
                    })
                }
            };

            let objective = model.objective_value(&values);
            info!(
                "stage `{name}` placed: objective {objective:.3} ({status:?}, gap target {})",
                opts.gap
            );
            ctx.stages_solved += 1;

            if source == SolutionSource::Solver {
                if let (Some(w), Some(path)) = (warm.as_mut(), warm_path) {
                    w.record(&name, model, &values);
                    w.save(path)?;
                }
            }

            let positions = formulation.decode(&values);
            if opts.mode == SolveMode::Relaxation {
                let boxes = stage
                    .components
                    .iter()
                    .zip(positions.iter())
                    .map(|(c, &(_, x, y))| {
                        (*c, Rect::from_sides(x, y, x + c.size.width, y + c.size.height))
                    })
                    .collect::<Vec<_>>();
                for (a, b) in overlapping_pairs(&boxes, overlap, &self.config) {
                    error!("relaxed placement of stage `{name}` overlaps components {a} and {b}");
                }
            }

            reports.push(StageReport {
                name,
                components: stage.components.len(),
                objective,
                source,
                status,
            });
            solved.push(SolvedStage {
                classes: classes.clone(),
                sizes: stage
                    .components
                    .iter()
                    .map(|c| (c.number_id, (c.size.width, c.size.height)))
                    .collect(),
                positions,
            });
        }

        Ok(self.stack(solved, reports))
    }

    /// Stacks solved stages along the configured axis, in stage order.
    fn stack(&self, solved: Vec<SolvedStage>, stages: Vec<StageReport>) -> PlacementResult {
        let axis = self.config.stack_axis;
        let mut result = PlacementResult {
            stages,
            ..Default::default()
        };
        let mut cursor = None;

        for (k, stage) in solved.iter().enumerate() {
            let (lo, hi) = stage.span(axis);
            let shift = cursor.map(|c: Int| c - lo).unwrap_or(0);
            if let Some(next) = solved.get(k + 1) {
                let spacing = stage
                    .classes
                    .iter()
                    .chain(next.classes.iter())
                    .map(|&class| self.config.offset(class).along(axis))
                    .max()
                    .unwrap_or(0);
                cursor = Some(hi + shift + spacing);
            }
            if shift != 0 {
                debug!("shifting stage {k} by {shift} along the {axis} axis");
            }
            for &(id, x, y) in stage.positions.iter() {
                let (x, y) = match axis {
                    Axis::Horizontal => (x + shift, y),
                    Axis::Vertical => (x, y + shift),
                };
                result.x.insert(id, x);
                result.y.insert(id, y);
            }
        }
        result
    }
}

/// Places `components` with the default solver backend.
pub fn solve_placement(
    components: &[Component],
    connections: &[Connection],
    overlap: &Overlap,
    grid_size: Int,
    config: &PlacementConfig,
    ctx: &mut RunContext,
) -> Result<PlacementResult, PlacementError> {
    PlacementEngine::new(config.clone()).solve_placement(
        components,
        connections,
        overlap,
        grid_size,
        ctx,
    )
}
