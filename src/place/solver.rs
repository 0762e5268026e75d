//! Dispatch of placement models to a MILP solver.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use good_lp::{constraint, variable, Expression, ProblemVariables, ResolutionError};
use good_lp::{Solution, SolutionStatus, SolverModel, Variable};
use good_lp::{WithInitialSolution, WithMipGap, WithTimeLimit};
#[cfg(feature = "highs")]
use good_lp::solvers::highs::HighsProblem;
use log::{debug, info, log, warn, Level};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SolveMode;
use crate::error::PlacementError;

use super::model::{Assignment, LinExpr, Model, Sense, VarId, VarKind};

/// Knobs forwarded to the backend for one solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOptions {
    pub mode: SolveMode,
    /// Relative optimality gap at which the solver may stop.
    pub gap: f64,
    pub time_limit: Option<Duration>,
    pub threads: usize,
    pub verbose: bool,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("problem is infeasible")]
    Infeasible,

    #[error("problem is unbounded")]
    Unbounded,

    #[error("time limit reached before a feasible solution was found")]
    TimedOut,

    #[error("{0}")]
    Other(String),
}

/// Why the solver stopped.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    /// Stopped once the relative gap was met.
    GapLimit,
    /// Stopped at the time limit with the best solution found so far.
    TimeLimit,
}

impl From<SolutionStatus> for SolveStatus {
    fn from(status: SolutionStatus) -> Self {
        match status {
            SolutionStatus::Optimal => SolveStatus::Optimal,
            SolutionStatus::GapLimit => SolveStatus::GapLimit,
            SolutionStatus::TimeLimit => SolveStatus::TimeLimit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solved {
    pub values: Assignment,
    pub status: SolveStatus,
}

pub trait MilpBackend {
    /// Solves `model` to within the requested gap and time limit.
    ///
    /// `hint` holds known values for some or all of the model variables.
    /// Backends seed their search with it where they can.
    fn solve(
        &self,
        model: &Model,
        opts: &SolveOptions,
        hint: &[(VarId, f64)],
    ) -> Result<Solved, BackendError>;
}

/// Solves through `good_lp` with the pure Rust `microlp` solver.
///
/// `microlp` is single threaded; `threads` is ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct MicroLpBackend;

impl MilpBackend for MicroLpBackend {
    fn solve(
        &self,
        model: &Model,
        opts: &SolveOptions,
        hint: &[(VarId, f64)],
    ) -> Result<Solved, BackendError> {
        if opts.threads > 1 {
            debug!("microlp runs on one thread; ignoring threads = {}", opts.threads);
        }
        solve_with(model, opts, hint, good_lp::microlp, |lp| lp)
    }
}

/// Solves through `good_lp` with HiGHS, honoring `threads` and `verbose`.
#[cfg(feature = "highs")]
#[derive(Debug, Default, Clone, Copy)]
pub struct HighsBackend;

#[cfg(feature = "highs")]
impl MilpBackend for HighsBackend {
    fn solve(
        &self,
        model: &Model,
        opts: &SolveOptions,
        hint: &[(VarId, f64)],
    ) -> Result<Solved, BackendError> {
        let threads = u32::try_from(opts.threads.max(1)).unwrap_or(u32::MAX);
        solve_with(model, opts, hint, good_lp::highs, |lp: HighsProblem| {
            let mut lp = lp.set_threads(threads);
            lp.set_verbose(opts.verbose);
            lp
        })
    }
}

#[cfg(feature = "highs")]
pub type DefaultBackend = HighsBackend;
#[cfg(not(feature = "highs"))]
pub type DefaultBackend = MicroLpBackend;

fn to_expression(expr: &LinExpr, vars: &[Variable]) -> Expression {
    expr.terms()
        .iter()
        .map(|&(v, coef)| coef * vars[v.index()])
        .sum()
}

fn solve_with<M, F>(
    model: &Model,
    opts: &SolveOptions,
    hint: &[(VarId, f64)],
    solver: impl FnOnce(good_lp::variable::UnsolvedProblem) -> M,
    configure: F,
) -> Result<Solved, BackendError>
where
    M: SolverModel<Error = ResolutionError> + WithMipGap + WithTimeLimit + WithInitialSolution,
    F: FnOnce(M) -> M,
{
    let relax = opts.mode == SolveMode::Relaxation;
    let mut problem = ProblemVariables::new();
    let vars = model
        .vars()
        .iter()
        .map(|v| {
            let def = match v.kind {
                VarKind::Binary if relax => variable().min(0.0).max(1.0),
                VarKind::Binary => variable().binary(),
                VarKind::Continuous { min, max } => variable().min(min).max(max),
            };
            problem.add(def.name(v.name.clone()))
        })
        .collect::<Vec<Variable>>();

    let mut lp = solver(problem.minimise(to_expression(model.objective(), &vars)))
        .with_mip_gap(opts.gap as f32)
        .map_err(|e| BackendError::Other(e.to_string()))?;
    if let Some(limit) = opts.time_limit {
        lp = lp.with_time_limit(limit.as_secs_f64());
    }
    if !hint.is_empty() {
        lp = lp.with_initial_solution(hint.iter().map(|&(id, v)| (vars[id.index()], v)));
    }
    for c in model.constraints() {
        let lhs = to_expression(&c.expr, &vars);
        let rhs = c.rhs - c.expr.constant();
        lp = lp.with(match c.sense {
            Sense::Le => constraint::leq(lhs, rhs),
            Sense::Ge => constraint::geq(lhs, rhs),
            Sense::Eq => constraint::eq(lhs, rhs),
        });
    }
    let lp = configure(lp);

    debug!(
        "solving with {}: mode={:?} gap={} time_limit={:?} hint={}/{}",
        M::name(),
        opts.mode,
        opts.gap,
        opts.time_limit,
        hint.len(),
        vars.len()
    );
    let start = Instant::now();
    let solution = lp.solve().map_err(|e| match e {
        ResolutionError::Infeasible => BackendError::Infeasible,
        ResolutionError::Unbounded => BackendError::Unbounded,
        other if timed_out(opts.time_limit, start.elapsed()) => {
            debug!("{} stopped at the time limit: {other}", M::name());
            BackendError::TimedOut
        }
        other => BackendError::Other(other.to_string()),
    })?;

    let status = SolveStatus::from(solution.status());
    let values = Assignment::new(vars.iter().map(|&v| solution.value(v)).collect());
    let level = if opts.verbose { Level::Info } else { Level::Debug };
    log!(
        level,
        "{} finished in {:.3}s: {status:?}, objective {:.3}",
        M::name(),
        start.elapsed().as_secs_f64(),
        model.objective_value(&values)
    );
    if status == SolveStatus::TimeLimit {
        warn!("solver reached the time limit; keeping the best solution found");
    } else if status == SolveStatus::GapLimit {
        info!("solver stopped within the requested gap of {}", opts.gap);
    }

    Ok(Solved { values, status })
}

/// Whether a failed solve ran into its time limit.
fn timed_out(limit: Option<Duration>, elapsed: Duration) -> bool {
    limit.map(|l| elapsed >= l).unwrap_or(false)
}

/// Variable assignments of earlier solves, keyed by stage and variable name.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmStart {
    stages: BTreeMap<String, BTreeMap<String, f64>>,
}

impl WarmStart {
    /// Loads a warm start file. A missing file yields an empty warm start.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlacementError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PlacementError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// The stored values for `stage` whose names are variables of `model`.
    pub fn hint_for(&self, stage: &str, model: &Model) -> Vec<(VarId, f64)> {
        let Some(named) = self.stages.get(stage) else {
            return Vec::new();
        };
        let hint = model.match_named(named);
        debug!(
            "warm start for stage `{stage}`: {} of {} variables matched",
            hint.len(),
            model.vars().len()
        );
        hint
    }

    pub fn record(&mut self, stage: &str, model: &Model, values: &Assignment) {
        self.stages
            .insert(stage.to_string(), values.to_named(model));
    }
}
