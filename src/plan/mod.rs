use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::info;

use crate::cli::progress::TaskProgress;
use crate::config::LayoutConfig;
use crate::context::RunContext;
use crate::grid::{build_grid, GridMap};
use crate::netlist::Netlist;
use crate::paths::{out_placement, out_routes, out_summary};
use crate::place::{check_overlaps, PlacementEngine, PlacementResult};
use crate::route::{NetRoute, RoutingEngine, TraceWriter};

/// The inputs of one placement and routing run.
pub struct LayoutPlan {
    pub name: String,
    pub netlist: Netlist,
    pub config: LayoutConfig,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    LoadInputs,
    Place,
    BuildGrid,
    Route,
    WriteOutputs,
}

impl TaskKey {
    /// Every task, in execution order.
    pub const ALL: [TaskKey; 5] = [
        TaskKey::LoadInputs,
        TaskKey::Place,
        TaskKey::BuildGrid,
        TaskKey::Route,
        TaskKey::WriteOutputs,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            TaskKey::LoadInputs => "Load inputs",
            TaskKey::Place => "Place components",
            TaskKey::BuildGrid => "Build routing grid",
            TaskKey::Route => "Route nets",
            TaskKey::WriteOutputs => "Write outputs",
        }
    }
}

pub struct ExecutePlanParams<'a> {
    pub work_dir: &'a Path,
    pub plan: &'a mut LayoutPlan,
    pub tasks: &'a HashSet<TaskKey>,
    pub ctx: Option<&'a mut TaskProgress>,
}

/// What a run produced.
pub struct PlanOutput {
    pub placement: PlacementResult,
    pub routes: Vec<NetRoute>,
    pub run: RunContext,
}

pub fn generate_plan(config_path: &Path, netlist_path: &Path) -> Result<LayoutPlan> {
    let config = LayoutConfig::load(config_path)
        .with_context(|| format!("failed to load configuration {config_path:?}"))?;
    let netlist = Netlist::load(netlist_path)
        .with_context(|| format!("failed to load netlist {netlist_path:?}"))?;
    netlist.validate()?;

    if !netlist.components.iter().any(|c| c.is_placeable()) {
        bail!("The netlist has no transistors, resistors or capacitors to place");
    }

    let name = netlist_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "layout".to_string());

    Ok(LayoutPlan {
        name,
        netlist,
        config,
    })
}

/// Writes each route to a JSON file as it is committed.
pub struct JsonTraceWriter {
    path: PathBuf,
    routes: Vec<NetRoute>,
}

impl JsonTraceWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            routes: Vec::new(),
        }
    }
}

impl TraceWriter for JsonTraceWriter {
    fn write_route(&mut self, route: &NetRoute, _map: &GridMap) -> crate::error::Result<()> {
        self.routes.push(route.clone());
        let contents = serde_json::to_string_pretty(&self.routes)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

macro_rules! try_finish_task {
    ( $ctx:expr, $task:expr ) => {
        if let Some(ctx) = $ctx.as_mut() {
            ctx.finish($task);
        }
    };
}

pub fn execute_plan(params: ExecutePlanParams) -> Result<PlanOutput> {
    let ExecutePlanParams {
        work_dir,
        plan,
        tasks,
        mut ctx,
    } = params;

    fs::create_dir_all(work_dir)?;
    try_finish_task!(ctx, TaskKey::LoadInputs);

    let name = plan.name.clone();
    let config = &plan.config;
    let netlist = &mut plan.netlist;
    let mut run = RunContext::new();

    let engine = PlacementEngine::new(config.placement.clone());
    let placement = engine.solve_placement(
        &netlist.components,
        &netlist.component_connections,
        &netlist.overlap,
        config.placement.grid_size,
        &mut run,
    )?;
    placement.apply(&mut netlist.components);
    let overlaps = check_overlaps(&netlist.components, &netlist.overlap, &config.placement);
    if !overlaps.is_empty() {
        log::error!("placement has overlapping components: {overlaps:?}");
    }
    fs::write(
        out_placement(work_dir, &name),
        serde_json::to_string_pretty(&netlist.components)?,
    )?;
    try_finish_task!(ctx, TaskKey::Place);

    let mut routes = Vec::new();
    if tasks.contains(&TaskKey::Route) {
        let mut map = build_grid(&netlist.components, &config.grid, &config.routing);
        try_finish_task!(ctx, TaskKey::BuildGrid);

        let mut writer = JsonTraceWriter::new(out_routes(work_dir, &name));
        routes = RoutingEngine::new(config.routing.clone()).route(
            &mut map,
            netlist,
            &mut run,
            &mut writer,
        )?;
        try_finish_task!(ctx, TaskKey::Route);
    }

    fs::write(out_summary(work_dir, &name), run.to_string())?;
    info!("{run}");
    try_finish_task!(ctx, TaskKey::WriteOutputs);

    Ok(PlanOutput {
        placement,
        routes,
        run,
    })
}
