use std::collections::HashSet;
use std::fs::canonicalize;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::cli::args::Args;
use crate::cli::progress::TaskProgress;
use crate::plan::{execute_plan, generate_plan, ExecutePlanParams, TaskKey};

pub mod args;
pub mod progress;

pub const BANNER: &str = r"
              _ _
   ___ ___| | |_ __  _ __  _ __
  / __/ _ \ | | '_ \| '_ \| '__|
 | (_|  __/ | | |_) | | | | |
  \___\___|_|_| .__/|_| |_|_|
              |_|

CELLPNR v0.1
";

pub fn run() -> Result<()> {
    let args = Args::parse();

    let config_path = canonicalize(&args.config)?;
    let netlist_path = canonicalize(&args.netlist)?;

    println!("{BANNER}");

    let enabled_tasks = [
        (true, TaskKey::LoadInputs),
        (true, TaskKey::Place),
        (!args.place_only, TaskKey::BuildGrid),
        (!args.place_only, TaskKey::Route),
        (true, TaskKey::WriteOutputs),
    ]
    .into_iter()
    .filter_map(|(a, b)| if a { Some(b) } else { None });

    let tasks = HashSet::from_iter(enabled_tasks);

    let mut ctx = TaskProgress::new(&tasks);

    let mut plan = ctx.check(generate_plan(&config_path, &netlist_path))?;

    println!("Configuration file: {:?}", &config_path);
    println!("Netlist: {:?}", &netlist_path);
    println!("\tComponents: {}", plan.netlist.components.len());
    println!("\tNets: {}", plan.netlist.nets().len());
    println!("\tGrid size: {}", plan.config.placement.grid_size);

    let work_dir = if let Some(output_dir) = args.output_dir {
        output_dir
    } else {
        PathBuf::from(&plan.name)
    };
    std::fs::create_dir_all(&work_dir)?;
    let work_dir = canonicalize(work_dir)?;

    let res = execute_plan(ExecutePlanParams {
        work_dir: &work_dir,
        plan: &mut plan,
        tasks: &tasks,
        ctx: Some(&mut ctx),
    });

    let output = ctx.check(res)?;
    println!("{}", output.run);
    println!("Artifacts saved to: {:?}\n", &work_dir);

    Ok(())
}
