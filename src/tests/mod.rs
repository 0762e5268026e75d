use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::netlist::Component;
use crate::place::check_overlaps;
use crate::plan::{execute_plan, generate_plan, ExecutePlanParams, PlanOutput, TaskKey};
use crate::route::RouteStatus;

const NETLIST: &str = r#"{
    "components": [
        {
            "number_id": 0, "name": "M0", "cell": "amp", "kind": "transistor", "device": "nmos",
            "size": { "width": 10, "height": 10 },
            "ports": [
                { "label": "G", "area": { "p0": { "x": 0, "y": 4 }, "p1": { "x": 2, "y": 6 } } },
                { "label": "D", "area": { "p0": { "x": 8, "y": 8 }, "p1": { "x": 10, "y": 10 } } },
                { "label": "S", "area": { "p0": { "x": 8, "y": 0 }, "p1": { "x": 10, "y": 2 } } }
            ],
            "schematic_connections": { "G": "in", "D": "out", "S": "vss" }
        },
        {
            "number_id": 1, "name": "M1", "cell": "amp", "kind": "transistor", "device": "nmos",
            "size": { "width": 10, "height": 10 },
            "ports": [
                { "label": "G", "area": { "p0": { "x": 0, "y": 4 }, "p1": { "x": 2, "y": 6 } } },
                { "label": "D", "area": { "p0": { "x": 8, "y": 8 }, "p1": { "x": 10, "y": 10 } } },
                { "label": "S", "area": { "p0": { "x": 8, "y": 0 }, "p1": { "x": 10, "y": 2 } } }
            ],
            "schematic_connections": { "G": "out", "D": "vdd", "S": "vss" }
        },
        {
            "number_id": 2, "name": "R2", "cell": "amp", "kind": "resistor", "device": "rppoly",
            "size": { "width": 4, "height": 12 },
            "ports": [
                { "label": "A", "area": { "p0": { "x": 1, "y": 0 }, "p1": { "x": 3, "y": 2 } } },
                { "label": "B", "area": { "p0": { "x": 1, "y": 10 }, "p1": { "x": 3, "y": 12 } } }
            ],
            "schematic_connections": { "A": "in", "B": "vdd" }
        }
    ],
    "component_connections": [
        {
            "start": { "component": 0, "type": "nmos", "ports": ["D"] },
            "end": { "component": 1, "type": "nmos", "ports": ["G"] },
            "net": "out"
        },
        {
            "start": { "component": 0, "type": "nmos", "ports": ["G"] },
            "end": { "component": 2, "type": "rppoly", "ports": ["A"] },
            "net": "in"
        }
    ],
    "single_connections": [
        { "start": { "component": 1, "type": "nmos", "ports": ["S"] }, "net": "vss" }
    ],
    "overlap": { "top": [], "side": [] }
}"#;

fn config(strategy: &str) -> String {
    format!(
        r#"
[placement]
grid_size = 60
unit_width = 5
unit_height = 5

[placement.offsets.transistor]
x = 4
y = 4

[placement.offsets.resistor]
x = 2
y = 2

[placement.offsets.capacitor]
x = 2
y = 2

[grid]
scale_factor = 1
leeway_x = 5
leeway_y = 5

[routing]
trace_width = 1
trace_spacing = 1
via_clearance = 1
via_padding = 0
strategy = "{strategy}"
"#
    )
}

fn run(dir: &Path, strategy: &str, tasks: &[TaskKey]) -> PlanOutput {
    let config_path = dir.join("cellpnr.toml");
    let netlist_path = dir.join("amp.json");
    fs::write(&config_path, config(strategy)).unwrap();
    fs::write(&netlist_path, NETLIST).unwrap();

    let mut plan = generate_plan(&config_path, &netlist_path).unwrap();
    assert_eq!(plan.name, "amp");
    let tasks = tasks.iter().copied().collect::<HashSet<_>>();
    execute_plan(ExecutePlanParams {
        work_dir: dir,
        plan: &mut plan,
        tasks: &tasks,
        ctx: None,
    })
    .unwrap()
}

fn run_end_to_end(strategy: &str) {
    let dir = tempfile::tempdir().unwrap();
    let output = run(
        dir.path(),
        strategy,
        &[
            TaskKey::LoadInputs,
            TaskKey::Place,
            TaskKey::BuildGrid,
            TaskKey::Route,
            TaskKey::WriteOutputs,
        ],
    );

    let placed: Vec<Component> =
        serde_json::from_str(&fs::read_to_string(dir.path().join("amp.placement.json")).unwrap())
            .unwrap();
    let config = crate::config::LayoutConfig::from_toml(&config(strategy)).unwrap();
    let overlap = Default::default();
    assert!(check_overlaps(&placed, &overlap, &config.placement).is_empty());
    assert_eq!(output.placement.stages.len(), 2);

    let nets = output
        .routes
        .iter()
        .map(|r| r.net.as_str())
        .collect::<Vec<_>>();
    assert_eq!(nets, vec!["out", "in", "vss"]);
    assert!(output.routes[0].is_routed(), "{:?}", output.routes[0].status);
    assert!(matches!(output.routes[2].status, RouteStatus::Skipped));
    assert_eq!(output.run.nets_skipped, 1);

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("amp.routes.json")).unwrap())
            .unwrap();
    assert_eq!(written.as_array().map(|a| a.len()), Some(3));
    assert!(dir.path().join("amp.summary.txt").exists());
}

macro_rules! end_to_end_test {
    ($name:ident, $strategy:expr) => {
        paste::paste! {
            #[test]
            fn [<test_end_to_end_ $name>]() {
                run_end_to_end($strategy);
            }
        }
    };
}

end_to_end_test!(once, "once");
end_to_end_test!(best_start, "best_start");

#[test]
fn test_place_only_writes_no_routes() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(
        dir.path(),
        "once",
        &[TaskKey::LoadInputs, TaskKey::Place, TaskKey::WriteOutputs],
    );
    assert!(output.routes.is_empty());
    assert_eq!(output.placement.x.len(), 3);
    assert!(dir.path().join("amp.placement.json").exists());
    assert!(!dir.path().join("amp.routes.json").exists());
}
