//! Run configuration, read from a TOML file.
//!
//! Spacing and clearance keys have no defaults: a configuration missing
//! any of them is rejected instead of being completed silently.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use arcstr::ArcStr;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::netlist::{Axis, DeviceClass, Int};


impl From<derive_builder::UninitializedFieldError> for ConfigError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        ConfigError::Incomplete(format!("missing field `{}`", e.field_name()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(build_fn(error = "ConfigError"))]
pub struct LayoutConfig {
    pub placement: PlacementConfig,
    pub grid: GridConfig,
    pub routing: RoutingConfig,
}

/// Required clearance around a component of one device class.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Offset {
    pub x: Int,
    pub y: Int,
}

impl Offset {
    #[inline]
    pub fn along(&self, axis: Axis) -> Int {
        match axis {
            Axis::Horizontal => self.x,
            Axis::Vertical => self.y,
        }
    }
}

/// One optional value per device class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerClass<T> {
    #[serde(default)]
    pub transistor: Option<T>,
    #[serde(default)]
    pub resistor: Option<T>,
    #[serde(default)]
    pub capacitor: Option<T>,
}

impl<T> Default for PerClass<T> {
    fn default() -> Self {
        Self {
            transistor: None,
            resistor: None,
            capacitor: None,
        }
    }
}

impl<T> PerClass<T> {
    pub fn get(&self, class: DeviceClass) -> Option<&T> {
        match class {
            DeviceClass::Transistor => self.transistor.as_ref(),
            DeviceClass::Resistor => self.resistor.as_ref(),
            DeviceClass::Capacitor => self.capacitor.as_ref(),
        }
    }

    pub fn set(&mut self, class: DeviceClass, value: T) {
        let slot = match class {
            DeviceClass::Transistor => &mut self.transistor,
            DeviceClass::Resistor => &mut self.resistor,
            DeviceClass::Capacitor => &mut self.capacitor,
        };
        *slot = Some(value);
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        [&self.transistor, &self.resistor, &self.capacitor]
            .into_iter()
            .filter_map(Option::as_ref)
    }
}

/// Objective weights: wirelength, bounding box width, bounding box height.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub alpha: f64,
    pub beta: f64,
    pub theta: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            theta: 1.0,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorAxis {
    /// Mirror about the vertical center line.
    #[default]
    Vertical,
    /// Mirror about the horizontal center line.
    Horizontal,
    /// Both at once. Over-constrains most pairs; only on explicit request.
    Both,
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub axis: MirrorAxis,
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveMode {
    #[default]
    Mip,
    /// Solve the LP relaxation and decode each axis by its largest indicator.
    Relaxation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    #[serde(default)]
    pub mode: SolveMode,
    /// Relative optimality gap at which the solve may stop.
    #[serde(default = "default_gap")]
    pub gap: f64,
    #[serde(default)]
    pub time_limit_secs: Option<f64>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub verbose: bool,
    /// File holding the variable assignment of a previous solve.
    #[serde(default)]
    pub warm_start: Option<PathBuf>,
    /// Per device class gap overrides.
    #[serde(default)]
    pub class_gap: PerClass<f64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            mode: SolveMode::Mip,
            gap: default_gap(),
            time_limit_secs: None,
            threads: default_threads(),
            verbose: false,
            warm_start: None,
            class_gap: PerClass::default(),
        }
    }
}

impl SolverConfig {
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::from_secs_f64)
    }

    /// The tightest gap among the given classes.
    pub fn gap_for(&self, classes: &[DeviceClass]) -> f64 {
        classes
            .iter()
            .filter_map(|&c| self.class_gap.get(c).copied())
            .fold(self.gap, f64::min)
    }
}

fn default_gap() -> f64 {
    0.01
}

fn default_threads() -> usize {
    1
}

fn default_unit() -> Int {
    1
}

fn default_stages() -> Vec<Vec<DeviceClass>> {
    vec![
        vec![DeviceClass::Transistor],
        vec![DeviceClass::Resistor, DeviceClass::Capacitor],
    ]
}

fn default_stack_axis() -> Axis {
    Axis::Vertical
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(build_fn(error = "ConfigError"))]
pub struct PlacementConfig {
    pub grid_size: Int,
    #[serde(default = "default_unit")]
    #[builder(default = "default_unit()")]
    pub unit_width: Int,
    #[serde(default = "default_unit")]
    #[builder(default = "default_unit()")]
    pub unit_height: Int,
    pub offsets: PerClass<Offset>,
    #[serde(default)]
    #[builder(default)]
    pub weights: Weights,
    #[serde(default)]
    #[builder(default)]
    pub mirror: MirrorConfig,
    /// Groups of device classes solved as independent, sequential stages.
    #[serde(default = "default_stages")]
    #[builder(default = "default_stages()")]
    pub stages: Vec<Vec<DeviceClass>>,
    /// Axis along which stage results are stacked.
    #[serde(default = "default_stack_axis")]
    #[builder(default = "default_stack_axis()")]
    pub stack_axis: Axis,
    #[serde(default)]
    #[builder(default)]
    pub solver: SolverConfig,
}

impl PlacementConfig {
    #[inline]
    pub fn builder() -> PlacementConfigBuilder {
        PlacementConfigBuilder::default()
    }

    pub fn offset(&self, class: DeviceClass) -> Offset {
        self.offsets.get(class).copied().unwrap_or_default()
    }

    pub fn unit(&self, axis: Axis) -> Int {
        match axis {
            Axis::Horizontal => self.unit_width,
            Axis::Vertical => self.unit_height,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_size <= 0 {
            return Err(ConfigError::invalid("placement.grid_size", "must be positive"));
        }
        if self.unit_width <= 0 || self.unit_height <= 0 {
            return Err(ConfigError::invalid(
                "placement.unit_width/unit_height",
                "must be positive",
            ));
        }
        let Weights { alpha, beta, theta } = self.weights;
        if alpha < 0.0 || beta < 0.0 || theta < 0.0 {
            return Err(ConfigError::invalid("placement.weights", "must be non-negative"));
        }
        if self.stages.is_empty() || self.stages.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::invalid(
                "placement.stages",
                "stages and every stage group must be non-empty",
            ));
        }
        let mut seen = Vec::new();
        for class in self.stages.iter().flatten() {
            if seen.contains(class) {
                return Err(ConfigError::invalid(
                    "placement.stages",
                    format!("{class} appears in more than one stage"),
                ));
            }
            seen.push(*class);
            match self.offsets.get(*class) {
                None => {
                    return Err(ConfigError::Incomplete(format!(
                        "no placement offset configured for {class}"
                    )))
                }
                Some(o) if o.x < 0 || o.y < 0 => {
                    return Err(ConfigError::invalid(
                        "placement.offsets",
                        format!("offset for {class} is negative"),
                    ))
                }
                Some(_) => {}
            }
        }
        let gaps = std::iter::once(self.solver.gap).chain(self.solver.class_gap.values().copied());
        for gap in gaps {
            if !(0.0..1.0).contains(&gap) {
                return Err(ConfigError::invalid(
                    "placement.solver.gap",
                    format!("{gap} is outside [0, 1)"),
                ));
            }
        }
        if let Some(t) = self.solver.time_limit_secs {
            if !(t > 0.0) {
                return Err(ConfigError::invalid(
                    "placement.solver.time_limit_secs",
                    "must be positive",
                ));
            }
        }
        if self.solver.threads == 0 {
            return Err(ConfigError::invalid("placement.solver.threads", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(build_fn(error = "ConfigError"))]
pub struct GridConfig {
    /// Layout units per routing grid cell.
    pub scale_factor: Int,
    /// Margin added around the placed components, in layout units.
    pub leeway_x: Int,
    pub leeway_y: Int,
}

impl GridConfig {
    #[inline]
    pub fn builder() -> GridConfigBuilder {
        GridConfigBuilder::default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scale_factor <= 0 {
            return Err(ConfigError::invalid("grid.scale_factor", "must be positive"));
        }
        if self.leeway_x < 0 || self.leeway_y < 0 {
            return Err(ConfigError::invalid("grid.leeway", "must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStrategy {
    /// Keep the first start goal that yields a path.
    #[default]
    Once,
    /// Search from every goal and keep the cheapest path.
    BestStart,
}

fn default_power_nets() -> Vec<String> {
    ["vdd", "vss", "gnd", "vcc", "vee", "avdd", "avss", "dvdd", "dvss"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(build_fn(error = "ConfigError"))]
pub struct RoutingConfig {
    pub trace_width: Int,
    pub trace_spacing: Int,
    pub via_clearance: Int,
    pub via_padding: Int,
    /// Nets routed first, in this order. Empty means netlist order.
    #[serde(default)]
    #[builder(default)]
    pub net_order: Vec<ArcStr>,
    #[serde(default)]
    #[builder(default)]
    pub strategy: RouteStrategy,
    /// Case-insensitive name prefixes of power and ground nets.
    #[serde(default = "default_power_nets")]
    #[builder(default = "default_power_nets()")]
    pub power_nets: Vec<String>,
}

impl RoutingConfig {
    #[inline]
    pub fn builder() -> RoutingConfigBuilder {
        RoutingConfigBuilder::default()
    }

    pub fn is_power_net(&self, net: &str) -> bool {
        let net = net.to_ascii_lowercase();
        self.power_nets
            .iter()
            .any(|prefix| net.starts_with(&prefix.to_ascii_lowercase()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.trace_width <= 0 {
            return Err(ConfigError::invalid("routing.trace_width", "must be positive"));
        }
        if self.trace_spacing < 0 || self.via_clearance < 0 || self.via_padding < 0 {
            return Err(ConfigError::invalid(
                "routing.trace_spacing/via_clearance/via_padding",
                "must be non-negative",
            ));
        }
        Ok(())
    }
}

impl LayoutConfig {
    #[inline]
    pub fn builder() -> LayoutConfigBuilder {
        LayoutConfigBuilder::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.placement.validate()?;
        self.grid.validate()?;
        self.routing.validate()
    }
}
