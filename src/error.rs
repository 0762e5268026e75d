use std::time::Duration;

use arcstr::ArcStr;
use thiserror::Error;

use crate::route::Cell;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("netlist error: {0}")]
    Netlist(#[from] NetlistError),

    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("error serializing/deserializing JSON: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("incomplete configuration: {0}")]
    Incomplete(String),

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NetlistError {
    #[error("connection on net `{net}` references unknown component {id}")]
    UnknownComponent { net: ArcStr, id: usize },

    #[error("duplicate component id {0}")]
    DuplicateComponent(usize),

    #[error("connection on net `{net}` connects component {id} to itself")]
    SelfConnection { net: ArcStr, id: usize },

    #[error("port `{port}` of component {id} appears more than once towards component {peer:?}")]
    DuplicatePort {
        id: usize,
        port: ArcStr,
        peer: Option<usize>,
    },

    #[error("net `{0}` does not resolve to any physical port")]
    DanglingNet(ArcStr),
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("component {id} ({name}) has no candidate position inside the placement grid")]
    NoCandidates { id: usize, name: ArcStr },

    #[error("component id {id} appears more than once in stage `{stage}`")]
    DuplicateComponent { stage: String, id: usize },

    #[error("placement model already has a variable named `{name}`")]
    DuplicateVariable { name: String },

    #[error("placement stage `{stage}` is infeasible")]
    Infeasible { stage: String },

    #[error("placement stage `{stage}` timed out after {limit:?} without an incumbent")]
    Timeout { stage: String, limit: Duration },

    #[error("placement stage `{stage}` failed in the solver: {reason}")]
    Solver { stage: String, reason: String },

    #[error("could not access warm start file: {0}")]
    WarmStartIo(#[from] std::io::Error),

    #[error("could not decode warm start file: {0}")]
    WarmStartFormat(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    #[error("no goal node of net `{net}` could be resolved to a port")]
    UnresolvedGoals { net: ArcStr },

    #[error("no path found for net `{net}` through goals {goals:?}")]
    NoPath { net: ArcStr, goals: Vec<Cell> },

    #[error("net `{net}` has {count} goal nodes, more than the supported {max}")]
    TooManyGoals {
        net: ArcStr,
        count: usize,
        max: usize,
    },
}
