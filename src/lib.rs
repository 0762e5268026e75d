//! Placement and routing of analog layout cells.
//!
//! The [`place`] engine assigns grid-aligned positions to the devices of a
//! cell by solving a MILP, the [`grid`] mapper turns placed ports into
//! obstacle layers, and the [`route`] engine connects the ports of each net
//! one net at a time.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod grid;
pub mod netlist;
pub mod paths;
pub mod place;
pub mod plan;
pub mod route;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
