use itertools::Itertools;

use crate::config::PlacementConfig;
use crate::netlist::{Axis, Component, Int};

/// Rounds `x` up to the nearest multiple of `unit`.
#[inline]
pub(crate) fn snap_up(x: Int, unit: Int) -> Int {
    assert!(unit > 0);
    (x + unit - 1).div_euclid(unit) * unit
}

/// The distinct walking steps along `axis`: every component extent, with
/// and without the clearance offset of its class, snapped up to the unit pitch.
pub fn axis_steps(components: &[&Component], axis: Axis, config: &PlacementConfig) -> Vec<Int> {
    let unit = config.unit(axis);
    components
        .iter()
        .flat_map(|c| {
            let extent = c.size.along(axis);
            let offset = c.class().map(|k| config.offset(k).along(axis)).unwrap_or(0);
            [extent, extent + offset]
        })
        .filter(|&s| s > 0)
        .map(|s| snap_up(s, unit))
        .sorted()
        .dedup()
        .collect()
}

/// Candidate positions along one axis.
///
/// Starting at the grid center, walks outward in both directions by each
/// step until the grid edge. Two components placed on candidates from the
/// same walk can abut without gaps.
pub fn candidate_positions(grid_size: Int, unit: Int, steps: &[Int]) -> Vec<Int> {
    let center = (grid_size / 2).div_euclid(unit) * unit;
    let mut positions = vec![center];
    for &step in steps.iter().filter(|&&s| s > 0) {
        let mut k = 1;
        loop {
            let lo = center - k * step;
            let hi = center + k * step;
            if lo < 0 && hi > grid_size {
                break;
            }
            if lo >= 0 {
                positions.push(lo);
            }
            if hi <= grid_size {
                positions.push(hi);
            }
            k += 1;
        }
    }
    positions.sort_unstable();
    positions.dedup();
    positions
}

/// Keeps the candidates at which a component of the given extent stays
/// inside `[margin, grid_size - margin]`.
pub fn fitting(positions: &[Int], extent: Int, margin: Int, grid_size: Int) -> Vec<Int> {
    positions
        .iter()
        .copied()
        .filter(|&p| p >= margin && p + extent <= grid_size - margin)
        .collect()
}
