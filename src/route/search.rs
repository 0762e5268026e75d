//! Best-first multi-goal search with segment length constraints.
//!
//! A search state tracks the visited goals, the direction and length of the
//! current straight run, and whether a goal has been touched yet. Turns are
//! only legal after a run of at least the minimum segment length, and
//! reversals only after the path has touched a goal.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::grid::{Cell, ObstacleGrid};
use crate::netlist::{Axis, Int};

/// Goal sets are tracked in a `u64` bitmask.
pub const MAX_GOALS: usize = 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// Expansion order of neighbors.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    #[inline]
    pub fn axis(&self) -> Axis {
        match self {
            Direction::North | Direction::South => Axis::Vertical,
            Direction::East | Direction::West => Axis::Horizontal,
        }
    }

    #[inline]
    pub fn opposite(&self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }

    #[inline]
    pub fn step(&self, cell: Cell) -> Cell {
        match self {
            Direction::North => Cell::new(cell.x, cell.y + 1),
            Direction::East => Cell::new(cell.x + 1, cell.y),
            Direction::South => Cell::new(cell.x, cell.y - 1),
            Direction::West => Cell::new(cell.x - 1, cell.y),
        }
    }

    /// The direction of a unit step from `a` to `b`, if they are adjacent.
    pub fn between(a: Cell, b: Cell) -> Option<Self> {
        match (b.x - a.x, b.y - a.y) {
            (0, 1) => Some(Direction::North),
            (1, 0) => Some(Direction::East),
            (0, -1) => Some(Direction::South),
            (-1, 0) => Some(Direction::West),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
struct State {
    cell: Cell,
    visited: u64,
    last: Option<Direction>,
    run: Int,
    passed_goal: bool,
    reversed: bool,
}

struct Node {
    state: State,
    parent: Option<usize>,
    cost: Int,
}

#[derive(Debug, Eq, PartialEq)]
struct OpenEntry {
    f_score: Int,
    counter: u64,
    node: usize,
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on f, then on insertion order.
        other
            .f_score
            .cmp(&self.f_score)
            .then_with(|| other.counter.cmp(&self.counter))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SearchResult {
    pub path: Vec<Cell>,
    pub cost: Int,
}

/// Outcome of one search, with the number of expanded states.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SearchOutcome {
    pub result: Option<SearchResult>,
    pub expansions: usize,
}

pub struct Search<'a> {
    grid: &'a ObstacleGrid,
    goals: &'a [Cell],
    goal_bits: FxHashMap<Cell, u64>,
    full: u64,
    min_segment: Int,
}

impl<'a> Search<'a> {
    /// Prepares a search over distinct `goals`.
    ///
    /// Returns `None` for more than [`MAX_GOALS`] goals.
    pub fn new(grid: &'a ObstacleGrid, goals: &'a [Cell], min_segment: Int) -> Option<Self> {
        if goals.len() > MAX_GOALS {
            return None;
        }
        let goal_bits = goals
            .iter()
            .enumerate()
            .map(|(i, &g)| (g, 1u64 << i))
            .collect::<FxHashMap<_, _>>();
        let full = goal_bits.values().fold(0, |acc, b| acc | b);
        Some(Self {
            grid,
            goals,
            goal_bits,
            full,
            min_segment: min_segment.max(1),
        })
    }

    fn heuristic(&self, cell: Cell, visited: u64) -> Int {
        self.goals
            .iter()
            .enumerate()
            .filter(|(i, _)| visited & (1 << i) == 0)
            .map(|(_, g)| cell.manhattan(g))
            .min()
            .unwrap_or(0)
    }

    /// Returns true if the edge `a`-`b` lies on the path ending at `node`.
    fn edge_reused(nodes: &[Node], node: usize, a: Cell, b: Cell) -> bool {
        let mut cur = node;
        while let Some(parent) = nodes[cur].parent {
            let (p, q) = (nodes[parent].state.cell, nodes[cur].state.cell);
            if (p == a && q == b) || (p == b && q == a) {
                return true;
            }
            cur = parent;
        }
        false
    }

    /// The successor of `state` in direction `dir` and the step cost,
    /// or `None` if the move is illegal.
    fn transition(&self, state: &State, dir: Direction, reused: bool) -> Option<(State, Int)> {
        let next = dir.step(state.cell);
        if !self.grid.is_walkable(next, dir.axis()) {
            return None;
        }
        let step = if reused { 0 } else { 1 };

        let (run, cost, reversed) = match state.last {
            None => (1, step, false),
            Some(last) if last == dir => {
                if reused {
                    (state.run, 0, false)
                } else {
                    ((state.run + 1).min(self.min_segment), 1, false)
                }
            }
            Some(last) if last == dir.opposite() => {
                if !state.passed_goal || state.run < self.min_segment {
                    return None;
                }
                (1, 1, true)
            }
            Some(_) => {
                if state.run < self.min_segment {
                    return None;
                }
                (1, 1, false)
            }
        };

        let mut succ = State {
            cell: next,
            visited: state.visited,
            last: Some(dir),
            run,
            passed_goal: state.passed_goal,
            reversed,
        };
        if let Some(&bit) = self.goal_bits.get(&next) {
            if run < self.min_segment {
                return None;
            }
            succ.run = 0;
            succ.last = None;
            succ.passed_goal = true;
            succ.visited |= bit;
        }
        Some((succ, cost))
    }

    /// Searches for a path from `goals[start]` through every goal.
    pub fn run(&self, start: usize) -> SearchOutcome {
        let Some(&origin) = self.goals.get(start) else {
            return SearchOutcome {
                result: None,
                expansions: 0,
            };
        };
        let initial = State {
            cell: origin,
            visited: self.goal_bits.get(&origin).copied().unwrap_or(0),
            last: None,
            run: 0,
            passed_goal: false,
            reversed: false,
        };

        let mut nodes = vec![Node {
            state: initial,
            parent: None,
            cost: 0,
        }];
        let mut open = BinaryHeap::new();
        let mut closed = FxHashSet::default();
        let mut counter = 0u64;
        let mut expansions = 0;

        open.push(OpenEntry {
            f_score: self.heuristic(origin, initial.visited),
            counter,
            node: 0,
        });

        while let Some(OpenEntry { node, .. }) = open.pop() {
            let state = nodes[node].state;
            if !closed.insert(state) {
                continue;
            }
            if state.visited == self.full {
                return SearchOutcome {
                    result: Some(SearchResult {
                        path: Self::reconstruct(&nodes, node),
                        cost: nodes[node].cost,
                    }),
                    expansions,
                };
            }
            expansions += 1;

            for dir in Direction::ALL {
                let next = dir.step(state.cell);
                let reused = Self::edge_reused(&nodes, node, state.cell, next);
                let Some((succ, step)) = self.transition(&state, dir, reused) else {
                    continue;
                };
                if closed.contains(&succ) {
                    continue;
                }
                let cost = nodes[node].cost + step;
                counter += 1;
                open.push(OpenEntry {
                    f_score: cost + self.heuristic(succ.cell, succ.visited),
                    counter,
                    node: nodes.len(),
                });
                nodes.push(Node {
                    state: succ,
                    parent: Some(node),
                    cost,
                });
            }
        }

        SearchOutcome {
            result: None,
            expansions,
        }
    }

    fn reconstruct(nodes: &[Node], mut node: usize) -> Vec<Cell> {
        let mut path = vec![nodes[node].state.cell];
        while let Some(parent) = nodes[node].parent {
            path.push(nodes[parent].state.cell);
            node = parent;
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CellRect, CellState};

    fn walk(path: &[Cell]) -> Vec<Direction> {
        path.windows(2)
            .map(|w| Direction::between(w[0], w[1]).unwrap())
            .collect()
    }

    #[test]
    fn test_open_field_single_goal() {
        let grid = ObstacleGrid::new(5, 5);
        let goals = [Cell::new(0, 0), Cell::new(4, 4)];
        let outcome = Search::new(&grid, &goals, 1).unwrap().run(0);
        let result = outcome.result.unwrap();
        assert_eq!(result.cost, 8);
        assert_eq!(result.path.len(), 9);
        assert_eq!(result.path.first(), Some(&Cell::new(0, 0)));
        assert_eq!(result.path.last(), Some(&Cell::new(4, 4)));
    }

    #[test]
    fn test_wall_forces_detour() {
        let mut grid = ObstacleGrid::new(7, 7);
        // Wall on column 3 from row 0 to row 5; the only gap is row 6.
        grid.block(&CellRect::new(Cell::new(3, 0), Cell::new(3, 5)));
        let goals = [Cell::new(0, 0), Cell::new(6, 0)];
        let result = Search::new(&grid, &goals, 1).unwrap().run(0).result.unwrap();

        for w in result.path.windows(2) {
            let dir = Direction::between(w[0], w[1]).unwrap();
            assert!(grid.is_walkable(w[1], dir.axis()));
        }
        assert!(result.path.contains(&Cell::new(3, 6)));
        assert_eq!(result.path.last(), Some(&Cell::new(6, 0)));
        assert_eq!(result.cost, 6 + 2 * 6);
    }

    #[test]
    fn test_unreachable_goal_exhausts() {
        let mut grid = ObstacleGrid::new(5, 5);
        grid.block(&CellRect::new(Cell::new(2, 0), Cell::new(2, 4)));
        let goals = [Cell::new(0, 2), Cell::new(4, 2)];
        let outcome = Search::new(&grid, &goals, 1).unwrap().run(0);
        assert!(outcome.result.is_none());
        assert!(outcome.expansions > 0);
    }

    #[test]
    fn test_multi_goal_reaches_all_within_baseline() {
        let grid = ObstacleGrid::new(12, 12);
        let goals = [Cell::new(1, 1), Cell::new(9, 1), Cell::new(5, 8)];
        let result = Search::new(&grid, &goals, 1).unwrap().run(0).result.unwrap();
        for g in goals.iter() {
            assert!(result.path.contains(g));
        }

        // Greedy nearest-unvisited tour from the start.
        let mut baseline = 0;
        let mut cur = goals[0];
        let mut rest = goals[1..].to_vec();
        while !rest.is_empty() {
            let (i, d) = rest
                .iter()
                .enumerate()
                .map(|(i, g)| (i, cur.manhattan(g)))
                .min_by_key(|&(_, d)| d)
                .unwrap();
            baseline += d;
            cur = rest.remove(i);
        }
        assert!(result.cost <= baseline);
    }

    #[test]
    fn test_search_is_deterministic() {
        let mut grid = ObstacleGrid::new(10, 10);
        grid.block(&CellRect::new(Cell::new(4, 2), Cell::new(5, 7)));
        let goals = [Cell::new(0, 5), Cell::new(9, 4), Cell::new(6, 9)];
        let a = Search::new(&grid, &goals, 2).unwrap().run(0);
        let b = Search::new(&grid, &goals, 2).unwrap().run(0);
        assert!(a.result.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn test_turns_respect_minimum_segment_length() {
        let grid = ObstacleGrid::new(12, 12);
        let goals = [Cell::new(0, 0), Cell::new(7, 5), Cell::new(2, 9)];
        let min = 3;
        let result = Search::new(&grid, &goals, min).unwrap().run(0).result.unwrap();
        let dirs = walk(&result.path);

        // Every direction change happens after a run of at least `min`,
        // unless the turn is taken at a goal.
        let mut run = 0;
        for (i, pair) in dirs.windows(2).enumerate() {
            run += 1;
            let at = result.path[i + 1];
            if goals.contains(&at) {
                run = 0;
                continue;
            }
            if pair[0] != pair[1] {
                assert!(run >= min, "turn at {at} after a run of {run}");
                run = 0;
            }
        }
    }

    #[test]
    fn test_no_reversal_before_first_goal() {
        let mut grid = ObstacleGrid::new(9, 3);
        // A corridor on row 1; the start sits in a dead end.
        grid.block(&CellRect::new(Cell::new(0, 0), Cell::new(8, 0)));
        grid.block(&CellRect::new(Cell::new(0, 2), Cell::new(8, 2)));
        let goals = [Cell::new(4, 1), Cell::new(0, 1), Cell::new(8, 1)];
        let result = Search::new(&grid, &goals, 1).unwrap().run(0).result.unwrap();

        let dirs = walk(&result.path);
        let first_goal = result
            .path
            .iter()
            .skip(1)
            .position(|c| goals.contains(c))
            .unwrap();
        for pair in dirs[..first_goal].windows(2) {
            assert_ne!(pair[1], pair[0].opposite());
        }
        assert!(result.path.contains(&Cell::new(0, 1)));
        assert!(result.path.contains(&Cell::new(8, 1)));
    }

    #[test]
    fn test_trace_cells_walkable_only_along_axis() {
        let mut grid = ObstacleGrid::new(9, 9);
        grid.paint(&CellRect::new(Cell::new(0, 4), Cell::new(8, 4)), Axis::Horizontal);
        assert_eq!(grid.state(Cell::new(4, 4), Axis::Vertical), CellState::Trace(Axis::Horizontal));

        let crossing = [Cell::new(4, 0), Cell::new(4, 8)];
        assert!(Search::new(&grid, &crossing, 1).unwrap().run(0).result.is_none());

        let along = [Cell::new(1, 4), Cell::new(7, 4)];
        let result = Search::new(&grid, &along, 1).unwrap().run(0).result.unwrap();
        assert_eq!(result.cost, 6);
        assert!(result.path.iter().all(|c| c.y == 4));
    }

    #[test]
    fn test_goal_count_is_bounded_by_the_mask() {
        let grid = ObstacleGrid::new(80, 2);
        let goals = (0..=MAX_GOALS as Int).map(|x| Cell::new(x, 0)).collect::<Vec<_>>();
        assert!(Search::new(&grid, &goals, 1).is_none());
        let search = Search::new(&grid, &goals[..MAX_GOALS], 1).unwrap();
        assert!(search.run(MAX_GOALS).result.is_none());
    }
}
