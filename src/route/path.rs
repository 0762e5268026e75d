use serde::{Deserialize, Serialize};

use crate::grid::{Cell, CellRect};
use crate::netlist::{Axis, Int};

use super::search::Direction;

/// A maximal straight run of a path.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub start: Cell,
    pub end: Cell,
}

impl Segment {
    pub fn axis(&self) -> Axis {
        if self.start.y == self.end.y {
            Axis::Horizontal
        } else {
            Axis::Vertical
        }
    }

    #[inline]
    pub fn len(&self) -> Int {
        self.start.manhattan(&self.end)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The cells covered by the segment widened by `half_width` on all sides.
    pub fn footprint(&self, half_width: Int) -> CellRect {
        CellRect::new(self.start, self.end).expand(half_width)
    }
}

/// Splits a path into maximal collinear segments.
///
/// A reversal starts a new segment.
pub fn segments(path: &[Cell]) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut current: Option<(Segment, Option<Direction>)> = None;

    for w in path.windows(2) {
        let dir = Direction::between(w[0], w[1]);
        current = match current {
            Some((mut seg, d)) if d == dir => {
                seg.end = w[1];
                Some((seg, d))
            }
            prev => {
                out.extend(prev.map(|(seg, _)| seg));
                Some((
                    Segment {
                        start: w[0],
                        end: w[1],
                    },
                    dir,
                ))
            }
        };
    }
    out.extend(current.map(|(seg, _)| seg));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(points: &[(Int, Int)]) -> Vec<Cell> {
        points.iter().map(|&(x, y)| Cell::new(x, y)).collect()
    }

    #[test]
    fn test_segments_split_at_turns() {
        let path = cells(&[(0, 0), (1, 0), (2, 0), (2, 1), (2, 2), (3, 2)]);
        let segs = segments(&path);
        assert_eq!(
            segs,
            vec![
                Segment {
                    start: Cell::new(0, 0),
                    end: Cell::new(2, 0)
                },
                Segment {
                    start: Cell::new(2, 0),
                    end: Cell::new(2, 2)
                },
                Segment {
                    start: Cell::new(2, 2),
                    end: Cell::new(3, 2)
                },
            ]
        );
        assert_eq!(segs[1].axis(), Axis::Vertical);
        assert_eq!(segs[0].len(), 2);
    }

    #[test]
    fn test_reversal_starts_new_segment() {
        let path = cells(&[(0, 0), (1, 0), (2, 0), (1, 0)]);
        assert_eq!(segments(&path).len(), 2);
    }

    #[test]
    fn test_short_paths_have_no_segments() {
        assert!(segments(&[]).is_empty());
        assert!(segments(&cells(&[(3, 3)])).is_empty());
    }

    #[test]
    fn test_footprint_is_widened() {
        let seg = Segment {
            start: Cell::new(2, 5),
            end: Cell::new(6, 5),
        };
        assert_eq!(
            seg.footprint(1),
            CellRect::new(Cell::new(1, 4), Cell::new(7, 6))
        );
    }
}
