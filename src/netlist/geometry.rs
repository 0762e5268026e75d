use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Layout database integer type.
pub type Int = i64;

/// An axis: horizontal or vertical.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Horizontal,
    Vertical,
}

impl Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Horizontal => write!(f, "horizontal"),
            Self::Vertical => write!(f, "vertical"),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: Int,
    pub y: Int,
}

impl Point {
    #[inline]
    pub const fn new(x: Int, y: Int) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: Int,
    pub height: Int,
}

impl Size {
    #[inline]
    pub const fn new(width: Int, height: Int) -> Self {
        Self { width, height }
    }

    /// The extent of the box along the given axis.
    #[inline]
    pub fn along(&self, axis: Axis) -> Int {
        match axis {
            Axis::Horizontal => self.width,
            Axis::Vertical => self.height,
        }
    }
}

/// An axis-aligned rectangle; `p0` is the lower left corner, `p1` the upper right.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub p0: Point,
    pub p1: Point,
}

impl Rect {
    pub fn new(p0: Point, p1: Point) -> Self {
        Self {
            p0: Point::new(p0.x.min(p1.x), p0.y.min(p1.y)),
            p1: Point::new(p0.x.max(p1.x), p0.y.max(p1.y)),
        }
    }

    #[inline]
    pub fn from_sides(left: Int, bot: Int, right: Int, top: Int) -> Self {
        Self::new(Point::new(left, bot), Point::new(right, top))
    }

    #[inline]
    pub fn width(&self) -> Int {
        self.p1.x - self.p0.x
    }

    #[inline]
    pub fn height(&self) -> Int {
        self.p1.y - self.p0.y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.p0.x + self.p1.x) as f64 / 2.0,
            (self.p0.y + self.p1.y) as f64 / 2.0,
        )
    }

    pub fn translate(&self, dx: Int, dy: Int) -> Self {
        Self {
            p0: Point::new(self.p0.x + dx, self.p0.y + dy),
            p1: Point::new(self.p1.x + dx, self.p1.y + dy),
        }
    }

    /// The smallest rectangle containing both `self` and `other`.
    pub fn union(&self, other: &Rect) -> Self {
        Self::from_sides(
            self.p0.x.min(other.p0.x),
            self.p0.y.min(other.p0.y),
            self.p1.x.max(other.p1.x),
            self.p1.y.max(other.p1.y),
        )
    }

    /// Returns true if the interiors of the two rectangles intersect.
    /// Rectangles that share only an edge do not intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.p0.x < other.p1.x
            && other.p0.x < self.p1.x
            && self.p0.y < other.p1.y
            && other.p0.y < self.p1.y
    }

    pub fn expand(&self, dx: Int, dy: Int) -> Self {
        Self::from_sides(
            self.p0.x - dx,
            self.p0.y - dy,
            self.p1.x + dx,
            self.p1.y + dy,
        )
    }
}

/// Orientation of a placed component about its own bounding box.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    R0,
    /// Mirrored about the horizontal axis.
    MX,
    /// Mirrored about the vertical axis.
    MY,
    R180,
}

/// The placement transform of a component.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transform {
    pub x: Int,
    pub y: Int,
    #[serde(default)]
    pub orientation: Orientation,
}

impl Transform {
    pub fn new(x: Int, y: Int) -> Self {
        Self {
            x,
            y,
            orientation: Orientation::R0,
        }
    }

    /// Maps a rectangle given relative to a component of size `size`
    /// into absolute coordinates.
    pub fn apply(&self, rect: Rect, size: Size) -> Rect {
        let (flip_x, flip_y) = match self.orientation {
            Orientation::R0 => (false, false),
            Orientation::MX => (false, true),
            Orientation::MY => (true, false),
            Orientation::R180 => (true, true),
        };
        let (x0, x1) = if flip_x {
            (size.width - rect.p1.x, size.width - rect.p0.x)
        } else {
            (rect.p0.x, rect.p1.x)
        };
        let (y0, y1) = if flip_y {
            (size.height - rect.p1.y, size.height - rect.p0.y)
        } else {
            (rect.p0.y, rect.p1.y)
        };
        Rect::from_sides(x0, y0, x1, y1).translate(self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_r0_translates() {
        let t = Transform::new(10, 20);
        let r = t.apply(Rect::from_sides(1, 2, 3, 4), Size::new(10, 10));
        assert_eq!(r, Rect::from_sides(11, 22, 13, 24));
    }

    #[test]
    fn test_transform_mirrors_within_bbox() {
        let t = Transform {
            x: 0,
            y: 0,
            orientation: Orientation::MY,
        };
        let r = t.apply(Rect::from_sides(1, 2, 3, 4), Size::new(10, 10));
        assert_eq!(r, Rect::from_sides(7, 2, 9, 4));

        let t = Transform {
            orientation: Orientation::R180,
            ..t
        };
        let r = t.apply(Rect::from_sides(1, 2, 3, 4), Size::new(10, 10));
        assert_eq!(r, Rect::from_sides(7, 6, 9, 8));
    }

    #[test]
    fn test_touching_rects_do_not_intersect() {
        let a = Rect::from_sides(0, 0, 10, 10);
        let b = Rect::from_sides(10, 0, 20, 10);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&b.translate(-1, 0)));
    }
}
