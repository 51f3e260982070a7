//! Positions, bases and the containment test.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{DEFAULT_BOUNDARY_EXTENT, MAX_TOKENS};

/// A point in a side's local frame. `z` is optional because most setups only track the floor.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// The x coordinate.
    pub x: f64,
    /// The y coordinate.
    pub y: f64,
    /// The z coordinate, if the position source tracks height.
    pub z: Option<f64>,
}

impl Position {
    /// Creates a planar position.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: None }
    }

    /// Creates a position with a height.
    #[must_use]
    pub const fn with_z(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z: Some(z) }
    }

    /// Returns `true` if every present coordinate is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.map_or(true, f64::is_finite)
    }
}

/// Positions of one side's tokens, in fixed token order.
pub type TokenPositions = SmallVec<[Position; MAX_TOKENS]>;

/// Which axes take part in the containment test.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Axes {
    /// Only x and y are tested.
    #[default]
    XY,
    /// x, y and z are tested when both the position and the origin carry a z.
    XYZ,
}

/// The square (or cube) base of a side: `origin[a] ..= origin[a] + extent` on every axis.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    /// The lower corner of the base.
    pub origin: Position,
    /// Length of each side of the base.
    pub extent: f64,
}

impl Boundary {
    /// Creates a boundary with the given origin and extent.
    #[must_use]
    pub const fn new(origin: Position, extent: f64) -> Self {
        Self { origin, extent }
    }

    /// Creates a boundary with [`DEFAULT_BOUNDARY_EXTENT`].
    #[must_use]
    pub const fn with_default_extent(origin: Position) -> Self {
        Self::new(origin, DEFAULT_BOUNDARY_EXTENT)
    }

    /// See [`contains`].
    #[must_use]
    pub fn contains(&self, position: &Position, axes: Axes) -> bool {
        contains(position, self, axes)
    }
}

#[inline]
fn within(value: f64, lower: f64, extent: f64) -> bool {
    lower <= value && value <= lower + extent
}

/// Returns `true` if `position` lies inside `boundary` on every tested axis.
///
/// Both edges are inclusive. With [`Axes::XYZ`], z is only tested when both the position
/// and the boundary origin have one.
///
/// ```
/// use flagline::{contains, Axes, Boundary, Position};
///
/// let base = Boundary::new(Position::new(0.0, 0.0), 300.0);
/// assert!(contains(&Position::new(300.0, 0.0), &base, Axes::XY));
/// assert!(!contains(&Position::new(150.0, 301.0), &base, Axes::XY));
/// ```
#[must_use]
pub fn contains(position: &Position, boundary: &Boundary, axes: Axes) -> bool {
    let origin = &boundary.origin;
    let planar = within(position.x, origin.x, boundary.extent)
        && within(position.y, origin.y, boundary.extent);
    match (axes, position.z, origin.z) {
        (Axes::XYZ, Some(z), Some(origin_z)) => planar && within(z, origin_z, boundary.extent),
        _ => planar,
    }
}
