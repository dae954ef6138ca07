//! Scan pattern generation.
//!
//! Every pattern is expressed as offsets from the implicit start position,
//! which is the origin `(0, 0, 0)`. The sequencer turns consecutive targets
//! into relative moves.

use crate::config::AxisOrder;
use crate::instrument::capabilities::Displacement;
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub};

/// An offset from the scan origin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate {
    pub const ORIGIN: Coordinate = Coordinate {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn xy(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl Add for Coordinate {
    type Output = Coordinate;

    fn add(self, rhs: Coordinate) -> Coordinate {
        Coordinate::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Coordinate {
    fn add_assign(&mut self, rhs: Coordinate) {
        *self = *self + rhs;
    }
}

impl Sub for Coordinate {
    type Output = Coordinate;

    fn sub(self, rhs: Coordinate) -> Coordinate {
        Coordinate::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Coordinate {
    type Output = Coordinate;

    fn neg(self) -> Coordinate {
        Coordinate::new(-self.x, -self.y, -self.z)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// X and Y are always commanded; Z only when it changes.
impl From<Coordinate> for Displacement {
    fn from(c: Coordinate) -> Self {
        let mut d = Displacement::xy(c.x, c.y);
        if c.z != 0.0 {
            d.z = Some(c.z);
        }
        d
    }
}

/// `n` evenly spaced values from `start` to `end` inclusive.
///
/// The last value is exactly `end`, and `n == 1` yields `[start]`.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Offsets along one axis of length `span`. A zero-length axis has a single
/// offset, so the pattern collapses to one row or column.
fn axis_offsets(span: f64, resolution: usize) -> Vec<f64> {
    if span == 0.0 {
        linspace(0.0, 0.0, resolution.min(1))
    } else {
        linspace(0.0, span, resolution)
    }
}

/// Cross product of `resolution` offsets on X and Y, at `z`.
pub fn lattice_points(extent: Coordinate, resolution: usize, order: AxisOrder, z: f64) -> Vec<Coordinate> {
    let xs = axis_offsets(extent.x, resolution);
    let ys = axis_offsets(extent.y, resolution);
    let mut points = Vec::with_capacity(xs.len() * ys.len());
    match order {
        AxisOrder::XOuter => {
            for &x in &xs {
                points.extend(ys.iter().map(|&y| Coordinate::new(x, y, z)));
            }
        }
        AxisOrder::YOuter => {
            for &y in &ys {
                points.extend(xs.iter().map(|&x| Coordinate::new(x, y, z)));
            }
        }
    }
    points
}

/// Lattices stacked along Z, lowest layer first.
pub fn prism_points(
    extent: Coordinate,
    resolution: usize,
    resolution_z: usize,
    order: AxisOrder,
) -> Vec<Coordinate> {
    axis_offsets(extent.z, resolution_z)
        .into_iter()
        .flat_map(|z| lattice_points(extent, resolution, order, z))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Acquisition runs while the probe crosses a row
    Sampling,
    /// Move to the next row start, no acquisition
    Reposition,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub from: Coordinate,
    pub to: Coordinate,
}

impl Segment {
    pub fn displacement(&self) -> Coordinate {
        self.to - self.from
    }

    pub fn length(&self) -> f64 {
        self.displacement().norm()
    }
}

/// Row ends for a continuous raster. Every row runs from `x = 0` to
/// `x = extent.x`, so a line record always spans `xmin` to `xmax`; the
/// reposition between rows returns to `x = 0` at the next Y.
///
/// The first point is the origin.
pub fn raster_points(extent: Coordinate, resolution: usize) -> Vec<Coordinate> {
    axis_offsets(extent.y, resolution)
        .into_iter()
        .flat_map(|y| [Coordinate::xy(0.0, y), Coordinate::xy(extent.x, y)])
        .collect()
}

/// Consecutive point pairs. The first point is the implicit start and is
/// never a target; segment `i` samples when `i` is even.
pub fn raster_segments(points: &[Coordinate]) -> Vec<Segment> {
    points
        .windows(2)
        .enumerate()
        .map(|(i, pair)| Segment {
            kind: if i % 2 == 0 {
                SegmentKind::Sampling
            } else {
                SegmentKind::Reposition
            },
            from: pair[0],
            to: pair[1],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linspace_hits_endpoints() {
        assert_eq!(linspace(0.0, 10.0, 11)[1], 1.0);
        assert_eq!(*linspace(0.0, 0.3, 4).last().unwrap(), 0.3);
        assert_eq!(linspace(5.0, 10.0, 1), vec![5.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(0.0, 0.0, 3), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn lattice_honours_axis_order() {
        let extent = Coordinate::xy(2.0, 4.0);
        let x_outer = lattice_points(extent, 3, AxisOrder::XOuter, 0.0);
        assert_eq!(&x_outer[..3], &[
            Coordinate::xy(0.0, 0.0),
            Coordinate::xy(0.0, 2.0),
            Coordinate::xy(0.0, 4.0)
        ]);

        let y_outer = lattice_points(extent, 3, AxisOrder::YOuter, 0.0);
        assert_eq!(y_outer[1], Coordinate::xy(1.0, 0.0));
        assert_eq!(y_outer.len(), 9);

        let column = lattice_points(Coordinate::xy(0.0, 4.0), 3, AxisOrder::XOuter, 0.0);
        assert_eq!(column.len(), 3);
    }

    #[test]
    fn prism_layers_ascend_in_z() {
        let points = prism_points(Coordinate::new(1.0, 1.0, 2.0), 2, 3, AxisOrder::XOuter);
        assert_eq!(points.len(), 12);
        assert!(points[..4].iter().all(|p| p.z == 0.0));
        assert!(points[8..].iter().all(|p| p.z == 2.0));
    }

    #[test]
    fn raster_alternates_sampling_and_reposition() {
        let points = raster_points(Coordinate::xy(10.0, 4.0), 3);
        assert_eq!(points[0], Coordinate::ORIGIN);
        let segments = raster_segments(&points);
        assert_eq!(segments.len(), 5);

        let sampling: Vec<_> = segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Sampling)
            .collect();
        assert_eq!(sampling.len(), 3);
        // every row runs in increasing X
        assert!(sampling.iter().all(|s| s.from.x == 0.0 && s.to.x == 10.0));
        assert_eq!(sampling[1].from, Coordinate::xy(0.0, 2.0));
        assert_eq!(segments[1].displacement(), Coordinate::xy(-10.0, 2.0));
    }

    #[test]
    fn displacement_omits_unchanged_z() {
        let d: Displacement = Coordinate::xy(1.0, -1.0).into();
        assert_eq!(d.z, None);
        let d: Displacement = Coordinate::new(0.0, 0.0, 0.5).into();
        assert_eq!(d.z, Some(0.5));
    }
}
