//! Geometry capability interface and its `geo`-backed implementation.
//!
//! The pipeline depends only on the capability set {buffer, union,
//! intersects, validate}, not on a concrete geometry library. [`GeoEngine`]
//! is the default open implementation; a different backend can be swapped in
//! by implementing [`GeometryEngine`].
//!
//! Buffer boundaries are approximated with a fixed number of segments per
//! quarter circle so that repeated runs produce byte-identical output.

use geo::{
    BooleanOps, Coord, CoordsIter, Geometry, Intersects, LineString, MultiPolygon, Polygon,
    Validation,
};
use thiserror::Error;

/// A feature-level geometry defect. Recoverable: the offending feature is
/// skipped and counted against the load's skip-rate threshold.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    /// The geometry contained no coordinates.
    #[error("geometry is empty")]
    Empty,
    /// A coordinate was NaN or infinite.
    #[error("geometry contains a non-finite coordinate")]
    NonFiniteCoordinate,
    /// The geometry failed self-consistency validation.
    #[error("geometry failed validation (self-intersection or malformed rings)")]
    Invalid,
    /// The geometry kind is outside the supported set.
    #[error("unsupported geometry type {0}")]
    Unsupported(&'static str),
}

/// A failure inside a geometry operation on an already-validated input.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeometryOpError {
    /// Buffering requires at least one coordinate.
    #[error("cannot buffer an empty geometry")]
    EmptyGeometry,
    /// The engine was handed a negative distance. The buffer engine rejects
    /// these before any work starts; this guards direct callers.
    #[error("negative buffer distance {0}")]
    NegativeDistance(f64),
    /// The geometry kind cannot be buffered.
    #[error("unsupported geometry type {0} for buffering")]
    Unsupported(&'static str),
}

/// Capability set the pipeline requires from a geometry backend.
pub trait GeometryEngine {
    /// Compute the buffer polygon of `geometry` at `distance`.
    ///
    /// Degenerate inputs (zero-extent lines, points) yield a minimal valid
    /// disc rather than failing.
    fn buffer(
        &self,
        geometry: &Geometry<f64>,
        distance: f64,
    ) -> Result<MultiPolygon<f64>, GeometryOpError>;

    /// Union two polygon sets.
    fn union(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64>;

    /// Subtract `b` from `a`. Returns an empty set when `b` covers `a`.
    fn difference(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64>;

    /// Whether two polygon sets intersect or touch.
    fn intersects(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool;

    /// Check a feature geometry for emptiness, non-finite coordinates, and
    /// self-consistency.
    fn validate(&self, geometry: &Geometry<f64>) -> Result<(), GeometryError>;
}

/// Default [`GeometryEngine`] backed by the `geo` crate.
///
/// # Examples
/// ```
/// use corridor_core::{GeoEngine, GeometryEngine};
/// use geo::{Geometry, Point};
///
/// let engine = GeoEngine::default();
/// let disc = engine
///     .buffer(&Geometry::Point(Point::new(0.0, 0.0)), 10.0)
///     .expect("point buffers to a disc");
/// assert_eq!(disc.0.len(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoEngine {
    quadrant_segments: u32,
    epsilon: f64,
}

/// Default segments per quarter circle for round joins.
pub const DEFAULT_QUADRANT_SEGMENTS: u32 = 8;

/// Default boundary approximation tolerance.
pub const DEFAULT_EPSILON: f64 = 1e-9;

impl Default for GeoEngine {
    fn default() -> Self {
        Self {
            quadrant_segments: DEFAULT_QUADRANT_SEGMENTS,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl GeoEngine {
    /// Construct an engine with explicit approximation parameters.
    ///
    /// Values are clamped to usable ranges: at least one segment per
    /// quadrant and a strictly positive epsilon.
    #[must_use]
    pub fn new(quadrant_segments: u32, epsilon: f64) -> Self {
        Self {
            quadrant_segments: quadrant_segments.max(1),
            epsilon: if epsilon > 0.0 { epsilon } else { DEFAULT_EPSILON },
        }
    }

    /// The configured segments per quarter circle.
    #[must_use]
    pub fn quadrant_segments(&self) -> u32 {
        self.quadrant_segments
    }

    /// The configured approximation tolerance.
    #[must_use]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    fn disc(&self, center: Coord<f64>, radius: f64) -> Polygon<f64> {
        let steps = (self.quadrant_segments * 4) as usize;
        let mut coords = Vec::with_capacity(steps + 1);
        for i in 0..steps {
            #[allow(clippy::cast_precision_loss, reason = "segment counts are small")]
            let theta = (i as f64) * std::f64::consts::TAU / (steps as f64);
            coords.push(Coord {
                x: center.x + radius * theta.cos(),
                y: center.y + radius * theta.sin(),
            });
        }
        let first = coords[0];
        coords.push(first);
        Polygon::new(LineString::new(coords), vec![])
    }

    fn segment_hull(&self, a: Coord<f64>, b: Coord<f64>, radius: f64) -> MultiPolygon<f64> {
        if a == b {
            return MultiPolygon::new(vec![self.disc(a, radius)]);
        }
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let length = dx.hypot(dy);
        let nx = -dy / length * radius;
        let ny = dx / length * radius;
        // Counter-clockwise rectangle spanning the segment, capped with a
        // disc at each endpoint.
        let rect = Polygon::new(
            LineString::new(vec![
                Coord { x: a.x - nx, y: a.y - ny },
                Coord { x: b.x - nx, y: b.y - ny },
                Coord { x: b.x + nx, y: b.y + ny },
                Coord { x: a.x + nx, y: a.y + ny },
                Coord { x: a.x - nx, y: a.y - ny },
            ]),
            vec![],
        );
        let body = MultiPolygon::new(vec![rect]);
        let caps = MultiPolygon::new(vec![self.disc(a, radius), self.disc(b, radius)]);
        body.union(&caps)
    }

    fn buffer_line(&self, line: &LineString<f64>, radius: f64) -> MultiPolygon<f64> {
        let mut acc: Option<MultiPolygon<f64>> = None;
        for segment in line.lines() {
            let hull = self.segment_hull(segment.start, segment.end, radius);
            acc = Some(match acc {
                Some(existing) => existing.union(&hull),
                None => hull,
            });
        }
        match acc {
            Some(result) => result,
            // A one-coordinate line has no segments; fall back to a disc.
            None => match line.coords().next() {
                Some(coord) => MultiPolygon::new(vec![self.disc(*coord, radius)]),
                None => MultiPolygon::new(vec![]),
            },
        }
    }

    fn buffer_polygon(&self, polygon: &Polygon<f64>, distance: f64) -> MultiPolygon<f64> {
        let base = MultiPolygon::new(vec![polygon.clone()]);
        if distance == 0.0 {
            return base;
        }
        let mut result = base.union(&self.buffer_line(polygon.exterior(), distance));
        for interior in polygon.interiors() {
            result = result.union(&self.buffer_line(interior, distance));
        }
        result
    }

    fn union_all(&self, parts: impl IntoIterator<Item = MultiPolygon<f64>>) -> MultiPolygon<f64> {
        let mut acc: Option<MultiPolygon<f64>> = None;
        for part in parts {
            acc = Some(match acc {
                Some(existing) => existing.union(&part),
                None => part,
            });
        }
        acc.unwrap_or_else(|| MultiPolygon::new(vec![]))
    }

    /// Radius used for point-like inputs: a zero distance still produces a
    /// minimal valid disc instead of a degenerate empty polygon.
    fn point_radius(&self, distance: f64) -> f64 {
        if distance > 0.0 { distance } else { self.epsilon }
    }
}

impl GeometryEngine for GeoEngine {
    fn buffer(
        &self,
        geometry: &Geometry<f64>,
        distance: f64,
    ) -> Result<MultiPolygon<f64>, GeometryOpError> {
        if distance < 0.0 {
            return Err(GeometryOpError::NegativeDistance(distance));
        }
        if geometry.coords_count() == 0 {
            return Err(GeometryOpError::EmptyGeometry);
        }
        let radius = self.point_radius(distance);
        match geometry {
            Geometry::Point(point) => Ok(MultiPolygon::new(vec![self.disc(point.0, radius)])),
            Geometry::MultiPoint(points) => Ok(self.union_all(
                points
                    .iter()
                    .map(|p| MultiPolygon::new(vec![self.disc(p.0, radius)])),
            )),
            Geometry::Line(line) => Ok(self.segment_hull(line.start, line.end, radius)),
            Geometry::LineString(line) => Ok(self.buffer_line(line, radius)),
            Geometry::MultiLineString(lines) => {
                Ok(self.union_all(lines.iter().map(|l| self.buffer_line(l, radius))))
            }
            Geometry::Polygon(polygon) => Ok(self.buffer_polygon(polygon, distance)),
            Geometry::MultiPolygon(multi) => {
                Ok(self.union_all(multi.iter().map(|p| self.buffer_polygon(p, distance))))
            }
            Geometry::Rect(rect) => Ok(self.buffer_polygon(&rect.to_polygon(), distance)),
            Geometry::Triangle(triangle) => {
                Ok(self.buffer_polygon(&triangle.to_polygon(), distance))
            }
            Geometry::GeometryCollection(_) => {
                Err(GeometryOpError::Unsupported("GeometryCollection"))
            }
        }
    }

    fn union(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        a.union(b)
    }

    fn difference(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        a.difference(b)
    }

    fn intersects(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
        a.intersects(b)
    }

    fn validate(&self, geometry: &Geometry<f64>) -> Result<(), GeometryError> {
        if matches!(geometry, Geometry::GeometryCollection(_)) {
            return Err(GeometryError::Unsupported("GeometryCollection"));
        }
        if geometry.coords_count() == 0 {
            return Err(GeometryError::Empty);
        }
        if geometry
            .coords_iter()
            .any(|c| !c.x.is_finite() || !c.y.is_finite())
        {
            return Err(GeometryError::NonFiniteCoordinate);
        }
        let consistent = match geometry {
            Geometry::Polygon(polygon) => polygon.is_valid(),
            Geometry::MultiPolygon(multi) => multi.is_valid(),
            Geometry::LineString(line) => line.is_valid(),
            Geometry::MultiLineString(lines) => lines.is_valid(),
            _ => true,
        };
        if consistent {
            Ok(())
        } else {
            Err(GeometryError::Invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Area, Line, Point};
    use rstest::{fixture, rstest};

    #[fixture]
    fn engine() -> GeoEngine {
        GeoEngine::default()
    }

    #[rstest]
    fn point_buffer_is_a_disc_of_requested_radius(engine: GeoEngine) {
        let disc = engine
            .buffer(&Geometry::Point(Point::new(3.0, 4.0)), 10.0)
            .expect("buffer point");
        // Inscribed polygon: area slightly below the true circle, well above
        // the inscribed lower bound for 32 segments.
        let area = disc.unsigned_area();
        assert!(area > std::f64::consts::PI * 100.0 * 0.99);
        assert!(area < std::f64::consts::PI * 100.0);
    }

    #[rstest]
    fn segment_buffer_covers_capsule_area(engine: GeoEngine) {
        let line = Geometry::Line(Line::new(
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 100.0, y: 0.0 },
        ));
        let hull = engine.buffer(&line, 5.0).expect("buffer segment");
        let expected = 2.0 * 5.0 * 100.0 + std::f64::consts::PI * 25.0;
        let area = hull.unsigned_area();
        assert!((area - expected).abs() / expected < 0.01, "area {area}");
    }

    #[rstest]
    fn zero_extent_line_buffers_to_a_disc(engine: GeoEngine) {
        let degenerate = Geometry::LineString(LineString::new(vec![
            Coord { x: 2.0, y: 2.0 },
            Coord { x: 2.0, y: 2.0 },
        ]));
        let disc = engine.buffer(&degenerate, 4.0).expect("buffer degenerate");
        assert!(!disc.0.is_empty());
        assert!(disc.unsigned_area() > 0.0);
    }

    #[rstest]
    fn zero_distance_point_still_yields_a_minimal_disc(engine: GeoEngine) {
        let disc = engine
            .buffer(&Geometry::Point(Point::new(0.0, 0.0)), 0.0)
            .expect("buffer with zero distance");
        assert!(disc.unsigned_area() > 0.0);
    }

    #[rstest]
    fn negative_distance_is_rejected(engine: GeoEngine) {
        let result = engine.buffer(&Geometry::Point(Point::new(0.0, 0.0)), -1.0);
        assert_eq!(result, Err(GeometryOpError::NegativeDistance(-1.0)));
    }

    #[rstest]
    fn empty_geometry_is_rejected(engine: GeoEngine) {
        let empty = Geometry::LineString(LineString::new(vec![]));
        assert_eq!(
            engine.buffer(&empty, 1.0),
            Err(GeometryOpError::EmptyGeometry)
        );
    }

    #[rstest]
    fn polygon_buffer_grows_the_polygon(engine: GeoEngine) {
        let square = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)]),
            vec![],
        );
        let buffered = engine
            .buffer(&Geometry::Polygon(square.clone()), 2.0)
            .expect("buffer polygon");
        assert!(buffered.unsigned_area() > square.unsigned_area());
        assert!(buffered.intersects(&MultiPolygon::new(vec![square])));
    }

    #[rstest]
    fn difference_removes_the_overlap(engine: GeoEngine) {
        let square = |min: f64, max: f64| {
            Polygon::new(
                LineString::from(vec![(min, min), (max, min), (max, max), (min, max), (min, min)]),
                vec![],
            )
        };
        let base = MultiPolygon::new(vec![square(0.0, 10.0)]);
        let overlap = MultiPolygon::new(vec![square(5.0, 15.0)]);
        let clipped = engine.difference(&base, &overlap);
        assert!((clipped.unsigned_area() - 75.0).abs() < 1e-6);

        let cover = MultiPolygon::new(vec![square(-1.0, 11.0)]);
        assert!(engine.difference(&base, &cover).0.is_empty());
    }

    #[rstest]
    fn buffering_is_deterministic(engine: GeoEngine) {
        let line = Geometry::LineString(LineString::from(vec![
            (0.0, 0.0),
            (50.0, 10.0),
            (100.0, 0.0),
        ]));
        let first = engine.buffer(&line, 7.5).expect("first run");
        let second = engine.buffer(&line, 7.5).expect("second run");
        assert_eq!(first, second);
    }

    #[rstest]
    fn validate_flags_self_intersecting_polygon(engine: GeoEngine) {
        let bowtie = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]),
            vec![],
        );
        assert_eq!(
            engine.validate(&Geometry::Polygon(bowtie)),
            Err(GeometryError::Invalid)
        );
    }

    #[rstest]
    fn validate_flags_empty_and_non_finite(engine: GeoEngine) {
        let empty = Geometry::LineString(LineString::new(vec![]));
        assert_eq!(engine.validate(&empty), Err(GeometryError::Empty));

        let bad = Geometry::Point(Point::new(f64::NAN, 0.0));
        assert_eq!(
            engine.validate(&bad),
            Err(GeometryError::NonFiniteCoordinate)
        );
    }
}
