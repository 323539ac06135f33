//! GeoJSON geometry encoding and decoding.
//!
//! The persisted record layout and the loader both exchange geometry as
//! GeoJSON objects, decoded with `serde_json`. Only the geometry types the
//! pipeline handles are supported; `GeometryCollection` is rejected.

use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde_json::{json, Value};
use thiserror::Error;

/// Errors returned when decoding a GeoJSON geometry object.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeoJsonError {
    /// The value was not a JSON object.
    #[error("GeoJSON geometry must be an object")]
    NotAnObject,
    /// The object had no string `type` member.
    #[error("GeoJSON geometry is missing a \"type\" member")]
    MissingType,
    /// The `type` member named an unsupported geometry kind.
    #[error("unsupported GeoJSON geometry type {0:?}")]
    UnsupportedType(String),
    /// The `coordinates` member was missing or malformed.
    #[error("malformed coordinates for GeoJSON {0} geometry")]
    MalformedCoordinates(&'static str),
}

/// Encode a `geo` geometry as a GeoJSON geometry object.
///
/// # Errors
/// Returns [`GeoJsonError::UnsupportedType`] for geometry kinds outside the
/// pipeline's supported set.
pub fn geometry_to_value(geometry: &Geometry<f64>) -> Result<Value, GeoJsonError> {
    match geometry {
        Geometry::Point(point) => Ok(json!({
            "type": "Point",
            "coordinates": position(point.0),
        })),
        Geometry::MultiPoint(points) => Ok(json!({
            "type": "MultiPoint",
            "coordinates": points.iter().map(|p| position(p.0)).collect::<Vec<_>>(),
        })),
        Geometry::Line(line) => Ok(json!({
            "type": "LineString",
            "coordinates": vec![position(line.start), position(line.end)],
        })),
        Geometry::LineString(line) => Ok(json!({
            "type": "LineString",
            "coordinates": line_positions(line),
        })),
        Geometry::MultiLineString(lines) => Ok(json!({
            "type": "MultiLineString",
            "coordinates": lines.iter().map(line_positions).collect::<Vec<_>>(),
        })),
        Geometry::Polygon(polygon) => Ok(json!({
            "type": "Polygon",
            "coordinates": polygon_rings(polygon),
        })),
        Geometry::MultiPolygon(multi) => Ok(multi_polygon_to_value(multi)),
        Geometry::GeometryCollection(_) => {
            Err(GeoJsonError::UnsupportedType("GeometryCollection".to_owned()))
        }
        Geometry::Rect(_) => Err(GeoJsonError::UnsupportedType("Rect".to_owned())),
        Geometry::Triangle(_) => Err(GeoJsonError::UnsupportedType("Triangle".to_owned())),
    }
}

/// Encode a `MultiPolygon` as a GeoJSON geometry object.
#[must_use]
pub fn multi_polygon_to_value(multi: &MultiPolygon<f64>) -> Value {
    json!({
        "type": "MultiPolygon",
        "coordinates": multi.iter().map(polygon_rings).collect::<Vec<_>>(),
    })
}

/// Decode a GeoJSON geometry object into a `geo` geometry.
pub fn geometry_from_value(value: &Value) -> Result<Geometry<f64>, GeoJsonError> {
    let object = value.as_object().ok_or(GeoJsonError::NotAnObject)?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(GeoJsonError::MissingType)?;
    let coordinates = object
        .get("coordinates")
        .ok_or(GeoJsonError::MalformedCoordinates("geometry"))?;

    match kind {
        "Point" => Ok(Geometry::Point(Point(decode_position(
            coordinates,
            "Point",
        )?))),
        "MultiPoint" => {
            let coords = coordinate_array(coordinates, "MultiPoint")?;
            let points = coords
                .iter()
                .map(|c| decode_position(c, "MultiPoint").map(Point))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Geometry::MultiPoint(MultiPoint::new(points)))
        }
        "LineString" => Ok(Geometry::LineString(decode_line(
            coordinates,
            "LineString",
        )?)),
        "MultiLineString" => {
            let lines = coordinate_array(coordinates, "MultiLineString")?
                .iter()
                .map(|l| decode_line(l, "MultiLineString"))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Geometry::MultiLineString(MultiLineString::new(lines)))
        }
        "Polygon" => Ok(Geometry::Polygon(decode_polygon(coordinates, "Polygon")?)),
        "MultiPolygon" => Ok(Geometry::MultiPolygon(multi_polygon_from_value(value)?)),
        other => Err(GeoJsonError::UnsupportedType(other.to_owned())),
    }
}

/// Decode a GeoJSON `MultiPolygon` geometry object.
pub fn multi_polygon_from_value(value: &Value) -> Result<MultiPolygon<f64>, GeoJsonError> {
    let object = value.as_object().ok_or(GeoJsonError::NotAnObject)?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(GeoJsonError::MissingType)?;
    if kind != "MultiPolygon" {
        return Err(GeoJsonError::UnsupportedType(kind.to_owned()));
    }
    let coordinates = object
        .get("coordinates")
        .ok_or(GeoJsonError::MalformedCoordinates("MultiPolygon"))?;
    let polygons = coordinate_array(coordinates, "MultiPolygon")?
        .iter()
        .map(|p| decode_polygon(p, "MultiPolygon"))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MultiPolygon::new(polygons))
}

fn position(coord: Coord<f64>) -> Vec<f64> {
    vec![coord.x, coord.y]
}

fn line_positions(line: &LineString<f64>) -> Vec<Vec<f64>> {
    line.coords().map(|c| position(*c)).collect()
}

fn polygon_rings(polygon: &Polygon<f64>) -> Vec<Vec<Vec<f64>>> {
    let mut rings = vec![line_positions(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(line_positions));
    rings
}

fn coordinate_array<'a>(
    value: &'a Value,
    kind: &'static str,
) -> Result<&'a Vec<Value>, GeoJsonError> {
    value
        .as_array()
        .ok_or(GeoJsonError::MalformedCoordinates(kind))
}

fn decode_position(value: &Value, kind: &'static str) -> Result<Coord<f64>, GeoJsonError> {
    let pair = coordinate_array(value, kind)?;
    // GeoJSON positions may carry an elevation; only x/y are used.
    if pair.len() < 2 {
        return Err(GeoJsonError::MalformedCoordinates(kind));
    }
    let x = pair[0]
        .as_f64()
        .ok_or(GeoJsonError::MalformedCoordinates(kind))?;
    let y = pair[1]
        .as_f64()
        .ok_or(GeoJsonError::MalformedCoordinates(kind))?;
    Ok(Coord { x, y })
}

fn decode_line(value: &Value, kind: &'static str) -> Result<LineString<f64>, GeoJsonError> {
    let coords = coordinate_array(value, kind)?
        .iter()
        .map(|c| decode_position(c, kind))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(LineString::new(coords))
}

fn decode_polygon(value: &Value, kind: &'static str) -> Result<Polygon<f64>, GeoJsonError> {
    let rings = coordinate_array(value, kind)?;
    let mut decoded = rings
        .iter()
        .map(|r| decode_line(r, kind))
        .collect::<Result<Vec<_>, _>>()?;
    if decoded.is_empty() {
        return Err(GeoJsonError::MalformedCoordinates(kind));
    }
    let exterior = decoded.remove(0);
    Ok(Polygon::new(exterior, decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn point_round_trips() {
        let geometry = Geometry::Point(Point::new(1.5, -2.0));
        let value = geometry_to_value(&geometry).expect("encode");
        assert_eq!(value, json!({"type": "Point", "coordinates": [1.5, -2.0]}));
        assert_eq!(geometry_from_value(&value).expect("decode"), geometry);
    }

    #[rstest]
    fn polygon_with_hole_round_trips() {
        let polygon = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)]),
            vec![LineString::from(vec![
                (4.0, 4.0),
                (6.0, 4.0),
                (6.0, 6.0),
                (4.0, 6.0),
                (4.0, 4.0),
            ])],
        );
        let geometry = Geometry::Polygon(polygon);
        let value = geometry_to_value(&geometry).expect("encode");
        assert_eq!(geometry_from_value(&value).expect("decode"), geometry);
    }

    #[rstest]
    fn elevation_is_dropped() {
        let value = json!({"type": "Point", "coordinates": [3.0, 4.0, 125.0]});
        let decoded = geometry_from_value(&value).expect("decode");
        assert_eq!(decoded, Geometry::Point(Point::new(3.0, 4.0)));
    }

    #[rstest]
    #[case(json!({"type": "GeometryCollection", "coordinates": []}))]
    #[case(json!({"type": "Circle", "coordinates": [0.0, 0.0]}))]
    fn unsupported_types_are_rejected(#[case] value: Value) {
        assert!(matches!(
            geometry_from_value(&value),
            Err(GeoJsonError::UnsupportedType(_))
        ));
    }

    #[rstest]
    fn missing_type_is_rejected() {
        let value = json!({"coordinates": [0.0, 0.0]});
        assert_eq!(geometry_from_value(&value), Err(GeoJsonError::MissingType));
    }

    #[rstest]
    fn multi_polygon_round_trips() {
        let multi = MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            vec![],
        )]);
        let value = multi_polygon_to_value(&multi);
        assert_eq!(multi_polygon_from_value(&value).expect("decode"), multi);
    }
}
