//! `.shp` and `.shx` encoding.

use serde_json::Value;

type Coord = [f64; 2];

const FILE_CODE: i32 = 9994;
const VERSION: i32 = 1000;
const HEADER_LEN: usize = 100;

/// Geometry families; each one gets its own shapefile set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShapeFamily {
    Point,
    MultiPoint,
    Line,
    Polygon,
}

impl ShapeFamily {
    pub const ALL: [ShapeFamily; 4] = [Self::Point, Self::MultiPoint, Self::Line, Self::Polygon];

    /// Suffix appended to the set's file stem.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::MultiPoint => "multipoint",
            Self::Line => "line",
            Self::Polygon => "polygon",
        }
    }

    fn shape_type(&self) -> i32 {
        match self {
            Self::Point => 1,
            Self::Line => 3,
            Self::Polygon => 5,
            Self::MultiPoint => 8,
        }
    }
}

/// One shapefile record.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(Coord),
    MultiPoint(Vec<Coord>),
    PolyLine(Vec<Vec<Coord>>),
    Polygon(Vec<Vec<Coord>>),
}

impl Shape {
    /// Read a GeoJSON geometry object.
    ///
    /// Returns `None` for null, malformed or unsupported geometries
    /// (collections, empty coordinate lists).
    pub fn from_geojson(geometry: &Value) -> Option<Self> {
        let kind = geometry.get("type")?.as_str()?;
        let coordinates = geometry.get("coordinates")?;
        let shape = match kind {
            "Point" => Self::Point(coord(coordinates)?),
            "MultiPoint" => Self::MultiPoint(coords(coordinates)?),
            "LineString" => Self::PolyLine(vec![coords(coordinates)?]),
            "MultiLineString" => Self::PolyLine(
                coordinates
                    .as_array()?
                    .iter()
                    .map(coords)
                    .collect::<Option<_>>()?,
            ),
            "Polygon" => Self::Polygon(polygon_rings(coordinates)?),
            "MultiPolygon" => {
                let mut rings = Vec::new();
                for polygon in coordinates.as_array()? {
                    rings.extend(polygon_rings(polygon)?);
                }
                Self::Polygon(rings)
            }
            _ => return None,
        };
        (!shape.is_empty()).then_some(shape)
    }

    pub fn family(&self) -> ShapeFamily {
        match self {
            Self::Point(_) => ShapeFamily::Point,
            Self::MultiPoint(_) => ShapeFamily::MultiPoint,
            Self::PolyLine(_) => ShapeFamily::Line,
            Self::Polygon(_) => ShapeFamily::Polygon,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Point(_) => false,
            Self::MultiPoint(points) => points.is_empty(),
            Self::PolyLine(parts) | Self::Polygon(parts) => parts.iter().all(Vec::is_empty),
        }
    }

    fn points(&self) -> Box<dyn Iterator<Item = &Coord> + '_> {
        match self {
            Self::Point(p) => Box::new(std::iter::once(p)),
            Self::MultiPoint(points) => Box::new(points.iter()),
            Self::PolyLine(parts) | Self::Polygon(parts) => Box::new(parts.iter().flatten()),
        }
    }

    fn bbox(&self) -> BBox {
        self.points().fold(BBox::EMPTY, |b, p| b.extend(*p))
    }

    /// Record content: shape type and geometry, little-endian.
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.family().shape_type().to_le_bytes());
        match self {
            Self::Point([x, y]) => {
                out.extend_from_slice(&x.to_le_bytes());
                out.extend_from_slice(&y.to_le_bytes());
            }
            Self::MultiPoint(points) => {
                self.bbox().encode(out);
                out.extend_from_slice(&len_i32(points.len()).to_le_bytes());
                encode_points(points.iter(), out);
            }
            Self::PolyLine(parts) | Self::Polygon(parts) => {
                self.bbox().encode(out);
                let total: usize = parts.iter().map(Vec::len).sum();
                out.extend_from_slice(&len_i32(parts.len()).to_le_bytes());
                out.extend_from_slice(&len_i32(total).to_le_bytes());
                let mut start = 0usize;
                for part in parts {
                    out.extend_from_slice(&len_i32(start).to_le_bytes());
                    start += part.len();
                }
                encode_points(parts.iter().flatten(), out);
            }
        }
    }
}

fn coord(value: &Value) -> Option<Coord> {
    let position = value.as_array()?;
    Some([position.first()?.as_f64()?, position.get(1)?.as_f64()?])
}

fn coords(value: &Value) -> Option<Vec<Coord>> {
    value.as_array()?.iter().map(coord).collect()
}

/// Outer ring clockwise, holes counter-clockwise.
fn polygon_rings(value: &Value) -> Option<Vec<Vec<Coord>>> {
    let mut rings: Vec<Vec<Coord>> = value
        .as_array()?
        .iter()
        .map(coords)
        .collect::<Option<_>>()?;
    for (i, ring) in rings.iter_mut().enumerate() {
        let outer = i == 0;
        if is_clockwise(ring) != outer {
            ring.reverse();
        }
    }
    Some(rings)
}

fn is_clockwise(ring: &[Coord]) -> bool {
    let sum: f64 = ring
        .windows(2)
        .map(|w| (w[1][0] - w[0][0]) * (w[1][1] + w[0][1]))
        .sum();
    sum > 0.0
}

fn encode_points<'a>(points: impl Iterator<Item = &'a Coord>, out: &mut Vec<u8>) {
    for [x, y] in points {
        out.extend_from_slice(&x.to_le_bytes());
        out.extend_from_slice(&y.to_le_bytes());
    }
}

fn len_i32(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

/// Length in 16-bit words, as the format counts it.
fn words(bytes: usize) -> i32 {
    len_i32(bytes / 2)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BBox {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl BBox {
    const EMPTY: BBox = BBox {
        min_x: f64::INFINITY,
        min_y: f64::INFINITY,
        max_x: f64::NEG_INFINITY,
        max_y: f64::NEG_INFINITY,
    };

    fn extend(self, [x, y]: Coord) -> Self {
        Self {
            min_x: self.min_x.min(x),
            min_y: self.min_y.min(y),
            max_x: self.max_x.max(x),
            max_y: self.max_y.max(y),
        }
    }

    fn union(self, other: BBox) -> Self {
        self.extend([other.min_x, other.min_y])
            .extend([other.max_x, other.max_y])
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let finite = if self.min_x.is_finite() { *self } else { BBox::ZERO };
        for v in [finite.min_x, finite.min_y, finite.max_x, finite.max_y] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    const ZERO: BBox = BBox { min_x: 0.0, min_y: 0.0, max_x: 0.0, max_y: 0.0 };
}

/// Accumulates the records of one family into `.shp` and `.shx` bodies.
#[derive(Debug)]
pub struct ShapeWriter {
    family: ShapeFamily,
    bbox: BBox,
    records: Vec<u8>,
    index: Vec<u8>,
    count: i32,
}

impl ShapeWriter {
    pub fn new(family: ShapeFamily) -> Self {
        Self {
            family,
            bbox: BBox::EMPTY,
            records: Vec::new(),
            index: Vec::new(),
            count: 0,
        }
    }

    /// Number of records written so far.
    pub fn len(&self) -> usize {
        usize::try_from(self.count).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append a record. The shape must belong to this writer's family.
    pub fn push(&mut self, shape: &Shape) {
        debug_assert_eq!(shape.family(), self.family);
        let mut content = Vec::new();
        shape.encode(&mut content);

        self.count += 1;
        let offset = HEADER_LEN + self.records.len();
        self.index.extend_from_slice(&words(offset).to_be_bytes());
        self.index.extend_from_slice(&words(content.len()).to_be_bytes());

        self.records.extend_from_slice(&self.count.to_be_bytes());
        self.records.extend_from_slice(&words(content.len()).to_be_bytes());
        self.records.extend_from_slice(&content);
        self.bbox = self.bbox.union(shape.bbox());
    }

    /// Complete `.shp` and `.shx` file contents.
    pub fn finish(self) -> (Vec<u8>, Vec<u8>) {
        let mut shp = self.header(HEADER_LEN + self.records.len());
        shp.extend_from_slice(&self.records);
        let mut shx = self.header(HEADER_LEN + self.index.len());
        shx.extend_from_slice(&self.index);
        (shp, shx)
    }

    fn header(&self, file_len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(file_len);
        out.extend_from_slice(&FILE_CODE.to_be_bytes());
        out.extend_from_slice(&[0u8; 20]);
        out.extend_from_slice(&words(file_len).to_be_bytes());
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&self.family.shape_type().to_le_bytes());
        self.bbox.encode(&mut out);
        // z and m ranges
        out.extend_from_slice(&[0u8; 32]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn be_i32(bytes: &[u8], at: usize) -> i32 {
        i32::from_be_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn le_i32(bytes: &[u8], at: usize) -> i32 {
        i32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn le_f64(bytes: &[u8], at: usize) -> f64 {
        f64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
    }

    #[test]
    fn test_geojson_families() {
        let cases = [
            (json!({"type": "Point", "coordinates": [1, 2]}), ShapeFamily::Point),
            (json!({"type": "MultiPoint", "coordinates": [[1, 2]]}), ShapeFamily::MultiPoint),
            (json!({"type": "LineString", "coordinates": [[0, 0], [1, 1]]}), ShapeFamily::Line),
            (
                json!({"type": "MultiLineString", "coordinates": [[[0, 0], [1, 1]]]}),
                ShapeFamily::Line,
            ),
            (
                json!({"type": "MultiPolygon", "coordinates": [[[[0, 0], [0, 1], [1, 1], [0, 0]]]]}),
                ShapeFamily::Polygon,
            ),
        ];
        for (geometry, family) in cases {
            assert_eq!(Shape::from_geojson(&geometry).map(|s| s.family()), Some(family));
        }
    }

    #[test]
    fn test_unsupported_geometry() {
        assert!(Shape::from_geojson(&Value::Null).is_none());
        assert!(Shape::from_geojson(&json!({"type": "GeometryCollection", "geometries": []})).is_none());
        assert!(Shape::from_geojson(&json!({"type": "MultiPoint", "coordinates": []})).is_none());
        assert!(Shape::from_geojson(&json!({"type": "Point", "coordinates": ["a", 1]})).is_none());
    }

    #[test]
    fn test_polygon_rings_are_reoriented() {
        // counter-clockwise outer ring, clockwise hole
        let geometry = json!({
            "type": "Polygon",
            "coordinates": [
                [[0, 0], [4, 0], [4, 4], [0, 4], [0, 0]],
                [[1, 1], [1, 2], [2, 2], [2, 1], [1, 1]]
            ]
        });
        let Some(Shape::Polygon(rings)) = Shape::from_geojson(&geometry) else {
            panic!("expected a polygon");
        };
        assert!(is_clockwise(&rings[0]));
        assert!(!is_clockwise(&rings[1]));
    }

    #[test]
    fn test_point_file_layout() {
        let mut writer = ShapeWriter::new(ShapeFamily::Point);
        writer.push(&Shape::Point([1.0, 2.0]));
        writer.push(&Shape::Point([-3.0, 5.0]));
        assert_eq!(writer.len(), 2);
        let (shp, shx) = writer.finish();

        // 100-byte header + 2 * (8-byte record header + 20-byte content)
        assert_eq!(shp.len(), 156);
        assert_eq!(be_i32(&shp, 0), 9994);
        assert_eq!(be_i32(&shp, 24), 78);
        assert_eq!(le_i32(&shp, 28), 1000);
        assert_eq!(le_i32(&shp, 32), 1);
        assert_eq!(le_f64(&shp, 36), -3.0);
        assert_eq!(le_f64(&shp, 44), 2.0);
        assert_eq!(le_f64(&shp, 52), 1.0);
        assert_eq!(le_f64(&shp, 60), 5.0);

        // first record
        assert_eq!(be_i32(&shp, 100), 1);
        assert_eq!(be_i32(&shp, 104), 10);
        assert_eq!(le_i32(&shp, 108), 1);
        assert_eq!(le_f64(&shp, 112), 1.0);

        assert_eq!(shx.len(), 116);
        assert_eq!(be_i32(&shx, 24), 58);
        assert_eq!(be_i32(&shx, 100), 50);
        assert_eq!(be_i32(&shx, 108), 64);
    }

    #[test]
    fn test_polyline_record_parts() {
        let mut writer = ShapeWriter::new(ShapeFamily::Line);
        writer.push(&Shape::PolyLine(vec![
            vec![[0.0, 0.0], [1.0, 1.0]],
            vec![[2.0, 2.0], [3.0, 3.0], [4.0, 4.0]],
        ]));
        let (shp, _) = writer.finish();

        let content = 108;
        assert_eq!(le_i32(&shp, content), 3);
        assert_eq!(le_i32(&shp, content + 36), 2);
        assert_eq!(le_i32(&shp, content + 40), 5);
        assert_eq!(le_i32(&shp, content + 44), 0);
        assert_eq!(le_i32(&shp, content + 48), 2);
        // 4 + 32 + 8 + 2 * 4 + 5 * 16 bytes
        assert_eq!(be_i32(&shp, 104), 66);
    }
}
