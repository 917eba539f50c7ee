//! Toolpath layer accessor.
//!
//! The file reader that produces toolpath geometry lives outside this crate.
//! Translation only needs the accessor surface defined by [`ToolpathLayer`]:
//! segment geometry in layer units, per-segment profile values and namespaced
//! custom attributes. [`MemoryLayer`] is a plain in-memory implementation used
//! by tests and by callers that build layers programmatically.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use crate::units::Point2D;

/// Namespace of the skywriting attributes.
pub const SKYWRITING_NAMESPACE: &str = "http://schemas.scanlab.com/skywriting/2023/01";
/// Namespace of the measurement feedback attributes.
pub const OIE_NAMESPACE: &str = "http://schemas.scanlab.com/oie/2023/08";
/// Namespace of the laser routing attributes.
pub const LASER_NAMESPACE: &str = "http://schemas.scanlab.com/lasers/2023/01";
/// Namespace of the beam profile selector attributes.
pub const AFX_NAMESPACE: &str = "http://schemas.nlight.com/afx/2024/01";

/// Attribute names inside [`SKYWRITING_NAMESPACE`].
pub mod skywriting_attr {
    /// Skywriting mode, 0 to 4.
    pub const MODE: &str = "mode";
    /// Time lag in µs.
    pub const TIMELAG: &str = "timelag";
    /// Laser on shift in 1/64 µs.
    pub const LASER_ON_SHIFT: &str = "laseronshift";
    /// Pulses before a mark.
    pub const NPREV: &str = "nprev";
    /// Pulses after a mark.
    pub const NPOST: &str = "npost";
    /// Cosine of the angle limit.
    pub const LIMIT: &str = "limit";
}

/// PID set selected for a segment, inside [`OIE_NAMESPACE`].
pub const OIE_PID_INDEX: &str = "pidindex";
/// Laser routing index, inside [`LASER_NAMESPACE`].
pub const LASER_INDEX: &str = "laserindex";
/// Beam profile index, inside [`AFX_NAMESPACE`].
pub const AFX_MODE_INDEX: &str = "modeindex";

/// Geometry type of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// Open polyline.
    Polyline,
    /// Closed polyline; the first point is repeated at the end.
    Loop,
    /// Independent vectors, two points each.
    Hatch,
}

/// Profile values of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentProfile {
    /// Mark speed in mm/s
    pub speed: f64,
    /// Jump speed in mm/s
    pub jump_speed: f64,
    /// Laser power in W
    pub laser_power: f64,
    /// Focus offset in mm
    pub focus: f64,
}

impl Default for SegmentProfile {
    fn default() -> Self {
        Self {
            speed: 1000.0,
            jump_speed: 2000.0,
            laser_power: 0.0,
            focus: 0.0,
        }
    }
}

/// Identifiers used to correlate measurement tags with the build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentIds {
    /// Part id
    pub part: u32,
    /// Profile id
    pub profile: u32,
    /// Segment id within the part
    pub segment: u32,
}

/// Value of a custom segment attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Integer attribute.
    Integer(i64),
    /// Floating point attribute.
    Double(f64),
    /// Text attribute.
    String(String),
}

impl AttributeValue {
    /// Integer view; doubles with an integral value convert too.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(v) => Some(*v),
            AttributeValue::Double(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            AttributeValue::String(s) => s.trim().parse().ok(),
            AttributeValue::Double(_) => None,
        }
    }

    /// Floating point view.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(v) => Some(*v as f64),
            AttributeValue::Double(v) => Some(*v),
            AttributeValue::String(s) => s.trim().parse().ok(),
        }
    }
}

/// Read access to one toolpath layer.
pub trait ToolpathLayer {
    /// Millimeters per layer coordinate unit.
    fn units(&self) -> f64;
    /// Number of segments in the layer.
    fn segment_count(&self) -> usize;
    /// Geometry type of a segment.
    fn segment_kind(&self, segment: usize) -> SegmentKind;
    /// Points of a segment in layer units, as stored.
    fn segment_points(&self, segment: usize) -> Vec<Point2D>;
    /// Speeds, power and focus of a segment.
    fn segment_profile(&self, segment: usize) -> SegmentProfile;
    /// Ids used for measurement tags.
    fn segment_ids(&self, segment: usize) -> SegmentIds;
    /// Custom attribute `name` in `namespace`, if the segment carries it.
    fn segment_attribute(&self, segment: usize, namespace: &str, name: &str) -> Option<AttributeValue>;

    /// Integer attribute shorthand.
    fn segment_integer_attribute(&self, segment: usize, namespace: &str, name: &str) -> Option<i64> {
        self.segment_attribute(segment, namespace, name)
            .and_then(|value| value.as_integer())
    }

    /// Double attribute shorthand.
    fn segment_double_attribute(&self, segment: usize, namespace: &str, name: &str) -> Option<f64> {
        self.segment_attribute(segment, namespace, name)
            .and_then(|value| value.as_double())
    }
}

/// One segment of a [`MemoryLayer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySegment {
    /// Geometry type
    pub kind: SegmentKind,
    /// Points in layer units
    pub points: Vec<Point2D>,
    /// Speeds, power and focus
    pub profile: SegmentProfile,
    /// Ids for measurement tags
    #[serde(default)]
    pub ids: SegmentIds,
    /// Keyed by namespace and name
    #[serde(default)]
    pub attributes: HashMap<String, AttributeValue>,
}

impl MemorySegment {
    /// Segment without ids or attributes.
    pub fn new(kind: SegmentKind, points: Vec<Point2D>, profile: SegmentProfile) -> Self {
        Self {
            kind,
            points,
            profile,
            ids: SegmentIds::default(),
            attributes: HashMap::new(),
        }
    }

    /// Attach part/profile/segment identifiers.
    pub fn with_ids(mut self, ids: SegmentIds) -> Self {
        self.ids = ids;
        self
    }

    /// Attach a namespaced attribute.
    pub fn with_attribute(mut self, namespace: &str, name: &str, value: AttributeValue) -> Self {
        self.attributes.insert(attribute_key(namespace, name), value);
        self
    }
}

fn attribute_key(namespace: &str, name: &str) -> String {
    format!("{namespace}#{name}")
}

/// In-memory toolpath layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryLayer {
    /// Millimeters per coordinate unit
    pub units: f64,
    /// Segments in drawing order
    pub segments: Vec<MemorySegment>,
}

impl Default for MemoryLayer {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl MemoryLayer {
    /// Empty layer with `units` millimeters per coordinate unit.
    pub fn new(units: f64) -> Self {
        Self {
            units,
            segments: Vec::new(),
        }
    }

    /// Append a segment.
    pub fn push(&mut self, segment: MemorySegment) -> &mut Self {
        self.segments.push(segment);
        self
    }

    /// Builder form of [`MemoryLayer::push`].
    pub fn with_segment(mut self, segment: MemorySegment) -> Self {
        self.segments.push(segment);
        self
    }
}

impl ToolpathLayer for MemoryLayer {
    fn units(&self) -> f64 {
        self.units
    }

    fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn segment_kind(&self, segment: usize) -> SegmentKind {
        self.segments
            .get(segment)
            .map_or(SegmentKind::Polyline, |s| s.kind)
    }

    fn segment_points(&self, segment: usize) -> Vec<Point2D> {
        self.segments
            .get(segment)
            .map(|s| s.points.clone())
            .unwrap_or_default()
    }

    fn segment_profile(&self, segment: usize) -> SegmentProfile {
        self.segments
            .get(segment)
            .map(|s| s.profile)
            .unwrap_or_default()
    }

    fn segment_ids(&self, segment: usize) -> SegmentIds {
        self.segments
            .get(segment)
            .map(|s| s.ids)
            .unwrap_or_default()
    }

    fn segment_attribute(&self, segment: usize, namespace: &str, name: &str) -> Option<AttributeValue> {
        self.segments
            .get(segment)
            .and_then(|s| s.attributes.get(&attribute_key(namespace, name)))
            .cloned()
    }
}
