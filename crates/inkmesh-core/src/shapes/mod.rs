//! Drawable object model: geometry, style and the derived bounds/hit helpers.

mod bounds;
mod hit;

pub use bounds::{
    DEFAULT_ARROW_HEAD_LENGTH, DEFAULT_TEXT_HEIGHT, DEFAULT_TEXT_WIDTH, arrow_head, compute_bounds,
};
pub use hit::{hit_test, point_to_polyline_dist, point_to_segment_dist, rects_intersect};

use kurbo::{BezPath, Circle, Point, Rect, Shape as KurboShape, Vec2};
use peniko::Color;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for drawable objects.
pub type ObjectId = Uuid;

/// Identifier for layers. Layer ids are plain strings so the canonical
/// default layer can be addressed by a well-known name on every replica.
pub type LayerId = String;

/// Serializable color representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub fn white() -> Self {
        Self::new(255, 255, 255, 255)
    }

    pub fn transparent() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`. `transparent` is accepted too.
    pub fn from_hex(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.eq_ignore_ascii_case("transparent") {
            return Some(Self::transparent());
        }
        let hex = input.strip_prefix('#')?;
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(hex.get(range)?, 16).ok();
        match hex.len() {
            3 => {
                let r = channel(0..1)? * 17;
                let g = channel(1..2)? * 17;
                let b = channel(2..3)? * 17;
                Some(Self::new(r, g, b, 255))
            }
            6 => Some(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?, 255)),
            8 => Some(Self::new(
                channel(0..2)?,
                channel(2..4)?,
                channel(4..6)?,
                channel(6..8)?,
            )),
            _ => None,
        }
    }

    /// Format as `#rrggbb`, or `#rrggbbaa` when not fully opaque.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl From<Color> for SerializableColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// The closed set of object types a document can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Stroke,
    Line,
    Arrow,
    Rectangle,
    Circle,
    Triangle,
    Polygon,
    Text,
}

impl ObjectKind {
    /// Wire name used in the replicated document.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Stroke => "stroke",
            ObjectKind::Line => "line",
            ObjectKind::Arrow => "arrow",
            ObjectKind::Rectangle => "rectangle",
            ObjectKind::Circle => "circle",
            ObjectKind::Triangle => "triangle",
            ObjectKind::Polygon => "polygon",
            ObjectKind::Text => "text",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "stroke" => ObjectKind::Stroke,
            "line" => ObjectKind::Line,
            "arrow" => ObjectKind::Arrow,
            "rectangle" => ObjectKind::Rectangle,
            "circle" => ObjectKind::Circle,
            "triangle" => ObjectKind::Triangle,
            "polygon" => ObjectKind::Polygon,
            "text" => ObjectKind::Text,
            _ => return None,
        })
    }

    /// Kinds whose hit test runs against their segments instead of their bounds.
    pub fn is_stroke_like(&self) -> bool {
        matches!(self, ObjectKind::Stroke | ObjectKind::Line | ObjectKind::Arrow)
    }
}

/// Per-type geometry. The variant determines the object's [`ObjectKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Stroke {
        points: Vec<Point>,
    },
    Line {
        start: Point,
        end: Point,
    },
    Arrow {
        start: Point,
        end: Point,
    },
    Rectangle {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    Circle {
        center: Point,
        radius: f64,
    },
    Triangle {
        vertices: [Point; 3],
    },
    Polygon {
        vertices: Vec<Point>,
    },
    Text {
        position: Point,
        content: String,
        /// Explicit box width; `None` falls back to [`DEFAULT_TEXT_WIDTH`].
        width: Option<f64>,
        /// Explicit box height; `None` falls back to [`DEFAULT_TEXT_HEIGHT`].
        height: Option<f64>,
    },
}

impl Geometry {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Geometry::Stroke { .. } => ObjectKind::Stroke,
            Geometry::Line { .. } => ObjectKind::Line,
            Geometry::Arrow { .. } => ObjectKind::Arrow,
            Geometry::Rectangle { .. } => ObjectKind::Rectangle,
            Geometry::Circle { .. } => ObjectKind::Circle,
            Geometry::Triangle { .. } => ObjectKind::Triangle,
            Geometry::Polygon { .. } => ObjectKind::Polygon,
            Geometry::Text { .. } => ObjectKind::Text,
        }
    }

    /// The literal points that define this geometry.
    ///
    /// Rectangles contribute their four corners, circles their center,
    /// text its anchor.
    pub fn points(&self) -> Vec<Point> {
        match self {
            Geometry::Stroke { points } => points.clone(),
            Geometry::Line { start, end } | Geometry::Arrow { start, end } => vec![*start, *end],
            Geometry::Rectangle {
                x,
                y,
                width,
                height,
            } => vec![
                Point::new(*x, *y),
                Point::new(x + width, *y),
                Point::new(x + width, y + height),
                Point::new(*x, y + height),
            ],
            Geometry::Circle { center, .. } => vec![*center],
            Geometry::Triangle { vertices } => vertices.to_vec(),
            Geometry::Polygon { vertices } => vertices.clone(),
            Geometry::Text { position, .. } => vec![*position],
        }
    }

    /// Whether every coordinate is finite and the geometry is drawable.
    pub fn is_well_formed(&self) -> bool {
        let finite = |p: &Point| p.x.is_finite() && p.y.is_finite();
        match self {
            Geometry::Stroke { points } | Geometry::Polygon { vertices: points } => {
                !points.is_empty() && points.iter().all(finite)
            }
            Geometry::Rectangle { width, height, .. } => {
                self.points().iter().all(finite) && *width >= 0.0 && *height >= 0.0
            }
            Geometry::Circle { center, radius } => finite(center) && radius.is_finite() && *radius >= 0.0,
            _ => self.points().iter().all(finite),
        }
    }

    /// Translate every point of the geometry.
    pub fn translate(&mut self, delta: Vec2) {
        match self {
            Geometry::Stroke { points } | Geometry::Polygon { vertices: points } => {
                for p in points.iter_mut() {
                    *p += delta;
                }
            }
            Geometry::Line { start, end } | Geometry::Arrow { start, end } => {
                *start += delta;
                *end += delta;
            }
            Geometry::Rectangle { x, y, .. } => {
                *x += delta.x;
                *y += delta.y;
            }
            Geometry::Circle { center, .. } => *center += delta,
            Geometry::Triangle { vertices } => {
                for p in vertices.iter_mut() {
                    *p += delta;
                }
            }
            Geometry::Text { position, .. } => *position += delta,
        }
    }

    /// Return a translated copy.
    pub fn translated(&self, delta: Vec2) -> Self {
        let mut moved = self.clone();
        moved.translate(delta);
        moved
    }

    /// Path representation for renderers.
    pub fn to_path(&self, arrow_head_length: f64) -> BezPath {
        let mut path = BezPath::new();
        match self {
            Geometry::Stroke { points } => polyline(&mut path, points, false),
            Geometry::Line { start, end } => polyline(&mut path, &[*start, *end], false),
            Geometry::Arrow { start, end } => {
                polyline(&mut path, &[*start, *end], false);
                let [left, right] = arrow_head(*start, *end, arrow_head_length);
                polyline(&mut path, &[left, *end, right], false);
            }
            Geometry::Rectangle {
                x,
                y,
                width,
                height,
            } => {
                path = Rect::new(*x, *y, x + width, y + height).to_path(0.1);
            }
            Geometry::Circle { center, radius } => {
                path = Circle::new(*center, *radius).to_path(0.1);
            }
            Geometry::Triangle { vertices } => polyline(&mut path, vertices, true),
            Geometry::Polygon { vertices } => polyline(&mut path, vertices, true),
            Geometry::Text {
                position,
                width,
                height,
                ..
            } => {
                // Text glyphs are the renderer's business; the path is the text box.
                let w = width.unwrap_or(DEFAULT_TEXT_WIDTH);
                let h = height.unwrap_or(DEFAULT_TEXT_HEIGHT);
                path = Rect::new(position.x, position.y, position.x + w, position.y + h).to_path(0.1);
            }
        }
        path
    }
}

fn polyline(path: &mut BezPath, points: &[Point], closed: bool) {
    let Some((first, rest)) = points.split_first() else {
        return;
    };
    path.move_to(*first);
    for point in rest {
        path.line_to(*point);
    }
    if closed {
        path.close_path();
    }
}

/// Style properties shared by every object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStyle {
    /// Stroke color.
    pub color: SerializableColor,
    /// Stroke width in document units.
    pub stroke_width: f64,
    /// Overall opacity (0.0 = fully transparent, 1.0 = fully opaque).
    pub opacity: f64,
    /// Fill color (None = no fill).
    pub fill_color: Option<SerializableColor>,
    /// Font family for text objects.
    pub font_family: String,
    /// Font size for text objects.
    pub font_size: f64,
}

impl Default for ObjectStyle {
    fn default() -> Self {
        Self {
            color: SerializableColor::black(),
            stroke_width: 2.0,
            opacity: 1.0,
            fill_color: None,
            font_family: "sans-serif".to_string(),
            font_size: 20.0,
        }
    }
}

impl ObjectStyle {
    /// Get the stroke color with opacity applied.
    pub fn stroke_with_opacity(&self) -> Color {
        let color: Color = self.color.into();
        color.multiply_alpha(self.opacity.clamp(0.0, 1.0) as f32)
    }

    /// Get the fill color with opacity applied.
    pub fn fill_with_opacity(&self) -> Option<Color> {
        self.fill_color.map(|c| {
            let color: Color = c.into();
            color.multiply_alpha(self.opacity.clamp(0.0, 1.0) as f32)
        })
    }
}

/// A materialized, render-ready object.
///
/// `layer_id`, `bounds` and `z_index` are derived when the scene is built:
/// layer membership lives in the layer sequence, bounds come from
/// [`compute_bounds`] and the z-index is the position in the draw order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawableObject {
    pub id: ObjectId,
    pub geometry: Geometry,
    pub style: ObjectStyle,
    pub layer_id: LayerId,
    pub visible: bool,
    pub locked: bool,
    pub bounds: Rect,
    pub z_index: usize,
}

impl DrawableObject {
    /// Create a new object with a fresh id.
    pub fn new(geometry: Geometry, style: ObjectStyle) -> Self {
        Self::with_id(Uuid::new_v4(), geometry, style)
    }

    /// Create an object with a specific id (replica decode, undo reinsert).
    pub fn with_id(id: ObjectId, geometry: Geometry, style: ObjectStyle) -> Self {
        let bounds =
            compute_bounds(&geometry, &style, DEFAULT_ARROW_HEAD_LENGTH).unwrap_or(Rect::ZERO);
        Self {
            id,
            geometry,
            style,
            layer_id: LayerId::new(),
            visible: true,
            locked: false,
            bounds,
            z_index: 0,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.geometry.kind()
    }

    /// Recompute the cached bounds with arrow barbs of `arrow_head_length`.
    /// Returns false for malformed geometry.
    pub fn refresh_bounds(&mut self, arrow_head_length: f64) -> bool {
        match compute_bounds(&self.geometry, &self.style, arrow_head_length) {
            Some(bounds) => {
                self.bounds = bounds;
                true
            }
            None => false,
        }
    }
}

/// A partial update to an object. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectPatch {
    pub geometry: Option<Geometry>,
    pub color: Option<SerializableColor>,
    pub stroke_width: Option<f64>,
    pub opacity: Option<f64>,
    pub fill_color: Option<Option<SerializableColor>>,
    pub font_family: Option<String>,
    pub font_size: Option<f64>,
    pub visible: Option<bool>,
    pub locked: Option<bool>,
}

impl ObjectPatch {
    pub fn geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn color(mut self, color: SerializableColor) -> Self {
        self.color = Some(color);
        self
    }

    pub fn stroke_width(mut self, width: f64) -> Self {
        self.stroke_width = Some(width);
        self
    }

    pub fn opacity(mut self, opacity: f64) -> Self {
        self.opacity = Some(opacity);
        self
    }

    pub fn fill_color(mut self, fill: Option<SerializableColor>) -> Self {
        self.fill_color = Some(fill);
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    pub fn locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Capture the current values of exactly the fields this patch touches.
    pub fn capture_from(&self, object: &DrawableObject) -> Self {
        let style = &object.style;
        Self {
            geometry: self.geometry.as_ref().map(|_| object.geometry.clone()),
            color: self.color.map(|_| style.color),
            stroke_width: self.stroke_width.map(|_| style.stroke_width),
            opacity: self.opacity.map(|_| style.opacity),
            fill_color: self.fill_color.map(|_| style.fill_color),
            font_family: self.font_family.as_ref().map(|_| style.font_family.clone()),
            font_size: self.font_size.map(|_| style.font_size),
            visible: self.visible.map(|_| object.visible),
            locked: self.locked.map(|_| object.locked),
        }
    }

    /// Apply the touched fields to an object in place. Arrow bounds assume
    /// the default head length until a scene re-derives them.
    pub fn apply_to(&self, object: &mut DrawableObject) {
        if let Some(geometry) = &self.geometry {
            object.geometry = geometry.clone();
        }
        let style = &mut object.style;
        if let Some(color) = self.color {
            style.color = color;
        }
        if let Some(width) = self.stroke_width {
            style.stroke_width = width;
        }
        if let Some(opacity) = self.opacity {
            style.opacity = opacity;
        }
        if let Some(fill) = self.fill_color {
            style.fill_color = fill;
        }
        if let Some(family) = &self.font_family {
            style.font_family = family.clone();
        }
        if let Some(size) = self.font_size {
            style.font_size = size;
        }
        if let Some(visible) = self.visible {
            object.visible = visible;
        }
        if let Some(locked) = self.locked {
            object.locked = locked;
        }
        object.refresh_bounds(DEFAULT_ARROW_HEAD_LENGTH);
    }
}

/// A layer entry: ordered, back-to-front object membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    pub opacity: f64,
    pub objects: Vec<ObjectId>,
}

impl Layer {
    pub fn new(id: impl Into<LayerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            visible: true,
            locked: false,
            opacity: 1.0,
            objects: Vec::new(),
        }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip_forms() {
        assert_eq!(SerializableColor::from_hex("#fff"), Some(SerializableColor::white()));
        assert_eq!(
            SerializableColor::from_hex("#ff000080"),
            Some(SerializableColor::new(255, 0, 0, 128))
        );
        assert_eq!(SerializableColor::from_hex("red"), None);
        assert_eq!(SerializableColor::new(16, 32, 48, 255).to_hex(), "#102030");
        assert_eq!(SerializableColor::new(16, 32, 48, 1).to_hex(), "#10203001");
    }

    #[test]
    fn test_geometry_kind_and_translate() {
        let mut geometry = Geometry::Line {
            start: Point::new(0.0, 0.0),
            end: Point::new(10.0, 0.0),
        };
        assert_eq!(geometry.kind(), ObjectKind::Line);
        geometry.translate(Vec2::new(5.0, 5.0));
        assert_eq!(geometry.points(), vec![Point::new(5.0, 5.0), Point::new(15.0, 5.0)]);
    }

    #[test]
    fn test_empty_stroke_is_malformed() {
        assert!(!Geometry::Stroke { points: vec![] }.is_well_formed());
        assert!(
            !Geometry::Circle {
                center: Point::new(f64::NAN, 0.0),
                radius: 3.0
            }
            .is_well_formed()
        );
    }

    #[test]
    fn test_patch_capture_only_touched_fields() {
        let object = DrawableObject::new(
            Geometry::Rectangle {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
            },
            ObjectStyle::default(),
        );
        let patch = ObjectPatch::default().stroke_width(8.0).visible(false);
        let captured = patch.capture_from(&object);
        assert_eq!(captured.stroke_width, Some(2.0));
        assert_eq!(captured.visible, Some(true));
        assert!(captured.color.is_none());
        assert!(captured.geometry.is_none());
    }

    #[test]
    fn test_patch_apply_refreshes_bounds() {
        let mut object = DrawableObject::new(
            Geometry::Rectangle {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
            },
            ObjectStyle::default(),
        );
        ObjectPatch::default().stroke_width(10.0).apply_to(&mut object);
        assert!((object.bounds.x0 + 5.0).abs() < f64::EPSILON);
        assert!((object.bounds.width() - 20.0).abs() < f64::EPSILON);
    }
}
