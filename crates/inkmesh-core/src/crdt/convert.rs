//! Conversion between the object/layer model and Loro values.

use crate::shapes::{
    DrawableObject, Geometry, Layer, ObjectId, ObjectKind, ObjectPatch, ObjectStyle,
    SerializableColor,
};
use kurbo::Point;
use loro::{LoroList, LoroMap, LoroMapValue, LoroMovableList, LoroResult, LoroValue};
use uuid::Uuid;

// Common keys
const KEY_TYPE: &str = "type";
const KEY_ID: &str = "id";
const KEY_VISIBLE: &str = "visible";
const KEY_LOCKED: &str = "locked";

// Style keys
const KEY_COLOR: &str = "color";
const KEY_STROKE_WIDTH: &str = "stroke_width";
const KEY_OPACITY: &str = "opacity";
const KEY_FILL_COLOR: &str = "fill_color";
const KEY_FONT_FAMILY: &str = "font_family";
const KEY_FONT_SIZE: &str = "font_size";

// Geometry keys
const KEY_X: &str = "x";
const KEY_Y: &str = "y";
const KEY_WIDTH: &str = "width";
const KEY_HEIGHT: &str = "height";
const KEY_RADIUS: &str = "radius";
const KEY_START_X: &str = "start_x";
const KEY_START_Y: &str = "start_y";
const KEY_END_X: &str = "end_x";
const KEY_END_Y: &str = "end_y";
const KEY_POINTS: &str = "points";
const KEY_CONTENT: &str = "content";

// Layer keys
const KEY_NAME: &str = "name";
pub(crate) const KEY_MEMBERS: &str = "objects";

fn get_double(map: &LoroMapValue, key: &str) -> Option<f64> {
    match map.get(key)? {
        LoroValue::Double(d) => Some(*d),
        LoroValue::I64(i) => Some(*i as f64),
        _ => None,
    }
}

fn get_string(map: &LoroMapValue, key: &str) -> Option<String> {
    match map.get(key)? {
        LoroValue::String(s) => Some(s.to_string()),
        _ => None,
    }
}

fn get_bool(map: &LoroMapValue, key: &str) -> Option<bool> {
    match map.get(key)? {
        LoroValue::Bool(b) => Some(*b),
        _ => None,
    }
}

fn get_color(map: &LoroMapValue, key: &str) -> Option<SerializableColor> {
    SerializableColor::from_hex(&get_string(map, key)?)
}

fn value_to_f64(value: &LoroValue) -> Option<f64> {
    match value {
        LoroValue::Double(d) => Some(*d),
        LoroValue::I64(i) => Some(*i as f64),
        _ => None,
    }
}

fn get_points(map: &LoroMapValue, key: &str) -> Option<Vec<Point>> {
    let LoroValue::List(list) = map.get(key)? else {
        return None;
    };
    list.iter()
        .map(|entry| match entry {
            LoroValue::List(coords) if coords.len() >= 2 => {
                Some(Point::new(value_to_f64(&coords[0])?, value_to_f64(&coords[1])?))
            }
            _ => None,
        })
        .collect()
}

fn points_to_loro(map: &LoroMap, key: &str, points: &[Point]) -> LoroResult<()> {
    // Each point is a nested [x, y] list.
    let list = map.insert_container(key, LoroList::new())?;
    for point in points {
        let pair = list.insert_container(list.len(), LoroList::new())?;
        pair.push(point.x)?;
        pair.push(point.y)?;
    }
    Ok(())
}

/// Write a full object entry.
pub fn object_to_loro(object: &DrawableObject, map: &LoroMap) -> LoroResult<()> {
    map.insert(KEY_ID, object.id.to_string())?;
    geometry_to_loro(&object.geometry, map)?;
    style_to_loro(&object.style, map)?;
    map.insert(KEY_VISIBLE, object.visible)?;
    map.insert(KEY_LOCKED, object.locked)?;
    Ok(())
}

/// Write the type tag and geometry fields.
pub(crate) fn geometry_to_loro(geometry: &Geometry, map: &LoroMap) -> LoroResult<()> {
    map.insert(KEY_TYPE, geometry.kind().as_str())?;
    match geometry {
        Geometry::Stroke { points } | Geometry::Polygon { vertices: points } => {
            points_to_loro(map, KEY_POINTS, points)?;
        }
        Geometry::Triangle { vertices } => points_to_loro(map, KEY_POINTS, vertices)?,
        Geometry::Line { start, end } | Geometry::Arrow { start, end } => {
            map.insert(KEY_START_X, start.x)?;
            map.insert(KEY_START_Y, start.y)?;
            map.insert(KEY_END_X, end.x)?;
            map.insert(KEY_END_Y, end.y)?;
        }
        Geometry::Rectangle {
            x,
            y,
            width,
            height,
        } => {
            map.insert(KEY_X, *x)?;
            map.insert(KEY_Y, *y)?;
            map.insert(KEY_WIDTH, *width)?;
            map.insert(KEY_HEIGHT, *height)?;
        }
        Geometry::Circle { center, radius } => {
            map.insert(KEY_X, center.x)?;
            map.insert(KEY_Y, center.y)?;
            map.insert(KEY_RADIUS, *radius)?;
        }
        Geometry::Text {
            position,
            content,
            width,
            height,
        } => {
            map.insert(KEY_X, position.x)?;
            map.insert(KEY_Y, position.y)?;
            map.insert(KEY_CONTENT, content.clone())?;
            map.insert(KEY_WIDTH, width.map(LoroValue::from).unwrap_or(LoroValue::Null))?;
            map.insert(KEY_HEIGHT, height.map(LoroValue::from).unwrap_or(LoroValue::Null))?;
        }
    }
    Ok(())
}

fn style_to_loro(style: &ObjectStyle, map: &LoroMap) -> LoroResult<()> {
    map.insert(KEY_COLOR, style.color.to_hex())?;
    map.insert(KEY_STROKE_WIDTH, style.stroke_width)?;
    map.insert(KEY_OPACITY, style.opacity)?;
    fill_to_loro(style.fill_color, map)?;
    map.insert(KEY_FONT_FAMILY, style.font_family.clone())?;
    map.insert(KEY_FONT_SIZE, style.font_size)?;
    Ok(())
}

fn fill_to_loro(fill: Option<SerializableColor>, map: &LoroMap) -> LoroResult<()> {
    match fill {
        Some(color) => map.insert(KEY_FILL_COLOR, color.to_hex()),
        None => map.insert(KEY_FILL_COLOR, LoroValue::Null),
    }
}

/// Write only the fields a patch touches. Each field is its own map key,
/// so concurrent patches to different fields of one object both survive.
pub(crate) fn patch_to_loro(patch: &ObjectPatch, map: &LoroMap) -> LoroResult<()> {
    if let Some(geometry) = &patch.geometry {
        geometry_to_loro(geometry, map)?;
    }
    if let Some(color) = patch.color {
        map.insert(KEY_COLOR, color.to_hex())?;
    }
    if let Some(width) = patch.stroke_width {
        map.insert(KEY_STROKE_WIDTH, width)?;
    }
    if let Some(opacity) = patch.opacity {
        map.insert(KEY_OPACITY, opacity)?;
    }
    if let Some(fill) = patch.fill_color {
        fill_to_loro(fill, map)?;
    }
    if let Some(family) = &patch.font_family {
        map.insert(KEY_FONT_FAMILY, family.clone())?;
    }
    if let Some(size) = patch.font_size {
        map.insert(KEY_FONT_SIZE, size)?;
    }
    if let Some(visible) = patch.visible {
        map.insert(KEY_VISIBLE, visible)?;
    }
    if let Some(locked) = patch.locked {
        map.insert(KEY_LOCKED, locked)?;
    }
    Ok(())
}

/// Decode an object entry. Returns `None` when the type tag or geometry is
/// missing or mistyped; style fields fall back to defaults.
pub fn object_from_loro(map: &LoroMapValue) -> Option<DrawableObject> {
    let id = Uuid::parse_str(&get_string(map, KEY_ID)?).ok()?;
    let geometry = geometry_from_loro(map)?;
    let defaults = ObjectStyle::default();
    let style = ObjectStyle {
        color: get_color(map, KEY_COLOR).unwrap_or(defaults.color),
        stroke_width: get_double(map, KEY_STROKE_WIDTH).unwrap_or(defaults.stroke_width),
        opacity: get_double(map, KEY_OPACITY).unwrap_or(defaults.opacity),
        fill_color: get_color(map, KEY_FILL_COLOR),
        font_family: get_string(map, KEY_FONT_FAMILY).unwrap_or(defaults.font_family),
        font_size: get_double(map, KEY_FONT_SIZE).unwrap_or(defaults.font_size),
    };
    let mut object = DrawableObject::with_id(id, geometry, style);
    object.visible = get_bool(map, KEY_VISIBLE).unwrap_or(true);
    object.locked = get_bool(map, KEY_LOCKED).unwrap_or(false);
    Some(object)
}

fn geometry_from_loro(map: &LoroMapValue) -> Option<Geometry> {
    let kind = ObjectKind::parse(&get_string(map, KEY_TYPE)?)?;
    let point = |x: &str, y: &str| Some(Point::new(get_double(map, x)?, get_double(map, y)?));

    Some(match kind {
        ObjectKind::Stroke => Geometry::Stroke {
            points: get_points(map, KEY_POINTS)?,
        },
        ObjectKind::Polygon => Geometry::Polygon {
            vertices: get_points(map, KEY_POINTS)?,
        },
        ObjectKind::Triangle => {
            let points = get_points(map, KEY_POINTS)?;
            Geometry::Triangle {
                vertices: points.try_into().ok()?,
            }
        }
        ObjectKind::Line => Geometry::Line {
            start: point(KEY_START_X, KEY_START_Y)?,
            end: point(KEY_END_X, KEY_END_Y)?,
        },
        ObjectKind::Arrow => Geometry::Arrow {
            start: point(KEY_START_X, KEY_START_Y)?,
            end: point(KEY_END_X, KEY_END_Y)?,
        },
        ObjectKind::Rectangle => Geometry::Rectangle {
            x: get_double(map, KEY_X)?,
            y: get_double(map, KEY_Y)?,
            width: get_double(map, KEY_WIDTH)?,
            height: get_double(map, KEY_HEIGHT)?,
        },
        ObjectKind::Circle => Geometry::Circle {
            center: point(KEY_X, KEY_Y)?,
            radius: get_double(map, KEY_RADIUS)?,
        },
        ObjectKind::Text => Geometry::Text {
            position: point(KEY_X, KEY_Y)?,
            content: get_string(map, KEY_CONTENT).unwrap_or_default(),
            width: get_double(map, KEY_WIDTH),
            height: get_double(map, KEY_HEIGHT),
        },
    })
}

/// Write a layer entry, including its nested membership sequence.
pub(crate) fn layer_to_loro(layer: &Layer, map: &LoroMap) -> LoroResult<()> {
    map.insert(KEY_ID, layer.id.clone())?;
    map.insert(KEY_NAME, layer.name.clone())?;
    map.insert(KEY_VISIBLE, layer.visible)?;
    map.insert(KEY_LOCKED, layer.locked)?;
    map.insert(KEY_OPACITY, layer.opacity)?;
    let members = map.insert_container(KEY_MEMBERS, LoroMovableList::new())?;
    for id in &layer.objects {
        members.push(id.to_string())?;
    }
    Ok(())
}

pub(crate) fn set_layer_name(map: &LoroMap, name: &str) -> LoroResult<()> {
    map.insert(KEY_NAME, name.to_string())
}

pub(crate) fn set_layer_visible(map: &LoroMap, visible: bool) -> LoroResult<()> {
    map.insert(KEY_VISIBLE, visible)
}

pub(crate) fn set_layer_locked(map: &LoroMap, locked: bool) -> LoroResult<()> {
    map.insert(KEY_LOCKED, locked)
}

pub(crate) fn set_layer_opacity(map: &LoroMap, opacity: f64) -> LoroResult<()> {
    map.insert(KEY_OPACITY, opacity)
}

/// Decode a layer entry. Member ids that are not UUIDs are dropped.
pub fn layer_from_loro(map: &LoroMapValue) -> Option<Layer> {
    let id = get_string(map, KEY_ID)?;
    let mut layer = Layer::new(id.clone(), get_string(map, KEY_NAME).unwrap_or(id));
    layer.visible = get_bool(map, KEY_VISIBLE).unwrap_or(true);
    layer.locked = get_bool(map, KEY_LOCKED).unwrap_or(false);
    layer.opacity = get_double(map, KEY_OPACITY).unwrap_or(1.0);
    if let Some(LoroValue::List(members)) = map.get(KEY_MEMBERS) {
        layer.objects = members
            .iter()
            .filter_map(|entry| match entry {
                LoroValue::String(s) => Uuid::parse_str(s).ok(),
                _ => None,
            })
            .collect::<Vec<ObjectId>>();
    }
    Some(layer)
}
