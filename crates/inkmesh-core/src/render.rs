//! Render traversal over a published scene.
//!
//! Painting is the host's job. The engine walks the scene and feeds a
//! [`Surface`] the objects to draw, back to front, plus overlays. Nothing in
//! here touches the document.

use kurbo::{Affine, BezPath, Point, Rect};

use crate::scene::Scene;
use crate::shapes::{DrawableObject, Geometry, ObjectId, ObjectStyle, SerializableColor};

/// Drawing target implemented by a renderer.
pub trait Surface {
    /// Start a frame with the world-to-screen transform.
    fn begin_frame(&mut self, view: Affine);

    /// Draw a committed object along its world-space `path`.
    /// `layer_opacity` multiplies the object's own.
    fn draw_object(&mut self, object: &DrawableObject, path: &BezPath, layer_opacity: f64);

    /// Draw an uncommitted shape from an active tool.
    fn draw_preview(&mut self, geometry: &Geometry, path: &BezPath, style: &ObjectStyle);

    fn draw_selection(&mut self, _bounds: Rect) {}

    fn draw_rubber_band(&mut self, _rect: Rect) {}

    fn draw_remote_cursor(&mut self, _peer: &str, _position: Point, _color: Option<SerializableColor>) {}

    fn end_frame(&mut self) {}
}

/// Reads back rendered pixels for the eyedropper.
pub trait PixelSampler {
    /// Color at a screen position, or `None` outside the surface.
    fn sample(&self, screen_point: Point) -> Option<SerializableColor>;
}

/// Draw every visible object of `scene` and the selection outlines.
pub fn render_scene(scene: &Scene, surface: &mut dyn Surface, selection: &[ObjectId]) {
    for object in scene.ordered() {
        if !object.visible {
            continue;
        }
        let Some(layer) = scene.layer(&object.layer_id) else {
            continue;
        };
        if !layer.visible {
            continue;
        }
        let path = object.geometry.to_path(scene.arrow_head_length());
        surface.draw_object(object, &path, layer.opacity);
    }
    for id in selection {
        if let Some(object) = scene.object(*id) {
            surface.draw_selection(object.bounds);
        }
    }
}

/// One recorded draw call.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Begin(Affine),
    Object { id: ObjectId, opacity: f64 },
    Preview(Geometry),
    Selection(Rect),
    RubberBand(Rect),
    Cursor { peer: String, position: Point },
    End,
}

/// A [`Surface`] that records draw calls. Useful for headless hosts and
/// tests.
#[derive(Debug, Clone, Default)]
pub struct DisplayList {
    pub ops: Vec<DrawOp>,
}

impl DisplayList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of drawn objects in paint order.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Object { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn previews(&self) -> Vec<&Geometry> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Preview(geometry) => Some(geometry),
                _ => None,
            })
            .collect()
    }
}

impl Surface for DisplayList {
    fn begin_frame(&mut self, view: Affine) {
        self.ops.clear();
        self.ops.push(DrawOp::Begin(view));
    }

    fn draw_object(&mut self, object: &DrawableObject, _path: &BezPath, layer_opacity: f64) {
        self.ops.push(DrawOp::Object {
            id: object.id,
            opacity: object.style.opacity * layer_opacity,
        });
    }

    fn draw_preview(&mut self, geometry: &Geometry, _path: &BezPath, _style: &ObjectStyle) {
        self.ops.push(DrawOp::Preview(geometry.clone()));
    }

    fn draw_selection(&mut self, bounds: Rect) {
        self.ops.push(DrawOp::Selection(bounds));
    }

    fn draw_rubber_band(&mut self, rect: Rect) {
        self.ops.push(DrawOp::RubberBand(rect));
    }

    fn draw_remote_cursor(&mut self, peer: &str, position: Point, _color: Option<SerializableColor>) {
        self.ops.push(DrawOp::Cursor {
            peer: peer.to_string(),
            position,
        });
    }

    fn end_frame(&mut self) {
        self.ops.push(DrawOp::End);
    }
}
