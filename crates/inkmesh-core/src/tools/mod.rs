//! Tool state machines.
//!
//! Every tool moves between idle and active over pointer down, move and up,
//! plus an external cancel. Tools never touch the document: they report a
//! [`ToolAction`] and the engine turns it into a command.

mod click;
mod eraser;
mod freehand;
mod pan;
mod select;
mod shape;

pub use click::{EyedropperTool, FillTool, TextTool, fill_geometry, text_draft};
pub use eraser::EraserTool;
pub use freehand::FreehandTool;
pub use pan::PanTool;
pub use select::SelectTool;
pub use shape::{ShapeKind, ShapeTool, polygon_vertices, shape_geometry, triangle_vertices};

use std::fmt;
use std::str::FromStr;

use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::input::Modifiers;
use crate::render::Surface;
use crate::scene::Scene;
use crate::shapes::{DrawableObject, Geometry, ObjectId, ObjectStyle, SerializableColor};

/// Available tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    #[default]
    Select,
    Pan,
    Freehand,
    Line,
    Arrow,
    Rectangle,
    Circle,
    Triangle,
    Polygon,
    Eraser,
    Fill,
    Text,
    Eyedropper,
}

impl ToolKind {
    pub const ALL: [ToolKind; 13] = [
        ToolKind::Select,
        ToolKind::Pan,
        ToolKind::Freehand,
        ToolKind::Line,
        ToolKind::Arrow,
        ToolKind::Rectangle,
        ToolKind::Circle,
        ToolKind::Triangle,
        ToolKind::Polygon,
        ToolKind::Eraser,
        ToolKind::Fill,
        ToolKind::Text,
        ToolKind::Eyedropper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Select => "select",
            ToolKind::Pan => "pan",
            ToolKind::Freehand => "freehand",
            ToolKind::Line => "line",
            ToolKind::Arrow => "arrow",
            ToolKind::Rectangle => "rectangle",
            ToolKind::Circle => "circle",
            ToolKind::Triangle => "triangle",
            ToolKind::Polygon => "polygon",
            ToolKind::Eraser => "eraser",
            ToolKind::Fill => "fill",
            ToolKind::Text => "text",
            ToolKind::Eyedropper => "eyedropper",
        }
    }

    /// Tools a viewer may drive.
    pub fn allowed_for_viewer(&self) -> bool {
        matches!(self, ToolKind::Pan)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown tool '{s}'"))
    }
}

/// Brush settings applied to objects the tools create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrushOptions {
    pub style: ObjectStyle,
    /// Vertex count for the polygon tool.
    pub polygon_sides: usize,
}

impl Default for BrushOptions {
    fn default() -> Self {
        Self {
            style: ObjectStyle::default(),
            polygon_sides: 6,
        }
    }
}

impl BrushOptions {
    /// Merge a partial update. Returns whether anything changed.
    pub fn apply(&mut self, patch: &BrushPatch) -> bool {
        let before = self.clone();
        if let Some(color) = patch.color {
            self.style.color = color;
        }
        if let Some(width) = patch.stroke_width {
            self.style.stroke_width = width.max(0.0);
        }
        if let Some(opacity) = patch.opacity {
            self.style.opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(fill) = patch.fill_color {
            self.style.fill_color = fill;
        }
        if let Some(family) = &patch.font_family {
            self.style.font_family = family.clone();
        }
        if let Some(size) = patch.font_size {
            self.style.font_size = size.max(1.0);
        }
        if let Some(sides) = patch.polygon_sides {
            self.polygon_sides = sides.max(3);
        }
        *self != before
    }
}

/// Partial brush update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushPatch {
    pub color: Option<SerializableColor>,
    pub stroke_width: Option<f64>,
    pub opacity: Option<f64>,
    pub fill_color: Option<Option<SerializableColor>>,
    pub font_family: Option<String>,
    pub font_size: Option<f64>,
    pub polygon_sides: Option<usize>,
}

/// A pointer position in both coordinate spaces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerSample {
    pub world: Point,
    pub screen: Point,
}

impl PointerSample {
    pub fn new(world: Point, screen: Point) -> Self {
        Self { world, screen }
    }

    /// Sample with identical world and screen positions.
    pub fn at(point: Point) -> Self {
        Self::new(point, point)
    }
}

/// Read-only state a tool may consult.
pub struct ToolContext<'a> {
    pub scene: &'a Scene,
    pub selection: &'a [ObjectId],
    pub brush: &'a BrushOptions,
    pub config: &'a EngineConfig,
    pub modifiers: Modifiers,
}

/// Geometry and style of an object a tool wants to create.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDraft {
    pub geometry: Geometry,
    pub style: ObjectStyle,
}

impl ObjectDraft {
    pub fn into_object(self) -> DrawableObject {
        DrawableObject::new(self.geometry, self.style)
    }
}

/// What the engine should do after a tool transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolAction {
    None,
    /// Commit a new object.
    Create(ObjectDraft),
    /// Ask the host for text to place at a document position.
    RequestText(Point),
    /// Delete objects directly, outside history.
    Erase(Vec<ObjectId>),
    /// Replace the selection.
    SetSelection(Vec<ObjectId>),
    /// Sample the rendered color at a screen position.
    PickColor(Point),
    /// Pan the view by a screen-space delta.
    Pan(Vec2),
}

/// Operations every tool implements.
pub trait ToolBehavior {
    fn on_down(&mut self, pointer: PointerSample, ctx: &ToolContext) -> ToolAction;

    fn on_move(&mut self, pointer: PointerSample, ctx: &ToolContext) -> ToolAction;

    fn on_up(&mut self, pointer: PointerSample, ctx: &ToolContext) -> ToolAction;

    /// Drop any uncommitted state. Never produces a mutation.
    fn on_cancel(&mut self);

    fn is_active(&self) -> bool;

    /// Draw in-progress feedback. Called once per frame.
    fn render_preview(&self, _surface: &mut dyn Surface, _ctx: &ToolContext) {}
}

/// The engine's active tool.
#[derive(Debug, Clone)]
pub enum Tool {
    Select(SelectTool),
    Pan(PanTool),
    Freehand(FreehandTool),
    Shape(ShapeTool),
    Eraser(EraserTool),
    Fill(FillTool),
    Text(TextTool),
    Eyedropper(EyedropperTool),
}

impl Tool {
    pub fn new(kind: ToolKind) -> Self {
        match kind {
            ToolKind::Select => Tool::Select(SelectTool::default()),
            ToolKind::Pan => Tool::Pan(PanTool::default()),
            ToolKind::Freehand => Tool::Freehand(FreehandTool::default()),
            ToolKind::Line => Tool::Shape(ShapeTool::new(ShapeKind::Line)),
            ToolKind::Arrow => Tool::Shape(ShapeTool::new(ShapeKind::Arrow)),
            ToolKind::Rectangle => Tool::Shape(ShapeTool::new(ShapeKind::Rectangle)),
            ToolKind::Circle => Tool::Shape(ShapeTool::new(ShapeKind::Circle)),
            ToolKind::Triangle => Tool::Shape(ShapeTool::new(ShapeKind::Triangle)),
            ToolKind::Polygon => Tool::Shape(ShapeTool::new(ShapeKind::Polygon)),
            ToolKind::Eraser => Tool::Eraser(EraserTool),
            ToolKind::Fill => Tool::Fill(FillTool::default()),
            ToolKind::Text => Tool::Text(TextTool::default()),
            ToolKind::Eyedropper => Tool::Eyedropper(EyedropperTool::default()),
        }
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            Tool::Select(_) => ToolKind::Select,
            Tool::Pan(_) => ToolKind::Pan,
            Tool::Freehand(_) => ToolKind::Freehand,
            Tool::Shape(tool) => match tool.kind() {
                ShapeKind::Line => ToolKind::Line,
                ShapeKind::Arrow => ToolKind::Arrow,
                ShapeKind::Rectangle => ToolKind::Rectangle,
                ShapeKind::Circle => ToolKind::Circle,
                ShapeKind::Triangle => ToolKind::Triangle,
                ShapeKind::Polygon => ToolKind::Polygon,
            },
            Tool::Eraser(_) => ToolKind::Eraser,
            Tool::Fill(_) => ToolKind::Fill,
            Tool::Text(_) => ToolKind::Text,
            Tool::Eyedropper(_) => ToolKind::Eyedropper,
        }
    }

    fn behavior(&self) -> &dyn ToolBehavior {
        match self {
            Tool::Select(tool) => tool,
            Tool::Pan(tool) => tool,
            Tool::Freehand(tool) => tool,
            Tool::Shape(tool) => tool,
            Tool::Eraser(tool) => tool,
            Tool::Fill(tool) => tool,
            Tool::Text(tool) => tool,
            Tool::Eyedropper(tool) => tool,
        }
    }

    fn behavior_mut(&mut self) -> &mut dyn ToolBehavior {
        match self {
            Tool::Select(tool) => tool,
            Tool::Pan(tool) => tool,
            Tool::Freehand(tool) => tool,
            Tool::Shape(tool) => tool,
            Tool::Eraser(tool) => tool,
            Tool::Fill(tool) => tool,
            Tool::Text(tool) => tool,
            Tool::Eyedropper(tool) => tool,
        }
    }
}

impl Default for Tool {
    fn default() -> Self {
        Tool::new(ToolKind::default())
    }
}

impl ToolBehavior for Tool {
    fn on_down(&mut self, pointer: PointerSample, ctx: &ToolContext) -> ToolAction {
        self.behavior_mut().on_down(pointer, ctx)
    }

    fn on_move(&mut self, pointer: PointerSample, ctx: &ToolContext) -> ToolAction {
        self.behavior_mut().on_move(pointer, ctx)
    }

    fn on_up(&mut self, pointer: PointerSample, ctx: &ToolContext) -> ToolAction {
        self.behavior_mut().on_up(pointer, ctx)
    }

    fn on_cancel(&mut self) {
        self.behavior_mut().on_cancel();
    }

    fn is_active(&self) -> bool {
        self.behavior().is_active()
    }

    fn render_preview(&self, surface: &mut dyn Surface, ctx: &ToolContext) {
        self.behavior().render_preview(surface, ctx);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{Fixture, at};
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in ToolKind::ALL {
            assert_eq!(Tool::new(kind).kind(), kind);
            assert_eq!(kind.as_str().parse::<ToolKind>().unwrap(), kind);
        }
        assert!("lasso".parse::<ToolKind>().is_err());
    }

    #[test]
    fn test_tool_interaction() {
        let fixture = Fixture::new();
        let mut tool = Tool::new(ToolKind::Rectangle);
        assert!(!tool.is_active());
        tool.on_down(at(10.0, 10.0), &fixture.ctx());
        assert!(tool.is_active());
        tool.on_move(at(50.0, 50.0), &fixture.ctx());
        let action = tool.on_up(at(100.0, 100.0), &fixture.ctx());
        assert!(!tool.is_active());
        assert!(matches!(action, ToolAction::Create(_)));
    }

    #[test]
    fn test_cancel_interaction() {
        let fixture = Fixture::new();
        let mut tool = Tool::new(ToolKind::Freehand);
        tool.on_down(at(0.0, 0.0), &fixture.ctx());
        tool.on_move(at(5.0, 5.0), &fixture.ctx());
        tool.on_cancel();
        assert!(!tool.is_active());
        assert_eq!(tool.on_up(at(9.0, 9.0), &fixture.ctx()), ToolAction::None);
    }

    #[test]
    fn test_brush_patch() {
        let mut brush = BrushOptions::default();
        assert!(!brush.apply(&BrushPatch::default()));
        let patch = BrushPatch {
            opacity: Some(4.0),
            polygon_sides: Some(1),
            ..BrushPatch::default()
        };
        assert!(brush.apply(&patch));
        assert!((brush.style.opacity - 1.0).abs() < f64::EPSILON);
        assert_eq!(brush.polygon_sides, 3);
    }
}
