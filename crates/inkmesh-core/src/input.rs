//! Host input events and keyboard shortcuts.

use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Modifier keys state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        shift: false,
        ctrl: false,
        alt: false,
        meta: false,
    };

    /// Ctrl on most platforms, Cmd on macOS.
    pub fn command(&self) -> bool {
        self.ctrl || self.meta
    }

    /// Modifier that makes selection additive.
    pub fn additive(&self) -> bool {
        self.shift || self.command()
    }
}

/// Pointer event in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointerEvent {
    Down {
        position: Point,
        button: MouseButton,
    },
    Move {
        position: Point,
    },
    Up {
        position: Point,
        button: MouseButton,
    },
}

impl PointerEvent {
    pub fn position(&self) -> Point {
        match *self {
            PointerEvent::Down { position, .. }
            | PointerEvent::Move { position }
            | PointerEvent::Up { position, .. } => position,
        }
    }
}

/// A key press with the modifiers held at the time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Logical key name, e.g. `"z"`, `"Delete"`, `"Escape"`.
    pub key: String,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>, modifiers: Modifiers) -> Self {
        Self {
            key: key.into(),
            modifiers,
        }
    }
}

/// Editor-level actions bound to keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EditorAction {
    DeleteSelection,
    Undo,
    Redo,
    CancelTool,
    SelectAll,
}

/// A keyboard shortcut definition.
#[derive(Debug, Clone, Copy)]
pub struct Shortcut {
    pub key: &'static str,
    pub ctrl: bool,
    pub shift: bool,
    pub action: EditorAction,
    pub description: &'static str,
}

impl Shortcut {
    pub const fn new(
        key: &'static str,
        ctrl: bool,
        shift: bool,
        action: EditorAction,
        description: &'static str,
    ) -> Self {
        Self {
            key,
            ctrl,
            shift,
            action,
            description,
        }
    }

    /// Format for display, e.g. "Ctrl+Shift+Z".
    pub fn format(&self) -> String {
        let mut parts = Vec::new();
        if self.ctrl {
            parts.push("Ctrl");
        }
        if self.shift {
            parts.push("Shift");
        }
        let key = self.key.to_uppercase();
        let mut out = parts.join("+");
        if !out.is_empty() {
            out.push('+');
        }
        if self.key.chars().count() == 1 {
            out.push_str(&key);
        } else {
            out.push_str(self.key);
        }
        out
    }

    /// Whether `event` triggers this shortcut. Letter keys match
    /// case-insensitively; the command and shift states must match exactly.
    pub fn matches(&self, event: &KeyEvent) -> bool {
        event.key.eq_ignore_ascii_case(self.key)
            && event.modifiers.command() == self.ctrl
            && event.modifiers.shift == self.shift
    }
}

/// All editor shortcuts.
pub struct ShortcutRegistry;

impl ShortcutRegistry {
    pub fn all() -> &'static [Shortcut] {
        const SHORTCUTS: &[Shortcut] = &[
            Shortcut::new("Delete", false, false, EditorAction::DeleteSelection, "Delete selection"),
            Shortcut::new("Backspace", false, false, EditorAction::DeleteSelection, "Delete selection"),
            Shortcut::new("z", true, false, EditorAction::Undo, "Undo"),
            Shortcut::new("z", true, true, EditorAction::Redo, "Redo"),
            Shortcut::new("y", true, false, EditorAction::Redo, "Redo"),
            Shortcut::new("Escape", false, false, EditorAction::CancelTool, "Cancel current tool"),
            Shortcut::new("a", true, false, EditorAction::SelectAll, "Select all"),
        ];
        SHORTCUTS
    }

    /// Action bound to `event`, if any.
    pub fn resolve(event: &KeyEvent) -> Option<EditorAction> {
        Self::all()
            .iter()
            .find(|shortcut| shortcut.matches(event))
            .map(|shortcut| shortcut.action)
    }
}
