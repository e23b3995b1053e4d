//! View transform: pan offset plus a clamped zoom factor.

use kurbo::{Affine, Point, Vec2};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_ZOOM: f64 = 0.1;
pub const DEFAULT_MAX_ZOOM: f64 = 10.0;

/// Maps document coordinates to screen coordinates.
///
/// `screen = offset + world * zoom`. Rendering uses [`transform`](Self::transform);
/// pointer input goes through [`screen_to_world`](Self::screen_to_world).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Translation in screen pixels.
    pub offset: Vec2,
    zoom: f64,
    min_zoom: f64,
    max_zoom: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MIN_ZOOM, DEFAULT_MAX_ZOOM)
    }
}

impl Camera {
    /// Unit zoom clamped into `[min_zoom, max_zoom]`. Inverted limits collapse
    /// to `max_zoom`.
    pub fn with_limits(min_zoom: f64, max_zoom: f64) -> Self {
        let min_zoom = min_zoom.min(max_zoom);
        Self {
            offset: Vec2::ZERO,
            zoom: 1.0_f64.clamp(min_zoom, max_zoom),
            min_zoom,
            max_zoom,
        }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn zoom_limits(&self) -> (f64, f64) {
        (self.min_zoom, self.max_zoom)
    }

    /// World to screen.
    pub fn transform(&self) -> Affine {
        Affine::new([self.zoom, 0.0, 0.0, self.zoom, self.offset.x, self.offset.y])
    }

    pub fn screen_to_world(&self, screen: Point) -> Point {
        ((screen.to_vec2() - self.offset) / self.zoom).to_point()
    }

    pub fn world_to_screen(&self, world: Point) -> Point {
        (world.to_vec2() * self.zoom + self.offset).to_point()
    }

    /// Pan by a delta in screen pixels.
    pub fn pan(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    /// Set the zoom level, clamped to the limits. With `anchor`, the world
    /// point under that screen point stays put; without it the origin does.
    /// Returns whether the zoom changed.
    pub fn set_zoom(&mut self, level: f64, anchor: Option<Point>) -> bool {
        if !level.is_finite() {
            return false;
        }
        let next = level.clamp(self.min_zoom, self.max_zoom);
        if next == self.zoom {
            return false;
        }
        if let Some(anchor) = anchor {
            let pinned = anchor.to_vec2();
            self.offset = pinned - (pinned - self.offset) * (next / self.zoom);
        }
        self.zoom = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn near(a: Point, b: Point) -> bool {
        (a - b).hypot() < 1e-9
    }

    #[test]
    fn test_identity_by_default() {
        let camera = Camera::default();
        assert_eq!(camera.transform(), Affine::IDENTITY);
        assert_eq!(camera.zoom_limits(), (DEFAULT_MIN_ZOOM, DEFAULT_MAX_ZOOM));
    }

    #[test]
    fn test_pointer_maps_through_pan_and_zoom() {
        let mut camera = Camera::default();
        camera.pan(Vec2::new(50.0, 100.0));
        camera.set_zoom(2.0, None);

        let world = Point::new(50.0, 100.0);
        assert!(near(camera.screen_to_world(Point::new(150.0, 300.0)), world));
        assert!(near(camera.transform() * world, camera.world_to_screen(world)));
    }

    #[test]
    fn test_zoom_is_clamped_and_reports_change() {
        let mut camera = Camera::default();
        assert!(camera.set_zoom(0.001, None));
        assert_eq!(camera.zoom(), DEFAULT_MIN_ZOOM);
        assert!(camera.set_zoom(1e6, None));
        assert_eq!(camera.zoom(), DEFAULT_MAX_ZOOM);
        // Already at the ceiling.
        assert!(!camera.set_zoom(50.0, None));
        assert!(!camera.set_zoom(f64::INFINITY, None));
    }

    #[test]
    fn test_anchor_stays_under_the_pointer() {
        let mut camera = Camera::default();
        camera.pan(Vec2::new(12.0, -7.0));
        let anchor = Point::new(200.0, 150.0);
        let before = camera.screen_to_world(anchor);
        camera.set_zoom(3.0, Some(anchor));
        assert!(near(camera.screen_to_world(anchor), before));
        camera.set_zoom(0.5, Some(anchor));
        assert!(near(camera.screen_to_world(anchor), before));
    }

    #[test]
    fn test_limits_clamp_initial_zoom() {
        assert_eq!(Camera::with_limits(2.0, 4.0).zoom(), 2.0);
        assert_eq!(Camera::with_limits(5.0, 0.5).zoom_limits(), (0.5, 0.5));
    }
}
