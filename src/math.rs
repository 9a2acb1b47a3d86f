//! Geometric primitives.

use cgmath::prelude::*;
use cgmath::{Point2, Vector2};

/// A 2D point
pub type Point2d = Point2<f64>;

/// A 2D vector
pub type Vector2d = Vector2<f64>;

/// Rotates a vector 90 degrees anti-clockwise, giving the left-hand normal of a heading.
pub fn rot90(vec: Vector2d) -> Vector2d {
    Vector2d::new(-vec.y, vec.x)
}

/// Linearly interpolates between two points.
pub fn lerp_point(a: Point2d, b: Point2d, t: f64) -> Point2d {
    a + (b - a) * t
}

/// Normalises a vector, falling back to `fallback` for vectors of (near) zero length.
pub fn normalize_or(vec: Vector2d, fallback: Vector2d) -> Vector2d {
    let mag = vec.magnitude();
    if mag > 1e-9 {
        vec / mag
    } else {
        fallback
    }
}
