use crate::math::{normalize_or, Point2d, Vector2d};
use cgmath::InnerSpace;

/// The longitudinal displacement and new speed after travelling for `dt` seconds.
///
/// Neither may become negative; a vehicle braking to a halt stays halted.
pub fn integrate(v: f64, a: f64, dt: f64) -> (f64, f64) {
    let dx = f64::max(v * dt + 0.5 * a * dt * dt, 0.0);
    let v = f64::max(v + a * dt, 0.0);
    (dx, v)
}

/// Computes the new heading of a vehicle whose centre moves from `pos` to `new_pos`,
/// by dragging its rear axle (at `wheel_base` behind the centre) along behind it.
pub fn heading(pos: Point2d, dir: Vector2d, new_pos: Point2d, wheel_base: f64) -> Vector2d {
    let b = pos - wheel_base * dir;
    let v = pos - b;
    let h = (v.magnitude2() - wheel_base.powi(2)) / (2.0 * (wheel_base + v.dot(dir)));
    let bp = b + h * dir;
    normalize_or(new_pos - bp, dir)
}
