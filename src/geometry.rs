//! Vector and plane types for the axonometric viewport and raycaster.
//!
//! Wraps `vecmath`'s raw `[f64; 3]` arithmetic with named fields (`x`/`y`/`z`)
//! since the raycaster and shader read more naturally as `a.dot(b)` and `p.x`
//! than index-juggling tuples everywhere.

use vecmath::{vec3_add, vec3_cross, vec3_dot, vec3_len, vec3_scale, vec3_sub};

/// A point or direction in voxel space.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Vector3 { x, y, z }
    }

    pub const fn zero() -> Self {
        Vector3::new(0.0, 0.0, 0.0)
    }

    pub const fn unit_x() -> Self {
        Vector3::new(1.0, 0.0, 0.0)
    }

    pub const fn unit_y() -> Self {
        Vector3::new(0.0, 1.0, 0.0)
    }

    pub const fn unit_z() -> Self {
        Vector3::new(0.0, 0.0, 1.0)
    }

    fn arr(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    fn from_arr(a: [f64; 3]) -> Self {
        Vector3::new(a[0], a[1], a[2])
    }

    pub fn add(self, b: Self) -> Self {
        Self::from_arr(vec3_add(self.arr(), b.arr()))
    }

    pub fn subtract(self, b: Self) -> Self {
        Self::from_arr(vec3_sub(self.arr(), b.arr()))
    }

    pub fn multiply_by_constant(self, by: f64) -> Self {
        Self::from_arr(vec3_scale(self.arr(), by))
    }

    pub fn multiply_by_vector(self, by: Self) -> Self {
        Vector3::new(self.x * by.x, self.y * by.y, self.z * by.z)
    }

    pub fn divide_by_constant(self, by: f64) -> Self {
        self.multiply_by_constant(1.0 / by)
    }

    pub fn divide_by_vector(self, by: Self) -> Self {
        Vector3::new(self.x / by.x, self.y / by.y, self.z / by.z)
    }

    pub fn dot(self, b: Self) -> f64 {
        vec3_dot(self.arr(), b.arr())
    }

    pub fn cross(self, b: Self) -> Self {
        Self::from_arr(vec3_cross(self.arr(), b.arr()))
    }

    pub fn length(self) -> f64 {
        vec3_len(self.arr())
    }

    pub fn length_squared(self) -> f64 {
        self.dot(self)
    }

    /// Normalises the vector, returning it unchanged if it is (near) zero.
    pub fn normalise(self) -> Self {
        let len = self.length();
        if len < 1e-12 {
            self
        } else {
            self.divide_by_constant(len)
        }
    }

    pub fn lerp(self, b: Self, amt: f64) -> Self {
        self.multiply_by_constant(1.0 - amt).add(b.multiply_by_constant(amt))
    }

    pub fn equals(self, b: Self) -> bool {
        self.subtract(b).length() < 1e-12
    }
}

/// A point in integer voxel-grid coordinates.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Point { x, y, z }
    }

    pub fn to_vector3(self) -> Vector3 {
        Vector3::new(self.x as f64, self.y as f64, self.z as f64)
    }
}

/// A 2D point, used for sampler offsets within a pixel.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Vector2 {
    pub x: f64,
    pub y: f64,
}

impl Vector2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Vector2 { x, y }
    }

    pub fn add(self, b: Self) -> Self {
        Vector2::new(self.x + b.x, self.y + b.y)
    }

    pub fn subtract(self, b: Self) -> Self {
        Vector2::new(self.x - b.x, self.y - b.y)
    }

    pub fn divide_by_constant(self, by: f64) -> Self {
        Vector2::new(self.x / by, self.y / by)
    }

    pub fn length_squared(self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn distance_squared(self, b: Self) -> f64 {
        self.subtract(b).length_squared()
    }
}

/// A quadrilateral in space, used as the viewport plane for ray setup.
///
/// Corners run `a -> b` along one edge and `a -> d` along the other, so
/// `bilerp_within_plane` walks `u` along `a->b`/`d->c` and `v` across them.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Plane {
    pub a: Vector3,
    pub b: Vector3,
    pub c: Vector3,
    pub d: Vector3,
}

impl Plane {
    pub const fn new(a: Vector3, b: Vector3, c: Vector3, d: Vector3) -> Self {
        Plane { a, b, c, d }
    }

    pub fn bilerp_within_plane(&self, u: f64, v: f64) -> Vector3 {
        let abu = self.a.lerp(self.b, u);
        let dcu = self.d.lerp(self.c, u);
        abu.lerp(dcu, v)
    }

    pub fn equals(&self, other: &Plane) -> bool {
        self.a.equals(other.a) && self.b.equals(other.b) && self.c.equals(other.c) && self.d.equals(other.d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_and_cross_match_definitions() {
        let x = Vector3::unit_x();
        let y = Vector3::unit_y();
        assert_eq!(x.dot(y), 0.0);
        assert!(x.cross(y).equals(Vector3::unit_z()));
    }

    #[test]
    fn normalise_is_unit_length() {
        let v = Vector3::new(3.0, 4.0, 0.0).normalise();
        assert!((v.length() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normalise_leaves_zero_vector_alone() {
        assert_eq!(Vector3::zero().normalise(), Vector3::zero());
    }

    #[test]
    fn bilerp_corners_return_exact_corners() {
        let plane = Plane::new(
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        );
        assert!(plane.bilerp_within_plane(0.0, 0.0).equals(plane.a));
        assert!(plane.bilerp_within_plane(1.0, 0.0).equals(plane.b));
        assert!(plane.bilerp_within_plane(1.0, 1.0).equals(plane.c));
        assert!(plane.bilerp_within_plane(0.0, 1.0).equals(plane.d));
    }

    #[test]
    fn lerp_at_zero_and_one() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(10.0, 0.0, 0.0);
        assert!(a.lerp(b, 0.0).equals(a));
        assert!(a.lerp(b, 1.0).equals(b));
    }
}
