//! Transformation matrices and the uniform block they end up in.

use std::f32::consts::PI;

use nalgebra_glm as glm;

/// The uniform block read by the vertex shader.
///
/// Intended to be copied byte-for-byte into a uniform buffer, which is why
/// it's `#[repr(C)]`. nalgebra stores matrices column-major, matching WGSL.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Uniforms {
    /// The combined projection x view x model transform.
    pub mvp: glm::Mat4,
}

impl Default for Uniforms {
    fn default() -> Self {
        Self { mvp: identity() }
    }
}

pub fn identity() -> glm::Mat4 {
    glm::identity()
}

pub fn translation(t: &glm::Vec3) -> glm::Mat4 {
    glm::translation(t)
}

/// A rotation of `angle` radians about `axis`, counter-clockwise when looking
/// down the axis towards the origin.
pub fn rotation(axis: &glm::Vec3, angle: f32) -> glm::Mat4 {
    glm::rotation(angle, axis)
}

/// A right-handed perspective projection mapping depth onto `[0, 1]`, the
/// range Vulkan clips against.
pub fn perspective(aspect: f32, fovy: f32, near: f32, far: f32) -> glm::Mat4 {
    glm::perspective_rh_zo(aspect, fovy, near, far)
}

/// Orbiting camera for the cube: a fixed view and projection looking at a
/// model that spins about the X axis.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    /// Accumulated model rotation, in radians.
    pub angle: f32,
    pub eye_offset: glm::Vec3,
    pub fovy: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            angle: 0.0,
            eye_offset: glm::vec3(0.0, 0.0, -7.0),
            fovy: (2.0 * PI) / 5.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    /// Spin the model by one radian per second of `delta_t`.
    pub fn advance(&mut self, delta_t: f32) {
        self.angle = (self.angle + delta_t) % (2.0 * PI);
    }

    /// Build the uniform block for a drawable of the given aspect ratio.
    pub fn uniforms(&self, aspect: f32) -> Uniforms {
        let model = rotation(&glm::vec3(1.0, 0.0, 0.0), self.angle);
        let view = translation(&self.eye_offset);
        let projection = perspective(aspect, self.fovy, self.near, self.far);

        Uniforms {
            mvp: projection * view * model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    const EPSILON: f32 = 1e-5;

    fn project(mvp: &glm::Mat4, point: glm::Vec4) -> glm::Vec3 {
        let clip = mvp * point;
        glm::vec3(clip.x / clip.w, clip.y / clip.w, clip.z / clip.w)
    }

    #[test]
    fn uniform_block_is_one_matrix() {
        assert_eq!(size_of::<Uniforms>(), 64);
        assert_eq!(Uniforms::default().mvp, glm::Mat4::identity());
    }

    #[test]
    fn translation_moves_points() {
        let moved = translation(&glm::vec3(1.0, 2.0, 3.0)) * glm::vec4(1.0, 1.0, 1.0, 1.0);
        assert!(glm::equal_eps(&moved, &glm::vec4(2.0, 3.0, 4.0, 1.0), EPSILON).iter().all(|b| *b));
    }

    #[test]
    fn rotation_about_x_turns_y_into_z() {
        let rotated = rotation(&glm::vec3(1.0, 0.0, 0.0), PI / 2.0) * glm::vec4(0.0, 1.0, 0.0, 1.0);
        assert!((rotated.y).abs() < EPSILON);
        assert!((rotated.z - 1.0).abs() < EPSILON);
    }

    #[test]
    fn perspective_maps_near_and_far_onto_unit_depth() {
        let p = perspective(1.0, PI / 2.0, 0.1, 100.0);

        let near = project(&p, glm::vec4(0.0, 0.0, -0.1, 1.0));
        let far = project(&p, glm::vec4(0.0, 0.0, -100.0, 1.0));

        assert!(near.z.abs() < EPSILON);
        assert!((far.z - 1.0).abs() < 1e-4);
    }

    #[test]
    fn cube_front_face_is_visible_and_centered() {
        let mvp = Camera::default().uniforms(4.0 / 3.0).mvp;

        // The +z face sits 6 units in front of the camera.
        let center = project(&mvp, glm::vec4(0.0, 0.0, 1.0, 1.0));
        assert!(center.x.abs() < EPSILON && center.y.abs() < EPSILON);
        assert!(center.z > 0.0 && center.z < 1.0);

        // Closer points get smaller depth values.
        let back = project(&mvp, glm::vec4(0.0, 0.0, -1.0, 1.0));
        assert!(center.z < back.z);
    }

    #[test]
    fn advance_accumulates_and_wraps() {
        let mut camera = Camera::default();

        camera.advance(0.5);
        camera.advance(0.25);
        assert!((camera.angle - 0.75).abs() < EPSILON);

        camera.advance(2.0 * PI);
        assert!((camera.angle - 0.75).abs() < 1e-4);
    }

    #[test]
    fn rotation_changes_the_transform() {
        let mut camera = Camera::default();
        let before = camera.uniforms(1.0);
        camera.advance(1.0);
        assert_ne!(before, camera.uniforms(1.0));
    }
}
