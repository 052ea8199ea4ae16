use approx::{AbsDiffEq, RelativeEq};
use glam::{Mat4, Vec3};

const NEAR_FRACTION: f32 = 0.01;
const MAX_PITCH: f32 = 1.5;

/// An orbit camera around a target point. Z is up, matching the field's
/// gravity axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub target: Vec3,
    pub distance: f32,
    pub yaw: f32,
    pub pitch: f32,
    /// Vertical field of view in degrees.
    pub field_of_view: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 10.0,
            yaw: -0.6,
            pitch: 0.5,
            field_of_view: 45.0,
        }
    }
}

impl Camera {
    /// Frame an axis-aligned box so it fills the view.
    pub fn fit(min: Vec3, max: Vec3, field_of_view: f32) -> Self {
        let radius = 0.5 * (max - min).length();
        let half_fov = 0.5 * field_of_view.to_radians();

        Self {
            target: 0.5 * (min + max),
            distance: (radius / half_fov.sin()).max(1e-3),
            field_of_view,
            ..Default::default()
        }
    }

    pub fn orbit(&mut self, d_yaw: f32, d_pitch: f32) {
        self.yaw += d_yaw;
        self.pitch = (self.pitch + d_pitch).clamp(-MAX_PITCH, MAX_PITCH);
    }

    pub fn zoom(&mut self, factor: f32) {
        self.distance = (self.distance * factor).max(1e-3);
    }

    pub fn eye(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.target + self.distance * Vec3::new(cos_pitch * cos_yaw, cos_pitch * sin_yaw, sin_pitch)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Z)
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        let near = self.distance * NEAR_FRACTION;
        let far = self.distance * 10.0;
        Mat4::perspective_rh(self.field_of_view.to_radians(), aspect.max(1e-3), near, far)
    }

    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        self.projection(aspect) * self.view()
    }

    /// World-space right and up vectors of the image plane, for billboards.
    pub fn billboard_axes(&self) -> (Vec3, Vec3) {
        let view = self.view();
        let right = Vec3::new(view.x_axis.x, view.y_axis.x, view.z_axis.x);
        let up = Vec3::new(view.x_axis.y, view.y_axis.y, view.z_axis.y);
        (right, up)
    }
}

impl AbsDiffEq for Camera {
    type Epsilon = f32;

    fn default_epsilon() -> Self::Epsilon {
        f32::EPSILON
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.target.abs_diff_eq(other.target, epsilon)
            && self.distance.abs_diff_eq(&other.distance, epsilon)
            && self.yaw.abs_diff_eq(&other.yaw, epsilon)
            && self.pitch.abs_diff_eq(&other.pitch, epsilon)
            && self.field_of_view.abs_diff_eq(&other.field_of_view, epsilon)
    }
}

impl RelativeEq for Camera {
    fn default_max_relative() -> Self::Epsilon {
        f32::EPSILON
    }

    fn relative_eq(
        &self,
        other: &Self,
        epsilon: Self::Epsilon,
        max_relative: Self::Epsilon,
    ) -> bool {
        self.target
            .to_array()
            .relative_eq(&other.target.to_array(), epsilon, max_relative)
            && self.distance.relative_eq(&other.distance, epsilon, max_relative)
            && self.yaw.relative_eq(&other.yaw, epsilon, max_relative)
            && self.pitch.relative_eq(&other.pitch, epsilon, max_relative)
            && self
                .field_of_view
                .relative_eq(&other.field_of_view, epsilon, max_relative)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fit_centers_on_the_box() {
        let camera = Camera::fit(Vec3::new(-2.0, -2.0, -1.0), Vec3::new(2.0, 2.0, 1.0), 60.0);
        assert_relative_eq!(
            camera,
            Camera {
                target: Vec3::ZERO,
                distance: 6.0,
                field_of_view: 60.0,
                ..Default::default()
            },
            epsilon = 1e-5,
        );
    }

    #[test]
    fn target_projects_to_the_center() {
        let camera = Camera::fit(Vec3::ZERO, Vec3::new(10.0, 4.0, 2.0), 45.0);
        let clip = camera.view_proj(16.0 / 9.0) * camera.target.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert_relative_eq!(ndc.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(ndc.y, 0.0, epsilon = 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn billboard_axes_face_the_eye() {
        let camera = Camera::default();
        let (right, up) = camera.billboard_axes();
        let forward = (camera.target - camera.eye()).normalize();
        assert_relative_eq!(right.dot(forward), 0.0, epsilon = 1e-5);
        assert_relative_eq!(up.dot(forward), 0.0, epsilon = 1e-5);
        assert_relative_eq!(right.length(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = Camera::default();
        camera.orbit(0.0, 10.0);
        assert_eq!(camera.pitch, MAX_PITCH);
    }
}
