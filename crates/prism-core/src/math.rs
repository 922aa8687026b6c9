//! Math utilities and helpers.

use glam::{Mat3, Mat4};

/// Round `value` up to the next multiple of `alignment`.
///
/// `alignment` must be non-zero.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Normal transform for an object-to-world matrix.
///
/// The inverse transpose of the upper 3x3 block, widened back to 4x4 with a
/// zero translation column and `[3][3] = 1`.
#[inline]
pub fn normal_matrix(object_to_world: &Mat4) -> Mat4 {
    let upper = Mat3::from_mat4(*object_to_world);
    Mat4::from_mat3(upper.inverse().transpose())
}

/// First three rows of a transform in row-major order, as consumed by
/// acceleration-structure instance records.
#[inline]
pub fn to_row_major_3x4(matrix: &Mat4) -> [f32; 12] {
    let mut out = [0.0; 12];
    for row in 0..3 {
        out[row * 4..row * 4 + 4].copy_from_slice(&matrix.row(row).to_array());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::{Quat, Vec3, Vec4};

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(384, 256), 512);
        assert_eq!(align_up(65, 64), 128);
        assert_eq!(align_up(48, 32), 64);
    }

    #[test]
    fn normal_matrix_of_rigid_transform_is_rotation() {
        let rotation = Quat::from_rotation_y(0.7);
        let transform = Mat4::from_rotation_translation(rotation, Vec3::new(4.0, -2.0, 9.0));
        let normal = normal_matrix(&transform);
        let expected = Mat4::from_quat(rotation);

        for (a, b) in normal.to_cols_array().iter().zip(expected.to_cols_array()) {
            assert_relative_eq!(*a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn normal_matrix_clears_translation() {
        let transform = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 3.0, 4.0),
            Quat::IDENTITY,
            Vec3::new(1.0, 2.0, 3.0),
        );
        let normal = normal_matrix(&transform);

        assert_eq!(normal.w_axis, Vec4::W);
        assert_eq!(normal.row(3), Vec4::W);
        assert_relative_eq!(normal.x_axis.x, 0.5);
        assert_relative_eq!(normal.y_axis.y, 1.0 / 3.0);
        assert_relative_eq!(normal.z_axis.z, 0.25);
    }

    #[test]
    fn row_major_layout_keeps_translation_last() {
        let transform = Mat4::from_translation(Vec3::new(5.0, 6.0, 7.0));
        let rows = to_row_major_3x4(&transform);
        assert_eq!(
            rows,
            [1.0, 0.0, 0.0, 5.0, 0.0, 1.0, 0.0, 6.0, 0.0, 0.0, 1.0, 7.0]
        );
    }
}
