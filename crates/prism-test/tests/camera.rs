//! Camera buffers as views write them each frame.

use approx::assert_relative_eq;
use glam::{Mat4, Vec3};
use prism_render::{CameraUniforms, CAMERA_BUFFER_SIZE};
use prism_test::HeadlessHarness;

fn uniforms(harness: &HeadlessHarness, view: prism_render::ViewHandle) -> CameraUniforms {
    let buffer = harness.device().view(view).unwrap().camera_buffer().unwrap();
    let data = harness.buffer_data(buffer);
    assert_eq!(data.len() as u64, CAMERA_BUFFER_SIZE);
    bytemuck::pod_read_unaligned(&data[..std::mem::size_of::<CameraUniforms>()])
}

#[test]
fn default_camera_looks_at_the_origin() {
    let mut harness = HeadlessHarness::new(200, 100).unwrap();
    let scene = harness.scene().unwrap();
    harness.draw().unwrap();

    let camera = uniforms(&harness, scene.view);
    let view = Mat4::look_at_rh(Vec3::ONE, Vec3::ZERO, Vec3::Y);
    let projection = Mat4::perspective_rh(45.0_f32.to_radians(), 2.0, 0.1, 1000.0);

    assert_eq!(camera.view, view.to_cols_array_2d());
    assert_eq!(camera.projection, projection.to_cols_array_2d());
    assert_eq!(camera.previous_view_projection, Mat4::IDENTITY.to_cols_array_2d());

    let inverse = Mat4::from_cols_array_2d(&camera.inverse_view) * view;
    assert!(inverse.abs_diff_eq(Mat4::IDENTITY, 1e-5));
}

#[test]
fn previous_view_projection_trails_by_one_frame() {
    let mut harness = HeadlessHarness::new(64, 64).unwrap();
    let scene = harness.scene().unwrap();
    harness.draw().unwrap();
    let first = uniforms(&harness, scene.view);

    harness
        .device_mut()
        .set_view_perspective(
            scene.view,
            Vec3::new(0.0, 2.0, 5.0),
            Vec3::ZERO,
            Vec3::Y,
            60.0_f32.to_radians(),
            0.5,
            100.0,
        )
        .unwrap();
    harness.draw().unwrap();
    let second = uniforms(&harness, scene.view);

    assert_eq!(second.previous_view_projection, first.view_projection);
    assert_ne!(second.view_projection, first.view_projection);

    let state = harness.device().view(scene.view).unwrap().camera();
    assert_eq!(state.eye, Vec3::new(0.0, 2.0, 5.0));
    assert_relative_eq!(state.fov, 60.0_f32.to_radians());
}

#[test]
fn aspect_follows_the_surface() {
    let mut harness = HeadlessHarness::new(100, 100).unwrap();
    let scene = harness.scene().unwrap();
    harness.resize(300, 100);
    harness.draw().unwrap();

    let camera = uniforms(&harness, scene.view);
    let expected = Mat4::perspective_rh(45.0_f32.to_radians(), 3.0, 0.1, 1000.0);
    assert_eq!(camera.projection, expected.to_cols_array_2d());
}
