//! Command-list and fence bookkeeping across frames.

use prism_core::MeshFlags;
use prism_gpu::CommandListState;
use prism_render::InstanceDesc;
use prism_test::{fixtures, HeadlessHarness};

#[test]
fn each_frame_submits_setup_then_frame_work() {
    let mut harness = HeadlessHarness::new(16, 16).unwrap();
    harness.scene().unwrap();

    harness.draw().unwrap();
    // The first frame's setup list is empty but still executed.
    assert_eq!(harness.backend().submissions().len(), 2);
    assert_eq!(harness.device().frame().fence_value(), 3);

    harness.draw_with_vsync(0).unwrap();
    assert_eq!(harness.backend().submissions().len(), 4);
    assert_eq!(harness.device().frame().fence_value(), 5);
    assert_eq!(harness.backend().completed_fence_value(), 4);
    assert_eq!(harness.backend().presents(), &[1, 0]);

    // Left open for resource creation between frames.
    assert_eq!(harness.device().frame().state(), CommandListState::Open);
    assert!(harness.backend().is_recording());
}

#[test]
fn swap_targets_alternate() {
    let mut harness = HeadlessHarness::new(16, 16).unwrap();
    let mut targets = Vec::new();
    for _ in 0..3 {
        harness.draw().unwrap();
        targets.push(harness.last_frame()[0].clone());
    }
    assert_eq!(
        targets,
        [
            "barrier swap-target-0 Present -> RenderTarget",
            "barrier swap-target-1 Present -> RenderTarget",
            "barrier swap-target-0 Present -> RenderTarget",
        ]
    );
}

#[test]
fn uploads_and_builds_run_before_the_frame() {
    let mut harness = HeadlessHarness::new(16, 16).unwrap();
    let scene = harness.scene().unwrap();
    let mesh = harness.triangle_mesh(MeshFlags::RAYTRACE).unwrap();
    let first = harness.texture(&fixtures::solid(1, 1, [1, 2, 3, 4])).unwrap();
    let second = harness.texture(&fixtures::solid(2, 2, [5, 6, 7, 8])).unwrap();
    let device = harness.device_mut();
    device
        .create_instance(scene.scene, InstanceDesc::new(mesh, first))
        .unwrap();
    device
        .create_instance(scene.scene, InstanceDesc::new(mesh, second))
        .unwrap();
    harness.draw().unwrap();

    assert_eq!(
        harness.submission_lines(1),
        [
            "build-bottom mesh-0-blas triangles=1",
            "uav mesh-0-blas",
            "upload texture-0-upload -> texture-0",
            "barrier texture-0 CopyDest -> ShaderResource",
            "upload texture-1-upload -> texture-1",
            "barrier texture-1 CopyDest -> ShaderResource",
            "build-top top-level instances=2",
            "uav top-level",
        ]
    );
    harness.check_misuse().unwrap();
}

#[test]
fn destroying_a_mesh_flushes_recorded_work() {
    let mut harness = HeadlessHarness::new(16, 16).unwrap();
    let mesh = harness.triangle_mesh(MeshFlags::RAYTRACE).unwrap();
    assert!(harness.backend().submissions().is_empty());

    harness.device_mut().destroy_mesh(mesh).unwrap();
    assert_eq!(
        harness.submission_lines(0),
        ["build-bottom mesh-0-blas triangles=1", "uav mesh-0-blas"]
    );
    assert_eq!(harness.backend().live_structures(), 0);
    assert_eq!(harness.backend().live_buffers(), 0);
    assert!(harness.backend().is_recording());
    harness.check_misuse().unwrap();
}
