//! The recorded frame for a scene using every pass.

use prism_core::MeshFlags;
use prism_render::InstanceDesc;
use prism_test::{fixtures, HeadlessHarness};

#[test]
fn hybrid_frame_sequence() {
    let mut harness = HeadlessHarness::new(8, 6).unwrap();
    let scene = harness.scene().unwrap();
    let triangle = harness.triangle_mesh(MeshFlags::RAYTRACE).unwrap();
    let quad = harness.quad_mesh(MeshFlags::empty()).unwrap();
    let red = harness
        .texture(&fixtures::solid(1, 1, [255, 0, 0, 255]))
        .unwrap();
    let checker = harness.texture(&fixtures::checkerboard(4, 2)).unwrap();

    let device = harness.device_mut();
    device
        .create_instance(scene.scene, InstanceDesc::new(triangle, red))
        .unwrap();
    device
        .create_instance(
            scene.scene,
            InstanceDesc::new(quad, checker).with_material(fixtures::background_material()),
        )
        .unwrap();
    device
        .create_instance(scene.scene, InstanceDesc::new(quad, checker))
        .unwrap();
    harness.draw().unwrap();

    insta::assert_snapshot!("hybrid_frame", harness.last_frame().join("\n"));
    harness.check_misuse().unwrap();
}
