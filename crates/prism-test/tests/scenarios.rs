//! End-to-end frames on the headless device.

use prism_core::{Extent, MeshFlags};
use prism_gpu::headless::Descriptor;
use prism_gpu::Backend;
use prism_render::{InstanceDesc, OutputBuffers, ViewStage};
use prism_rt::HeapSlot;
use prism_test::{fixtures, HeadlessHarness};

#[test]
fn empty_scene_presents_a_cleared_frame() {
    let mut harness = HeadlessHarness::new(800, 600).unwrap();
    let scene = harness.scene().unwrap();
    harness.draw().unwrap();

    assert_eq!(
        harness.last_frame(),
        [
            "barrier swap-target-0 Present -> RenderTarget",
            "begin-pass swap-target-0 800x600 clear [0.0, 0.0, 0.0, 1.0]",
            "end-pass",
            "barrier swap-target-0 RenderTarget -> Present",
        ]
    );

    let view = harness.device().view(scene.view).unwrap();
    assert_eq!(view.stage(), ViewStage::Idle);
    assert!(view.snapshot().is_empty());
    assert!(view.heap().table().is_none());
    assert!(view.shader_binding_table().buffer().is_none());
    assert!(view.properties_buffer().is_none());
    assert_eq!(harness.backend().presents(), &[1]);
    harness.check_misuse().unwrap();
}

#[test]
fn single_ray_traced_instance() {
    let mut harness = HeadlessHarness::new(800, 600).unwrap();
    let scene = harness.scene().unwrap();
    let mesh = harness.triangle_mesh(MeshFlags::RAYTRACE).unwrap();
    let texture = harness
        .texture(&fixtures::solid(2, 2, [255, 0, 0, 255]))
        .unwrap();
    harness
        .device_mut()
        .create_instance(scene.scene, InstanceDesc::new(mesh, texture))
        .unwrap();
    harness.draw().unwrap();

    let view = harness.device().view(scene.view).unwrap();
    assert_eq!(view.stage(), ViewStage::Rendered);
    assert_eq!(view.snapshot().ray_traced.len(), 1);
    assert!(view.snapshot().background.is_empty());
    assert!(view.snapshot().foreground.is_empty());

    let instances = view.top_level().instances();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].custom_index(), 0);
    assert_eq!(instances[0].sbt_offset(), 0);
    let blas = harness.device().mesh(mesh).unwrap().bottom_level().unwrap();
    assert_eq!(
        instances[0].bottom_level_address,
        blas.address(harness.backend())
    );

    // One surface and one shadow record.
    let sections = view.shader_binding_table().sections();
    assert_eq!(sections.hit_groups.size / sections.hit_groups.stride, 2);

    let table = harness.backend().table(view.heap().table().unwrap()).unwrap();
    assert_eq!(table.capacity, 12);
    let texture_id = harness.device().texture(texture).unwrap().handle().unwrap();
    assert_eq!(
        table.slots.get(&HeapSlot::texture(0)),
        Some(&Descriptor::SampledTexture(texture_id))
    );
    assert!(table.slots.contains_key(&HeapSlot::TopLevel.index()));
    assert!(!table.slots.contains_key(&HeapSlot::Lights.index()));

    // The top level is built with the frame's setup work, ahead of the frame.
    let setup = harness.submission_lines(1);
    assert!(setup.contains(&"build-top top-level instances=1".to_string()));
    assert!(setup.contains(&"uav top-level".to_string()));

    assert!(harness
        .last_frame()
        .contains(&"dispatch-rays 800x600 hit-records=2".to_string()));
    harness.check_misuse().unwrap();
}

#[test]
fn resize_reallocates_outputs() {
    let mut harness = HeadlessHarness::new(800, 600).unwrap();
    let scene = harness.scene().unwrap();
    harness.draw().unwrap();

    harness.resize(1920, 1080);
    harness.draw().unwrap();

    let extent = Extent::new(1920, 1080);
    assert_eq!(harness.device().extent(), extent);
    approx::assert_relative_eq!(harness.device().aspect_ratio(), 1920.0 / 1080.0);

    let view = harness.device().view(scene.view).unwrap();
    assert_eq!(view.extent(), extent);

    let elements = 1920 * 1080 * 13;
    assert_eq!(OutputBuffers::<prism_gpu::headless::HeadlessBackend>::hit_elements(extent), elements);

    let backend = harness.backend();
    for (name, element_size) in [
        ("hit-distance", 4),
        ("hit-color", 8),
        ("hit-normal", 8),
        ("hit-instance-id", 2),
    ] {
        let buffers = backend.buffers_named(name);
        assert_eq!(buffers.len(), 1, "{name}");
        assert_eq!(buffers[0].size, elements * element_size, "{name}");
    }
    let (_, output) = backend.find_texture("ray-output").unwrap();
    assert_eq!((output.width, output.height), (1920, 1080));
    assert_eq!(backend.swap_extent(), extent);
    // Recreated swap targets start over at index 0.
    assert!(harness
        .last_frame()
        .contains(&"begin-pass swap-target-0 1920x1080 clear [0.0, 0.0, 0.0, 1.0]".to_string()));
    harness.check_misuse().unwrap();
}

#[test]
fn minimized_surface_keeps_the_last_size() {
    let mut harness = HeadlessHarness::new(320, 240).unwrap();
    let scene = harness.scene().unwrap();
    harness.resize(0, 0);
    harness.draw().unwrap();

    assert_eq!(harness.device().extent(), Extent::new(320, 240));
    let view = harness.device().view(scene.view).unwrap();
    assert!(view.outputs().is_complete());
}

#[test]
fn lights_are_bound_when_present() {
    let mut harness = HeadlessHarness::new(64, 64).unwrap();
    let scene = harness.scene().unwrap();
    let mesh = harness.quad_mesh(MeshFlags::RAYTRACE).unwrap();
    let texture = harness.texture(&fixtures::checkerboard(4, 1)).unwrap();
    harness
        .device_mut()
        .create_instance(scene.scene, InstanceDesc::new(mesh, texture))
        .unwrap();
    let lights = [
        fixtures::point_light([0.0, 2.0, 0.0], 10.0),
        fixtures::point_light([2.0, 2.0, 0.0], 5.0),
    ];
    harness
        .device_mut()
        .set_scene_lights(scene.scene, &lights)
        .unwrap();
    harness.draw().unwrap();

    let view = harness.device().view(scene.view).unwrap();
    let table = harness.backend().table(view.heap().table().unwrap()).unwrap();
    let (lights_buffer, _) = harness.backend().find_buffer("scene-lights").unwrap();
    assert_eq!(
        table.slots.get(&HeapSlot::Lights.index()),
        Some(&Descriptor::StructuredBuffer {
            buffer: lights_buffer,
            elements: 2,
            stride: 64,
        })
    );
}
