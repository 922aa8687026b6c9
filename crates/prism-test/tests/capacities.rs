//! Per-view resources whose size tracks instance or texture counts only grow.

use prism_core::MeshFlags;
use prism_render::{InstanceDesc, InstanceHandle};
use prism_test::{fixtures, HeadlessHarness, TestScene};

fn add_ray_traced(harness: &mut HeadlessHarness, scene: TestScene, count: usize) -> Vec<InstanceHandle> {
    let mesh = harness.triangle_mesh(MeshFlags::RAYTRACE).unwrap();
    (0..count)
        .map(|i| {
            let texture = harness
                .texture(&fixtures::solid(1, 1, [i as u8, 0, 0, 255]))
                .unwrap();
            harness
                .device_mut()
                .create_instance(scene.scene, InstanceDesc::new(mesh, texture))
                .unwrap()
        })
        .collect()
}

#[test]
fn shrinking_scenes_keep_their_capacities() {
    let mut harness = HeadlessHarness::new(32, 32).unwrap();
    let scene = harness.scene().unwrap();
    let instances = add_ray_traced(&mut harness, scene, 4);
    harness.draw().unwrap();

    let view = harness.device().view(scene.view).unwrap();
    let top_level = view.top_level().buffers().capacities();
    let sbt = view.shader_binding_table().capacity();
    let heap = view.heap().capacity();
    assert_eq!(heap, 15);
    assert_eq!(harness.backend().stats().tables_created, 1);

    for &instance in &instances[1..] {
        harness.device_mut().destroy_instance(instance).unwrap();
    }
    harness.draw().unwrap();

    let view = harness.device().view(scene.view).unwrap();
    assert_eq!(view.top_level().instances().len(), 1);
    assert_eq!(view.top_level().buffers().capacities(), top_level);
    assert_eq!(view.shader_binding_table().capacity(), sbt);
    assert_eq!(view.heap().capacity(), heap);
    assert_eq!(harness.backend().stats().tables_created, 1);
    assert_eq!(harness.backend().buffers_named("top-level-scratch").len(), 1);

    // The properties buffer follows the instance count.
    let properties = view.properties_buffer().unwrap();
    assert_eq!(harness.backend().buffer(properties).unwrap().size, 256);
    harness.check_misuse().unwrap();
}

#[test]
fn growing_scenes_reallocate_once() {
    let mut harness = HeadlessHarness::new(32, 32).unwrap();
    let scene = harness.scene().unwrap();
    add_ray_traced(&mut harness, scene, 1);
    harness.draw().unwrap();

    let view = harness.device().view(scene.view).unwrap();
    let (scratch, result, descriptors) = view.top_level().buffers().capacities();
    let sbt = view.shader_binding_table().capacity();

    add_ray_traced(&mut harness, scene, 8);
    harness.draw().unwrap();
    harness.draw().unwrap();

    let view = harness.device().view(scene.view).unwrap();
    let (grown_scratch, grown_result, grown_descriptors) = view.top_level().buffers().capacities();
    assert!(grown_scratch > scratch);
    assert!(grown_result > result);
    assert_eq!(grown_descriptors, 9 * 64);
    assert!(descriptors < grown_descriptors);
    assert!(view.shader_binding_table().capacity() > sbt);
    assert_eq!(view.heap().capacity(), 11 + 9);

    // One allocation for the first frame, one for the growth.
    let stats = harness.backend().stats();
    assert_eq!(stats.tables_created, 2);
    assert_eq!(harness.backend().buffers_named("shader-binding-table").len(), 1);
    assert_eq!(harness.backend().live_tables(), 1);
    harness.check_misuse().unwrap();
}

#[test]
fn light_buffer_is_reused_for_smaller_sets() {
    let mut harness = HeadlessHarness::new(8, 8).unwrap();
    let scene = harness.scene().unwrap();
    let lights: Vec<_> = (0..4)
        .map(|i| fixtures::point_light([i as f32, 1.0, 0.0], 4.0))
        .collect();

    let device = harness.device_mut();
    device.set_scene_lights(scene.scene, &lights).unwrap();
    device.set_scene_lights(scene.scene, &lights[..2]).unwrap();
    device.set_scene_lights(scene.scene, &lights).unwrap();

    let lights_buffers = harness.backend().buffers_named("scene-lights");
    assert_eq!(lights_buffers.len(), 1);
    assert_eq!(lights_buffers[0].size, 4 * 64);
    assert_eq!(
        harness.device().scene(scene.scene).unwrap().lights().len(),
        4
    );
}
