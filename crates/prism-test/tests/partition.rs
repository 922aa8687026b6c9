//! Snapshot partitioning, texture resolution and per-instance records.

use glam::{Mat4, Vec3};
use prism_core::{Material, MeshFlags};
use prism_gpu::{Backend, HitGroupCode, HitGroupPair};
use prism_render::{InstanceDesc, InstanceProperties, ShaderDesc, ViewStage};
use prism_test::{fixtures, HeadlessHarness};

fn read_properties(data: &[u8], index: usize) -> InstanceProperties {
    let size = InstanceProperties::SIZE as usize;
    bytemuck::pod_read_unaligned(&data[index * size..(index + 1) * size])
}

#[test]
fn instances_split_into_three_buckets() {
    let mut harness = HeadlessHarness::new(64, 48).unwrap();
    let scene = harness.scene().unwrap();
    let triangle = harness.triangle_mesh(MeshFlags::RAYTRACE).unwrap();
    let quad = harness.quad_mesh(MeshFlags::empty()).unwrap();
    let checker = harness.texture(&fixtures::checkerboard(8, 2)).unwrap();
    let red = harness
        .texture(&fixtures::solid(1, 1, [255, 0, 0, 255]))
        .unwrap();

    let translation = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
    let device = harness.device_mut();
    device
        .create_instance(
            scene.scene,
            InstanceDesc::new(triangle, red).with_transform(translation),
        )
        .unwrap();
    device
        .create_instance(scene.scene, InstanceDesc::new(quad, checker))
        .unwrap();
    device
        .create_instance(
            scene.scene,
            InstanceDesc::new(quad, red).with_material(fixtures::background_material()),
        )
        .unwrap();
    device
        .create_instance(
            scene.scene,
            InstanceDesc::new(triangle, checker).with_normal_texture(red),
        )
        .unwrap();
    harness.draw().unwrap();

    let view = harness.device().view(scene.view).unwrap();
    let snapshot = view.snapshot();
    assert_eq!(snapshot.ray_traced.len(), 2);
    assert_eq!(snapshot.background.len(), 1);
    assert_eq!(snapshot.foreground.len(), 1);

    // Textures in order of first use.
    let red_id = harness.device().texture(red).unwrap().handle().unwrap();
    let checker_id = harness.device().texture(checker).unwrap().handle().unwrap();
    assert_eq!(snapshot.textures, [red_id, checker_id]);

    let top_level = view.top_level().instances();
    assert_eq!(top_level.len(), 2);
    assert_eq!(
        top_level.iter().map(|i| (i.custom_index(), i.sbt_offset())).collect::<Vec<_>>(),
        [(0, 0), (1, 2)]
    );

    let properties = harness.buffer_data(view.properties_buffer().unwrap());
    assert_eq!(properties.len(), 1024);
    let indices: Vec<_> = (0..4)
        .map(|i| {
            let material = read_properties(properties, i).material;
            (material.diffuse_texture_index, material.normal_texture_index)
        })
        .collect();
    assert_eq!(indices, [(0, -1), (1, 0), (0, -1), (1, -1)]);

    let first = read_properties(properties, 0);
    assert_eq!(first.object_to_world, translation.to_cols_array_2d());
    let background = read_properties(properties, 2);
    assert_eq!(background.object_to_world, [[0.0; 4]; 4]);
    assert_eq!(background.material.background, 1);

    let frame = harness.last_frame();
    assert!(frame.contains(&"draw mesh-1-vertices indices=6 instance=2".to_string()));
    assert!(frame.contains(&"draw mesh-1-vertices indices=6 instance=3".to_string()));
    assert!(frame.contains(&"dispatch-rays 64x48 hit-records=4".to_string()));
    harness.check_misuse().unwrap();
}

#[test]
fn rasterized_scene_skips_the_dispatch() {
    let mut harness = HeadlessHarness::new(32, 32).unwrap();
    let scene = harness.scene().unwrap();
    let quad = harness.quad_mesh(MeshFlags::empty()).unwrap();
    let texture = harness.texture(&fixtures::checkerboard(4, 1)).unwrap();
    harness
        .device_mut()
        .create_instance(scene.scene, InstanceDesc::new(quad, texture))
        .unwrap();
    harness.draw().unwrap();

    let view = harness.device().view(scene.view).unwrap();
    assert!(view.top_level().handle().is_none());
    let frame = harness.last_frame();
    assert!(frame.contains(&"draw mesh-0-vertices indices=6 instance=0".to_string()));
    assert!(!frame.iter().any(|line| line.starts_with("dispatch-rays")));
    assert!(frame.contains(&"copy ray-output -> swap-target-0".to_string()));
}

#[test]
fn too_many_textures_leave_the_view_idle() {
    let mut harness = HeadlessHarness::new(16, 16).unwrap();
    let scene = harness.scene().unwrap();
    let mesh = harness.quad_mesh(MeshFlags::empty()).unwrap();
    for _ in 0..1025 {
        let texture = harness
            .texture(&fixtures::solid(1, 1, [0, 0, 255, 255]))
            .unwrap();
        harness
            .device_mut()
            .create_instance(scene.scene, InstanceDesc::new(mesh, texture))
            .unwrap();
    }

    // The failure is logged; the frame still presents.
    harness.draw().unwrap();
    let view = harness.device().view(scene.view).unwrap();
    assert_eq!(view.stage(), ViewStage::Idle);
    assert!(view.snapshot().is_empty());
    assert_eq!(harness.backend().presents(), &[1]);
    assert!(!harness
        .last_frame()
        .iter()
        .any(|line| line.starts_with("draw ")));
}

#[test]
fn shader_hit_groups_select_binding_table_records() {
    let mut harness = HeadlessHarness::new(16, 16).unwrap();
    let scene = harness.scene().unwrap();
    let mesh = harness.triangle_mesh(MeshFlags::RAYTRACE).unwrap();
    let texture = harness.texture(&fixtures::solid(1, 1, [0; 4])).unwrap();
    let glossy = harness.device_mut().create_shader(
        ShaderDesc::new("glossy").with_hit_groups(HitGroupPair {
            surface: HitGroupCode {
                closest_hit: vec![0x0723_0203],
                any_hit: None,
            },
            shadow: HitGroupCode::default(),
        }),
    );
    harness
        .device_mut()
        .create_instance(
            scene.scene,
            InstanceDesc::new(mesh, texture)
                .with_shader(glossy)
                .with_material(Material {
                    reflection_factor: 0.5,
                    ..Material::default()
                }),
        )
        .unwrap();
    harness.draw().unwrap();

    let device = harness.device();
    assert_eq!(device.shader(glossy).unwrap().hit_group_index(), 1);
    let (surface, shadow) = &device.pipeline().hit_groups[1];

    let view = device.view(scene.view).unwrap();
    let sections = view.shader_binding_table().sections();
    let table = harness.buffer_data(view.shader_binding_table().buffer().unwrap());
    let record = |i: u64| {
        let start = (sections.hit_groups.offset + i * sections.hit_groups.stride) as usize;
        &table[start..start + sections.hit_groups.stride as usize]
    };

    let mesh = device.mesh(mesh).unwrap();
    let backend = harness.backend();
    let vertex_address = backend.buffer_address(mesh.vertex_buffer().unwrap());
    let index_address = backend.buffer_address(mesh.index_buffer().unwrap());
    for (i, identifier) in [surface, shadow].into_iter().enumerate() {
        let bytes = record(i as u64);
        let handle = identifier.as_bytes().len();
        assert_eq!(&bytes[..handle], identifier.as_bytes());
        assert_eq!(&bytes[handle..handle + 8], &vertex_address.to_le_bytes());
        assert_eq!(&bytes[handle + 8..handle + 16], &index_address.to_le_bytes());
    }
}
