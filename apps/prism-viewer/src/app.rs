//! Viewer application: a hybrid demo scene and an orbiting camera.

use std::path::PathBuf;

use anyhow::Context as _;
use glam::{Mat4, Quat, Vec3};
use image::{ImageBuffer, Rgba, RgbaImage};
use prism_app::{AppContext, PrismApp, WindowEvent};
use prism_core::{Light, Material, MeshFlags};
use prism_gpu::shaders::load_hit_group;
use prism_gpu::HitGroupPair;
use prism_render::{InstanceDesc, InstanceHandle, SceneHandle, ShaderDesc, ShaderHandle, ViewHandle};
use tracing::{info, warn};
use winit::event::ElementState;
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::geometry;

/// Camera orbit speed in radians per second.
const ORBIT_SPEED: f32 = 0.35;

/// Camera orbit radius.
const ORBIT_RADIUS: f32 = 7.0;

/// Cube spin speed in radians per second.
const SPIN_SPEED: f32 = 0.8;

/// Viewer options (from CLI or defaults).
#[derive(Debug, Clone)]
pub struct ViewerParams {
    pub shader_dir: PathBuf,
    pub texture: Option<PathBuf>,
    pub vsync_interval: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for ViewerParams {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            texture: None,
            vsync_interval: 1,
            width: 1280,
            height: 720,
        }
    }
}

impl ViewerParams {
    /// Parse viewer options from command line arguments.
    pub fn from_args() -> Self {
        Self::parse(std::env::args().skip(1))
    }

    fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut params = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--shaders" => {
                    if let Some(dir) = args.next() {
                        params.shader_dir = PathBuf::from(dir);
                    }
                }
                "--texture" => {
                    params.texture = args.next().map(PathBuf::from);
                }
                "--vsync" => {
                    if let Some(v) = args.next().and_then(|v| v.parse().ok()) {
                        params.vsync_interval = v;
                    }
                }
                "--size" => {
                    if let Some((width, height)) = args.next().as_deref().and_then(parse_size) {
                        params.width = width;
                        params.height = height;
                    }
                }
                other => warn!("Ignoring unknown argument {other}"),
            }
        }

        params
    }
}

/// Parse `WIDTHxHEIGHT`.
fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (width, height) = value.split_once('x')?;
    let width = width.parse::<u32>().ok().filter(|&w| w > 0)?;
    let height = height.parse::<u32>().ok().filter(|&h| h > 0)?;
    Some((width, height))
}

fn checkerboard(size: u32, cell: u32) -> RgbaImage {
    ImageBuffer::from_fn(size, size, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            Rgba([200, 200, 205, 255])
        } else {
            Rgba([70, 70, 80, 255])
        }
    })
}

fn gradient(height: u32) -> RgbaImage {
    ImageBuffer::from_fn(1, height, |_, y| {
        let t = y as f32 / height.max(1) as f32;
        let mix = |top: f32, bottom: f32| (top + (bottom - top) * t) as u8;
        Rgba([mix(90.0, 200.0), mix(140.0, 220.0), mix(230.0, 255.0), 255])
    })
}

/// A spinning ray-traced cube.
struct Cube {
    handle: InstanceHandle,
    desc: InstanceDesc,
    position: Vec3,
    phase: f32,
}

/// Viewer application state.
pub struct Viewer {
    scene: SceneHandle,
    view: ViewHandle,
    cubes: Vec<Cube>,
    /// Material shader with its own hit groups, when the library has one.
    glossy: Option<ShaderHandle>,
    orbit_angle: f32,
    elapsed: f32,
    paused: bool,
}

impl Viewer {
    /// Hit groups named `glossy` in the shader directory, if present.
    fn load_glossy(ctx: &mut AppContext, params: &ViewerParams) -> Option<ShaderHandle> {
        let dir = params.shader_dir.as_path();
        let pair = load_hit_group(dir, "glossy").and_then(|surface| {
            Ok(HitGroupPair {
                surface,
                shadow: load_hit_group(dir, "shadow")?,
            })
        });
        match pair {
            Ok(hit_groups) => {
                info!("Loaded glossy hit groups");
                Some(
                    ctx.renderer
                        .create_shader(ShaderDesc::new("glossy").with_hit_groups(hit_groups)),
                )
            }
            Err(e) => {
                info!("No glossy hit groups ({e}); using the built-in pair");
                None
            }
        }
    }
}

impl PrismApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let params = ViewerParams::from_args();
        let renderer = &mut ctx.renderer;

        let floor_image = match &params.texture {
            Some(path) => image::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?
                .to_rgba8(),
            None => checkerboard(256, 32),
        };
        let floor_texture = renderer
            .create_texture(floor_image.width(), floor_image.height(), floor_image.as_raw())
            .context("Failed to create floor texture")?;
        let white = renderer
            .create_texture(1, 1, &[255; 4])
            .context("Failed to create white texture")?;
        let sky_image = gradient(64);
        let sky = renderer
            .create_texture(sky_image.width(), sky_image.height(), sky_image.as_raw())
            .context("Failed to create sky texture")?;

        let (vertices, indices) = geometry::cube();
        let cube_mesh = renderer
            .create_mesh(&vertices, &indices, MeshFlags::RAYTRACE)
            .context("Failed to create cube mesh")?;
        let marker_mesh = renderer
            .create_mesh(&vertices, &indices, MeshFlags::empty())
            .context("Failed to create marker mesh")?;
        let (vertices, indices) = geometry::plane(6.0, 6.0);
        let floor_mesh = renderer
            .create_mesh(&vertices, &indices, MeshFlags::RAYTRACE)
            .context("Failed to create floor mesh")?;
        let backdrop_mesh = renderer
            .create_mesh(&vertices, &indices, MeshFlags::empty())
            .context("Failed to create backdrop mesh")?;

        let glossy = Self::load_glossy(ctx, &params);
        let renderer = &mut ctx.renderer;

        let scene = renderer.create_scene();
        let view = renderer
            .create_view(scene)
            .context("Failed to create view")?;

        renderer.set_scene_lights(
            scene,
            &[
                Light {
                    position: [4.0, 6.0, 3.0],
                    attenuation_radius: 30.0,
                    diffuse_color: [1.0, 0.95, 0.85],
                    point_radius: 0.5,
                    ..Light::default()
                },
                Light {
                    position: [-5.0, 3.0, -4.0],
                    attenuation_radius: 20.0,
                    diffuse_color: [0.4, 0.5, 0.9],
                    point_radius: 1.0,
                    specular_intensity: 0.5,
                    ..Light::default()
                },
            ],
        );

        renderer
            .create_instance(scene, InstanceDesc::new(floor_mesh, floor_texture))
            .context("Failed to create floor")?;

        // Sky backdrop, drawn behind everything ray traced.
        renderer
            .create_instance(
                scene,
                InstanceDesc::new(backdrop_mesh, sky)
                    .with_transform(
                        Mat4::from_translation(Vec3::new(0.0, 0.0, -30.0))
                            * Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2)
                            * Mat4::from_scale(Vec3::splat(8.0)),
                    )
                    .with_material(Material {
                        background: 1,
                        ..Material::default()
                    }),
            )
            .context("Failed to create backdrop")?;

        // Small marker over the origin, drawn on top.
        renderer
            .create_instance(
                scene,
                InstanceDesc::new(marker_mesh, white)
                    .with_transform(
                        Mat4::from_translation(Vec3::new(0.0, 3.0, 0.0))
                            * Mat4::from_scale(Vec3::splat(0.15)),
                    )
                    .with_material(Material {
                        self_light: [1.0, 0.8, 0.2],
                        diffuse_color_mix: [1.0, 0.8, 0.2, 1.0],
                        ..Material::default()
                    }),
            )
            .context("Failed to create marker")?;

        let mut cubes = Vec::new();
        for (i, position) in [
            Vec3::new(-2.0, 0.5, 0.0),
            Vec3::new(0.0, 0.5, 1.5),
            Vec3::new(2.0, 0.5, -0.5),
        ]
        .into_iter()
        .enumerate()
        {
            let mut desc = InstanceDesc::new(cube_mesh, white)
                .with_transform(Mat4::from_translation(position))
                .with_material(Material {
                    diffuse_color_mix: [0.2 + 0.3 * i as f32, 0.4, 0.8 - 0.3 * i as f32, 1.0],
                    reflection_factor: 0.25 * i as f32,
                    specular_exponent: 32.0,
                    ..Material::default()
                });
            if let (Some(shader), 1) = (glossy, i) {
                desc = desc.with_shader(shader);
            }
            let handle = renderer
                .create_instance(scene, desc)
                .context("Failed to create cube")?;
            cubes.push(Cube {
                handle,
                desc,
                position,
                phase: i as f32,
            });
        }

        info!("Demo scene ready: {} cubes, 2 lights", cubes.len());

        Ok(Self {
            scene,
            view,
            cubes,
            glossy,
            orbit_angle: 0.0,
            elapsed: 0.0,
            paused: false,
        })
    }

    fn update(&mut self, ctx: &mut AppContext, dt: f32) {
        if self.paused {
            return;
        }
        self.elapsed += dt;
        self.orbit_angle = (self.orbit_angle + ORBIT_SPEED * dt) % std::f32::consts::TAU;

        let eye = Vec3::new(
            ORBIT_RADIUS * self.orbit_angle.cos(),
            3.0,
            ORBIT_RADIUS * self.orbit_angle.sin(),
        );
        ctx.renderer.set_view_perspective(
            self.view,
            eye,
            Vec3::new(0.0, 0.5, 0.0),
            Vec3::Y,
            50.0_f32.to_radians(),
            0.1,
            200.0,
        );

        for cube in &self.cubes {
            let rotation = Quat::from_rotation_y(self.elapsed * SPIN_SPEED + cube.phase);
            let desc = cube
                .desc
                .with_transform(Mat4::from_rotation_translation(rotation, cube.position));
            ctx.renderer.set_instance(cube.handle, desc);
        }
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        if let WindowEvent::KeyboardInput { event, .. } = event {
            if event.state == ElementState::Pressed
                && !event.repeat
                && event.physical_key == PhysicalKey::Code(KeyCode::Space)
            {
                self.paused = !self.paused;
                info!("Orbit {}", if self.paused { "paused" } else { "resumed" });
                return true;
            }
        }
        false
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        ctx.renderer.destroy_scene(self.scene);
        if let Some(shader) = self.glossy.take() {
            ctx.renderer.destroy_shader(shader);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parse_all_options() {
        let params = ViewerParams::parse(args(&[
            "--shaders",
            "build/spirv",
            "--texture",
            "floor.png",
            "--vsync",
            "0",
            "--size",
            "800x600",
        ]));
        assert_eq!(params.shader_dir, PathBuf::from("build/spirv"));
        assert_eq!(params.texture, Some(PathBuf::from("floor.png")));
        assert_eq!(params.vsync_interval, 0);
        assert_eq!((params.width, params.height), (800, 600));
    }

    #[test]
    fn malformed_values_keep_defaults() {
        let params = ViewerParams::parse(args(&["--vsync", "fast", "--size", "0x10"]));
        assert_eq!(params.vsync_interval, 1);
        assert_eq!((params.width, params.height), (1280, 720));
    }

    #[test]
    fn size_parsing() {
        assert_eq!(parse_size("1920x1080"), Some((1920, 1080)));
        assert_eq!(parse_size("1920"), None);
        assert_eq!(parse_size("x1080"), None);
    }
}
