use crate::contour::ContourSet;
use crate::device::{ComputeDevice, GeometrySlot};
use crate::field::{FieldVertex, RiskLevel};
use crate::render::camera::Camera;
use crate::render::particles::Particle;
use crate::render::shaders;
use crate::render::streamlines::{self, StreamlinePoint};
use crate::settings::{ArrowSettings, RiskThresholds, VisualizationConfig};
use crate::Result;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneUniforms {
    pub view_proj: [[f32; 4]; 4], // 0
    pub camera_right: [f32; 3],   // 64
    pub time: f32,                // 76
    pub camera_up: [f32; 3],      // 80
    pub point_scale: f32,         // 92
    pub fade_rate: f32,           // 96
    pub max_velocity: f32,        // 100
    pub arrow_scale: f32,         // 104
    pub _padding: f32,            // 108
}

impl SceneUniforms {
    pub fn new(config: &VisualizationConfig) -> Self {
        Self {
            point_scale: config.view.point_scale,
            fade_rate: config.particles.fade_rate,
            max_velocity: config.particles.max_velocity,
            arrow_scale: config.arrows.scale,
            ..Default::default()
        }
    }

    pub fn tick(&mut self, camera: &Camera, aspect: f32, time: f32) -> &Self {
        let (right, up) = camera.billboard_axes();
        self.view_proj = camera.view_proj(aspect).to_cols_array_2d();
        self.camera_right = right.to_array();
        self.camera_up = up.to_array();
        self.time = time;
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Layer {
    Particles,
    Streamlines,
    Contours,
    Arrows,
}

impl Layer {
    pub const ALL: [Layer; 4] = [
        Layer::Particles,
        Layer::Streamlines,
        Layer::Contours,
        Layer::Arrows,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LineVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ArrowInstance {
    pub origin: [f32; 3],    // 0
    pub length: f32,         // 12
    pub direction: [f32; 3], // 16
    pub color: [f32; 3],     // 28
}

// Shaft plus two barbs, as a line list along +X.
#[rustfmt::skip]
pub static ARROW_TEMPLATE: [[f32; 3]; 6] = [
    [0.0,  0.0, 0.0], [1.0,  0.0, 0.0],
    [1.0,  0.0, 0.0], [0.75, 0.1, 0.0],
    [1.0,  0.0, 0.0], [0.75, -0.1, 0.0],
];

#[rustfmt::skip]
pub static PARTICLE_QUAD: [f32; 12] = [
    -1.0, -1.0,
    -1.0,  1.0,
     1.0, -1.0,
     1.0, -1.0,
    -1.0,  1.0,
     1.0,  1.0,
];

const SLOW: [f32; 3] = [0.10, 0.45, 1.00];
const FAST: [f32; 3] = [1.00, 0.35, 0.10];

pub fn ramp_color(t: f32) -> [f32; 3] {
    let t = t.clamp(0.0, 1.0);
    [0, 1, 2].map(|i| SLOW[i] * (1.0 - t) + FAST[i] * t)
}

/// Line-list vertices for every contour segment, colored by where the level
/// sits among all levels.
pub fn contour_vertices(contours: &ContourSet) -> Vec<LineVertex> {
    let (low, high) = match (contours.levels.first(), contours.levels.last()) {
        (Some(&low), Some(&high)) => (low, high),
        _ => return Vec::new(),
    };
    let span = high - low;

    contours
        .segments
        .iter()
        .flat_map(|segment| {
            let t = if span > 0.0 {
                (segment.level - low) / span
            } else {
                0.5
            };
            let color = ramp_color(t);
            [
                LineVertex {
                    position: segment.start.to_array(),
                    color,
                },
                LineVertex {
                    position: segment.end.to_array(),
                    color,
                },
            ]
        })
        .collect()
}

/// One arrow per `stride`-th field vertex. Stagnant vertices have no
/// direction and are left out.
pub fn arrow_instances(
    vertices: &[FieldVertex],
    settings: &ArrowSettings,
    max_speed: f32,
    thresholds: &RiskThresholds,
) -> Vec<ArrowInstance> {
    if max_speed <= 0.0 {
        return Vec::new();
    }

    vertices
        .iter()
        .step_by(settings.stride.max(1) as usize)
        .filter(|vertex| vertex.speed() > 0.0)
        .map(|vertex| ArrowInstance {
            origin: vertex.position,
            length: vertex.speed() / max_speed,
            direction: vertex.velocity().normalize().to_array(),
            color: RiskLevel::classify(vertex.gradient, thresholds).color(),
        })
        .collect()
}

/// Render pipelines for every layer and the per-frame scene uniforms.
/// Geometry lives in the device's geometry slots.
pub struct Context {
    width: u32,
    height: u32,
    visible: [bool; 4],

    scene_uniforms: SceneUniforms,
    particle_count: u32,
    streamline_index_count: u32,
    contour_vertex_count: u32,
    arrow_instance_count: u32,

    scene_bind_group: wgpu::BindGroup,

    draw_particles_pipeline: wgpu::RenderPipeline,
    draw_streamlines_pipeline: wgpu::RenderPipeline,
    draw_lines_pipeline: wgpu::RenderPipeline,
    draw_arrows_pipeline: wgpu::RenderPipeline,
}

impl Context {
    pub fn new(
        compute: &mut ComputeDevice,
        swapchain_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        config: &VisualizationConfig,
    ) -> Result<Self> {
        let scene_uniforms = SceneUniforms::new(config);
        compute.allocate_geometry(
            GeometrySlot::SceneUniforms,
            bytemuck::bytes_of(&scene_uniforms),
            wgpu::BufferUsages::UNIFORM,
        )?;
        compute.allocate_geometry(
            GeometrySlot::ParticleQuad,
            bytemuck::cast_slice(&PARTICLE_QUAD),
            wgpu::BufferUsages::VERTEX,
        )?;
        compute.allocate_geometry(
            GeometrySlot::ArrowTemplate,
            bytemuck::cast_slice(&ARROW_TEMPLATE),
            wgpu::BufferUsages::VERTEX,
        )?;
        compute.allocate_geometry(GeometrySlot::ArrowInstances, &[], wgpu::BufferUsages::VERTEX)?;
        compute.allocate_geometry(GeometrySlot::ContourVertices, &[], wgpu::BufferUsages::VERTEX)?;
        compute.allocate_geometry(GeometrySlot::StreamlineIndices, &[], wgpu::BufferUsages::INDEX)?;

        let compute: &ComputeDevice = compute;
        let device = &compute.device;

        let scene_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("bind_group_layout:scene"),
                entries: &[
                    // scene
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let scene_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("bind_group:scene"),
            layout: &scene_bind_group_layout,
            entries: &[
                // scene
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: compute.geometry(GeometrySlot::SceneUniforms)?,
                        offset: 0,
                        size: None,
                    }),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pipeline_layout:scene"),
            bind_group_layouts: &[&scene_bind_group_layout],
            immediate_size: 0,
        });

        let particle_attributes = [
            // particle_position
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x3,
                offset: 0,
                shader_location: 0,
            },
            // age
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32,
                offset: 12,
                shader_location: 1,
            },
            // life
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32,
                offset: 28,
                shader_location: 2,
            },
            // color
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x3,
                offset: 32,
                shader_location: 3,
            },
            // size
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32,
                offset: 44,
                shader_location: 4,
            },
        ];

        let particle_layouts = [
            wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<Particle>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &particle_attributes,
            },
            wgpu::VertexBufferLayout {
                array_stride: 2 * std::mem::size_of::<f32>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &wgpu::vertex_attr_array![5 => Float32x2],
            },
        ];

        let streamline_layouts = [wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<StreamlinePoint>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32],
        }];

        let line_layouts = [wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<LineVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3],
        }];

        let arrow_layouts = [
            wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<ArrowInstance>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &wgpu::vertex_attr_array![
                    0 => Float32x3, 1 => Float32, 2 => Float32x3, 3 => Float32x3],
            },
            wgpu::VertexBufferLayout {
                array_stride: 3 * std::mem::size_of::<f32>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &wgpu::vertex_attr_array![4 => Float32x3],
            },
        ];

        let stage = |label: &str, source: &str, buffers: &[wgpu::VertexBufferLayout], topology| {
            create_render_pipeline(
                compute,
                &pipeline_layout,
                swapchain_format,
                label,
                source,
                buffers,
                topology,
            )
        };

        let draw_particles_pipeline = stage(
            "draw_particles",
            shaders::DRAW_PARTICLES,
            &particle_layouts,
            wgpu::PrimitiveTopology::TriangleList,
        )?;
        let draw_streamlines_pipeline = stage(
            "draw_streamlines",
            shaders::DRAW_STREAMLINES,
            &streamline_layouts,
            wgpu::PrimitiveTopology::LineList,
        )?;
        let draw_lines_pipeline = stage(
            "draw_lines",
            shaders::DRAW_LINES,
            &line_layouts,
            wgpu::PrimitiveTopology::LineList,
        )?;
        let draw_arrows_pipeline = stage(
            "draw_arrows",
            shaders::DRAW_ARROWS,
            &arrow_layouts,
            wgpu::PrimitiveTopology::LineList,
        )?;

        Ok(Self {
            width,
            height,
            visible: [true; 4],

            scene_uniforms,
            particle_count: 0,
            streamline_index_count: 0,
            contour_vertex_count: 0,
            arrow_instance_count: 0,

            scene_bind_group,

            draw_particles_pipeline,
            draw_streamlines_pipeline,
            draw_lines_pipeline,
            draw_arrows_pipeline,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn set_visible(&mut self, layer: Layer, visible: bool) {
        self.visible[layer.index()] = visible;
    }

    pub fn is_visible(&self, layer: Layer) -> bool {
        self.visible[layer.index()]
    }

    pub fn set_particle_count(&mut self, particle_count: u32) {
        self.particle_count = particle_count;
    }

    pub fn update_config(&mut self, config: &VisualizationConfig) {
        let time = self.scene_uniforms.time;
        self.scene_uniforms = SceneUniforms {
            view_proj: self.scene_uniforms.view_proj,
            camera_right: self.scene_uniforms.camera_right,
            camera_up: self.scene_uniforms.camera_up,
            time,
            ..SceneUniforms::new(config)
        };
    }

    pub fn upload_streamline_indices(
        &mut self,
        compute: &mut ComputeDevice,
        line_count: u32,
        points_per_line: u32,
    ) -> Result<()> {
        let indices = streamlines::segment_indices(line_count, points_per_line);
        compute.allocate_geometry(
            GeometrySlot::StreamlineIndices,
            bytemuck::cast_slice(&indices),
            wgpu::BufferUsages::INDEX,
        )?;
        self.streamline_index_count = indices.len() as u32;
        Ok(())
    }

    pub fn upload_contours(&mut self, compute: &mut ComputeDevice, contours: &ContourSet) -> Result<()> {
        let vertices = contour_vertices(contours);
        compute.allocate_geometry(
            GeometrySlot::ContourVertices,
            bytemuck::cast_slice(&vertices),
            wgpu::BufferUsages::VERTEX,
        )?;
        self.contour_vertex_count = vertices.len() as u32;
        log::debug!("Uploaded {} contour segments", contours.segments.len());
        Ok(())
    }

    pub fn upload_arrows(&mut self, compute: &mut ComputeDevice, instances: &[ArrowInstance]) -> Result<()> {
        compute.allocate_geometry(
            GeometrySlot::ArrowInstances,
            bytemuck::cast_slice(instances),
            wgpu::BufferUsages::VERTEX,
        )?;
        self.arrow_instance_count = instances.len() as u32;
        log::debug!("Uploaded {} velocity arrows", instances.len());
        Ok(())
    }

    pub fn sync(&mut self, compute: &ComputeDevice, camera: &Camera, time: f32) -> Result<()> {
        let aspect = self.aspect();
        let uniforms = *self.scene_uniforms.tick(camera, aspect, time);
        compute.write_geometry(GeometrySlot::SceneUniforms, bytemuck::bytes_of(&uniforms))
    }

    pub fn draw(
        &self,
        rpass: &mut wgpu::RenderPass<'_>,
        compute: &ComputeDevice,
        particles: &wgpu::Buffer,
        streamlines: &wgpu::Buffer,
    ) -> Result<()> {
        rpass.set_bind_group(0, &self.scene_bind_group, &[]);

        if self.is_visible(Layer::Contours) && self.contour_vertex_count > 0 {
            rpass.set_pipeline(&self.draw_lines_pipeline);
            rpass.set_vertex_buffer(0, compute.geometry(GeometrySlot::ContourVertices)?.slice(..));
            rpass.draw(0..self.contour_vertex_count, 0..1);
        }

        if self.is_visible(Layer::Streamlines) && self.streamline_index_count > 0 {
            rpass.set_pipeline(&self.draw_streamlines_pipeline);
            rpass.set_vertex_buffer(0, streamlines.slice(..));
            rpass.set_index_buffer(
                compute.geometry(GeometrySlot::StreamlineIndices)?.slice(..),
                wgpu::IndexFormat::Uint32,
            );
            rpass.draw_indexed(0..self.streamline_index_count, 0, 0..1);
        }

        if self.is_visible(Layer::Arrows) && self.arrow_instance_count > 0 {
            rpass.set_pipeline(&self.draw_arrows_pipeline);
            rpass.set_vertex_buffer(0, compute.geometry(GeometrySlot::ArrowInstances)?.slice(..));
            rpass.set_vertex_buffer(1, compute.geometry(GeometrySlot::ArrowTemplate)?.slice(..));
            rpass.draw(0..ARROW_TEMPLATE.len() as u32, 0..self.arrow_instance_count);
        }

        if self.is_visible(Layer::Particles) && self.particle_count > 0 {
            rpass.set_pipeline(&self.draw_particles_pipeline);
            rpass.set_vertex_buffer(0, particles.slice(..));
            rpass.set_vertex_buffer(1, compute.geometry(GeometrySlot::ParticleQuad)?.slice(..));
            rpass.draw(0..6, 0..self.particle_count);
        }

        Ok(())
    }
}

fn create_render_pipeline(
    compute: &ComputeDevice,
    layout: &wgpu::PipelineLayout,
    swapchain_format: wgpu::TextureFormat,
    label: &str,
    source: &str,
    buffers: &[wgpu::VertexBufferLayout],
    topology: wgpu::PrimitiveTopology,
) -> Result<wgpu::RenderPipeline> {
    let module = compute.create_shader_module(&format!("shader:{}", label), source)?;

    let color_targets = [Some(wgpu::ColorTargetState {
        format: swapchain_format,
        blend: Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
        }),
        write_mask: wgpu::ColorWrites::ALL,
    })];

    Ok(compute
        .device
        .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("pipeline:{}", label)),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some("main_vs"),
                compilation_options: Default::default(),
                buffers,
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("main_fs"),
                compilation_options: Default::default(),
                targets: &color_targets,
            }),
            primitive: wgpu::PrimitiveState {
                topology,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        }))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::contour::ContourSegment;
    use approx::assert_relative_eq;
    use glam::Vec3;

    #[test]
    fn record_sizes() {
        assert_eq!(std::mem::size_of::<SceneUniforms>(), 112);
        assert_eq!(std::mem::size_of::<LineVertex>(), 24);
        assert_eq!(std::mem::size_of::<ArrowInstance>(), 40);
    }

    #[test]
    fn arrows_skip_stagnant_vertices() {
        let vertices = vec![
            FieldVertex {
                velocity: [2.0, 0.0, 0.0],
                gradient: 0.1,
                ..Default::default()
            },
            FieldVertex::default(),
            FieldVertex {
                position: [1.0, 1.0, 1.0],
                velocity: [0.0, 4.0, 0.0],
                gradient: 2.0,
                ..Default::default()
            },
        ];
        let settings = ArrowSettings {
            stride: 1,
            scale: 1.0,
        };
        let thresholds = RiskThresholds::default();
        let arrows = arrow_instances(&vertices, &settings, 4.0, &thresholds);

        assert_eq!(arrows.len(), 2);
        assert_relative_eq!(arrows[0].length, 0.5);
        assert_eq!(arrows[0].direction, [1.0, 0.0, 0.0]);
        assert_eq!(arrows[0].color, RiskLevel::Low.color());
        assert_relative_eq!(arrows[1].length, 1.0);
        assert_eq!(arrows[1].color, RiskLevel::Critical.color());
    }

    #[test]
    fn arrows_follow_the_stride() {
        let vertices = vec![
            FieldVertex {
                velocity: [1.0, 0.0, 0.0],
                ..Default::default()
            };
            20
        ];
        let settings = ArrowSettings {
            stride: 8,
            scale: 1.0,
        };
        let arrows = arrow_instances(&vertices, &settings, 1.0, &RiskThresholds::default());
        assert_eq!(arrows.len(), 3);
    }

    #[test]
    fn contour_colors_span_the_levels() {
        let segment = |level| ContourSegment {
            start: Vec3::ZERO,
            end: Vec3::X,
            level,
        };
        let contours = ContourSet {
            levels: vec![1.0, 2.0],
            segments: vec![segment(1.0), segment(2.0)],
            skipped_degenerate: 0,
        };
        let vertices = contour_vertices(&contours);

        assert_eq!(vertices.len(), 4);
        assert_eq!(vertices[0].color, SLOW);
        assert_eq!(vertices[3].color, FAST);
        assert!(contour_vertices(&ContourSet::default()).is_empty());
    }

    #[test]
    fn uniforms_carry_the_camera() {
        let config = VisualizationConfig::default();
        let camera = Camera::default();
        let mut uniforms = SceneUniforms::new(&config);
        uniforms.tick(&camera, 1.5, 3.0);

        assert_eq!(uniforms.time, 3.0);
        assert_eq!(uniforms.view_proj, camera.view_proj(1.5).to_cols_array_2d());
        assert_eq!(uniforms.point_scale, config.view.point_scale);
        assert_eq!(uniforms.max_velocity, config.particles.max_velocity);
    }
}
