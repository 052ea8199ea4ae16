use crate::contour::{self, ContourSet};
use crate::device::ComputeDevice;
use crate::field::{FieldSampleSet, FieldStatistics, FieldStore, GridMapping};
use crate::kernels::FieldSampler;
use crate::render::camera::Camera;
use crate::render::particles::{self, Particle};
use crate::render::scene::{self, Layer};
use crate::render::streamlines::{self, StreamlinePoint};
use crate::render::uniforms::SimulationUniforms;
use crate::rng::{self, SeepRng};
use crate::scheduler::FrameClock;
use crate::settings::VisualizationConfig;
use crate::{Problem, Result};

use glam::Vec3;
use rand::prelude::*;

/// Returned once a field has been uploaded and every derived layer rebuilt.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldReport {
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub statistics: FieldStatistics,
    pub contour_segments: usize,
    pub skipped_degenerate: usize,
}

pub struct SeepFlow {
    config: VisualizationConfig,

    compute: ComputeDevice,
    particles: particles::Context,
    streamlines: streamlines::Context,
    scene: scene::Context,

    camera: Camera,
    clock: FrameClock,
    rng: SeepRng,
    particle_seed: u32,
    uniforms: SimulationUniforms,

    field: Option<FieldStore>,
    mapping: GridMapping,
    contours: ContourSet,

    // Seeds supplied by the caller survive field reloads.
    custom_seeds: Option<Vec<Vec3>>,
}

impl SeepFlow {
    pub fn new(
        mut compute: ComputeDevice,
        swapchain_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        config: VisualizationConfig,
    ) -> Result<Self> {
        log::info!("Initialising seepflow");

        config.validate()?;

        let mut rng = rng::from_seed(&config.seed);
        let particle_seed = rng.random();

        compute.allocate_buffers(
            config.particles.count,
            config.streamlines.line_count,
            config.streamlines.points_per_line,
        )?;

        let mut scene = scene::Context::new(&mut compute, swapchain_format, width, height, &config)?;

        let (particles, streamlines) = {
            let buffers = compute.buffers()?;
            (
                particles::Context::new(&compute, buffers)?,
                streamlines::Context::new(&compute, buffers)?,
            )
        };

        scene.set_particle_count(particles.particle_count());
        scene.upload_streamline_indices(
            &mut compute,
            config.streamlines.line_count,
            config.streamlines.points_per_line,
        )?;

        let mapping = GridMapping::from_settings(&config.grid, (Vec3::ZERO, Vec3::ONE));
        let uniforms = SimulationUniforms::new(&config, &mapping, 0, particle_seed);
        compute
            .queue
            .write_buffer(&compute.buffers()?.uniforms, 0, bytemuck::bytes_of(&uniforms));

        let camera = Camera::fit(mapping.domain_min, mapping.domain_max, config.view.field_of_view);

        Ok(Self {
            config,

            compute,
            particles,
            streamlines,
            scene,

            camera,
            clock: FrameClock::new(),
            rng,
            particle_seed,
            uniforms,

            field: None,
            mapping,
            contours: ContourSet::default(),

            custom_seeds: None,
        })
    }

    /// Apply a new configuration. Buffers are reallocated only when the
    /// particle or streamline counts change.
    pub fn update(&mut self, config: VisualizationConfig) -> Result<()> {
        if self.compute.is_disposed() {
            return Err(Problem::Disposed);
        }

        config.validate()?;

        let mut field = self.field.clone();
        let levels = match field.as_mut() {
            Some(store) => {
                store.reclassify(&config.risk);
                contour::levels(&config.contours, store.statistics())?
            }
            None => Vec::new(),
        };

        let resized = config.particles.count != self.config.particles.count
            || config.streamlines.line_count != self.config.streamlines.line_count
            || config.streamlines.points_per_line != self.config.streamlines.points_per_line;

        if let Some(seeds) = &self.custom_seeds {
            if seeds.len() > config.streamlines.line_count as usize {
                return Err(Problem::InvalidConfig(format!(
                    "{} streamline seeds are set, the new configuration has room for {}",
                    seeds.len(),
                    config.streamlines.line_count
                )));
            }
        }

        // A failed allocation keeps the previous buffers, so nothing below
        // may be committed before it succeeds.
        if resized {
            self.compute.allocate_buffers(
                config.particles.count,
                config.streamlines.line_count,
                config.streamlines.points_per_line,
            )?;
            if let Some(store) = &field {
                self.compute.replace_field_buffer(store.vertex_count())?;
            }
            self.scene.upload_streamline_indices(
                &mut self.compute,
                config.streamlines.line_count,
                config.streamlines.points_per_line,
            )?;
        }

        if config.seed != self.config.seed {
            self.rng = rng::from_seed(&config.seed);
            self.particle_seed = self.rng.random();
        }
        self.config = config;
        self.scene.update_config(&self.config);

        match field {
            Some(store) => {
                self.install_field(store, &levels)?;
            }
            None => {
                let buffers = self.compute.buffers()?;
                self.particles.rebind(&self.compute.device, buffers);
                self.streamlines.rebind(&self.compute.device, buffers);
                self.streamlines.reseed(&self.compute.queue, buffers)?;
                self.scene.set_particle_count(self.particles.particle_count());
                self.uniforms =
                    SimulationUniforms::new(&self.config, &self.mapping, 0, self.particle_seed);
                self.write_uniforms()?;
            }
        }

        Ok(())
    }

    /// Validate and upload a new field, then rebuild everything derived from
    /// it. Nothing changes when the samples are rejected.
    pub fn load_field(&mut self, samples: &FieldSampleSet) -> Result<FieldReport> {
        if self.compute.is_disposed() {
            return Err(Problem::Disposed);
        }

        let store = FieldStore::load(samples, &self.config.risk)?;
        let levels = contour::levels(&self.config.contours, store.statistics())?;

        self.compute.replace_field_buffer(store.vertex_count())?;
        self.install_field(store, &levels)
    }

    fn install_field(&mut self, store: FieldStore, levels: &[f32]) -> Result<FieldReport> {
        let mapping = GridMapping::from_settings(&self.config.grid, store.bounds());

        {
            let buffers = self.compute.buffers()?;
            if !store.vertices().is_empty() {
                self.compute
                    .queue
                    .write_buffer(&buffers.field, 0, bytemuck::cast_slice(store.vertices()));
            }

            self.particles.rebind(&self.compute.device, buffers);
            self.streamlines.rebind(&self.compute.device, buffers);
            self.particles.reset(&self.compute.queue, buffers);

            let seeds = match &self.custom_seeds {
                Some(seeds) => seeds.clone(),
                None => streamlines::seed_lattice(
                    &mapping,
                    self.config.streamlines.line_count,
                    &mut self.rng,
                ),
            };
            self.streamlines
                .set_seeds(&self.compute.queue, buffers, &seeds)?;
        }

        self.uniforms = SimulationUniforms::new(
            &self.config,
            &mapping,
            store.vertex_count(),
            self.particle_seed,
        );
        self.write_uniforms()?;
        self.scene.set_particle_count(self.particles.particle_count());

        let contours = contour::extract(store.vertices(), store.triangles(), levels);
        self.scene.upload_contours(&mut self.compute, &contours)?;

        let statistics = store.statistics().clone();
        let arrows = scene::arrow_instances(
            store.vertices(),
            &self.config.arrows,
            statistics.max_speed,
            &self.config.risk,
        );
        self.scene.upload_arrows(&mut self.compute, &arrows)?;

        let (min, max) = store.bounds();
        self.camera = Camera::fit(min, max, self.config.view.field_of_view);

        let report = FieldReport {
            vertex_count: store.vertex_count(),
            triangle_count: store.triangles().len(),
            statistics,
            contour_segments: contours.segments.len(),
            skipped_degenerate: contours.skipped_degenerate,
        };

        log::info!(
            "Loaded field: {} vertices, {} triangles, speed {:.3} to {:.3}",
            report.vertex_count,
            report.triangle_count,
            report.statistics.min_speed,
            report.statistics.max_speed
        );

        self.field = Some(store);
        self.mapping = mapping;
        self.contours = contours;

        Ok(report)
    }

    /// Replace the generated streamline seeds with caller-supplied ones.
    pub fn set_streamline_seeds(&mut self, seeds: &[Vec3]) -> Result<()> {
        if self.compute.is_disposed() {
            return Err(Problem::Disposed);
        }

        let buffers = self.compute.buffers()?;
        self.streamlines
            .set_seeds(&self.compute.queue, buffers, seeds)?;
        self.custom_seeds = Some(seeds.to_vec());

        Ok(())
    }

    /// Go back to generated seeds on the next field load.
    pub fn clear_streamline_seeds(&mut self) {
        self.custom_seeds = None;
    }

    fn write_uniforms(&self) -> Result<()> {
        let buffers = self.compute.buffers()?;
        self.compute
            .queue
            .write_buffer(&buffers.uniforms, 0, bytemuck::bytes_of(&self.uniforms));
        Ok(())
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.scene.resize(width, height);
    }

    pub fn animate(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        timestamp: f64,
    ) {
        self.compute(encoder, timestamp);
        self.render(encoder, view);
    }

    pub fn compute(&mut self, encoder: &mut wgpu::CommandEncoder, timestamp: f64) {
        if self.compute.is_disposed() {
            return;
        }

        let timing = match self.clock.tick(timestamp) {
            Some(timing) => timing,
            None => return,
        };

        let buffers = match self.compute.buffers() {
            Ok(buffers) => buffers,
            Err(_) => return,
        };

        self.uniforms.line_count = self.streamlines.active_lines();
        self.compute.queue.write_buffer(
            &buffers.uniforms,
            0,
            bytemuck::bytes_of(self.uniforms.tick(timing.elapsed_time, timing.delta_time)),
        );

        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("seepflow::compute"),
            timestamp_writes: None,
        });

        self.particles.advect(&mut cpass);
        self.streamlines.trace(&mut cpass);
    }

    pub fn render(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        if self.compute.is_disposed() {
            return;
        }

        if let Err(err) = self
            .scene
            .sync(&self.compute, &self.camera, self.clock.elapsed_time())
        {
            log::warn!("Skipping frame: {}", err);
            return;
        }

        let buffers = match self.compute.buffers() {
            Ok(buffers) => buffers,
            Err(_) => return,
        };

        encoder.push_debug_group("render seepage field");

        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("seepflow::render"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            if let Err(err) = self.scene.draw(
                &mut rpass,
                &self.compute,
                self.particles.current_buffer(buffers),
                &buffers.streamlines,
            ) {
                log::warn!("Cannot draw scene: {}", err);
            }
        }

        encoder.pop_debug_group();
    }

    /// Stop the frame clock and release every GPU buffer. Later frames are
    /// no-ops. Safe to call more than once.
    pub fn dispose(&mut self) {
        self.clock.cancel();
        self.compute.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.compute.is_disposed()
    }

    pub fn set_layer_visible(&mut self, layer: Layer, visible: bool) {
        self.scene.set_visible(layer, visible);
    }

    pub fn is_layer_visible(&self, layer: Layer) -> bool {
        self.scene.is_visible(layer)
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn device(&self) -> &ComputeDevice {
        &self.compute
    }

    pub fn config(&self) -> &VisualizationConfig {
        &self.config
    }

    pub fn mapping(&self) -> &GridMapping {
        &self.mapping
    }

    pub fn statistics(&self) -> Option<&FieldStatistics> {
        self.field.as_ref().map(FieldStore::statistics)
    }

    pub fn contours(&self) -> &ContourSet {
        &self.contours
    }

    pub fn streamline_seeds(&self) -> &[Vec3] {
        self.streamlines.seeds()
    }

    /// Probe the loaded field on the host with the same trilinear lookup the
    /// compute stages use.
    pub fn sample_velocity(&self, position: Vec3) -> Option<Vec3> {
        self.field
            .as_ref()
            .map(|store| FieldSampler::new(store.vertices(), self.mapping).velocity_at(position))
    }

    /// Read the most recent particle state back. Blocks on the GPU.
    pub fn read_particles(&self) -> Result<Vec<Particle>> {
        let buffers = self.compute.buffers()?;
        let mut particles: Vec<Particle> =
            self.compute.read_buffer(self.particles.current_buffer(buffers))?;
        particles.truncate(buffers.particle_count as usize);
        Ok(particles)
    }

    /// Read every streamline slot back. Blocks on the GPU.
    pub fn read_streamlines(&self) -> Result<Vec<StreamlinePoint>> {
        let buffers = self.compute.buffers()?;
        let mut points: Vec<StreamlinePoint> = self.compute.read_buffer(&buffers.streamlines)?;
        points.truncate((buffers.line_count * buffers.points_per_line) as usize);
        Ok(points)
    }
}
