// Device acquisition, shader compilation and buffer ownership.
//
// `ComputeDevice` is the only place GPU buffers are created or destroyed.
// The compute and render stages build bind groups over the buffers they are
// handed, but never own them.

use crate::field::FieldVertex;
use crate::render::particles::Particle;
use crate::render::streamlines::StreamlinePoint;
use crate::render::uniforms::SimulationUniforms;
use crate::{Problem, Result};

use rustc_hash::FxHashMap;
use std::borrow::Cow;
use wgpu::util::DeviceExt;

// Zero-sized storage bindings are invalid, so empty buffers hold one element.
const MIN_ELEMENTS: u64 = 1;

#[derive(Clone, Debug)]
pub struct DeviceOptions {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
        }
    }
}

/// Render geometry owned by the device on behalf of the scene binder.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GeometrySlot {
    SceneUniforms,
    ParticleQuad,
    ArrowTemplate,
    ArrowInstances,
    ContourVertices,
    StreamlineIndices,
}

/// The simulation buffers shared by the compute stages.
pub struct BufferSet {
    pub uniforms: wgpu::Buffer,
    pub field: wgpu::Buffer,
    pub particles: [wgpu::Buffer; 2],
    pub streamlines: wgpu::Buffer,

    pub field_vertex_count: usize,
    pub particle_count: u32,
    pub line_count: u32,
    pub points_per_line: u32,
}

impl BufferSet {
    const BUFFER_COUNT: usize = 5;

    fn destroy(self) {
        self.uniforms.destroy();
        self.field.destroy();
        for buffer in &self.particles {
            buffer.destroy();
        }
        self.streamlines.destroy();
    }
}

pub struct ComputeDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    adapter: wgpu::Adapter,
    limits: wgpu::Limits,

    buffers: Option<BufferSet>,
    geometry: FxHashMap<GeometrySlot, wgpu::Buffer>,
    disposed: bool,
}

impl ComputeDevice {
    pub async fn initialize(options: &DeviceOptions) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: options.backends,
            ..Default::default()
        });

        Self::request(&instance, options, None).await
    }

    /// Acquire a device that can also present to `surface`.
    pub async fn for_surface(
        instance: &wgpu::Instance,
        surface: &wgpu::Surface<'_>,
        options: &DeviceOptions,
    ) -> Result<Self> {
        Self::request(instance, options, Some(surface)).await
    }

    pub fn initialize_blocking(options: &DeviceOptions) -> Result<Self> {
        pollster::block_on(Self::initialize(options))
    }

    async fn request(
        instance: &wgpu::Instance,
        options: &DeviceOptions,
        compatible_surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference,
                force_fallback_adapter: options.force_fallback_adapter,
                compatible_surface,
            })
            .await
            .map_err(|err| Problem::DeviceUnavailable(err.to_string()))?;

        let info = adapter.get_info();
        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(Problem::DeviceUnavailable(format!(
                "adapter `{}` does not support compute shaders",
                info.name
            )));
        }

        let adapter_limits = adapter.limits();
        if adapter_limits.max_compute_invocations_per_workgroup
            < crate::render::particles::WORKGROUP_SIZE
            || adapter_limits.max_compute_workgroup_size_x
                < crate::render::particles::WORKGROUP_SIZE
        {
            return Err(Problem::DeviceUnavailable(format!(
                "adapter `{}` supports at most {} invocations per workgroup",
                info.name, adapter_limits.max_compute_invocations_per_workgroup
            )));
        }

        // Ask for the adapter's buffer limits so large fields still fit.
        let required_limits = wgpu::Limits {
            max_buffer_size: adapter_limits.max_buffer_size,
            max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
            ..wgpu::Limits::downlevel_defaults().using_resolution(adapter_limits.clone())
        };

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("device:seepflow"),
                required_features: wgpu::Features::empty(),
                required_limits: required_limits.clone(),
                ..Default::default()
            })
            .await
            .map_err(|err| Problem::DeviceUnavailable(err.to_string()))?;

        log::info!(
            "Using {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        Ok(Self {
            device,
            queue,
            adapter,
            limits: required_limits,
            buffers: None,
            geometry: FxHashMap::default(),
            disposed: false,
        })
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn create_shader_module(&self, label: &str, source: &str) -> Result<wgpu::ShaderModule> {
        validate_wgsl(label, source)?;
        log::debug!("Compiling shader `{}`", label);

        Ok(self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            }))
    }

    pub fn create_compute_pipeline(
        &self,
        label: &str,
        source: &str,
        bind_group_layouts: &[&wgpu::BindGroupLayout],
    ) -> Result<wgpu::ComputePipeline> {
        let module = self.create_shader_module(&format!("shader:{}", label), source)?;

        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("pipeline_layout:{}", label)),
                bind_group_layouts,
                immediate_size: 0,
            });

        Ok(self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&format!("pipeline:{}", label)),
                layout: Some(&layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            }))
    }

    fn check_size(&self, label: &str, size: u64, storage: bool) -> Result<()> {
        let mut limit = self.limits.max_buffer_size;
        if storage {
            limit = limit.min(u64::from(self.limits.max_storage_buffer_binding_size));
        }

        if size > limit {
            return Err(Problem::BufferAllocation {
                label: label.to_string(),
                requested: size,
                limit,
            });
        }

        Ok(())
    }

    fn create_storage<T: bytemuck::Pod>(&self, label: &str, contents: &[T]) -> Result<wgpu::Buffer> {
        self.check_size(label, std::mem::size_of_val(contents) as u64, true)?;

        Ok(self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(contents),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            }))
    }

    fn empty_field_buffer(&self, vertex_count: usize) -> Result<wgpu::Buffer> {
        let elements = (vertex_count as u64).max(MIN_ELEMENTS);
        let size = byte_size::<FieldVertex>(elements);
        self.check_size("buffer:field", size, true)?;

        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("buffer:field"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        }))
    }

    /// Allocate the simulation buffers, replacing any previous set. Every
    /// particle starts dead and every streamline slot starts unwritten.
    pub fn allocate_buffers(
        &mut self,
        particle_count: u32,
        line_count: u32,
        points_per_line: u32,
    ) -> Result<&BufferSet> {
        if self.disposed {
            return Err(Problem::Disposed);
        }

        let particle_count_padded = u64::from(particle_count).max(MIN_ELEMENTS);
        let point_count = (u64::from(line_count) * u64::from(points_per_line)).max(MIN_ELEMENTS);

        // Check before allocating anything, on the host or the device, so a
        // failed request leaves the previous set in place.
        self.check_size(
            "buffer:particles",
            byte_size::<Particle>(particle_count_padded),
            true,
        )?;
        self.check_size(
            "buffer:streamlines",
            byte_size::<StreamlinePoint>(point_count),
            true,
        )?;

        let particles = vec![Particle::default(); particle_count_padded as usize];
        let points = vec![StreamlinePoint::unwritten(); point_count as usize];

        let uniforms = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("buffer:SimulationUniforms"),
                contents: bytemuck::cast_slice(&[SimulationUniforms::default()]),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        let field = self.empty_field_buffer(0)?;
        let particle_buffers = [
            self.create_storage("buffer:particles_0", &particles)?,
            self.create_storage("buffer:particles_1", &particles)?,
        ];
        let streamlines = self.create_storage("buffer:streamlines", &points)?;

        log::info!(
            "Allocated buffers for {} particles and {} streamlines of {} points",
            particle_count,
            line_count,
            points_per_line
        );

        if let Some(previous) = self.buffers.take() {
            previous.destroy();
        }

        Ok(self.buffers.insert(BufferSet {
            uniforms,
            field,
            particles: particle_buffers,
            streamlines,
            field_vertex_count: 0,
            particle_count,
            line_count,
            points_per_line,
        }))
    }

    pub fn buffers(&self) -> Result<&BufferSet> {
        if self.disposed {
            return Err(Problem::Disposed);
        }

        self.buffers.as_ref().ok_or_else(|| {
            Problem::InvalidConfig("simulation buffers have not been allocated".to_string())
        })
    }

    /// Recreate the field buffer at exactly `vertex_count` records. Bind
    /// groups over the previous buffer must be rebuilt by the caller.
    pub fn replace_field_buffer(&mut self, vertex_count: usize) -> Result<&wgpu::Buffer> {
        if self.disposed {
            return Err(Problem::Disposed);
        }

        let field = self.empty_field_buffer(vertex_count)?;
        let buffers = self.buffers.as_mut().ok_or_else(|| {
            Problem::InvalidConfig("simulation buffers have not been allocated".to_string())
        })?;

        let previous = std::mem::replace(&mut buffers.field, field);
        previous.destroy();
        buffers.field_vertex_count = vertex_count;

        log::debug!("Field buffer resized to {} vertices", vertex_count);

        Ok(&buffers.field)
    }

    /// Upload render geometry into `slot`, replacing what was there.
    pub fn allocate_geometry(
        &mut self,
        slot: GeometrySlot,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> Result<&wgpu::Buffer> {
        if self.disposed {
            return Err(Problem::Disposed);
        }

        let label = format!("buffer:{:?}", slot);
        self.check_size(&label, contents.len() as u64, false)?;

        // Pad empty geometry so the buffer can still be bound.
        let padded;
        let contents = if contents.len() < 16 {
            padded = {
                let mut bytes = contents.to_vec();
                bytes.resize(16, 0);
                bytes
            };
            padded.as_slice()
        } else {
            contents
        };

        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&label),
                contents,
                usage: usage | wgpu::BufferUsages::COPY_DST,
            });

        if let Some(previous) = self.geometry.insert(slot, buffer) {
            previous.destroy();
        }

        self.geometry(slot)
    }

    pub fn geometry(&self, slot: GeometrySlot) -> Result<&wgpu::Buffer> {
        if self.disposed {
            return Err(Problem::Disposed);
        }

        self.geometry
            .get(&slot)
            .ok_or_else(|| Problem::InvalidConfig(format!("no geometry in slot {:?}", slot)))
    }

    /// Overwrite the start of an existing geometry buffer in place.
    pub fn write_geometry(&self, slot: GeometrySlot, contents: &[u8]) -> Result<()> {
        let buffer = self.geometry(slot)?;
        self.queue.write_buffer(buffer, 0, contents);
        Ok(())
    }

    pub fn live_allocations(&self) -> usize {
        let simulation = self
            .buffers
            .as_ref()
            .map_or(0, |_| BufferSet::BUFFER_COUNT);

        simulation + self.geometry.len()
    }

    /// Copy a buffer back to the host. Blocks until the GPU is idle, so only
    /// diagnostics and tests should call it.
    pub fn read_buffer<T: bytemuck::Pod>(&self, source: &wgpu::Buffer) -> Result<Vec<T>> {
        if self.disposed {
            return Err(Problem::Disposed);
        }

        let size = source.size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("buffer:readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("seepflow::readback"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|err| Problem::DeviceUnavailable(err.to_string()))?;
        rx.recv()
            .map_err(|err| Problem::DeviceUnavailable(err.to_string()))?
            .map_err(|err| Problem::DeviceUnavailable(err.to_string()))?;

        let data = {
            let view = slice.get_mapped_range();
            bytemuck::pod_collect_to_vec::<u8, T>(&view)
        };

        staging.unmap();
        staging.destroy();

        Ok(data)
    }

    /// Release every buffer. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        let released = self.live_allocations();
        if let Some(buffers) = self.buffers.take() {
            buffers.destroy();
        }
        for (_, buffer) in self.geometry.drain() {
            buffer.destroy();
        }

        log::info!("Released {} GPU buffers", released);
    }
}

impl Drop for ComputeDevice {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Parse and validate WGSL before it reaches the driver, so errors surface
/// with a readable diagnostic.
pub fn validate_wgsl(label: &str, source: &str) -> Result<naga::Module> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| Problem::ShaderCompile {
        label: label.to_string(),
        message: err.emit_to_string(source),
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|err| Problem::ShaderCompile {
        label: label.to_string(),
        message: err.emit_to_string(source),
    })?;

    Ok(module)
}

// Saturates so oversized requests still fail the limit check.
fn byte_size<T>(count: u64) -> u64 {
    count.saturating_mul(std::mem::size_of::<T>() as u64)
}
