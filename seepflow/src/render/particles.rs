use crate::device::{BufferSet, ComputeDevice};
use crate::render::{self, shaders};
use crate::Result;

pub const WORKGROUP_SIZE: u32 = 256;

/// One tracer particle as stored on the GPU. Three 16-byte rows so the WGSL
/// struct has no implicit padding.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Particle {
    pub position: [f32; 3], // 0
    pub age: f32,           // 12
    pub velocity: [f32; 3], // 16
    pub life: f32,          // 28
    pub color: [f32; 3],    // 32
    pub size: f32,          // 44
}

impl Particle {
    pub fn is_dead(&self) -> bool {
        self.age >= self.life
    }
}

pub fn workgroup_count(particle_count: u32) -> u32 {
    render::workgroup_count(particle_count, WORKGROUP_SIZE)
}

/// Advects the particle pool. Reads buffer `frame_num`, writes the other one.
pub struct Context {
    particle_count: u32,
    work_group_count: u32,
    frame_num: usize,

    field_bind_group_layout: wgpu::BindGroupLayout,
    field_bind_group: wgpu::BindGroup,
    particles_bind_group_layout: wgpu::BindGroupLayout,
    particle_bind_groups: [wgpu::BindGroup; 2],

    advect_pipeline: wgpu::ComputePipeline,
}

impl Context {
    pub fn new(compute: &ComputeDevice, buffers: &BufferSet) -> Result<Self> {
        let device = &compute.device;

        let field_bind_group_layout = super::field_bind_group_layout(device);
        let field_bind_group = super::field_bind_group(device, &field_bind_group_layout, buffers);

        let particles_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("bind_group_layout:particles"),
                entries: &[
                    // particles
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    // out_particles
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let particle_bind_groups =
            particle_bind_groups(device, &particles_bind_group_layout, buffers);

        let advect_pipeline = compute.create_compute_pipeline(
            "advect_particles",
            shaders::ADVECT_PARTICLES,
            &[&field_bind_group_layout, &particles_bind_group_layout],
        )?;

        let work_group_count = workgroup_count(buffers.particle_count);
        log::debug!(
            "Particle stage: {} particles in {} workgroups",
            buffers.particle_count,
            work_group_count
        );

        Ok(Self {
            particle_count: buffers.particle_count,
            work_group_count,
            frame_num: 0,

            field_bind_group_layout,
            field_bind_group,
            particles_bind_group_layout,
            particle_bind_groups,

            advect_pipeline,
        })
    }

    /// Rebuild the bind groups after the field or particle buffers were
    /// replaced.
    pub fn rebind(&mut self, device: &wgpu::Device, buffers: &BufferSet) {
        self.field_bind_group = super::field_bind_group(device, &self.field_bind_group_layout, buffers);
        self.particle_bind_groups =
            particle_bind_groups(device, &self.particles_bind_group_layout, buffers);
        self.particle_count = buffers.particle_count;
        self.work_group_count = workgroup_count(buffers.particle_count);
    }

    /// Kill the whole pool so the next dispatch respawns every particle.
    pub fn reset(&mut self, queue: &wgpu::Queue, buffers: &BufferSet) {
        let dead = vec![Particle::default(); self.particle_count.max(1) as usize];
        for buffer in &buffers.particles {
            queue.write_buffer(buffer, 0, bytemuck::cast_slice(&dead));
        }
        self.frame_num = 0;
    }

    pub fn particle_count(&self) -> u32 {
        self.particle_count
    }

    pub fn work_group_count(&self) -> u32 {
        self.work_group_count
    }

    pub fn advect(&mut self, cpass: &mut wgpu::ComputePass<'_>) {
        if self.work_group_count == 0 {
            return;
        }

        cpass.set_pipeline(&self.advect_pipeline);
        cpass.set_bind_group(0, &self.field_bind_group, &[]);
        cpass.set_bind_group(1, &self.particle_bind_groups[self.frame_num], &[]);
        cpass.dispatch_workgroups(self.work_group_count, 1, 1);

        self.frame_num = 1 - self.frame_num;
    }

    /// The buffer holding the most recent particle state.
    pub fn current_buffer<'a>(&self, buffers: &'a BufferSet) -> &'a wgpu::Buffer {
        &buffers.particles[self.frame_num]
    }
}

fn particle_bind_groups(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    buffers: &BufferSet,
) -> [wgpu::BindGroup; 2] {
    [0, 1].map(|i| {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("bind_group:particles_{}", i)),
            layout,
            entries: &[
                // particles
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffers.particles[i].as_entire_binding(),
                },
                // out_particles
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.particles[(i + 1) % 2].as_entire_binding(),
                },
            ],
        })
    })
}
