use crate::device::{BufferSet, ComputeDevice};
use crate::field::GridMapping;
use crate::render::{self, shaders};
use crate::rng::SeepRng;
use crate::{Problem, Result};

use glam::Vec3;
use rand::prelude::*;

pub const WORKGROUP_SIZE: u32 = 64;

/// One polyline vertex. The fourth lane holds the sampled speed, or a
/// negative marker for slots the tracer never reached.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StreamlinePoint {
    pub position: [f32; 3], // 0
    pub speed: f32,         // 12
}

impl StreamlinePoint {
    const UNWRITTEN: f32 = -1.0;

    pub fn new(position: Vec3, speed: f32) -> Self {
        Self {
            position: position.to_array(),
            speed,
        }
    }

    pub fn seed(position: Vec3) -> Self {
        Self::new(position, 0.0)
    }

    pub fn unwritten() -> Self {
        Self {
            position: [0.0; 3],
            speed: Self::UNWRITTEN,
        }
    }

    pub fn is_written(&self) -> bool {
        self.speed >= 0.0
    }
}

/// Seeds on a jittered lattice filling the grid domain. Lattice cells are
/// visited at an even stride so any count spreads over the whole domain.
pub fn seed_lattice(mapping: &GridMapping, count: u32, rng: &mut SeepRng) -> Vec<Vec3> {
    if count == 0 {
        return Vec::new();
    }

    let n = (count as f32).cbrt().ceil().max(1.0) as u32;
    let cells = n * n * n;
    let extent = mapping.extent();

    (0..count)
        .map(|i| {
            let cell = (i as u64 * cells as u64 / count as u64) as u32;
            let lattice = Vec3::new(
                (cell % n) as f32,
                ((cell / n) % n) as f32,
                (cell / (n * n)) as f32,
            );
            let jitter = Vec3::new(rng.random(), rng.random(), rng.random());
            mapping.domain_min + (lattice + jitter) / n as f32 * extent
        })
        .collect()
}

/// Lay seeds out line by line: slot 0 is the seed, the rest are unwritten.
/// Lines beyond the seed count stay entirely unwritten.
pub fn seed_points(seeds: &[Vec3], line_count: u32, points_per_line: u32) -> Vec<StreamlinePoint> {
    let point_count = (line_count as usize * points_per_line as usize).max(1);
    let mut points = vec![StreamlinePoint::unwritten(); point_count];
    for (line, seed) in seeds.iter().enumerate().take(line_count as usize) {
        points[line * points_per_line as usize] = StreamlinePoint::seed(*seed);
    }
    points
}

/// Index pairs for drawing every polyline as a line list.
pub fn segment_indices(line_count: u32, points_per_line: u32) -> Vec<u32> {
    let segments = points_per_line.saturating_sub(1);
    let mut indices = Vec::with_capacity((2 * line_count * segments) as usize);
    for line in 0..line_count {
        let base = line * points_per_line;
        for k in 0..segments {
            indices.push(base + k);
            indices.push(base + k + 1);
        }
    }
    indices
}

/// Integrates streamlines on the GPU. Re-traces only after the seeds or the
/// field change.
pub struct Context {
    capacity: u32,
    points_per_line: u32,
    active_lines: u32,
    work_group_count: u32,
    dirty: bool,
    seeds: Vec<Vec3>,

    field_bind_group_layout: wgpu::BindGroupLayout,
    field_bind_group: wgpu::BindGroup,
    points_bind_group_layout: wgpu::BindGroupLayout,
    points_bind_group: wgpu::BindGroup,

    trace_pipeline: wgpu::ComputePipeline,
}

impl Context {
    pub fn new(compute: &ComputeDevice, buffers: &BufferSet) -> Result<Self> {
        let device = &compute.device;

        let field_bind_group_layout = super::field_bind_group_layout(device);
        let field_bind_group = super::field_bind_group(device, &field_bind_group_layout, buffers);

        let points_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("bind_group_layout:streamlines"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });
        let points_bind_group = points_bind_group(device, &points_bind_group_layout, buffers);

        let trace_pipeline = compute.create_compute_pipeline(
            "trace_streamlines",
            shaders::TRACE_STREAMLINES,
            &[&field_bind_group_layout, &points_bind_group_layout],
        )?;

        Ok(Self {
            capacity: buffers.line_count,
            points_per_line: buffers.points_per_line,
            active_lines: 0,
            work_group_count: 0,
            dirty: false,
            seeds: Vec::new(),

            field_bind_group_layout,
            field_bind_group,
            points_bind_group_layout,
            points_bind_group,

            trace_pipeline,
        })
    }

    pub fn rebind(&mut self, device: &wgpu::Device, buffers: &BufferSet) {
        self.field_bind_group = super::field_bind_group(device, &self.field_bind_group_layout, buffers);
        self.points_bind_group = points_bind_group(device, &self.points_bind_group_layout, buffers);
        self.capacity = buffers.line_count;
        self.points_per_line = buffers.points_per_line;
    }

    /// Write the seeds in one upload and schedule a trace.
    pub fn set_seeds(&mut self, queue: &wgpu::Queue, buffers: &BufferSet, seeds: &[Vec3]) -> Result<()> {
        if seeds.len() > self.capacity as usize {
            return Err(Problem::InvalidConfig(format!(
                "{} streamline seeds given, room for {}",
                seeds.len(),
                self.capacity
            )));
        }

        let points = seed_points(seeds, self.capacity, self.points_per_line);
        queue.write_buffer(&buffers.streamlines, 0, bytemuck::cast_slice(&points));

        self.seeds = seeds.to_vec();
        self.active_lines = seeds.len() as u32;
        self.work_group_count = render::workgroup_count(self.active_lines, WORKGROUP_SIZE);
        self.dirty = true;

        log::debug!("Seeded {} streamlines", self.active_lines);

        Ok(())
    }

    /// Rewrite the current seeds, e.g. after a field reload, so stale tails
    /// from the previous trace are cleared.
    pub fn reseed(&mut self, queue: &wgpu::Queue, buffers: &BufferSet) -> Result<()> {
        let seeds = std::mem::take(&mut self.seeds);
        self.set_seeds(queue, buffers, &seeds)
    }

    pub fn seeds(&self) -> &[Vec3] {
        &self.seeds
    }

    pub fn active_lines(&self) -> u32 {
        self.active_lines
    }

    pub fn points_per_line(&self) -> u32 {
        self.points_per_line
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn trace(&mut self, cpass: &mut wgpu::ComputePass<'_>) {
        if !self.dirty || self.work_group_count == 0 {
            return;
        }

        cpass.set_pipeline(&self.trace_pipeline);
        cpass.set_bind_group(0, &self.field_bind_group, &[]);
        cpass.set_bind_group(1, &self.points_bind_group, &[]);
        cpass.dispatch_workgroups(self.work_group_count, 1, 1);

        self.dirty = false;
    }
}

fn points_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    buffers: &BufferSet,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("bind_group:streamlines"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: buffers.streamlines.as_entire_binding(),
        }],
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use glam::UVec3;

    #[test]
    fn point_is_one_row() {
        assert_eq!(std::mem::size_of::<StreamlinePoint>(), 16);
        assert!(!StreamlinePoint::unwritten().is_written());
        assert!(StreamlinePoint::seed(Vec3::ONE).is_written());
    }

    #[test]
    fn seeds_fill_the_domain() {
        let mapping = GridMapping::new(Vec3::new(-10.0, -5.0, 0.0), Vec3::new(10.0, 5.0, 2.0), UVec3::splat(8));
        let mut rng = crate::rng::from_seed(&Some("lattice".into()));
        let seeds = seed_lattice(&mapping, 200, &mut rng);

        assert_eq!(seeds.len(), 200);
        assert!(seeds.iter().all(|&s| mapping.contains(s)));

        // Both halves of every axis get seeds.
        let center = 0.5 * (mapping.domain_min + mapping.domain_max);
        for axis in 0..3 {
            assert!(seeds.iter().any(|s| s[axis] < center[axis]));
            assert!(seeds.iter().any(|s| s[axis] > center[axis]));
        }
    }

    #[test]
    fn seeding_is_reproducible() {
        let mapping = GridMapping::new(Vec3::ZERO, Vec3::ONE, UVec3::splat(4));
        let seed = Some("repeat".to_string());
        let a = seed_lattice(&mapping, 17, &mut crate::rng::from_seed(&seed));
        let b = seed_lattice(&mapping, 17, &mut crate::rng::from_seed(&seed));
        assert_eq!(a, b);
    }

    #[test]
    fn seed_layout_marks_the_tail_unwritten() {
        let seeds = [Vec3::X, Vec3::Y];
        let points = seed_points(&seeds, 3, 4);

        assert_eq!(points.len(), 12);
        assert_eq!(points[0], StreamlinePoint::seed(Vec3::X));
        assert_eq!(points[4], StreamlinePoint::seed(Vec3::Y));
        for (i, point) in points.iter().enumerate() {
            if i != 0 && i != 4 {
                assert!(!point.is_written());
            }
        }
    }

    #[test]
    fn indices_stay_within_each_line() {
        let indices = segment_indices(2, 3);
        assert_eq!(indices, vec![0, 1, 1, 2, 3, 4, 4, 5]);
        assert!(segment_indices(4, 1).is_empty());
    }
}
