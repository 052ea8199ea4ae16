use crate::field::GridMapping;
use crate::settings::VisualizationConfig;

/// Shared by the particle and streamline compute stages. Must match
/// `SimulationUniforms` in `shader/field.wgsl`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SimulationUniforms {
    pub time: f32,                // 0
    pub delta_time: f32,          // 4
    pub particle_count: u32,      // 8
    pub max_velocity: f32,        // 12
    pub integration_step: f32,    // 16
    pub gravity_strength: f32,    // 20
    pub turbulence_strength: f32, // 24
    pub fade_rate: f32,           // 28
    pub domain_min: [f32; 3],     // 32
    pub vertex_count: u32,        // 44
    pub domain_max: [f32; 3],     // 48
    pub points_per_line: u32,     // 60
    pub grid_dims: [u32; 3],      // 64
    pub line_count: u32,          // 76
    pub bounds_min: [f32; 3],     // 80
    pub life_min: f32,            // 92
    pub bounds_max: [f32; 3],     // 96
    pub life_max: f32,            // 108
    pub size_min: f32,            // 112
    pub size_max: f32,            // 116
    pub seed: u32,                // 120
    pub _padding: u32,            // 124
}

impl SimulationUniforms {
    pub fn new(
        config: &VisualizationConfig,
        mapping: &GridMapping,
        vertex_count: usize,
        seed: u32,
    ) -> Self {
        let particles = &config.particles;
        let streamlines = &config.streamlines;

        Self {
            time: 0.0,
            delta_time: 0.0,
            particle_count: particles.count,
            max_velocity: particles.max_velocity,
            integration_step: streamlines.integration_step,
            gravity_strength: particles.gravity_strength,
            turbulence_strength: particles.turbulence_strength,
            fade_rate: particles.fade_rate,
            domain_min: mapping.domain_min.to_array(),
            vertex_count: vertex_count as u32,
            domain_max: mapping.domain_max.to_array(),
            points_per_line: streamlines.points_per_line,
            grid_dims: mapping.dims.to_array(),
            line_count: streamlines.line_count,
            bounds_min: streamlines.bounds.min,
            life_min: particles.life_range[0],
            bounds_max: streamlines.bounds.max,
            life_max: particles.life_range[1],
            size_min: particles.size_range[0],
            size_max: particles.size_range[1],
            seed,
            _padding: 0,
        }
    }

    pub fn tick(&mut self, elapsed_time: f32, delta_time: f32) -> &Self {
        self.time = elapsed_time;
        self.delta_time = delta_time;
        self
    }

    pub fn mapping(&self) -> GridMapping {
        GridMapping::new(
            self.domain_min.into(),
            self.domain_max.into(),
            self.grid_dims.into(),
        )
    }
}
