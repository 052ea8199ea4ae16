use crate::settings::{GridSettings, RiskThresholds};
use crate::{Problem, Result};

use glam::{UVec3, Vec3};
use serde::{Deserialize, Serialize};

/// One mesh node as laid out in the GPU field buffer: 8 floats.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FieldVertex {
    pub position: [f32; 3], // 0
    pub velocity: [f32; 3], // 12
    pub pressure: f32,      // 24
    pub gradient: f32,      // 28
}

impl FieldVertex {
    pub fn velocity(&self) -> Vec3 {
        Vec3::from(self.velocity)
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from(self.position)
    }

    pub fn speed(&self) -> f32 {
        self.velocity().length()
    }
}

/// The field payload handed over by the upstream solver.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSampleSet {
    pub vertex_count: usize,
    pub positions: Vec<f32>,
    pub velocity: Vec<f32>,
    pub pressure: Vec<f32>,
    pub gradient: Vec<f32>,
    #[serde(default)]
    pub triangles: Vec<u32>,
}

impl FieldSampleSet {
    pub fn validate(&self) -> Result<()> {
        let n = self.vertex_count;
        let check_len = |name: &str, len: usize, expected: usize| {
            if len == expected {
                Ok(())
            } else {
                Err(Problem::InvalidFieldSample(format!(
                    "`{}` has {} values, expected {} for {} vertices",
                    name, len, expected, n
                )))
            }
        };

        let components = n.checked_mul(3).ok_or_else(|| {
            Problem::InvalidFieldSample(format!("{} vertices is more than can be addressed", n))
        })?;
        check_len("positions", self.positions.len(), components)?;
        check_len("velocity", self.velocity.len(), components)?;
        check_len("pressure", self.pressure.len(), n)?;
        check_len("gradient", self.gradient.len(), n)?;

        if self.triangles.len() % 3 != 0 {
            return Err(Problem::InvalidFieldSample(format!(
                "triangle list has {} indices, which is not a multiple of 3",
                self.triangles.len()
            )));
        }
        if let Some(index) = self.triangles.iter().find(|&&i| i as usize >= n) {
            return Err(Problem::InvalidFieldSample(format!(
                "triangle index {} is out of range for {} vertices",
                index, n
            )));
        }

        let arrays = [
            ("positions", &self.positions),
            ("velocity", &self.velocity),
            ("pressure", &self.pressure),
            ("gradient", &self.gradient),
        ];
        for (name, values) in arrays {
            if let Some(position) = values.iter().position(|v| !v.is_finite()) {
                return Err(Problem::InvalidFieldSample(format!(
                    "`{}` contains a non-finite value at index {}",
                    name, position
                )));
            }
        }

        Ok(())
    }

    /// Interleave the per-attribute arrays into the layout the compute shaders read.
    pub fn flatten(&self) -> Result<Vec<FieldVertex>> {
        self.validate()?;

        let vertices = (0..self.vertex_count)
            .map(|i| FieldVertex {
                position: [
                    self.positions[3 * i],
                    self.positions[3 * i + 1],
                    self.positions[3 * i + 2],
                ],
                velocity: [
                    self.velocity[3 * i],
                    self.velocity[3 * i + 1],
                    self.velocity[3 * i + 2],
                ],
                pressure: self.pressure[i],
                gradient: self.gradient[i],
            })
            .collect();

        Ok(vertices)
    }

    /// A field sampled on the nodes of a regular grid, in the order the
    /// compute shaders address it.
    pub fn from_grid<F>(mapping: &GridMapping, mut sample: F) -> Self
    where
        F: FnMut(Vec3) -> (Vec3, f32, f32),
    {
        let dims = mapping.dims;
        let vertex_count = mapping.node_count();
        let mut samples = FieldSampleSet {
            vertex_count,
            positions: Vec::with_capacity(3 * vertex_count),
            velocity: Vec::with_capacity(3 * vertex_count),
            pressure: Vec::with_capacity(vertex_count),
            gradient: Vec::with_capacity(vertex_count),
            triangles: Vec::new(),
        };

        for z in 0..dims.z {
            for y in 0..dims.y {
                for x in 0..dims.x {
                    let position = mapping.to_world(UVec3::new(x, y, z).as_vec3());
                    let (velocity, pressure, gradient) = sample(position);
                    samples.positions.extend_from_slice(&position.to_array());
                    samples.velocity.extend_from_slice(&velocity.to_array());
                    samples.pressure.push(pressure);
                    samples.gradient.push(gradient);
                }
            }
        }

        // Triangulate every z-slice so contours have something to scan.
        for z in 0..dims.z {
            for y in 0..dims.y.saturating_sub(1) {
                for x in 0..dims.x.saturating_sub(1) {
                    let index = |x: u32, y: u32| x + y * dims.x + z * dims.x * dims.y;
                    let (a, b, c, d) = (index(x, y), index(x + 1, y), index(x, y + 1), index(x + 1, y + 1));
                    samples.triangles.extend_from_slice(&[a, b, d, a, d, c]);
                }
            }
        }

        samples
    }
}

/// Explicit mapping between world space and the grid-index space used for
/// trilinear interpolation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridMapping {
    pub domain_min: Vec3,
    pub domain_max: Vec3,
    pub dims: UVec3,
}

impl GridMapping {
    pub fn new(domain_min: Vec3, domain_max: Vec3, dims: UVec3) -> Self {
        Self {
            domain_min,
            domain_max,
            dims,
        }
    }

    /// Resolve the configured grid, fitting the domain to `bounds` when the
    /// configuration leaves it open.
    pub fn from_settings(settings: &GridSettings, bounds: (Vec3, Vec3)) -> Self {
        let dims = UVec3::from(settings.dims);
        match (settings.domain_min, settings.domain_max) {
            (Some(min), Some(max)) => Self::new(Vec3::from(min), Vec3::from(max), dims),
            _ => Self::fit(bounds, dims),
        }
    }

    /// Fit the domain to a bounding box. Flat axes are padded so the mapping
    /// never divides by zero.
    pub fn fit((min, max): (Vec3, Vec3), dims: UVec3) -> Self {
        let flat = (max - min).cmple(Vec3::splat(f32::EPSILON));
        let max = Vec3::select(flat, min + Vec3::ONE, max);
        Self::new(min, max, dims)
    }

    pub fn extent(&self) -> Vec3 {
        self.domain_max - self.domain_min
    }

    /// Map a world-space position into continuous grid-index space.
    pub fn to_grid(&self, position: Vec3) -> Vec3 {
        let cells = (self.dims.as_vec3() - Vec3::ONE).max(Vec3::ZERO);
        (position - self.domain_min) / self.extent() * cells
    }

    pub fn to_world(&self, grid: Vec3) -> Vec3 {
        let cells = (self.dims.as_vec3() - Vec3::ONE).max(Vec3::ONE);
        self.domain_min + grid / cells * self.extent()
    }

    pub fn node_count(&self) -> usize {
        (self.dims.x as usize) * (self.dims.y as usize) * (self.dims.z as usize)
    }

    pub fn contains(&self, position: Vec3) -> bool {
        position.cmpge(self.domain_min).all() && position.cmple(self.domain_max).all()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [Self::Low, Self::Moderate, Self::High, Self::Critical];

    pub fn classify(gradient: f32, thresholds: &RiskThresholds) -> Self {
        let gradient = gradient.abs();
        if gradient >= thresholds.critical {
            Self::Critical
        } else if gradient >= thresholds.high {
            Self::High
        } else if gradient >= thresholds.moderate {
            Self::Moderate
        } else {
            Self::Low
        }
    }

    pub fn color(self) -> [f32; 3] {
        match self {
            Self::Low => [0.20, 0.60, 1.00],
            Self::Moderate => [0.35, 0.85, 0.40],
            Self::High => [1.00, 0.70, 0.15],
            Self::Critical => [1.00, 0.20, 0.15],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldStatistics {
    pub min_speed: f32,
    pub max_speed: f32,
    pub mean_speed: f32,
    pub std_speed: f32,
    pub median_speed: f32,
    pub pressure_range: (f32, f32),
    pub max_gradient: f32,
    /// Vertex counts per risk level, indexed like `RiskLevel::ALL`.
    pub risk_counts: [usize; 4],
}

impl FieldStatistics {
    pub fn compute(vertices: &[FieldVertex], thresholds: &RiskThresholds) -> Self {
        if vertices.is_empty() {
            return Self::default();
        }

        let mut speeds: Vec<f32> = vertices.iter().map(FieldVertex::speed).collect();
        let n = speeds.len() as f32;
        let mean = speeds.iter().sum::<f32>() / n;
        let variance = speeds.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;

        speeds.sort_by(f32::total_cmp);
        let mid = speeds.len() / 2;
        let median = if speeds.len() % 2 == 0 {
            0.5 * (speeds[mid - 1] + speeds[mid])
        } else {
            speeds[mid]
        };

        let mut risk_counts = [0; 4];
        let mut pressure_range = (f32::INFINITY, f32::NEG_INFINITY);
        let mut max_gradient = 0.0f32;
        for vertex in vertices {
            pressure_range.0 = pressure_range.0.min(vertex.pressure);
            pressure_range.1 = pressure_range.1.max(vertex.pressure);
            max_gradient = max_gradient.max(vertex.gradient.abs());
            risk_counts[RiskLevel::classify(vertex.gradient, thresholds) as usize] += 1;
        }

        Self {
            min_speed: speeds[0],
            max_speed: speeds[speeds.len() - 1],
            mean_speed: mean,
            std_speed: variance.sqrt(),
            median_speed: median,
            pressure_range,
            max_gradient,
            risk_counts,
        }
    }

    pub fn risk_count(&self, level: RiskLevel) -> usize {
        self.risk_counts[level as usize]
    }
}

/// An immutable snapshot of a loaded field.
#[derive(Clone, Debug)]
pub struct FieldStore {
    vertices: Vec<FieldVertex>,
    triangles: Vec<[u32; 3]>,
    statistics: FieldStatistics,
}

impl FieldStore {
    pub fn load(samples: &FieldSampleSet, thresholds: &RiskThresholds) -> Result<Self> {
        let vertices = samples.flatten()?;
        let triangles = samples
            .triangles
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();
        let statistics = FieldStatistics::compute(&vertices, thresholds);

        Ok(Self {
            vertices,
            triangles,
            statistics,
        })
    }

    /// Recompute the statistics against new risk thresholds.
    pub fn reclassify(&mut self, thresholds: &RiskThresholds) {
        self.statistics = FieldStatistics::compute(&self.vertices, thresholds);
    }

    pub fn vertices(&self) -> &[FieldVertex] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    pub fn statistics(&self) -> &FieldStatistics {
        &self.statistics
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn bounds(&self) -> (Vec3, Vec3) {
        if self.vertices.is_empty() {
            return (Vec3::ZERO, Vec3::ONE);
        }

        self.vertices.iter().fold(
            (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
            |(min, max), vertex| (min.min(vertex.position()), max.max(vertex.position())),
        )
    }
}
