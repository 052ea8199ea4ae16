use crate::{Problem, Result};
use serde::{Deserialize, Serialize};

pub const MAX_STREAMLINES: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct VisualizationConfig {
    pub seed: Option<String>,
    pub grid: GridSettings,
    pub particles: ParticleSettings,
    pub streamlines: StreamlineSettings,
    pub contours: ContourSettings,
    pub risk: RiskThresholds,
    pub arrows: ArrowSettings,
    pub view: ViewSettings,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            seed: None,
            grid: GridSettings::default(),
            particles: ParticleSettings::default(),
            streamlines: StreamlineSettings::default(),
            contours: ContourSettings::default(),
            risk: RiskThresholds::default(),
            arrows: ArrowSettings::default(),
            view: ViewSettings::default(),
        }
    }
}

/// The regular grid the compute shaders interpolate over.
///
/// The field buffer is addressed as `x + y * nx + z * nx * ny`. When no domain
/// is given, it is fitted to the bounding box of the loaded field.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct GridSettings {
    pub dims: [u32; 3],
    pub domain_min: Option<[f32; 3]>,
    pub domain_max: Option<[f32; 3]>,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            dims: [128, 64, 32],
            domain_min: None,
            domain_max: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ParticleSettings {
    pub count: u32,
    pub max_velocity: f32,
    pub gravity_strength: f32,
    pub turbulence_strength: f32,
    pub fade_rate: f32,
    pub life_range: [f32; 2],
    pub size_range: [f32; 2],
}

impl Default for ParticleSettings {
    fn default() -> Self {
        Self {
            count: 10_000,
            max_velocity: 10.0,
            gravity_strength: 0.0,
            turbulence_strength: 0.1,
            fade_rate: 1.0,
            life_range: [2.0, 6.0],
            size_range: [0.5, 1.5],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct StreamlineSettings {
    pub line_count: u32,
    pub points_per_line: u32,
    pub integration_step: f32,
    pub bounds: Bounds,
}

impl Default for StreamlineSettings {
    fn default() -> Self {
        Self {
            line_count: 200,
            points_per_line: 100,
            integration_step: 0.05,
            bounds: Bounds::default(),
        }
    }
}

/// Axis-aligned box a streamline must stay inside.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: [-50.0, -50.0, -10.0],
            max: [50.0, 50.0, 10.0],
        }
    }
}

impl Bounds {
    pub fn contains(&self, p: glam::Vec3) -> bool {
        let min = glam::Vec3::from(self.min);
        let max = glam::Vec3::from(self.max);
        p.cmpge(min).all() && p.cmple(max).all()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ContourSettings {
    /// Explicit iso-velocity levels, ascending. Takes precedence over `level_count`.
    pub levels: Option<Vec<f32>>,
    pub level_count: u32,
}

impl Default for ContourSettings {
    fn default() -> Self {
        Self {
            levels: None,
            level_count: 20,
        }
    }
}

/// Hydraulic gradient thresholds used to classify piping risk.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RiskThresholds {
    pub moderate: f32,
    pub high: f32,
    pub critical: f32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            moderate: 0.3,
            high: 0.6,
            critical: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ArrowSettings {
    /// Draw an arrow for every `stride`-th field vertex.
    pub stride: u32,
    pub scale: f32,
}

impl Default for ArrowSettings {
    fn default() -> Self {
        Self {
            stride: 8,
            scale: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ViewSettings {
    pub point_scale: f32,
    /// Vertical field of view in degrees.
    pub field_of_view: f32,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            point_scale: 0.01,
            field_of_view: 45.0,
        }
    }
}

impl VisualizationConfig {
    pub fn from_json(source: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(source).map_err(|err| Problem::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Problem::InvalidConfig(msg));

        if self.grid.dims.iter().any(|&d| d == 0) {
            return invalid(format!("grid dimensions must be non-zero, got {:?}", self.grid.dims));
        }

        match (self.grid.domain_min, self.grid.domain_max) {
            (Some(min), Some(max)) => {
                if (0..3).any(|axis| max[axis] <= min[axis]) {
                    return invalid(format!("grid domain is empty: {:?} .. {:?}", min, max));
                }
            }
            (None, None) => (),
            _ => return invalid("grid domainMin and domainMax must be given together".into()),
        }

        let particles = &self.particles;
        if !(particles.max_velocity > 0.0) {
            return invalid(format!("maxVelocity must be positive, got {}", particles.max_velocity));
        }
        if !is_range(particles.life_range) || particles.life_range[0] <= 0.0 {
            return invalid(format!("lifeRange must be positive and ascending, got {:?}", particles.life_range));
        }
        if !is_range(particles.size_range) || particles.size_range[0] < 0.0 {
            return invalid(format!("sizeRange must be non-negative and ascending, got {:?}", particles.size_range));
        }
        if particles.fade_rate < 0.0 || particles.turbulence_strength < 0.0 {
            return invalid("fadeRate and turbulenceStrength must not be negative".into());
        }

        let streamlines = &self.streamlines;
        if streamlines.line_count > MAX_STREAMLINES {
            return invalid(format!(
                "at most {} streamlines are supported, got {}",
                MAX_STREAMLINES, streamlines.line_count
            ));
        }
        if streamlines.points_per_line < 2 {
            return invalid("a streamline needs at least two points".into());
        }
        if !(streamlines.integration_step > 0.0) {
            return invalid(format!(
                "integrationStep must be positive, got {}",
                streamlines.integration_step
            ));
        }
        let bounds = &streamlines.bounds;
        if (0..3).any(|axis| bounds.max[axis] <= bounds.min[axis]) {
            return invalid(format!("streamline bounds are empty: {:?}", bounds));
        }

        if let Some(levels) = &self.contours.levels {
            if levels.windows(2).any(|pair| !(pair[0] < pair[1])) {
                return invalid(format!("contour levels must be strictly ascending, got {:?}", levels));
            }
        }

        let risk = &self.risk;
        if !(risk.moderate <= risk.high && risk.high <= risk.critical) {
            return invalid(format!("risk thresholds must be ascending, got {:?}", risk));
        }

        if self.arrows.stride == 0 {
            return invalid("arrow stride must be at least 1".into());
        }

        Ok(())
    }
}

fn is_range(range: [f32; 2]) -> bool {
    range[0].is_finite() && range[1].is_finite() && range[0] <= range[1]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = VisualizationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.particles.count, 10_000);
        assert_eq!(config.grid.dims, [128, 64, 32]);
        assert_eq!(config.streamlines.points_per_line, 100);
        assert_eq!(config.streamlines.bounds.max, [50.0, 50.0, 10.0]);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config =
            VisualizationConfig::from_json(r#"{ "particles": { "count": 64, "gravityStrength": 9.81 } }"#)
                .unwrap();
        assert_eq!(config.particles.count, 64);
        assert_eq!(config.particles.gravity_strength, 9.81);
        assert_eq!(config.particles.max_velocity, 10.0);
        assert_eq!(config.contours.level_count, 20);
    }

    #[test]
    fn rejects_unknown_fields() {
        let result = VisualizationConfig::from_json(r#"{ "particles": { "cuont": 64 } }"#);
        assert!(matches!(result, Err(Problem::InvalidConfig(_))));

        let result = VisualizationConfig::from_json(r#"{ "dashboard": true }"#);
        assert!(matches!(result, Err(Problem::InvalidConfig(_))));
    }

    #[test]
    fn rejects_descending_levels() {
        let mut config = VisualizationConfig::default();
        config.contours.levels = Some(vec![0.5, 0.2]);
        assert!(matches!(config.validate(), Err(Problem::InvalidConfig(_))));
    }

    #[test]
    fn rejects_too_many_streamlines() {
        let mut config = VisualizationConfig::default();
        config.streamlines.line_count = MAX_STREAMLINES + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_half_specified_domain() {
        let mut config = VisualizationConfig::default();
        config.grid.domain_min = Some([0.0, 0.0, 0.0]);
        assert!(config.validate().is_err());

        config.grid.domain_max = Some([1.0, 0.0, 1.0]);
        assert!(config.validate().is_err());

        config.grid.domain_max = Some([1.0, 1.0, 1.0]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bounds_are_inclusive() {
        let bounds = Bounds::default();
        assert!(bounds.contains(glam::Vec3::new(50.0, -50.0, 10.0)));
        assert!(!bounds.contains(glam::Vec3::new(0.0, 0.0, 10.5)));
    }
}
