// Iso-velocity contours over the triangle mesh, extracted on the host.

use crate::field::{FieldStatistics, FieldVertex};
use crate::settings::ContourSettings;
use crate::{Problem, Result};

use glam::Vec3;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ContourSegment {
    pub start: Vec3,
    pub end: Vec3,
    pub level: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContourSet {
    pub levels: Vec<f32>,
    pub segments: Vec<ContourSegment>,
    /// Triangles crossed on all three edges, which are skipped.
    pub skipped_degenerate: usize,
}

impl ContourSet {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Resolve the iso-levels: the configured list, or `level_count` levels
/// spaced evenly strictly between the slowest and fastest vertex.
pub fn levels(settings: &ContourSettings, statistics: &FieldStatistics) -> Result<Vec<f32>> {
    if let Some(levels) = &settings.levels {
        if levels.windows(2).any(|pair| !(pair[0] < pair[1])) {
            return Err(Problem::InvalidConfig(format!(
                "contour levels must be strictly ascending, got {:?}",
                levels
            )));
        }
        return Ok(levels.clone());
    }

    let (min, max) = (statistics.min_speed, statistics.max_speed);
    if !(max > min) {
        return Ok(Vec::new());
    }

    let count = settings.level_count;
    let step = (max - min) / (count + 1) as f32;
    Ok((1..=count).map(|i| min + step * i as f32).collect())
}

fn crosses(v1: f32, v2: f32, level: f32) -> bool {
    (v1 <= level && v2 >= level) || (v1 >= level && v2 <= level)
}

fn crossing_point(p1: Vec3, p2: Vec3, v1: f32, v2: f32, level: f32) -> Vec3 {
    if v1 == v2 {
        return 0.5 * (p1 + p2);
    }
    let t = (level - v1) / (v2 - v1);
    p1 + t * (p2 - p1)
}

/// Scan every triangle against every level. A triangle crossed on exactly
/// two edges yields one segment.
pub fn extract(vertices: &[FieldVertex], triangles: &[[u32; 3]], levels: &[f32]) -> ContourSet {
    let speeds: Vec<f32> = vertices.iter().map(FieldVertex::speed).collect();
    let mut set = ContourSet {
        levels: levels.to_vec(),
        ..Default::default()
    };

    for &level in levels {
        for triangle in triangles {
            let [a, b, c] = triangle.map(|i| i as usize);
            if a >= vertices.len() || b >= vertices.len() || c >= vertices.len() {
                continue;
            }

            let mut points = [Vec3::ZERO; 3];
            let mut count = 0;
            for (i, j) in [(a, b), (b, c), (c, a)] {
                let (v1, v2) = (speeds[i], speeds[j]);
                if crosses(v1, v2, level) {
                    points[count] = crossing_point(
                        vertices[i].position(),
                        vertices[j].position(),
                        v1,
                        v2,
                        level,
                    );
                    count += 1;
                }
            }

            match count {
                2 => set.segments.push(ContourSegment {
                    start: points[0],
                    end: points[1],
                    level,
                }),
                3 => set.skipped_degenerate += 1,
                _ => (),
            }
        }
    }

    if set.skipped_degenerate > 0 {
        log::warn!(
            "Skipped {} contour triangles crossed on every edge",
            set.skipped_degenerate
        );
    }

    set
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn vertex(position: [f32; 3], speed: f32) -> FieldVertex {
        FieldVertex {
            position,
            velocity: [speed, 0.0, 0.0],
            ..Default::default()
        }
    }

    fn ramp() -> (Vec<FieldVertex>, Vec<[u32; 3]>) {
        let vertices = vec![
            vertex([0.0, 0.0, 0.0], 0.0),
            vertex([2.0, 0.0, 0.0], 2.0),
            vertex([0.0, 2.0, 0.0], 0.0),
            vertex([2.0, 2.0, 0.0], 2.0),
        ];
        (vertices, vec![[0, 1, 3], [0, 3, 2]])
    }

    #[test]
    fn ramp_yields_a_straight_contour() {
        let (vertices, triangles) = ramp();
        let set = extract(&vertices, &triangles, &[1.0]);

        assert_eq!(set.segments.len(), 2);
        assert_eq!(set.skipped_degenerate, 0);
        for segment in &set.segments {
            assert_relative_eq!(segment.start.x, 1.0, epsilon = 1e-6);
            assert_relative_eq!(segment.end.x, 1.0, epsilon = 1e-6);
            assert_eq!(segment.level, 1.0);
        }
    }

    #[test]
    fn level_outside_range_yields_nothing() {
        let (vertices, triangles) = ramp();
        assert!(extract(&vertices, &triangles, &[5.0]).is_empty());
        assert!(extract(&vertices, &triangles, &[-1.0]).is_empty());
    }

    #[test]
    fn flat_triangle_on_the_level_is_skipped() {
        let vertices = vec![
            vertex([0.0, 0.0, 0.0], 1.0),
            vertex([1.0, 0.0, 0.0], 1.0),
            vertex([0.0, 1.0, 0.0], 1.0),
        ];
        let set = extract(&vertices, &[[0, 1, 2]], &[1.0]);
        assert!(set.segments.is_empty());
        assert_eq!(set.skipped_degenerate, 1);
    }

    #[test]
    fn equal_endpoints_cross_at_the_midpoint() {
        let p = crossing_point(Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), 1.0, 1.0, 1.0);
        assert_eq!(p, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn extraction_is_idempotent() {
        let (vertices, triangles) = ramp();
        let levels = [0.25, 0.5, 1.0, 1.5];
        let first = extract(&vertices, &triangles, &levels);
        let second = extract(&vertices, &triangles, &levels);
        assert_eq!(first, second);
    }

    #[test]
    fn generated_levels_exclude_the_extremes() {
        let statistics = FieldStatistics {
            min_speed: 0.0,
            max_speed: 5.0,
            ..Default::default()
        };
        let settings = ContourSettings {
            levels: None,
            level_count: 4,
        };
        assert_eq!(levels(&settings, &statistics).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn uniform_field_has_no_levels() {
        let statistics = FieldStatistics {
            min_speed: 2.0,
            max_speed: 2.0,
            ..Default::default()
        };
        assert!(levels(&ContourSettings::default(), &statistics).unwrap().is_empty());
    }

    #[test]
    fn rejects_unsorted_levels() {
        let settings = ContourSettings {
            levels: Some(vec![1.0, 1.0]),
            level_count: 0,
        };
        assert!(matches!(
            levels(&settings, &FieldStatistics::default()),
            Err(Problem::InvalidConfig(_))
        ));
    }
}
