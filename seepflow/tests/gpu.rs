// End-to-end checks against a real adapter. Every test returns early when
// the machine has no compute-capable GPU.

use seepflow::field::GridMapping;
use seepflow::{ComputeDevice, DeviceOptions, FieldSampleSet, Problem, SeepFlow, VisualizationConfig};

use approx::assert_relative_eq;
use glam::{UVec3, Vec3};

fn mapping() -> GridMapping {
    GridMapping::new(Vec3::ZERO, Vec3::splat(3.0), UVec3::splat(4))
}

fn config() -> VisualizationConfig {
    let mapping = mapping();
    let mut config = VisualizationConfig::default();
    config.seed = Some("gpu".into());
    config.grid.dims = mapping.dims.to_array();
    config.grid.domain_min = Some(mapping.domain_min.to_array());
    config.grid.domain_max = Some(mapping.domain_max.to_array());
    config.particles.count = 512;
    config.particles.gravity_strength = 0.0;
    config.particles.turbulence_strength = 0.0;
    config.streamlines.line_count = 4;
    config.streamlines.points_per_line = 16;
    config
}

fn uniform_field(v0: Vec3) -> FieldSampleSet {
    FieldSampleSet::from_grid(&mapping(), |position| (v0, 10.0 - position.x, 0.2))
}

fn try_engine(config: VisualizationConfig) -> Option<Result<SeepFlow, Problem>> {
    let _ = env_logger::builder().is_test(true).try_init();

    match ComputeDevice::initialize_blocking(&DeviceOptions::default()) {
        Ok(compute) => Some(SeepFlow::new(
            compute,
            wgpu::TextureFormat::Rgba8Unorm,
            64,
            64,
            config,
        )),
        Err(err) => {
            eprintln!("Skipping GPU test: {}", err);
            None
        }
    }
}

fn engine(config: VisualizationConfig) -> Option<SeepFlow> {
    try_engine(config).map(|result| result.unwrap())
}

fn run_frame(flow: &mut SeepFlow, timestamp: f64) {
    let mut encoder = flow
        .device()
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    flow.compute(&mut encoder, timestamp);
    flow.device().queue.submit(Some(encoder.finish()));
}

#[test]
fn double_dispose_releases_everything() {
    let Some(mut flow) = engine(config()) else {
        return;
    };
    flow.load_field(&uniform_field(Vec3::X)).unwrap();
    assert!(flow.device().live_allocations() > 0);

    flow.dispose();
    flow.dispose();

    assert!(flow.is_disposed());
    assert_eq!(flow.device().live_allocations(), 0);
    assert!(matches!(
        flow.load_field(&uniform_field(Vec3::X)),
        Err(Problem::Disposed)
    ));

    // Frames after disposal do nothing.
    run_frame(&mut flow, 16.0);
}

#[test]
fn rejected_field_leaves_the_previous_one() {
    let Some(mut flow) = engine(config()) else {
        return;
    };
    let report = flow.load_field(&uniform_field(Vec3::X)).unwrap();
    assert_eq!(report.vertex_count, 64);

    let mut broken = uniform_field(Vec3::Y);
    broken.velocity.pop();
    assert!(matches!(
        flow.load_field(&broken),
        Err(Problem::InvalidFieldSample(_))
    ));

    assert_eq!(flow.statistics(), Some(&report.statistics));
    assert_eq!(flow.device().buffers().unwrap().field_vertex_count, 64);
    assert_eq!(flow.sample_velocity(Vec3::splat(1.5)), Some(Vec3::X));
}

#[test]
fn empty_particle_pool_runs() {
    let mut config = config();
    config.particles.count = 0;
    let Some(mut flow) = engine(config) else {
        return;
    };
    flow.load_field(&uniform_field(Vec3::X)).unwrap();

    run_frame(&mut flow, 0.0);
    run_frame(&mut flow, 16.0);

    assert!(flow.read_particles().unwrap().is_empty());
}

#[test]
fn first_frame_spawns_the_whole_pool() {
    let config = config();
    let Some(mut flow) = engine(config.clone()) else {
        return;
    };
    flow.load_field(&uniform_field(Vec3::X)).unwrap();

    run_frame(&mut flow, 0.0);
    let particles = flow.read_particles().unwrap();
    assert_eq!(particles.len(), 512);

    let [life_min, life_max] = config.particles.life_range;
    let [size_min, size_max] = config.particles.size_range;
    for particle in &particles {
        assert_eq!(particle.age, 0.0);
        assert!(particle.life >= life_min && particle.life <= life_max);
        assert!(particle.size >= size_min && particle.size <= size_max);
        assert!(mapping().contains(Vec3::from(particle.position)));
    }

    for frame in 1..30 {
        run_frame(&mut flow, frame as f64 * 50.0);
    }
    for particle in flow.read_particles().unwrap() {
        assert!(particle.age >= 0.0 && particle.age <= particle.life);
        assert!(particle.size >= 0.0);
        assert!(particle.color.iter().all(|&c| (0.0..=1.0).contains(&c)));
    }
}

#[test]
fn seed_outside_the_box_writes_nothing() {
    let config = config();
    let Some(mut flow) = engine(config.clone()) else {
        return;
    };
    flow.load_field(&uniform_field(Vec3::X)).unwrap();

    let outside = Vec3::new(100.0, 0.0, 0.0);
    flow.set_streamline_seeds(&[outside]).unwrap();
    run_frame(&mut flow, 0.0);

    let points = flow.read_streamlines().unwrap();
    let per_line = config.streamlines.points_per_line as usize;
    assert_eq!(Vec3::from(points[0].position), outside);
    assert!(points[1..per_line].iter().all(|point| !point.is_written()));
}

#[test]
fn streamline_follows_a_uniform_field() {
    let config = config();
    let Some(mut flow) = engine(config.clone()) else {
        return;
    };
    flow.load_field(&uniform_field(Vec3::X)).unwrap();

    let seed = Vec3::new(0.5, 1.0, 1.0);
    flow.set_streamline_seeds(&[seed]).unwrap();
    run_frame(&mut flow, 0.0);

    let points = flow.read_streamlines().unwrap();
    let h = config.streamlines.integration_step;
    assert_relative_eq!(points[1].position[0], seed.x + h, epsilon = 1e-5);
    assert_relative_eq!(points[1].position[1], seed.y, epsilon = 1e-5);
    assert_relative_eq!(points[1].speed, 1.0, epsilon = 1e-5);

    let per_line = config.streamlines.points_per_line as usize;
    assert!(points[..per_line].iter().all(|point| point.is_written()));
}

#[test]
fn oversized_pool_is_refused() {
    let mut config = config();
    config.particles.count = u32::MAX;
    let Some(result) = try_engine(config) else {
        return;
    };

    match result {
        Err(Problem::BufferAllocation {
            label,
            requested,
            limit,
        }) => {
            assert_eq!(label, "buffer:particles");
            assert!(requested > limit);
        }
        other => panic!("expected an allocation error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn failed_resize_keeps_the_previous_pool() {
    let Some(mut flow) = engine(config()) else {
        return;
    };
    flow.load_field(&uniform_field(Vec3::X)).unwrap();

    let mut larger = config();
    larger.particles.count = u32::MAX;
    larger.particles.gravity_strength = 1.0;
    assert!(matches!(
        flow.update(larger),
        Err(Problem::BufferAllocation { .. })
    ));

    assert_eq!(flow.config(), &config());
    assert_eq!(flow.device().buffers().unwrap().particle_count, 512);

    // The engine still runs with the pool it had.
    run_frame(&mut flow, 0.0);
    assert_eq!(flow.read_particles().unwrap().len(), 512);

    // A smaller retry succeeds.
    let mut smaller = config();
    smaller.particles.count = 256;
    flow.update(smaller).unwrap();
    assert_eq!(flow.config().particles.count, 256);
    run_frame(&mut flow, 16.0);
    assert_eq!(flow.read_particles().unwrap().len(), 256);
}
