use seepflow::device::validate_wgsl;
use seepflow::field::FieldVertex;
use seepflow::render::particles::Particle;
use seepflow::render::scene::SceneUniforms;
use seepflow::render::shaders;
use seepflow::render::streamlines::StreamlinePoint;
use seepflow::render::uniforms::SimulationUniforms;

use std::mem::{offset_of, size_of};

/// Size and member offsets of a WGSL struct, as naga lays it out.
fn wgsl_layout(source: &str, name: &str) -> (u32, Vec<(String, u32)>) {
    let module = validate_wgsl(name, source).unwrap();

    let mut layouter = naga::proc::Layouter::default();
    layouter.update(module.to_ctx()).unwrap();

    let (handle, ty) = module
        .types
        .iter()
        .find(|(_, ty)| ty.name.as_deref() == Some(name))
        .unwrap_or_else(|| panic!("no struct `{}`", name));

    let members = match &ty.inner {
        naga::TypeInner::Struct { members, .. } => members
            .iter()
            .map(|member| (member.name.clone().unwrap_or_default(), member.offset))
            .collect(),
        other => panic!("`{}` is not a struct: {:?}", name, other),
    };

    (layouter[handle].size, members)
}

fn assert_layout(source: &str, name: &str, size: usize, offsets: &[(&str, usize)]) {
    let (wgsl_size, members) = wgsl_layout(source, name);
    assert_eq!(wgsl_size as usize, size, "size of {}", name);

    let expected: Vec<(String, u32)> = offsets
        .iter()
        .map(|(member, offset)| (member.to_string(), *offset as u32))
        .collect();
    assert_eq!(members, expected, "members of {}", name);
}

#[test]
fn every_shader_validates() {
    for (label, source) in shaders::ALL {
        if let Err(err) = validate_wgsl(label, source) {
            panic!("{}", err);
        }
    }
}

#[test]
fn simulation_uniforms_match() {
    assert_layout(
        shaders::FIELD,
        "SimulationUniforms",
        size_of::<SimulationUniforms>(),
        &[
            ("time", offset_of!(SimulationUniforms, time)),
            ("delta_time", offset_of!(SimulationUniforms, delta_time)),
            ("particle_count", offset_of!(SimulationUniforms, particle_count)),
            ("max_velocity", offset_of!(SimulationUniforms, max_velocity)),
            ("integration_step", offset_of!(SimulationUniforms, integration_step)),
            ("gravity_strength", offset_of!(SimulationUniforms, gravity_strength)),
            ("turbulence_strength", offset_of!(SimulationUniforms, turbulence_strength)),
            ("fade_rate", offset_of!(SimulationUniforms, fade_rate)),
            ("domain_min", offset_of!(SimulationUniforms, domain_min)),
            ("vertex_count", offset_of!(SimulationUniforms, vertex_count)),
            ("domain_max", offset_of!(SimulationUniforms, domain_max)),
            ("points_per_line", offset_of!(SimulationUniforms, points_per_line)),
            ("grid_dims", offset_of!(SimulationUniforms, grid_dims)),
            ("line_count", offset_of!(SimulationUniforms, line_count)),
            ("bounds_min", offset_of!(SimulationUniforms, bounds_min)),
            ("life_min", offset_of!(SimulationUniforms, life_min)),
            ("bounds_max", offset_of!(SimulationUniforms, bounds_max)),
            ("life_max", offset_of!(SimulationUniforms, life_max)),
            ("size_min", offset_of!(SimulationUniforms, size_min)),
            ("size_max", offset_of!(SimulationUniforms, size_max)),
            ("seed", offset_of!(SimulationUniforms, seed)),
            ("_padding", offset_of!(SimulationUniforms, _padding)),
        ],
    );
    assert_eq!(size_of::<SimulationUniforms>(), 128);
}

#[test]
fn field_vertex_matches() {
    assert_layout(
        shaders::FIELD,
        "FieldVertex",
        size_of::<FieldVertex>(),
        &[
            ("position", offset_of!(FieldVertex, position)),
            ("velocity", offset_of!(FieldVertex, velocity)),
            ("pressure", offset_of!(FieldVertex, pressure)),
            ("gradient", offset_of!(FieldVertex, gradient)),
        ],
    );
}

#[test]
fn particle_matches() {
    assert_layout(
        shaders::ADVECT_PARTICLES,
        "Particle",
        size_of::<Particle>(),
        &[
            ("position", offset_of!(Particle, position)),
            ("age", offset_of!(Particle, age)),
            ("velocity", offset_of!(Particle, velocity)),
            ("life", offset_of!(Particle, life)),
            ("color", offset_of!(Particle, color)),
            ("size", offset_of!(Particle, size)),
        ],
    );
}

#[test]
fn streamline_point_matches() {
    assert_layout(
        shaders::TRACE_STREAMLINES,
        "StreamlinePoint",
        size_of::<StreamlinePoint>(),
        &[
            ("position", offset_of!(StreamlinePoint, position)),
            ("speed", offset_of!(StreamlinePoint, speed)),
        ],
    );
}

#[test]
fn scene_uniforms_match() {
    assert_layout(
        shaders::SCENE,
        "SceneUniforms",
        size_of::<SceneUniforms>(),
        &[
            ("view_proj", offset_of!(SceneUniforms, view_proj)),
            ("camera_right", offset_of!(SceneUniforms, camera_right)),
            ("time", offset_of!(SceneUniforms, time)),
            ("camera_up", offset_of!(SceneUniforms, camera_up)),
            ("point_scale", offset_of!(SceneUniforms, point_scale)),
            ("fade_rate", offset_of!(SceneUniforms, fade_rate)),
            ("max_velocity", offset_of!(SceneUniforms, max_velocity)),
            ("arrow_scale", offset_of!(SceneUniforms, arrow_scale)),
            ("_padding", offset_of!(SceneUniforms, _padding)),
        ],
    );
}
