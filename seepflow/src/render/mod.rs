pub mod camera;
pub mod particles;
pub mod scene;
pub mod streamlines;
pub mod uniforms;

use crate::device::BufferSet;

/// Workgroups needed to cover `count` invocations.
pub fn workgroup_count(count: u32, workgroup_size: u32) -> u32 {
    count.div_ceil(workgroup_size)
}

/// WGSL sources. The compute stages share the field sampling prelude.
pub mod shaders {
    pub const FIELD: &str = include_str!("../../shader/field.wgsl");

    pub const ADVECT_PARTICLES: &str = concat!(
        include_str!("../../shader/field.wgsl"),
        include_str!("../../shader/advect_particles.comp.wgsl"),
    );

    pub const TRACE_STREAMLINES: &str = concat!(
        include_str!("../../shader/field.wgsl"),
        include_str!("../../shader/trace_streamlines.comp.wgsl"),
    );

    pub const SCENE: &str = include_str!("../../shader/scene.wgsl");

    pub const DRAW_PARTICLES: &str = concat!(
        include_str!("../../shader/scene.wgsl"),
        include_str!("../../shader/draw_particles.wgsl"),
    );

    pub const DRAW_STREAMLINES: &str = concat!(
        include_str!("../../shader/scene.wgsl"),
        include_str!("../../shader/draw_streamlines.wgsl"),
    );

    pub const DRAW_LINES: &str = concat!(
        include_str!("../../shader/scene.wgsl"),
        include_str!("../../shader/draw_lines.wgsl"),
    );

    pub const DRAW_ARROWS: &str = concat!(
        include_str!("../../shader/scene.wgsl"),
        include_str!("../../shader/draw_arrows.wgsl"),
    );

    pub const ALL: [(&str, &str); 6] = [
        ("advect_particles", ADVECT_PARTICLES),
        ("trace_streamlines", TRACE_STREAMLINES),
        ("draw_particles", DRAW_PARTICLES),
        ("draw_streamlines", DRAW_STREAMLINES),
        ("draw_lines", DRAW_LINES),
        ("draw_arrows", DRAW_ARROWS),
    ];
}

/// Group 0 of every compute stage: simulation uniforms and the field.
pub(crate) fn field_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("bind_group_layout:field"),
        entries: &[
            // uniforms
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            // field
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}

pub(crate) fn field_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    buffers: &BufferSet,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("bind_group:field"),
        layout,
        entries: &[
            // uniforms
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffers.uniforms,
                    offset: 0,
                    size: None,
                }),
            },
            // field
            wgpu::BindGroupEntry {
                binding: 1,
                resource: buffers.field.as_entire_binding(),
            },
        ],
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn workgroups_cover_large_counts() {
        assert_eq!(workgroup_count(0, 64), 0);
        assert_eq!(workgroup_count(64, 64), 1);
        assert_eq!(workgroup_count(65, 64), 2);
        // Beyond f32 integer precision.
        assert_eq!(workgroup_count((1 << 24) + 1, 1), (1 << 24) + 1);
        assert_eq!(workgroup_count(u32::MAX, 256), 16_777_216);
    }
}
