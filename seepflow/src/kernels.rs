// Host-side mirrors of the WGSL compute kernels.
//
// The functions here follow `shader/field.wgsl`, `shader/advect_particles.comp.wgsl`
// and `shader/trace_streamlines.comp.wgsl` operation for operation. They are
// used to sample the field from the host and to test the numerical behaviour
// without a GPU.

use crate::field::{FieldVertex, GridMapping};
use crate::render::particles::Particle;
use crate::render::streamlines::StreamlinePoint;
use crate::render::uniforms::SimulationUniforms;
use crate::settings::Bounds;

use glam::{IVec3, Vec3};

pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747796405).wrapping_add(2891336453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277803737);
    (word >> 22) ^ word
}

/// A stream of pseudo-random numbers derived from a particle index and the
/// animation time. Identical inputs give identical streams.
#[derive(Copy, Clone, Debug)]
pub struct HashRandom {
    state: u32,
}

impl HashRandom {
    pub fn for_particle(index: u32, time: f32, seed: u32) -> Self {
        Self {
            state: pcg_hash(index ^ pcg_hash(time.to_bits() ^ seed)),
        }
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        self.state = pcg_hash(self.state);
        (self.state >> 8) as f32 / 16_777_216.0
    }
}

/// Trilinear velocity lookup over the regular grid implied by a field buffer.
pub struct FieldSampler<'a> {
    vertices: &'a [FieldVertex],
    mapping: GridMapping,
}

impl<'a> FieldSampler<'a> {
    pub fn new(vertices: &'a [FieldVertex], mapping: GridMapping) -> Self {
        Self { vertices, mapping }
    }

    pub fn mapping(&self) -> &GridMapping {
        &self.mapping
    }

    fn fetch(&self, cell: IVec3) -> Vec3 {
        let dims = self.mapping.dims.as_ivec3();
        if cell.cmplt(IVec3::ZERO).any() || cell.cmpge(dims).any() {
            return Vec3::ZERO;
        }

        let index = cell.x as usize
            + cell.y as usize * dims.x as usize
            + cell.z as usize * dims.x as usize * dims.y as usize;

        self.vertices
            .get(index)
            .map(FieldVertex::velocity)
            .unwrap_or(Vec3::ZERO)
    }

    pub fn velocity_at(&self, position: Vec3) -> Vec3 {
        let grid = self.mapping.to_grid(position);
        let base = grid.floor();
        let f = grid - base;
        let i = base.as_ivec3();

        let c000 = self.fetch(i);
        let c100 = self.fetch(i + IVec3::new(1, 0, 0));
        let c010 = self.fetch(i + IVec3::new(0, 1, 0));
        let c110 = self.fetch(i + IVec3::new(1, 1, 0));
        let c001 = self.fetch(i + IVec3::new(0, 0, 1));
        let c101 = self.fetch(i + IVec3::new(1, 0, 1));
        let c011 = self.fetch(i + IVec3::new(0, 1, 1));
        let c111 = self.fetch(i + IVec3::new(1, 1, 1));

        let c00 = c000.lerp(c100, f.x);
        let c10 = c010.lerp(c110, f.x);
        let c01 = c001.lerp(c101, f.x);
        let c11 = c011.lerp(c111, f.x);
        let c0 = c00.lerp(c10, f.y);
        let c1 = c01.lerp(c11, f.y);
        c0.lerp(c1, f.z)
    }
}

pub fn rk4_step<F>(velocity: F, position: Vec3, h: f32) -> Vec3
where
    F: Fn(Vec3) -> Vec3,
{
    let k1 = velocity(position);
    let k2 = velocity(position + 0.5 * h * k1);
    let k3 = velocity(position + 0.5 * h * k2);
    let k4 = velocity(position + h * k3);
    position + (h / 6.0) * (k1 + 2.0 * k2 + 2.0 * k3 + k4)
}

/// Integrate one polyline in place. Slot 0 holds the seed. Returns the number
/// of points written after the seed; the remaining slots are left untouched.
pub fn trace_streamline<F>(velocity: F, line: &mut [StreamlinePoint], h: f32, bounds: &Bounds) -> usize
where
    F: Fn(Vec3) -> Vec3,
{
    let Some(seed) = line.first() else {
        return 0;
    };

    let mut position = Vec3::from(seed.position);
    if !bounds.contains(position) {
        return 0;
    }
    line[0].speed = velocity(position).length();

    let mut written = 0;
    for slot in line.iter_mut().skip(1) {
        position = rk4_step(&velocity, position, h);
        if !bounds.contains(position) {
            break;
        }

        *slot = StreamlinePoint::new(position, velocity(position).length());
        written += 1;
    }

    written
}

pub fn turbulence(time: f32, position: Vec3) -> Vec3 {
    Vec3::new(
        (position.y * 0.7 + time * 1.3).sin(),
        (position.z * 0.9 + time * 0.7).cos(),
        0.5 * (position.x * 1.1 - time).sin(),
    )
}

fn particle_color(speed: f32, age: f32, life: f32, index: u32, u: &SimulationUniforms) -> [f32; 3] {
    let speed_ratio = (speed / u.max_velocity).clamp(0.0, 1.0);
    let age_ratio = if life > 0.0 { age / life } else { 1.0 };
    let oscillation = 0.5 + 0.5 * (u.time * 2.0 + index as f32 * 0.1).sin();
    [
        speed_ratio,
        (1.0 - age_ratio).clamp(0.0, 1.0),
        oscillation.clamp(0.0, 1.0),
    ]
}

/// Reinitialise a dead particle inside the grid domain.
pub fn respawn_particle(
    particle: &mut Particle,
    index: u32,
    u: &SimulationUniforms,
    sampler: &FieldSampler,
) {
    let mut random = HashRandom::for_particle(index, u.time, u.seed);
    let domain_min = Vec3::from(u.domain_min);
    let domain_max = Vec3::from(u.domain_max);
    let t = Vec3::new(random.next_f32(), random.next_f32(), random.next_f32());

    let position = domain_min + (domain_max - domain_min) * t;
    let life = u.life_min + (u.life_max - u.life_min) * random.next_f32();
    let size = u.size_min + (u.size_max - u.size_min) * random.next_f32();
    let velocity = sampler.velocity_at(position);

    *particle = Particle {
        position: position.to_array(),
        age: 0.0,
        velocity: velocity.to_array(),
        life,
        color: particle_color(velocity.length(), 0.0, life, index, u),
        size,
    };
}

/// One simulation step for one particle.
pub fn advance_particle(
    particle: &mut Particle,
    index: u32,
    u: &SimulationUniforms,
    sampler: &FieldSampler,
) {
    if particle.age >= particle.life {
        respawn_particle(particle, index, u, sampler);
        return;
    }

    let dt = u.delta_time;
    let position = Vec3::from(particle.position);

    let mut velocity = sampler.velocity_at(position)
        + Vec3::new(0.0, 0.0, -u.gravity_strength) * dt
        + turbulence(u.time, position) * u.turbulence_strength;

    let speed = velocity.length();
    if speed > u.max_velocity {
        velocity *= u.max_velocity / speed;
    }

    let age = (particle.age + dt).min(particle.life);

    particle.position = (position + velocity * dt).to_array();
    particle.velocity = velocity.to_array();
    particle.age = age;
    particle.color = particle_color(velocity.length(), age, particle.life, index, u);
}
