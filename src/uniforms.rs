use rand::{distributions::Uniform, rngs::StdRng, Rng, SeedableRng};

use crate::{
    buffer::{Buffer, BufferInfo, BufferUsage},
    config::RenderConfig,
    device::Device,
    memory::MemoryUsage,
    MapError, OutOfMemory,
};

/// Largest seed value handed to ray generation.
pub const MAX_RANDOM_SEED: u32 = 1919810;

/// Frame uniform block as declared by path tracing shaders.
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct FrameUniforms {
    pub view_inverse: [[f32; 4]; 4],
    pub proj_inverse: [[f32; 4]; 4],

    /// Number of frames accumulated including this one.
    pub frame: u32,
    pub random_seed: u32,
    pub recursive_depth: u32,
    pub sample_dimension: u32,
    pub light_count: u32,
    pub enable_direct_lighting: u32,
    pub _pad: [u32; 2],
}

/// Accumulation counter.
///
/// `Reset` is the state right after startup or camera change.
/// Next frame traced from it is frame 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameCounter {
    Reset,
    Counting(u32),
}

impl Default for FrameCounter {
    fn default() -> Self {
        FrameCounter::Reset
    }
}

impl FrameCounter {
    pub fn value(&self) -> u32 {
        match *self {
            FrameCounter::Reset => 0,
            FrameCounter::Counting(frame) => frame,
        }
    }

    #[must_use]
    pub fn next(&self) -> Self {
        FrameCounter::Counting(self.value().saturating_add(1))
    }
}

/// Host side frame state. Published once per frame.
#[derive(Debug)]
pub struct FrameState {
    view_inverse: glam::Mat4,
    proj_inverse: glam::Mat4,
    counter: FrameCounter,
    random_seed: u32,
    recursive_depth: u32,
    sample_dimension: u32,
    light_count: u32,
    enable_direct_lighting: bool,
    rng: StdRng,
    seeds: Uniform<u32>,
}

impl FrameState {
    pub fn new(config: &RenderConfig, light_count: u32) -> Self {
        Self::with_rng(config, light_count, StdRng::from_entropy())
    }

    /// Same as [`FrameState::new`] with deterministic seed sequence.
    pub fn with_rng(config: &RenderConfig, light_count: u32, rng: StdRng) -> Self {
        FrameState {
            view_inverse: glam::Mat4::IDENTITY,
            proj_inverse: glam::Mat4::IDENTITY,
            counter: FrameCounter::Reset,
            random_seed: 0,
            recursive_depth: config.recursive_depth,
            sample_dimension: config.sample_dimension,
            light_count,
            enable_direct_lighting: config.enable_direct_lighting,
            rng,
            seeds: Uniform::new_inclusive(0, MAX_RANDOM_SEED),
        }
    }

    pub fn frame(&self) -> u32 {
        self.counter.value()
    }

    pub fn counter(&self) -> FrameCounter {
        self.counter
    }

    pub fn random_seed(&self) -> u32 {
        self.random_seed
    }

    /// Discards accumulated samples. Called when camera moves.
    pub fn reset_accumulation(&mut self) {
        tracing::debug!("Accumulation reset at frame {}", self.frame());
        self.counter = FrameCounter::Reset;
    }

    /// Advances state to the next frame.
    ///
    /// Inverts camera matrices, increments counter and draws new seed,
    /// in that order. Returns block to publish.
    pub fn advance(&mut self, view: glam::Mat4, projection: glam::Mat4) -> FrameUniforms {
        self.view_inverse = view.inverse();
        self.proj_inverse = projection.inverse();
        self.counter = self.counter.next();
        self.random_seed = self.rng.sample(self.seeds);
        self.snapshot()
    }

    /// Current state as uniform block.
    pub fn snapshot(&self) -> FrameUniforms {
        FrameUniforms {
            view_inverse: self.view_inverse.to_cols_array_2d(),
            proj_inverse: self.proj_inverse.to_cols_array_2d(),
            frame: self.counter.value(),
            random_seed: self.random_seed,
            recursive_depth: self.recursive_depth,
            sample_dimension: self.sample_dimension,
            light_count: self.light_count,
            enable_direct_lighting: self.enable_direct_lighting as u32,
            _pad: [0; 2],
        }
    }
}

/// Host-visible buffer frame uniforms are published to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformBuffer {
    buffer: Buffer,
}

impl UniformBuffer {
    pub fn new<D>(device: &D) -> Result<Self, OutOfMemory>
    where
        D: Device + ?Sized,
    {
        let buffer = device.create_buffer(
            BufferInfo {
                align: 15,
                size: std::mem::size_of::<FrameUniforms>() as u64,
                usage: BufferUsage::UNIFORM,
            },
            MemoryUsage::UPLOAD,
        )?;

        Ok(UniformBuffer { buffer })
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Uploads whole block in single write.
    pub fn publish<D>(&self, device: &D, uniforms: &FrameUniforms) -> Result<(), MapError>
    where
        D: Device + ?Sized,
    {
        device.write_buffer(&self.buffer, 0, bytemuck::bytes_of(uniforms))
    }

    pub fn destroy<D>(self, device: &D)
    where
        D: Device + ?Sized,
    {
        device.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> FrameState {
        FrameState::with_rng(&RenderConfig::default(), 1, StdRng::seed_from_u64(7))
    }

    #[test]
    fn uniform_block_layout() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 160);
    }

    #[test]
    fn counter_increments_by_one() {
        let mut state = state();
        assert_eq!(state.frame(), 0);

        for expected in 1..=100 {
            let uniforms = state.advance(glam::Mat4::IDENTITY, glam::Mat4::IDENTITY);
            assert_eq!(uniforms.frame, expected);
        }
    }

    #[test]
    fn reset_restarts_from_zero() {
        let mut state = state();
        for _ in 0..10 {
            state.advance(glam::Mat4::IDENTITY, glam::Mat4::IDENTITY);
        }

        state.reset_accumulation();
        assert_eq!(state.counter(), FrameCounter::Reset);
        assert_eq!(state.frame(), 0);

        let uniforms = state.advance(glam::Mat4::IDENTITY, glam::Mat4::IDENTITY);
        assert_eq!(uniforms.frame, 1);
    }

    #[test]
    fn seeds_are_bounded_and_change_every_frame() {
        let mut state = FrameState::new(&RenderConfig::default(), 1);
        let mut previous = None;
        let mut repeats = 0;

        for _ in 0..10_000 {
            let seed = state
                .advance(glam::Mat4::IDENTITY, glam::Mat4::IDENTITY)
                .random_seed;
            assert!(seed <= MAX_RANDOM_SEED);
            if previous == Some(seed) {
                repeats += 1;
            }
            previous = Some(seed);
        }

        // Expected number of repeats is about 0.005.
        assert!(repeats <= 1, "{} consecutive seeds repeated", repeats);
    }

    #[test]
    fn matrices_are_inverted() {
        let mut state = state();
        let view = glam::Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        let projection = glam::Mat4::perspective_rh(1.0, 1.5, 0.1, 100.0);

        let uniforms = state.advance(view, projection);

        let view_inverse = glam::Mat4::from_cols_array_2d(&uniforms.view_inverse);
        assert!(view_inverse.abs_diff_eq(view.inverse(), 1e-6));
        assert!(view_inverse
            .w_axis
            .abs_diff_eq(glam::Vec4::new(-1.0, -2.0, -3.0, 1.0), 1e-6));
        assert_eq!(uniforms.sample_dimension, 2);
        assert_eq!(uniforms.recursive_depth, 10);
        assert_eq!(uniforms.enable_direct_lighting, 1);
    }
}
