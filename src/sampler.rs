/// Texel filter for both magnification and minification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum Filter {
    #[default]
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum MipmapMode {
    #[default]
    Nearest,
    Linear,
}

/// What texture coordinates outside `[0, 1]` fetch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum SamplerAddressMode {
    Repeat,
    #[default]
    ClampToEdge,
}

/// Sampler parameters. Addressing is the same along every axis.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct SamplerInfo {
    pub filter: Filter,
    pub mipmap_mode: MipmapMode,
    pub address_mode: SamplerAddressMode,

    /// Anisotropic filtering is off when `None`.
    pub max_anisotropy: Option<f32>,
}

impl SamplerInfo {
    /// Material textures tile over primitives with bilinear filtering.
    pub fn linear_repeat() -> Self {
        SamplerInfo {
            filter: Filter::Linear,
            mipmap_mode: MipmapMode::Linear,
            address_mode: SamplerAddressMode::Repeat,
            max_anisotropy: None,
        }
    }
}

/// Handle to a sampler created by a [`Device`](crate::Device).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Sampler {
    index: usize,
}

impl Sampler {
    pub fn new(index: usize) -> Self {
        Sampler { index }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}
