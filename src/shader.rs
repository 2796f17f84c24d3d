use {
    crate::OutOfMemory,
    std::fmt::{self, Debug},
};

bitflags::bitflags! {
    /// Ray-tracing stages that see a descriptor binding.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct ShaderStageFlags: u32 {
        const RAYGEN = 0x100;
        const ANY_HIT = 0x200;
        const CLOSEST_HIT = 0x400;
        const MISS = 0x800;
    }
}

/// Compiled program bytes, expected to be SPIR-V.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ShaderModuleInfo {
    pub code: Box<[u8]>,
}

impl Debug for ShaderModuleInfo {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ShaderModuleInfo")
            .field("code", &format_args!("<{} bytes>", self.code.len()))
            .finish()
    }
}

impl ShaderModuleInfo {
    pub fn spirv(bytes: impl Into<Box<[u8]>>) -> Self {
        ShaderModuleInfo { code: bytes.into() }
    }

    /// Reinterprets code as native-endian words,
    /// rejecting anything that cannot be a SPIR-V module.
    pub fn spirv_words(&self) -> Result<Vec<u32>, InvalidShader> {
        if self.code.len() % 4 != 0 {
            return Err(InvalidShader::SizeIsNotMultipleOfFour);
        }

        let words: Vec<u32> = self
            .code
            .chunks_exact(4)
            .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        match words.first() {
            None => Err(InvalidShader::EmptySource),
            Some(&SPIRV_MAGIC) => Ok(words),
            Some(&found) => Err(InvalidShader::WrongMagic { found }),
        }
    }
}

const SPIRV_MAGIC: u32 = 0x07230203;

/// Handle to a shader module created by a [`Device`](crate::Device).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderModule {
    index: usize,
}

impl ShaderModule {
    pub fn new(index: usize) -> Self {
        ShaderModule { index }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Entry point of a module used as one pipeline stage.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shader {
    pub module: ShaderModule,
    pub entry: Box<str>,
    pub stage: ShaderStage,
}

impl Shader {
    /// Programs compiled from GLSL always export `main`.
    pub fn with_main(module: ShaderModule, stage: ShaderStage) -> Self {
        Shader {
            module,
            entry: "main".into(),
            stage,
        }
    }

    pub fn module(&self) -> &ShaderModule {
        &self.module
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }
}

/// Reason program bytes were rejected before reaching the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum InvalidShader {
    #[error("Program is empty")]
    EmptySource,

    #[error("Program length is not a whole number of 32-bit words")]
    SizeIsNotMultipleOfFour,

    #[error("Program does not start with SPIR-V magic number, found 0x{found:08x}")]
    WrongMagic { found: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum CreateShaderModuleError {
    #[error(transparent)]
    OutOfMemoryError {
        #[from]
        source: OutOfMemory,
    },

    #[error("Invalid program: {source}")]
    InvalidShader {
        #[from]
        source: InvalidShader,
    },
}

/// Ray-tracing pipeline stages. Only triangle geometry is traced,
/// so there are no intersection programs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum ShaderStage {
    Raygen,
    AnyHit,
    ClosestHit,
    Miss,
}

impl From<ShaderStage> for ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Raygen => ShaderStageFlags::RAYGEN,
            ShaderStage::AnyHit => ShaderStageFlags::ANY_HIT,
            ShaderStage::ClosestHit => ShaderStageFlags::CLOSEST_HIT,
            ShaderStage::Miss => ShaderStageFlags::MISS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spirv_validation() {
        assert_eq!(
            ShaderModuleInfo::spirv(Vec::new()).spirv_words(),
            Err(InvalidShader::EmptySource)
        );
        assert_eq!(
            ShaderModuleInfo::spirv(vec![3, 2, 35]).spirv_words(),
            Err(InvalidShader::SizeIsNotMultipleOfFour)
        );
        assert_eq!(
            ShaderModuleInfo::spirv(vec![0; 8]).spirv_words(),
            Err(InvalidShader::WrongMagic { found: 0 })
        );

        let mut code = SPIRV_MAGIC.to_ne_bytes().to_vec();
        code.extend_from_slice(&0x10000u32.to_ne_bytes());
        assert_eq!(
            ShaderModuleInfo::spirv(code).spirv_words(),
            Ok(vec![SPIRV_MAGIC, 0x10000])
        );
    }
}
