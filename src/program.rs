use crate::{
    descriptor::DescriptorSetLayout,
    device::Device,
    error::PipelineError,
    pipeline::{
        PipelineLayout, PipelineLayoutInfo, RayTracingPipeline, RayTracingPipelineInfo,
        RayTracingShaderGroupInfo,
    },
    shader::{Shader, ShaderModule, ShaderModuleInfo, ShaderStage},
};

/// Hardware recursion depth of the path tracing pipeline.
/// Primary ray plus one shadow ray traced from closest-hit.
/// Bounces are iterated inside ray generation.
pub const MAX_PIPELINE_RECURSION_DEPTH: u32 = 2;

/// Named shader group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupName {
    Raygen,
    PrimaryMiss,
    ShadowMiss,
    PrimaryHit,
    ShadowHit,
}

/// Kind of group determines the binding table region its record goes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderGroup {
    /// Single raygen or miss shader.
    General { stage: ShaderStage, shader: u32 },

    /// Triangle hit group.
    HitGroup {
        closest_hit: u32,
        any_hit: Option<u32>,
    },
}

impl ShaderGroup {
    pub fn info(&self) -> RayTracingShaderGroupInfo {
        match *self {
            ShaderGroup::General {
                stage: ShaderStage::Raygen,
                shader,
            } => RayTracingShaderGroupInfo::Raygen { raygen: shader },
            ShaderGroup::General { shader, .. } => RayTracingShaderGroupInfo::Miss { miss: shader },
            ShaderGroup::HitGroup {
                closest_hit,
                any_hit,
            } => RayTracingShaderGroupInfo::Triangles {
                any_hit,
                closest_hit: Some(closest_hit),
            },
        }
    }
}

/// Ordered list of shader groups.
///
/// Position in the list is the group index used for handle retrieval.
/// Within each kind, order matches miss and hit indices used by shaders.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderGroups {
    groups: Vec<(GroupName, ShaderGroup)>,
}

impl ShaderGroups {
    /// Indices of shaders in [`PathTracingPrograms::shaders`].
    const RAYGEN: u32 = 0;
    const MISS: u32 = 1;
    const SHADOW_MISS: u32 = 2;
    const CLOSEST_HIT: u32 = 3;
    const ANY_HIT: u32 = 4;
    const SHADOW_CLOSEST_HIT: u32 = 5;

    pub fn new() -> Self {
        ShaderGroups::default()
    }

    /// Raygen, primary miss, shadow miss, primary hit and shadow hit groups.
    pub fn path_tracing() -> Self {
        let mut groups = ShaderGroups::new();
        groups.push(
            GroupName::Raygen,
            ShaderGroup::General {
                stage: ShaderStage::Raygen,
                shader: Self::RAYGEN,
            },
        );
        groups.push(
            GroupName::PrimaryMiss,
            ShaderGroup::General {
                stage: ShaderStage::Miss,
                shader: Self::MISS,
            },
        );
        groups.push(
            GroupName::ShadowMiss,
            ShaderGroup::General {
                stage: ShaderStage::Miss,
                shader: Self::SHADOW_MISS,
            },
        );
        groups.push(
            GroupName::PrimaryHit,
            ShaderGroup::HitGroup {
                closest_hit: Self::CLOSEST_HIT,
                any_hit: Some(Self::ANY_HIT),
            },
        );
        groups.push(
            GroupName::ShadowHit,
            ShaderGroup::HitGroup {
                closest_hit: Self::SHADOW_CLOSEST_HIT,
                any_hit: Some(Self::ANY_HIT),
            },
        );
        groups
    }

    /// Appends group and returns its index.
    pub fn push(&mut self, name: GroupName, group: ShaderGroup) -> u32 {
        assert!(
            self.index(name).is_none(),
            "Group {:?} declared twice",
            name
        );
        self.groups.push((name, group));
        self.groups.len() as u32 - 1
    }

    pub fn index(&self, name: GroupName) -> Option<u32> {
        self.groups
            .iter()
            .position(|(n, _)| *n == name)
            .map(|index| index as u32)
    }

    pub fn get(&self, name: GroupName) -> Option<&ShaderGroup> {
        self.groups.iter().find(|(n, _)| *n == name).map(|(_, g)| g)
    }

    pub fn len(&self) -> u32 {
        self.groups.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group indices of ray generation groups in declaration order.
    pub fn raygen(&self) -> Vec<u32> {
        self.filter(|group| {
            matches!(
                group,
                ShaderGroup::General {
                    stage: ShaderStage::Raygen,
                    ..
                }
            )
        })
    }

    /// Group indices of miss groups in declaration order.
    pub fn miss(&self) -> Vec<u32> {
        self.filter(|group| {
            matches!(
                group,
                ShaderGroup::General {
                    stage: ShaderStage::Miss,
                    ..
                }
            )
        })
    }

    /// Group indices of hit groups in declaration order.
    pub fn hit(&self) -> Vec<u32> {
        self.filter(|group| matches!(group, ShaderGroup::HitGroup { .. }))
    }

    pub fn infos(&self) -> Vec<RayTracingShaderGroupInfo> {
        self.groups.iter().map(|(_, group)| group.info()).collect()
    }

    fn filter(&self, f: impl Fn(&ShaderGroup) -> bool) -> Vec<u32> {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, (_, group))| f(group))
            .map(|(index, _)| index as u32)
            .collect()
    }
}

/// SPIR-V code of path tracing programs.
#[derive(Clone, Debug)]
pub struct PathTracingPrograms {
    pub raygen: ShaderModuleInfo,
    pub miss: ShaderModuleInfo,
    pub shadow_miss: ShaderModuleInfo,
    pub closest_hit: ShaderModuleInfo,
    pub any_hit: ShaderModuleInfo,
    pub shadow_closest_hit: ShaderModuleInfo,
}

impl PathTracingPrograms {
    /// Shader sources with stages, indexed as [`ShaderGroups::path_tracing`] expects.
    pub fn shaders(&self) -> [(&ShaderModuleInfo, ShaderStage); 6] {
        [
            (&self.raygen, ShaderStage::Raygen),
            (&self.miss, ShaderStage::Miss),
            (&self.shadow_miss, ShaderStage::Miss),
            (&self.closest_hit, ShaderStage::ClosestHit),
            (&self.any_hit, ShaderStage::AnyHit),
            (&self.shadow_closest_hit, ShaderStage::ClosestHit),
        ]
    }
}

/// Compiled pipeline with layout and group list it was built from.
#[derive(Clone, Debug, PartialEq)]
pub struct RayTracingProgram {
    pub pipeline: RayTracingPipeline,
    pub layout: PipelineLayout,
    pub groups: ShaderGroups,
}

impl RayTracingProgram {
    pub fn destroy<D>(self, device: &D)
    where
        D: Device + ?Sized,
    {
        device.destroy_ray_tracing_pipeline(self.pipeline);
        device.destroy_pipeline_layout(self.layout);
    }
}

/// Compiles path tracing pipeline using `set_layout` as the only descriptor set.
#[tracing::instrument(skip_all)]
pub fn compile_pipeline<D>(
    device: &D,
    programs: &PathTracingPrograms,
    set_layout: &DescriptorSetLayout,
) -> Result<RayTracingProgram, PipelineError>
where
    D: Device + ?Sized,
{
    let supported = device.properties().max_ray_recursion_depth;
    if supported < MAX_PIPELINE_RECURSION_DEPTH {
        return Err(PipelineError::RecursionDepth {
            requested: MAX_PIPELINE_RECURSION_DEPTH,
            supported,
        });
    }

    let mut modules: Vec<ShaderModule> = Vec::new();
    let result = create_modules(device, programs, &mut modules)
        .and_then(|shaders| compile_with_shaders(device, shaders, set_layout));

    // Pipeline keeps compiled code. Modules are not needed anymore.
    for module in modules {
        device.destroy_shader_module(module);
    }

    result
}

fn create_modules<D>(
    device: &D,
    programs: &PathTracingPrograms,
    modules: &mut Vec<ShaderModule>,
) -> Result<Vec<Shader>, PipelineError>
where
    D: Device + ?Sized,
{
    let mut shaders = Vec::new();
    for (info, stage) in programs.shaders() {
        let module = device
            .create_shader_module(info.clone())
            .map_err(|source| PipelineError::ShaderModule { stage, source })?;
        modules.push(module.clone());
        shaders.push(Shader::with_main(module, stage));
    }
    Ok(shaders)
}

fn compile_with_shaders<D>(
    device: &D,
    shaders: Vec<Shader>,
    set_layout: &DescriptorSetLayout,
) -> Result<RayTracingProgram, PipelineError>
where
    D: Device + ?Sized,
{
    let layout = device
        .create_pipeline_layout(PipelineLayoutInfo {
            sets: vec![set_layout.clone()],
            push_constants: Vec::new(),
        })
        .map_err(|source| PipelineError::Layout { source })?;

    let groups = ShaderGroups::path_tracing();

    let result = device.create_ray_tracing_pipeline(RayTracingPipelineInfo {
        shaders,
        groups: groups.infos(),
        max_recursion_depth: MAX_PIPELINE_RECURSION_DEPTH,
        layout: layout.clone(),
    });

    match result {
        Ok(pipeline) => {
            tracing::info!(
                "Ray tracing pipeline compiled with {} groups",
                groups.len()
            );
            Ok(RayTracingProgram {
                pipeline,
                layout,
                groups,
            })
        }
        Err(source) => {
            device.destroy_pipeline_layout(layout);
            Err(PipelineError::Compile {
                group_count: groups.len(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_tracing_groups_are_ordered() {
        let groups = ShaderGroups::path_tracing();

        assert_eq!(groups.len(), 5);
        assert_eq!(groups.index(GroupName::Raygen), Some(0));
        assert_eq!(groups.index(GroupName::PrimaryMiss), Some(1));
        assert_eq!(groups.index(GroupName::ShadowMiss), Some(2));
        assert_eq!(groups.index(GroupName::PrimaryHit), Some(3));
        assert_eq!(groups.index(GroupName::ShadowHit), Some(4));

        assert_eq!(groups.raygen(), [0]);
        assert_eq!(groups.miss(), [1, 2]);
        assert_eq!(groups.hit(), [3, 4]);
    }

    #[test]
    fn hit_groups_share_any_hit() {
        let groups = ShaderGroups::path_tracing();
        let infos = groups.infos();

        assert_eq!(
            infos[3],
            RayTracingShaderGroupInfo::Triangles {
                any_hit: Some(4),
                closest_hit: Some(3),
            }
        );
        assert_eq!(
            infos[4],
            RayTracingShaderGroupInfo::Triangles {
                any_hit: Some(4),
                closest_hit: Some(5),
            }
        );
        assert_eq!(infos[2], RayTracingShaderGroupInfo::Miss { miss: 2 });
    }

    #[test]
    #[should_panic]
    fn duplicate_group_names_are_rejected() {
        let mut groups = ShaderGroups::path_tracing();
        groups.push(
            GroupName::Raygen,
            ShaderGroup::General {
                stage: ShaderStage::Raygen,
                shader: 0,
            },
        );
    }
}
