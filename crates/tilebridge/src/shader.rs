//! Shader front-end: compilation diagnostics and entry-point reflection
//!
//! Source text is parsed and validated with naga before any native call is made.
//! Failures are rendered with naga's annotated, line/column-specific output so
//! the caller can show them to a user verbatim.
//!
//! Reflection records which argument-table slots every entry point actually
//! reads, following the slot convention of the bridge:
//!
//! | WGSL declaration            | Slot                    |
//! |-----------------------------|-------------------------|
//! | `@group(0) @binding(n)`     | buffer slot `n`         |
//! | `@group(1) @binding(n)`     | texture slot `n`        |
//! | `@group(2) @binding(n)`     | implicit sampler        |

use std::sync::Arc;

/// Bind group holding buffer slots
pub const BUFFER_GROUP: u32 = 0;
/// Bind group holding texture slots
pub const TEXTURE_GROUP: u32 = 1;
/// Bind group holding implicit samplers
pub const SAMPLER_GROUP: u32 = 2;

/// Pipeline stage of an entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// Resource class of a reflected binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingClass {
    /// Uniform buffer (read-only, small)
    UniformBuffer,
    /// Storage buffer
    StorageBuffer {
        /// Whether the shader may write it
        writable: bool,
    },
    /// Sampled texture
    SampledTexture,
    /// Storage texture
    StorageTexture,
    /// Sampler
    Sampler,
}

impl BindingClass {
    fn expected_group(self) -> u32 {
        match self {
            Self::UniformBuffer | Self::StorageBuffer { .. } => BUFFER_GROUP,
            Self::SampledTexture | Self::StorageTexture => TEXTURE_GROUP,
            Self::Sampler => SAMPLER_GROUP,
        }
    }
}

/// A resource binding an entry point uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReflectedBinding {
    /// Bind group index
    pub group: u32,
    /// Binding index inside the group; equals the argument-table slot
    pub binding: u32,
    /// Resource class
    pub class: BindingClass,
}

/// Slots a pipeline reads, derived from its entry points
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingLayout {
    /// Bindings sorted by group then binding, without duplicates
    pub bindings: Vec<ReflectedBinding>,
}

impl BindingLayout {
    /// Merges the bindings of several entry points (vertex + fragment)
    pub fn merge<'a>(entries: impl IntoIterator<Item = &'a EntryPoint>) -> Self {
        let mut bindings: Vec<ReflectedBinding> = entries.into_iter().flat_map(|entry| entry.bindings.iter().copied()).collect();
        bindings.sort_by_key(|b| (b.group, b.binding));
        bindings.dedup_by_key(|b| (b.group, b.binding));
        Self { bindings }
    }

    /// Buffer slots the pipeline reads
    pub fn buffer_slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.bindings.iter().filter(|b| b.group == BUFFER_GROUP).map(|b| b.binding)
    }

    /// Texture slots the pipeline reads
    pub fn texture_slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.bindings.iter().filter(|b| b.group == TEXTURE_GROUP).map(|b| b.binding)
    }

    /// Bind group indices used, in ascending order
    pub fn groups(&self) -> Vec<u32> {
        let mut groups: Vec<u32> = self.bindings.iter().map(|b| b.group).collect();
        groups.dedup();
        groups
    }

    /// Checks the layout against the slot convention
    ///
    /// # Returns
    /// A description of the first offending binding, if any
    pub fn check_convention(&self) -> Result<(), String> {
        for binding in &self.bindings {
            let expected = binding.class.expected_group();
            if binding.group != expected {
                return Err(format!(
                    "@group({}) @binding({}) holds a {:?} but that resource class must live in group {expected}",
                    binding.group, binding.binding, binding.class
                ));
            }
        }
        Ok(())
    }
}

/// Reflection of one entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Entry point name
    pub name: String,
    /// Pipeline stage
    pub stage: ShaderStage,
    /// Declared workgroup size (compute only, `[0; 3]` otherwise)
    pub workgroup_size: [u32; 3],
    /// Bindings read or written by this entry point
    pub bindings: Vec<ReflectedBinding>,
}

/// A validated shader library
#[derive(Debug)]
pub struct ShaderLibrary {
    source: Arc<str>,
    entry_points: Vec<Arc<EntryPoint>>,
}

impl ShaderLibrary {
    /// Parses and validates WGSL source
    ///
    /// # Arguments
    /// * `source` - WGSL source text
    ///
    /// # Returns
    /// The reflected library, or the compiler's annotated diagnostic on failure
    pub fn compile(source: &str) -> Result<Self, String> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;

        let mut validator = naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all());
        let info = validator.validate(&module).map_err(|e| e.emit_to_string(source))?;

        let entry_points = module
            .entry_points
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let stage = match entry.stage {
                    naga::ShaderStage::Vertex => ShaderStage::Vertex,
                    naga::ShaderStage::Fragment => ShaderStage::Fragment,
                    naga::ShaderStage::Compute => ShaderStage::Compute,
                    #[allow(unreachable_patterns)]
                    _ => return None,
                };
                let function_info = info.get_entry_point(index);
                let bindings = module
                    .global_variables
                    .iter()
                    .filter(|(handle, _)| !function_info[*handle].is_empty())
                    .filter_map(|(_, variable)| reflect_binding(&module, variable))
                    .collect();
                Some(Arc::new(EntryPoint {
                    name: entry.name.clone(),
                    stage,
                    workgroup_size: if stage == ShaderStage::Compute { entry.workgroup_size } else { [0; 3] },
                    bindings,
                }))
            })
            .collect();

        Ok(Self {
            source: Arc::from(source),
            entry_points,
        })
    }

    /// Original source text
    pub fn source(&self) -> &Arc<str> {
        &self.source
    }

    /// Looks up an entry point by name
    pub fn entry_point(&self, name: &str) -> Option<&Arc<EntryPoint>> {
        self.entry_points.iter().find(|entry| entry.name == name)
    }

    /// Names of all entry points, in declaration order
    pub fn function_names(&self) -> Vec<String> {
        self.entry_points.iter().map(|entry| entry.name.clone()).collect()
    }
}

/// Classifies a global variable that carries a resource binding
fn reflect_binding(module: &naga::Module, variable: &naga::GlobalVariable) -> Option<ReflectedBinding> {
    let binding = variable.binding.as_ref()?;
    let class = match variable.space {
        naga::AddressSpace::Uniform => BindingClass::UniformBuffer,
        naga::AddressSpace::Storage { access } => BindingClass::StorageBuffer {
            writable: access.contains(naga::StorageAccess::STORE),
        },
        naga::AddressSpace::Handle => match module.types[variable.ty].inner {
            naga::TypeInner::Image {
                class: naga::ImageClass::Storage { .. },
                ..
            } => BindingClass::StorageTexture,
            naga::TypeInner::Image { .. } => BindingClass::SampledTexture,
            naga::TypeInner::Sampler { .. } => BindingClass::Sampler,
            _ => return None,
        },
        _ => return None,
    };
    Some(ReflectedBinding {
        group: binding.group,
        binding: binding.binding,
        class,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD_ONE: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(16)
fn add_one(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = data[id.x] + 0x01010101u;
    }
}
"#;

    const TEXTURED: &str = r#"
@group(0) @binding(0) var<uniform> tint: vec4<f32>;
@group(1) @binding(0) var image: texture_2d<f32>;
@group(2) @binding(0) var image_sampler: sampler;

@vertex
fn vs(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(index & 1u) * 2.0 - 1.0;
    let y = f32(index >> 1u) * 2.0 - 1.0;
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn fs(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    return textureSample(image, image_sampler, position.xy / 64.0) * tint;
}
"#;

    #[test]
    fn test_compute_entry_point_reflection() {
        let library = ShaderLibrary::compile(ADD_ONE).unwrap();
        assert_eq!(library.function_names(), vec!["add_one".to_string()]);

        let entry = library.entry_point("add_one").unwrap();
        assert_eq!(entry.stage, ShaderStage::Compute);
        assert_eq!(entry.workgroup_size, [16, 1, 1]);
        assert_eq!(
            entry.bindings,
            vec![ReflectedBinding {
                group: 0,
                binding: 0,
                class: BindingClass::StorageBuffer { writable: true },
            }]
        );
        assert!(library.entry_point("missing").is_none());
    }

    #[test]
    fn test_render_layout_merges_stages() {
        let library = ShaderLibrary::compile(TEXTURED).unwrap();
        let vertex = library.entry_point("vs").unwrap();
        let fragment = library.entry_point("fs").unwrap();

        // The vertex stage reads nothing; the fragment stage reads all three
        assert!(vertex.bindings.is_empty());
        let layout = BindingLayout::merge([vertex.as_ref(), fragment.as_ref()]);
        assert_eq!(layout.bindings.len(), 3);
        assert_eq!(layout.buffer_slots().collect::<Vec<_>>(), vec![0]);
        assert_eq!(layout.texture_slots().collect::<Vec<_>>(), vec![0]);
        assert_eq!(layout.groups(), vec![0, 1, 2]);
        assert!(layout.check_convention().is_ok());
    }

    #[test]
    fn test_convention_violation_is_reported() {
        let source = r#"
@group(1) @binding(3) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(1)
fn main() {
    data[0] = 1u;
}
"#;
        let library = ShaderLibrary::compile(source).unwrap();
        let layout = BindingLayout::merge([library.entry_point("main").unwrap().as_ref()]);
        let message = layout.check_convention().unwrap_err();
        assert!(message.contains("@group(1) @binding(3)"), "{message}");
    }

    #[test]
    fn test_syntax_error_has_located_diagnostic() {
        let source = "@compute @workgroup_size(1)\nfn main() {\n    let x = ;\n}\n";
        let diagnostic = ShaderLibrary::compile(source).unwrap_err();
        assert!(!diagnostic.is_empty());
        // naga annotates the offending line
        assert!(diagnostic.contains(":3:"), "{diagnostic}");
    }

    #[test]
    fn test_validation_error_is_reported() {
        // Well-formed syntax, but the return type does not match
        let source = "fn f() -> u32 {\n    return 1.0;\n}\n";
        let diagnostic = ShaderLibrary::compile(source).unwrap_err();
        assert!(!diagnostic.is_empty());
    }
}
