//! Uniform values and their resolution against a program's declared layout.
//!
//! Resolution is split in two so that a compute pass never mutates its target
//! while reading its inputs: [`UniformLayout::plan`] validates and packs the
//! supplied values without touching any GPU state, and the target performs at
//! most one surface swap afterwards, based only on whether the plan references
//! it.

use std::fmt;

use super::program::ProgramError;
use super::target::ComputeTarget;

/// Binding of the packed numeric parameter block.
pub const PARAMS_BINDING: u32 = 0;
/// Binding of the shared nearest/clamp sampler.
pub const SAMPLER_BINDING: u32 = 1;
/// Binding of the first texture uniform; later ones follow in declaration order.
pub const FIRST_TEXTURE_BINDING: u32 = 2;

/// Every numeric uniform occupies one 16-byte slot of the parameter block.
pub const SLOT_BYTES: usize = 16;
const MAX_COMPONENTS: u32 = 4;

/// Errors raised while resolving uniforms for a pass.
#[derive(Debug, thiserror::Error)]
pub enum UniformError {
    #[error("Uniform '{name}' expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: UniformKind,
        found: &'static str,
    },
    #[error("Texture uniform '{0}' has no target bound")]
    UnboundTexture(String),
}

/// A value supplied for one named uniform.
#[derive(Debug, Clone)]
pub enum Uniform<'a> {
    /// Another compute target (or the one being drawn) read as a texture.
    Target(&'a ComputeTarget),
    IntVector(Vec<i32>),
    FloatVector(Vec<f32>),
    /// A plain number, converted to the declared numeric kind.
    Scalar(f64),
}

impl Uniform<'_> {
    fn kind_name(&self) -> &'static str {
        match self {
            Uniform::Target(_) => "a compute target",
            Uniform::IntVector(_) => "an int vector",
            Uniform::FloatVector(_) => "a float vector",
            Uniform::Scalar(_) => "a scalar",
        }
    }
}

/// Named uniform values for one pass.
///
/// Names the program does not declare are ignored.
#[derive(Debug, Clone, Default)]
pub struct Uniforms<'a> {
    entries: Vec<(String, Uniform<'a>)>,
}

impl<'a> Uniforms<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a uniform, replacing any earlier value with the same name.
    pub fn set(mut self, name: impl Into<String>, value: Uniform<'a>) -> Self {
        self.insert(name.into(), value);
        self
    }

    pub fn target(self, name: impl Into<String>, target: &'a ComputeTarget) -> Self {
        self.set(name, Uniform::Target(target))
    }

    pub fn int(self, name: impl Into<String>, values: impl Into<Vec<i32>>) -> Self {
        self.set(name, Uniform::IntVector(values.into()))
    }

    pub fn float(self, name: impl Into<String>, values: impl Into<Vec<f32>>) -> Self {
        self.set(name, Uniform::FloatVector(values.into()))
    }

    pub fn scalar(self, name: impl Into<String>, value: f64) -> Self {
        self.set(name, Uniform::Scalar(value))
    }

    pub fn get(&self, name: &str) -> Option<&Uniform<'a>> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Uniform<'a>)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, name: String, value: Uniform<'a>) {
        match self.entries.iter_mut().find(|(entry, _)| *entry == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }
}

impl<'a, S: Into<String>> FromIterator<(S, Uniform<'a>)> for Uniforms<'a> {
    fn from_iter<I: IntoIterator<Item = (S, Uniform<'a>)>>(iter: I) -> Self {
        let mut uniforms = Uniforms::new();
        for (name, value) in iter {
            uniforms.insert(name.into(), value);
        }
        uniforms
    }
}

/// The declared type of a program uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Texture,
    /// `f32` or `vecN<f32>` with the given component count.
    Float(u32),
    /// `i32` or `vecN<i32>` with the given component count.
    Int(u32),
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniformKind::Texture => write!(f, "a compute target"),
            UniformKind::Float(1) => write!(f, "f32"),
            UniformKind::Float(n) => write!(f, "vec{}<f32>", n),
            UniformKind::Int(1) => write!(f, "i32"),
            UniformKind::Int(n) => write!(f, "vec{}<i32>", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Params { offset: usize },
    Texture { binding: u32 },
}

#[derive(Debug, Clone)]
struct UniformDecl {
    name: String,
    kind: UniformKind,
    slot: Slot,
}

/// Uniforms a program declares, with their binding slots assigned.
#[derive(Debug, Clone)]
pub struct UniformLayout {
    decls: Vec<UniformDecl>,
    params_len: usize,
    texture_count: u32,
}

impl UniformLayout {
    /// Assign slots to the declared uniforms, in order.
    pub fn new<S: Into<String>>(
        decls: impl IntoIterator<Item = (S, UniformKind)>,
    ) -> Result<Self, ProgramError> {
        let mut layout = Self {
            decls: Vec::new(),
            params_len: 0,
            texture_count: 0,
        };

        for (name, kind) in decls {
            let name = name.into();
            if layout.declares(&name) {
                return Err(ProgramError::DuplicateUniform(name));
            }

            let slot = match kind {
                UniformKind::Texture => {
                    let binding = FIRST_TEXTURE_BINDING + layout.texture_count;
                    layout.texture_count += 1;
                    Slot::Texture { binding }
                }
                UniformKind::Float(components) | UniformKind::Int(components) => {
                    if !(1..=MAX_COMPONENTS).contains(&components) {
                        return Err(ProgramError::InvalidComponents { name, components });
                    }
                    let offset = layout.params_len;
                    layout.params_len += SLOT_BYTES;
                    Slot::Params { offset }
                }
            };

            layout.decls.push(UniformDecl { name, kind, slot });
        }

        Ok(layout)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.decls.iter().any(|decl| decl.name == name)
    }

    pub fn kind_of(&self, name: &str) -> Option<UniformKind> {
        self.decls
            .iter()
            .find(|decl| decl.name == name)
            .map(|decl| decl.kind)
    }

    /// Size in bytes of the packed parameter block.
    pub fn params_len(&self) -> usize {
        self.params_len
    }

    pub fn texture_count(&self) -> u32 {
        self.texture_count
    }

    /// Validate `uniforms` and pack them for this layout.
    ///
    /// Performs no GPU work. Missing numeric uniforms read as zero; a missing
    /// texture uniform is an error.
    pub fn plan<'a>(&self, uniforms: &Uniforms<'a>) -> Result<UniformPlan<'a>, UniformError> {
        for (name, _) in uniforms.iter() {
            if !self.declares(name) {
                log::trace!("Dropping uniform '{}': not declared by program", name);
            }
        }

        let mut params = vec![0u8; self.params_len];
        let mut textures = Vec::with_capacity(self.texture_count as usize);

        for decl in &self.decls {
            match (decl.slot, uniforms.get(&decl.name)) {
                (Slot::Texture { binding }, Some(Uniform::Target(target))) => {
                    textures.push(TextureBinding {
                        binding,
                        target: *target,
                    });
                }
                (Slot::Texture { .. }, None) => {
                    return Err(UniformError::UnboundTexture(decl.name.clone()));
                }
                (Slot::Params { .. }, None) => {}
                (Slot::Params { offset }, Some(value)) => {
                    pack_numeric(decl, value, &mut params[offset..offset + SLOT_BYTES])?;
                }
                (Slot::Texture { .. }, Some(value)) => {
                    return Err(mismatch(decl, value));
                }
            }
        }

        Ok(UniformPlan { params, textures })
    }
}

fn pack_numeric(decl: &UniformDecl, value: &Uniform<'_>, slot: &mut [u8]) -> Result<(), UniformError> {
    let scalar_f32;
    let scalar_i32;
    let bytes: &[u8] = match (decl.kind, value) {
        (UniformKind::Float(n), Uniform::FloatVector(values)) if values.len() <= n as usize => {
            bytemuck::cast_slice(values)
        }
        (UniformKind::Int(n), Uniform::IntVector(values)) if values.len() <= n as usize => {
            bytemuck::cast_slice(values)
        }
        (UniformKind::Float(_), Uniform::Scalar(value)) => {
            scalar_f32 = *value as f32;
            bytemuck::bytes_of(&scalar_f32)
        }
        (UniformKind::Int(_), Uniform::Scalar(value)) => {
            scalar_i32 = *value as i32;
            bytemuck::bytes_of(&scalar_i32)
        }
        _ => return Err(mismatch(decl, value)),
    };
    slot[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn mismatch(decl: &UniformDecl, value: &Uniform<'_>) -> UniformError {
    UniformError::TypeMismatch {
        name: decl.name.clone(),
        expected: decl.kind,
        found: value.kind_name(),
    }
}

/// A texture uniform resolved to the target it reads.
#[derive(Debug, Clone, Copy)]
pub struct TextureBinding<'a> {
    pub binding: u32,
    pub target: &'a ComputeTarget,
}

impl TextureBinding<'_> {
    /// Whether this binding reads `target` itself.
    pub fn reads(&self, target: &ComputeTarget) -> bool {
        std::ptr::eq(self.target, target)
    }
}

/// Validated uniforms, ready to be bound once texture views are known.
#[derive(Debug)]
pub struct UniformPlan<'a> {
    params: Vec<u8>,
    textures: Vec<TextureBinding<'a>>,
}

impl<'a> UniformPlan<'a> {
    /// Packed numeric parameter block.
    pub fn params(&self) -> &[u8] {
        &self.params
    }

    pub fn textures(&self) -> &[TextureBinding<'a>] {
        &self.textures
    }

    /// Whether any texture uniform reads `target`, i.e. the pass is a feedback pass.
    pub fn references(&self, target: &ComputeTarget) -> bool {
        self.textures.iter().any(|binding| binding.reads(target))
    }
}
