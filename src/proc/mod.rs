//! Module processing functionality: type resolution, layout and deduplication.

mod layouter;
mod typifier;

pub use layouter::{Alignment, Layouter, TypeLayout};
pub use typifier::{ResolveContext, ResolveError, TypeResolution, Typifier};

use crate::arena::{Arena, Handle};

impl crate::TypeInner {
    /// Returns the scalar kind of this type, if it has one.
    pub fn scalar_kind(&self) -> Option<crate::ScalarKind> {
        match *self {
            Self::Scalar { kind, .. } | Self::Vector { kind, .. } => Some(kind),
            Self::Matrix { .. } => Some(crate::ScalarKind::Float),
            _ => None,
        }
    }

    /// Returns the address space this type points into, if it is a pointer.
    pub fn pointer_space(&self) -> Option<crate::AddressSpace> {
        match *self {
            Self::Pointer { space, .. } => Some(space),
            Self::ValuePointer { space, .. } => Some(space),
            _ => None,
        }
    }
}

impl crate::StorageFormat {
    /// The scalar kind of a texel loaded from an image in this format.
    pub fn scalar_kind(self) -> crate::ScalarKind {
        use crate::{ScalarKind as Sk, StorageFormat as Sf};
        match self {
            Sf::R8Unorm | Sf::R8Snorm | Sf::R16Float | Sf::Rg8Unorm | Sf::Rg8Snorm
            | Sf::R32Float | Sf::Rg16Float | Sf::Rgba8Unorm | Sf::Rgba8Snorm
            | Sf::Rg32Float | Sf::Rgba16Float | Sf::Rgba32Float => Sk::Float,
            Sf::R8Uint | Sf::R16Uint | Sf::Rg8Uint | Sf::R32Uint | Sf::Rg16Uint
            | Sf::Rgba8Uint | Sf::Rg32Uint | Sf::Rgba16Uint | Sf::Rgba32Uint => Sk::Uint,
            Sf::R8Sint | Sf::R16Sint | Sf::Rg8Sint | Sf::R32Sint | Sf::Rg16Sint
            | Sf::Rgba8Sint | Sf::Rg32Sint | Sf::Rgba16Sint | Sf::Rgba32Sint => Sk::Sint,
        }
    }
}

/// Deduplicating registry of module types.
///
/// Structurally equal types share one handle: the registry hashes a canonical
/// byte encoding of the [`TypeInner`](crate::TypeInner) and appends to the
/// arena only on a miss. SPIR-V forbids duplicate type definitions, so all
/// lowering goes through here.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    lookup: crate::FastHashMap<Vec<u8>, Handle<crate::Type>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle of a type structurally equal to `inner`,
    /// registering it if it wasn't seen before.
    ///
    /// The name only applies when the type is newly registered.
    pub fn register(
        &mut self,
        types: &mut Arena<crate::Type>,
        name: Option<String>,
        inner: crate::TypeInner,
    ) -> Handle<crate::Type> {
        use std::collections::hash_map::Entry;
        match self.lookup.entry(type_key(&inner)) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(e) => {
                let handle = types.append(crate::Type { name, inner });
                e.insert(handle);
                handle
            }
        }
    }
}

fn put_u32(key: &mut Vec<u8>, value: u32) {
    key.extend_from_slice(&value.to_le_bytes());
}

fn put_space(key: &mut Vec<u8>, space: crate::AddressSpace) {
    use crate::AddressSpace as As;
    let (tag, access) = match space {
        As::Function => (0, 0),
        As::Private => (1, 0),
        As::WorkGroup => (2, 0),
        As::Uniform => (3, 0),
        As::Storage { access } => (4, access.bits()),
        As::PushConstant => (5, 0),
        As::Handle => (6, 0),
    };
    key.push(tag);
    put_u32(key, access);
}

fn put_binding(key: &mut Vec<u8>, binding: &Option<crate::Binding>) {
    match *binding {
        None => key.push(0),
        Some(crate::Binding::BuiltIn(built_in)) => {
            key.push(1);
            key.push(built_in as u8);
        }
        Some(crate::Binding::Location {
            location,
            interpolation,
        }) => {
            key.push(2);
            put_u32(key, location);
            key.push(match interpolation {
                None => 0,
                Some(crate::Interpolation::Perspective) => 1,
                Some(crate::Interpolation::Linear) => 2,
                Some(crate::Interpolation::Flat) => 3,
            });
        }
    }
}

/// Canonical byte encoding of a type structure, used as the hash key.
fn type_key(inner: &crate::TypeInner) -> Vec<u8> {
    use crate::TypeInner as Ti;
    let mut key = Vec::new();
    match *inner {
        Ti::Scalar { kind, width } => {
            key.push(0);
            key.push(kind as u8);
            key.push(width);
        }
        Ti::Vector { size, kind, width } => {
            key.push(1);
            key.push(size as u8);
            key.push(kind as u8);
            key.push(width);
        }
        Ti::Matrix {
            columns,
            rows,
            width,
        } => {
            key.push(2);
            key.push(columns as u8);
            key.push(rows as u8);
            key.push(width);
        }
        Ti::Atomic { kind, width } => {
            key.push(3);
            key.push(kind as u8);
            key.push(width);
        }
        Ti::Pointer { base, space } => {
            key.push(4);
            put_u32(&mut key, base.index() as u32);
            put_space(&mut key, space);
        }
        Ti::ValuePointer {
            size,
            kind,
            width,
            space,
        } => {
            key.push(5);
            key.push(size.map_or(0, |s| s as u8));
            key.push(kind as u8);
            key.push(width);
            put_space(&mut key, space);
        }
        Ti::Array { base, size, stride } => {
            key.push(6);
            put_u32(&mut key, base.index() as u32);
            match size {
                crate::ArraySize::Constant(value) => {
                    key.push(1);
                    put_u32(&mut key, value);
                }
                crate::ArraySize::Dynamic => key.push(0),
            }
            put_u32(&mut key, stride);
        }
        Ti::Struct { ref members, span } => {
            key.push(7);
            put_u32(&mut key, span);
            for member in members {
                match member.name {
                    Some(ref name) => key.extend_from_slice(name.as_bytes()),
                    None => (),
                }
                key.push(0);
                put_u32(&mut key, member.ty.index() as u32);
                put_u32(&mut key, member.offset);
                put_binding(&mut key, &member.binding);
            }
        }
        Ti::Image {
            dim,
            arrayed,
            class,
        } => {
            key.push(8);
            key.push(dim as u8);
            key.push(arrayed as u8);
            match class {
                crate::ImageClass::Sampled { kind, multi } => {
                    key.push(0);
                    key.push(kind as u8);
                    key.push(multi as u8);
                }
                crate::ImageClass::Depth { multi } => {
                    key.push(1);
                    key.push(multi as u8);
                }
                crate::ImageClass::Storage { format, access } => {
                    key.push(2);
                    key.push(format as u8);
                    put_u32(&mut key, access.bits());
                }
            }
        }
        Ti::Sampler { comparison } => {
            key.push(9);
            key.push(comparison as u8);
        }
    }
    key
}

/// Recomputes the [`expression_types`](crate::Function::expression_types)
/// vector of every function in the module.
///
/// The WGSL front end keeps these up to date itself; this is useful for
/// modules built by hand.
pub fn fill_expression_types(module: &mut crate::Module) -> Result<(), ResolveError> {
    let mut filled = Vec::new();
    for (fun_handle, fun) in module.functions.iter() {
        let mut typifier = Typifier::new();
        let ctx = ResolveContext {
            constants: &module.constants,
            types: &module.types,
            global_vars: &module.global_variables,
            local_vars: &fun.local_variables,
            functions: &module.functions,
            arguments: &fun.arguments,
        };
        for (handle, _) in fun.expressions.iter() {
            typifier.grow(handle, &fun.expressions, &ctx)?;
        }
        filled.push((fun_handle, typifier.into_resolutions()));
    }
    for (fun_handle, resolutions) in filled {
        module.functions.get_mut(fun_handle).expression_types = resolutions;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::TypeRegistry;
    use crate::{Arena, ScalarKind, TypeInner, VectorSize};

    #[test]
    fn registry_deduplicates_structural_matches() {
        let mut types = Arena::new();
        let mut registry = TypeRegistry::new();
        let t1 = registry.register(
            &mut types,
            None,
            TypeInner::Vector {
                size: VectorSize::Quad,
                kind: ScalarKind::Float,
                width: 4,
            },
        );
        let t2 = registry.register(
            &mut types,
            None,
            TypeInner::Vector {
                size: VectorSize::Quad,
                kind: ScalarKind::Float,
                width: 4,
            },
        );
        let t3 = registry.register(
            &mut types,
            None,
            TypeInner::Vector {
                size: VectorSize::Tri,
                kind: ScalarKind::Float,
                width: 4,
            },
        );
        assert_eq!(t1, t2);
        assert_ne!(t1, t3);
        assert_eq!(types.len(), 2);
    }

    #[test]
    fn registry_distinguishes_member_names() {
        let mut types = Arena::new();
        let mut registry = TypeRegistry::new();
        let base = registry.register(
            &mut types,
            None,
            TypeInner::Scalar {
                kind: ScalarKind::Float,
                width: 4,
            },
        );
        let member = |name: &str| crate::StructMember {
            name: Some(name.to_string()),
            ty: base,
            binding: None,
            offset: 0,
        };
        let s1 = registry.register(
            &mut types,
            Some("A".to_string()),
            TypeInner::Struct {
                members: vec![member("x")],
                span: 4,
            },
        );
        let s2 = registry.register(
            &mut types,
            Some("B".to_string()),
            TypeInner::Struct {
                members: vec![member("y")],
                span: 4,
            },
        );
        assert_ne!(s1, s2);
    }
}
