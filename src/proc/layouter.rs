use crate::arena::{Arena, Handle};

use std::{num::NonZeroU32, ops};

/// A power-of-two alignment, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Alignment(NonZeroU32);

impl Alignment {
    pub const ONE: Self = Self(unsafe { NonZeroU32::new_unchecked(1) });

    pub fn new(n: u32) -> Option<Self> {
        if n.is_power_of_two() {
            NonZeroU32::new(n).map(Self)
        } else {
            None
        }
    }

    /// The alignment of a scalar of the given byte width.
    pub fn from_width(width: crate::Bytes) -> Self {
        Self(unsafe { NonZeroU32::new_unchecked(width.max(1) as u32) })
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Returns the smallest multiple of `self` that is no less than `n`.
    pub fn round_up(self, n: u32) -> u32 {
        let mask = self.0.get() - 1;
        (n + mask) & !mask
    }

    pub fn is_aligned(self, n: u32) -> bool {
        n & (self.0.get() - 1) == 0
    }
}

impl ops::Mul for Alignment {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self(unsafe { NonZeroU32::new_unchecked(self.0.get() * rhs.0.get()) })
    }
}

/// Size and alignment of a type, following WGSL's storage layout rules.
#[derive(Clone, Copy, Debug)]
pub struct TypeLayout {
    pub size: u32,
    pub alignment: Alignment,
}

impl TypeLayout {
    /// The distance between consecutive elements of this type in an array.
    pub fn to_stride(&self) -> u32 {
        self.alignment.round_up(self.size)
    }
}

/// Computed layouts of every type in a module, parallel to the type arena.
#[derive(Debug, Default)]
pub struct Layouter {
    layouts: Vec<TypeLayout>,
}

impl ops::Index<Handle<crate::Type>> for Layouter {
    type Output = TypeLayout;
    fn index(&self, handle: Handle<crate::Type>) -> &TypeLayout {
        &self.layouts[handle.index()]
    }
}

fn vector_alignment(size: crate::VectorSize, width: crate::Bytes) -> Alignment {
    let count = match size {
        crate::VectorSize::Bi => 2,
        // vec3 is aligned like vec4
        crate::VectorSize::Tri | crate::VectorSize::Quad => 4,
    };
    Alignment(unsafe { NonZeroU32::new_unchecked(count * width.max(1) as u32) })
}

impl Layouter {
    pub fn clear(&mut self) {
        self.layouts.clear();
    }

    /// Extends the computed layouts to cover all types in the arena.
    ///
    /// Bases of compound types always precede them in the arena, so a single
    /// in-order pass suffices.
    pub fn update(&mut self, types: &Arena<crate::Type>) {
        use crate::TypeInner as Ti;
        for (_, ty) in types.iter().skip(self.layouts.len()) {
            let layout = match ty.inner {
                Ti::Scalar { width, .. } | Ti::Atomic { width, .. } => TypeLayout {
                    size: width as u32,
                    alignment: Alignment::from_width(width),
                },
                Ti::Vector { size, width, .. } => TypeLayout {
                    size: size as u32 * width as u32,
                    alignment: vector_alignment(size, width),
                },
                Ti::Matrix {
                    columns,
                    rows,
                    width,
                } => {
                    let alignment = vector_alignment(rows, width);
                    let col_stride = alignment.round_up(rows as u32 * width as u32);
                    TypeLayout {
                        size: columns as u32 * col_stride,
                        alignment,
                    }
                }
                Ti::Array { base, size, stride } => TypeLayout {
                    size: match size {
                        crate::ArraySize::Constant(count) => count.max(1) * stride,
                        crate::ArraySize::Dynamic => stride,
                    },
                    alignment: self.layouts[base.index()].alignment,
                },
                Ti::Struct { ref members, span } => {
                    let mut alignment = Alignment::ONE;
                    for member in members {
                        alignment = alignment.max(self.layouts[member.ty.index()].alignment);
                    }
                    TypeLayout {
                        size: span,
                        alignment,
                    }
                }
                // Never present in a buffer; the values don't matter much.
                Ti::Pointer { .. }
                | Ti::ValuePointer { .. }
                | Ti::Image { .. }
                | Ti::Sampler { .. } => TypeLayout {
                    size: 4,
                    alignment: Alignment::ONE,
                },
            };
            self.layouts.push(layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Alignment, Layouter};
    use crate::{Arena, ScalarKind, Type, TypeInner, VectorSize};

    #[test]
    fn round_up() {
        let four = Alignment::new(4).unwrap();
        assert_eq!(four.round_up(0), 0);
        assert_eq!(four.round_up(3), 4);
        assert_eq!(four.round_up(4), 4);
        assert_eq!(four.round_up(5), 8);
    }

    #[test]
    fn vec3_is_aligned_like_vec4() {
        let mut types = Arena::new();
        let v3 = types.append(Type {
            name: None,
            inner: TypeInner::Vector {
                size: VectorSize::Tri,
                kind: ScalarKind::Float,
                width: 4,
            },
        });
        let mut layouter = Layouter::default();
        layouter.update(&types);
        assert_eq!(layouter[v3].size, 12);
        assert_eq!(layouter[v3].alignment.get(), 16);
        assert_eq!(layouter[v3].to_stride(), 16);
    }
}
