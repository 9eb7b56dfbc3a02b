use crate::arena::{Arena, Handle};

use thiserror::Error;

/// The result of computing an expression's type.
///
/// Swizzles, arithmetic and the like produce types that were never registered
/// in the module's arena, so a resolution is either a [`Handle`] into the
/// arena or an inline [`TypeInner`](crate::TypeInner) value.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub enum TypeResolution {
    /// A type registered in the module's type arena.
    Handle(Handle<crate::Type>),
    /// An inline value, not necessarily registered.
    Value(crate::TypeInner),
}

impl TypeResolution {
    pub fn handle(&self) -> Option<Handle<crate::Type>> {
        match *self {
            Self::Handle(handle) => Some(handle),
            Self::Value(_) => None,
        }
    }

    pub fn inner_with<'a>(&'a self, arena: &'a Arena<crate::Type>) -> &'a crate::TypeInner {
        match *self {
            Self::Handle(handle) => &arena[handle].inner,
            Self::Value(ref inner) => inner,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("index into expression {0:?} is invalid for its type")]
    InvalidAccess(Handle<crate::Expression>),
    #[error("index {index} is out of bounds for expression {expr:?}")]
    OutOfBoundsIndex {
        expr: Handle<crate::Expression>,
        index: u32,
    },
    #[error("expression {0:?} is not a pointer")]
    InvalidPointer(Handle<crate::Expression>),
    #[error("expression {0:?} is not an image")]
    InvalidImage(Handle<crate::Expression>),
    #[error("expression {0:?} is not a scalar or vector")]
    InvalidCast(Handle<crate::Expression>),
    #[error("referenced {kind} handle is out of range")]
    HandleOutOfRange { kind: &'static str },
    #[error("called function has no return value")]
    FunctionReturnsVoid,
    #[error("expression depends on a later expression {0:?}")]
    ForwardDependency(Handle<crate::Expression>),
    #[error("incompatible operands: {0}")]
    IncompatibleOperands(String),
}

/// The arenas an expression's type may refer to.
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub constants: &'a Arena<crate::Constant>,
    pub types: &'a Arena<crate::Type>,
    pub global_vars: &'a Arena<crate::GlobalVariable>,
    pub local_vars: &'a Arena<crate::LocalVariable>,
    pub functions: &'a Arena<crate::Function>,
    pub arguments: &'a [crate::FunctionArgument],
}

impl<'a> ResolveContext<'a> {
    /// Determine the type of `expr`.
    ///
    /// The `past` callback must produce the resolution of any expression
    /// handle `expr` refers to; those are always earlier in the arena.
    pub fn resolve<'b>(
        &self,
        expr: &crate::Expression,
        past: impl Fn(Handle<crate::Expression>) -> Result<&'b TypeResolution, ResolveError>,
    ) -> Result<TypeResolution, ResolveError> {
        use crate::TypeInner as Ti;
        let types = self.types;
        Ok(match *expr {
            crate::Expression::Literal(literal) => {
                let (kind, width) = match literal {
                    crate::Literal::F64(_) => (crate::ScalarKind::Float, 8),
                    crate::Literal::F32(_) => (crate::ScalarKind::Float, 4),
                    crate::Literal::U32(_) => (crate::ScalarKind::Uint, 4),
                    crate::Literal::I32(_) => (crate::ScalarKind::Sint, 4),
                    crate::Literal::Bool(_) => (crate::ScalarKind::Bool, 1),
                };
                TypeResolution::Value(Ti::Scalar { kind, width })
            }
            crate::Expression::Constant(handle) => {
                let constant = self
                    .constants
                    .try_get(handle)
                    .ok_or(ResolveError::HandleOutOfRange { kind: "constant" })?;
                TypeResolution::Handle(constant.ty)
            }
            crate::Expression::ZeroValue(ty) => TypeResolution::Handle(ty),
            crate::Expression::Compose { ty, .. } => TypeResolution::Handle(ty),
            crate::Expression::Access { base, .. } => match *past(base)?.inner_with(types) {
                Ti::Vector { kind, width, .. } => {
                    TypeResolution::Value(Ti::Scalar { kind, width })
                }
                Ti::Matrix { rows, width, .. } => TypeResolution::Value(Ti::Vector {
                    size: rows,
                    kind: crate::ScalarKind::Float,
                    width,
                }),
                Ti::Array { base: elem, .. } => TypeResolution::Handle(elem),
                Ti::Pointer { base: pointee, space } => {
                    Self::resolve_pointer_access(types, base, pointee, space, None)?
                }
                Ti::ValuePointer {
                    size: Some(_),
                    kind,
                    width,
                    space,
                } => TypeResolution::Value(Ti::ValuePointer {
                    size: None,
                    kind,
                    width,
                    space,
                }),
                _ => return Err(ResolveError::InvalidAccess(base)),
            },
            crate::Expression::AccessIndex { base, index } => {
                match *past(base)?.inner_with(types) {
                    Ti::Vector { size, kind, width } => {
                        if index >= size as u32 {
                            return Err(ResolveError::OutOfBoundsIndex { expr: base, index });
                        }
                        TypeResolution::Value(Ti::Scalar { kind, width })
                    }
                    Ti::Matrix {
                        columns,
                        rows,
                        width,
                    } => {
                        if index >= columns as u32 {
                            return Err(ResolveError::OutOfBoundsIndex { expr: base, index });
                        }
                        TypeResolution::Value(Ti::Vector {
                            size: rows,
                            kind: crate::ScalarKind::Float,
                            width,
                        })
                    }
                    Ti::Array { base: elem, .. } => TypeResolution::Handle(elem),
                    Ti::Struct { ref members, .. } => {
                        let member = members.get(index as usize).ok_or(
                            ResolveError::OutOfBoundsIndex { expr: base, index },
                        )?;
                        TypeResolution::Handle(member.ty)
                    }
                    Ti::Pointer { base: pointee, space } => {
                        Self::resolve_pointer_access(types, base, pointee, space, Some(index))?
                    }
                    Ti::ValuePointer {
                        size: Some(size),
                        kind,
                        width,
                        space,
                    } => {
                        if index >= size as u32 {
                            return Err(ResolveError::OutOfBoundsIndex { expr: base, index });
                        }
                        TypeResolution::Value(Ti::ValuePointer {
                            size: None,
                            kind,
                            width,
                            space,
                        })
                    }
                    _ => return Err(ResolveError::InvalidAccess(base)),
                }
            }
            crate::Expression::Splat { size, value } => match *past(value)?.inner_with(types) {
                Ti::Scalar { kind, width } => {
                    TypeResolution::Value(Ti::Vector { size, kind, width })
                }
                _ => {
                    return Err(ResolveError::IncompatibleOperands(
                        "splat of a non-scalar".to_string(),
                    ))
                }
            },
            crate::Expression::Swizzle { size, vector, .. } => {
                match *past(vector)?.inner_with(types) {
                    Ti::Vector { kind, width, .. } => {
                        TypeResolution::Value(Ti::Vector { size, kind, width })
                    }
                    _ => {
                        return Err(ResolveError::IncompatibleOperands(
                            "swizzle of a non-vector".to_string(),
                        ))
                    }
                }
            }
            crate::Expression::FunctionArgument(index) => {
                let arg = self
                    .arguments
                    .get(index as usize)
                    .ok_or(ResolveError::HandleOutOfRange { kind: "argument" })?;
                TypeResolution::Handle(arg.ty)
            }
            crate::Expression::GlobalVariable(handle) => {
                let var = self
                    .global_vars
                    .try_get(handle)
                    .ok_or(ResolveError::HandleOutOfRange { kind: "global" })?;
                if var.space == crate::AddressSpace::Handle {
                    TypeResolution::Handle(var.ty)
                } else {
                    TypeResolution::Value(Ti::Pointer {
                        base: var.ty,
                        space: var.space,
                    })
                }
            }
            crate::Expression::LocalVariable(handle) => {
                let var = self
                    .local_vars
                    .try_get(handle)
                    .ok_or(ResolveError::HandleOutOfRange { kind: "local" })?;
                TypeResolution::Value(Ti::Pointer {
                    base: var.ty,
                    space: crate::AddressSpace::Function,
                })
            }
            crate::Expression::Load { pointer } => match *past(pointer)?.inner_with(types) {
                Ti::Pointer { base, .. } => match types[base].inner {
                    Ti::Atomic { kind, width } => {
                        TypeResolution::Value(Ti::Scalar { kind, width })
                    }
                    _ => TypeResolution::Handle(base),
                },
                Ti::ValuePointer {
                    size, kind, width, ..
                } => TypeResolution::Value(match size {
                    Some(size) => Ti::Vector { size, kind, width },
                    None => Ti::Scalar { kind, width },
                }),
                _ => return Err(ResolveError::InvalidPointer(pointer)),
            },
            crate::Expression::ImageSample {
                image, depth_ref, ..
            } => match *past(image)?.inner_with(types) {
                Ti::Image { class, .. } => match class {
                    crate::ImageClass::Sampled { kind, .. } => {
                        TypeResolution::Value(Ti::Vector {
                            size: crate::VectorSize::Quad,
                            kind,
                            width: 4,
                        })
                    }
                    crate::ImageClass::Depth { .. } => {
                        let _ = depth_ref;
                        TypeResolution::Value(Ti::Scalar {
                            kind: crate::ScalarKind::Float,
                            width: 4,
                        })
                    }
                    crate::ImageClass::Storage { .. } => {
                        return Err(ResolveError::InvalidImage(image))
                    }
                },
                _ => return Err(ResolveError::InvalidImage(image)),
            },
            crate::Expression::ImageLoad { image, .. } => {
                match *past(image)?.inner_with(types) {
                    Ti::Image { class, .. } => match class {
                        crate::ImageClass::Sampled { kind, .. } => {
                            TypeResolution::Value(Ti::Vector {
                                size: crate::VectorSize::Quad,
                                kind,
                                width: 4,
                            })
                        }
                        crate::ImageClass::Depth { .. } => TypeResolution::Value(Ti::Scalar {
                            kind: crate::ScalarKind::Float,
                            width: 4,
                        }),
                        crate::ImageClass::Storage { format, .. } => {
                            TypeResolution::Value(Ti::Vector {
                                size: crate::VectorSize::Quad,
                                kind: format.scalar_kind(),
                                width: 4,
                            })
                        }
                    },
                    _ => return Err(ResolveError::InvalidImage(image)),
                }
            }
            crate::Expression::ImageQuery { image, query } => {
                let uint = crate::ScalarKind::Uint;
                match query {
                    crate::ImageQuery::Size { .. } => match *past(image)?.inner_with(types) {
                        Ti::Image { dim, .. } => match dim {
                            crate::ImageDimension::D1 => {
                                TypeResolution::Value(Ti::Scalar { kind: uint, width: 4 })
                            }
                            crate::ImageDimension::D2 | crate::ImageDimension::Cube => {
                                TypeResolution::Value(Ti::Vector {
                                    size: crate::VectorSize::Bi,
                                    kind: uint,
                                    width: 4,
                                })
                            }
                            crate::ImageDimension::D3 => TypeResolution::Value(Ti::Vector {
                                size: crate::VectorSize::Tri,
                                kind: uint,
                                width: 4,
                            }),
                        },
                        _ => return Err(ResolveError::InvalidImage(image)),
                    },
                    crate::ImageQuery::NumLevels
                    | crate::ImageQuery::NumLayers
                    | crate::ImageQuery::NumSamples => {
                        TypeResolution::Value(Ti::Scalar { kind: uint, width: 4 })
                    }
                }
            }
            crate::Expression::Unary { expr, .. } => past(expr)?.clone(),
            crate::Expression::Binary { op, left, right } => match op {
                crate::BinaryOperator::Add
                | crate::BinaryOperator::Subtract
                | crate::BinaryOperator::Divide
                | crate::BinaryOperator::Modulo => {
                    // Mixed vector/scalar arithmetic resolves to the vector.
                    match (past(left)?.inner_with(types), past(right)?.inner_with(types)) {
                        (&Ti::Scalar { .. }, &Ti::Vector { .. }) => past(right)?.clone(),
                        _ => past(left)?.clone(),
                    }
                }
                crate::BinaryOperator::Multiply => {
                    let (left_inner, right_inner) =
                        (past(left)?.inner_with(types), past(right)?.inner_with(types));
                    match (left_inner, right_inner) {
                        (
                            &Ti::Matrix { rows, width, .. },
                            &Ti::Matrix {
                                columns: right_columns,
                                ..
                            },
                        ) => TypeResolution::Value(Ti::Matrix {
                            columns: right_columns,
                            rows,
                            width,
                        }),
                        (&Ti::Matrix { rows, width, .. }, &Ti::Vector { .. }) => {
                            TypeResolution::Value(Ti::Vector {
                                size: rows,
                                kind: crate::ScalarKind::Float,
                                width,
                            })
                        }
                        (&Ti::Vector { width, .. }, &Ti::Matrix { columns, .. }) => {
                            TypeResolution::Value(Ti::Vector {
                                size: columns,
                                kind: crate::ScalarKind::Float,
                                width,
                            })
                        }
                        (&Ti::Scalar { .. }, &Ti::Vector { .. })
                        | (&Ti::Scalar { .. }, &Ti::Matrix { .. }) => past(right)?.clone(),
                        _ => past(left)?.clone(),
                    }
                }
                crate::BinaryOperator::Equal
                | crate::BinaryOperator::NotEqual
                | crate::BinaryOperator::Less
                | crate::BinaryOperator::LessEqual
                | crate::BinaryOperator::Greater
                | crate::BinaryOperator::GreaterEqual => {
                    let bool_kind = crate::ScalarKind::Bool;
                    match *past(left)?.inner_with(types) {
                        Ti::Vector { size, .. } => TypeResolution::Value(Ti::Vector {
                            size,
                            kind: bool_kind,
                            width: 1,
                        }),
                        _ => TypeResolution::Value(Ti::Scalar {
                            kind: bool_kind,
                            width: 1,
                        }),
                    }
                }
                crate::BinaryOperator::LogicalAnd | crate::BinaryOperator::LogicalOr => {
                    TypeResolution::Value(Ti::Scalar {
                        kind: crate::ScalarKind::Bool,
                        width: 1,
                    })
                }
                crate::BinaryOperator::And
                | crate::BinaryOperator::ExclusiveOr
                | crate::BinaryOperator::InclusiveOr
                | crate::BinaryOperator::ShiftLeft
                | crate::BinaryOperator::ShiftRightLogical
                | crate::BinaryOperator::ShiftRightArithmetic => past(left)?.clone(),
            },
            crate::Expression::Select { accept, .. } => past(accept)?.clone(),
            crate::Expression::Derivative { expr, .. } => past(expr)?.clone(),
            crate::Expression::Relational { fun, argument } => match fun {
                crate::RelationalFunction::All | crate::RelationalFunction::Any => {
                    TypeResolution::Value(Ti::Scalar {
                        kind: crate::ScalarKind::Bool,
                        width: 1,
                    })
                }
                crate::RelationalFunction::IsNan | crate::RelationalFunction::IsInf => {
                    match *past(argument)?.inner_with(types) {
                        Ti::Vector { size, .. } => TypeResolution::Value(Ti::Vector {
                            size,
                            kind: crate::ScalarKind::Bool,
                            width: 1,
                        }),
                        _ => TypeResolution::Value(Ti::Scalar {
                            kind: crate::ScalarKind::Bool,
                            width: 1,
                        }),
                    }
                }
            },
            crate::Expression::Math { fun, arg, .. } => {
                use crate::MathFunction as Mf;
                match fun {
                    Mf::Dot | Mf::Distance | Mf::Length => {
                        match *past(arg)?.inner_with(types) {
                            Ti::Vector { kind, width, .. } | Ti::Scalar { kind, width } => {
                                TypeResolution::Value(Ti::Scalar { kind, width })
                            }
                            _ => {
                                return Err(ResolveError::IncompatibleOperands(
                                    format!("{:?} of a non-vector", fun),
                                ))
                            }
                        }
                    }
                    Mf::Determinant => match *past(arg)?.inner_with(types) {
                        Ti::Matrix { width, .. } => TypeResolution::Value(Ti::Scalar {
                            kind: crate::ScalarKind::Float,
                            width,
                        }),
                        _ => {
                            return Err(ResolveError::IncompatibleOperands(
                                "determinant of a non-matrix".to_string(),
                            ))
                        }
                    },
                    Mf::Transpose => match *past(arg)?.inner_with(types) {
                        Ti::Matrix {
                            columns,
                            rows,
                            width,
                        } => TypeResolution::Value(Ti::Matrix {
                            columns: rows,
                            rows: columns,
                            width,
                        }),
                        _ => {
                            return Err(ResolveError::IncompatibleOperands(
                                "transpose of a non-matrix".to_string(),
                            ))
                        }
                    },
                    Mf::Pack4x8snorm
                    | Mf::Pack4x8unorm
                    | Mf::Pack2x16snorm
                    | Mf::Pack2x16unorm
                    | Mf::Pack2x16float => TypeResolution::Value(Ti::Scalar {
                        kind: crate::ScalarKind::Uint,
                        width: 4,
                    }),
                    Mf::Unpack4x8snorm | Mf::Unpack4x8unorm => {
                        TypeResolution::Value(Ti::Vector {
                            size: crate::VectorSize::Quad,
                            kind: crate::ScalarKind::Float,
                            width: 4,
                        })
                    }
                    Mf::Unpack2x16snorm | Mf::Unpack2x16unorm | Mf::Unpack2x16float => {
                        TypeResolution::Value(Ti::Vector {
                            size: crate::VectorSize::Bi,
                            kind: crate::ScalarKind::Float,
                            width: 4,
                        })
                    }
                    // Everything else preserves its first operand's type.
                    _ => past(arg)?.clone(),
                }
            }
            crate::Expression::As {
                expr,
                kind,
                convert,
            } => match *past(expr)?.inner_with(types) {
                Ti::Scalar { width, .. } => TypeResolution::Value(Ti::Scalar {
                    kind,
                    width: convert.unwrap_or(width),
                }),
                Ti::Vector { size, width, .. } => TypeResolution::Value(Ti::Vector {
                    size,
                    kind,
                    width: convert.unwrap_or(width),
                }),
                _ => return Err(ResolveError::InvalidCast(expr)),
            },
            crate::Expression::CallResult(function) => {
                let fun = self
                    .functions
                    .try_get(function)
                    .ok_or(ResolveError::HandleOutOfRange { kind: "function" })?;
                match fun.result {
                    Some(ref result) => TypeResolution::Handle(result.ty),
                    None => return Err(ResolveError::FunctionReturnsVoid),
                }
            }
            // For an exchange this is the old value; the success flag is
            // not surfaced.
            crate::Expression::AtomicResult { ty, .. } => TypeResolution::Handle(ty),
            crate::Expression::ArrayLength(_) => TypeResolution::Value(Ti::Scalar {
                kind: crate::ScalarKind::Uint,
                width: 4,
            }),
        })
    }

    fn resolve_pointer_access(
        types: &Arena<crate::Type>,
        base: Handle<crate::Expression>,
        pointee: Handle<crate::Type>,
        space: crate::AddressSpace,
        index: Option<u32>,
    ) -> Result<TypeResolution, ResolveError> {
        use crate::TypeInner as Ti;
        Ok(match types[pointee].inner {
            Ti::Array { base: elem, .. } => TypeResolution::Value(Ti::Pointer {
                base: elem,
                space,
            }),
            Ti::Vector { kind, width, .. } => TypeResolution::Value(Ti::ValuePointer {
                size: None,
                kind,
                width,
                space,
            }),
            Ti::Matrix { rows, width, .. } => TypeResolution::Value(Ti::ValuePointer {
                size: Some(rows),
                kind: crate::ScalarKind::Float,
                width,
                space,
            }),
            Ti::Struct { ref members, .. } => {
                let index = index.ok_or(ResolveError::InvalidAccess(base))?;
                let member = members
                    .get(index as usize)
                    .ok_or(ResolveError::OutOfBoundsIndex { expr: base, index })?;
                TypeResolution::Value(Ti::Pointer {
                    base: member.ty,
                    space,
                })
            }
            _ => return Err(ResolveError::InvalidAccess(base)),
        })
    }
}

/// Helper processor that derives the types of all expressions in a function.
#[derive(Debug, Default)]
pub struct Typifier {
    resolutions: Vec<TypeResolution>,
}

impl Typifier {
    pub fn new() -> Self {
        Typifier {
            resolutions: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.resolutions.clear()
    }

    pub fn into_resolutions(self) -> Vec<TypeResolution> {
        self.resolutions
    }

    pub fn get_resolution(&self, expr_handle: Handle<crate::Expression>) -> &TypeResolution {
        &self.resolutions[expr_handle.index()]
    }

    pub fn get<'a>(
        &'a self,
        expr_handle: Handle<crate::Expression>,
        types: &'a Arena<crate::Type>,
    ) -> &'a crate::TypeInner {
        self.resolutions[expr_handle.index()].inner_with(types)
    }

    /// Resolves the types of all expressions up to and including `expr_handle`.
    pub fn grow(
        &mut self,
        expr_handle: Handle<crate::Expression>,
        expressions: &Arena<crate::Expression>,
        ctx: &ResolveContext,
    ) -> Result<(), ResolveError> {
        if self.resolutions.len() > expr_handle.index() {
            return Ok(());
        }
        for (handle, expression) in expressions.iter().skip(self.resolutions.len()) {
            if handle.index() > expr_handle.index() {
                break;
            }
            let resolutions = &self.resolutions;
            let resolution = ctx.resolve(expression, |h| {
                resolutions
                    .get(h.index())
                    .ok_or(ResolveError::ForwardDependency(h))
            })?;
            self.resolutions.push(resolution);
        }
        Ok(())
    }
}
