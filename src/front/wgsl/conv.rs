use super::{Error, Span};

pub fn map_address_space(word: &str, span: Span) -> Result<crate::AddressSpace, Error<'_>> {
    match word {
        "function" => Ok(crate::AddressSpace::Function),
        "private" => Ok(crate::AddressSpace::Private),
        "workgroup" => Ok(crate::AddressSpace::WorkGroup),
        "uniform" => Ok(crate::AddressSpace::Uniform),
        "storage" => Ok(crate::AddressSpace::Storage {
            access: crate::StorageAccess::LOAD,
        }),
        "push_constant" => Ok(crate::AddressSpace::PushConstant),
        _ => Err(Error::UnknownAddressSpace(span)),
    }
}

pub fn map_storage_access(word: &str, span: Span) -> Result<crate::StorageAccess, Error<'_>> {
    match word {
        "read" => Ok(crate::StorageAccess::LOAD),
        "write" => Ok(crate::StorageAccess::STORE),
        "read_write" => Ok(crate::StorageAccess::LOAD | crate::StorageAccess::STORE),
        _ => Err(Error::UnknownAccess(span)),
    }
}

pub fn map_built_in(word: &str, span: Span) -> Result<crate::BuiltIn, Error<'_>> {
    Ok(match word {
        "position" => crate::BuiltIn::Position,
        "vertex_index" => crate::BuiltIn::VertexIndex,
        "instance_index" => crate::BuiltIn::InstanceIndex,
        "front_facing" => crate::BuiltIn::FrontFacing,
        "frag_depth" => crate::BuiltIn::FragDepth,
        "sample_index" => crate::BuiltIn::SampleIndex,
        "global_invocation_id" => crate::BuiltIn::GlobalInvocationId,
        "local_invocation_id" => crate::BuiltIn::LocalInvocationId,
        "local_invocation_index" => crate::BuiltIn::LocalInvocationIndex,
        "workgroup_id" => crate::BuiltIn::WorkGroupId,
        "num_workgroups" => crate::BuiltIn::NumWorkGroups,
        _ => return Err(Error::UnknownBuiltin(span)),
    })
}

pub fn map_interpolation(word: &str, span: Span) -> Result<crate::Interpolation, Error<'_>> {
    match word {
        "perspective" => Ok(crate::Interpolation::Perspective),
        "linear" => Ok(crate::Interpolation::Linear),
        "flat" => Ok(crate::Interpolation::Flat),
        _ => Err(Error::UnknownAttribute(span)),
    }
}

pub fn map_shader_stage(word: &str) -> Option<crate::ShaderStage> {
    match word {
        "vertex" => Some(crate::ShaderStage::Vertex),
        "fragment" => Some(crate::ShaderStage::Fragment),
        "compute" => Some(crate::ShaderStage::Compute),
        _ => None,
    }
}

pub fn get_scalar_type(word: &str) -> Option<(crate::ScalarKind, crate::Bytes)> {
    match word {
        "f64" => Some((crate::ScalarKind::Float, 8)),
        "f32" => Some((crate::ScalarKind::Float, 4)),
        "i32" => Some((crate::ScalarKind::Sint, 4)),
        "u32" => Some((crate::ScalarKind::Uint, 4)),
        "bool" => Some((crate::ScalarKind::Bool, 1)),
        _ => None,
    }
}

pub fn map_storage_format(word: &str, span: Span) -> Result<crate::StorageFormat, Error<'_>> {
    use crate::StorageFormat as Sf;
    Ok(match word {
        "r8unorm" => Sf::R8Unorm,
        "r8snorm" => Sf::R8Snorm,
        "r8uint" => Sf::R8Uint,
        "r8sint" => Sf::R8Sint,
        "r16uint" => Sf::R16Uint,
        "r16sint" => Sf::R16Sint,
        "r16float" => Sf::R16Float,
        "rg8unorm" => Sf::Rg8Unorm,
        "rg8snorm" => Sf::Rg8Snorm,
        "rg8uint" => Sf::Rg8Uint,
        "rg8sint" => Sf::Rg8Sint,
        "r32uint" => Sf::R32Uint,
        "r32sint" => Sf::R32Sint,
        "r32float" => Sf::R32Float,
        "rg16uint" => Sf::Rg16Uint,
        "rg16sint" => Sf::Rg16Sint,
        "rg16float" => Sf::Rg16Float,
        "rgba8unorm" => Sf::Rgba8Unorm,
        "rgba8snorm" => Sf::Rgba8Snorm,
        "rgba8uint" => Sf::Rgba8Uint,
        "rgba8sint" => Sf::Rgba8Sint,
        "rg32uint" => Sf::Rg32Uint,
        "rg32sint" => Sf::Rg32Sint,
        "rg32float" => Sf::Rg32Float,
        "rgba16uint" => Sf::Rgba16Uint,
        "rgba16sint" => Sf::Rgba16Sint,
        "rgba16float" => Sf::Rgba16Float,
        "rgba32uint" => Sf::Rgba32Uint,
        "rgba32sint" => Sf::Rgba32Sint,
        "rgba32float" => Sf::Rgba32Float,
        _ => return Err(Error::UnknownStorageFormat(span)),
    })
}

pub fn map_math_function(word: &str) -> Option<crate::MathFunction> {
    use crate::MathFunction as Mf;
    Some(match word {
        // comparison
        "abs" => Mf::Abs,
        "min" => Mf::Min,
        "max" => Mf::Max,
        "clamp" => Mf::Clamp,
        // trigonometry
        "cos" => Mf::Cos,
        "cosh" => Mf::Cosh,
        "sin" => Mf::Sin,
        "sinh" => Mf::Sinh,
        "tan" => Mf::Tan,
        "tanh" => Mf::Tanh,
        "acos" => Mf::Acos,
        "asin" => Mf::Asin,
        "atan" => Mf::Atan,
        "atan2" => Mf::Atan2,
        "asinh" => Mf::Asinh,
        "acosh" => Mf::Acosh,
        "atanh" => Mf::Atanh,
        "radians" => Mf::Radians,
        "degrees" => Mf::Degrees,
        // decomposition
        "ceil" => Mf::Ceil,
        "floor" => Mf::Floor,
        "round" => Mf::Round,
        "fract" => Mf::Fract,
        "trunc" => Mf::Trunc,
        "ldexp" => Mf::Ldexp,
        // exponent
        "exp" => Mf::Exp,
        "exp2" => Mf::Exp2,
        "log" => Mf::Log,
        "log2" => Mf::Log2,
        "pow" => Mf::Pow,
        // geometry
        "dot" => Mf::Dot,
        "cross" => Mf::Cross,
        "distance" => Mf::Distance,
        "length" => Mf::Length,
        "normalize" => Mf::Normalize,
        "faceForward" => Mf::FaceForward,
        "reflect" => Mf::Reflect,
        "refract" => Mf::Refract,
        // computational
        "sign" => Mf::Sign,
        "fma" => Mf::Fma,
        "mix" => Mf::Mix,
        "step" => Mf::Step,
        "smoothstep" => Mf::SmoothStep,
        "sqrt" => Mf::Sqrt,
        "inverseSqrt" => Mf::InverseSqrt,
        "transpose" => Mf::Transpose,
        "determinant" => Mf::Determinant,
        // bits
        "countOneBits" => Mf::CountOneBits,
        "reverseBits" => Mf::ReverseBits,
        "extractBits" => Mf::ExtractBits,
        "insertBits" => Mf::InsertBits,
        "firstTrailingBit" => Mf::FindLsb,
        "firstLeadingBit" => Mf::FindMsb,
        // data packing
        "pack4x8snorm" => Mf::Pack4x8snorm,
        "pack4x8unorm" => Mf::Pack4x8unorm,
        "pack2x16snorm" => Mf::Pack2x16snorm,
        "pack2x16unorm" => Mf::Pack2x16unorm,
        "pack2x16float" => Mf::Pack2x16float,
        // data unpacking
        "unpack4x8snorm" => Mf::Unpack4x8snorm,
        "unpack4x8unorm" => Mf::Unpack4x8unorm,
        "unpack2x16snorm" => Mf::Unpack2x16snorm,
        "unpack2x16unorm" => Mf::Unpack2x16unorm,
        "unpack2x16float" => Mf::Unpack2x16float,
        _ => return None,
    })
}

pub fn map_relational_function(word: &str) -> Option<crate::RelationalFunction> {
    match word {
        "all" => Some(crate::RelationalFunction::All),
        "any" => Some(crate::RelationalFunction::Any),
        _ => None,
    }
}

pub fn map_derivative(word: &str) -> Option<(crate::DerivativeAxis, crate::DerivativeControl)> {
    use crate::{DerivativeAxis as Da, DerivativeControl as Dc};
    Some(match word {
        "dpdx" => (Da::X, Dc::None),
        "dpdxCoarse" => (Da::X, Dc::Coarse),
        "dpdxFine" => (Da::X, Dc::Fine),
        "dpdy" => (Da::Y, Dc::None),
        "dpdyCoarse" => (Da::Y, Dc::Coarse),
        "dpdyFine" => (Da::Y, Dc::Fine),
        "fwidth" => (Da::Width, Dc::None),
        "fwidthCoarse" => (Da::Width, Dc::Coarse),
        "fwidthFine" => (Da::Width, Dc::Fine),
        _ => return None,
    })
}

pub fn map_atomic_function(word: &str) -> Option<crate::AtomicFunction> {
    Some(match word {
        "atomicAdd" => crate::AtomicFunction::Add,
        "atomicSub" => crate::AtomicFunction::Subtract,
        "atomicAnd" => crate::AtomicFunction::And,
        "atomicOr" => crate::AtomicFunction::InclusiveOr,
        "atomicXor" => crate::AtomicFunction::ExclusiveOr,
        "atomicMin" => crate::AtomicFunction::Min,
        "atomicMax" => crate::AtomicFunction::Max,
        "atomicExchange" => crate::AtomicFunction::Exchange { compare: None },
        _ => return None,
    })
}

/// Parses a numeric literal, honoring its type suffix.
pub fn parse_literal(word: &str, span: Span) -> Result<crate::Literal, Error<'_>> {
    use num_traits::cast;

    let parse_int = |digits: &str| -> Option<i64> {
        if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).ok()
        } else {
            digits.parse().ok()
        }
    };

    if let Some(digits) = word.strip_suffix('u') {
        let value = parse_int(digits).ok_or_else(|| Error::BadNumber(span.clone()))?;
        return match cast::<i64, u32>(value) {
            Some(value) => Ok(crate::Literal::U32(value)),
            None => Err(Error::BadNumber(span)),
        };
    }
    if let Some(digits) = word.strip_suffix('i') {
        let value = parse_int(digits).ok_or_else(|| Error::BadNumber(span.clone()))?;
        return match cast::<i64, i32>(value) {
            Some(value) => Ok(crate::Literal::I32(value)),
            None => Err(Error::BadNumber(span)),
        };
    }
    if let Some(digits) = word.strip_suffix('f') {
        let value: f64 = digits.parse().map_err(|_| Error::BadNumber(span))?;
        return Ok(crate::Literal::F32(value as f32));
    }
    let is_hex = word.starts_with("0x") || word.starts_with("0X");
    if word.contains('.') || (!is_hex && (word.contains('e') || word.contains('E'))) {
        let value: f64 = word.parse().map_err(|_| Error::BadNumber(span))?;
        Ok(crate::Literal::F32(value as f32))
    } else {
        // abstract integers concretize to i32
        let value = parse_int(word).ok_or_else(|| Error::BadNumber(span.clone()))?;
        match cast::<i64, i32>(value) {
            Some(value) => Ok(crate::Literal::I32(value)),
            None => Err(Error::BadNumber(span)),
        }
    }
}
