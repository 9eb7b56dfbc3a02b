use spirv::Word;

pub(super) fn bytes_to_words(bytes: &[u8]) -> Vec<Word> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word: Word = 0;
            for (index, byte) in chunk.iter().enumerate() {
                word |= (*byte as Word) << (index * 8);
            }
            word
        })
        .collect()
}

/// UTF-8 bytes, NUL-terminated, zero-padded to a word boundary.
pub(super) fn string_to_words(input: &str) -> Vec<Word> {
    let bytes = input.as_bytes();
    let mut words = bytes_to_words(bytes);

    if bytes.len() % 4 == 0 {
        // nul-termination
        words.push(0x0);
    }

    words
}

pub(super) fn map_builtin(built_in: crate::BuiltIn, output: bool) -> spirv::BuiltIn {
    use crate::BuiltIn as Bi;
    match built_in {
        // The stage decides which side of the rasterizer the position is on.
        Bi::Position => {
            if output {
                spirv::BuiltIn::Position
            } else {
                spirv::BuiltIn::FragCoord
            }
        }
        Bi::VertexIndex => spirv::BuiltIn::VertexIndex,
        Bi::InstanceIndex => spirv::BuiltIn::InstanceIndex,
        Bi::FrontFacing => spirv::BuiltIn::FrontFacing,
        Bi::FragDepth => spirv::BuiltIn::FragDepth,
        Bi::SampleIndex => spirv::BuiltIn::SampleId,
        Bi::GlobalInvocationId => spirv::BuiltIn::GlobalInvocationId,
        Bi::LocalInvocationId => spirv::BuiltIn::LocalInvocationId,
        Bi::LocalInvocationIndex => spirv::BuiltIn::LocalInvocationIndex,
        Bi::WorkGroupId => spirv::BuiltIn::WorkgroupId,
        Bi::NumWorkGroups => spirv::BuiltIn::NumWorkgroups,
    }
}

pub(super) fn map_image_dim(dim: crate::ImageDimension) -> spirv::Dim {
    match dim {
        crate::ImageDimension::D1 => spirv::Dim::Dim1D,
        crate::ImageDimension::D2 => spirv::Dim::Dim2D,
        crate::ImageDimension::D3 => spirv::Dim::Dim3D,
        crate::ImageDimension::Cube => spirv::Dim::DimCube,
    }
}

#[cfg(test)]
mod tests {
    use super::string_to_words;

    #[test]
    fn test_string_to_words() {
        // Always NUL-terminated, even when the string fills its last word.
        assert_eq!(string_to_words("abc"), vec![0x0063_6261]);
        assert_eq!(string_to_words("abcd"), vec![0x6463_6261, 0x0000_0000]);
        assert_eq!(string_to_words("main"), vec![0x6e69_616d, 0x0000_0000]);
    }
}
