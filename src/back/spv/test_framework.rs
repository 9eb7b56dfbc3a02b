use spirv::{Op, Word};

/// The universal requirements an instruction's encoding must satisfy,
/// per its entry in the SPIR-V specification.
pub struct SpecRequirements {
    pub op: Op,
    /// The minimum word count; variable-length operands may add more.
    pub wc: u32,
    pub type_id: bool,
    pub result_id: bool,
    pub operands: bool,
}

pub fn validate_spec_requirements(
    requirements: SpecRequirements,
    instruction: &crate::back::spv::Instruction,
) {
    assert_eq!(requirements.op, instruction.op);
    assert!(instruction.wc >= requirements.wc);
    assert_eq!(requirements.type_id, instruction.type_id.is_some());
    assert_eq!(requirements.result_id, instruction.result_id.is_some());
    assert_eq!(requirements.operands, !instruction.operands.is_empty());
}

pub fn validate_instruction(words: &[Word], instruction: &crate::back::spv::Instruction) {
    let mut index = 0;
    assert_eq!(
        words[index],
        (instruction.wc << 16) | instruction.op as u32
    );
    index += 1;
    if let Some(type_id) = instruction.type_id {
        assert_eq!(words[index], type_id);
        index += 1;
    }
    if let Some(result_id) = instruction.result_id {
        assert_eq!(words[index], result_id);
        index += 1;
    }
    assert_eq!(&words[index..], instruction.operands.as_slice());
}
