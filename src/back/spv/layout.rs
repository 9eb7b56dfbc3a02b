use crate::back::spv::{Instruction, LogicalLayout, PhysicalLayout, GENERATOR};
use spirv::{Op, Word, MAGIC_NUMBER};

// https://github.com/KhronosGroup/SPIRV-Headers/blob/master/include/spirv/unified1/spirv.core.grammar.json
// https://www.khronos.org/registry/spir-v/specs/unified1/SPIRV.html

impl PhysicalLayout {
    pub(super) fn new(major: u8, minor: u8) -> Self {
        let version: Word = ((major as u32) << 16) | ((minor as u32) << 8);
        PhysicalLayout {
            magic_number: MAGIC_NUMBER,
            version,
            generator: GENERATOR,
            bound: 0,
            instruction_schema: 0,
        }
    }

    pub(super) fn in_words(&self, sink: &mut Vec<Word>) {
        sink.push(self.magic_number);
        sink.push(self.version);
        sink.push(self.generator);
        sink.push(self.bound);
        sink.push(self.instruction_schema);
    }

    /// Whether the target version is at least `major.minor`.
    pub(super) fn version_at_least(&self, major: u8, minor: u8) -> bool {
        self.version >= ((major as u32) << 16) | ((minor as u32) << 8)
    }
}

impl LogicalLayout {
    pub(super) fn in_words(&self, sink: &mut Vec<Word>) {
        sink.extend(self.capabilities.iter());
        sink.extend(self.extensions.iter());
        sink.extend(self.ext_inst_imports.iter());
        sink.extend(self.memory_model.iter());
        sink.extend(self.entry_points.iter());
        sink.extend(self.execution_modes.iter());
        sink.extend(self.debugs.iter());
        sink.extend(self.annotations.iter());
        sink.extend(self.declarations.iter());
        sink.extend(self.function_declarations.iter());
        sink.extend(self.function_definitions.iter());
    }
}

impl Instruction {
    pub(super) fn new(op: Op) -> Self {
        Instruction {
            op,
            wc: 1, // Always start at 1 for the first word (OP + WC),
            type_id: None,
            result_id: None,
            operands: vec![],
        }
    }

    pub(super) fn set_type(&mut self, id: Word) {
        assert!(self.type_id.is_none(), "Type can only be set once");
        self.type_id = Some(id);
        self.wc += 1;
    }

    pub(super) fn set_result(&mut self, id: Word) {
        assert!(self.result_id.is_none(), "Result can only be set once");
        self.result_id = Some(id);
        self.wc += 1;
    }

    pub(super) fn add_operand(&mut self, operand: Word) {
        self.operands.push(operand);
        self.wc += 1;
    }

    pub(super) fn add_operands(&mut self, operands: Vec<Word>) {
        for operand in operands.into_iter() {
            self.add_operand(operand)
        }
    }

    pub(super) fn to_words(&self, sink: &mut Vec<Word>) {
        sink.push(self.wc << 16 | self.op as u32);
        sink.extend(self.type_id.iter());
        sink.extend(self.result_id.iter());
        sink.extend(self.operands.iter());
    }
}

impl Instruction {
    #[cfg(test)]
    fn validate(&self, words: &[Word]) {
        let mut inst_index = 0;
        let (wc, op) = ((words[inst_index] >> 16) as u16, words[inst_index] as u16);
        inst_index += 1;

        assert_eq!(wc, words.len() as u16);
        assert_eq!(op, self.op as u16);

        if self.type_id.is_some() {
            assert_eq!(words[inst_index], self.type_id.unwrap());
            inst_index += 1;
        }

        if self.result_id.is_some() {
            assert_eq!(words[inst_index], self.result_id.unwrap());
            inst_index += 1;
        }

        for (op_index, operand) in self.operands.iter().enumerate() {
            assert_eq!(words[op_index + inst_index], *operand);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_layout_in_words() {
        let bytes_to_words = 5;
        let mut output = vec![];
        let mut layout = PhysicalLayout::new(1, 2);
        layout.bound = 5;

        layout.in_words(&mut output);

        assert_eq!(output.len(), bytes_to_words);
        assert_eq!(output[0], MAGIC_NUMBER);
        assert_eq!(output[1], (1 << 16) | (2 << 8));
        assert_eq!(output[2], GENERATOR);
        assert_eq!(output[3], 5);
        assert_eq!(output[4], 0);
    }

    #[test]
    fn test_version_comparison() {
        let layout = PhysicalLayout::new(1, 3);
        assert!(layout.version_at_least(1, 0));
        assert!(layout.version_at_least(1, 3));
        assert!(!layout.version_at_least(1, 4));
    }

    #[test]
    fn test_logical_layout_in_words() {
        let mut output = vec![];
        let mut layout = LogicalLayout::default();
        let layout_vectors = 11;
        let mut instructions = Vec::with_capacity(layout_vectors);

        let vector_names = &[
            "Capabilities",
            "Extensions",
            "External Instruction Imports",
            "Memory Model",
            "Entry Points",
            "Execution Modes",
            "Debugs",
            "Annotations",
            "Declarations",
            "Function Declarations",
            "Function Definitions",
        ];

        for i in 0..layout_vectors {
            let mut dummy_instruction = Instruction::new(Op::Constant);
            dummy_instruction.set_type((i + 1) as u32);
            dummy_instruction.set_result((i + 2) as u32);
            dummy_instruction.add_operand((i + 3) as u32);
            dummy_instruction.add_operands(crate::back::spv::helpers::string_to_words(
                format!("This is the vector: {}", vector_names[i]).as_str(),
            ));
            instructions.push(dummy_instruction);
        }

        instructions[0].to_words(&mut layout.capabilities);
        instructions[1].to_words(&mut layout.extensions);
        instructions[2].to_words(&mut layout.ext_inst_imports);
        instructions[3].to_words(&mut layout.memory_model);
        instructions[4].to_words(&mut layout.entry_points);
        instructions[5].to_words(&mut layout.execution_modes);
        instructions[6].to_words(&mut layout.debugs);
        instructions[7].to_words(&mut layout.annotations);
        instructions[8].to_words(&mut layout.declarations);
        instructions[9].to_words(&mut layout.function_declarations);
        instructions[10].to_words(&mut layout.function_definitions);

        layout.in_words(&mut output);

        let mut index: usize = 0;
        for instruction in instructions {
            let wc = instruction.wc as usize;
            instruction.validate(&output[index..index + wc]);
            index += wc;
        }
    }
}
