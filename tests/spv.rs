//! Word-level checks on emitted SPIR-V binaries.

use nagac::back::spv;
use nagac::valid::Validator;

use spirv::Op;

fn compile_with(source: &str, options: &spv::Options) -> Vec<u32> {
    let module = nagac::front::wgsl::parse_str(source)
        .unwrap_or_else(|error| panic!("{}", error.emit_to_string(source)));
    let errors = Validator::new().validate(&module);
    assert!(errors.is_empty(), "validation failed: {:?}", errors);
    spv::write_vec(&module, options).unwrap()
}

fn compile(source: &str) -> Vec<u32> {
    compile_with(
        source,
        &spv::Options {
            lang_version: (1, 3),
            flags: spv::WriterFlags::empty(),
            capabilities: Vec::new(),
        },
    )
}

/// A decoded instruction: opcode plus all the words after the first.
#[derive(Debug)]
struct Ins {
    op: u16,
    operands: Vec<u32>,
}

impl Ins {
    fn is(&self, op: Op) -> bool {
        self.op == op as u16
    }
}

fn decode(words: &[u32]) -> Vec<Ins> {
    assert!(words.len() >= 5);
    let mut instructions = Vec::new();
    let mut index = 5;
    while index < words.len() {
        let wc = (words[index] >> 16) as usize;
        let op = words[index] as u16;
        assert!(wc > 0, "zero word count at {}", index);
        assert!(index + wc <= words.len(), "instruction past the end");
        instructions.push(Ins {
            op,
            operands: words[index + 1..index + wc].to_vec(),
        });
        index += wc;
    }
    instructions
}

fn find<'a>(instructions: &'a [Ins], op: Op) -> Option<&'a Ins> {
    instructions.iter().find(|ins| ins.is(op))
}

fn decode_string(operands: &[u32]) -> String {
    let mut bytes = Vec::new();
    'outer: for word in operands {
        for shift in 0..4 {
            let byte = (word >> (shift * 8)) as u8;
            if byte == 0 {
                break 'outer;
            }
            bytes.push(byte);
        }
    }
    String::from_utf8(bytes).unwrap()
}

const MINIMAL_VERTEX: &str = "
    @vertex
    fn main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
        return vec4<f32>(0.0, 0.0, 0.0, 1.0);
    }
";

#[test]
fn header_is_well_formed() {
    let words = compile(MINIMAL_VERTEX);
    assert_eq!(words[0], 0x0723_0203);
    assert_eq!(words[1], (1 << 16) | (3 << 8));
    assert_eq!(words[4], 0);
    assert!(words[3] >= 13, "bound {} is too small", words[3]);
    // every id mentioned in a result position is below the bound
    let total: usize = 5 + decode(&words)
        .iter()
        .map(|ins| ins.operands.len() + 1)
        .sum::<usize>();
    assert_eq!(total, words.len());
}

#[test]
fn requested_version_is_pinned() {
    for &(major, minor) in &[(1u8, 0u8), (1, 3), (1, 4), (1, 5), (1, 6)] {
        let words = compile_with(
            MINIMAL_VERTEX,
            &spv::Options {
                lang_version: (major, minor),
                flags: spv::WriterFlags::empty(),
                capabilities: Vec::new(),
            },
        );
        assert_eq!(words[1], ((major as u32) << 16) | ((minor as u32) << 8));
    }
}

#[test]
fn unsupported_version_is_rejected() {
    let module = nagac::front::wgsl::parse_str(MINIMAL_VERTEX).unwrap();
    let options = spv::Options {
        lang_version: (1, 2),
        flags: spv::WriterFlags::empty(),
        capabilities: Vec::new(),
    };
    assert!(spv::write_vec(&module, &options).is_err());
}

#[test]
fn minimal_vertex_entry_point() {
    let words = compile(MINIMAL_VERTEX);
    let instructions = decode(&words);

    let entry = find(&instructions, Op::EntryPoint).expect("no entry point");
    // Vertex execution model
    assert_eq!(entry.operands[0], 0);
    assert_eq!(decode_string(&entry.operands[2..]), "main");

    // no optional capabilities
    let capabilities: Vec<u32> = instructions
        .iter()
        .filter(|ins| ins.is(Op::Capability))
        .map(|ins| ins.operands[0])
        .collect();
    assert_eq!(capabilities, vec![spirv::Capability::Shader as u32]);
}

#[test]
fn emitted_types_are_unique() {
    let words = compile(
        "@vertex
        fn main() -> @builtin(position) vec4<f32> {
            let a = vec4<f32>(1.0, 2.0, 3.0, 4.0);
            let b = vec4<f32>(4.0, 3.0, 2.0, 1.0);
            var c = vec2<f32>(0.5, 0.5);
            return a + b + vec4<f32>(c.x, c.y, 0.0, 0.0);
        }",
    );
    let type_ops = [
        Op::TypeVoid as u16,
        Op::TypeBool as u16,
        Op::TypeInt as u16,
        Op::TypeFloat as u16,
        Op::TypeVector as u16,
        Op::TypeMatrix as u16,
        Op::TypePointer as u16,
        Op::TypeFunction as u16,
        Op::TypeSampler as u16,
        Op::TypeImage as u16,
        Op::TypeSampledImage as u16,
    ];
    let mut seen = std::collections::HashSet::new();
    for ins in decode(&words) {
        if type_ops.contains(&ins.op) {
            // drop the result id, keep the structure
            let key = (ins.op, ins.operands[1..].to_vec());
            assert!(seen.insert(key), "duplicate type: {:?}", ins);
        }
    }
}

#[test]
fn signed_atomic_add_keeps_signed_type() {
    let words = compile(
        "struct Tile { backdrop: atomic<i32>, }
        @group(0) @binding(0) var<storage, read_write> tiles: array<Tile, 16>;
        @compute @workgroup_size(1)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            atomicAdd(&tiles[id.x].backdrop, 1i);
        }",
    );
    let instructions = decode(&words);
    let atomic = find(&instructions, Op::AtomicIAdd).expect("no atomic add");
    let result_type = atomic.operands[0];
    let int_type = instructions
        .iter()
        .find(|ins| ins.is(Op::TypeInt) && ins.operands[0] == result_type)
        .expect("atomic result type is not an integer");
    assert_eq!(int_type.operands[1], 32);
    assert_eq!(int_type.operands[2], 1, "expected a signed type");
}

#[test]
fn bool_equality_uses_logical_ops() {
    let words = compile(
        "@fragment
        fn main(@location(0) x: f32) -> @location(0) vec4<f32> {
            let a = x > 0.0;
            let b = x < 1.0;
            let c = (a == b);
            return select(vec4<f32>(0.0), vec4<f32>(1.0), c);
        }",
    );
    let instructions = decode(&words);
    assert!(find(&instructions, Op::LogicalEqual).is_some());
    assert!(find(&instructions, Op::IEqual).is_none());
}

#[test]
fn deferred_store_follows_the_call() {
    let words = compile(
        "@group(0) @binding(0) var<storage, read_write> out: array<u32>;
        fn count_stuff() -> u32 { return 42u; }
        @compute @workgroup_size(1)
        fn main() {
            var count = count_stuff();
            var copy = count;
            out[0] = copy;
        }",
    );
    let instructions = decode(&words);
    let call_index = instructions
        .iter()
        .position(|ins| ins.is(Op::FunctionCall))
        .expect("no function call");
    let call_id = instructions[call_index].operands[1];

    let store_indices: Vec<usize> = instructions
        .iter()
        .enumerate()
        .filter(|(_, ins)| ins.is(Op::Store))
        .map(|(index, _)| index)
        .collect();
    // the deferred store of the call result comes right after the call
    let direct = store_indices
        .iter()
        .find(|&&index| instructions[index].operands[1] == call_id)
        .expect("no store of the call result");
    assert!(*direct > call_index);
    // the store of `copy` follows it
    assert!(
        store_indices.iter().any(|&index| index > *direct),
        "no second store"
    );
}

#[test]
fn transitive_deferred_store() {
    let words = compile(
        "@group(0) @binding(0) var<storage, read_write> out: array<u32>;
        fn helper() -> u32 { return 7u; }
        @compute @workgroup_size(1)
        fn main() {
            var x = helper() + 1u;
            out[0] = x;
        }",
    );
    let instructions = decode(&words);
    let call_index = instructions
        .iter()
        .position(|ins| ins.is(Op::FunctionCall))
        .expect("no function call");
    let call_id = instructions[call_index].operands[1];
    // the initializer is evaluated after the call: an IAdd over the result
    let add_index = instructions
        .iter()
        .position(|ins| ins.is(Op::IAdd) && ins.operands[2..].contains(&call_id))
        .expect("no add over the call result");
    assert!(add_index > call_index);
    let add_id = instructions[add_index].operands[1];
    assert!(
        instructions
            .iter()
            .any(|ins| ins.is(Op::Store) && ins.operands[1] == add_id),
        "the computed initializer is never stored"
    );
}

#[test]
fn storage_buffer_is_wrapped() {
    let words = compile(
        "@group(0) @binding(0) var<storage, read_write> pixels: array<u32>;
        @compute @workgroup_size(64)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            pixels[id.x] = 0u;
        }",
    );
    let instructions = decode(&words);

    let runtime_array = find(&instructions, Op::TypeRuntimeArray).expect("no runtime array");
    let array_id = runtime_array.operands[0];
    let wrapper = instructions
        .iter()
        .find(|ins| ins.is(Op::TypeStruct) && ins.operands[1..] == [array_id])
        .expect("the runtime array is not wrapped in a struct");
    let wrapper_id = wrapper.operands[0];
    assert!(
        instructions.iter().any(|ins| ins.is(Op::Decorate)
            && ins.operands[0] == wrapper_id
            && ins.operands[1] == spirv::Decoration::Block as u32),
        "the wrapper struct is not decorated as a Block"
    );

    // find the zero constant
    let uint_type = instructions
        .iter()
        .find(|ins| ins.is(Op::TypeInt) && ins.operands[1] == 32 && ins.operands[2] == 0)
        .unwrap()
        .operands[0];
    let zero_id = instructions
        .iter()
        .find(|ins| {
            ins.is(Op::Constant) && ins.operands[0] == uint_type && ins.operands[2] == 0
        })
        .unwrap()
        .operands[1];

    // every access chain into the global starts with the zero index
    let global_id = instructions
        .iter()
        .find(|ins| {
            ins.is(Op::Variable)
                && ins.operands[2] == spirv::StorageClass::StorageBuffer as u32
        })
        .expect("no storage buffer variable")
        .operands[1];
    let mut chains = 0;
    for ins in instructions.iter() {
        if ins.is(Op::AccessChain) && ins.operands[2] == global_id {
            chains += 1;
            assert_eq!(ins.operands[3], zero_id, "chain misses the wrapper index");
        }
    }
    assert!(chains > 0, "no access chains into the wrapped global");
}

#[test]
fn both_arms_returning_make_merge_unreachable() {
    let words = compile(
        "fn pick(x: f32) -> f32 {
            if x > 0.0 {
                return 1.0;
            } else {
                return -1.0;
            }
        }",
    );
    let instructions = decode(&words);
    let unreachable_index = instructions
        .iter()
        .position(|ins| ins.is(Op::Unreachable))
        .expect("no unreachable merge");
    assert!(
        instructions[unreachable_index - 1].is(Op::Label),
        "the unreachable must immediately follow the merge label"
    );
}

#[test]
fn function_blocks_are_well_formed() {
    let words = compile(
        "fn fibonacci(n: u32) -> u32 {
            var a = 0u;
            var b = 1u;
            for (var i = 0u; i < n; i += 1u) {
                let next = a + b;
                a = b;
                b = next;
            }
            return a;
        }
        @compute @workgroup_size(1)
        fn main() {
            var x = fibonacci(10u);
        }",
    );
    let instructions = decode(&words);
    let terminators = [
        Op::Branch as u16,
        Op::BranchConditional as u16,
        Op::Switch as u16,
        Op::Kill as u16,
        Op::Return as u16,
        Op::ReturnValue as u16,
        Op::Unreachable as u16,
    ];

    let mut in_function = false;
    let mut entry_block = false;
    let mut first_block = false;
    let mut seen_non_variable = false;
    let mut terminated = true;
    for ins in instructions.iter() {
        if ins.is(Op::Function) {
            in_function = true;
            first_block = true;
            continue;
        }
        if ins.is(Op::FunctionEnd) {
            assert!(terminated, "function ended inside a block");
            in_function = false;
            continue;
        }
        if !in_function {
            continue;
        }
        if ins.is(Op::FunctionParameter) {
            continue;
        }
        if ins.is(Op::Label) {
            assert!(terminated, "block started before the previous one ended");
            terminated = false;
            entry_block = first_block;
            first_block = false;
            seen_non_variable = false;
            continue;
        }
        if terminators.contains(&ins.op) {
            assert!(!terminated, "terminator outside of a block");
            terminated = true;
            continue;
        }
        // every entry-block variable precedes all other instructions
        if entry_block {
            if ins.is(Op::Variable) {
                assert!(
                    !seen_non_variable,
                    "OpVariable after a regular instruction in the entry block"
                );
            } else {
                seen_non_variable = true;
            }
        }
    }
}

#[test]
fn image_query_requests_its_capability() {
    let words = compile(
        "@group(0) @binding(0) var tex: texture_2d<f32>;
        @fragment
        fn main() -> @location(0) vec4<f32> {
            let size = textureDimensions(tex);
            return vec4<f32>(f32(size.x), 0.0, 0.0, 1.0);
        }",
    );
    let instructions = decode(&words);
    let capabilities: Vec<u32> = instructions
        .iter()
        .filter(|ins| ins.is(Op::Capability))
        .map(|ins| ins.operands[0])
        .collect();
    assert!(capabilities.contains(&(spirv::Capability::ImageQuery as u32)));
}

#[test]
fn extra_capabilities_are_unioned() {
    let words = compile_with(
        MINIMAL_VERTEX,
        &spv::Options {
            lang_version: (1, 3),
            flags: spv::WriterFlags::empty(),
            capabilities: vec![spv::Capability::Float64],
        },
    );
    let instructions = decode(&words);
    let capabilities: Vec<u32> = instructions
        .iter()
        .filter(|ins| ins.is(Op::Capability))
        .map(|ins| ins.operands[0])
        .collect();
    assert!(capabilities.contains(&(spirv::Capability::Float64 as u32)));
    assert!(capabilities.contains(&(spirv::Capability::Shader as u32)));
}

#[test]
fn compilation_is_deterministic() {
    let source = "
        struct Params { scale: vec4<f32>, }
        @group(0) @binding(0) var<uniform> params: Params;
        @group(0) @binding(1) var<storage, read_write> data: array<vec4<f32>>;
        @compute @workgroup_size(8)
        fn main(@builtin(global_invocation_id) id: vec3<u32>) {
            data[id.x] = data[id.x] * params.scale;
        }
    ";
    assert_eq!(compile(source), compile(source));
}

#[test]
fn empty_module_is_minimal() {
    let module = nagac::Module::default();
    let words = spv::write_vec(
        &module,
        &spv::Options {
            lang_version: (1, 3),
            flags: spv::WriterFlags::empty(),
            capabilities: Vec::new(),
        },
    )
    .unwrap();
    let opcodes: Vec<u16> = decode(&words).iter().map(|ins| ins.op).collect();
    assert_eq!(
        opcodes,
        vec![
            Op::Capability as u16,
            Op::ExtInstImport as u16,
            Op::MemoryModel as u16,
        ]
    );
    assert_eq!(words[0], 0x0723_0203);
    assert_eq!(words[4], 0);
}

#[test]
fn loop_with_break_if_closes_properly() {
    let words = compile(
        "@compute @workgroup_size(1)
        fn main() {
            var i = 0u;
            loop {
                i += 1u;
                continuing {
                    break if i >= 8u;
                }
            }
        }",
    );
    let instructions = decode(&words);
    let merge = find(&instructions, Op::LoopMerge).expect("no loop merge");
    let merge_label = merge.operands[0];
    // the break-if branches to the merge label on true
    assert!(
        instructions
            .iter()
            .any(|ins| ins.is(Op::BranchConditional) && ins.operands[1] == merge_label),
        "no conditional branch to the loop merge"
    );
}
