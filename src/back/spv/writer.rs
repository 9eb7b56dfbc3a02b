use super::{
    helpers,
    instructions::*,
    Block, EntryPointContext, Error, Function, GlobalVariable, Instruction, LocalType,
    LocalVariable, LookupFunctionType, LookupType, Options, PhysicalLayout, ResultMember, Writer,
    WriterFlags, BITS_PER_BYTE,
};
use crate::arena::Handle;
use crate::proc::TypeResolution;

use spirv::{Op, Word};

/// The labels a `Break` or `Continue` branches to in the current loop
/// or switch.
#[derive(Clone, Copy, Default)]
struct LoopContext {
    continuing_id: Option<Word>,
    break_id: Option<Word>,
}

/// How a block transfers control when its statements run out.
enum BlockExit {
    /// The block is at the end of the function body.
    Return,
    /// Unconditional branch to the given label.
    Branch { target: Word },
    /// A loop's `break if`: branch to the merge label when the condition
    /// holds, to the loop header otherwise.
    BreakIf {
        condition: Handle<crate::Expression>,
        preamble_id: Word,
        merge_id: Word,
    },
}

fn is_pointer_inner(inner: &crate::TypeInner) -> bool {
    matches!(
        *inner,
        crate::TypeInner::Pointer { .. } | crate::TypeInner::ValuePointer { .. }
    )
}

/// Whether control flow can't continue past this block.
///
/// Unwraps trailing nested blocks, requires both arms of a trailing `If`, and
/// all cases of a trailing `Switch`, to end control flow themselves.
fn ends_with_terminator(block: &[crate::Statement]) -> bool {
    match block.last() {
        Some(&crate::Statement::Break)
        | Some(&crate::Statement::Continue)
        | Some(&crate::Statement::Return { .. })
        | Some(&crate::Statement::Kill) => true,
        Some(&crate::Statement::Block(ref inner)) => ends_with_terminator(inner),
        Some(&crate::Statement::If {
            ref accept,
            ref reject,
            ..
        }) => {
            !accept.is_empty()
                && !reject.is_empty()
                && ends_with_terminator(accept)
                && ends_with_terminator(reject)
        }
        Some(&crate::Statement::Switch { ref cases, .. }) => {
            cases
                .iter()
                .any(|case| case.value == crate::SwitchValue::Default)
                && cases
                    .iter()
                    .all(|case| !case.fall_through && ends_with_terminator(&case.body))
        }
        _ => false,
    }
}

/// Finds the call or atomic result a local initializer depends on, walking
/// binary and unary expressions; other variants are leaves.
fn find_result_producer(
    fun: &crate::Function,
    expr: Handle<crate::Expression>,
) -> Option<Handle<crate::Expression>> {
    match fun.expressions[expr] {
        crate::Expression::CallResult(_) | crate::Expression::AtomicResult { .. } => Some(expr),
        crate::Expression::Binary { left, right, .. } => {
            find_result_producer(fun, left).or_else(|| find_result_producer(fun, right))
        }
        crate::Expression::Unary { expr: inner, .. } => find_result_producer(fun, inner),
        _ => None,
    }
}

fn gather_calls(block: &[crate::Statement], pending: &mut Vec<Handle<crate::Function>>) {
    for statement in block {
        match *statement {
            crate::Statement::Call { function, .. } => pending.push(function),
            crate::Statement::Block(ref inner) => gather_calls(inner, pending),
            crate::Statement::If {
                ref accept,
                ref reject,
                ..
            } => {
                gather_calls(accept, pending);
                gather_calls(reject, pending);
            }
            crate::Statement::Switch { ref cases, .. } => {
                for case in cases {
                    gather_calls(&case.body, pending);
                }
            }
            crate::Statement::Loop {
                ref body,
                ref continuing,
                ..
            } => {
                gather_calls(body, pending);
                gather_calls(continuing, pending);
            }
            _ => {}
        }
    }
}

impl Writer {
    pub fn new(options: &Options) -> Result<Self, Error> {
        let (major, minor) = options.lang_version;
        if major != 1 || !matches!(minor, 0 | 3 | 4 | 5 | 6) {
            return Err(Error::UnsupportedVersion(major, minor));
        }

        let mut capabilities = crate::FastHashSet::default();
        capabilities.insert(spirv::Capability::Shader);
        for &capability in options.capabilities.iter() {
            capabilities.insert(capability);
        }

        Ok(Writer {
            physical_layout: PhysicalLayout::new(major, minor),
            logical_layout: super::LogicalLayout::default(),
            id_gen: super::IdGenerator::default(),
            capabilities,
            debugs: Vec::new(),
            annotations: Vec::new(),
            flags: options.flags,
            void_type: 0,
            lookup_type: crate::FastHashMap::default(),
            lookup_function: crate::FastHashMap::default(),
            lookup_function_type: crate::FastHashMap::default(),
            constant_ids: Vec::new(),
            cached_constants: crate::FastHashMap::default(),
            cached_nulls: crate::FastHashMap::default(),
            decorated_blocks: crate::FastHashSet::default(),
            wrapped_structs: crate::FastHashMap::default(),
            global_variables: Vec::new(),
            cached: super::CachedExpressions::default(),
            gl450_ext_inst_id: 0,
        })
    }

    fn is_debug_enabled(&self) -> bool {
        self.flags.contains(WriterFlags::DEBUG)
    }

    fn write_debug_name(&mut self, id: Word, name: &str) {
        if self.is_debug_enabled() && !name.is_empty() {
            self.debugs.push(instruction_name(id, name));
        }
    }

    fn decorate(&mut self, id: Word, decoration: spirv::Decoration, operands: &[Word]) {
        self.annotations
            .push(instruction_decorate(id, decoration, operands));
    }

    fn request_capability(&mut self, capability: spirv::Capability) {
        self.capabilities.insert(capability);
    }

    fn request_type_capability(&mut self, kind: crate::ScalarKind, width: crate::Bytes) {
        let capability = match (kind, width) {
            (crate::ScalarKind::Float, 2) => spirv::Capability::Float16,
            (crate::ScalarKind::Float, 8) => spirv::Capability::Float64,
            (crate::ScalarKind::Sint, 1) | (crate::ScalarKind::Uint, 1) => {
                spirv::Capability::Int8
            }
            (crate::ScalarKind::Sint, 2) | (crate::ScalarKind::Uint, 2) => {
                spirv::Capability::Int16
            }
            (crate::ScalarKind::Sint, 8) | (crate::ScalarKind::Uint, 8) => {
                spirv::Capability::Int64
            }
            _ => return,
        };
        self.request_capability(capability);
    }

    fn map_address_space(&self, space: crate::AddressSpace) -> spirv::StorageClass {
        match space {
            crate::AddressSpace::Function => spirv::StorageClass::Function,
            crate::AddressSpace::Private => spirv::StorageClass::Private,
            crate::AddressSpace::WorkGroup => spirv::StorageClass::Workgroup,
            crate::AddressSpace::Uniform => spirv::StorageClass::Uniform,
            // Before SPIR-V 1.3 storage buffers are `Uniform` + `BufferBlock`.
            crate::AddressSpace::Storage { .. } => {
                if self.physical_layout.version_at_least(1, 3) {
                    spirv::StorageClass::StorageBuffer
                } else {
                    spirv::StorageClass::Uniform
                }
            }
            crate::AddressSpace::PushConstant => spirv::StorageClass::PushConstant,
            crate::AddressSpace::Handle => spirv::StorageClass::UniformConstant,
        }
    }

    fn make_local(&self, inner: &crate::TypeInner) -> Option<LocalType> {
        Some(match *inner {
            crate::TypeInner::Scalar { kind, width }
            | crate::TypeInner::Atomic { kind, width } => LocalType::Value {
                vector_size: None,
                kind,
                width,
                pointer_class: None,
            },
            crate::TypeInner::Vector { size, kind, width } => LocalType::Value {
                vector_size: Some(size),
                kind,
                width,
                pointer_class: None,
            },
            crate::TypeInner::Matrix {
                columns,
                rows,
                width,
            } => LocalType::Matrix {
                columns,
                rows,
                width,
            },
            crate::TypeInner::Pointer { base, space } => LocalType::Pointer {
                base,
                class: self.map_address_space(space),
            },
            crate::TypeInner::ValuePointer {
                size,
                kind,
                width,
                space,
            } => LocalType::Value {
                vector_size: size,
                kind,
                width,
                pointer_class: Some(self.map_address_space(space)),
            },
            crate::TypeInner::Image {
                dim,
                arrayed,
                class,
            } => LocalType::Image {
                dim,
                arrayed,
                class,
            },
            crate::TypeInner::Sampler { .. } => LocalType::Sampler,
            crate::TypeInner::Array { .. } | crate::TypeInner::Struct { .. } => return None,
        })
    }

    fn void_type_id(&mut self) -> Word {
        if self.void_type == 0 {
            self.void_type = self.id_gen.next();
            instruction_type_void(self.void_type).to_words(&mut self.logical_layout.declarations);
        }
        self.void_type
    }

    fn get_type_id(
        &mut self,
        arena: &crate::Arena<crate::Type>,
        lookup_ty: LookupType,
    ) -> Result<Word, Error> {
        if let Some(&id) = self.lookup_type.get(&lookup_ty) {
            return Ok(id);
        }
        match lookup_ty {
            LookupType::Handle(handle) => self.write_type_declaration_arena(arena, handle),
            LookupType::Local(local_ty) => self.write_type_declaration_local(arena, local_ty),
        }
    }

    fn get_pointer_id(
        &mut self,
        arena: &crate::Arena<crate::Type>,
        base: Handle<crate::Type>,
        class: spirv::StorageClass,
    ) -> Result<Word, Error> {
        self.get_type_id(arena, LookupType::Local(LocalType::Pointer { base, class }))
    }

    fn write_type_declaration_local(
        &mut self,
        arena: &crate::Arena<crate::Type>,
        local_ty: LocalType,
    ) -> Result<Word, Error> {
        let id = match local_ty {
            LocalType::Value {
                vector_size: None,
                kind,
                width,
                pointer_class: None,
            } => {
                self.request_type_capability(kind, width);
                let id = self.id_gen.next();
                let bits = (width * BITS_PER_BYTE) as u32;
                let instruction = match kind {
                    crate::ScalarKind::Sint => instruction_type_int(id, bits, Signedness::Signed),
                    crate::ScalarKind::Uint => {
                        instruction_type_int(id, bits, Signedness::Unsigned)
                    }
                    crate::ScalarKind::Float => instruction_type_float(id, bits),
                    crate::ScalarKind::Bool => instruction_type_bool(id),
                };
                instruction.to_words(&mut self.logical_layout.declarations);
                id
            }
            LocalType::Value {
                vector_size: Some(size),
                kind,
                width,
                pointer_class: None,
            } => {
                let scalar_id = self.get_type_id(
                    arena,
                    LookupType::Local(LocalType::Value {
                        vector_size: None,
                        kind,
                        width,
                        pointer_class: None,
                    }),
                )?;
                let id = self.id_gen.next();
                instruction_type_vector(id, scalar_id, size)
                    .to_words(&mut self.logical_layout.declarations);
                id
            }
            LocalType::Value {
                vector_size,
                kind,
                width,
                pointer_class: Some(class),
            } => {
                let base_id = self.get_type_id(
                    arena,
                    LookupType::Local(LocalType::Value {
                        vector_size,
                        kind,
                        width,
                        pointer_class: None,
                    }),
                )?;
                let id = self.id_gen.next();
                instruction_type_pointer(id, class, base_id)
                    .to_words(&mut self.logical_layout.declarations);
                id
            }
            LocalType::Matrix {
                columns,
                rows,
                width,
            } => {
                let column_id = self.get_type_id(
                    arena,
                    LookupType::Local(LocalType::Value {
                        vector_size: Some(rows),
                        kind: crate::ScalarKind::Float,
                        width,
                        pointer_class: None,
                    }),
                )?;
                let id = self.id_gen.next();
                instruction_type_matrix(id, column_id, columns)
                    .to_words(&mut self.logical_layout.declarations);
                id
            }
            LocalType::Pointer { base, class } => {
                let base_id = self.get_type_id(arena, LookupType::Handle(base))?;
                let id = self.id_gen.next();
                instruction_type_pointer(id, class, base_id)
                    .to_words(&mut self.logical_layout.declarations);
                id
            }
            LocalType::Image {
                dim,
                arrayed,
                class,
            } => {
                let kind = match class {
                    crate::ImageClass::Sampled { kind, .. } => kind,
                    crate::ImageClass::Depth { .. } => crate::ScalarKind::Float,
                    crate::ImageClass::Storage { format, .. } => format.scalar_kind(),
                };
                let sampled_type_id = self.get_type_id(
                    arena,
                    LookupType::Local(LocalType::Value {
                        vector_size: None,
                        kind,
                        width: 4,
                        pointer_class: None,
                    }),
                )?;
                match dim {
                    crate::ImageDimension::D1 => {
                        let capability = match class {
                            crate::ImageClass::Storage { .. } => spirv::Capability::Image1D,
                            _ => spirv::Capability::Sampled1D,
                        };
                        self.request_capability(capability);
                    }
                    crate::ImageDimension::Cube if arrayed => {
                        self.request_capability(spirv::Capability::SampledCubeArray);
                    }
                    _ => {}
                }
                let id = self.id_gen.next();
                instruction_type_image(id, sampled_type_id, helpers::map_image_dim(dim), arrayed, class)
                    .to_words(&mut self.logical_layout.declarations);
                id
            }
            LocalType::SampledImage { image_type_id } => {
                let id = self.id_gen.next();
                instruction_type_sampled_image(id, image_type_id)
                    .to_words(&mut self.logical_layout.declarations);
                id
            }
            LocalType::Sampler => {
                let id = self.id_gen.next();
                instruction_type_sampler(id).to_words(&mut self.logical_layout.declarations);
                id
            }
        };
        self.lookup_type.insert(LookupType::Local(local_ty), id);
        Ok(id)
    }

    fn write_type_declaration_arena(
        &mut self,
        arena: &crate::Arena<crate::Type>,
        handle: Handle<crate::Type>,
    ) -> Result<Word, Error> {
        let ty = &arena[handle];
        let id = if let Some(local) = self.make_local(&ty.inner) {
            let id = self.get_type_id(arena, LookupType::Local(local))?;
            self.lookup_type.insert(LookupType::Handle(handle), id);
            id
        } else {
            match ty.inner {
                crate::TypeInner::Array { base, size, stride } => {
                    let element_id = self.get_type_id(arena, LookupType::Handle(base))?;
                    let id = match size {
                        crate::ArraySize::Constant(length) => {
                            let length_id = self.get_index_constant(length, arena)?;
                            let id = self.id_gen.next();
                            instruction_type_array(id, element_id, length_id)
                                .to_words(&mut self.logical_layout.declarations);
                            id
                        }
                        crate::ArraySize::Dynamic => {
                            let id = self.id_gen.next();
                            instruction_type_runtime_array(id, element_id)
                                .to_words(&mut self.logical_layout.declarations);
                            id
                        }
                    };
                    self.decorate(id, spirv::Decoration::ArrayStride, &[stride]);
                    self.lookup_type.insert(LookupType::Handle(handle), id);
                    id
                }
                crate::TypeInner::Struct { ref members, .. } => {
                    let mut member_ids = Vec::with_capacity(members.len());
                    for member in members.iter() {
                        member_ids.push(self.get_type_id(arena, LookupType::Handle(member.ty))?);
                    }
                    let id = self.id_gen.next();
                    instruction_type_struct(id, &member_ids)
                        .to_words(&mut self.logical_layout.declarations);
                    self.lookup_type.insert(LookupType::Handle(handle), id);
                    for (index, member) in members.iter().enumerate() {
                        self.annotations.push(instruction_member_decorate(
                            id,
                            index as u32,
                            spirv::Decoration::Offset,
                            &[member.offset],
                        ));
                        if let crate::TypeInner::Matrix { rows, width, .. } =
                            arena[member.ty].inner
                        {
                            let stride = match rows {
                                crate::VectorSize::Bi => 2 * width as u32,
                                crate::VectorSize::Tri | crate::VectorSize::Quad => {
                                    4 * width as u32
                                }
                            };
                            self.annotations.push(instruction_member_decorate(
                                id,
                                index as u32,
                                spirv::Decoration::ColMajor,
                                &[],
                            ));
                            self.annotations.push(instruction_member_decorate(
                                id,
                                index as u32,
                                spirv::Decoration::MatrixStride,
                                &[stride],
                            ));
                        }
                        if self.is_debug_enabled() {
                            if let Some(ref name) = member.name {
                                self.debugs.push(instruction_member_name(
                                    id,
                                    index as u32,
                                    name,
                                ));
                            }
                        }
                    }
                    id
                }
                // `make_local` covers every other variant.
                _ => return Err(Error::Validation("unexpected type variant in the arena")),
            }
        };
        if let Some(ref name) = ty.name {
            self.write_debug_name(id, name);
        }
        Ok(id)
    }

    fn get_function_type(&mut self, lookup: LookupFunctionType) -> Word {
        if let Some(&id) = self.lookup_function_type.get(&lookup) {
            return id;
        }
        let id = self.id_gen.next();
        instruction_type_function(id, lookup.return_type_id, &lookup.parameter_type_ids)
            .to_words(&mut self.logical_layout.declarations);
        self.lookup_function_type.insert(lookup, id);
        id
    }

    fn get_constant_scalar(
        &mut self,
        arena: &crate::Arena<crate::Type>,
        value: crate::ScalarValue,
        width: crate::Bytes,
    ) -> Result<Word, Error> {
        // Canonicalize the bit pattern so equal emitted words share one id.
        let (kind, bits) = match value {
            crate::ScalarValue::Sint(v) => (
                crate::ScalarKind::Sint,
                match width {
                    1 => (v as u32 & 0xff) as u64,
                    2 => (v as u32 & 0xffff) as u64,
                    4 => (v as i32 as u32) as u64,
                    _ => v as u64,
                },
            ),
            crate::ScalarValue::Uint(v) => (
                crate::ScalarKind::Uint,
                match width {
                    1 => v & 0xff,
                    2 => v & 0xffff,
                    4 => v & 0xffff_ffff,
                    _ => v,
                },
            ),
            crate::ScalarValue::Float(v) => (
                crate::ScalarKind::Float,
                match width {
                    4 => (v as f32).to_bits() as u64,
                    8 => v.to_bits(),
                    _ => return Err(Error::FeatureNotImplemented("16-bit literals")),
                },
            ),
            crate::ScalarValue::Bool(v) => (crate::ScalarKind::Bool, v as u64),
        };
        let key = (kind, width, bits);
        if let Some(&id) = self.cached_constants.get(&key) {
            return Ok(id);
        }

        let type_id = self.get_type_id(
            arena,
            LookupType::Local(LocalType::Value {
                vector_size: None,
                kind,
                width,
                pointer_class: None,
            }),
        )?;
        let id = self.id_gen.next();
        let instruction = match value {
            crate::ScalarValue::Bool(true) => instruction_constant_true(type_id, id),
            crate::ScalarValue::Bool(false) => instruction_constant_false(type_id, id),
            _ => {
                if width == 8 {
                    let low = bits as u32;
                    let high = (bits >> 32) as u32;
                    instruction_constant(type_id, id, &[low, high])
                } else {
                    instruction_constant(type_id, id, &[bits as u32])
                }
            }
        };
        instruction.to_words(&mut self.logical_layout.declarations);
        self.cached_constants.insert(key, id);
        Ok(id)
    }

    fn get_index_constant(
        &mut self,
        index: u32,
        arena: &crate::Arena<crate::Type>,
    ) -> Result<Word, Error> {
        self.get_constant_scalar(arena, crate::ScalarValue::Uint(index as u64), 4)
    }

    fn get_constant_null(&mut self, type_id: Word) -> Word {
        if let Some(&id) = self.cached_nulls.get(&type_id) {
            return id;
        }
        let id = self.id_gen.next();
        instruction_constant_null(type_id, id).to_words(&mut self.logical_layout.declarations);
        self.cached_nulls.insert(type_id, id);
        id
    }

    fn write_constant(
        &mut self,
        module: &crate::Module,
        handle: Handle<crate::Constant>,
    ) -> Result<Word, Error> {
        let constant = &module.constants[handle];
        let id = match constant.inner {
            crate::ConstantInner::Scalar { width, value } => {
                self.get_constant_scalar(&module.types, value, width)?
            }
            crate::ConstantInner::Composite { ref components } => {
                let type_id = self.get_type_id(&module.types, LookupType::Handle(constant.ty))?;
                let mut constituent_ids = Vec::with_capacity(components.len());
                for &component in components.iter() {
                    let constituent_id = *self
                        .constant_ids
                        .get(component.index())
                        .ok_or(Error::Validation("composite refers to a later constant"))?;
                    constituent_ids.push(constituent_id);
                }
                let id = self.id_gen.next();
                instruction_constant_composite(type_id, id, &constituent_ids)
                    .to_words(&mut self.logical_layout.declarations);
                id
            }
        };
        if let Some(ref name) = constant.name {
            self.write_debug_name(id, name);
        }
        Ok(id)
    }

    fn decorate_block(&mut self, struct_id: Word, space: crate::AddressSpace) {
        if self.decorated_blocks.insert(struct_id) {
            let decoration = match space {
                crate::AddressSpace::Storage { .. }
                    if !self.physical_layout.version_at_least(1, 3) =>
                {
                    spirv::Decoration::BufferBlock
                }
                _ => spirv::Decoration::Block,
            };
            self.decorate(struct_id, decoration, &[]);
        }
    }

    fn write_global_variable(
        &mut self,
        module: &crate::Module,
        handle: Handle<crate::GlobalVariable>,
    ) -> Result<GlobalVariable, Error> {
        let var = &module.global_variables[handle];
        let class = self.map_address_space(var.space);
        let init_id = var.init.map(|constant| self.constant_ids[constant.index()]);

        let is_block_space = matches!(
            var.space,
            crate::AddressSpace::Uniform
                | crate::AddressSpace::Storage { .. }
                | crate::AddressSpace::PushConstant
        );
        let mut wrapped = false;
        let pointer_type_id = if is_block_space {
            match module.types[var.ty].inner {
                crate::TypeInner::Struct { .. } => {
                    let struct_id = self.get_type_id(&module.types, LookupType::Handle(var.ty))?;
                    self.decorate_block(struct_id, var.space);
                    self.get_pointer_id(&module.types, var.ty, class)?
                }
                _ if matches!(var.space, crate::AddressSpace::Storage { .. }) => {
                    // Vulkan wants a `Block` struct here; wrap the type and
                    // remember to index through the synthesized member.
                    wrapped = true;
                    let inner_id = self.get_type_id(&module.types, LookupType::Handle(var.ty))?;
                    match self.wrapped_structs.get(&inner_id) {
                        Some(&(_, pointer_id)) => pointer_id,
                        None => {
                            let struct_id = self.id_gen.next();
                            instruction_type_struct(struct_id, &[inner_id])
                                .to_words(&mut self.logical_layout.declarations);
                            self.annotations.push(instruction_member_decorate(
                                struct_id,
                                0,
                                spirv::Decoration::Offset,
                                &[0],
                            ));
                            self.decorate_block(struct_id, var.space);
                            let pointer_id = self.id_gen.next();
                            instruction_type_pointer(pointer_id, class, struct_id)
                                .to_words(&mut self.logical_layout.declarations);
                            self.wrapped_structs.insert(inner_id, (struct_id, pointer_id));
                            pointer_id
                        }
                    }
                }
                _ => self.get_pointer_id(&module.types, var.ty, class)?,
            }
        } else {
            self.get_pointer_id(&module.types, var.ty, class)?
        };

        let id = self.id_gen.next();
        instruction_variable(pointer_type_id, id, class, init_id)
            .to_words(&mut self.logical_layout.declarations);
        if let Some(ref name) = var.name {
            self.write_debug_name(id, name);
        }
        if let Some(ref binding) = var.binding {
            self.decorate(id, spirv::Decoration::DescriptorSet, &[binding.group]);
            self.decorate(id, spirv::Decoration::Binding, &[binding.binding]);
        }
        if let crate::AddressSpace::Storage { access } = var.space {
            if !access.contains(crate::StorageAccess::STORE) {
                self.decorate(id, spirv::Decoration::NonWritable, &[]);
            }
        }
        Ok(GlobalVariable {
            id,
            handle_id: 0,
            wrapped,
        })
    }

    fn write_varying(
        &mut self,
        module: &crate::Module,
        class: spirv::StorageClass,
        debug_name: Option<&str>,
        ty: Handle<crate::Type>,
        binding: &crate::Binding,
        stage: crate::ShaderStage,
    ) -> Result<Word, Error> {
        let pointer_type_id = self.get_pointer_id(&module.types, ty, class)?;
        let id = self.id_gen.next();
        instruction_variable(pointer_type_id, id, class, None)
            .to_words(&mut self.logical_layout.declarations);
        if let Some(name) = debug_name {
            self.write_debug_name(id, name);
        }
        match *binding {
            crate::Binding::BuiltIn(built_in) => {
                let spv_builtin =
                    helpers::map_builtin(built_in, class == spirv::StorageClass::Output);
                self.decorate(id, spirv::Decoration::BuiltIn, &[spv_builtin as u32]);
            }
            crate::Binding::Location {
                location,
                interpolation,
            } => {
                self.decorate(id, spirv::Decoration::Location, &[location]);
                match interpolation {
                    Some(crate::Interpolation::Flat) => {
                        self.decorate(id, spirv::Decoration::Flat, &[]);
                    }
                    Some(crate::Interpolation::Linear) => {
                        self.decorate(id, spirv::Decoration::NoPerspective, &[]);
                    }
                    Some(crate::Interpolation::Perspective) => {}
                    None => {
                        // Vulkan requires integer fragment inputs to be flat.
                        let is_integer = matches!(
                            module.types[ty].inner.scalar_kind(),
                            Some(crate::ScalarKind::Sint) | Some(crate::ScalarKind::Uint)
                        );
                        if is_integer
                            && class == spirv::StorageClass::Input
                            && stage == crate::ShaderStage::Fragment
                        {
                            self.decorate(id, spirv::Decoration::Flat, &[]);
                        }
                    }
                }
            }
        }
        Ok(id)
    }

    fn gather_used_globals(
        &self,
        module: &crate::Module,
        fun_handle: Handle<crate::Function>,
        used: &mut crate::FastHashSet<Handle<crate::GlobalVariable>>,
    ) {
        let mut pending = vec![fun_handle];
        let mut visited = crate::FastHashSet::default();
        while let Some(handle) = pending.pop() {
            if !visited.insert(handle) {
                continue;
            }
            let fun = &module.functions[handle];
            for (_, expression) in fun.expressions.iter() {
                match *expression {
                    crate::Expression::GlobalVariable(gv) => {
                        used.insert(gv);
                    }
                    crate::Expression::CallResult(callee) => pending.push(callee),
                    _ => {}
                }
            }
            gather_calls(&fun.body, &mut pending);
        }
    }

    fn binding_writes_frag_depth(
        &self,
        module: &crate::Module,
        result: &crate::FunctionResult,
    ) -> bool {
        let frag_depth = crate::Binding::BuiltIn(crate::BuiltIn::FragDepth);
        match result.binding {
            Some(ref binding) => *binding == frag_depth,
            None => match module.types[result.ty].inner {
                crate::TypeInner::Struct { ref members, .. } => members
                    .iter()
                    .any(|member| member.binding.as_ref() == Some(&frag_depth)),
                _ => false,
            },
        }
    }

    fn write_function(
        &mut self,
        ir_function: &crate::Function,
        module: &crate::Module,
        entry_point: Option<&crate::EntryPoint>,
        interface_ids: &mut Vec<Word>,
    ) -> Result<Word, Error> {
        if ir_function.expression_types.len() != ir_function.expressions.len() {
            return Err(Error::Validation(
                "expression types are out of sync; run the validator first",
            ));
        }

        let mut function = Function::default();

        let return_type_id = match entry_point {
            Some(_) => self.void_type_id(),
            None => match ir_function.result {
                Some(ref result) => {
                    self.get_type_id(&module.types, LookupType::Handle(result.ty))?
                }
                None => self.void_type_id(),
            },
        };

        let fun_id = self.id_gen.next();
        let mut parameter_type_ids = Vec::new();
        let prelude_id = self.id_gen.next();
        let mut prelude = Block::new(prelude_id);

        match entry_point {
            Some(ep) => {
                let input = spirv::StorageClass::Input;
                let mut argument_ids = Vec::new();
                for argument in ir_function.arguments.iter() {
                    let argument_type_id =
                        self.get_type_id(&module.types, LookupType::Handle(argument.ty))?;
                    match argument.binding {
                        Some(ref binding) => {
                            let varying_id = self.write_varying(
                                module,
                                input,
                                argument.name.as_deref(),
                                argument.ty,
                                binding,
                                ep.stage,
                            )?;
                            interface_ids.push(varying_id);
                            let load_id = self.id_gen.next();
                            prelude
                                .body
                                .push(instruction_load(argument_type_id, load_id, varying_id, None));
                            argument_ids.push(load_id);
                        }
                        None => {
                            let members = match module.types[argument.ty].inner {
                                crate::TypeInner::Struct { ref members, .. } => members,
                                _ => {
                                    return Err(Error::Validation(
                                        "an unbound entry point argument must be a struct",
                                    ))
                                }
                            };
                            let mut constituent_ids = Vec::with_capacity(members.len());
                            for member in members.iter() {
                                let type_id = self
                                    .get_type_id(&module.types, LookupType::Handle(member.ty))?;
                                let binding = member.binding.as_ref().ok_or(Error::Validation(
                                    "an entry point input member is missing its binding",
                                ))?;
                                let varying_id = self.write_varying(
                                    module,
                                    input,
                                    member.name.as_deref(),
                                    member.ty,
                                    binding,
                                    ep.stage,
                                )?;
                                interface_ids.push(varying_id);
                                let load_id = self.id_gen.next();
                                prelude
                                    .body
                                    .push(instruction_load(type_id, load_id, varying_id, None));
                                constituent_ids.push(load_id);
                            }
                            let composite_id = self.id_gen.next();
                            prelude.body.push(instruction_composite_construct(
                                argument_type_id,
                                composite_id,
                                &constituent_ids,
                            ));
                            // Materialize the composed struct in a
                            // function-scope variable living in the entry block.
                            let pointer_type_id = self.get_pointer_id(
                                &module.types,
                                argument.ty,
                                spirv::StorageClass::Function,
                            )?;
                            let local_id = self.id_gen.next();
                            function.internal_variables.push(LocalVariable {
                                id: local_id,
                                instruction: instruction_variable(
                                    pointer_type_id,
                                    local_id,
                                    spirv::StorageClass::Function,
                                    None,
                                ),
                            });
                            prelude
                                .body
                                .push(instruction_store(local_id, composite_id, None));
                            let loaded_id = self.id_gen.next();
                            prelude.body.push(instruction_load(
                                argument_type_id,
                                loaded_id,
                                local_id,
                                None,
                            ));
                            argument_ids.push(loaded_id);
                        }
                    }
                }

                let output = spirv::StorageClass::Output;
                let mut results = Vec::new();
                if let Some(ref result) = ir_function.result {
                    match result.binding {
                        Some(ref binding) => {
                            let type_id =
                                self.get_type_id(&module.types, LookupType::Handle(result.ty))?;
                            let varying_id = self
                                .write_varying(module, output, None, result.ty, binding, ep.stage)?;
                            interface_ids.push(varying_id);
                            results.push(ResultMember {
                                id: varying_id,
                                type_id,
                            });
                        }
                        None => {
                            let members = match module.types[result.ty].inner {
                                crate::TypeInner::Struct { ref members, .. } => members,
                                _ => {
                                    return Err(Error::Validation(
                                        "an unbound entry point result must be a struct",
                                    ))
                                }
                            };
                            for member in members.iter() {
                                let type_id = self
                                    .get_type_id(&module.types, LookupType::Handle(member.ty))?;
                                let binding = member.binding.as_ref().ok_or(Error::Validation(
                                    "an entry point output member is missing its binding",
                                ))?;
                                let varying_id = self.write_varying(
                                    module,
                                    output,
                                    member.name.as_deref(),
                                    member.ty,
                                    binding,
                                    ep.stage,
                                )?;
                                interface_ids.push(varying_id);
                                results.push(ResultMember {
                                    id: varying_id,
                                    type_id,
                                });
                            }
                        }
                    }
                }
                function.entry_point_context = Some(EntryPointContext {
                    argument_ids,
                    results,
                });
                self.write_debug_name(fun_id, &ep.name);
            }
            None => {
                for argument in ir_function.arguments.iter() {
                    let argument_type_id =
                        self.get_type_id(&module.types, LookupType::Handle(argument.ty))?;
                    parameter_type_ids.push(argument_type_id);
                    let param_id = self.id_gen.next();
                    if let Some(ref name) = argument.name {
                        self.write_debug_name(param_id, name);
                    }
                    function
                        .parameters
                        .push(instruction_function_parameter(argument_type_id, param_id));
                }
                if let Some(ref name) = ir_function.name {
                    self.write_debug_name(fun_id, name);
                }
            }
        }

        let function_type_id = self.get_function_type(LookupFunctionType {
            parameter_type_ids,
            return_type_id,
        });
        function.signature = Some(instruction_function(
            return_type_id,
            fun_id,
            spirv::FunctionControl::NONE,
            function_type_id,
        ));

        for (lv_handle, lv) in ir_function.local_variables.iter() {
            let pointer_type_id =
                self.get_pointer_id(&module.types, lv.ty, spirv::StorageClass::Function)?;
            let id = self.id_gen.next();
            if let Some(ref name) = lv.name {
                self.write_debug_name(id, name);
            }
            function.variables.insert(
                lv_handle,
                LocalVariable {
                    id,
                    instruction: instruction_variable(
                        pointer_type_id,
                        id,
                        spirv::StorageClass::Function,
                        None,
                    ),
                },
            );
        }

        self.cached.reset(ir_function.expressions.len());
        for gv in self.global_variables.iter_mut() {
            gv.handle_id = 0;
        }

        let mut context = BlockContext {
            writer: self,
            module,
            ir_function,
            function: &mut function,
            deferred_direct: crate::FastHashMap::default(),
            deferred_complex: crate::FastHashMap::default(),
        };

        // Pre-emitted expressions are live from the start of the body; call
        // and atomic results only become available at their statement.
        for (handle, expression) in ir_function.expressions.iter() {
            match *expression {
                crate::Expression::CallResult(_) | crate::Expression::AtomicResult { .. } => {}
                ref other if other.needs_pre_emit() => {
                    context.cache_expression_value(handle, &mut prelude)?
                }
                _ => {}
            }
        }

        // Local initializers run in the prologue, except those that wait for
        // a call or atomic result.
        for (lv_handle, lv) in ir_function.local_variables.iter() {
            let init = match lv.init {
                Some(init) => init,
                None => continue,
            };
            let variable_id = context.function.variables[&lv_handle].id;
            match find_result_producer(ir_function, init) {
                Some(producer) => {
                    if producer == init && !context.deferred_direct.contains_key(&producer) {
                        context.deferred_direct.insert(producer, variable_id);
                    } else {
                        context
                            .deferred_complex
                            .entry(producer)
                            .or_insert_with(Vec::new)
                            .push((variable_id, init));
                    }
                }
                None => {
                    context.cache_expression_value(init, &mut prelude)?;
                    let value_id = context.writer.cached[init];
                    prelude
                        .body
                        .push(instruction_store(variable_id, value_id, None));
                }
            }
        }

        let main_id = context.writer.id_gen.next();
        context
            .function
            .consume(prelude, instruction_branch(main_id));
        context.write_block(
            main_id,
            &ir_function.body,
            BlockExit::Return,
            LoopContext::default(),
        )?;

        function.to_words(&mut self.logical_layout.function_definitions);
        instruction_function_end().to_words(&mut self.logical_layout.function_definitions);

        Ok(fun_id)
    }

    pub fn write(&mut self, module: &crate::Module, words: &mut Vec<Word>) -> Result<(), Error> {
        log::debug!(
            "writing {} functions and {} entry points",
            module.functions.len(),
            module.entry_points.len()
        );
        let gl450 = self.id_gen.next();
        self.gl450_ext_inst_id = gl450;
        instruction_ext_inst_import(gl450, "GLSL.std.450")
            .to_words(&mut self.logical_layout.ext_inst_imports);

        instruction_memory_model(spirv::AddressingModel::Logical, spirv::MemoryModel::GLSL450)
            .to_words(&mut self.logical_layout.memory_model);

        if self.is_debug_enabled() {
            self.debugs
                .push(instruction_source(spirv::SourceLanguage::Unknown, 0));
        }

        self.constant_ids.clear();
        for (handle, _) in module.constants.iter() {
            let id = self.write_constant(module, handle)?;
            self.constant_ids.push(id);
        }

        for (handle, _) in module.global_variables.iter() {
            let gv = self.write_global_variable(module, handle)?;
            self.global_variables.push(gv);
        }

        let mut ep_map = crate::FastHashMap::default();
        for (index, ep) in module.entry_points.iter().enumerate() {
            if ep_map.insert(ep.function, index).is_some() {
                return Err(Error::Validation(
                    "a function is used by multiple entry points",
                ));
            }
        }

        let mut entry_infos = Vec::new();
        for (handle, ir_function) in module.functions.iter() {
            let ep = ep_map.get(&handle).map(|&index| &module.entry_points[index]);
            let mut interface_ids = Vec::new();
            let id = self.write_function(ir_function, module, ep, &mut interface_ids)?;
            self.lookup_function.insert(handle, id);
            if let Some(&ep_index) = ep_map.get(&handle) {
                entry_infos.push((ep_index, id, interface_ids));
            }
        }

        for (ep_index, fun_id, mut interface_ids) in entry_infos {
            let ep = &module.entry_points[ep_index];
            if self.physical_layout.version_at_least(1, 4) {
                // From 1.4 on, the interface also lists every used global.
                let mut used = crate::FastHashSet::default();
                self.gather_used_globals(module, ep.function, &mut used);
                let mut global_ids: Vec<Word> = used
                    .iter()
                    .map(|handle| self.global_variables[handle.index()].id)
                    .collect();
                global_ids.sort_unstable();
                interface_ids.extend(global_ids);
            }
            let exec_model = match ep.stage {
                crate::ShaderStage::Vertex => spirv::ExecutionModel::Vertex,
                crate::ShaderStage::Fragment => spirv::ExecutionModel::Fragment,
                crate::ShaderStage::Compute => spirv::ExecutionModel::GLCompute,
            };
            instruction_entry_point(exec_model, fun_id, &ep.name, &interface_ids)
                .to_words(&mut self.logical_layout.entry_points);
            match ep.stage {
                crate::ShaderStage::Vertex => {}
                crate::ShaderStage::Fragment => {
                    instruction_execution_mode(
                        fun_id,
                        spirv::ExecutionMode::OriginUpperLeft,
                        &[],
                    )
                    .to_words(&mut self.logical_layout.execution_modes);
                    if let Some(ref result) = module.functions[ep.function].result {
                        if self.binding_writes_frag_depth(module, result) {
                            instruction_execution_mode(
                                fun_id,
                                spirv::ExecutionMode::DepthReplacing,
                                &[],
                            )
                            .to_words(&mut self.logical_layout.execution_modes);
                        }
                    }
                }
                crate::ShaderStage::Compute => {
                    instruction_execution_mode(
                        fun_id,
                        spirv::ExecutionMode::LocalSize,
                        &ep.workgroup_size,
                    )
                    .to_words(&mut self.logical_layout.execution_modes);
                }
            }
        }

        // Sorted, so that identical inputs produce identical binaries.
        let mut capabilities: Vec<_> = self.capabilities.iter().cloned().collect();
        capabilities.sort_unstable_by_key(|&capability| capability as u32);
        for capability in capabilities {
            instruction_capability(capability).to_words(&mut self.logical_layout.capabilities);
        }

        for debug in self.debugs.iter() {
            debug.to_words(&mut self.logical_layout.debugs);
        }
        for annotation in self.annotations.iter() {
            annotation.to_words(&mut self.logical_layout.annotations);
        }

        self.physical_layout.bound = self.id_gen.0 + 1;
        self.physical_layout.in_words(words);
        self.logical_layout.in_words(words);
        Ok(())
    }
}

struct BlockContext<'w> {
    writer: &'w mut Writer,
    module: &'w crate::Module,
    ir_function: &'w crate::Function,
    function: &'w mut Function,
    /// Local variables whose initializer is exactly a call or atomic result:
    /// producer handle to the variable's pointer id.
    deferred_direct: crate::FastHashMap<Handle<crate::Expression>, Word>,
    /// Local variables whose initializer contains a call or atomic result:
    /// producer handle to `(pointer id, initializer)` pairs, evaluated at the
    /// producing statement.
    deferred_complex:
        crate::FastHashMap<Handle<crate::Expression>, Vec<(Word, Handle<crate::Expression>)>>,
}

enum MathOp {
    Ext(spirv::GLOp),
    Custom(Op),
}

impl<'w> BlockContext<'w> {
    fn gen_id(&mut self) -> Word {
        self.writer.id_gen.next()
    }

    fn expr_inner(&self, handle: Handle<crate::Expression>) -> &'w crate::TypeInner {
        self.ir_function.expression_types[handle.index()].inner_with(&self.module.types)
    }

    fn expression_type_id(&mut self, handle: Handle<crate::Expression>) -> Result<Word, Error> {
        let ir_function = self.ir_function;
        match ir_function.expression_types[handle.index()] {
            TypeResolution::Handle(ty) => self
                .writer
                .get_type_id(&self.module.types, LookupType::Handle(ty)),
            TypeResolution::Value(ref inner) => {
                let local = self
                    .writer
                    .make_local(inner)
                    .ok_or(Error::Validation("expression type is not representable"))?;
                self.writer
                    .get_type_id(&self.module.types, LookupType::Local(local))
            }
        }
    }

    fn get_scalar_type_id(
        &mut self,
        kind: crate::ScalarKind,
        width: crate::Bytes,
    ) -> Result<Word, Error> {
        self.writer.get_type_id(
            &self.module.types,
            LookupType::Local(LocalType::Value {
                vector_size: None,
                kind,
                width,
                pointer_class: None,
            }),
        )
    }

    fn get_vector_type_id(
        &mut self,
        size: crate::VectorSize,
        kind: crate::ScalarKind,
        width: crate::Bytes,
    ) -> Result<Word, Error> {
        self.writer.get_type_id(
            &self.module.types,
            LookupType::Local(LocalType::Value {
                vector_size: Some(size),
                kind,
                width,
                pointer_class: None,
            }),
        )
    }

    fn ensure_cached(
        &mut self,
        handle: Handle<crate::Expression>,
        block: &mut Block,
    ) -> Result<Word, Error> {
        if !self.writer.cached.has(handle) {
            self.cache_expression_value(handle, block)?;
        }
        Ok(self.writer.cached[handle])
    }

    fn splat_scalar(
        &mut self,
        scalar_id: Word,
        size: crate::VectorSize,
        kind: crate::ScalarKind,
        width: crate::Bytes,
        block: &mut Block,
    ) -> Result<Word, Error> {
        let type_id = self.get_vector_type_id(size, kind, width)?;
        let components = vec![scalar_id; size as usize];
        let id = self.gen_id();
        block
            .body
            .push(instruction_composite_construct(type_id, id, &components));
        Ok(id)
    }

    /// Emits the instructions computing the value of the given expression,
    /// and caches the result id. Cached expressions are not re-emitted.
    fn cache_expression_value(
        &mut self,
        expr_handle: Handle<crate::Expression>,
        block: &mut Block,
    ) -> Result<(), Error> {
        if self.writer.cached.has(expr_handle) {
            return Ok(());
        }
        let module = self.module;
        let ir_function = self.ir_function;

        let result_id = match ir_function.expressions[expr_handle] {
            crate::Expression::Literal(literal) => {
                let (value, width) = match literal {
                    crate::Literal::F64(v) => (crate::ScalarValue::Float(v), 8),
                    crate::Literal::F32(v) => (crate::ScalarValue::Float(v as f64), 4),
                    crate::Literal::U32(v) => (crate::ScalarValue::Uint(v as u64), 4),
                    crate::Literal::I32(v) => (crate::ScalarValue::Sint(v as i64), 4),
                    crate::Literal::Bool(v) => (crate::ScalarValue::Bool(v), 1),
                };
                self.writer.get_constant_scalar(&module.types, value, width)?
            }
            crate::Expression::Constant(handle) => self.writer.constant_ids[handle.index()],
            crate::Expression::ZeroValue(ty) => {
                let type_id = self
                    .writer
                    .get_type_id(&module.types, LookupType::Handle(ty))?;
                self.writer.get_constant_null(type_id)
            }
            crate::Expression::Compose { ref components, .. } => {
                let mut constituent_ids = Vec::with_capacity(components.len());
                for &component in components.iter() {
                    constituent_ids.push(self.ensure_cached(component, block)?);
                }
                let type_id = self.expression_type_id(expr_handle)?;
                let id = self.gen_id();
                block
                    .body
                    .push(instruction_composite_construct(type_id, id, &constituent_ids));
                id
            }
            crate::Expression::Access { base, index } => {
                let base_inner = self.expr_inner(base);
                if is_pointer_inner(base_inner) {
                    self.load_through_pointer(expr_handle, block)?
                } else {
                    match *base_inner {
                        crate::TypeInner::Vector { .. } => {
                            let base_id = self.ensure_cached(base, block)?;
                            let index_id = self.ensure_cached(index, block)?;
                            let type_id = self.expression_type_id(expr_handle)?;
                            let id = self.gen_id();
                            block.body.push(instruction_vector_extract_dynamic(
                                type_id, id, base_id, index_id,
                            ));
                            id
                        }
                        _ => {
                            return Err(Error::FeatureNotImplemented(
                                "dynamic indexing of composite values",
                            ))
                        }
                    }
                }
            }
            crate::Expression::AccessIndex { base, index } => {
                let base_inner = self.expr_inner(base);
                if is_pointer_inner(base_inner) {
                    self.load_through_pointer(expr_handle, block)?
                } else {
                    let base_id = self.ensure_cached(base, block)?;
                    let type_id = self.expression_type_id(expr_handle)?;
                    let id = self.gen_id();
                    block
                        .body
                        .push(instruction_composite_extract(type_id, id, base_id, &[index]));
                    id
                }
            }
            crate::Expression::Splat { size, value } => {
                let value_id = self.ensure_cached(value, block)?;
                let type_id = self.expression_type_id(expr_handle)?;
                let components = vec![value_id; size as usize];
                let id = self.gen_id();
                block
                    .body
                    .push(instruction_composite_construct(type_id, id, &components));
                id
            }
            crate::Expression::Swizzle {
                size,
                vector,
                pattern,
            } => {
                let vector_id = self.ensure_cached(vector, block)?;
                let type_id = self.expression_type_id(expr_handle)?;
                let components: Vec<Word> = pattern[..size as usize]
                    .iter()
                    .map(|&sc| sc as Word)
                    .collect();
                let id = self.gen_id();
                block.body.push(instruction_vector_shuffle(
                    type_id,
                    id,
                    vector_id,
                    vector_id,
                    &components,
                ));
                id
            }
            crate::Expression::FunctionArgument(index) => self.function.parameter_id(index),
            crate::Expression::GlobalVariable(handle) => {
                let index = handle.index();
                if module.global_variables[handle].space == crate::AddressSpace::Handle {
                    // Loaded once per function, in the prelude.
                    let current = self.writer.global_variables[index].handle_id;
                    if current != 0 {
                        current
                    } else {
                        let var_type_id = self.writer.get_type_id(
                            &module.types,
                            LookupType::Handle(module.global_variables[handle].ty),
                        )?;
                        let var_id = self.writer.global_variables[index].id;
                        let id = self.writer.id_gen.next();
                        block
                            .body
                            .push(instruction_load(var_type_id, id, var_id, None));
                        self.writer.global_variables[index].handle_id = id;
                        id
                    }
                } else {
                    self.writer.global_variables[index].id
                }
            }
            crate::Expression::LocalVariable(handle) => self.function.variables[&handle].id,
            crate::Expression::Load { pointer } => {
                let is_atomic = match *self.expr_inner(pointer) {
                    crate::TypeInner::Pointer { base, .. } => {
                        matches!(module.types[base].inner, crate::TypeInner::Atomic { .. })
                    }
                    _ => false,
                };
                let (pointer_id, _) = self.write_expression_pointer(pointer, block)?;
                let type_id = self.expression_type_id(expr_handle)?;
                let id = self.gen_id();
                if is_atomic {
                    let scope_id = self
                        .writer
                        .get_index_constant(spirv::Scope::Device as u32, &module.types)?;
                    let semantics_id = self
                        .writer
                        .get_index_constant(spirv::MemorySemantics::NONE.bits(), &module.types)?;
                    block.body.push(instruction_atomic_load(
                        type_id,
                        id,
                        pointer_id,
                        scope_id,
                        semantics_id,
                    ));
                } else {
                    block
                        .body
                        .push(instruction_load(type_id, id, pointer_id, None));
                }
                id
            }
            crate::Expression::ImageSample {
                image,
                sampler,
                coordinate,
                array_index,
                level,
                depth_ref,
            } => self.write_image_sample(
                expr_handle,
                image,
                sampler,
                coordinate,
                array_index,
                level,
                depth_ref,
                block,
            )?,
            crate::Expression::ImageLoad {
                image,
                coordinate,
                array_index,
                index,
            } => self.write_image_load(expr_handle, image, coordinate, array_index, index, block)?,
            crate::Expression::ImageQuery { image, query } => {
                self.write_image_query(expr_handle, image, query, block)?
            }
            crate::Expression::Unary { op, expr } => {
                let operand_id = self.ensure_cached(expr, block)?;
                let kind = self
                    .expr_inner(expr)
                    .scalar_kind()
                    .ok_or(Error::Validation("unary operand has no scalar kind"))?;
                let spirv_op = match op {
                    crate::UnaryOperator::Negate => match kind {
                        crate::ScalarKind::Float => Op::FNegate,
                        crate::ScalarKind::Sint => Op::SNegate,
                        _ => return Err(Error::Validation("cannot negate this type")),
                    },
                    crate::UnaryOperator::Not => match kind {
                        crate::ScalarKind::Bool => Op::LogicalNot,
                        crate::ScalarKind::Sint | crate::ScalarKind::Uint => Op::Not,
                        crate::ScalarKind::Float => {
                            return Err(Error::Validation("cannot apply `not` to a float"))
                        }
                    },
                };
                let type_id = self.expression_type_id(expr_handle)?;
                let id = self.gen_id();
                block
                    .body
                    .push(instruction_unary(spirv_op, type_id, id, operand_id));
                id
            }
            crate::Expression::Binary { op, left, right } => {
                self.write_binary(expr_handle, op, left, right, block)?
            }
            crate::Expression::Select {
                condition,
                accept,
                reject,
            } => self.write_select(expr_handle, condition, accept, reject, block)?,
            crate::Expression::Derivative { axis, ctrl, expr } => {
                use crate::{DerivativeAxis as Da, DerivativeControl as Dc};
                if !matches!(ctrl, Dc::None) {
                    self.writer
                        .request_capability(spirv::Capability::DerivativeControl);
                }
                let operand_id = self.ensure_cached(expr, block)?;
                let spirv_op = match (axis, ctrl) {
                    (Da::X, Dc::None) => Op::DPdx,
                    (Da::X, Dc::Coarse) => Op::DPdxCoarse,
                    (Da::X, Dc::Fine) => Op::DPdxFine,
                    (Da::Y, Dc::None) => Op::DPdy,
                    (Da::Y, Dc::Coarse) => Op::DPdyCoarse,
                    (Da::Y, Dc::Fine) => Op::DPdyFine,
                    (Da::Width, Dc::None) => Op::Fwidth,
                    (Da::Width, Dc::Coarse) => Op::FwidthCoarse,
                    (Da::Width, Dc::Fine) => Op::FwidthFine,
                };
                let type_id = self.expression_type_id(expr_handle)?;
                let id = self.gen_id();
                block
                    .body
                    .push(instruction_unary(spirv_op, type_id, id, operand_id));
                id
            }
            crate::Expression::Relational { fun, argument } => {
                let operand_id = self.ensure_cached(argument, block)?;
                let spirv_op = match fun {
                    crate::RelationalFunction::All => Op::All,
                    crate::RelationalFunction::Any => Op::Any,
                    crate::RelationalFunction::IsNan => Op::IsNan,
                    crate::RelationalFunction::IsInf => Op::IsInf,
                };
                let type_id = self.expression_type_id(expr_handle)?;
                let id = self.gen_id();
                block
                    .body
                    .push(instruction_unary(spirv_op, type_id, id, operand_id));
                id
            }
            crate::Expression::Math {
                fun,
                arg,
                arg1,
                arg2,
                arg3,
            } => self.write_math(expr_handle, fun, arg, arg1, arg2, arg3, block)?,
            crate::Expression::As {
                expr,
                kind,
                convert,
            } => self.write_conversion(expr_handle, expr, kind, convert, block)?,
            crate::Expression::CallResult(_) | crate::Expression::AtomicResult { .. } => {
                return Err(Error::Validation(
                    "a call or atomic result was used before its statement",
                ))
            }
            crate::Expression::ArrayLength(expr) => self.write_array_length(expr, block)?,
        };

        self.writer.cached[expr_handle] = result_id;
        Ok(())
    }

    /// Emits an access chain and a load for a pointer-typed access expression.
    fn load_through_pointer(
        &mut self,
        expr_handle: Handle<crate::Expression>,
        block: &mut Block,
    ) -> Result<Word, Error> {
        let module = self.module;
        let (pointer_id, _) = self.write_expression_pointer(expr_handle, block)?;
        let pointee_type_id = match *self.expr_inner(expr_handle) {
            crate::TypeInner::Pointer { base, .. } => self
                .writer
                .get_type_id(&module.types, LookupType::Handle(base))?,
            crate::TypeInner::ValuePointer {
                size, kind, width, ..
            } => self.writer.get_type_id(
                &module.types,
                LookupType::Local(LocalType::Value {
                    vector_size: size,
                    kind,
                    width,
                    pointer_class: None,
                }),
            )?,
            _ => return Err(Error::Validation("loading through a non-pointer")),
        };
        let id = self.gen_id();
        block
            .body
            .push(instruction_load(pointee_type_id, id, pointer_id, None));
        Ok(id)
    }

    /// Walks an access chain down to its variable root and emits a single
    /// `OpAccessChain`, returning a pointer id in the root's storage class.
    ///
    /// Wrapped storage globals get a constant zero index prepended, stepping
    /// through the synthesized `Block` struct.
    fn write_expression_pointer(
        &mut self,
        expr_handle: Handle<crate::Expression>,
        block: &mut Block,
    ) -> Result<(Word, spirv::StorageClass), Error> {
        let module = self.module;
        let ir_function = self.ir_function;

        enum Root {
            Global(Handle<crate::GlobalVariable>),
            Local(Handle<crate::LocalVariable>),
            Argument(u32),
        }

        let mut indices = Vec::new();
        let mut current = expr_handle;
        let root = loop {
            match ir_function.expressions[current] {
                crate::Expression::Access { base, index } => {
                    let index_id = self.ensure_cached(index, block)?;
                    indices.push(index_id);
                    current = base;
                }
                crate::Expression::AccessIndex { base, index } => {
                    let index_id = self.writer.get_index_constant(index, &module.types)?;
                    indices.push(index_id);
                    current = base;
                }
                crate::Expression::GlobalVariable(handle) => break Root::Global(handle),
                crate::Expression::LocalVariable(handle) => break Root::Local(handle),
                crate::Expression::FunctionArgument(index) => break Root::Argument(index),
                _ => return Err(Error::Validation("expression is not a pointer")),
            }
        };
        indices.reverse();

        let (root_id, class) = match root {
            Root::Global(handle) => {
                if self.writer.global_variables[handle.index()].wrapped {
                    let zero_id = self.writer.get_index_constant(0, &module.types)?;
                    indices.insert(0, zero_id);
                }
                let class = self
                    .writer
                    .map_address_space(module.global_variables[handle].space);
                (self.writer.global_variables[handle.index()].id, class)
            }
            Root::Local(handle) => (
                self.function.variables[&handle].id,
                spirv::StorageClass::Function,
            ),
            Root::Argument(index) => {
                let arg_ty = ir_function.arguments[index as usize].ty;
                match module.types[arg_ty].inner {
                    crate::TypeInner::Pointer { space, .. } => (
                        self.function.parameter_id(index),
                        self.map_space(space),
                    ),
                    _ => return Err(Error::Validation("argument root is not a pointer")),
                }
            }
        };

        if indices.is_empty() {
            Ok((root_id, class))
        } else {
            let pointer_type_id = self.expression_type_id(expr_handle)?;
            let id = self.gen_id();
            block.body.push(instruction_access_chain(
                pointer_type_id,
                id,
                root_id,
                &indices,
            ));
            Ok((id, class))
        }
    }

    fn map_space(&self, space: crate::AddressSpace) -> spirv::StorageClass {
        self.writer.map_address_space(space)
    }

    fn write_array_length(
        &mut self,
        expr: Handle<crate::Expression>,
        block: &mut Block,
    ) -> Result<Word, Error> {
        let module = self.module;
        let ir_function = self.ir_function;
        let (structure_id, member_index) = match ir_function.expressions[expr] {
            // A wrapped storage global: the array is member zero.
            crate::Expression::GlobalVariable(handle) => {
                let gv = &self.writer.global_variables[handle.index()];
                if !gv.wrapped {
                    return Err(Error::Validation(
                        "array length of an unwrapped global variable",
                    ));
                }
                (gv.id, 0)
            }
            crate::Expression::AccessIndex { base, index } => {
                match ir_function.expressions[base] {
                    crate::Expression::GlobalVariable(handle) => {
                        (self.writer.global_variables[handle.index()].id, index)
                    }
                    _ => return Err(Error::Validation("array length of a nested pointer")),
                }
            }
            _ => return Err(Error::Validation("array length of a non-global pointer")),
        };
        let result_type_id = self.get_scalar_type_id(crate::ScalarKind::Uint, 4)?;
        let id = self.gen_id();
        block.body.push(instruction_array_length(
            result_type_id,
            id,
            structure_id,
            member_index,
        ));
        Ok(id)
    }
}

impl<'w> BlockContext<'w> {
    fn write_binary(
        &mut self,
        expr_handle: Handle<crate::Expression>,
        op: crate::BinaryOperator,
        left: Handle<crate::Expression>,
        right: Handle<crate::Expression>,
        block: &mut Block,
    ) -> Result<Word, Error> {
        use crate::BinaryOperator as Bo;
        use crate::ScalarKind as Sk;
        use crate::TypeInner as Ti;

        let mut left_id = self.ensure_cached(left, block)?;
        let mut right_id = self.ensure_cached(right, block)?;
        let left_inner = self.expr_inner(left);
        let right_inner = self.expr_inner(right);
        let kind = left_inner
            .scalar_kind()
            .or_else(|| right_inner.scalar_kind())
            .ok_or(Error::Validation("binary operands have no scalar kind"))?;

        // These have no mixed vector/scalar opcode; splat the scalar side.
        if matches!(op, Bo::Add | Bo::Subtract | Bo::Divide | Bo::Modulo) {
            match (left_inner, right_inner) {
                (&Ti::Vector { size, kind, width }, &Ti::Scalar { .. }) => {
                    right_id = self.splat_scalar(right_id, size, kind, width, block)?;
                }
                (&Ti::Scalar { .. }, &Ti::Vector { size, kind, width }) => {
                    left_id = self.splat_scalar(left_id, size, kind, width, block)?;
                }
                _ => {}
            }
        }

        let result_type_id = self.expression_type_id(expr_handle)?;
        let id = self.gen_id();
        let instruction = match op {
            Bo::Multiply => match (left_inner, right_inner) {
                (&Ti::Matrix { .. }, &Ti::Matrix { .. }) => {
                    instruction_binary(Op::MatrixTimesMatrix, result_type_id, id, left_id, right_id)
                }
                (&Ti::Matrix { .. }, &Ti::Vector { .. }) => {
                    instruction_binary(Op::MatrixTimesVector, result_type_id, id, left_id, right_id)
                }
                (&Ti::Vector { .. }, &Ti::Matrix { .. }) => {
                    instruction_binary(Op::VectorTimesMatrix, result_type_id, id, left_id, right_id)
                }
                (&Ti::Matrix { .. }, &Ti::Scalar { .. }) => {
                    instruction_binary(Op::MatrixTimesScalar, result_type_id, id, left_id, right_id)
                }
                (&Ti::Scalar { .. }, &Ti::Matrix { .. }) => {
                    instruction_binary(Op::MatrixTimesScalar, result_type_id, id, right_id, left_id)
                }
                (&Ti::Vector { .. }, &Ti::Scalar { .. }) => {
                    instruction_vector_times_scalar(result_type_id, id, left_id, right_id)
                }
                (&Ti::Scalar { .. }, &Ti::Vector { .. }) => {
                    instruction_vector_times_scalar(result_type_id, id, right_id, left_id)
                }
                _ => match kind {
                    Sk::Float => {
                        instruction_binary(Op::FMul, result_type_id, id, left_id, right_id)
                    }
                    _ => instruction_binary(Op::IMul, result_type_id, id, left_id, right_id),
                },
            },
            Bo::Add => {
                let spirv_op = match kind {
                    Sk::Float => Op::FAdd,
                    _ => Op::IAdd,
                };
                instruction_binary(spirv_op, result_type_id, id, left_id, right_id)
            }
            Bo::Subtract => {
                let spirv_op = match kind {
                    Sk::Float => Op::FSub,
                    _ => Op::ISub,
                };
                instruction_binary(spirv_op, result_type_id, id, left_id, right_id)
            }
            Bo::Divide => {
                let spirv_op = match kind {
                    Sk::Float => Op::FDiv,
                    Sk::Sint => Op::SDiv,
                    _ => Op::UDiv,
                };
                instruction_binary(spirv_op, result_type_id, id, left_id, right_id)
            }
            Bo::Modulo => {
                let spirv_op = match kind {
                    Sk::Float => Op::FRem,
                    Sk::Sint => Op::SRem,
                    _ => Op::UMod,
                };
                instruction_binary(spirv_op, result_type_id, id, left_id, right_id)
            }
            // Comparing booleans with the integer opcodes is invalid SPIR-V.
            Bo::Equal => {
                let spirv_op = match kind {
                    Sk::Float => Op::FOrdEqual,
                    Sk::Bool => Op::LogicalEqual,
                    _ => Op::IEqual,
                };
                instruction_binary(spirv_op, result_type_id, id, left_id, right_id)
            }
            Bo::NotEqual => {
                let spirv_op = match kind {
                    Sk::Float => Op::FOrdNotEqual,
                    Sk::Bool => Op::LogicalNotEqual,
                    _ => Op::INotEqual,
                };
                instruction_binary(spirv_op, result_type_id, id, left_id, right_id)
            }
            Bo::Less => {
                let spirv_op = match kind {
                    Sk::Float => Op::FOrdLessThan,
                    Sk::Sint => Op::SLessThan,
                    Sk::Uint => Op::ULessThan,
                    Sk::Bool => return Err(Error::Validation("ordering comparison on booleans")),
                };
                instruction_binary(spirv_op, result_type_id, id, left_id, right_id)
            }
            Bo::LessEqual => {
                let spirv_op = match kind {
                    Sk::Float => Op::FOrdLessThanEqual,
                    Sk::Sint => Op::SLessThanEqual,
                    Sk::Uint => Op::ULessThanEqual,
                    Sk::Bool => return Err(Error::Validation("ordering comparison on booleans")),
                };
                instruction_binary(spirv_op, result_type_id, id, left_id, right_id)
            }
            Bo::Greater => {
                let spirv_op = match kind {
                    Sk::Float => Op::FOrdGreaterThan,
                    Sk::Sint => Op::SGreaterThan,
                    Sk::Uint => Op::UGreaterThan,
                    Sk::Bool => return Err(Error::Validation("ordering comparison on booleans")),
                };
                instruction_binary(spirv_op, result_type_id, id, left_id, right_id)
            }
            Bo::GreaterEqual => {
                let spirv_op = match kind {
                    Sk::Float => Op::FOrdGreaterThanEqual,
                    Sk::Sint => Op::SGreaterThanEqual,
                    Sk::Uint => Op::UGreaterThanEqual,
                    Sk::Bool => return Err(Error::Validation("ordering comparison on booleans")),
                };
                instruction_binary(spirv_op, result_type_id, id, left_id, right_id)
            }
            Bo::And => {
                let spirv_op = match kind {
                    Sk::Bool => Op::LogicalAnd,
                    _ => Op::BitwiseAnd,
                };
                instruction_binary(spirv_op, result_type_id, id, left_id, right_id)
            }
            Bo::InclusiveOr => {
                let spirv_op = match kind {
                    Sk::Bool => Op::LogicalOr,
                    _ => Op::BitwiseOr,
                };
                instruction_binary(spirv_op, result_type_id, id, left_id, right_id)
            }
            Bo::ExclusiveOr => {
                let spirv_op = match kind {
                    Sk::Bool => Op::LogicalNotEqual,
                    _ => Op::BitwiseXor,
                };
                instruction_binary(spirv_op, result_type_id, id, left_id, right_id)
            }
            Bo::LogicalAnd => {
                instruction_binary(Op::LogicalAnd, result_type_id, id, left_id, right_id)
            }
            Bo::LogicalOr => {
                instruction_binary(Op::LogicalOr, result_type_id, id, left_id, right_id)
            }
            Bo::ShiftLeft => {
                instruction_binary(Op::ShiftLeftLogical, result_type_id, id, left_id, right_id)
            }
            Bo::ShiftRightLogical => {
                instruction_binary(Op::ShiftRightLogical, result_type_id, id, left_id, right_id)
            }
            Bo::ShiftRightArithmetic => instruction_binary(
                Op::ShiftRightArithmetic,
                result_type_id,
                id,
                left_id,
                right_id,
            ),
        };
        block.body.push(instruction);
        Ok(id)
    }

    fn write_select(
        &mut self,
        expr_handle: Handle<crate::Expression>,
        condition: Handle<crate::Expression>,
        accept: Handle<crate::Expression>,
        reject: Handle<crate::Expression>,
        block: &mut Block,
    ) -> Result<Word, Error> {
        let accept_id = self.ensure_cached(accept, block)?;
        let reject_id = self.ensure_cached(reject, block)?;
        let mut condition_id = self.ensure_cached(condition, block)?;

        let (cond_kind, cond_size) = match *self.expr_inner(condition) {
            crate::TypeInner::Scalar { kind, .. } => (kind, None),
            crate::TypeInner::Vector { kind, size, .. } => (kind, Some(size)),
            _ => return Err(Error::Validation("select condition is not a scalar or vector")),
        };

        // A float condition is compared against zero first.
        if cond_kind == crate::ScalarKind::Float {
            let zero_id = self.writer.get_constant_scalar(
                &self.module.types,
                crate::ScalarValue::Float(0.0),
                4,
            )?;
            let (zero_id, bool_type_id) = match cond_size {
                Some(size) => (
                    self.splat_scalar(zero_id, size, crate::ScalarKind::Float, 4, block)?,
                    self.get_vector_type_id(size, crate::ScalarKind::Bool, 1)?,
                ),
                None => (zero_id, self.get_scalar_type_id(crate::ScalarKind::Bool, 1)?),
            };
            let compare_id = self.gen_id();
            block.body.push(instruction_binary(
                Op::FOrdNotEqual,
                bool_type_id,
                compare_id,
                condition_id,
                zero_id,
            ));
            condition_id = compare_id;
        }

        // A scalar condition with vector operands is splatted to match.
        if cond_size.is_none() {
            if let crate::TypeInner::Vector { size, .. } = *self.expr_inner(expr_handle) {
                condition_id =
                    self.splat_scalar(condition_id, size, crate::ScalarKind::Bool, 1, block)?;
            }
        }

        let result_type_id = self.expression_type_id(expr_handle)?;
        let id = self.gen_id();
        block.body.push(instruction_select(
            result_type_id,
            id,
            condition_id,
            accept_id,
            reject_id,
        ));
        Ok(id)
    }

    fn write_math(
        &mut self,
        expr_handle: Handle<crate::Expression>,
        fun: crate::MathFunction,
        arg: Handle<crate::Expression>,
        arg1: Option<Handle<crate::Expression>>,
        arg2: Option<Handle<crate::Expression>>,
        arg3: Option<Handle<crate::Expression>>,
        block: &mut Block,
    ) -> Result<Word, Error> {
        use crate::MathFunction as Mf;
        use crate::ScalarKind as Sk;
        use spirv::GLOp;

        let arg0_id = self.ensure_cached(arg, block)?;
        let arg1_id = match arg1 {
            Some(handle) => Some(self.ensure_cached(handle, block)?),
            None => None,
        };
        let arg2_id = match arg2 {
            Some(handle) => Some(self.ensure_cached(handle, block)?),
            None => None,
        };
        let arg3_id = match arg3 {
            Some(handle) => Some(self.ensure_cached(handle, block)?),
            None => None,
        };
        let kind = self.expr_inner(arg).scalar_kind().unwrap_or(Sk::Float);

        let math_op = match fun {
            // comparison
            Mf::Abs => match kind {
                Sk::Float => MathOp::Ext(GLOp::FAbs),
                Sk::Sint => MathOp::Ext(GLOp::SAbs),
                // |x| of an unsigned value is the value itself
                Sk::Uint => return Ok(arg0_id),
                Sk::Bool => return Err(Error::Validation("abs of a boolean")),
            },
            Mf::Min => MathOp::Ext(match kind {
                Sk::Float => GLOp::FMin,
                Sk::Sint => GLOp::SMin,
                _ => GLOp::UMin,
            }),
            Mf::Max => MathOp::Ext(match kind {
                Sk::Float => GLOp::FMax,
                Sk::Sint => GLOp::SMax,
                _ => GLOp::UMax,
            }),
            Mf::Clamp => MathOp::Ext(match kind {
                Sk::Float => GLOp::FClamp,
                Sk::Sint => GLOp::SClamp,
                _ => GLOp::UClamp,
            }),
            // trigonometry
            Mf::Cos => MathOp::Ext(GLOp::Cos),
            Mf::Cosh => MathOp::Ext(GLOp::Cosh),
            Mf::Sin => MathOp::Ext(GLOp::Sin),
            Mf::Sinh => MathOp::Ext(GLOp::Sinh),
            Mf::Tan => MathOp::Ext(GLOp::Tan),
            Mf::Tanh => MathOp::Ext(GLOp::Tanh),
            Mf::Acos => MathOp::Ext(GLOp::Acos),
            Mf::Asin => MathOp::Ext(GLOp::Asin),
            Mf::Atan => MathOp::Ext(GLOp::Atan),
            Mf::Atan2 => MathOp::Ext(GLOp::Atan2),
            Mf::Asinh => MathOp::Ext(GLOp::Asinh),
            Mf::Acosh => MathOp::Ext(GLOp::Acosh),
            Mf::Atanh => MathOp::Ext(GLOp::Atanh),
            Mf::Radians => MathOp::Ext(GLOp::Radians),
            Mf::Degrees => MathOp::Ext(GLOp::Degrees),
            // decomposition
            Mf::Ceil => MathOp::Ext(GLOp::Ceil),
            Mf::Floor => MathOp::Ext(GLOp::Floor),
            Mf::Round => MathOp::Ext(GLOp::RoundEven),
            Mf::Fract => MathOp::Ext(GLOp::Fract),
            Mf::Trunc => MathOp::Ext(GLOp::Trunc),
            Mf::Ldexp => MathOp::Ext(GLOp::Ldexp),
            // exponent
            Mf::Exp => MathOp::Ext(GLOp::Exp),
            Mf::Exp2 => MathOp::Ext(GLOp::Exp2),
            Mf::Log => MathOp::Ext(GLOp::Log),
            Mf::Log2 => MathOp::Ext(GLOp::Log2),
            Mf::Pow => MathOp::Ext(GLOp::Pow),
            // geometry
            Mf::Dot => MathOp::Custom(Op::Dot),
            Mf::Cross => MathOp::Ext(GLOp::Cross),
            Mf::Distance => MathOp::Ext(GLOp::Distance),
            Mf::Length => MathOp::Ext(GLOp::Length),
            Mf::Normalize => MathOp::Ext(GLOp::Normalize),
            Mf::FaceForward => MathOp::Ext(GLOp::FaceForward),
            Mf::Reflect => MathOp::Ext(GLOp::Reflect),
            Mf::Refract => MathOp::Ext(GLOp::Refract),
            // computational
            Mf::Sign => MathOp::Ext(match kind {
                Sk::Sint => GLOp::SSign,
                _ => GLOp::FSign,
            }),
            Mf::Fma => MathOp::Ext(GLOp::Fma),
            Mf::Mix => MathOp::Ext(GLOp::FMix),
            Mf::Step => MathOp::Ext(GLOp::Step),
            Mf::SmoothStep => MathOp::Ext(GLOp::SmoothStep),
            Mf::Sqrt => MathOp::Ext(GLOp::Sqrt),
            Mf::InverseSqrt => MathOp::Ext(GLOp::InverseSqrt),
            Mf::Transpose => MathOp::Custom(Op::Transpose),
            Mf::Determinant => MathOp::Ext(GLOp::Determinant),
            // bits
            Mf::CountOneBits => MathOp::Custom(Op::BitCount),
            Mf::ReverseBits => MathOp::Custom(Op::BitReverse),
            Mf::ExtractBits => MathOp::Custom(match kind {
                Sk::Sint => Op::BitFieldSExtract,
                _ => Op::BitFieldUExtract,
            }),
            Mf::InsertBits => MathOp::Custom(Op::BitFieldInsert),
            Mf::FindLsb => MathOp::Ext(GLOp::FindILsb),
            Mf::FindMsb => MathOp::Ext(match kind {
                Sk::Sint => GLOp::FindSMsb,
                _ => GLOp::FindUMsb,
            }),
            // data packing
            Mf::Pack4x8snorm => MathOp::Ext(GLOp::PackSnorm4x8),
            Mf::Pack4x8unorm => MathOp::Ext(GLOp::PackUnorm4x8),
            Mf::Pack2x16snorm => MathOp::Ext(GLOp::PackSnorm2x16),
            Mf::Pack2x16unorm => MathOp::Ext(GLOp::PackUnorm2x16),
            Mf::Pack2x16float => MathOp::Ext(GLOp::PackHalf2x16),
            // data unpacking
            Mf::Unpack4x8snorm => MathOp::Ext(GLOp::UnpackSnorm4x8),
            Mf::Unpack4x8unorm => MathOp::Ext(GLOp::UnpackUnorm4x8),
            Mf::Unpack2x16snorm => MathOp::Ext(GLOp::UnpackSnorm2x16),
            Mf::Unpack2x16unorm => MathOp::Ext(GLOp::UnpackUnorm2x16),
            Mf::Unpack2x16float => MathOp::Ext(GLOp::UnpackHalf2x16),
        };

        let result_type_id = self.expression_type_id(expr_handle)?;
        let id = self.gen_id();
        let mut operands = vec![arg0_id];
        operands.extend(arg1_id);
        operands.extend(arg2_id);
        operands.extend(arg3_id);

        let instruction = match math_op {
            MathOp::Ext(op) => instruction_ext_inst(
                self.writer.gl450_ext_inst_id,
                op,
                result_type_id,
                id,
                &operands,
            ),
            MathOp::Custom(op) => {
                let mut instruction = Instruction::new(op);
                instruction.set_type(result_type_id);
                instruction.set_result(id);
                for operand in operands {
                    instruction.add_operand(operand);
                }
                instruction
            }
        };
        block.body.push(instruction);
        Ok(id)
    }

    fn write_conversion(
        &mut self,
        expr_handle: Handle<crate::Expression>,
        source: Handle<crate::Expression>,
        kind: crate::ScalarKind,
        convert: Option<crate::Bytes>,
        block: &mut Block,
    ) -> Result<Word, Error> {
        use crate::ScalarKind as Sk;

        let expr_id = self.ensure_cached(source, block)?;
        let (src_kind, src_width, vector_size) = match *self.expr_inner(source) {
            crate::TypeInner::Scalar { kind, width } => (kind, width, None),
            crate::TypeInner::Vector { kind, width, size } => (kind, width, Some(size)),
            _ => return Err(Error::Validation("cast of a non-numeric value")),
        };
        let result_type_id = self.expression_type_id(expr_handle)?;

        let spirv_op = match convert {
            None => {
                if src_kind == kind {
                    return Ok(expr_id);
                }
                Op::Bitcast
            }
            Some(dst_width) => match (src_kind, kind) {
                (Sk::Float, Sk::Uint) => Op::ConvertFToU,
                (Sk::Float, Sk::Sint) => Op::ConvertFToS,
                (Sk::Sint, Sk::Float) => Op::ConvertSToF,
                (Sk::Uint, Sk::Float) => Op::ConvertUToF,
                (Sk::Float, Sk::Float) => {
                    if dst_width == src_width {
                        return Ok(expr_id);
                    }
                    Op::FConvert
                }
                (Sk::Sint, Sk::Sint) => {
                    if dst_width == src_width {
                        return Ok(expr_id);
                    }
                    Op::SConvert
                }
                (Sk::Uint, Sk::Uint) => {
                    if dst_width == src_width {
                        return Ok(expr_id);
                    }
                    Op::UConvert
                }
                (Sk::Sint, Sk::Uint) | (Sk::Uint, Sk::Sint) => {
                    if dst_width != src_width {
                        return Err(Error::FeatureNotImplemented("width-changing sign casts"));
                    }
                    Op::Bitcast
                }
                (Sk::Bool, Sk::Bool) => return Ok(expr_id),
                (Sk::Bool, _) => {
                    // select between one and zero
                    let (one, zero) = match kind {
                        Sk::Float => (
                            crate::ScalarValue::Float(1.0),
                            crate::ScalarValue::Float(0.0),
                        ),
                        Sk::Sint => (crate::ScalarValue::Sint(1), crate::ScalarValue::Sint(0)),
                        _ => (crate::ScalarValue::Uint(1), crate::ScalarValue::Uint(0)),
                    };
                    let mut accept_id =
                        self.writer
                            .get_constant_scalar(&self.module.types, one, dst_width)?;
                    let mut reject_id =
                        self.writer
                            .get_constant_scalar(&self.module.types, zero, dst_width)?;
                    if let Some(size) = vector_size {
                        accept_id = self.splat_scalar(accept_id, size, kind, dst_width, block)?;
                        reject_id = self.splat_scalar(reject_id, size, kind, dst_width, block)?;
                    }
                    let id = self.gen_id();
                    block.body.push(instruction_select(
                        result_type_id,
                        id,
                        expr_id,
                        accept_id,
                        reject_id,
                    ));
                    return Ok(id);
                }
                (_, Sk::Bool) => {
                    let zero = match src_kind {
                        Sk::Float => crate::ScalarValue::Float(0.0),
                        Sk::Sint => crate::ScalarValue::Sint(0),
                        _ => crate::ScalarValue::Uint(0),
                    };
                    let mut zero_id =
                        self.writer
                            .get_constant_scalar(&self.module.types, zero, src_width)?;
                    if let Some(size) = vector_size {
                        zero_id = self.splat_scalar(zero_id, size, src_kind, src_width, block)?;
                    }
                    let spirv_op = match src_kind {
                        Sk::Float => Op::FUnordNotEqual,
                        _ => Op::INotEqual,
                    };
                    let id = self.gen_id();
                    block.body.push(instruction_binary(
                        spirv_op,
                        result_type_id,
                        id,
                        expr_id,
                        zero_id,
                    ));
                    return Ok(id);
                }
            },
        };
        let id = self.gen_id();
        block
            .body
            .push(instruction_unary(spirv_op, result_type_id, id, expr_id));
        Ok(id)
    }

    /// Merges the array index into the coordinate vector, converting it to
    /// float for sampled coordinates.
    fn write_image_coordinates(
        &mut self,
        coordinate: Handle<crate::Expression>,
        array_index: Option<Handle<crate::Expression>>,
        block: &mut Block,
    ) -> Result<Word, Error> {
        let coordinate_id = self.ensure_cached(coordinate, block)?;
        let array_index = match array_index {
            Some(array_index) => array_index,
            None => return Ok(coordinate_id),
        };
        let index_id = self.ensure_cached(array_index, block)?;

        let (size, kind, width) = match *self.expr_inner(coordinate) {
            crate::TypeInner::Scalar { kind, width } => (None, kind, width),
            crate::TypeInner::Vector { size, kind, width } => (Some(size), kind, width),
            _ => return Err(Error::Validation("invalid image coordinate")),
        };
        let index_kind = self
            .expr_inner(array_index)
            .scalar_kind()
            .ok_or(Error::Validation("invalid image array index"))?;

        let final_index_id = if kind == crate::ScalarKind::Float && index_kind != kind {
            let float_type_id = self.get_scalar_type_id(crate::ScalarKind::Float, width)?;
            let spirv_op = match index_kind {
                crate::ScalarKind::Sint => Op::ConvertSToF,
                _ => Op::ConvertUToF,
            };
            let converted_id = self.gen_id();
            block
                .body
                .push(instruction_unary(spirv_op, float_type_id, converted_id, index_id));
            converted_id
        } else {
            index_id
        };

        let total_size = match size {
            None => crate::VectorSize::Bi,
            Some(crate::VectorSize::Bi) => crate::VectorSize::Tri,
            Some(crate::VectorSize::Tri) => crate::VectorSize::Quad,
            Some(crate::VectorSize::Quad) => {
                return Err(Error::Validation("image coordinate is already 4 components"))
            }
        };
        let type_id = self.get_vector_type_id(total_size, kind, width)?;
        let id = self.gen_id();
        block.body.push(instruction_composite_construct(
            type_id,
            id,
            &[coordinate_id, final_index_id],
        ));
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_image_sample(
        &mut self,
        expr_handle: Handle<crate::Expression>,
        image: Handle<crate::Expression>,
        sampler: Handle<crate::Expression>,
        coordinate: Handle<crate::Expression>,
        array_index: Option<Handle<crate::Expression>>,
        level: crate::SampleLevel,
        depth_ref: Option<Handle<crate::Expression>>,
        block: &mut Block,
    ) -> Result<Word, Error> {
        let image_id = self.ensure_cached(image, block)?;
        let sampler_id = self.ensure_cached(sampler, block)?;
        let image_type_id = self.expression_type_id(image)?;
        let sampled_image_type_id = self.writer.get_type_id(
            &self.module.types,
            LookupType::Local(LocalType::SampledImage { image_type_id }),
        )?;
        let sampled_image_id = self.gen_id();
        block.body.push(instruction_sampled_image(
            sampled_image_type_id,
            sampled_image_id,
            image_id,
            sampler_id,
        ));
        let coordinate_id = self.write_image_coordinates(coordinate, array_index, block)?;

        let image_class = match *self.expr_inner(image) {
            crate::TypeInner::Image { class, .. } => class,
            _ => return Err(Error::Validation("sampling a non-image")),
        };
        // Sampling a depth image without a reference still yields a vec4.
        let is_depth_without_ref =
            matches!(image_class, crate::ImageClass::Depth { .. }) && depth_ref.is_none();
        let result_type_id = if is_depth_without_ref {
            self.get_vector_type_id(crate::VectorSize::Quad, crate::ScalarKind::Float, 4)?
        } else {
            self.expression_type_id(expr_handle)?
        };

        let id = self.gen_id();
        let instruction = match depth_ref {
            None => match level {
                crate::SampleLevel::Auto => instruction_image(
                    Op::ImageSampleImplicitLod,
                    result_type_id,
                    id,
                    sampled_image_id,
                    coordinate_id,
                ),
                crate::SampleLevel::Zero => {
                    let zero_id = self.writer.get_constant_scalar(
                        &self.module.types,
                        crate::ScalarValue::Float(0.0),
                        4,
                    )?;
                    let mut inst = instruction_image(
                        Op::ImageSampleExplicitLod,
                        result_type_id,
                        id,
                        sampled_image_id,
                        coordinate_id,
                    );
                    inst.add_operand(spirv::ImageOperands::LOD.bits());
                    inst.add_operand(zero_id);
                    inst
                }
                crate::SampleLevel::Exact(lod) => {
                    let lod_id = self.ensure_cached(lod, block)?;
                    let mut inst = instruction_image(
                        Op::ImageSampleExplicitLod,
                        result_type_id,
                        id,
                        sampled_image_id,
                        coordinate_id,
                    );
                    inst.add_operand(spirv::ImageOperands::LOD.bits());
                    inst.add_operand(lod_id);
                    inst
                }
                crate::SampleLevel::Bias(bias) => {
                    let bias_id = self.ensure_cached(bias, block)?;
                    let mut inst = instruction_image(
                        Op::ImageSampleImplicitLod,
                        result_type_id,
                        id,
                        sampled_image_id,
                        coordinate_id,
                    );
                    inst.add_operand(spirv::ImageOperands::BIAS.bits());
                    inst.add_operand(bias_id);
                    inst
                }
                crate::SampleLevel::Gradient { x, y } => {
                    let x_id = self.ensure_cached(x, block)?;
                    let y_id = self.ensure_cached(y, block)?;
                    let mut inst = instruction_image(
                        Op::ImageSampleExplicitLod,
                        result_type_id,
                        id,
                        sampled_image_id,
                        coordinate_id,
                    );
                    inst.add_operand(spirv::ImageOperands::GRAD.bits());
                    inst.add_operand(x_id);
                    inst.add_operand(y_id);
                    inst
                }
            },
            Some(dref) => {
                let dref_id = self.ensure_cached(dref, block)?;
                match level {
                    crate::SampleLevel::Auto => {
                        let mut inst = instruction_image(
                            Op::ImageSampleDrefImplicitLod,
                            result_type_id,
                            id,
                            sampled_image_id,
                            coordinate_id,
                        );
                        inst.add_operand(dref_id);
                        inst
                    }
                    crate::SampleLevel::Zero => {
                        let zero_id = self.writer.get_constant_scalar(
                            &self.module.types,
                            crate::ScalarValue::Float(0.0),
                            4,
                        )?;
                        let mut inst = instruction_image(
                            Op::ImageSampleDrefExplicitLod,
                            result_type_id,
                            id,
                            sampled_image_id,
                            coordinate_id,
                        );
                        inst.add_operand(dref_id);
                        inst.add_operand(spirv::ImageOperands::LOD.bits());
                        inst.add_operand(zero_id);
                        inst
                    }
                    _ => {
                        return Err(Error::FeatureNotImplemented(
                            "depth comparison with an explicit level",
                        ))
                    }
                }
            }
        };
        block.body.push(instruction);

        if is_depth_without_ref {
            let scalar_type_id = self.get_scalar_type_id(crate::ScalarKind::Float, 4)?;
            let extract_id = self.gen_id();
            block
                .body
                .push(instruction_composite_extract(scalar_type_id, extract_id, id, &[0]));
            Ok(extract_id)
        } else {
            Ok(id)
        }
    }

    fn write_image_load(
        &mut self,
        expr_handle: Handle<crate::Expression>,
        image: Handle<crate::Expression>,
        coordinate: Handle<crate::Expression>,
        array_index: Option<Handle<crate::Expression>>,
        index: Option<Handle<crate::Expression>>,
        block: &mut Block,
    ) -> Result<Word, Error> {
        let image_id = self.ensure_cached(image, block)?;
        let coordinate_id = self.write_image_coordinates(coordinate, array_index, block)?;
        let image_class = match *self.expr_inner(image) {
            crate::TypeInner::Image { class, .. } => class,
            _ => return Err(Error::Validation("loading from a non-image")),
        };

        match image_class {
            crate::ImageClass::Storage { .. } => {
                let result_type_id = self.expression_type_id(expr_handle)?;
                let id = self.gen_id();
                block.body.push(instruction_image(
                    Op::ImageRead,
                    result_type_id,
                    id,
                    image_id,
                    coordinate_id,
                ));
                Ok(id)
            }
            crate::ImageClass::Sampled { multi, .. } => {
                let result_type_id = self.expression_type_id(expr_handle)?;
                let index_id = match index {
                    Some(index) => Some(self.ensure_cached(index, block)?),
                    None => None,
                };
                let id = self.gen_id();
                let mut inst = instruction_image(
                    Op::ImageFetch,
                    result_type_id,
                    id,
                    image_id,
                    coordinate_id,
                );
                if multi {
                    if let Some(sample_id) = index_id {
                        inst.add_operand(spirv::ImageOperands::SAMPLE.bits());
                        inst.add_operand(sample_id);
                    }
                } else {
                    let lod_id = match index_id {
                        Some(lod_id) => lod_id,
                        None => self.writer.get_index_constant(0, &self.module.types)?,
                    };
                    inst.add_operand(spirv::ImageOperands::LOD.bits());
                    inst.add_operand(lod_id);
                }
                block.body.push(inst);
                Ok(id)
            }
            crate::ImageClass::Depth { .. } => {
                let vec4_id =
                    self.get_vector_type_id(crate::VectorSize::Quad, crate::ScalarKind::Float, 4)?;
                let lod_id = match index {
                    Some(index) => self.ensure_cached(index, block)?,
                    None => self.writer.get_index_constant(0, &self.module.types)?,
                };
                let id = self.gen_id();
                let mut inst =
                    instruction_image(Op::ImageFetch, vec4_id, id, image_id, coordinate_id);
                inst.add_operand(spirv::ImageOperands::LOD.bits());
                inst.add_operand(lod_id);
                block.body.push(inst);
                let scalar_type_id = self.get_scalar_type_id(crate::ScalarKind::Float, 4)?;
                let extract_id = self.gen_id();
                block
                    .body
                    .push(instruction_composite_extract(scalar_type_id, extract_id, id, &[0]));
                Ok(extract_id)
            }
        }
    }

    fn write_image_query(
        &mut self,
        expr_handle: Handle<crate::Expression>,
        image: Handle<crate::Expression>,
        query: crate::ImageQuery,
        block: &mut Block,
    ) -> Result<Word, Error> {
        self.writer.request_capability(spirv::Capability::ImageQuery);
        let image_id = self.ensure_cached(image, block)?;
        let (dim, arrayed, image_class) = match *self.expr_inner(image) {
            crate::TypeInner::Image {
                dim,
                arrayed,
                class,
            } => (dim, arrayed, class),
            _ => return Err(Error::Validation("querying a non-image")),
        };
        let uint_type_id = self.get_scalar_type_id(crate::ScalarKind::Uint, 4)?;
        let coord_components = match dim {
            crate::ImageDimension::D1 => 1usize,
            crate::ImageDimension::D2 | crate::ImageDimension::Cube => 2,
            crate::ImageDimension::D3 => 3,
        };
        let needs_lod = matches!(
            image_class,
            crate::ImageClass::Sampled { multi: false, .. }
                | crate::ImageClass::Depth { multi: false }
        );

        match query {
            crate::ImageQuery::Size { level } => {
                let total = coord_components + arrayed as usize;
                let query_type_id = self.uint_vector_type_id(total)?;
                let id = self.gen_id();
                if needs_lod {
                    let lod_id = match level {
                        Some(level) => self.ensure_cached(level, block)?,
                        None => self.writer.get_index_constant(0, &self.module.types)?,
                    };
                    let mut inst =
                        instruction_image_query(Op::ImageQuerySizeLod, query_type_id, id, image_id);
                    inst.add_operand(lod_id);
                    block.body.push(inst);
                } else {
                    block.body.push(instruction_image_query(
                        Op::ImageQuerySize,
                        query_type_id,
                        id,
                        image_id,
                    ));
                }
                if arrayed {
                    // crop the layer count off
                    let result_type_id = self.uint_vector_type_id(coord_components)?;
                    let extract_id = self.gen_id();
                    if coord_components == 1 {
                        block.body.push(instruction_composite_extract(
                            result_type_id,
                            extract_id,
                            id,
                            &[0],
                        ));
                    } else {
                        let components: Vec<Word> = (0..coord_components as Word).collect();
                        block.body.push(instruction_vector_shuffle(
                            result_type_id,
                            extract_id,
                            id,
                            id,
                            &components,
                        ));
                    }
                    Ok(extract_id)
                } else {
                    Ok(id)
                }
            }
            crate::ImageQuery::NumLevels => {
                let id = self.gen_id();
                block.body.push(instruction_image_query(
                    Op::ImageQueryLevels,
                    uint_type_id,
                    id,
                    image_id,
                ));
                Ok(id)
            }
            crate::ImageQuery::NumSamples => {
                let id = self.gen_id();
                block.body.push(instruction_image_query(
                    Op::ImageQuerySamples,
                    uint_type_id,
                    id,
                    image_id,
                ));
                Ok(id)
            }
            crate::ImageQuery::NumLayers => {
                let total = coord_components + 1;
                let query_type_id = self.uint_vector_type_id(total)?;
                let id = self.gen_id();
                if needs_lod {
                    let lod_id = self.writer.get_index_constant(0, &self.module.types)?;
                    let mut inst =
                        instruction_image_query(Op::ImageQuerySizeLod, query_type_id, id, image_id);
                    inst.add_operand(lod_id);
                    block.body.push(inst);
                } else {
                    block.body.push(instruction_image_query(
                        Op::ImageQuerySize,
                        query_type_id,
                        id,
                        image_id,
                    ));
                }
                let extract_id = self.gen_id();
                block.body.push(instruction_composite_extract(
                    uint_type_id,
                    extract_id,
                    id,
                    &[coord_components as Word],
                ));
                Ok(extract_id)
            }
        }
    }

    fn uint_vector_type_id(&mut self, count: usize) -> Result<Word, Error> {
        match count {
            1 => self.get_scalar_type_id(crate::ScalarKind::Uint, 4),
            2 => self.get_vector_type_id(crate::VectorSize::Bi, crate::ScalarKind::Uint, 4),
            3 => self.get_vector_type_id(crate::VectorSize::Tri, crate::ScalarKind::Uint, 4),
            _ => self.get_vector_type_id(crate::VectorSize::Quad, crate::ScalarKind::Uint, 4),
        }
    }

    /// Runs the stores registered against the given call or atomic result.
    /// The direct store always precedes the dependent ones.
    fn write_deferred_stores(
        &mut self,
        handle: Handle<crate::Expression>,
        block: &mut Block,
    ) -> Result<(), Error> {
        if let Some(pointer_id) = self.deferred_direct.remove(&handle) {
            let value_id = self.writer.cached[handle];
            block
                .body
                .push(instruction_store(pointer_id, value_id, None));
        }
        if let Some(pending) = self.deferred_complex.remove(&handle) {
            for (pointer_id, init) in pending {
                self.cache_expression_value(init, block)?;
                let value_id = self.writer.cached[init];
                block
                    .body
                    .push(instruction_store(pointer_id, value_id, None));
            }
        }
        Ok(())
    }
}

impl<'w> BlockContext<'w> {
    /// Writes one structured block, recursing into nested control flow.
    ///
    /// Statements past a terminator are unreachable and skipped. When both
    /// arms of an `If` end control flow, the mandatory merge block is closed
    /// with `OpUnreachable`.
    fn write_block(
        &mut self,
        label_id: Word,
        statements: &[crate::Statement],
        exit: BlockExit,
        loop_context: LoopContext,
    ) -> Result<(), Error> {
        let module = self.module;
        let ir_function = self.ir_function;
        let mut block = Block::new(label_id);

        for statement in statements {
            match *statement {
                crate::Statement::Emit(ref range) => {
                    for handle in range.clone() {
                        // Pointer chains are materialized by their consumers.
                        let inner =
                            ir_function.expression_types[handle.index()].inner_with(&module.types);
                        if is_pointer_inner(inner) {
                            continue;
                        }
                        if self.writer.cached.has(handle) {
                            continue;
                        }
                        self.cache_expression_value(handle, &mut block)?;
                    }
                }
                crate::Statement::Block(ref block_statements) => {
                    let scope_id = self.gen_id();
                    self.function.consume(block, instruction_branch(scope_id));
                    let merge_id = self.gen_id();
                    self.write_block(
                        scope_id,
                        block_statements,
                        BlockExit::Branch { target: merge_id },
                        loop_context,
                    )?;
                    block = Block::new(merge_id);
                }
                crate::Statement::If {
                    condition,
                    ref accept,
                    ref reject,
                } => {
                    let condition_id = self.ensure_cached(condition, &mut block)?;
                    let merge_id = self.gen_id();
                    block.body.push(instruction_selection_merge(
                        merge_id,
                        spirv::SelectionControl::NONE,
                    ));
                    let accept_id = self.gen_id();
                    let reject_id = self.gen_id();
                    self.function.consume(
                        block,
                        instruction_branch_conditional(condition_id, accept_id, reject_id),
                    );
                    self.write_block(
                        accept_id,
                        accept,
                        BlockExit::Branch { target: merge_id },
                        loop_context,
                    )?;
                    self.write_block(
                        reject_id,
                        reject,
                        BlockExit::Branch { target: merge_id },
                        loop_context,
                    )?;
                    block = Block::new(merge_id);
                    if !accept.is_empty()
                        && !reject.is_empty()
                        && ends_with_terminator(accept)
                        && ends_with_terminator(reject)
                    {
                        self.function.consume(block, instruction_unreachable());
                        return Ok(());
                    }
                }
                crate::Statement::Switch {
                    selector,
                    ref cases,
                } => {
                    let selector_id = self.ensure_cached(selector, &mut block)?;
                    let merge_id = self.gen_id();
                    block.body.push(instruction_selection_merge(
                        merge_id,
                        spirv::SelectionControl::NONE,
                    ));
                    let mut case_ids = Vec::with_capacity(cases.len());
                    for _ in cases.iter() {
                        case_ids.push(self.gen_id());
                    }
                    let mut default_id = None;
                    let mut literal_cases = Vec::new();
                    for (case, &case_id) in cases.iter().zip(case_ids.iter()) {
                        match case.value {
                            crate::SwitchValue::I32(value) => {
                                literal_cases.push((value as u32, case_id))
                            }
                            crate::SwitchValue::U32(value) => literal_cases.push((value, case_id)),
                            crate::SwitchValue::Default => default_id = Some(case_id),
                        }
                    }
                    let default_id =
                        default_id.ok_or(Error::Validation("switch has no default case"))?;
                    self.function.consume(
                        block,
                        instruction_switch(selector_id, default_id, &literal_cases),
                    );
                    let inner_context = LoopContext {
                        break_id: Some(merge_id),
                        ..loop_context
                    };
                    for (index, case) in cases.iter().enumerate() {
                        let target = if case.fall_through && index + 1 < cases.len() {
                            case_ids[index + 1]
                        } else {
                            merge_id
                        };
                        self.write_block(
                            case_ids[index],
                            &case.body,
                            BlockExit::Branch { target },
                            inner_context,
                        )?;
                    }
                    block = Block::new(merge_id);
                }
                crate::Statement::Loop {
                    ref body,
                    ref continuing,
                    break_if,
                } => {
                    let preamble_id = self.gen_id();
                    self.function
                        .consume(block, instruction_branch(preamble_id));
                    let merge_id = self.gen_id();
                    let body_id = self.gen_id();
                    let continuing_id = self.gen_id();

                    let mut header = Block::new(preamble_id);
                    header.body.push(instruction_loop_merge(
                        merge_id,
                        continuing_id,
                        spirv::LoopControl::NONE,
                    ));
                    self.function.consume(header, instruction_branch(body_id));

                    let inner_context = LoopContext {
                        continuing_id: Some(continuing_id),
                        break_id: Some(merge_id),
                    };
                    self.write_block(
                        body_id,
                        body,
                        BlockExit::Branch {
                            target: continuing_id,
                        },
                        inner_context,
                    )?;
                    let continuing_exit = match break_if {
                        Some(condition) => BlockExit::BreakIf {
                            condition,
                            preamble_id,
                            merge_id,
                        },
                        None => BlockExit::Branch {
                            target: preamble_id,
                        },
                    };
                    self.write_block(
                        continuing_id,
                        continuing,
                        continuing_exit,
                        LoopContext::default(),
                    )?;
                    block = Block::new(merge_id);
                }
                crate::Statement::Break => {
                    let target = loop_context
                        .break_id
                        .ok_or(Error::Validation("break outside of a loop or switch"))?;
                    self.function.consume(block, instruction_branch(target));
                    return Ok(());
                }
                crate::Statement::Continue => {
                    let target = loop_context
                        .continuing_id
                        .ok_or(Error::Validation("continue outside of a loop"))?;
                    self.function.consume(block, instruction_branch(target));
                    return Ok(());
                }
                crate::Statement::Return { value } => {
                    let termination = if self.function.entry_point_context.is_some() {
                        if let Some(value) = value {
                            let value_id = self.ensure_cached(value, &mut block)?;
                            let direct = ir_function
                                .result
                                .as_ref()
                                .map_or(false, |result| result.binding.is_some());
                            let result_count = self
                                .function
                                .entry_point_context
                                .as_ref()
                                .unwrap()
                                .results
                                .len();
                            for index in 0..result_count {
                                let (varying_id, type_id) = {
                                    let member = &self
                                        .function
                                        .entry_point_context
                                        .as_ref()
                                        .unwrap()
                                        .results[index];
                                    (member.id, member.type_id)
                                };
                                let source_id = if direct {
                                    value_id
                                } else {
                                    let extract_id = self.gen_id();
                                    block.body.push(instruction_composite_extract(
                                        type_id,
                                        extract_id,
                                        value_id,
                                        &[index as Word],
                                    ));
                                    extract_id
                                };
                                block
                                    .body
                                    .push(instruction_store(varying_id, source_id, None));
                            }
                        }
                        instruction_return()
                    } else {
                        match value {
                            Some(value) => {
                                let value_id = self.ensure_cached(value, &mut block)?;
                                instruction_return_value(value_id)
                            }
                            None => instruction_return(),
                        }
                    };
                    self.function.consume(block, termination);
                    return Ok(());
                }
                crate::Statement::Kill => {
                    self.function.consume(block, instruction_kill());
                    return Ok(());
                }
                crate::Statement::Barrier(flags) => {
                    let exec_scope_id = self
                        .writer
                        .get_index_constant(spirv::Scope::Workgroup as u32, &module.types)?;
                    let mem_scope_id = self
                        .writer
                        .get_index_constant(spirv::Scope::Workgroup as u32, &module.types)?;
                    let mut semantics = spirv::MemorySemantics::ACQUIRE_RELEASE;
                    semantics.set(
                        spirv::MemorySemantics::WORKGROUP_MEMORY,
                        flags.contains(crate::Barrier::WORK_GROUP),
                    );
                    semantics.set(
                        spirv::MemorySemantics::UNIFORM_MEMORY,
                        flags.contains(crate::Barrier::STORAGE),
                    );
                    semantics.set(
                        spirv::MemorySemantics::IMAGE_MEMORY,
                        flags.contains(crate::Barrier::TEXTURE),
                    );
                    let semantics_id = self
                        .writer
                        .get_index_constant(semantics.bits(), &module.types)?;
                    block.body.push(instruction_control_barrier(
                        exec_scope_id,
                        mem_scope_id,
                        semantics_id,
                    ));
                }
                crate::Statement::Store { pointer, value } => {
                    let value_id = self.ensure_cached(value, &mut block)?;
                    let is_atomic = match *ir_function.expression_types[pointer.index()]
                        .inner_with(&module.types)
                    {
                        crate::TypeInner::Pointer { base, .. } => {
                            matches!(module.types[base].inner, crate::TypeInner::Atomic { .. })
                        }
                        _ => false,
                    };
                    let (pointer_id, _) = self.write_expression_pointer(pointer, &mut block)?;
                    if is_atomic {
                        let scope_id = self
                            .writer
                            .get_index_constant(spirv::Scope::Device as u32, &module.types)?;
                        let semantics_id = self.writer.get_index_constant(
                            spirv::MemorySemantics::NONE.bits(),
                            &module.types,
                        )?;
                        block.body.push(instruction_atomic_store(
                            pointer_id,
                            scope_id,
                            semantics_id,
                            value_id,
                        ));
                    } else {
                        block
                            .body
                            .push(instruction_store(pointer_id, value_id, None));
                    }
                }
                crate::Statement::ImageStore {
                    image,
                    coordinate,
                    array_index,
                    value,
                } => {
                    let image_id = self.ensure_cached(image, &mut block)?;
                    let coordinate_id =
                        self.write_image_coordinates(coordinate, array_index, &mut block)?;
                    let value_id = self.ensure_cached(value, &mut block)?;
                    block
                        .body
                        .push(instruction_image_write(image_id, coordinate_id, value_id));
                }
                crate::Statement::Atomic {
                    pointer,
                    ref fun,
                    value,
                    result,
                } => {
                    let value_id = self.ensure_cached(value, &mut block)?;
                    let (kind, width) = match *ir_function.expression_types[pointer.index()]
                        .inner_with(&module.types)
                    {
                        crate::TypeInner::Pointer { base, .. } => {
                            match module.types[base].inner {
                                crate::TypeInner::Atomic { kind, width } => (kind, width),
                                _ => {
                                    return Err(Error::Validation(
                                        "atomic operation on a non-atomic pointer",
                                    ))
                                }
                            }
                        }
                        _ => return Err(Error::Validation("atomic operation on a non-pointer")),
                    };
                    let (pointer_id, _) = self.write_expression_pointer(pointer, &mut block)?;
                    // The result type must match the atomic's own scalar.
                    let result_type_id = self.get_scalar_type_id(kind, width)?;
                    let scope_id = self
                        .writer
                        .get_index_constant(spirv::Scope::Device as u32, &module.types)?;
                    let semantics_id = self
                        .writer
                        .get_index_constant(spirv::MemorySemantics::NONE.bits(), &module.types)?;
                    let id = self.gen_id();
                    let instruction = match *fun {
                        crate::AtomicFunction::Add => instruction_atomic_binary(
                            Op::AtomicIAdd,
                            result_type_id,
                            id,
                            pointer_id,
                            scope_id,
                            semantics_id,
                            value_id,
                        ),
                        crate::AtomicFunction::Subtract => instruction_atomic_binary(
                            Op::AtomicISub,
                            result_type_id,
                            id,
                            pointer_id,
                            scope_id,
                            semantics_id,
                            value_id,
                        ),
                        crate::AtomicFunction::And => instruction_atomic_binary(
                            Op::AtomicAnd,
                            result_type_id,
                            id,
                            pointer_id,
                            scope_id,
                            semantics_id,
                            value_id,
                        ),
                        crate::AtomicFunction::ExclusiveOr => instruction_atomic_binary(
                            Op::AtomicXor,
                            result_type_id,
                            id,
                            pointer_id,
                            scope_id,
                            semantics_id,
                            value_id,
                        ),
                        crate::AtomicFunction::InclusiveOr => instruction_atomic_binary(
                            Op::AtomicOr,
                            result_type_id,
                            id,
                            pointer_id,
                            scope_id,
                            semantics_id,
                            value_id,
                        ),
                        crate::AtomicFunction::Min => {
                            let spirv_op = match kind {
                                crate::ScalarKind::Sint => Op::AtomicSMin,
                                _ => Op::AtomicUMin,
                            };
                            instruction_atomic_binary(
                                spirv_op,
                                result_type_id,
                                id,
                                pointer_id,
                                scope_id,
                                semantics_id,
                                value_id,
                            )
                        }
                        crate::AtomicFunction::Max => {
                            let spirv_op = match kind {
                                crate::ScalarKind::Sint => Op::AtomicSMax,
                                _ => Op::AtomicUMax,
                            };
                            instruction_atomic_binary(
                                spirv_op,
                                result_type_id,
                                id,
                                pointer_id,
                                scope_id,
                                semantics_id,
                                value_id,
                            )
                        }
                        crate::AtomicFunction::Exchange { compare: None } => {
                            instruction_atomic_binary(
                                Op::AtomicExchange,
                                result_type_id,
                                id,
                                pointer_id,
                                scope_id,
                                semantics_id,
                                value_id,
                            )
                        }
                        crate::AtomicFunction::Exchange {
                            compare: Some(compare),
                        } => {
                            let comparator_id = self.ensure_cached(compare, &mut block)?;
                            instruction_atomic_compare_exchange(
                                result_type_id,
                                id,
                                pointer_id,
                                scope_id,
                                semantics_id,
                                semantics_id,
                                value_id,
                                comparator_id,
                            )
                        }
                    };
                    block.body.push(instruction);
                    if let Some(result_handle) = result {
                        self.writer.cached[result_handle] = id;
                        self.write_deferred_stores(result_handle, &mut block)?;
                    }
                }
                crate::Statement::Call {
                    function: callee,
                    ref arguments,
                    result,
                } => {
                    let mut argument_ids = Vec::with_capacity(arguments.len());
                    for &argument in arguments.iter() {
                        argument_ids.push(self.ensure_cached(argument, &mut block)?);
                    }
                    let callee_id = *self
                        .writer
                        .lookup_function
                        .get(&callee)
                        .ok_or(Error::Validation("call to a function not written yet"))?;
                    let result_type_id = match module.functions[callee].result {
                        Some(ref callee_result) => self
                            .writer
                            .get_type_id(&module.types, LookupType::Handle(callee_result.ty))?,
                        None => self.writer.void_type_id(),
                    };
                    let id = self.gen_id();
                    block.body.push(instruction_function_call(
                        result_type_id,
                        id,
                        callee_id,
                        &argument_ids,
                    ));
                    if let Some(result_handle) = result {
                        self.writer.cached[result_handle] = id;
                        self.write_deferred_stores(result_handle, &mut block)?;
                    }
                }
            }
        }

        match exit {
            BlockExit::Return => {
                if ends_with_terminator(statements) {
                    // Only reachable through dead merge blocks.
                    self.function.consume(block, instruction_unreachable());
                } else if ir_function.result.is_some() {
                    return Err(Error::Validation(
                        "control flow reaches the end of a function with a result",
                    ));
                } else {
                    self.function.consume(block, instruction_return());
                }
            }
            BlockExit::Branch { target } => {
                self.function.consume(block, instruction_branch(target));
            }
            BlockExit::BreakIf {
                condition,
                preamble_id,
                merge_id,
            } => {
                let condition_id = self.ensure_cached(condition, &mut block)?;
                self.function.consume(
                    block,
                    instruction_branch_conditional(condition_id, merge_id, preamble_id),
                );
            }
        }
        Ok(())
    }
}
