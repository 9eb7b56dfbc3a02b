use super::Validator;

impl Validator {
    pub(super) fn validate_global_variables(&mut self, module: &crate::Module) {
        use crate::AddressSpace as As;

        let mut taken_bindings = crate::FastHashSet::default();
        for (handle, var) in module.global_variables.iter() {
            let needs_binding = match var.space {
                As::Uniform | As::Storage { .. } | As::Handle => true,
                As::Function | As::Private | As::WorkGroup | As::PushConstant => false,
            };
            match var.binding {
                Some(ref binding) => {
                    if !needs_binding {
                        self.module_error(format!(
                            "global {:?} in space {:?} must not have a resource binding",
                            handle, var.space
                        ));
                    }
                    if !taken_bindings.insert((binding.group, binding.binding)) {
                        self.module_error(format!(
                            "global {:?} reuses the binding (group={}, binding={})",
                            handle, binding.group, binding.binding
                        ));
                    }
                }
                None => {
                    if needs_binding {
                        self.module_error(format!(
                            "global {:?} in space {:?} is missing a resource binding",
                            handle, var.space
                        ));
                    }
                }
            }
            if var.space == As::Function {
                self.module_error(format!(
                    "global {:?} may not live in the function address space",
                    handle
                ));
            }

            let ty = match module.types.try_get(var.ty) {
                Some(ty) => ty,
                None => {
                    self.module_error(format!(
                        "global {:?} has an out of range type {:?}",
                        handle, var.ty
                    ));
                    continue;
                }
            };
            let is_opaque = matches!(
                ty.inner,
                crate::TypeInner::Image { .. } | crate::TypeInner::Sampler { .. }
            );
            if is_opaque != (var.space == As::Handle) {
                self.module_error(format!(
                    "global {:?} has a type incompatible with space {:?}",
                    handle, var.space
                ));
            }

            if let Some(init) = var.init {
                match module.constants.try_get(init) {
                    Some(constant) => {
                        if constant.ty != var.ty {
                            self.module_error(format!(
                                "global {:?} has an initializer of type {:?} instead of {:?}",
                                handle, constant.ty, var.ty
                            ));
                        }
                    }
                    None => self.module_error(format!(
                        "global {:?} has an out of range initializer {:?}",
                        handle, init
                    )),
                }
            }
        }
    }

    pub(super) fn validate_entry_points(&mut self, module: &crate::Module) {
        let mut names = crate::FastHashSet::default();
        let mut used_functions = crate::FastHashSet::default();

        for entry_point in module.entry_points.iter() {
            if entry_point.name.is_empty() {
                self.module_error("entry point with an empty name".to_string());
            }
            if !names.insert(entry_point.name.as_str()) {
                self.module_error(format!(
                    "duplicate entry point name {:?}",
                    entry_point.name
                ));
            }
            let function = match module.functions.try_get(entry_point.function) {
                Some(function) => function,
                None => {
                    self.module_error(format!(
                        "entry point {:?} refers to a function that doesn't exist",
                        entry_point.name
                    ));
                    continue;
                }
            };
            if !used_functions.insert(entry_point.function) {
                self.module_error(format!(
                    "entry point {:?} shares its function with another entry point",
                    entry_point.name
                ));
            }

            if entry_point.stage == crate::ShaderStage::Compute
                && entry_point.workgroup_size.iter().any(|&dim| dim == 0)
            {
                self.module_error(format!(
                    "compute entry point {:?} has a zero workgroup dimension",
                    entry_point.name
                ));
            }

            // Every argument must be bound, directly or through struct members.
            for (index, argument) in function.arguments.iter().enumerate() {
                if argument.binding.is_some() {
                    continue;
                }
                if !self.is_io_struct(module, argument.ty) {
                    self.module_error(format!(
                        "argument {} of entry point {:?} has no binding",
                        index, entry_point.name
                    ));
                }
            }
            if let Some(ref result) = function.result {
                if result.binding.is_none() && !self.is_io_struct(module, result.ty) {
                    self.module_error(format!(
                        "the result of entry point {:?} has no binding",
                        entry_point.name
                    ));
                }
            }

            if entry_point.stage == crate::ShaderStage::Vertex
                && !self.result_exposes_position(module, function)
            {
                self.module_error(format!(
                    "vertex entry point {:?} must return a value bound to the position built-in",
                    entry_point.name
                ));
            }
        }
    }

    /// Whether the type is a struct whose members all carry bindings.
    fn is_io_struct(&self, module: &crate::Module, ty: crate::Handle<crate::Type>) -> bool {
        match module.types.try_get(ty).map(|t| &t.inner) {
            Some(&crate::TypeInner::Struct { ref members, .. }) => {
                members.iter().all(|member| member.binding.is_some())
            }
            _ => false,
        }
    }

    fn result_exposes_position(
        &self,
        module: &crate::Module,
        function: &crate::Function,
    ) -> bool {
        let position = crate::Binding::BuiltIn(crate::BuiltIn::Position);
        match function.result {
            Some(ref result) => match result.binding {
                Some(ref binding) => *binding == position,
                None => match module.types.try_get(result.ty).map(|t| &t.inner) {
                    Some(&crate::TypeInner::Struct { ref members, .. }) => members
                        .iter()
                        .any(|member| member.binding.as_ref() == Some(&position)),
                    _ => false,
                },
            },
            None => false,
        }
    }
}
