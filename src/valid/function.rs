use super::Validator;

use crate::arena::Handle;

/// What kind of block a statement lives in, for `Break`/`Continue` checks.
#[derive(Clone, Copy, Debug, PartialEq)]
enum BlockKind {
    LoopBody,
    Continuing,
    SwitchCase,
}

impl Validator {
    pub(super) fn validate_function(
        &mut self,
        module: &crate::Module,
        _handle: Handle<crate::Function>,
        fun: &crate::Function,
    ) {
        if let Some(ref result) = fun.result {
            if module.types.try_get(result.ty).is_none() {
                self.function_error(
                    fun,
                    None,
                    None,
                    format!("result type {:?} doesn't exist", result.ty),
                );
            }
        }
        for argument in fun.arguments.iter() {
            if module.types.try_get(argument.ty).is_none() {
                self.function_error(
                    fun,
                    None,
                    None,
                    format!("argument type {:?} doesn't exist", argument.ty),
                );
            }
        }

        for (expr_handle, expression) in fun.expressions.iter() {
            self.validate_expression(module, fun, expr_handle, expression);
        }

        let types_ok = fun.expression_types.len() == fun.expressions.len();
        if !types_ok {
            self.function_error(
                fun,
                None,
                None,
                format!(
                    "expression types are out of sync: {} entries for {} expressions",
                    fun.expression_types.len(),
                    fun.expressions.len()
                ),
            );
        }

        for (_, var) in fun.local_variables.iter() {
            if module.types.try_get(var.ty).is_none() {
                self.function_error(
                    fun,
                    None,
                    None,
                    format!("local variable type {:?} doesn't exist", var.ty),
                );
                continue;
            }
            if let Some(init) = var.init {
                if !fun.expressions.check_contains_handle(init) {
                    self.function_error(
                        fun,
                        Some(init),
                        None,
                        "local variable initializer doesn't exist".to_string(),
                    );
                } else if types_ok {
                    let init_inner =
                        fun.expression_types[init.index()].inner_with(&module.types);
                    if *init_inner != module.types[var.ty].inner {
                        self.function_error(
                            fun,
                            Some(init),
                            None,
                            format!(
                                "local variable initializer type {:?} doesn't match {:?}",
                                init_inner, var.ty
                            ),
                        );
                    }
                }
            }
        }

        let mut kind_stack = Vec::new();
        self.validate_block(module, fun, &fun.body, &mut kind_stack, types_ok);
    }

    fn expr_in_range(
        &mut self,
        fun: &crate::Function,
        index: usize,
        expr: Handle<crate::Expression>,
    ) -> bool {
        if fun.expressions.check_contains_handle(expr) {
            true
        } else {
            self.function_error(
                fun,
                Some(expr),
                Some(index),
                "statement refers to an expression that doesn't exist".to_string(),
            );
            false
        }
    }

    fn validate_block(
        &mut self,
        module: &crate::Module,
        fun: &crate::Function,
        block: &[crate::Statement],
        kind_stack: &mut Vec<BlockKind>,
        types_ok: bool,
    ) {
        use crate::Statement as St;

        for (index, statement) in block.iter().enumerate() {
            match *statement {
                St::Emit(ref range) => {
                    let expr_range = range.index_range();
                    if expr_range.start >= expr_range.end
                        || expr_range.end as usize > fun.expressions.len()
                    {
                        self.function_error(
                            fun,
                            None,
                            Some(index),
                            format!(
                                "emit range {}..{} is out of bounds for {} expressions",
                                expr_range.start,
                                expr_range.end,
                                fun.expressions.len()
                            ),
                        );
                    }
                }
                St::Block(ref inner) => {
                    self.validate_block(module, fun, inner, kind_stack, types_ok)
                }
                St::If {
                    condition,
                    ref accept,
                    ref reject,
                } => {
                    self.expr_in_range(fun, index, condition);
                    self.validate_block(module, fun, accept, kind_stack, types_ok);
                    self.validate_block(module, fun, reject, kind_stack, types_ok);
                }
                St::Switch { selector, ref cases } => {
                    self.expr_in_range(fun, index, selector);
                    let defaults = cases
                        .iter()
                        .filter(|case| case.value == crate::SwitchValue::Default)
                        .count();
                    if defaults != 1 {
                        self.function_error(
                            fun,
                            None,
                            Some(index),
                            format!("switch has {} default cases instead of one", defaults),
                        );
                    }
                    if let Some(last) = cases.last() {
                        if last.fall_through {
                            self.function_error(
                                fun,
                                None,
                                Some(index),
                                "the last switch case may not fall through".to_string(),
                            );
                        }
                    }
                    for case in cases {
                        kind_stack.push(BlockKind::SwitchCase);
                        self.validate_block(module, fun, &case.body, kind_stack, types_ok);
                        kind_stack.pop();
                    }
                }
                St::Loop {
                    ref body,
                    ref continuing,
                    break_if,
                } => {
                    kind_stack.push(BlockKind::LoopBody);
                    self.validate_block(module, fun, body, kind_stack, types_ok);
                    kind_stack.pop();
                    kind_stack.push(BlockKind::Continuing);
                    self.validate_block(module, fun, continuing, kind_stack, types_ok);
                    kind_stack.pop();
                    if let Some(expr) = break_if {
                        self.expr_in_range(fun, index, expr);
                    }
                }
                St::Break => match kind_stack.last() {
                    Some(&BlockKind::LoopBody) | Some(&BlockKind::SwitchCase) => {}
                    Some(&BlockKind::Continuing) => self.function_error(
                        fun,
                        None,
                        Some(index),
                        "break is not allowed in a continuing block".to_string(),
                    ),
                    None => self.function_error(
                        fun,
                        None,
                        Some(index),
                        "break outside of a loop or switch".to_string(),
                    ),
                },
                St::Continue => {
                    // `continue` inside a switch targets the surrounding loop.
                    let outside_switch = kind_stack
                        .iter()
                        .rev()
                        .find(|&&kind| kind != BlockKind::SwitchCase);
                    match outside_switch {
                        Some(&BlockKind::LoopBody) => {}
                        Some(&BlockKind::Continuing) => self.function_error(
                            fun,
                            None,
                            Some(index),
                            "continue is not allowed in a continuing block".to_string(),
                        ),
                        _ => self.function_error(
                            fun,
                            None,
                            Some(index),
                            "continue outside of a loop".to_string(),
                        ),
                    }
                }
                St::Return { value } => {
                    if let Some(expr) = value {
                        self.expr_in_range(fun, index, expr);
                    }
                    match (value.is_some(), fun.result.is_some()) {
                        (true, false) => self.function_error(
                            fun,
                            None,
                            Some(index),
                            "returning a value from a function without a result".to_string(),
                        ),
                        (false, true) => self.function_error(
                            fun,
                            None,
                            Some(index),
                            "returning no value from a function with a result".to_string(),
                        ),
                        _ => {}
                    }
                }
                St::Kill | St::Barrier(_) => {}
                St::Store { pointer, value } => {
                    let pointer_ok = self.expr_in_range(fun, index, pointer);
                    self.expr_in_range(fun, index, value);
                    if pointer_ok && types_ok {
                        let inner =
                            fun.expression_types[pointer.index()].inner_with(&module.types);
                        if inner.pointer_space().is_none() {
                            self.function_error(
                                fun,
                                Some(pointer),
                                Some(index),
                                "store destination is not a pointer".to_string(),
                            );
                        }
                    }
                }
                St::ImageStore {
                    image,
                    coordinate,
                    array_index,
                    value,
                } => {
                    self.expr_in_range(fun, index, image);
                    self.expr_in_range(fun, index, coordinate);
                    if let Some(expr) = array_index {
                        self.expr_in_range(fun, index, expr);
                    }
                    self.expr_in_range(fun, index, value);
                }
                St::Atomic {
                    pointer,
                    fun: _,
                    value,
                    result,
                } => {
                    let pointer_ok = self.expr_in_range(fun, index, pointer);
                    self.expr_in_range(fun, index, value);
                    if pointer_ok && types_ok {
                        let inner =
                            fun.expression_types[pointer.index()].inner_with(&module.types);
                        let is_atomic_pointer = match *inner {
                            crate::TypeInner::Pointer { base, .. } => matches!(
                                module.types.try_get(base).map(|t| &t.inner),
                                Some(&crate::TypeInner::Atomic { .. })
                            ),
                            _ => false,
                        };
                        if !is_atomic_pointer {
                            self.function_error(
                                fun,
                                Some(pointer),
                                Some(index),
                                "atomic operand is not a pointer to an atomic".to_string(),
                            );
                        }
                    }
                    if let Some(result_handle) = result {
                        if self.expr_in_range(fun, index, result_handle) {
                            match fun.expressions[result_handle] {
                                crate::Expression::AtomicResult { .. } => {}
                                _ => self.function_error(
                                    fun,
                                    Some(result_handle),
                                    Some(index),
                                    "atomic result is not an atomic result expression"
                                        .to_string(),
                                ),
                            }
                        }
                    }
                }
                St::Call {
                    function,
                    ref arguments,
                    result,
                } => {
                    if module.functions.try_get(function).is_none() {
                        self.function_error(
                            fun,
                            None,
                            Some(index),
                            format!("call to a function {:?} that doesn't exist", function),
                        );
                    }
                    for &argument in arguments {
                        self.expr_in_range(fun, index, argument);
                    }
                    if let Some(result_handle) = result {
                        if self.expr_in_range(fun, index, result_handle) {
                            match fun.expressions[result_handle] {
                                crate::Expression::CallResult(callee)
                                    if callee == function => {}
                                _ => self.function_error(
                                    fun,
                                    Some(result_handle),
                                    Some(index),
                                    "call result is not a call result expression of the callee"
                                        .to_string(),
                                ),
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::valid::Validator;

    fn validate(source: &str) -> Vec<crate::valid::ValidationError> {
        let module = crate::front::wgsl::parse_str(source).unwrap();
        Validator::new().validate(&module)
    }

    #[test]
    fn break_in_continuing_is_rejected() {
        let mut module = crate::Module::default();
        let mut fun = crate::Function::default();
        fun.name = Some("bad".to_string());
        fun.body = vec![crate::Statement::Loop {
            body: Vec::new(),
            continuing: vec![crate::Statement::Break],
            break_if: None,
        }];
        module.functions.append(fun);
        let errors = Validator::new().validate(&module);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("break is not allowed in a continuing block")));
    }

    #[test]
    fn break_in_loop_body_is_accepted() {
        let errors = validate(
            "fn f() { loop { break; } }",
        );
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn vertex_without_position_is_rejected() {
        let mut module = crate::Module::default();
        let vec4 = module.types.append(crate::Type {
            name: None,
            inner: crate::TypeInner::Vector {
                size: crate::VectorSize::Quad,
                kind: crate::ScalarKind::Float,
                width: 4,
            },
        });
        let mut fun = crate::Function::default();
        fun.name = Some("vs".to_string());
        fun.result = Some(crate::FunctionResult {
            ty: vec4,
            binding: Some(crate::Binding::Location {
                location: 0,
                interpolation: None,
            }),
        });
        let fun_handle = module.functions.append(fun);
        module.entry_points.push(crate::EntryPoint {
            name: "vs".to_string(),
            stage: crate::ShaderStage::Vertex,
            workgroup_size: [0; 3],
            function: fun_handle,
        });
        let errors = Validator::new().validate(&module);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("position")));
    }
}
