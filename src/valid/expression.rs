use super::Validator;

use crate::arena::Handle;

impl Validator {
    /// Checks that an expression only refers to earlier expressions and to
    /// entities that exist.
    pub(super) fn validate_expression(
        &mut self,
        module: &crate::Module,
        fun: &crate::Function,
        handle: Handle<crate::Expression>,
        expression: &crate::Expression,
    ) {
        use crate::Expression as Ex;

        let mut deps: Vec<Handle<crate::Expression>> = Vec::new();
        match *expression {
            Ex::Literal(_) | Ex::FunctionArgument(_) => {}
            Ex::Constant(constant) => {
                if module.constants.try_get(constant).is_none() {
                    self.function_error(
                        fun,
                        Some(handle),
                        None,
                        format!("reference to a constant {:?} that doesn't exist", constant),
                    );
                }
            }
            Ex::ZeroValue(ty) => {
                if module.types.try_get(ty).is_none() {
                    self.function_error(
                        fun,
                        Some(handle),
                        None,
                        format!("reference to a type {:?} that doesn't exist", ty),
                    );
                }
            }
            Ex::Compose { ty, ref components } => {
                if module.types.try_get(ty).is_none() {
                    self.function_error(
                        fun,
                        Some(handle),
                        None,
                        format!("reference to a type {:?} that doesn't exist", ty),
                    );
                }
                deps.extend_from_slice(components);
            }
            Ex::Access { base, index } => deps.extend_from_slice(&[base, index]),
            Ex::AccessIndex { base, .. } => deps.push(base),
            Ex::Splat { value, .. } => deps.push(value),
            Ex::Swizzle { vector, .. } => deps.push(vector),
            Ex::GlobalVariable(var) => {
                if module.global_variables.try_get(var).is_none() {
                    self.function_error(
                        fun,
                        Some(handle),
                        None,
                        format!("reference to a global {:?} that doesn't exist", var),
                    );
                }
            }
            Ex::LocalVariable(var) => {
                if fun.local_variables.try_get(var).is_none() {
                    self.function_error(
                        fun,
                        Some(handle),
                        None,
                        format!("reference to a local {:?} that doesn't exist", var),
                    );
                }
            }
            Ex::Load { pointer } => deps.push(pointer),
            Ex::ImageSample {
                image,
                sampler,
                coordinate,
                array_index,
                level,
                depth_ref,
            } => {
                deps.extend_from_slice(&[image, sampler, coordinate]);
                deps.extend(array_index);
                match level {
                    crate::SampleLevel::Auto | crate::SampleLevel::Zero => {}
                    crate::SampleLevel::Exact(expr) | crate::SampleLevel::Bias(expr) => {
                        deps.push(expr)
                    }
                    crate::SampleLevel::Gradient { x, y } => deps.extend_from_slice(&[x, y]),
                }
                deps.extend(depth_ref);
            }
            Ex::ImageLoad {
                image,
                coordinate,
                array_index,
                index,
            } => {
                deps.extend_from_slice(&[image, coordinate]);
                deps.extend(array_index);
                deps.extend(index);
            }
            Ex::ImageQuery { image, query } => {
                deps.push(image);
                if let crate::ImageQuery::Size { level: Some(level) } = query {
                    deps.push(level);
                }
            }
            Ex::Unary { expr, .. } => deps.push(expr),
            Ex::Binary { left, right, .. } => deps.extend_from_slice(&[left, right]),
            Ex::Select {
                condition,
                accept,
                reject,
            } => deps.extend_from_slice(&[condition, accept, reject]),
            Ex::Derivative { expr, .. } => deps.push(expr),
            Ex::Relational { argument, .. } => deps.push(argument),
            Ex::Math {
                arg,
                arg1,
                arg2,
                arg3,
                ..
            } => {
                deps.push(arg);
                deps.extend(arg1);
                deps.extend(arg2);
                deps.extend(arg3);
            }
            Ex::As { expr, .. } => deps.push(expr),
            Ex::CallResult(function) => {
                if module.functions.try_get(function).is_none() {
                    self.function_error(
                        fun,
                        Some(handle),
                        None,
                        format!("result of a function {:?} that doesn't exist", function),
                    );
                }
            }
            Ex::AtomicResult { ty, .. } => {
                if module.types.try_get(ty).is_none() {
                    self.function_error(
                        fun,
                        Some(handle),
                        None,
                        format!("reference to a type {:?} that doesn't exist", ty),
                    );
                }
            }
            Ex::ArrayLength(expr) => deps.push(expr),
        }

        if let Ex::FunctionArgument(index) = *expression {
            if index as usize >= fun.arguments.len() {
                self.function_error(
                    fun,
                    Some(handle),
                    None,
                    format!("reference to argument {} which doesn't exist", index),
                );
            }
        }

        for dep in deps {
            if dep >= handle {
                self.function_error(
                    fun,
                    Some(handle),
                    None,
                    format!("dependency on {:?}, which is not an earlier expression", dep),
                );
            }
        }
    }
}
