//! Checks the validity of a module before it reaches a back end.
//!
//! Validation never panics and never stops at the first problem: all issues
//! are accumulated and returned as data. An empty error list means the module
//! is safe to hand to the SPIR-V back end.

mod expression;
mod function;
mod interface;
mod r#type;

use crate::arena::Handle;

use std::fmt;

/// A single validation failure, with enough metadata to locate it.
#[derive(Clone, Debug)]
pub struct ValidationError {
    /// Description of what is wrong.
    pub message: String,
    /// Name of the offending function, if the error is function-scoped.
    pub function: Option<String>,
    /// Offending expression, if any.
    pub expression: Option<Handle<crate::Expression>>,
    /// Index of the offending statement in its block, if any.
    pub statement: Option<usize>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self.function {
            Some(ref name) => {
                write!(formatter, "in function {}", name)?;
                if let Some(expression) = self.expression {
                    write!(formatter, ", expression {:?}", expression)?;
                }
                if let Some(statement) = self.statement {
                    write!(formatter, ", statement {}", statement)?;
                }
                write!(formatter, ": {}", self.message)
            }
            None => write!(formatter, "{}", self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates an entire module, accumulating the issues found.
#[derive(Debug, Default)]
pub struct Validator {
    /// Types that passed validation, by arena index. A compound type may only
    /// refer to types already in this set, which also rules out cycles.
    valid_types: bit_set::BitSet,
    errors: Vec<ValidationError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the full property sweep over the module.
    pub fn validate(&mut self, module: &crate::Module) -> Vec<ValidationError> {
        self.errors.clear();
        self.valid_types.clear();

        self.validate_types(module);
        self.validate_constants(module);
        self.validate_global_variables(module);
        for (handle, fun) in module.functions.iter() {
            self.validate_function(module, handle, fun);
        }
        self.validate_entry_points(module);

        if !self.errors.is_empty() {
            log::warn!("validation found {} issues", self.errors.len());
        }
        std::mem::take(&mut self.errors)
    }

    fn module_error(&mut self, message: String) {
        self.errors.push(ValidationError {
            message,
            function: None,
            expression: None,
            statement: None,
        });
    }

    fn function_error(
        &mut self,
        function: &crate::Function,
        expression: Option<Handle<crate::Expression>>,
        statement: Option<usize>,
        message: String,
    ) {
        self.errors.push(ValidationError {
            message,
            function: Some(
                function
                    .name
                    .clone()
                    .unwrap_or_else(|| "<unnamed>".to_string()),
            ),
            expression,
            statement,
        });
    }
}

/// Checks that a scalar width is one the IR permits for the kind.
fn check_width(kind: crate::ScalarKind, width: crate::Bytes) -> bool {
    match kind {
        crate::ScalarKind::Bool => width == 1,
        crate::ScalarKind::Sint | crate::ScalarKind::Uint => {
            matches!(width, 1 | 2 | 4 | 8)
        }
        crate::ScalarKind::Float => matches!(width, 2 | 4 | 8),
    }
}
