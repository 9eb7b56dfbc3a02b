//! Front end for consuming [WebGPU Shading Language][wgsl].
//!
//! [wgsl]: https://gpuweb.github.io/gpuweb/wgsl.html

mod conv;
mod lexer;

use crate::arena::Handle;
use crate::front::Emitter;
use crate::proc::{Layouter, ResolveContext, ResolveError, TypeRegistry, Typifier};
use crate::FastHashMap;

use self::lexer::Lexer;

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term::{
    self,
    termcolor::{ColorChoice, NoColor, StandardStream},
};
use thiserror::Error;

use std::fmt;

pub type Span = std::ops::Range<usize>;
pub type TokenSpan<'a> = (Token<'a>, Span);

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Token<'a> {
    Separator(char),
    Paren(char),
    Attribute,
    Number(&'a str),
    Word(&'a str),
    Operation(char),
    LogicalOperation(char),
    ShiftOperation(char),
    Arrow,
    IncrementOperation,
    DecrementOperation,
    Unknown(char),
    End,
}

#[derive(Clone, Debug, Error)]
pub enum Error<'a> {
    #[error("unexpected token")]
    Unexpected(TokenSpan<'a>, &'static str),
    #[error("unknown identifier")]
    UnknownIdent(Span, &'a str),
    #[error("unknown type")]
    UnknownType(Span),
    #[error("unknown attribute")]
    UnknownAttribute(Span),
    #[error("unknown built-in")]
    UnknownBuiltin(Span),
    #[error("unknown address space")]
    UnknownAddressSpace(Span),
    #[error("unknown access qualifier")]
    UnknownAccess(Span),
    #[error("unknown storage format")]
    UnknownStorageFormat(Span),
    #[error("bad number literal")]
    BadNumber(Span),
    #[error("bad unsigned integer")]
    BadU32(Span),
    #[error("bad field accessor")]
    BadAccessor(Span),
    #[error("the operand is not an atomic pointer")]
    InvalidAtomicPointer(Span),
    #[error("the expression can not be assigned to")]
    NotReference(Span),
    #[error("the function returns no value")]
    FunctionReturnsVoid(Span),
    #[error("a compute entry point needs a workgroup size")]
    MissingWorkgroupSize(Span),
    #[error("wrong number of arguments")]
    WrongArgumentCount(Span),
    #[error(transparent)]
    InvalidResolve(ResolveError),
}

impl<'a> Error<'a> {
    fn as_parse_error(&self, source: &str) -> ParseError {
        let (message, span, label) = match *self {
            Error::Unexpected((ref token, ref span), expected) => (
                format!("expected {}, found {:?}", expected, token),
                span.clone(),
                "unexpected token".to_string(),
            ),
            Error::UnknownIdent(ref span, ident) => (
                format!("no definition in scope for identifier: '{}'", ident),
                span.clone(),
                "unknown identifier".to_string(),
            ),
            Error::UnknownType(ref span) => (
                format!("unknown type: '{}'", &source[span.clone()]),
                span.clone(),
                "unknown type".to_string(),
            ),
            Error::UnknownAttribute(ref span) => (
                format!("unknown attribute: '{}'", &source[span.clone()]),
                span.clone(),
                "unknown attribute".to_string(),
            ),
            Error::UnknownBuiltin(ref span) => (
                format!("unknown built-in: '{}'", &source[span.clone()]),
                span.clone(),
                "unknown built-in".to_string(),
            ),
            Error::UnknownAddressSpace(ref span) => (
                format!("unknown address space: '{}'", &source[span.clone()]),
                span.clone(),
                "unknown address space".to_string(),
            ),
            Error::UnknownAccess(ref span) => (
                format!("unknown access qualifier: '{}'", &source[span.clone()]),
                span.clone(),
                "unknown access".to_string(),
            ),
            Error::UnknownStorageFormat(ref span) => (
                format!("unknown storage format: '{}'", &source[span.clone()]),
                span.clone(),
                "unknown storage format".to_string(),
            ),
            Error::BadNumber(ref span) => (
                format!("the number '{}' is invalid here", &source[span.clone()]),
                span.clone(),
                "invalid number".to_string(),
            ),
            Error::BadU32(ref span) => (
                format!("'{}' is not a valid unsigned integer", &source[span.clone()]),
                span.clone(),
                "invalid unsigned integer".to_string(),
            ),
            Error::BadAccessor(ref span) => (
                format!("invalid field accessor '{}'", &source[span.clone()]),
                span.clone(),
                "invalid accessor".to_string(),
            ),
            Error::InvalidAtomicPointer(ref span) => (
                "the operand is not a pointer to an atomic".to_string(),
                span.clone(),
                "not an atomic pointer".to_string(),
            ),
            Error::NotReference(ref span) => (
                "the left-hand side can not be assigned to".to_string(),
                span.clone(),
                "not assignable".to_string(),
            ),
            Error::FunctionReturnsVoid(ref span) => (
                "this function returns no value, it can not be used in an expression"
                    .to_string(),
                span.clone(),
                "returns void".to_string(),
            ),
            Error::MissingWorkgroupSize(ref span) => (
                "a compute entry point needs a workgroup_size attribute".to_string(),
                span.clone(),
                "missing workgroup size".to_string(),
            ),
            Error::WrongArgumentCount(ref span) => (
                "wrong number of arguments".to_string(),
                span.clone(),
                "wrong argument count".to_string(),
            ),
            Error::InvalidResolve(ref error) => (
                format!("failed to resolve an expression type: {}", error),
                0..0,
                "type error".to_string(),
            ),
        };
        ParseError {
            message,
            labels: vec![(span, label)],
        }
    }
}

/// A WGSL parse failure, renderable against the source text.
#[derive(Clone)]
pub struct ParseError {
    message: String,
    labels: Vec<(Span, String)>,
}

impl ParseError {
    fn diagnostic(&self) -> Diagnostic<()> {
        Diagnostic::error()
            .with_message(self.message.clone())
            .with_labels(
                self.labels
                    .iter()
                    .map(|(span, message)| {
                        Label::primary((), span.clone()).with_message(message)
                    })
                    .collect(),
            )
    }

    /// Prints the error with the source context to standard error.
    pub fn emit_to_stderr(&self, source: &str) {
        let files = SimpleFile::new("wgsl", source);
        let config = term::Config::default();
        let writer = StandardStream::stderr(ColorChoice::Auto);
        term::emit(&mut writer.lock(), &config, &files, &self.diagnostic())
            .expect("could not write error");
    }

    /// Renders the error with the source context into a string.
    pub fn emit_to_string(&self, source: &str) -> String {
        let files = SimpleFile::new("wgsl", source);
        let config = term::Config::default();
        let mut writer = NoColor::new(Vec::new());
        term::emit(&mut writer, &config, &files, &self.diagnostic())
            .expect("could not write error");
        String::from_utf8(writer.into_inner()).unwrap()
    }
}

impl fmt::Debug for ParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}", self.message)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// An expression handle paired with WGSL's reference semantics.
///
/// Reading a `var` produces a reference; most uses insert a [`Load`] first,
/// which [`apply_load_rule`](ExpressionContext::apply_load_rule) does.
///
/// [`Load`]: crate::Expression::Load
#[derive(Clone, Copy, Debug)]
struct TypedExpression {
    handle: Handle<crate::Expression>,
    is_reference: bool,
}

impl TypedExpression {
    fn value(handle: Handle<crate::Expression>) -> Self {
        TypedExpression {
            handle,
            is_reference: false,
        }
    }
}

/// Borrows of everything expression lowering needs.
struct ExpressionContext<'input, 'temp, 'out> {
    lookup_ident: &'temp FastHashMap<&'input str, TypedExpression>,
    typifier: &'temp mut Typifier,
    module: &'out mut crate::Module,
    function: &'out mut crate::Function,
    emitter: &'temp mut Emitter,
    /// The block the statement under construction goes into; calls and
    /// atomics inject their statement here from expression position.
    block: &'temp mut crate::Block,
}

impl<'input> ExpressionContext<'input, '_, '_> {
    fn append(&mut self, expression: crate::Expression) -> Handle<crate::Expression> {
        self.function.expressions.append(expression)
    }

    /// Closes the current emit range, appends an expression that must not be
    /// covered by one, and opens a fresh range.
    fn interrupt_emitter(
        &mut self,
        expression: crate::Expression,
    ) -> Handle<crate::Expression> {
        if let Some(statement) = self.emitter.finish(&self.function.expressions) {
            self.block.push(statement);
        }
        let handle = self.function.expressions.append(expression);
        self.emitter.start(&self.function.expressions);
        handle
    }

    fn apply_load_rule(&mut self, expr: TypedExpression) -> Handle<crate::Expression> {
        if expr.is_reference {
            self.append(crate::Expression::Load {
                pointer: expr.handle,
            })
        } else {
            expr.handle
        }
    }

    fn resolve_type<'e>(
        &mut self,
        handle: Handle<crate::Expression>,
    ) -> Result<crate::TypeInner, Error<'e>> {
        let resolve_ctx = ResolveContext {
            constants: &self.module.constants,
            types: &self.module.types,
            global_vars: &self.module.global_variables,
            local_vars: &self.function.local_variables,
            functions: &self.module.functions,
            arguments: &self.function.arguments,
        };
        self.typifier
            .grow(handle, &self.function.expressions, &resolve_ctx)
            .map_err(Error::InvalidResolve)?;
        Ok(self.typifier.get(handle, &self.module.types).clone())
    }

    /// The type a reference or pointer expression points at; other
    /// expressions resolve to themselves.
    fn resolve_pointee<'e>(
        &mut self,
        handle: Handle<crate::Expression>,
    ) -> Result<crate::TypeInner, Error<'e>> {
        let inner = self.resolve_type(handle)?;
        Ok(match inner {
            crate::TypeInner::Pointer { base, .. } => self.module.types[base].inner.clone(),
            crate::TypeInner::ValuePointer {
                size: Some(size),
                kind,
                width,
                ..
            } => crate::TypeInner::Vector { size, kind, width },
            crate::TypeInner::ValuePointer {
                size: None,
                kind,
                width,
                ..
            } => crate::TypeInner::Scalar { kind, width },
            other => other,
        })
    }
}

/// Borrows of everything statement lowering needs.
struct StatementContext<'input, 'temp, 'out> {
    lookup_ident: &'temp mut FastHashMap<&'input str, TypedExpression>,
    typifier: &'temp mut Typifier,
    module: &'out mut crate::Module,
    function: &'out mut crate::Function,
}

impl<'input> StatementContext<'input, '_, '_> {
    fn as_expression<'t>(
        &'t mut self,
        emitter: &'t mut Emitter,
        block: &'t mut crate::Block,
    ) -> ExpressionContext<'input, 't, 't> {
        ExpressionContext {
            lookup_ident: &*self.lookup_ident,
            typifier: &mut *self.typifier,
            module: &mut *self.module,
            function: &mut *self.function,
            emitter,
            block,
        }
    }
}

/// Whether an initializer tree depends on a call or atomic result, walking
/// binary and unary expressions only; other variants are leaves. The back end
/// uses the same walk to decide which initializer stores to defer.
fn contains_result(
    expressions: &crate::Arena<crate::Expression>,
    root: Handle<crate::Expression>,
) -> bool {
    match expressions[root] {
        crate::Expression::CallResult(_) | crate::Expression::AtomicResult { .. } => true,
        crate::Expression::Binary { left, right, .. } => {
            contains_result(expressions, left) || contains_result(expressions, right)
        }
        crate::Expression::Unary { expr, .. } => contains_result(expressions, expr),
        _ => false,
    }
}

#[derive(Default)]
struct BindingParser {
    location: Option<u32>,
    built_in: Option<crate::BuiltIn>,
    interpolation: Option<crate::Interpolation>,
}

impl BindingParser {
    fn parse<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        name: &'a str,
        name_span: Span,
    ) -> Result<(), Error<'a>> {
        match name {
            "location" => {
                lexer.expect(Token::Paren('('))?;
                self.location = Some(lexer.next_uint_literal()?);
                lexer.expect(Token::Paren(')'))?;
            }
            "builtin" => {
                lexer.expect(Token::Paren('('))?;
                let (word, span) = lexer.next_ident_with_span()?;
                self.built_in = Some(conv::map_built_in(word, span)?);
                lexer.expect(Token::Paren(')'))?;
            }
            "interpolate" => {
                lexer.expect(Token::Paren('('))?;
                let (word, span) = lexer.next_ident_with_span()?;
                self.interpolation = Some(conv::map_interpolation(word, span)?);
                // the sampling qualifier is accepted and ignored
                if lexer.skip(Token::Separator(',')) {
                    let _ = lexer.next_ident_with_span()?;
                }
                lexer.expect(Token::Paren(')'))?;
            }
            _ => return Err(Error::UnknownAttribute(name_span)),
        }
        Ok(())
    }

    fn finish(self) -> Option<crate::Binding> {
        match (self.location, self.built_in) {
            (Some(location), None) => Some(crate::Binding::Location {
                location,
                interpolation: self.interpolation,
            }),
            (None, Some(built_in)) => Some(crate::Binding::BuiltIn(built_in)),
            _ => None,
        }
    }
}

/// WGSL parser and lowerer.
///
/// Turns source text directly into IR; types are deduplicated on the fly
/// through a [`TypeRegistry`].
pub struct Parser {
    registry: TypeRegistry,
    layouter: Layouter,
    lookup_type: FastHashMap<String, Handle<crate::Type>>,
    lookup_global_var: FastHashMap<String, Handle<crate::GlobalVariable>>,
    lookup_constant: FastHashMap<String, Handle<crate::Constant>>,
    lookup_function: FastHashMap<String, Handle<crate::Function>>,
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            registry: TypeRegistry::new(),
            layouter: Layouter::default(),
            lookup_type: FastHashMap::default(),
            lookup_global_var: FastHashMap::default(),
            lookup_constant: FastHashMap::default(),
            lookup_function: FastHashMap::default(),
        }
    }

    pub fn parse(&mut self, source: &str) -> Result<crate::Module, ParseError> {
        self.registry = TypeRegistry::new();
        self.layouter.clear();
        self.lookup_type.clear();
        self.lookup_global_var.clear();
        self.lookup_constant.clear();
        self.lookup_function.clear();

        let mut module = crate::Module::default();
        let mut lexer = Lexer::new(source);
        loop {
            match self.parse_global_decl(&mut lexer, &mut module) {
                Err(error) => return Err(error.as_parse_error(lexer.source)),
                Ok(true) => {}
                Ok(false) => return Ok(module),
            }
        }
    }
}

/// Parses a WGSL module from source text.
pub fn parse_str(source: &str) -> Result<crate::Module, ParseError> {
    Parser::new().parse(source)
}

impl Parser {
    fn parse_global_decl<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        module: &mut crate::Module,
    ) -> Result<bool, Error<'a>> {
        // attributes
        let mut stage = None;
        let mut workgroup_size = None;
        let mut group = None;
        let mut binding = None;
        while lexer.skip(Token::Attribute) {
            let (word, span) = lexer.next_ident_with_span()?;
            if let Some(parsed_stage) = conv::map_shader_stage(word) {
                stage = Some((parsed_stage, span));
                continue;
            }
            match word {
                "workgroup_size" => {
                    lexer.expect(Token::Paren('('))?;
                    let mut size = [1u32; 3];
                    for dim in size.iter_mut() {
                        *dim = self.parse_const_u32(lexer, module)?;
                        if !lexer.skip(Token::Separator(',')) {
                            break;
                        }
                    }
                    lexer.expect(Token::Paren(')'))?;
                    workgroup_size = Some(size);
                }
                "group" => {
                    lexer.expect(Token::Paren('('))?;
                    group = Some(lexer.next_uint_literal()?);
                    lexer.expect(Token::Paren(')'))?;
                }
                "binding" => {
                    lexer.expect(Token::Paren('('))?;
                    binding = Some(lexer.next_uint_literal()?);
                    lexer.expect(Token::Paren(')'))?;
                }
                _ => return Err(Error::UnknownAttribute(span)),
            }
        }

        match lexer.next() {
            (Token::Word("struct"), _) => {
                self.parse_struct_decl(lexer, module)?;
                Ok(true)
            }
            (Token::Word("const"), _) => {
                self.parse_global_constant(lexer, module)?;
                Ok(true)
            }
            (Token::Word("var"), _) => {
                self.parse_global_variable(lexer, module, group, binding)?;
                Ok(true)
            }
            (Token::Word("fn"), _) => {
                self.parse_function_decl(lexer, module, stage, workgroup_size)?;
                Ok(true)
            }
            (Token::Separator(';'), _) => Ok(true),
            (Token::End, _) => Ok(false),
            other => Err(Error::Unexpected(other, "a global declaration")),
        }
    }

    fn parse_struct_decl<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        module: &mut crate::Module,
    ) -> Result<(), Error<'a>> {
        use crate::proc::Alignment;

        let name = lexer.next_ident()?;
        lexer.expect(Token::Paren('{'))?;

        let mut members = Vec::new();
        let mut offset = 0u32;
        let mut struct_alignment = Alignment::ONE;
        loop {
            if lexer.skip(Token::Paren('}')) {
                break;
            }
            let mut binding_parser = BindingParser::default();
            let mut size_override = None;
            let mut align_override = None;
            while lexer.skip(Token::Attribute) {
                let (word, span) = lexer.next_ident_with_span()?;
                match word {
                    "size" => {
                        lexer.expect(Token::Paren('('))?;
                        size_override = Some(lexer.next_uint_literal()?);
                        lexer.expect(Token::Paren(')'))?;
                    }
                    "align" => {
                        lexer.expect(Token::Paren('('))?;
                        let value = lexer.next_uint_literal()?;
                        align_override =
                            Some(Alignment::new(value).ok_or(Error::BadU32(span))?);
                        lexer.expect(Token::Paren(')'))?;
                    }
                    _ => binding_parser.parse(lexer, word, span)?,
                }
            }
            let member_name = lexer.next_ident()?;
            lexer.expect(Token::Separator(':'))?;
            let ty = self.parse_type_decl(lexer, module)?;
            // members may end with a comma, a semicolon, or the brace
            let _ = lexer.skip(Token::Separator(',')) || lexer.skip(Token::Separator(';'));

            self.layouter.update(&module.types);
            let layout = self.layouter[ty];
            let alignment = align_override.unwrap_or(layout.alignment);
            offset = alignment.round_up(offset);
            struct_alignment = struct_alignment.max(alignment);
            members.push(crate::StructMember {
                name: Some(member_name.to_string()),
                ty,
                binding: binding_parser.finish(),
                offset,
            });
            offset += size_override.unwrap_or(layout.size);
        }

        let span = struct_alignment.round_up(offset);
        let handle = self.registry.register(
            &mut module.types,
            Some(name.to_string()),
            crate::TypeInner::Struct { members, span },
        );
        self.lookup_type.insert(name.to_string(), handle);
        Ok(())
    }

    fn parse_global_variable<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        module: &mut crate::Module,
        group: Option<u32>,
        binding: Option<u32>,
    ) -> Result<(), Error<'a>> {
        // address space and access, e.g. `var<storage, read_write>`
        let mut space = None;
        if lexer.skip(Token::Paren('<')) {
            let (word, span) = lexer.next_ident_with_span()?;
            let mut parsed = conv::map_address_space(word, span)?;
            if let crate::AddressSpace::Storage { ref mut access } = parsed {
                if lexer.skip(Token::Separator(',')) {
                    let (word, span) = lexer.next_ident_with_span()?;
                    *access = conv::map_storage_access(word, span)?;
                }
            }
            lexer.expect(Token::Paren('>'))?;
            space = Some(parsed);
        }

        let name = lexer.next_ident()?;
        lexer.expect(Token::Separator(':'))?;
        let ty = self.parse_type_decl(lexer, module)?;

        let init = if lexer.skip(Token::Operation('=')) {
            Some(self.parse_const_expression(lexer, module)?)
        } else {
            None
        };
        lexer.expect(Token::Separator(';'))?;

        let space = space.unwrap_or(match module.types[ty].inner {
            crate::TypeInner::Image { .. } | crate::TypeInner::Sampler { .. } => {
                crate::AddressSpace::Handle
            }
            _ => crate::AddressSpace::Private,
        });
        let resource_binding = match (group, binding) {
            (Some(group), Some(binding)) => Some(crate::ResourceBinding { group, binding }),
            _ => None,
        };

        let handle = module.global_variables.append(crate::GlobalVariable {
            name: Some(name.to_string()),
            space,
            binding: resource_binding,
            ty,
            init,
        });
        self.lookup_global_var.insert(name.to_string(), handle);
        Ok(())
    }

    fn parse_global_constant<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        module: &mut crate::Module,
    ) -> Result<(), Error<'a>> {
        let name = lexer.next_ident()?;
        if lexer.skip(Token::Separator(':')) {
            let _ = self.parse_type_decl(lexer, module)?;
        }
        lexer.expect(Token::Operation('='))?;
        let handle = self.parse_const_expression(lexer, module)?;
        lexer.expect(Token::Separator(';'))?;
        module.constants.get_mut(handle).name = Some(name.to_string());
        self.lookup_constant.insert(name.to_string(), handle);
        Ok(())
    }

    fn register_scalar_constant(
        &mut self,
        module: &mut crate::Module,
        value: crate::ScalarValue,
        width: crate::Bytes,
    ) -> Handle<crate::Constant> {
        let kind = match value {
            crate::ScalarValue::Sint(_) => crate::ScalarKind::Sint,
            crate::ScalarValue::Uint(_) => crate::ScalarKind::Uint,
            crate::ScalarValue::Float(_) => crate::ScalarKind::Float,
            crate::ScalarValue::Bool(_) => crate::ScalarKind::Bool,
        };
        let ty = self.registry.register(
            &mut module.types,
            None,
            crate::TypeInner::Scalar { kind, width },
        );
        module.constants.fetch_or_append(crate::Constant {
            name: None,
            ty,
            inner: crate::ConstantInner::Scalar { width, value },
        })
    }

    fn parse_const_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        module: &mut crate::Module,
    ) -> Result<Handle<crate::Constant>, Error<'a>> {
        let negate = lexer.skip(Token::Operation('-'));
        match lexer.peek() {
            Token::Number(_) => {
                let (word, span) = lexer.next_number()?;
                let literal = conv::parse_literal(word, span.clone())?;
                let (value, width) = match literal {
                    crate::Literal::F64(v) => {
                        (crate::ScalarValue::Float(if negate { -v } else { v }), 8)
                    }
                    crate::Literal::F32(v) => (
                        crate::ScalarValue::Float(if negate { -v as f64 } else { v as f64 }),
                        4,
                    ),
                    crate::Literal::U32(v) => {
                        if negate {
                            return Err(Error::BadNumber(span));
                        }
                        (crate::ScalarValue::Uint(v as u64), 4)
                    }
                    crate::Literal::I32(v) => (
                        crate::ScalarValue::Sint(if negate { -(v as i64) } else { v as i64 }),
                        4,
                    ),
                    crate::Literal::Bool(v) => (crate::ScalarValue::Bool(v), 1),
                };
                Ok(self.register_scalar_constant(module, value, width))
            }
            Token::Word("true") => {
                let _ = lexer.next();
                Ok(self.register_scalar_constant(module, crate::ScalarValue::Bool(true), 1))
            }
            Token::Word("false") => {
                let _ = lexer.next();
                Ok(self.register_scalar_constant(module, crate::ScalarValue::Bool(false), 1))
            }
            Token::Word(word) => {
                if negate {
                    return Err(Error::Unexpected(lexer.next(), "a number to negate"));
                }
                if let Some(&handle) = self.lookup_constant.get(word) {
                    let _ = lexer.next();
                    return Ok(handle);
                }
                // a constructor of constants
                let ty = self.parse_type_decl(lexer, module)?;
                lexer.expect(Token::Paren('('))?;
                let mut components = Vec::new();
                while !lexer.skip(Token::Paren(')')) {
                    if !components.is_empty() {
                        lexer.expect(Token::Separator(','))?;
                    }
                    components.push(self.parse_const_expression(lexer, module)?);
                }
                Ok(module.constants.fetch_or_append(crate::Constant {
                    name: None,
                    ty,
                    inner: crate::ConstantInner::Composite { components },
                }))
            }
            _ => Err(Error::Unexpected(lexer.next(), "a constant expression")),
        }
    }

    /// A constant expression evaluated down to a `u32`, e.g. an array size.
    fn parse_const_u32<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        module: &mut crate::Module,
    ) -> Result<u32, Error<'a>> {
        match lexer.peek() {
            Token::Number(_) => lexer.next_uint_literal(),
            _ => {
                let (word, span) = lexer.next_ident_with_span()?;
                let &handle = self
                    .lookup_constant
                    .get(word)
                    .ok_or(Error::UnknownIdent(span.clone(), word))?;
                match module.constants[handle].inner {
                    crate::ConstantInner::Scalar {
                        value: crate::ScalarValue::Uint(v),
                        ..
                    } => Ok(v as u32),
                    crate::ConstantInner::Scalar {
                        value: crate::ScalarValue::Sint(v),
                        ..
                    } if v >= 0 => Ok(v as u32),
                    _ => Err(Error::BadU32(span)),
                }
            }
        }
    }

    fn parse_scalar_generic<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
    ) -> Result<(crate::ScalarKind, crate::Bytes), Error<'a>> {
        lexer.expect_generic_paren('<')?;
        let (word, span) = lexer.next_ident_with_span()?;
        let scalar = conv::get_scalar_type(word).ok_or(Error::UnknownType(span))?;
        lexer.expect_generic_paren('>')?;
        Ok(scalar)
    }

    fn parse_type_decl<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        module: &mut crate::Module,
    ) -> Result<Handle<crate::Type>, Error<'a>> {
        let (word, span) = lexer.next_ident_with_span()?;
        self.parse_type_decl_impl(lexer, module, word, span)
    }

    fn parse_type_decl_impl<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        module: &mut crate::Module,
        word: &'a str,
        span: Span,
    ) -> Result<Handle<crate::Type>, Error<'a>> {
        use crate::TypeInner as Ti;

        if let Some((kind, width)) = conv::get_scalar_type(word) {
            let inner = Ti::Scalar { kind, width };
            return Ok(self.registry.register(&mut module.types, None, inner));
        }
        if let Some(size) = vector_size_for(word) {
            let (kind, width) = self.parse_scalar_generic(lexer)?;
            let inner = Ti::Vector { size, kind, width };
            return Ok(self.registry.register(&mut module.types, None, inner));
        }
        if let Some((columns, rows)) = matrix_dimensions_for(word) {
            let (_, width) = self.parse_scalar_generic(lexer)?;
            let inner = Ti::Matrix {
                columns,
                rows,
                width,
            };
            return Ok(self.registry.register(&mut module.types, None, inner));
        }

        let inner = match word {
            "atomic" => {
                let (kind, width) = self.parse_scalar_generic(lexer)?;
                Ti::Atomic { kind, width }
            }
            "ptr" => {
                lexer.expect_generic_paren('<')?;
                let (space_word, space_span) = lexer.next_ident_with_span()?;
                let mut space = conv::map_address_space(space_word, space_span)?;
                lexer.expect(Token::Separator(','))?;
                let base = self.parse_type_decl(lexer, module)?;
                if let crate::AddressSpace::Storage { ref mut access } = space {
                    if lexer.skip(Token::Separator(',')) {
                        let (word, span) = lexer.next_ident_with_span()?;
                        *access = conv::map_storage_access(word, span)?;
                    }
                }
                lexer.expect_generic_paren('>')?;
                Ti::Pointer { base, space }
            }
            "array" => {
                lexer.expect_generic_paren('<')?;
                let base = self.parse_type_decl(lexer, module)?;
                let size = if lexer.skip(Token::Separator(',')) {
                    crate::ArraySize::Constant(self.parse_const_u32(lexer, module)?)
                } else {
                    crate::ArraySize::Dynamic
                };
                lexer.expect_generic_paren('>')?;
                self.layouter.update(&module.types);
                let stride = self.layouter[base].to_stride();
                Ti::Array { base, size, stride }
            }
            "sampler" => Ti::Sampler { comparison: false },
            "sampler_comparison" => Ti::Sampler { comparison: true },
            _ if word.starts_with("texture_") => {
                self.parse_texture_type(lexer, word, span)?
            }
            _ => {
                return self
                    .lookup_type
                    .get(word)
                    .cloned()
                    .ok_or(Error::UnknownType(span));
            }
        };
        Ok(self.registry.register(&mut module.types, None, inner))
    }

    fn parse_texture_type<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        word: &'a str,
        span: Span,
    ) -> Result<crate::TypeInner, Error<'a>> {
        use crate::ImageDimension as Dim;

        let (dim, arrayed, class_kind) = match word {
            "texture_1d" => (Dim::D1, false, TextureClass::Sampled { multi: false }),
            "texture_2d" => (Dim::D2, false, TextureClass::Sampled { multi: false }),
            "texture_2d_array" => (Dim::D2, true, TextureClass::Sampled { multi: false }),
            "texture_3d" => (Dim::D3, false, TextureClass::Sampled { multi: false }),
            "texture_cube" => (Dim::Cube, false, TextureClass::Sampled { multi: false }),
            "texture_cube_array" => (Dim::Cube, true, TextureClass::Sampled { multi: false }),
            "texture_multisampled_2d" => (Dim::D2, false, TextureClass::Sampled { multi: true }),
            "texture_depth_2d" => (Dim::D2, false, TextureClass::Depth { multi: false }),
            "texture_depth_2d_array" => (Dim::D2, true, TextureClass::Depth { multi: false }),
            "texture_depth_cube" => (Dim::Cube, false, TextureClass::Depth { multi: false }),
            "texture_depth_cube_array" => (Dim::Cube, true, TextureClass::Depth { multi: false }),
            "texture_depth_multisampled_2d" => {
                (Dim::D2, false, TextureClass::Depth { multi: true })
            }
            "texture_storage_1d" => (Dim::D1, false, TextureClass::Storage),
            "texture_storage_2d" => (Dim::D2, false, TextureClass::Storage),
            "texture_storage_2d_array" => (Dim::D2, true, TextureClass::Storage),
            "texture_storage_3d" => (Dim::D3, false, TextureClass::Storage),
            _ => return Err(Error::UnknownType(span)),
        };

        let class = match class_kind {
            TextureClass::Sampled { multi } => {
                lexer.expect_generic_paren('<')?;
                let (word, span) = lexer.next_ident_with_span()?;
                let (kind, _) = conv::get_scalar_type(word).ok_or(Error::UnknownType(span))?;
                lexer.expect_generic_paren('>')?;
                crate::ImageClass::Sampled { kind, multi }
            }
            TextureClass::Depth { multi } => crate::ImageClass::Depth { multi },
            TextureClass::Storage => {
                lexer.expect_generic_paren('<')?;
                let (word, span) = lexer.next_ident_with_span()?;
                let format = conv::map_storage_format(word, span)?;
                lexer.expect(Token::Separator(','))?;
                let (word, span) = lexer.next_ident_with_span()?;
                let access = conv::map_storage_access(word, span)?;
                lexer.expect_generic_paren('>')?;
                crate::ImageClass::Storage { format, access }
            }
        };

        Ok(crate::TypeInner::Image {
            dim,
            arrayed,
            class,
        })
    }
}

enum TextureClass {
    Sampled { multi: bool },
    Depth { multi: bool },
    Storage,
}

fn vector_size_for(word: &str) -> Option<crate::VectorSize> {
    match word {
        "vec2" => Some(crate::VectorSize::Bi),
        "vec3" => Some(crate::VectorSize::Tri),
        "vec4" => Some(crate::VectorSize::Quad),
        _ => None,
    }
}

fn matrix_dimensions_for(word: &str) -> Option<(crate::VectorSize, crate::VectorSize)> {
    let size = |c: u8| match c {
        b'2' => Some(crate::VectorSize::Bi),
        b'3' => Some(crate::VectorSize::Tri),
        b'4' => Some(crate::VectorSize::Quad),
        _ => None,
    };
    let bytes = word.as_bytes();
    if bytes.len() == 6 && word.starts_with("mat") && bytes[4] == b'x' {
        Some((size(bytes[3])?, size(bytes[5])?))
    } else {
        None
    }
}

impl Parser {
    fn parse_general_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<TypedExpression, Error<'a>> {
        self.parse_logical_or_expression(lexer, ctx)
    }

    /// Parses an expression and applies the load rule, yielding a value.
    fn parse_value_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<Handle<crate::Expression>, Error<'a>> {
        let expr = self.parse_general_expression(lexer, ctx)?;
        Ok(ctx.apply_load_rule(expr))
    }

    fn binary<'a>(
        &mut self,
        ctx: &mut ExpressionContext<'a, '_, '_>,
        op: crate::BinaryOperator,
        left: TypedExpression,
        right: TypedExpression,
    ) -> TypedExpression {
        let left = ctx.apply_load_rule(left);
        let right = ctx.apply_load_rule(right);
        TypedExpression::value(ctx.append(crate::Expression::Binary { op, left, right }))
    }

    fn parse_logical_or_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<TypedExpression, Error<'a>> {
        let mut accumulator = self.parse_logical_and_expression(lexer, ctx)?;
        while lexer.skip(Token::LogicalOperation('|')) {
            let right = self.parse_logical_and_expression(lexer, ctx)?;
            accumulator = self.binary(ctx, crate::BinaryOperator::LogicalOr, accumulator, right);
        }
        Ok(accumulator)
    }

    fn parse_logical_and_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<TypedExpression, Error<'a>> {
        let mut accumulator = self.parse_inclusive_or_expression(lexer, ctx)?;
        while lexer.skip(Token::LogicalOperation('&')) {
            let right = self.parse_inclusive_or_expression(lexer, ctx)?;
            accumulator = self.binary(ctx, crate::BinaryOperator::LogicalAnd, accumulator, right);
        }
        Ok(accumulator)
    }

    fn parse_inclusive_or_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<TypedExpression, Error<'a>> {
        let mut accumulator = self.parse_exclusive_or_expression(lexer, ctx)?;
        while lexer.skip(Token::Operation('|')) {
            let right = self.parse_exclusive_or_expression(lexer, ctx)?;
            accumulator = self.binary(ctx, crate::BinaryOperator::InclusiveOr, accumulator, right);
        }
        Ok(accumulator)
    }

    fn parse_exclusive_or_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<TypedExpression, Error<'a>> {
        let mut accumulator = self.parse_and_expression(lexer, ctx)?;
        while lexer.skip(Token::Operation('^')) {
            let right = self.parse_and_expression(lexer, ctx)?;
            accumulator = self.binary(ctx, crate::BinaryOperator::ExclusiveOr, accumulator, right);
        }
        Ok(accumulator)
    }

    fn parse_and_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<TypedExpression, Error<'a>> {
        let mut accumulator = self.parse_equality_expression(lexer, ctx)?;
        while lexer.skip(Token::Operation('&')) {
            let right = self.parse_equality_expression(lexer, ctx)?;
            accumulator = self.binary(ctx, crate::BinaryOperator::And, accumulator, right);
        }
        Ok(accumulator)
    }

    fn parse_equality_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<TypedExpression, Error<'a>> {
        let accumulator = self.parse_relational_expression(lexer, ctx)?;
        let op = match lexer.peek() {
            Token::LogicalOperation('=') => crate::BinaryOperator::Equal,
            Token::LogicalOperation('!') => crate::BinaryOperator::NotEqual,
            _ => return Ok(accumulator),
        };
        let _ = lexer.next();
        let right = self.parse_relational_expression(lexer, ctx)?;
        Ok(self.binary(ctx, op, accumulator, right))
    }

    fn parse_relational_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<TypedExpression, Error<'a>> {
        let accumulator = self.parse_shift_expression(lexer, ctx)?;
        let op = match lexer.peek() {
            Token::Paren('<') => crate::BinaryOperator::Less,
            Token::Paren('>') => crate::BinaryOperator::Greater,
            Token::LogicalOperation('<') => crate::BinaryOperator::LessEqual,
            Token::LogicalOperation('>') => crate::BinaryOperator::GreaterEqual,
            _ => return Ok(accumulator),
        };
        let _ = lexer.next();
        let right = self.parse_shift_expression(lexer, ctx)?;
        Ok(self.binary(ctx, op, accumulator, right))
    }

    fn parse_shift_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<TypedExpression, Error<'a>> {
        let accumulator = self.parse_additive_expression(lexer, ctx)?;
        let op = match lexer.peek() {
            Token::ShiftOperation('<') => crate::BinaryOperator::ShiftLeft,
            Token::ShiftOperation('>') => {
                // the direction of the shift depends on the signedness
                let handle = ctx.apply_load_rule(accumulator);
                let kind = ctx.resolve_type(handle)?.scalar_kind();
                let op = match kind {
                    Some(crate::ScalarKind::Sint) => crate::BinaryOperator::ShiftRightArithmetic,
                    _ => crate::BinaryOperator::ShiftRightLogical,
                };
                let _ = lexer.next();
                let right = self.parse_additive_expression(lexer, ctx)?;
                let right = ctx.apply_load_rule(right);
                return Ok(TypedExpression::value(ctx.append(
                    crate::Expression::Binary {
                        op,
                        left: handle,
                        right,
                    },
                )));
            }
            _ => return Ok(accumulator),
        };
        let _ = lexer.next();
        let right = self.parse_additive_expression(lexer, ctx)?;
        Ok(self.binary(ctx, op, accumulator, right))
    }

    fn parse_additive_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<TypedExpression, Error<'a>> {
        let mut accumulator = self.parse_multiplicative_expression(lexer, ctx)?;
        loop {
            let op = match lexer.peek() {
                Token::Operation('+') => crate::BinaryOperator::Add,
                Token::Operation('-') => crate::BinaryOperator::Subtract,
                _ => return Ok(accumulator),
            };
            let _ = lexer.next();
            let right = self.parse_multiplicative_expression(lexer, ctx)?;
            accumulator = self.binary(ctx, op, accumulator, right);
        }
    }

    fn parse_multiplicative_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<TypedExpression, Error<'a>> {
        let mut accumulator = self.parse_unary_expression(lexer, ctx)?;
        loop {
            let op = match lexer.peek() {
                Token::Operation('*') => crate::BinaryOperator::Multiply,
                Token::Operation('/') => crate::BinaryOperator::Divide,
                Token::Operation('%') => crate::BinaryOperator::Modulo,
                _ => return Ok(accumulator),
            };
            let _ = lexer.next();
            let right = self.parse_unary_expression(lexer, ctx)?;
            accumulator = self.binary(ctx, op, accumulator, right);
        }
    }

    fn parse_unary_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<TypedExpression, Error<'a>> {
        match lexer.peek() {
            Token::Operation('-') => {
                let _ = lexer.next();
                let inner = self.parse_unary_expression(lexer, ctx)?;
                let expr = ctx.apply_load_rule(inner);
                Ok(TypedExpression::value(ctx.append(
                    crate::Expression::Unary {
                        op: crate::UnaryOperator::Negate,
                        expr,
                    },
                )))
            }
            Token::Operation('!') | Token::Operation('~') => {
                let _ = lexer.next();
                let inner = self.parse_unary_expression(lexer, ctx)?;
                let expr = ctx.apply_load_rule(inner);
                Ok(TypedExpression::value(ctx.append(
                    crate::Expression::Unary {
                        op: crate::UnaryOperator::Not,
                        expr,
                    },
                )))
            }
            Token::Operation('&') => {
                // a reference is already a pointer; drop the reference-ness
                let _ = lexer.next();
                let inner = self.parse_unary_expression(lexer, ctx)?;
                Ok(TypedExpression {
                    handle: inner.handle,
                    is_reference: false,
                })
            }
            Token::Operation('*') => {
                let _ = lexer.next();
                let inner = self.parse_unary_expression(lexer, ctx)?;
                let handle = ctx.apply_load_rule(inner);
                Ok(TypedExpression {
                    handle,
                    is_reference: true,
                })
            }
            _ => {
                let primary = self.parse_primary_expression(lexer, ctx)?;
                self.parse_postfix(lexer, ctx, primary)
            }
        }
    }

    fn parse_primary_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<TypedExpression, Error<'a>> {
        match lexer.next() {
            (Token::Paren('('), _) => {
                let expr = self.parse_general_expression(lexer, ctx)?;
                lexer.expect(Token::Paren(')'))?;
                Ok(expr)
            }
            (Token::Number(word), span) => {
                let literal = conv::parse_literal(word, span)?;
                Ok(TypedExpression::value(
                    ctx.interrupt_emitter(crate::Expression::Literal(literal)),
                ))
            }
            (Token::Word("true"), _) => Ok(TypedExpression::value(ctx.interrupt_emitter(
                crate::Expression::Literal(crate::Literal::Bool(true)),
            ))),
            (Token::Word("false"), _) => Ok(TypedExpression::value(ctx.interrupt_emitter(
                crate::Expression::Literal(crate::Literal::Bool(false)),
            ))),
            (Token::Word(word), span) => self.parse_ident_expression(lexer, ctx, word, span),
            other => Err(Error::Unexpected(other, "an expression")),
        }
    }

    fn parse_ident_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
        word: &'a str,
        span: Span,
    ) -> Result<TypedExpression, Error<'a>> {
        if let Some(&expr) = ctx.lookup_ident.get(word) {
            return Ok(expr);
        }
        if let Some(&constant) = self.lookup_constant.get(word) {
            return Ok(TypedExpression::value(
                ctx.interrupt_emitter(crate::Expression::Constant(constant)),
            ));
        }
        if let Some(&var) = self.lookup_global_var.get(word) {
            let is_reference =
                ctx.module.global_variables[var].space != crate::AddressSpace::Handle;
            let handle = ctx.interrupt_emitter(crate::Expression::GlobalVariable(var));
            return Ok(TypedExpression {
                handle,
                is_reference,
            });
        }
        match self.parse_call_expression(lexer, ctx, word, span.clone())? {
            Some(expr) => Ok(expr),
            None => Err(Error::FunctionReturnsVoid(span)),
        }
    }

    fn parse_arguments<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<Vec<Handle<crate::Expression>>, Error<'a>> {
        lexer.expect(Token::Paren('('))?;
        let mut arguments = Vec::new();
        while !lexer.skip(Token::Paren(')')) {
            if !arguments.is_empty() {
                lexer.expect(Token::Separator(','))?;
            }
            let argument = self.parse_value_expression(lexer, ctx)?;
            arguments.push(argument);
        }
        Ok(arguments)
    }

    /// Parses `&expr` as a pointer argument of a built-in, e.g. for atomics.
    fn parse_pointer_argument<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
    ) -> Result<Handle<crate::Expression>, Error<'a>> {
        let expr = self.parse_unary_expression(lexer, ctx)?;
        Ok(expr.handle)
    }

    /// The scalar type wrapped by the atomic a pointer refers to.
    fn atomic_pointer_type<'a>(
        &mut self,
        ctx: &mut ExpressionContext<'a, '_, '_>,
        pointer: Handle<crate::Expression>,
        span: Span,
    ) -> Result<Handle<crate::Type>, Error<'a>> {
        match ctx.resolve_pointee(pointer)? {
            crate::TypeInner::Atomic { kind, width } => Ok(self.registry.register(
                &mut ctx.module.types,
                None,
                crate::TypeInner::Scalar { kind, width },
            )),
            _ => Err(Error::InvalidAtomicPointer(span)),
        }
    }

    /// Lowers a built-in or user function call, or a type constructor.
    /// Returns `None` when the called function has no result.
    fn parse_call_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
        word: &'a str,
        span: Span,
    ) -> Result<Option<TypedExpression>, Error<'a>> {
        // math functions
        if let Some(fun) = conv::map_math_function(word) {
            let arguments = self.parse_arguments(lexer, ctx)?;
            let mut iter = arguments.into_iter();
            let arg = iter.next().ok_or(Error::WrongArgumentCount(span))?;
            let expr = crate::Expression::Math {
                fun,
                arg,
                arg1: iter.next(),
                arg2: iter.next(),
                arg3: iter.next(),
            };
            return Ok(Some(TypedExpression::value(ctx.append(expr))));
        }
        // relational functions
        if let Some(fun) = conv::map_relational_function(word) {
            let arguments = self.parse_arguments(lexer, ctx)?;
            let argument = *arguments.first().ok_or(Error::WrongArgumentCount(span))?;
            let expr = crate::Expression::Relational { fun, argument };
            return Ok(Some(TypedExpression::value(ctx.append(expr))));
        }
        // derivatives
        if let Some((axis, ctrl)) = conv::map_derivative(word) {
            let arguments = self.parse_arguments(lexer, ctx)?;
            let expr = *arguments.first().ok_or(Error::WrongArgumentCount(span))?;
            return Ok(Some(TypedExpression::value(ctx.append(
                crate::Expression::Derivative { axis, ctrl, expr },
            ))));
        }

        match word {
            "select" => {
                lexer.expect(Token::Paren('('))?;
                let reject = self.parse_value_expression(lexer, ctx)?;
                lexer.expect(Token::Separator(','))?;
                let accept = self.parse_value_expression(lexer, ctx)?;
                lexer.expect(Token::Separator(','))?;
                let condition = self.parse_value_expression(lexer, ctx)?;
                lexer.expect(Token::Paren(')'))?;
                Ok(Some(TypedExpression::value(ctx.append(
                    crate::Expression::Select {
                        condition,
                        accept,
                        reject,
                    },
                ))))
            }
            "arrayLength" => {
                lexer.expect(Token::Paren('('))?;
                let pointer = self.parse_pointer_argument(lexer, ctx)?;
                lexer.expect(Token::Paren(')'))?;
                Ok(Some(TypedExpression::value(
                    ctx.append(crate::Expression::ArrayLength(pointer)),
                )))
            }
            "bitcast" => {
                lexer.expect_generic_paren('<')?;
                let (to_word, to_span) = lexer.next_ident_with_span()?;
                let kind = match conv::get_scalar_type(to_word) {
                    Some((kind, _)) => kind,
                    None => match vector_size_for(to_word) {
                        Some(_) => {
                            let (kind, _) = self.parse_scalar_generic(lexer)?;
                            kind
                        }
                        None => return Err(Error::UnknownType(to_span)),
                    },
                };
                lexer.expect_generic_paren('>')?;
                lexer.expect(Token::Paren('('))?;
                let expr = self.parse_value_expression(lexer, ctx)?;
                lexer.expect(Token::Paren(')'))?;
                Ok(Some(TypedExpression::value(ctx.append(
                    crate::Expression::As {
                        expr,
                        kind,
                        convert: None,
                    },
                ))))
            }
            "atomicLoad" => {
                lexer.expect(Token::Paren('('))?;
                let pointer = self.parse_pointer_argument(lexer, ctx)?;
                lexer.expect(Token::Paren(')'))?;
                Ok(Some(TypedExpression::value(
                    ctx.append(crate::Expression::Load { pointer }),
                )))
            }
            "atomicCompareExchangeWeak" => {
                lexer.expect(Token::Paren('('))?;
                let pointer = self.parse_pointer_argument(lexer, ctx)?;
                lexer.expect(Token::Separator(','))?;
                let compare = self.parse_value_expression(lexer, ctx)?;
                lexer.expect(Token::Separator(','))?;
                let value = self.parse_value_expression(lexer, ctx)?;
                lexer.expect(Token::Paren(')'))?;
                let ty = self.atomic_pointer_type(ctx, pointer, span)?;
                Ok(Some(self.emit_atomic_statement(
                    ctx,
                    pointer,
                    crate::AtomicFunction::Exchange {
                        compare: Some(compare),
                    },
                    value,
                    ty,
                    true,
                )))
            }
            _ if conv::map_atomic_function(word).is_some() => {
                let fun = conv::map_atomic_function(word).unwrap();
                lexer.expect(Token::Paren('('))?;
                let pointer = self.parse_pointer_argument(lexer, ctx)?;
                lexer.expect(Token::Separator(','))?;
                let value = self.parse_value_expression(lexer, ctx)?;
                lexer.expect(Token::Paren(')'))?;
                let ty = self.atomic_pointer_type(ctx, pointer, span)?;
                Ok(Some(self.emit_atomic_statement(ctx, pointer, fun, value, ty, false)))
            }
            _ if word.starts_with("texture") => {
                self.parse_texture_call(lexer, ctx, word, span).map(Some)
            }
            _ => {
                if let Some(&function) = self.lookup_function.get(word) {
                    let arguments = self.parse_arguments(lexer, ctx)?;
                    // the call is a statement; its result is a separate
                    // expression that only the statement may populate
                    if let Some(statement) = ctx.emitter.finish(&ctx.function.expressions) {
                        ctx.block.push(statement);
                    }
                    let result = if ctx.module.functions[function].result.is_some() {
                        Some(
                            ctx.function
                                .expressions
                                .append(crate::Expression::CallResult(function)),
                        )
                    } else {
                        None
                    };
                    ctx.emitter.start(&ctx.function.expressions);
                    ctx.block.push(crate::Statement::Call {
                        function,
                        arguments,
                        result,
                    });
                    return Ok(result.map(TypedExpression::value));
                }
                // a type constructor
                self.parse_construction_expression(lexer, ctx, word, span)
                    .map(Some)
            }
        }
    }

    /// Closes the emit range, appends the atomic result expression and the
    /// atomic statement, and reopens the range.
    fn emit_atomic_statement<'a>(
        &mut self,
        ctx: &mut ExpressionContext<'a, '_, '_>,
        pointer: Handle<crate::Expression>,
        fun: crate::AtomicFunction,
        value: Handle<crate::Expression>,
        ty: Handle<crate::Type>,
        comparison: bool,
    ) -> TypedExpression {
        if let Some(statement) = ctx.emitter.finish(&ctx.function.expressions) {
            ctx.block.push(statement);
        }
        let result = ctx
            .function
            .expressions
            .append(crate::Expression::AtomicResult { ty, comparison });
        ctx.emitter.start(&ctx.function.expressions);
        ctx.block.push(crate::Statement::Atomic {
            pointer,
            fun,
            value,
            result: Some(result),
        });
        TypedExpression::value(result)
    }

    fn parse_texture_call<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
        word: &'a str,
        span: Span,
    ) -> Result<TypedExpression, Error<'a>> {
        lexer.expect(Token::Paren('('))?;
        let image = self.parse_value_expression(lexer, ctx)?;
        let image_inner = ctx.resolve_type(image)?;
        let (arrayed, class) = match image_inner {
            crate::TypeInner::Image { arrayed, class, .. } => (arrayed, class),
            _ => return Err(Error::Unexpected((Token::Word(word), span), "an image")),
        };

        let expr = match word {
            "textureDimensions" => {
                let level = if lexer.skip(Token::Separator(',')) {
                    Some(self.parse_value_expression(lexer, ctx)?)
                } else {
                    None
                };
                crate::Expression::ImageQuery {
                    image,
                    query: crate::ImageQuery::Size { level },
                }
            }
            "textureNumLevels" => crate::Expression::ImageQuery {
                image,
                query: crate::ImageQuery::NumLevels,
            },
            "textureNumLayers" => crate::Expression::ImageQuery {
                image,
                query: crate::ImageQuery::NumLayers,
            },
            "textureNumSamples" => crate::Expression::ImageQuery {
                image,
                query: crate::ImageQuery::NumSamples,
            },
            "textureLoad" => {
                lexer.expect(Token::Separator(','))?;
                let coordinate = self.parse_value_expression(lexer, ctx)?;
                let array_index = if arrayed {
                    lexer.expect(Token::Separator(','))?;
                    Some(self.parse_value_expression(lexer, ctx)?)
                } else {
                    None
                };
                let needs_index = match class {
                    crate::ImageClass::Storage { .. } => false,
                    crate::ImageClass::Sampled { .. } | crate::ImageClass::Depth { .. } => true,
                };
                let index = if needs_index && lexer.skip(Token::Separator(',')) {
                    Some(self.parse_value_expression(lexer, ctx)?)
                } else {
                    None
                };
                crate::Expression::ImageLoad {
                    image,
                    coordinate,
                    array_index,
                    index,
                }
            }
            _ => {
                // all the sampling flavors
                lexer.expect(Token::Separator(','))?;
                let sampler = self.parse_value_expression(lexer, ctx)?;
                lexer.expect(Token::Separator(','))?;
                let coordinate = self.parse_value_expression(lexer, ctx)?;
                let array_index = if arrayed {
                    lexer.expect(Token::Separator(','))?;
                    Some(self.parse_value_expression(lexer, ctx)?)
                } else {
                    None
                };
                let (level, depth_ref) = match word {
                    "textureSample" => (crate::SampleLevel::Auto, None),
                    "textureSampleLevel" => {
                        lexer.expect(Token::Separator(','))?;
                        let level = self.parse_value_expression(lexer, ctx)?;
                        (crate::SampleLevel::Exact(level), None)
                    }
                    "textureSampleBias" => {
                        lexer.expect(Token::Separator(','))?;
                        let bias = self.parse_value_expression(lexer, ctx)?;
                        (crate::SampleLevel::Bias(bias), None)
                    }
                    "textureSampleGrad" => {
                        lexer.expect(Token::Separator(','))?;
                        let x = self.parse_value_expression(lexer, ctx)?;
                        lexer.expect(Token::Separator(','))?;
                        let y = self.parse_value_expression(lexer, ctx)?;
                        (crate::SampleLevel::Gradient { x, y }, None)
                    }
                    "textureSampleCompare" => {
                        lexer.expect(Token::Separator(','))?;
                        let reference = self.parse_value_expression(lexer, ctx)?;
                        (crate::SampleLevel::Auto, Some(reference))
                    }
                    "textureSampleCompareLevel" => {
                        lexer.expect(Token::Separator(','))?;
                        let reference = self.parse_value_expression(lexer, ctx)?;
                        (crate::SampleLevel::Zero, Some(reference))
                    }
                    _ => return Err(Error::UnknownIdent(span, word)),
                };
                crate::Expression::ImageSample {
                    image,
                    sampler,
                    coordinate,
                    array_index,
                    level,
                    depth_ref,
                }
            }
        };
        lexer.expect(Token::Paren(')'))?;
        Ok(TypedExpression::value(ctx.append(expr)))
    }

    /// Lowers `T(...)` construction: splats, conversions, compositions and
    /// zero values.
    fn parse_construction_expression<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
        word: &'a str,
        span: Span,
    ) -> Result<TypedExpression, Error<'a>> {
        use crate::TypeInner as Ti;

        // scalar conversion, e.g. `f32(x)`
        if let Some((kind, width)) = conv::get_scalar_type(word) {
            let arguments = self.parse_arguments(lexer, ctx)?;
            return match arguments.len() {
                0 => {
                    let ty = self.registry.register(
                        &mut ctx.module.types,
                        None,
                        Ti::Scalar { kind, width },
                    );
                    Ok(TypedExpression::value(
                        ctx.interrupt_emitter(crate::Expression::ZeroValue(ty)),
                    ))
                }
                1 => Ok(TypedExpression::value(ctx.append(crate::Expression::As {
                    expr: arguments[0],
                    kind,
                    convert: Some(width),
                }))),
                _ => Err(Error::WrongArgumentCount(span)),
            };
        }

        if let Some(size) = vector_size_for(word) {
            let template = if lexer.peek_generic() {
                Some(self.parse_scalar_generic(lexer)?)
            } else {
                None
            };
            let arguments = self.parse_arguments(lexer, ctx)?;
            return self.construct_vector(ctx, span, size, template, arguments);
        }

        if let Some((columns, rows)) = matrix_dimensions_for(word) {
            let (_, width) = self.parse_scalar_generic(lexer)?;
            let ty = self.registry.register(
                &mut ctx.module.types,
                None,
                Ti::Matrix {
                    columns,
                    rows,
                    width,
                },
            );
            let components = self.parse_arguments(lexer, ctx)?;
            return Ok(if components.is_empty() {
                TypedExpression::value(ctx.interrupt_emitter(crate::Expression::ZeroValue(ty)))
            } else {
                TypedExpression::value(ctx.append(crate::Expression::Compose { ty, components }))
            });
        }

        if word == "array" {
            lexer.expect_generic_paren('<')?;
            let base = self.parse_type_decl(lexer, ctx.module)?;
            let size = if lexer.skip(Token::Separator(',')) {
                Some(self.parse_const_u32(lexer, ctx.module)?)
            } else {
                None
            };
            lexer.expect_generic_paren('>')?;
            let components = self.parse_arguments(lexer, ctx)?;
            self.layouter.update(&ctx.module.types);
            let stride = self.layouter[base].to_stride();
            let ty = self.registry.register(
                &mut ctx.module.types,
                None,
                Ti::Array {
                    base,
                    size: crate::ArraySize::Constant(
                        size.unwrap_or(components.len() as u32),
                    ),
                    stride,
                },
            );
            return Ok(if components.is_empty() {
                TypedExpression::value(ctx.interrupt_emitter(crate::Expression::ZeroValue(ty)))
            } else {
                TypedExpression::value(ctx.append(crate::Expression::Compose { ty, components }))
            });
        }

        if let Some(&ty) = self.lookup_type.get(word) {
            let components = self.parse_arguments(lexer, ctx)?;
            return Ok(if components.is_empty() {
                TypedExpression::value(ctx.interrupt_emitter(crate::Expression::ZeroValue(ty)))
            } else {
                TypedExpression::value(ctx.append(crate::Expression::Compose { ty, components }))
            });
        }

        Err(Error::UnknownIdent(span, word))
    }

    fn construct_vector<'a>(
        &mut self,
        ctx: &mut ExpressionContext<'a, '_, '_>,
        span: Span,
        size: crate::VectorSize,
        template: Option<(crate::ScalarKind, crate::Bytes)>,
        arguments: Vec<Handle<crate::Expression>>,
    ) -> Result<TypedExpression, Error<'a>> {
        use crate::TypeInner as Ti;

        let (kind, width) = match template {
            Some(scalar) => scalar,
            None => {
                // infer the scalar from the first argument
                let first = *arguments.first().ok_or(Error::WrongArgumentCount(span.clone()))?;
                match ctx.resolve_type(first)?.scalar_kind() {
                    Some(kind) => (kind, if kind == crate::ScalarKind::Bool { 1 } else { 4 }),
                    None => return Err(Error::WrongArgumentCount(span.clone())),
                }
            }
        };
        let ty = self.registry.register(
            &mut ctx.module.types,
            None,
            Ti::Vector { size, kind, width },
        );

        match arguments.len() {
            0 => Ok(TypedExpression::value(
                ctx.interrupt_emitter(crate::Expression::ZeroValue(ty)),
            )),
            1 => {
                let argument = arguments[0];
                match ctx.resolve_type(argument)? {
                    Ti::Scalar { .. } => Ok(TypedExpression::value(ctx.append(
                        crate::Expression::Splat {
                            size,
                            value: argument,
                        },
                    ))),
                    Ti::Vector {
                        kind: arg_kind,
                        width: arg_width,
                        ..
                    } => {
                        if arg_kind == kind && arg_width == width {
                            Ok(TypedExpression::value(argument))
                        } else {
                            Ok(TypedExpression::value(ctx.append(crate::Expression::As {
                                expr: argument,
                                kind,
                                convert: Some(width),
                            })))
                        }
                    }
                    _ => Err(Error::WrongArgumentCount(span)),
                }
            }
            _ => Ok(TypedExpression::value(ctx.append(
                crate::Expression::Compose {
                    ty,
                    components: arguments,
                },
            ))),
        }
    }

    fn parse_postfix<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut ExpressionContext<'a, '_, '_>,
        mut expr: TypedExpression,
    ) -> Result<TypedExpression, Error<'a>> {
        loop {
            match lexer.peek() {
                Token::Separator('.') => {
                    let _ = lexer.next();
                    let (name, name_span) = lexer.next_ident_with_span()?;
                    let base_inner = if expr.is_reference {
                        ctx.resolve_pointee(expr.handle)?
                    } else {
                        ctx.resolve_type(expr.handle)?
                    };
                    match base_inner {
                        crate::TypeInner::Struct { ref members, .. } => {
                            let index = members
                                .iter()
                                .position(|member| member.name.as_deref() == Some(name))
                                .ok_or(Error::BadAccessor(name_span))?
                                as u32;
                            expr = TypedExpression {
                                handle: ctx.append(crate::Expression::AccessIndex {
                                    base: expr.handle,
                                    index,
                                }),
                                is_reference: expr.is_reference,
                            };
                        }
                        crate::TypeInner::Vector { .. } => {
                            expr = self.parse_swizzle(ctx, expr, name, name_span)?;
                        }
                        _ => return Err(Error::BadAccessor(name_span)),
                    }
                }
                Token::Paren('[') => {
                    let _ = lexer.next();
                    let index = self.parse_value_expression(lexer, ctx)?;
                    lexer.expect(Token::Paren(']'))?;
                    expr = TypedExpression {
                        handle: ctx.append(crate::Expression::Access {
                            base: expr.handle,
                            index,
                        }),
                        is_reference: expr.is_reference,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_swizzle<'a>(
        &mut self,
        ctx: &mut ExpressionContext<'a, '_, '_>,
        base: TypedExpression,
        name: &'a str,
        name_span: Span,
    ) -> Result<TypedExpression, Error<'a>> {
        let component_for = |c: char| match c {
            'x' | 'r' => Some(crate::SwizzleComponent::X),
            'y' | 'g' => Some(crate::SwizzleComponent::Y),
            'z' | 'b' => Some(crate::SwizzleComponent::Z),
            'w' | 'a' => Some(crate::SwizzleComponent::W),
            _ => None,
        };
        if name.len() == 1 {
            let component = component_for(name.chars().next().unwrap())
                .ok_or(Error::BadAccessor(name_span))?;
            return Ok(TypedExpression {
                handle: ctx.append(crate::Expression::AccessIndex {
                    base: base.handle,
                    index: component as u32,
                }),
                is_reference: base.is_reference,
            });
        }
        let size = match name.len() {
            2 => crate::VectorSize::Bi,
            3 => crate::VectorSize::Tri,
            4 => crate::VectorSize::Quad,
            _ => return Err(Error::BadAccessor(name_span)),
        };
        let mut pattern = [crate::SwizzleComponent::X; 4];
        for (index, c) in name.chars().enumerate() {
            pattern[index] = component_for(c).ok_or(Error::BadAccessor(name_span.clone()))?;
        }
        let vector = ctx.apply_load_rule(base);
        Ok(TypedExpression::value(ctx.append(
            crate::Expression::Swizzle {
                size,
                vector,
                pattern,
            },
        )))
    }
}

impl Parser {
    fn parse_block<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut StatementContext<'a, '_, '_>,
    ) -> Result<crate::Block, Error<'a>> {
        lexer.expect(Token::Paren('{'))?;
        let mut block = Vec::new();
        // identifiers declared inside don't leak out
        let mut scoped_idents = ctx.lookup_ident.clone();
        let mut inner_ctx = StatementContext {
            lookup_ident: &mut scoped_idents,
            typifier: &mut *ctx.typifier,
            module: &mut *ctx.module,
            function: &mut *ctx.function,
        };
        while !lexer.skip(Token::Paren('}')) {
            self.parse_statement(lexer, &mut inner_ctx, &mut block)?;
        }
        Ok(block)
    }

    fn ensure_type_exists<'a>(
        &mut self,
        ctx: &mut ExpressionContext<'a, '_, '_>,
        value: Handle<crate::Expression>,
    ) -> Result<Handle<crate::Type>, Error<'a>> {
        let _ = ctx.resolve_type(value)?;
        match *ctx.typifier.get_resolution(value) {
            crate::proc::TypeResolution::Handle(ty) => Ok(ty),
            crate::proc::TypeResolution::Value(ref inner) => {
                Ok(self
                    .registry
                    .register(&mut ctx.module.types, None, inner.clone()))
            }
        }
    }

    fn parse_statement<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut StatementContext<'a, '_, '_>,
        block: &mut crate::Block,
    ) -> Result<(), Error<'a>> {
        match lexer.peek() {
            Token::Paren('{') => {
                let inner = self.parse_block(lexer, ctx)?;
                block.push(crate::Statement::Block(inner));
                Ok(())
            }
            Token::Separator(';') => {
                let _ = lexer.next();
                Ok(())
            }
            Token::Word(word) => match word {
                "let" | "const" => {
                    let _ = lexer.next();
                    self.parse_let_statement(lexer, ctx, block)
                }
                "var" => {
                    let _ = lexer.next();
                    self.parse_var_statement(lexer, ctx, block)
                }
                "return" => {
                    let _ = lexer.next();
                    let mut emitter = Emitter::default();
                    emitter.start(&ctx.function.expressions);
                    let value = if lexer.peek() == Token::Separator(';') {
                        None
                    } else {
                        let mut ectx = ctx.as_expression(&mut emitter, block);
                        Some(self.parse_value_expression(lexer, &mut ectx)?)
                    };
                    lexer.expect(Token::Separator(';'))?;
                    if let Some(statement) = emitter.finish(&ctx.function.expressions) {
                        block.push(statement);
                    }
                    block.push(crate::Statement::Return { value });
                    Ok(())
                }
                "if" => {
                    let _ = lexer.next();
                    self.parse_if(lexer, ctx, block)
                }
                "loop" => {
                    let _ = lexer.next();
                    let statement = self.parse_loop(lexer, ctx)?;
                    block.push(statement);
                    Ok(())
                }
                "while" => {
                    let _ = lexer.next();
                    let mut body = Vec::new();
                    let mut emitter = Emitter::default();
                    emitter.start(&ctx.function.expressions);
                    let condition = {
                        let mut ectx = ctx.as_expression(&mut emitter, &mut body);
                        self.parse_value_expression(lexer, &mut ectx)?
                    };
                    if let Some(statement) = emitter.finish(&ctx.function.expressions) {
                        body.push(statement);
                    }
                    body.push(crate::Statement::If {
                        condition,
                        accept: Vec::new(),
                        reject: vec![crate::Statement::Break],
                    });
                    let rest = self.parse_block(lexer, ctx)?;
                    body.extend(rest);
                    block.push(crate::Statement::Loop {
                        body,
                        continuing: Vec::new(),
                        break_if: None,
                    });
                    Ok(())
                }
                "for" => {
                    let _ = lexer.next();
                    self.parse_for(lexer, ctx, block)
                }
                "switch" => {
                    let _ = lexer.next();
                    self.parse_switch(lexer, ctx, block)
                }
                "break" => {
                    let _ = lexer.next();
                    lexer.expect(Token::Separator(';'))?;
                    block.push(crate::Statement::Break);
                    Ok(())
                }
                "continue" => {
                    let _ = lexer.next();
                    lexer.expect(Token::Separator(';'))?;
                    block.push(crate::Statement::Continue);
                    Ok(())
                }
                "discard" => {
                    let _ = lexer.next();
                    lexer.expect(Token::Separator(';'))?;
                    block.push(crate::Statement::Kill);
                    Ok(())
                }
                "workgroupBarrier" => {
                    let _ = lexer.next();
                    lexer.expect(Token::Paren('('))?;
                    lexer.expect(Token::Paren(')'))?;
                    lexer.expect(Token::Separator(';'))?;
                    block.push(crate::Statement::Barrier(crate::Barrier::WORK_GROUP));
                    Ok(())
                }
                "storageBarrier" => {
                    let _ = lexer.next();
                    lexer.expect(Token::Paren('('))?;
                    lexer.expect(Token::Paren(')'))?;
                    lexer.expect(Token::Separator(';'))?;
                    block.push(crate::Statement::Barrier(crate::Barrier::STORAGE));
                    Ok(())
                }
                "textureBarrier" => {
                    let _ = lexer.next();
                    lexer.expect(Token::Paren('('))?;
                    lexer.expect(Token::Paren(')'))?;
                    lexer.expect(Token::Separator(';'))?;
                    block.push(crate::Statement::Barrier(crate::Barrier::TEXTURE));
                    Ok(())
                }
                "textureStore" => {
                    let _ = lexer.next();
                    self.parse_image_store(lexer, ctx, block)
                }
                "atomicStore" => {
                    let _ = lexer.next();
                    let mut emitter = Emitter::default();
                    emitter.start(&ctx.function.expressions);
                    let (pointer, value) = {
                        let mut ectx = ctx.as_expression(&mut emitter, block);
                        lexer.expect(Token::Paren('('))?;
                        let pointer = self.parse_pointer_argument(lexer, &mut ectx)?;
                        lexer.expect(Token::Separator(','))?;
                        let value = self.parse_value_expression(lexer, &mut ectx)?;
                        lexer.expect(Token::Paren(')'))?;
                        (pointer, value)
                    };
                    lexer.expect(Token::Separator(';'))?;
                    if let Some(statement) = emitter.finish(&ctx.function.expressions) {
                        block.push(statement);
                    }
                    block.push(crate::Statement::Store { pointer, value });
                    Ok(())
                }
                "_" => {
                    let _ = lexer.next();
                    lexer.expect(Token::Operation('='))?;
                    let mut emitter = Emitter::default();
                    emitter.start(&ctx.function.expressions);
                    {
                        let mut ectx = ctx.as_expression(&mut emitter, block);
                        let _ = self.parse_value_expression(lexer, &mut ectx)?;
                    }
                    lexer.expect(Token::Separator(';'))?;
                    if let Some(statement) = emitter.finish(&ctx.function.expressions) {
                        block.push(statement);
                    }
                    Ok(())
                }
                _ => {
                    // a call statement, or an assignment
                    let mut cloned = lexer.clone();
                    let _ = cloned.next();
                    let is_known_call =
                        cloned.peek() == Token::Paren('(') && self.lookup_function.contains_key(word);
                    if is_known_call {
                        let (_, span) = lexer.next_ident_with_span()?;
                        let mut emitter = Emitter::default();
                        emitter.start(&ctx.function.expressions);
                        {
                            let mut ectx = ctx.as_expression(&mut emitter, block);
                            let _ = self.parse_call_expression(lexer, &mut ectx, word, span)?;
                        }
                        lexer.expect(Token::Separator(';'))?;
                        if let Some(statement) = emitter.finish(&ctx.function.expressions) {
                            block.push(statement);
                        }
                        Ok(())
                    } else {
                        self.parse_assignment_statement(lexer, ctx, block, true)
                    }
                }
            },
            _ => Err(Error::Unexpected(lexer.next(), "a statement")),
        }
    }

    fn parse_let_statement<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut StatementContext<'a, '_, '_>,
        block: &mut crate::Block,
    ) -> Result<(), Error<'a>> {
        let name = lexer.next_ident()?;
        if lexer.skip(Token::Separator(':')) {
            let _ = self.parse_type_decl(lexer, ctx.module)?;
        }
        lexer.expect(Token::Operation('='))?;
        let mut emitter = Emitter::default();
        emitter.start(&ctx.function.expressions);
        let value = {
            let mut ectx = ctx.as_expression(&mut emitter, block);
            self.parse_value_expression(lexer, &mut ectx)?
        };
        lexer.expect(Token::Separator(';'))?;
        if let Some(statement) = emitter.finish(&ctx.function.expressions) {
            block.push(statement);
        }
        ctx.lookup_ident.insert(name, TypedExpression::value(value));
        Ok(())
    }

    fn parse_var_statement<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut StatementContext<'a, '_, '_>,
        block: &mut crate::Block,
    ) -> Result<(), Error<'a>> {
        let (name, name_span) = lexer.next_ident_with_span()?;
        let explicit_ty = if lexer.skip(Token::Separator(':')) {
            Some(self.parse_type_decl(lexer, ctx.module)?)
        } else {
            None
        };

        let mut emitter = Emitter::default();
        emitter.start(&ctx.function.expressions);
        let init_value = if lexer.skip(Token::Operation('=')) {
            let mut ectx = ctx.as_expression(&mut emitter, block);
            Some(self.parse_value_expression(lexer, &mut ectx)?)
        } else {
            None
        };
        lexer.expect(Token::Separator(';'))?;

        let ty = match explicit_ty {
            Some(ty) => ty,
            None => {
                let value = init_value.ok_or(Error::Unexpected(
                    (Token::Separator(';'), name_span),
                    "a type or an initializer",
                ))?;
                let mut ectx = ctx.as_expression(&mut emitter, block);
                self.ensure_type_exists(&mut ectx, value)?
            }
        };

        let var_handle = ctx.function.local_variables.append(crate::LocalVariable {
            name: Some(name.to_string()),
            ty,
            init: None,
        });

        match init_value {
            Some(value) => {
                // Initializers that wait for a call or atomic result keep
                // their evaluation at the producing statement, which is this
                // declaration point. Everything else becomes a plain store
                // here, so that a declaration inside a loop re-initializes
                // on every iteration.
                if contains_result(&ctx.function.expressions, value) {
                    ctx.function.local_variables.get_mut(var_handle).init = Some(value);
                    if let Some(statement) = emitter.finish(&ctx.function.expressions) {
                        block.push(statement);
                    }
                } else {
                    if let Some(statement) = emitter.finish(&ctx.function.expressions) {
                        block.push(statement);
                    }
                    let pointer = ctx
                        .function
                        .expressions
                        .append(crate::Expression::LocalVariable(var_handle));
                    block.push(crate::Statement::Store { pointer, value });
                    ctx.lookup_ident.insert(
                        name,
                        TypedExpression {
                            handle: pointer,
                            is_reference: true,
                        },
                    );
                    return Ok(());
                }
            }
            None => {
                if let Some(statement) = emitter.finish(&ctx.function.expressions) {
                    block.push(statement);
                }
            }
        }

        let pointer = ctx
            .function
            .expressions
            .append(crate::Expression::LocalVariable(var_handle));
        ctx.lookup_ident.insert(
            name,
            TypedExpression {
                handle: pointer,
                is_reference: true,
            },
        );
        Ok(())
    }

    fn parse_if<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut StatementContext<'a, '_, '_>,
        block: &mut crate::Block,
    ) -> Result<(), Error<'a>> {
        let mut emitter = Emitter::default();
        emitter.start(&ctx.function.expressions);
        let condition = {
            let mut ectx = ctx.as_expression(&mut emitter, block);
            self.parse_value_expression(lexer, &mut ectx)?
        };
        if let Some(statement) = emitter.finish(&ctx.function.expressions) {
            block.push(statement);
        }
        let accept = self.parse_block(lexer, ctx)?;
        let mut reject = Vec::new();
        if lexer.skip(Token::Word("else")) {
            if lexer.peek() == Token::Word("if") {
                let _ = lexer.next();
                self.parse_if(lexer, ctx, &mut reject)?;
            } else {
                reject = self.parse_block(lexer, ctx)?;
            }
        }
        block.push(crate::Statement::If {
            condition,
            accept,
            reject,
        });
        Ok(())
    }

    fn parse_loop<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut StatementContext<'a, '_, '_>,
    ) -> Result<crate::Statement, Error<'a>> {
        lexer.expect(Token::Paren('{'))?;
        let mut body = Vec::new();
        let mut continuing = Vec::new();
        let mut break_if = None;

        let mut scoped_idents = ctx.lookup_ident.clone();
        let mut inner_ctx = StatementContext {
            lookup_ident: &mut scoped_idents,
            typifier: &mut *ctx.typifier,
            module: &mut *ctx.module,
            function: &mut *ctx.function,
        };

        loop {
            if lexer.skip(Token::Word("continuing")) {
                lexer.expect(Token::Paren('{'))?;
                loop {
                    if lexer.skip(Token::Paren('}')) {
                        break;
                    }
                    if lexer.peek() == Token::Word("break") {
                        let mut cloned = lexer.clone();
                        let _ = cloned.next();
                        if cloned.peek() == Token::Word("if") {
                            let _ = lexer.next();
                            let _ = lexer.next();
                            let mut emitter = Emitter::default();
                            emitter.start(&inner_ctx.function.expressions);
                            let condition = {
                                let mut ectx =
                                    inner_ctx.as_expression(&mut emitter, &mut continuing);
                                self.parse_value_expression(lexer, &mut ectx)?
                            };
                            lexer.expect(Token::Separator(';'))?;
                            if let Some(statement) =
                                emitter.finish(&inner_ctx.function.expressions)
                            {
                                continuing.push(statement);
                            }
                            break_if = Some(condition);
                            continue;
                        }
                    }
                    self.parse_statement(lexer, &mut inner_ctx, &mut continuing)?;
                }
                lexer.expect(Token::Paren('}'))?;
                break;
            }
            if lexer.skip(Token::Paren('}')) {
                break;
            }
            self.parse_statement(lexer, &mut inner_ctx, &mut body)?;
        }

        Ok(crate::Statement::Loop {
            body,
            continuing,
            break_if,
        })
    }

    fn parse_for<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut StatementContext<'a, '_, '_>,
        block: &mut crate::Block,
    ) -> Result<(), Error<'a>> {
        lexer.expect(Token::Paren('('))?;
        let mut outer = Vec::new();

        let mut scoped_idents = ctx.lookup_ident.clone();
        let mut inner_ctx = StatementContext {
            lookup_ident: &mut scoped_idents,
            typifier: &mut *ctx.typifier,
            module: &mut *ctx.module,
            function: &mut *ctx.function,
        };

        // initializer
        if !lexer.skip(Token::Separator(';')) {
            self.parse_statement(lexer, &mut inner_ctx, &mut outer)?;
        }

        let mut body = Vec::new();
        // condition
        if lexer.peek() != Token::Separator(';') {
            let mut emitter = Emitter::default();
            emitter.start(&inner_ctx.function.expressions);
            let condition = {
                let mut ectx = inner_ctx.as_expression(&mut emitter, &mut body);
                self.parse_value_expression(lexer, &mut ectx)?
            };
            if let Some(statement) = emitter.finish(&inner_ctx.function.expressions) {
                body.push(statement);
            }
            body.push(crate::Statement::If {
                condition,
                accept: Vec::new(),
                reject: vec![crate::Statement::Break],
            });
        }
        lexer.expect(Token::Separator(';'))?;

        // update, lowered into the continuing block
        let mut continuing = Vec::new();
        if lexer.peek() != Token::Paren(')') {
            self.parse_assignment_statement(lexer, &mut inner_ctx, &mut continuing, false)?;
        }
        lexer.expect(Token::Paren(')'))?;

        let rest = self.parse_block(lexer, &mut inner_ctx)?;
        body.extend(rest);

        outer.push(crate::Statement::Loop {
            body,
            continuing,
            break_if: None,
        });
        block.push(crate::Statement::Block(outer));
        Ok(())
    }

    fn parse_switch<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut StatementContext<'a, '_, '_>,
        block: &mut crate::Block,
    ) -> Result<(), Error<'a>> {
        let mut emitter = Emitter::default();
        emitter.start(&ctx.function.expressions);
        let selector = {
            let mut ectx = ctx.as_expression(&mut emitter, block);
            self.parse_value_expression(lexer, &mut ectx)?
        };
        if let Some(statement) = emitter.finish(&ctx.function.expressions) {
            block.push(statement);
        }

        lexer.expect(Token::Paren('{'))?;
        let mut cases = Vec::new();
        loop {
            match lexer.next() {
                (Token::Word("case"), _) => {
                    let mut values = Vec::new();
                    loop {
                        if lexer.skip(Token::Word("default")) {
                            values.push(crate::SwitchValue::Default);
                        } else {
                            let negate = lexer.skip(Token::Operation('-'));
                            let (word, span) = lexer.next_number()?;
                            let value = match conv::parse_literal(word, span.clone())? {
                                crate::Literal::I32(v) => {
                                    crate::SwitchValue::I32(if negate { -v } else { v })
                                }
                                crate::Literal::U32(v) if !negate => crate::SwitchValue::U32(v),
                                _ => return Err(Error::BadNumber(span)),
                            };
                            values.push(value);
                        }
                        if !lexer.skip(Token::Separator(',')) {
                            break;
                        }
                    }
                    let _ = lexer.skip(Token::Separator(':'));
                    let body = self.parse_block(lexer, ctx)?;
                    // multiple selectors share one body via fall-through
                    let last = values.len() - 1;
                    for &value in &values[..last] {
                        cases.push(crate::SwitchCase {
                            value,
                            body: Vec::new(),
                            fall_through: true,
                        });
                    }
                    cases.push(crate::SwitchCase {
                        value: values[last],
                        body,
                        fall_through: false,
                    });
                }
                (Token::Word("default"), _) => {
                    let _ = lexer.skip(Token::Separator(':'));
                    let body = self.parse_block(lexer, ctx)?;
                    cases.push(crate::SwitchCase {
                        value: crate::SwitchValue::Default,
                        body,
                        fall_through: false,
                    });
                }
                (Token::Paren('}'), _) => break,
                other => return Err(Error::Unexpected(other, "a switch case")),
            }
        }

        block.push(crate::Statement::Switch { selector, cases });
        Ok(())
    }

    fn parse_image_store<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut StatementContext<'a, '_, '_>,
        block: &mut crate::Block,
    ) -> Result<(), Error<'a>> {
        let mut emitter = Emitter::default();
        emitter.start(&ctx.function.expressions);
        let statement = {
            let mut ectx = ctx.as_expression(&mut emitter, block);
            lexer.expect(Token::Paren('('))?;
            let image = self.parse_value_expression(lexer, &mut ectx)?;
            let arrayed = match ectx.resolve_type(image)? {
                crate::TypeInner::Image { arrayed, .. } => arrayed,
                _ => false,
            };
            lexer.expect(Token::Separator(','))?;
            let coordinate = self.parse_value_expression(lexer, &mut ectx)?;
            let array_index = if arrayed {
                lexer.expect(Token::Separator(','))?;
                Some(self.parse_value_expression(lexer, &mut ectx)?)
            } else {
                None
            };
            lexer.expect(Token::Separator(','))?;
            let value = self.parse_value_expression(lexer, &mut ectx)?;
            lexer.expect(Token::Paren(')'))?;
            crate::Statement::ImageStore {
                image,
                coordinate,
                array_index,
                value,
            }
        };
        lexer.expect(Token::Separator(';'))?;
        if let Some(emit) = emitter.finish(&ctx.function.expressions) {
            block.push(emit);
        }
        block.push(statement);
        Ok(())
    }

    /// An assignment, compound assignment, increment or decrement; also
    /// covers bare expression statements like a discarded call result.
    fn parse_assignment_statement<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        ctx: &mut StatementContext<'a, '_, '_>,
        block: &mut crate::Block,
        expect_semicolon: bool,
    ) -> Result<(), Error<'a>> {
        let mut emitter = Emitter::default();
        emitter.start(&ctx.function.expressions);
        let statement = {
            let mut ectx = ctx.as_expression(&mut emitter, block);
            let lhs = self.parse_unary_expression(lexer, &mut ectx)?;
            let lhs = self.parse_postfix(lexer, &mut ectx, lhs)?;
            match lexer.next() {
                (Token::Operation('='), span) => {
                    if !lhs.is_reference {
                        return Err(Error::NotReference(span));
                    }
                    let value = self.parse_value_expression(lexer, &mut ectx)?;
                    Some(crate::Statement::Store {
                        pointer: lhs.handle,
                        value,
                    })
                }
                (Token::Operation(op_char), span)
                    if matches!(op_char, '+' | '-' | '*' | '/' | '%' | '&' | '|' | '^') =>
                {
                    lexer.expect(Token::Operation('='))?;
                    if !lhs.is_reference {
                        return Err(Error::NotReference(span));
                    }
                    let op = match op_char {
                        '+' => crate::BinaryOperator::Add,
                        '-' => crate::BinaryOperator::Subtract,
                        '*' => crate::BinaryOperator::Multiply,
                        '/' => crate::BinaryOperator::Divide,
                        '%' => crate::BinaryOperator::Modulo,
                        '&' => crate::BinaryOperator::And,
                        '|' => crate::BinaryOperator::InclusiveOr,
                        _ => crate::BinaryOperator::ExclusiveOr,
                    };
                    let left = ectx.append(crate::Expression::Load {
                        pointer: lhs.handle,
                    });
                    let right = self.parse_value_expression(lexer, &mut ectx)?;
                    let value = ectx.append(crate::Expression::Binary { op, left, right });
                    Some(crate::Statement::Store {
                        pointer: lhs.handle,
                        value,
                    })
                }
                (Token::IncrementOperation, span) | (Token::DecrementOperation, span)
                    if lhs.is_reference =>
                {
                    let is_increment =
                        matches!(lexer.source[span.clone()].chars().next(), Some('+'));
                    let kind = ectx.resolve_pointee(lhs.handle)?.scalar_kind();
                    let literal = match kind {
                        Some(crate::ScalarKind::Sint) => crate::Literal::I32(1),
                        Some(crate::ScalarKind::Uint) => crate::Literal::U32(1),
                        _ => return Err(Error::BadNumber(span)),
                    };
                    let one = ectx.interrupt_emitter(crate::Expression::Literal(literal));
                    let left = ectx.append(crate::Expression::Load {
                        pointer: lhs.handle,
                    });
                    let op = if is_increment {
                        crate::BinaryOperator::Add
                    } else {
                        crate::BinaryOperator::Subtract
                    };
                    let value = ectx.append(crate::Expression::Binary {
                        op,
                        left,
                        right: one,
                    });
                    Some(crate::Statement::Store {
                        pointer: lhs.handle,
                        value,
                    })
                }
                (Token::Separator(';'), _) if expect_semicolon => {
                    // a bare expression statement; the value is dropped
                    if let Some(emit) = emitter.finish(&ctx.function.expressions) {
                        block.push(emit);
                    }
                    return Ok(());
                }
                other => return Err(Error::Unexpected(other, "an assignment operator")),
            }
        };
        if expect_semicolon {
            lexer.expect(Token::Separator(';'))?;
        }
        if let Some(emit) = emitter.finish(&ctx.function.expressions) {
            block.push(emit);
        }
        if let Some(statement) = statement {
            block.push(statement);
        }
        Ok(())
    }

    fn parse_function_decl<'a>(
        &mut self,
        lexer: &mut Lexer<'a>,
        module: &mut crate::Module,
        stage: Option<(crate::ShaderStage, Span)>,
        workgroup_size: Option<[u32; 3]>,
    ) -> Result<(), Error<'a>> {
        let fun_name = lexer.next_ident()?;
        lexer.expect(Token::Paren('('))?;
        let mut arguments = Vec::new();
        let mut argument_names = Vec::new();
        while !lexer.skip(Token::Paren(')')) {
            if !arguments.is_empty() {
                lexer.expect(Token::Separator(','))?;
            }
            let mut binding_parser = BindingParser::default();
            while lexer.skip(Token::Attribute) {
                let (word, span) = lexer.next_ident_with_span()?;
                binding_parser.parse(lexer, word, span)?;
            }
            let arg_name = lexer.next_ident()?;
            lexer.expect(Token::Separator(':'))?;
            let ty = self.parse_type_decl(lexer, module)?;
            argument_names.push(arg_name);
            arguments.push(crate::FunctionArgument {
                name: Some(arg_name.to_string()),
                ty,
                binding: binding_parser.finish(),
            });
        }

        let result = if lexer.skip(Token::Arrow) {
            let mut binding_parser = BindingParser::default();
            while lexer.skip(Token::Attribute) {
                let (word, span) = lexer.next_ident_with_span()?;
                binding_parser.parse(lexer, word, span)?;
            }
            let ty = self.parse_type_decl(lexer, module)?;
            Some(crate::FunctionResult {
                ty,
                binding: binding_parser.finish(),
            })
        } else {
            None
        };

        let mut function = crate::Function {
            name: Some(fun_name.to_string()),
            arguments,
            result,
            ..Default::default()
        };

        let mut lookup_ident = FastHashMap::default();
        for (index, &arg_name) in argument_names.iter().enumerate() {
            let handle = function
                .expressions
                .append(crate::Expression::FunctionArgument(index as u32));
            lookup_ident.insert(arg_name, TypedExpression::value(handle));
        }

        let mut typifier = Typifier::new();
        let body = {
            let mut ctx = StatementContext {
                lookup_ident: &mut lookup_ident,
                typifier: &mut typifier,
                module: &mut *module,
                function: &mut function,
            };
            self.parse_block(lexer, &mut ctx)?
        };
        function.body = body;

        {
            let resolve_ctx = ResolveContext {
                constants: &module.constants,
                types: &module.types,
                global_vars: &module.global_variables,
                local_vars: &function.local_variables,
                functions: &module.functions,
                arguments: &function.arguments,
            };
            for (handle, _) in function.expressions.iter() {
                typifier
                    .grow(handle, &function.expressions, &resolve_ctx)
                    .map_err(Error::InvalidResolve)?;
            }
        }
        function.expression_types = typifier.into_resolutions();

        let handle = module.functions.append(function);
        self.lookup_function.insert(fun_name.to_string(), handle);

        if let Some((stage, stage_span)) = stage {
            let workgroup_size = match (stage, workgroup_size) {
                (crate::ShaderStage::Compute, None) => {
                    return Err(Error::MissingWorkgroupSize(stage_span))
                }
                (_, Some(size)) => size,
                (_, None) => [0; 3],
            };
            module.entry_points.push(crate::EntryPoint {
                name: fun_name.to_string(),
                stage,
                workgroup_size,
                function: handle,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::parse_str;

    #[test]
    fn parse_minimal_vertex() {
        let module = parse_str(
            "@vertex
            fn main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
                return vec4<f32>(0.0, 0.0, 0.0, 1.0);
            }",
        )
        .unwrap();
        assert_eq!(module.entry_points.len(), 1);
        assert_eq!(module.entry_points[0].stage, crate::ShaderStage::Vertex);
        let function = &module.functions[module.entry_points[0].function];
        assert_eq!(function.arguments.len(), 1);
        assert!(function.result.is_some());
    }

    #[test]
    fn parse_struct_offsets() {
        let module = parse_str(
            "struct Light {
                position: vec3<f32>,
                intensity: f32,
                color: vec4<f32>,
            }",
        )
        .unwrap();
        let (_, ty) = module.types.iter().last().unwrap();
        match ty.inner {
            crate::TypeInner::Struct { ref members, span } => {
                assert_eq!(members[0].offset, 0);
                assert_eq!(members[1].offset, 12);
                assert_eq!(members[2].offset, 16);
                assert_eq!(span, 32);
            }
            _ => panic!("not a struct"),
        }
    }

    #[test]
    fn parse_storage_buffer() {
        let module = parse_str(
            "@group(0) @binding(0) var<storage, read_write> data: array<u32>;
            @compute @workgroup_size(64)
            fn main(@builtin(global_invocation_id) id: vec3<u32>) {
                data[id.x] = data[id.x] * 2u;
            }",
        )
        .unwrap();
        let (_, var) = module.global_variables.iter().next().unwrap();
        assert_eq!(
            var.space,
            crate::AddressSpace::Storage {
                access: crate::StorageAccess::LOAD | crate::StorageAccess::STORE,
            }
        );
        assert!(var.binding.is_some());
    }

    #[test]
    fn parse_control_flow() {
        parse_str(
            "fn f(x: i32) -> i32 {
                var acc = 0;
                for (var i = 0; i < x; i += 1) {
                    if i % 2 == 0 {
                        acc += i;
                    } else {
                        continue;
                    }
                }
                loop {
                    acc -= 1;
                    continuing {
                        break if acc < 0;
                    }
                }
                switch acc {
                    case 0: { return 0; }
                    case 1, 2: { return 1; }
                    default: { return acc; }
                }
            }",
        )
        .unwrap();
    }

    #[test]
    fn parse_call_initializer_keeps_result() {
        let module = parse_str(
            "fn helper() -> u32 { return 1u; }
            fn caller() -> u32 {
                var count = helper();
                var copy = count;
                return copy;
            }",
        )
        .unwrap();
        let caller = module
            .functions
            .iter()
            .find(|(_, f)| f.name.as_deref() == Some("caller"))
            .unwrap()
            .1;
        // `count` keeps the call result as its initializer
        let (_, count_var) = caller
            .local_variables
            .iter()
            .find(|(_, v)| v.name.as_deref() == Some("count"))
            .unwrap();
        let init = count_var.init.unwrap();
        assert!(matches!(
            caller.expressions[init],
            crate::Expression::CallResult(_)
        ));
    }

    #[test]
    fn error_reporting_has_context() {
        let source = "fn f() { bad_ident; }";
        let error = parse_str(source).unwrap_err();
        let rendered = error.emit_to_string(source);
        assert!(rendered.contains("bad_ident"));
    }
}
