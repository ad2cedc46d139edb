//! Lowering of the syntax tree to WebAssembly text.
//!
//! Every value is an `i32`. Operators without a native instruction (`&&`,
//! `||`, `**`) and array subscripts call into the runtime library the output
//! is linked with.
use tracing::trace;

use super::{
    backend::{Backend, Scope, Variable},
    pool::{escape_data, StringPool},
};
use crate::{
    error::Error,
    parser::ast::{BinaryOp, Class, Expr, Function, Item, Stmt, UnaryOp, VarDecl},
};

/// A parsed unit of compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum Unit {
    Expression(Expr),
    Statement { stmt: Stmt, indent: usize },
    Block { stmts: Vec<Stmt>, indent: usize },
    Function(Function),
    Class(Class),
    Module(Vec<Item>),
}

/// Indentation of module level declarations.
const ITEM_INDENT: usize = 2;
/// Indentation of function bodies.
const BODY_INDENT: usize = 4;

fn instruction(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Or => "call $or",
        BinaryOp::And => "call $and",
        BinaryOp::Equal => "i32.eq",
        BinaryOp::NotEqual => "i32.ne",
        BinaryOp::Less => "i32.lt_s",
        BinaryOp::LessEqual => "i32.le_s",
        BinaryOp::Greater => "i32.gt_s",
        BinaryOp::GreaterEqual => "i32.ge_s",
        BinaryOp::Add => "i32.add",
        BinaryOp::Subtract => "i32.sub",
        BinaryOp::Remainder => "i32.rem_s",
        BinaryOp::Multiply => "i32.mul",
        BinaryOp::Divide => "i32.div_s",
        BinaryOp::Power => "call $pow",
    }
}

/// The class a value of type `ty` is an instance of. `i32` values are not objects.
fn class_of(ty: &str) -> Option<&str> {
    let name = ty.split_once('<').map_or(ty, |(name, _)| name);
    (name != "i32").then_some(name)
}

/// Value of a number literal, negated or not. The lexer only folds a minus
/// sign into the literal when no space separates them.
fn constant(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Number(n) => Some(*n),
        Expr::Unary {
            op: UnaryOp::Negate,
            operand,
        } => match **operand {
            Expr::Number(n) if i32::try_from(-n).is_ok() => Some(-n),
            _ => None,
        },
        _ => None,
    }
}

/// `T` for a `Container<T>`.
fn element_type(ty: &str) -> Option<&str> {
    ty.split_once('<')?.1.strip_suffix('>')
}

pub struct Codegen<'c, B> {
    backend: &'c mut B,
    pool: &'c mut StringPool,
}

impl<'c, B: Backend> Codegen<'c, B> {
    pub fn new(backend: &'c mut B, pool: &'c mut StringPool) -> Self {
        Self { backend, pool }
    }

    pub fn lower(&mut self, unit: &Unit) -> Result<B::Text, Error> {
        match unit {
            Unit::Expression(expr) => self.expression(expr),
            Unit::Statement { stmt, indent } => self.statement(stmt, *indent),
            Unit::Block { stmts, indent } => self.block(stmts, *indent),
            Unit::Function(function) => self.function(function),
            Unit::Class(class) => self.class(class),
            Unit::Module(items) => self.module(items),
        }
    }

    fn text(&mut self, init: &str) -> Result<B::Text, Error> {
        self.backend.text(init)
    }

    fn push(&mut self, text: &mut B::Text, tail: &str) -> Result<(), Error> {
        self.backend.push(text, tail)
    }

    fn append(&mut self, text: &mut B::Text, tail: B::Text) -> Result<(), Error> {
        self.backend.append(text, tail)
    }

    /// `(head arg...)`
    fn form(&mut self, head: &str, args: Vec<B::Text>) -> Result<B::Text, Error> {
        let mut text = self.text("(")?;
        self.push(&mut text, head)?;
        for arg in args {
            self.push(&mut text, " ")?;
            self.append(&mut text, arg)?;
        }
        self.push(&mut text, ")")?;
        Ok(text)
    }

    /// Lowers a complete expression.
    pub fn expression(&mut self, expr: &Expr) -> Result<B::Text, Error> {
        let text = self.value(expr)?;
        self.backend.check_expression(&text)?;
        Ok(text)
    }

    fn value(&mut self, expr: &Expr) -> Result<B::Text, Error> {
        match expr {
            Expr::Number(n) => self.text(&format!("(i32.const {n})")),
            Expr::String(literal) => {
                let address = self.pool.intern(literal);
                self.text(&format!("(i32.const {address})"))
            }
            Expr::Variable(name) => match self.backend.variable(name) {
                Some(Variable {
                    scope: Scope::Local,
                    ..
                }) => self.text(&format!("(local.get ${name})")),
                _ => self.text(&format!("(global.get ${name})")),
            },
            Expr::Call { callee, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.value(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.form(&format!("call ${callee}"), args)
            }
            Expr::Unary { op, operand } => {
                let operand = self.value(operand)?;
                let head = match op {
                    UnaryOp::Negate => "i32.neg",
                    UnaryOp::Not => "i32.eqz",
                };
                self.form(head, vec![operand])
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.value(lhs)?;
                let rhs = self.value(rhs)?;
                self.form(instruction(*op), vec![lhs, rhs])
            }
            Expr::Assign { target, value } => self.assignment_value(target, value),
            Expr::Member { object, field } => {
                let offset = self.field_offset(object, field)?;
                let object = self.value(object)?;
                self.form(&format!("i32.load offset={offset}"), vec![object])
            }
            Expr::Subscript { array, index } => {
                let array = self.value(array)?;
                let index = self.value(index)?;
                self.form("call $_arrGet", vec![array, index])
            }
            Expr::New { class } => {
                let size = 4 * (self.backend.field_count(&class.name)? + 1);
                self.text(&format!("(call $_malloc (i32.const {size}))"))
            }
        }
    }

    /// Annotated type of an expression, if it can be known without inference.
    fn static_type(&self, expr: &Expr) -> Result<Option<Box<str>>, Error> {
        Ok(match expr {
            Expr::Variable(name) => self.backend.variable(name).and_then(|v| v.ty),
            Expr::Member { object, field } => match self.static_type(object)? {
                Some(ty) => match class_of(&ty) {
                    Some(class) => self.backend.field(class, field)?.ty,
                    None => None,
                },
                None => None,
            },
            Expr::Subscript { array, .. } => self
                .static_type(array)?
                .and_then(|ty| element_type(&ty).map(Box::from)),
            Expr::New { class } => Some(Box::from(class.to_string())),
            _ => None,
        })
    }

    fn field_offset(&self, object: &Expr, field: &str) -> Result<u32, Error> {
        let ty = self.static_type(object)?;
        let class = ty
            .as_deref()
            .and_then(class_of)
            .ok_or_else(|| Error::UntypedReceiver {
                field: Box::from(field),
            })?;
        let index = self.backend.field(class, field)?.index;
        Ok(4 * (index + 1))
    }

    fn is_local(&self, name: &str) -> bool {
        matches!(
            self.backend.variable(name),
            Some(Variable {
                scope: Scope::Local,
                ..
            })
        )
    }

    /// An assignment whose value is used.
    fn assignment_value(&mut self, target: &Expr, value: &Expr) -> Result<B::Text, Error> {
        match target {
            Expr::Variable(name) if self.is_local(name) => {
                let value = self.value(value)?;
                self.form(&format!("local.tee ${name}"), vec![value])
            }
            Expr::Variable(name) => {
                let value = self.value(value)?;
                let mut text = self.text(&format!("(block (result i32) (global.set ${name} "))?;
                self.append(&mut text, value)?;
                self.push(&mut text, &format!(") (global.get ${name}))"))?;
                Ok(text)
            }
            Expr::Member { field, .. } => Err(Error::AssignmentNotAValue(field.clone())),
            Expr::Subscript { .. } => Err(Error::AssignmentNotAValue(Box::from("[]"))),
            _ => Err(Error::InvalidAssignmentTarget { span: 0..0 }),
        }
    }

    /// An assignment in statement position, which leaves nothing on the stack.
    fn assignment_statement(&mut self, target: &Expr, value: &Expr) -> Result<B::Text, Error> {
        match target {
            Expr::Variable(name) => {
                let set = if self.is_local(name) {
                    "local.set"
                } else {
                    "global.set"
                };
                let value = self.expression(value)?;
                self.form(&format!("{set} ${name}"), vec![value])
            }
            Expr::Member { object, field } => {
                let offset = self.field_offset(object, field)?;
                let object = self.expression(object)?;
                let value = self.expression(value)?;
                self.form(&format!("i32.store offset={offset}"), vec![object, value])
            }
            Expr::Subscript { array, index } => {
                let array = self.expression(array)?;
                let index = self.expression(index)?;
                let value = self.expression(value)?;
                let call = self.form("call $_arrSet", vec![array, index, value])?;
                self.form("drop", vec![call])
            }
            _ => Err(Error::InvalidAssignmentTarget { span: 0..0 }),
        }
    }

    /// Lowers one statement. Lines after the first are indented by `indent`.
    pub fn statement(&mut self, stmt: &Stmt, indent: usize) -> Result<B::Text, Error> {
        let pad = " ".repeat(indent);
        match stmt {
            Stmt::Expr(Expr::Assign { target, value }) => self.assignment_statement(target, value),
            Stmt::Expr(expr) => {
                let value = self.expression(expr)?;
                self.form("drop", vec![value])
            }
            Stmt::Let(decls) => self.locals(decls),
            Stmt::If {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.expression(condition)?;
                let mut text = self.text("(if ")?;
                self.append(&mut text, condition)?;
                self.push(&mut text, &format!("\n{pad}  (then\n"))?;
                let then = self.block(then, indent + 4)?;
                self.append(&mut text, then)?;
                self.push(&mut text, &format!("{pad}  )\n"))?;
                if let Some(otherwise) = otherwise {
                    self.push(&mut text, &format!("{pad}  (else\n"))?;
                    let otherwise = self.block(otherwise, indent + 4)?;
                    self.append(&mut text, otherwise)?;
                    self.push(&mut text, &format!("{pad}  )\n"))?;
                }
                self.push(&mut text, &format!("{pad})"))?;
                Ok(text)
            }
            Stmt::While { condition, body } => {
                let label = self.backend.enter_loop()?;
                let condition = self.expression(condition)?;
                let mut text = self.text(&format!(
                    "(block $loop_{label}_end (loop $loop_{label}\n{pad}  (br_if $loop_{label}_end (i32.eqz "
                ))?;
                self.append(&mut text, condition)?;
                self.push(&mut text, "))\n")?;
                let body = self.block(body, indent + 2)?;
                self.append(&mut text, body)?;
                self.push(&mut text, &format!("{pad}  (br $loop_{label})\n{pad}))"))?;
                self.backend.exit_loop()?;
                Ok(text)
            }
            Stmt::Break => {
                let label = self
                    .backend
                    .innermost_loop()
                    .ok_or(Error::LoopControlOutsideLoop("break"))?;
                self.text(&format!("(br $loop_{label}_end)"))
            }
            Stmt::Continue => {
                let label = self
                    .backend
                    .innermost_loop()
                    .ok_or(Error::LoopControlOutsideLoop("continue"))?;
                self.text(&format!("(br $loop_{label})"))
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(value) => self.expression(value)?,
                    None => self.text("(i32.const 0)")?,
                };
                self.form("return", vec![value])
            }
        }
    }

    fn locals(&mut self, decls: &[VarDecl]) -> Result<B::Text, Error> {
        let mut text = self.text("")?;
        for (idx, decl) in decls.iter().enumerate() {
            if idx > 0 {
                self.push(&mut text, " ")?;
            }
            self.backend.declare(Scope::Local, &decl.name, decl.ty.as_ref())?;
            self.push(&mut text, &format!("(local ${} i32)", decl.name))?;
            if let Some(init) = &decl.init {
                let value = self.expression(init)?;
                let set = self.form(&format!("local.set ${}", decl.name), vec![value])?;
                self.push(&mut text, " ")?;
                self.append(&mut text, set)?;
            }
        }
        Ok(text)
    }

    /// Lowers statements one per line, each prefixed with `indent` spaces.
    pub fn block(&mut self, stmts: &[Stmt], indent: usize) -> Result<B::Text, Error> {
        let pad = " ".repeat(indent);
        let mut text = self.text("")?;
        for stmt in stmts {
            self.push(&mut text, &pad)?;
            let stmt = self.statement(stmt, indent)?;
            self.append(&mut text, stmt)?;
            self.push(&mut text, "\n")?;
        }
        Ok(text)
    }

    /// Functions always return an `i32`, 0 when the body falls through.
    pub fn function(&mut self, function: &Function) -> Result<B::Text, Error> {
        let name = &function.name;
        self.backend.begin_function()?;
        let mut text = self.text(&format!("  (func ${name}"))?;
        for param in &function.params {
            self.backend.declare(Scope::Local, &param.name, param.ty.as_ref())?;
            self.push(&mut text, &format!(" (param ${} i32)", param.name))?;
        }
        self.push(&mut text, " (result i32)\n")?;
        let body = self.block(&function.body, BODY_INDENT)?;
        self.append(&mut text, body)?;
        self.push(
            &mut text,
            &format!("    (i32.const 0)\n  )\n  (export \"{name}\" (func ${name}))\n"),
        )?;
        trace!(name = &**name, "lowered function");
        Ok(text)
    }

    /// Objects start with a header word, so declared fields begin at offset 4.
    pub fn class(&mut self, class: &Class) -> Result<B::Text, Error> {
        self.backend.declare_class(class)?;
        let mut text = self.text(&format!(
            "  (type ${} (struct (field $_header (mut i32))",
            class.name
        ))?;
        for field in &class.fields {
            let ty = match field.ty.as_ref().map(|ty| ty.to_string()) {
                Some(ty) if ty != "i32" => format!("(ref ${ty})"),
                _ => String::from("i32"),
            };
            self.push(&mut text, &format!(" (field ${} (mut {ty}))", field.name))?;
        }
        self.push(&mut text, "))\n")?;
        Ok(text)
    }

    fn globals(&mut self, decls: &[VarDecl]) -> Result<B::Text, Error> {
        let mut text = self.text(&" ".repeat(ITEM_INDENT))?;
        for (idx, decl) in decls.iter().enumerate() {
            let value = match &decl.init {
                None => 0,
                Some(Expr::String(literal)) => i64::from(self.pool.intern(literal)),
                Some(init) => constant(init)
                    .ok_or_else(|| Error::NonConstantGlobal(decl.name.clone()))?,
            };
            self.backend.declare(Scope::Global, &decl.name, decl.ty.as_ref())?;
            if idx > 0 {
                self.push(&mut text, " ")?;
            }
            self.push(
                &mut text,
                &format!("(global ${} (mut i32) (i32.const {value}))", decl.name),
            )?;
        }
        self.push(&mut text, "\n")?;
        Ok(text)
    }

    /// Lowers every item in order, then one data segment per string literal.
    pub fn module(&mut self, items: &[Item]) -> Result<B::Text, Error> {
        let mut text = self.text("")?;
        for item in items {
            let lowered = match item {
                Item::Import(path) => {
                    trace!(path = &**path, "skipping import");
                    continue;
                }
                Item::Class(class) => self.class(class)?,
                Item::Function(function) => self.function(function)?,
                Item::Global(decls) => self.globals(decls)?,
            };
            self.append(&mut text, lowered)?;
        }
        let segments = self
            .pool
            .segments()
            .map(|(address, literal)| {
                format!(
                    "{}(data (i32.const {address}) \"{}\\00\")\n",
                    " ".repeat(ITEM_INDENT),
                    escape_data(literal)
                )
            })
            .collect::<Vec<_>>();
        for segment in segments {
            self.push(&mut text, &segment)?;
        }
        Ok(text)
    }
}
