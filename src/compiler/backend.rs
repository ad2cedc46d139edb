//! Where a compilation keeps its output text and symbol tables.
//!
//! [`HostBackend`] is the stage zero compiler: plain Rust strings and vectors,
//! with the result copied into the window once it is complete.
//! [`RuntimeBackend`] keeps everything in the memory window itself, using
//! [`Str`] for text, [`Dict`] for symbol tables and an [`Array`] as the loop
//! label stack.
use lasso::{Rodeo, Spur};
use tracing::trace;

use super::Compiled;
use crate::{
    error::Error,
    memory::{Memory, MemoryError},
    parser::ast::{Class, Type},
    runtime::{Array, Dict, Str},
};

/// Longest text one expression may lower to at stage zero.
pub const STAGE0_MAX_EXPRESSION_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub scope: Scope,
    /// Annotated type, as written.
    pub ty: Option<Box<str>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Position among the declared fields, not counting the header.
    pub index: u32,
    pub ty: Option<Box<str>>,
}

pub trait Backend {
    /// Output text under construction.
    type Text;

    fn text(&mut self, init: &str) -> Result<Self::Text, Error>;
    fn push(&mut self, text: &mut Self::Text, tail: &str) -> Result<(), Error>;
    /// Moves `tail` to the end of `text`.
    fn append(&mut self, text: &mut Self::Text, tail: Self::Text) -> Result<(), Error>;
    /// Called on the text of every complete expression.
    fn check_expression(&self, _text: &Self::Text) -> Result<(), Error> {
        Ok(())
    }
    /// Hands the finished output over to the caller.
    fn finish(&mut self, text: Self::Text) -> Result<Compiled, Error>;

    /// Forgets the locals of the previous function.
    fn begin_function(&mut self) -> Result<(), Error>;
    fn declare(&mut self, scope: Scope, name: &str, ty: Option<&Type>) -> Result<(), Error>;
    /// Locals shadow globals. Names that were never declared resolve to `None`.
    fn variable(&self, name: &str) -> Option<Variable>;

    /// Backends without object support declare no classes, so every lookup
    /// fails.
    fn declare_class(&mut self, class: &Class) -> Result<(), Error> {
        Err(Error::NoClassSupport(class.name.clone()))
    }
    fn field(&self, class: &str, _field: &str) -> Result<Field, Error> {
        Err(Error::UnknownClass(Box::from(class)))
    }
    fn field_count(&self, class: &str) -> Result<u32, Error> {
        Err(Error::UnknownClass(Box::from(class)))
    }

    /// Pushes a fresh loop label and returns it. Labels count up from 1 over
    /// the whole compilation.
    fn enter_loop(&mut self) -> Result<u32, Error>;
    fn exit_loop(&mut self) -> Result<(), Error>;
    fn innermost_loop(&self) -> Option<u32>;
}

/// Stage zero parses neither type annotations nor classes, so its tables only
/// hold names.
pub struct HostBackend<'m> {
    memory: &'m mut Memory,
    names: Rodeo,
    globals: Vec<Spur>,
    locals: Vec<Spur>,
    loops: Vec<u32>,
    next_label: u32,
}

impl<'m> HostBackend<'m> {
    pub fn new(memory: &'m mut Memory) -> Self {
        Self {
            memory,
            names: Rodeo::new(),
            globals: Vec::new(),
            locals: Vec::new(),
            loops: Vec::new(),
            next_label: 1,
        }
    }

    pub fn memory(&self) -> &Memory {
        &*self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut *self.memory
    }
}

impl Backend for HostBackend<'_> {
    type Text = String;

    fn text(&mut self, init: &str) -> Result<String, Error> {
        Ok(String::from(init))
    }

    fn push(&mut self, text: &mut String, tail: &str) -> Result<(), Error> {
        text.push_str(tail);
        Ok(())
    }

    fn append(&mut self, text: &mut String, tail: String) -> Result<(), Error> {
        text.push_str(&tail);
        Ok(())
    }

    fn check_expression(&self, text: &String) -> Result<(), Error> {
        if text.len() > STAGE0_MAX_EXPRESSION_LEN {
            return Err(Error::ExpressionTooLong {
                limit: STAGE0_MAX_EXPRESSION_LEN,
            });
        }
        Ok(())
    }

    fn finish(&mut self, text: String) -> Result<Compiled, Error> {
        let len = u32::try_from(text.len() + 1).map_err(|_| MemoryError::OutOfMemory {
            requested: u32::MAX,
        })?;
        let address = self.memory.alloc(len)?;
        self.memory.write_raw_str(address, text.as_bytes())?;
        Ok(Compiled::Raw(address))
    }

    fn begin_function(&mut self) -> Result<(), Error> {
        self.locals.clear();
        Ok(())
    }

    fn declare(&mut self, scope: Scope, name: &str, _ty: Option<&Type>) -> Result<(), Error> {
        let symbol = self.names.get_or_intern(name);
        let table = match scope {
            Scope::Local => &mut self.locals,
            Scope::Global => &mut self.globals,
        };
        if table.contains(&symbol) {
            return Err(Error::Redeclared(Box::from(name)));
        }
        table.push(symbol);
        Ok(())
    }

    fn variable(&self, name: &str) -> Option<Variable> {
        let symbol = self.names.get(name)?;
        let scope = if self.locals.contains(&symbol) {
            Scope::Local
        } else if self.globals.contains(&symbol) {
            Scope::Global
        } else {
            return None;
        };
        Some(Variable { scope, ty: None })
    }

    fn enter_loop(&mut self) -> Result<u32, Error> {
        let label = self.next_label;
        self.next_label += 1;
        self.loops.push(label);
        Ok(label)
    }

    fn exit_loop(&mut self) -> Result<(), Error> {
        self.loops.pop();
        Ok(())
    }

    fn innermost_loop(&self) -> Option<u32> {
        self.loops.last().copied()
    }
}

/// Symbol tables map names to the address of their annotated type as a
/// [`Str`], or 0 when there is none. The class table maps class names to
/// such a table of their fields.
pub struct RuntimeBackend<'m> {
    memory: &'m mut Memory,
    globals: Dict,
    locals: Dict,
    classes: Dict,
    loops: Array,
    next_label: u32,
}

impl<'m> RuntimeBackend<'m> {
    pub fn new(memory: &'m mut Memory) -> Result<Self, Error> {
        let globals = Dict::new(memory)?;
        let locals = Dict::new(memory)?;
        let classes = Dict::new(memory)?;
        let loops = Array::new(memory, 0)?;
        Ok(Self {
            memory,
            globals,
            locals,
            classes,
            loops,
            next_label: 1,
        })
    }

    pub fn memory(&self) -> &Memory {
        &*self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut *self.memory
    }

    /// Frees every table. Only the output handed out by [`Backend::finish`]
    /// stays allocated.
    pub fn clean_up(self) -> Result<(), Error> {
        let Self {
            memory,
            globals,
            locals,
            classes,
            loops,
            ..
        } = self;
        delete_symbols(memory, globals)?;
        delete_symbols(memory, locals)?;
        for fields in classes.values(memory) {
            delete_symbols(memory, Dict::from_ptr(fields))?;
        }
        classes.delete(memory)?;
        loops.delete(memory)?;
        Ok(())
    }

    fn new_type(&mut self, ty: Option<&Type>) -> Result<u32, Error> {
        Ok(match ty {
            Some(ty) => Str::from_str(self.memory, &ty.to_string())?.into_ptr(),
            None => 0,
        })
    }

    fn read_type(&self, address: u32) -> Option<Box<str>> {
        (address != 0).then(|| Box::from(Str::from_ptr(address).to_string(self.memory)))
    }

    fn class(&self, name: &str) -> Result<Dict, Error> {
        let index = self
            .classes
            .find_bytes(self.memory, name.as_bytes())
            .ok_or_else(|| Error::UnknownClass(Box::from(name)))?;
        Ok(Dict::from_ptr(self.classes.value_at(self.memory, index)?))
    }
}

/// Deletes a symbol table along with the type strings it points at.
fn delete_symbols(memory: &mut Memory, symbols: Dict) -> Result<(), Error> {
    for ty in symbols.values(memory) {
        if ty != 0 {
            Str::from_ptr(ty).delete(memory)?;
        }
    }
    symbols.delete(memory)?;
    Ok(())
}

impl Backend for RuntimeBackend<'_> {
    type Text = Str;

    fn text(&mut self, init: &str) -> Result<Str, Error> {
        Ok(Str::from_str(self.memory, init)?)
    }

    fn push(&mut self, text: &mut Str, tail: &str) -> Result<(), Error> {
        Ok(text.push_str(self.memory, tail)?)
    }

    fn append(&mut self, text: &mut Str, tail: Str) -> Result<(), Error> {
        Ok(text.merge(self.memory, tail)?)
    }

    fn finish(&mut self, text: Str) -> Result<Compiled, Error> {
        Ok(Compiled::Rope(text))
    }

    fn begin_function(&mut self) -> Result<(), Error> {
        let fresh = Dict::new(self.memory)?;
        let previous = std::mem::replace(&mut self.locals, fresh);
        delete_symbols(self.memory, previous)
    }

    fn declare(&mut self, scope: Scope, name: &str, ty: Option<&Type>) -> Result<(), Error> {
        let table = match scope {
            Scope::Local => &self.locals,
            Scope::Global => &self.globals,
        };
        if table.find_bytes(self.memory, name.as_bytes()).is_some() {
            return Err(Error::Redeclared(Box::from(name)));
        }
        let ty = self.new_type(ty)?;
        let key = Str::from_str(self.memory, name)?;
        let table = match scope {
            Scope::Local => &mut self.locals,
            Scope::Global => &mut self.globals,
        };
        table.set(self.memory, key, ty)?;
        Ok(())
    }

    fn variable(&self, name: &str) -> Option<Variable> {
        let lookup = |scope: Scope, table: &Dict| {
            let index = table.find_bytes(self.memory, name.as_bytes())?;
            let ty = table.value_at(self.memory, index).ok()?;
            Some(Variable {
                scope,
                ty: self.read_type(ty),
            })
        };
        lookup(Scope::Local, &self.locals).or_else(|| lookup(Scope::Global, &self.globals))
    }

    fn declare_class(&mut self, class: &Class) -> Result<(), Error> {
        if self.class(&class.name).is_ok() {
            return Err(Error::Redeclared(class.name.clone()));
        }
        let mut fields = Dict::new(self.memory)?;
        for field in &class.fields {
            if fields.find_bytes(self.memory, field.name.as_bytes()).is_some() {
                delete_symbols(self.memory, fields)?;
                return Err(Error::Redeclared(field.name.clone()));
            }
            let ty = self.new_type(field.ty.as_ref())?;
            let key = Str::from_str(self.memory, &field.name)?;
            fields.set(self.memory, key, ty)?;
        }
        let key = Str::from_str(self.memory, &class.name)?;
        self.classes.set(self.memory, key, fields.into_ptr())?;
        trace!(class = &*class.name, fields = class.fields.len(), "declared class");
        Ok(())
    }

    fn field(&self, class: &str, field: &str) -> Result<Field, Error> {
        let fields = self.class(class)?;
        let index = fields
            .find_bytes(self.memory, field.as_bytes())
            .ok_or_else(|| Error::UnknownField {
                class: Box::from(class),
                field: Box::from(field),
            })?;
        let ty = fields.value_at(self.memory, index)?;
        Ok(Field {
            index,
            ty: self.read_type(ty),
        })
    }

    fn field_count(&self, class: &str) -> Result<u32, Error> {
        Ok(self.class(class)?.len(self.memory))
    }

    fn enter_loop(&mut self) -> Result<u32, Error> {
        let label = self.next_label;
        self.next_label += 1;
        self.loops.push(self.memory, label)?;
        Ok(label)
    }

    fn exit_loop(&mut self) -> Result<(), Error> {
        self.loops.pop(self.memory)?;
        Ok(())
    }

    fn innermost_loop(&self) -> Option<u32> {
        self.loops.last(self.memory)
    }
}
