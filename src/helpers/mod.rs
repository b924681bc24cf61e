//! Named functions callable from placeholders.
//!
//! The standard set covers text case, rich-text run wrappers, structure
//! breaks, comparison and logic, collections, math, number formatting and
//! dates. Callers may register their own helpers or remove standard ones.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::data::Value;
use crate::relationships::HyperlinkRegistry;

mod collections;
mod dates;
mod logic;
mod markup;
mod math;
mod text;

pub use dates::go_layout_to_strftime;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HelperError {
    #[error("wrong number of args for {name}: want {want} got {got}")]
    WrongArgCount { name: String, want: Arity, got: usize },
    #[error("error calling {name}: {message}")]
    InvalidArgument { name: String, message: String },
    #[error("error calling {name}: division by zero")]
    DivisionByZero { name: String },
}

impl HelperError {
    pub fn invalid(name: &str, message: impl Into<String>) -> Self {
        HelperError::InvalidArgument {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// Accepted argument count of a helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exact(n: usize) -> Self {
        Self { min: n, max: Some(n) }
    }

    pub const fn between(min: usize, max: usize) -> Self {
        Self { min, max: Some(max) }
    }

    pub const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", max),
            Some(max) => write!(f, "{}..{}", self.min, max),
            None => write!(f, "at least {}", self.min),
        }
    }
}

/// Per-call state available to helpers.
pub struct HelperContext<'a> {
    pub links: &'a HyperlinkRegistry,
    /// Division and modulo by zero fail instead of yielding zero.
    pub strict_math: bool,
}

pub type HelperFn = dyn Fn(&HelperContext<'_>, &[Value]) -> Result<Value, HelperError> + Send + Sync;

#[derive(Clone)]
pub struct Helper {
    arity: Arity,
    func: Arc<HelperFn>,
}

impl Helper {
    pub fn arity(&self) -> Arity {
        self.arity
    }
}

impl fmt::Debug for Helper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Helper").field("arity", &self.arity).finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct HelperRegistry {
    helpers: HashMap<String, Helper>,
}

impl HelperRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every standard helper.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        logic::register(&mut registry);
        text::register(&mut registry);
        markup::register(&mut registry);
        collections::register(&mut registry);
        math::register(&mut registry);
        dates::register(&mut registry);
        registry
    }

    /// Adds or replaces a helper.
    pub fn register<F>(&mut self, name: &str, arity: Arity, func: F)
    where
        F: Fn(&HelperContext<'_>, &[Value]) -> Result<Value, HelperError> + Send + Sync + 'static,
    {
        self.helpers.insert(
            name.to_string(),
            Helper {
                arity,
                func: Arc::new(func),
            },
        );
    }

    pub fn remove(&mut self, name: &str) -> Option<Helper> {
        self.helpers.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Helper> {
        self.helpers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    /// Helper names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.helpers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Calls a helper after checking its arity.
    pub fn call(&self, name: &str, ctx: &HelperContext<'_>, args: &[Value]) -> Result<Value, HelperError> {
        let helper = self
            .get(name)
            .ok_or_else(|| HelperError::invalid(name, "function not defined"))?;
        if !helper.arity.accepts(args.len()) {
            return Err(HelperError::WrongArgCount {
                name: name.to_string(),
                want: helper.arity,
                got: args.len(),
            });
        }
        (helper.func)(ctx, args)
    }
}

/// Text form of a helper argument.
pub(crate) fn text_arg(value: &Value) -> String {
    value.to_string()
}

pub(crate) fn int_arg(name: &str, value: &Value) -> Result<i64, HelperError> {
    value
        .as_i64()
        .ok_or_else(|| HelperError::invalid(name, format!("expected an integer, got {}", value.kind())))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Calls a standard helper with a fresh registry and context.
    pub fn call(name: &str, args: &[Value]) -> Result<Value, HelperError> {
        let links = HyperlinkRegistry::new();
        call_with(name, args, &links, false)
    }

    pub fn call_with(
        name: &str,
        args: &[Value],
        links: &HyperlinkRegistry,
        strict_math: bool,
    ) -> Result<Value, HelperError> {
        let ctx = HelperContext { links, strict_math };
        HelperRegistry::standard().call(name, &ctx, args)
    }

    pub fn s(text: &str) -> Value {
        Value::from(text)
    }
}
