use log::trace;

use super::parser::{Branch, Command, Node, Operand, Pipeline, Pos, Template};
use super::{Escape, ExecError};
use crate::data::Value;
use crate::helpers::{HelperContext, HelperRegistry};

/// Printed for nil values; removed again by the post-fixer.
pub(crate) const NO_VALUE: &str = "<no value>";

enum Flow {
    Normal,
    Break,
    Continue,
}

struct State<'t, 'h> {
    template: &'t Template,
    helpers: &'h HelperRegistry,
    ctx: HelperContext<'h>,
    escape: Escape,
    max_depth: usize,
    depth: usize,
    /// Variables in scope, innermost last; `""` is `$`.
    vars: Vec<(String, Value)>,
    out: String,
}

pub(crate) fn execute<'h>(
    template: &Template,
    data: &Value,
    helpers: &'h HelperRegistry,
    ctx: HelperContext<'h>,
    escape: Escape,
    max_depth: usize,
) -> Result<String, ExecError> {
    let mut state = State {
        template,
        helpers,
        ctx,
        escape,
        max_depth,
        depth: 0,
        vars: vec![(String::new(), data.clone())],
        out: String::new(),
    };
    state.walk(&template.root, data)?;
    Ok(state.out)
}

impl<'t, 'h> State<'t, 'h> {
    fn error(&self, pos: &Pos, message: impl Into<String>) -> ExecError {
        ExecError {
            name: self.template.name().to_string(),
            line: pos.line,
            placeholder: pos.raw.clone(),
            message: message.into(),
        }
    }

    fn print(&mut self, value: &Value) {
        match value {
            Value::Null => self.out.push_str(NO_VALUE),
            Value::Markup(raw) => self.out.push_str(raw),
            other => {
                let text = other.to_string();
                match self.escape {
                    Escape::None => self.out.push_str(&text),
                    Escape::Text => self.out.push_str(&html_escape::encode_text(&text)),
                    Escape::Attribute => self.out.push_str(&html_escape::encode_double_quoted_attribute(&text)),
                }
            }
        }
    }

    fn walk(&mut self, nodes: &[Node], dot: &Value) -> Result<Flow, ExecError> {
        for node in nodes {
            let flow = match node {
                Node::Text(text) => {
                    self.out.push_str(text);
                    Flow::Normal
                }
                Node::Action { pipe, pos } => {
                    let value = self.pipeline(pipe, dot, pos)?;
                    if pipe.decls.is_empty() {
                        self.print(&value);
                    }
                    Flow::Normal
                }
                Node::If { branches, otherwise } => self.conditional(branches, otherwise.as_deref(), dot, false)?,
                Node::With { branches, otherwise } => self.conditional(branches, otherwise.as_deref(), dot, true)?,
                Node::Range {
                    vars,
                    pipe,
                    body,
                    otherwise,
                    pos,
                } => self.range(vars, pipe, body, otherwise.as_deref(), dot, pos)?,
                Node::Template { name, pipe, pos } => {
                    let next_dot = match pipe {
                        Some(pipe) => self.pipeline(pipe, dot, pos)?,
                        None => Value::Null,
                    };
                    self.call_template(name, &next_dot, pos)?;
                    Flow::Normal
                }
                Node::Break(_) => Flow::Break,
                Node::Continue(_) => Flow::Continue,
            };
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn conditional(
        &mut self,
        branches: &[Branch],
        otherwise: Option<&[Node]>,
        dot: &Value,
        rebind_dot: bool,
    ) -> Result<Flow, ExecError> {
        let scope = self.vars.len();
        let mut flow = Flow::Normal;
        let mut taken = false;
        for branch in branches {
            let value = self.pipeline(&branch.cond, dot, &branch.pos)?;
            if value.is_truthy() {
                let inner = if rebind_dot { &value } else { dot };
                flow = self.walk(&branch.body, inner)?;
                taken = true;
                break;
            }
        }
        if !taken {
            if let Some(otherwise) = otherwise {
                flow = self.walk(otherwise, dot)?;
            }
        }
        self.vars.truncate(scope);
        Ok(flow)
    }

    fn range(
        &mut self,
        vars: &[String],
        pipe: &Pipeline,
        body: &[Node],
        otherwise: Option<&[Node]>,
        dot: &Value,
        pos: &Pos,
    ) -> Result<Flow, ExecError> {
        let scope = self.vars.len();
        let collection = self.pipeline(pipe, dot, pos)?;
        let items: Vec<(Value, Value)> = match &collection {
            Value::Seq(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| (Value::Int(i as i64), item.clone()))
                .collect(),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
                .collect(),
            Value::Int(_) | Value::Uint(_) => {
                let n = collection.as_i64().unwrap_or(0).max(0);
                (0..n).map(|i| (Value::Int(i), Value::Int(i))).collect()
            }
            Value::Null => Vec::new(),
            other => return Err(self.error(pos, format!("range can't iterate over {}", other))),
        };
        trace!("range over {} items at line {}", items.len(), pos.line);

        if items.is_empty() {
            let flow = match otherwise {
                Some(otherwise) => self.walk(otherwise, dot)?,
                None => Flow::Normal,
            };
            self.vars.truncate(scope);
            return Ok(flow);
        }

        for (key, item) in items {
            let iteration = self.vars.len();
            match vars {
                [elem] => self.vars.push((elem.clone(), item.clone())),
                [k, elem] => {
                    self.vars.push((k.clone(), key));
                    self.vars.push((elem.clone(), item.clone()));
                }
                _ => {}
            }
            let flow = self.walk(body, &item)?;
            self.vars.truncate(iteration);
            if matches!(flow, Flow::Break) {
                break;
            }
        }
        self.vars.truncate(scope);
        Ok(Flow::Normal)
    }

    fn call_template(&mut self, name: &str, dot: &Value, pos: &Pos) -> Result<(), ExecError> {
        let template = self.template;
        let body = template
            .defines
            .get(name)
            .ok_or_else(|| self.error(pos, format!("no such template {:?}", name)))?;
        if self.depth >= self.max_depth {
            return Err(self.error(pos, format!("exceeded maximum template depth ({})", self.max_depth)));
        }
        self.depth += 1;
        let saved = std::mem::replace(&mut self.vars, vec![(String::new(), dot.clone())]);
        let result = self.walk(body, dot);
        self.vars = saved;
        self.depth -= 1;
        result.map(|_| ())
    }

    fn pipeline(&mut self, pipe: &Pipeline, dot: &Value, pos: &Pos) -> Result<Value, ExecError> {
        let mut value = None;
        for cmd in &pipe.cmds {
            value = Some(self.command(cmd, dot, value, pos)?);
        }
        let value = value.unwrap_or(Value::Null);
        for name in &pipe.decls {
            if pipe.assign {
                if let Some(slot) = self.vars.iter_mut().rev().find(|(n, _)| n == name) {
                    slot.1 = value.clone();
                }
            } else {
                self.vars.push((name.clone(), value.clone()));
            }
        }
        Ok(value)
    }

    fn commands(&mut self, cmds: &[Command], dot: &Value, pos: &Pos) -> Result<Value, ExecError> {
        let mut value = None;
        for cmd in cmds {
            value = Some(self.command(cmd, dot, value, pos)?);
        }
        Ok(value.unwrap_or(Value::Null))
    }

    fn command(&mut self, cmd: &Command, dot: &Value, piped: Option<Value>, pos: &Pos) -> Result<Value, ExecError> {
        match cmd.args.first() {
            Some(Operand::Function(name)) => {
                let mut args = Vec::with_capacity(cmd.args.len());
                for arg in &cmd.args[1..] {
                    args.push(self.operand(arg, dot, pos)?);
                }
                args.extend(piped);
                self.call(name, &args, pos)
            }
            Some(first) => self.operand(first, dot, pos),
            None => Ok(Value::Null),
        }
    }

    fn call(&self, name: &str, args: &[Value], pos: &Pos) -> Result<Value, ExecError> {
        self.helpers
            .call(name, &self.ctx, args)
            .map_err(|err| self.error(pos, err.to_string()))
    }

    fn operand(&mut self, operand: &Operand, dot: &Value, pos: &Pos) -> Result<Value, ExecError> {
        match operand {
            Operand::Dot => Ok(dot.clone()),
            Operand::Field(chain) => self.fields(dot, chain, pos),
            Operand::Variable(name, chain) => {
                let value = self
                    .vars
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| self.error(pos, format!("undefined variable: ${}", name)))?;
                self.fields(&value, chain, pos)
            }
            Operand::Function(name) => self.call(name, &[], pos),
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Pipe(cmds, chain) => {
                let value = self.commands(cmds, dot, pos)?;
                self.fields(&value, chain, pos)
            }
        }
    }

    /// Follows field names; missing keys and nil receivers give nil.
    fn fields(&self, value: &Value, chain: &[String], pos: &Pos) -> Result<Value, ExecError> {
        let mut current = value;
        for key in chain {
            current = match current {
                Value::Map(map) => match map.get(key) {
                    Some(next) => next,
                    None => return Ok(Value::Null),
                },
                Value::Null => return Ok(Value::Null),
                other => {
                    return Err(self.error(pos, format!("can't evaluate field {} in type {}", key, other.kind())));
                }
            };
        }
        Ok(current.clone())
    }
}
