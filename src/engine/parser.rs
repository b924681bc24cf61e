use std::collections::BTreeMap;

use super::fields::{self, FieldPath};
use super::lexer::{self, Piece, Spanned, Token};
use super::{ParseError, ParseErrorKind};
use crate::data::Value;
use crate::helpers::HelperRegistry;

const KEYWORDS: &[&str] = &[
    "if", "else", "end", "range", "with", "define", "block", "template", "break", "continue",
];

/// Where a node came from, for error messages.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pos {
    pub line: usize,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Dot,
    /// `.A.B`, relative to dot.
    Field(Vec<String>),
    /// `$x.A`; the empty name is `$`.
    Variable(String, Vec<String>),
    Function(String),
    Literal(Value),
    /// `(pipeline).A`
    Pipe(Vec<Command>, Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Command {
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pipeline {
    pub decls: Vec<String>,
    /// `=` rather than `:=`.
    pub assign: bool,
    pub cmds: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Branch {
    pub cond: Pipeline,
    pub body: Vec<Node>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Action {
        pipe: Pipeline,
        pos: Pos,
    },
    If {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Node>>,
    },
    With {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Node>>,
    },
    Range {
        /// Zero, one (element) or two (key, element) variables.
        vars: Vec<String>,
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Option<Vec<Node>>,
        pos: Pos,
    },
    Template {
        name: String,
        pipe: Option<Pipeline>,
        pos: Pos,
    },
    Break(Pos),
    Continue(Pos),
}

/// A parsed template with its named sub-templates.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    name: String,
    pub(crate) root: Vec<Node>,
    pub(crate) defines: BTreeMap<String, Vec<Node>>,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the templates declared with `define` or `block`.
    pub fn defined_templates(&self) -> impl Iterator<Item = &str> {
        self.defines.keys().map(String::as_str)
    }

    /// Data paths the template reads, in order of first use.
    pub fn field_paths(&self) -> Vec<FieldPath> {
        fields::collect(&self.root, &self.defines)
    }
}

enum Stop {
    End,
    Else(Vec<Spanned>, Pos),
    Eof,
}

#[derive(Clone, Copy, PartialEq)]
enum Block {
    If,
    With,
}

impl Block {
    fn keyword(self) -> &'static str {
        match self {
            Block::If => "if",
            Block::With => "with",
        }
    }
}

struct Parser<'a, 'h> {
    name: &'a str,
    pieces: std::vec::IntoIter<Piece<'a>>,
    helpers: &'h HelperRegistry,
    /// Variables in scope; `""` is `$`.
    vars: Vec<String>,
    range_depth: usize,
    block_depth: usize,
    defines: BTreeMap<String, Vec<Node>>,
}

pub(crate) fn parse(name: &str, src: &str, helpers: &HelperRegistry) -> Result<Template, ParseError> {
    let pieces = lexer::split(name, src)?;
    let mut parser = Parser {
        name,
        pieces: pieces.into_iter(),
        helpers,
        vars: vec![String::new()],
        range_depth: 0,
        block_depth: 0,
        defines: BTreeMap::new(),
    };
    let root = match parser.list()? {
        (nodes, Stop::Eof) => nodes,
        (_, Stop::End) => unreachable!("top-level end is reported by list"),
        (_, Stop::Else(_, pos)) => {
            return Err(parser.error(&pos, "unexpected {{else}}", ParseErrorKind::UnexpectedEnd));
        }
    };
    Ok(Template {
        name: name.to_string(),
        root,
        defines: parser.defines,
    })
}

fn is_empty_body(nodes: &[Node]) -> bool {
    nodes
        .iter()
        .all(|n| matches!(n, Node::Text(t) if t.trim().is_empty()))
}

impl<'a, 'h> Parser<'a, 'h> {
    fn error(&self, pos: &Pos, message: impl Into<String>, kind: ParseErrorKind) -> ParseError {
        ParseError {
            name: self.name.to_string(),
            line: pos.line,
            message: message.into(),
            placeholder: Some(pos.raw.clone()),
            kind,
        }
    }

    fn syntax(&self, pos: &Pos, message: impl Into<String>) -> ParseError {
        self.error(pos, message, ParseErrorKind::Syntax)
    }

    /// Parses nodes until `{{end}}`, `{{else …}}` or the end of input.
    fn list(&mut self) -> Result<(Vec<Node>, Stop), ParseError> {
        let mut nodes = Vec::new();
        while let Some(piece) = self.pieces.next() {
            let (body, line, raw) = match piece {
                Piece::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Piece::Action { body, line, raw } => (body, line, raw),
            };
            let pos = Pos {
                line,
                raw: raw.to_string(),
            };
            let tokens = lexer::tokenize(body).map_err(|m| self.syntax(&pos, m))?;
            let keyword = match tokens.first() {
                Some(Spanned {
                    token: Token::Ident(word),
                    ..
                }) if KEYWORDS.contains(&word.as_str()) => word.clone(),
                _ => String::new(),
            };
            let rest = tokens.get(1..).unwrap_or_default();

            match keyword.as_str() {
                "end" => {
                    if self.block_depth == 0 {
                        return Err(self.error(&pos, "unexpected {{end}}", ParseErrorKind::UnexpectedEnd));
                    }
                    if !rest.is_empty() {
                        return Err(self.syntax(&pos, "unexpected arguments in end"));
                    }
                    return Ok((nodes, Stop::End));
                }
                "else" => {
                    if self.block_depth == 0 {
                        return Err(self.error(&pos, "unexpected {{else}}", ParseErrorKind::UnexpectedEnd));
                    }
                    return Ok((nodes, Stop::Else(rest.to_vec(), pos)));
                }
                "if" => nodes.push(self.conditional(Block::If, rest, pos)?),
                "with" => nodes.push(self.conditional(Block::With, rest, pos)?),
                "range" => nodes.push(self.range(rest, pos)?),
                "define" => {
                    if self.block_depth > 0 {
                        return Err(self.syntax(&pos, "unexpected <define> in command"));
                    }
                    let name = self.template_name(rest, &pos, "define")?;
                    if rest.len() > 1 {
                        return Err(self.syntax(&pos, "unexpected arguments in define"));
                    }
                    self.definition(name, &pos)?;
                }
                "block" => {
                    let name = self.template_name(rest, &pos, "block")?;
                    let pipe = self.pipeline(&rest[1..], &pos, false)?;
                    self.definition(name.clone(), &pos)?;
                    nodes.push(Node::Template {
                        name,
                        pipe: Some(pipe),
                        pos,
                    });
                }
                "template" => {
                    let name = self.template_name(rest, &pos, "template")?;
                    let pipe = if rest.len() > 1 {
                        Some(self.pipeline(&rest[1..], &pos, false)?)
                    } else {
                        None
                    };
                    nodes.push(Node::Template { name, pipe, pos });
                }
                "break" | "continue" => {
                    if self.range_depth == 0 {
                        return Err(self.syntax(&pos, format!("{{{{{}}}}} outside {{{{range}}}}", keyword)));
                    }
                    if !rest.is_empty() {
                        return Err(self.syntax(&pos, format!("unexpected arguments in {}", keyword)));
                    }
                    nodes.push(if keyword == "break" {
                        Node::Break(pos)
                    } else {
                        Node::Continue(pos)
                    });
                }
                _ => {
                    let pipe = self.pipeline(&tokens, &pos, false)?;
                    if pipe.cmds.is_empty() {
                        return Err(self.syntax(&pos, "missing value for command"));
                    }
                    nodes.push(Node::Action { pipe, pos });
                }
            }
        }
        Ok((nodes, Stop::Eof))
    }

    fn unclosed(&self, pos: &Pos, keyword: &str) -> ParseError {
        self.error(
            pos,
            format!("unexpected EOF: {{{{{}}}}} is never closed", keyword),
            ParseErrorKind::UnclosedBlock,
        )
    }

    /// Body of a control structure up to its `{{end}}`; `{{else}}` is not allowed.
    fn closed_body(&mut self, pos: &Pos, keyword: &str) -> Result<Vec<Node>, ParseError> {
        match self.list()? {
            (body, Stop::End) => Ok(body),
            (_, Stop::Else(_, else_pos)) => Err(self.syntax(&else_pos, "expected end; found {{else}}")),
            (_, Stop::Eof) => Err(self.unclosed(pos, keyword)),
        }
    }

    fn conditional(&mut self, block: Block, tokens: &[Spanned], pos: Pos) -> Result<Node, ParseError> {
        let scope = self.vars.len();
        self.block_depth += 1;
        let mut branches = Vec::new();
        let mut otherwise = None;
        let mut cond_tokens = tokens.to_vec();
        let mut cond_pos = pos.clone();

        loop {
            let cond = self.pipeline(&cond_tokens, &cond_pos, false)?;
            if cond.cmds.is_empty() {
                return Err(self.syntax(&cond_pos, format!("missing value for {}", block.keyword())));
            }
            let (body, stop) = self.list()?;
            branches.push(Branch {
                cond,
                body,
                pos: cond_pos.clone(),
            });
            match stop {
                Stop::End => break,
                Stop::Eof => return Err(self.unclosed(&pos, block.keyword())),
                Stop::Else(rest, else_pos) => match rest.first().map(|s| &s.token) {
                    None => {
                        otherwise = Some(self.closed_body(&pos, block.keyword())?);
                        break;
                    }
                    Some(Token::Ident(word)) if word == block.keyword() => {
                        cond_tokens = rest[1..].to_vec();
                        cond_pos = else_pos;
                    }
                    Some(_) => return Err(self.syntax(&else_pos, "unexpected arguments in else")),
                },
            }
        }

        self.block_depth -= 1;
        self.vars.truncate(scope);
        Ok(match block {
            Block::If => Node::If { branches, otherwise },
            Block::With => Node::With { branches, otherwise },
        })
    }

    fn range(&mut self, tokens: &[Spanned], pos: Pos) -> Result<Node, ParseError> {
        let scope = self.vars.len();
        self.block_depth += 1;
        let mut pipe = self.pipeline(tokens, &pos, true)?;
        if pipe.cmds.is_empty() {
            return Err(self.syntax(&pos, "missing value for range"));
        }
        if pipe.assign {
            return Err(self.syntax(&pos, "range can only initialize variables"));
        }
        let vars = std::mem::take(&mut pipe.decls);

        self.range_depth += 1;
        let (body, stop) = self.list()?;
        self.range_depth -= 1;
        let otherwise = match stop {
            Stop::End => None,
            Stop::Eof => return Err(self.unclosed(&pos, "range")),
            Stop::Else(rest, else_pos) => {
                if !rest.is_empty() {
                    return Err(self.syntax(&else_pos, "unexpected arguments in else"));
                }
                Some(self.closed_body(&pos, "range")?)
            }
        };

        self.block_depth -= 1;
        self.vars.truncate(scope);
        Ok(Node::Range {
            vars,
            pipe,
            body,
            otherwise,
            pos,
        })
    }

    fn template_name(&self, tokens: &[Spanned], pos: &Pos, keyword: &str) -> Result<String, ParseError> {
        match tokens.first().map(|s| &s.token) {
            Some(Token::Literal(Value::String(name))) => Ok(name.clone()),
            _ => Err(self.syntax(pos, format!("{} requires a quoted template name", keyword))),
        }
    }

    /// Parses a `define`/`block` body in a fresh variable scope and records it.
    fn definition(&mut self, name: String, pos: &Pos) -> Result<(), ParseError> {
        let saved_vars = std::mem::replace(&mut self.vars, vec![String::new()]);
        let saved_range = std::mem::replace(&mut self.range_depth, 0);
        self.block_depth += 1;
        let body = self.closed_body(pos, "define");
        self.block_depth -= 1;
        self.vars = saved_vars;
        self.range_depth = saved_range;
        let body = body?;

        match self.defines.get(&name) {
            Some(existing) if !is_empty_body(existing) && !is_empty_body(&body) => {
                Err(self.syntax(pos, format!("multiple definition of template {:?}", name)))
            }
            Some(_) if is_empty_body(&body) => Ok(()),
            _ => {
                self.defines.insert(name, body);
                Ok(())
            }
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        self.vars.iter().any(|v| v == name)
    }

    fn pipeline(&mut self, tokens: &[Spanned], pos: &Pos, in_range: bool) -> Result<Pipeline, ParseError> {
        let var = |i: usize| match tokens.get(i).map(|s| &s.token) {
            Some(Token::Variable(name)) => Some(name.clone()),
            _ => None,
        };
        let op = |i: usize| match tokens.get(i).map(|s| &s.token) {
            Some(Token::Declare) => Some(false),
            Some(Token::Assign) => Some(true),
            _ => None,
        };

        let (decls, assign, start) = match (var(0), tokens.get(1).map(|s| &s.token), var(2), op(3), op(1)) {
            (Some(first), Some(Token::Comma), Some(second), Some(assign), _) => {
                if !in_range {
                    return Err(self.syntax(pos, "too many declarations in command"));
                }
                (vec![first, second], assign, 4)
            }
            (Some(first), _, _, _, Some(assign)) => (vec![first], assign, 2),
            _ => (Vec::new(), false, 0),
        };
        if assign {
            if let Some(undeclared) = decls.iter().find(|d| !self.is_declared(d)) {
                return Err(self.syntax(pos, format!("undefined variable \"${}\"", undeclared)));
            }
        }

        let mut cursor = Cursor {
            tokens: &tokens[start..],
            at: 0,
        };
        let cmds = if cursor.peek().is_none() {
            if !decls.is_empty() {
                return Err(self.syntax(pos, "missing value for command"));
            }
            Vec::new()
        } else {
            self.commands(&mut cursor, pos, false)?
        };

        if !assign {
            self.vars.extend(decls.iter().cloned());
        }
        Ok(Pipeline { decls, assign, cmds })
    }

    fn commands(&mut self, cursor: &mut Cursor<'_>, pos: &Pos, nested: bool) -> Result<Vec<Command>, ParseError> {
        let mut cmds = Vec::new();
        loop {
            let cmd = self.command(cursor, pos)?;
            if !cmds.is_empty() && !matches!(cmd.args.first(), Some(Operand::Function(_))) {
                return Err(self.syntax(
                    pos,
                    format!("non executable command in pipeline stage {}", cmds.len() + 1),
                ));
            }
            cmds.push(cmd);
            match cursor.next().map(|s| &s.token) {
                Some(Token::Pipe) => continue,
                Some(Token::RightParen) if nested => break,
                Some(Token::RightParen) => return Err(self.syntax(pos, "unexpected right paren")),
                None if nested => return Err(self.syntax(pos, "unclosed left paren")),
                None => break,
                Some(other) => return Err(self.syntax(pos, format!("unexpected {:?} in command", other))),
            }
        }
        Ok(cmds)
    }

    fn command(&mut self, cursor: &mut Cursor<'_>, pos: &Pos) -> Result<Command, ParseError> {
        let mut args = Vec::new();
        while let Some(spanned) = cursor.peek() {
            if matches!(spanned.token, Token::Pipe | Token::RightParen) {
                break;
            }
            args.push(self.operand(cursor, pos)?);
        }
        match args.first() {
            None => Err(self.syntax(pos, "missing command")),
            Some(Operand::Function(_)) => Ok(Command { args }),
            Some(_) if args.len() > 1 => Err(self.syntax(pos, "can't give argument to non-function")),
            Some(_) => Ok(Command { args }),
        }
    }

    fn operand(&mut self, cursor: &mut Cursor<'_>, pos: &Pos) -> Result<Operand, ParseError> {
        let Some(spanned) = cursor.next() else {
            return Err(self.syntax(pos, "missing operand"));
        };
        let operand = match &spanned.token {
            Token::Field(name) => {
                let mut chain = vec![name.clone()];
                chain.extend(cursor.field_chain());
                Operand::Field(chain)
            }
            Token::Dot => Operand::Dot,
            Token::Variable(name) => {
                if !self.is_declared(name) {
                    return Err(self.syntax(pos, format!("undefined variable \"${}\"", name)));
                }
                Operand::Variable(name.clone(), cursor.field_chain())
            }
            Token::Ident(name) => {
                if KEYWORDS.contains(&name.as_str()) {
                    return Err(self.syntax(pos, format!("unexpected <{}> in command", name)));
                }
                if !self.helpers.contains(name) {
                    return Err(self.error(
                        pos,
                        format!("function {:?} not defined", name),
                        ParseErrorKind::UndefinedFunction,
                    ));
                }
                Operand::Function(name.clone())
            }
            Token::Literal(value) => Operand::Literal(value.clone()),
            Token::LeftParen => {
                let inner = self.commands(cursor, pos, true)?;
                Operand::Pipe(inner, cursor.field_chain())
            }
            other => return Err(self.syntax(pos, format!("unexpected {:?} in operand", other))),
        };
        Ok(operand)
    }
}

struct Cursor<'t> {
    tokens: &'t [Spanned],
    at: usize,
}

impl<'t> Cursor<'t> {
    fn peek(&self) -> Option<&'t Spanned> {
        self.tokens.get(self.at)
    }

    fn next(&mut self) -> Option<&'t Spanned> {
        let token = self.tokens.get(self.at);
        self.at += 1;
        token
    }

    /// Unspaced `.Field` tokens directly following an operand.
    fn field_chain(&mut self) -> Vec<String> {
        let mut chain = Vec::new();
        while let Some(Spanned {
            token: Token::Field(name),
            spaced: false,
        }) = self.peek()
        {
            chain.push(name.clone());
            self.at += 1;
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_std(src: &str) -> Result<Template, ParseError> {
        parse("t", src, &HelperRegistry::standard())
    }

    #[test]
    fn test_parse_action_pipeline() {
        let template = parse_std("{{ .Name | upper | printf \"%s!\" }}").unwrap();
        match &template.root[0] {
            Node::Action { pipe, .. } => {
                assert_eq!(pipe.cmds.len(), 3);
                assert_eq!(pipe.cmds[0].args, vec![Operand::Field(vec!["Name".into()])]);
                assert_eq!(pipe.cmds[1].args, vec![Operand::Function("upper".into())]);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_if_else_if_chain() {
        let template = parse_std("{{if .A}}a{{else if .B}}b{{else}}c{{end}}").unwrap();
        match &template.root[0] {
            Node::If { branches, otherwise } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(otherwise.as_ref().map(Vec::len), Some(1));
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_range_declarations() {
        let template = parse_std("{{range $i, $e := .Items}}{{$i}}{{$e.Name}}{{end}}").unwrap();
        match &template.root[0] {
            Node::Range { vars, .. } => assert_eq!(vars, &vec!["i".to_string(), "e".to_string()]),
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_variable_scope_ends_with_block() {
        assert!(parse_std("{{with $x := .A}}{{$x}}{{end}}").is_ok());
        let err = parse_std("{{with $x := .A}}{{end}}{{$x}}").unwrap_err();
        assert_eq!(err.message, "undefined variable \"$x\"");
    }

    #[test]
    fn test_unexpected_end() {
        let err = parse_std("a{{end}}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEnd);
        assert_eq!(err.placeholder.as_deref(), Some("{{end}}"));
    }

    #[test]
    fn test_unclosed_range() {
        let err = parse_std("{{range .Items}}x").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnclosedBlock);
        assert_eq!(err.placeholder.as_deref(), Some("{{range .Items}}"));
    }

    #[test]
    fn test_break_outside_range() {
        let err = parse_std("{{if .A}}{{break}}{{end}}").unwrap_err();
        assert_eq!(err.message, "{{break}} outside {{range}}");
        assert!(parse_std("{{range .A}}{{if .B}}{{break}}{{end}}{{end}}").is_ok());
    }

    #[test]
    fn test_define_and_block() {
        let template = parse_std(r#"{{define "row"}}<{{.}}>{{end}}{{block "footer" .}}f{{end}}"#).unwrap();
        let names: Vec<&str> = template.defined_templates().collect();
        assert_eq!(names, vec!["footer", "row"]);
        assert!(parse_std(r#"{{define "a"}}x{{end}}{{define "a"}}y{{end}}"#).is_err());
    }

    #[test]
    fn test_parenthesised_pipeline_with_fields() {
        let template = parse_std("{{ (index .Items 0).Name }}").unwrap();
        match &template.root[0] {
            Node::Action { pipe, .. } => match &pipe.cmds[0].args[0] {
                Operand::Pipe(inner, chain) => {
                    assert_eq!(inner.len(), 1);
                    assert_eq!(chain, &vec!["Name".to_string()]);
                }
                other => panic!("unexpected operand {:?}", other),
            },
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_non_function_with_arguments() {
        assert!(parse_std("{{ .A .B }}").is_err());
        assert!(parse_std("{{ .A | .B }}").is_err());
    }
}
