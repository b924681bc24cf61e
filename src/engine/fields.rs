//! Data paths referenced by a template.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::parser::{Command, Node, Operand, Pipeline};
use crate::data::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Segment {
    Key(String),
    /// Every element of a ranged-over collection.
    Each,
}

/// A path from the root of the data, e.g. `Items[].Name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Whether `data` has a value at this path.
    ///
    /// A nil counts as resolved only at the end of the path. A nil or empty
    /// collection cannot disprove the element paths below it.
    pub fn resolves_in(&self, data: &Value) -> bool {
        resolve(data, &self.segments)
    }
}

fn resolve(value: &Value, segments: &[Segment]) -> bool {
    let Some((head, rest)) = segments.split_first() else {
        return true;
    };
    match (head, value) {
        (Segment::Key(key), Value::Map(map)) => map.get(key).map_or(false, |v| resolve(v, rest)),
        (Segment::Key(_), _) => false,
        (Segment::Each, Value::Null) => true,
        (Segment::Each, Value::Seq(items)) => items.is_empty() || items.iter().any(|i| resolve(i, rest)),
        (Segment::Each, Value::Map(map)) => map.is_empty() || map.values().any(|v| resolve(v, rest)),
        (Segment::Each, Value::Int(_) | Value::Uint(_)) => rest.is_empty(),
        (Segment::Each, _) => false,
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => f.write_str(key)?,
                Segment::Key(key) => write!(f, ".{}", key)?,
                Segment::Each => f.write_str("[]")?,
            }
        }
        Ok(())
    }
}

/// Path of dot, or `None` where dot is not a data path (e.g. a helper result).
type Dot = Option<Vec<Segment>>;

struct Collector<'t> {
    paths: Vec<FieldPath>,
    seen: HashSet<FieldPath>,
    defines: &'t BTreeMap<String, Vec<Node>>,
    /// Sub-templates already walked, keyed by the dot they were called with.
    walked: HashSet<(String, Dot)>,
    /// What `$` refers to in the template being walked.
    root: Dot,
}

pub(crate) fn collect(root: &[Node], defines: &BTreeMap<String, Vec<Node>>) -> Vec<FieldPath> {
    let mut collector = Collector {
        paths: Vec::new(),
        seen: HashSet::new(),
        defines,
        walked: HashSet::new(),
        root: Some(Vec::new()),
    };
    collector.nodes(root, &Some(Vec::new()));
    collector.paths
}

fn keys(chain: &[String]) -> impl Iterator<Item = Segment> + '_ {
    chain.iter().cloned().map(Segment::Key)
}

impl Collector<'_> {
    fn record(&mut self, segments: Vec<Segment>) {
        if segments.is_empty() {
            return;
        }
        let path = FieldPath { segments };
        if self.seen.insert(path.clone()) {
            self.paths.push(path);
        }
    }

    fn nodes(&mut self, nodes: &[Node], dot: &Dot) {
        for node in nodes {
            match node {
                Node::Action { pipe, .. } => self.pipeline(pipe, dot),
                Node::If { branches, otherwise } => {
                    for branch in branches {
                        self.pipeline(&branch.cond, dot);
                        self.nodes(&branch.body, dot);
                    }
                    if let Some(otherwise) = otherwise {
                        self.nodes(otherwise, dot);
                    }
                }
                Node::With { branches, otherwise } => {
                    for branch in branches {
                        self.pipeline(&branch.cond, dot);
                        let inner = single_path(&branch.cond, dot, &self.root);
                        self.nodes(&branch.body, &inner);
                    }
                    if let Some(otherwise) = otherwise {
                        self.nodes(otherwise, dot);
                    }
                }
                Node::Range {
                    pipe, body, otherwise, ..
                } => {
                    self.pipeline(pipe, dot);
                    let element = single_path(pipe, dot, &self.root).map(|mut path| {
                        path.push(Segment::Each);
                        path
                    });
                    self.nodes(body, &element);
                    if let Some(otherwise) = otherwise {
                        self.nodes(otherwise, dot);
                    }
                }
                Node::Template { name, pipe, .. } => {
                    let callee = match pipe {
                        Some(pipe) => {
                            self.pipeline(pipe, dot);
                            single_path(pipe, dot, &self.root)
                        }
                        None => None,
                    };
                    self.sub_template(name, callee);
                }
                Node::Text(_) | Node::Break(_) | Node::Continue(_) => {}
            }
        }
    }

    /// Walks a `define` or `block` body with the dot it is called with.
    fn sub_template(&mut self, name: &str, dot: Dot) {
        let defines = self.defines;
        let Some(body) = defines.get(name) else {
            return;
        };
        if !self.walked.insert((name.to_string(), dot.clone())) {
            return;
        }
        let caller_root = std::mem::replace(&mut self.root, dot.clone());
        self.nodes(body, &dot);
        self.root = caller_root;
    }

    fn pipeline(&mut self, pipe: &Pipeline, dot: &Dot) {
        self.commands(&pipe.cmds, dot);
    }

    fn commands(&mut self, cmds: &[Command], dot: &Dot) {
        for arg in cmds.iter().flat_map(|c| &c.args) {
            match arg {
                Operand::Field(chain) => {
                    if let Some(prefix) = dot {
                        self.record(prefix.iter().cloned().chain(keys(chain)).collect());
                    }
                }
                Operand::Variable(name, chain) if name.is_empty() => {
                    if let Some(root) = &self.root {
                        self.record(root.iter().cloned().chain(keys(chain)).collect());
                    }
                }
                Operand::Pipe(inner, _) => self.commands(inner, dot),
                _ => {}
            }
        }
    }
}

/// The data path a single-operand pipeline evaluates to.
fn single_path(pipe: &Pipeline, dot: &Dot, root: &Dot) -> Dot {
    let [Command { args }] = pipe.cmds.as_slice() else {
        return None;
    };
    match args.as_slice() {
        [Operand::Field(chain)] => dot.as_ref().map(|prefix| prefix.iter().cloned().chain(keys(chain)).collect()),
        [Operand::Variable(name, chain)] if name.is_empty() => {
            root.as_ref().map(|prefix| prefix.iter().cloned().chain(keys(chain)).collect())
        }
        [Operand::Dot] => dot.clone(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::TemplateEngine;
    use crate::data::Value;

    fn paths(src: &str) -> Vec<String> {
        TemplateEngine::new()
            .parse("t", src)
            .unwrap()
            .field_paths()
            .iter()
            .map(|p| p.to_string())
            .collect()
    }

    #[test]
    fn test_paths_prefixed_by_range_and_with() {
        assert_eq!(
            paths("{{.Title}}{{range .Items}}{{.Name}}{{$.Currency}}{{end}}{{with .Customer}}{{.Email}}{{end}}"),
            vec!["Title", "Items", "Items[].Name", "Currency", "Customer", "Customer.Email"]
        );
    }

    #[test]
    fn test_helper_results_are_not_paths() {
        assert_eq!(paths("{{range split .Csv \",\"}}{{.X}}{{end}}"), vec!["Csv"]);
    }

    #[test]
    fn test_resolution() {
        let data = Value::from(serde_json::json!({
            "Items": [{"Name": "a"}],
            "Empty": [],
            "Customer": null
        }));
        let engine = TemplateEngine::new();
        let template = engine
            .parse("t", "{{range .Items}}{{.Name}}{{.Price}}{{end}}{{range .Empty}}{{.X}}{{end}}{{.Customer.Email}}{{.Missing}}")
            .unwrap();
        let unresolved: Vec<String> = template
            .field_paths()
            .iter()
            .filter(|p| !p.resolves_in(&data))
            .map(|p| p.to_string())
            .collect();
        assert_eq!(unresolved, vec!["Items[].Price", "Customer.Email", "Missing"]);
    }

    #[test]
    fn test_nil_resolves_only_at_the_end() {
        let data = Value::from(serde_json::json!({"Customer": null, "Lines": null}));
        let engine = TemplateEngine::new();
        let template = engine
            .parse("t", "{{.Customer}}{{.Customer.Email}}{{range .Lines}}{{.Qty}}{{end}}")
            .unwrap();
        let resolved: Vec<(String, bool)> = template
            .field_paths()
            .iter()
            .map(|p| (p.to_string(), p.resolves_in(&data)))
            .collect();
        assert_eq!(
            resolved,
            vec![
                ("Customer".to_string(), true),
                ("Customer.Email".to_string(), false),
                ("Lines".to_string(), true),
                ("Lines[].Qty".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_paths_inside_sub_templates() {
        assert_eq!(
            paths(r#"{{define "row"}}{{.Name}}{{$.Code}}{{end}}{{range .Items}}{{template "row" .}}{{end}}{{block "foot" .Summary}}{{.Total}}{{end}}"#),
            vec!["Items", "Items[].Name", "Items[].Code", "Summary", "Summary.Total"]
        );
    }
}
