//! Case conversion, string utilities and the `print` family.

use heck::{ToKebabCase, ToLowerCamelCase, ToSnakeCase};
use uuid::Uuid;

use super::{int_arg, text_arg, Arity, HelperError, HelperRegistry};
use crate::data::Value;

const UUID_NS_NAME: &str = "docxtmpl.templates";
const DEFAULT_TRUNCATE_SUFFIX: &str = "...";

pub(super) fn register(registry: &mut HelperRegistry) {
    registry.register("upper", Arity::exact(1), |_, args| Ok(text_arg(&args[0]).to_uppercase().into()));
    registry.register("lower", Arity::exact(1), |_, args| Ok(text_arg(&args[0]).to_lowercase().into()));
    registry.register("title", Arity::exact(1), |_, args| Ok(title(&text_arg(&args[0])).into()));
    registry.register("capitalize", Arity::exact(1), |_, args| {
        Ok(capitalize(&text_arg(&args[0])).into())
    });
    registry.register("camelCase", Arity::exact(1), |_, args| {
        Ok(text_arg(&args[0]).to_lower_camel_case().into())
    });
    registry.register("snakeCase", Arity::exact(1), |_, args| {
        Ok(text_arg(&args[0]).to_snake_case().into())
    });
    registry.register("kebabCase", Arity::exact(1), |_, args| {
        Ok(text_arg(&args[0]).to_kebab_case().into())
    });

    registry.register("split", Arity::exact(2), |_, args| {
        let text = text_arg(&args[0]);
        let sep = text_arg(&args[1]);
        if text.is_empty() {
            return Ok(Value::Seq(Vec::new()));
        }
        Ok(Value::Seq(text.split(sep.as_str()).map(Value::from).collect()))
    });
    registry.register("concat", Arity::at_least(0), |_, args| Ok(concat(args)));
    registry.register("repeat", Arity::exact(2), repeat);
    registry.register("replace", Arity::exact(3), |_, args| {
        let text = text_arg(&args[0]);
        Ok(text.replace(&text_arg(&args[1]), &text_arg(&args[2])).into())
    });
    registry.register("trim", Arity::exact(1), |_, args| Ok(text_arg(&args[0]).trim().into()));
    registry.register("trimPrefix", Arity::exact(2), |_, args| {
        let text = text_arg(&args[0]);
        let prefix = text_arg(&args[1]);
        Ok(text.strip_prefix(prefix.as_str()).unwrap_or(&text).into())
    });
    registry.register("trimSuffix", Arity::exact(2), |_, args| {
        let text = text_arg(&args[0]);
        let suffix = text_arg(&args[1]);
        Ok(text.strip_suffix(suffix.as_str()).unwrap_or(&text).into())
    });

    registry.register("uuid", Arity::between(0, 1), |_, args| {
        Ok(uuid_generate(args.first().map(text_arg)).into())
    });
    registry.register("pluralize", Arity::exact(3), pluralize);
    registry.register("truncate", Arity::between(2, 3), truncate);

    registry.register("print", Arity::at_least(0), |_, args| Ok(sprint(args).into()));
    registry.register("println", Arity::at_least(0), |_, args| {
        let words: Vec<String> = args.iter().map(text_arg).collect();
        Ok(format!("{}\n", words.join(" ")).into())
    });
    registry.register("printf", Arity::at_least(1), |_, args| {
        Ok(sprintf(&text_arg(&args[0]), &args[1..]).into())
    });
    registry.register("html", Arity::at_least(1), |_, args| {
        let text = sprint(args);
        Ok(Value::Markup(html_escape::encode_quoted_attribute(&text).into_owned()))
    });
}

/// Upper-cases the first letter of every word.
fn title(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if at_word_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace() || c == '-' || c == '_';
    }
    out
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Concatenates sequences when every argument is one, text otherwise.
fn concat(args: &[Value]) -> Value {
    if !args.is_empty() && args.iter().all(|a| matches!(a, Value::Seq(_))) {
        let items = args
            .iter()
            .flat_map(|a| match a {
                Value::Seq(items) => items.clone(),
                _ => Vec::new(),
            })
            .collect();
        return Value::Seq(items);
    }
    Value::String(args.iter().map(text_arg).collect())
}

fn repeat(_: &super::HelperContext<'_>, args: &[Value]) -> Result<Value, HelperError> {
    // Accepts both `repeat "ab" 3` and `.Text | repeat 3`.
    let (text, count) = match (&args[0], &args[1]) {
        (a, b) if a.is_number() && !b.is_number() => (b, a),
        (a, b) => (a, b),
    };
    let count = int_arg("repeat", count)?;
    if count < 0 {
        return Err(HelperError::invalid("repeat", "negative repeat count"));
    }
    Ok(text_arg(text).repeat(count as usize).into())
}

fn pluralize(_: &super::HelperContext<'_>, args: &[Value]) -> Result<Value, HelperError> {
    // `pluralize n "item" "items"` or `.N | pluralize "item" "items"`.
    let (count, singular, plural) = if !args[0].is_number() && args[2].is_number() {
        (&args[2], &args[0], &args[1])
    } else {
        (&args[0], &args[1], &args[2])
    };
    let count = count
        .as_f64()
        .ok_or_else(|| HelperError::invalid("pluralize", format!("expected a number, got {}", count.kind())))?;
    let word = if count == 1.0 { singular } else { plural };
    Ok(text_arg(word).into())
}

fn truncate(_: &super::HelperContext<'_>, args: &[Value]) -> Result<Value, HelperError> {
    let (text, length) = if args.len() == 2 && args[0].is_number() && !args[1].is_number() {
        (&args[1], &args[0])
    } else {
        (&args[0], &args[1])
    };
    let length = int_arg("truncate", length)?.max(0) as usize;
    let suffix = args
        .get(2)
        .map(text_arg)
        .unwrap_or_else(|| DEFAULT_TRUNCATE_SUFFIX.to_string());
    let text = text_arg(text);
    if text.chars().count() <= length {
        return Ok(text.into());
    }
    let mut cut: String = text.chars().take(length).collect();
    cut.push_str(&suffix);
    Ok(cut.into())
}

/// Random UUID, or a name-based one when a seed is given.
pub fn uuid_generate(seed: Option<String>) -> String {
    let namespace = Uuid::new_v5(&Uuid::NAMESPACE_DNS, UUID_NS_NAME.as_bytes());
    match seed {
        Some(s) if !s.is_empty() => Uuid::new_v5(&namespace, s.as_bytes()).to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

/// Operands are joined with a space when neither side is text.
fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && arg.as_str().is_none() && args[i - 1].as_str().is_none() {
            out.push(' ');
        }
        out.push_str(&text_arg(arg));
    }
    out
}

#[derive(Default)]
struct Spec {
    minus: bool,
    plus: bool,
    space: bool,
    zero: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

impl Spec {
    fn pad(&self, body: String) -> String {
        let len = body.chars().count();
        let Some(width) = self.width.filter(|w| *w > len) else {
            return body;
        };
        let fill = width - len;
        if self.minus {
            format!("{}{}", body, " ".repeat(fill))
        } else if self.zero {
            let (sign, digits) = match body.strip_prefix(['-', '+']) {
                Some(rest) => (&body[..1], rest),
                None => ("", body.as_str()),
            };
            format!("{}{}{}", sign, "0".repeat(fill), digits)
        } else {
            format!("{}{}", " ".repeat(fill), body)
        }
    }

    fn sign(&self, negative: bool) -> &'static str {
        if negative {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        }
    }
}

/// Formats like Go's `fmt.Sprintf` for the common verbs.
pub(crate) fn sprintf(format: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut chars = format.chars().peekable();
    let mut next_arg = 0;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.minus = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '0' => spec.zero = true,
                _ => break,
            }
            chars.next();
        }
        let mut width = String::new();
        while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            width.push(d);
            chars.next();
        }
        spec.width = width.parse().ok();
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut precision = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                precision.push(d);
                chars.next();
            }
            spec.precision = Some(precision.parse().unwrap_or(0));
        }
        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = args.get(next_arg) else {
            out.push_str(&format!("%!{}(MISSING)", verb));
            continue;
        };
        next_arg += 1;
        out.push_str(&format_verb(verb, &spec, arg));
    }

    if next_arg < args.len() {
        let extra: Vec<String> = args[next_arg..]
            .iter()
            .map(|a| format!("{}={}", a.kind(), a))
            .collect();
        out.push_str(&format!("%!(EXTRA {})", extra.join(", ")));
    }
    out
}

fn format_verb(verb: char, spec: &Spec, arg: &Value) -> String {
    let bad = || format!("%!{}({}={})", verb, arg.kind(), arg);
    let body = match verb {
        'v' => text_arg(arg),
        's' => {
            let text = text_arg(arg);
            match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        'q' => match arg {
            Value::Int(_) | Value::Uint(_) => match arg.as_i64().and_then(|n| char::from_u32(n as u32)) {
                Some(c) => format!("'{}'", c),
                None => return bad(),
            },
            _ => format!("{:?}", text_arg(arg)),
        },
        'd' => match arg.as_i128() {
            Some(n) => format!("{}{}", spec.sign(n < 0), n.unsigned_abs()),
            None => return bad(),
        },
        'c' => match arg.as_i64().and_then(|n| u32::try_from(n).ok()).and_then(char::from_u32) {
            Some(c) if arg.is_number() => c.to_string(),
            _ => return bad(),
        },
        'x' | 'X' => {
            let hex = match arg {
                Value::Int(_) | Value::Uint(_) => match arg.as_i128() {
                    Some(n) => format!("{}{:x}", spec.sign(n < 0), n.unsigned_abs()),
                    None => return bad(),
                },
                Value::String(s) => s.bytes().map(|b| format!("{:02x}", b)).collect(),
                _ => return bad(),
            };
            if verb == 'X' {
                hex.to_uppercase()
            } else {
                hex
            }
        }
        'f' | 'F' | 'e' | 'g' => match arg {
            Value::Int(_) | Value::Uint(_) | Value::Float(_) => {
                let x = arg.as_f64().unwrap_or(0.0);
                let magnitude = match verb {
                    'e' => format!("{:.*e}", spec.precision.unwrap_or(6), x.abs()),
                    'g' => match spec.precision {
                        Some(p) => format!("{:.*}", p, x.abs()),
                        None => format!("{}", x.abs()),
                    },
                    _ => format!("{:.*}", spec.precision.unwrap_or(6), x.abs()),
                };
                format!("{}{}", spec.sign(x.is_sign_negative() && x != 0.0), magnitude)
            }
            _ => return bad(),
        },
        't' => match arg {
            Value::Bool(b) => b.to_string(),
            _ => return bad(),
        },
        _ => return format!("%!{}({}={})", verb, arg.kind(), arg),
    };
    spec.pad(body)
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_case_helpers() {
        assert_eq!(call("upper", &[s("abc")]).unwrap(), s("ABC"));
        assert_eq!(call("title", &[s("hello big world")]).unwrap(), s("Hello Big World"));
        assert_eq!(call("capitalize", &[s("hello world")]).unwrap(), s("Hello world"));
        assert_eq!(call("camelCase", &[s("first_name")]).unwrap(), s("firstName"));
        assert_eq!(call("snakeCase", &[s("FirstName")]).unwrap(), s("first_name"));
        assert_eq!(call("kebabCase", &[s("First Name")]).unwrap(), s("first-name"));
    }

    #[test]
    fn test_truncate_counts_runes() {
        assert_eq!(call("truncate", &[s("héllo wörld"), Value::Int(5)]).unwrap(), s("héllo..."));
        assert_eq!(call("truncate", &[s("short"), Value::Int(10)]).unwrap(), s("short"));
        assert_eq!(call("truncate", &[s("abcdef"), Value::Int(3), s("…")]).unwrap(), s("abc…"));
        assert_eq!(call("truncate", &[Value::Int(2), s("abc")]).unwrap(), s("ab..."));
    }

    #[test]
    fn test_string_utilities() {
        assert_eq!(
            call("split", &[s("a,b,c"), s(",")]).unwrap(),
            Value::Seq(vec![s("a"), s("b"), s("c")])
        );
        assert_eq!(call("concat", &[s("a"), Value::Int(1)]).unwrap(), s("a1"));
        assert_eq!(
            call("concat", &[Value::Seq(vec![s("a")]), Value::Seq(vec![s("b")])]).unwrap(),
            Value::Seq(vec![s("a"), s("b")])
        );
        assert_eq!(call("repeat", &[s("ab"), Value::Int(3)]).unwrap(), s("ababab"));
        assert_eq!(call("repeat", &[Value::Int(2), s("x")]).unwrap(), s("xx"));
        assert_eq!(call("replace", &[s("a-b-c"), s("-"), s("+")]).unwrap(), s("a+b+c"));
        assert_eq!(call("trim", &[s("  x ")]).unwrap(), s("x"));
        assert_eq!(call("trimPrefix", &[s("INV-42"), s("INV-")]).unwrap(), s("42"));
        assert_eq!(call("trimSuffix", &[s("file.docx"), s(".docx")]).unwrap(), s("file"));
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(call("pluralize", &[Value::Int(1), s("item"), s("items")]).unwrap(), s("item"));
        assert_eq!(call("pluralize", &[Value::Uint(3), s("item"), s("items")]).unwrap(), s("items"));
        assert_eq!(call("pluralize", &[s("item"), s("items"), Value::Int(1)]).unwrap(), s("item"));
    }

    #[test]
    fn test_uuid_generate() {
        let a = uuid_generate(Some("invoice-1".to_string()));
        let b = uuid_generate(Some("invoice-1".to_string()));
        assert_eq!(a, b);
        assert_eq!(a.len(), 36);
        assert_ne!(uuid_generate(None), uuid_generate(None));
    }

    #[test]
    fn test_sprintf_verbs() {
        assert_eq!(sprintf("%05.2f|%-4d|%s", &[Value::Float(3.14159), Value::Int(7), s("x")]), "03.14|7   |x");
        assert_eq!(sprintf("%q %t %x %X", &[s("hi"), Value::Bool(true), Value::Int(255), s("A")]), "\"hi\" true ff 41");
        assert_eq!(sprintf("%d%%", &[Value::Int(50)]), "50%");
        assert_eq!(sprintf("%d", &[]), "%!d(MISSING)");
        assert_eq!(sprintf("%d", &[s("x")]), "%!d(string=x)");
        assert_eq!(sprintf("%+d %c", &[Value::Int(3), Value::Int(65)]), "+3 A");
    }

    #[test]
    fn test_print_family() {
        assert_eq!(call("print", &[Value::Int(1), Value::Int(2), s("a"), s("b")]).unwrap(), s("1 2ab"));
        assert_eq!(call("println", &[s("a"), Value::Int(1)]).unwrap(), s("a 1\n"));
        assert_eq!(call("html", &[s("<b>")]).unwrap(), Value::Markup("&lt;b&gt;".to_string()));
    }

    #[test]
    fn test_truncate_multi_rune_suffix() {
        let out = call("truncate", &[s("日本語のテキスト"), Value::Int(3), s(" → 続く")]).unwrap();
        assert_eq!(out, s("日本語 → 続く"));
        assert_eq!(out.as_str().unwrap().chars().count(), 3 + " → 続く".chars().count());
    }

    proptest! {
        #[test]
        fn prop_truncate_rune_count(text in "\\PC{0,20}", n in 0i64..25, suffix in "[…→é✓]{1,4}") {
            let out = call("truncate", &[s(&text), Value::Int(n), s(&suffix)]).unwrap();
            let out = out.as_str().unwrap().to_string();
            let runes = text.chars().count();
            if runes <= n as usize {
                prop_assert_eq!(out, text);
            } else {
                prop_assert_eq!(out.chars().count(), n as usize + suffix.chars().count());
                prop_assert!(out.ends_with(&suffix));
            }
        }
    }
}
