//! Text templates with embedded macro calls.
//!
//! A template is plain text with `<%= expr %>` tags. Expressions are macro
//! calls with positional and keyword arguments, literals, `:symbols` and
//! `[lists]`. Rendering hands every call to a [`MacroHost`]; the renderer
//! itself knows nothing about jobs or responses.

use std::collections::BTreeMap;

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use serde_json::Value;
use thiserror::Error;

use crate::macros::MacroError;

#[derive(Parser)]
#[grammar = "template/template.pest"]
struct TemplateParser;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template syntax error:\n{0}")]
    Syntax(Box<pest::error::Error<Rule>>),

    #[error(transparent)]
    Macro(#[from] MacroError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Output(Expr),
}

/// Evaluated arguments of one macro call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Arguments {
    pub positional: Vec<Value>,
    pub keyword: BTreeMap<String, Value>,
}

impl Arguments {
    /// Keyword argument `name`, falling back to positional slot `index`.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.keyword.get(name).or_else(|| self.positional.get(index))
    }
}

/// Whatever resolves macro calls during rendering.
pub trait MacroHost {
    fn call(&self, name: &str, args: Arguments) -> Result<Value, MacroError>;
}

pub fn parse(source: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut pairs = TemplateParser::parse(Rule::template, source)
        .map_err(|e| TemplateError::Syntax(Box::new(e)))?;

    let Some(template) = pairs.next() else {
        return Ok(vec![]);
    };

    let mut segments = vec![];
    for pair in template.into_inner() {
        match pair.as_rule() {
            Rule::text => segments.push(Segment::Text(pair.as_str().to_string())),
            Rule::escaped_open => segments.push(Segment::Text("<%".to_string())),
            Rule::output_tag => {
                if let Some(expr) = pair.into_inner().find(|p| p.as_rule() == Rule::expr) {
                    segments.push(Segment::Output(build_expr(expr)));
                }
            }
            _ => {}
        }
    }

    Ok(segments)
}

/// Parses and renders `source` in one go.
pub fn render(source: &str, host: &dyn MacroHost) -> Result<String, TemplateError> {
    let segments = parse(source)?;
    let mut out = String::with_capacity(source.len());

    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(&text),
            Segment::Output(expr) => out.push_str(&to_text(&eval(&expr, host)?)),
        }
    }

    Ok(out)
}

pub fn eval(expr: &Expr, host: &dyn MacroHost) -> Result<Value, MacroError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, host))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Call { name, args, kwargs } => {
            let mut arguments = Arguments::default();
            for arg in args {
                arguments.positional.push(eval(arg, host)?);
            }
            for (key, arg) in kwargs {
                arguments.keyword.insert(key.clone(), eval(arg, host)?);
            }
            host.call(name, arguments)
        }
    }
}

/// How a macro result is spliced into the surrounding text.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

// The grammar guarantees the shape of every pair below, so missing children
// fall back to nil instead of erroring.
fn build_expr(pair: Pair<Rule>) -> Expr {
    match pair.as_rule() {
        Rule::expr => pair
            .into_inner()
            .next()
            .map(build_expr)
            .unwrap_or(Expr::Literal(Value::Null)),
        Rule::list => Expr::List(pair.into_inner().map(build_expr).collect()),
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = inner.next().map(|p| p.as_str().to_string()).unwrap_or_default();
            let mut args = vec![];
            let mut kwargs = vec![];

            if let Some(arg_list) = inner.next() {
                for arg in arg_list.into_inner() {
                    match arg.as_rule() {
                        Rule::kwarg => {
                            let mut kv = arg.into_inner();
                            let key = kv.next().map(|p| p.as_str().to_string()).unwrap_or_default();
                            let value = kv.next().map(build_expr).unwrap_or(Expr::Literal(Value::Null));
                            kwargs.push((key, value));
                        }
                        _ => args.push(build_expr(arg)),
                    }
                }
            }

            Expr::Call { name, args, kwargs }
        }
        Rule::string => {
            let quoted = pair.into_inner().next();
            let raw = quoted
                .and_then(|q| q.into_inner().next())
                .map(|p| p.as_str())
                .unwrap_or_default();
            Expr::Literal(Value::String(unescape(raw)))
        }
        Rule::symbol => {
            let name = pair.into_inner().next().map(|p| p.as_str()).unwrap_or_default();
            Expr::Literal(Value::String(name.to_string()))
        }
        Rule::number => {
            let text = pair.as_str();
            let value = text
                .parse::<i64>()
                .map(Value::from)
                .or_else(|_| text.parse::<f64>().map(Value::from))
                .unwrap_or(Value::Null);
            Expr::Literal(value)
        }
        Rule::boolean => Expr::Literal(Value::Bool(pair.as_str() == "true")),
        _ => Expr::Literal(Value::Null),
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    out
}
