//! Reference expressions embedded in resource fields.
//!
//! `ref(name)` is a structural reference to a sibling resource;
//! `ref(name.path)` is a value reference into that resource's outputs. Once
//! bound, a reference carries its qualified target: `ref(@config/t/name.path)`.
//! Bound references are rewritten back to short form before emission.
//!
//! All rewriting walks owned copies of [`Value`] trees; nothing is mutated in
//! place.

use super::types::yaml_value_to_string;
use regex::Regex;
use serde_yaml_ng::value::TaggedValue;
use serde_yaml_ng::{Mapping, Value};
use std::convert::Infallible;
use std::ops::Range;
use std::sync::LazyLock;

/// Marker that prefixes the target of a bound reference.
pub const BOUND_MARKER: char = '@';

/// Separator between scope and name in qualified names.
pub const QUALIFIED_SEPARATOR: char = '/';

static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ref\((@)?([^().\s]+)((?:\.[^().\s]+)*)\)").expect("reference pattern is valid")
});

/// A parsed reference expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Whether the target is already a qualified name.
    pub bound: bool,
    /// Resource name, or qualified name when bound.
    pub target: String,
    /// Dotted path after the target, without the leading dot.
    pub path: String,
}

impl Reference {
    pub fn new(bound: bool, target: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bound,
            target: target.into(),
            path: path.into(),
        }
    }

    /// A reference to the resource itself rather than one of its values.
    pub fn is_structural(&self) -> bool {
        self.path.is_empty()
    }

    /// Split a bound target into `(scope, name)`.
    pub fn scope_and_name(&self) -> (&str, &str) {
        match self.target.rsplit_once(QUALIFIED_SEPARATOR) {
            Some((scope, name)) => (scope, name),
            None => ("", self.target.as_str()),
        }
    }

    /// Bind to a qualified target.
    pub fn qualified(&self, qualified: &str) -> Self {
        Self::new(true, qualified, self.path.clone())
    }

    /// Unbound short form: the last segment of the target.
    pub fn short(&self) -> Self {
        Self::new(false, self.scope_and_name().1, self.path.clone())
    }

    /// Path segments.
    pub fn segments(&self) -> Vec<PathSegment> {
        parse_path(&self.path)
    }

    /// Textual form.
    pub fn render(&self) -> String {
        let marker = if self.bound { "@" } else { "" };
        if self.path.is_empty() {
            format!("ref({}{})", marker, self.target)
        } else {
            format!("ref({}{}.{})", marker, self.target, self.path)
        }
    }
}

/// One step of a reference path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parse `a.b[0].2` into segments. Bare numeric segments stay keys; lookup
/// treats them as indices when applied to a sequence.
pub fn parse_path(path: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    for part in path.split('.').filter(|p| !p.is_empty()) {
        let (key, mut rest) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            None => (part, ""),
        };
        if !key.is_empty() {
            segments.push(PathSegment::Key(key.to_string()));
        }
        while let Some(inner) = rest.strip_prefix('[') {
            let Some(close) = inner.find(']') else {
                segments.push(PathSegment::Key(rest.to_string()));
                break;
            };
            match inner[..close].parse::<usize>() {
                Ok(i) => segments.push(PathSegment::Index(i)),
                Err(_) => segments.push(PathSegment::Key(inner[..close].to_string())),
            }
            rest = &inner[close + 1..];
        }
    }
    segments
}

/// Follow `segments` into `value`.
pub fn navigate<'a>(value: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = match (segment, current) {
            (_, Value::Tagged(t)) => navigate(&t.value, std::slice::from_ref(segment))?,
            (PathSegment::Key(k), Value::Mapping(m)) => m.get(k.as_str())?,
            (PathSegment::Key(k), Value::Sequence(s)) => s.get(k.parse::<usize>().ok()?)?,
            (PathSegment::Index(i), Value::Sequence(s)) => s.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// All references in `text`, with their byte ranges.
pub fn find_references(text: &str) -> Vec<(Range<usize>, Reference)> {
    REFERENCE_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let target = caps.get(2)?.as_str();
            let path = caps.get(3).map_or("", |m| m.as_str());
            Some((
                whole.range(),
                Reference::new(
                    caps.get(1).is_some(),
                    target,
                    path.strip_prefix('.').unwrap_or(path),
                ),
            ))
        })
        .collect()
}

/// What to put in place of one reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Replacement {
    /// Leave the expression as written.
    Keep,
    /// Replace with text.
    Text(String),
    /// Replace with a value. A string consisting of exactly this reference
    /// becomes the value itself; otherwise the value is interpolated.
    Value(Value),
}

/// Rewrite every reference in `text`.
pub fn rewrite_text<E>(
    text: &str,
    f: &mut impl FnMut(&Reference) -> Result<Replacement, E>,
) -> Result<Value, E> {
    let found = find_references(text);
    if found.is_empty() {
        return Ok(Value::String(text.to_string()));
    }

    if let [(range, reference)] = found.as_slice() {
        if range.start == 0 && range.end == text.len() {
            return Ok(match f(reference)? {
                Replacement::Keep => Value::String(text.to_string()),
                Replacement::Text(s) => Value::String(s),
                Replacement::Value(v) => v,
            });
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (range, reference) in &found {
        out.push_str(&text[last..range.start]);
        match f(reference)? {
            Replacement::Keep => out.push_str(&text[range.clone()]),
            Replacement::Text(s) => out.push_str(&s),
            Replacement::Value(v) => out.push_str(&yaml_value_to_string(&v)),
        }
        last = range.end;
    }
    out.push_str(&text[last..]);
    Ok(Value::String(out))
}

/// Rewrite every reference in every string of `value`, recursing through
/// maps, lists and tags. Map keys are left untouched.
pub fn rewrite_value<E>(
    value: &Value,
    f: &mut impl FnMut(&Reference) -> Result<Replacement, E>,
) -> Result<Value, E> {
    Ok(match value {
        Value::String(s) => rewrite_text(s, f)?,
        Value::Sequence(items) => Value::Sequence(
            items
                .iter()
                .map(|item| rewrite_value(item, f))
                .collect::<Result<_, _>>()?,
        ),
        Value::Mapping(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), rewrite_value(v, f)?);
            }
            Value::Mapping(out)
        }
        Value::Tagged(tagged) => Value::Tagged(Box::new(TaggedValue {
            tag: tagged.tag.clone(),
            value: rewrite_value(&tagged.value, f)?,
        })),
        other => other.clone(),
    })
}

/// Rewrite bound references back to their short form.
pub fn clean_bound(value: &Value) -> Value {
    let result: Result<Value, Infallible> = rewrite_value(value, &mut |r: &Reference| {
        Ok(if r.bound {
            Replacement::Text(r.short().render())
        } else {
            Replacement::Keep
        })
    });
    match result {
        Ok(v) => v,
        Err(never) => match never {},
    }
}
