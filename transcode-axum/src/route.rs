//! Route compilation and matching.
//!
//! [`CompiledRoute::compile`] turns an [`HttpRulePattern`] into a flat list of
//! route segments the matcher can walk without backtracking:
//!
//! - A variable over one `*` (or a trailing `**`) becomes a capture named by
//!   its field path.
//! - A multi-segment variable becomes literals plus synthetic
//!   `__Complex_<path>_<index>` captures, and a [`ReconstructionAction`]
//!   that joins them back together after matching.
//! - Unbound `*` and `**` become `__Discard_<index>` captures.
//! - A `**` consumes the rest of the path. Everything after it (trailing
//!   literals and the verb) becomes a suffix constraint on the capture, and
//!   the part of that suffix outside the variable is trimmed by the action.

use std::collections::HashMap;

use crate::template::{HttpRulePattern, PatternSegment};

/// Captured route values keyed by parameter name or field path.
pub type RouteValues = HashMap<String, String>;

const COMPLEX_PREFIX: &str = "__Complex_";
const DISCARD_PREFIX: &str = "__Discard_";

/// One segment of a compiled route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteSegment {
    Literal(String),
    /// Captures exactly one non-empty segment.
    Param(String),
    /// Captures the rest of the path, which must end with `suffix`.
    /// The captured value includes the suffix.
    CatchAll { name: String, suffix: String },
}

/// A piece of a reconstructed variable value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconstructionPart {
    Literal(String),
    Capture(String),
}

/// Rebuilds one multi-segment variable from its captured pieces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconstructionAction {
    field_path: String,
    parts: Vec<ReconstructionPart>,
    trim_suffix: String,
}

impl ReconstructionAction {
    /// The dotted field path the reconstructed value is written to.
    pub fn field_path(&self) -> &str {
        &self.field_path
    }

    /// Join the parts with `/`, trim the suffix and store the result under
    /// the field path.
    pub fn apply(&self, values: &mut RouteValues) {
        let mut joined = String::new();
        for (index, part) in self.parts.iter().enumerate() {
            if index > 0 {
                joined.push('/');
            }
            match part {
                ReconstructionPart::Literal(literal) => joined.push_str(literal),
                ReconstructionPart::Capture(name) => {
                    if let Some(value) = values.get(name) {
                        joined.push_str(value);
                    }
                }
            }
        }

        if !self.trim_suffix.is_empty() && joined.ends_with(&self.trim_suffix) {
            joined.truncate(joined.len() - self.trim_suffix.len());
        }

        values.insert(self.field_path.clone(), joined);
    }
}

/// A route ready for matching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledRoute {
    path: String,
    segments: Vec<RouteSegment>,
    verb: Option<String>,
    actions: Vec<ReconstructionAction>,
}

impl CompiledRoute {
    /// Compile a parsed template.
    ///
    /// # Example
    ///
    /// ```
    /// use transcode_axum::route::CompiledRoute;
    /// use transcode_axum::template::HttpRulePattern;
    ///
    /// let pattern = HttpRulePattern::parse("/v1/{book.name=shelves/*/books/*}").unwrap();
    /// let route = CompiledRoute::compile(&pattern);
    /// assert_eq!(
    ///     route.path(),
    ///     "/v1/shelves/{__Complex_book.name_2}/books/{__Complex_book.name_4}"
    /// );
    ///
    /// let values = route.match_path("/v1/shelves/s1/books/b1").unwrap();
    /// assert_eq!(values["book.name"], "shelves/s1/books/b1");
    /// ```
    pub fn compile(pattern: &HttpRulePattern) -> Self {
        let source = &pattern.segments;
        let mut segments = Vec::with_capacity(source.len());
        let mut actions = Vec::new();
        let mut verb_absorbed = false;
        let mut index = 0;

        'segments: while index < source.len() {
            let Some(variable) = pattern.variable_starting_at(index) else {
                match &source[index] {
                    PatternSegment::Literal(literal) => {
                        segments.push(RouteSegment::Literal(literal.clone()));
                    }
                    PatternSegment::Wildcard => {
                        segments.push(RouteSegment::Param(format!("{DISCARD_PREFIX}{index}")));
                    }
                    PatternSegment::CatchAll => {
                        segments.push(RouteSegment::CatchAll {
                            name: format!("{DISCARD_PREFIX}{index}"),
                            suffix: literal_suffix(pattern, index + 1),
                        });
                        verb_absorbed = true;
                        break 'segments;
                    }
                }
                index += 1;
                continue;
            };

            let field_path = &variable.field_path;
            if variable.len() == 1 {
                match &source[index] {
                    PatternSegment::Wildcard => {
                        segments.push(RouteSegment::Param(field_path.clone()));
                        index += 1;
                        continue;
                    }
                    PatternSegment::CatchAll if literal_suffix(pattern, index + 1).is_empty() => {
                        segments.push(RouteSegment::CatchAll {
                            name: field_path.clone(),
                            suffix: String::new(),
                        });
                        verb_absorbed = true;
                        break 'segments;
                    }
                    _ => {}
                }
            }

            let mut parts = Vec::with_capacity(variable.len());
            for offset in variable.start..variable.end {
                let name = format!("{COMPLEX_PREFIX}{field_path}_{offset}");
                match &source[offset] {
                    PatternSegment::Literal(literal) => {
                        segments.push(RouteSegment::Literal(literal.clone()));
                        parts.push(ReconstructionPart::Literal(literal.clone()));
                    }
                    PatternSegment::Wildcard => {
                        segments.push(RouteSegment::Param(name.clone()));
                        parts.push(ReconstructionPart::Capture(name));
                    }
                    PatternSegment::CatchAll => {
                        segments.push(RouteSegment::CatchAll {
                            name: name.clone(),
                            suffix: literal_suffix(pattern, offset + 1),
                        });
                        parts.push(ReconstructionPart::Capture(name));
                        actions.push(ReconstructionAction {
                            field_path: field_path.clone(),
                            parts,
                            trim_suffix: literal_suffix(pattern, variable.end),
                        });
                        verb_absorbed = true;
                        break 'segments;
                    }
                }
            }

            actions.push(ReconstructionAction {
                field_path: field_path.clone(),
                parts,
                trim_suffix: String::new(),
            });
            index = variable.end;
        }

        let verb = if verb_absorbed {
            None
        } else {
            pattern.verb.clone()
        };
        let path = render(&segments, verb.as_deref());

        Self {
            path,
            segments,
            verb,
            actions,
        }
    }

    /// The rendered route, e.g. `/v1/{name}` or `/v1/{**__Discard_1}:cancel`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The compiled segments.
    pub fn segments(&self) -> &[RouteSegment] {
        &self.segments
    }

    /// The verb constraint, unless a catch-all absorbed it.
    pub fn verb(&self) -> Option<&str> {
        self.verb.as_deref()
    }

    /// Reconstruction actions, in the order they must run.
    pub fn actions(&self) -> &[ReconstructionAction] {
        &self.actions
    }

    /// Match a request path and return the captured values with all
    /// reconstruction actions applied.
    ///
    /// Captures are percent-decoded. Returns `None` if the path does not match.
    pub fn match_path(&self, path: &str) -> Option<RouteValues> {
        let mut path = path.strip_prefix('/')?;
        if let Some(verb) = &self.verb {
            path = path.strip_suffix(verb.as_str())?.strip_suffix(':')?;
        }

        let raw: Vec<&str> = if path.is_empty() {
            Vec::new()
        } else {
            path.split('/').collect()
        };

        let mut values = RouteValues::new();
        let mut index = 0;
        let mut consumed_rest = false;

        for segment in &self.segments {
            match segment {
                RouteSegment::Literal(literal) => {
                    let raw_segment = raw.get(index)?;
                    if decode(raw_segment) != *literal {
                        return None;
                    }
                    index += 1;
                }
                RouteSegment::Param(name) => {
                    let raw_segment = raw.get(index)?;
                    if raw_segment.is_empty() {
                        return None;
                    }
                    values.insert(name.clone(), decode(raw_segment));
                    index += 1;
                }
                RouteSegment::CatchAll { name, suffix } => {
                    if index >= raw.len() {
                        return None;
                    }
                    let rest = raw[index..].join("/");
                    let captured_len = rest.len().checked_sub(suffix.len())?;
                    if captured_len == 0 || !rest.ends_with(suffix.as_str()) {
                        return None;
                    }
                    if rest[..captured_len].ends_with('/') {
                        return None;
                    }
                    values.insert(name.clone(), decode(&rest));
                    consumed_rest = true;
                    break;
                }
            }
        }

        if !consumed_rest && index != raw.len() {
            return None;
        }

        for action in &self.actions {
            action.apply(&mut values);
        }
        Some(values)
    }

    /// Ordering key: routes that sort first are tried first.
    ///
    /// Verb-constrained routes come before unconstrained ones; then, segment
    /// by segment, literals before single captures before catch-alls.
    pub fn precedence(&self) -> (bool, Vec<u8>) {
        let ranks = self
            .segments
            .iter()
            .map(|segment| match segment {
                RouteSegment::Literal(_) => 0,
                RouteSegment::Param(_) => 1,
                RouteSegment::CatchAll { .. } => 2,
            })
            .collect();
        (self.verb.is_none(), ranks)
    }
}

/// `/lit/lit:verb` for the literal segments from `from` onwards.
fn literal_suffix(pattern: &HttpRulePattern, from: usize) -> String {
    let mut suffix = String::new();
    for segment in pattern.segments.iter().skip(from) {
        if let PatternSegment::Literal(literal) = segment {
            suffix.push('/');
            suffix.push_str(literal);
        }
    }
    if let Some(verb) = &pattern.verb {
        suffix.push(':');
        suffix.push_str(verb);
    }
    suffix
}

fn render(segments: &[RouteSegment], verb: Option<&str>) -> String {
    let mut path = String::new();
    for segment in segments {
        path.push('/');
        match segment {
            RouteSegment::Literal(literal) => path.push_str(literal),
            RouteSegment::Param(name) => {
                path.push('{');
                path.push_str(name);
                path.push('}');
            }
            RouteSegment::CatchAll { name, suffix } => {
                path.push_str("{**");
                path.push_str(name);
                path.push('}');
                path.push_str(suffix);
            }
        }
    }
    if path.is_empty() {
        path.push('/');
    }
    if let Some(verb) = verb {
        path.push(':');
        path.push_str(verb);
    }
    path
}

fn decode(raw: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}
