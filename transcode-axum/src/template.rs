//! HTTP rule URL template parsing.
//!
//! ```text
//! Template = "/" Segments [ Verb ] ;
//! Segments = Segment { "/" Segment } ;
//! Segment  = "*" | "**" | LITERAL | Variable ;
//! Variable = "{" FieldPath [ "=" Segments ] "}" ;
//! FieldPath = IDENT { "." IDENT } ;
//! Verb     = ":" LITERAL ;
//! ```
//!
//! The parser produces an [`HttpRulePattern`]: a flat segment list with each
//! variable recorded as a range over it. Only one `**` is allowed per
//! template, and only literal segments may follow it.

use std::fmt;

use crate::error::TemplateError;

/// One segment of a parsed template.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PatternSegment {
    /// Must match the segment text exactly.
    Literal(String),
    /// `*`: matches exactly one segment.
    Wildcard,
    /// `**`: matches one or more segments.
    CatchAll,
}

/// A variable binding a range of segments to a field path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PatternVariable {
    /// Dotted field path, e.g. `book.name`.
    pub field_path: String,
    /// First segment index (inclusive).
    pub start: usize,
    /// Last segment index (exclusive).
    pub end: usize,
    /// Whether the range ends in a `**` segment.
    pub has_catch_all: bool,
}

impl PatternVariable {
    /// Number of segments the variable spans.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if the variable spans no segments.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A parsed URL template.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HttpRulePattern {
    pub segments: Vec<PatternSegment>,
    pub variables: Vec<PatternVariable>,
    pub verb: Option<String>,
}

impl HttpRulePattern {
    /// Parse a URL template.
    ///
    /// # Example
    ///
    /// ```
    /// use transcode_axum::template::{HttpRulePattern, PatternSegment};
    ///
    /// let pattern = HttpRulePattern::parse("/v1/{book.name=shelves/*/books/*}:publish").unwrap();
    /// assert_eq!(pattern.segments.len(), 5);
    /// assert_eq!(pattern.variables[0].field_path, "book.name");
    /// assert_eq!((pattern.variables[0].start, pattern.variables[0].end), (1, 5));
    /// assert_eq!(pattern.verb.as_deref(), Some("publish"));
    /// ```
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        Parser::new(template).parse()
    }

    /// The variable whose range starts at `index`, if any.
    pub fn variable_starting_at(&self, index: usize) -> Option<&PatternVariable> {
        self.variables.iter().find(|v| v.start == index)
    }

    /// Index of the `**` segment, if any.
    pub fn catch_all_index(&self) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| matches!(s, PatternSegment::CatchAll))
    }
}

impl fmt::Display for HttpRulePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            f.write_str("/")?;
        }
        let mut index = 0;
        while index < self.segments.len() {
            f.write_str("/")?;
            if let Some(variable) = self.variable_starting_at(index) {
                write!(f, "{{{}=", variable.field_path)?;
                for (offset, segment) in self.segments[variable.start..variable.end].iter().enumerate() {
                    if offset > 0 {
                        f.write_str("/")?;
                    }
                    write_segment(f, segment)?;
                }
                f.write_str("}")?;
                index = variable.end;
            } else {
                write_segment(f, &self.segments[index])?;
                index += 1;
            }
        }
        if let Some(verb) = &self.verb {
            write!(f, ":{verb}")?;
        }
        Ok(())
    }
}

fn write_segment(f: &mut fmt::Formatter<'_>, segment: &PatternSegment) -> fmt::Result {
    match segment {
        PatternSegment::Literal(literal) => f.write_str(literal),
        PatternSegment::Wildcard => f.write_str("*"),
        PatternSegment::CatchAll => f.write_str("**"),
    }
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a> {
    template: &'a str,
    input: &'a [u8],
    pos: usize,
    segments: Vec<PatternSegment>,
    variables: Vec<PatternVariable>,
}

impl<'a> Parser<'a> {
    fn new(template: &'a str) -> Self {
        Self {
            template,
            input: template.as_bytes(),
            pos: 0,
            segments: Vec::new(),
            variables: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<HttpRulePattern, TemplateError> {
        if !self.template.starts_with('/') {
            return Err(self.error("template must start with '/'"));
        }
        self.pos = 1;

        let (path_end, verb) = self.split_verb()?;

        // "/" on its own is the root path.
        if path_end > 1 || verb.is_some() {
            self.parse_segments(path_end, false)?;
        }
        if self.pos != path_end {
            return Err(self.error("unexpected character"));
        }

        self.validate_catch_all()?;

        Ok(HttpRulePattern {
            segments: self.segments,
            variables: self.variables,
            verb,
        })
    }

    /// Find a `:verb` after the last top-level `/`.
    fn split_verb(&self) -> Result<(usize, Option<String>), TemplateError> {
        let mut depth = 0usize;
        let mut colon = None;
        for (index, byte) in self.input.iter().enumerate() {
            match byte {
                b'{' => depth += 1,
                b'}' => depth = depth.saturating_sub(1),
                b'/' if depth == 0 => colon = None,
                b':' if depth == 0 && colon.is_none() => colon = Some(index),
                _ => {}
            }
        }

        match colon {
            Some(index) => {
                let verb = &self.template[index + 1..];
                if verb.is_empty() || !verb.bytes().all(is_literal_byte) {
                    return Err(TemplateError::new(self.template, index, "invalid verb"));
                }
                Ok((index, Some(verb.to_string())))
            }
            None => Ok((self.input.len(), None)),
        }
    }

    fn parse_segments(&mut self, end: usize, nested: bool) -> Result<(), TemplateError> {
        loop {
            self.parse_segment(end, nested)?;
            if self.pos < end && self.input[self.pos] == b'/' {
                self.pos += 1;
                continue;
            }
            return Ok(());
        }
    }

    fn parse_segment(&mut self, end: usize, nested: bool) -> Result<(), TemplateError> {
        if self.pos >= end {
            return Err(self.error("empty segment"));
        }

        match self.input[self.pos] {
            b'*' => {
                if self.peek(1) == Some(b'*') {
                    self.pos += 2;
                    self.segments.push(PatternSegment::CatchAll);
                } else {
                    self.pos += 1;
                    self.segments.push(PatternSegment::Wildcard);
                }
                Ok(())
            }
            b'{' if nested => Err(self.error("nested variables are not allowed")),
            b'{' => self.parse_variable(end),
            b'/' => Err(self.error("empty segment")),
            _ => {
                let start = self.pos;
                while self.pos < end && is_literal_byte(self.input[self.pos]) {
                    self.pos += 1;
                }
                if self.pos == start {
                    return Err(self.error("invalid character in literal"));
                }
                self.segments
                    .push(PatternSegment::Literal(self.template[start..self.pos].to_string()));
                Ok(())
            }
        }
    }

    fn parse_variable(&mut self, end: usize) -> Result<(), TemplateError> {
        // Skip '{'
        self.pos += 1;

        let path_start = self.pos;
        while self.pos < end && (is_ident_byte(self.input[self.pos]) || self.input[self.pos] == b'.') {
            self.pos += 1;
        }
        let field_path = &self.template[path_start..self.pos];
        if field_path.is_empty() || field_path.split('.').any(str::is_empty) {
            return Err(TemplateError::new(self.template, path_start, "invalid field path"));
        }
        let field_path = field_path.to_string();

        let start = self.segments.len();
        match self.peek(0) {
            Some(b'=') => {
                self.pos += 1;
                self.parse_segments(end, true)?;
            }
            Some(b'}') => self.segments.push(PatternSegment::Wildcard),
            _ => return Err(self.error("expected '=' or '}'")),
        }

        if self.peek(0) != Some(b'}') {
            return Err(self.error("expected '}'"));
        }
        self.pos += 1;

        let segments_end = self.segments.len();
        if self.variables.iter().any(|v| v.field_path == field_path) {
            return Err(TemplateError::new(
                self.template,
                path_start,
                "field path bound more than once",
            ));
        }
        self.variables.push(PatternVariable {
            field_path,
            start,
            end: segments_end,
            has_catch_all: self.segments[start..segments_end]
                .iter()
                .any(|s| matches!(s, PatternSegment::CatchAll)),
        });
        Ok(())
    }

    /// One `**` per template, followed only by literal segments outside any variable
    /// (or inside the variable that owns the `**`).
    fn validate_catch_all(&self) -> Result<(), TemplateError> {
        let mut catch_alls = self
            .segments
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, PatternSegment::CatchAll))
            .map(|(index, _)| index);

        let Some(first) = catch_alls.next() else {
            return Ok(());
        };
        if catch_alls.next().is_some() {
            return Err(TemplateError::new(
                self.template,
                0,
                "only one '**' is allowed per template",
            ));
        }

        let trailing_wildcard = self.segments[first + 1..]
            .iter()
            .any(|s| !matches!(s, PatternSegment::Literal(_)));
        let trailing_variable = self.variables.iter().any(|v| v.start > first);
        if trailing_wildcard || trailing_variable {
            return Err(TemplateError::new(
                self.template,
                0,
                "only literal segments may follow '**'",
            ));
        }
        Ok(())
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn error(&self, message: &'static str) -> TemplateError {
        TemplateError::new(self.template, self.pos, message)
    }
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn is_literal_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'-' | b'.' | b'_' | b'~' | b'%' | b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'+' | b',' | b';' | b'=' | b'@'
        )
}
