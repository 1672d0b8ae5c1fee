//! Assertion path syntax for each response format.
//!
//! - JSON: `$.items[0].id`, `$['odd key']`. Indexes are 0-based.
//! - XML: `/root/child[2]/leaf/@attr`. Indexes are 1-based, as in XPath.
//! - Text: a regular expression; `.` or an empty path selects the whole body.
//!
//! Any format also accepts `status` and `header:<name>`.

use std::fmt;

use regex::Regex;
use winnow::ascii::digit1;
use winnow::combinator::{alt, delimited, opt, preceded, repeat};
use winnow::error::{ContextError, ErrMode};
use winnow::token::take_while;
use winnow::{ModalResult, Parser};

use vigil_types::{Result, VigilError};

use crate::model::ResponseFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonPath {
    pub segments: Vec<JsonSegment>,
}

impl JsonPath {
    pub fn parse(input: &str) -> Result<Self> {
        json_path
            .parse(input.trim())
            .map(|segments| Self { segments })
            .map_err(|e| path_error(input, e))
    }

    /// Walk `value` along this path; `None` when any segment is missing.
    pub fn select<'v>(&self, value: &'v serde_json::Value) -> Option<&'v serde_json::Value> {
        self.segments.iter().try_fold(value, |current, seg| match seg {
            JsonSegment::Key(k) => current.get(k.as_str()),
            JsonSegment::Index(i) => current.get(*i),
        })
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for seg in &self.segments {
            match seg {
                JsonSegment::Key(k) if is_ident(k) => write!(f, ".{k}")?,
                JsonSegment::Key(k) => write!(f, "['{k}']")?,
                JsonSegment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlStep {
    pub name: String,
    /// 1-based position among same-named siblings.
    pub index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlPath {
    pub steps: Vec<XmlStep>,
    pub attribute: Option<String>,
}

impl XmlPath {
    pub fn parse(input: &str) -> Result<Self> {
        let (steps, attribute) = xml_path
            .parse(input.trim())
            .map_err(|e| path_error(input, e))?;
        if steps.iter().any(|s| s.index == Some(0)) {
            return Err(VigilError::schema(
                format!("path '{input}'"),
                "XML indexes start at 1",
            ));
        }
        Ok(Self { steps, attribute })
    }
}

/// A parsed assertion path, ready for extraction.
#[derive(Debug, Clone)]
pub enum AssertionPath {
    Status,
    Header(String),
    Json(JsonPath),
    Xml(XmlPath),
    /// `None` selects the whole body.
    Text(Option<Regex>),
}

impl AssertionPath {
    pub fn parse(format: ResponseFormat, path: &str) -> Result<Self> {
        let trimmed = path.trim();
        if trimmed == "status" {
            return Ok(AssertionPath::Status);
        }
        if let Some(name) = trimmed.strip_prefix("header:") {
            let name = name.trim();
            if name.is_empty() {
                return Err(VigilError::schema(
                    format!("path '{path}'"),
                    "header name is empty",
                ));
            }
            return Ok(AssertionPath::Header(name.to_ascii_lowercase()));
        }
        match format {
            ResponseFormat::Json => JsonPath::parse(trimmed).map(AssertionPath::Json),
            ResponseFormat::Xml => XmlPath::parse(trimmed).map(AssertionPath::Xml),
            ResponseFormat::Text => {
                if trimmed.is_empty() || trimmed == "." {
                    return Ok(AssertionPath::Text(None));
                }
                Regex::new(path)
                    .map(|re| AssertionPath::Text(Some(re)))
                    .map_err(|e| VigilError::schema(format!("path '{path}'"), e.to_string()))
            }
        }
    }
}

fn path_error(input: &str, e: impl fmt::Display) -> VigilError {
    VigilError::schema(format!("path '{input}'"), format!("invalid syntax: {e}"))
}

fn is_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_ident_char)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., is_ident_char).parse_next(input)
}

fn index(input: &mut &str) -> ModalResult<usize> {
    let digits: &str = digit1.parse_next(input)?;
    digits
        .parse()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))
}

fn json_path(input: &mut &str) -> ModalResult<Vec<JsonSegment>> {
    let first = alt((
        '$'.value(None),
        ident.map(|k: &str| Some(JsonSegment::Key(k.to_string()))),
    ))
    .parse_next(input)?;
    let rest: Vec<JsonSegment> = repeat(0.., json_segment).parse_next(input)?;
    Ok(first.into_iter().chain(rest).collect())
}

fn json_segment(input: &mut &str) -> ModalResult<JsonSegment> {
    alt((
        preceded('.', ident).map(|k: &str| JsonSegment::Key(k.to_string())),
        delimited('[', index, ']').map(JsonSegment::Index),
        delimited("['", take_while(0.., |c: char| c != '\''), "']")
            .map(|k: &str| JsonSegment::Key(k.to_string())),
        delimited("[\"", take_while(0.., |c: char| c != '"'), "\"]")
            .map(|k: &str| JsonSegment::Key(k.to_string())),
    ))
    .parse_next(input)
}

fn xml_name<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| is_ident_char(c) || c == ':' || c == '.').parse_next(input)
}

fn xml_step(input: &mut &str) -> ModalResult<XmlStep> {
    let name = xml_name.parse_next(input)?;
    let index = opt(delimited('[', index, ']')).parse_next(input)?;
    Ok(XmlStep {
        name: name.to_string(),
        index,
    })
}

fn xml_path(input: &mut &str) -> ModalResult<(Vec<XmlStep>, Option<String>)> {
    let steps: Vec<XmlStep> = repeat(1.., preceded('/', xml_step)).parse_next(input)?;
    let attribute = opt(preceded("/@", xml_name)).parse_next(input)?;
    Ok((steps, attribute.map(String::from)))
}
