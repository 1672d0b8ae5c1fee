//! Templated strings with variable and secret placeholders.
//!
//! Grammar:
//! ```text
//! Template     ::= ( Placeholder | Text )*
//! Placeholder  ::= '{{' ws* ( SecretRef | VariableRef ) ws* '}}'
//! SecretRef    ::= 'secret:' Scheme ':' Reference
//! VariableRef  ::= Key ( '.' Key )*
//! ```
//!
//! Parsing happens once when a plan is loaded, so every templated field in the
//! data model is already a list of `Literal | Variable | Secret` segments.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use winnow::ascii::space0;
use winnow::combinator::{alt, cut_err, preceded, repeat};
use winnow::error::{StrContext, StrContextValue};
use winnow::token::{literal, take_until, take_while};
use winnow::{ModalResult, Parser};

use vigil_types::{Result, VigilError};

/// Reference to a value in the environment's variable map, by dot-path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableRef {
    pub path: String,
}

/// Reference to a secret held by the provider registered for `scheme`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretRef {
    pub scheme: String,
    pub reference: String,
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.reference)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Variable(VariableRef),
    Secret(SecretRef),
}

/// A string that may embed placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a templated string.
    pub fn parse(input: &str) -> Result<Self> {
        let mut remaining = input;
        let segments: Vec<Segment> = repeat(0.., segment)
            .parse_next(&mut remaining)
            .map_err(|e| {
                VigilError::schema(format!("template '{input}'"), format!("invalid placeholder: {e}"))
            })?;
        if !remaining.is_empty() {
            return Err(VigilError::schema(
                format!("template '{input}'"),
                format!("unparsed trailing input '{remaining}'"),
            ));
        }
        Ok(Self { segments })
    }

    /// A template holding only literal text.
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            return Self::default();
        }
        Self {
            segments: vec![Segment::Literal(text)],
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the template contains no placeholders.
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn variables(&self) -> impl Iterator<Item = &VariableRef> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(v) => Some(v),
            _ => None,
        })
    }

    pub fn secrets(&self) -> impl Iterator<Item = &SecretRef> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Secret(r) => Some(r),
            _ => None,
        })
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            match seg {
                Segment::Literal(text) => f.write_str(text)?,
                Segment::Variable(v) => write!(f, "{{{{ {} }}}}", v.path)?,
                Segment::Secret(s) => write!(f, "{{{{ secret:{} }}}}", s)?,
            }
        }
        Ok(())
    }
}

impl Serialize for Template {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Template {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Template::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

fn segment(input: &mut &str) -> ModalResult<Segment> {
    alt((placeholder, text.map(Segment::Literal))).parse_next(input)
}

/// Literal text up to the next `{{`, or the rest of the input.
fn text(input: &mut &str) -> ModalResult<String> {
    alt((take_until(1.., "{{"), take_while(1.., |_c: char| true)))
        .map(String::from)
        .parse_next(input)
}

fn placeholder(input: &mut &str) -> ModalResult<Segment> {
    let _ = literal("{{").parse_next(input)?;
    let _ = space0.parse_next(input)?;
    let seg = cut_err(alt((
        secret_ref.map(Segment::Secret),
        variable_ref.map(Segment::Variable),
    )))
    .context(StrContext::Expected(StrContextValue::Description(
        "variable path or secret:<scheme>:<ref>",
    )))
    .parse_next(input)?;
    let _ = space0.parse_next(input)?;
    let _ = cut_err(literal("}}"))
        .context(StrContext::Expected(StrContextValue::StringLiteral("}}")))
        .parse_next(input)?;
    Ok(seg)
}

fn key<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-').parse_next(input)
}

fn variable_ref(input: &mut &str) -> ModalResult<VariableRef> {
    let path = (key, repeat::<_, _, (), _, _>(0.., preceded('.', key)))
        .take()
        .parse_next(input)?;
    Ok(VariableRef {
        path: path.to_string(),
    })
}

fn secret_ref(input: &mut &str) -> ModalResult<SecretRef> {
    let _ = literal("secret:").parse_next(input)?;
    let scheme = key.parse_next(input)?;
    let _ = ':'.parse_next(input)?;
    let reference =
        take_while(1.., |c: char| !c.is_whitespace() && c != '}').parse_next(input)?;
    Ok(SecretRef {
        scheme: scheme.to_string(),
        reference: reference.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_single_literal() {
        let t = Template::parse("/api/health").unwrap();
        assert!(t.is_literal());
        assert_eq!(t.segments(), &[Segment::Literal("/api/health".into())]);
    }

    #[test]
    fn empty_string_has_no_segments() {
        let t = Template::parse("").unwrap();
        assert!(t.segments().is_empty());
        assert_eq!(t.to_string(), "");
    }

    #[test]
    fn variable_between_literals() {
        let t = Template::parse("/users/{{ account.id }}/orders").unwrap();
        assert_eq!(
            t.segments(),
            &[
                Segment::Literal("/users/".into()),
                Segment::Variable(VariableRef {
                    path: "account.id".into()
                }),
                Segment::Literal("/orders".into()),
            ]
        );
    }

    #[test]
    fn secret_reference_with_scheme() {
        let t = Template::parse("Bearer {{secret:vault:kv/app#token}}").unwrap();
        let secrets: Vec<_> = t.secrets().collect();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].scheme, "vault");
        assert_eq!(secrets[0].reference, "kv/app#token");
        assert_eq!(t.variables().count(), 0);
    }

    #[test]
    fn variable_named_secret_is_not_a_secret() {
        let t = Template::parse("{{ secret.label }}").unwrap();
        assert_eq!(t.secrets().count(), 0);
        assert_eq!(t.variables().next().unwrap().path, "secret.label");
    }

    #[test]
    fn single_brace_is_literal() {
        let t = Template::parse(r#"{"ok": true}"#).unwrap();
        assert!(t.is_literal());
        assert_eq!(t.to_string(), r#"{"ok": true}"#);
    }

    #[test]
    fn unterminated_placeholder_is_error() {
        let err = Template::parse("/x/{{ id").unwrap_err();
        assert!(matches!(err, VigilError::SchemaError { .. }));
    }

    #[test]
    fn empty_placeholder_is_error() {
        assert!(Template::parse("{{ }}").is_err());
    }

    #[test]
    fn display_normalises_spacing() {
        let t = Template::parse("{{a.b}}-{{  secret:env:TOKEN  }}").unwrap();
        assert_eq!(t.to_string(), "{{ a.b }}-{{ secret:env:TOKEN }}");
    }

    #[test]
    fn serde_uses_string_form() {
        let t: Template = serde_json::from_str("\"x={{ y }}\"").unwrap();
        assert_eq!(t.variables().next().unwrap().path, "y");
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"x={{ y }}\"");
    }

    #[test]
    fn serde_rejects_bad_placeholder() {
        let res: std::result::Result<Template, _> = serde_json::from_str("\"{{ }}\"");
        assert!(res.is_err());
    }
}
