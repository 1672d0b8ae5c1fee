//! Pulling values out of a response for one assertion path.
//!
//! `Ok(None)` means the path selected nothing ("absent"). An `Err` means the
//! body could not be read in the declared format at all.

use std::cell::OnceCell;

use serde_json::Value;

use vigil_http::HttpResponse;
use vigil_plan::{AssertionPath, JsonPath, XmlPath};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractError {
    #[error("response body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("response body is not well-formed XML: {0}")]
    InvalidXml(String),
}

/// A response plus its JSON body, parsed at most once per node.
pub struct ResponseView<'r> {
    response: &'r HttpResponse,
    json: OnceCell<Result<Value, ExtractError>>,
}

impl<'r> ResponseView<'r> {
    pub fn new(response: &'r HttpResponse) -> Self {
        Self {
            response,
            json: OnceCell::new(),
        }
    }

    fn json(&self) -> Result<&Value, ExtractError> {
        self.json
            .get_or_init(|| {
                serde_json::from_str(&self.response.data)
                    .map_err(|e| ExtractError::InvalidJson(e.to_string()))
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn extract(&self, path: &AssertionPath) -> Result<Option<Value>, ExtractError> {
        match path {
            AssertionPath::Status => Ok(Some(Value::from(self.response.status))),
            AssertionPath::Header(name) => Ok(self
                .response
                .header(name)
                .map(|v| Value::String(v.to_string()))),
            AssertionPath::Json(p) => self.json().map(|body| extract_json(body, p)),
            AssertionPath::Xml(p) => extract_xml(&self.response.data, p),
            AssertionPath::Text(None) => Ok(Some(Value::String(self.response.data.clone()))),
            AssertionPath::Text(Some(re)) => Ok(re.captures(&self.response.data).and_then(|caps| {
                caps.get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| Value::String(m.as_str().to_string()))
            })),
        }
    }
}

fn extract_json(body: &Value, path: &JsonPath) -> Option<Value> {
    path.select(body).cloned()
}

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn extract_xml(data: &str, path: &XmlPath) -> Result<Option<Value>, ExtractError> {
    let doc =
        roxmltree::Document::parse(data).map_err(|e| ExtractError::InvalidXml(e.to_string()))?;

    let Some((first, rest)) = path.steps.split_first() else {
        return Ok(None);
    };
    let mut node = doc.root_element();
    if node.tag_name().name() != local_name(&first.name) || first.index.unwrap_or(1) != 1 {
        return Ok(None);
    }
    for step in rest {
        let position = step.index.unwrap_or(1).saturating_sub(1);
        let name = local_name(&step.name);
        let next = node
            .children()
            .filter(|c| c.is_element() && c.tag_name().name() == name)
            .nth(position);
        match next {
            Some(child) => node = child,
            None => return Ok(None),
        }
    }

    if let Some(attr) = &path.attribute {
        return Ok(node
            .attribute(local_name(attr))
            .map(|v| Value::String(v.to_string())));
    }
    let text: String = node
        .descendants()
        .filter(|d| d.is_text())
        .filter_map(|d| d.text())
        .collect();
    Ok(Some(Value::String(text.trim().to_string())))
}
