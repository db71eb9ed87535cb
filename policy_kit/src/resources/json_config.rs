//! `json`: a JSON document read from the target, queried by dotted path.
//!
//! ```toml
//! resource = "json"
//! params = { path = "/etc/docker/daemon.json" }
//! assert = [{ property = "log-opts.max-size", op = "eq", expected = "10m" }]
//! ```
//!
//! A missing file skips the resource; a file that is not valid JSON fails
//! it. Inline documents are accepted through the `content` parameter.

use std::sync::Arc;

use super::{param, skip, ConstructError, ConstructResult, Resource, StructuredConfig};
use crate::error::AssertionError;
use crate::transport::Connection;
use crate::value::Value;

pub struct JsonConfigResource {
    source: String,
    document: Value,
}

pub fn construct(params: &Value, conn: &Arc<Connection>) -> ConstructResult {
    let inline = params.get("content");
    let (source, text) = match inline.as_str() {
        Some(content) => ("inline content".to_string(), content.to_string()),
        None => {
            let path = param(params, "path")
                .ok_or_else(|| ConstructError::Failed("json requires 'path' or 'content'".to_string()))?;
            match conn.transport().read_file(&path)? {
                Some(text) => (path, text),
                None => return Err(skip(format!("Can't find file: {}", path))),
            }
        }
    };

    let parsed: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| ConstructError::Failed(format!("unable to parse {} as JSON: {}", source, e)))?;

    Ok(Box::new(JsonConfigResource {
        source,
        document: Value::from(parsed),
    }))
}

impl StructuredConfig for JsonConfigResource {
    fn document(&self) -> &Value {
        &self.document
    }
}

impl Resource for JsonConfigResource {
    fn describe(&self) -> String {
        format!("JSON {}", self.source)
    }

    fn exists(&self) -> Result<bool, AssertionError> {
        Ok(true)
    }

    fn get(&self, property: &str) -> Result<Value, AssertionError> {
        Ok(match property {
            "params" => self.document.clone(),
            path => self.lookup(path),
        })
    }
}
