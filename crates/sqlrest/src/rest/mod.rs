//! REST resource layer.
//!
//! Maps `/{table}` and `/{table}/{id}` requests onto compiled statements and
//! wraps results in JSON envelopes. Transport is left to the embedder: a
//! request arrives here with its query string already decoded into pairs.
//!
//! | Method | Path | Result |
//! |---|---|---|
//! | GET | `/{table}` | `{ data, count, total }` |
//! | GET | `/{table}/{id}` | `{ data }` |
//! | POST | `/{table}` | 201 `{ data }` or `{ data, count }` |
//! | PATCH | `/{table}` | `{ count }` |
//! | PUT | `/{table}/{id}` | `{ data }` |
//! | DELETE | `/{table}` | `{ count }` |
//! | DELETE | `/{table}/{id}` | `{ data }` |

mod service;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::error::{RestError, Result};

pub use service::RestService;

/// HTTP methods the resource routes answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = RestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PATCH" => Ok(Method::Patch),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(RestError::Validation(format!("Unsupported method: {}", other))),
        }
    }
}

/// One resource request.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: Method,

    /// `table` or `schema.table`.
    pub table: String,

    /// Primary key value; comma-separated for composite keys.
    pub id: Option<String>,

    /// Decoded query-string pairs, in request order.
    pub query: Vec<(String, String)>,

    pub body: Option<JsonValue>,
}

impl RestRequest {
    pub fn new(method: Method, table: impl Into<String>) -> Self {
        Self {
            method,
            table: table.into(),
            id: None,
            query: Vec::new(),
            body: None,
        }
    }

    /// Build a request from a path of the form `/{table}` or `/{table}/{id}`.
    pub fn from_path(method: Method, path: &str) -> Result<Self> {
        let mut segments = path.trim_matches('/').splitn(2, '/');
        let table = segments.next().unwrap_or_default();
        if table.is_empty() {
            return Err(RestError::Validation(format!("No table in path '{}'", path)));
        }

        let mut request = Self::new(method, table);
        if let Some(id) = segments.next() {
            if id.is_empty() || id.contains('/') {
                return Err(RestError::Validation(format!("Invalid resource path '{}'", path)));
            }
            request.id = Some(id.to_string());
        }
        Ok(request)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status code plus JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestResponse {
    pub status: u16,
    pub body: JsonValue,
}

impl RestResponse {
    pub fn ok(body: JsonValue) -> Self {
        Self { status: 200, body }
    }

    pub fn created(body: JsonValue) -> Self {
        Self { status: 201, body }
    }

    /// `{ "error": { "code", "message" } }` with the error's status.
    pub fn error(err: &RestError) -> Self {
        Self {
            status: err.status_code(),
            body: json!({
                "error": {
                    "code": err.code(),
                    "message": err.to_string(),
                }
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        let req = RestRequest::from_path(Method::Get, "/users").unwrap();
        assert_eq!(req.table, "users");
        assert_eq!(req.id, None);

        let req = RestRequest::from_path(Method::Delete, "/sales.orders/7,2/").unwrap();
        assert_eq!(req.table, "sales.orders");
        assert_eq!(req.id.as_deref(), Some("7,2"));

        assert!(RestRequest::from_path(Method::Get, "/").is_err());
        assert!(RestRequest::from_path(Method::Get, "/users/1/extra").is_err());
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
        assert!("HEAD".parse::<Method>().is_err());
    }

    #[test]
    fn test_error_response() {
        let resp = RestResponse::error(&RestError::NotFound("users/9".into()));
        assert_eq!(resp.status, 404);
        assert_eq!(resp.body["error"]["code"], "not_found");
        assert!(!resp.is_success());

        let resp = RestResponse::error(&RestError::UnsupportedOperator {
            operator: "cs".into(),
        });
        assert_eq!(resp.status, 400);
    }
}
