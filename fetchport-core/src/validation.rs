//! Request validation.
//!
//! Raw trigger payloads are checked against an embedded JSON Schema before
//! deserialization, so structural problems (a non-list `inputs`, a missing
//! `configuration`) are all reported at once. Semantic checks that need the
//! typed request live in [`validate_request`] and friends.

use std::sync::OnceLock;

use jsonschema::Validator;
use serde_json::Value;

use crate::models::{ExportFormat, ExportRequest, SourceDescriptor, TaskRequest};
use crate::source::external::pagination::strip_statement_terminator;
use crate::source::http::parse_base_url;
use crate::{FetchportError, Result};

/// Embedded JSON Schema for trigger payloads
const REQUEST_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "title": "fetchport task request",
  "type": "object",
  "required": ["inputs", "configuration"],
  "properties": {
    "task_id": { "type": ["string", "null"] },
    "inputs": {
      "type": "array",
      "items": {
        "type": "object",
        "properties": {
          "column": { "type": ["integer", "null"], "minimum": 0 },
          "name": { "type": ["string", "null"] },
          "change_order": { "type": ["integer", "null"], "minimum": 0 }
        }
      }
    },
    "configuration": {
      "type": "object",
      "required": ["db_config"],
      "properties": {
        "file_type": { "type": ["string", "null"] },
        "tmp_dir": { "type": ["string", "null"] },
        "db_config": {
          "type": "object",
          "required": ["kind"],
          "properties": {
            "kind": { "enum": ["external", "embedded", "http"] }
          }
        }
      }
    }
  }
}"#;

/// Compiled request schema (initialized once)
static REQUEST_VALIDATOR: OnceLock<Validator> = OnceLock::new();

fn request_validator() -> Result<&'static Validator> {
    if let Some(validator) = REQUEST_VALIDATOR.get() {
        return Ok(validator);
    }

    let schema: Value = serde_json::from_str(REQUEST_SCHEMA).map_err(|e| {
        FetchportError::Serialization {
            context: "Failed to parse embedded request schema".to_string(),
            source: e,
        }
    })?;
    let compiled = jsonschema::validator_for(&schema).map_err(|e| {
        FetchportError::validation(format!("Request schema compilation error: {}", e))
    })?;

    Ok(REQUEST_VALIDATOR.get_or_init(|| compiled))
}

/// Checks a JSON value against the request schema, listing every violation.
///
/// # Errors
/// Returns a validation error naming each violation.
pub fn check_request_schema(value: &Value) -> Result<()> {
    let validator = request_validator()?;
    let violations: Vec<String> = validator
        .iter_errors(value)
        .map(|error| error.to_string())
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(FetchportError::validation(format!(
            "request does not match schema ({} errors): {}",
            violations.len(),
            violations.join("; ")
        )))
    }
}

/// Parses and validates a raw trigger payload.
///
/// # Errors
/// Returns a validation-kind error for malformed JSON, schema violations or
/// semantic problems (see [`validate_request`]).
pub fn parse_task_request(raw: &str) -> Result<TaskRequest> {
    let value: Value = serde_json::from_str(raw).map_err(|e| FetchportError::Serialization {
        context: "Request is not valid JSON".to_string(),
        source: e,
    })?;
    check_request_schema(&value)?;

    let request: TaskRequest =
        serde_json::from_value(value).map_err(|e| FetchportError::Serialization {
            context: "Request does not describe a task".to_string(),
            source: e,
        })?;
    validate_request(&request)?;
    Ok(request)
}

/// Semantic checks on a typed request.
///
/// # Errors
/// Returns a validation error for the first problem found.
pub fn validate_request(request: &TaskRequest) -> Result<()> {
    if let Some(task_id) = &request.task_id {
        validate_task_id(task_id)?;
    }
    validate_export(request.export.as_ref())?;
    Ok(())
}

/// Output files are keyed by task id, so it must be a plain file-name stem.
///
/// # Errors
/// Returns a validation error for blank ids and ids with path components.
pub fn validate_task_id(task_id: &str) -> Result<()> {
    if task_id.trim().is_empty() {
        return Err(FetchportError::validation("task_id cannot be empty"));
    }
    if task_id.contains(['/', '\\']) || task_id.contains("..") || task_id.contains('\0') {
        return Err(FetchportError::validation(format!(
            "task_id '{}' must not contain path separators or '..'",
            task_id
        )));
    }
    Ok(())
}

/// Resolves the export request into a format and a source.
///
/// # Errors
/// Returns a validation error when the request or its source is missing,
/// the format is unknown, or the source fails [`validate_source`].
pub fn validate_export(
    export: Option<&ExportRequest>,
) -> Result<(ExportFormat, &SourceDescriptor)> {
    let export = export.ok_or_else(|| FetchportError::validation("export request is missing"))?;
    let format = ExportFormat::resolve(export.file_type.as_deref())?;
    let source = export
        .source
        .as_ref()
        .ok_or_else(|| FetchportError::validation("source descriptor (db_config) is missing"))?;
    validate_source(source)?;

    if export
        .tmp_dir
        .as_ref()
        .is_some_and(|dir| dir.as_os_str().is_empty())
    {
        return Err(FetchportError::validation("tmp_dir cannot be empty"));
    }
    Ok((format, source))
}

/// Checks that a source descriptor can be attempted.
///
/// # Errors
/// Returns a validation error for blank query text, host or file path, and
/// for HTTP URLs that are not absolute http(s).
pub fn validate_source(source: &SourceDescriptor) -> Result<()> {
    match source {
        SourceDescriptor::External(db) => {
            if db.host.trim().is_empty() {
                return Err(FetchportError::validation("host cannot be empty"));
            }
            if db.port == 0 {
                return Err(FetchportError::validation("port must be greater than 0"));
            }
            if db.db_type.as_str().is_empty() {
                return Err(FetchportError::validation("db_type cannot be empty"));
            }
            require_query(&db.query)
        }
        SourceDescriptor::Embedded(db) => {
            if db.path.trim().is_empty() {
                return Err(FetchportError::validation("db_file_path cannot be empty"));
            }
            require_query(&db.query)
        }
        SourceDescriptor::Http(http) => parse_base_url(&http.base_url).map(|_| ()),
    }
}

fn require_query(query: &str) -> Result<()> {
    if strip_statement_terminator(query).is_empty() {
        return Err(FetchportError::validation("sql_query cannot be empty"));
    }
    Ok(())
}
