//! Template record parsing.
//!
//! A record is one `;`-delimited, CSV-quoted line:
//!
//! ```text
//! /etc/nginx.conf.tmpl;/etc/nginx.conf;;0600;/usr/sbin/nginx -t -c {{ src }};/usr/sbin/nginx -s reload
//! 0: source         /etc/nginx.conf.tmpl
//! 1: destination    /etc/nginx.conf
//! 2: owner          empty, inherits ownership
//! 3: mode           0600
//! 4: check command  /usr/sbin/nginx -t -c {{ src }}
//! 5: reload command /usr/sbin/nginx -s reload
//! ```
//!
//! Fields 2..=5 may be omitted entirely. A field containing `;` must be
//! wrapped in double quotes; a literal quote inside a quoted field is `""`.

use crate::error::ConfigError;
use crate::types::{FileMode, KeyPrefix, Owner, TemplateSpec};

const DELIMITER: char = ';';
const QUOTE: char = '"';
const MAX_FIELDS: usize = 6;

fn record_err(record: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Record {
        record: record.to_string(),
        reason: reason.into(),
    }
}

/// Split a record into its raw fields, honouring CSV double-quote rules.
pub fn split_record(record: &str) -> Result<Vec<String>, ConfigError> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = record.chars().peekable();
    let mut at_field_start = true;

    while let Some(c) = chars.next() {
        match c {
            '\n' | '\r' => return Err(record_err(record, "record must be a single line")),
            QUOTE if at_field_start => {
                // Quoted field: read until the closing quote.
                loop {
                    match chars.next() {
                        Some(QUOTE) if chars.peek() == Some(&QUOTE) => {
                            chars.next();
                            field.push(QUOTE);
                        }
                        Some(QUOTE) => break,
                        Some(other) => field.push(other),
                        None => return Err(record_err(record, "unterminated quoted field")),
                    }
                }
                match chars.peek() {
                    None | Some(&DELIMITER) => {}
                    Some(_) => {
                        return Err(record_err(
                            record,
                            "extraneous characters after closing quote",
                        ))
                    }
                }
                at_field_start = false;
            }
            QUOTE => return Err(record_err(record, "bare quote in unquoted field")),
            DELIMITER => {
                fields.push(std::mem::take(&mut field));
                at_field_start = true;
            }
            other => {
                field.push(other);
                at_field_start = false;
            }
        }
    }
    fields.push(field);
    Ok(fields)
}

fn non_empty(field: Option<&String>) -> Option<&str> {
    field.map(String::as_str).filter(|s| !s.is_empty())
}

/// Parse one record into a [`TemplateSpec`] rooted at `prefix`.
pub fn parse_template_record(record: &str, prefix: &KeyPrefix) -> Result<TemplateSpec, ConfigError> {
    let fields = split_record(record)?;
    if fields.len() < 2 {
        return Err(record_err(
            record,
            "template record must have at least two elements (src;dst)",
        ));
    }
    if fields.len() > MAX_FIELDS {
        return Err(record_err(
            record,
            format!("expected at most {MAX_FIELDS} fields, got {}", fields.len()),
        ));
    }

    let mut spec = TemplateSpec::new(&fields[0], &fields[1])?.with_key_prefix(prefix.clone());

    if let Some(owner) = non_empty(fields.get(2)) {
        spec.owner = Some(owner.parse::<Owner>()?);
    }
    if let Some(mode) = non_empty(fields.get(3)) {
        spec.mode = Some(mode.parse::<FileMode>()?);
    }
    spec.check_command = non_empty(fields.get(4)).map(str::to_string);
    spec.reload_command = non_empty(fields.get(5)).map(str::to_string);

    Ok(spec)
}
