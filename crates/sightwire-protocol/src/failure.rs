//! Typed failures with stable codes and templated messages.
//!
//! A [`Failure`] is what an application sees when the broker refuses a
//! request or the client refuses to send one. It carries:
//!
//! - a [`FailureCategory`] to branch on,
//! - a stable code such as `CWLNC0218` to match on,
//! - a readable message built from a positional template,
//! - the broker's return code, when one caused it.

use std::fmt;

use crate::{FailureCategory, ProtocolError, ReturnCode};

/// Code for values that cannot be encoded.
pub const MESSAGE_FORMAT_CODE: &str = "CWLNC0034";

/// A categorized failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Failure {
    category: FailureCategory,
    code: &'static str,
    message: String,
    return_code: Option<ReturnCode>,
}

impl Failure {
    /// Builds a failure from a template such as `"destination {0} is full"`.
    pub fn new(
        category: FailureCategory,
        code: &'static str,
        template: &str,
        args: &[&dyn fmt::Display],
    ) -> Self {
        Self {
            category,
            code,
            message: format_template(template, args),
            return_code: None,
        }
    }

    /// Builds a failure caused by a broker return code.
    ///
    /// The category always comes from [`ReturnCode::category`].
    pub fn from_return_code(
        rc: ReturnCode,
        code: &'static str,
        template: &str,
        args: &[&dyn fmt::Display],
    ) -> Self {
        Self {
            category: rc.category().unwrap_or(FailureCategory::Generic),
            code,
            message: format_template(template, args),
            return_code: Some(rc),
        }
    }

    /// Records the return code without changing the category.
    pub fn with_return_code(mut self, rc: ReturnCode) -> Self {
        self.return_code = Some(rc);
        self
    }

    pub fn category(&self) -> FailureCategory {
        self.category
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The broker return code behind this failure, if any.
    pub fn return_code(&self) -> Option<ReturnCode> {
        self.return_code
    }
}

impl From<ProtocolError> for Failure {
    fn from(err: ProtocolError) -> Self {
        Self::new(
            FailureCategory::MessageFormat,
            MESSAGE_FORMAT_CODE,
            "The request could not be encoded: {0}.",
            &[&err],
        )
    }
}

/// Replaces `{n}` placeholders with the matching argument.
///
/// Placeholders without a matching argument, and braces that do not form a
/// placeholder, are kept as written.
pub fn format_template(template: &str, args: &[&dyn fmt::Display]) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let closes = digits > 0 && after.as_bytes().get(digits) == Some(&b'}');
        let arg = closes
            .then(|| after[..digits].parse::<usize>().ok())
            .flatten()
            .and_then(|index| args.get(index));
        match arg {
            Some(arg) => {
                out.push_str(&arg.to_string());
                rest = &after[digits + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
