//! Safety checker capability.
//!
//! The gateway does not know any safety rules itself. It runs every
//! registered [`SafetyChecker`] in order, each under its own timeout, and
//! stops at the first unsafe verdict.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::GatewayContext;
use crate::error::SafetyError;

/// Result of one safety evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    /// Whether the call may proceed.
    pub is_safe: bool,
    /// Why the call was judged unsafe.
    #[serde(default)]
    pub reason: Option<String>,
    /// Name of the checker that produced an unsafe verdict.
    #[serde(default)]
    pub checker: Option<String>,
}

impl SafetyVerdict {
    /// A passing verdict.
    #[must_use]
    pub const fn safe() -> Self {
        Self {
            is_safe: true,
            reason: None,
            checker: None,
        }
    }

    /// A blocking verdict with a reason.
    #[must_use]
    pub fn unsafe_because(reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            reason: Some(reason.into()),
            checker: None,
        }
    }

    /// Attribute the verdict to a checker.
    #[must_use]
    pub fn from_checker(mut self, name: impl Into<String>) -> Self {
        self.checker = Some(name.into());
        self
    }
}

/// A pluggable safety evaluation.
///
/// Errors are not verdicts: the gateway's failure policy decides whether a
/// failing checker lets the call through.
#[async_trait]
pub trait SafetyChecker: Send + Sync {
    /// Name used for removal and in logs.
    fn name(&self) -> &str;

    /// Evaluate the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the checker could not reach a verdict.
    async fn check(&self, ctx: &GatewayContext) -> Result<SafetyVerdict, SafetyError>;
}

/// Blocks calls whose serialized body contains a deny-listed term.
///
/// Matching is case-insensitive substring search.
#[derive(Debug, Clone)]
pub struct KeywordChecker {
    name: String,
    terms: Vec<String>,
}

impl KeywordChecker {
    /// Create a checker named `keyword` over the given terms. Blank terms are
    /// ignored.
    #[must_use]
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            name: "keyword".to_string(),
            terms,
        }
    }

    /// Rename the checker.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The normalized deny-list.
    #[must_use]
    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

#[async_trait]
impl SafetyChecker for KeywordChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &GatewayContext) -> Result<SafetyVerdict, SafetyError> {
        let body = serde_json::to_string(&ctx.request.body)
            .map_err(|e| SafetyError::Checker {
                checker: self.name.clone(),
                reason: e.to_string(),
            })?
            .to_lowercase();

        Ok(self
            .terms
            .iter()
            .find(|term| body.contains(term.as_str()))
            .map_or_else(SafetyVerdict::safe, |term| {
                SafetyVerdict::unsafe_because(format!("request contains blocked term: {term}"))
            }))
    }
}
