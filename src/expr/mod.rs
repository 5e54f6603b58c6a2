//! Expression evaluation for resource templates.
//!
//! Templates embed `${...}` expressions in string leaves. Evaluation is a
//! pluggable capability behind [`ExpressionEvaluator`]: a pure, deterministic
//! function of (expression, context) with no side effects, so the synthesis
//! engine can be tested against a trivial substitute.
//!
//! The shipped implementation is minijinja with custom `${`/`}` variable
//! delimiters and strict undefined behavior. A string leaf that is exactly
//! one `${...}` expression yields the evaluated value with its type intact
//! (numbers, booleans, lists, and maps are substituted in place); mixed text
//! interpolates to a string.
//!
//! # Helpers
//!
//! - `generate_name(part, ...)` - deterministic content-hash resource name
//! - `content_hash(s)` - 8-hex-char digest of a string
//! - `omit()` - sentinel that removes the enclosing key from the document

use minijinja::syntax::SyntaxConfig;
use minijinja::value::Rest;
use minijinja::{Environment, UndefinedBehavior};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Sentinel value produced by the `omit()` helper.
///
/// The template walker removes any map entry or list element whose evaluated
/// value equals this marker. The NUL prefix keeps it out of the space of
/// values a template author could produce accidentally.
pub const OMIT_MARKER: &str = "\u{0}weaver-omit";

/// Evaluates template expressions against a context document.
///
/// Implementations must be pure: the same (expression, context) pair always
/// yields the same value, with no side effects.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate a single expression (without `${}` markers) to a typed value
    fn evaluate(&self, expr: &str, context: &serde_json::Value) -> Result<serde_json::Value>;

    /// Render a string containing zero or more `${...}` markers to a string
    fn interpolate(&self, template: &str, context: &serde_json::Value) -> Result<String>;
}

/// minijinja-backed evaluator with `${...}` expression syntax
pub struct TemplateEvaluator {
    env: Environment<'static>,
}

impl Default for TemplateEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEvaluator {
    /// Create a new evaluator with the standard helper functions registered
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        // Delimiters are static, so this cannot fail at runtime
        let syntax = SyntaxConfig::builder()
            .variable_delimiters("${", "}")
            .block_delimiters("{%", "%}")
            .comment_delimiters("{#", "#}")
            .build()
            .expect("static syntax configuration");
        env.set_syntax(syntax);

        env.add_function("generate_name", generate_name);
        env.add_function("content_hash", |s: String| short_hash(&s));
        env.add_function("omit", || OMIT_MARKER.to_string());

        Self { env }
    }
}

impl ExpressionEvaluator for TemplateEvaluator {
    fn evaluate(&self, expr: &str, context: &serde_json::Value) -> Result<serde_json::Value> {
        let compiled = self
            .env
            .compile_expression_owned(expr.to_string())
            .map_err(|e| Error::expression(format!("{expr:?}: {e}")))?;
        let value = compiled
            .eval(minijinja::Value::from_serialize(context))
            .map_err(|e| Error::expression(format!("{expr:?}: {e}")))?;
        serde_json::to_value(&value).map_err(|e| Error::serialization(e.to_string()))
    }

    fn interpolate(&self, template: &str, context: &serde_json::Value) -> Result<String> {
        self.env
            .render_str(template, minijinja::Value::from_serialize(context))
            .map_err(|e| Error::expression(format!("{template:?}: {e}")))
    }
}

/// Whether a string leaf contains any expression marker
pub fn has_expression(s: &str) -> bool {
    s.contains("${")
}

/// Whether a string leaf is exactly one `${...}` expression.
///
/// Whole expressions keep the evaluated value's type; anything else is
/// interpolated to a string.
pub fn whole_expression(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.starts_with("${") && trimmed.ends_with('}') && trimmed.matches("${").count() == 1 {
        Some(trimmed[2..trimmed.len() - 1].trim())
    } else {
        None
    }
}

/// Deterministic resource name from joined parts plus a content hash.
///
/// `generate_name("checkout-dev-a1b2c3d4", "config", "app.properties")` =>
/// `checkout-dev-a1b2c3d4-config-app.properties-<hash8>`. Re-renders with
/// identical parts are byte-identical, which is what keeps generated
/// ConfigMap references stable across passes.
fn generate_name(parts: Rest<String>) -> std::result::Result<String, minijinja::Error> {
    if parts.is_empty() {
        return Err(minijinja::Error::new(
            minijinja::ErrorKind::InvalidOperation,
            "generate_name requires at least one argument",
        ));
    }
    let joined = parts.join("-");
    Ok(format!("{}-{}", joined, short_hash(&joined)))
}

/// First 8 hex chars of the SHA-256 digest
fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..8].to_string()
}
