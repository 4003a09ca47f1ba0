//! Turns user-supplied targets into instance identifiers.
//!
//! Resolution order:
//! 1. `id:<value>` is always taken as a raw identifier.
//! 2. A bound alias wins over any shape heuristic.
//! 3. Unbound input shaped like a panel identifier (24+ hex digits or dashes)
//!    is taken as an identifier.
//! 4. Anything else is `NotFound`.

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::error::{Error, Result};
use crate::rlog_debug;
use crate::store::BindingStore;

/// Prefix that marks a raw instance identifier.
pub const ID_PREFIX: &str = "id:";

fn identifier_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| Regex::new(r"^[0-9A-Fa-f-]{24,}$").expect("valid identifier regex"))
}

/// Whether `input` looks like an opaque panel identifier rather than an alias.
pub fn looks_like_identifier(input: &str) -> bool {
    identifier_shape().is_match(input)
}

#[derive(Clone)]
pub struct TargetResolver {
    store: Arc<dyn BindingStore>,
}

impl TargetResolver {
    pub fn new(store: Arc<dyn BindingStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, input: &str) -> Result<String> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidInput("target must not be empty".into()));
        }

        if let Some(raw) = input.strip_prefix(ID_PREFIX) {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(Error::InvalidInput("empty instance id after id:".into()));
            }
            return Ok(raw.to_string());
        }

        if let Some(binding) = self.store.get(input).await? {
            rlog_debug!("Resolved alias {} -> {}", input, binding.resource_id);
            return Ok(binding.resource_id);
        }

        if looks_like_identifier(input) {
            rlog_debug!("Treating unbound {} as instance id", input);
            return Ok(input.to_string());
        }

        Err(Error::NotFound(format!("no binding for alias {}", input)))
    }
}
