use std::collections::HashMap;

use serde_json::{Map, Value};

/// Shapes the verified claim set before it is exposed to handlers.
///
/// The default policy passes claims through untouched. A renaming policy maps
/// source claim names to the names handlers should see and drops everything
/// that is not mapped, e.g. `{"sub": "subject", "email": "email"}`. Shaping
/// never fails; rejecting claims is an authorization concern that belongs
/// downstream.
#[derive(Debug, Clone, Default)]
pub struct ClaimsPolicy {
    mapping: Option<HashMap<String, String>>,
}

impl ClaimsPolicy {
    /// Pass-through policy.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Policy that exposes exactly the mapped claims, renamed. Sources
    /// missing from the claim set come through as `null`.
    pub fn renaming(mapping: HashMap<String, String>) -> Self {
        Self {
            mapping: Some(mapping),
        }
    }

    pub fn process(&self, claims: Map<String, Value>) -> Map<String, Value> {
        match &self.mapping {
            None => claims,
            Some(mapping) => mapping
                .iter()
                .map(|(source, exposed)| {
                    (
                        exposed.clone(),
                        claims.get(source).cloned().unwrap_or(Value::Null),
                    )
                })
                .collect(),
        }
    }
}
