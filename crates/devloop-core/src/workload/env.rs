//! Environment variable merge and parsing

use std::collections::HashSet;

use k8s_openapi::api::core::v1::EnvVar;

use crate::error::DevError;

/// Merge `updates` into `existing`.
///
/// A name already present is overwritten in place; a new name is appended.
/// The order of `existing` is kept, so merging the same pair twice is a no-op.
pub fn merge_env(existing: &[EnvVar], updates: &[EnvVar]) -> Vec<EnvVar> {
    let mut merged = existing.to_vec();
    for update in updates {
        match merged.iter_mut().find(|e| e.name == update.name) {
            Some(slot) => *slot = update.clone(),
            None => merged.push(update.clone()),
        }
    }
    merged
}

/// Plain `name=value` variable
pub fn env_var(name: impl Into<String>, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Parse `KEY=VALUE` strings. A key given twice is rejected.
pub fn parse_env<S: AsRef<str>>(specs: &[S]) -> Result<Vec<EnvVar>, DevError> {
    let mut seen = HashSet::new();
    let mut vars = Vec::with_capacity(specs.len());
    for spec in specs {
        let spec = spec.as_ref();
        let (name, value) = spec.split_once('=').ok_or_else(|| {
            DevError::Invalid(format!("invalid env {}, expected VariableName=Value", spec))
        })?;
        if name.is_empty() {
            return Err(DevError::Invalid(format!("invalid env {}, empty name", spec)));
        }
        if !seen.insert(name) {
            return Err(DevError::Invalid(format!("multiple values found for {}", name)));
        }
        vars.push(env_var(name, value));
    }
    Ok(vars)
}
