//! Validation of metric and label names.

use crate::error::BuildError;

/// Builds the full name of a metric out of its namespace, subsystem and name.
///
/// Empty parts are skipped, and the remaining parts are joined with underscores.
pub fn full_name(namespace: &str, subsystem: &str, name: &str) -> String {
    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

/// Checks a metric name against the `[a-zA-Z_:][a-zA-Z0-9_:]*` pattern.
pub fn check_metric_name(name: &str) -> Result<(), BuildError> {
    if name.is_empty() {
        return Err(BuildError::EmptyName);
    }

    let valid = name.chars().enumerate().all(|(i, c)| {
        if i == 0 {
            valid_metric_name_start_character(c)
        } else {
            valid_metric_name_character(c)
        }
    });

    if valid {
        Ok(())
    } else {
        Err(BuildError::InvalidMetricName(name.to_string()))
    }
}

/// Checks a set of label names.
///
/// Every name must match `[a-zA-Z_][a-zA-Z0-9_]*`, must not start with the reserved `__` prefix,
/// must not be one of `reserved`, and must appear only once.
pub fn check_label_names(names: &[String], reserved: &[&str]) -> Result<(), BuildError> {
    for (i, name) in names.iter().enumerate() {
        let valid = !name.is_empty()
            && name.chars().enumerate().all(|(i, c)| {
                if i == 0 {
                    valid_label_key_start_character(c)
                } else {
                    valid_label_key_character(c)
                }
            });
        if !valid {
            return Err(BuildError::InvalidLabelName(name.clone()));
        }

        if name.starts_with("__") || reserved.contains(&name.as_str()) {
            return Err(BuildError::ReservedLabelName(name.clone()));
        }

        if names[..i].contains(name) {
            return Err(BuildError::DuplicateLabelName(name.clone()));
        }
    }

    Ok(())
}

#[inline]
fn valid_metric_name_start_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z_:].
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

#[inline]
fn valid_metric_name_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z0-9_:].
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

#[inline]
fn valid_label_key_start_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z_].
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
fn valid_label_key_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z0-9_].
    c.is_ascii_alphanumeric() || c == '_'
}
