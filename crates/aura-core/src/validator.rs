//! Manifest validation: hard errors block registration, warnings are advisory.

use crate::error::ValidationError;
use crate::registry::{missing_required_fields, WidgetManifest};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static KEBAB_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("valid kebab-case regex"));
static SNAKE_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9]*(_[a-z0-9]+)*$").expect("valid snake_case regex"));

/// Result of [`validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Checks a manifest without registering it.
pub fn validate(manifest: &WidgetManifest) -> ValidationReport {
    let errors: Vec<String> = missing_required_fields(manifest)
        .into_iter()
        .map(|field| format!("missing required field: {field}"))
        .collect();

    let mut warnings = Vec::new();
    if !manifest.id.is_empty() && !KEBAB_CASE.is_match(&manifest.id) {
        warnings.push(format!("id '{}' should be kebab-case", manifest.id));
    }
    if manifest.meta.default_width.is_some_and(|w| !(w > 0.0 && w.is_finite()))
        || manifest.meta.default_height.is_some_and(|h| !(h > 0.0 && h.is_finite()))
    {
        warnings.push("meta default size should be positive".to_string());
    }

    match &manifest.discovery {
        None => warnings.push("no discovery block; widget will not be suggested".to_string()),
        Some(discovery) => {
            if discovery.keywords.iter().all(|k| k.trim().is_empty()) {
                warnings.push("discovery has no keywords".to_string());
            }
            if discovery.category.as_deref().map_or(true, |c| c.trim().is_empty()) {
                warnings.push("discovery has no category".to_string());
            }
            if let Some(p) = discovery.priority {
                if p > 100 {
                    warnings.push(format!("discovery priority {p} is outside 0..=100"));
                }
            }
        }
    }

    if let Some(state) = &manifest.state {
        if state.collection.trim().is_empty() || state.document.trim().is_empty() {
            warnings.push("state schema needs both collection and document".to_string());
        }
    }

    for tool in &manifest.tools {
        if !SNAKE_CASE.is_match(&tool.name) {
            warnings.push(format!("tool '{}' should be snake_case", tool.name));
        }
        if tool.description.trim().is_empty() {
            warnings.push(format!("tool '{}' has no description", tool.name));
        }
        warnings.extend(check_input_schema(&tool.name, &tool.input_schema));
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Like [`validate`], but turns a failing report into a [`ValidationError`].
pub fn validate_or_throw(manifest: &WidgetManifest) -> Result<ValidationReport, ValidationError> {
    let missing = missing_required_fields(manifest);
    if !missing.is_empty() {
        return Err(ValidationError::new(manifest.id.clone(), missing));
    }
    Ok(validate(manifest))
}

fn check_input_schema(tool: &str, schema: &serde_json::Value) -> Vec<String> {
    let mut warnings = Vec::new();
    if schema.is_null() {
        return warnings;
    }
    let Some(obj) = schema.as_object() else {
        warnings.push(format!("tool '{tool}' input schema must be an object"));
        return warnings;
    };
    if obj.get("type").and_then(|t| t.as_str()) != Some("object") {
        warnings.push(format!("tool '{tool}' input schema type should be \"object\""));
    }
    let properties = obj.get("properties").and_then(|p| p.as_object());
    if properties.is_none() {
        warnings.push(format!("tool '{tool}' input schema has no properties"));
    }
    if let Some(required) = obj.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|r| r.as_str()) {
            if !properties.is_some_and(|p| p.contains_key(name)) {
                warnings.push(format!("tool '{tool}' requires undeclared property '{name}'"));
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ToolSpec, WidgetMeta};
    use serde_json::json;

    fn complete() -> WidgetManifest {
        WidgetManifest::new("weather", WidgetMeta::new("Weather", "☀", "Forecast"))
            .with_discovery(&["weather", "forecast"], Some("info"), Some(60))
    }

    #[test]
    fn complete_manifest_has_no_findings() {
        let report = validate(&complete());
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn missing_component_is_an_error() {
        let mut m = complete();
        m.renderer = None;
        let report = validate(&m);
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["missing required field: component".to_string()]);
        let err = validate_or_throw(&m).unwrap_err();
        assert_eq!(err.missing, vec!["component".to_string()]);
    }

    #[test]
    fn style_issues_are_warnings_only() {
        let m = WidgetManifest::new("WeatherWidget", WidgetMeta::new("Weather", "☀", "Forecast"))
            .with_discovery(&[], None, Some(150))
            .with_tool(ToolSpec {
                name: "getForecast".into(),
                description: String::new(),
                input_schema: json!({"type": "object", "properties": {"city": {}}, "required": ["city", "days"]}),
            });
        let report = validate_or_throw(&m).unwrap();
        assert!(report.valid);
        let text = report.warnings.join("\n");
        assert!(text.contains("kebab-case"));
        assert!(text.contains("no keywords"));
        assert!(text.contains("no category"));
        assert!(text.contains("outside 0..=100"));
        assert!(text.contains("snake_case"));
        assert!(text.contains("no description"));
        assert!(text.contains("undeclared property 'days'"));
        assert!(!text.contains("'city'"));
    }

    #[test]
    fn missing_discovery_warns() {
        let m = WidgetManifest::new("timer", WidgetMeta::new("Timer", "⏱", "Countdown"));
        let report = validate(&m);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }
}
