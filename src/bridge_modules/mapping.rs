use crate::bridge_modules::config::SensorMapping;
use crate::bridge_modules::error::ConfigError;
use crate::bridge_modules::transform::{transform_value, Transform};
use serde_json::Value;
use serde_json_path::JsonPath;

/// A sensor mapping with its JSONPath parsed once at startup.
#[derive(Debug, Clone)]
pub struct CompiledMapping {
    pub unique_id: String,
    path: JsonPath,
    transform: Transform,
}

impl CompiledMapping {
    pub fn compile(mapping: &SensorMapping) -> Result<Self, ConfigError> {
        let expression = normalize_expression(&mapping.jsonpath);
        let path = JsonPath::parse(&expression).map_err(|e| ConfigError::JsonPath {
            unique_id: mapping.unique_id.clone(),
            expression: mapping.jsonpath.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            unique_id: mapping.unique_id.clone(),
            path,
            transform: mapping.transform,
        })
    }

    /// First match in `frame`, transformed. `None` when nothing matches.
    pub fn extract(&self, frame: &Value) -> Option<Value> {
        let first = self.path.query(frame).all().first().map(|v| (*v).clone());
        transform_value(first, self.transform)
    }
}

pub fn compile_mappings(mappings: &[SensorMapping]) -> Result<Vec<CompiledMapping>, ConfigError> {
    mappings.iter().map(CompiledMapping::compile).collect()
}

/// Expressions written without a root (`params.temp`) are anchored at `$`.
pub fn normalize_expression(expression: &str) -> String {
    let expression = expression.trim();
    if expression.starts_with('$') {
        expression.to_string()
    } else if expression.starts_with('.') || expression.starts_with('[') {
        format!("${expression}")
    } else {
        format!("$.{expression}")
    }
}

/// Extracts every mapping from one frame, in declaration order.
pub fn extract_values<'a>(
    mappings: &'a [CompiledMapping],
    frame: &Value,
) -> Vec<(&'a str, Option<Value>)> {
    mappings
        .iter()
        .map(|mapping| (mapping.unique_id.as_str(), mapping.extract(frame)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(unique_id: &str, jsonpath: &str, transform: Transform) -> SensorMapping {
        SensorMapping {
            name: unique_id.to_string(),
            unique_id: unique_id.to_string(),
            jsonpath: jsonpath.to_string(),
            unit: None,
            device_class: None,
            state_class: None,
            icon: None,
            transform,
        }
    }

    #[test]
    fn test_normalize_expression() {
        assert_eq!(normalize_expression("$.a.b"), "$.a.b");
        assert_eq!(normalize_expression("a.b"), "$.a.b");
        assert_eq!(normalize_expression("..temp"), "$..temp");
        assert_eq!(normalize_expression("['nozzleTemp']"), "$['nozzleTemp']");
        assert_eq!(normalize_expression("  nozzleTemp "), "$.nozzleTemp");
    }

    #[test]
    fn test_invalid_expression_is_config_error() {
        let err = CompiledMapping::compile(&mapping("bad", "$.[[", Transform::None)).unwrap_err();
        match err {
            ConfigError::JsonPath { unique_id, .. } => assert_eq!(unique_id, "bad"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_extract_values_in_order() {
        let mappings = compile_mappings(&[
            mapping("progress", "$.printProgress", Transform::PercentToHundred),
            mapping("nozzle", "nozzleTemp", Transform::None),
            mapping("missing", "$.bedTemp", Transform::None),
            mapping("left", "$.printLeftTime", Transform::SecondsToHms),
        ])
        .unwrap();

        let frame = json!({
            "printProgress": 0.42,
            "nozzleTemp": "210.5",
            "printLeftTime": 3725
        });

        let values = extract_values(&mappings, &frame);
        assert_eq!(
            values,
            vec![
                ("progress", Some(json!(42.0))),
                ("nozzle", Some(json!("210.5"))),
                ("missing", None),
                ("left", Some(json!("01:02:05"))),
            ]
        );
    }

    #[test]
    fn test_first_match_wins() {
        let compiled =
            CompiledMapping::compile(&mapping("temp", "$..temp", Transform::None)).unwrap();
        let frame = json!({"nozzle": {"temp": 200}, "bed": {"temp": 60}});
        let value = compiled.extract(&frame);
        assert!(value == Some(json!(200)) || value == Some(json!(60)));

        let frame = json!({"list": [{"temp": 1}, {"temp": 2}]});
        let compiled =
            CompiledMapping::compile(&mapping("first", "$.list[*].temp", Transform::None))
                .unwrap();
        assert_eq!(compiled.extract(&frame), Some(json!(1)));
    }

    #[test]
    fn test_null_match_is_absent() {
        let compiled =
            CompiledMapping::compile(&mapping("state", "$.state", Transform::None)).unwrap();
        assert_eq!(compiled.extract(&json!({"state": null})), None);
    }
}
