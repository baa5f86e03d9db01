//! Global Parameter Store
//!
//! Holds the workflow-wide `config:` values (reference paths, thresholds,
//! annotation and primer files). Populated once at startup and read-only
//! afterwards.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A scalar parameter value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Returns the text if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Integer(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

/// Immutable, workflow-wide parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterStore {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterStore {
    /// Freezes a set of values into a store.
    pub fn new(values: BTreeMap<String, ParamValue>) -> Self {
        debug!("Parameter store initialized with {} value(s)", values.len());
        Self { values }
    }

    /// Builds a store from declared values plus `KEY=VALUE` overrides.
    ///
    /// Overrides win over declared values and may introduce new keys. They
    /// are kept as the text given, so `007` renders as `007`.
    pub fn with_overrides(
        mut values: BTreeMap<String, ParamValue>,
        overrides: &[(String, String)],
    ) -> Self {
        for (key, raw) in overrides {
            debug!("Config override: {} = {}", key, raw);
            values.insert(key.clone(), ParamValue::Text(raw.clone()));
        }
        Self::new(values)
    }

    /// Looks up a parameter.
    pub fn get(&self, name: &str) -> Result<&ParamValue, ConfigError> {
        self.values
            .get(name)
            .ok_or_else(|| ConfigError::UnknownParameter(format!("config.{}", name)))
    }

    /// Returns true if the parameter exists.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parses a `KEY=VALUE` command-line override.
pub fn parse_override(text: &str) -> Result<(String, String), String> {
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", text))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", text));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ParameterStore {
        let mut values = BTreeMap::new();
        values.insert("reference".to_string(), ParamValue::Text("ref/genome.fa".to_string()));
        values.insert("min_quality".to_string(), ParamValue::Integer(20));
        values.insert("min_freq".to_string(), ParamValue::Float(0.03));
        ParameterStore::new(values)
    }

    #[test]
    fn test_get_known_parameter() {
        let params = store();
        assert_eq!(params.get("min_quality").unwrap(), &ParamValue::Integer(20));
        assert_eq!(params.get("reference").unwrap().to_string(), "ref/genome.fa");
        assert_eq!(params.get("min_freq").unwrap().to_string(), "0.03");
    }

    #[test]
    fn test_unknown_parameter() {
        let params = store();
        match params.get("gff") {
            Err(ConfigError::UnknownParameter(name)) => assert_eq!(name, "config.gff"),
            other => panic!("Expected UnknownParameter, got {:?}", other),
        }
    }

    #[test]
    fn test_overrides_replace_and_add() {
        let mut values = BTreeMap::new();
        values.insert("min_depth".to_string(), ParamValue::Integer(10));
        let overrides = vec![
            ("min_depth".to_string(), "20".to_string()),
            ("gff".to_string(), "ann.gff3".to_string()),
        ];

        let params = ParameterStore::with_overrides(values, &overrides);
        assert_eq!(params.get("min_depth").unwrap().to_string(), "20");
        assert_eq!(params.get("gff").unwrap().as_text(), Some("ann.gff3"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_overrides_keep_text_as_typed() {
        let overrides = vec![
            ("sample".to_string(), "007".to_string()),
            ("run".to_string(), "01".to_string()),
            ("min_freq".to_string(), "0.030".to_string()),
            ("label".to_string(), "nan".to_string()),
        ];

        let params = ParameterStore::with_overrides(BTreeMap::new(), &overrides);
        assert_eq!(params.get("sample").unwrap().to_string(), "007");
        assert_eq!(params.get("run").unwrap().to_string(), "01");
        assert_eq!(params.get("min_freq").unwrap().to_string(), "0.030");
        assert_eq!(params.get("label").unwrap().to_string(), "nan");
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(
            parse_override("min_freq=0.03").unwrap(),
            ("min_freq".to_string(), "0.03".to_string())
        );
        assert_eq!(
            parse_override("cmd=a=b").unwrap(),
            ("cmd".to_string(), "a=b".to_string())
        );
        assert!(parse_override("novalue").is_err());
        assert!(parse_override("=x").is_err());
    }

    #[test]
    fn test_deserialize_untagged_values() {
        let yaml = "a: 1\nb: 2.5\nc: true\nd: ref.fa\n";
        let values: BTreeMap<String, ParamValue> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(values["a"], ParamValue::Integer(1));
        assert_eq!(values["b"], ParamValue::Float(2.5));
        assert_eq!(values["c"], ParamValue::Bool(true));
        assert_eq!(values["d"], ParamValue::Text("ref.fa".to_string()));
    }
}
