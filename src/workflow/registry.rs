//! Rule Registry
//!
//! Holds the rules of a workflow after their patterns have been parsed.
//! Built once at startup and only read afterwards.

use std::collections::HashMap;

use log::debug;

use crate::error::ConfigError;

use super::model::{InputSpec, Rule};
use super::params::ParamValue;
use super::template;
use super::wildcards::Pattern;

/// An input pattern with its expansion mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputPattern {
    /// Instantiated with the job's binding
    PerJob(Pattern),
    /// Instantiated over all identifiers
    Expand(Pattern),
}

/// A rule whose patterns have been checked and parsed.
#[derive(Debug, Clone)]
pub struct RegisteredRule {
    pub rule: Rule,
    pub inputs: Vec<InputPattern>,
    pub outputs: Vec<Pattern>,
    pub log: Option<Pattern>,
    pub stdout: Option<Pattern>,
    /// Wildcards a job of this rule must have values for
    pub wildcards: Vec<String>,
}

impl RegisteredRule {
    fn compile(rule: Rule) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRule {
            rule: rule.name.clone(),
            reason: reason.to_string(),
        };

        if rule.name.trim().is_empty() {
            return Err(invalid("rule has an empty name"));
        }
        if rule.tool.trim().is_empty() {
            return Err(invalid("no tool specified"));
        }

        let inputs = rule
            .input
            .iter()
            .map(|spec| {
                let pattern = Pattern::parse(spec.pattern())?;
                Ok(match spec {
                    InputSpec::Pattern(_) => InputPattern::PerJob(pattern),
                    InputSpec::Expand { .. } => InputPattern::Expand(pattern),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let outputs = rule
            .output
            .iter()
            .map(|p| Pattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        let log = rule.log.as_deref().map(Pattern::parse).transpose()?;
        let stdout = rule.stdout.as_deref().map(Pattern::parse).transpose()?;

        let mut wildcards: Vec<String> = Vec::new();
        let mut add = |name: &str| {
            if !wildcards.iter().any(|w| w == name) {
                wildcards.push(name.to_string());
            }
        };

        for input in &inputs {
            if let InputPattern::PerJob(pattern) = input {
                pattern.wildcard_names().into_iter().for_each(&mut add);
            }
        }
        for pattern in outputs.iter().chain(log.iter()).chain(stdout.iter()) {
            pattern.wildcard_names().into_iter().for_each(&mut add);
        }

        let param_templates = rule.params.values().filter_map(ParamValue::as_text);
        for text in rule.args.iter().map(String::as_str).chain(param_templates) {
            template::validate(text).map_err(|e| invalid(&e))?;
            for name in template::referenced_wildcards(text).map_err(|e| invalid(&e))? {
                add(name.as_str());
            }
        }

        Ok(Self {
            rule,
            inputs,
            outputs,
            log,
            stdout,
            wildcards,
        })
    }

    pub fn name(&self) -> &str {
        &self.rule.name
    }
}

/// Registry of all rules in a workflow, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<RegisteredRule>,
    index: HashMap<String, usize>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a list of rules.
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for rule in rules {
            registry.register(rule)?;
        }
        Ok(registry)
    }

    /// Adds a rule. Fails if the name is taken or a pattern is malformed.
    pub fn register(&mut self, rule: Rule) -> Result<(), ConfigError> {
        if self.index.contains_key(&rule.name) {
            return Err(ConfigError::DuplicateRule(rule.name));
        }

        let compiled = RegisteredRule::compile(rule)?;
        debug!(
            "Registered rule '{}' (wildcards: {:?})",
            compiled.name(),
            compiled.wildcards
        );

        self.index.insert(compiled.name().to_string(), self.rules.len());
        self.rules.push(compiled);
        Ok(())
    }

    /// Looks up a rule by name.
    pub fn get(&self, name: &str) -> Result<&RegisteredRule, ConfigError> {
        self.index
            .get(name)
            .map(|&i| &self.rules[i])
            .ok_or_else(|| ConfigError::UnknownRule(name.to_string()))
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> &[RegisteredRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let mut registry = RuleRegistry::new();
        registry
            .register(Rule::new("trim", "ivar").with_input("bam/{id}.bam"))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("trim").unwrap().name(), "trim");
    }

    #[test]
    fn test_duplicate_rule() {
        let mut registry = RuleRegistry::new();
        registry.register(Rule::new("trim", "ivar")).unwrap();

        match registry.register(Rule::new("trim", "samtools")) {
            Err(ConfigError::DuplicateRule(name)) => assert_eq!(name, "trim"),
            other => panic!("Expected DuplicateRule, got {:?}", other),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_rule() {
        let registry = RuleRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(ConfigError::UnknownRule(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_malformed_pattern_rejected() {
        let mut registry = RuleRegistry::new();
        let result = registry.register(Rule::new("bad", "ivar").with_output("out/{id.bam"));
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_empty_tool_rejected() {
        let mut registry = RuleRegistry::new();
        let result = registry.register(Rule::new("bad", "  "));
        assert!(matches!(result, Err(ConfigError::InvalidRule { .. })));
    }

    #[test]
    fn test_unresolvable_wildcard_accepted_at_registration() {
        let mut registry = RuleRegistry::new();
        let rule = Rule::new("call", "ivar")
            .with_input("trimmed/{id}.bam")
            .with_output("calls/{id}_{lane}.tsv");
        assert!(registry.register(rule).is_ok());
    }

    #[test]
    fn test_wildcard_collection() {
        let rule = Rule::new("call", "ivar")
            .with_args(&["-p", "{params.prefix}", "--tag", "{sample}"])
            .with_input("trimmed/{id}.bam")
            .with_expanded_input("all/{other}.bam")
            .with_output("calls/{id}.tsv")
            .with_log("logs/{id}_{run}.log")
            .with_param("prefix", "calls/{id}");

        let compiled = RegisteredRule::compile(rule).unwrap();
        assert_eq!(compiled.wildcards, vec!["id", "run", "sample"]);
        assert!(matches!(compiled.inputs[1], InputPattern::Expand(_)));
    }

    #[test]
    fn test_from_rules_preserves_order() {
        let registry = RuleRegistry::from_rules(vec![
            Rule::new("b", "x"),
            Rule::new("a", "x"),
        ])
        .unwrap();
        let names: Vec<&str> = registry.rules().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
