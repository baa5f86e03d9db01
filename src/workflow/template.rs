//! Command Templates
//!
//! Renders a rule's argument templates into a concrete argument list for one
//! job. Supported placeholders:
//!
//! | placeholder          | value                                   |
//! |----------------------|-----------------------------------------|
//! | `{input}`            | all inputs                              |
//! | `{input[N]}`         | the N-th input                          |
//! | `{output}`           | all outputs                             |
//! | `{output[N]}`        | the N-th output                         |
//! | `{params.NAME}`      | a rendered rule parameter               |
//! | `{config.NAME}`      | a global parameter                      |
//! | `{threads}`          | the rule's thread count                 |
//! | `{log}`              | the job's log path                      |
//! | `{wildcards.NAME}`   | a wildcard value (also plain `{NAME}`)  |
//!
//! An argument consisting of exactly `{input}` or `{output}` becomes one
//! argument per path. Everywhere else lists are joined with spaces.
//! Arguments are never re-split, so values cannot inject extra arguments.

use std::collections::BTreeMap;

use crate::error::ConfigError;

use super::params::ParameterStore;
use super::wildcards::{is_valid_name, tokenize, Binding, Segment};

/// A parsed placeholder key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Inputs,
    Input(usize),
    Outputs,
    Output(usize),
    Param(String),
    Config(String),
    Threads,
    Log,
    Wildcard(String),
}

impl Placeholder {
    /// Parses the text between braces.
    pub fn parse(key: &str) -> Result<Self, String> {
        let indexed = |prefix: &str| -> Option<Result<usize, String>> {
            let rest = key.strip_prefix(prefix)?.strip_prefix('[')?;
            let digits = rest.strip_suffix(']')?;
            Some(
                digits
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| format!("invalid index in '{{{}}}'", key)),
            )
        };

        match key {
            "input" => return Ok(Placeholder::Inputs),
            "output" => return Ok(Placeholder::Outputs),
            "threads" => return Ok(Placeholder::Threads),
            "log" => return Ok(Placeholder::Log),
            _ => {}
        }

        if let Some(index) = indexed("input") {
            return index.map(Placeholder::Input);
        }
        if let Some(index) = indexed("output") {
            return index.map(Placeholder::Output);
        }

        let named = |prefix: &str| key.strip_prefix(prefix).filter(|n| is_valid_name(n));
        if let Some(name) = named("params.") {
            return Ok(Placeholder::Param(name.to_string()));
        }
        if let Some(name) = named("config.") {
            return Ok(Placeholder::Config(name.to_string()));
        }
        if let Some(name) = named("wildcards.") {
            return Ok(Placeholder::Wildcard(name.to_string()));
        }
        if is_valid_name(key) {
            return Ok(Placeholder::Wildcard(key.to_string()));
        }

        Err(format!("unrecognized placeholder '{{{}}}'", key))
    }
}

/// Wildcard names referenced by a template.
pub fn referenced_wildcards(template: &str) -> Result<Vec<String>, String> {
    let mut names = Vec::new();
    for segment in tokenize(template)? {
        if let Segment::Placeholder(key) = segment {
            if let Placeholder::Wildcard(name) = Placeholder::parse(&key)? {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }
    Ok(names)
}

/// Checks that a template is syntactically valid.
pub fn validate(template: &str) -> Result<(), String> {
    for segment in tokenize(template)? {
        if let Segment::Placeholder(key) = segment {
            Placeholder::parse(&key)?;
        }
    }
    Ok(())
}

/// Everything a template may refer to for one job.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub rule: &'a str,
    pub inputs: &'a [String],
    pub outputs: &'a [String],
    pub params: &'a BTreeMap<String, String>,
    pub config: &'a ParameterStore,
    pub binding: &'a Binding,
    pub threads: usize,
    pub log: Option<&'a str>,
}

impl<'a> TemplateContext<'a> {
    fn invalid(&self, reason: String) -> ConfigError {
        ConfigError::InvalidRule {
            rule: self.rule.to_string(),
            reason,
        }
    }

    fn indexed(&self, paths: &[String], index: usize, what: &str) -> Result<String, ConfigError> {
        paths.get(index).cloned().ok_or_else(|| {
            self.invalid(format!(
                "{{{}[{}]}} is out of range ({} {}s)",
                what,
                index,
                paths.len(),
                what
            ))
        })
    }

    /// Resolves a single placeholder to text.
    fn resolve(&self, placeholder: &Placeholder) -> Result<String, ConfigError> {
        match placeholder {
            Placeholder::Inputs => Ok(self.inputs.join(" ")),
            Placeholder::Outputs => Ok(self.outputs.join(" ")),
            Placeholder::Input(i) => self.indexed(self.inputs, *i, "input"),
            Placeholder::Output(i) => self.indexed(self.outputs, *i, "output"),
            Placeholder::Param(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownParameter(format!("params.{}", name))),
            Placeholder::Config(name) => Ok(self.config.get(name)?.to_string()),
            Placeholder::Threads => Ok(self.threads.to_string()),
            Placeholder::Log => self
                .log
                .map(str::to_string)
                .ok_or_else(|| self.invalid("{log} used but the rule declares no log".to_string())),
            Placeholder::Wildcard(name) => {
                self.binding
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnboundWildcard {
                        context: format!("rule '{}'", self.rule),
                        wildcard: name.clone(),
                    })
            }
        }
    }

    /// Renders one template to a single string.
    pub fn render(&self, template: &str) -> Result<String, ConfigError> {
        let segments = tokenize(template).map_err(|e| self.invalid(e))?;
        let mut out = String::with_capacity(template.len());
        for segment in segments {
            match segment {
                Segment::Literal(text) => out.push_str(&text),
                Segment::Placeholder(key) => {
                    let placeholder = Placeholder::parse(&key).map_err(|e| self.invalid(e))?;
                    out.push_str(&self.resolve(&placeholder)?);
                }
            }
        }
        Ok(out)
    }

    /// Renders an argument list, expanding bare `{input}`/`{output}` into
    /// one argument per path.
    pub fn render_args(&self, templates: &[String]) -> Result<Vec<String>, ConfigError> {
        let mut args = Vec::with_capacity(templates.len());
        for template in templates {
            match template.trim() {
                "{input}" => args.extend(self.inputs.iter().cloned()),
                "{output}" => args.extend(self.outputs.iter().cloned()),
                _ => args.push(self.render(template)?),
            }
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::params::ParamValue;

    struct Fixture {
        inputs: Vec<String>,
        outputs: Vec<String>,
        params: BTreeMap<String, String>,
        config: ParameterStore,
        binding: Binding,
    }

    impl Fixture {
        fn new() -> Self {
            let mut config = BTreeMap::new();
            config.insert("reference".to_string(), ParamValue::Text("ref.fa".to_string()));
            config.insert("min_quality".to_string(), ParamValue::Integer(20));

            let mut params = BTreeMap::new();
            params.insert("prefix".to_string(), "calls/s1".to_string());

            let mut binding = Binding::new();
            binding.insert("id".to_string(), "s1".to_string());

            Self {
                inputs: vec!["a.bam".to_string(), "b.bam".to_string()],
                outputs: vec!["out.tsv".to_string()],
                params,
                config: ParameterStore::new(config),
                binding,
            }
        }

        fn ctx(&self) -> TemplateContext<'_> {
            TemplateContext {
                rule: "call",
                inputs: &self.inputs,
                outputs: &self.outputs,
                params: &self.params,
                config: &self.config,
                binding: &self.binding,
                threads: 4,
                log: Some("logs/s1.log"),
            }
        }
    }

    #[test]
    fn test_placeholder_parse() {
        assert_eq!(Placeholder::parse("input").unwrap(), Placeholder::Inputs);
        assert_eq!(Placeholder::parse("input[1]").unwrap(), Placeholder::Input(1));
        assert_eq!(Placeholder::parse("output[0]").unwrap(), Placeholder::Output(0));
        assert_eq!(
            Placeholder::parse("params.prefix").unwrap(),
            Placeholder::Param("prefix".to_string())
        );
        assert_eq!(
            Placeholder::parse("config.reference").unwrap(),
            Placeholder::Config("reference".to_string())
        );
        assert_eq!(
            Placeholder::parse("wildcards.id").unwrap(),
            Placeholder::Wildcard("id".to_string())
        );
        assert_eq!(Placeholder::parse("id").unwrap(), Placeholder::Wildcard("id".to_string()));
        assert!(Placeholder::parse("input[x]").is_err());
        assert!(Placeholder::parse("params.").is_err());
        assert!(Placeholder::parse("a b").is_err());
    }

    #[test]
    fn test_render_embedded_values() {
        let fixture = Fixture::new();
        let ctx = fixture.ctx();
        assert_eq!(ctx.render("--ref={config.reference}").unwrap(), "--ref=ref.fa");
        assert_eq!(ctx.render("-q{config.min_quality}").unwrap(), "-q20");
        assert_eq!(ctx.render("{params.prefix}.vcf").unwrap(), "calls/s1.vcf");
        assert_eq!(ctx.render("{id}_{threads}").unwrap(), "s1_4");
        assert_eq!(ctx.render("{input[1]}").unwrap(), "b.bam");
        assert_eq!(ctx.render("files: {input}").unwrap(), "files: a.bam b.bam");
        assert_eq!(ctx.render("{log}").unwrap(), "logs/s1.log");
    }

    #[test]
    fn test_render_args_expands_bare_lists() {
        let fixture = Fixture::new();
        let args = vec![
            "merge".to_string(),
            "{input}".to_string(),
            "-o".to_string(),
            "{output}".to_string(),
        ];
        let rendered = fixture.ctx().render_args(&args).unwrap();
        assert_eq!(rendered, vec!["merge", "a.bam", "b.bam", "-o", "out.tsv"]);
    }

    #[test]
    fn test_render_does_not_split_values() {
        let mut fixture = Fixture::new();
        fixture
            .params
            .insert("evil".to_string(), "x; rm -rf /".to_string());
        let rendered = fixture
            .ctx()
            .render_args(&["{params.evil}".to_string()])
            .unwrap();
        assert_eq!(rendered, vec!["x; rm -rf /"]);
    }

    #[test]
    fn test_render_errors() {
        let fixture = Fixture::new();
        let ctx = fixture.ctx();

        assert!(matches!(
            ctx.render("{config.gff}"),
            Err(ConfigError::UnknownParameter(name)) if name == "config.gff"
        ));
        assert!(matches!(
            ctx.render("{params.missing}"),
            Err(ConfigError::UnknownParameter(name)) if name == "params.missing"
        ));
        assert!(matches!(
            ctx.render("{lane}"),
            Err(ConfigError::UnboundWildcard { wildcard, .. }) if wildcard == "lane"
        ));
        assert!(matches!(
            ctx.render("{output[3]}"),
            Err(ConfigError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_referenced_wildcards() {
        let names = referenced_wildcards("{id}/{wildcards.lane}_{input}_{config.x}_{id}").unwrap();
        assert_eq!(names, vec!["id", "lane"]);
    }

    #[test]
    fn test_validate() {
        assert!(validate("{input[0]} {params.p} {{literal}}").is_ok());
        assert!(validate("{input[").is_err());
        assert!(validate("{not valid}").is_err());
    }
}
