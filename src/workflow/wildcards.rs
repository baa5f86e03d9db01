//! Wildcard Patterns
//!
//! Patterns are paths with `{name}` placeholders, e.g. `bam/{id}.bam`:
//! - A placeholder matches a non-empty run of characters without `/`
//! - `{{` and `}}` stand for literal braces
//! - Several placeholders in one pattern are matched jointly; when more than
//!   one split is possible the leftmost placeholder takes the fewest characters
//!
//! Identifiers are discovered by walking a directory and matching each file
//! against a pattern.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::ConfigError;

/// A set of wildcard values, keyed by wildcard name.
pub type Binding = BTreeMap<String, String>;

/// One piece of a tokenized template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text copied verbatim
    Literal(String),
    /// Contents of a `{...}` placeholder
    Placeholder(String),
}

/// Splits a template into literal and placeholder segments.
///
/// Placeholder contents are returned untouched; callers decide what a valid
/// key looks like.
pub fn tokenize(raw: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    match inner {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => return Err("nested '{' inside placeholder".to_string()),
                        _ => name.push(inner),
                    }
                }
                if !closed {
                    return Err("unclosed '{'".to_string());
                }
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err("empty placeholder '{}'".to_string());
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name));
            }
            '}' => return Err("unmatched '}'".to_string()),
            _ => literal.push(ch),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Returns true if `name` is usable as a wildcard name.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A parsed path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parses a pattern, checking placeholder syntax only.
    ///
    /// # Example
    /// ```
    /// use rulerunner::workflow::wildcards::Pattern;
    ///
    /// let pattern = Pattern::parse("reads/{sample}.fastq").unwrap();
    /// assert_eq!(pattern.wildcard_names(), vec!["sample"]);
    /// ```
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPattern {
            pattern: raw.to_string(),
            reason,
        };

        let segments = tokenize(raw).map_err(invalid)?;
        for segment in &segments {
            if let Segment::Placeholder(name) = segment {
                if !is_valid_name(name) {
                    return Err(invalid(format!("'{}' is not a valid wildcard name", name)));
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the pattern contains at least one placeholder.
    pub fn has_wildcards(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Placeholder(_)))
    }

    /// Wildcard names in order of first appearance, without duplicates.
    pub fn wildcard_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Substitutes every placeholder with its bound value.
    ///
    /// # Example
    /// ```
    /// use rulerunner::workflow::wildcards::{Binding, Pattern};
    ///
    /// let pattern = Pattern::parse("trimmed/{id}.bam").unwrap();
    /// let mut binding = Binding::new();
    /// binding.insert("id".to_string(), "s1".to_string());
    /// assert_eq!(pattern.instantiate(&binding).unwrap(), "trimmed/s1.bam");
    /// ```
    pub fn instantiate(&self, binding: &Binding) -> Result<String, ConfigError> {
        let mut path = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => path.push_str(text),
                Segment::Placeholder(name) => {
                    let value = binding.get(name).ok_or_else(|| ConfigError::UnboundWildcard {
                        context: format!("pattern '{}'", self.raw),
                        wildcard: name.clone(),
                    })?;
                    path.push_str(value);
                }
            }
        }
        Ok(path)
    }

    /// Matches a concrete path against the pattern.
    ///
    /// Returns the wildcard values on success and `None` when the path does
    /// not fit.
    pub fn matches(&self, path: &str) -> Option<Binding> {
        let mut binding = Binding::new();
        if match_segments(&self.segments, path, &mut binding) {
            Some(binding)
        } else {
            None
        }
    }

    /// The same pattern with any leading `./` removed, so it compares equal
    /// to walked paths, which never carry a `.` component.
    fn without_leading_curdir(&self) -> Pattern {
        let mut pattern = self.clone();
        if let Some(Segment::Literal(text)) = pattern.segments.first_mut() {
            let mut trimmed = text.as_str();
            while let Some(rest) = trimmed.strip_prefix("./") {
                trimmed = rest.trim_start_matches('/');
            }
            let removed = text.len() - trimmed.len();
            if removed > 0 {
                *text = trimmed.to_string();
                pattern.raw = pattern.raw[removed..].to_string();
                if text.is_empty() {
                    pattern.segments.remove(0);
                }
            }
        }
        pattern
    }

    /// Leading directory that contains no placeholder, e.g. `data/raw` for
    /// `data/raw/{id}.bam`. Empty when the first component is a placeholder.
    fn literal_dir_prefix(&self) -> &str {
        match self.segments.first() {
            Some(Segment::Literal(text)) if self.has_wildcards() => {
                &text[..text.rfind('/').unwrap_or(0)]
            }
            _ => "",
        }
    }

    /// Number of `/`-separated components a matching path has.
    fn depth(&self) -> usize {
        let separators: usize = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.matches('/').count(),
                Segment::Placeholder(_) => 0,
            })
            .sum();
        separators + 1
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Backtracking matcher over segments.
///
/// Placeholders are extended one character at a time so the first
/// successful split is the one where earlier placeholders are shortest.
fn match_segments(segments: &[Segment], rest: &str, binding: &mut Binding) -> bool {
    let Some((first, tail)) = segments.split_first() else {
        return rest.is_empty();
    };

    match first {
        Segment::Literal(text) => match rest.strip_prefix(text.as_str()) {
            Some(remaining) => match_segments(tail, remaining, binding),
            None => false,
        },
        Segment::Placeholder(name) => {
            if let Some(bound) = binding.get(name).cloned() {
                return match rest.strip_prefix(bound.as_str()) {
                    Some(remaining) => match_segments(tail, remaining, binding),
                    None => false,
                };
            }

            let limit = rest.find('/').unwrap_or(rest.len());
            for (offset, ch) in rest[..limit].char_indices() {
                let end = offset + ch.len_utf8();
                binding.insert(name.clone(), rest[..end].to_string());
                if match_segments(tail, &rest[end..], binding) {
                    return true;
                }
            }
            binding.remove(name);
            false
        }
    }
}

/// Converts a filesystem path to the `/`-separated form patterns use.
fn normalize(path: &Path) -> Option<String> {
    let parts: Option<Vec<&str>> = path.components().map(|c| c.as_os_str().to_str()).collect();
    parts.map(|p| p.join("/"))
}

/// Scans `root` for files matching `pattern` and returns the distinct
/// wildcard bindings found.
///
/// A pattern with no matches, or a missing directory, yields an empty set.
///
/// # Example
/// ```no_run
/// use std::path::Path;
/// use rulerunner::workflow::wildcards::{discover_identifiers, Pattern};
///
/// let pattern = Pattern::parse("bam/{id}.bam").unwrap();
/// let ids = discover_identifiers(&pattern, Path::new("."));
/// for binding in &ids {
///     println!("{}", binding["id"]);
/// }
/// ```
pub fn discover_identifiers(pattern: &Pattern, root: &Path) -> BTreeSet<Binding> {
    let mut found = BTreeSet::new();

    if !pattern.has_wildcards() {
        warn!("Discovery pattern '{}' has no wildcards", pattern);
        return found;
    }

    let written = pattern;
    let pattern = &written.without_leading_curdir();
    let prefix = pattern.literal_dir_prefix();
    let start = if prefix.is_empty() {
        root.to_path_buf()
    } else {
        root.join(prefix)
    };
    let prefix_depth = if prefix.is_empty() {
        0
    } else {
        prefix.split('/').count()
    };
    let depth = pattern.depth() - prefix_depth;

    if !start.is_dir() {
        debug!("Discovery directory {} does not exist", start.display());
        return found;
    }

    for entry in WalkDir::new(&start).min_depth(depth).max_depth(depth) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable path during discovery: {}", e);
                continue;
            }
        };

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Some(relative) = normalize(relative) else {
            debug!("Skipping non-UTF-8 path {}", entry.path().display());
            continue;
        };

        if let Some(binding) = pattern.matches(&relative) {
            debug!("Discovered {:?} from {}", binding, relative);
            found.insert(binding);
        }
    }

    info!(
        "Discovered {} identifier(s) matching '{}' under {}",
        found.len(),
        written,
        root.display()
    );
    found
}

/// Instantiates a pattern once per binding, dropping duplicates while
/// keeping first-seen order.
pub fn expand<'a, I>(pattern: &Pattern, bindings: I) -> Result<Vec<String>, ConfigError>
where
    I: IntoIterator<Item = &'a Binding>,
{
    let mut paths: Vec<String> = Vec::new();
    for binding in bindings {
        let path = pattern.instantiate(binding)?;
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn binding(pairs: &[(&str, &str)]) -> Binding {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_tokenize_literals_and_placeholders() {
        let segments = tokenize("data/{a}_{b}.bam").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Literal("data/".to_string()),
                Segment::Placeholder("a".to_string()),
                Segment::Literal("_".to_string()),
                Segment::Placeholder("b".to_string()),
                Segment::Literal(".bam".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_escaped_braces() {
        let segments = tokenize("awk '{{print $1}}' {input}").unwrap();
        assert_eq!(segments[0], Segment::Literal("awk '{print $1}' ".to_string()));
        assert_eq!(segments[1], Segment::Placeholder("input".to_string()));
    }

    #[test]
    fn test_tokenize_errors() {
        assert!(tokenize("data/{id.bam").is_err());
        assert!(tokenize("data/id}.bam").is_err());
        assert!(tokenize("data/{}.bam").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        assert!(Pattern::parse("data/{1id}.bam").is_err());
        assert!(Pattern::parse("data/{params.x}.bam").is_err());
        assert!(Pattern::parse("data/{sample_1}.bam").is_ok());
    }

    #[test]
    fn test_single_placeholder_match() {
        let pattern = Pattern::parse("data/{id}.bam").unwrap();
        assert_eq!(pattern.matches("data/s1.bam"), Some(binding(&[("id", "s1")])));
        assert_eq!(pattern.matches("data/.bam"), None);
        assert_eq!(pattern.matches("data/sub/s1.bam"), None);
        assert_eq!(pattern.matches("data/s1.bai"), None);
    }

    #[test]
    fn test_joint_placeholders_anchor_on_literals() {
        let pattern = Pattern::parse("data/{a}_{b}.bam").unwrap();
        assert_eq!(
            pattern.matches("data/run1_lane2.bam"),
            Some(binding(&[("a", "run1"), ("b", "lane2")]))
        );
    }

    #[test]
    fn test_ambiguous_split_prefers_short_leftmost() {
        let pattern = Pattern::parse("data/{a}_{b}.bam").unwrap();
        assert_eq!(
            pattern.matches("data/run_1_lane2.bam"),
            Some(binding(&[("a", "run"), ("b", "1_lane2")]))
        );

        let adjacent = Pattern::parse("{a}{b}").unwrap();
        assert_eq!(adjacent.matches("xyz"), Some(binding(&[("a", "x"), ("b", "yz")])));
    }

    #[test]
    fn test_repeated_placeholder_must_agree() {
        let pattern = Pattern::parse("{id}/{id}.bam").unwrap();
        assert_eq!(pattern.matches("s1/s1.bam"), Some(binding(&[("id", "s1")])));
        assert_eq!(pattern.matches("s1/s2.bam"), None);
    }

    #[test]
    fn test_instantiate_and_unbound() {
        let pattern = Pattern::parse("out/{id}.{ext}").unwrap();
        let full = binding(&[("id", "s1"), ("ext", "vcf")]);
        assert_eq!(pattern.instantiate(&full).unwrap(), "out/s1.vcf");

        let partial = binding(&[("id", "s1")]);
        match pattern.instantiate(&partial) {
            Err(ConfigError::UnboundWildcard { wildcard, .. }) => assert_eq!(wildcard, "ext"),
            other => panic!("Expected UnboundWildcard, got {:?}", other),
        }
    }

    #[test]
    fn test_wildcard_names_deduplicated() {
        let pattern = Pattern::parse("{id}/{lane}/{id}.bam").unwrap();
        assert_eq!(pattern.wildcard_names(), vec!["id", "lane"]);
        assert!(!Pattern::parse("ref/genome.fa").unwrap().has_wildcards());
    }

    #[test]
    fn test_literal_dir_prefix_and_depth() {
        let pattern = Pattern::parse("data/raw/{id}.bam").unwrap();
        assert_eq!(pattern.literal_dir_prefix(), "data/raw");
        assert_eq!(pattern.depth(), 3);

        let pattern = Pattern::parse("{id}/reads.bam").unwrap();
        assert_eq!(pattern.literal_dir_prefix(), "");
        assert_eq!(pattern.depth(), 2);
    }

    #[test]
    fn test_discover_identifiers() {
        let temp_dir = tempdir().unwrap();
        let data = temp_dir.path().join("data");
        fs::create_dir_all(data.join("nested")).unwrap();
        fs::write(data.join("s1.bam"), "").unwrap();
        fs::write(data.join("s2.bam"), "").unwrap();
        fs::write(data.join("s2.bam.bai"), "").unwrap();
        fs::write(data.join("nested").join("s3.bam"), "").unwrap();

        let pattern = Pattern::parse("data/{id}.bam").unwrap();
        let ids = discover_identifiers(&pattern, temp_dir.path());

        let values: Vec<&str> = ids.iter().map(|b| b["id"].as_str()).collect();
        assert_eq!(values, vec!["s1", "s2"]);
    }

    #[test]
    fn test_discover_with_leading_curdir() {
        let temp_dir = tempdir().unwrap();
        let data = temp_dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("s1.bam"), "").unwrap();
        fs::write(data.join("s2.bam"), "").unwrap();

        let discover = |raw: &str| {
            let pattern = Pattern::parse(raw).unwrap();
            discover_identifiers(&pattern, temp_dir.path())
        };

        let dotted = discover("./data/{id}.bam");
        assert_eq!(dotted.len(), 2);
        assert_eq!(dotted, discover("data/{id}.bam"));

        fs::write(temp_dir.path().join("s3.bam"), "").unwrap();
        assert_eq!(discover("./{id}.bam"), BTreeSet::from([binding(&[("id", "s3")])]));
    }

    #[test]
    fn test_without_leading_curdir() {
        let pattern = Pattern::parse("././data/{id}.bam").unwrap().without_leading_curdir();
        assert_eq!(pattern.as_str(), "data/{id}.bam");
        assert_eq!(pattern.literal_dir_prefix(), "data");

        let pattern = Pattern::parse("./{id}.bam").unwrap().without_leading_curdir();
        assert_eq!(pattern.as_str(), "{id}.bam");
        assert_eq!(pattern.depth(), 1);
    }

    #[test]
    fn test_discover_joint_wildcards() {
        let temp_dir = tempdir().unwrap();
        fs::create_dir_all(temp_dir.path().join("data")).unwrap();
        fs::write(temp_dir.path().join("data/run1_lane2.bam"), "").unwrap();

        let pattern = Pattern::parse("data/{a}_{b}.bam").unwrap();
        let ids = discover_identifiers(&pattern, temp_dir.path());

        assert_eq!(ids.len(), 1);
        assert!(ids.contains(&binding(&[("a", "run1"), ("b", "lane2")])));
    }

    #[test]
    fn test_discover_across_directories() {
        let temp_dir = tempdir().unwrap();
        for sample in ["s1", "s2"] {
            let dir = temp_dir.path().join(sample);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("reads.bam"), "").unwrap();
        }

        let pattern = Pattern::parse("{id}/reads.bam").unwrap();
        let ids = discover_identifiers(&pattern, temp_dir.path());
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_discover_no_matches_is_empty() {
        let temp_dir = tempdir().unwrap();
        let pattern = Pattern::parse("missing/{id}.bam").unwrap();
        assert!(discover_identifiers(&pattern, temp_dir.path()).is_empty());
    }

    #[test]
    fn test_expand_deduplicates() {
        let pattern = Pattern::parse("results/{id}.tsv").unwrap();
        let bindings = vec![
            binding(&[("id", "s1"), ("lane", "1")]),
            binding(&[("id", "s1"), ("lane", "2")]),
            binding(&[("id", "s2"), ("lane", "1")]),
        ];
        let paths = expand(&pattern, &bindings).unwrap();
        assert_eq!(paths, vec!["results/s1.tsv", "results/s2.tsv"]);
    }
}
