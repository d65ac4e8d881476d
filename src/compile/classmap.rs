//! Class mappings
//!
//! Mapping rules prepend classes to nodes by name: a rule is a key (a glob
//! pattern, or a `/regex/`) followed by the classes it contributes. Regex
//! keys search anywhere in the node name and their captures substitute into
//! the class names with `$1`-style groups.

use glob::Pattern;
use regex::Regex;

use crate::core::error::{Error, Result};
use crate::node::classes::NameList;

#[derive(Debug)]
enum Matcher {
    Glob(Pattern),
    Regex(Regex),
}

#[derive(Debug)]
struct Rule {
    matcher: Matcher,
    classes: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ClassMappings {
    rules: Vec<Rule>,
}

impl ClassMappings {
    pub fn new(mappings: &[String]) -> Result<Self> {
        let rules = mappings
            .iter()
            .map(|line| Rule::parse(line))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Classes contributed to `nodename`, in rule order, deduplicated.
    pub fn classes_for(&self, nodename: &str) -> NameList {
        let mut classes = NameList::new();
        for rule in &self.rules {
            match &rule.matcher {
                Matcher::Glob(pattern) => {
                    if pattern.matches(nodename) {
                        for class in &rule.classes {
                            classes.append_if_new(class.clone());
                        }
                    }
                }
                Matcher::Regex(regex) => {
                    if let Some(captures) = regex.captures(nodename) {
                        for class in &rule.classes {
                            let mut expanded = String::new();
                            captures.expand(class, &mut expanded);
                            classes.append_if_new(expanded);
                        }
                    }
                }
            }
        }
        classes
    }
}

impl Rule {
    fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (matcher, rest) = if let Some(body) = line.strip_prefix('/') {
            let end = body.find('/').ok_or_else(|| Error::MappingFormat {
                message: format!("missing closing slash in \"{}\"", line),
            })?;
            let pattern = &body[..end];
            let regex = Regex::new(pattern).map_err(|e| Error::MappingFormat {
                message: format!("bad regex in \"{}\": {}", line, e),
            })?;
            (Matcher::Regex(regex), &body[end + 1..])
        } else {
            let mut words = split_words(line)?;
            if words.is_empty() {
                return Err(Error::MappingFormat {
                    message: "empty mapping".to_string(),
                });
            }
            let key = words.remove(0);
            let pattern = Pattern::new(&key).map_err(|e| Error::MappingFormat {
                message: format!("bad glob in \"{}\": {}", line, e),
            })?;
            return Ok(Self {
                matcher: Matcher::Glob(pattern),
                classes: words,
            });
        };
        let classes = split_words(rest)?;
        if classes.is_empty() {
            return Err(Error::MappingFormat {
                message: format!("no classes in \"{}\"", line),
            });
        }
        Ok(Self { matcher, classes })
    }
}

/// Whitespace split honoring single and double quotes.
fn split_words(input: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if quote.is_some() {
        return Err(Error::MappingFormat {
            message: format!("missing closing quote in \"{}\"", input),
        });
    }
    if !current.is_empty() {
        words.push(current);
    }
    Ok(words)
}
