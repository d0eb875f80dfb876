//! Command and path templates with named placeholders.
//!
//! A placeholder is `{name}` where `name` is an identifier. Shell parameter
//! expansions such as `${PATH}` and brace groups like `{ a; b; }` are left
//! untouched, so ordinary shell text can be templated safely.

use crate::errors::TemplateError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Well-known variable names available to every task template.
pub struct TemplateVars;

#[allow(missing_docs)]
impl TemplateVars {
    pub const APPLICATION: &'static str = "application";
    pub const VERSION: &'static str = "version";
    pub const STAGE: &'static str = "stage";
    pub const USER: &'static str = "user";
    pub const BRANCH: &'static str = "branch";
    pub const REPOSITORY: &'static str = "repository";
    pub const DEPLOY_TO: &'static str = "deploy_to";
    pub const RELEASES_PATH: &'static str = "releases_path";
    pub const SHARED_PATH: &'static str = "shared_path";
    pub const CURRENT_PATH: &'static str = "current_path";
    pub const RELEASE_PATH: &'static str = "release_path";
    pub const RELEASE_NAME: &'static str = "release_name";
    pub const CONTAINER_HOME: &'static str = "container_home";
    pub const CONTAINER_CTL: &'static str = "container_ctl";
    pub const ARTIFACT_NAME: &'static str = "artifact_name";
    pub const SUDO: &'static str = "sudo";
    pub const HOST: &'static str = "host";
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"(\$?)\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap()
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A string with named placeholders, resolved against a variable map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parses a template. Parsing never fails; unknown names surface at render time.
    #[must_use]
    pub fn parse(source: impl Into<String>) -> Self {
        let source = source.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(&source) {
            let (Some(whole), Some(dollar), Some(name)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            literal.push_str(&source[last..whole.start()]);
            if dollar.as_str().is_empty() {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name.as_str().to_string()));
            } else {
                literal.push_str(whole.as_str());
            }
            last = whole.end();
        }
        literal.push_str(&source[last..]);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self { source, segments }
    }

    /// The template source text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Checks that every placeholder has a value.
    ///
    /// # Errors
    ///
    /// Returns the first placeholder with no value.
    pub fn validate(&self, vars: &BTreeMap<String, String>) -> Result<(), TemplateError> {
        match self.placeholders().find(|name| !vars.contains_key(*name)) {
            Some(name) => Err(self.unknown(name)),
            None => Ok(()),
        }
    }

    /// Renders the template.
    ///
    /// # Errors
    ///
    /// Returns the first placeholder with no value.
    pub fn render(&self, vars: &BTreeMap<String, String>) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = vars.get(name).ok_or_else(|| self.unknown(name))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    fn unknown(&self, name: &str) -> TemplateError {
        TemplateError {
            name: name.to_string(),
            template: self.source.clone(),
        }
    }
}

impl From<String> for Template {
    fn from(value: String) -> Self {
        Self::parse(value)
    }
}

impl From<&str> for Template {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<Template> for String {
    fn from(value: Template) -> Self {
        value.source
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
