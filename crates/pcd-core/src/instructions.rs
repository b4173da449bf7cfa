//! Build instructions
//!
//! The instructions document drives a build VM through three phases:
//!
//! ```json
//! {
//!   "build":  [{"repo": "https://github.com/phenotips/patient-network",
//!               "branch": "master", "command": "mvn clean install -Pquick"}],
//!   "deploy": [{"action": "unzip", "source_dir": "phenomecentral.org/standalone/target",
//!               "source_files": "phenomecentral-standalone*.zip"}],
//!   "run":    [{"command": "./start.sh", "directory_re": "phenomecentral-standalone",
//!               "run_and_proceed": true}]
//! }
//! ```
//!
//! Files may carry `### ...` line comments and `"comment"` members; both are
//! stripped before the document is shipped or parsed.

use crate::error::InstructionsError;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::LazyLock;

/// Member name removed from instructions before they are sent to a VM
pub const COMMENT_KEY: &str = "comment";

const EXCERPT_LEN: usize = 20;

/// Parsed build instructions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInstructions {
    /// Repositories to clone and build, in order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Vec<RepositoryBuild>>,
    /// Artefacts to install into the build deploy directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<Vec<DeployArtefact>>,
    /// Commands that start the deployed instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<Vec<RunStep>>,
}

impl BuildInstructions {
    /// Parse instructions text, stripping `###` comments first.
    ///
    /// # Errors
    /// Fails on invalid JSON, a missing mandatory key or an unsupported
    /// deploy action.
    pub fn parse(text: &str) -> Result<Self, InstructionsError> {
        let value: Value = serde_json::from_str(&strip_hash_comments(text))?;
        Self::from_value(value)
    }

    /// Read and parse an instructions file.
    ///
    /// # Errors
    /// Fails if the file cannot be read or does not parse.
    pub fn from_file(path: &Path) -> Result<Self, InstructionsError> {
        Self::parse(&read_file(path)?)
    }

    /// Validate and convert a JSON value into instructions.
    ///
    /// # Errors
    /// Fails if a section is not an array of objects, an entry misses a
    /// mandatory key, or a deploy entry names an unsupported action.
    pub fn from_value(value: Value) -> Result<Self, InstructionsError> {
        let Value::Object(mut root) = value else {
            return Err(InstructionsError::Malformed {
                object: "build instructions",
                message: "expected a JSON object".to_string(),
            });
        };

        let build = root
            .remove("build")
            .map(|section| parse_section(section, "repository", RepositoryBuild::MANDATORY_KEYS))
            .transpose()?;
        let deploy = root
            .remove("deploy")
            .map(|section| parse_section(section, "deployment", DeployArtefact::MANDATORY_KEYS))
            .transpose()?;
        let run = root
            .remove("run")
            .map(|section| {
                parse_section(section, "execution instructions", RunStep::MANDATORY_KEYS)
            })
            .transpose()?;

        Ok(Self { build, deploy, run })
    }

    /// Serialize without whitespace
    ///
    /// # Errors
    /// Only fails if serde_json does.
    pub fn to_compact_json(&self) -> Result<String, InstructionsError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Repositories to build (empty if the section is absent)
    #[inline]
    #[must_use]
    pub fn repositories(&self) -> &[RepositoryBuild] {
        self.build.as_deref().unwrap_or_default()
    }

    /// Artefacts to deploy (empty if the section is absent)
    #[inline]
    #[must_use]
    pub fn artefacts(&self) -> &[DeployArtefact] {
        self.deploy.as_deref().unwrap_or_default()
    }
}

/// One repository of the build phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryBuild {
    /// Repository URL without the `.git` suffix
    pub repo: String,
    /// Branch to check out
    pub branch: String,
    /// Shell command that builds the checkout
    pub command: String,
    /// Directory inside the checkout to build from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_dir: Option<String>,
    /// Skip this repository instead of failing the pipeline
    #[serde(default, skip_serializing_if = "is_false")]
    pub continue_on_fail: bool,
}

impl RepositoryBuild {
    const MANDATORY_KEYS: &'static [&'static str] = &["repo", "branch", "command"];

    /// Create a repository build step
    #[inline]
    #[must_use]
    pub fn new(
        repo: impl Into<String>,
        branch: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
            command: command.into(),
            sub_dir: None,
            continue_on_fail: false,
        }
    }

    /// Build from a directory inside the checkout
    #[inline]
    #[must_use]
    pub fn with_sub_dir(mut self, sub_dir: impl Into<String>) -> Self {
        self.sub_dir = Some(sub_dir.into());
        self
    }

    /// Tolerate clone or build failures
    #[inline]
    #[must_use]
    pub fn continue_on_fail(mut self) -> Self {
        self.continue_on_fail = true;
        self
    }

    /// Checkout directory name: the last path segment of the URL
    #[must_use]
    pub fn name(&self) -> &str {
        let trimmed = self.repo.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }
}

/// How a deploy artefact is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployAction {
    /// Extract an archive into the target directory
    Unzip,
    /// Copy files into the target directory
    Copy,
}

impl DeployAction {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "unzip" => Some(Self::Unzip),
            "copy" => Some(Self::Copy),
            _ => None,
        }
    }
}

/// A single file name or a list of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceFiles {
    /// One file (or wildcard pattern)
    One(String),
    /// Several files (or wildcard patterns)
    Many(Vec<String>),
}

impl SourceFiles {
    /// Iterate over the file names
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            Self::One(file) => std::slice::from_ref(file),
            Self::Many(files) => files,
        };
        slice.iter().map(String::as_str)
    }
}

/// One artefact of the deploy phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployArtefact {
    /// Install action
    pub action: DeployAction,
    /// Directory holding the artefact, relative to the git directory
    pub source_dir: String,
    /// File names inside `source_dir`
    pub source_files: SourceFiles,
    /// Regex selecting a directory inside the build deploy directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_dir_re: Option<String>,
    /// Sub-directory appended to the resolved target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_sub_dir: Option<String>,
    /// Keep going when installation fails
    #[serde(default, skip_serializing_if = "is_false")]
    pub continue_on_fail: bool,
}

impl DeployArtefact {
    const MANDATORY_KEYS: &'static [&'static str] = &["action", "source_dir", "source_files"];

    /// Create a deploy step
    #[inline]
    #[must_use]
    pub fn new(action: DeployAction, source_dir: impl Into<String>, source_files: SourceFiles) -> Self {
        Self {
            action,
            source_dir: source_dir.into(),
            source_files,
            target_dir_re: None,
            target_sub_dir: None,
            continue_on_fail: false,
        }
    }

    /// Select the target directory by regex
    #[inline]
    #[must_use]
    pub fn with_target_dir_re(mut self, pattern: impl Into<String>) -> Self {
        self.target_dir_re = Some(pattern.into());
        self
    }

    /// Append a sub-directory to the target
    #[inline]
    #[must_use]
    pub fn with_target_sub_dir(mut self, sub_dir: impl Into<String>) -> Self {
        self.target_sub_dir = Some(sub_dir.into());
        self
    }
}

/// One command of the run phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStep {
    /// Shell command
    pub command: String,
    /// Start the command and move on; it is awaited at the end of the phase
    #[serde(default, skip_serializing_if = "is_false")]
    pub run_and_proceed: bool,
    /// Start the command and leave it running after the pipeline ends (servers)
    #[serde(default, skip_serializing_if = "is_false")]
    pub detach: bool,
    /// File receiving stdout and stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_redirect_file: Option<String>,
    /// Working directory relative to the build deploy directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    /// Regex selecting the working directory inside the build deploy directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_re: Option<String>,
}

impl RunStep {
    const MANDATORY_KEYS: &'static [&'static str] = &["command"];

    /// Create a run step executed in the build deploy directory
    #[inline]
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            run_and_proceed: false,
            detach: false,
            stdout_redirect_file: None,
            directory: None,
            directory_re: None,
        }
    }

    /// Do not wait for the command before the next step
    #[inline]
    #[must_use]
    pub fn run_and_proceed(mut self) -> Self {
        self.run_and_proceed = true;
        self
    }

    /// Start the command and never wait for it
    #[inline]
    #[must_use]
    pub fn detached(mut self) -> Self {
        self.detach = true;
        self
    }

    /// Redirect output to a file
    #[inline]
    #[must_use]
    pub fn with_redirect(mut self, file: impl Into<String>) -> Self {
        self.stdout_redirect_file = Some(file.into());
        self
    }

    /// Run in the first directory matching `pattern`
    #[inline]
    #[must_use]
    pub fn with_directory_re(mut self, pattern: impl Into<String>) -> Self {
        self.directory_re = Some(pattern.into());
        self
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

fn parse_section<T: DeserializeOwned>(
    section: Value,
    object: &'static str,
    mandatory: &[&'static str],
) -> Result<Vec<T>, InstructionsError> {
    let Value::Array(entries) = section else {
        return Err(InstructionsError::Malformed {
            object,
            message: "section must be a JSON array".to_string(),
        });
    };

    entries
        .into_iter()
        .map(|entry| {
            check_mandatory_keys(&entry, mandatory, object)?;
            if let Some(action) = entry.get("action").and_then(Value::as_str) {
                if object == "deployment" && DeployAction::from_name(action).is_none() {
                    return Err(InstructionsError::UnsupportedAction {
                        action: action.to_string(),
                        entry: entry.to_string(),
                    });
                }
            }
            serde_json::from_value(entry).map_err(|e| InstructionsError::Malformed {
                object,
                message: e.to_string(),
            })
        })
        .collect()
}

fn check_mandatory_keys(
    entry: &Value,
    mandatory: &[&'static str],
    object: &'static str,
) -> Result<(), InstructionsError> {
    let Value::Object(map) = entry else {
        return Err(InstructionsError::Malformed {
            object,
            message: format!("expected a JSON object, got {entry}"),
        });
    };

    match mandatory.iter().find(|key| !map.contains_key(**key)) {
        Some(key) => Err(InstructionsError::MissingKey {
            object,
            excerpt: entry.to_string().chars().take(EXCERPT_LEN).collect(),
            key,
        }),
        None => Ok(()),
    }
}

/// Remove `### ...` comments (and the whitespace before them) up to the end of line.
#[must_use]
pub fn strip_hash_comments(text: &str) -> String {
    static COMMENT: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s*###.*?\n").expect("comment pattern is valid"));
    COMMENT.replace_all(text, "\n").into_owned()
}

/// Recursively drop every object member called `key`.
#[must_use]
pub fn remove_key(value: Value, key: &str) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| k != key)
                .map(|(k, v)| (k, remove_key(v, key)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| remove_key(v, key)).collect()),
        other => other,
    }
}

/// Read an instructions file and return it as compact JSON with all comments removed.
///
/// The result is what gets chunked into VM metadata, so it is kept as small
/// as possible.
///
/// # Errors
/// Fails if the file cannot be read or is not valid JSON.
pub fn read_instructions_file(path: &Path) -> Result<String, InstructionsError> {
    let text = strip_hash_comments(&read_file(path)?);
    let value = remove_key(serde_json::from_str(&text)?, COMMENT_KEY);
    Ok(serde_json::to_string(&value)?)
}

fn read_file(path: &Path) -> Result<String, InstructionsError> {
    std::fs::read_to_string(path).map_err(|source| InstructionsError::Io {
        path: path.to_path_buf(),
        source,
    })
}
