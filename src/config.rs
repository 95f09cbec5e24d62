//! Configuration management: the service `.env` file and the optional launch manifest.
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_JAVA_OPTS, DEFAULT_JAVA_PROGRAM, JAR_EXTENSION, SENSITIVE_KEY_MARKERS,
};
use crate::error::{ConfigError, EnvViolation};

/// Variables parsed from a flat `KEY=VALUE` environment file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    vars: HashMap<String, String>,
}

impl EnvFile {
    /// Reads and parses the env file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::EnvFileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    /// Parses env file content.
    ///
    /// Blank lines and `#` comments are skipped, the first `=` separates key from value,
    /// and both sides are trimmed. Quotes are kept verbatim.
    pub fn parse(content: &str) -> Self {
        let mut vars = HashMap::new();

        for (index, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    vars.insert(key.trim().to_string(), value.trim().to_string());
                }
                _ => {
                    warn!("Ignoring malformed line {} in env file", index + 1);
                }
            }
        }

        Self { vars }
    }

    /// Returns the value for `key`, if defined.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Number of variables defined.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the file defined no variables.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterates over every `(key, value)` pair.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Renders a value for logs, hiding anything that looks like a credential.
pub fn display_value(key: &str, value: &str) -> String {
    let upper = key.to_ascii_uppercase();
    if SENSITIVE_KEY_MARKERS
        .iter()
        .any(|marker| upper.contains(marker))
    {
        return format!("<{} chars>", value.chars().count());
    }

    if value.chars().count() > 50 {
        let head: String = value.chars().take(50).collect();
        format!("{head}...")
    } else {
        value.to_string()
    }
}

/// Makes a requirement apply only when another variable has a given value.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct EnvCondition {
    /// Variable to inspect.
    pub key: String,
    /// Value (compared case-insensitively) that activates the requirement.
    pub equals: String,
}

/// A variable the service cannot start without.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct EnvRequirement {
    /// Variable name.
    pub name: String,
    /// Minimum number of characters, e.g. for signing secrets.
    #[serde(default)]
    pub min_length: Option<usize>,
    /// Optional activation condition.
    #[serde(default)]
    pub when: Option<EnvCondition>,
}

impl EnvRequirement {
    /// An unconditional presence check.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_length: None,
            when: None,
        }
    }

    fn applies(&self, env: &EnvFile) -> bool {
        match &self.when {
            Some(condition) => env
                .get(&condition.key)
                .is_some_and(|value| value.eq_ignore_ascii_case(&condition.equals)),
            None => true,
        }
    }

    fn check(&self, env: &EnvFile) -> Option<EnvViolation> {
        if !self.applies(env) {
            return None;
        }

        let value = match env.get(&self.name) {
            None => return Some(EnvViolation::Missing(self.name.clone())),
            Some("") => return Some(EnvViolation::Empty(self.name.clone())),
            Some(value) => value,
        };

        let actual = value.chars().count();
        match self.min_length {
            Some(min) if actual < min => Some(EnvViolation::TooShort {
                name: self.name.clone(),
                min,
                actual,
            }),
            _ => None,
        }
    }
}

/// The full set of environment requirements for one launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredEnv {
    requirements: Vec<EnvRequirement>,
}

impl RequiredEnv {
    /// Builds requirements from declared entries.
    pub fn new(requirements: Vec<EnvRequirement>) -> Self {
        Self { requirements }
    }

    /// Adds plain presence checks for `names` not already declared.
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.requirements.iter().any(|req| req.name == name) {
                self.requirements.push(EnvRequirement::named(name));
            }
        }
        self
    }

    /// Declared requirements.
    pub fn requirements(&self) -> &[EnvRequirement] {
        &self.requirements
    }

    /// Checks every applicable requirement and collects all violations.
    pub fn validate(&self, env: &EnvFile) -> Result<(), Vec<EnvViolation>> {
        let violations: Vec<_> = self
            .requirements
            .iter()
            .filter_map(|req| req.check(env))
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// Program used to execute the artifact.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RuntimeSpec {
    /// Executable to run, e.g. `java`.
    pub program: String,
    /// Arguments placed before the artifact path (for Java this ends with `-jar`).
    #[serde(default)]
    pub args: Vec<String>,
}

impl RuntimeSpec {
    /// Default runtime for an artifact: the JVM for `.jar` files, none otherwise.
    pub fn default_for(artifact: &Path) -> Option<Self> {
        let is_jar = artifact
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(JAR_EXTENSION));
        if !is_jar {
            return None;
        }

        let mut args: Vec<String> = DEFAULT_JAVA_OPTS.iter().map(|s| s.to_string()).collect();
        args.push("-jar".to_string());
        Some(Self {
            program: DEFAULT_JAVA_PROGRAM.to_string(),
            args,
        })
    }
}

/// Optional per-service launch manifest (`launch.yaml`).
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct LaunchManifest {
    /// Overrides how the artifact is executed.
    #[serde(default)]
    pub runtime: Option<RuntimeSpec>,
    /// Variables that must be valid before the process is spawned.
    #[serde(default)]
    pub required_env: Vec<EnvRequirement>,
}

impl LaunchManifest {
    /// Loads and parses the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ManifestRead {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::ManifestParse {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Loaded launch manifest from {}", path.display());
        Ok(manifest)
    }

    /// Loads the manifest if it exists; absence yields the default manifest.
    pub fn load_if_present(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Program and arguments that will be executed for an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Executable.
    pub program: PathBuf,
    /// Arguments, ending with the artifact path when a runtime is used.
    pub args: Vec<String>,
}

impl LaunchCommand {
    /// Builds the command line for `artifact`, preferring the manifest runtime.
    pub fn build(artifact: &Path, runtime: Option<&RuntimeSpec>) -> Self {
        let runtime = runtime.cloned().or_else(|| RuntimeSpec::default_for(artifact));
        match runtime {
            Some(spec) => {
                let mut args = spec.args;
                args.push(artifact.to_string_lossy().into_owned());
                Self {
                    program: PathBuf::from(spec.program),
                    args,
                }
            }
            None => Self {
                program: artifact.to_path_buf(),
                args: Vec::new(),
            },
        }
    }

    /// Shell-like rendering for log messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
