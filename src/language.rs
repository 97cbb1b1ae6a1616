use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Deserializer};

use crate::error::{JudgeError, Result};

/// How to build and run one language, as sent by the backend with every submission
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LanguageConfig {
    #[serde(default)]
    pub compile: Option<CompileConfig>,
    pub run: RunConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CompileConfig {
    pub src_name: String,
    pub exe_name: String,
    /// Command template; `{src_path}`, `{exe_dir}` and `{exe_path}` are substituted
    pub compile_command: String,
    /// Wall-clock ceiling of the compiler in milliseconds
    #[serde(default = "default_compile_real_time")]
    pub max_real_time: u64,
}

fn default_compile_real_time() -> u64 {
    10_000
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Command template; `{exe_path}`, `{exe_dir}` and `{max_memory}` (KiB) are substituted
    pub command: String,
    /// File the source is written to when there is no compile step
    #[serde(default)]
    pub exe_name: Option<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

/// How to invoke an already compiled checker
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SpjConfig {
    pub exe_name: FileNameTemplate,
    /// Command template; `{exe_path}`, `{in_file_path}` and `{user_out_file_path}` are substituted
    pub command: String,
}

/// Compile configuration of a checker, with file names still keyed by [`SpjKey`]
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct SpjCompileConfig {
    pub src_name: FileNameTemplate,
    pub exe_name: FileNameTemplate,
    pub compile_command: String,
    #[serde(default = "default_compile_real_time")]
    pub max_real_time: u64,
}

impl SpjCompileConfig {
    /// Binds the file name templates to one checker identity
    pub fn resolve(&self, key: &SpjKey) -> Result<CompileConfig> {
        let src_name = key.file_name(&self.src_name)?;
        let exe_name = key.file_name(&self.exe_name)?;
        Ok(CompileConfig {
            src_name,
            exe_name,
            compile_command: self.compile_command.clone(),
            max_real_time: self.max_real_time,
        })
    }
}

/// Identity of one compiled checker in the cache store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpjKey {
    pub version: String,
    pub test_case_id: String,
}

impl SpjKey {
    pub fn new(version: impl Into<String>, test_case_id: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            test_case_id: test_case_id.into(),
        }
    }

    /// Renders a template for this key and checks the result is a plain file name
    pub fn file_name(&self, template: &FileNameTemplate) -> Result<String> {
        let name = template.render(self);
        ensure_file_name(&name)?;
        Ok(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Version,
    TestCaseId,
}

/// File name pattern that may only refer to `{spj_version}` and `{test_case_id}`
#[derive(Debug, Clone, PartialEq)]
pub struct FileNameTemplate {
    segments: Vec<Segment>,
}

impl FileNameTemplate {
    pub fn parse(template: &str) -> std::result::Result<Self, String> {
        let mut segments = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let close = rest[open..]
                .find('}')
                .map(|i| open + i)
                .ok_or_else(|| format!("unclosed placeholder in {template:?}"))?;
            match &rest[open + 1..close] {
                "spj_version" => segments.push(Segment::Version),
                "test_case_id" => segments.push(Segment::TestCaseId),
                other => return Err(format!("unknown placeholder {{{other}}} in {template:?}")),
            }
            rest = &rest[close + 1..];
        }
        if rest.contains('}') {
            return Err(format!("unmatched '}}' in {template:?}"));
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, key: &SpjKey) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.as_str(),
                Segment::Version => key.version.as_str(),
                Segment::TestCaseId => key.test_case_id.as_str(),
            })
            .collect()
    }
}

impl fmt::Display for FileNameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => f.write_str(text)?,
                Segment::Version => f.write_str("{spj_version}")?,
                Segment::TestCaseId => f.write_str("{test_case_id}")?,
            }
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for FileNameTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Rejects anything that is not a single, normal path component
pub fn ensure_file_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(JudgeError::JudgeClient(format!("invalid file name {name:?}"))),
    }
}

/// Identifiers arrive either as JSON strings or numbers
pub(crate) fn string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        String(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::String(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

pub(crate) fn optional_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "string_or_number")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(s)| s))
}
