use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TranslateError};

/// Target (or source) language of a translation run.
///
/// The set matches what the numbered-line prompt has been validated
/// against; anything else is rejected up front as an input error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Language {
    SimplifiedChinese,
    TraditionalChinese,
    English,
    French,
    German,
    Spanish,
    Russian,
    Italian,
    Portuguese,
    Japanese,
    Korean,
}

impl Language {
    /// BCP-47 style code as accepted in configuration
    pub fn code(&self) -> &'static str {
        match self {
            Self::SimplifiedChinese => "zh-Hans",
            Self::TraditionalChinese => "zh-Hant",
            Self::English => "en",
            Self::French => "fr",
            Self::German => "de",
            Self::Spanish => "es",
            Self::Russian => "ru",
            Self::Italian => "it",
            Self::Portuguese => "pt",
            Self::Japanese => "ja",
            Self::Korean => "ko",
        }
    }

    /// Name used when talking to the model
    pub fn llm_name(&self) -> &'static str {
        match self {
            Self::SimplifiedChinese => "Simplified Chinese",
            Self::TraditionalChinese => "Traditional Chinese",
            Self::English => "English",
            Self::French => "French",
            Self::German => "German",
            Self::Spanish => "Spanish",
            Self::Russian => "Russian",
            Self::Italian => "Italian",
            Self::Portuguese => "Portuguese",
            Self::Japanese => "Japanese",
            Self::Korean => "Korean",
        }
    }
}

impl From<Language> for String {
    fn from(lang: Language) -> Self {
        lang.code().to_string()
    }
}

impl TryFrom<String> for Language {
    type Error = TranslateError;

    fn try_from(code: String) -> Result<Self> {
        code.parse()
    }
}

impl FromStr for Language {
    type Err = TranslateError;

    fn from_str(code: &str) -> Result<Self> {
        // Region subtags fold into their base language; Chinese script
        // variants are kept apart.
        let lang = match code {
            "zh-Hans" | "zh-CN" => Self::SimplifiedChinese,
            "zh-Hant" | "zh-TW" => Self::TraditionalChinese,
            other if other.starts_with("en") => Self::English,
            other if other.starts_with("fr") => Self::French,
            other if other.starts_with("de") => Self::German,
            other if other.starts_with("es") => Self::Spanish,
            other if other.starts_with("ru") => Self::Russian,
            other if other.starts_with("it") => Self::Italian,
            other if other.starts_with("pt") => Self::Portuguese,
            other if other.starts_with("ja") => Self::Japanese,
            other if other.starts_with("ko") => Self::Korean,
            other => return Err(TranslateError::UnsupportedLanguage(other.to_string())),
        };
        Ok(lang)
    }
}

/// Unit in which fragment and group budgets are measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CountUnit {
    /// Unicode scalar values
    Char,
    /// o200k_base tokens
    #[default]
    Token,
}

/// What to do when the model returns an empty translation for a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmptyTranslation {
    /// Leave the source element untouched (no sibling inserted)
    #[default]
    KeepOriginal,
    /// Insert an empty bilingual sibling anyway
    InsertEmpty,
}

/// How a TextLeaf subtree is rendered into a translation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputMethod {
    /// Serialised markup, inline tags included
    Html,
    /// Text content only
    #[default]
    Text,
}

/// LLM endpoint descriptor (OpenAI-compatible `/chat/completions`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmOptions {
    pub api_key: String,

    /// Base URL up to and including the version segment, e.g.
    /// `https://api.example.com/v1`
    pub base_url: String,

    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_top_p")]
    pub top_p: f64,

    /// Per-request timeout in seconds; `None` or `0` means unbounded
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

const DEFAULT_TEMPERATURE: f64 = 0.6;
const DEFAULT_TOP_P: f64 = 0.9;

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}
fn default_top_p() -> f64 {
    DEFAULT_TOP_P
}

impl LlmOptions {
    /// Effective timeout, with `0` normalised to unbounded
    pub fn timeout(&self) -> Option<std::time::Duration> {
        match self.timeout_seconds {
            Some(secs) if secs > 0.0 => Some(std::time::Duration::from_secs_f64(secs)),
            _ => None,
        }
    }
}

/// Retry policy for transient LLM failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOptions {
    /// Additional attempts after the first failure (default: 3)
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,

    /// Fixed pause between attempts in seconds (default: 6.0)
    #[serde(default = "default_retry_interval")]
    pub retry_interval_seconds: f64,
}

const DEFAULT_RETRY_TIMES: u32 = 3;
const DEFAULT_RETRY_INTERVAL_SECONDS: f64 = 6.0;

fn default_retry_times() -> u32 {
    DEFAULT_RETRY_TIMES
}
fn default_retry_interval() -> f64 {
    DEFAULT_RETRY_INTERVAL_SECONDS
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retry_times: DEFAULT_RETRY_TIMES,
            retry_interval_seconds: DEFAULT_RETRY_INTERVAL_SECONDS,
        }
    }
}

/// Full invocation parameters for one book translation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateOptions {
    /// Input EPUB
    pub source_file: PathBuf,

    /// Output EPUB; defaults to `<working_dir>/output/<stem>.translated.epub`
    #[serde(default)]
    pub translated_file: Option<PathBuf>,

    /// Target language
    pub language: Language,

    /// Source language; `None` lets the model detect it
    #[serde(default)]
    pub source_language: Option<Language>,

    /// Extra user-supplied text appended to the built-in system prompt
    #[serde(default)]
    pub prompt: Option<String>,

    /// Directory holding the exploded mirror, the batch cache, and logs
    pub working_dir: PathBuf,

    /// Budget of one translation group sent to the model
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,

    /// Cap on a single fragment; oversize units are sentence-split to it
    #[serde(default = "default_max_fragment_tokens")]
    pub max_fragment_tokens: usize,

    #[serde(default)]
    pub count_unit: CountUnit,

    /// Parallel spine workers
    #[serde(default = "default_threads")]
    pub threads: usize,

    #[serde(default)]
    pub retry: RetryOptions,

    pub llm: LlmOptions,

    #[serde(default)]
    pub empty_translation: EmptyTranslation,

    #[serde(default)]
    pub output_method: OutputMethod,

    /// Downgrade page-level failures to warnings instead of aborting
    #[serde(default)]
    pub best_effort: bool,
}

const DEFAULT_MAX_CHUNK_TOKENS: usize = 2000;
const DEFAULT_MAX_FRAGMENT_TOKENS: usize = 512;
const DEFAULT_THREADS: usize = 4;

fn default_max_chunk_tokens() -> usize {
    DEFAULT_MAX_CHUNK_TOKENS
}
fn default_max_fragment_tokens() -> usize {
    DEFAULT_MAX_FRAGMENT_TOKENS
}
fn default_threads() -> usize {
    DEFAULT_THREADS
}

impl TranslateOptions {
    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.trim().is_empty() {
            return Err(TranslateError::MissingCredentials("apiKey"));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(TranslateError::MissingCredentials("baseUrl"));
        }
        if self.threads == 0 {
            return Err(TranslateError::Epub("threads must be >= 1".into()));
        }
        if self.max_chunk_tokens == 0 || self.max_fragment_tokens == 0 {
            return Err(TranslateError::Epub(
                "maxChunkTokens and maxFragmentTokens must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolved output path
    pub fn output_path(&self) -> PathBuf {
        if let Some(path) = &self.translated_file {
            return path.clone();
        }
        let stem = self
            .source_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "book".to_string());
        self.working_dir
            .join("output")
            .join(format!("{stem}.translated.epub"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_json(extra: &str) -> String {
        format!(
            r#"{{
                "sourceFile": "/books/history.epub",
                "language": "en",
                "workingDir": "/tmp/ws",
                "llm": {{
                    "apiKey": "sk-test",
                    "baseUrl": "https://api.example.com/v1",
                    "model": "gpt-4o-mini"
                }}{extra}
            }}"#
        )
    }

    #[test]
    fn test_language_codes() {
        assert_eq!(
            "zh-Hans".parse::<Language>().unwrap(),
            Language::SimplifiedChinese
        );
        assert_eq!(
            "zh-TW".parse::<Language>().unwrap(),
            Language::TraditionalChinese
        );
        assert_eq!("en-US".parse::<Language>().unwrap(), Language::English);
        assert_eq!("pt".parse::<Language>().unwrap(), Language::Portuguese);
        assert!(matches!(
            "tlh".parse::<Language>(),
            Err(TranslateError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_llm_names() {
        assert_eq!(Language::SimplifiedChinese.llm_name(), "Simplified Chinese");
        assert_eq!(Language::Korean.llm_name(), "Korean");
    }

    #[test]
    fn test_deserialize_partial() {
        let options: TranslateOptions = serde_json::from_str(&options_json("")).unwrap();
        assert_eq!(options.max_chunk_tokens, 2000);
        assert_eq!(options.max_fragment_tokens, 512);
        assert_eq!(options.threads, 4);
        assert_eq!(options.count_unit, CountUnit::Token);
        assert_eq!(options.empty_translation, EmptyTranslation::KeepOriginal);
        assert_eq!(options.retry.retry_times, 3);
        assert!(!options.best_effort);
        options.validate().unwrap();
    }

    #[test]
    fn test_deserialize_overrides() {
        let options: TranslateOptions = serde_json::from_str(&options_json(
            r#", "maxChunkTokens": 800, "countUnit": "char", "threads": 1"#,
        ))
        .unwrap();
        assert_eq!(options.max_chunk_tokens, 800);
        assert_eq!(options.count_unit, CountUnit::Char);
        assert_eq!(options.threads, 1);
    }

    #[test]
    fn test_validate_rejects_missing_key() {
        let mut options: TranslateOptions = serde_json::from_str(&options_json("")).unwrap();
        options.llm.api_key = "  ".into();
        assert!(matches!(
            options.validate(),
            Err(TranslateError::MissingCredentials("apiKey"))
        ));
    }

    #[test]
    fn test_timeout_zero_is_unbounded() {
        let mut options: TranslateOptions = serde_json::from_str(&options_json("")).unwrap();
        assert!(options.llm.timeout().is_none());
        options.llm.timeout_seconds = Some(0.0);
        assert!(options.llm.timeout().is_none());
        options.llm.timeout_seconds = Some(2.5);
        assert_eq!(
            options.llm.timeout(),
            Some(std::time::Duration::from_secs_f64(2.5))
        );
    }

    #[test]
    fn test_default_output_path() {
        let options: TranslateOptions = serde_json::from_str(&options_json("")).unwrap();
        let path = options.output_path();
        assert!(path.ends_with("output/history.translated.epub"));
    }
}
