//! OpenAI-compatible chat client speaking the numbered-line protocol.
//!
//! Sources go out as `1: text` lines; the reply is parsed line by line
//! and aligned by its numeric prefix. Models drop lines, renumber, or
//! prepend commentary under load, so parsing is tolerant: unmatched
//! lines are ignored and missing positions come back as empty strings.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{Language, LlmOptions, RetryOptions};
use crate::error::{Result, TranslateError};

static LINE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+):").expect("valid regex"));

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    top_p: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Batch translator over an OpenAI-compatible `/chat/completions`
pub struct LlmClient {
    client: reqwest::Client,
    endpoint: String,
    options: LlmOptions,
    retry: RetryOptions,
    system_prompt: String,
    log_dir: Option<PathBuf>,
    exchange_seq: AtomicU64,
}

impl LlmClient {
    pub fn new(
        options: LlmOptions,
        retry: RetryOptions,
        target: Language,
        source: Option<Language>,
        user_prompt: Option<&str>,
        log_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60));
        if let Some(timeout) = options.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let endpoint = format!("{}/chat/completions", options.base_url.trim_end_matches('/'));
        let system_prompt = build_system_prompt(target, source, user_prompt);

        if let Some(dir) = &log_dir {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("cannot create LLM log directory {}: {e}", dir.display());
            }
        }

        Ok(Self {
            client,
            endpoint,
            options,
            retry,
            system_prompt,
            log_dir,
            exchange_seq: AtomicU64::new(0),
        })
    }

    /// Translate a batch of non-empty source strings.
    ///
    /// Returns one string per input; positions the model did not answer
    /// are empty. Transport and shape failures retry `retry_times`
    /// additional attempts with a fixed pause between them.
    pub async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let user_content = build_user_content(texts);
        let attempts = self.retry.retry_times + 1;
        let interval = Duration::from_secs_f64(self.retry.retry_interval_seconds.max(0.0));

        let mut last_error: Option<TranslateError> = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(interval).await;
            }
            match self.request_once(&user_content, texts.len()).await {
                Ok(translated) => return Ok(translated),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    debug!(
                        "translation attempt {}/{} failed: {e}",
                        attempt + 1,
                        attempts
                    );
                    last_error = Some(e);
                }
                Err(e) if e.is_retryable() => {
                    return Err(TranslateError::RetryExhausted {
                        attempts,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Err(TranslateError::RetryExhausted {
            attempts,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt was made".into()),
        })
    }

    async fn request_once(&self, user_content: &str, expected: usize) -> Result<Vec<String>> {
        let request = ChatRequest {
            model: &self.options.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
            temperature: self.options.temperature,
            top_p: self.options.top_p,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.options.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            self.write_exchange_log(user_content, "", status.as_u16());
            return Err(TranslateError::from_status(status));
        }

        // Navigate the body by hand: a missing or reshaped field is a
        // protocol-shape error worth retrying, not a hard JSON failure.
        let body: serde_json::Value = response.json().await?;
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(TranslateError::MalformedResponse)?;
        self.write_exchange_log(user_content, content, status.as_u16());

        let (translated, aligned) = parse_numbered_lines(content, expected);
        if aligned == 0 {
            return Err(TranslateError::EmptyTranslation);
        }
        Ok(translated)
    }

    /// One plain-text log per exchange: request, response, status
    fn write_exchange_log(&self, request: &str, response: &str, status: u16) {
        let Some(dir) = &self.log_dir else {
            return;
        };
        let seq = self.exchange_seq.fetch_add(1, Ordering::Relaxed);
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f");
        let path = dir.join(format!("{stamp}-{seq}.log"));
        let body = format!(
            "POST {}\nstatus: {}\n\n--- request ---\n{}\n\n--- response ---\n{}\n",
            self.endpoint, status, request, response
        );
        if let Err(e) = std::fs::write(&path, body) {
            warn!("cannot write LLM exchange log {}: {e}", path.display());
        }
    }
}

/// `{n}: {text}` lines, newlines inside an entry flattened to spaces
fn build_user_content(texts: &[String]) -> String {
    texts
        .iter()
        .enumerate()
        .map(|(index, text)| {
            let flat = text.replace('\n', " ");
            format!("{}: {}", index + 1, flat.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Align a numbered-line reply against `expected` inputs.
///
/// Returns the translations (empty string where missing) and how many
/// lines aligned. Out-of-range indices and unnumbered lines are dropped.
fn parse_numbered_lines(content: &str, expected: usize) -> (Vec<String>, usize) {
    let mut translated = vec![String::new(); expected];
    let mut aligned = 0usize;
    for line in content.lines() {
        let Some(captures) = LINE_PREFIX.captures(line) else {
            continue;
        };
        let Ok(number) = captures[1].parse::<usize>() else {
            continue;
        };
        if number == 0 || number > expected {
            continue;
        }
        let rest = &line[captures[0].len()..];
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        translated[number - 1] = rest.to_string();
        aligned += 1;
    }
    (translated, aligned)
}

fn build_system_prompt(
    target: Language,
    source: Option<Language>,
    user_prompt: Option<&str>,
) -> String {
    let target = target.llm_name();
    let source = match source {
        Some(lang) => lang.llm_name().to_string(),
        None => "any language and you will detect the language".to_string(),
    };
    let mut prompt = format!(
        "I want you to act as an {target} translator, spelling corrector and improver.\n\
         Next user will speak to you in {source}, translate it and answer in the corrected \
         and improved version of the text, in {target}.\n\
         Keep the meaning same, but make the wording natural and fluent.\n\
         I want you to only reply the translation and nothing else, do not write explanations.\n\
         Next user will speak a passage. The passage is divided into multiple lines, each line \
         starting with a number (an Arabic numeral followed by a colon).\n\
         Your translation must also respond in multiple lines, with the corresponding number at \
         the beginning of each line of the translation.",
    );
    if let Some(extra) = user_prompt {
        let extra = extra.trim();
        if !extra.is_empty() {
            prompt.push('\n');
            prompt.push_str(extra);
        }
    }
    prompt
}
