//! Translate EPUB books with an OpenAI-compatible LLM while keeping the
//! structural markup intact.
//!
//! The pipeline walks the book spine, extracts translatable units from
//! each XHTML document, slices them into sentence-aware fragments,
//! packs those into token-budget groups with neighbour overlap for
//! context, sends numbered-line prompts to the model, and splices the
//! translations back into the DOM as bilingual siblings. Batches are
//! memoised on disk by content hash, so interrupted runs resume without
//! repeating finished work.
//!
//! ```no_run
//! use std::sync::Arc;
//! use epub_translator::{translate_epub, TranslateOptions};
//!
//! # async fn run(options: TranslateOptions) -> epub_translator::Result<()> {
//! let output = translate_epub(options, Arc::new(|p| eprintln!("{:.0}%", p * 100.0))).await?;
//! println!("written to {}", output.display());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cache;
pub mod config;
pub mod dom;
pub mod epub;
pub mod error;
pub mod group;
pub mod llm;
pub mod page;
pub mod picker;
pub mod progress;
pub mod splitter;
pub mod tokenizer;
pub mod translator;

pub use config::{
    CountUnit, EmptyTranslation, Language, LlmOptions, OutputMethod, RetryOptions,
    TranslateOptions,
};
pub use error::{ErrorCategory, Result, TranslateError};
pub use llm::LlmClient;
pub use progress::{Progress, ReportProgress};
pub use translator::{translate_epub, Translator};
