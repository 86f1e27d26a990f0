//! Book-level orchestration: workspace, metadata, spine fan-out, repack.
//!
//! The pipeline runs four weighted stages (unzip 0.05, metadata 0.10,
//! spine 0.80, rezip 0.05). Spine items are translated by a bounded pool
//! of workers; within one page, groups stay sequential so overlap
//! bookkeeping and the per-page budget remain simple. Dropping the
//! returned future cancels the run at the next group boundary.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha512};
use tracing::{debug, info, warn};

use crate::archive::{rezip_epub, unzip_epub};
use crate::cache::TranslationCache;
use crate::config::TranslateOptions;
use crate::epub::{EpubPackage, NcxDocument, XHTML_MEDIA_TYPE};
use crate::error::{Result, TranslateError};
use crate::group::chunk_list;
use crate::llm::LlmClient;
use crate::page::{PageTranslator, TranslateFn};
use crate::progress::{Progress, ReportProgress, StageProgress};
use crate::tokenizer::TokenCounter;

/// Working files living beside the book mirror, never archived
const MIRROR_EXCLUDES: &[&str] = &["translated"];

pub struct Translator {
    options: TranslateOptions,
    llm: Arc<LlmClient>,
}

impl Translator {
    pub fn new(options: TranslateOptions) -> Result<Self> {
        options.validate()?;
        let llm = LlmClient::new(
            options.llm.clone(),
            options.retry.clone(),
            options.language,
            options.source_language,
            options.prompt.as_deref(),
            Some(options.working_dir.join("logs")),
        )?;
        Ok(Self {
            options,
            llm: Arc::new(llm),
        })
    }

    /// Translate the configured book; returns the output EPUB path
    pub async fn translate_file(&self, report: ReportProgress) -> Result<PathBuf> {
        let progress = Progress::new(report);
        let unzip_stage = progress.stage(0.05);
        let metadata_stage = progress.stage(0.10);
        let spine_stage = progress.stage(0.80);
        let rezip_stage = progress.stage(0.05);

        let mirror = self.prepare_workspace()?;
        unzip_stage.done();

        let cache = Arc::new(TranslationCache::open(&mirror.join("translated"))?);
        let translate = self.cached_translate_fn(cache);

        let mut package = EpubPackage::open(&mirror)?;
        self.translate_metadata(&mut package, &translate).await?;
        if let Some(ncx_path) = package.ncx_path() {
            self.translate_ncx(&ncx_path, &translate).await?;
        }
        metadata_stage.done();

        self.translate_spine(&package, &translate, &spine_stage)
            .await?;
        spine_stage.done();

        let output = self.options.output_path();
        rezip_epub(&mirror, &output, MIRROR_EXCLUDES)?;
        rezip_stage.done();
        info!("translated book written to {}", output.display());
        Ok(output)
    }

    /// Derive the mirror directory from `sha512(mtime:path)` of the
    /// source. A new key clears stale mirrors; the batch cache under a
    /// matching key survives so an interrupted run resumes for free.
    fn prepare_workspace(&self) -> Result<PathBuf> {
        let source = &self.options.source_file;
        let metadata = std::fs::metadata(source)
            .map_err(|_| TranslateError::Epub(format!("cannot read {}", source.display())))?;
        let mtime = metadata
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let mut hasher = Sha512::new();
        hasher.update(format!(
            "{}.{:09}:{}",
            mtime.as_secs(),
            mtime.subsec_nanos(),
            source.display()
        ));
        let key = hex::encode(hasher.finalize());

        let workspace = &self.options.working_dir;
        std::fs::create_dir_all(workspace)?;
        let mirror = workspace.join(&key);
        if !mirror.exists() {
            clear_stale_mirrors(workspace, &key)?;
        }

        // Re-extract unconditionally: source files come back pristine
        // even after a partial run, while translated/ stays in place.
        debug!("exploding {} into {}", source.display(), mirror.display());
        unzip_epub(source, &mirror)?;
        Ok(mirror)
    }

    /// Compose the LLM client with the content-addressed cache
    fn cached_translate_fn(&self, cache: Arc<TranslationCache>) -> TranslateFn {
        let llm = Arc::clone(&self.llm);
        Arc::new(move |texts: Vec<String>| {
            let llm = Arc::clone(&llm);
            let cache = Arc::clone(&cache);
            Box::pin(async move {
                let (values, _hit) = cache
                    .get_or_translate(&texts, || async { llm.translate_batch(&texts).await })
                    .await?;
                Ok(values)
            })
        })
    }

    /// Bilingual rewrite of OPF title and creators
    async fn translate_metadata(
        &self,
        package: &mut EpubPackage,
        translate: &TranslateFn,
    ) -> Result<()> {
        let mut changed = false;

        if let Some(title) = package.title() {
            let translated = self.translate_list(&[title.clone()], translate).await?;
            package.set_title(&link_translated(&title, &translated[0]));
            changed = true;
        }

        let authors = package.authors();
        if !authors.is_empty() {
            let translated = self.translate_list(&authors, translate).await?;
            let linked: Vec<String> = authors
                .iter()
                .zip(translated.iter())
                .map(|(origin, target)| link_translated(origin, target))
                .collect();
            package.set_authors(&linked);
            changed = true;
        }

        if changed {
            package.save()?;
        }
        Ok(())
    }

    /// Bilingual rewrite of every NCX `<text>` label, in document order
    async fn translate_ncx(&self, ncx_path: &Path, translate: &TranslateFn) -> Result<()> {
        let mut ncx = NcxDocument::open(ncx_path)?;
        let labels = ncx.labels();
        if labels.is_empty() {
            return Ok(());
        }
        let translated = self.translate_list(&labels, translate).await?;
        let linked: Vec<String> = labels
            .iter()
            .zip(translated.iter())
            .map(|(origin, target)| link_translated(origin, target))
            .collect();
        ncx.set_labels(&linked);
        ncx.save()
    }

    /// Translate a flat list, skipping blank entries while keeping the
    /// output aligned, and splitting over the group budget when needed.
    async fn translate_list(
        &self,
        texts: &[String],
        translate: &TranslateFn,
    ) -> Result<Vec<String>> {
        let mut output = vec![String::new(); texts.len()];
        let mut indexes = Vec::new();
        let mut contents = Vec::new();
        for (index, text) in texts.iter().enumerate() {
            if !text.trim().is_empty() {
                indexes.push(index);
                contents.push(text.clone());
            }
        }
        if contents.is_empty() {
            return Ok(output);
        }

        let counter = TokenCounter::new(self.options.count_unit);
        let mut cursor = 0usize;
        for batch in chunk_list(&contents, self.options.max_chunk_tokens, &counter) {
            let batch_len = batch.len();
            let translated = translate(batch).await?;
            for (offset, value) in translated.into_iter().enumerate() {
                output[indexes[cursor + offset]] = value;
            }
            cursor += batch_len;
        }
        Ok(output)
    }

    /// Fan spine items out over a bounded worker pool
    async fn translate_spine(
        &self,
        package: &EpubPackage,
        translate: &TranslateFn,
        stage: &StageProgress,
    ) -> Result<()> {
        let items: Vec<_> = package
            .spine_items()
            .into_iter()
            .filter(|item| item.media_type == XHTML_MEDIA_TYPE)
            .collect();
        if items.is_empty() {
            return Ok(());
        }

        let total = items.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let page_translator = Arc::new(PageTranslator::new(
            TokenCounter::new(self.options.count_unit),
            self.options.max_fragment_tokens,
            self.options.max_chunk_tokens,
            self.options.output_method,
            self.options.empty_translation,
        ));
        let best_effort = self.options.best_effort;

        let results: Vec<Result<()>> = stream::iter(items)
            .map(|item| {
                let translate = Arc::clone(translate);
                let page_translator = Arc::clone(&page_translator);
                let completed = Arc::clone(&completed);
                let stage = stage.clone();
                async move {
                    let outcome =
                        translate_spine_item(&page_translator, &item.path, &translate).await;
                    match outcome {
                        Ok(()) => {}
                        // Unparseable pages are logged and skipped; the
                        // rest of the book still translates.
                        Err(TranslateError::Xml(reason)) => {
                            warn!("skipping unparseable page {}: {reason}", item.href);
                        }
                        Err(e) if best_effort => {
                            warn!("best-effort: leaving {} untranslated: {e}", item.href);
                        }
                        Err(e) => return Err(e),
                    }
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    stage.set(done as f64 / total as f64);
                    Ok(())
                }
            })
            .buffer_unordered(self.options.threads)
            .collect()
            .await;

        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }
}

async fn translate_spine_item(
    page_translator: &PageTranslator,
    path: &Path,
    translate: &TranslateFn,
) -> Result<()> {
    let content = tokio::fs::read_to_string(path).await?;
    let translated = page_translator
        .translate_page(path, &content, translate, &|_| {})
        .await?;
    tokio::fs::write(path, translated).await?;
    Ok(())
}

/// `origin - target`, or the origin alone when the translation adds
/// nothing
fn link_translated(origin: &str, target: &str) -> String {
    if target.trim().is_empty() || origin == target {
        origin.to_string()
    } else {
        format!("{origin} - {target}")
    }
}

/// Drop mirror directories left over from other source versions
fn clear_stale_mirrors(workspace: &Path, keep_key: &str) -> Result<()> {
    for entry in std::fs::read_dir(workspace)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let is_mirror = name.len() == 128 && name.chars().all(|c| c.is_ascii_hexdigit());
        if is_mirror && name != keep_key && entry.path().is_dir() {
            debug!("removing stale mirror {name}");
            std::fs::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}

/// Translate one EPUB with the given options, reporting progress in
/// `0.0..=1.0`; returns the output path.
pub async fn translate_epub(options: TranslateOptions, report: ReportProgress) -> Result<PathBuf> {
    Translator::new(options)?.translate_file(report).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;

    #[test]
    fn test_link_translated() {
        assert_eq!(link_translated("Title", "标题"), "Title - 标题");
        assert_eq!(link_translated("Same", "Same"), "Same");
        assert_eq!(link_translated("Title", "  "), "Title");
    }

    #[test]
    fn test_clear_stale_mirrors_keeps_current_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let stale = "a".repeat(128);
        let current = "b".repeat(128);
        std::fs::create_dir_all(dir.path().join(&stale)).unwrap();
        std::fs::create_dir_all(dir.path().join(&current)).unwrap();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        std::fs::create_dir_all(dir.path().join("output")).unwrap();

        clear_stale_mirrors(dir.path(), &current).unwrap();
        assert!(!dir.path().join(&stale).exists());
        assert!(dir.path().join(&current).exists());
        assert!(dir.path().join("logs").exists());
        assert!(dir.path().join("output").exists());
    }

    fn options_with_stub_llm(dir: &Path) -> TranslateOptions {
        serde_json::from_str(&format!(
            r#"{{
                "sourceFile": "{src}",
                "language": "zh-Hans",
                "workingDir": "{ws}",
                "llm": {{
                    "apiKey": "sk-test",
                    "baseUrl": "http://127.0.0.1:1/v1",
                    "model": "m"
                }}
            }}"#,
            src = dir.join("in.epub").display(),
            ws = dir.join("ws").display(),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_translate_list_keeps_alignment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.epub"), b"").unwrap();
        let translator = Translator::new(options_with_stub_llm(dir.path())).unwrap();

        let stub: TranslateFn = Arc::new(|texts: Vec<String>| {
            Box::pin(async move {
                Ok(texts
                    .into_iter()
                    .map(|t| format!("T:{t}"))
                    .collect::<Vec<_>>())
            }) as BoxFuture<'static, Result<Vec<String>>>
        });

        let texts = vec![
            "one".to_string(),
            "   ".to_string(),
            "three".to_string(),
        ];
        let out = translator.translate_list(&texts, &stub).await.unwrap();
        assert_eq!(out, vec!["T:one", "", "T:three"]);
    }

    #[tokio::test]
    async fn test_missing_source_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = options_with_stub_llm(dir.path());
        options.source_file = dir.path().join("nope.epub");
        let translator = Translator::new(options).unwrap();
        let err = translator
            .translate_file(Arc::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::Epub(_)));
    }
}
