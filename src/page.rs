//! Per-page translation pipeline: extract, group, translate, splice.
//!
//! The XML prologue is carried around the parse verbatim, namespaces are
//! lifted off the root for the duration, and the serialised result gets
//! its void tags repaired into XHTML-legal self-closing form, because
//! EPUB readers reject bare HTML ones.

use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

use crate::config::{EmptyTranslation, OutputMethod};
use crate::dom::Document;
use crate::error::{Result, TranslateError};
use crate::group::{drop_overlap, FragmentGrouper};
use crate::picker::TextPicker;
use crate::tokenizer::TokenCounter;

/// Batch translation callback: N non-empty sources in, N translations out
pub type TranslateFn =
    Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, Result<Vec<String>>> + Send + Sync>;

/// Per-page progress callback, fed `done/total` after every group
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

static P_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*<p[^>]*>").expect("valid regex"));
static P_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"</\s*p>\s*$").expect("valid regex"));
static WS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static VOID_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<((?:img|br|hr|input|col|base|meta|link|area)(?:\s[^>]*?)?)>").expect("valid regex")
});

pub struct PageTranslator {
    counter: TokenCounter,
    max_fragment: usize,
    max_group: usize,
    method: OutputMethod,
    empty_translation: EmptyTranslation,
}

impl PageTranslator {
    pub fn new(
        counter: TokenCounter,
        max_fragment: usize,
        max_group: usize,
        method: OutputMethod,
        empty_translation: EmptyTranslation,
    ) -> Self {
        Self {
            counter,
            max_fragment,
            max_group,
            method,
            empty_translation,
        }
    }

    /// Translate one XHTML page, returning the new page content
    pub async fn translate_page(
        &self,
        file_path: &Path,
        content: &str,
        translate: &TranslateFn,
        progress: ProgressFn<'_>,
    ) -> Result<String> {
        let (head, body) = crate::dom::split_prologue(content);

        // Books sometimes carry HTML-style `<br>`; self-close them so
        // the XML parser does not adopt the rest of the page as
        // children of the void element.
        let body = repair_void_tags(body);
        let mut doc = Document::parse(&body)?;
        doc.detach_root_namespaces();

        let mut picker = TextPicker::new(&doc, self.method);
        let source_units = picker.pick_texts(&doc);

        // Normalise for the model; whitespace-only results are skipped
        // but keep their index so the splice stays aligned.
        let mut unit_map: Vec<usize> = Vec::new();
        let mut llm_units: Vec<String> = Vec::new();
        for (index, unit) in source_units.iter().enumerate() {
            let normalised = self.normalise_unit(unit);
            if normalised.trim().is_empty() {
                continue;
            }
            unit_map.push(index);
            llm_units.push(normalised);
        }

        let grouper = FragmentGrouper::new(self.max_fragment, self.max_group, self.counter);
        let groups = grouper.split(&llm_units);
        let total_groups = groups.len();

        let mut per_unit: Vec<Vec<String>> = vec![Vec::new(); source_units.len()];
        for (position, group) in groups.iter().enumerate() {
            let sources: Vec<String> = group.iter().map(|f| f.text.clone()).collect();
            let mut translations = translate(sources.clone())
                .await
                .map_err(|e| TranslateError::page(file_path.to_path_buf(), &sources, e))?;
            let mut indices: Vec<usize> = group.iter().map(|f| f.index).collect();

            let previous_len = if position > 0 {
                groups[position - 1].len()
            } else {
                0
            };
            drop_overlap(
                &mut translations,
                position,
                total_groups,
                group.len(),
                previous_len,
            );
            drop_overlap(
                &mut indices,
                position,
                total_groups,
                group.len(),
                previous_len,
            );

            for (translation, &fragment_index) in translations.iter().zip(indices.iter()) {
                per_unit[unit_map[fragment_index]].push(translation.clone());
            }
            debug!(
                "translated {} group {}/{}",
                file_path.display(),
                position + 1,
                total_groups
            );
            progress((position + 1) as f64 / total_groups as f64);
        }
        if total_groups == 0 {
            progress(1.0);
        }

        let spliced: Vec<Option<String>> = per_unit
            .into_iter()
            .map(|parts| {
                let joined = parts.concat().trim().to_string();
                match self.empty_translation {
                    EmptyTranslation::KeepOriginal if joined.is_empty() => None,
                    EmptyTranslation::KeepOriginal => Some(joined),
                    EmptyTranslation::InsertEmpty => Some(joined),
                }
            })
            .collect();
        picker.append_texts(&mut doc, &spliced);

        doc.restore_root_namespaces();
        let html = repair_void_tags(&doc.to_html());
        Ok(format!("{head}{html}"))
    }

    /// Strip a `<p>` wrapper, collapse whitespace runs, and reduce
    /// markup units to their text rendering.
    fn normalise_unit(&self, unit: &str) -> String {
        let text = P_OPEN.replace(unit, "");
        let text = P_CLOSE.replace(&text, "");
        let text = WS_RUN.replace_all(&text, " ").into_owned();
        if self.method == OutputMethod::Text {
            // Text units carry no markup to strip away.
            return text;
        }
        match Document::parse(&format!("<p>{text}</p>")) {
            Ok(doc) => doc.subtree_text(doc.root()),
            Err(_) => text,
        }
    }
}

/// EPUB requires XHTML: void tags must self-close. Runs on the way in
/// (tolerate HTML-style pages) and on the way out (undo the HTML-form
/// serialisation).
fn repair_void_tags(html: &str) -> String {
    VOID_TAG
        .replace_all(html, |captures: &Captures<'_>| {
            let inner = &captures[1];
            if inner.ends_with('/') {
                captures[0].to_string()
            } else {
                format!("<{inner}/>")
            }
        })
        .into_owned()
}
