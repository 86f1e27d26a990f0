//! Translatable-unit extraction and bilingual re-insertion.
//!
//! A parallel wrapper tree classifies every element. A TextLeaf is an
//! element whose tag is in the text-tag set and whose subtree contains
//! no TreeNode; it is serialised whole as one unit. Everything else is a
//! TreeNode whose interstitial `text`/`tail` strings become units in
//! document order. Banned tags contribute nothing and are never
//! descended.
//!
//! Insertion walks the same wrapper tree in the same order, so N
//! translations are consumed by exactly the N units that produced them.

use crate::config::OutputMethod;
use crate::dom::{Document, Node, NodeId, NodeKind};

/// Tags whose subtree may be translated as one unit
const TEXT_TAGS: [&str; 16] = [
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "a",
    "p",
    "span",
    "em",
    "strong",
    "blockquote",
    "pre",
    "code",
    "hr",
    "label",
];

/// Tags that are never translated and never descended
const BANNED_TAGS: [&str; 5] = ["title", "style", "css", "script", "metadata"];

fn is_text_tag(tag: &str) -> bool {
    TEXT_TAGS.contains(&tag)
}

fn is_banned_tag(tag: &str) -> bool {
    BANNED_TAGS.contains(&tag)
}

/// The original treats only spaces and newlines as ignorable
fn is_not_empty(text: &str) -> bool {
    text.chars().any(|c| c != ' ' && c != '\n')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WrapKind {
    TextLeaf,
    TreeNode,
    Comment,
}

#[derive(Debug)]
enum WrapEntry {
    /// Copied `text`/`tail` value in its interstitial position
    Text(String),
    /// Index into the wrapper arena
    Child(usize),
}

#[derive(Debug)]
struct Wrapper {
    dom: NodeId,
    kind: WrapKind,
    entries: Vec<WrapEntry>,
}

/// Extracts units from one document and splices translations back
pub struct TextPicker {
    method: OutputMethod,
    wrappers: Vec<Wrapper>,
    root: usize,
    /// Run-length of empty units preceding each picked unit (plus one
    /// trailing run), so translations line back up with skipped slots
    skip_runs: Vec<usize>,
    picked: usize,
}

impl TextPicker {
    pub fn new(doc: &Document, method: OutputMethod) -> Self {
        let mut wrappers = Vec::new();
        let root = wrap(doc, doc.root(), &mut wrappers);
        Self {
            method,
            wrappers,
            root,
            skip_runs: Vec::new(),
            picked: 0,
        }
    }

    /// Units of the document in order, whitespace-only units removed
    /// (their positions are remembered for [`Self::append_texts`])
    pub fn pick_texts(&mut self, doc: &Document) -> Vec<String> {
        let mut raw = Vec::new();
        self.collect(doc, self.root, &mut raw);

        self.skip_runs.clear();
        let mut pending_skips = 0usize;
        let mut picked = Vec::new();
        for text in raw {
            if is_not_empty(&text) {
                self.skip_runs.push(pending_skips);
                pending_skips = 0;
                picked.push(text);
            } else {
                pending_skips += 1;
            }
        }
        if pending_skips > 0 {
            self.skip_runs.push(pending_skips);
        }
        self.picked = picked.len();
        picked
    }

    /// Splice translations back into the DOM as bilingual siblings and
    /// doubled interstitial strings.
    ///
    /// `translations` aligns with the list returned by `pick_texts`;
    /// `None` leaves the corresponding source untouched.
    pub fn append_texts(&self, doc: &mut Document, translations: &[Option<String>]) {
        debug_assert_eq!(translations.len(), self.picked);

        let mut queue: Vec<Option<String>> = Vec::new();
        for (i, &skips) in self.skip_runs.iter().enumerate() {
            for _ in 0..skips {
                queue.push(None);
            }
            if i < translations.len() {
                queue.push(translations[i].clone());
            }
        }

        let mut cursor = 0usize;
        self.insert(doc, self.root, &queue, &mut cursor);
    }

    fn collect(&self, doc: &Document, index: usize, out: &mut Vec<String>) {
        let wrapper = &self.wrappers[index];
        match wrapper.kind {
            WrapKind::Comment => {}
            _ if is_banned_tag(doc.node(wrapper.dom).local_name()) => {}
            WrapKind::TextLeaf => out.push(self.serialize_unit(doc, wrapper.dom)),
            WrapKind::TreeNode => {
                for entry in &wrapper.entries {
                    match entry {
                        WrapEntry::Text(text) => out.push(text.clone()),
                        WrapEntry::Child(child) => self.collect(doc, *child, out),
                    }
                }
            }
        }
    }

    /// Walk mirroring `collect`; returns the node that now occupies this
    /// subtree's final position, which later interstitials hang off.
    fn insert(
        &self,
        doc: &mut Document,
        index: usize,
        queue: &[Option<String>],
        cursor: &mut usize,
    ) -> NodeId {
        let wrapper = &self.wrappers[index];
        let dom = wrapper.dom;
        match wrapper.kind {
            WrapKind::Comment => dom,
            _ if is_banned_tag(doc.node(dom).local_name()) => dom,
            WrapKind::TextLeaf => {
                let translation = queue.get(*cursor).cloned().flatten();
                *cursor += 1;
                let Some(translation) = translation else {
                    return dom;
                };
                let source = doc.node(dom);
                let mut sibling = Node::element(&source.tag);
                sibling.attrs = source.attrs.clone();
                sibling.text = Some(translation);
                match doc.insert_after(dom, sibling) {
                    Some(new_id) => {
                        // The source tail moves to the sibling through the
                        // parent's interstitial entry, if it was recorded.
                        doc.node_mut(dom).tail = None;
                        new_id
                    }
                    None => dom, // detached root; nowhere to put a sibling
                }
            }
            WrapKind::TreeNode => {
                let mut last: Option<NodeId> = None;
                for entry in &wrapper.entries {
                    match entry {
                        WrapEntry::Text(original) => {
                            let translation = queue.get(*cursor).cloned().flatten();
                            *cursor += 1;
                            let combined = match translation {
                                Some(t) => format!("{original}\n{t}"),
                                None => original.clone(),
                            };
                            match last {
                                None => doc.node_mut(dom).text = Some(combined),
                                Some(node) => doc.node_mut(node).tail = Some(combined),
                            }
                        }
                        WrapEntry::Child(child) => {
                            last = Some(self.insert(doc, *child, queue, cursor));
                        }
                    }
                }
                dom
            }
        }
    }

    fn serialize_unit(&self, doc: &Document, id: NodeId) -> String {
        match self.method {
            OutputMethod::Html => doc.subtree_html(id),
            OutputMethod::Text => doc.subtree_text(id),
        }
    }
}

fn wrap(doc: &Document, id: NodeId, wrappers: &mut Vec<Wrapper>) -> usize {
    let node = doc.node(id);
    if node.kind == NodeKind::Comment {
        wrappers.push(Wrapper {
            dom: id,
            kind: WrapKind::Comment,
            entries: Vec::new(),
        });
        return wrappers.len() - 1;
    }

    let mut entries = Vec::new();
    let mut has_tree_child = false;

    if let Some(text) = &node.text {
        if is_not_empty(text) {
            entries.push(WrapEntry::Text(text.clone()));
        }
    }

    for &child_id in &node.children {
        let child = wrap(doc, child_id, wrappers);
        if wrappers[child].kind != WrapKind::TextLeaf {
            has_tree_child = true;
        }
        entries.push(WrapEntry::Child(child));
        if let Some(tail) = &doc.node(child_id).tail {
            if is_not_empty(tail) {
                entries.push(WrapEntry::Text(tail.clone()));
            }
        }
    }

    let kind = if !has_tree_child && is_text_tag(doc.node(id).local_name()) {
        WrapKind::TextLeaf
    } else {
        WrapKind::TreeNode
    };
    wrappers.push(Wrapper { dom: id, kind, entries });
    wrappers.len() - 1
}
