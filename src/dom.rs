//! Arena-backed XHTML document model.
//!
//! EPUB pages need sibling insertion relative to a parent, which rules
//! out an owned tree: nodes live in a flat `Vec` and refer to each other
//! by index. The text model follows lxml: an element owns the text
//! before its first child (`text`), and every node owns the text that
//! follows its own end tag (`tail`).
//!
//! Parsing is tolerant of the kind of damage real books carry: stray end
//! tags, unknown entities, unclosed inline elements.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Result, TranslateError};

pub type NodeId = usize;

/// HTML void elements, serialised without a closing tag (the page
/// pipeline repairs them into XHTML self-closing form afterwards)
pub const VOID_TAGS: [&str; 9] = [
    "img", "br", "hr", "input", "col", "base", "meta", "link", "area",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Comment,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// Tag name with prefix, e.g. `p` or `dc:title`; empty for comments
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    /// Element: text before the first child. Comment: the comment body.
    pub text: Option<String>,
    /// Text between this node's end tag and the next sibling
    pub tail: Option<String>,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
}

impl Node {
    pub fn element(tag: &str) -> Self {
        Self {
            kind: NodeKind::Element,
            tag: tag.to_string(),
            attrs: Vec::new(),
            text: None,
            tail: None,
            children: Vec::new(),
            parent: None,
        }
    }

    /// Tag without its namespace prefix
    pub fn local_name(&self) -> &str {
        match self.tag.rsplit_once(':') {
            Some((_, local)) => local,
            None => &self.tag,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    /// xmlns declarations lifted off the root, in source order
    namespaces: Vec<(String, String)>,
}

impl Document {
    /// Parse an XHTML/XML body (prologue already stripped by the caller)
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().check_end_names = false;

        let mut nodes: Vec<Node> = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut root: Option<NodeId> = None;

        loop {
            match reader
                .read_event()
                .map_err(|e| TranslateError::Xml(e.to_string()))?
            {
                Event::Start(start) => {
                    let id = push_element(&mut nodes, &mut stack, &mut root, &start)?;
                    stack.push(id);
                }
                Event::Empty(start) => {
                    push_element(&mut nodes, &mut stack, &mut root, &start)?;
                }
                Event::End(end) => {
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    // Tolerate stray end tags: close down to the matching
                    // open element, or ignore the tag entirely.
                    if let Some(pos) = stack.iter().rposition(|&id| nodes[id].tag == name) {
                        stack.truncate(pos);
                    }
                }
                Event::Text(text) => {
                    let raw = String::from_utf8_lossy(text.as_ref()).into_owned();
                    append_text(&mut nodes, &stack, &unescape_entities(&raw));
                }
                Event::CData(data) => {
                    let raw = String::from_utf8_lossy(data.as_ref()).into_owned();
                    append_text(&mut nodes, &stack, &raw);
                }
                Event::Comment(comment) => {
                    if let Some(&parent) = stack.last() {
                        let body = String::from_utf8_lossy(comment.as_ref()).into_owned();
                        let id = nodes.len();
                        nodes.push(Node {
                            kind: NodeKind::Comment,
                            tag: String::new(),
                            attrs: Vec::new(),
                            text: Some(body),
                            tail: None,
                            children: Vec::new(),
                            parent: Some(parent),
                        });
                        nodes[parent].children.push(id);
                    }
                }
                Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        let root = root.ok_or_else(|| TranslateError::Xml("document has no root element".into()))?;
        Ok(Self {
            nodes,
            root,
            namespaces: Vec::new(),
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Move xmlns declarations off the root so serialisation does not
    /// re-emit bound namespaces inline; restore before encoding.
    pub fn detach_root_namespaces(&mut self) {
        let root = self.root;
        let (ns, rest): (Vec<_>, Vec<_>) = self.nodes[root]
            .attrs
            .drain(..)
            .partition(|(key, _)| key == "xmlns" || key.starts_with("xmlns:"));
        self.nodes[root].attrs = rest;
        self.namespaces = ns;
    }

    pub fn restore_root_namespaces(&mut self) {
        let root = self.root;
        let ns = std::mem::take(&mut self.namespaces);
        // Declarations go back in front, where they came from.
        let rest = std::mem::take(&mut self.nodes[root].attrs);
        let mut attrs = ns;
        attrs.extend(rest);
        self.nodes[root].attrs = attrs;
    }

    /// Insert `node` as the next sibling of `id`; returns the new id
    pub fn insert_after(&mut self, id: NodeId, mut node: Node) -> Option<NodeId> {
        let parent = self.nodes[id].parent?;
        node.parent = Some(parent);
        let new_id = self.nodes.len();
        self.nodes.push(node);
        let position = self.nodes[parent]
            .children
            .iter()
            .position(|&child| child == id)?;
        self.nodes[parent].children.insert(position + 1, new_id);
        Some(new_id)
    }

    /// Element nodes in document order whose local name matches
    pub fn find_all(&self, local_name: &str) -> Vec<NodeId> {
        let mut found = Vec::new();
        self.walk(self.root, &mut |doc, id| {
            let node = doc.node(id);
            if node.kind == NodeKind::Element && node.local_name() == local_name {
                found.push(id);
            }
        });
        found
    }

    fn walk(&self, id: NodeId, visit: &mut impl FnMut(&Self, NodeId)) {
        visit(self, id);
        for &child in &self.nodes[id].children {
            self.walk(child, visit);
        }
    }

    /// Serialise the whole document in HTML form (void tags unclosed)
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_node(self.root, false, &mut out);
        out
    }

    /// Serialise the whole document as well-formed XML: every childless,
    /// textless element self-closes. Used for OPF and NCX files.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml_node(self.root, &mut out);
        out
    }

    /// Serialise one subtree, excluding its own tail
    pub fn subtree_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, true, &mut out);
        out
    }

    /// Text content of one subtree (comments skipped), excluding its tail
    pub fn subtree_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_text(id, true, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, skip_tail: bool, out: &mut String) {
        let node = &self.nodes[id];
        match node.kind {
            NodeKind::Comment => {
                out.push_str("<!--");
                if let Some(text) = &node.text {
                    out.push_str(text);
                }
                out.push_str("-->");
            }
            NodeKind::Element => {
                out.push('<');
                out.push_str(&node.tag);
                for (key, value) in &node.attrs {
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
                let is_void = VOID_TAGS.contains(&node.local_name())
                    && node.children.is_empty()
                    && node.text.as_deref().map_or(true, str::is_empty);
                out.push('>');
                if !is_void {
                    if let Some(text) = &node.text {
                        out.push_str(&escape_text(text));
                    }
                    for &child in &node.children {
                        self.write_node(child, false, out);
                    }
                    out.push_str("</");
                    out.push_str(&node.tag);
                    out.push('>');
                }
            }
        }
        if !skip_tail {
            if let Some(tail) = &node.tail {
                out.push_str(&escape_text(tail));
            }
        }
    }

    fn write_xml_node(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id];
        match node.kind {
            NodeKind::Comment => {
                out.push_str("<!--");
                if let Some(text) = &node.text {
                    out.push_str(text);
                }
                out.push_str("-->");
            }
            NodeKind::Element => {
                out.push('<');
                out.push_str(&node.tag);
                for (key, value) in &node.attrs {
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
                let empty =
                    node.children.is_empty() && node.text.as_deref().map_or(true, str::is_empty);
                if empty {
                    out.push_str("/>");
                } else {
                    out.push('>');
                    if let Some(text) = &node.text {
                        out.push_str(&escape_text(text));
                    }
                    for &child in &node.children {
                        self.write_xml_node(child, out);
                    }
                    out.push_str("</");
                    out.push_str(&node.tag);
                    out.push('>');
                }
            }
        }
        if let Some(tail) = &node.tail {
            out.push_str(&escape_text(tail));
        }
    }

    fn write_text(&self, id: NodeId, skip_tail: bool, out: &mut String) {
        let node = &self.nodes[id];
        if node.kind == NodeKind::Element {
            if let Some(text) = &node.text {
                out.push_str(text);
            }
            for &child in &node.children {
                self.write_text(child, false, out);
            }
        }
        if !skip_tail {
            if let Some(tail) = &node.tail {
                out.push_str(tail);
            }
        }
    }
}

/// Split the leading `<?xml ?>` declaration and optional `<!DOCTYPE>`
/// off a document, verbatim, for re-emission around a re-serialised body
pub fn split_prologue(content: &str) -> (&str, &str) {
    static PROLOGUE: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
        regex::Regex::new(r"(?s)^\s*(?:<\?xml.*?\?>\s*)?(?:<!DOCTYPE[^>]*>\s*)?")
            .expect("valid regex")
    });
    let head_len = PROLOGUE.find(content).map(|m| m.end()).unwrap_or(0);
    content.split_at(head_len)
}

fn push_element(
    nodes: &mut Vec<Node>,
    stack: &mut [NodeId],
    root: &mut Option<NodeId>,
    start: &quick_xml::events::BytesStart<'_>,
) -> Result<NodeId> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes().with_checks(false).flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let raw = String::from_utf8_lossy(&attr.value).into_owned();
        attrs.push((key, unescape_entities(&raw)));
    }

    let parent = stack.last().copied();
    let id = nodes.len();
    nodes.push(Node {
        kind: NodeKind::Element,
        tag,
        attrs,
        text: None,
        tail: None,
        children: Vec::new(),
        parent,
    });

    match parent {
        Some(parent) => nodes[parent].children.push(id),
        None => {
            if root.is_none() {
                *root = Some(id);
            }
        }
    }
    Ok(id)
}

/// Attach character data at the current parse position
fn append_text(nodes: &mut [Node], stack: &[NodeId], content: &str) {
    let Some(&current) = stack.last() else {
        return; // text outside the root element
    };
    let slot = match nodes[current].children.last() {
        Some(&last_child) => &mut nodes[last_child].tail,
        None => &mut nodes[current].text,
    };
    match slot {
        Some(existing) => existing.push_str(content),
        None => *slot = Some(content.to_string()),
    }
}

/// Resolve character and entity references the way a recovering HTML
/// parser would. Unknown named entities stay literal; escaping on output
/// renders them back as typed.
fn unescape_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        match after.find(';') {
            // Entity names are short; a distant semicolon means a bare '&'.
            Some(end) if end <= 10 => {
                let name = &after[..end];
                match resolve_entity(name) {
                    Some(ch) => out.push_str(&ch),
                    None => {
                        out.push('&');
                        out.push_str(name);
                        out.push(';');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_entity(name: &str) -> Option<String> {
    if let Some(body) = name.strip_prefix('#') {
        let code = if let Some(hex) = body.strip_prefix('x').or_else(|| body.strip_prefix('X')) {
            u32::from_str_radix(hex, 16).ok()?
        } else {
            body.parse::<u32>().ok()?
        };
        return char::from_u32(code).map(String::from);
    }
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "shy" => '\u{ad}',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "sect" => '§',
        "para" => '¶',
        "middot" => '·',
        "laquo" => '«',
        "raquo" => '»',
        "deg" => '°',
        "plusmn" => '±',
        "times" => '×',
        "divide" => '÷',
        "frac12" => '½',
        "frac14" => '¼',
        "frac34" => '¾',
        "ndash" => '–',
        "mdash" => '—',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "bdquo" => '„',
        "dagger" => '†',
        "Dagger" => '‡',
        "bull" => '•',
        "hellip" => '…',
        "permil" => '‰',
        "prime" => '′',
        "Prime" => '″',
        "lsaquo" => '‹',
        "rsaquo" => '›',
        "euro" => '€',
        "minus" => '−',
        "ensp" => '\u{2002}',
        "emsp" => '\u{2003}',
        "thinsp" => '\u{2009}',
        "zwnj" => '\u{200c}',
        "zwj" => '\u{200d}',
        _ => return None,
    };
    Some(ch.to_string())
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}
