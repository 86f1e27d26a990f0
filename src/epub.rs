//! EPUB package access over an exploded mirror directory.
//!
//! The OPF is resolved through `META-INF/container.xml`, spine order
//! comes from joining `itemref@idref` against manifest `item@id`, and
//! Dublin Core title/creator plus NCX `<text>` labels are the metadata
//! surface the translator rewrites.

use std::path::{Path, PathBuf};

use crate::dom::{split_prologue, Document, NodeId};
use crate::error::{Result, TranslateError};

pub const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";
const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// One spine entry resolved to a file in the mirror
#[derive(Debug, Clone)]
pub struct SpineItem {
    pub href: String,
    pub media_type: String,
    pub path: PathBuf,
}

pub struct EpubPackage {
    opf_path: PathBuf,
    opf_dir: PathBuf,
    prologue: String,
    doc: Document,
}

impl EpubPackage {
    /// Open the package document of an exploded EPUB
    pub fn open(mirror_root: &Path) -> Result<Self> {
        let container_path = mirror_root.join("META-INF").join("container.xml");
        let container = std::fs::read_to_string(&container_path)
            .map_err(|_| TranslateError::Epub("missing META-INF/container.xml".into()))?;
        let container_doc = Document::parse(&container)?;

        let rootfile = container_doc
            .find_all("rootfile")
            .into_iter()
            .find_map(|id| attr(&container_doc, id, "full-path"))
            .ok_or_else(|| TranslateError::Epub("container.xml names no rootfile".into()))?;

        let opf_path = mirror_root.join(&rootfile);
        let content = std::fs::read_to_string(&opf_path)
            .map_err(|_| TranslateError::Epub(format!("missing package document {rootfile}")))?;
        let (prologue, body) = split_prologue(&content);
        let doc = Document::parse(body)?;
        let opf_dir = opf_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| mirror_root.to_path_buf());

        Ok(Self {
            opf_path,
            opf_dir,
            prologue: prologue.to_string(),
            doc,
        })
    }

    pub fn title(&self) -> Option<String> {
        self.doc
            .find_all("title")
            .first()
            .and_then(|&id| self.doc.node(id).text.clone())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn set_title(&mut self, title: &str) {
        if let Some(&id) = self.doc.find_all("title").first() {
            self.doc.node_mut(id).text = Some(title.to_string());
        }
    }

    pub fn authors(&self) -> Vec<String> {
        self.doc
            .find_all("creator")
            .iter()
            .filter_map(|&id| self.doc.node(id).text.clone())
            .filter(|t| !t.trim().is_empty())
            .collect()
    }

    /// Overwrite `dc:creator` fields in order; extra values are ignored
    pub fn set_authors(&mut self, authors: &[String]) {
        let ids = self.doc.find_all("creator");
        for (&id, author) in ids.iter().zip(authors.iter()) {
            self.doc.node_mut(id).text = Some(author.clone());
        }
    }

    /// Spine entries in reading order, resolved against the manifest
    pub fn spine_items(&self) -> Vec<SpineItem> {
        let mut items = Vec::new();
        let idrefs: Vec<String> = self
            .doc
            .find_all("itemref")
            .into_iter()
            .filter_map(|id| attr(&self.doc, id, "idref"))
            .collect();

        let manifest = self.doc.find_all("item");
        for idref in idrefs {
            let manifest_item = manifest
                .iter()
                .copied()
                .find(|&id| attr(&self.doc, id, "id").as_deref() == Some(idref.as_str()));
            let Some(item) = manifest_item else {
                continue;
            };
            let Some(href) = attr(&self.doc, item, "href") else {
                continue;
            };
            let media_type = attr(&self.doc, item, "media-type").unwrap_or_default();
            items.push(SpineItem {
                path: self.opf_dir.join(&href),
                href,
                media_type,
            });
        }
        items
    }

    /// Path of the NCX table of contents, when the book has one
    pub fn ncx_path(&self) -> Option<PathBuf> {
        self.doc.find_all("item").into_iter().find_map(|id| {
            let media_type = attr(&self.doc, id, "media-type")?;
            let href = attr(&self.doc, id, "href")?;
            if media_type == NCX_MEDIA_TYPE || href.ends_with(".ncx") {
                Some(self.opf_dir.join(href))
            } else {
                None
            }
        })
    }

    /// Write the (possibly mutated) package document back
    pub fn save(&self) -> Result<()> {
        let content = format!("{}{}", self.prologue, self.doc.to_xml());
        std::fs::write(&self.opf_path, content)?;
        Ok(())
    }
}

/// NCX navigation document with its `<text>` labels exposed in order
pub struct NcxDocument {
    path: PathBuf,
    prologue: String,
    doc: Document,
    text_nodes: Vec<NodeId>,
}

impl NcxDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let (prologue, body) = split_prologue(&content);
        let doc = Document::parse(body)?;
        let text_nodes = doc.find_all("text");
        Ok(Self {
            path: path.to_path_buf(),
            prologue: prologue.to_string(),
            doc,
            text_nodes,
        })
    }

    /// Contents of every `<text>` node in document order
    pub fn labels(&self) -> Vec<String> {
        self.text_nodes
            .iter()
            .map(|&id| self.doc.node(id).text.clone().unwrap_or_default())
            .collect()
    }

    /// Replace the label contents in the same order
    pub fn set_labels(&mut self, labels: &[String]) {
        for (&id, label) in self.text_nodes.iter().zip(labels.iter()) {
            self.doc.node_mut(id).text = Some(label.clone());
        }
    }

    pub fn save(&self) -> Result<()> {
        let content = format!("{}{}", self.prologue, self.doc.to_xml());
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

fn attr(doc: &Document, id: NodeId, name: &str) -> Option<String> {
    doc.node(id)
        .attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const OPF: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" xmlns:dc="http://purl.org/dc/elements/1.1/" version="2.0">
  <metadata>
    <dc:title>A History of Greek Mathematics</dc:title>
    <dc:creator>Thomas Heath</dc:creator>
    <dc:creator>Second Author</dc:creator>
  </metadata>
  <manifest>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="style.css" media-type="text/css"/>
    <item id="toc" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
  </manifest>
  <spine toc="toc">
    <itemref idref="ch2"/>
    <itemref idref="ch1"/>
  </spine>
</package>"#;

    const NCX: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="p1"><navLabel><text>Chapter One</text></navLabel><content src="ch1.xhtml"/></navPoint>
    <navPoint id="p2"><navLabel><text>Chapter Two</text></navLabel><content src="ch2.xhtml"/></navPoint>
  </navMap>
</ncx>"#;

    fn mirror() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("META-INF")).unwrap();
        std::fs::create_dir_all(dir.path().join("OEBPS")).unwrap();
        std::fs::write(dir.path().join("META-INF/container.xml"), CONTAINER).unwrap();
        std::fs::write(dir.path().join("OEBPS/content.opf"), OPF).unwrap();
        std::fs::write(dir.path().join("OEBPS/toc.ncx"), NCX).unwrap();
        dir
    }

    #[test]
    fn test_open_resolves_through_container() {
        let dir = mirror();
        let package = EpubPackage::open(dir.path()).unwrap();
        assert_eq!(
            package.title().as_deref(),
            Some("A History of Greek Mathematics")
        );
        assert_eq!(package.authors(), vec!["Thomas Heath", "Second Author"]);
    }

    #[test]
    fn test_missing_container_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            EpubPackage::open(dir.path()),
            Err(TranslateError::Epub(_))
        ));
    }

    #[test]
    fn test_spine_follows_itemref_order() {
        let dir = mirror();
        let package = EpubPackage::open(dir.path()).unwrap();
        let spine = package.spine_items();
        assert_eq!(spine.len(), 2);
        assert_eq!(spine[0].href, "ch2.xhtml");
        assert_eq!(spine[1].href, "ch1.xhtml");
        assert!(spine[0].path.ends_with("OEBPS/ch2.xhtml"));
        assert_eq!(spine[0].media_type, XHTML_MEDIA_TYPE);
    }

    #[test]
    fn test_ncx_found_by_media_type() {
        let dir = mirror();
        let package = EpubPackage::open(dir.path()).unwrap();
        assert!(package.ncx_path().unwrap().ends_with("OEBPS/toc.ncx"));
    }

    #[test]
    fn test_metadata_rewrite_round_trip() {
        let dir = mirror();
        let mut package = EpubPackage::open(dir.path()).unwrap();
        package.set_title("A History of Greek Mathematics - 希腊数学史");
        package.set_authors(&["Thomas Heath - 托马斯·希思".to_string()]);
        package.save().unwrap();

        let reopened = EpubPackage::open(dir.path()).unwrap();
        assert_eq!(
            reopened.title().as_deref(),
            Some("A History of Greek Mathematics - 希腊数学史")
        );
        assert_eq!(
            reopened.authors(),
            vec!["Thomas Heath - 托马斯·希思", "Second Author"]
        );

        let raw = std::fs::read_to_string(dir.path().join("OEBPS/content.opf")).unwrap();
        assert!(raw.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
    }

    #[test]
    fn test_ncx_labels_round_trip() {
        let dir = mirror();
        let mut ncx = NcxDocument::open(&dir.path().join("OEBPS/toc.ncx")).unwrap();
        assert_eq!(ncx.labels(), vec!["Chapter One", "Chapter Two"]);

        ncx.set_labels(&[
            "Chapter One - 第一章".to_string(),
            "Chapter Two - 第二章".to_string(),
        ]);
        ncx.save().unwrap();

        let reopened = NcxDocument::open(&dir.path().join("OEBPS/toc.ncx")).unwrap();
        assert_eq!(
            reopened.labels(),
            vec!["Chapter One - 第一章", "Chapter Two - 第二章"]
        );
        // Non-label structure intact
        let raw = std::fs::read_to_string(dir.path().join("OEBPS/toc.ncx")).unwrap();
        assert!(raw.contains(r#"<content src="ch1.xhtml"/>"#));
    }
}
