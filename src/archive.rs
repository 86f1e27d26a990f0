//! EPUB archive explode/repack.
//!
//! An EPUB is an OCF ZIP: the `mimetype` entry must come first and be
//! stored uncompressed, everything else deflates. Unpacking mirrors the
//! archive into a directory the pipeline mutates in place.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::Result;

/// Explode `epub` into `dest`, preserving relative paths
pub fn unzip_epub(epub: &Path, dest: &Path) -> Result<()> {
    let file = File::open(epub)?;
    let mut archive = ZipArchive::new(file)?;
    std::fs::create_dir_all(dest)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            continue; // entry escaping the mirror root
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            std::io::copy(&mut entry, &mut out)?;
        }
    }
    Ok(())
}

/// Repack `src_dir` into an EPUB at `output`.
///
/// `exclude_top_level` names working files that live beside the book
/// mirror (cache, logs) and must not end up inside the archive.
pub fn rezip_epub(src_dir: &Path, output: &Path, exclude_top_level: &[&str]) -> Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(output)?;
    let mut writer = ZipWriter::new(file);

    let mimetype = src_dir.join("mimetype");
    if mimetype.is_file() {
        writer.start_file(
            "mimetype",
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
        )?;
        writer.write_all(&std::fs::read(&mimetype)?)?;
    }

    let mut files = Vec::new();
    collect_files(src_dir, src_dir, exclude_top_level, &mut files)?;
    files.sort();

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for relative in files {
        let name = relative.to_string_lossy().replace('\\', "/");
        if name == "mimetype" {
            continue;
        }
        writer.start_file(name, options)?;
        let content = std::fs::read(src_dir.join(&relative))?;
        writer.write_all(&content)?;
    }
    writer.finish()?;
    Ok(())
}

fn collect_files(
    base: &Path,
    dir: &Path,
    exclude_top_level: &[&str],
    out: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if dir == base {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if exclude_top_level.iter().any(|excluded| *excluded == name) {
                continue;
            }
        }
        if path.is_dir() {
            collect_files(base, &path, exclude_top_level, out)?;
        } else if let Ok(relative) = path.strip_prefix(base) {
            out.push(relative.to_path_buf());
        }
    }
    Ok(())
}
