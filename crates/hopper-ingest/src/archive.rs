//! Archive pair discovery and filtered extraction
//!
//! A split directory holds content archives (audio) and label archives (JSON)
//! in two sibling folders. Archives pair up when their names agree after the
//! split's prefix tokens are stripped, e.g. `VS_talk_01.zip` and
//! `VL_talk_01.zip` both normalise to `talk_01`.

use flate2::read::GzDecoder;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// Folder under a split directory holding content archives
pub const CONTENT_DIR_NAME: &str = "01.원천데이터";

/// Folder under a split directory holding label archives
pub const LABEL_DIR_NAME: &str = "02.라벨링데이터";

const ZIP_EXTENSIONS: &[&str] = &[".zip"];
const TAR_GZ_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Detect the format from a file name, together with the extension matched
    fn detect_name(name: &str) -> Option<(Self, &'static str)> {
        let lower = name.to_ascii_lowercase();
        ZIP_EXTENSIONS
            .iter()
            .map(|ext| (ArchiveFormat::Zip, *ext))
            .chain(TAR_GZ_EXTENSIONS.iter().map(|ext| (ArchiveFormat::TarGz, *ext)))
            .find(|(_, ext)| lower.ends_with(ext))
    }

    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        Self::detect_name(name).map(|(format, _)| format)
    }
}

/// Archive file name without its archive extension
pub fn strip_archive_extension(name: &str) -> &str {
    match ArchiveFormat::detect_name(name) {
        Some((_, ext)) => &name[..name.len() - ext.len()],
        None => name,
    }
}

/// Prefix tokens of one split's content and label archives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixScheme {
    pub content: String,
    pub label: String,
}

impl PrefixScheme {
    pub fn new(content: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            label: label.into(),
        }
    }

    pub fn training() -> Self {
        Self::new("TS_", "TL_")
    }

    pub fn validation() -> Self {
        Self::new("VS_", "VL_")
    }

    /// Archive name with extension and leading prefix token removed
    pub fn normalize_id(&self, file_name: &str) -> String {
        let stem = strip_archive_extension(file_name);
        stem.strip_prefix(self.content.as_str())
            .or_else(|| stem.strip_prefix(self.label.as_str()))
            .unwrap_or(stem)
            .to_string()
    }

    /// Label archive name corresponding to a content archive name
    pub fn label_name_for(&self, content_name: &str) -> Option<String> {
        content_name
            .strip_prefix(self.content.as_str())
            .map(|body| format!("{}{body}", self.label))
    }
}

/// Content and label archive that belong together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePair {
    /// Normalised identifier shared by both archives
    pub id: String,
    pub content: PathBuf,
    pub label: PathBuf,
}

/// Folder names of a split directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairLayout {
    pub content_dir: String,
    pub label_dir: String,
}

impl Default for PairLayout {
    fn default() -> Self {
        Self {
            content_dir: CONTENT_DIR_NAME.to_string(),
            label_dir: LABEL_DIR_NAME.to_string(),
        }
    }
}

/// Pair every content archive of `split_dir` with its label archive.
///
/// Content archives are visited in name order. One whose label counterpart
/// is missing, or whose id was already taken by an earlier archive, is logged
/// and left out.
pub fn discover_pairs(
    split_dir: &Path,
    layout: &PairLayout,
    scheme: &PrefixScheme,
) -> Result<Vec<ArchivePair>> {
    let content_dir = split_dir.join(&layout.content_dir);
    let label_dir = split_dir.join(&layout.label_dir);

    let entries = std::fs::read_dir(&content_dir)
        .map_err(|e| IngestError::archive(content_dir.display().to_string(), e))?;

    let mut content_names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(scheme.content.as_str()) && ArchiveFormat::detect_name(name).is_some() {
                content_names.push(name.to_string());
            }
        }
    }
    content_names.sort();

    let mut pairs = Vec::with_capacity(content_names.len());
    let mut seen_ids = HashSet::new();
    for name in content_names {
        let Some(label_name) = scheme.label_name_for(&name) else {
            continue;
        };
        let label = label_dir.join(&label_name);

        if !label.is_file() {
            warn!(content = %name, expected = %label.display(), "No label archive for content archive, skipping");
            continue;
        }

        // The id names the pair's staging directory, so it must be unique
        let id = scheme.normalize_id(&name);
        if !seen_ids.insert(id.clone()) {
            warn!(content = %name, id = %id, "Another archive already uses this pair id, skipping");
            continue;
        }

        pairs.push(ArchivePair {
            id,
            content: content_dir.join(&name),
            label,
        });
    }

    debug!(split_dir = %split_dir.display(), pairs = pairs.len(), "Discovered archive pairs");
    Ok(pairs)
}

/// Base name of an archive entry if it should be extracted
fn wanted_entry(entry_path: &str, extension: &str) -> Option<String> {
    let normalized = entry_path.replace('\\', "/");
    if normalized.ends_with('/') || normalized.split('/').any(|part| part == "__MACOSX") {
        return None;
    }

    let base = normalized.rsplit('/').next()?;
    if base.is_empty() || base.starts_with("._") {
        return None;
    }

    base.to_ascii_lowercase()
        .ends_with(extension)
        .then(|| base.to_string())
}

fn copy_entry<R: Read>(reader: &mut R, dest: &Path) -> io::Result<u64> {
    let mut out = File::create(dest)?;
    io::copy(reader, &mut out)
}

/// Extract entries ending in `extension` from `archive` into `dest`, flattened
/// to their base names. Returns the number of files written.
pub fn extract_matching(archive: &Path, dest: &Path, extension: &str) -> Result<usize> {
    let format = ArchiveFormat::detect(archive)
        .ok_or_else(|| IngestError::archive(archive.display().to_string(), "unsupported archive format"))?;
    let file = File::open(archive).map_err(|e| IngestError::archive(archive.display().to_string(), e))?;
    let extension = extension.to_ascii_lowercase();

    let extracted = match format {
        ArchiveFormat::Zip => extract_zip(archive, file, dest, &extension)?,
        ArchiveFormat::TarGz => extract_tar_gz(archive, file, dest, &extension)?,
    };

    debug!(archive = %archive.display(), extracted, "Extracted archive entries");
    Ok(extracted)
}

fn extract_zip(archive: &Path, file: File, dest: &Path, extension: &str) -> Result<usize> {
    let label = || archive.display().to_string();
    let mut zip = zip::ZipArchive::new(io::BufReader::new(file)).map_err(|e| IngestError::archive(label(), e))?;
    let mut extracted = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| IngestError::archive(label(), e))?;
        if entry.is_dir() {
            continue;
        }
        let Some(base) = wanted_entry(entry.name(), extension) else {
            continue;
        };

        copy_entry(&mut entry, &dest.join(&base))
            .map_err(|e| IngestError::staging(format!("extracting {base} from {}", label()), e))?;
        extracted += 1;
    }

    Ok(extracted)
}

fn extract_tar_gz(archive: &Path, file: File, dest: &Path, extension: &str) -> Result<usize> {
    let label = || archive.display().to_string();
    let mut tar = tar::Archive::new(GzDecoder::new(io::BufReader::new(file)));
    let mut extracted = 0;

    for entry in tar.entries().map_err(|e| IngestError::archive(label(), e))? {
        let mut entry = entry.map_err(|e| IngestError::archive(label(), e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| IngestError::archive(label(), e))?
            .to_string_lossy()
            .into_owned();
        let Some(base) = wanted_entry(&path, extension) else {
            continue;
        };

        copy_entry(&mut entry, &dest.join(&base))
            .map_err(|e| IngestError::staging(format!("extracting {base} from {}", label()), e))?;
        extracted += 1;
    }

    Ok(extracted)
}
