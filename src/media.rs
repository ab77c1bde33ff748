use std::io::ErrorKind;
use std::io::Write as _;
use std::path::{Component, Path, PathBuf};

use crate::store::RecordKind;

pub(crate) const MEDIA_DIR: &str = "media";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MediaType {
    Png,
    Jpeg,
    Gif,
    Webp,
    Mp4,
    Webm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MediaCategory {
    Image,
    Video,
}

impl MediaType {
    fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "image/png" => Some(Self::Png),
            "image/jpeg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            "video/mp4" => Some(Self::Mp4),
            "video/webm" => Some(Self::Webm),
            _ => None,
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "mp4" => Some(Self::Mp4),
            "webm" => Some(Self::Webm),
            _ => None,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
        }
    }

    pub(crate) fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Mp4 => "video/mp4",
            Self::Webm => "video/webm",
        }
    }

    pub(crate) fn category(self) -> MediaCategory {
        match self {
            Self::Png | Self::Jpeg | Self::Gif | Self::Webp => MediaCategory::Image,
            Self::Mp4 | Self::Webm => MediaCategory::Video,
        }
    }
}

#[derive(Debug)]
pub(crate) enum MediaError {
    BadPath,
    NotFound,
    EmptyBody,
    UnsupportedType,
    Io(std::io::Error),
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaError::BadPath => f.write_str("invalid media path"),
            MediaError::NotFound => f.write_str("media file not found"),
            MediaError::EmptyBody => f.write_str("empty media body"),
            MediaError::UnsupportedType => f.write_str("unsupported media type"),
            MediaError::Io(err) => write!(f, "media io error: {err}"),
        }
    }
}

pub(crate) struct StoredMedia {
    pub(crate) media_type: MediaType,
    pub(crate) url: String,
}

/// Writes a media file under `media/{kind}/{record_id}/[{owner}/]` and returns
/// the URL it will be served from. The record id and owner become path
/// components, so both are validated against the record-id alphabet.
pub(crate) fn store_media(
    root: &Path,
    kind: RecordKind,
    record_id: &str,
    owner: Option<&str>,
    bytes: &[u8],
    content_type: Option<&str>,
    filename: Option<&str>,
) -> Result<StoredMedia, MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::EmptyBody);
    }
    if !crate::store::valid_record_id(record_id) {
        return Err(MediaError::BadPath);
    }
    if let Some(owner) = owner
        && !crate::store::valid_record_id(owner)
    {
        return Err(MediaError::BadPath);
    }

    let media_type = detect_media_type(content_type, filename, bytes)?;
    let base = sanitize_base_name(filename);
    let mut dir = format!("{}/{}/{}", MEDIA_DIR, kind.dir(), record_id);
    if let Some(owner) = owner {
        dir.push('/');
        dir.push_str(owner);
    }

    for _ in 0..10 {
        let suffix = random_suffix();
        let file_name = format!("{}-{}.{}", base, suffix, media_type.extension());
        let rel_path = format!("{dir}/{file_name}");
        let target = root.join(&rel_path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(MediaError::Io)?;
        }
        if target.exists() {
            continue;
        }
        atomic_write_bytes(&target, bytes).map_err(MediaError::Io)?;
        return Ok(StoredMedia {
            media_type,
            url: format!("/{rel_path}"),
        });
    }

    Err(MediaError::Io(std::io::Error::new(
        ErrorKind::AlreadyExists,
        "failed to allocate media file name",
    )))
}

/// Resolves a served media path under `{root}/media`, rejecting traversal and
/// symlinks component by component.
pub(crate) fn resolve_media_path(root: &Path, rel_path: &str) -> Result<PathBuf, MediaError> {
    let safe_path = relative_components(rel_path).ok_or(MediaError::BadPath)?;
    let media_root = root.join(MEDIA_DIR);
    let mut current = media_root.clone();

    for component in safe_path {
        current.push(component);
        match std::fs::symlink_metadata(&current) {
            Ok(metadata) => {
                if metadata.file_type().is_symlink() {
                    return Err(MediaError::BadPath);
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(MediaError::NotFound),
            Err(err) => return Err(MediaError::Io(err)),
        }
    }

    let resolved = std::fs::canonicalize(&current).map_err(|err| match err.kind() {
        ErrorKind::NotFound => MediaError::NotFound,
        _ => MediaError::Io(err),
    })?;
    let media_root = std::fs::canonicalize(&media_root).map_err(|err| match err.kind() {
        ErrorKind::NotFound => MediaError::NotFound,
        _ => MediaError::Io(err),
    })?;
    if !resolved.starts_with(&media_root) {
        return Err(MediaError::BadPath);
    }
    let metadata = std::fs::metadata(&resolved).map_err(|err| match err.kind() {
        ErrorKind::NotFound => MediaError::NotFound,
        _ => MediaError::Io(err),
    })?;
    if !metadata.is_file() {
        return Err(MediaError::NotFound);
    }
    Ok(resolved)
}

pub(crate) fn content_type_for_path(rel_path: &str) -> Option<&'static str> {
    let ext = Path::new(rel_path).extension()?.to_str()?;
    MediaType::from_extension(ext).map(MediaType::content_type)
}

fn detect_media_type(
    content_type: Option<&str>,
    filename: Option<&str>,
    bytes: &[u8],
) -> Result<MediaType, MediaError> {
    let content_type = content_type.filter(|value| *value != "application/octet-stream");
    let sniffed = sniff_media_type(bytes);
    if let Some(content_type) = content_type {
        let from_header =
            MediaType::from_content_type(content_type).ok_or(MediaError::UnsupportedType)?;
        if Some(from_header) != sniffed {
            return Err(MediaError::UnsupportedType);
        }
        return Ok(from_header);
    }

    if let Some(sniffed) = sniffed {
        return Ok(sniffed);
    }

    if let Some(filename) = filename
        && let Some(ext) = Path::new(filename).extension().and_then(|ext| ext.to_str())
        && let Some(kind) = MediaType::from_extension(ext)
    {
        return Ok(kind);
    }

    Err(MediaError::UnsupportedType)
}

fn sniff_media_type(bytes: &[u8]) -> Option<MediaType> {
    if bytes.len() >= 8 && bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(MediaType::Png);
    }
    if bytes.len() >= 3 && bytes[0] == 0xFF && bytes[1] == 0xD8 && bytes[2] == 0xFF {
        return Some(MediaType::Jpeg);
    }
    if bytes.len() >= 6 && (bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a")) {
        return Some(MediaType::Gif);
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return Some(MediaType::Webp);
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return Some(MediaType::Mp4);
    }
    if bytes.len() >= 4 && bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some(MediaType::Webm);
    }
    None
}

fn sanitize_base_name(filename: Option<&str>) -> String {
    let base = filename
        .and_then(|name| Path::new(name).file_stem().and_then(|stem| stem.to_str()))
        .unwrap_or("media");
    let mut out = String::with_capacity(base.len());
    let mut last_dash = false;

    for ch in base.chars() {
        let mapped = if ch.is_ascii_alphanumeric() {
            last_dash = false;
            Some(ch.to_ascii_lowercase())
        } else {
            if last_dash || out.is_empty() {
                continue;
            }
            last_dash = true;
            Some('-')
        };

        if let Some(mapped) = mapped {
            out.push(mapped);
        }
    }

    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "media".to_string()
    } else if trimmed.len() > 40 {
        trimmed[..40].to_string()
    } else {
        trimmed.to_string()
    }
}

fn random_suffix() -> String {
    let value: u16 = rand::random();
    format!("{:04x}", value)
}

fn relative_components(rel_path: &str) -> Option<Vec<std::ffi::OsString>> {
    if rel_path.is_empty() {
        return None;
    }
    let path = Path::new(rel_path);
    if path.is_absolute() {
        return None;
    }
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => components.push(part.to_os_string()),
            _ => return None,
        }
    }
    if components.is_empty() {
        return None;
    }
    Some(components)
}

fn atomic_write_bytes(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("missing parent directory"))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("media.bin");
    let pid = std::process::id();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    for attempt in 0..10u32 {
        let temp_name = format!(".{}.tmp-{}-{}-{}", file_name, pid, nanos, attempt);
        let temp_path = parent.join(temp_name);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
        {
            Ok(mut file) => {
                file.write_all(contents)?;
                file.flush()?;
                std::fs::rename(&temp_path, path)?;
                return Ok(());
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        ErrorKind::AlreadyExists,
        "failed to create temp file",
    ))
}
