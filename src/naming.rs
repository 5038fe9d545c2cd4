//! Folder and file naming
//!
//! Templates use `{placeholder}` substitution. Every value inserted into a
//! template is percent-decoded and has illegal characters replaced through the
//! configured `char_replacement` map before it becomes a path component.

use crate::config::DownloadConfig;
use crate::types::{MediaRef, PostBody, Subject};
use chrono::NaiveDateTime;
use chrono::format::{Item, StrftimeItems};
use std::collections::HashMap;

/// Fallback for components that end up empty
const UNKNOWN: &str = "unknown";

/// Replacement for components that are only `.` or `..`
const DOT_PLACEHOLDER: &str = "_";

/// Make a string safe to use as a single path component
///
/// The text is percent-decoded first (media names often arrive encoded), then
/// every key of `char_map` is replaced by its value. Empty results become
/// `"unknown"`, and `.` or `..` become `"_"`.
///
/// # Examples
///
/// ```
/// use kemono_sync::naming::sanitize_component;
/// use std::collections::HashMap;
///
/// let map = HashMap::from([(":".to_string(), "_".to_string())]);
/// assert_eq!(sanitize_component("a%3Ab", &map), "a_b");
/// assert_eq!(sanitize_component("", &map), "unknown");
/// ```
pub fn sanitize_component(text: &str, char_map: &HashMap<String, String>) -> String {
    if text.is_empty() {
        return UNKNOWN.to_string();
    }

    let decoded = urlencoding::decode(text)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| text.to_string());

    let mut result = decoded;
    for (from, to) in char_map {
        if !from.is_empty() {
            result = result.replace(from.as_str(), to);
        }
    }
    // Control characters are never valid in file names.
    result.retain(|c| !c.is_control());

    match result.trim() {
        "" => UNKNOWN.to_string(),
        // Would resolve to the current or parent directory
        "." | ".." => DOT_PLACEHOLDER.to_string(),
        _ => result,
    }
}

/// Substitute `{key}` placeholders; unknown placeholders are left untouched
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Format a publish timestamp with a user-supplied strftime format
///
/// Invalid formats fall back to `YYYY-MM-DD`; a missing timestamp renders as an
/// empty string.
pub fn format_date(published: Option<NaiveDateTime>, date_format: &str) -> String {
    let Some(dt) = published else {
        return String::new();
    };

    let items: Vec<Item<'_>> = StrftimeItems::new(date_format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        tracing::warn!(date_format, "Invalid date format, using %Y-%m-%d");
        return dt.format("%Y-%m-%d").to_string();
    }
    dt.format_with_items(items.into_iter()).to_string()
}

/// Folder name for a subject, from `artist_folder_format`
pub fn subject_folder(subject: &Subject, config: &DownloadConfig) -> String {
    let map = &config.char_replacement;
    let name = sanitize_component(subject.display_name(), map);
    let service = sanitize_component(&subject.key.service, map);
    let id = sanitize_component(&subject.key.user_id, map);

    let rendered = render_template(
        &config.artist_folder_format,
        &[("name", &name), ("service", &service), ("id", &id)],
    );
    let folder = sanitize_component(&rendered, map).trim().to_string();

    if folder.is_empty() || folder == UNKNOWN {
        format!("{name}-{service}-{id}")
    } else {
        folder
    }
}

/// Folder name for a post, from `post_folder_format` and `date_format`
pub fn post_folder(post: &PostBody, config: &DownloadConfig) -> String {
    let map = &config.char_replacement;
    let title = if post.title.trim().is_empty() {
        "untitled".to_string()
    } else {
        sanitize_component(&post.title, map)
    };
    let published = format_date(post.published, &config.date_format);

    let rendered = render_template(
        &config.post_folder_format,
        &[("id", &post.id), ("title", &title), ("published", &published)],
    );
    let folder = sanitize_component(&rendered, map).trim().to_string();

    if folder.is_empty() || folder == UNKNOWN {
        sanitize_component(&post.id, map)
    } else {
        folder
    }
}

/// Name reported for a media reference, or `file{ext}` derived from its path
pub fn media_name(media: &MediaRef) -> String {
    if let Some(name) = media.name.as_deref()
        && !name.trim().is_empty()
    {
        return name.to_string();
    }

    let last = media.path.rsplit('/').next().unwrap_or_default();
    let (_, ext) = split_extension(last);
    format!("file{ext}")
}

/// Final on-disk name of the `idx`-th file of a post (0-based)
///
/// With `rename_images_only`, files whose extension is not listed in
/// `image_extensions` keep their original name.
pub fn file_name(name: &str, idx: usize, config: &DownloadConfig) -> String {
    let map = &config.char_replacement;
    let (base, ext) = split_extension(name);
    let ext_lower = ext.to_lowercase();

    let is_image = config
        .image_extensions
        .iter()
        .any(|e| e.to_lowercase() == ext_lower);

    if config.rename_images_only && !is_image {
        return if name.is_empty() {
            idx.to_string()
        } else {
            sanitize_component(name, map)
        };
    }

    let idx_str = idx.to_string();
    let safe_base = if base.is_empty() {
        idx_str.clone()
    } else {
        sanitize_component(base, map)
    };
    let safe_ext = if ext.is_empty() {
        String::new()
    } else {
        sanitize_component(ext, map)
    };

    let formatted = render_template(
        &config.file_name_format,
        &[("idx", &idx_str), ("name", &safe_base)],
    );
    let result = format!("{formatted}{safe_ext}").trim().to_string();

    if result.is_empty() {
        format!("{idx}{safe_ext}")
    } else {
        result
    }
}

/// Split `name` into base and extension (extension keeps its leading dot)
///
/// A leading dot alone does not start an extension (`.hidden` has none).
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}
