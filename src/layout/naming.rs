//! File-name rules for archives derived from module and library names.

use std::sync::OnceLock;

use regex::Regex;

/// Archive extensions recognised when a custom output path names a file.
pub const ARCHIVE_EXTENSIONS: &[&str] = &[".jar", ".zip"];

/// Returns true when `path` names an archive rather than a directory.
pub fn is_archive_path(path: &str) -> bool {
    ARCHIVE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Convert a module name into the stem used for its default archive or
/// plugin directory (`platform.core.ui` -> `platform-core-ui`).
pub fn module_file_name(module: &str) -> String {
    module.replace('.', "-")
}

/// Archive name for a library packed into its own archive.
///
/// The name is lower-cased, every character outside `[a-z0-9._+-]` becomes
/// `-`, runs of `-` collapse and a trailing archive extension is not doubled:
/// `"My Lib 2.0"` -> `my-lib-2.0.jar`.
pub fn library_archive_name(library: &str) -> String {
    let lowered = library.trim().to_lowercase();
    let lowered = ARCHIVE_EXTENSIONS
        .iter()
        .find_map(|ext| lowered.strip_suffix(ext))
        .unwrap_or(&lowered);

    let mut sanitized = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        let ch = if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '+' | '-') {
            ch
        } else {
            '-'
        };
        if ch == '-' && sanitized.ends_with('-') {
            continue;
        }
        sanitized.push(ch);
    }

    let sanitized = sanitized.trim_matches('-');
    if sanitized.is_empty() {
        return "library.jar".to_string();
    }
    format!("{sanitized}.jar")
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<base>.+?)-\d+(?:\.\d+)*(?:[.-][A-Za-z0-9]+)*(?P<ext>\.(?:jar|zip))$")
            .unwrap_or_else(|e| unreachable!("version pattern is a valid regex: {e}"))
    })
}

/// Strip a trailing version from an archive file name.
///
/// `foo-1.2.3.jar` -> `foo.jar`, `guava-31.1-jre.jar` -> `guava.jar`. Names
/// without a version are returned unchanged, so the transform is idempotent.
pub fn strip_version(file_name: &str) -> String {
    match version_pattern().captures(file_name) {
        Some(caps) => format!("{}{}", &caps["base"], &caps["ext"]),
        None => file_name.to_string(),
    }
}
