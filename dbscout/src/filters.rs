use glob::Pattern;
use std::path::Path;

/// Checks whether the file's extension is in the allowlist (case-insensitive).
///
/// Entries may be written with or without a leading dot.
pub fn has_valid_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

/// Compiles ignore patterns, dropping any that are not valid globs.
pub fn compile_patterns(ignore_patterns: &[String]) -> Vec<Pattern> {
    ignore_patterns
        .iter()
        .filter_map(|pattern| Pattern::new(pattern).ok())
        .collect()
}

/// Checks if a path matches one of the ignore patterns.
///
/// `path` is matched as given and also relative to `root`, so both
/// `"**/archive/**"` and `"archive/*"` style patterns work.
pub fn should_ignore(path: &Path, root: &Path, ignore_patterns: &[Pattern]) -> bool {
    if ignore_patterns.is_empty() {
        return false;
    }

    let normalized = path.to_string_lossy().replace('\\', "/");
    let relative = path
        .strip_prefix(root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|_| normalized.clone());

    ignore_patterns
        .iter()
        .any(|p| p.matches(&normalized) || p.matches(&relative))
}

/// Determines if a file should be indexed
pub fn should_include_file(
    path: &Path,
    root: &Path,
    extensions: &[String],
    ignore_patterns: &[Pattern],
) -> bool {
    has_valid_extension(path, extensions) && !should_ignore(path, root, ignore_patterns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_has_valid_extension() {
        let extensions = exts(&["csv", ".sql"]);
        assert!(has_valid_extension(Path::new("users.csv"), &extensions));
        assert!(has_valid_extension(Path::new("USERS.CSV"), &extensions)); // case insensitive
        assert!(has_valid_extension(Path::new("dump.sql"), &extensions)); // leading dot in allowlist
        assert!(!has_valid_extension(Path::new("notes.txt"), &extensions));
        assert!(!has_valid_extension(Path::new("README"), &extensions)); // no extension
    }

    #[test]
    fn test_should_ignore() {
        let root = Path::new("/data");
        let patterns = compile_patterns(&[
            "**/archive/**".to_string(),
            "*.bak.csv".to_string(),
            "[invalid".to_string(),
        ]);
        assert_eq!(patterns.len(), 2);

        assert!(should_ignore(Path::new("/data/archive/2019.csv"), root, &patterns));
        assert!(should_ignore(Path::new("/data/users.bak.csv"), root, &patterns));
        assert!(!should_ignore(Path::new("/data/users.csv"), root, &patterns));
        assert!(!should_ignore(Path::new("/data/archives.csv"), root, &patterns));
        assert!(!should_ignore(Path::new("/data/users.csv"), root, &[]));
    }

    #[test]
    fn test_should_include_file() {
        let root = Path::new("base");
        let extensions = exts(&["csv", "txt", "sql"]);
        let patterns = compile_patterns(&["tmp/*".to_string()]);

        assert!(should_include_file(
            Path::new("base/leak.txt"),
            root,
            &extensions,
            &patterns
        ));
        assert!(!should_include_file(
            Path::new("base/leak.json"),
            root,
            &extensions,
            &patterns
        ));
        assert!(!should_include_file(
            Path::new("base/tmp/leak.csv"),
            root,
            &extensions,
            &patterns
        ));
    }
}
