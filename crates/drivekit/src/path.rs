//! Separator-safe path and key algebra.
//!
//! Logical paths are absolute, separator-delimited strings (`/a/b.txt`).
//! Backend keys are logical paths with the leading separator stripped and
//! the disk's root prefix folded in front (`tenant-1/a/b.txt`). Directory
//! keys carry a trailing separator when non-empty.
//!
//! [`join`] is the one place prefixes are concatenated; it is associative
//! and idempotent with respect to separators, so chained scoping can never
//! produce doubled or missing separators.

/// Strip leading and trailing separators.
pub fn trim(s: &str, sep: char) -> &str {
    s.trim_matches(sep)
}

/// Canonical form of a key fragment: split on the separator and drop
/// empty segments, so surrounding and internal doubled separators
/// collapse.
pub fn normalize(s: &str, sep: char) -> String {
    s.split(sep)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(&sep.to_string())
}

/// Join two key fragments with exactly one separator between them.
///
/// Either side may be empty and may carry stray separators anywhere;
/// both are normalized first, so the result never has surrounding or
/// doubled separators.
pub fn join(left: &str, right: &str, sep: char) -> String {
    let left = normalize(left, sep);
    let right = normalize(right, sep);
    match (left.is_empty(), right.is_empty()) {
        (true, true) => String::new(),
        (true, false) => right,
        (false, true) => left,
        (false, false) => format!("{left}{sep}{right}"),
    }
}

/// Directory form of a key: trailing separator when non-empty.
///
/// The empty key is the keyspace root and stays empty, so listing with
/// it as prefix matches everything.
pub fn directory_key(key: &str, sep: char) -> String {
    let key = trim(key, sep);
    if key.is_empty() {
        String::new()
    } else {
        format!("{key}{sep}")
    }
}

/// Resolve `input` against the absolute base path `base`.
///
/// Absolute inputs ignore the base; relative inputs are appended. `.`
/// and `..` segments are folded out, with `..` at the root staying at
/// the root. The result is always absolute.
pub fn resolve(base: &str, input: &str, sep: char) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let absolute = input.starts_with(sep);
    if !absolute {
        segments.extend(base.split(sep).filter(|s| !s.is_empty()));
    }
    for segment in input.split(sep) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let mut out = String::new();
    out.push(sep);
    out.push_str(&segments.join(&sep.to_string()));
    out
}

/// Logical parent of an absolute path; `None` at the root.
pub fn parent(path: &str, sep: char) -> Option<String> {
    let trimmed = trim(path, sep);
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind(sep) {
        Some(idx) => Some(format!("{sep}{}", &trimmed[..idx])),
        None => Some(sep.to_string()),
    }
}

/// Strip `prefix` (a directory-form key) from `key`.
///
/// Returns the remainder without a leading separator. Used to relativize
/// backend listing entries to the query root.
pub fn relative_to<'a>(key: &'a str, prefix: &str, sep: char) -> &'a str {
    let rest = key.strip_prefix(prefix).unwrap_or(key);
    rest.trim_start_matches(sep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn join_dedupes_separators() {
        assert_eq!(join("a", "b", '/'), "a/b");
        assert_eq!(join("a/", "/b", '/'), "a/b");
        assert_eq!(join("/a/", "b/", '/'), "a/b");
        assert_eq!(join("", "b", '/'), "b");
        assert_eq!(join("a", "", '/'), "a");
        assert_eq!(join("", "", '/'), "");
        // Internal doubled separators collapse too.
        assert_eq!(join("a//b", "c", '/'), "a/b/c");
        assert_eq!(join("a", "b///c", '/'), "a/b/c");
        assert_eq!(join("//", "//", '/'), "");
    }

    #[test]
    fn normalize_collapses_all_separator_runs() {
        assert_eq!(normalize("//a///b/", '/'), "a/b");
        assert_eq!(normalize("a/b", '/'), "a/b");
        assert_eq!(normalize("", '/'), "");
        assert_eq!(normalize("///", '/'), "");
    }

    #[test]
    fn directory_key_shapes() {
        assert_eq!(directory_key("a/b", '/'), "a/b/");
        assert_eq!(directory_key("/a/b/", '/'), "a/b/");
        assert_eq!(directory_key("", '/'), "");
        assert_eq!(directory_key("/", '/'), "");
    }

    #[test]
    fn resolve_relative_and_absolute() {
        assert_eq!(resolve("/", "a.txt", '/'), "/a.txt");
        assert_eq!(resolve("/docs", "a.txt", '/'), "/docs/a.txt");
        assert_eq!(resolve("/docs", "/a.txt", '/'), "/a.txt");
        assert_eq!(resolve("/docs", "./a.txt", '/'), "/docs/a.txt");
        assert_eq!(resolve("/docs/sub", "../a.txt", '/'), "/docs/a.txt");
        assert_eq!(resolve("/", "../../a.txt", '/'), "/a.txt");
        assert_eq!(resolve("/docs", "", '/'), "/docs");
    }

    #[test]
    fn parent_walks_to_root() {
        assert_eq!(parent("/a/b/c", '/'), Some("/a/b".to_string()));
        assert_eq!(parent("/a", '/'), Some("/".to_string()));
        assert_eq!(parent("/", '/'), None);
    }

    #[test]
    fn relative_to_strips_query_prefix() {
        assert_eq!(relative_to("dir/sub/b.txt", "dir/", '/'), "sub/b.txt");
        assert_eq!(relative_to("dir/a.txt", "dir/", '/'), "a.txt");
        assert_eq!(relative_to("a.txt", "", '/'), "a.txt");
    }

    proptest! {
        /// Folding prefixes one at a time equals folding them pairwise,
        /// whatever stray separators the inputs carry.
        #[test]
        fn join_is_associative(
            a in "[a-z/]{0,8}",
            b in "[a-z/]{0,8}",
            c in "[a-z/]{0,8}",
        ) {
            let left = join(&join(&a, &b, '/'), &c, '/');
            let right = join(&a, &join(&b, &c, '/'), '/');
            prop_assert_eq!(left, right);
        }

        #[test]
        fn join_never_doubles_separators(a in "[a-z/]{0,8}", b in "[a-z/]{0,8}") {
            let joined = join(&a, &b, '/');
            prop_assert!(!joined.contains("//"));
            prop_assert!(!joined.starts_with('/'));
            prop_assert!(!joined.ends_with('/'));
        }
    }
}
