//! Protocol-name utilities.
//!
//! Names crossing the kernel are not OS paths: they are slash-separated
//! sequences of non-empty components, always relative to the enclosing
//! service. The distinguished name `.` is the root of that service. `..`,
//! empty components, and leading or trailing slashes are invalid.

/// Returns true if `name` is a well-formed protocol name.
pub fn valid(name: &str) -> bool {
    if name == "." {
        return true;
    }
    if name.is_empty() || name.starts_with('/') || name.ends_with('/') {
        return false;
    }
    name.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

/// Entry-point convenience: strip the absolute-path spelling.
///
/// `/a/b` becomes `a/b`; `/` and the empty string become `.`. Validity is
/// still the caller's check — `normalize` only removes the one leading
/// slash an absolute name carries.
pub fn normalize(name: &str) -> String {
    let name = name.strip_prefix('/').unwrap_or(name);
    if name.is_empty() {
        ".".to_string()
    } else {
        name.to_string()
    }
}

/// Returns the keys that are prefix-directories of `name` — `k == name` or
/// `name` starts with `k + "/"` — longest first, ties broken
/// lexicographically.
pub fn match_paths<'a>(keys: impl IntoIterator<Item = &'a str>, name: &str) -> Vec<&'a str> {
    let mut matches: Vec<&str> = keys
        .into_iter()
        .filter(|k| is_prefix_dir(k, name))
        .collect();
    matches.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    matches
}

fn is_prefix_dir(key: &str, name: &str) -> bool {
    key == name || (name.len() > key.len() && name.starts_with(key) && name.as_bytes()[key.len()] == b'/')
}

/// Join two names, with `.` as the absorbing root on either side.
pub fn join(a: &str, b: &str) -> String {
    if a == "." || a.is_empty() {
        return if b.is_empty() { ".".to_string() } else { b.to_string() };
    }
    if b == "." || b.is_empty() {
        return a.to_string();
    }
    format!("{}/{}", a.trim_end_matches('/'), b)
}

/// Strip `prefix` and any leading slash from `name`, yielding the relative
/// portion. Stripping a name down to nothing yields `.`.
pub fn trim_prefix<'a>(name: &'a str, prefix: &str) -> &'a str {
    let rest = name.strip_prefix(prefix).unwrap_or(name);
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() { "." } else { rest }
}

/// The last segment of a name; `.` maps to itself.
pub fn base(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}
