// paths.rs — Resource path helpers
//
// Resource names use '/' internally. Names coming from model definitions or
// archives may use '\', so everything passes through `normalize_separators`
// before lookup.

/// Replace '\' with '/'.
pub fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// File name with any leading directories removed.
pub fn skip_path(pathname: &str) -> &str {
    match pathname.rfind(['/', '\\']) {
        Some(pos) => &pathname[pos + 1..],
        None => pathname,
    }
}

fn extension_dot(input: &str) -> Option<usize> {
    let name_start = input.rfind(['/', '\\']).map_or(0, |p| p + 1);
    input[name_start..].rfind('.').map(|p| name_start + p)
}

/// Extension without the dot. A dot inside a directory name does not count.
pub fn file_extension(input: &str) -> &str {
    match extension_dot(input) {
        Some(pos) => &input[pos + 1..],
        None => "",
    }
}

/// Strip the extension (everything from the last '.' of the file name).
pub fn strip_extension(input: &str) -> &str {
    match extension_dot(input) {
        Some(pos) => &input[..pos],
        None => input,
    }
}

/// Replace the extension. `extension` includes its dot, or is empty to drop it.
pub fn change_extension(input: &str, extension: &str) -> String {
    format!("{}{}", strip_extension(input), extension)
}

/// File name without directories and extension.
pub fn file_stem(input: &str) -> &str {
    strip_extension(skip_path(input))
}

/// Join a directory prefix and a relative name with exactly one '/'.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    let dir = dir.trim_end_matches(['/', '\\']);
    let name = name.trim_start_matches(['/', '\\']);
    format!("{}/{}", dir, name)
}
