/// Matches an RDB key path against a watch pattern. `*` matches one or more
/// whole `/`-separated segments; every other segment must match literally.
pub fn matches(pattern: &str, key: &str) -> bool {
    let pat_segs: Vec<&str> = pattern.split('/').collect();
    let key_segs: Vec<&str> = key.split('/').collect();
    match_segments(&pat_segs, &key_segs)
}

fn match_segments(pat: &[&str], key: &[&str]) -> bool {
    match pat.split_first() {
        None => key.is_empty(),
        Some((&"*", rest)) => (1..=key.len()).any(|take| match_segments(rest, &key[take..])),
        Some((seg, rest)) => match key.split_first() {
            Some((k, krest)) if k == seg => match_segments(rest, krest),
            _ => false,
        },
    }
}

/// `true` if `pattern` contains at least one `*` wildcard segment.
pub fn is_glob(pattern: &str) -> bool {
    pattern.split('/').any(|seg| seg == "*")
}
