//! Shell-style glob matching for channel patterns.
//!
//! Supported syntax: `*` (any run, including empty), `?` (one byte),
//! `[abc]`, `[a-z]`, `[!a]` / `[^a]` and `\x` escapes. Matching is
//! case-sensitive and covers the whole topic.

/// True if `text` matches the glob `pattern`.
pub fn pattern_match(text: &str, pattern: &str) -> bool {
    let text = text.as_bytes();
    let pattern = pattern.as_bytes();

    let (mut p, mut t) = (0usize, 0usize);
    // Position after the last `*` and the text index it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    while p < pattern.len() && pattern[p] == b'*' {
                        p += 1;
                    }
                    if p == pattern.len() {
                        return true;
                    }
                    backtrack = Some((p, t));
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    } else if text[t] == b'[' {
                        // Unterminated class: treat `[` literally.
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }

        match backtrack {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

/// Match one byte against the class starting at `pattern[start] == b'['`.
///
/// Returns `(matched, index after the closing ']')`, or `None` when the
/// class is not terminated.
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = matches!(pattern.get(i), Some(b'!') | Some(b'^'));
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    loop {
        let cur = *pattern.get(i)?;
        if cur == b']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        let lo = if cur == b'\\' {
            i += 1;
            *pattern.get(i)?
        } else {
            cur
        };

        if pattern.get(i + 1) == Some(&b'-') && pattern.get(i + 2).is_some_and(|&b| b != b']') {
            let mut hi = pattern[i + 2];
            i += 2;
            if hi == b'\\' {
                i += 1;
                hi = *pattern.get(i)?;
            }
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            if (lo..=hi).contains(&c) {
                matched = true;
            }
        } else if lo == c {
            matched = true;
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        assert!(pattern_match("news.sports", "news.sports"));
        assert!(!pattern_match("news.sports", "news.sport"));
        assert!(!pattern_match("news.sport", "news.sports"));
    }

    #[test]
    fn test_star() {
        assert!(pattern_match("news.sports", "news.*"));
        assert!(pattern_match("news.", "news.*"));
        assert!(!pattern_match("weather.today", "news.*"));
        assert!(pattern_match("anything", "*"));
        assert!(pattern_match("", "*"));
        assert!(pattern_match("a.b.c", "a*c"));
        assert!(pattern_match("abcbc", "*bc"));
        assert!(!pattern_match("abcbd", "*bc"));
    }

    #[test]
    fn test_question_mark() {
        assert!(pattern_match("log1", "log?"));
        assert!(!pattern_match("log", "log?"));
        assert!(!pattern_match("log12", "log?"));
    }

    #[test]
    fn test_classes() {
        assert!(pattern_match("h1", "h[0-9]"));
        assert!(!pattern_match("hx", "h[0-9]"));
        assert!(pattern_match("hb", "h[abc]"));
        assert!(pattern_match("hx", "h[!abc]"));
        assert!(!pattern_match("ha", "h[^abc]"));
        assert!(pattern_match("h]", "h[]]"));
    }

    #[test]
    fn test_escape() {
        assert!(pattern_match("a*b", "a\\*b"));
        assert!(!pattern_match("axb", "a\\*b"));
    }

    #[test]
    fn test_case_sensitive() {
        assert!(!pattern_match("News.sports", "news.*"));
    }

    #[test]
    fn test_unterminated_class_is_literal() {
        assert!(pattern_match("a[b", "a[b"));
        assert!(!pattern_match("ab", "a[b"));
    }
}
