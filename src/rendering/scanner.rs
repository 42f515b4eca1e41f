/// Lexical context of the byte under the cursor.
#[derive(Clone)]
pub(super) enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

pub(super) fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

pub(super) fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

pub(super) fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

pub(super) fn is_marker_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'#') && bytes.get(idx + 1) == Some(&b'{')
}

/// Recognise `$tag$` at `start`; returns the tag and the index of the closing `$`.
pub(super) fn try_start_dollar_quote(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let mut idx = start + 1;
    while idx < bytes.len() && bytes[idx] != b'$' {
        let b = bytes[idx];
        if !(b.is_ascii_alphabetic() || b == b'_' || (idx > start + 1 && b.is_ascii_digit())) {
            return None;
        }
        idx += 1;
    }
    if idx < bytes.len() {
        let tag = std::str::from_utf8(&bytes[start + 1..idx]).ok()?.to_owned();
        Some((tag, idx))
    } else {
        None
    }
}

/// True when `$tag$` closes at `idx`.
pub(super) fn closes_dollar_quote(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let tag_end = idx + 1 + tag.len();
    bytes.get(idx) == Some(&b'$')
        && bytes.get(idx + 1..tag_end) == Some(tag.as_bytes())
        && bytes.get(tag_end) == Some(&b'$')
}

/// Body of a `#{...}` marker whose `{` sits just before `start`.
///
/// Returns the trimmed property path (anything after a `,` is an option list and ignored) and
/// the index of the closing `}`; `None` when the marker is never closed.
pub(super) fn scan_marker(sql: &str, start: usize) -> Option<(&str, usize)> {
    let close = start + sql.get(start..)?.find('}')?;
    let body = &sql[start..close];
    let property = body.split(',').next().unwrap_or(body).trim();
    Some((property, close))
}

pub(super) fn is_property_path(property: &str) -> bool {
    !property.is_empty()
        && property.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_quote_tags() {
        assert_eq!(
            try_start_dollar_quote(b"$body$ x", 0),
            Some(("body".to_string(), 5))
        );
        assert_eq!(try_start_dollar_quote(b"$$ x", 0), Some((String::new(), 1)));
        assert_eq!(try_start_dollar_quote(b"$1, $2", 0), None);
        assert!(closes_dollar_quote(b"x $body$", 2, "body"));
    }

    #[test]
    fn marker_bodies() {
        let sql = "#{ id , jdbcType=INTEGER} rest";
        assert_eq!(scan_marker(sql, 2), Some(("id", 24)));
        assert_eq!(scan_marker("#{id", 2), None);
        assert!(is_property_path("user.address_1"));
        assert!(!is_property_path("1abc"));
        assert!(!is_property_path("a..b"));
    }
}
