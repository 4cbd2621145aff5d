pub(super) fn is_line_comment_start(bytes: &[u8], idx: usize, hash_comments: bool) -> bool {
    match bytes.get(idx) {
        Some(b'-') => bytes.get(idx + 1) == Some(&b'-'),
        Some(b'#') => hash_comments,
        _ => false,
    }
}

pub(super) fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

pub(super) fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

/// Recognise `$tag$` at `start`, returning the tag and the index of the closing `$`.
pub(super) fn try_start_dollar_quote(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let close = start + 1 + bytes[start + 1..].iter().position(|b| *b == b'$')?;
    let tag = &bytes[start + 1..close];
    if tag.first().is_some_and(u8::is_ascii_digit)
        || !tag.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_')
    {
        return None;
    }
    String::from_utf8(tag.to_vec()).ok().map(|tag| (tag, close))
}

pub(super) fn matches_tag(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let end = idx + 1 + tag.len();
    end < bytes.len()
        && bytes[idx + 1..end] == *tag.as_bytes()
        && bytes.get(end) == Some(&b'$')
}
