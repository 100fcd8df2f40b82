/// Collects a stream of output chunks up to a byte limit. Bytes past the
/// limit are discarded but still counted as truncation, so the producer can
/// keep running while its output is capped.
#[derive(Debug)]
pub struct CappedOutput {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CappedOutput {
    pub fn new(limit: u64) -> Self {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Self {
            buf: Vec::with_capacity(limit.min(8 * 1024)),
            limit,
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.buf.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    /// Lossy UTF-8 text that never exceeds the byte limit, and whether any
    /// program output was lost. Replacement characters can push decoded text
    /// past the limit; cutting it back counts as truncation too.
    pub fn into_string(self) -> (String, bool) {
        let mut text = String::from_utf8_lossy(&self.buf).into_owned();
        let cut = truncate_at_char_boundary(&mut text, self.limit);
        (text, self.truncated || cut)
    }
}

pub fn truncate_at_char_boundary(text: &mut String, limit: usize) -> bool {
    if text.len() <= limit {
        return false;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    true
}
