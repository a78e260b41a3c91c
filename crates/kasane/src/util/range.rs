/// Byte range of a segment inside a larger resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    pub fn to_http_range(&self) -> String {
        if let Some(length) = self.length.filter(|length| *length > 0) {
            format!("bytes={}-{}", self.offset, self.offset + length - 1)
        } else {
            format!("bytes={}-", self.offset)
        }
    }

    /// Offset right after this range, used by playlists that omit offsets.
    pub fn end(&self) -> Option<u64> {
        self.length.map(|length| self.offset + length)
    }
}
