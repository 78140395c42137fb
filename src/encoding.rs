/// Text codec of the underlying byte stream.
///
/// The indexer only needs to know how a line terminator is laid out in
/// bytes: `before_cr` filler bytes, the LF byte itself, then `after_cr`
/// filler bytes. Everything else about the codec matters only when a line
/// is decoded for display or matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextCodec {
    SingleByte,
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextCodec {
    /// Bytes belonging to the terminator that precede the LF byte.
    pub fn before_cr(self) -> u64 {
        match self {
            TextCodec::SingleByte | TextCodec::Utf8 | TextCodec::Utf16Le => 0,
            TextCodec::Utf16Be => 1,
        }
    }

    /// Bytes belonging to the terminator that follow the LF byte.
    pub fn after_cr(self) -> u64 {
        match self {
            TextCodec::SingleByte | TextCodec::Utf8 | TextCodec::Utf16Be => 0,
            TextCodec::Utf16Le => 1,
        }
    }

    /// Total terminator width in bytes.
    pub fn cr_size(self) -> u64 {
        self.before_cr() + 1 + self.after_cr()
    }

    /// Decode raw line bytes for display and matching. Lossy on purpose:
    /// a viewer must render whatever bytes the file contains.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextCodec::SingleByte => bytes.iter().map(|&b| b as char).collect(),
            TextCodec::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextCodec::Utf16Le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            TextCodec::Utf16Be => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }
}
