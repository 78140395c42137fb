/// Length of a tab stop, matching the viewer's rendering.
pub const TAB_STOP: u64 = 8;

/// Visible length of a raw line after tab expansion.
///
/// Counts bytes, with each tab padded to the next multiple of [`TAB_STOP`].
/// CR bytes left in the content (CRLF files) count like any other byte.
pub fn untabified_length(line: &[u8]) -> u64 {
    let mut total_spaces: u64 = 0;
    for (position, _) in line.iter().enumerate().filter(|(_, &b)| b == b'\t') {
        let spaces = TAB_STOP - ((position as u64 + total_spaces) % TAB_STOP) - 1;
        total_spaces += spaces;
    }
    line.len() as u64 + total_spaces
}

/// Incremental form of [`untabified_length`] for lines that arrive in
/// pieces. `bytes_so_far` and `spaces_so_far` carry the state of the open
/// line across block boundaries.
pub fn untabified_step(segment: &[u8], bytes_so_far: u64, spaces_so_far: u64) -> (u64, u64) {
    let mut total_spaces = spaces_so_far;
    for (position, _) in segment.iter().enumerate().filter(|(_, &b)| b == b'\t') {
        let position = bytes_so_far + position as u64;
        let spaces = TAB_STOP - ((position + total_spaces) % TAB_STOP) - 1;
        total_spaces += spaces;
    }
    (bytes_so_far + segment.len() as u64, total_spaces)
}
