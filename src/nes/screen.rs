pub const SCREEN_WIDTH: usize = 256;
pub const SCREEN_HEIGHT: usize = 240;

/// One frame of output, row-major, each pixel packed as `0xRRGGBBAA`.
///
/// Buffers are allocated once and handed back and forth between the
/// emulation thread and the consumer; the PPU only ever overwrites pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualScreen {
    pixels: Vec<u32>,
    frame_number: u64,
}

impl Default for VirtualScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualScreen {
    pub fn new() -> Self {
        Self {
            pixels: vec![0x0000_00FF; SCREEN_WIDTH * SCREEN_HEIGHT],
            frame_number: 0,
        }
    }

    pub fn width(&self) -> usize {
        SCREEN_WIDTH
    }

    pub fn height(&self) -> usize {
        SCREEN_HEIGHT
    }

    #[inline]
    pub fn set_pixel(&mut self, x: usize, y: usize, rgba: u32) {
        if x < SCREEN_WIDTH && y < SCREEN_HEIGHT {
            self.pixels[y * SCREEN_WIDTH + x] = rgba;
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> u32 {
        self.pixels[(y % SCREEN_HEIGHT) * SCREEN_WIDTH + (x % SCREEN_WIDTH)]
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Sequence number of the frame last completed into this buffer.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub(crate) fn set_frame_number(&mut self, frame: u64) {
        self.frame_number = frame;
    }

    /// Rows left after trimming `overscan` lines from the top and bottom.
    pub fn visible_rows(&self, overscan: usize) -> impl Iterator<Item = &[u32]> {
        let trim = overscan.min(SCREEN_HEIGHT / 2);
        self.pixels
            .chunks_exact(SCREEN_WIDTH)
            .skip(trim)
            .take(SCREEN_HEIGHT - 2 * trim)
    }

    pub fn visible_height(&self, overscan: usize) -> usize {
        SCREEN_HEIGHT - 2 * overscan.min(SCREEN_HEIGHT / 2)
    }

    /// Appends the trimmed frame as R, G, B, A bytes.
    pub fn write_rgba_bytes(&self, overscan: usize, out: &mut Vec<u8>) {
        out.reserve(SCREEN_WIDTH * self.visible_height(overscan) * 4);
        for row in self.visible_rows(overscan) {
            for &px in row {
                out.extend_from_slice(&px.to_be_bytes());
            }
        }
    }

    pub fn copy_from(&mut self, other: &VirtualScreen) {
        self.pixels.copy_from_slice(&other.pixels);
        self.frame_number = other.frame_number;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overscan_trims_top_and_bottom() {
        let mut screen = VirtualScreen::new();
        screen.set_pixel(0, 8, 0x1122_33FF);
        let rows: Vec<&[u32]> = screen.visible_rows(8).collect();
        assert_eq!(rows.len(), 224);
        assert_eq!(rows[0][0], 0x1122_33FF);
    }

    #[test]
    fn rgba_bytes_are_channel_ordered() {
        let mut screen = VirtualScreen::new();
        screen.set_pixel(0, 0, 0x1122_33FF);
        let mut out = Vec::new();
        screen.write_rgba_bytes(0, &mut out);
        assert_eq!(out.len(), SCREEN_WIDTH * SCREEN_HEIGHT * 4);
        assert_eq!(&out[..4], &[0x11, 0x22, 0x33, 0xFF]);
    }
}
