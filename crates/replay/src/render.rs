//! Terminal rendering of allocator state.

use core::{fmt, ops::Range};

use ansi_term::{Color, Palette};

use crate::trace::Handle;

/// Maximum number of cells in the overview bar.
const BAR_WIDTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Part of an allocation, labelled when the handle is known.
    Used(Option<Handle>),
    /// Consumed by alignment padding or allocator metadata.
    Padding,
    Free,
}

impl SegmentState {
    fn color(self) -> Color {
        match self {
            Self::Used(_) => Color::Yellow,
            Self::Padding => Color::DarkGray,
            Self::Free => Color::Green,
        }
    }

    fn cell(self) -> char {
        match self {
            Self::Used(_) => '#',
            Self::Padding => '+',
            Self::Free => '.',
        }
    }
}

/// A contiguous span of the buffer in a single state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub range: Range<usize>,
    pub state: SegmentState,
}

/// Displays a buffer as an overview bar followed by one line per segment.
#[derive(Debug)]
pub struct ChunkMap<'a> {
    pub title: &'a str,
    pub buffer_size: usize,
    pub segments: &'a [Segment],
    pub palette: Palette,
}

impl ChunkMap<'_> {
    fn state_at(&self, offset: usize) -> SegmentState {
        self.segments
            .iter()
            .find(|segment| segment.range.contains(&offset))
            .map_or(SegmentState::Free, |segment| segment.state)
    }
}

/// First byte covered by `cell` when `len` bytes are spread over `width`
/// cells, computed as `cell * len / width` without overflowing.
fn cell_start(cell: usize, len: usize, width: usize) -> usize {
    len / width * cell + len % width * cell / width
}

impl fmt::Display for ChunkMap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let palette = self.palette;
        let free: usize = self
            .segments
            .iter()
            .filter(|segment| segment.state == SegmentState::Free)
            .map(|segment| segment.range.len())
            .sum();
        writeln!(
            f,
            "{} {} bytes, {} free",
            palette.paint(Color::Blue, self.title),
            self.buffer_size,
            free
        )?;
        if self.buffer_size == 0 {
            return writeln!(f, "  (no buffer)");
        }

        let width = self.buffer_size.min(BAR_WIDTH);
        write!(f, "  [")?;
        for cell in 0..width {
            let state = self.state_at(cell_start(cell, self.buffer_size, width));
            write!(f, "{}", palette.paint(state.color(), state.cell()))?;
        }
        writeln!(f, "]")?;

        for segment in self.segments {
            let Range { start, end } = segment.range;
            let label = match segment.state {
                SegmentState::Used(Some(handle)) => format!("used {handle}"),
                SegmentState::Used(None) => "used".to_owned(),
                SegmentState::Padding => "padding".to_owned(),
                SegmentState::Free => "free".to_owned(),
            };
            writeln!(
                f,
                "  {start:>6}..{end:<6} {:>6} bytes  {}",
                end - start,
                palette.paint(segment.state.color(), label)
            )?;
        }
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain() {
        let segments = [
            Segment {
                range: 0..4,
                state: SegmentState::Used(Some(Handle(0))),
            },
            Segment {
                range: 4..8,
                state: SegmentState::Free,
            },
        ];
        let map = ChunkMap {
            title: "free-list",
            buffer_size: 8,
            segments: &segments,
            palette: Palette::PLAIN,
        };
        let text = map.to_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "free-list 8 bytes, 4 free");
        assert_eq!(lines[1], "  [####....]");
        assert!(lines[2].ends_with("4 bytes  used @0"));
        assert!(lines[3].ends_with("4 bytes  free"));
    }

    #[test]
    fn test_render_scales_bar() {
        let segments = [Segment {
            range: 0..1024,
            state: SegmentState::Free,
        }];
        let map = ChunkMap {
            title: "pool",
            buffer_size: 1024,
            segments: &segments,
            palette: Palette::PLAIN,
        };
        let bar = map.to_string().lines().nth(1).map(str::to_owned).unwrap();
        assert_eq!(bar.len(), BAR_WIDTH + 4);
    }

    #[test]
    fn test_cell_start() {
        assert_eq!(cell_start(0, 8, 8), 0);
        assert_eq!(cell_start(3, 8, 8), 3);
        assert_eq!(cell_start(5, 100, 64), 7);
        assert_eq!(cell_start(63, 100, 64), 98);
        assert_eq!(
            cell_start(BAR_WIDTH - 1, usize::MAX, BAR_WIDTH),
            usize::MAX - usize::MAX / 64 - 1
        );
    }

    #[test]
    fn test_render_without_buffer() {
        let map = ChunkMap {
            title: "stack",
            buffer_size: 0,
            segments: &[],
            palette: Palette::PLAIN,
        };
        assert_eq!(map.to_string(), "stack 0 bytes, 0 free\n  (no buffer)\n");
    }
}
