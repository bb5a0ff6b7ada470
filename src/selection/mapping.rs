use super::{ansi, SelectionPoint};
use crate::output::OutputBuffer;

/// Screen rectangle a pane's output is drawn into, plus its scroll state.
///
/// `scroll` counts lines scrolled up from the bottom (0 follows the tail).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub scroll: usize,
}

impl Viewport {
    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
            scroll: 0,
        }
    }

    pub fn max_scroll(&self, total_lines: usize) -> usize {
        total_lines.saturating_sub(usize::from(self.height))
    }

    /// Half-open range of buffer lines currently on screen
    pub fn visible_range(&self, total_lines: usize) -> (usize, usize) {
        if self.height == 0 {
            return (0, 0);
        }
        let offset = self.scroll.min(self.max_scroll(total_lines));
        let end = total_lines.saturating_sub(offset);
        let start = end.saturating_sub(usize::from(self.height));
        (start, end)
    }

    pub fn scroll_by(&mut self, delta: isize, total_lines: usize) {
        let next = if delta < 0 {
            self.scroll.saturating_sub(delta.unsigned_abs())
        } else {
            self.scroll.saturating_add(delta.unsigned_abs())
        };
        self.scroll = next.min(self.max_scroll(total_lines));
    }

    pub fn contains(&self, screen_x: u16, screen_y: u16) -> bool {
        screen_x >= self.x
            && screen_y >= self.y
            && u32::from(screen_x) < u32::from(self.x) + u32::from(self.width)
            && u32::from(screen_y) < u32::from(self.y) + u32::from(self.height)
    }

    /// Buffer position under a screen cell.
    ///
    /// Rows that don't show a buffer line give None rather than clamping.
    pub fn point_at(
        &self,
        buffer: &OutputBuffer,
        screen_x: u16,
        screen_y: u16,
    ) -> Option<SelectionPoint> {
        if screen_y < self.y {
            return None;
        }
        let row = usize::from(screen_y - self.y);
        if row >= usize::from(self.height) {
            return None;
        }

        let (start, end) = self.visible_range(buffer.line_count());
        let line_idx = start + row;
        if line_idx >= end {
            return None;
        }

        let line = buffer.line(line_idx)?;
        let visual_x = usize::from(screen_x.saturating_sub(self.x));
        Some(SelectionPoint::new(line_idx, ansi::column_at(line, visual_x)))
    }
}
