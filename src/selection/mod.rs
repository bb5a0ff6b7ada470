pub mod ansi;
mod mapping;
mod render;

pub use mapping::Viewport;
pub use render::ansi_to_line;

use crate::output::OutputBuffer;

/// Background painted behind selected text (SGR parameters)
pub const SELECTION_BG: &str = "48;5;238";

/// A position in a pane's buffered output: buffer line and glyph column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPoint {
    pub line: usize,
    pub col: usize,
}

impl SelectionPoint {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }

    /// Line-then-column ordering
    pub fn before(self, other: Self) -> bool {
        self.line < other.line || (self.line == other.line && self.col < other.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState {
    Idle,
    Dragging,
    Settled,
}

/// Text selection over one pane's buffered output.
///
/// `start` and `end` are always ordered; `anchor` is where the drag began.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub start: Option<SelectionPoint>,
    pub end: Option<SelectionPoint>,
    pub anchor: Option<SelectionPoint>,
    pub active: bool,
    pub view: Option<Viewport>,
}

impl Selection {
    pub fn clear(&mut self) {
        self.start = None;
        self.end = None;
        self.anchor = None;
        self.active = false;
    }

    pub fn state(&self) -> SelectionState {
        match (self.active, self.has_selection()) {
            (true, _) => SelectionState::Dragging,
            (false, true) => SelectionState::Settled,
            (false, false) => SelectionState::Idle,
        }
    }

    pub fn has_selection(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }

    pub fn bounds(&self) -> Option<(SelectionPoint, SelectionPoint)> {
        Some((self.start?, self.end?))
    }

    pub fn contains(&self, point: SelectionPoint) -> bool {
        self.bounds()
            .is_some_and(|(start, end)| !point.before(start) && !end.before(point))
    }

    /// Pointer pressed on a captured line.
    ///
    /// Only records the anchor; a selection appears once the pointer moves.
    /// A press outside an existing range clears it.
    pub fn pointer_down(&mut self, point: SelectionPoint) {
        if self.has_selection() && !self.contains(point) {
            self.clear();
        }
        self.active = false;
        self.anchor = Some(point);
    }

    pub fn pointer_drag(&mut self, point: SelectionPoint) {
        let Some(anchor) = self.anchor else {
            return;
        };

        self.active = true;
        if point.before(anchor) {
            self.start = Some(point);
            self.end = Some(anchor);
        } else {
            self.start = Some(anchor);
            self.end = Some(point);
        }
    }

    pub fn pointer_up(&mut self) {
        if !self.has_selection() {
            self.clear();
            return;
        }
        self.active = false;
        self.anchor = None;
    }

    /// Selected glyph columns on one buffer line.
    ///
    /// `(col, None)` runs to the end of the line; `None` means not selected.
    pub fn line_selection_cols(&self, line: usize) -> Option<(usize, Option<usize>)> {
        let (start, end) = self.bounds()?;
        if line < start.line || line > end.line {
            return None;
        }

        if start.line == end.line {
            return Some((start.col, Some(end.col)));
        }
        if line == start.line {
            return Some((start.col, None));
        }
        if line == end.line {
            return Some((0, Some(end.col)));
        }

        Some((0, None))
    }

    /// A buffer line with the selected part highlighted
    pub fn render_line(&self, line_idx: usize, line: &str) -> String {
        match self.line_selection_cols(line_idx) {
            Some((start, end)) => ansi::highlight_range(line, start, end, SELECTION_BG),
            None => line.to_string(),
        }
    }

    /// Plain text to copy: the selected range, or the visible viewport when
    /// nothing is selected. None when that text is blank.
    pub fn copy_text(&self, buffer: &OutputBuffer) -> Option<String> {
        let lines: Vec<String> = match self.bounds() {
            Some((start, end)) => (start.line..=end.line)
                .filter_map(|idx| {
                    let line = buffer.line(idx)?;
                    let (from, to) = self.line_selection_cols(idx)?;
                    Some(ansi::glyph_slice(line, from, to))
                })
                .collect(),
            None => {
                let view = self.view?;
                let (lo, hi) = view.visible_range(buffer.line_count());
                buffer
                    .lines_range(lo, hi)
                    .into_iter()
                    .map(ansi::strip_ansi)
                    .collect()
            }
        };

        let text = lines.join("\n");
        if text.trim().is_empty() {
            return None;
        }
        Some(text)
    }
}
