use std::collections::VecDeque;

/// Fixed-capacity ring of the most recent lines captured from a pane
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append text, one entry per line, evicting the oldest lines past capacity
    pub fn write(&mut self, text: &str) {
        for line in split_lines(text) {
            if self.lines.len() == self.capacity {
                self.lines.pop_front();
            }
            self.lines.push_back(line.to_string());
        }
    }

    /// Replace the contents with a fresh capture.
    ///
    /// Returns false when the capture is identical to what is already held.
    pub fn replace(&mut self, text: &str) -> bool {
        let unchanged = {
            let incoming: Vec<&str> = split_lines(text).collect();
            let skip = incoming.len().saturating_sub(self.capacity);
            incoming.len() - skip == self.lines.len()
                && incoming[skip..]
                    .iter()
                    .zip(self.lines.iter())
                    .all(|(a, b)| *a == b.as_str())
        };
        if unchanged {
            return false;
        }
        self.lines.clear();
        self.write(text);
        true
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line(&self, idx: usize) -> Option<&str> {
        self.lines.get(idx).map(String::as_str)
    }

    /// Lines in `[lo, hi)`, clamped to what is held
    pub fn lines_range(&self, lo: usize, hi: usize) -> Vec<&str> {
        let hi = hi.min(self.lines.len());
        if lo >= hi {
            return Vec::new();
        }
        self.lines.range(lo..hi).map(String::as_str).collect()
    }

    /// The whole buffer joined back into text
    pub fn text(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let trimmed = text.strip_suffix('\n').unwrap_or(text);
    let empty = text.is_empty();
    trimmed
        .split('\n')
        .filter(move |_| !empty)
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
}
