//! ANSI-aware measurement, stripping and highlighting of captured pane lines.
//!
//! Columns here are glyph indices into the line's visible characters.
//! Escape sequences are zero-width and never counted as glyphs.

use std::str::CharIndices;
use unicode_width::UnicodeWidthChar;

/// One piece of a raw captured line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Glyph(char),
    /// A complete escape sequence, including the leading ESC
    Escape(&'a str),
}

/// Splits a line into visible glyphs and escape sequences
pub struct Tokens<'a> {
    line: &'a str,
    chars: std::iter::Peekable<CharIndices<'a>>,
}

pub fn tokens(line: &str) -> Tokens<'_> {
    Tokens {
        line,
        chars: line.char_indices().peekable(),
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let (start, c) = self.chars.next()?;
        if c != '\u{1b}' {
            return Some(Token::Glyph(c));
        }

        match self.chars.next() {
            None => {}
            Some((_, '[')) => {
                for (_, value) in self.chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&value) {
                        break;
                    }
                }
            }
            Some((_, ']')) => {
                while let Some((_, value)) = self.chars.next() {
                    if value == '\u{7}' {
                        break;
                    }
                    if value == '\u{1b}' && self.chars.next_if(|(_, c)| *c == '\\').is_some() {
                        break;
                    }
                }
            }
            Some((_, 'P' | 'X' | '^' | '_')) => {
                while let Some((_, value)) = self.chars.next() {
                    if value == '\u{1b}' && self.chars.next_if(|(_, c)| *c == '\\').is_some() {
                        break;
                    }
                }
            }
            Some((_, '(' | ')' | '*' | '+' | '-' | '.' | '/' | '#')) => {
                let _ = self.chars.next();
            }
            Some(_) => {}
        }

        let end = self
            .chars
            .peek()
            .map(|(idx, _)| *idx)
            .unwrap_or(self.line.len());
        Some(Token::Escape(&self.line[start..end]))
    }
}

/// Display width of one visible character; control characters take no space
pub fn glyph_width(c: char) -> usize {
    if c.is_control() {
        return 0;
    }
    c.width().unwrap_or(0)
}

pub fn strip_ansi(line: &str) -> String {
    tokens(line)
        .filter_map(|t| match t {
            Token::Glyph(c) => Some(c),
            Token::Escape(_) => None,
        })
        .collect()
}

/// Width of the line in terminal cells
pub fn visual_width(line: &str) -> usize {
    tokens(line)
        .map(|t| match t {
            Token::Glyph(c) => glyph_width(c),
            Token::Escape(_) => 0,
        })
        .sum()
}

/// Glyph index under visual column `visual_x`.
///
/// Positions past the end clamp to the last glyph; an empty line yields 0.
pub fn column_at(line: &str, visual_x: usize) -> usize {
    let mut visual = 0usize;
    let mut last_visible = None;
    let glyphs = tokens(line).filter_map(|t| match t {
        Token::Glyph(c) => Some(c),
        Token::Escape(_) => None,
    });

    for (idx, c) in glyphs.enumerate() {
        let width = glyph_width(c);
        if width == 0 {
            continue;
        }
        if visual_x < visual + width {
            return idx;
        }
        visual += width;
        last_visible = Some(idx);
    }

    last_visible.unwrap_or(0)
}

/// Visible text of glyphs `start..=end` (`None` meaning to end of line)
pub fn glyph_slice(line: &str, start: usize, end: Option<usize>) -> String {
    let plain = strip_ansi(line);
    let take = match end {
        Some(end) if end >= start => end - start + 1,
        Some(_) => 0,
        None => usize::MAX,
    };
    plain.chars().skip(start).take(take).collect()
}

/// Paint a background over glyphs `start..=end` (`None` meaning to end of line).
///
/// `bg` is an SGR parameter list such as `48;5;238`. The range is closed with
/// a background-only reset so foreground and bold styling survive; any SGR
/// sequence inside the range is followed by the background again in case it
/// reset it.
pub fn highlight_range(line: &str, start: usize, end: Option<usize>, bg: &str) -> String {
    let open = format!("\u{1b}[{bg}m");
    let close = "\u{1b}[49m";
    let mut out = String::with_capacity(line.len() + 32);
    let mut glyph = 0usize;
    let mut inside = false;
    let mut done = false;

    for token in tokens(line) {
        match token {
            Token::Escape(seq) => {
                out.push_str(seq);
                if inside && is_sgr(seq) {
                    out.push_str(&open);
                }
            }
            Token::Glyph(c) => {
                if !done && !inside && glyph == start {
                    out.push_str(&open);
                    inside = true;
                }
                out.push(c);
                if inside && end == Some(glyph) {
                    out.push_str(close);
                    inside = false;
                    done = true;
                }
                glyph += 1;
            }
        }
    }

    if inside {
        out.push_str(close);
    }
    out
}

fn is_sgr(seq: &str) -> bool {
    seq.starts_with("\u{1b}[") && seq.ends_with('m')
}
