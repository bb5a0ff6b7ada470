use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

use super::ansi::{tokens, Token};

/// Convert a captured line's SGR runs into a styled ratatui line.
///
/// Non-SGR escape sequences are dropped.
pub fn ansi_to_line(line: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut text = String::new();
    let mut style = Style::default();

    for token in tokens(line) {
        match token {
            Token::Glyph(c) => text.push(c),
            Token::Escape(seq) => {
                let Some(params) = seq
                    .strip_prefix("\u{1b}[")
                    .and_then(|rest| rest.strip_suffix('m'))
                else {
                    continue;
                };
                if !text.is_empty() {
                    spans.push(Span::styled(std::mem::take(&mut text), style));
                }
                style = apply_sgr(params, style);
            }
        }
    }

    if !text.is_empty() {
        spans.push(Span::styled(text, style));
    }
    Line::from(spans)
}

fn apply_sgr(raw: &str, mut style: Style) -> Style {
    let params: Vec<i32> = if raw.is_empty() {
        vec![0]
    } else {
        raw.split(';')
            .map(|v| if v.is_empty() { 0 } else { v.parse().unwrap_or(-1) })
            .collect()
    };

    let mut idx = 0usize;
    while idx < params.len() {
        match params[idx] {
            0 => style = Style::default(),
            1 => style = style.add_modifier(Modifier::BOLD),
            2 => style = style.add_modifier(Modifier::DIM),
            3 => style = style.add_modifier(Modifier::ITALIC),
            4 => style = style.add_modifier(Modifier::UNDERLINED),
            7 => style = style.add_modifier(Modifier::REVERSED),
            9 => style = style.add_modifier(Modifier::CROSSED_OUT),
            22 => style = style.remove_modifier(Modifier::BOLD | Modifier::DIM),
            23 => style = style.remove_modifier(Modifier::ITALIC),
            24 => style = style.remove_modifier(Modifier::UNDERLINED),
            27 => style = style.remove_modifier(Modifier::REVERSED),
            29 => style = style.remove_modifier(Modifier::CROSSED_OUT),
            code @ 30..=37 => style.fg = Some(Color::Indexed((code - 30) as u8)),
            code @ 90..=97 => style.fg = Some(Color::Indexed((code - 90 + 8) as u8)),
            code @ 40..=47 => style.bg = Some(Color::Indexed((code - 40) as u8)),
            code @ 100..=107 => style.bg = Some(Color::Indexed((code - 100 + 8) as u8)),
            38 | 48 => {
                if let Some((color, consumed)) = extended_color(&params, idx + 1) {
                    if params[idx] == 38 {
                        style.fg = Some(color);
                    } else {
                        style.bg = Some(color);
                    }
                    idx += consumed;
                }
            }
            39 => style.fg = None,
            49 => style.bg = None,
            _ => {}
        }
        idx += 1;
    }
    style
}

fn extended_color(params: &[i32], start: usize) -> Option<(Color, usize)> {
    match *params.get(start)? {
        5 => {
            let index = u8::try_from(*params.get(start + 1)?).ok()?;
            Some((Color::Indexed(index), 2))
        }
        2 => {
            let r = u8::try_from(*params.get(start + 1)?).ok()?;
            let g = u8::try_from(*params.get(start + 2)?).ok()?;
            let b = u8::try_from(*params.get(start + 3)?).ok()?;
            Some((Color::Rgb(r, g, b), 4))
        }
        _ => None,
    }
}
