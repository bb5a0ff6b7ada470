use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};

/// Input destined for a pane: a tmux key name or literal text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneInput {
    Named(String),
    Literal(String),
}

/// What a key press means while a pane is interactive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractiveInput {
    Send(PaneInput),
    Exit,
    Copy,
    Paste,
    Noop,
}

pub fn translate_key(key: KeyEvent) -> InteractiveInput {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    let named = |name: &str| InteractiveInput::Send(PaneInput::Named(name.to_string()));
    match key.code {
        // Ctrl+\ arrives as Ctrl+4 (or raw FS) on most Unix terminals
        KeyCode::Char('\\' | '|' | '4') if ctrl => InteractiveInput::Exit,
        KeyCode::Char('\u{1c}') => InteractiveInput::Exit,
        KeyCode::Char('c' | 'C') if alt => InteractiveInput::Copy,
        KeyCode::Char('v' | 'V') if alt => InteractiveInput::Paste,
        KeyCode::Char(c) if ctrl && c.is_ascii_alphabetic() => {
            named(&format!("C-{}", c.to_ascii_lowercase()))
        }
        KeyCode::Char(c) if alt => named(&format!("M-{c}")),
        KeyCode::Char(c) => InteractiveInput::Send(PaneInput::Literal(c.to_string())),
        KeyCode::Enter => named("Enter"),
        KeyCode::Tab => named("Tab"),
        KeyCode::BackTab => named("BTab"),
        KeyCode::Backspace => named("BSpace"),
        KeyCode::Delete => named("DC"),
        KeyCode::Insert => named("IC"),
        KeyCode::Esc => named("Escape"),
        KeyCode::Up => named("Up"),
        KeyCode::Down => named("Down"),
        KeyCode::Left => named("Left"),
        KeyCode::Right => named("Right"),
        KeyCode::Home => named("Home"),
        KeyCode::End => named("End"),
        KeyCode::PageUp => named("PPage"),
        KeyCode::PageDown => named("NPage"),
        KeyCode::F(n) if (1..=12).contains(&n) => named(&format!("F{n}")),
        _ => InteractiveInput::Noop,
    }
}

/// Encode a mouse event as an SGR (1006) report relative to the pane origin
pub fn encode_mouse(event: &MouseEvent, origin_x: u16, origin_y: u16) -> Option<String> {
    let x = event.column.checked_sub(origin_x)? + 1;
    let y = event.row.checked_sub(origin_y)? + 1;
    let button = |b: MouseButton| match b {
        MouseButton::Left => 0,
        MouseButton::Middle => 1,
        MouseButton::Right => 2,
    };
    let (code, release) = match event.kind {
        MouseEventKind::Down(b) => (button(b), false),
        MouseEventKind::Up(b) => (button(b), true),
        MouseEventKind::Drag(b) => (button(b) + 32, false),
        MouseEventKind::ScrollUp => (64, false),
        MouseEventKind::ScrollDown => (65, false),
        _ => return None,
    };
    let suffix = if release { 'm' } else { 'M' };
    Some(format!("\u{1b}[<{code};{x};{y}{suffix}"))
}

/// Wrap multi-line pastes in bracketed-paste markers
pub fn encode_paste(text: &str) -> String {
    if text.contains('\n') {
        return format!("\u{1b}[200~{text}\u{1b}[201~");
    }
    text.to_string()
}
