use crate::error::CopyError;
use crate::output::OutputBuffer;
use crate::selection::Selection;

/// Copy the selection (or the visible viewport) to the system clipboard.
///
/// Returns the number of lines copied.
pub fn copy_selection(selection: &Selection, buffer: &OutputBuffer) -> Result<usize, CopyError> {
    let text = selection.copy_text(buffer).ok_or(CopyError::NothingToCopy)?;
    set_text(&text)?;
    Ok(text.lines().count())
}

pub fn set_text(text: &str) -> Result<(), CopyError> {
    let mut clipboard =
        arboard::Clipboard::new().map_err(|e| CopyError::Clipboard(e.to_string()))?;
    clipboard
        .set_text(text)
        .map_err(|e| CopyError::Clipboard(e.to_string()))
}

pub fn get_text() -> Result<String, CopyError> {
    let mut clipboard =
        arboard::Clipboard::new().map_err(|e| CopyError::Clipboard(e.to_string()))?;
    clipboard
        .get_text()
        .map_err(|e| CopyError::Clipboard(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_selection_is_nothing_to_copy() {
        let buffer = OutputBuffer::new(4);
        let err = copy_selection(&Selection::default(), &buffer).unwrap_err();
        assert!(matches!(err, CopyError::NothingToCopy));
    }
}
