/// System clipboard access for copying names and pasting paths.
pub fn copy_text(text: &str) -> anyhow::Result<()> {
    arboard::Clipboard::new().and_then(|mut cb| cb.set_text(text.to_string()))?;
    Ok(())
}

pub fn paste_text() -> anyhow::Result<String> {
    let text = arboard::Clipboard::new().and_then(|mut cb| cb.get_text())?;
    Ok(text)
}
