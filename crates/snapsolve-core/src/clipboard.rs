/// Best-effort sink that receives every delivered answer.
pub trait ClipboardSink {
    fn copy_text(&mut self, text: &str) -> anyhow::Result<()>;
}

/// System clipboard via `arboard`. The handle is opened on first use so a
/// headless host without a display still starts.
#[derive(Default)]
pub struct SystemClipboard {
    inner: Option<arboard::Clipboard>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClipboardSink for SystemClipboard {
    fn copy_text(&mut self, text: &str) -> anyhow::Result<()> {
        if self.inner.is_none() {
            self.inner = Some(arboard::Clipboard::new()?);
        }
        if let Some(clipboard) = self.inner.as_mut() {
            clipboard.set_text(text.to_string())?;
        }
        Ok(())
    }
}

pub struct NoClipboard;

impl ClipboardSink for NoClipboard {
    fn copy_text(&mut self, _text: &str) -> anyhow::Result<()> {
        anyhow::bail!("clipboard disabled")
    }
}
