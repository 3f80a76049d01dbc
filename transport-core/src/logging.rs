use core::fmt;

/// Bytes of payload shown in chunk log lines.
pub const LOG_PREVIEW: usize = 8;

/// Renders the first [`LOG_PREVIEW`] bytes of a buffer as hex.
#[derive(Copy, Clone)]
pub struct HexPreview<'a>(pub &'a [u8]);

impl fmt::Display for HexPreview<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.0.len().min(LOG_PREVIEW);
        for byte in &self.0[..shown] {
            write!(f, "{byte:02x}")?;
        }
        if self.0.len() > shown {
            write!(f, "..(+{})", self.0.len() - shown)?;
        }
        Ok(())
    }
}
