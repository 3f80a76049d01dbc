use std::io;

/// The link's transmit primitive.
///
/// Every call carries one complete, zero-padded report. The engine logs a
/// failed write but never changes its state because of it; link-level
/// timeouts belong to the implementor.
pub trait ChunkWriter<const N: usize> {
    fn write_chunk(&mut self, chunk: &[u8; N]) -> io::Result<()>;
}

impl<const N: usize, W: ChunkWriter<N> + ?Sized> ChunkWriter<N> for &mut W {
    fn write_chunk(&mut self, chunk: &[u8; N]) -> io::Result<()> {
        (**self).write_chunk(chunk)
    }
}

/// Records every chunk, in order.
impl<const N: usize> ChunkWriter<N> for Vec<[u8; N]> {
    fn write_chunk(&mut self, chunk: &[u8; N]) -> io::Result<()> {
        self.push(*chunk);
        Ok(())
    }
}

/// A link that discards everything, for sessions that never answer.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullWriter;

impl<const N: usize> ChunkWriter<N> for NullWriter {
    fn write_chunk(&mut self, _chunk: &[u8; N]) -> io::Result<()> {
        Ok(())
    }
}
