//! `Content-Length` framing over async byte streams.
//!
//! Every frame is a header block followed by a body:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <payload>
//! ```
//!
//! Header names are matched case-insensitively; headers other than
//! `Content-Length` are ignored.

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

use crate::error::TransportError;

/// Reads frames from an async byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps a byte stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Reads the next frame body.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MissingContentLength`] or
    /// [`TransportError::InvalidHeader`] for a malformed header block, and
    /// [`TransportError::Io`] when the stream fails or ends mid-frame.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(length) = self.read_headers().await? else {
            return Ok(None);
        };
        let mut body = vec![0_u8; length];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(body))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>, TransportError> {
        let mut content_length = None;
        let mut seen_any = false;
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                if seen_any {
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "stream closed inside a header block",
                    )));
                }
                return Ok(None);
            }
            seen_any = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            let Some((name, value)) = trimmed.split_once(':') else {
                return Err(TransportError::InvalidHeader {
                    line: trimmed.to_owned(),
                });
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                let parsed = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| TransportError::InvalidHeader {
                        line: trimmed.to_owned(),
                    })?;
                content_length = Some(parsed);
            }
        }
        content_length
            .map(Some)
            .ok_or(TransportError::MissingContentLength)
    }
}

/// Writes frames to an async byte stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wraps a byte stream.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one frame and flushes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the stream rejects the write.
    pub async fn write_frame(&mut self, body: &[u8]) -> Result<(), TransportError> {
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shuts down the write half.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the stream fails to close.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
