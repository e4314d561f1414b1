// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Self-describing, length-prefixed binary codec used both on the wire and for
snapshot files (§4.D). Every primitive is written/read with an explicit
little-endian byte order; every array is preceded by its element count so a
nested reader can validate independently of its parent's declared length.

Two transports share the same [`WireWriter`]/[`WireReader`] primitives: a
forward-skipping file stream ([`FileTransport`]) and an in-memory cursor over
a contiguous byte buffer ([`BufferTransport`]).
*/

use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};

pub mod error;
#[cfg(test)]
mod test;

pub use error::CodecError;

/// Write primitives shared by every transport.
pub trait WireWriter {
    fn write_bool(&mut self, v: bool) -> Result<(), CodecError>;
    fn write_i32(&mut self, v: i32) -> Result<(), CodecError>;
    fn write_u32(&mut self, v: u32) -> Result<(), CodecError>;
    fn write_f32(&mut self, v: f32) -> Result<(), CodecError>;
    fn write_f64(&mut self, v: f64) -> Result<(), CodecError>;
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError>;

    fn write_string(&mut self, s: &str) -> Result<(), CodecError> {
        self.write_array_len(s.len())?;
        self.write_bytes(s.as_bytes())
    }

    fn write_array_len(&mut self, len: usize) -> Result<(), CodecError> {
        self.write_u32(len as u32)
    }
}

/// Read primitives shared by every transport.
pub trait WireReader {
    fn read_bool(&mut self) -> Result<bool, CodecError>;
    fn read_i32(&mut self) -> Result<i32, CodecError>;
    fn read_u32(&mut self) -> Result<u32, CodecError>;
    fn read_f32(&mut self) -> Result<f32, CodecError>;
    fn read_f64(&mut self) -> Result<f64, CodecError>;
    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, CodecError>;

    fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_array_len(None)?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes)
            .map_err(|_| CodecError::DecodeValue { context: "utf-8 string".to_string() })
    }

    /// Reads a length prefix. If `expected` is `Some`, the decoded length
    /// must agree or this fails with `DecodeLength` (§4.D: "Readers must
    /// refuse to read when an array length disagrees with the contextually
    /// expected length").
    fn read_array_len(&mut self, expected: Option<usize>) -> Result<usize, CodecError> {
        let actual = self.read_u32()? as usize;
        if let Some(expected) = expected {
            if expected != actual {
                return Err(CodecError::DecodeLength { expected, actual });
            }
        }
        Ok(actual)
    }
}

/// A value that can encode itself onto any [`WireWriter`].
pub trait WireEncode {
    fn encode<W: WireWriter>(&self, w: &mut W) -> Result<(), CodecError>;
}

/// A value that can decode itself from any [`WireReader`].
pub trait WireDecode: Sized {
    fn decode<R: WireReader>(r: &mut R) -> Result<Self, CodecError>;
}

/// Writes a length-prefixed array of `T`.
pub fn write_vec<W: WireWriter, T: WireEncode>(w: &mut W, items: &[T]) -> Result<(), CodecError> {
    w.write_array_len(items.len())?;
    for item in items {
        item.encode(w)?;
    }
    Ok(())
}

/// Reads a length-prefixed array of `T`. If `expected_len` is `Some`, the
/// decoded length must match it.
pub fn read_vec<R: WireReader, T: WireDecode>(
    r: &mut R,
    expected_len: Option<usize>,
) -> Result<Vec<T>, CodecError> {
    let len = r.read_array_len(expected_len)?;
    (0..len).map(|_| T::decode(r)).collect()
}

/// Writes a complex spectrum as a 2N-element array, real then imag per
/// channel (§4.D: "Complex values are encoded as two floats ... inside a
/// 2N-element array").
pub fn write_complex_array<W: WireWriter>(w: &mut W, raw: &[(f32, f32)]) -> Result<(), CodecError> {
    w.write_array_len(raw.len() * 2)?;
    for (re, im) in raw {
        w.write_f32(*re)?;
        w.write_f32(*im)?;
    }
    Ok(())
}

/// Reads a complex spectrum written by [`write_complex_array`]. `num_channels`
/// is the contextually expected channel count; the decoded 2N length must
/// equal `2 * num_channels`.
pub fn read_complex_array<R: WireReader>(
    r: &mut R,
    num_channels: usize,
) -> Result<Vec<(f32, f32)>, CodecError> {
    let len = r.read_array_len(Some(num_channels * 2))?;
    (0..len / 2)
        .map(|_| Ok((r.read_f32()?, r.read_f32()?)))
        .collect()
}

macro_rules! impl_write_primitives {
    ($ty:ty) => {
        impl WireWriter for $ty {
            fn write_bool(&mut self, v: bool) -> Result<(), CodecError> {
                byteorder::WriteBytesExt::write_u8(self, v as u8).map_err(CodecError::from)
            }
            fn write_i32(&mut self, v: i32) -> Result<(), CodecError> {
                byteorder::WriteBytesExt::write_i32::<LittleEndian>(self, v).map_err(CodecError::from)
            }
            fn write_u32(&mut self, v: u32) -> Result<(), CodecError> {
                byteorder::WriteBytesExt::write_u32::<LittleEndian>(self, v).map_err(CodecError::from)
            }
            fn write_f32(&mut self, v: f32) -> Result<(), CodecError> {
                byteorder::WriteBytesExt::write_f32::<LittleEndian>(self, v).map_err(CodecError::from)
            }
            fn write_f64(&mut self, v: f64) -> Result<(), CodecError> {
                byteorder::WriteBytesExt::write_f64::<LittleEndian>(self, v).map_err(CodecError::from)
            }
            fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
                Write::write_all(self, bytes).map_err(CodecError::from)
            }
        }
        impl WireReader for $ty {
            fn read_bool(&mut self) -> Result<bool, CodecError> {
                Ok(byteorder::ReadBytesExt::read_u8(self)? != 0)
            }
            fn read_i32(&mut self) -> Result<i32, CodecError> {
                Ok(byteorder::ReadBytesExt::read_i32::<LittleEndian>(self)?)
            }
            fn read_u32(&mut self) -> Result<u32, CodecError> {
                Ok(byteorder::ReadBytesExt::read_u32::<LittleEndian>(self)?)
            }
            fn read_f32(&mut self) -> Result<f32, CodecError> {
                Ok(byteorder::ReadBytesExt::read_f32::<LittleEndian>(self)?)
            }
            fn read_f64(&mut self) -> Result<f64, CodecError> {
                Ok(byteorder::ReadBytesExt::read_f64::<LittleEndian>(self)?)
            }
            fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, CodecError> {
                let mut buf = vec![0u8; n];
                Read::read_exact(self, &mut buf)?;
                Ok(buf)
            }
        }
    };
}

/// Random-access file transport with forward skip, used for snapshot dumps
/// (§4.G / §6.2).
pub struct FileTransport {
    writer: Option<BufWriter<File>>,
    reader: Option<BufReader<File>>,
}

impl FileTransport {
    pub fn create(path: &std::path::Path) -> Result<Self, CodecError> {
        let file = File::create(path)?;
        Ok(Self { writer: Some(BufWriter::new(file)), reader: None })
    }

    pub fn open(path: &std::path::Path) -> Result<Self, CodecError> {
        let file = File::open(path)?;
        Ok(Self { writer: None, reader: Some(BufReader::new(file)) })
    }

    /// Skips `n` bytes forward without reading them.
    pub fn skip(&mut self, n: i64) -> Result<(), CodecError> {
        if let Some(r) = &mut self.reader {
            r.seek(SeekFrom::Current(n))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), CodecError> {
        if let Some(w) = &mut self.writer {
            w.flush()?;
        }
        Ok(())
    }
}

impl Write for FileTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.as_mut().expect("transport opened for writing").write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.writer.as_mut().expect("transport opened for writing").flush()
    }
}

impl Read for FileTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.as_mut().expect("transport opened for reading").read(buf)
    }
}

impl_write_primitives!(FileTransport);

/// In-memory buffer transport backed by a contiguous `Vec<u8>`, with an
/// internal read cursor. Writes append; reads advance the cursor.
#[derive(Default)]
pub struct BufferTransport {
    pub buf: Vec<u8>,
    pub pos: usize,
}

impl BufferTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }
}

impl Write for BufferTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for BufferTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl_write_primitives!(BufferTransport);

/// Writes a framed message: an 8-byte little-endian length prefix, then
/// `payload` (§6.1).
pub fn write_message<W: Write>(w: &mut W, payload: &[u8]) -> Result<(), CodecError> {
    let mut len_buf = [0u8; 8];
    LittleEndian::write_u64(&mut len_buf, payload.len() as u64);
    w.write_all(&len_buf)?;
    w.write_all(payload)?;
    Ok(())
}

/// Reads a framed message written by [`write_message`].
pub async fn read_message_async<R>(r: &mut R) -> Result<Vec<u8>, CodecError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;
    let mut len_buf = [0u8; 8];
    r.read_exact(&mut len_buf).await?;
    let len = LittleEndian::read_u64(&len_buf) as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Writes a framed message to an async writer.
pub async fn write_message_async<W>(w: &mut W, payload: &[u8]) -> Result<(), CodecError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;
    let mut len_buf = [0u8; 8];
    LittleEndian::write_u64(&mut len_buf, payload.len() as u64);
    w.write_all(&len_buf).await?;
    w.write_all(payload).await?;
    Ok(())
}
