// Copyright 2024 The GitVault Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![expect(missing_docs)]

//! Byte-stream wrappers used by the object codec and the pack reader.

use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;

use crate::object_id::HashAlgorithm;
use crate::object_id::Hasher;
use crate::object_id::ObjectId;

/// Reader that feeds every delivered byte into an incremental digest.
///
/// After [`HashingReader::finalize_hash`] the digest is frozen; further reads
/// pass through unhashed.
pub struct HashingReader<R> {
    inner: R,
    hasher: Option<Hasher>,
    finalized: Option<ObjectId>,
    bytes_read: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(algorithm: HashAlgorithm, inner: R) -> Self {
        Self {
            inner,
            hasher: Some(algorithm.hasher()),
            finalized: None,
            bytes_read: 0,
        }
    }

    /// Number of bytes delivered to the caller so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Returns the digest of everything read so far. Idempotent.
    pub fn finalize_hash(&mut self) -> ObjectId {
        if let Some(hasher) = self.hasher.take() {
            self.finalized = Some(hasher.finish());
        }
        self.finalized.clone().unwrap()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(hasher) = &mut self.hasher {
            hasher.update(&buf[..n]);
        }
        self.bytes_read += n as u64;
        Ok(n)
    }
}

/// Writer that feeds every written byte into an incremental digest.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Option<Hasher>,
    bytes_written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(algorithm: HashAlgorithm, inner: W) -> Self {
        Self {
            inner,
            hasher: Some(algorithm.hasher()),
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Returns the digest of everything written so far.
    ///
    /// Panics if called twice; that is a programming error, not a runtime
    /// condition.
    pub fn finalize_hash(&mut self) -> ObjectId {
        let hasher = self
            .hasher
            .take()
            .expect("finalize_hash() must be called exactly once");
        hasher.finish()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if let Some(hasher) = &mut self.hasher {
            hasher.update(&buf[..n]);
        }
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Read-only view over `[start, start + length)` of a seekable source.
///
/// The wrapper's position is relative to the slice start; reads beyond the
/// declared length report end of stream.
pub struct SlicedReader<R> {
    inner: R,
    start: u64,
    length: u64,
    position: u64,
}

impl<R: Read + Seek> SlicedReader<R> {
    pub fn new(mut inner: R, start: u64, length: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self {
            inner,
            start,
            length,
            position: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Read for SlicedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length - self.position;
        if remaining == 0 {
            return Ok(0);
        }
        let limit = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..limit])?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SlicedReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::End(offset) => i128::from(self.length) + i128::from(offset),
            SeekFrom::Current(offset) => i128::from(self.position) + i128::from(offset),
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the slice",
            ));
        }
        let target = u64::try_from(target).unwrap();
        self.inner.seek(SeekFrom::Start(self.start + target))?;
        self.position = target;
        Ok(target)
    }
}

/// Small-buffer reader for parsing delimiter-framed data such as loose-object
/// headers. Bytes read past the delimiter stay consumable.
const DELIMITED_READER_BUF_LEN: usize = 128;

pub struct DelimitedReader<R> {
    inner: R,
    buf: [u8; DELIMITED_READER_BUF_LEN],
    start: usize,
    end: usize,
}

impl<R: Read> DelimitedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: [0; DELIMITED_READER_BUF_LEN],
            start: 0,
            end: 0,
        }
    }

    /// Reads up to and including `delimiter`, returning the bytes before it.
    ///
    /// Fails with [`io::ErrorKind::UnexpectedEof`] if the stream ends first.
    pub fn read_until(&mut self, delimiter: u8) -> io::Result<Vec<u8>> {
        let mut out = vec![];
        loop {
            if let Some(pos) = self.buf[self.start..self.end]
                .iter()
                .position(|&b| b == delimiter)
            {
                out.extend_from_slice(&self.buf[self.start..self.start + pos]);
                self.start += pos + 1;
                return Ok(out);
            }
            out.extend_from_slice(&self.buf[self.start..self.end]);
            self.start = 0;
            self.end = self.inner.read(&mut self.buf)?;
            if self.end == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended before delimiter",
                ));
            }
        }
    }
}

impl<R: Read> Read for DelimitedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.start < self.end {
            let n = buf.len().min(self.end - self.start);
            buf[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
            self.start += n;
            return Ok(n);
        }
        self.inner.read(buf)
    }
}

/// Reader that hands out at most one byte per call.
///
/// Wrapped around the source for the duration of a zlib decode so that the
/// inflater cannot prefetch past the compressed stream's own terminator; the
/// next pack object starts at the very next byte. Deliberately slow.
pub struct SingleByteReader<R> {
    inner: R,
}

impl<R: Read> SingleByteReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for SingleByteReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.inner.read(&mut buf[..1])
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_hashing_reader() {
        let data = b"blob 11\0Hello World";
        let mut reader = HashingReader::new(HashAlgorithm::Sha1, Cursor::new(&data));
        let mut out = vec![];
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.bytes_read(), data.len() as u64);
        let hash = reader.finalize_hash();
        assert_eq!(hash, HashAlgorithm::Sha1.hash_bytes(data));
        // Idempotent, and later reads are not hashed.
        assert_eq!(reader.finalize_hash(), hash);
    }

    #[test]
    fn test_hashing_reader_stops_hashing_after_finalize() {
        let mut reader = HashingReader::new(HashAlgorithm::Sha1, Cursor::new(b"ab"));
        let mut buf = [0; 1];
        reader.read_exact(&mut buf).unwrap();
        let hash = reader.finalize_hash();
        assert_eq!(hash, HashAlgorithm::Sha1.hash_bytes(b"a"));
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.finalize_hash(), hash);
    }

    #[test]
    fn test_hashing_writer() {
        let mut writer = HashingWriter::new(HashAlgorithm::Sha256, vec![]);
        writer.write_all(b"some ").unwrap();
        writer.write_all(b"content").unwrap();
        assert_eq!(writer.bytes_written(), 12);
        let hash = writer.finalize_hash();
        assert_eq!(hash, HashAlgorithm::Sha256.hash_bytes(b"some content"));
        assert_eq!(writer.into_inner(), b"some content");
    }

    #[test]
    #[should_panic(expected = "exactly once")]
    fn test_hashing_writer_double_finalize_panics() {
        let mut writer = HashingWriter::new(HashAlgorithm::Sha1, vec![]);
        writer.finalize_hash();
        writer.finalize_hash();
    }

    #[test]
    fn test_sliced_reader() {
        let data = b"0123456789";
        let mut slice = SlicedReader::new(Cursor::new(&data), 2, 5).unwrap();
        assert_eq!(slice.len(), 5);
        let mut out = String::new();
        slice.read_to_string(&mut out).unwrap();
        assert_eq!(out, "23456");
        // Reads past the end report EOF.
        let mut buf = [0; 4];
        assert_eq!(slice.read(&mut buf).unwrap(), 0);

        // Position is relative to the slice start.
        slice.seek(SeekFrom::Start(3)).unwrap();
        assert_eq!(slice.position(), 3);
        let mut out = String::new();
        slice.read_to_string(&mut out).unwrap();
        assert_eq!(out, "56");
    }

    #[test]
    fn test_delimited_reader() {
        let data = b"blob 11\0Hello World";
        let mut reader = DelimitedReader::new(Cursor::new(&data));
        let header = reader.read_until(b'\0').unwrap();
        assert_eq!(header, b"blob 11");
        // Bytes buffered past the delimiter stay consumable.
        let mut rest = vec![];
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"Hello World");
    }

    #[test]
    fn test_delimited_reader_header_longer_than_buffer() {
        let mut data = vec![b'x'; 500];
        data.push(b'\0');
        data.extend_from_slice(b"tail");
        let mut reader = DelimitedReader::new(Cursor::new(&data));
        let header = reader.read_until(b'\0').unwrap();
        assert_eq!(header, vec![b'x'; 500]);
        let mut rest = vec![];
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"tail");
    }

    #[test]
    fn test_delimited_reader_eof_before_delimiter() {
        let mut reader = DelimitedReader::new(Cursor::new(b"no delimiter"));
        let err = reader.read_until(b'\0').unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_single_byte_reader() {
        let mut reader = SingleByteReader::new(Cursor::new(b"abc"));
        let mut buf = [0; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'a');
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
