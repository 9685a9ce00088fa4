// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::io::{self, Write};

/// A writer that knows how many bytes have gone through it.
///
/// Table of contents entries are byte ranges into the stream, so every byte
/// written to a statement stream must go through the same counter.
#[derive(Debug)]
pub struct ByteCountWriter<W> {
    inner: W,
    bytes_written: u64,
}

impl<W: Write> ByteCountWriter<W> {
    pub fn new(inner: W) -> Self {
        ByteCountWriter {
            inner,
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for ByteCountWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        let counted = u64::try_from(n).map_err(io::Error::other)?;
        self.bytes_written += counted;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_all_bytes() {
        let mut w = ByteCountWriter::new(Vec::new());
        w.write_all(b"CREATE SCHEMA s;").unwrap();
        write!(w, "\n\n{}", "é").unwrap();
        assert_eq!(w.bytes_written(), 20);
        assert_eq!(w.into_inner().unwrap().len(), 20);
    }
}
