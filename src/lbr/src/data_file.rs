// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Table data files, optionally gzip compressed.
//!
//! Files are written and read on tokio's blocking pool; COPY streams talk to
//! them through [`DataFileSink`] and [`DataFileSource`], which pass chunks
//! over a bounded channel.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Chunks in flight between a COPY stream and its file.
const CHANNEL_CAPACITY: usize = 16;

const CHUNK_SIZE: usize = 64 * 1024;

pub enum DataWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl DataWriter {
    pub fn create(path: &Path, compressed: bool) -> io::Result<DataWriter> {
        let file = BufWriter::new(File::create(path)?);
        Ok(if compressed {
            DataWriter::Gzip(GzEncoder::new(file, Compression::fast()))
        } else {
            DataWriter::Plain(file)
        })
    }

    /// Writes any trailing compressed bytes and flushes the file to disk.
    pub fn finish(self) -> io::Result<()> {
        let buffered = match self {
            DataWriter::Plain(w) => w,
            DataWriter::Gzip(w) => w.finish()?,
        };
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}

impl Write for DataWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            DataWriter::Plain(w) => w.write(buf),
            DataWriter::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            DataWriter::Plain(w) => w.flush(),
            DataWriter::Gzip(w) => w.flush(),
        }
    }
}

/// Opens a data file written by [`DataWriter`].
pub fn open_reader(path: &Path, compressed: bool) -> io::Result<Box<dyn Read + Send>> {
    let file = BufReader::new(File::open(path)?);
    Ok(if compressed {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    })
}

/// A data file written by a blocking task.
pub struct DataFileSink {
    chunks: mpsc::Sender<Bytes>,
    task: JoinHandle<io::Result<()>>,
}

impl DataFileSink {
    pub fn create(path: PathBuf, compressed: bool) -> DataFileSink {
        let (chunks, mut rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let task = tokio::task::spawn_blocking(move || {
            let mut writer = DataWriter::create(&path, compressed)?;
            while let Some(chunk) = rx.blocking_recv() {
                writer.write_all(&chunk)?;
            }
            writer.finish()
        });
        DataFileSink { chunks, task }
    }

    /// Queues `chunk` for writing. Returns false once the writer has
    /// stopped; [`DataFileSink::finish`] then reports why.
    pub async fn write(&self, chunk: Bytes) -> bool {
        self.chunks.send(chunk).await.is_ok()
    }

    /// Waits for every queued chunk to reach the disk.
    pub async fn finish(self) -> io::Result<()> {
        let DataFileSink { chunks, task } = self;
        drop(chunks);
        task.await.map_err(io::Error::other)?
    }
}

/// A data file read by a blocking task.
pub struct DataFileSource {
    chunks: mpsc::Receiver<Bytes>,
    task: JoinHandle<io::Result<()>>,
}

impl DataFileSource {
    pub fn open(path: PathBuf, compressed: bool) -> DataFileSource {
        let (tx, chunks) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let task = tokio::task::spawn_blocking(move || {
            let mut reader = open_reader(&path, compressed)?;
            let mut buf = vec![0; CHUNK_SIZE];
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 || tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                    return Ok(());
                }
            }
        });
        DataFileSource { chunks, task }
    }

    /// The next chunk, or `None` at the end of the file or after a read
    /// error, which [`DataFileSource::finish`] reports.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.chunks.recv().await
    }

    pub async fn finish(self) -> io::Result<()> {
        let DataFileSource { chunks, task } = self;
        drop(chunks);
        task.await.map_err(io::Error::other)?
    }
}
