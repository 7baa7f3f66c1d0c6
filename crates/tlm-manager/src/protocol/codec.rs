// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Incremental message codec for non-blocking stream sockets.
//!
//! TCP is a stream protocol without message boundaries; the manager's
//! sockets are non-blocking, so a single message may arrive across several
//! readiness rounds. [`FrameDecoder`] keeps the partial-read state between
//! calls:
//!
//! - `Ok(DecodeStatus::Complete)` - a full header + payload was decoded
//! - `Ok(DecodeStatus::Pending)` - would block; call again when readable
//! - `Err(UnexpectedEof)` - the peer closed (possibly mid-frame)
//! - `Err(InvalidData)` - malformed header; a protocol violation
//!
//! The write path retries on `WouldBlock` until the whole frame is on the
//! wire, which gives the writer thread the blocking-transmit semantics the
//! close protocol relies on.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use super::{MessageHeader, HEADER_SIZE};

/// Pause between retries when a non-blocking write would block.
const WRITE_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of a decode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// A complete message was decoded into the output buffers.
    Complete,
    /// More bytes are needed; the partial state is kept.
    Pending,
}

/// Internal state for incremental reading.
#[derive(Debug, Clone, Copy)]
enum ReadState {
    /// Reading the 20-byte header.
    Header { got: usize },
    /// Reading the declared payload.
    Body { header: MessageHeader, got: usize },
}

/// Per-connection incremental decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    state: ReadState,
    header_buf: [u8; HEADER_SIZE],
    body: Vec<u8>,
    max_size: usize,
}

impl FrameDecoder {
    /// Create a decoder that rejects payloads larger than `max_size`.
    pub fn new(max_size: usize) -> Self {
        Self {
            state: ReadState::Header { got: 0 },
            header_buf: [0u8; HEADER_SIZE],
            body: Vec::new(),
            max_size,
        }
    }

    /// Try to decode one complete message from `reader`.
    ///
    /// On `Complete` the decoded header is stored in `header_out` and the
    /// payload bytes replace the contents of `data_out`; the decoder is
    /// ready for the next frame. Call repeatedly while the socket is
    /// readable until it returns `Pending`.
    pub fn read_message<R: Read>(
        &mut self,
        reader: &mut R,
        header_out: &mut MessageHeader,
        data_out: &mut Vec<u8>,
    ) -> io::Result<DecodeStatus> {
        loop {
            match self.state {
                ReadState::Header { got } => {
                    match reader.read(&mut self.header_buf[got..]) {
                        Ok(0) => {
                            let what = if got == 0 {
                                "connection closed"
                            } else {
                                "connection closed mid-header"
                            };
                            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, what));
                        }
                        Ok(n) => {
                            let total = got + n;
                            if total < HEADER_SIZE {
                                self.state = ReadState::Header { got: total };
                                continue;
                            }
                            let header = MessageHeader::decode(&self.header_buf, self.max_size)?;
                            if header.data_size == 0 {
                                self.state = ReadState::Header { got: 0 };
                                *header_out = header;
                                data_out.clear();
                                return Ok(DecodeStatus::Complete);
                            }
                            self.body.clear();
                            self.body.resize(header.data_size, 0);
                            self.state = ReadState::Body { header, got: 0 };
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Ok(DecodeStatus::Pending);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
                ReadState::Body { header, got } => match reader.read(&mut self.body[got..]) {
                    Ok(0) => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed mid-payload",
                        ));
                    }
                    Ok(n) => {
                        let total = got + n;
                        if total < header.data_size {
                            self.state = ReadState::Body { header, got: total };
                            continue;
                        }
                        self.state = ReadState::Header { got: 0 };
                        *header_out = header;
                        data_out.clear();
                        data_out.extend_from_slice(&self.body);
                        return Ok(DecodeStatus::Complete);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(DecodeStatus::Pending);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                },
            }
        }
    }
}

/// Send one framed message, retrying until every byte is written.
///
/// The header is encoded in the byte order named by its own endian flag
/// with `data_size` forced to the payload length. A failure here is fatal
/// for the socket; the caller closes it.
pub fn send_message(stream: &TcpStream, header: &MessageHeader, data: &[u8]) -> io::Result<()> {
    let mut wire_header = *header;
    wire_header.data_size = data.len();

    let mut frame = Vec::with_capacity(HEADER_SIZE + data.len());
    let mut raw = [0u8; HEADER_SIZE];
    wire_header.encode(&mut raw);
    frame.extend_from_slice(&raw);
    frame.extend_from_slice(data);

    write_all_retry(stream, &frame)
}

fn write_all_retry(stream: &TcpStream, buf: &[u8]) -> io::Result<()> {
    let mut writer: &TcpStream = stream;
    let mut at = 0usize;
    while at < buf.len() {
        match writer.write(&buf[at..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket write returned 0",
                ));
            }
            Ok(n) => at += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(WRITE_RETRY_INTERVAL);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Reverse each 8-byte lane in place. Used to move packed-double payloads
/// between byte orders when the manager itself consumes them.
pub fn swap_f64_lanes(buf: &mut [u8]) {
    for lane in buf.chunks_exact_mut(8) {
        lane.reverse();
    }
}
