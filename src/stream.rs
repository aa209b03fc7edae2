// adc-perf/src/stream.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//
//! Sample collection over a reliable stream (TCP) connection.
//!
//! The device writes CBOR encoded blocks back to back on the stream. After
//! each block, the client writes a single acknowledgement byte, which
//! limits the device to a single block in flight.
//!
//! Everything here is blocking. A read timeout on the socket bounds the
//! time spent waiting for the next block.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use log::{info, warn};

use crate::{Error, RawBlock, Reconstructor, Result, SampleBlock, ACK};

// The size of each socket read.
const READ_CHUNK_SIZE: usize = 4096;

/// The largest encoded block accepted from a stream, in bytes.
pub const MAX_BLOCK_SIZE: usize = 1 << 20;

/// A client for a device that streams blocks over a reliable connection.
///
/// This is normally a TCP connection, but can be any full-duplex byte
/// stream.
#[derive(Debug)]
pub struct StreamClient<S: Read + Write = TcpStream> {
    sock: S,
    // Received bytes not yet framed into a block
    buf: Vec<u8>,
}

impl StreamClient<TcpStream> {
    /// Connects to a device.
    ///
    /// The `timeout`, if any, is used for the connection attempt and as
    /// the read timeout while waiting for each block.
    pub fn connect(addr: SocketAddr, timeout: Option<Duration>) -> Result<Self> {
        let sock = match timeout {
            Some(dur) => TcpStream::connect_timeout(&addr, dur)?,
            None => TcpStream::connect(addr)?,
        };
        sock.set_read_timeout(timeout)?;
        sock.set_nodelay(true)?;
        info!("Connected to {}", addr);
        Ok(Self::new(sock))
    }

    /// Closes the connection.
    pub fn close(self) -> Result<()> {
        match self.sock.shutdown(Shutdown::Both) {
            // The device may already have dropped the connection.
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err.into()),
            _ => {
                info!("Connection closed");
                Ok(())
            }
        }
    }
}

impl<S: Read + Write> StreamClient<S> {
    /// Creates a client on an already-connected stream.
    pub fn new(sock: S) -> Self {
        Self {
            sock,
            buf: Vec::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Gets a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.sock
    }

    /// Gets the underlying stream back.
    pub fn into_inner(self) -> S {
        self.sock
    }

    /// Reads the next raw block from the stream and acknowledges it.
    ///
    /// Fails with [`Error::Timeout`] if the read timed out, and with
    /// [`Error::Disconnected`] if the device closed the stream. A stream
    /// that can't be framed into blocks is a fatal CBOR error, and one that
    /// buffers more than [`MAX_BLOCK_SIZE`] bytes without completing a block
    /// fails with [`Error::MalformedBlock`].
    pub fn read_raw(&mut self) -> Result<RawBlock> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        loop {
            if let Some((raw, n)) = RawBlock::decode_prefix(&self.buf)? {
                self.buf.drain(..n);
                self.sock.write_all(&[ACK])?;
                self.sock.flush()?;
                return Ok(raw);
            }

            if self.buf.len() > MAX_BLOCK_SIZE {
                return Err(Error::MalformedBlock(format!(
                    "no complete block in {} bytes",
                    self.buf.len()
                )));
            }

            let n = match self.sock.read(&mut chunk) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(n) => n,
                Err(err) => match err.kind() {
                    io::ErrorKind::Interrupted => continue,
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                        return Err(Error::Timeout)
                    }
                    _ => return Err(err.into()),
                },
            };
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Reads, acknowledges, and decodes the next block.
    pub fn next_block(&mut self) -> Result<SampleBlock> {
        SampleBlock::decode(self.read_raw()?)
    }

    /// Collects blocks into the reconstructor until the session ends.
    ///
    /// The session ends normally when the reconstructor's quota is reached,
    /// when no block arrives within the read timeout, or when the `quit`
    /// flag is set. Blocks that fail to decode are logged and skipped. Any
    /// other error ends the session and is returned.
    ///
    /// The `progress` function is called with the running sample count
    /// after each block.
    pub fn capture<F>(&mut self, rc: &mut Reconstructor, quit: &AtomicBool, mut progress: F) -> Result<()>
    where
        F: FnMut(usize),
    {
        while !rc.is_complete() {
            if quit.load(Ordering::SeqCst) {
                info!("Capture interrupted");
                break;
            }

            let block = match self.next_block() {
                Err(Error::Timeout) => {
                    warn!("No data received within the timeout");
                    break;
                }
                res => res,
            };

            rc.push_decoded(block)?;
            progress(rc.sample_count());
        }
        Ok(())
    }
}

// --------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::{net::TcpListener, thread};

    // An in-memory stream that hands out the input in small pieces.
    struct Loopback {
        input: io::Cursor<Vec<u8>>,
        output: Vec<u8>,
        chunk: usize,
        timeout_at_end: bool,
    }

    impl Loopback {
        fn new(input: Vec<u8>, chunk: usize) -> Self {
            Self {
                input: io::Cursor::new(input),
                output: Vec::new(),
                chunk,
                timeout_at_end: false,
            }
        }
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk);
            let n = self.input.read(&mut buf[..n])?;
            if n == 0 && self.timeout_at_end {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "timed out"));
            }
            Ok(n)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn raw(index: u32, payload: Vec<u8>) -> RawBlock {
        RawBlock {
            index,
            sample_interval: 10_000,
            sample_time: 0,
            channel_count: 2,
            resolution_bits: 16,
            calibration: None,
            payload,
        }
    }

    fn encode(blocks: &[RawBlock]) -> Vec<u8> {
        blocks.iter().flat_map(|b| b.to_cbor().unwrap()).collect()
    }

    #[test]
    fn one_ack_per_block() {
        let data = encode(&[raw(1, vec![1, 0, 2, 0]), raw(2, vec![3, 0, 4, 0])]);
        let mut cli = StreamClient::new(Loopback::new(data, 3));

        let blk = cli.next_block().unwrap();
        assert_eq!(blk.samples, vec![vec![1], vec![2]]);
        assert_eq!(cli.get_ref().output, vec![ACK]);

        let blk = cli.next_block().unwrap();
        assert_eq!(blk.index, 2);
        assert_eq!(cli.get_ref().output, vec![ACK, ACK]);

        assert!(matches!(cli.next_block(), Err(Error::Disconnected)));
        assert_eq!(cli.into_inner().output.len(), 2);
    }

    #[test]
    fn capture_to_quota() {
        let blocks: Vec<_> = (1..=5).map(|i| raw(i, vec![0; 8])).collect();
        let mut cli = StreamClient::new(Loopback::new(encode(&blocks), 64));

        let mut rc = Reconstructor::with_quota(5);
        let quit = AtomicBool::new(false);
        let mut counts = Vec::new();
        cli.capture(&mut rc, &quit, |n| counts.push(n)).unwrap();

        // Two samples per block; stops once 5 or more are in.
        assert_eq!(counts, vec![2, 4, 6]);
        assert_eq!(cli.get_ref().output, vec![ACK; 3]);
        assert!(!rc.missed());
    }

    #[test]
    fn capture_skips_bad_blocks() {
        let blocks = [raw(1, vec![0; 4]), raw(2, vec![0; 3]), raw(3, vec![0; 4])];
        let mut lb = Loopback::new(encode(&blocks), 1024);
        lb.timeout_at_end = true;
        let mut cli = StreamClient::new(lb);

        let mut rc = Reconstructor::new();
        let quit = AtomicBool::new(false);
        cli.capture(&mut rc, &quit, |_| {}).unwrap();

        // The bad block is still acknowledged.
        assert_eq!(cli.get_ref().output, vec![ACK; 3]);
        let stream = rc.finish().unwrap();
        assert!(stream.missed());
        assert_eq!(stream.sample_count(), 2);
        let idx: Vec<u64> = stream.rows().map(|r| r.index).collect();
        assert_eq!(idx, vec![0, 3]);
    }

    #[test]
    fn capture_out_of_order_is_fatal() {
        let blocks = [raw(2, vec![0; 4]), raw(1, vec![0; 4])];
        let mut cli = StreamClient::new(Loopback::new(encode(&blocks), 1024));
        let mut rc = Reconstructor::new();
        let quit = AtomicBool::new(false);
        let res = cli.capture(&mut rc, &quit, |_| {});
        assert!(matches!(res, Err(Error::OutOfOrderBlock { index: 1, last: 2 })));
    }

    #[test]
    fn capture_quit_flag() {
        let data = encode(&[raw(1, vec![0; 4])]);
        let mut cli = StreamClient::new(Loopback::new(data, 1024));
        let mut rc = Reconstructor::new();
        let quit = AtomicBool::new(true);
        cli.capture(&mut rc, &quit, |_| {}).unwrap();
        assert!(rc.is_empty());
        assert!(cli.get_ref().output.is_empty());
    }

    #[test]
    fn garbage_stream_is_fatal() {
        let mut cli = StreamClient::new(Loopback::new(b"hello world".to_vec(), 1024));
        assert!(matches!(cli.next_block(), Err(Error::Cbor(_))));
    }

    #[test]
    fn oversized_block_is_fatal() {
        // An indefinite array whose payload header claims 2 GiB.
        let mut data = vec![0x9F, 0x01, 0x01, 0x01, 0x01, 0x10, 0x5A, 0x7F, 0xFF, 0xFF, 0xFF];
        data.resize(data.len() + MAX_BLOCK_SIZE + 16, 0);

        let mut cli = StreamClient::new(Loopback::new(data, READ_CHUNK_SIZE));
        assert!(matches!(cli.read_raw(), Err(Error::MalformedBlock(_))));
        assert!(cli.get_ref().output.is_empty());

        // The buffer never grows much past the limit.
        assert!(cli.buf.len() <= MAX_BLOCK_SIZE + READ_CHUNK_SIZE);
    }

    #[test]
    fn tcp_device() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let device = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut acks = 0;
            for i in [1u32, 2, 4] {
                let data = raw(i, vec![i as u8, 0, 0, 0]).to_cbor().unwrap();
                sock.write_all(&data).unwrap();
                let mut ack = [0xFFu8];
                sock.read_exact(&mut ack).unwrap();
                assert_eq!(ack[0], ACK);
                acks += 1;
            }
            acks
        });

        let mut cli = StreamClient::connect(addr, Some(Duration::from_secs(5))).unwrap();
        let mut rc = Reconstructor::with_quota(3);
        let quit = AtomicBool::new(false);
        cli.capture(&mut rc, &quit, |_| {}).unwrap();
        cli.close().unwrap();

        assert_eq!(device.join().unwrap(), 3);

        let stream = rc.finish().unwrap();
        assert!(stream.missed());
        let rows: Vec<_> = stream.rows().map(|r| (r.index, r.values)).collect();
        assert_eq!(rows, vec![(0, vec![1, 0]), (1, vec![2, 0]), (4, vec![4, 0])]);
    }
}
