// adc-perf/src/datagram.rs
//
// Copyright (c) 2018-2025, Frank Pagliughi
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.
//
//! Sample collection over datagrams (UDP).
//!
//! The device only streams while it keeps hearing from the client, so a
//! single start request byte is sent periodically for the length of the
//! session. Each datagram carries exactly one CBOR encoded block. Datagrams
//! can be lost, which the reconstructor accounts for from the block
//! sequence numbers.
//!
//! In broadcast mode the request goes to a broadcast address, and blocks
//! from any number of devices are collected into separate streams, keyed
//! by the address of the sender.
//!
//! The client runs on a Tokio runtime, and must be created from within one.

use std::{
    collections::BTreeMap,
    future::Future,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    os::unix::io::FromRawFd,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, error, info, warn};
use nix::sys::socket::{self, sockopt, AddressFamily, SockFlag, SockType, SockaddrIn, SockaddrIn6};
use tokio::{
    net::UdpSocket,
    sync::watch,
    task::JoinHandle,
    time::{self, Instant},
};

use crate::{
    config::{DFLT_LOCAL_PORT, DFLT_NUM_SAMPLES, DFLT_TIMEOUT_SECS, PROGRESS_PERIOD, REQUEST_PERIOD},
    Error, Reconstructor, Result, SampleBlock, SampleStream, START_REQUEST,
};

// Large enough for any UDP datagram
const MAX_DATAGRAM_SIZE: usize = 65536;

/// A token to stop a group of tasks.
///
/// Clones share the same state, so cancelling any one of them cancels
/// them all. Once cancelled, a token stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Creates a new token that is not cancelled.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Cancels the token, waking all the tasks waiting on it.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Determines if the token was cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits for the token to be cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as the token, so this can't fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// The settings for a datagram capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramConfig {
    /// The address of the device, or the broadcast address in broadcast mode
    pub remote: SocketAddr,
    /// The local address to bind
    pub local: SocketAddr,
    /// The number of samples per channel to collect from each device
    pub samples: usize,
    /// The session ends after this long without receiving a block
    pub idle_timeout: Duration,
    /// How often the start request is repeated
    pub request_period: Duration,
    /// How often the progress function is called
    pub progress_period: Duration,
    /// Whether to collect from any device that answers
    pub broadcast: bool,
}

impl DatagramConfig {
    /// Creates a configuration for the device at the remote address.
    ///
    /// This binds the default local port on all interfaces of the same
    /// address family as the remote.
    pub fn new(remote: SocketAddr) -> Self {
        let ip = match remote {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Self {
            remote,
            local: SocketAddr::new(ip, DFLT_LOCAL_PORT),
            samples: DFLT_NUM_SAMPLES,
            idle_timeout: Duration::from_secs(DFLT_TIMEOUT_SECS),
            request_period: REQUEST_PERIOD,
            progress_period: PROGRESS_PERIOD,
            broadcast: false,
        }
    }

    /// Determines if datagrams from the address belong to the session.
    pub fn accepts(&self, from: &SocketAddr) -> bool {
        self.broadcast || from.ip() == self.remote.ip()
    }
}

/// A client for devices that send blocks as datagrams.
#[derive(Debug)]
pub struct DatagramClient {
    sock: Arc<UdpSocket>,
    cfg: DatagramConfig,
}

impl DatagramClient {
    /// Binds the local socket for a session.
    ///
    /// The local address is bound with `SO_REUSEADDR` so that the fixed
    /// port can be reused immediately by the next session.
    ///
    /// This must be called from within a Tokio runtime.
    pub fn bind(cfg: DatagramConfig) -> Result<Self> {
        let std_sock = reuse_addr_socket(cfg.local)?;
        let sock = UdpSocket::from_std(std_sock)?;
        if cfg.broadcast {
            sock.set_broadcast(true)?;
        }
        info!("Bound to {}", sock.local_addr()?);
        Ok(Self {
            sock: Arc::new(sock),
            cfg,
        })
    }

    /// Gets the local address of the socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.sock.local_addr()?)
    }

    /// Gets the session configuration.
    pub fn config(&self) -> &DatagramConfig {
        &self.cfg
    }

    /// Sends a single start request to the device(s).
    pub async fn request(&self) -> Result<()> {
        send_request(&self.sock, self.cfg.remote).await
    }

    /// Runs a capture session to completion.
    ///
    /// While the session runs, one task sends the start request right away
    /// and then once every request period, and another calls `progress`
    /// with the total number of samples received so far, once every
    /// progress period. Both are stopped when the session ends, after a
    /// final call to `progress`.
    ///
    /// The session ends when every device heard from reached the sample
    /// quota, when no block arrives within the idle timeout, or when the
    /// `shutdown` future completes. Blocks that fail to decode are logged
    /// and skipped. Any other error ends the session and is returned.
    ///
    /// On success this returns the stream from each device, keyed by its
    /// address. A session in which no device sent a valid block fails with
    /// [`Error::NoData`].
    pub async fn capture<F, P>(&self, shutdown: F, progress: P) -> Result<BTreeMap<IpAddr, SampleStream>>
    where
        F: Future<Output = ()>,
        P: FnMut(usize) + Send + 'static,
    {
        let cancel = CancelToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        let tasks = [
            self.spawn_requests(cancel.clone()),
            spawn_progress(
                self.cfg.progress_period,
                Arc::clone(&count),
                progress,
                cancel.clone(),
            ),
        ];

        let mut sessions = BTreeMap::new();
        let res = self.receive(&mut sessions, &count, shutdown).await;

        cancel.cancel();
        for task in tasks {
            if let Err(err) = task.await {
                error!("Periodic task failed: {}", err);
            }
        }
        res?;

        let mut streams = BTreeMap::new();
        for (ip, rc) in sessions {
            match rc.finish() {
                Ok(stream) => {
                    streams.insert(ip, stream);
                }
                Err(Error::NoData) => warn!("No valid blocks from {}", ip),
                Err(err) => return Err(err),
            }
        }

        if streams.is_empty() {
            return Err(Error::NoData);
        }
        Ok(streams)
    }

    // The receive loop of a session.
    async fn receive<F>(
        &self,
        sessions: &mut BTreeMap<IpAddr, Reconstructor>,
        count: &AtomicUsize,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        let idle = time::sleep(self.cfg.idle_timeout);
        tokio::pin!(idle);
        tokio::pin!(shutdown);

        while !is_complete(sessions) {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Capture interrupted");
                    break;
                }
                _ = &mut idle => {
                    warn!("No data received within the timeout");
                    break;
                }
                res = self.sock.recv_from(&mut buf) => {
                    let (n, from) = res?;
                    if !self.cfg.accepts(&from) {
                        debug!("Ignoring {} bytes from {}", n, from);
                        continue;
                    }
                    idle.as_mut().reset(Instant::now() + self.cfg.idle_timeout);

                    let rc = sessions.entry(from.ip()).or_insert_with(|| {
                        info!("Receiving blocks from {}", from.ip());
                        Reconstructor::with_quota(self.cfg.samples)
                    });
                    if !rc.is_complete() {
                        rc.push_decoded(SampleBlock::from_cbor(&buf[..n]))?;
                        count.store(total_samples(sessions), Ordering::Relaxed);
                    }
                }
            }
        }
        Ok(())
    }

    // Starts the task that keeps the device(s) streaming.
    fn spawn_requests(&self, cancel: CancelToken) -> JoinHandle<()> {
        let sock = Arc::clone(&self.sock);
        let remote = self.cfg.remote;
        let mut tick = time::interval(self.cfg.request_period);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(err) = send_request(&sock, remote).await {
                            warn!("{}", err);
                        }
                    }
                }
            }
        })
    }
}

// Starts the task that reports the running sample count.
fn spawn_progress<P>(period: Duration, count: Arc<AtomicUsize>, mut progress: P, cancel: CancelToken) -> JoinHandle<()>
where
    P: FnMut(usize) + Send + 'static,
{
    let mut tick = time::interval(period);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => progress(count.load(Ordering::Relaxed)),
            }
        }
        progress(count.load(Ordering::Relaxed));
    })
}

async fn send_request(sock: &UdpSocket, remote: SocketAddr) -> Result<()> {
    sock.send_to(&[START_REQUEST], remote).await?;
    debug!("Sent start request to {}", remote);
    Ok(())
}

// The session is complete once every device heard from has its quota.
fn is_complete(sessions: &BTreeMap<IpAddr, Reconstructor>) -> bool {
    !sessions.is_empty() && sessions.values().all(Reconstructor::is_complete)
}

fn total_samples(sessions: &BTreeMap<IpAddr, Reconstructor>) -> usize {
    sessions.values().map(Reconstructor::sample_count).sum()
}

// Creates a non-blocking UDP socket bound to the local address with
// SO_REUSEADDR set.
fn reuse_addr_socket(local: SocketAddr) -> Result<std::net::UdpSocket> {
    let family = match local {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };
    let fd = socket::socket(
        family,
        SockType::Datagram,
        SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
        None,
    )?;

    // The std socket owns the descriptor from here on, and closes it on error.
    let sock = unsafe { std::net::UdpSocket::from_raw_fd(fd) };

    socket::setsockopt(fd, sockopt::ReuseAddr, &true)?;
    match local {
        SocketAddr::V4(addr) => socket::bind(fd, &SockaddrIn::from(addr))?,
        SocketAddr::V6(addr) => socket::bind(fd, &SockaddrIn6::from(addr))?,
    }
    Ok(sock)
}

// --------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawBlock;
    use std::{future, sync::Mutex};

    fn raw(index: u32) -> RawBlock {
        RawBlock {
            index,
            sample_interval: 10_000,
            sample_time: 1_000 * u64::from(index),
            channel_count: 2,
            resolution_bits: 12,
            calibration: Some(vec![1, 0, 2, 0, 3, 0, 4, 0]),
            payload: vec![index as u8, 0, 0xFF, 0x0F],
        }
    }

    fn test_config(remote: SocketAddr) -> DatagramConfig {
        DatagramConfig {
            local: "127.0.0.1:0".parse().unwrap(),
            idle_timeout: Duration::from_millis(500),
            request_period: Duration::from_millis(50),
            ..DatagramConfig::new(remote)
        }
    }

    // A device that waits for a start request, then sends the blocks.
    async fn device(sock: UdpSocket, indices: Vec<u32>) -> usize {
        let mut buf = [0u8; 16];
        let (n, client) = sock.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[START_REQUEST]);

        for i in &indices {
            let data = raw(*i).to_cbor().unwrap();
            sock.send_to(&data, client).await.unwrap();
        }
        indices.len()
    }

    #[tokio::test]
    async fn cancel_token() {
        let cancel = CancelToken::new();
        assert!(!cancel.is_cancelled());

        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { cancel.cancelled().await })
        };
        cancel.cancel();
        waiter.await.unwrap();

        // Already cancelled, so this returns right away.
        assert!(cancel.is_cancelled());
        cancel.cancelled().await;
    }

    #[test]
    fn default_config() {
        let cfg = DatagramConfig::new("192.168.1.10:5555".parse().unwrap());
        assert_eq!(cfg.local, "0.0.0.0:56789".parse().unwrap());
        assert_eq!(cfg.request_period, Duration::from_secs(1));
        assert!(!cfg.broadcast);
    }

    #[test]
    fn sender_filter() {
        let mut cfg = DatagramConfig::new("192.168.1.10:5555".parse().unwrap());
        assert!(cfg.accepts(&"192.168.1.10:1234".parse().unwrap()));
        assert!(!cfg.accepts(&"192.168.1.11:5555".parse().unwrap()));

        cfg.remote = "192.168.1.255:5555".parse().unwrap();
        cfg.broadcast = true;
        assert!(cfg.accepts(&"192.168.1.11:5555".parse().unwrap()));
    }

    #[tokio::test]
    async fn reuse_local_port() {
        let cfg = test_config("127.0.0.1:5555".parse().unwrap());
        let cli = DatagramClient::bind(cfg).unwrap();
        let local = cli.local_addr().unwrap();
        assert_ne!(local.port(), 0);
        drop(cli);

        let cfg = DatagramConfig { local, ..cfg };
        assert!(DatagramClient::bind(cfg).is_ok());
    }

    #[tokio::test]
    async fn capture_with_gap() {
        let dev = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut cfg = test_config(dev.local_addr().unwrap());
        cfg.samples = 3;

        let dev_task = tokio::spawn(device(dev, vec![1, 2, 4]));

        let cli = DatagramClient::bind(cfg).unwrap();
        let counts = Arc::new(Mutex::new(Vec::new()));
        let cnts = Arc::clone(&counts);
        let streams = cli
            .capture(future::pending(), move |n| cnts.lock().unwrap().push(n))
            .await
            .unwrap();

        assert_eq!(dev_task.await.unwrap(), 3);
        // The progress task is done, and made a final report.
        assert_eq!(counts.lock().unwrap().last(), Some(&3));

        assert_eq!(streams.len(), 1);
        let stream = &streams[&IpAddr::V4(Ipv4Addr::LOCALHOST)];
        assert!(stream.missed());
        assert_eq!(stream.header().sample_time, 1_000);
        assert_eq!(stream.header().resolution_bits, 12);

        let rows: Vec<_> = stream.rows().collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].index, 4);
        assert_eq!(rows[2].values, vec![4, 0x0FFF]);
        assert_eq!(rows[0].calibration.unwrap()[1].gain, 3);
    }

    #[tokio::test]
    async fn bogus_channel_count_skipped() {
        let dev = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut cfg = test_config(dev.local_addr().unwrap());
        cfg.samples = 1;

        let dev_task = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let (_, client) = dev.recv_from(&mut buf).await.unwrap();

            let mut bogus = raw(1);
            bogus.channel_count = u32::MAX as usize;
            bogus.calibration = None;
            bogus.payload.clear();
            dev.send_to(&bogus.to_cbor().unwrap(), client).await.unwrap();
            dev.send_to(&raw(2).to_cbor().unwrap(), client).await.unwrap();
        });

        let cli = DatagramClient::bind(cfg).unwrap();
        let streams = cli.capture(future::pending(), |_| {}).await.unwrap();
        dev_task.await.unwrap();

        let stream = streams.values().next().unwrap();
        assert_eq!(stream.sample_count(), 1);
        assert_eq!(stream.segments()[0].block_index, 2);
    }

    #[tokio::test]
    async fn idle_timeout_ends_session() {
        let dev = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut cfg = test_config(dev.local_addr().unwrap());
        cfg.idle_timeout = Duration::from_millis(200);

        let dev_task = tokio::spawn(device(dev, vec![7]));

        let cli = DatagramClient::bind(cfg).unwrap();
        let streams = cli.capture(future::pending(), |_| {}).await.unwrap();
        dev_task.await.unwrap();

        let stream = streams.values().next().unwrap();
        assert_eq!(stream.sample_count(), 1);
        assert!(!stream.missed());
    }

    #[tokio::test]
    async fn shutdown_without_data() {
        let cfg = test_config("127.0.0.1:9".parse().unwrap());
        let cli = DatagramClient::bind(cfg).unwrap();
        let res = cli.capture(future::ready(()), |_| {}).await;
        assert!(matches!(res, Err(Error::NoData)));
    }
}
