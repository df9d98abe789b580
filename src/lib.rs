//! Driver for the Quanergy M8 spinning LiDAR.
//!
//! The client owns a TCP connection to the sensor and two threads: a reader
//! thread that pulls fixed-size packets off the socket into a bounded queue,
//! and an assembler thread that decodes packets, tracks the azimuth across
//! firings, and delivers one organized point cloud per full rotation to the
//! registered subscribers.
//!
//! ```no_run
//! use m8_driver::M8Client;
//!
//! let mut client = M8Client::new("10.0.0.3".parse().unwrap(), 4141);
//! client.on_sweep(|sweep| {
//!     println!("sweep {}: {} points", sweep.seq, sweep.points.len());
//! });
//! client.start().unwrap();
//! ```

pub mod angles;
pub mod error;
pub mod packet;
pub mod queue;
pub mod sweep;

pub use error::{Error, Result};
pub use sweep::{Point, Sweep, TimeSource};

use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::queue::PacketQueue;
use crate::sweep::{SweepAssembler, SweepCallback};

/// Client for one M8 sensor.
///
/// Owns the socket, the packet queue, and both driver threads. Dropping the
/// client stops the threads and releases the socket.
pub struct M8Client {
    address: SocketAddr,
    time_source: TimeSource,
    queue: Arc<PacketQueue>,
    subscribers: Arc<Mutex<Vec<SweepCallback>>>,
    terminate: Arc<AtomicBool>,
    socket: Option<Arc<TcpStream>>,
    reader_thread: Option<JoinHandle<()>>,
    assembler_thread: Option<JoinHandle<()>>,
}

impl M8Client {
    /// Create a client for the sensor at `ip:port`. Sweeps are stamped from
    /// the packet trailer; see [`M8Client::with_time_source`] to use the
    /// host clock instead.
    pub fn new(ip: IpAddr, port: u16) -> M8Client {
        M8Client::with_time_source(ip, port, TimeSource::Packet)
    }

    pub fn with_time_source(ip: IpAddr, port: u16, time_source: TimeSource) -> M8Client {
        M8Client {
            address: SocketAddr::new(ip, port),
            time_source,
            queue: Arc::new(PacketQueue::new()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            terminate: Arc::new(AtomicBool::new(false)),
            socket: None,
            reader_thread: None,
            assembler_thread: None,
        }
    }

    /// Register a callback invoked with each completed sweep, synchronously
    /// on the assembler thread, in registration order.
    pub fn on_sweep<F>(&self, callback: F)
    where
        F: FnMut(&Sweep) + Send + 'static,
    {
        self.subscribers.lock().unwrap().push(Box::new(callback));
    }

    /// Connect to the sensor and launch the reader and assembler threads.
    /// A connection failure is fatal: no thread is launched and the client
    /// stays stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.reader_thread.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let socket = Arc::new(connect(self.address)?);
        log::info!("sensor connected, starting to read packets");

        self.terminate.store(false, Ordering::SeqCst);
        self.queue = Arc::new(PacketQueue::new());

        let assembler_queue = Arc::clone(&self.queue);
        let mut assembler = SweepAssembler::new(self.time_source, Arc::clone(&self.subscribers));
        self.assembler_thread = Some(std::thread::spawn(move || {
            assemble_sweeps(&assembler_queue, &mut assembler);
        }));

        let reader_queue = Arc::clone(&self.queue);
        let reader_socket = Arc::clone(&socket);
        let terminate = Arc::clone(&self.terminate);
        self.reader_thread = Some(std::thread::spawn(move || {
            read_packets(&reader_socket, &reader_queue, &terminate);
        }));

        self.socket = Some(socket);
        Ok(())
    }

    /// Stop both threads and release the socket. Safe to call repeatedly
    /// and on a client that never started.
    pub fn stop(&mut self) {
        self.terminate.store(true, Ordering::SeqCst);
        if let Some(socket) = self.socket.take() {
            // force a pending blocking read to return
            let _ = socket.shutdown(Shutdown::Both);
        }
        self.queue.shutdown();

        if let Some(thread) = self.reader_thread.take() {
            if thread.join().is_err() {
                log::error!("reader thread panicked");
            }
        }
        if let Some(thread) = self.assembler_thread.take() {
            if thread.join().is_err() {
                log::error!("assembler thread panicked");
            }
        }
    }

    /// True while packets remain queued or the reader thread is alive.
    pub fn is_running(&self) -> bool {
        let reader_alive = self
            .reader_thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false);
        !self.queue.is_empty() || reader_alive
    }

    pub fn name(&self) -> &'static str {
        "Quanergy M8 LiDAR Client"
    }

    pub fn frames_per_second(&self) -> f32 {
        0.0
    }

    /// Total packets dropped by the queue since the last `start`.
    pub fn dropped_packets(&self) -> u64 {
        self.queue.dropped_packets()
    }
}

impl Drop for M8Client {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the outbound connection with no-delay enabled. A failed attempt is
/// retried once against the wildcard address on the same port; this
/// fallback is carried over from the reference client as-is.
fn connect(address: SocketAddr) -> Result<TcpStream> {
    let socket = match TcpStream::connect(address) {
        Ok(socket) => socket,
        Err(e) => {
            log::warn!(
                "connect to {} failed ({}), retrying on the wildcard address",
                address,
                e
            );
            let fallback = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), address.port());
            TcpStream::connect(fallback)?
        }
    };
    socket.set_nodelay(true)?;
    Ok(socket)
}

/// Reader loop: blocking reads of exactly one packet, pushed into the
/// queue. Exits on the termination flag or the first I/O error.
fn read_packets(socket: &TcpStream, queue: &PacketQueue, terminate: &AtomicBool) {
    let mut stream = socket;
    while !terminate.load(Ordering::SeqCst) {
        let mut buffer = vec![0u8; packet::PACKET_SIZE];
        if let Err(e) = stream.read_exact(&mut buffer) {
            if !terminate.load(Ordering::SeqCst) {
                log::error!("socket read failed: {}", e);
            }
            return;
        }
        queue.push(buffer);
    }
}

/// Assembler loop: drains the queue until it is shut down and empty.
fn assemble_sweeps(queue: &PacketQueue, assembler: &mut SweepAssembler) {
    while let Some(buffer) = queue.pop() {
        let data = packet::parse_packet(&buffer);
        assembler.process(&data);
    }
}
