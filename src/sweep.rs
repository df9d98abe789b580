//! Sweep assembly: azimuth tracking, Cartesian conversion, ring reordering

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::angles::AngleTables;
use crate::packet::{self, DataPacket, FIRINGS_PER_PACKET, NUM_LASERS};

/// One Cartesian sample. Coordinates are in meters and NaN when the
/// sensor reported no valid return.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: u8,
}

/// The point cloud collected during one full 360 degree rotation.
///
/// Points are appended in collect order while the sweep is in progress and
/// reordered into ring order (`height` rows of `width` firings) before
/// delivery. `is_dense` stays true until any NaN point is observed.
#[derive(Debug, Clone)]
pub struct Sweep {
    pub points: Vec<Point>,
    /// Capture time in nanoseconds.
    pub stamp: u64,
    /// Monotonically increasing sweep sequence number.
    pub seq: u32,
    pub is_dense: bool,
    pub height: usize,
    pub width: usize,
}

impl Sweep {
    fn new() -> Sweep {
        Sweep {
            points: Vec::new(),
            stamp: 0,
            seq: 0,
            is_dense: true,
            height: 0,
            width: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Where sweep timestamps come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeSource {
    /// The seconds/nanoseconds fields embedded in each packet.
    #[default]
    Packet,
    /// The host wall clock at decode time.
    SystemClock,
}

/// Callback invoked with each completed sweep.
pub type SweepCallback = Box<dyn FnMut(&Sweep) + Send>;

/// Convert a range sample to Cartesian coordinates.
///
/// The `- sin_v` and `+ cos_v` offset terms are carried over from the
/// reference client unchanged; the conventional transform would be
/// `xy = range * cos_v`, `z = range * sin_v`.
pub fn compute_xyz(range: f64, cos_h: f64, sin_h: f64, cos_v: f64, sin_v: f64) -> (f32, f32, f32) {
    if range.is_nan() {
        return (f32::NAN, f32::NAN, f32::NAN);
    }
    // distance to the XY plane
    let xy_distance = range * cos_v - sin_v;
    let x = (xy_distance * cos_h) as f32;
    let y = (xy_distance * sin_h) as f32;
    let z = (range * sin_v + cos_v) as f32;
    (x, y, z)
}

/// Reorder a sweep from collect order into ring order.
///
/// Firings arrive as 8 consecutive laser samples per firing. The output
/// presents one row per laser, top ring first, each row in firing order.
pub fn organize(sweep: &mut Sweep) {
    let width = sweep.points.len() / NUM_LASERS;
    let mut organized = Vec::with_capacity(sweep.points.len());
    for laser in (0..NUM_LASERS).rev() {
        for firing in 0..width {
            organized.push(sweep.points[firing * NUM_LASERS + laser]);
        }
    }
    sweep.points = organized;
    sweep.height = NUM_LASERS;
    sweep.width = width;
}

/// Consumes decoded packets, tracks azimuth progression, and emits a sweep
/// to the registered subscribers each time a full rotation completes.
///
/// All state is owned by the assembler thread; only the subscriber list is
/// shared with the client for registration.
pub struct SweepAssembler {
    tables: AngleTables,
    current: Sweep,
    last_azimuth: f64,
    scan_count: u32,
    sweep_count: u32,
    time_source: TimeSource,
    subscribers: Arc<Mutex<Vec<SweepCallback>>>,
}

impl SweepAssembler {
    pub fn new(
        time_source: TimeSource,
        subscribers: Arc<Mutex<Vec<SweepCallback>>>,
    ) -> SweepAssembler {
        SweepAssembler {
            tables: AngleTables::new(),
            current: Sweep::new(),
            // sentinel above any reachable azimuth, so the first firing
            // starts a fresh sweep without delivering anything
            last_azimuth: 65000.0,
            scan_count: 0,
            sweep_count: 0,
            time_source,
            subscribers,
        }
    }

    pub fn scan_count(&self) -> u32 {
        self.scan_count
    }

    pub fn sweep_count(&self) -> u32 {
        self.sweep_count
    }

    /// Process one decoded packet, appending 8 points per firing and
    /// delivering the in-progress sweep when the azimuth passes its start.
    pub fn process(&mut self, packet: &DataPacket) {
        self.scan_count = self.scan_count.wrapping_add(1);
        let stamp = match self.time_source {
            TimeSource::Packet => {
                packet.seconds as u64 * 1_000_000_000 + packet.nanoseconds as u64
            }
            TimeSource::SystemClock => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_nanos() as u64)
                .unwrap_or(0),
        };

        let first = packet.firings[0].position;
        let last = packet.firings[FIRINGS_PER_PACKET - 1].position;
        let spin = packet::is_spinning(first, last);
        let direction = if spin {
            packet::spin_direction(first, last)
        } else {
            1
        };

        for (i, firing) in packet.firings.iter().enumerate() {
            // a stationary sensor still yields an advancing angular
            // sequence, synthesized from the running scan counter
            let position = if spin {
                firing.position
            } else {
                ((self.scan_count as u64 * FIRINGS_PER_PACKET as u64 + i as u64) % 1000) as u16
            };

            let azimuth = packet::azimuth_degrees(position);
            if (direction as f64) * azimuth < (direction as f64) * self.last_azimuth {
                self.finish_sweep(stamp);
            }

            let (cos_h, sin_h) = self.tables.horizontal(position);
            for laser in 0..NUM_LASERS {
                // only return channel 0 carries data today
                let range = firing.returns_distances[0][laser] as f64 * 0.01;
                let (x, y, z) = {
                    let (cos_v, sin_v) = self.tables.vertical(laser);
                    compute_xyz(range, cos_h, sin_h, cos_v, sin_v)
                };
                self.current.points.push(Point {
                    x,
                    y,
                    z,
                    intensity: firing.returns_intensities[0][laser],
                });
                // one NaN is sufficient to make the sweep non-dense
                if self.current.is_dense && range.is_nan() {
                    self.current.is_dense = false;
                }
            }

            self.last_azimuth = azimuth;
        }
    }

    fn finish_sweep(&mut self, stamp: u64) {
        let mut finished = std::mem::replace(&mut self.current, Sweep::new());
        if finished.is_empty() {
            return;
        }
        organize(&mut finished);
        finished.stamp = stamp;
        finished.seq = self.sweep_count;
        self.sweep_count = self.sweep_count.wrapping_add(1);
        log::debug!(
            "sweep {} complete at packet {}: {} points, stamp {}",
            finished.seq,
            self.scan_count,
            finished.len(),
            finished.stamp
        );

        let mut subscribers = self.subscribers.lock().unwrap();
        for callback in subscribers.iter_mut() {
            callback(&finished);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{FiringData, NUM_RETURNS};

    fn firing(position: u16, distance_cm: u32, intensity: u8) -> FiringData {
        FiringData {
            position,
            returns_distances: [[distance_cm; NUM_LASERS]; NUM_RETURNS],
            returns_intensities: [[intensity; NUM_LASERS]; NUM_RETURNS],
            returns_status: [0; NUM_LASERS],
        }
    }

    fn spinning_packet(start: u16, seconds: u32, nanoseconds: u32) -> DataPacket {
        let firings = (0..FIRINGS_PER_PACKET as u16)
            .map(|i| firing(start + i, 250, 100))
            .collect();
        DataPacket {
            firings,
            seconds,
            nanoseconds,
            status: 0,
        }
    }

    fn assembler() -> (SweepAssembler, crossbeam_channel::Receiver<Sweep>) {
        let subscribers: Arc<Mutex<Vec<SweepCallback>>> = Arc::new(Mutex::new(Vec::new()));
        let (sweep_tx, sweep_rx) = crossbeam_channel::unbounded();
        subscribers
            .lock()
            .unwrap()
            .push(Box::new(move |sweep: &Sweep| {
                sweep_tx.send(sweep.clone()).unwrap();
            }));
        (SweepAssembler::new(TimeSource::Packet, subscribers), sweep_rx)
    }

    #[test]
    fn test_compute_xyz_preserved_formula() {
        let range = 2.5;
        let (cos_h, sin_h) = (0.8, 0.6);
        let (cos_v, sin_v) = (0.9, -0.3);
        let (x, y, z) = compute_xyz(range, cos_h, sin_h, cos_v, sin_v);

        let xy_distance = range * cos_v - sin_v;
        assert!(f64::abs(x as f64 - xy_distance * cos_h) < 1e-6);
        assert!(f64::abs(y as f64 - xy_distance * sin_h) < 1e-6);
        assert!(f64::abs(z as f64 - (range * sin_v + cos_v)) < 1e-6);
    }

    #[test]
    fn test_compute_xyz_nan_range() {
        let (x, y, z) = compute_xyz(f64::NAN, 1.0, 0.0, 1.0, 0.0);
        assert!(x.is_nan());
        assert!(y.is_nan());
        assert!(z.is_nan());
    }

    #[test]
    fn test_organize_is_a_permutation() {
        let mut sweep = Sweep::new();
        let width = 10;
        for i in 0..width * NUM_LASERS {
            sweep.points.push(Point {
                x: i as f32,
                y: 0.0,
                z: 0.0,
                intensity: (i % 256) as u8,
            });
        }
        let collect_order = sweep.points.clone();

        organize(&mut sweep);

        assert_eq!(sweep.len(), collect_order.len());
        assert_eq!(sweep.height, NUM_LASERS);
        assert_eq!(sweep.width, width);
        for (row, laser) in (0..NUM_LASERS).rev().enumerate() {
            for column in 0..width {
                assert_eq!(
                    sweep.points[row * width + column],
                    collect_order[column * NUM_LASERS + laser]
                );
            }
        }
    }

    #[test]
    fn test_single_traversal_delivers_one_sweep() {
        let (mut assembler, sweep_rx) = assembler();

        // azimuth rises from 0 degrees towards +180
        assembler.process(&spinning_packet(0, 10, 20));
        assembler.process(&spinning_packet(5150, 10, 21));
        assert!(sweep_rx.is_empty());

        // positions past 5200 wrap the azimuth to -180 and close the sweep
        assembler.process(&spinning_packet(5200, 30, 40));
        let sweep = sweep_rx.try_recv().unwrap();
        assert!(sweep_rx.is_empty());

        assert_eq!(sweep.seq, 0);
        assert_eq!(sweep.len(), 2 * FIRINGS_PER_PACKET * NUM_LASERS);
        assert_eq!(sweep.height, NUM_LASERS);
        assert_eq!(sweep.width, 2 * FIRINGS_PER_PACKET);
        assert!(sweep.is_dense);
        assert_eq!(sweep.stamp, 30 * 1_000_000_000 + 40);
        assert_eq!(assembler.sweep_count(), 1);
        assert_eq!(assembler.scan_count(), 3);
    }

    #[test]
    fn test_first_boundary_discards_nothing() {
        let (mut assembler, sweep_rx) = assembler();
        // the first firing always trips the sentinel azimuth; the empty
        // initial sweep must be discarded silently
        assembler.process(&spinning_packet(0, 0, 0));
        assert!(sweep_rx.is_empty());
        assert_eq!(assembler.sweep_count(), 0);
    }

    #[test]
    fn test_consecutive_sweeps_increment_seq() {
        let (mut assembler, sweep_rx) = assembler();
        for lap in 0..3u16 {
            // 5200 * 2 = 10400: each pair of packets covers the azimuth
            // range sparsely and wraps once
            assembler.process(&spinning_packet(0, lap as u32, 0));
            assembler.process(&spinning_packet(5200, lap as u32, 0));
        }
        let first = sweep_rx.try_recv().unwrap();
        let second = sweep_rx.try_recv().unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
    }

    #[test]
    fn test_backward_spin_detects_boundary() {
        let (mut assembler, sweep_rx) = assembler();
        let backward = |start: u16, seconds: u32| {
            let firings = (0..FIRINGS_PER_PACKET as u16)
                .map(|i| firing(start - i, 250, 100))
                .collect();
            DataPacket {
                firings,
                seconds,
                nanoseconds: 0,
                status: 0,
            }
        };
        // positions 5250 down to 5201: azimuth falls towards -180
        assembler.process(&backward(5250, 1));
        assert!(sweep_rx.is_empty());
        // positions 5200 down to 5151: crossing 5200 downward wraps the
        // azimuth from -180 back up to +180 and closes the sweep
        assembler.process(&backward(5200, 2));
        let sweep = sweep_rx.try_recv().unwrap();
        // the backward sentinel fires no initial boundary, so the sweep
        // holds all of packet one plus the single firing at 5200
        assert_eq!(sweep.width, FIRINGS_PER_PACKET + 1);
        assert_eq!(sweep.stamp, 2 * 1_000_000_000);
    }

    #[test]
    fn test_stationary_packet_synthesizes_positions() {
        let (mut assembler, sweep_rx) = assembler();
        let stationary = DataPacket {
            firings: (0..FIRINGS_PER_PACKET).map(|_| firing(42, 250, 100)).collect(),
            seconds: 0,
            nanoseconds: 0,
            status: 0,
        };
        assembler.process(&stationary);
        assert!(sweep_rx.is_empty());
        // all 50 firings landed in the in-progress sweep with distinct
        // synthesized angles, so the azimuth kept advancing
        assert_eq!(assembler.current.len(), FIRINGS_PER_PACKET * NUM_LASERS);
        assert!(
            f64::abs(assembler.last_azimuth - packet::azimuth_degrees(99)) < 1e-8
        );
    }

    #[test]
    fn test_subscribers_called_in_registration_order() {
        let subscribers: Arc<Mutex<Vec<SweepCallback>>> = Arc::new(Mutex::new(Vec::new()));
        let (order_tx, order_rx) = crossbeam_channel::unbounded();
        for id in 0..2 {
            let order_tx = order_tx.clone();
            subscribers
                .lock()
                .unwrap()
                .push(Box::new(move |_: &Sweep| order_tx.send(id).unwrap()));
        }
        let mut assembler = SweepAssembler::new(TimeSource::Packet, subscribers);
        assembler.process(&spinning_packet(0, 0, 0));
        assembler.process(&spinning_packet(5200, 0, 0));
        assert_eq!(order_rx.try_recv().unwrap(), 0);
        assert_eq!(order_rx.try_recv().unwrap(), 1);
    }

    #[test]
    fn test_system_clock_stamp_overrides_packet_time() {
        let subscribers: Arc<Mutex<Vec<SweepCallback>>> = Arc::new(Mutex::new(Vec::new()));
        let (sweep_tx, sweep_rx) = crossbeam_channel::unbounded();
        subscribers
            .lock()
            .unwrap()
            .push(Box::new(move |sweep: &Sweep| {
                sweep_tx.send(sweep.stamp).unwrap();
            }));
        let mut assembler = SweepAssembler::new(TimeSource::SystemClock, subscribers);
        assembler.process(&spinning_packet(0, 7, 7));
        assembler.process(&spinning_packet(5200, 7, 7));
        let stamp = sweep_rx.try_recv().unwrap();
        // wall clock, not the packet's 7s/7ns trailer
        assert!(stamp > 1_600_000_000 * 1_000_000_000);
    }
}
