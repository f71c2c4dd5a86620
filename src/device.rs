//! PLUTO device handle and serial link.
//!
//! # Threading
//!
//! A dedicated I/O thread drains the transport and runs the frame decoder.
//! Accepted payloads travel over a single-producer/single-consumer channel to
//! the thread owning [`Pluto`], which unpacks them, replaces the current
//! snapshot and yields events strictly in arrival order. All state machine
//! transitions happen on that consumer side, so nothing downstream needs a
//! lock.
//!
//! Pausing takes effect before the next read, never in the middle of a
//! frame; the decoder keeps its state across a pause.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use log::{debug, info, warn};

use crate::commands::{Command, Ramp};
use crate::config::LinkConfig;
use crate::errors::{DriverError, Result};
use crate::events::{DeviceEvent, EventSource};
use crate::framing::{DecoderStats, FrameDecoder, IN_HEADER};
use crate::telemetry::{
    unpack, ControlParams, ControlType, DeviceSnapshot, ErrorFlags, FrameRate, Mechanism,
    SensorValues,
};

// ============================================================================
// Device handle
// ============================================================================

/// What state machines see of the robot: read-only telemetry and
/// write-only commands.
pub trait PlutoDevice {
    /// Latest stream snapshot, if any has arrived.
    fn snapshot(&self) -> Option<&DeviceSnapshot>;

    /// Last controller parameters reported by the device.
    fn control_params(&self) -> ControlParams;

    /// Send a command. No acknowledgement is awaited.
    fn send(&mut self, command: Command) -> Result<()>;

    fn control_type(&self) -> ControlType {
        self.snapshot().map(|s| s.control_type).unwrap_or_default()
    }

    fn is_calibrated(&self) -> bool {
        self.snapshot().map(|s| s.calibrated).unwrap_or(false)
    }

    fn mechanism(&self) -> Mechanism {
        self.snapshot().map(|s| s.mechanism).unwrap_or_default()
    }

    fn angle(&self) -> f32 {
        self.snapshot().map(DeviceSnapshot::angle).unwrap_or(0.0)
    }

    /// Angle, or hand aperture for HOC.
    fn position(&self) -> f32 {
        self.snapshot().map(DeviceSnapshot::position).unwrap_or(0.0)
    }

    fn error(&self) -> ErrorFlags {
        self.snapshot().map(|s| s.error).unwrap_or_default()
    }

    /// Switch control mode unless the device already reports it.
    ///
    /// Returns whether a command went out.
    fn set_control_type(&mut self, control_type: ControlType) -> Result<bool> {
        if self.control_type() == control_type.reported_as() {
            return Ok(false);
        }
        debug!(
            "control type {} -> {}",
            self.control_type(),
            control_type
        );
        self.send(Command::SetControlType(control_type))?;
        Ok(true)
    }

    fn set_control_target(&mut self, target: f32, ramp: Option<Ramp>) -> Result<()> {
        self.send(Command::SetControlTarget { target, ramp })
    }

    fn set_control_bound(&mut self, bound: f32) -> Result<()> {
        self.send(Command::SetControlBound(bound))
    }

    fn set_control_gain(&mut self, gain: f32) -> Result<()> {
        self.send(Command::SetControlGain(gain))
    }

    fn set_control_dir(&mut self, direction: i8) -> Result<()> {
        self.send(Command::SetControlDir(direction))
    }

    fn set_object_params(&mut self, stiffness: f32, offset: f32) -> Result<()> {
        self.send(Command::SetObjectParams { stiffness, offset })
    }

    fn calibrate(&mut self, mechanism: Mechanism) -> Result<()> {
        self.send(Command::Calibrate(mechanism))
    }

    fn start_stream(&mut self) -> Result<()> {
        self.send(Command::StartStream)
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.send(Command::StopStream)
    }

    fn request_version(&mut self) -> Result<()> {
        self.send(Command::GetVersion)
    }

    fn set_diagnostic_mode(&mut self) -> Result<()> {
        self.send(Command::SetDiagnostics)
    }

    fn request_control_params(&mut self) -> Result<()> {
        self.send(Command::GetControlParam)
    }
}

// ============================================================================
// Serial link
// ============================================================================

/// Payload handed from the I/O thread to the consumer.
#[derive(Debug)]
struct LinkPacket {
    payload: Vec<u8>,
    received: Duration,
}

#[derive(Clone)]
struct LinkFlags {
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    stats: Arc<Mutex<DecoderStats>>,
}

/// Connected PLUTO robot.
///
/// # Example
/// ```ignore
/// let mut pluto = Pluto::connect_serial("/dev/ttyUSB0")?;
/// pluto.start_stream()?;
/// while let Some(events) = pluto.wait_packet(Duration::from_millis(100)) {
///     for event in events {
///         machine.run(event.kind, event.dt, &mut pluto)?;
///     }
/// }
/// ```
pub struct Pluto {
    writer: Box<dyn Write + Send>,
    rx: Receiver<LinkPacket>,
    flags: LinkFlags,
    reader: Option<JoinHandle<()>>,
    snapshot: Option<DeviceSnapshot>,
    events: EventSource,
    frame_rate: FrameRate,
    control_params: ControlParams,
    version: Option<String>,
    last_error: ErrorFlags,
}

impl Pluto {
    // ------------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------------

    /// Open the robot's serial port (e.g., `/dev/ttyUSB0` or `COM4`).
    pub fn connect_serial(path: &str) -> anyhow::Result<Self> {
        Self::connect(&LinkConfig::new(path))
    }

    pub fn connect(config: &LinkConfig) -> anyhow::Result<Self> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(config.read_timeout)
            .open()
            .with_context(|| format!("Failed to open serial port at {}", config.port))?;
        let reader = port
            .try_clone()
            .with_context(|| format!("Failed to clone serial port {}", config.port))?;
        info!("serial link open: port={}, baud={}", config.port, config.baud_rate);
        Ok(Self::with_transport(reader, port, config))
    }

    /// Build a link over arbitrary byte streams (pipes, sockets, test doubles).
    pub fn from_transport<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self::with_transport(reader, writer, &LinkConfig::new("<transport>"))
    }

    fn with_transport<R, W>(reader: R, writer: W, config: &LinkConfig) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let flags = LinkFlags {
            running: Arc::new(AtomicBool::new(true)),
            paused: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(true)),
            stats: Arc::new(Mutex::new(DecoderStats::default())),
        };
        let (tx, rx) = mpsc::channel();
        let handle = spawn_reader(
            reader,
            tx,
            flags.clone(),
            config.read_chunk,
            config.pause_poll,
        );

        Self {
            writer: Box::new(writer),
            rx,
            flags,
            reader: Some(handle),
            snapshot: None,
            events: EventSource::new(),
            frame_rate: FrameRate::new(),
            control_params: ControlParams::default(),
            version: None,
            last_error: ErrorFlags::default(),
        }
    }

    // ------------------------------------------------------------------------
    // Consumer side
    // ------------------------------------------------------------------------

    /// Take the next decoded packet, if one is waiting, and return its events.
    ///
    /// Non-stream packets (parameters, version replies) update cached state
    /// and yield no events.
    pub fn next_packet(&mut self) -> Option<Vec<DeviceEvent>> {
        let packet = self.rx.try_recv().ok()?;
        Some(self.ingest(packet))
    }

    /// Like [`Pluto::next_packet`] but blocks up to `timeout`.
    pub fn wait_packet(&mut self, timeout: Duration) -> Option<Vec<DeviceEvent>> {
        match self.rx.recv_timeout(timeout) {
            Ok(packet) => Some(self.ingest(packet)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn ingest(&mut self, packet: LinkPacket) -> Vec<DeviceEvent> {
        let snapshot = match unpack(&packet.payload, packet.received) {
            Ok(s) => s,
            Err(e) => {
                warn!("dropping malformed payload: {}", e);
                return Vec::new();
            }
        };

        if snapshot.error != self.last_error {
            if !snapshot.error.is_empty() {
                warn!("device reported errors: {:?}", snapshot.error.names());
            }
            self.last_error = snapshot.error;
        }

        match &snapshot.values {
            SensorValues::ControlParams(params) => {
                debug!("control params: {:?}", params);
                self.control_params = *params;
            }
            SensorValues::Version(version) => {
                debug!("device version: {}", version);
                self.version = Some(version.clone());
            }
            _ => {}
        }

        if !snapshot.data_type.is_stream() {
            return Vec::new();
        }
        self.frame_rate.update(snapshot.timestamp);
        let events = self.events.process(&snapshot);
        self.snapshot = Some(snapshot);
        events
    }

    // ------------------------------------------------------------------------
    // Link control
    // ------------------------------------------------------------------------

    /// Suspend reading before the next read call.
    pub fn pause(&self) {
        self.flags.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.flags.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::SeqCst)
    }

    /// False once the I/O thread has stopped on an error or end of stream.
    pub fn is_connected(&self) -> bool {
        self.flags.connected.load(Ordering::SeqCst)
    }

    /// Stop the I/O thread and wait for it to exit.
    pub fn close(&mut self) {
        self.flags.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("serial reader thread panicked");
            }
        }
        self.flags.connected.store(false, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Packets per second, averaged over the last 100 intervals.
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate.rate()
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.flags
            .stats
            .lock()
            .map(|s| *s)
            .unwrap_or_default()
    }

    /// Firmware version from the last VERSION reply.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn hand_aperture(&self) -> Option<f32> {
        self.snapshot.as_ref().and_then(DeviceSnapshot::hand_aperture)
    }
}

impl PlutoDevice for Pluto {
    fn snapshot(&self) -> Option<&DeviceSnapshot> {
        self.snapshot.as_ref()
    }

    fn control_params(&self) -> ControlParams {
        self.control_params
    }

    fn send(&mut self, command: Command) -> Result<()> {
        if !self.is_connected() {
            return Err(DriverError::NotConnected);
        }
        debug!("send {:?}", command);
        self.writer.write_all(&command.to_frame())?;
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for Pluto {
    fn drop(&mut self) {
        self.close();
    }
}

/// Smallest gap between receipt times of consecutive frames.
const MIN_STAMP_STEP: Duration = Duration::from_micros(1);

/// Receipt times for `count` frames finished by one read that returned at
/// `now`, spread evenly over `(since, now]` and strictly increasing.
fn spread_stamps(since: Duration, now: Duration, count: usize) -> Vec<Duration> {
    let k = u32::try_from(count).unwrap_or(u32::MAX);
    let span = now.saturating_sub(since);
    let mut last = since;
    (1..=k)
        .map(|i| {
            let stamp = (since + span * i / k).max(last + MIN_STAMP_STEP);
            last = stamp;
            stamp
        })
        .collect()
}

fn spawn_reader<R>(
    mut reader: R,
    tx: Sender<LinkPacket>,
    flags: LinkFlags,
    chunk: usize,
    pause_poll: Duration,
) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let epoch = Instant::now();
        let mut decoder = FrameDecoder::new(IN_HEADER);
        let mut buf = vec![0u8; chunk.max(1)];
        let mut last_stamp: Option<Duration> = None;

        'read: while flags.running.load(Ordering::SeqCst) {
            if flags.paused.load(Ordering::SeqCst) {
                last_stamp = None;
                thread::sleep(pause_poll);
                continue;
            }

            let read_started = epoch.elapsed();
            match reader.read(&mut buf) {
                Ok(0) => {
                    info!("serial link reached end of stream");
                    break;
                }
                Ok(n) => {
                    let now = epoch.elapsed();
                    let payloads = decoder.push(&buf[..n]);
                    let since = last_stamp.unwrap_or(read_started);
                    let stamps = spread_stamps(since, now, payloads.len());
                    if let Some(&stamp) = stamps.last() {
                        last_stamp = Some(stamp);
                    }
                    for (payload, received) in payloads.into_iter().zip(stamps) {
                        if tx.send(LinkPacket { payload, received }).is_err() {
                            debug!("consumer gone, stopping reader");
                            break 'read;
                        }
                    }
                    if let Ok(mut stats) = flags.stats.lock() {
                        *stats = decoder.stats();
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    warn!("serial read failed, link stopped: {}", e);
                    break;
                }
            }
        }

        flags.connected.store(false, Ordering::SeqCst);
    })
}

// ============================================================================
// Test double
// ============================================================================
