// ============================================================================
// Python Bindings
// ============================================================================

use std::time::Duration;

use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::device::{Pluto, PlutoDevice};
use crate::framing::FrameDecoder;
use crate::logging;
use crate::telemetry::{ControlType, DeviceSnapshot, Mechanism};

fn io_err(e: impl ToString) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyIOError, _>(e.to_string())
}

fn value_err(e: impl ToString) -> PyErr {
    PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string())
}

/// One telemetry packet from the robot.
///
/// Attributes:
///     time: Seconds since the link was opened.
///     control_type: Active control mode name (e.g. "POSITION").
///     mechanism: Attached mechanism name (e.g. "HOC").
///     calibrated: Whether the mechanism has been zeroed.
///     error: Raw error code (0 when healthy).
///     angle: Joint angle in degrees.
///     torque: Measured torque.
///     button: Button level (1 = held).
///     aperture: Hand aperture in cm, HOC only.
#[pyclass(name = "Snapshot", frozen)]
#[derive(Clone)]
struct PySnapshot {
    #[pyo3(get)]
    time: f64,
    #[pyo3(get)]
    control_type: String,
    #[pyo3(get)]
    mechanism: String,
    #[pyo3(get)]
    calibrated: bool,
    #[pyo3(get)]
    error: u16,
    #[pyo3(get)]
    angle: f32,
    #[pyo3(get)]
    torque: f32,
    #[pyo3(get)]
    control: f32,
    #[pyo3(get)]
    target: f32,
    #[pyo3(get)]
    grip_force: Option<f32>,
    #[pyo3(get)]
    button: u8,
    #[pyo3(get)]
    aperture: Option<f32>,
}

#[pymethods]
impl PySnapshot {
    fn __repr__(&self) -> String {
        format!(
            "Snapshot(time={:.3}, mechanism={}, control={}, angle={:.2}, button={})",
            self.time, self.mechanism, self.control_type, self.angle, self.button
        )
    }

    /// Names of the active error flags.
    #[getter]
    fn errors(&self) -> Vec<&'static str> {
        crate::telemetry::ErrorFlags(self.error).names()
    }

    /// Convert to dictionary for easy serialization.
    fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict = PyDict::new(py);
        dict.set_item("time", self.time)?;
        dict.set_item("control_type", &self.control_type)?;
        dict.set_item("mechanism", &self.mechanism)?;
        dict.set_item("calibrated", self.calibrated)?;
        dict.set_item("error", self.error)?;
        dict.set_item("angle", self.angle)?;
        dict.set_item("torque", self.torque)?;
        dict.set_item("control", self.control)?;
        dict.set_item("target", self.target)?;
        dict.set_item("grip_force", self.grip_force)?;
        dict.set_item("button", self.button)?;
        dict.set_item("aperture", self.aperture)?;
        Ok(dict)
    }
}

impl From<&DeviceSnapshot> for PySnapshot {
    fn from(s: &DeviceSnapshot) -> Self {
        PySnapshot {
            time: s.timestamp.as_secs_f64(),
            control_type: s.control_type.name().to_string(),
            mechanism: s.mechanism.name().to_string(),
            calibrated: s.calibrated,
            error: s.error.0,
            angle: s.angle(),
            torque: s.torque(),
            control: s.control(),
            target: s.target(),
            grip_force: s.grip_force(),
            button: s.button,
            aperture: s.hand_aperture(),
        }
    }
}

/// PLUTO robot over a serial port.
///
/// Example:
///     >>> pluto = Pluto("/dev/ttyUSB0")
///     >>> pluto.start_stream()
///     >>> for kind, dt in pluto.poll(100):
///     ...     print(kind, dt, pluto.snapshot())
///     >>> pluto.close()
#[pyclass(name = "Pluto", unsendable)]
struct PyPluto {
    inner: Pluto,
}

#[pymethods]
impl PyPluto {
    /// Open the robot's serial port (e.g., `/dev/ttyUSB0` or `COM4`).
    #[new]
    fn new(port: &str) -> PyResult<Self> {
        Pluto::connect_serial(port)
            .map(|inner| PyPluto { inner })
            .map_err(io_err)
    }

    fn start_stream(&mut self) -> PyResult<()> {
        self.inner.start_stream().map_err(io_err)
    }

    fn stop_stream(&mut self) -> PyResult<()> {
        self.inner.stop_stream().map_err(io_err)
    }

    /// Wait up to `timeout_ms` for a packet and return its events.
    ///
    /// Returns:
    ///     List of (event, dt) tuples, event one of "NEWDATA", "PRESSED",
    ///     "RELEASED". Empty if nothing arrived.
    #[pyo3(signature = (timeout_ms=100))]
    fn poll(&mut self, timeout_ms: u64) -> Vec<(String, f32)> {
        self.inner
            .wait_packet(Duration::from_millis(timeout_ms))
            .unwrap_or_default()
            .into_iter()
            .map(|e| (e.kind.to_string(), e.dt))
            .collect()
    }

    /// Latest stream snapshot, or None before the first packet.
    fn snapshot(&self) -> Option<PySnapshot> {
        self.inner.snapshot().map(PySnapshot::from)
    }

    /// Switch control mode, e.g. "NONE", "POSITION", "TORQUE".
    ///
    /// Returns:
    ///     True if a command was sent (False when already active).
    fn set_control_type(&mut self, name: &str) -> PyResult<bool> {
        let ct = ControlType::from_name(name)
            .ok_or_else(|| value_err(format!("unknown control type: {name}")))?;
        self.inner.set_control_type(ct).map_err(io_err)
    }

    /// Set the control target, optionally ramping from `initial` over `duration` seconds.
    #[pyo3(signature = (target, initial=None, duration=None))]
    fn set_control_target(
        &mut self,
        target: f32,
        initial: Option<f32>,
        duration: Option<f32>,
    ) -> PyResult<()> {
        let ramp = match (initial, duration) {
            (Some(initial), Some(duration)) => Some(crate::commands::Ramp { initial, duration }),
            (None, None) => None,
            _ => return Err(value_err("initial and duration must be given together")),
        };
        self.inner.set_control_target(target, ramp).map_err(io_err)
    }

    /// Zero the encoder for the named mechanism ("WFE", "URD", "FPS", "HOC").
    fn calibrate(&mut self, mechanism: &str) -> PyResult<()> {
        let mech = Mechanism::from_name(mechanism)
            .ok_or_else(|| value_err(format!("unknown mechanism: {mechanism}")))?;
        self.inner.calibrate(mech).map_err(io_err)
    }

    /// Ask for the firmware version; the reply shows up in `version`.
    fn request_version(&mut self) -> PyResult<()> {
        self.inner.request_version().map_err(io_err)
    }

    #[getter]
    fn version(&self) -> Option<String> {
        self.inner.version().map(str::to_string)
    }

    /// Packets per second over the last 100 packets.
    #[getter]
    fn frame_rate(&self) -> f64 {
        self.inner.frame_rate()
    }

    #[getter]
    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn pause(&self) {
        self.inner.pause();
    }

    fn resume(&self) {
        self.inner.resume();
    }

    /// Decoder counters: packets, checksum_errors, zero_length.
    fn decoder_stats<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let stats = self.inner.decoder_stats();
        let dict = PyDict::new(py);
        dict.set_item("packets", stats.packets)?;
        dict.set_item("checksum_errors", stats.checksum_errors)?;
        dict.set_item("zero_length", stats.zero_length)?;
        Ok(dict)
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn __repr__(&self) -> String {
        format!(
            "Pluto(connected={}, mechanism={})",
            self.inner.is_connected(),
            self.inner.mechanism()
        )
    }
}

/// Incremental decoder for device frames, for offline captures.
#[pyclass(name = "FrameDecoder")]
struct PyFrameDecoder {
    inner: FrameDecoder,
}

#[pymethods]
impl PyFrameDecoder {
    #[new]
    fn new() -> Self {
        PyFrameDecoder {
            inner: FrameDecoder::default(),
        }
    }

    /// Feed raw bytes; returns the payloads completed by them.
    fn push(&mut self, data: Vec<u8>) -> Vec<Vec<u8>> {
        self.inner.push(&data)
    }

    #[getter]
    fn checksum_errors(&self) -> u64 {
        self.inner.stats().checksum_errors
    }
}

/// Route Rust logs into Python's `logging` module.
#[pyfunction]
fn init_logging(py: Python<'_>) -> PyResult<()> {
    logging::init_python_logging(py)
}

/// Set the Rust log level ("error".."trace"); None uses PLUTO_LOG/RUST_LOG.
#[pyfunction]
#[pyo3(signature = (level=None))]
fn set_log_level(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
    logging::set_python_log_level(py, level)
}

/// Re-read Python logger levels after reconfiguring `logging`.
#[pyfunction]
fn reset_log_cache() {
    logging::reset_python_logging_cache();
}

/// The Python module definition
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    logging::init_python_logging(m.py())?;
    m.add_class::<PyPluto>()?;
    m.add_class::<PySnapshot>()?;
    m.add_class::<PyFrameDecoder>()?;
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;
    m.add_function(wrap_pyfunction!(set_log_level, m)?)?;
    m.add_function(wrap_pyfunction!(reset_log_cache, m)?)?;

    m.add("BAUD_RATE", crate::config::BAUD_RATE)?;
    m.add("MECHANISMS", Mechanism::ALL.iter().map(|m| m.name()).collect::<Vec<_>>())?;
    Ok(())
}
