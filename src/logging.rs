//! Logging setup.
//!
//! Binaries log to stderr through `env_logger`; the Python extension routes
//! records into Python's `logging` so the host application decides where they
//! go. Both read their level from `PLUTO_LOG`, then `RUST_LOG`.

use std::sync::Once;

use env_logger::Env;
use log::LevelFilter;

static RUST_LOG_ONCE: Once = Once::new();

/// Level from `PLUTO_LOG`/`RUST_LOG`, info when unset or unparsable.
pub fn env_level() -> LevelFilter {
    std::env::var("PLUTO_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .and_then(|v| parse_level(&v))
        .unwrap_or(LevelFilter::Info)
}

pub fn parse_level(input: &str) -> Option<LevelFilter> {
    input.trim().parse::<LevelFilter>().ok()
}

fn level_name(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

/// Install the stderr logger. `verbosity` (from `-v` flags) raises the
/// environment level; later calls are no-ops.
pub fn init_rust_logging(verbosity: u8) {
    let level = match verbosity {
        0 => env_level(),
        1 => env_level().max(LevelFilter::Debug),
        _ => LevelFilter::Trace,
    };
    RUST_LOG_ONCE.call_once(|| {
        let env = Env::default().default_filter_or(level_name(level));
        let _ = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_module_path(false)
            .format_target(true)
            .try_init();
    });
}

// ============================================================================
// Python bridge
// ============================================================================

#[cfg(feature = "python")]
pub use bridge::{init_python_logging, reset_python_logging_cache, set_python_log_level};

#[cfg(feature = "python")]
mod bridge {
    use std::collections::HashMap;
    use std::sync::{Mutex, Once};

    use log::{Level, LevelFilter, Log, Metadata, Record};
    use once_cell::sync::OnceCell;
    use pyo3::prelude::*;
    use pyo3::types::{PyAny, PyModule, PyTuple};

    use super::{env_level, parse_level};

    static INSTALL: Once = Once::new();
    static BRIDGE: OnceCell<&'static PyLogBridge> = OnceCell::new();

    /// Python `logging` numeric level for a Rust level.
    fn py_level(level: Level) -> usize {
        match level {
            Level::Error => 40,
            Level::Warn => 30,
            Level::Info => 20,
            Level::Debug => 10,
            Level::Trace => 5,
        }
    }

    struct Target {
        max: LevelFilter,
        logger: Py<PyAny>,
    }

    /// Forwards `log` records to `logging.getLogger(target)`.
    ///
    /// Targets map `pluto::device` to `pluto.device`, so the usual Python
    /// hierarchy configuration applies. Each target's effective level is
    /// looked up once and cached until [`reset_python_logging_cache`].
    struct PyLogBridge {
        max: Mutex<LevelFilter>,
        logging: Py<PyModule>,
        targets: Mutex<HashMap<String, Target>>,
    }

    impl PyLogBridge {
        fn new(py: Python<'_>, max: LevelFilter) -> PyResult<Self> {
            Ok(Self {
                max: Mutex::new(max),
                logging: py.import("logging")?.into(),
                targets: Mutex::new(HashMap::new()),
            })
        }

        fn max(&self) -> LevelFilter {
            self.max.lock().map(|m| *m).unwrap_or(LevelFilter::Off)
        }

        fn effective_level(logger: &Bound<'_, PyAny>) -> PyResult<LevelFilter> {
            for level in [Level::Trace, Level::Debug, Level::Info, Level::Warn, Level::Error] {
                if logger
                    .call_method1("isEnabledFor", (py_level(level),))?
                    .is_truthy()?
                {
                    return Ok(level.to_level_filter());
                }
            }
            Ok(LevelFilter::Off)
        }

        /// Cached logger for `target`, looked up on first use.
        fn target(&self, py: Python<'_>, target: &str) -> PyResult<(LevelFilter, Py<PyAny>)> {
            let mut targets = match self.targets.lock() {
                Ok(t) => t,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(t) = targets.get(target) {
                return Ok((t.max, t.logger.clone_ref(py)));
            }
            let logger = self
                .logging
                .bind(py)
                .getattr("getLogger")?
                .call1((target,))?;
            let max = Self::effective_level(&logger)?;
            let logger = logger.unbind();
            targets.insert(
                target.to_string(),
                Target {
                    max,
                    logger: logger.clone_ref(py),
                },
            );
            Ok((max, logger))
        }

        fn forward(&self, py: Python<'_>, record: &Record) -> PyResult<()> {
            let target = record.target().replace("::", ".");
            let (max, logger) = self.target(py, &target)?;
            let level = record.level().to_level_filter();
            if level > max || level > self.max() {
                return Ok(());
            }
            let logger = logger.bind(py);
            let none = py.None();
            let py_record = logger.call_method1(
                "makeRecord",
                (
                    &target,
                    py_level(record.level()),
                    record.file(),
                    record.line().unwrap_or_default(),
                    record.args().to_string(),
                    PyTuple::empty(py),
                    &none,
                    &none,
                    &none,
                ),
            )?;
            logger.call_method1("handle", (py_record,))?;
            Ok(())
        }
    }

    impl Log for PyLogBridge {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level().to_level_filter() <= self.max()
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            Python::attach(|py| {
                if let Err(e) = self.forward(py, record) {
                    e.restore(py);
                }
            });
        }

        fn flush(&self) {}
    }

    fn install(py: Python<'_>, level: LevelFilter) -> PyResult<()> {
        let mut result = Ok(());
        INSTALL.call_once(|| match PyLogBridge::new(py, level) {
            Ok(bridge) => {
                let leaked: &'static PyLogBridge = Box::leak(Box::new(bridge));
                if log::set_logger(leaked).is_ok() {
                    log::set_max_level(level);
                    let _ = BRIDGE.set(leaked);
                }
            }
            Err(e) => result = Err(e),
        });
        result
    }

    /// Route Rust log records into Python's `logging`. Idempotent.
    pub fn init_python_logging(py: Python<'_>) -> PyResult<()> {
        install(py, env_level())
    }

    /// Forget cached per-target loggers after Python logging was reconfigured.
    pub fn reset_python_logging_cache() {
        if let Some(bridge) = BRIDGE.get() {
            if let Ok(mut targets) = bridge.targets.lock() {
                targets.clear();
            }
        }
    }

    /// Set the bridge's ceiling level; `None` falls back to the environment.
    pub fn set_python_log_level(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
        let level = level.and_then(parse_level).unwrap_or_else(env_level);
        install(py, level)?;
        if let Some(bridge) = BRIDGE.get() {
            if let Ok(mut max) = bridge.max.lock() {
                *max = level;
            }
            reset_python_logging_cache();
        }
        log::set_max_level(level);
        Ok(())
    }
}
