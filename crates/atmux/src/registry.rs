//! Registry of a modem's logical ports.
//!
//! A cellular module typically exposes a handful of logical channels: the
//! AT command port, a data port (PPP or a second AT channel), and a GNSS
//! NMEA port. The registry binds each [`PortKind`] to its own device at
//! init time and hands out the matching [`PortHandle`] afterwards.
//!
//! The registry does not arbitrate two logical ports sharing one physical
//! UART; a caller multiplexing that way stops one port before starting
//! the other.

use std::collections::HashMap;

use tracing::{info, warn};

use atmux_core::error::{Error, Result};
use atmux_core::Device;

use crate::port::{spawn_port, PortConfig, PortHandle};

/// The logical ports a modem exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// The primary AT command channel.
    Command,
    /// The data channel (PPP, or a secondary AT channel).
    Data,
    /// The GNSS NMEA sentence stream.
    Nmea,
}

impl PortKind {
    /// Conventional port name, used for logging and default configs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PortKind::Command => "at-cmd",
            PortKind::Data => "at-data",
            PortKind::Nmea => "nmea",
        }
    }
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`Registry::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    /// Ports were spawned by this call.
    Initialized,
    /// A previous call already initialized the registry; nothing changed.
    AlreadyInitialized,
}

/// One port to bind at init: which kind, over which device.
pub struct PortBinding {
    pub kind: PortKind,
    pub device: Box<dyn Device>,
    pub config: PortConfig,
}

impl PortBinding {
    /// Bind `kind` to `device` with the kind's default configuration.
    pub fn new(kind: PortKind, device: Box<dyn Device>) -> Self {
        PortBinding {
            kind,
            device,
            config: PortConfig::new(kind.as_str()),
        }
    }
}

/// Owns the spawned port tasks for one modem.
#[derive(Default)]
pub struct Registry {
    ports: Option<HashMap<PortKind, PortHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { ports: None }
    }

    /// Spawn one port task per binding.
    ///
    /// Idempotent: a second call leaves the existing ports untouched and
    /// returns [`InitStatus::AlreadyInitialized`]. Binding the same kind
    /// twice within one call is rejected with [`Error::InvalidParameter`].
    pub fn init(&mut self, bindings: Vec<PortBinding>) -> Result<InitStatus> {
        if self.ports.is_some() {
            warn!("registry already initialized, ignoring re-init");
            return Ok(InitStatus::AlreadyInitialized);
        }

        let mut ports = HashMap::with_capacity(bindings.len());
        for binding in bindings {
            if ports.contains_key(&binding.kind) {
                // Abandon the partial set; spawned tasks stop themselves
                // when their handles drop.
                return Err(Error::InvalidParameter(format!(
                    "port {} bound twice",
                    binding.kind
                )));
            }
            info!(port = %binding.kind, "binding port");
            let handle = spawn_port(binding.device, binding.config);
            ports.insert(binding.kind, handle);
        }

        self.ports = Some(ports);
        Ok(InitStatus::Initialized)
    }

    /// Whether [`Registry::init`] has completed.
    pub fn is_initialized(&self) -> bool {
        self.ports.is_some()
    }

    /// The handle for a bound port.
    pub fn interface(&self, kind: PortKind) -> Result<&PortHandle> {
        let ports = self.ports.as_ref().ok_or(Error::NotInitialized)?;
        ports
            .get(&kind)
            .ok_or_else(|| Error::UnknownPort(kind.to_string()))
    }

    /// Stop every port and return the registry to the uninitialized state.
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(ports) = self.ports.take() else {
            return Ok(());
        };
        for (kind, handle) in ports {
            info!(port = %kind, "stopping port");
            if let Err(e) = handle.stop().await {
                warn!(port = %kind, error = %e, "port did not stop cleanly");
            }
        }
        Ok(())
    }
}
