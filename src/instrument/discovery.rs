//! Device discovery.
//!
//! The printer is found by globbing the usual serial device paths; USB
//! instruments are found on the VISA bus by resource-string shape and then
//! told apart by their `*IDN?` reply.

use crate::adapters::{visa_adapter, HardwareAdapter, VisaAdapter};
use crate::config::MotionSettings;
use crate::error::{AppResult, ScanError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drop ports whose path contains any excluded name (Bluetooth serial
/// bridges and the like). Order is kept, duplicates removed.
pub fn filter_ports<I>(paths: I, excluded: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut kept: Vec<String> = Vec::new();
    for path in paths {
        if excluded.iter().any(|name| path.contains(name.as_str())) {
            debug!(port = %path, "Ignoring excluded serial port");
            continue;
        }
        if !kept.contains(&path) {
            kept.push(path);
        }
    }
    kept
}

/// Every serial port matching `globs`, in glob order.
pub fn serial_candidates(globs: &[String], excluded: &[String]) -> Vec<String> {
    let mut found = Vec::new();
    for pattern in globs {
        match glob::glob(pattern) {
            Ok(paths) => {
                found.extend(paths.flatten().map(|p| p.to_string_lossy().into_owned()));
            }
            Err(e) => warn!(pattern = %pattern, error = %e, "Invalid serial port glob"),
        }
    }
    filter_ports(found, excluded)
}

/// The configured port, or the first discovered candidate.
pub fn select_serial_port(settings: &MotionSettings) -> AppResult<String> {
    if let Some(port) = &settings.port {
        return Ok(port.clone());
    }
    let candidates = serial_candidates(&settings.port_globs, &settings.excluded_port_names);
    match candidates.first() {
        Some(port) => {
            info!(port = %port, candidates = candidates.len(), "Selected serial port");
            Ok(port.clone())
        }
        None => Err(ScanError::DeviceNotFound(format!(
            "no serial port matches {}",
            settings.port_globs.join(", ")
        ))),
    }
}

/// USB instruments have at least eight `:` in their resource string.
pub fn is_usb_instrument(resource: &str) -> bool {
    resource.contains("USB") && resource.matches(':').count() >= 8
}

/// Pick one probed `(resource, identity)` pair.
///
/// Without a filter the first instrument wins. With a filter exactly one
/// identity must contain it.
pub fn select_by_identity(
    probed: &[(String, String)],
    filter: Option<&str>,
) -> AppResult<(String, String)> {
    let matches: Vec<&(String, String)> = match filter {
        None => probed.iter().take(1).collect(),
        Some(f) => probed.iter().filter(|(_, idn)| idn.contains(f)).collect(),
    };
    match matches.as_slice() {
        [] => Err(ScanError::DeviceNotFound(match filter {
            Some(f) => format!("no USB instrument identifies as '{f}'"),
            None => "no USB instrument on the bus".to_string(),
        })),
        [only] => Ok((*only).clone()),
        many => Err(ScanError::AmbiguousDevice(
            many.iter().map(|(res, _)| res.clone()).collect(),
        )),
    }
}

/// Open each candidate just long enough to read its identity.
pub async fn probe_identities(resources: &[String], timeout: Duration) -> Vec<(String, String)> {
    let mut probed = Vec::new();
    for resource in resources {
        let mut adapter = VisaAdapter::new(resource.clone()).with_timeout(timeout);
        let identity = match adapter.connect().await {
            Ok(()) => adapter.query("*IDN?").await,
            Err(e) => Err(e),
        };
        let _ = adapter.disconnect().await;
        match identity {
            Ok(idn) => {
                debug!(resource = %resource, identity = %idn, "Probed instrument");
                probed.push((resource.clone(), idn));
            }
            Err(e) => warn!(resource = %resource, error = %e, "Instrument did not identify"),
        }
    }
    probed
}

/// Find a USB instrument whose identity contains `filter`.
pub async fn find_instrument(filter: Option<&str>, timeout: Duration) -> AppResult<String> {
    let resources = visa_adapter::list_resources().await?;
    let usb: Vec<String> = resources
        .iter()
        .filter(|r| is_usb_instrument(r))
        .cloned()
        .collect();
    if usb.is_empty() {
        return Err(ScanError::DeviceNotFound(format!(
            "no USB instrument among: {}",
            resources.join(", ")
        )));
    }
    let probed = probe_identities(&usb, timeout).await;
    let (resource, identity) = select_by_identity(&probed, filter)?;
    info!(resource = %resource, identity = %identity, "Selected instrument");
    Ok(resource)
}
