//! Physical-port auto-connector: wires the driver's channels to backend
//! physical ports on activation, when configured to (spec §4.H).

use tracing::warn;

use crate::backend::{port_flags, BackendOps, ClientHandle};
use crate::channel::IoChannel;

/// Connects backend physical *output* ports (capture sources) to the
/// driver's input ports, and backend physical *input* ports (playback
/// sinks) to the driver's output ports, up to `min(#physical, #driver
/// channels)` each. Non-audio port types are skipped. A connection
/// failure is logged and does not abort the rest — activation itself
/// never fails because of this (spec §4.H).
pub fn auto_connect_hardware(backend: &dyn BackendOps, client: ClientHandle, inputs: &[IoChannel], outputs: &[IoChannel]) {
    connect_direction(backend, client, port_flags::IS_OUTPUT, inputs, true);
    connect_direction(backend, client, port_flags::IS_INPUT, outputs, false);
}

/// `physical_flag` selects which physical ports to enumerate
/// (`IS_OUTPUT` = capture sources feeding driver inputs; `IS_INPUT` =
/// playback sinks fed by driver outputs). `source_is_physical` controls
/// connection direction: physical → driver port, or driver port →
/// physical.
fn connect_direction(backend: &dyn BackendOps, client: ClientHandle, physical_flag: u32, driver_channels: &[IoChannel], source_is_physical: bool) {
    let flags = physical_flag | port_flags::IS_PHYSICAL;
    let physical_ports = backend.get_ports(client, None, None, flags);

    for (physical, channel) in physical_ports.iter().zip(driver_channels.iter()) {
        if !channel.active {
            continue;
        }
        let Some(port) = channel.port else { continue };
        let Some(driver_port_name) = backend.port_name(port) else { continue };

        let (source, destination) = if source_is_physical {
            (physical.as_str(), driver_port_name.as_str())
        } else {
            (driver_port_name.as_str(), physical.as_str())
        };

        if !backend.connect(client, source, destination) {
            warn!(source, destination, "auto-connect failed, continuing");
        }
    }
}
