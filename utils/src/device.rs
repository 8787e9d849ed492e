use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;

use crate::AudioError;

fn get_host() -> cpal::Host {
    cpal::default_host()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub is_default: bool,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " * {}({}ch, {}hz)", self.name, self.channels, self.sample_rate)?;
        if self.is_default {
            write!(f, " [default]")?;
        }
        Ok(())
    }
}

fn find_device(
    devices: impl Iterator<Item = Device>,
    default: Option<Device>,
    device_name: Option<&str>,
) -> Result<Device, AudioError> {
    let Some(target) = device_name else {
        return default.ok_or_else(|| AudioError::Device("no default device".to_string()));
    };
    devices
        .into_iter()
        .find(|device| device.name().is_ok_and(|name| name == target))
        .ok_or_else(|| AudioError::Device(format!("no device named {:?}", target)))
}

pub fn get_or_default_input(device_name: Option<&str>) -> Result<Device, AudioError> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    find_device(devices, host.default_input_device(), device_name)
}

pub fn get_or_default_output(device_name: Option<&str>) -> Result<Device, AudioError> {
    let host = get_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    find_device(devices, host.default_output_device(), device_name)
}

/// Input devices that report a usable default config.
pub fn available_inputs() -> Result<Vec<DeviceInfo>, AudioError> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Device(e.to_string()))?;

    Ok(devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let config = device.default_input_config().ok()?;
            Some(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                channels: config.channels(),
                sample_rate: config.sample_rate().0,
            })
        })
        .collect())
}

pub fn available_outputs() -> Result<Vec<DeviceInfo>, AudioError> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::Device(e.to_string()))?;

    Ok(devices
        .filter_map(|device| {
            let name = device.name().ok()?;
            let config = device.default_output_config().ok()?;
            Some(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                channels: config.channels(),
                sample_rate: config.sample_rate().0,
            })
        })
        .collect())
}
