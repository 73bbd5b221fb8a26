use super::Bridge;
use crate::backend::{AdapterInfo, AdapterKind, Backend, DeviceLimits};
use crate::error::{BridgeError, Result};
use crate::handle::{CommandQueueHandle, DeviceHandle};
use crate::object::{DeviceState, QueueState};

/// Adapter and limits of an open device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Adapter index the device was created from
    pub index: usize,
    /// Adapter name
    pub name: String,
    /// Native API driving the adapter
    pub api: String,
    /// Adapter kind
    pub kind: AdapterKind,
    /// Limits the bridge validates against
    pub limits: DeviceLimits,
}

impl<B: Backend> Bridge<B> {
    /// Whether the backend exposes at least one adapter; never fails
    pub fn is_available(&self) -> bool {
        !self.backend.adapters().is_empty()
    }

    /// Number of adapters, stable for the lifetime of the bridge
    pub fn device_count(&self) -> usize {
        self.backend.adapters().len()
    }

    /// Adapter description at `index`
    pub fn adapter_info(&self, index: usize) -> Result<&AdapterInfo> {
        self.backend
            .adapters()
            .get(index)
            .ok_or_else(|| BridgeError::DeviceUnavailable(format!("no adapter at index {index} ({} available)", self.device_count())))
    }

    /// Creates one device per adapter, in index order
    pub fn enumerate_devices(&mut self) -> Result<Vec<DeviceHandle>> {
        (0..self.device_count()).map(|index| self.create_device(index)).collect()
    }

    /// Creates a logical device on the adapter at `index`
    pub fn create_device(&mut self, index: usize) -> Result<DeviceHandle> {
        let info = self.adapter_info(index)?.clone();
        let native = self.backend.open_device(index)?;
        let limits = self.config.binding_limits.apply(self.backend.device_limits(&native));

        tracing::debug!(index, name = %info.name, api = %info.api, "device created");
        let (handle, _) = self.registry.insert(None, DeviceState { native, index, info, limits });
        Ok(handle)
    }

    /// Creates a device on the adapter the backend prefers
    pub fn create_default_device(&mut self) -> Result<DeviceHandle> {
        if !self.is_available() {
            return Err(BridgeError::DeviceUnavailable("no GPU adapter available".to_string()));
        }
        self.create_device(0)
    }

    pub fn device_name(&self, device: DeviceHandle) -> Result<&str> {
        let (key, _) = self.registry.get::<DeviceState<B>>(device)?;
        Ok(&self.live_device(key)?.info.name)
    }

    pub fn device_info(&self, device: DeviceHandle) -> Result<DeviceInfo> {
        let (key, _) = self.registry.get::<DeviceState<B>>(device)?;
        let state = self.live_device(key)?;
        Ok(DeviceInfo {
            index: state.index,
            name: state.info.name.clone(),
            api: state.info.api.clone(),
            kind: state.info.kind,
            limits: state.limits,
        })
    }

    /// Releases a device and every handle created from it
    pub fn release_device(&mut self, device: DeviceHandle) -> Result<()> {
        let removed = self.registry.release::<DeviceState<B>>(device)?;
        tracing::debug!(handle = device.to_raw(), dependents = removed.len() - 1, "device released");
        Ok(())
    }

    /// Creates an ordered submission queue on a device
    pub fn create_command_queue(&mut self, device: DeviceHandle) -> Result<CommandQueueHandle> {
        let (key, _) = self.registry.get::<DeviceState<B>>(device)?;
        let native = self.backend.create_queue(&self.live_device(key)?.native)?;
        let (handle, _) = self.registry.insert(Some(key), QueueState { native, device: key });
        tracing::debug!(handle = handle.to_raw(), "command queue created");
        Ok(handle)
    }

    pub fn release_command_queue(&mut self, queue: CommandQueueHandle) -> Result<()> {
        self.registry.release::<QueueState<B>>(queue)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::backend::{HeadlessBackend, HeadlessConfig};
    use crate::error::ErrorKind;

    #[test]
    fn test_enumeration_is_index_stable() {
        let config = HeadlessConfig {
            adapter_names: vec!["first".to_string(), "second".to_string()],
            ..Default::default()
        };
        let mut bridge = Bridge::new(HeadlessBackend::new(config));
        assert!(bridge.is_available());
        assert_eq!(bridge.device_count(), 2);
        assert_eq!(bridge.adapter_info(1).unwrap().name, "second");
        assert_eq!(bridge.adapter_info(2).unwrap_err().kind(), ErrorKind::DeviceUnavailable);

        let devices = bridge.enumerate_devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(bridge.device_name(devices[0]).unwrap(), "first");
        assert_eq!(bridge.device_info(devices[1]).unwrap().index, 1);
        assert_eq!(bridge.create_device(5).unwrap_err().kind(), ErrorKind::DeviceUnavailable);
    }

    #[test]
    fn test_no_adapters_is_unavailable() {
        let config = HeadlessConfig {
            adapter_names: Vec::new(),
            ..Default::default()
        };
        let mut bridge = Bridge::new(HeadlessBackend::new(config));
        assert!(!bridge.is_available());
        assert_eq!(bridge.create_default_device().unwrap_err().kind(), ErrorKind::DeviceUnavailable);
    }

    #[test]
    fn test_queue_on_stale_device_is_invalid_handle() {
        let (mut bridge, device, queue) = testing::bridge();
        bridge.release_device(device).unwrap();

        assert_eq!(bridge.create_command_queue(device).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(bridge.release_command_queue(queue).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(bridge.device_name(device).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(bridge.live_handles(), 0);
    }

    #[test]
    fn test_device_loss_is_reported() {
        let (mut bridge, device, _queue) = testing::bridge();
        bridge.backend().lose_device(0);

        assert_eq!(bridge.device_name(device).unwrap_err().kind(), ErrorKind::DeviceUnavailable);
        assert_eq!(bridge.create_command_queue(device).unwrap_err().kind(), ErrorKind::DeviceUnavailable);
        // A lost device can still be released
        bridge.release_device(device).unwrap();
    }
}
