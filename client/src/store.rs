use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use powermate_common::{
    DeviceAddress, DeviceBindings, NetworkDevice, NetworkIdentifier, RelayModes,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;

#[async_trait]
pub trait AddressStore: Send + Sync {
    async fn get_remembered_address(
        &self,
        network: &NetworkIdentifier,
    ) -> Result<Option<DeviceAddress>>;

    async fn remember_address(&self, network: &NetworkIdentifier, address: DeviceAddress)
        -> Result<()>;

    async fn relay_modes(&self) -> Result<RelayModes>;

    async fn save_relay_modes(&self, modes: RelayModes) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    bindings: Mutex<DeviceBindings>,
    modes: Mutex<RelayModes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bindings(&self) -> DeviceBindings {
        self.bindings.lock().await.clone()
    }
}

#[async_trait]
impl AddressStore for MemoryStore {
    async fn get_remembered_address(
        &self,
        network: &NetworkIdentifier,
    ) -> Result<Option<DeviceAddress>> {
        Ok(self
            .bindings
            .lock()
            .await
            .get(network)
            .map(|device| device.address))
    }

    async fn remember_address(
        &self,
        network: &NetworkIdentifier,
        address: DeviceAddress,
    ) -> Result<()> {
        self.bindings
            .lock()
            .await
            .remember(network.clone(), address, now_epoch_ms());
        Ok(())
    }

    async fn relay_modes(&self) -> Result<RelayModes> {
        Ok(*self.modes.lock().await)
    }

    async fn save_relay_modes(&self, modes: RelayModes) -> Result<()> {
        *self.modes.lock().await = modes;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: Arc<PathBuf>,
    modes_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            path: Arc::new(data_dir.join("devices.json")),
            modes_path: Arc::new(data_dir.join("modes.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub async fn load(&self) -> Result<DeviceBindings> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn read(&self) -> Result<DeviceBindings> {
        let devices = read_json::<Vec<NetworkDevice>>(&self.path).await?;
        Ok(DeviceBindings::new(devices))
    }
}

#[async_trait]
impl AddressStore for JsonFileStore {
    async fn get_remembered_address(
        &self,
        network: &NetworkIdentifier,
    ) -> Result<Option<DeviceAddress>> {
        Ok(self.load().await?.get(network).map(|device| device.address))
    }

    async fn remember_address(
        &self,
        network: &NetworkIdentifier,
        address: DeviceAddress,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut bindings = self.read().await?;
        bindings.remember(network.clone(), address, now_epoch_ms());
        write_json(&self.path, &bindings).await
    }

    async fn relay_modes(&self) -> Result<RelayModes> {
        let _guard = self.lock.lock().await;
        read_json(&self.modes_path).await
    }

    async fn save_relay_modes(&self, modes: RelayModes) -> Result<()> {
        let _guard = self.lock.lock().await;
        write_json(&self.modes_path, &modes).await
    }
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(serde_json::from_slice(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, payload).await?;
    Ok(())
}

fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}
