use std::{
    collections::HashMap,
    net::Ipv4Addr,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use powermate_common::{
    DeviceAddress, DeviceStatus, RelayId, RelaySchedule, StatusPayload, ENDPOINT_CLEAR_OVERRIDE,
    ENDPOINT_INFO, ENDPOINT_SET_RELAY, ENDPOINT_SET_TIMER, ENDPOINT_STATUS,
};

use crate::{
    error::TransportError,
    transport::{DeviceTransport, Query, Response},
};

pub struct FakeDevice {
    inner: Mutex<Inner>,
}

struct Inner {
    names: HashMap<DeviceAddress, String>,
    status: DeviceStatus,
    raw_status: Option<String>,
    failure: Option<TransportError>,
    delay: Duration,
    requests: Vec<(DeviceAddress, String)>,
}

impl FakeDevice {
    pub fn address() -> DeviceAddress {
        DeviceAddress::new(Ipv4Addr::new(192, 168, 1, 50))
    }

    pub fn shared() -> Arc<Self> {
        Self::at(&[Self::address()])
    }

    pub fn at(addresses: &[DeviceAddress]) -> Arc<Self> {
        let names = addresses
            .iter()
            .map(|address| (*address, "PowerMate".to_string()))
            .collect();

        Arc::new(Self {
            inner: Mutex::new(Inner {
                names,
                status: DeviceStatus {
                    current_time: 1200,
                    relays: Default::default(),
                },
                raw_status: None,
                failure: None,
                delay: Duration::ZERO,
                requests: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn add_foreign(&self, address: DeviceAddress, name: &str) {
        self.lock().names.insert(address, name.to_string());
    }

    pub fn status(&self) -> DeviceStatus {
        self.lock().status
    }

    pub fn set_status(&self, status: DeviceStatus) {
        self.lock().status = status;
    }

    pub fn set_schedule(&self, relay: RelayId, schedule: RelaySchedule) {
        self.lock().status.relay_mut(relay).schedule = schedule;
    }

    pub fn set_raw_status(&self, raw: &str) {
        self.lock().raw_status = Some(raw.to_string());
    }

    pub fn fail_with(&self, failure: Option<TransportError>) {
        self.lock().failure = failure;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    pub fn requests(&self) -> Vec<String> {
        self.lock()
            .requests
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn requests_to(&self, address: DeviceAddress) -> Vec<String> {
        self.lock()
            .requests
            .iter()
            .filter(|(target, _)| *target == address)
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn count(&self, endpoint: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|(_, request)| request.split('?').next() == Some(endpoint))
            .count()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }
}

#[async_trait]
impl DeviceTransport for FakeDevice {
    async fn request(
        &self,
        address: DeviceAddress,
        endpoint: &str,
        query: &Query<'_>,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let rendered = if query.is_empty() {
            endpoint.to_string()
        } else {
            let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
            format!("{endpoint}?{}", pairs.join("&"))
        };

        // Status is read when the request arrives, not when it completes.
        let (delay, snapshot) = {
            let mut inner = self.lock();
            inner.requests.push((address, rendered));
            (inner.delay, inner.status)
        };

        if delay >= timeout {
            tokio::time::sleep(timeout).await;
            return Err(TransportError::Timeout);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        let Some(name) = inner.names.get(&address).cloned() else {
            return Err(TransportError::NetworkUnreachable(
                "connection refused".to_string(),
            ));
        };
        if let Some(failure) = inner.failure.clone() {
            return Err(failure);
        }

        let value = |key: &str| {
            query
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.clone())
                .unwrap_or_default()
        };
        let relay = value("relay")
            .parse::<u8>()
            .ok()
            .and_then(RelayId::from_number);

        let body = match endpoint {
            ENDPOINT_INFO => format!(r#"{{"device":"{name}","relays":2}}"#),
            ENDPOINT_STATUS => match &inner.raw_status {
                Some(raw) => raw.clone(),
                None => serde_json::to_string(&StatusPayload::from(&snapshot))
                    .map_err(|err| TransportError::MalformedResponse(err.to_string()))?,
            },
            ENDPOINT_SET_RELAY => {
                let relay = relay.ok_or(TransportError::HttpStatus(400))?;
                let status = inner.status.relay_mut(relay);
                status.on = value("state") == "1";
                status.override_active = value("override") == "true";
                "OK".to_string()
            }
            ENDPOINT_SET_TIMER => {
                let relay = relay.ok_or(TransportError::HttpStatus(400))?;
                let on = value("on").parse().map_err(|_| TransportError::HttpStatus(400))?;
                let off = value("off").parse().map_err(|_| TransportError::HttpStatus(400))?;
                inner.status.relay_mut(relay).schedule = RelaySchedule::new(on, off);
                "OK".to_string()
            }
            ENDPOINT_CLEAR_OVERRIDE => {
                let relay = relay.ok_or(TransportError::HttpStatus(400))?;
                inner.status.relay_mut(relay).override_active = false;
                "OK".to_string()
            }
            _ => return Err(TransportError::HttpStatus(404)),
        };

        Ok(Response {
            status: 200,
            body: body.into_bytes(),
        })
    }
}
