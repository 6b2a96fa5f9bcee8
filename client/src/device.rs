use std::{sync::Arc, time::Duration};

use powermate_common::{
    DeviceAddress, DeviceInfo, DeviceStatus, RelayCommand, RelayId, RelaySchedule,
    ENDPOINT_CLEAR_OVERRIDE, ENDPOINT_INFO, ENDPOINT_SET_RELAY, ENDPOINT_SET_TIMER,
    ENDPOINT_STATUS, PARAM_OFF, PARAM_ON, PARAM_OVERRIDE, PARAM_RELAY, PARAM_STATE,
};
use tracing::debug;

use crate::{error::TransportError, transport::DeviceTransport};

#[derive(Clone)]
pub struct DeviceClient {
    transport: Arc<dyn DeviceTransport>,
    timeout: Duration,
}

impl DeviceClient {
    pub fn new(transport: Arc<dyn DeviceTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn status(&self, address: DeviceAddress) -> Result<DeviceStatus, TransportError> {
        let response = self
            .transport
            .request(address, ENDPOINT_STATUS, &[], self.timeout)
            .await?;

        DeviceStatus::from_json(&response.body)
            .map_err(|err| TransportError::MalformedResponse(err.to_string()))
    }

    pub async fn info(
        &self,
        address: DeviceAddress,
        timeout: Duration,
    ) -> Result<DeviceInfo, TransportError> {
        self.transport
            .request(address, ENDPOINT_INFO, &[], timeout)
            .await?
            .json()
    }

    pub async fn set_relay(
        &self,
        address: DeviceAddress,
        relay: RelayId,
        on: bool,
        override_schedule: bool,
    ) -> Result<(), TransportError> {
        let query = [
            (PARAM_RELAY, relay.number().to_string()),
            (PARAM_STATE, u8::from(on).to_string()),
            (PARAM_OVERRIDE, override_schedule.to_string()),
        ];
        self.transport
            .request(address, ENDPOINT_SET_RELAY, &query, self.timeout)
            .await?;
        Ok(())
    }

    pub async fn set_timer(
        &self,
        address: DeviceAddress,
        relay: RelayId,
        schedule: RelaySchedule,
    ) -> Result<(), TransportError> {
        let query = [
            (PARAM_RELAY, relay.number().to_string()),
            (PARAM_ON, schedule.on_time.to_string()),
            (PARAM_OFF, schedule.off_time.to_string()),
        ];
        self.transport
            .request(address, ENDPOINT_SET_TIMER, &query, self.timeout)
            .await?;
        Ok(())
    }

    pub async fn clear_override(
        &self,
        address: DeviceAddress,
        relay: RelayId,
    ) -> Result<(), TransportError> {
        let query = [(PARAM_RELAY, relay.number().to_string())];
        self.transport
            .request(address, ENDPOINT_CLEAR_OVERRIDE, &query, self.timeout)
            .await?;
        Ok(())
    }

    pub async fn execute(
        &self,
        address: DeviceAddress,
        command: RelayCommand,
    ) -> Result<(), TransportError> {
        debug!(%address, ?command, "sending relay command");
        match command {
            RelayCommand::SetRelay {
                relay,
                on,
                override_schedule,
            } => self.set_relay(address, relay, on, override_schedule).await,
            RelayCommand::SetTimer { relay, schedule } => {
                self.set_timer(address, relay, schedule).await
            }
            RelayCommand::ClearOverride { relay } => self.clear_override(address, relay).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDevice;
    use pretty_assertions::assert_eq;

    fn client(fake: &Arc<FakeDevice>) -> DeviceClient {
        DeviceClient::new(fake.clone(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn set_relay_encodes_state_and_override() {
        let fake = FakeDevice::shared();
        client(&fake)
            .set_relay(FakeDevice::address(), RelayId::Two, true, false)
            .await
            .unwrap();

        assert_eq!(
            fake.requests(),
            vec!["/set?relay=2&state=1&override=false".to_string()]
        );
        assert!(fake.status().relay(RelayId::Two).on);
    }

    #[tokio::test]
    async fn set_timer_sends_raw_hhmm_values() {
        let fake = FakeDevice::shared();
        client(&fake)
            .execute(FakeDevice::address(), RelayCommand::neutralize(RelayId::One))
            .await
            .unwrap();

        assert_eq!(fake.requests(), vec!["/settimer?relay=1&on=0&off=0".to_string()]);
        assert!(fake.status().relay(RelayId::One).schedule.is_neutral());
    }

    #[tokio::test]
    async fn garbage_status_body_is_malformed() {
        let fake = FakeDevice::shared();
        fake.set_raw_status("<html>captive portal</html>");

        let err = client(&fake)
            .status(FakeDevice::address())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::MalformedResponse(_)));

        fake.set_raw_status(r#"{"r1":1,"r2":0,"time":2500}"#);
        let err = client(&fake)
            .status(FakeDevice::address())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn http_errors_surface_status_code() {
        let fake = FakeDevice::shared();
        fake.fail_with(Some(TransportError::HttpStatus(400)));

        let err = client(&fake)
            .clear_override(FakeDevice::address(), RelayId::One)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::HttpStatus(400));
    }
}
