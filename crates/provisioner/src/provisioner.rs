//! Async driver tying one [`ProtocolSession`] to one [`Transport`].
//!
//! The provisioner writes the frames the session produces, feeds every
//! inbound frame back into the session strictly in arrival order, and
//! republishes the resulting events on a broadcast channel. Request methods
//! (`scan_wifi`, `device_info`, `version`) pump inbound frames until the
//! matching reply arrives, the device reports an error, or the configured
//! timeout elapses.

use std::time::Duration;

use blufi_protocol::{
    DeviceErrorCode, DeviceInfo, ProtocolError, ProtocolSession, SessionEvent, SessionOptions,
    SessionState, Version, WifiList,
};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{Config, ProvisioningConfig};
use crate::credentials::{CredentialError, CredentialStore, WifiCredentials};
use crate::transport::{Transport, TransportError};

/// Provisioning failures.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("credential error: {0}")]
    Credentials(#[from] CredentialError),

    #[error("device reported error: {0}")]
    Device(DeviceErrorCode),

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("session reset: {0}")]
    SessionReset(ProtocolError),

    #[error("session is not secured")]
    NotSecured,

    #[error("device disconnected")]
    Disconnected,
}

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Controller for one device connection.
pub struct Provisioner<T: Transport> {
    session: ProtocolSession,
    transport: T,
    config: ProvisioningConfig,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl<T: Transport> Provisioner<T> {
    /// Creates a provisioner over `transport`.
    pub fn new(transport: T, options: SessionOptions, config: ProvisioningConfig) -> Result<Self> {
        let session = ProtocolSession::new(options)?;
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            session,
            transport,
            config,
            event_tx,
        })
    }

    /// Creates a provisioner from a loaded [`Config`].
    pub fn from_config(transport: T, config: &Config) -> Result<Self> {
        Self::new(
            transport,
            config.session.clone(),
            config.provisioning.clone(),
        )
    }

    /// Subscribes to every event the session produces.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Returns the session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Returns whether the session key is established.
    pub fn is_secured(&self) -> bool {
        self.session.is_secured()
    }

    /// Runs the key agreement and waits for the session to become secured.
    ///
    /// On failure the session is reset so negotiation can be retried.
    pub async fn negotiate(&mut self) -> Result<()> {
        let frames = self.session.start_negotiation()?;

        let result = self.complete_negotiation(frames).await;
        if let Err(e) = &result {
            warn!(error = %e, "negotiation failed");
            self.session.reset();
        }
        result
    }

    async fn complete_negotiation(&mut self, frames: Vec<Vec<u8>>) -> Result<()> {
        self.send_frames(frames).await?;
        let timeout = self.config.negotiation_timeout();
        self.wait_for("negotiation", timeout, |event| match event {
            SessionEvent::NegotiationComplete => Some(()),
            _ => None,
        })
        .await
    }

    /// Looks up the device's credentials and provisions them.
    pub async fn provision(&mut self, device_id: &str, store: &dyn CredentialStore) -> Result<()> {
        let credentials = store.station_credentials(device_id)?;
        info!(device_id, ssid = %credentials.ssid, "provisioning station credentials");
        self.set_station(&credentials).await
    }

    /// Switches the device to station mode, sends credentials and connects.
    ///
    /// Requires a secured session.
    pub async fn set_station(&mut self, credentials: &WifiCredentials) -> Result<()> {
        if !self.session.is_secured() {
            return Err(ProvisionError::NotSecured);
        }
        let frames = self
            .session
            .set_station(&credentials.ssid, &credentials.password)?;
        self.send_frames(frames).await
    }

    /// Requests a Wi-Fi scan and waits for the list.
    pub async fn scan_wifi(&mut self) -> Result<WifiList> {
        let frames = self.session.trigger_wifi_list()?;
        self.send_frames(frames).await?;
        let timeout = self.config.response_timeout();
        self.wait_for("wifi scan", timeout, |event| match event {
            SessionEvent::WifiList(list) => Some(list.clone()),
            _ => None,
        })
        .await
    }

    /// Requests the device's Wi-Fi status and waits for the report.
    pub async fn device_info(&mut self) -> Result<DeviceInfo> {
        let frames = self.session.trigger_device_info()?;
        self.send_frames(frames).await?;
        let timeout = self.config.response_timeout();
        self.wait_for("device info", timeout, |event| match event {
            SessionEvent::DeviceInfo(info) => Some(info.clone()),
            _ => None,
        })
        .await
    }

    /// Requests the firmware protocol version.
    pub async fn version(&mut self) -> Result<Version> {
        let frames = self.session.request_version()?;
        self.send_frames(frames).await?;
        let timeout = self.config.response_timeout();
        self.wait_for("version", timeout, |event| match event {
            SessionEvent::Version(version) => Some(*version),
            _ => None,
        })
        .await
    }

    /// Sends application-defined data to the device.
    pub async fn send_custom_data(&mut self, payload: &[u8]) -> Result<()> {
        let frames = self.session.send_custom_data(payload)?;
        self.send_frames(frames).await
    }

    /// Asks the device to disconnect from its access point.
    pub async fn disconnect_from_ap(&mut self) -> Result<()> {
        let frames = self.session.disconnect_from_ap()?;
        self.send_frames(frames).await
    }

    /// Waits for the next inbound frame and returns the events it produced.
    ///
    /// Use this to observe unsolicited device traffic such as custom data.
    pub async fn next_events(&mut self) -> Result<Vec<SessionEvent>> {
        self.pump_once().await
    }

    /// Asks the device to drop the BLE link, closes the transport and
    /// resets the session.
    pub async fn close(&mut self) -> Result<()> {
        let result = match self.session.disconnect_ble() {
            Ok(frames) => self.send_frames(frames).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = &result {
            warn!(error = %e, "disconnect request not delivered");
        }

        self.transport.close().await;
        self.session.reset();
        info!("provisioner closed");
        result
    }

    async fn send_frames(&mut self, frames: Vec<Vec<u8>>) -> Result<()> {
        for frame in &frames {
            self.transport.send(frame).await?;
        }
        debug!(count = frames.len(), "frames written");
        Ok(())
    }

    /// Processes exactly one inbound frame.
    async fn pump_once(&mut self) -> Result<Vec<SessionEvent>> {
        let Some(bytes) = self.transport.recv().await else {
            info!("transport closed by peer");
            self.session.reset();
            return Err(ProvisionError::Disconnected);
        };

        let output = self.session.handle_inbound(&bytes);

        // Events go out before replies are written.
        for event in &output.events {
            // No subscribers is not an error.
            let _ = self.event_tx.send(event.clone());
        }

        if let Err(e) = self.send_frames(output.outbound).await {
            warn!(error = %e, events = output.events.len(), "reply write failed after inbound frame");
            return Err(e);
        }
        Ok(output.events)
    }

    /// Pumps inbound frames until `matcher` accepts an event or the
    /// timeout elapses.
    async fn wait_for<R, F>(
        &mut self,
        operation: &'static str,
        timeout: Duration,
        mut matcher: F,
    ) -> Result<R>
    where
        F: FnMut(&SessionEvent) -> Option<R>,
    {
        tokio::time::timeout(timeout, self.pump_until(operation, &mut matcher))
            .await
            .map_err(|_| ProvisionError::Timeout {
                operation,
                after: timeout,
            })?
    }

    async fn pump_until<R, F>(&mut self, operation: &'static str, matcher: &mut F) -> Result<R>
    where
        F: FnMut(&SessionEvent) -> Option<R>,
    {
        loop {
            for event in self.pump_once().await? {
                if let Some(found) = matcher(&event) {
                    return Ok(found);
                }
                match event {
                    SessionEvent::DeviceError(code) => {
                        warn!(operation, %code, "device error while waiting");
                        return Err(ProvisionError::Device(code));
                    }
                    SessionEvent::SessionReset { error } => {
                        return Err(ProvisionError::SessionReset(error));
                    }
                    _ => {}
                }
            }
        }
    }
}

impl<T: Transport> std::fmt::Debug for Provisioner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("session", &self.session)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use blufi_protocol::framing::data;
    use blufi_protocol::{Frame, FrameCodec, FrameControl, FrameType};

    fn fast_config() -> ProvisioningConfig {
        ProvisioningConfig {
            negotiation_timeout_ms: 200,
            response_timeout_ms: 200,
            event_capacity: 16,
        }
    }

    #[tokio::test]
    async fn test_new_provisioner_is_idle() {
        let (transport, _device) = ChannelTransport::pair(8);
        let provisioner =
            Provisioner::new(transport, SessionOptions::default(), fast_config()).unwrap();
        assert_eq!(provisioner.state(), SessionState::Idle);
        assert!(!provisioner.is_secured());
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let (transport, _device) = ChannelTransport::pair(8);
        let options = SessionOptions {
            negotiation_chunk_size: 0,
            ..SessionOptions::default()
        };
        let result = Provisioner::new(transport, options, fast_config());
        assert!(matches!(
            result,
            Err(ProvisionError::Protocol(ProtocolError::InvalidOptions(_)))
        ));
    }

    #[tokio::test]
    async fn test_set_station_requires_secured_session() {
        let (transport, _device) = ChannelTransport::pair(8);
        let mut provisioner =
            Provisioner::new(transport, SessionOptions::default(), fast_config()).unwrap();
        let result = provisioner
            .set_station(&WifiCredentials::new("net", "pw"))
            .await;
        assert!(matches!(result, Err(ProvisionError::NotSecured)));
    }

    #[tokio::test]
    async fn test_negotiation_times_out_and_resets() {
        let (transport, _device) = ChannelTransport::pair(64);
        let mut provisioner =
            Provisioner::new(transport, SessionOptions::default(), fast_config()).unwrap();

        let result = provisioner.negotiate().await;
        assert!(matches!(
            result,
            Err(ProvisionError::Timeout {
                operation: "negotiation",
                ..
            })
        ));
        assert_eq!(provisioner.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_send_after_peer_drop_fails() {
        let (transport, device) = ChannelTransport::pair(64);
        let mut provisioner =
            Provisioner::new(transport, SessionOptions::default(), fast_config()).unwrap();
        drop(device);

        let result = provisioner.version().await;
        assert!(matches!(result, Err(ProvisionError::Transport(TransportError::Closed))));
    }

    /// Delivers queued inbound frames but fails every write.
    struct FailingWrites {
        inbound: std::collections::VecDeque<Vec<u8>>,
    }

    impl Transport for FailingWrites {
        fn send<'a>(
            &'a mut self,
            _frame: &'a [u8],
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = std::result::Result<(), TransportError>> + Send + 'a>,
        > {
            Box::pin(async { Err(TransportError::Write("link busy".to_string())) })
        }

        fn recv<'a>(
            &'a mut self,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<Vec<u8>>> + Send + 'a>>
        {
            Box::pin(async move { self.inbound.pop_front() })
        }

        fn close<'a>(&'a mut self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn test_events_survive_failed_ack_write() {
        let control = FrameControl::new()
            .with_direction(true)
            .with_require_ack(true);
        let frame = Frame::with_control(FrameType::Data, data::CUSTOM_DATA, control, 3, b"ping".to_vec());
        let bytes = FrameCodec::new().encode(&frame).unwrap();

        let transport = FailingWrites {
            inbound: vec![bytes].into(),
        };
        let mut provisioner =
            Provisioner::new(transport, SessionOptions::default(), fast_config()).unwrap();
        let mut events = provisioner.subscribe();

        let result = provisioner.next_events().await;
        assert!(matches!(
            result,
            Err(ProvisionError::Transport(TransportError::Write(_)))
        ));
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::CustomData(b"ping".to_vec())
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = ProvisionError::Timeout {
            operation: "wifi scan",
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "wifi scan timed out after 1500ms");
    }
}
