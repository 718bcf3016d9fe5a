//! In-process link to a [`Device`]

use std::collections::VecDeque;

use net_transport::{Transport, TransportResult};
use tracing::trace;

use crate::device::{Device, Peripherals};

/// Transport that hands every frame straight to a device responder
///
/// A frame the device does not answer leaves nothing to read, so the next
/// `receive` returns empty just as a silent serial link would.
pub struct DeviceLoopback<P> {
    device: Device<P>,
    inbound: VecDeque<u8>,
    frames_sent: usize,
}

impl<P: Peripherals> DeviceLoopback<P> {
    pub fn new(device: Device<P>) -> Self {
        Self {
            device,
            inbound: VecDeque::new(),
            frames_sent: 0,
        }
    }

    pub fn device(&self) -> &Device<P> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device<P> {
        &mut self.device
    }

    /// Frames delivered to the device so far
    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }
}

impl<P: Peripherals> Transport for DeviceLoopback<P> {
    fn send(&mut self, data: &[u8]) -> TransportResult<()> {
        self.frames_sent += 1;
        if let Some(reply) = self.device.handle_frame(data) {
            trace!(len = reply.len(), "device replied");
            self.inbound.extend(reply.iter().copied());
        }
        Ok(())
    }

    fn receive(&mut self, exact: usize) -> TransportResult<Vec<u8>> {
        let n = exact.min(self.inbound.len());
        Ok(self.inbound.drain(..n).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;
    use crate::device::{DeviceConfig, SimulatedPeripherals};
    use crate::{ChannelError, SecureChannel, SharedSecret};
    use net_transport::TransportError;
    use shared_protocol::{NONCE_SIZE, ResponseStatus, SessionState};

    const PASSPHRASE: &str = "loopback passphrase";

    fn loopback(config: DeviceConfig) -> DeviceLoopback<SimulatedPeripherals> {
        let peripherals = SimulatedPeripherals::new(config.initial_led).with_temperature(23.5);
        DeviceLoopback::new(Device::new(
            SharedSecret::from_passphrase(PASSPHRASE),
            config,
            peripherals,
        ))
    }

    fn channel(config: DeviceConfig) -> SecureChannel<DeviceLoopback<SimulatedPeripherals>> {
        SecureChannel::new(loopback(config), SharedSecret::from_passphrase(PASSPHRASE))
    }

    #[test]
    fn test_full_session_against_device() {
        let mut channel = channel(DeviceConfig::default());

        let established = channel.establish();
        assert!(established.success);
        assert!(!established.server_time_string().is_empty());
        assert_eq!(channel.session_id(), channel.transport().device().session_id());

        let temperature = channel.get_temperature();
        assert_eq!(temperature.status, ResponseStatus::Ok);
        assert!((temperature.payload - 23.5).abs() < 1e-5);

        let first = channel.toggle_led();
        let second = channel.toggle_led();
        assert_eq!(first.status, ResponseStatus::Ok);
        assert!(first.payload);
        assert!(!second.payload);

        let closed = channel.close();
        assert_eq!(closed.status, ResponseStatus::Ok);
        assert_eq!(channel.state(), SessionState::Uninitialized);
        assert!(!channel.transport().device().is_active());
        assert_eq!(channel.transport().frames_sent(), 2 + 4);
    }

    #[test]
    fn test_wrong_passphrase_times_out() {
        let mut channel = SecureChannel::new(
            loopback(DeviceConfig::default()),
            SharedSecret::from_passphrase("guessed wrong"),
        );

        assert!(matches!(
            channel.try_establish(),
            Err(ChannelError::Transport(TransportError::Timeout { expected: 36 }))
        ));
        assert_eq!(channel.state(), SessionState::Uninitialized);
        assert!(!channel.transport().device().is_handshaking());
    }

    #[test]
    fn test_expiry_then_reestablish() {
        let config = DeviceConfig {
            session_timeout_secs: 0,
            ..Default::default()
        };
        let mut channel = channel(config);
        assert!(channel.establish().success);
        let first_id = channel.session_id();

        thread::sleep(Duration::from_millis(2));
        let outcome = channel.get_temperature();
        assert_eq!(outcome.status, ResponseStatus::Expired);
        assert!(outcome.server_time.is_some());
        assert_eq!(channel.state(), SessionState::Uninitialized);
        assert!(!channel.transport().device().is_active());

        let sent = channel.transport().frames_sent();
        assert!(matches!(
            channel.try_toggle_led(),
            Err(ChannelError::NotEstablished)
        ));
        assert_eq!(channel.transport().frames_sent(), sent);

        assert!(channel.establish().success);
        assert_ne!(channel.session_id(), first_id);
    }

    #[test]
    fn test_sensor_fault_reports_error_and_keeps_session() {
        let mut channel = channel(DeviceConfig::default());
        assert!(channel.establish().success);
        channel
            .transport_mut()
            .device_mut()
            .peripherals_mut()
            .set_sensor_fault(true);

        let outcome = channel.get_temperature();
        assert_eq!(outcome.status, ResponseStatus::Error);
        assert!(outcome.server_time.is_some());
        assert_eq!(outcome.payload, 0.0);
        assert_eq!(channel.state(), SessionState::Active);
    }

    /// Records the nonce of every frame on its way to the device
    struct NonceRecorder<T> {
        inner: T,
        nonces: Vec<[u8; NONCE_SIZE]>,
    }

    impl<T: Transport> Transport for NonceRecorder<T> {
        fn send(&mut self, data: &[u8]) -> TransportResult<()> {
            let mut nonce = [0u8; NONCE_SIZE];
            nonce.copy_from_slice(&data[..NONCE_SIZE]);
            self.nonces.push(nonce);
            self.inner.send(data)
        }

        fn receive(&mut self, exact: usize) -> TransportResult<Vec<u8>> {
            self.inner.receive(exact)
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Establish,
        Temperature,
        Led,
        Close,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Establish),
            Just(Op::Temperature),
            Just(Op::Led),
            Just(Op::Close),
        ]
    }

    proptest! {
        #[test]
        fn prop_client_nonces_never_repeat(ops in prop::collection::vec(op(), 1..64)) {
            let recorder = NonceRecorder {
                inner: loopback(DeviceConfig::default()),
                nonces: Vec::new(),
            };
            let mut channel =
                SecureChannel::new(recorder, SharedSecret::from_passphrase(PASSPHRASE));

            for op in ops {
                match op {
                    Op::Establish if !channel.state().is_active() => {
                        prop_assert!(channel.establish().success);
                    }
                    Op::Establish => {}
                    Op::Temperature => {
                        channel.get_temperature();
                    }
                    Op::Led => {
                        channel.toggle_led();
                    }
                    Op::Close => {
                        channel.close();
                    }
                }
            }

            let nonces = &channel.transport().nonces;
            let unique: HashSet<_> = nonces.iter().collect();
            prop_assert_eq!(unique.len(), nonces.len());
        }
    }
}
