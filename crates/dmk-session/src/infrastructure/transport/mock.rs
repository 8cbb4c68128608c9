//! Scripted in-memory device for tests.
//!
//! [`MockDeviceConnection`] behaves like a real device on the far end of a
//! link: it reassembles the request frames written to it, asks a responder
//! closure for the reply bytes (`data ++ status word`), segments the reply
//! with the same framing and pushes the frames into the session's sink.
//!
//! A [`MockDeviceController`] lets the test observe and steer the device:
//! inspect every frame written, hold replies back until released, inject
//! unsolicited frames, fail writes or simulate an unplug.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use dmk_core::{segment, DeviceId, FrameAssembler, FrameConfig, StatusWord};
use tracing::warn;

use super::{FrameSink, Transport, TransportConnection, TransportError};

/// Computes the raw reply (`data ++ status word`) for a raw request APDU.
pub type Responder = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Something that happened on the mock device, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// A frame written by the host.
    FrameWritten(Vec<u8>),
    /// A complete request APDU reassembled from written frames.
    RequestReceived(Vec<u8>),
    /// A reply pushed back to the host (raw, before segmentation).
    ReplySent(Vec<u8>),
}

/// Responder that answers every request with `status` and no data.
pub fn status_responder(status: StatusWord) -> Responder {
    Arc::new(move |_request: &[u8]| status.to_bytes().to_vec())
}

/// Responder that answers every request with `data` followed by `0x9000`.
pub fn data_responder(data: Vec<u8>) -> Responder {
    Arc::new(move |_request: &[u8]| {
        let mut reply = data.clone();
        reply.extend_from_slice(&StatusWord::SUCCESS.to_bytes());
        reply
    })
}

struct DeviceState {
    sink: Option<FrameSink>,
    assembler: FrameAssembler,
    events: Vec<MockEvent>,
    held_replies: VecDeque<Vec<u8>>,
    hold_replies: bool,
    write_error: Option<TransportError>,
    close_count: usize,
}

struct Shared {
    device_id: DeviceId,
    config: FrameConfig,
    responder: Responder,
    state: Mutex<DeviceState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, state: &mut DeviceState, reply: Vec<u8>) {
        let Some(sink) = state.sink.as_ref() else {
            warn!("mock device {}: reply dropped, no sink", self.device_id);
            return;
        };
        match segment(&reply, &self.config) {
            Ok(frames) => {
                for frame in frames {
                    // A closed receiver means the session is gone; nothing to do.
                    let _ = sink.send(frame.to_bytes());
                }
            }
            Err(e) => warn!("mock device {}: cannot segment reply: {e}", self.device_id),
        }
        state.events.push(MockEvent::ReplySent(reply));
    }
}

/// Device side of an in-memory link.
pub struct MockDeviceConnection {
    shared: Arc<Shared>,
}

impl MockDeviceConnection {
    /// Creates a connection and the controller that drives it.
    pub fn new(
        device_id: DeviceId,
        config: FrameConfig,
        responder: Responder,
    ) -> (Self, MockDeviceController) {
        let shared = Arc::new(Shared {
            device_id,
            config,
            responder,
            state: Mutex::new(DeviceState {
                sink: None,
                assembler: FrameAssembler::new(&config),
                events: Vec::new(),
                held_replies: VecDeque::new(),
                hold_replies: false,
                write_error: None,
                close_count: 0,
            }),
        });
        let controller = MockDeviceController {
            shared: Arc::clone(&shared),
        };
        (Self { shared }, controller)
    }
}

#[async_trait]
impl TransportConnection for MockDeviceConnection {
    fn device_id(&self) -> DeviceId {
        self.shared.device_id.clone()
    }

    async fn write(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.shared.state();
        if let Some(err) = state.write_error.clone() {
            return Err(err);
        }
        if state.sink.is_none() {
            return Err(TransportError::ConnectionClosed);
        }
        state.events.push(MockEvent::FrameWritten(frame.clone()));

        let request = match state.assembler.feed_raw(&frame) {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("mock device {}: bad request frame: {e}", self.shared.device_id);
                return Ok(());
            }
        };
        state.events.push(MockEvent::RequestReceived(request.clone()));

        let reply = (self.shared.responder)(&request);
        if state.hold_replies {
            state.held_replies.push_back(reply);
        } else {
            self.shared.deliver(&mut state, reply);
        }
        Ok(())
    }

    fn set_frame_sink(&self, sink: FrameSink) {
        self.shared.state().sink = Some(sink);
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.shared.state();
        state.sink = None;
        state.close_count += 1;
        Ok(())
    }
}

/// Test-side handle on a [`MockDeviceConnection`].
#[derive(Clone)]
pub struct MockDeviceController {
    shared: Arc<Shared>,
}

impl MockDeviceController {
    /// While enabled, replies are queued instead of sent.
    pub fn hold_replies(&self, hold: bool) {
        self.shared.state().hold_replies = hold;
    }

    /// Sends the oldest held reply.  Returns `false` if none was queued.
    pub fn release_next_reply(&self) -> bool {
        let mut state = self.shared.state();
        match state.held_replies.pop_front() {
            Some(reply) => {
                self.shared.deliver(&mut state, reply);
                true
            }
            None => false,
        }
    }

    pub fn held_reply_count(&self) -> usize {
        self.shared.state().held_replies.len()
    }

    /// Pushes a frame to the host as if the device had sent it unprompted.
    pub fn inject_frame(&self, frame: Vec<u8>) {
        if let Some(sink) = self.shared.state().sink.as_ref() {
            let _ = sink.send(frame);
        }
    }

    /// Makes every subsequent write fail with `error` (or succeed again on `None`).
    pub fn fail_writes(&self, error: Option<TransportError>) {
        self.shared.state().write_error = error;
    }

    /// Simulates an unplug: the frame sink is dropped.
    pub fn disconnect(&self) {
        self.shared.state().sink = None;
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state().sink.is_some()
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.shared.state().events.clone()
    }

    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        self.filter_events(|event| match event {
            MockEvent::FrameWritten(frame) => Some(frame.clone()),
            _ => None,
        })
    }

    /// Complete request APDUs received so far.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.filter_events(|event| match event {
            MockEvent::RequestReceived(request) => Some(request.clone()),
            _ => None,
        })
    }

    pub fn close_count(&self) -> usize {
        self.shared.state().close_count
    }

    fn filter_events(&self, pick: impl Fn(&MockEvent) -> Option<Vec<u8>>) -> Vec<Vec<u8>> {
        self.shared.state().events.iter().filter_map(pick).collect()
    }
}

/// In-memory transport whose devices are [`MockDeviceConnection`]s.
pub struct MockTransport {
    config: FrameConfig,
    responder: Responder,
    known_devices: Vec<DeviceId>,
    controllers: Mutex<HashMap<DeviceId, MockDeviceController>>,
}

impl MockTransport {
    pub fn new(config: FrameConfig, responder: Responder, known_devices: Vec<DeviceId>) -> Self {
        Self {
            config,
            responder,
            known_devices,
            controllers: Mutex::new(HashMap::new()),
        }
    }

    /// Controller of the most recent connection opened to `device`.
    pub fn controller(&self, device: &DeviceId) -> Option<MockDeviceController> {
        self.controllers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device)
            .cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&self, device: &DeviceId) -> Result<Box<dyn TransportConnection>, TransportError> {
        if !self.known_devices.contains(device) {
            return Err(TransportError::DeviceNotFound(device.clone()));
        }
        let (connection, controller) =
            MockDeviceConnection::new(device.clone(), self.config, Arc::clone(&self.responder));
        self.controllers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.clone(), controller);
        Ok(Box::new(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn request_frames(config: &FrameConfig, apdu: &[u8]) -> Vec<Vec<u8>> {
        segment(apdu, config).unwrap().map(|f| f.to_bytes()).collect()
    }

    #[tokio::test]
    async fn test_mock_device_replies_once_request_is_complete() {
        // Arrange
        let config = FrameConfig::ble(8);
        let (connection, controller) =
            MockDeviceConnection::new(DeviceId::from("mock-1"), config, data_responder(vec![0x42]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        connection.set_frame_sink(tx);
        let frames = request_frames(&config, &[0xE0, 0x01, 0x00, 0x00, 0x02, 0xAA, 0xBB]);
        assert_eq!(frames.len(), 2);

        // Act
        connection.write(frames[0].clone()).await.unwrap();
        let nothing_yet = rx.try_recv().is_err();
        connection.write(frames[1].clone()).await.unwrap();

        // Assert
        assert!(nothing_yet);
        let reply_frame = rx.try_recv().unwrap();
        let mut assembler = FrameAssembler::new(&config);
        let reply = assembler.feed(&reply_frame).unwrap().unwrap();
        assert_eq!(reply.data, vec![0x42]);
        assert_eq!(
            controller.requests(),
            vec![vec![0xE0, 0x01, 0x00, 0x00, 0x02, 0xAA, 0xBB]]
        );
    }

    #[tokio::test]
    async fn test_held_reply_is_sent_on_release() {
        // Arrange
        let config = FrameConfig::usb_hid();
        let (connection, controller) = MockDeviceConnection::new(
            DeviceId::from("mock-1"),
            config,
            status_responder(StatusWord::SUCCESS),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        connection.set_frame_sink(tx);
        controller.hold_replies(true);

        // Act
        for frame in request_frames(&config, &[0xB0, 0x01, 0x00, 0x00, 0x00]) {
            connection.write(frame).await.unwrap();
        }
        let held = controller.held_reply_count();
        let released = controller.release_next_reply();

        // Assert
        assert_eq!(held, 1);
        assert!(released);
        assert!(rx.try_recv().is_ok());
        assert!(!controller.release_next_reply());
    }

    #[tokio::test]
    async fn test_write_after_disconnect_fails() {
        let (connection, controller) = MockDeviceConnection::new(
            DeviceId::from("mock-1"),
            FrameConfig::usb_hid(),
            status_responder(StatusWord::SUCCESS),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        connection.set_frame_sink(tx);

        controller.disconnect();

        assert_eq!(
            connection.write(vec![0x01]).await,
            Err(TransportError::ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn test_mock_transport_rejects_unknown_device() {
        let transport = MockTransport::new(
            FrameConfig::usb_hid(),
            status_responder(StatusWord::SUCCESS),
            vec![DeviceId::from("known")],
        );

        let result = transport.open(&DeviceId::from("unknown")).await;

        assert!(matches!(result, Err(TransportError::DeviceNotFound(_))));
        assert!(transport.open(&DeviceId::from("known")).await.is_ok());
        assert!(transport.controller(&DeviceId::from("known")).is_some());
    }
}
