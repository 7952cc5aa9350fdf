//! Filtered stream of device state changes.

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::types::{DeviceKey, Platform, StateChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    All,
    Key(DeviceKey),
    /// The primary key and every sub-entity hanging off it.
    Device(DeviceKey),
    Platform(Platform),
}

impl Filter {
    fn accepts(&self, change: &StateChange) -> bool {
        let key = change.state.key;
        match self {
            Filter::All => true,
            Filter::Key(wanted) => key == *wanted,
            Filter::Device(primary) => key.primary() == *primary,
            Filter::Platform(platform) => change.state.platform == *platform,
        }
    }
}

pin_project! {
    /// Stream of [`StateChange`]s from a gateway.
    ///
    /// Notifications missed because the consumer fell behind are skipped
    /// with a warning; the stream ends once the gateway is dropped.
    pub struct StateUpdates {
        #[pin]
        inner: BroadcastStream<Arc<StateChange>>,
        filter: Filter,
        lagged: u64,
    }
}

impl StateUpdates {
    pub fn new(receiver: broadcast::Receiver<Arc<StateChange>>) -> Self {
        Self { inner: BroadcastStream::new(receiver), filter: Filter::All, lagged: 0 }
    }

    /// Only changes to exactly `key`.
    pub fn for_key(mut self, key: DeviceKey) -> Self {
        self.filter = Filter::Key(key);
        self
    }

    /// Changes to `key` and its sensors (`key` is reduced to its primary key).
    pub fn for_device(mut self, key: DeviceKey) -> Self {
        self.filter = Filter::Device(key.primary());
        self
    }

    pub fn for_platform(mut self, platform: Platform) -> Self {
        self.filter = Filter::Platform(platform);
        self
    }

    /// Notifications dropped so far because this consumer lagged.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }
}

impl Stream for StateUpdates {
    type Item = Arc<StateChange>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(change)) if this.filter.accepts(&change) => {
                    return Poll::Ready(Some(change));
                }
                Some(Ok(_)) => continue,
                Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                    warn!(missed, "State update consumer lagged, skipping");
                    *this.lagged += missed;
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Frame, PacketCodec, WALLPAD};
    use crate::registry::DeviceStateRegistry;
    use crate::types::{DeviceType, SubType};
    use futures::StreamExt;

    fn changes_for(frame: Frame, registry: &DeviceStateRegistry) -> Vec<StateChange> {
        PacketCodec::decode(&frame)
            .unwrap()
            .iter()
            .filter_map(|event| registry.update(event).into_change())
            .collect()
    }

    fn thermostat_frame() -> Frame {
        let payload = [0x11, 0x00, 23, 40, 21, 35, 0x00, 0x00];
        Frame::build_with_type(0xDC, WALLPAD, [0x36, 0x01], 0x00, payload)
    }

    #[tokio::test]
    async fn filters_by_device_and_platform() {
        let (tx, _) = broadcast::channel(16);
        let registry = DeviceStateRegistry::new();
        let thermostat = DeviceKey::new(DeviceType::Thermostat, 1);

        let device = StateUpdates::new(tx.subscribe()).for_device(thermostat);
        let exact = StateUpdates::new(tx.subscribe()).for_key(thermostat);
        let sensors = StateUpdates::new(tx.subscribe()).for_platform(Platform::Sensor);

        let light = Frame::build_with_type(0xDC, WALLPAD, [0x0E, 0x01], 0x00, [0xFF; 8]);
        let mut changes = changes_for(light, &registry);
        changes.extend(changes_for(thermostat_frame(), &registry));
        for change in changes {
            tx.send(Arc::new(change)).unwrap();
        }
        drop(tx);

        let device: Vec<_> = device.map(|c| c.state.key).collect().await;
        assert_eq!(device.len(), 4, "{device:?}");
        assert!(device.iter().all(|k| k.primary() == thermostat));

        let exact: Vec<_> = exact.collect().await;
        assert_eq!(exact.len(), 1);

        let sensors: Vec<_> = sensors.map(|c| c.state.key.sub_type).collect().await;
        assert_eq!(sensors, vec![SubType::HotTemp, SubType::HeatTemp]);
    }

    #[tokio::test]
    async fn lag_is_skipped_not_fatal() {
        let (tx, rx) = broadcast::channel(2);
        let registry = DeviceStateRegistry::new();
        let mut updates = StateUpdates::new(rx);

        for room in 0..4u8 {
            let payload = [0xFF, 0, 0, 0, 0, 0, 0, 0];
            let frame = Frame::build_with_type(0xDC, WALLPAD, [0x0E, room], 0x00, payload);
            for change in changes_for(frame, &registry) {
                tx.send(Arc::new(change)).unwrap();
            }
        }
        drop(tx);

        let rooms: Vec<_> = (&mut updates).map(|c| c.state.key.room).collect().await;
        assert_eq!(rooms, vec![2, 3]);
        assert_eq!(updates.lagged(), 2);
    }
}
