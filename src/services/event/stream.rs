use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::types::{ListenerId, ServiceEvent, ServiceListener};
use crate::services::registry::types::ModuleId;

/// 将同步事件转发到有界通道的监听器
pub(crate) struct ChannelListener {
    subscriber_id: Uuid,
    sender: mpsc::Sender<ServiceEvent>,
}

impl ChannelListener {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServiceEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let listener = Self {
            subscriber_id: Uuid::new_v4(),
            sender,
        };
        (listener, receiver)
    }

    pub(crate) fn subscriber_id(&self) -> Uuid {
        self.subscriber_id
    }
}

impl ServiceListener for ChannelListener {
    fn service_changed(&self, event: &ServiceEvent) {
        self.try_service_changed(event);
    }

    // 通道满或接收端已关闭时丢弃事件，由事件总线计入失败
    fn try_service_changed(&self, event: &ServiceEvent) -> bool {
        match self.sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    subscriber_id = %self.subscriber_id,
                    service_id = event.reference.id(),
                    "Event stream is full, dropping service event"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(
                    subscriber_id = %self.subscriber_id,
                    "Event stream receiver dropped"
                );
                false
            }
        }
    }
}

/// 异步服务事件流
#[derive(Debug)]
pub struct ServiceEventStream {
    subscriber_id: Uuid,
    listener_id: ListenerId,
    consumer: ModuleId,
    inner: ReceiverStream<ServiceEvent>,
}

impl ServiceEventStream {
    pub(crate) fn new(
        subscriber_id: Uuid,
        listener_id: ListenerId,
        consumer: ModuleId,
        receiver: mpsc::Receiver<ServiceEvent>,
    ) -> Self {
        Self {
            subscriber_id,
            listener_id,
            consumer,
            inner: ReceiverStream::new(receiver),
        }
    }

    pub fn subscriber_id(&self) -> Uuid {
        self.subscriber_id
    }

    pub fn listener_id(&self) -> ListenerId {
        self.listener_id
    }

    pub fn consumer(&self) -> ModuleId {
        self.consumer
    }
}

impl Stream for ServiceEventStream {
    type Item = ServiceEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}
