//! 投影任务：唯一的、严格顺序的状态折叠者

use std::sync::Arc;

use domain::StateProjector;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::distributor::StateDistributor;
use crate::gateway::{EventLogGateway, EventSubscription, SubscriptionItem};

pub struct ProjectionRunner {
    gateway: Arc<EventLogGateway>,
    distributor: StateDistributor,
    cancel: CancellationToken,
}

impl ProjectionRunner {
    pub fn new(
        gateway: Arc<EventLogGateway>,
        distributor: StateDistributor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            distributor,
            cancel,
        }
    }

    /// 折叠服务流直到取消。首次追赶完成时通知 `ready`。
    /// 订阅中断后按退避重新订阅，从最后处理的位置继续。
    pub async fn run(self, mut subscription: EventSubscription, ready: oneshot::Sender<()>) {
        let mut ready = Some(ready);
        let mut state = (*self.distributor.current().state).clone();
        let mut backoff = Backoff::default();

        loop {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => break,
                item = subscription.next() => item,
            };

            match item {
                Some(Ok(SubscriptionItem::Event { position, event })) => {
                    state = StateProjector::reduce(&state, &event);
                    let version = self.distributor.publish(state.clone());
                    debug!(
                        position,
                        version,
                        event_type = event.event_type(),
                        "投影状态已更新"
                    );
                    backoff.reset();
                }
                Some(Ok(SubscriptionItem::CaughtUp)) => {
                    if let Some(ready) = ready.take() {
                        info!(
                            position = subscription.position(),
                            version = self.distributor.version(),
                            "projection caught up"
                        );
                        let _ = ready.send(());
                    }
                }
                Some(Err(_)) | None => {
                    let after = subscription.position();
                    warn!(after, "服务流订阅中断，准备重新订阅");
                    let stream = subscription.stream().to_owned();
                    match self
                        .gateway
                        .resubscribe(&stream, after, &mut backoff, &self.cancel)
                        .await
                    {
                        Some(next) => subscription = next,
                        None => break,
                    }
                }
            }
        }

        info!(version = self.distributor.version(), "projection stopped");
    }
}
