//! 投影状态的当前值单元
//!
//! 只保留最新快照：新观察者立即拿到当前值，之后收到每次替换。
//! 慢观察者会跳过中间版本，但永远不会看到不完整的状态。

use std::sync::Arc;
use std::time::Duration;

use domain::ProjectedState;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// 每次发布加一，初始状态为 0
    pub version: u64,
    pub state: Arc<ProjectedState>,
}

#[derive(Clone)]
pub struct StateDistributor {
    sender: Arc<watch::Sender<StateSnapshot>>,
}

impl StateDistributor {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(StateSnapshot {
            version: 0,
            state: Arc::new(ProjectedState::initial()),
        });
        Self {
            sender: Arc::new(sender),
        }
    }

    /// 整体替换当前状态，返回新版本号
    pub fn publish(&self, state: ProjectedState) -> u64 {
        let state = Arc::new(state);
        let mut version = 0;
        self.sender.send_modify(|snapshot| {
            snapshot.version += 1;
            snapshot.state = state;
            version = snapshot.version;
        });
        version
    }

    pub fn current(&self) -> StateSnapshot {
        self.sender.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.sender.borrow().version
    }

    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.sender.subscribe()
    }

    /// 等待状态满足条件；超时返回 `None`
    pub async fn wait_for<F>(&self, timeout: Duration, mut predicate: F) -> Option<StateSnapshot>
    where
        F: FnMut(&ProjectedState) -> bool,
    {
        let mut receiver = self.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            receiver.wait_for(|snapshot| predicate(&snapshot.state)),
        )
        .await;
        match waited {
            Ok(Ok(snapshot)) => Some(snapshot.clone()),
            _ => None,
        }
    }
}

impl Default for StateDistributor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{DomainEvent, StateProjector, UserId, UserLoggedIn};

    fn login(user: &str) -> DomainEvent {
        DomainEvent::UserLoggedIn(UserLoggedIn {
            user_id: UserId::new(user),
            display_name: user.into(),
            avatar_ref: String::new(),
        })
    }

    #[tokio::test]
    async fn test_new_observer_sees_current_value() {
        let distributor = StateDistributor::new();
        let state = StateProjector::replay(&[login("a")]);
        distributor.publish(state.clone());

        let receiver = distributor.subscribe();
        let snapshot = receiver.borrow().clone();
        assert_eq!(snapshot.version, 1);
        assert_eq!(*snapshot.state, state);
    }

    #[tokio::test]
    async fn test_observer_is_notified_of_updates() {
        let distributor = StateDistributor::new();
        let mut receiver = distributor.subscribe();
        receiver.borrow_and_update();

        let state = StateProjector::replay(&[login("a")]);
        distributor.publish(state);
        receiver.changed().await.unwrap();
        assert!(receiver
            .borrow_and_update()
            .state
            .user(&UserId::new("a"))
            .is_some());
    }

    #[tokio::test]
    async fn test_wait_for_condition() {
        let distributor = StateDistributor::new();
        let waiter = {
            let distributor = distributor.clone();
            tokio::spawn(async move {
                distributor
                    .wait_for(Duration::from_secs(5), |state| {
                        state.user(&UserId::new("a")).is_some()
                    })
                    .await
            })
        };
        distributor.publish(StateProjector::replay(&[login("a")]));
        let snapshot = waiter.await.unwrap().unwrap();
        assert_eq!(snapshot.version, 1);

        let missing = distributor
            .wait_for(Duration::from_millis(20), |state| {
                state.user(&UserId::new("nobody")).is_some()
            })
            .await;
        assert!(missing.is_none());
    }

    #[test]
    fn test_publish_without_observers_still_replaces_value() {
        let distributor = StateDistributor::new();
        assert_eq!(distributor.version(), 0);
        distributor.publish(ProjectedState::initial());
        distributor.publish(StateProjector::replay(&[login("b")]));
        assert_eq!(distributor.version(), 2);
        assert!(distributor.current().state.user(&UserId::new("b")).is_some());
    }
}
