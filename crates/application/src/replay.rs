//! 有界回放缓冲
//!
//! 保留最近 N 条记录，新订阅者先拿到缓冲内容再接收实时记录。
//! 快照和订阅在同一把锁内完成，两者之间不会漏掉或重复记录。

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::broadcast;

pub const DEFAULT_REPLAY_CAPACITY: usize = 500;

pub struct ReplayFeed<T: Clone> {
    buffer: Mutex<VecDeque<T>>,
    capacity: usize,
    sender: broadcast::Sender<T>,
}

impl<T: Clone> ReplayFeed<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            sender,
        }
    }

    /// 追加一条记录，超出容量时淘汰最旧的
    pub fn publish(&self, item: T) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push_back(item.clone());
        while buffer.len() > self.capacity {
            buffer.pop_front();
        }
        // 没有实时订阅者时发送失败，忽略
        let _ = self.sender.send(item);
    }

    /// 返回当前缓冲内容和后续实时记录的接收端
    pub fn subscribe(&self) -> (Vec<T>, broadcast::Receiver<T>) {
        let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let backlog = buffer.iter().cloned().collect();
        (backlog, self.sender.subscribe())
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
