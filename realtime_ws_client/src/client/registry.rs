// realtime_ws_client/src/client/registry.rs

//! 消息类型到处理器列表的发布/订阅表。
//!
//! 注册表在调用方线程 (注册/注销) 与驱动任务 (分发) 之间共享，使用互斥锁保护。
//! 分发时先在锁内复制出该类型的处理器快照，然后在锁外逐个调用，
//! 因此处理器内部可以安全地注册或注销处理器，不会死锁。

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind}; // 隔离处理器中的 panic
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error};

use crate::message::WsMessage;

/// 消息处理器。返回 `Err` 只会被记录到日志，不影响其它处理器。
pub type Handler = Arc<dyn Fn(&WsMessage) -> anyhow::Result<()> + Send + Sync>;

/// `on` 返回的处理器标识，用于之后的 `off`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// 处理器注册表。
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<String, Vec<(HandlerId, Handler)>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.lock();
        let counts: HashMap<&str, usize> = guard.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("HandlerRegistry").field("handlers", &counts).finish()
    }
}

/// 分发一条消息的结果统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// 被调用的处理器数量。
    pub invoked: usize,
    /// 返回错误或发生 panic 的处理器数量。
    pub failed: usize,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // 处理器 panic 不会发生在持锁期间，但仍然容忍被毒化的锁
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<(HandlerId, Handler)>>> {
        self.handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 为 `message_type` 追加一个处理器。同一类型可注册多个，按注册顺序调用。
    pub fn register(&self, message_type: impl Into<String>, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed)); // 只需唯一，不需要与其它内存操作排序
        let message_type = message_type.into();
        debug!("[处理器注册表] 注册处理器 {:?}，消息类型 '{}'", id, message_type);
        self.lock().entry(message_type).or_default().push((id, handler));
        id
    }

    /// 移除先前注册的处理器。找不到时返回 `false`。
    pub fn unregister(&self, message_type: &str, id: HandlerId) -> bool {
        let mut guard = self.lock();
        let Some(list) = guard.get_mut(message_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            guard.remove(message_type); // 不保留空列表
        }
        if removed {
            debug!("[处理器注册表] 已注销处理器 {:?}，消息类型 '{}'", id, message_type);
        }
        removed
    }

    /// 某个消息类型当前注册的处理器数量。
    pub fn handler_count(&self, message_type: &str) -> usize {
        self.lock().get(message_type).map_or(0, Vec::len)
    }

    /// 按注册顺序调用 `message.message_type` 对应的全部处理器。
    ///
    /// 每次调用相互隔离：返回 `Err` 或 panic 的处理器只记录日志，其余处理器照常执行。
    pub fn dispatch(&self, message: &WsMessage) -> DispatchReport {
        let snapshot: Vec<(HandlerId, Handler)> = match self.lock().get(&message.message_type) {
            Some(list) => list.clone(),
            None => Vec::new(),
        };

        if snapshot.is_empty() {
            debug!("[处理器注册表] 消息类型 '{}' 没有注册处理器，忽略。", message.message_type);
            return DispatchReport::default();
        }

        let mut report = DispatchReport::default();
        for (id, handler) in snapshot {
            report.invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| (*handler)(message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!(
                        "[处理器注册表] 处理器 {:?} 处理类型为 '{}' 的消息时返回错误: {:#}",
                        id, message.message_type, e
                    );
                }
                Err(payload) => {
                    report.failed += 1;
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "未知 panic".to_string());
                    error!(
                        "[处理器注册表] 处理器 {:?} 处理类型为 '{}' 的消息时发生 panic: {}",
                        id, message.message_type, reason
                    );
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recorder(log: &Arc<StdMutex<Vec<&'static str>>>, name: &'static str) -> Handler {
        let log = log.clone();
        Arc::new(move |_msg: &WsMessage| -> anyhow::Result<()> {
            log.lock().unwrap().push(name);
            Ok(())
        })
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let registry = HandlerRegistry::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        registry.register("update", recorder(&log, "h1"));
        registry.register("update", recorder(&log, "h2"));
        registry.register("other", recorder(&log, "other"));

        let report = registry.dispatch(&WsMessage::new("update"));

        assert_eq!(*log.lock().unwrap(), vec!["h1", "h2"]);
        assert_eq!(report, DispatchReport { invoked: 2, failed: 0 });
    }

    #[test]
    /// h1 返回错误或 panic 时 h2 仍然会被调用，后续消息也照常分发。
    fn test_failing_handler_is_isolated() {
        let registry = HandlerRegistry::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        registry.register("update", Arc::new(|_msg: &WsMessage| -> anyhow::Result<()> { anyhow::bail!("h1 失败") }));
        registry.register("update", Arc::new(|_msg: &WsMessage| -> anyhow::Result<()> { panic!("h1b panic") }));
        registry.register("update", recorder(&log, "h2"));

        let first = registry.dispatch(&WsMessage::new("update"));
        let second = registry.dispatch(&WsMessage::new("update"));

        assert_eq!(first, DispatchReport { invoked: 3, failed: 2 });
        assert_eq!(second, first);
        assert_eq!(*log.lock().unwrap(), vec!["h2", "h2"]);
    }

    #[test]
    fn test_unregister_removes_only_that_handler() {
        let registry = HandlerRegistry::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let h1 = registry.register("update", recorder(&log, "h1"));
        registry.register("update", recorder(&log, "h2"));

        assert!(registry.unregister("update", h1));
        assert!(!registry.unregister("update", h1), "重复注销应为空操作");
        assert!(!registry.unregister("missing", h1));

        registry.dispatch(&WsMessage::new("update"));
        assert_eq!(*log.lock().unwrap(), vec!["h2"]);
        assert_eq!(registry.handler_count("update"), 1);
    }

    #[test]
    /// 处理器在分发过程中注销自己不会死锁，且只影响之后的消息。
    fn test_handler_may_unregister_itself_during_dispatch() {
        let registry = Arc::new(HandlerRegistry::new());
        let calls = Arc::new(AtomicU64::new(0));
        let id_slot: Arc<StdMutex<Option<HandlerId>>> = Arc::new(StdMutex::new(None));

        let handler: Handler = {
            let registry = registry.clone();
            let calls = calls.clone();
            let id_slot = id_slot.clone();
            Arc::new(move |_msg: &WsMessage| -> anyhow::Result<()> {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = *id_slot.lock().unwrap() {
                    registry.unregister("once", id);
                }
                Ok(())
            })
        };
        let id = registry.register("once", handler);
        *id_slot.lock().unwrap() = Some(id);

        registry.dispatch(&WsMessage::new("once"));
        registry.dispatch(&WsMessage::new("once"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.handler_count("once"), 0);
    }
}
