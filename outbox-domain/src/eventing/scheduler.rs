//! 周期任务调度（Scheduler）
//!
//! 每个任务按固定间隔执行 `tick`，错过的节拍直接跳过；共享一个取消令牌，
//! `shutdown` 后各循环在当前 `tick` 结束时退出。`tick_all` 供测试或运维手动推进一轮。
//!
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 周期任务：`tick` 内部自行处理并记录错误
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;

    async fn tick(&self);
}

/// 调度器句柄：用于手动推进、优雅关闭与等待任务结束
#[derive(Default)]
pub struct Scheduler {
    token: CancellationToken,
    tasks: Vec<Arc<dyn PeriodicTask>>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以固定间隔启动任务（需在 tokio 运行时内调用）；首个节拍立即触发
    pub fn schedule(&mut self, interval: Duration, task: Arc<dyn PeriodicTask>) {
        let token = self.token.clone();
        let looped = task.clone();

        self.handles.push(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => looped.tick().await,
                }
            }

            debug!(task = looped.name(), "periodic task stopped");
        }));
        self.tasks.push(task);
    }

    /// 按登记顺序手动执行每个任务一次
    pub async fn tick_all(&self) {
        for task in &self.tasks {
            task.tick().await;
        }
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn join(mut self) {
        let handles = std::mem::take(&mut self.handles);

        for h in handles {
            let _ = h.await;
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
