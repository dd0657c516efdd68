//! 紧急预约的延迟自动派车
//!
//! 每个预约至多一个挂起任务，等待期间可按预约ID取消。任务触发时重新读取预约，
//! 若已被取消或已派车则不做任何事。

use crate::dispatch::{DispatchConstraints, DispatchEngine};
use ambulance_core::BookingStatus;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

type TaskMap = Arc<Mutex<HashMap<Uuid, (u64, JoinHandle<()>)>>>;

/// 自动派车调度器
#[derive(Debug)]
pub struct AutoDispatchScheduler {
    delay: Duration,
    tasks: TaskMap,
    generation: AtomicU64,
}

impl AutoDispatchScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// 为预约安排一次延迟派车，已有的挂起任务会被替换
    pub fn schedule(&self, booking_id: Uuid, engine: Arc<DispatchEngine>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay;
        let tasks = Arc::clone(&self.tasks);

        // 持锁期间启动任务，保证任务醒来时能看到自己的登记
        let mut registered = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // 开始派车后不再可中止，取消与派车由预约锁串行
            {
                let mut tasks = tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let current = matches!(tasks.get(&booking_id), Some((g, _)) if *g == generation);
                if !current {
                    return;
                }
                tasks.remove(&booking_id);
            }
            run_auto_dispatch(booking_id, &engine).await;
        });

        if let Some((_, previous)) = registered.insert(booking_id, (generation, handle)) {
            previous.abort();
        }
        drop(registered);
        debug!("Scheduled auto-dispatch for booking {} in {:?}", booking_id, delay);
    }

    /// 取消挂起的派车任务，返回是否确实取消了一个任务
    pub fn cancel(&self, booking_id: Uuid) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match tasks.remove(&booking_id) {
            Some((_, handle)) if !handle.is_finished() => {
                handle.abort();
                info!("Cancelled pending auto-dispatch for booking {}", booking_id);
                true
            }
            _ => false,
        }
    }

    /// 尚未执行完的任务数
    pub fn pending(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.values().filter(|(_, handle)| !handle.is_finished()).count()
    }

    pub fn is_pending(&self, booking_id: Uuid) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks
            .get(&booking_id)
            .map(|(_, handle)| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for AutoDispatchScheduler {
    fn drop(&mut self) {
        let tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, handle) in tasks.values() {
            handle.abort();
        }
    }
}

async fn run_auto_dispatch(booking_id: Uuid, engine: &DispatchEngine) {
    let booking = match engine.lifecycle().get(booking_id).await {
        Ok(booking) => booking,
        Err(e) => {
            warn!("Auto-dispatch skipped, booking {} unavailable: {}", booking_id, e);
            return;
        }
    };

    if !matches!(booking.status, BookingStatus::Requested | BookingStatus::Confirmed) {
        debug!("Auto-dispatch for booking {} no longer needed ({})", booking_id, booking.status);
        return;
    }

    match engine.dispatch(booking_id, DispatchConstraints::default()).await {
        Ok(result) if result.success => {
            info!("Auto-dispatch assigned booking {} to {:?}", booking_id, result.driver_id)
        }
        Ok(result) => warn!(
            "Auto-dispatch for booking {} found no driver: {}",
            booking_id,
            result.reason.unwrap_or_default()
        ),
        Err(e) => warn!("Auto-dispatch for booking {} aborted: {}", booking_id, e),
    }
}
