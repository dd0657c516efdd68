//! 调度中心
//!
//! 协调生命周期管理、派车引擎、通知扇出和自动派车调度，对外提供统一的操作接口

use crate::collaborators::{BookingStore, Geosearch, NotificationTransport, UserDirectory};
use crate::dispatch::{DispatchConstraints, DispatchEngine, DispatchResult, DispatchSettings};
use crate::fare::{FareCalculator, FarePolicy};
use crate::history::DispatchAnalytics;
use crate::lifecycle::{BookingLifecycleManager, LifecycleSettings, StatusContext};
use crate::notification::{NotificationFanout, NotificationSettings, NotificationStats};
use crate::scheduler::AutoDispatchScheduler;
use ambulance_core::{Booking, BookingFilter, BookingStatus, GeoPoint, NewBookingRequest, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 调度中心配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CenterSettings {
    pub fare: FarePolicy,
    pub dispatch: DispatchSettings,
    pub lifecycle: LifecycleSettings,
    pub notification: NotificationSettings,
}

/// 外部协作者集合
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn BookingStore>,
    pub directory: Arc<dyn UserDirectory>,
    pub geosearch: Arc<dyn Geosearch>,
    pub transport: Arc<dyn NotificationTransport>,
}

/// 调度中心
pub struct DispatchCenter {
    lifecycle: Arc<BookingLifecycleManager>,
    engine: Arc<DispatchEngine>,
    fanout: Arc<NotificationFanout>,
    scheduler: AutoDispatchScheduler,
}

impl DispatchCenter {
    /// 创建调度中心
    pub fn new(collaborators: Collaborators, settings: CenterSettings) -> Self {
        let fanout = Arc::new(NotificationFanout::new(
            collaborators.transport,
            settings.notification,
        ));
        let scheduler = AutoDispatchScheduler::new(Duration::from_millis(
            settings.lifecycle.auto_dispatch_delay_ms,
        ));
        let lifecycle = Arc::new(BookingLifecycleManager::new(
            collaborators.store,
            collaborators.directory,
            Arc::clone(&collaborators.geosearch),
            Arc::clone(&fanout),
            FareCalculator::new(settings.fare),
            settings.lifecycle,
        ));
        let engine = Arc::new(DispatchEngine::new(
            Arc::clone(&lifecycle),
            collaborators.geosearch,
            Arc::clone(&fanout),
            settings.dispatch,
        ));

        Self {
            lifecycle,
            engine,
            fanout,
            scheduler,
        }
    }

    /// 创建预约；紧急或危重预约延迟自动派车，调用方立即得到响应
    pub async fn create_booking(&self, request: NewBookingRequest) -> Result<Booking> {
        let booking = self.lifecycle.create(request).await?;
        if booking.needs_auto_dispatch() {
            self.scheduler.schedule(booking.id, Arc::clone(&self.engine));
        }
        Ok(booking)
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> Result<Booking> {
        self.lifecycle.get(booking_id).await
    }

    pub async fn update_status(
        &self,
        booking_id: Uuid,
        status: BookingStatus,
        context: StatusContext,
    ) -> Result<Booking> {
        self.lifecycle.update_status(booking_id, status, context).await
    }

    /// 直接指定司机
    pub async fn assign_driver(&self, booking_id: Uuid, driver_id: Uuid) -> Result<Booking> {
        let booking = self.lifecycle.assign_driver(booking_id, driver_id, None).await?;
        self.scheduler.cancel(booking_id);
        Ok(booking)
    }

    /// 取消预约，成功后才撤销挂起的自动派车
    pub async fn cancel_booking(&self, booking_id: Uuid, actor: &str, reason: &str) -> Result<Booking> {
        let booking = self.lifecycle.cancel(booking_id, actor, reason).await?;
        self.scheduler.cancel(booking_id);
        Ok(booking)
    }

    pub async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>> {
        self.lifecycle.list(filter).await
    }

    /// 立即派车
    pub async fn dispatch(&self, booking_id: Uuid) -> Result<DispatchResult> {
        self.dispatch_with(booking_id, DispatchConstraints::default()).await
    }

    /// 派车失败时保留挂起的自动派车，预约仍可重试
    pub async fn dispatch_with(&self, booking_id: Uuid, constraints: DispatchConstraints) -> Result<DispatchResult> {
        let result = self.engine.dispatch(booking_id, constraints).await?;
        if result.success {
            self.scheduler.cancel(booking_id);
        }
        Ok(result)
    }

    pub async fn manual_override_dispatch(
        &self,
        booking_id: Uuid,
        driver_id: Uuid,
        reason: &str,
    ) -> Result<DispatchResult> {
        let result = self.engine.manual_override(booking_id, driver_id, reason).await?;
        self.scheduler.cancel(booking_id);
        Ok(result)
    }

    pub async fn get_dispatch_analytics(&self) -> DispatchAnalytics {
        self.engine.analytics().await
    }

    pub async fn record_payment(&self, booking_id: Uuid) -> Result<Booking> {
        self.lifecycle.record_payment(booking_id).await
    }

    pub async fn update_driver_location(&self, booking_id: Uuid, location: GeoPoint) -> Result<Booking> {
        self.lifecycle.update_driver_location(booking_id, location).await
    }

    pub fn is_auto_dispatch_pending(&self, booking_id: Uuid) -> bool {
        self.scheduler.is_pending(booking_id)
    }

    pub fn lifecycle(&self) -> &Arc<BookingLifecycleManager> {
        &self.lifecycle
    }

    pub fn engine(&self) -> &Arc<DispatchEngine> {
        &self.engine
    }

    /// 获取系统概览
    pub async fn overview(&self) -> Result<DispatchSystemOverview> {
        let filter = BookingFilter {
            limit: Some(usize::MAX),
            ..Default::default()
        };
        let bookings = self.lifecycle.list(&filter).await?;

        let mut bookings_by_status = HashMap::new();
        let mut active_bookings = 0;
        for booking in &bookings {
            *bookings_by_status
                .entry(booking.status.as_str().to_string())
                .or_insert(0) += 1;
            if !booking.status.is_terminal() {
                active_bookings += 1;
            }
        }

        Ok(DispatchSystemOverview {
            total_bookings: bookings.len(),
            active_bookings,
            bookings_by_status,
            pending_auto_dispatch: self.scheduler.pending(),
            analytics: self.engine.analytics().await,
            notifications: self.fanout.stats(),
        })
    }
}

/// 调度系统概览
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSystemOverview {
    pub total_bookings: usize,
    pub active_bookings: usize,
    pub bookings_by_status: HashMap<String, usize>,
    pub pending_auto_dispatch: usize,
    pub analytics: DispatchAnalytics,
    pub notifications: NotificationStats,
}
