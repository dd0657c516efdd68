//! 调度中心演示程序
//!
//! 展示预约从创建、派车、转运到完成的完整生命周期，以及取消退款和派车统计

use ambulance_core::{
    BookingStatus, CallerRecord, Destination, DriverStatus, EmergencyContact, Gender, GeoPoint,
    NewBookingRequest, PatientInfo, PickupPoint, Priority, RequestType, Requester, UserStatus,
    VehicleClass,
};
use ambulance_workflow::{
    CenterSettings, Collaborators, DispatchCenter, FleetDriver, InMemoryBookingStore,
    InMemoryDirectory, InMemoryGeosearch, Recipient, RecordingTransport, StatusContext,
};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    println!("🚑 救护车调度中心演示\n");

    let directory = Arc::new(InMemoryDirectory::new());
    let geosearch = Arc::new(InMemoryGeosearch::new());
    let transport = Arc::new(RecordingTransport::new());

    // 1. 车队与用户
    let fleet = [
        ("Rajesh", GeoPoint::new(28.6448, 77.2167), VehicleClass::Icu, 4.8),
        ("Priya", GeoPoint::new(28.6129, 77.2295), VehicleClass::Advanced, 4.6),
        ("Sunita", GeoPoint::new(28.6692, 77.4538), VehicleClass::Basic, 4.2),
    ];
    let fleet_size = fleet.len();
    for (name, location, vehicle_class, rating) in fleet {
        geosearch
            .add_driver(FleetDriver {
                driver_id: Uuid::new_v4(),
                name: name.to_string(),
                location,
                vehicle_class,
                status: DriverStatus::Available,
                rating: Some(rating),
                response_times_minutes: vec![7.0, 8.5],
            })
            .await;
    }
    let user_id = Uuid::new_v4();
    directory.add_user(user_id, UserStatus::Active).await;
    println!("✅ 车队 {} 辆，用户 {}", fleet_size, user_id);

    let center = DispatchCenter::new(
        Collaborators {
            store: Arc::new(InMemoryBookingStore::new()),
            directory,
            geosearch: geosearch.clone(),
            transport: transport.clone(),
        },
        CenterSettings::default(),
    );

    // 2. 院间转运预约，人工触发派车
    let booking = center
        .create_booking(transfer_request(Requester::Account { user_id }))
        .await?;
    println!(
        "📋 创建预约 {} ({}), 距离 {:.1} km, 预估费用 {:.2} {}",
        booking.reference,
        booking.status,
        booking.distance_km,
        booking.payment.amount,
        booking.payment.currency
    );

    center
        .update_status(booking.id, BookingStatus::Confirmed, StatusContext::default())
        .await?;
    let result = center.dispatch(booking.id).await?;
    match result.driver_id {
        Some(driver_id) => println!(
            "🚨 派车成功: 司机 {} 分数 {:.3} ETA {} 分钟, 备选 {} 个",
            driver_id,
            result.score.unwrap_or_default(),
            result.eta_minutes.unwrap_or_default(),
            result.alternatives.len()
        ),
        None => println!("⚠️  派车失败: {}", result.reason.unwrap_or_default()),
    }

    // 3. 按行程推进状态
    let pickup = booking.pickup.coordinates;
    let hospital = GeoPoint::new(28.5672, 77.2100);
    let steps = [
        (BookingStatus::DriverEnroute, GeoPoint::new(28.6400, 77.2180)),
        (BookingStatus::DriverArrived, pickup),
        (BookingStatus::PatientPicked, pickup),
        (BookingStatus::InTransit, GeoPoint::new(28.6000, 77.2150)),
        (BookingStatus::ArrivedHospital, hospital),
    ];
    if result.success {
        for (status, location) in steps {
            let updated = center
                .update_status(booking.id, status, StatusContext::at(location))
                .await?;
            println!(
                "   → {} (ETA到达接车点: {:?} 分钟)",
                updated.status, updated.tracking.eta_to_pickup_minutes
            );
        }
        center.record_payment(booking.id).await?;
        let completed = center
            .update_status(
                booking.id,
                BookingStatus::Completed,
                StatusContext::default().with_note("handed over to ward"),
            )
            .await?;
        println!("✅ 预约完成，时间线 {} 条", completed.timeline.len());
    }

    // 4. 取消一笔未付款预约
    let second = center
        .create_booking(transfer_request(Requester::Account { user_id }))
        .await?;
    let cancelled = center
        .cancel_booking(second.id, "user", "family arranged transport")
        .await?;
    if let Some(record) = &cancelled.cancellation {
        println!(
            "❌ 预约 {} 已取消，退款 {:.2} ({:?})",
            cancelled.reference, record.refund_amount, record.refund_status
        );
    }

    // 5. 匿名紧急呼叫，等待自动派车
    let emergency = center
        .create_booking(NewBookingRequest {
            request_type: RequestType::Emergency,
            priority: Priority::Critical,
            requester: Requester::Anonymous(CallerRecord {
                name: "Bystander".to_string(),
                phone: "+91 98111 22334".to_string(),
                location: None,
            }),
            ..transfer_request(Requester::Account { user_id })
        })
        .await?;
    println!(
        "\n⏳ 紧急呼叫 {} 等待自动派车: {}",
        emergency.reference,
        center.is_auto_dispatch_pending(emergency.id)
    );
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    let emergency = center.get_booking(emergency.id).await?;
    println!("   当前状态: {} 司机: {:?}", emergency.status, emergency.assigned_driver);

    // 6. 统计
    let overview = center.overview().await?;
    println!("\n📊 调度概览:");
    println!("   预约总数: {}", overview.total_bookings);
    println!("   进行中: {}", overview.active_bookings);
    println!("   派车次数: {}", overview.analytics.total_dispatches);
    println!("   派车成功率: {:.1}%", overview.analytics.success_rate * 100.0);
    println!(
        "   通知: 送达 {} / 失败 {}",
        overview.notifications.delivered, overview.notifications.failed
    );
    println!(
        "   来电者收到 {} 条通知",
        transport
            .messages_for(&Recipient::Caller("+91 98111 22334".to_string()))
            .await
            .len()
    );

    println!("\n🎉 演示完成");
    Ok(())
}

fn transfer_request(requester: Requester) -> NewBookingRequest {
    NewBookingRequest {
        request_type: RequestType::Transfer,
        priority: Priority::High,
        requester,
        pickup: PickupPoint {
            address: "Connaught Place, New Delhi".to_string(),
            coordinates: GeoPoint::new(28.6315, 77.2167),
            landmark: None,
            contact_phone: Some("+91 98100 00001".to_string()),
        },
        destination: Some(Destination {
            address: "AIIMS, Ansari Nagar, New Delhi".to_string(),
            coordinates: GeoPoint::new(28.5672, 77.2100),
            facility_name: Some("AIIMS".to_string()),
            facility_id: Some(Uuid::new_v4()),
        }),
        patient: PatientInfo {
            name: "Meera Sharma".to_string(),
            age: 67,
            gender: Gender::Female,
            condition: "Post-operative cardiac monitoring".to_string(),
            symptoms: vec!["chest discomfort".to_string()],
            allergies: vec!["penicillin".to_string()],
            medications: vec!["aspirin".to_string()],
            vitals: None,
            emergency_contact: EmergencyContact {
                name: "Arjun Sharma".to_string(),
                phone: "+91 98100 00002".to_string(),
                relation: "son".to_string(),
            },
        },
        requirements: None,
    }
}
