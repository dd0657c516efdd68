//! 救护车调度服务主程序
//!
//! 加载配置、初始化日志、载入内存车队，然后处理一条预约请求并输出结果与指标

use ambulance_admin::SystemManager;
use ambulance_core::{
    CallerRecord, Destination, DriverStatus, EmergencyContact, Gender, GeoPoint, NewBookingRequest,
    PatientInfo, PickupPoint, Priority, RequestType, Requester, UserStatus, VehicleClass,
};
use ambulance_workflow::{
    Collaborators, DispatchCenter, FleetDriver, InMemoryBookingStore, InMemoryDirectory,
    InMemoryGeosearch, RecordingTransport,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// 调度服务命令行参数
#[derive(Parser, Debug)]
#[command(name = "ambulance-server")]
#[command(about = "救护车调度服务：预约生命周期、司机匹配与实时通知")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    /// 预约请求JSON文件，未指定时使用内置的紧急呼叫示例
    #[arg(short, long)]
    request: Option<String>,

    /// 创建后立即派车，而不是等待自动派车
    #[arg(long)]
    dispatch_now: bool,

    /// 输出Prometheus指标
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = SystemManager::new(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        manager.config_manager().set_value("logging.level", level).await?;
    }
    manager.init_logging().await?;

    info!("启动救护车调度服务...");
    let config = manager.config_manager().get_config().await;

    let store = Arc::new(InMemoryBookingStore::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let geosearch = Arc::new(InMemoryGeosearch::new());
    let transport = Arc::new(RecordingTransport::new());

    let fleet = if config.fleet.is_empty() {
        warn!("No fleet configured, seeding sample fleet");
        sample_fleet()
    } else {
        config.fleet.clone()
    };
    info!("Loaded fleet of {} vehicles", fleet.len());
    for driver in fleet {
        geosearch.add_driver(driver).await;
    }

    let request = match &args.request {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read request file {}", path))?;
            serde_json::from_str::<NewBookingRequest>(&raw).context("Invalid booking request")?
        }
        None => sample_request(),
    };
    if let Some(user_id) = request.requester.user_id() {
        directory.add_user(user_id, UserStatus::Active).await;
    }

    let center = DispatchCenter::new(
        Collaborators {
            store,
            directory,
            geosearch,
            transport: transport.clone(),
        },
        config.center_settings(),
    );

    let booking = center.create_booking(request).await?;
    info!("Booking {} created with status {}", booking.reference, booking.status);

    if args.dispatch_now {
        let result = center.dispatch(booking.id).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if booking.needs_auto_dispatch() {
        let wait = Duration::from_millis(config.lifecycle.auto_dispatch_delay_ms + 500);
        info!("Waiting {:?} for auto-dispatch", wait);
        tokio::time::sleep(wait).await;
    }

    let booking = center.get_booking(booking.id).await?;
    println!("{}", serde_json::to_string_pretty(&booking)?);
    info!(
        "{} notifications recorded for booking {}",
        transport.messages().await.len(),
        booking.reference
    );

    let report = manager.generate_status_report(&center).await?;
    println!("{}", serde_json::to_string_pretty(&report.overview)?);
    if args.metrics {
        println!("{}", report.metrics);
    }

    Ok(())
}

fn sample_fleet() -> Vec<FleetDriver> {
    let vehicles = [
        ("Rajesh", 28.6448, 77.2167, VehicleClass::Icu, 4.8),
        ("Priya", 28.6129, 77.2295, VehicleClass::Advanced, 4.6),
        ("Amit", 28.5921, 77.2290, VehicleClass::Cardiac, 4.9),
        ("Sunita", 28.6692, 77.4538, VehicleClass::Basic, 4.2),
        ("Farhan", 28.5355, 77.3910, VehicleClass::Neonatal, 4.7),
    ];

    vehicles
        .into_iter()
        .map(|(name, lat, lng, vehicle_class, rating)| FleetDriver {
            driver_id: Uuid::new_v4(),
            name: name.to_string(),
            location: GeoPoint::new(lat, lng),
            vehicle_class,
            status: DriverStatus::Available,
            rating: Some(rating),
            response_times_minutes: vec![6.0, 9.0, 7.5],
        })
        .collect()
}

fn sample_request() -> NewBookingRequest {
    NewBookingRequest {
        request_type: RequestType::Emergency,
        priority: Priority::Critical,
        requester: Requester::Anonymous(CallerRecord {
            name: "Bystander".to_string(),
            phone: "+91 98111 22334".to_string(),
            location: Some("Connaught Place".to_string()),
        }),
        pickup: PickupPoint {
            address: "Connaught Place, New Delhi".to_string(),
            coordinates: GeoPoint::new(28.6315, 77.2167),
            landmark: Some("Near Rajiv Chowk metro".to_string()),
            contact_phone: Some("+91 98111 22334".to_string()),
        },
        destination: Some(Destination {
            address: "AIIMS, Ansari Nagar, New Delhi".to_string(),
            coordinates: GeoPoint::new(28.5672, 77.2100),
            facility_name: Some("AIIMS Trauma Centre".to_string()),
            facility_id: Some(Uuid::new_v4()),
        }),
        patient: PatientInfo {
            name: "Unknown male".to_string(),
            age: 45,
            gender: Gender::Male,
            condition: "Road accident, unconscious".to_string(),
            symptoms: vec!["head injury".to_string(), "bleeding".to_string()],
            allergies: vec![],
            medications: vec![],
            vitals: None,
            emergency_contact: EmergencyContact {
                name: "Not available".to_string(),
                phone: "+91 98111 22334".to_string(),
                relation: "bystander".to_string(),
            },
        },
        requirements: None,
    }
}
