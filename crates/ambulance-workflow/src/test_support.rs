//! 单元测试共用的样例数据

use crate::fare::FareCalculator;
use ambulance_core::{
    Booking, BookingStatus, Destination, EmergencyContact, EquipmentRequirements, Gender, GeoPoint,
    NewBookingRequest, PatientInfo, Payment, PaymentStatus, PickupPoint, Priority, RequestType,
    Requester, Requirements, TimelineEntry, Tracking, VehicleClass,
};
use chrono::Utc;
use uuid::Uuid;

pub fn sample_patient(condition: &str) -> PatientInfo {
    PatientInfo {
        name: "Ravi Kumar".to_string(),
        age: 58,
        gender: Gender::Male,
        condition: condition.to_string(),
        symptoms: vec!["sweating".to_string()],
        allergies: vec!["penicillin".to_string()],
        medications: vec![],
        vitals: None,
        emergency_contact: EmergencyContact {
            name: "Anita Kumar".to_string(),
            phone: "+91 98100 00001".to_string(),
            relation: "spouse".to_string(),
        },
    }
}

pub fn sample_request(requester: Requester, request_type: RequestType, priority: Priority) -> NewBookingRequest {
    NewBookingRequest {
        request_type,
        priority,
        requester,
        pickup: PickupPoint {
            address: "Connaught Place, New Delhi".to_string(),
            coordinates: GeoPoint::new(28.6315, 77.2167),
            landmark: Some("Inner Circle".to_string()),
            contact_phone: Some("+91 98100 00002".to_string()),
        },
        destination: Some(Destination {
            address: "AIIMS, Ansari Nagar".to_string(),
            coordinates: GeoPoint::new(28.5672, 77.2100),
            facility_name: Some("AIIMS".to_string()),
            facility_id: None,
        }),
        patient: sample_patient("Chest pain"),
        requirements: None,
    }
}

pub fn sample_booking(priority: Priority) -> Booking {
    let now = Utc::now();
    let breakdown = FareCalculator::default().calculate(7.2, RequestType::Scheduled, priority);
    let request = sample_request(
        Requester::Account { user_id: Uuid::new_v4() },
        RequestType::Scheduled,
        priority,
    );

    Booking {
        id: Uuid::new_v4(),
        reference: "AMB-20260101-000001".to_string(),
        request_type: request.request_type,
        priority,
        requester: request.requester,
        assigned_driver: None,
        pickup: request.pickup,
        destination: request.destination,
        patient: sample_patient("Fever and weakness"),
        requirements: Requirements {
            vehicle_class: VehicleClass::Basic,
            equipment: EquipmentRequirements {
                stretcher: true,
                ..Default::default()
            },
        },
        payment: Payment {
            amount: breakdown.total,
            currency: "INR".to_string(),
            status: PaymentStatus::Pending,
            breakdown,
        },
        distance_km: 7.2,
        timeline: vec![TimelineEntry {
            status: BookingStatus::Requested,
            timestamp: now,
            location: None,
            note: None,
            reaffirmed: false,
        }],
        cancellation: None,
        tracking: Tracking::default(),
        status: BookingStatus::Requested,
        created_at: now,
        updated_at: now,
    }
}
