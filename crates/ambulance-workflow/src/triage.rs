//! 病情关键词分诊
//!
//! 根据患者病情文本推断所需车辆等级，并为司机匹配提供专科匹配度

use ambulance_core::{
    EquipmentRequirements, PatientInfo, Priority, RequestType, Requirements, VehicleClass,
};

/// 需要ICU重症车辆的关键词
const ICU_KEYWORDS: &[&str] = &[
    "accident",
    "multiple injuries",
    "high blood loss",
    "unconscious",
    "critical",
    "severe",
    "chest pain",
];

const CARDIAC_KEYWORDS: &[&str] = &[
    "cardiac",
    "heart",
    "chest pain",
    "myocardial",
    "arrhythmia",
    "palpitation",
];

const TRAUMA_KEYWORDS: &[&str] = &[
    "trauma",
    "accident",
    "injury",
    "injuries",
    "fracture",
    "bleeding",
    "blood loss",
    "burn",
    "head injury",
];

const NEONATAL_KEYWORDS: &[&str] = &["neonatal", "newborn", "infant", "premature", "preterm"];

/// 病情类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionCategory {
    Cardiac,
    Trauma,
    Neonatal,
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| text.contains(keyword))
}

/// 按关键词识别病情类别；新生儿优先，其次心脏，最后创伤
pub fn classify_condition(text: &str) -> Option<ConditionCategory> {
    let text = text.to_lowercase();
    if contains_any(&text, NEONATAL_KEYWORDS) {
        Some(ConditionCategory::Neonatal)
    } else if contains_any(&text, CARDIAC_KEYWORDS) {
        Some(ConditionCategory::Cardiac)
    } else if contains_any(&text, TRAUMA_KEYWORDS) {
        Some(ConditionCategory::Trauma)
    } else {
        None
    }
}

/// 专科匹配度：病情类别与车辆等级的固定查找表
pub fn specialization_score(condition_text: &str, vehicle_class: VehicleClass) -> f64 {
    match classify_condition(condition_text) {
        Some(ConditionCategory::Cardiac) => match vehicle_class {
            VehicleClass::Cardiac => 1.0,
            VehicleClass::Icu => 0.8,
            _ => 0.5,
        },
        Some(ConditionCategory::Trauma) => match vehicle_class {
            VehicleClass::Icu => 1.0,
            VehicleClass::Advanced => 0.7,
            _ => 0.4,
        },
        Some(ConditionCategory::Neonatal) => match vehicle_class {
            VehicleClass::Neonatal => 1.0,
            VehicleClass::Icu => 0.6,
            _ => 0.3,
        },
        None => 1.0,
    }
}

/// 未指定需求时推断默认车辆需求
pub fn default_requirements(
    request_type: RequestType,
    priority: Priority,
    patient: &PatientInfo,
) -> Requirements {
    let text = patient.clinical_text();
    let urgent = request_type == RequestType::Emergency || priority == Priority::Critical;

    let vehicle_class = match classify_condition(&text) {
        Some(ConditionCategory::Neonatal) => VehicleClass::Neonatal,
        Some(ConditionCategory::Cardiac) if !contains_any(&text, ICU_KEYWORDS) => VehicleClass::Cardiac,
        _ if contains_any(&text, ICU_KEYWORDS) => VehicleClass::Icu,
        _ if urgent => VehicleClass::Advanced,
        _ => VehicleClass::Basic,
    };

    let equipment = EquipmentRequirements {
        oxygen: urgent || vehicle_class != VehicleClass::Basic,
        stretcher: true,
        ventilator: vehicle_class == VehicleClass::Icu,
        attendant_required: urgent,
    };

    Requirements {
        vehicle_class,
        equipment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambulance_core::{EmergencyContact, Gender};

    fn patient(condition: &str, symptoms: &[&str]) -> PatientInfo {
        PatientInfo {
            name: "Test Patient".to_string(),
            age: 54,
            gender: Gender::Male,
            condition: condition.to_string(),
            symptoms: symptoms.iter().map(|s| s.to_string()).collect(),
            allergies: vec![],
            medications: vec![],
            vitals: None,
            emergency_contact: EmergencyContact {
                name: "Contact".to_string(),
                phone: "+91 90000 00000".to_string(),
                relation: "spouse".to_string(),
            },
        }
    }

    #[test]
    fn test_classify_condition() {
        assert_eq!(classify_condition("Suspected Myocardial infarction"), Some(ConditionCategory::Cardiac));
        assert_eq!(classify_condition("road accident with fracture"), Some(ConditionCategory::Trauma));
        assert_eq!(classify_condition("premature newborn"), Some(ConditionCategory::Neonatal));
        assert_eq!(classify_condition("mild fever"), None);
    }

    #[test]
    fn test_specialization_table() {
        assert_eq!(specialization_score("heart attack", VehicleClass::Cardiac), 1.0);
        assert_eq!(specialization_score("heart attack", VehicleClass::Basic), 0.5);
        assert_eq!(specialization_score("trauma", VehicleClass::Icu), 1.0);
        assert_eq!(specialization_score("neonatal jaundice", VehicleClass::Advanced), 0.3);
        assert_eq!(specialization_score("dizziness", VehicleClass::Basic), 1.0);
    }

    #[test]
    fn test_default_requirements_for_emergency() {
        let req = default_requirements(RequestType::Emergency, Priority::Critical, &patient("Chest pain", &["sweating"]));
        assert_eq!(req.vehicle_class, VehicleClass::Icu);
        assert!(req.equipment.oxygen);
        assert!(req.equipment.stretcher);
        assert!(req.equipment.ventilator);
        assert!(req.equipment.attendant_required);
    }

    #[test]
    fn test_default_requirements_for_routine_transfer() {
        let req = default_requirements(RequestType::Scheduled, Priority::Low, &patient("Dialysis appointment", &[]));
        assert_eq!(req.vehicle_class, VehicleClass::Basic);
        assert!(!req.equipment.oxygen);
        assert!(req.equipment.stretcher);
        assert!(!req.equipment.attendant_required);

        let cardiac = default_requirements(RequestType::Transfer, Priority::Medium, &patient("cardiac monitoring", &[]));
        assert_eq!(cardiac.vehicle_class, VehicleClass::Cardiac);
    }
}
