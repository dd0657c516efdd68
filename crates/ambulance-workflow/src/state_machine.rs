//! 预约状态机
//!
//! 管理预约从提交到完成/取消的全部合法状态转换

use ambulance_core::{BookingStatus, DispatchError, Result};
use std::collections::{HashMap, HashSet};

/// 预约状态机
///
/// 只包含常规转换表；派车（`DRIVER_ASSIGNED`）可从多个来源状态进入，
/// 由 [`BookingStateMachine::check_assignment`] 单独校验。
#[derive(Debug)]
pub struct BookingStateMachine {
    transitions: HashMap<BookingStatus, HashSet<BookingStatus>>,
    assignment_sources: HashSet<BookingStatus>,
}

impl BookingStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        use BookingStatus::*;

        let edges = vec![
            (Requested, vec![Confirmed, Cancelled]),
            (Confirmed, vec![DriverAssigned, Cancelled]),
            (DriverAssigned, vec![DriverEnroute, Cancelled]),
            (DriverEnroute, vec![DriverArrived, Cancelled]),
            (DriverArrived, vec![PatientPicked, Cancelled]),
            (PatientPicked, vec![InTransit]),
            (InTransit, vec![ArrivedHospital]),
            (ArrivedHospital, vec![Completed]),
            (Completed, vec![]),
            (Cancelled, vec![]),
        ];

        let transitions: HashMap<BookingStatus, HashSet<BookingStatus>> = edges
            .into_iter()
            .map(|(from, targets)| (from, targets.into_iter().collect()))
            .collect();

        Self {
            transitions,
            assignment_sources: [Requested, Confirmed].into_iter().collect(),
        }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: BookingStatus, to: BookingStatus) -> bool {
        self.transitions
            .get(&from)
            .map(|targets| targets.contains(&to))
            .unwrap_or(false)
    }

    /// 执行状态转换校验
    pub fn transition(&self, from: BookingStatus, to: BookingStatus) -> Result<BookingStatus> {
        if self.can_transition(from, to) {
            Ok(to)
        } else {
            Err(illegal(from, to))
        }
    }

    /// 派车例外路径：紧急自动派车可直接从 REQUESTED 进入 DRIVER_ASSIGNED
    pub fn check_assignment(&self, from: BookingStatus) -> Result<()> {
        if from.is_terminal() {
            return Err(DispatchError::AlreadyTerminal(format!(
                "booking is already {}",
                from
            )));
        }
        if self.assignment_sources.contains(&from) {
            Ok(())
        } else {
            Err(illegal(from, BookingStatus::DriverAssigned))
        }
    }

    /// 获取所有可能的状态
    pub fn get_all_states() -> Vec<BookingStatus> {
        BookingStatus::ALL.to_vec()
    }

    /// 获取某状态的全部合法后继
    pub fn get_next_states(&self, current: BookingStatus) -> Vec<BookingStatus> {
        let mut next: Vec<BookingStatus> = self
            .transitions
            .get(&current)
            .map(|targets| targets.iter().copied().collect())
            .unwrap_or_default();
        next.sort();
        next
    }
}

impl Default for BookingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn illegal(from: BookingStatus, to: BookingStatus) -> DispatchError {
    DispatchError::IllegalTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus::*;

    #[test]
    fn test_valid_transitions() {
        let sm = BookingStateMachine::new();

        assert!(sm.can_transition(Requested, Confirmed));
        assert!(sm.can_transition(Confirmed, DriverAssigned));
        assert!(sm.can_transition(DriverArrived, PatientPicked));
        assert!(sm.can_transition(ArrivedHospital, Completed));
        assert!(sm.can_transition(DriverEnroute, Cancelled));
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = BookingStateMachine::new();

        assert!(!sm.can_transition(Requested, Completed));
        assert!(!sm.can_transition(Requested, DriverAssigned));
        assert!(!sm.can_transition(PatientPicked, Cancelled));
        assert!(!sm.can_transition(Completed, Cancelled));
        assert!(!sm.can_transition(Cancelled, Requested));
    }

    #[test]
    fn test_transition_closure() {
        let sm = BookingStateMachine::new();
        let mut legal = 0;

        for from in BookingStateMachine::get_all_states() {
            for to in BookingStateMachine::get_all_states() {
                match sm.transition(from, to) {
                    Ok(next) => {
                        legal += 1;
                        assert_eq!(next, to);
                    }
                    Err(e) => assert_eq!(e.kind(), "illegal_transition"),
                }
            }
        }

        assert_eq!(legal, 13);
    }

    #[test]
    fn test_assignment_exception_path() {
        let sm = BookingStateMachine::new();

        assert!(sm.check_assignment(Requested).is_ok());
        assert!(sm.check_assignment(Confirmed).is_ok());
        assert_eq!(sm.check_assignment(DriverEnroute).unwrap_err().kind(), "illegal_transition");
        assert_eq!(sm.check_assignment(Completed).unwrap_err().kind(), "already_terminal");
        assert_eq!(sm.check_assignment(Cancelled).unwrap_err().kind(), "already_terminal");
    }

    #[test]
    fn test_terminal_states_have_no_successors() {
        let sm = BookingStateMachine::new();
        assert!(sm.get_next_states(Completed).is_empty());
        assert!(sm.get_next_states(Cancelled).is_empty());
        assert_eq!(sm.get_next_states(Requested), vec![Confirmed, Cancelled]);
    }
}
