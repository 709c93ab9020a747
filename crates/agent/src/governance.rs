//! Per-turn tool call governance.
//!
//! Each tool name gets a per-turn invocation counter capped by its access
//! class. Counters live for exactly one orchestrator run; an over-cap call
//! is rejected (never executed) but the turn continues.

use std::collections::HashMap;

use overture_config::ToolCapsConfig;
use overture_core::tool::AccessClass;

/// Admission decision for one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call may execute; its counter has been charged.
    Allowed,

    /// The per-turn cap for this tool name is exhausted.
    OverCap { cap: u32 },
}

/// Per-turn call counters, keyed by tool name.
pub struct ToolGovernor {
    caps: ToolCapsConfig,
    counts: HashMap<String, u32>,
}

impl ToolGovernor {
    pub fn new(caps: ToolCapsConfig) -> Self {
        Self {
            caps,
            counts: HashMap::new(),
        }
    }

    /// Charge one invocation of `name` against its class cap.
    pub fn admit(&mut self, name: &str, class: AccessClass) -> Admission {
        let cap = self.caps.cap_for(class);
        let count = self.counts.entry(name.to_string()).or_insert(0);
        if *count >= cap {
            return Admission::OverCap { cap };
        }
        *count += 1;
        Admission::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> ToolGovernor {
        ToolGovernor::new(ToolCapsConfig::default())
    }

    #[test]
    fn delete_tool_allows_exactly_five() {
        let mut gov = governor();
        let mut allowed = 0;
        let mut rejected = 0;
        for _ in 0..10 {
            match gov.admit("purge_account", AccessClass::Delete) {
                Admission::Allowed => allowed += 1,
                Admission::OverCap { cap } => {
                    assert_eq!(cap, 5);
                    rejected += 1;
                }
            }
        }
        assert_eq!(allowed, 5);
        assert_eq!(rejected, 5);
    }

    #[test]
    fn update_tool_under_cap_all_pass() {
        let mut gov = governor();
        for _ in 0..8 {
            assert_eq!(
                gov.admit("update_record", AccessClass::Update),
                Admission::Allowed
            );
        }
    }

    #[test]
    fn read_tool_under_cap_all_pass() {
        let mut gov = governor();
        for _ in 0..8 {
            assert_eq!(
                gov.admit("list_applications", AccessClass::Read),
                Admission::Allowed
            );
        }
    }

    #[test]
    fn counters_are_per_tool_name() {
        let mut gov = governor();
        for _ in 0..5 {
            assert_eq!(
                gov.admit("delete_one", AccessClass::Delete),
                Admission::Allowed
            );
        }
        assert!(matches!(
            gov.admit("delete_one", AccessClass::Delete),
            Admission::OverCap { .. }
        ));
        // A different name with the same class has its own counter.
        assert_eq!(
            gov.admit("delete_other", AccessClass::Delete),
            Admission::Allowed
        );
    }

    #[test]
    fn custom_caps_are_honored() {
        let caps = ToolCapsConfig {
            read: 2,
            ..ToolCapsConfig::default()
        };
        let mut gov = ToolGovernor::new(caps);
        assert_eq!(gov.admit("peek", AccessClass::Read), Admission::Allowed);
        assert_eq!(gov.admit("peek", AccessClass::Read), Admission::Allowed);
        assert!(matches!(
            gov.admit("peek", AccessClass::Read),
            Admission::OverCap { cap: 2 }
        ));
    }
}
