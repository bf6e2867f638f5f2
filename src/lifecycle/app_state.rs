//! # App foreground/background status and the transitions derived from it.

use crate::module::Hook;

/// Host-reported application status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppStatus {
    #[default]
    Active,
    Inactive,
    Background,
}

impl AppStatus {
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, AppStatus::Active)
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            AppStatus::Active => "active",
            AppStatus::Inactive => "inactive",
            AppStatus::Background => "background",
        }
    }
}

/// Hook to run for a status change, if any.
///
/// Only crossings between `Active` and the other two statuses count;
/// `Inactive <-> Background` is not a transition.
pub(crate) fn transition(prev: AppStatus, next: AppStatus) -> Option<Hook> {
    match (prev.is_active(), next.is_active()) {
        (false, true) => Some(Hook::AppActive),
        (true, false) => Some(Hook::AppInactive),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_crossings_trigger_hooks() {
        use AppStatus::*;
        assert_eq!(transition(Background, Active), Some(Hook::AppActive));
        assert_eq!(transition(Inactive, Active), Some(Hook::AppActive));
        assert_eq!(transition(Active, Inactive), Some(Hook::AppInactive));
        assert_eq!(transition(Active, Background), Some(Hook::AppInactive));
        assert_eq!(transition(Inactive, Background), None);
        assert_eq!(transition(Active, Active), None);
    }
}
