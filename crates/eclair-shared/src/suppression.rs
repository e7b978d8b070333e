//! Notification suppression policy.
//!
//! Decides whether a notification about a message from `sender_id` should be
//! dropped because the user already sees it in-app. Both the push path and
//! the in-app banner path call the same function so they never disagree.
//!
//! Rules are checked in order and the first match wins:
//!
//! 1. sender is blocked
//! 2. the user is looking at the conversation with that sender
//! 3. the home screen list is visible while the app is active
//! 4. otherwise the notification is allowed

use std::collections::HashSet;

use crate::types::AppState;

/// Why a notification was suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionReason {
    Blocked,
    ViewingChat,
    HomeScreenVisible,
}

/// Snapshot of everything the policy looks at.
#[derive(Debug, Clone, Copy)]
pub struct SuppressionInput<'a> {
    pub sender_id: &'a str,
    pub app_state: AppState,
    pub viewing_chat_with: Option<&'a str>,
    pub home_screen_visible: bool,
    pub blocked: &'a HashSet<String>,
}

impl SuppressionInput<'_> {
    /// Evaluate the rules, returning the first one that matches.
    pub fn evaluate(&self) -> Option<SuppressionReason> {
        if self.blocked.contains(self.sender_id) {
            return Some(SuppressionReason::Blocked);
        }
        if self.viewing_chat_with == Some(self.sender_id) {
            return Some(SuppressionReason::ViewingChat);
        }
        if self.home_screen_visible && self.app_state.is_foreground() {
            return Some(SuppressionReason::HomeScreenVisible);
        }
        None
    }
}

/// `true` when the notification must be dropped.
pub fn should_suppress(
    sender_id: &str,
    app_state: AppState,
    viewing_chat_with: Option<&str>,
    home_screen_visible: bool,
    blocked: &HashSet<String>,
) -> bool {
    SuppressionInput {
        sender_id,
        app_state,
        viewing_chat_with,
        home_screen_visible,
        blocked,
    }
    .evaluate()
    .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_viewing_same_chat_suppresses() {
        assert!(should_suppress(
            "x",
            AppState::Active,
            Some("x"),
            false,
            &HashSet::new()
        ));
    }

    #[test]
    fn test_blocked_wins_regardless_of_flags() {
        let set = blocked(&["x"]);
        for state in [AppState::Active, AppState::Inactive, AppState::Background] {
            for home in [true, false] {
                for viewing in [None, Some("y"), Some("x")] {
                    let input = SuppressionInput {
                        sender_id: "x",
                        app_state: state,
                        viewing_chat_with: viewing,
                        home_screen_visible: home,
                        blocked: &set,
                    };
                    assert_eq!(input.evaluate(), Some(SuppressionReason::Blocked));
                }
            }
        }
    }

    #[test]
    fn test_other_chat_in_background_allows() {
        assert!(!should_suppress(
            "x",
            AppState::Background,
            Some("y"),
            false,
            &HashSet::new()
        ));
    }

    #[test]
    fn test_home_screen_only_suppresses_when_active() {
        let none = HashSet::new();
        assert!(should_suppress("x", AppState::Active, None, true, &none));
        assert!(!should_suppress("x", AppState::Background, None, true, &none));
        assert!(!should_suppress("x", AppState::Inactive, None, true, &none));
    }

    #[test]
    fn test_viewing_chat_checked_before_home_screen() {
        let none = HashSet::new();
        let input = SuppressionInput {
            sender_id: "x",
            app_state: AppState::Active,
            viewing_chat_with: Some("x"),
            home_screen_visible: true,
            blocked: &none,
        };
        assert_eq!(input.evaluate(), Some(SuppressionReason::ViewingChat));
    }
}
