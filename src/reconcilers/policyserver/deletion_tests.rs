// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `deletion.rs`

#[cfg(test)]
mod tests {
    use crate::reconcilers::policyserver::deletion::DeletionProgress;

    #[test]
    fn test_policies_are_waited_for_first() {
        assert_eq!(
            DeletionProgress::from_remaining(2, 5, 3),
            DeletionProgress::WaitingForPolicies(2)
        );
    }

    #[test]
    fn test_resources_before_pods() {
        assert_eq!(
            DeletionProgress::from_remaining(0, 1, 3),
            DeletionProgress::WaitingForResources(1)
        );
        assert_eq!(
            DeletionProgress::from_remaining(0, 0, 3),
            DeletionProgress::WaitingForPods(3)
        );
    }

    #[test]
    fn test_complete_only_when_everything_is_gone() {
        assert_eq!(DeletionProgress::from_remaining(0, 0, 0), DeletionProgress::Complete);
    }
}
