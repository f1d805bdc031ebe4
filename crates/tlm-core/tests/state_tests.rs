use proptest::prelude::*;
use tlm_core::{allowed_transitions, validate_transition, LifecycleState, SubscriptionError};
use tlm_stream::SecurityTier;

fn any_state() -> impl Strategy<Value = LifecycleState> {
    prop_oneof![
        Just(LifecycleState::Idle),
        Just(LifecycleState::Preparing),
        Just(LifecycleState::Subscribing(SecurityTier::Strong)),
        Just(LifecycleState::Subscribing(SecurityTier::Unencrypted)),
        Just(LifecycleState::Active),
        Just(LifecycleState::TearingDown),
        Just(LifecycleState::Closed),
    ]
}

#[test]
fn test_preparing_transitions() {
    assert!(validate_transition(LifecycleState::Preparing, LifecycleState::Subscribing(SecurityTier::Strong)).is_ok());
    assert!(validate_transition(LifecycleState::Preparing, LifecycleState::Closed).is_ok());

    // Invalid
    assert!(validate_transition(LifecycleState::Preparing, LifecycleState::Active).is_err());
    assert!(validate_transition(LifecycleState::Preparing, LifecycleState::Idle).is_err());
}

#[test]
fn test_streaming_states_only_leave_through_teardown() {
    for state in [
        LifecycleState::Subscribing(SecurityTier::Strong),
        LifecycleState::Subscribing(SecurityTier::Unencrypted),
        LifecycleState::Active,
    ] {
        assert!(validate_transition(state, LifecycleState::TearingDown).is_ok());
        assert!(validate_transition(state, LifecycleState::Closed).is_err());
    }
}

#[test]
fn test_invalid_transition_names_states() {
    let err = validate_transition(LifecycleState::Closed, LifecycleState::Active).unwrap_err();
    assert_eq!(
        err,
        SubscriptionError::InvalidTransition {
            from: LifecycleState::Closed,
            to: LifecycleState::Active
        }
    );
    assert_eq!(err.to_string(), "invalid lifecycle transition closed -> active");
}

proptest! {
    #[test]
    fn prop_all_transitions_are_subset_of_allowed(from in any_state(), to in any_state()) {
        let res = validate_transition(from, to);
        let allowed = allowed_transitions(from);

        if res.is_ok() {
            prop_assert!(allowed.contains(&to));
        } else {
            prop_assert!(!allowed.contains(&to));
        }
    }

    #[test]
    fn prop_closed_reachable_from_every_state(from in any_state()) {
        // Breadth-first over the table
        let mut seen = vec![from];
        let mut frontier = vec![from];
        while let Some(state) = frontier.pop() {
            for next in allowed_transitions(state) {
                if !seen.contains(&next) {
                    seen.push(next);
                    frontier.push(next);
                }
            }
        }
        prop_assert!(seen.contains(&LifecycleState::Closed));
    }

    #[test]
    fn prop_tier_never_rises(from in any_state(), to in any_state()) {
        if let (LifecycleState::Subscribing(a), LifecycleState::Subscribing(b)) = (from, to) {
            if validate_transition(from, to).is_ok() {
                prop_assert!(b > a);
            }
        }
    }
}
