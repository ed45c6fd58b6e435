//! Property tests for ordering and state-machine legality

mod common;

use proptest::prelude::*;

use agentmesh::router::{PriorityQueues, SelectionPolicy, selection};
use agentmesh::types::message::MessagePriority;
use agentmesh::types::task::TaskState;

use common::{capability_name, online_agent};

fn priority_strategy() -> impl Strategy<Value = MessagePriority> {
    prop::sample::select(vec![
        MessagePriority::Urgent,
        MessagePriority::High,
        MessagePriority::Normal,
        MessagePriority::Low,
    ])
}

fn state_strategy() -> impl Strategy<Value = TaskState> {
    prop::sample::select(vec![
        TaskState::Submitted,
        TaskState::InProgress,
        TaskState::Working,
        TaskState::InputRequired,
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Cancelled,
        TaskState::Rejected,
        TaskState::AuthRequired,
        TaskState::Unknown,
    ])
}

proptest! {
    /// Dequeue order is priority-first and FIFO within each priority
    #[test]
    fn dequeue_is_priority_first_and_stable(
        entries in prop::collection::vec(priority_strategy(), 0..200)
    ) {
        let queues = PriorityQueues::new(1000);
        for (index, priority) in entries.iter().enumerate() {
            queues.push(*priority, (*priority, index)).unwrap();
        }

        let mut drained = Vec::new();
        while let Some((_, entry)) = queues.pop_highest() {
            drained.push(entry);
        }

        prop_assert_eq!(drained.len(), entries.len());
        for window in drained.windows(2) {
            let (p1, i1) = window[0];
            let (p2, i2) = window[1];
            // Higher priority always first; equal priorities keep arrival order
            prop_assert!(p1 <= p2, "priority inversion: {:?} before {:?}", p1, p2);
            if p1 == p2 {
                prop_assert!(i1 < i2, "FIFO violated within {:?}", p1);
            }
        }
    }

    /// Nothing ever leaves a terminal state
    #[test]
    fn terminal_states_are_absorbing(from in state_strategy(), to in state_strategy()) {
        if from.is_terminal() {
            prop_assert!(!from.can_transition_to(to));
        }
    }

    /// Every legal transition target differs from a terminal source
    #[test]
    fn transitions_never_resurrect(from in state_strategy(), to in state_strategy()) {
        if from.can_transition_to(to) {
            prop_assert!(!from.is_terminal());
        }
    }

    /// The best-match score stays within the weighted bounds
    #[test]
    fn best_match_score_is_bounded(
        reliability in 0.0f64..=1.0,
        load in 0u8..=100,
    ) {
        let profile = online_agent("agent-1", "compute", reliability, load);
        let score = selection::best_match_score(&profile, &capability_name("compute"));
        prop_assert!(score >= 0.0);
        prop_assert!(score <= 1.0);
    }

    /// Selection is deterministic for a fixed candidate set
    #[test]
    fn selection_is_deterministic(
        loads in prop::collection::vec(0u8..=100, 1..10)
    ) {
        let candidates: Vec<_> = loads
            .iter()
            .enumerate()
            .map(|(i, load)| online_agent(&format!("agent-{i}"), "compute", 0.9, *load))
            .collect();
        for policy in [
            SelectionPolicy::BestMatch,
            SelectionPolicy::RoundRobin,
            SelectionPolicy::LeastLoaded,
        ] {
            let first = selection::select(policy, &capability_name("compute"), &candidates)
                .map(|p| p.agent_id.clone());
            let second = selection::select(policy, &capability_name("compute"), &candidates)
                .map(|p| p.agent_id.clone());
            prop_assert_eq!(first, second);
        }
    }
}
