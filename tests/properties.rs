//! Property tests for the rollback flag and resolution outcome.

use std::sync::Arc;

use proptest::prelude::*;
use txscope::backend::MemoryBackend;
use txscope::{Database, RequestContext, TransactionState};

#[derive(Debug, Clone, Copy)]
enum Step {
    Flag,
    RegisterCommit,
    RegisterRollback,
    RegisterNone,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Flag),
        Just(Step::RegisterCommit),
        Just(Step::RegisterRollback),
        Just(Step::RegisterNone),
    ]
}

proptest! {
    #[test]
    fn prop_flag_is_monotonic(steps in proptest::collection::vec(step(), 0..40)) {
        let backend = MemoryBackend::new("prop", 1);
        let db = Database::with_backend(Arc::new(backend.clone()));
        let ctx = db.new_context(&RequestContext::background()).unwrap();

        let mut flagged = false;
        for step in &steps {
            match step {
                Step::Flag => {
                    ctx.mark_for_rollback();
                    flagged = true;
                }
                Step::RegisterCommit => ctx.on_commit(|| {}).unwrap(),
                Step::RegisterRollback => ctx.on_rollback(|| {}).unwrap(),
                Step::RegisterNone => ctx.add_post_commit_callback(None).unwrap(),
            }
            // Once set, the flag never clears.
            prop_assert_eq!(ctx.is_marked_for_rollback(), flagged);
        }

        db.resolve(&ctx).unwrap();

        let stats = backend.stats();
        prop_assert_eq!(stats.committed + stats.rolled_back, 1);
        if flagged {
            prop_assert_eq!(ctx.state(), Some(TransactionState::RolledBack));
            prop_assert_eq!(stats.rolled_back, 1);
        } else {
            prop_assert_eq!(ctx.state(), Some(TransactionState::Committed));
            prop_assert_eq!(stats.committed, 1);
        }
        prop_assert!(db.resolve(&ctx).is_err());
        prop_assert_eq!(backend.stats(), stats);
    }

    #[test]
    fn prop_unknown_schemes_rejected(scheme in "[a-z]{1,8}") {
        prop_assume!(scheme != "memory" && scheme != "git");
        let db = Database::new();
        let connection = format!("{}://somewhere", scheme);
        prop_assert!(db.initialize(&connection).is_err());
        prop_assert!(!db.is_initialized());
    }
}
