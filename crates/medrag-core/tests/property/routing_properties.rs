use medrag_core::models::{Role, Strategy as Route};
use medrag_core::router::{classify, PROFESSIONAL_MANAGED_MIN};
use proptest::prelude::*;

fn role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Patient), Just(Role::Professional)]
}

proptest! {
    #[test]
    fn classification_is_pure(query in ".{0,200}", role in role()) {
        prop_assert_eq!(classify(&query, role), classify(&query, role));
    }

    #[test]
    fn confidence_is_bounded(query in ".{0,200}", role in role()) {
        let a = classify(&query, role);
        prop_assert!((0.0..=1.0).contains(&a.confidence));
        prop_assert!(!a.reasoning.is_empty());
    }

    #[test]
    fn professionals_never_get_weak_managed(query in "[a-z ]{0,120}") {
        let a = classify(&query, Role::Professional);
        prop_assert!(
            a.strategy != Route::Managed || a.confidence >= PROFESSIONAL_MANAGED_MIN,
            "{:?}", a
        );
    }

    #[test]
    fn role_only_changes_strategy(query in "[a-z ]{0,120}") {
        let patient = classify(&query, Role::Patient);
        let pro = classify(&query, Role::Professional);
        prop_assert_eq!(patient.confidence, pro.confidence);
        if patient.strategy != pro.strategy {
            prop_assert_eq!(patient.strategy, Route::Managed);
            prop_assert_eq!(pro.strategy, Route::Hybrid);
        }
    }

    #[test]
    fn case_does_not_matter(query in "[a-zA-Z ]{0,120}") {
        prop_assert_eq!(
            classify(&query, Role::Patient),
            classify(&query.to_uppercase(), Role::Patient)
        );
    }
}
