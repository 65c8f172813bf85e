use std::collections::BTreeMap;
use std::sync::Arc;

use keel_core::{AuthError, InMemoryStorage, Secret, StorageUtility};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
}

proptest! {
    #[test]
    fn set_for_user_keeps_untouched_fields(
        first in proptest::collection::btree_map("[a-zA-Z]{1,12}", "[ -~]{0,24}", 1..8),
        second in proptest::collection::btree_map("[a-zA-Z]{1,12}", "[ -~]{0,24}", 1..8),
    ) {
        let utility = StorageUtility::new(Arc::new(InMemoryStorage::new()));
        let record = runtime().block_on(async {
            let first_fields: Vec<(&str, &str)> =
                first.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            utility.set_for_user("session", &first_fields).await.expect("first");
            let second_fields: Vec<(&str, &str)> =
                second.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            utility.set_for_user("session", &second_fields).await.expect("second");
            utility.get_for_user("session").await.expect("get").expect("record")
        });

        let mut expected: BTreeMap<String, String> = first.clone();
        expected.extend(second.clone());
        prop_assert_eq!(record, expected);
    }

    #[test]
    fn secrets_never_render(value in "tok-[ -~]{1,60}") {
        let secret = Secret::new(value.clone());
        let rendered = format!("{secret:?} {secret}");
        prop_assert!(!rendered.contains(&value));
        prop_assert_eq!(secret.expose(), value.as_str());
    }

    #[test]
    fn precondition_errors_only_name_the_session(session_id in "[a-z0-9-]{1,16}") {
        let errors = [
            AuthError::MissingRefreshToken { session_id: session_id.clone() },
            AuthError::MissingDpopKey { session_id: session_id.clone() },
            AuthError::SessionNotFound { session_id: session_id.clone() },
        ];
        let expected = format!("[{session_id}]");
        for err in errors {
            prop_assert!(err.to_string().contains(&expected));
            prop_assert_eq!(err.session_id(), Some(session_id.as_str()));
        }
    }
}
