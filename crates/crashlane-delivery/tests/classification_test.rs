//! Property-based tests for outcome classification.
//!
//! The classifier must send every status and error kind to exactly one
//! class, and the class must agree with how the error itself reports
//! retryability.

use std::{collections::HashMap, time::Duration};

use crashlane_delivery::{
    outcome::{classify, classify_error, classify_status, Classification},
    DeliveryError, UploadResponse,
};
use proptest::prelude::*;

fn response(status_code: u16) -> UploadResponse {
    UploadResponse {
        status_code,
        headers: HashMap::new(),
        body: String::new(),
        duration: Duration::from_millis(10),
    }
}

/// Strategy for transport and pre-network errors.
fn error_strategy() -> impl Strategy<Value = DeliveryError> {
    prop_oneof![
        "[a-z ]{0,20}".prop_map(DeliveryError::network),
        (1u64..120).prop_map(DeliveryError::timeout),
        "[a-z ]{0,20}".prop_map(DeliveryError::serialization),
        "[a-z ]{0,20}".prop_map(DeliveryError::configuration),
        (400u16..500).prop_map(|status| DeliveryError::client_error(status, "rejected")),
        (500u16..600).prop_map(|status| DeliveryError::server_error(status, "unavailable")),
        proptest::option::of(0u64..3600).prop_map(DeliveryError::rate_limited),
    ]
}

proptest! {
    #[test]
    fn success_range_is_delivered(status in 200u16..300) {
        prop_assert_eq!(classify_status(status), Classification::Delivered);
    }

    #[test]
    fn server_range_is_retryable(status in 500u16..600) {
        prop_assert_eq!(classify_status(status), Classification::Retryable);
    }

    #[test]
    fn client_range_is_permanent_except_timeout_and_throttle(status in 400u16..500) {
        let expected = if status == 408 || status == 429 {
            Classification::Retryable
        } else {
            Classification::Permanent
        };
        prop_assert_eq!(classify_status(status), expected);
    }

    #[test]
    fn response_errors_agree_with_status(status in 100u16..600) {
        prop_assume!(!(200..300).contains(&status));
        let error = DeliveryError::from_response(&response(status));

        prop_assert_eq!(classify_status(status), classify_error(&error));
        prop_assert_eq!(error.is_retryable(), classify_status(status).is_retryable());
    }

    #[test]
    fn result_classification_matches_parts(status in 100u16..600, error in error_strategy()) {
        prop_assert_eq!(classify(&Ok(response(status))), classify_status(status));
        prop_assert_eq!(classify(&Err(error.clone())), classify_error(&error));
    }

    #[test]
    fn errors_are_never_delivered(error in error_strategy()) {
        prop_assert_ne!(classify_error(&error), Classification::Delivered);
        prop_assert_eq!(error.is_retryable(), classify_error(&error).is_retryable());
    }
}
