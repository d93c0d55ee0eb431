use helios::error::HeliosError;

#[test]
fn error_constructors() {
    assert!(matches!(
        HeliosError::config("x"),
        HeliosError::Config { .. }
    ));
    assert!(matches!(HeliosError::io("x"), HeliosError::Io { .. }));
    assert!(matches!(
        HeliosError::out_of_range("x"),
        HeliosError::OutOfRange { .. }
    ));
    assert!(matches!(
        HeliosError::not_found("x"),
        HeliosError::NotFound { .. }
    ));
    assert!(matches!(
        HeliosError::not_ready("x"),
        HeliosError::NotReady { .. }
    ));
    assert!(matches!(
        HeliosError::transient("x"),
        HeliosError::Transient { .. }
    ));
    assert!(matches!(
        HeliosError::timeout("x"),
        HeliosError::Timeout { .. }
    ));
    assert!(matches!(HeliosError::fatal("x"), HeliosError::Fatal { .. }));
}

#[test]
fn std_conversions() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: HeliosError = io_err.into();
    assert!(matches!(err, HeliosError::Io { .. }));

    let yaml_err = serde_yaml::from_str::<helios::config::Config>("{ unterminated").unwrap_err();
    let err: HeliosError = yaml_err.into();
    assert!(matches!(err, HeliosError::Serialization { .. }));

    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: HeliosError = json_err.into();
    assert!(matches!(err, HeliosError::Serialization { .. }));
}

#[test]
fn retryable_is_limited_to_transient_conditions() {
    assert!(HeliosError::transient("busy").is_retryable());
    assert!(HeliosError::not_ready("still starting").is_retryable());

    assert!(!HeliosError::config("x").is_retryable());
    assert!(!HeliosError::validation("f", "m").is_retryable());
    assert!(!HeliosError::out_of_range("x").is_retryable());
    assert!(!HeliosError::not_found("x").is_retryable());
    assert!(!HeliosError::timeout("x").is_retryable());
    assert!(!HeliosError::fatal("x").is_retryable());
}
