use tidemark_resilience::ErrorClass;

#[test]
fn transient_statuses() {
    for status in [408, 429, 500, 502, 503, 504] {
        assert_eq!(ErrorClass::from_status(status), ErrorClass::Transient, "{status}");
    }
}

#[test]
fn conflict_and_auth_statuses() {
    assert_eq!(ErrorClass::from_status(409), ErrorClass::Conflict);
    assert_eq!(ErrorClass::from_status(401), ErrorClass::Auth);
    assert_eq!(ErrorClass::from_status(403), ErrorClass::Auth);
}

#[test]
fn other_statuses_are_permanent() {
    for status in [400, 404, 410, 422, 501] {
        assert_eq!(ErrorClass::from_status(status), ErrorClass::Permanent, "{status}");
    }
}

#[test]
fn transient_messages() {
    for msg in [
        "operation timed out",
        "Connection reset by peer",
        "connection refused (os error 111)",
        "Network is unreachable",
        "Rate limit exceeded",
        "request Timeout",
    ] {
        assert_eq!(ErrorClass::from_message(msg), ErrorClass::Transient, "{msg}");
    }
}

#[test]
fn other_messages_are_permanent() {
    assert_eq!(ErrorClass::from_message("invalid title"), ErrorClass::Permanent);
    assert_eq!(ErrorClass::from_message(""), ErrorClass::Permanent);
}

#[test]
fn display_names() {
    assert_eq!(ErrorClass::Transient.to_string(), "transient");
    assert_eq!(ErrorClass::Auth.to_string(), "auth");
}
