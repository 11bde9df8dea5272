//! Policy file loading from disk

use std::io::Write;

use vhostlog::error::PolicyError;
use vhostlog::policy::{Disposition, Policy};

fn policy_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_policy_file() {
    let file = policy_file(
        r#"[
            { "name": "10net", "net": "10.0.0.0/8", "track": "hosts,uri" },
            { "virtual": "www.bu.edu", "status": "summarize" },
            { "site": "htbin", "status": "track" }
        ]"#,
    );

    let policy = Policy::from_file(file.path()).unwrap();

    assert_eq!(policy.networks().len(), 1);
    assert_eq!(policy.resolve_virtual_host("www.bu.edu"), Disposition::Summarize);
    assert_eq!(policy.resolve_site("htbin"), Disposition::Track);
}

#[test]
fn test_missing_policy_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Policy::from_file(dir.path().join("ipnets.json")).unwrap_err();
    assert!(matches!(err, PolicyError::Io { .. }));
}

#[test]
fn test_policy_file_with_bad_cidr() {
    let file = policy_file(r#"[{ "name": "oops", "net": "10.0.0.0/40", "track": "uri" }]"#);
    let err = Policy::from_file(file.path()).unwrap_err();

    assert!(matches!(err, PolicyError::InvalidNetwork { .. }));
    assert!(err.to_string().contains("oops"));
}

#[test]
fn test_policy_file_not_json() {
    let file = policy_file("name,net\n10net,10.0.0.0/8\n");
    let err = Policy::from_file(file.path()).unwrap_err();
    assert!(matches!(err, PolicyError::Json(_)));
}
