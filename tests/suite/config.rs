//! Config file loading and validation.

use std::fs;

use gatekeep_config::{ConfigError, ConfigWarning, GatekeepConfig};
use gatekeep_core::{GuardOptions, RouteClassifier, StaticRouteTable};
use gatekeep_types::AuthAssumption;

use crate::common::path;

const CONFIG: &str = r#"
[guard]
login_path = "/signin"
post_auth_path = "/home"
assume_if_undefined = "public"
transform_timeout_ms = 2500

[[routes]]
path = "/home"
requires_auth = true

[[routes]]
path = "/pricing"
requires_auth = false

[[routes]]
path = "/home"
requires_auth = false
"#;

#[test]
fn loads_config_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("config.toml");
    fs::write(&file, CONFIG).unwrap();

    let config = GatekeepConfig::load_from(&file).unwrap();
    assert_eq!(config.guard.login_path, path("/signin"));
    assert_eq!(config.guard.assume_if_undefined, AuthAssumption::Public);
    assert_eq!(config.routes.len(), 3);
    assert_eq!(
        config.validate(),
        vec![ConfigWarning::DuplicateRoute {
            path: "/home".to_string()
        }]
    );
}

#[test]
fn read_and_parse_errors_carry_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    let err = GatekeepConfig::load_from(&missing).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
    assert_eq!(err.path(), &missing);

    let broken = dir.path().join("broken.toml");
    fs::write(&broken, "[guard]\nlogin_path = 3\n").unwrap();
    let err = GatekeepConfig::load_from(&broken).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert_eq!(err.path(), &broken);
}

#[test]
fn config_drives_guard_options_and_routes() {
    let config = GatekeepConfig::parse(CONFIG).unwrap();
    let options = GuardOptions::<String>::from_config(&config.guard);
    assert!(options.warnings().is_empty());
    assert_eq!(options.public_landing, path("/login"));

    let classifier = RouteClassifier::new(
        StaticRouteTable::from_entries(&config.routes),
        options.login_path.clone(),
        options.assume_if_undefined,
    );
    assert!(classifier.requires_auth(&path("/home")));
    assert!(classifier.is_public(&path("/pricing")));
    assert!(classifier.is_public(&path("/blog")));
    assert!(classifier.is_login_page(&path("/signin?next=/home")));
}
