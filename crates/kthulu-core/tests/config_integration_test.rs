use kthulu_core::{KthuluConfig, KthuluError, CONFIG_FILE_NAME};
use std::fs;
use tempfile::TempDir;

// Environment variables are process-wide, so every env-dependent check lives
// in this one test.
#[test]
fn layers_apply_in_order() {
    let project = TempDir::new().unwrap();
    let cfg = KthuluConfig::load(None, Some(project.path())).unwrap();
    assert_eq!(cfg, KthuluConfig::default());

    fs::write(
        project.path().join(CONFIG_FILE_NAME),
        "[analyzer]\nmax_file_size = 4096\nworkers = 2\n\n[authz]\naudit_enabled = false\n",
    )
    .unwrap();

    let explicit_dir = TempDir::new().unwrap();
    let explicit = explicit_dir.path().join("override.toml");
    fs::write(&explicit, "[analyzer]\nworkers = 3\nextension = \"gox\"\n").unwrap();

    std::env::set_var("KTHULU__ANALYZER__WORKERS", "8");
    std::env::set_var("KTHULU__AUTHZ__STRICT_MODE", "true");
    let loaded = KthuluConfig::load(Some(&explicit), Some(project.path()));
    std::env::remove_var("KTHULU__ANALYZER__WORKERS");
    std::env::remove_var("KTHULU__AUTHZ__STRICT_MODE");

    let cfg = loaded.unwrap();
    assert_eq!(cfg.analyzer.max_file_size, 4096);
    assert_eq!(cfg.analyzer.extension, "gox");
    assert_eq!(cfg.analyzer.workers, 8);
    assert!(!cfg.authz.audit_enabled);
    assert!(cfg.authz.strict_mode);
    assert!(cfg.authz.default_deny);
}

#[test]
fn invalid_file_values_fail_validation() {
    let project = TempDir::new().unwrap();
    fs::write(
        project.path().join(CONFIG_FILE_NAME),
        "[analyzer]\nextension = \"\"\n",
    )
    .unwrap();
    let err = KthuluConfig::load(None, Some(project.path())).unwrap_err();
    assert!(matches!(err, KthuluError::InvalidInput(_)));
}
