use relayq::config::Config;

/// One test body: the three scenarios share process-wide env vars, so
/// they must run sequentially.
#[test]
fn config_from_env() {
    // Defaults when nothing is set.
    unsafe {
        std::env::remove_var("RELAYQ_HISTORY_LIMIT");
        std::env::remove_var("RELAYQ_PERSIST");
        std::env::remove_var("RELAYQ_HISTORY_PATH");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.history_limit, 100);
    assert!(config.persist);
    assert!(!config.log_level.is_empty());

    // Overrides are read and flow into the engine config.
    unsafe {
        std::env::set_var("RELAYQ_HISTORY_LIMIT", "25");
        std::env::set_var("RELAYQ_PERSIST", "false");
        std::env::set_var("RELAYQ_HISTORY_PATH", "/tmp/q.json");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.history_limit, 25);
    assert!(!config.persist);
    assert_eq!(config.history_path.to_str(), Some("/tmp/q.json"));
    let engine = config.engine_config();
    assert_eq!(engine.history_limit, 25);
    assert!(!engine.persist);

    // A set-but-unparsable value fails fast.
    unsafe {
        std::env::set_var("RELAYQ_HISTORY_LIMIT", "many");
    }
    assert!(Config::from_env().is_err());

    // Clean up
    unsafe {
        std::env::remove_var("RELAYQ_HISTORY_LIMIT");
        std::env::remove_var("RELAYQ_PERSIST");
        std::env::remove_var("RELAYQ_HISTORY_PATH");
    }
}
