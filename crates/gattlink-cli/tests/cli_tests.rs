//! Command dispatch against a temporary cache

use clap::Parser;
use gattlink_cli::{Cli, CliConfig, CliError, CommandDispatcher, Commands};
use gattlink_core::AddressCache;

fn dispatcher(dir: &std::path::Path) -> CommandDispatcher {
    let config = CliConfig::default().with_overrides(dir.to_str(), None);
    CommandDispatcher::new(config, None)
}

#[tokio::test]
async fn test_remember_and_forget_round_through_cache() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(dir.path());

    dispatcher
        .execute(Commands::Remember {
            address: "e8-c9-8f-52-7b-07".to_string(),
            identifier: "hci0/dev_E8_C9_8F_52_7B_07".to_string(),
        })
        .await
        .unwrap();

    let cache = AddressCache::open(dir.path().join("known_devices.json")).unwrap();
    let record = cache.lookup("E8:C9:8F:52:7B:07").unwrap().unwrap();
    assert_eq!(record.platform_identifier, "hci0/dev_E8_C9_8F_52_7B_07");

    dispatcher
        .execute(Commands::Devices { json: true })
        .await
        .unwrap();

    dispatcher
        .execute(Commands::Forget {
            address: "E8:C9:8F:52:7B:07".to_string(),
        })
        .await
        .unwrap();
    let cache = AddressCache::open(dir.path().join("known_devices.json")).unwrap();
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_invalid_address_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let result = dispatcher(dir.path())
        .execute(Commands::Remember {
            address: "not-an-address".to_string(),
            identifier: "x".to_string(),
        })
        .await;

    assert!(matches!(result, Err(CliError::Gatt(_))));
}

#[tokio::test]
async fn test_radio_commands_need_an_adapter() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(dir.path());
    dispatcher
        .execute(Commands::Remember {
            address: "E8:C9:8F:52:7B:07".to_string(),
            identifier: "dev-1".to_string(),
        })
        .await
        .unwrap();

    let result = dispatcher
        .execute(Commands::Read {
            address: "E8:C9:8F:52:7B:07".to_string(),
            characteristic: "2a19".to_string(),
        })
        .await;

    assert!(matches!(result, Err(CliError::Config(_))));
}

#[test]
fn test_argument_parsing() {
    let cli = Cli::parse_from([
        "gattlink",
        "--cache-dir",
        "/tmp/devices",
        "write",
        "E8:C9:8F:52:7B:07",
        "2a19",
        "0102",
        "--no-response",
    ]);

    assert_eq!(cli.cache_dir.as_deref(), Some("/tmp/devices"));
    assert!(cli.command.needs_adapter());
    match cli.command {
        Commands::Write {
            value, no_response, ..
        } => {
            assert_eq!(value, "0102");
            assert!(no_response);
        }
        _ => panic!("expected write command"),
    }

    let cli = Cli::parse_from(["gattlink", "devices"]);
    assert!(!cli.command.needs_adapter());
}
