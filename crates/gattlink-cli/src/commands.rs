//! Command handlers for the gattlink CLI

use std::sync::Arc;
use std::time::Duration;

use gattlink_core::{
    AddressCache, BlePlatform, Characteristic, Connection, GattConfig, ScanMode, ScanResult,
    ScanSession,
};
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::cli::Commands;
use crate::config::CliConfig;
use crate::error::{CliError, Result};

/// Cached device as printed by `devices --json`
#[derive(Debug, Serialize)]
struct DeviceEntry<'a> {
    address: &'a str,
    identifier: &'a str,
}

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher {
    config: CliConfig,
    platform: Option<Arc<dyn BlePlatform>>,
}

impl CommandDispatcher {
    /// `platform` may be `None` for commands that only touch the cache
    pub fn new(config: CliConfig, platform: Option<Arc<dyn BlePlatform>>) -> Self {
        Self { config, platform }
    }

    /// Execute a CLI command
    pub async fn execute(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Scan {
                duration,
                service,
                remember,
                passive,
            } => {
                let duration = duration.unwrap_or(self.config.scan_duration_secs);
                self.handle_scan(duration, service, remember, passive).await
            }
            Commands::Devices { json } => self.handle_devices(json),
            Commands::Remember {
                address,
                identifier,
            } => self.handle_remember(&address, &identifier),
            Commands::Forget { address } => self.handle_forget(&address),
            Commands::Services { address, uuids } => self.handle_services(&address, &uuids).await,
            Commands::Read {
                address,
                characteristic,
            } => self.handle_read(&address, &characteristic).await,
            Commands::Write {
                address,
                characteristic,
                value,
                no_response,
            } => {
                self.handle_write(&address, &characteristic, &value, no_response)
                    .await
            }
            Commands::Watch {
                address,
                characteristic,
                count,
            } => self.handle_watch(&address, &characteristic, count).await,
        }
    }

    fn gatt(&self) -> &GattConfig {
        &self.config.gatt
    }

    fn platform(&self) -> Result<Arc<dyn BlePlatform>> {
        self.platform
            .clone()
            .ok_or_else(|| CliError::Config("this command needs a BLE adapter".to_string()))
    }

    fn cache(&self) -> Result<AddressCache> {
        Ok(AddressCache::from_config(self.gatt())?)
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    async fn handle_scan(
        &self,
        duration: u64,
        service: Option<String>,
        remember: bool,
        passive: bool,
    ) -> Result<()> {
        let mut options = self.gatt().scan.clone();
        if passive {
            options = options.with_mode(ScanMode::Passive);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let scanner = ScanSession::new(self.platform()?);
        scanner.set_handler(move |result: ScanResult| {
            let _ = tx.send(result);
        });
        scanner.start(&options)?;
        info!("Scanning for {}s", duration);

        let mut cache = if remember { Some(self.cache()?) } else { None };
        let deadline = tokio::time::sleep(Duration::from_secs(duration));
        tokio::pin!(deadline);
        let mut seen = std::collections::HashSet::new();

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                Some(result) = rx.recv() => {
                    if let Some(filter) = &service {
                        if !result.has_service_uuid(filter) {
                            continue;
                        }
                    }
                    if !seen.insert(result.identifier().to_string()) {
                        continue;
                    }
                    print_scan_result(&result);
                    if let (Some(cache), Some(address)) = (cache.as_mut(), result.address()) {
                        cache.insert(address, result.identifier())?;
                    }
                }
            }
        }

        scanner.stop();
        info!("Found {} devices", seen.len());
        Ok(())
    }

    /// Scan until `identifier` is advertised, so the backend can resolve it
    async fn wait_until_visible(&self, identifier: &str) -> Result<()> {
        let platform = self.platform()?;
        if platform.resolve_peripheral(identifier).is_some() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let scanner = ScanSession::new(platform);
        let wanted = identifier.to_string();
        scanner.set_handler(move |result: ScanResult| {
            if result.identifier() == wanted {
                let _ = tx.send(());
            }
        });
        scanner.start(&self.gatt().scan)?;

        let window = Duration::from_secs(self.config.scan_duration_secs);
        let found = tokio::time::timeout(window, rx.recv()).await.is_ok();
        scanner.stop();

        if !found {
            warn!("{} was not seen within {:?}", identifier, window);
        }
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<Connection> {
        let cache = self.cache()?;
        let record = cache.require(address)?;
        self.wait_until_visible(&record.platform_identifier).await?;

        let connection = Connection::new(self.platform()?, record, self.gatt());
        connection.on_disconnect(|| debug!("Link closed"));
        connection.connect().await?;
        Ok(connection)
    }

    fn characteristic(&self, connection: &Connection, uuid: &str) -> Result<Arc<Characteristic>> {
        connection
            .find_characteristic(uuid)?
            .ok_or_else(|| CliError::CharacteristicNotFound {
                address: connection.address().to_string(),
                uuid: uuid.to_string(),
            })
    }

    // ------------------------------------------------------------------------
    // Cache
    // ------------------------------------------------------------------------

    fn handle_devices(&self, json: bool) -> Result<()> {
        let cache = self.cache()?;
        let records: Vec<_> = cache.records().collect();

        if json {
            let entries: Vec<_> = records
                .iter()
                .map(|r| DeviceEntry {
                    address: &r.hardware_address,
                    identifier: &r.platform_identifier,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }

        if records.is_empty() {
            println!("No remembered devices in {}", cache.path().display());
        }
        for record in records {
            println!("{}  {}", record.hardware_address, record.platform_identifier);
        }
        Ok(())
    }

    fn handle_remember(&self, address: &str, identifier: &str) -> Result<()> {
        let mut cache = self.cache()?;
        cache.insert(address, identifier)?;
        println!("Remembered {}", address);
        Ok(())
    }

    fn handle_forget(&self, address: &str) -> Result<()> {
        let mut cache = self.cache()?;
        if cache.remove(address)? {
            println!("Forgot {}", address);
        } else {
            println!("{} was not remembered", address);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // GATT
    // ------------------------------------------------------------------------

    async fn handle_services(&self, address: &str, uuids: &[String]) -> Result<()> {
        let connection = self.connect(address).await?;
        for uuid in uuids {
            let present = connection.service_exists(uuid)?;
            println!("{}  {}", uuid, if present { "present" } else { "absent" });
        }
        connection.close().await?;
        Ok(())
    }

    async fn handle_read(&self, address: &str, uuid: &str) -> Result<()> {
        let connection = self.connect(address).await?;
        let characteristic = self.characteristic(&connection, uuid)?;

        let value = characteristic.read().await?;
        println!("{}", hex::encode(&value));

        connection.close().await?;
        Ok(())
    }

    async fn handle_write(
        &self,
        address: &str,
        uuid: &str,
        value: &str,
        no_response: bool,
    ) -> Result<()> {
        let bytes = hex::decode(value.trim_start_matches("0x"))?;
        let connection = self.connect(address).await?;
        let characteristic = self.characteristic(&connection, uuid)?;

        if no_response {
            characteristic.write_without_response(&bytes).await?;
        } else {
            characteristic.write(&bytes).await?;
        }
        info!("Wrote {} bytes to {}", bytes.len(), characteristic.uuid());

        connection.close().await?;
        Ok(())
    }

    async fn handle_watch(&self, address: &str, uuid: &str, count: Option<usize>) -> Result<()> {
        let connection = self.connect(address).await?;
        let characteristic = self.characteristic(&connection, uuid)?;

        let lost = Arc::new(Notify::new());
        connection.on_disconnect({
            let lost = lost.clone();
            move || lost.notify_one()
        });

        let mut values = characteristic.notifications();
        characteristic.enable_notifications().await?;
        info!("Watching {} (Ctrl-C to stop)", characteristic.uuid());

        let mut received = 0;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = lost.notified() => {
                    warn!("Connection to {} lost", connection.address());
                    return Ok(());
                }
                value = values.recv() => match value {
                    Some(value) => {
                        println!("{}", hex::encode(&value));
                        received += 1;
                        if count.is_some_and(|limit| received >= limit) {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        characteristic.disable_notifications().await?;
        connection.close().await?;
        Ok(())
    }
}

fn print_scan_result(result: &ScanResult) {
    let name = result.name().unwrap_or("<unnamed>");
    let address = result.address().unwrap_or("-");
    println!(
        "{:>4} dBm  {:17}  {:24}  {}",
        result.rssi(),
        address,
        name,
        result.identifier()
    );
}
