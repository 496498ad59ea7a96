use crate::tracker::BootstrapPolicy;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::time::Duration;

/// One monitored meter-box channel: a display name and the bit it occupies
/// in the device's status byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub name: String,
    pub bit_index: u8,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub i2c_bus: u8,
    pub i2c_address: u16,
    pub i2c_timeout_ms: u32,
    pub settle_delay_ms: u64,
    pub channels: Vec<ChannelConfig>,
    pub bootstrap_policy: BootstrapPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("METERBOX_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "sqlite://meterbox.sqlite3".to_string());

        let i2c_bus = env_u64("METERBOX_I2C_BUS", 1)? as u8;
        let i2c_address = parse_address(
            &env_string("METERBOX_I2C_ADDRESS", "0x17")?,
        )
        .context("invalid METERBOX_I2C_ADDRESS")?;
        let i2c_timeout_ms = env_u64("METERBOX_I2C_TIMEOUT_MS", 100)? as u32;
        let settle_delay_ms = env_u64("METERBOX_SETTLE_DELAY_MS", 10)?;

        let channels = parse_channels(&env_string(
            "METERBOX_CHANNELS",
            "phase 1:0,phase 2:1,phase 3:2",
        )?)
        .context("invalid METERBOX_CHANNELS")?;

        let bootstrap_policy =
            parse_policy(&env_string("METERBOX_BOOTSTRAP_POLICY", "per-channel")?)
                .context("invalid METERBOX_BOOTSTRAP_POLICY")?;

        Ok(Self {
            database_url,
            i2c_bus,
            i2c_address,
            i2c_timeout_ms,
            settle_delay_ms,
            channels,
            bootstrap_policy,
        })
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

fn env_string(key: &str, default: &str) -> Result<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Ok(default.to_string()),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{key} must be an unsigned integer")),
        _ => Ok(default),
    }
}

fn parse_address(raw: &str) -> Result<u16> {
    let raw = raw.trim();
    let parsed = if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16)
    } else {
        raw.parse::<u16>()
    };
    let address = parsed.map_err(|_| anyhow!("unparseable device address {raw:?}"))?;
    if address > 0x7F {
        bail!("device address {address:#04x} outside 7-bit range");
    }
    Ok(address)
}

/// Parses `name:bit` pairs, comma separated, e.g. `phase 1:0,phase 2:1`.
fn parse_channels(raw: &str) -> Result<Vec<ChannelConfig>> {
    let mut channels = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (name, bit) = entry
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("channel entry {entry:?} missing ':bit'"))?;
        let name = name.trim();
        if name.is_empty() {
            bail!("channel entry {entry:?} has an empty name");
        }
        let bit_index = bit
            .trim()
            .parse::<u8>()
            .map_err(|_| anyhow!("channel entry {entry:?} has an unparseable bit index"))?;
        if bit_index > 7 {
            bail!("channel {name:?} bit index {bit_index} outside the status byte");
        }
        if channels.iter().any(|c: &ChannelConfig| c.bit_index == bit_index) {
            bail!("bit index {bit_index} assigned to more than one channel");
        }
        channels.push(ChannelConfig {
            name: name.to_string(),
            bit_index,
        });
    }
    if channels.is_empty() {
        bail!("no channels configured");
    }
    Ok(channels)
}

fn parse_policy(raw: &str) -> Result<BootstrapPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "per-channel" | "per_channel" => Ok(BootstrapPolicy::PerChannel),
        "global-guard" | "global_guard" => Ok(BootstrapPolicy::GlobalGuard),
        other => bail!("unknown bootstrap policy {other:?}"),
    }
}
