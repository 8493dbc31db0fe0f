//! Config Header Encoder (C4, spec §4.4), grounded on `ImageHeader`/
//! `writeConfig` in `examples/original_source/compiler/vmdk/config.go`.
//!
//! Packs build metadata into a fixed binary layout at the start of the
//! Config region, padded with zero bytes to 32 sectors (16 KiB).

use rand::RngCore;

use crate::config::BuildConfig;
use crate::error::{Error, Result};
use crate::plan::Plan;

pub const HEADER_REGION_BYTES: usize = 32 * 512;

const STRING_SLOT: usize = 64;
const MAX_ARGS: usize = 16;
const MAX_ENVS: usize = 16;
const MAX_DNS: usize = 4;
const MAX_CARDS: usize = 4;
const MAX_NTP_SERVERS: usize = 4;
const MAX_REDIRECTS: usize = 4;

/// The kernel LBA length field is stored 32 sectors larger than its actual
/// value, a compatibility quirk the original encoder introduced and that
/// downstream bootloaders now depend on; spec §4.4 requires preserving it.
const KERNEL_LENGTH_BUG_OFFSET: u32 = 32;

fn write_string(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() + 1 > STRING_SLOT {
        return Err(Error::invalid_input(format!(
            "'{value}' exceeds the {STRING_SLOT}-byte slot (nul included)"
        )));
    }
    let start = buf.len();
    buf.extend_from_slice(bytes);
    buf.resize(start + STRING_SLOT, 0);
    Ok(())
}

fn write_string_array(buf: &mut Vec<u8>, values: &[String], max: usize) -> Result<()> {
    if values.len() > max {
        return Err(Error::invalid_input(format!(
            "{} entries exceeds maximum of {max}",
            values.len()
        )));
    }
    for value in values {
        write_string(buf, value)?;
    }
    for _ in values.len()..max {
        buf.resize(buf.len() + STRING_SLOT, 0);
    }
    Ok(())
}

/// Encodes the config header for `config` and `plan` into a buffer exactly
/// [`HEADER_REGION_BYTES`] long.
pub fn encode(config: &BuildConfig, plan: &Plan) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_REGION_BYTES);

    buf.extend_from_slice(&(plan.kernel.first_lba as u32).to_le_bytes());
    buf.extend_from_slice(
        &((plan.kernel.length_sectors as u32) + KERNEL_LENGTH_BUG_OFFSET).to_le_bytes(),
    );
    buf.extend_from_slice(&(plan.app.first_lba as u32).to_le_bytes());
    buf.extend_from_slice(&(plan.app.length_sectors as u32).to_le_bytes());
    buf.extend_from_slice(&(plan.trampoline.first_lba as u32).to_le_bytes());
    buf.extend_from_slice(&(plan.files.first_lba as u32).to_le_bytes());
    buf.extend_from_slice(&(plan.files.length_sectors as u32).to_le_bytes());

    write_string(&mut buf, &config.name)?;

    write_string_array(&mut buf, &config.app.binary_args, MAX_ARGS)?;
    write_string_array(&mut buf, &config.app.system_envs, MAX_ENVS)?;
    write_string_array(&mut buf, &config.network.dns, MAX_DNS)?;

    if config.network.cards.len() > MAX_CARDS {
        return Err(Error::invalid_input(format!(
            "{} network cards exceeds maximum of {MAX_CARDS}",
            config.network.cards.len()
        )));
    }
    for card in &config.network.cards {
        write_string(&mut buf, &card.ip)?;
        write_string(&mut buf, &card.mask)?;
        write_string(&mut buf, &card.gateway)?;
    }
    for _ in config.network.cards.len()..MAX_CARDS {
        buf.resize(buf.len() + 3 * STRING_SLOT, 0);
    }

    write_string(&mut buf, &config.disk.filesystem)?;
    buf.extend_from_slice(&config.disk.max_fd.to_le_bytes());

    write_string(&mut buf, &config.ntp.hostname)?;
    write_string_array(&mut buf, &config.ntp.servers, MAX_NTP_SERVERS)?;

    if config.redirects.rules.len() > MAX_REDIRECTS {
        return Err(Error::invalid_input(format!(
            "{} redirect rules exceeds maximum of {MAX_REDIRECTS}",
            config.redirects.rules.len()
        )));
    }
    for rule in &config.redirects.rules {
        write_string(&mut buf, &rule.src)?;
        write_string(&mut buf, &rule.dest)?;
        write_string(&mut buf, &rule.protocol)?;
    }
    for _ in config.redirects.rules.len()..MAX_REDIRECTS {
        buf.resize(buf.len() + 3 * STRING_SLOT, 0);
    }

    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    buf.extend_from_slice(&nonce);

    if buf.len() > HEADER_REGION_BYTES {
        return Err(Error::invalid_input(format!(
            "config header grew to {} bytes, exceeds the {HEADER_REGION_BYTES}-byte region",
            buf.len()
        )));
    }
    buf.resize(HEADER_REGION_BYTES, 0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> Plan {
        Plan::compute(64, 1024 * 1024, 4096, 1024 * 1024).unwrap()
    }

    #[test]
    fn encodes_to_exact_region_size() {
        let config = BuildConfig::parse(br#"{"name":"demo"}"#).unwrap();
        let buf = encode(&config, &sample_plan()).unwrap();
        assert_eq!(buf.len(), HEADER_REGION_BYTES);
    }

    #[test]
    fn kernel_length_carries_the_plus_32_offset() {
        let config = BuildConfig::parse(br#"{}"#).unwrap();
        let plan = sample_plan();
        let buf = encode(&config, &plan).unwrap();
        let stored = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        assert_eq!(stored, plan.kernel.length_sectors as u32 + 32);
    }

    #[test]
    fn name_lands_at_offset_28() {
        let config = BuildConfig::parse(br#"{"name":"myapp"}"#).unwrap();
        let buf = encode(&config, &sample_plan()).unwrap();
        assert_eq!(&buf[28..33], b"myapp");
        assert_eq!(buf[33], 0);
    }

    #[test]
    fn too_many_args_is_rejected() {
        let config = BuildConfig {
            app: crate::config::AppConfig {
                binary_args: vec!["x".to_string(); 17],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(encode(&config, &sample_plan()).is_err());
    }

    #[test]
    fn nonce_differs_between_encodes() {
        let config = BuildConfig::parse(br#"{}"#).unwrap();
        let plan = sample_plan();
        let a = encode(&config, &plan).unwrap();
        let b = encode(&config, &plan).unwrap();
        assert_ne!(&a[4320..4336], &b[4320..4336]);
    }
}
