//! Machine identity and hardware.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use super::command::stdout_of;
use super::munki::read_managed_install_report;
use super::{CheckinModule, ModuleContext};
use crate::model_cache::{AppleModelLookup, ModelCache, ModelNameResolver};
use crate::models::ModuleSection;
use crate::value::PlistValue;

pub const SECTION: &str = "machine";
const VERSION: &str = "1.1.0";

const SYSTEM_PROFILER: &str = "/usr/sbin/system_profiler";
const SCUTIL: &str = "/usr/sbin/scutil";

/// Hardware keys as written by older and newer system_profiler versions.
const HARDWARE_KEYS: &[(&str, &str, &str)] = &[
    ("cpu_type", "CPUType", "cpu_type"),
    ("cpu_speed", "CurrentProcessorSpeed", "current_processor_speed"),
    ("memory", "PhysicalMemory", "physical_memory"),
];

/// Inputs gathered from the system, kept separate so the section can be
/// assembled without touching the machine.
#[derive(Debug, Clone)]
pub struct MachineSources {
    pub report: PlistValue,
    /// First `SPHardwareDataType` item from system_profiler.
    pub hardware: Option<PlistValue>,
    pub hostname: Option<String>,
    /// Size of the boot volume in KiB.
    pub disk_total_kb: Option<u64>,
}

#[derive(Debug, Default)]
pub struct MachineModule;

#[async_trait]
impl CheckinModule for MachineModule {
    fn name(&self) -> &'static str {
        SECTION
    }

    async fn collect(&self, ctx: &ModuleContext) -> Result<Option<ModuleSection>> {
        let name_type = ctx
            .prefs
            .get_str("NameType")
            .unwrap_or_else(|| "ComputerName".to_string());

        let sources = MachineSources {
            report: read_managed_install_report(&ctx.managed_install_dir),
            hardware: hardware_info().await,
            hostname: stdout_of(SCUTIL, &["--get", name_type.as_str()])
                .await
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            disk_total_kb: disk_total_kb(Path::new("/")),
        };

        let Some(mut section) = MachineModule::section_from_sources(&sources) else {
            warn!(
                "No serial number in the package manager report. This usually means it \
                 only runs Apple software updates."
            );
            return Ok(None);
        };

        if let Some(serial) = section.get_str("serial").map(str::to_string) {
            let resolver = ModelNameResolver::new(
                ModelCache::open(&ctx.model_cache_path),
                Box::new(AppleModelLookup::default()),
            );
            let udid = sources.hardware.as_ref().and_then(hardware_udid);
            if let Some(friendly) = resolver.resolve(&serial, udid).await {
                section.set("machine_model_friendly", friendly);
            }
        }

        Ok(Some(section))
    }
}

impl MachineModule {
    /// Build the section; `None` when the report has no serial number.
    pub fn section_from_sources(sources: &MachineSources) -> Option<ModuleSection> {
        let report = &sources.report;
        let machine_info = report.get("MachineInfo");
        let info_str = |key: &str| {
            machine_info
                .and_then(|m| m.get(key))
                .and_then(PlistValue::as_str)
        };

        let serial = info_str("serial_number").filter(|s| !s.is_empty())?;

        let mut section = ModuleSection::new();
        section.facts.insert("checkin_module_version", VERSION);
        section.set("serial", serial);
        if let Some(ref hostname) = sources.hostname {
            section.set("hostname", hostname.as_str());
        }
        if let Some(user) = report.get("ConsoleUser").and_then(PlistValue::as_str) {
            section.set("console_user", user);
        }
        section.set("os_family", "Darwin");
        if let Some(os) = info_str("os_vers") {
            section.set("operating_system", os);
        }
        if let Some(model) = info_str("machine_model") {
            section.set("machine_model", model);
        }

        let hd_space = report.get("AvailableDiskSpace").and_then(PlistValue::as_i64);
        if let Some(space) = hd_space {
            section.set("hd_space", space);
        }
        if let Some(total) = sources.disk_total_kb {
            section.set("hd_total", total);
            if let (Some(space), true) = (hd_space, total > 0) {
                section.set("hd_percent", (space as f64 / total as f64).to_string());
            }
        }

        if let Some(ref hardware) = sources.hardware {
            let style_old = hardware.get("MachineModel").is_some();
            for (field, old, new) in HARDWARE_KEYS {
                let key = if style_old { old } else { new };
                if let Some(value) = hardware.get(key) {
                    section.set(*field, value.to_json());
                }
            }
            let memory_key = if style_old { "PhysicalMemory" } else { "physical_memory" };
            if let Some(kb) = hardware
                .get(memory_key)
                .and_then(PlistValue::as_str)
                .and_then(process_memory)
            {
                section.set("memory_kb", kb);
            }
        }

        Some(section)
    }
}

/// Memory as printed by system_profiler (`"16 GB"`) in KiB.
pub fn process_memory(amount: &str) -> Option<u64> {
    let (number, unit) = amount.trim().rsplit_once(' ')?;
    let exponent = match unit {
        "KB" => 0,
        "MB" => 1,
        "GB" => 2,
        "TB" => 3,
        _ => return None,
    };
    let number = number
        .parse::<u64>()
        .ok()
        .or_else(|| number.parse::<f64>().ok().map(|n| n as u64))?;
    number.checked_mul(1024u64.pow(exponent))
}

async fn hardware_info() -> Option<PlistValue> {
    let xml = stdout_of(
        SYSTEM_PROFILER,
        &["-xml", "SPNetworkDataType", "SPHardwareDataType"],
    )
    .await?;
    let profile = PlistValue::from_slice(xml.as_bytes()).ok()?;

    PlistValue::items(Some(&profile))
        .iter()
        .find(|p| p.get("_dataType").and_then(PlistValue::as_str) == Some("SPHardwareDataType"))
        .and_then(|p| PlistValue::items(p.get("_items")).first().cloned())
}

fn hardware_udid(hardware: &PlistValue) -> Option<&str> {
    ["provisioning_UDID", "platform_UUID"]
        .iter()
        .find_map(|key| hardware.get(key).and_then(PlistValue::as_str))
}

fn disk_total_kb(path: &Path) -> Option<u64> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    Some(stat.blocks() as u64 * stat.fragment_size() as u64 / 1024)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    fn dict(entries: &[(&str, PlistValue)]) -> PlistValue {
        PlistValue::Dictionary(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn report() -> PlistValue {
        dict(&[
            (
                "MachineInfo",
                dict(&[
                    ("serial_number", "C02ABC12MD6T".into()),
                    ("os_vers", "14.4.1".into()),
                    ("machine_model", "MacBookPro18,3".into()),
                ]),
            ),
            ("ConsoleUser", "alex".into()),
            ("AvailableDiskSpace", PlistValue::Integer(250_000_000)),
        ])
    }

    #[test]
    fn memory_strings_convert_to_kib() {
        assert_eq!(process_memory("16 GB"), Some(16 * 1024 * 1024));
        assert_eq!(process_memory("512 MB"), Some(512 * 1024));
        assert_eq!(process_memory("1.5 TB"), Some(1024 * 1024 * 1024));
        assert_eq!(process_memory("lots"), None);
    }

    #[test]
    fn absurd_memory_strings_do_not_overflow() {
        assert_eq!(process_memory("99999999999999999 TB"), None);
        assert_eq!(process_memory("18446744073709551615 KB"), Some(u64::MAX));
    }

    #[test]
    fn builds_section_from_report_and_new_style_hardware() {
        let sources = MachineSources {
            report: report(),
            hardware: Some(dict(&[
                ("cpu_type", "Apple M1 Pro".into()),
                ("physical_memory", "16 GB".into()),
            ])),
            hostname: Some("alex-mbp".to_string()),
            disk_total_kb: Some(500_000_000),
        };

        let section = MachineModule::section_from_sources(&sources).unwrap();
        assert_eq!(section.get_str("serial"), Some("C02ABC12MD6T"));
        assert_eq!(section.get_str("hostname"), Some("alex-mbp"));
        assert_eq!(section.get_str("os_family"), Some("Darwin"));
        assert_eq!(section.get_str("hd_percent"), Some("0.5"));
        assert_eq!(section.get("cpu_type"), Some(&json!("Apple M1 Pro")));
        assert_eq!(section.get("memory_kb"), Some(&json!(16_777_216)));
        assert!(section.get("cpu_speed").is_none());
    }

    #[test]
    fn reads_old_style_hardware_keys() {
        let sources = MachineSources {
            report: report(),
            hardware: Some(dict(&[
                ("MachineModel", "iMac14,2".into()),
                ("CPUType", "Intel Core i5".into()),
                ("CurrentProcessorSpeed", "3.2 GHz".into()),
                ("PhysicalMemory", "8 GB".into()),
            ])),
            hostname: None,
            disk_total_kb: None,
        };

        let section = MachineModule::section_from_sources(&sources).unwrap();
        assert_eq!(section.get("cpu_speed"), Some(&json!("3.2 GHz")));
        assert_eq!(section.get("memory"), Some(&json!("8 GB")));
        assert!(section.get("hd_total").is_none());
    }

    #[test]
    fn no_serial_means_no_section() {
        let sources = MachineSources {
            report: PlistValue::empty_dict(),
            hardware: None,
            hostname: None,
            disk_total_kb: None,
        };
        assert!(MachineModule::section_from_sources(&sources).is_none());
    }
}
