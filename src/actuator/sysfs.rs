//! Linux sysfs PWM servo channel and chip discovery.
//!
//! A channel lives at `<root>/pwmchip<N>/pwm<M>` once exported. Period and duty cycle
//! are written in nanoseconds; the servo expects a 50 Hz frame (20 ms period).

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ServoChannel;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/pwm";

/// Sysfs needs a moment to create the channel directory after export.
const EXPORT_SETTLE: Duration = Duration::from_millis(100);

pub struct SysfsPwmChannel {
    name: String,
    chip_path: PathBuf,
    channel: u32,
    period_ns: u64,
    exported_here: bool,
}

impl SysfsPwmChannel {
    pub fn new<P: AsRef<Path>>(root: P, chip: u32, channel: u32, frequency_hz: f64) -> Result<Self> {
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            return Err(anyhow!("PWM frequency must be positive, got {}", frequency_hz));
        }
        let chip_path = root.as_ref().join(format!("pwmchip{}", chip));
        Ok(Self {
            name: format!("pwmchip{}:pwm{}", chip, channel),
            chip_path,
            channel,
            period_ns: (1_000_000_000.0 / frequency_hz).round() as u64,
            exported_here: false,
        })
    }

    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    fn channel_path(&self) -> PathBuf {
        self.chip_path.join(format!("pwm{}", self.channel))
    }

    fn duty_ns(&self, duty_percent: f64) -> Result<u64> {
        if !(0.0..=100.0).contains(&duty_percent) {
            return Err(anyhow!(
                "{}: duty cycle {}% outside 0..=100",
                self.name,
                duty_percent
            ));
        }
        Ok((self.period_ns as f64 * duty_percent / 100.0).round() as u64)
    }

    fn write_attr(&self, attr: &str, value: impl ToString) -> Result<()> {
        let path = self.channel_path().join(attr);
        fs::write(&path, value.to_string())
            .with_context(|| format!("write {}", path.display()))
    }

    fn export(&mut self) -> Result<()> {
        if self.channel_path().exists() {
            return Ok(());
        }
        if !self.chip_path.exists() {
            return Err(anyhow!("{} not found", self.chip_path.display()));
        }
        let export = self.chip_path.join("export");
        fs::write(&export, self.channel.to_string())
            .with_context(|| format!("export {}", self.name))?;
        std::thread::sleep(EXPORT_SETTLE);
        if !self.channel_path().exists() {
            return Err(anyhow!("{} did not appear after export", self.name));
        }
        self.exported_here = true;
        Ok(())
    }

    fn unexport(&mut self) -> Result<()> {
        if !self.exported_here {
            return Ok(());
        }
        self.exported_here = false;
        let unexport = self.chip_path.join("unexport");
        fs::write(&unexport, self.channel.to_string())
            .with_context(|| format!("unexport {}", self.name))
    }
}

impl ServoChannel for SysfsPwmChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, duty: f64) -> Result<()> {
        let duty_ns = self.duty_ns(duty)?;
        self.export()?;
        // Some drivers reject a period shorter than the current duty cycle.
        self.write_attr("duty_cycle", 0)?;
        self.write_attr("period", self.period_ns)?;
        self.write_attr("duty_cycle", duty_ns)?;
        self.write_attr("enable", 1)?;
        log::debug!("{}: enabled, period={}ns duty={}ns", self.name, self.period_ns, duty_ns);
        Ok(())
    }

    fn set_duty(&mut self, duty: f64) -> Result<()> {
        let duty_ns = self.duty_ns(duty)?;
        self.write_attr("duty_cycle", duty_ns)
    }

    fn stop(&mut self) -> Result<()> {
        let disabled = self.write_attr("enable", 0);
        let unexported = self.unexport();
        disabled.and(unexported)
    }
}

/// One PWM chip as seen in sysfs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PwmChipInfo {
    pub chip: u32,
    pub path: PathBuf,
    pub npwm: u32,
    pub device: Option<String>,
    /// Channels that are already exported.
    pub exported: Vec<u32>,
}

/// Lists `pwmchip*` entries under `root`, sorted by chip number.
pub fn discover_chips<P: AsRef<Path>>(root: P) -> Result<Vec<PwmChipInfo>> {
    let root = root.as_ref();
    let entries =
        fs::read_dir(root).with_context(|| format!("read PWM class dir {}", root.display()))?;

    let mut chips = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(chip) = name
            .strip_prefix("pwmchip")
            .and_then(|suffix| suffix.parse::<u32>().ok())
        else {
            continue;
        };
        let path = entry.path();
        let npwm = fs::read_to_string(path.join("npwm"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);
        let device = fs::read_link(path.join("device"))
            .ok()
            .and_then(|target| target.file_name().map(|n| n.to_string_lossy().to_string()));
        let exported = (0..npwm)
            .filter(|ch| path.join(format!("pwm{}", ch)).exists())
            .collect();
        chips.push(PwmChipInfo {
            chip,
            path,
            npwm,
            device,
            exported,
        });
    }
    chips.sort_by_key(|c| c.chip);
    Ok(chips)
}
