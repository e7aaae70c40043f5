//! pwm_probe - list sysfs PWM chips to help fill in the actuator config.
//!
//! Prints each `pwmchipN`, its channel count, the backing device and which channels
//! are already exported. Optionally pulses one channel at the servo center duty.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use pantilt_tracker::actuator::{discover_chips, ServoChannel, SysfsPwmChannel};
use pantilt_tracker::ServoMapping;

#[derive(Parser, Debug)]
#[command(name = "pwm_probe", about = "List sysfs PWM chips and channels")]
struct Args {
    /// PWM class directory
    #[arg(long, env = "PANTILT_SYSFS_ROOT", default_value = "/sys/class/pwm")]
    root: PathBuf,

    /// Pulse CHIP:CHANNEL at the center duty for a few seconds
    #[arg(long, value_name = "CHIP:CHANNEL")]
    center: Option<String>,

    /// Seconds to hold the center pulse
    #[arg(long, default_value_t = 2)]
    hold_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let chips = discover_chips(&args.root)?;
    if chips.is_empty() {
        println!("no PWM chips under {}", args.root.display());
    }
    for chip in &chips {
        let exported = if chip.exported.is_empty() {
            "-".to_string()
        } else {
            chip.exported
                .iter()
                .map(|ch| ch.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        println!(
            "pwmchip{:<3} channels={:<3} device={:<24} exported={}",
            chip.chip,
            chip.npwm,
            chip.device.as_deref().unwrap_or("?"),
            exported
        );
    }

    if let Some(pin) = args.center.as_deref() {
        let (chip, channel) = parse_pin(pin)?;
        let center = ServoMapping::default().center();
        let mut pwm = SysfsPwmChannel::new(&args.root, chip, channel, 50.0)?;
        pwm.start(center.pan)?;
        log::info!(
            "{} pulsing at {:.2}% for {}s",
            pwm.name(),
            center.pan,
            args.hold_secs
        );
        std::thread::sleep(Duration::from_secs(args.hold_secs));
        pwm.stop()?;
    }
    Ok(())
}

fn parse_pin(pin: &str) -> Result<(u32, u32)> {
    let (chip, channel) = pin
        .split_once(':')
        .ok_or_else(|| anyhow!("expected CHIP:CHANNEL, got '{}'", pin))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| anyhow!("invalid number '{}' in '{}'", s, pin))
    };
    Ok((parse(chip)?, parse(channel)?))
}
