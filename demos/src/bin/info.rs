//! Prints the default device and the GPU families every device supports.

use std::process::ExitCode;
use std::sync::Arc;

use redlilium_gpu::{Device, GpuFamily};

fn yes_no(value: bool) -> &'static str {
    if value { "Yes" } else { "No" }
}

fn print_device(device: &Arc<Device>) {
    println!("{} ({} backend)", device.name(), device.backend_name());
    println!("  Low-power:      {}", yes_no(device.is_low_power()));
    println!("  Removable:      {}", yes_no(device.is_removable()));
    println!("  Headless:       {}", yes_no(device.is_headless()));
    println!("  Unified memory: {}", yes_no(device.has_unified_memory()));
    println!("  Registry ID:    {}", device.registry_id());
    println!("  Families:");
    for family in GpuFamily::ALL {
        let support = if device.supports_family(family) {
            "✅ supported"
        } else {
            "❌ unsupported"
        };
        println!("    {:<8} {support}", family.to_string());
    }
}

fn main() -> ExitCode {
    redlilium_gpu_demos::init_logging();

    match redlilium_gpu::create_system_default_device() {
        Ok(device) => println!("Default device: {}\n", device.name()),
        Err(e) => {
            log::error!("No default device: {e}");
            return ExitCode::FAILURE;
        }
    }

    let devices = redlilium_gpu::copy_all_devices();
    println!("{} device(s)\n", devices.len());
    for device in &devices {
        print_device(device);
        println!();
    }
    ExitCode::SUCCESS
}
