//! cc-tool - USB flash programmer for the CC1110/1111, CC2430/2431,
//! CC2510/2511, CC2530/2531/2533, CC2540/2541, and CC2543/2544/2545
//! 8051-based SoC family, via the CC Debugger / SmartRF04/05 dongles.

mod cli;
mod file_spec;
mod progress;

use std::process::ExitCode;

use cc_core::error::Error;
use cc_core::orchestrator::{self, TaskParams, Tasks, VerifyMethod};
use cc_core::programmer::Programmer;
use clap::Parser;
use cli::Cli;
use file_spec::{load_image, parse_file_spec, save_image};
use progress::IndicatifProgress;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> cc_core::error::Result<()> {
    let tasks = tasks_from_cli(&cli)?;

    let write_spec = cli.write.as_deref().map(parse_file_spec).transpose()?;
    let read_spec = cli.read.as_deref().map(parse_file_spec).transpose()?;
    let write_image = write_spec.as_ref().map(load_image).transpose()?;

    let mut opener = cc_usb::UsbOpener::new();
    let mut programmer = Programmer::new();

    match &cli.device {
        Some(addr) => {
            let (bus, address) = parse_bus_address(addr)?;
            programmer.open_by_address(&mut opener, bus, address)?;
        }
        None => programmer.open(&mut opener)?,
    }

    if let Some(info) = programmer.programmer_info() {
        log::info!("{} (debugger id {})", info.name, info.debugger_id);
    }
    let (name, supported) = programmer.unit_status();
    if !name.is_empty() {
        log::info!("target: {name} ({})", if supported { "supported" } else { "unrecognized" });
    }

    if cli.fast || cli.slow {
        programmer.set_debug_interface_speed(cli.fast)?;
    }

    let params = TaskParams {
        tasks,
        mac_address: cli
            .write_mac
            .as_deref()
            .map(parse_hex_bytes)
            .transpose()?,
        lock_spec: cli.lock.clone(),
        verify_method: match cli.verify.as_deref() {
            Some("read") => VerifyMethod::ByRead,
            _ => VerifyMethod::ByCrc,
        },
        flash_size_override_kb: cli.flash_size,
    };

    let mut progress = IndicatifProgress::new();
    let outcome = orchestrator::run(&mut programmer, &params, write_image.as_ref(), &mut progress);
    progress.finish();
    let outcome = outcome?;

    for (index, mac) in &outcome.mac_reads {
        println!("MAC[{index}]: {}", format_hex(mac));
    }
    if let Some(page) = &outcome.info_page {
        if let Some(path) = &cli.read_info_page {
            std::fs::write(path, page)?;
        }
    }
    if let (Some(store), Some(spec)) = (&outcome.read_image, &read_spec) {
        save_image(spec, store)?;
    }
    if let Some((status, config)) = outcome.test_status_config {
        println!("status: 0x{status:02X}  config: 0x{config:02X}");
    }

    programmer.close();
    Ok(())
}

fn tasks_from_cli(cli: &Cli) -> cc_core::error::Result<Tasks> {
    let mut tasks = Tasks::empty();
    tasks.set(Tasks::TEST, cli.test);
    tasks.set(Tasks::RESET, cli.reset);
    tasks.set(Tasks::ERASE, cli.erase);
    tasks.set(Tasks::WRITE, cli.write.is_some());
    tasks.set(Tasks::READ, cli.read.is_some());
    tasks.set(Tasks::VERIFY, cli.verify.is_some());
    tasks.set(Tasks::LOCK, cli.lock.is_some());
    tasks.set(Tasks::READ_MAC, cli.read_mac);
    tasks.set(Tasks::WRITE_MAC, cli.write_mac.is_some());
    tasks.set(Tasks::PRESERVE_MAC, cli.preserve_mac);
    tasks.set(Tasks::READ_INFO_PAGE, cli.read_info_page.is_some());
    if tasks.is_empty() {
        return Err(Error::invariant("no task requested; pass at least one of --test/--reset/--erase/--write/--read/..."));
    }
    Ok(tasks)
}

fn parse_bus_address(s: &str) -> cc_core::error::Result<(u8, u8)> {
    let (bus, address) = s
        .split_once(':')
        .ok_or_else(|| Error::invariant("--device expects BUS:ADDRESS"))?;
    let bus: u8 = bus.parse().map_err(|_| Error::invariant("bad bus number"))?;
    let address: u8 = address.parse().map_err(|_| Error::invariant("bad device address"))?;
    Ok((bus, address))
}

fn parse_hex_bytes(s: &str) -> cc_core::error::Result<Vec<u8>> {
    if s.len() % 2 != 0 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::invariant(format!("not an even-length hex string: {s}")));
    }
    Ok(s.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16).unwrap() as u8;
            let lo = (pair[1] as char).to_digit(16).unwrap() as u8;
            (hi << 4) | lo
        })
        .collect())
}

fn format_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(":")
}
