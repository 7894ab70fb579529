//! Debug and diagnostic tool for the SMS emulator core
//!
//! Consolidated tool for booting, tracing, and rendering a cartridge image.
//!
//! Usage:
//!   cargo run --release --example debug -- <command> <rom_path> [options]
//!
//! Commands:
//!   boot <rom>              Run until HALT (or a cycle cap), reporting progress
//!   trace <rom> [steps]     Print a per-instruction trace (default: 100000)
//!   screen <rom> [out.ppm]  Render one frame to a PPM image (default: screen.ppm)
//!   vram <rom>              Summarize VRAM/CRAM contents after boot
//!   help                    Show this help message

use std::collections::HashMap;
use std::env;
use std::fs::{self, File};
use std::io::{BufWriter, Write};

use anyhow::{bail, Context, Result};
use sms_core::cpu::TraceConfig;
use sms_core::{Machine, MachineConfig};

const CYCLES_PER_FRAME: u32 = 228 * 262;

fn main() -> Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "boot" => cmd_boot(rom_arg(&args)?),
        "trace" => {
            let steps = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100_000);
            cmd_trace(rom_arg(&args)?, steps)
        }
        "screen" => {
            let output = args.get(3).map(|s| s.as_str()).unwrap_or("screen.ppm");
            cmd_screen(rom_arg(&args)?, output)
        }
        "vram" => cmd_vram(rom_arg(&args)?),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            Ok(())
        }
    }
}

fn rom_arg(args: &[String]) -> Result<&str> {
    args.get(2)
        .map(|s| s.as_str())
        .context("missing <rom_path> argument")
}

fn print_help() {
    println!(
        r#"Sega Master System core debug tool

Usage: cargo run --release --example debug -- <command> <rom_path> [options]

Commands:
  boot <rom>              Run until HALT (or a cycle cap), reporting progress
  trace <rom> [steps]     Print a per-instruction trace (default: 100000 steps)
  screen <rom> [out.ppm]  Render one frame to a PPM image (default: screen.ppm)
  vram <rom>              Summarize VRAM/CRAM contents after boot
  help                    Show this help message
"#
    );
}

fn new_machine(rom_path: &str) -> Result<Machine> {
    let cart = fs::read(rom_path).with_context(|| format!("reading {rom_path}"))?;
    log::info!("loaded cartridge: {rom_path} ({} bytes)", cart.len());
    let config = MachineConfig {
        cart,
        use_manual_init: true,
        ..Default::default()
    };
    Machine::new(config).context("constructing Machine")
}

// === Boot ===

fn cmd_boot(rom_path: &str) -> Result<()> {
    let mut machine = new_machine(rom_path)?;

    println!("Booting...");
    let chunk = 10_000;
    let max_cycles = 50_000_000u64;
    let mut total = 0u64;

    while total < max_cycles {
        let executed = machine.run_cycles(chunk).context("CPU error during boot")?;
        total += executed as u64;

        if total % 1_000_000 < chunk as u64 {
            println!(
                "[{:.1}M cycles] PC={:#06x} SP={:#06x} halted={}",
                total as f64 / 1_000_000.0,
                machine.cpu().pc,
                machine.cpu().sp,
                machine.cpu().halted,
            );
        }

        if machine.cpu().halted {
            println!(
                "\nHALT at PC={:#06x} after {:.2}M cycles",
                machine.cpu().pc,
                total as f64 / 1_000_000.0
            );
            break;
        }
    }

    Ok(())
}

// === Trace ===

fn cmd_trace(rom_path: &str, max_steps: u64) -> Result<()> {
    let cart = fs::read(rom_path).with_context(|| format!("reading {rom_path}"))?;
    let mut config = MachineConfig {
        cart,
        use_manual_init: true,
        ..Default::default()
    };
    config.trace = TraceConfig {
        trace_regs: false,
        ..Default::default()
    };
    let mut machine = Machine::new(config).context("constructing Machine")?;

    println!("=== Trace ({max_steps} steps) ===");
    let mut step = 0u64;
    while step < max_steps {
        let pc_before = machine.cpu().pc;
        machine.run_cycles(1).context("CPU error during trace")?;
        step += 1;
        if step <= 20 || step % 10_000 == 0 {
            println!("{step:8} pc={pc_before:#06x} -> pc={:#06x}", machine.cpu().pc);
        }
        if machine.cpu().halted {
            println!("HALT at step {step}");
            break;
        }
    }
    Ok(())
}

// === Screen ===

fn cmd_screen(rom_path: &str, output: &str) -> Result<()> {
    let mut machine = new_machine(rom_path)?;
    machine.run_cycles(CYCLES_PER_FRAME * 60).context("CPU error while rendering")?;
    let frame = machine.render_frame();
    save_framebuffer_ppm(&frame, 256, 192, output)?;
    println!("Saved: {output}");
    Ok(())
}

fn save_framebuffer_ppm(frame: &[u8], width: usize, height: usize, path: &str) -> Result<()> {
    if frame.len() != width * height * 3 {
        bail!("framebuffer size {} does not match {width}x{height}x3", frame.len());
    }
    let file = File::create(path).with_context(|| format!("creating {path}"))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "P6")?;
    writeln!(writer, "{width} {height}")?;
    writeln!(writer, "255")?;
    writer.write_all(frame)?;
    Ok(())
}

// === VRAM ===

fn cmd_vram(rom_path: &str) -> Result<()> {
    let mut machine = new_machine(rom_path)?;
    machine.run_cycles(CYCLES_PER_FRAME * 60).context("CPU error while booting")?;

    let state = machine.get_state();
    let non_zero_vram = state.vdp.vram.iter().filter(|&&b| b != 0).count();
    println!("VRAM: {non_zero_vram} / {} non-zero bytes", state.vdp.vram.len());

    println!("\nCRAM palette:");
    let mut histogram: HashMap<[u8; 3], u32> = HashMap::new();
    for i in 0..state.vdp.cram.len() {
        let entry = state.vdp.cram[i];
        let r = (entry & 0x03) * 85;
        let g = ((entry >> 2) & 0x03) * 85;
        let b = ((entry >> 4) & 0x03) * 85;
        println!("  [{i:2}] 0x{entry:02x} -> rgb({r},{g},{b})");
        *histogram.entry([r, g, b]).or_insert(0) += 1;
    }

    let frame = machine.render_frame();
    let mut non_black = 0usize;
    for pixel in frame.chunks_exact(3) {
        if pixel != [0, 0, 0] {
            non_black += 1;
        }
    }
    println!(
        "\nFramebuffer non-black pixels: {non_black} / {} ({:.1}%)",
        256 * 192,
        100.0 * non_black as f64 / (256.0 * 192.0)
    );

    Ok(())
}
