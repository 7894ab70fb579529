//! Z80 CPU tests
//!
//! - instructions.rs: opcode-family coverage (ALU, LD, CB, ED, DD/FD)
//! - interrupts.rs: NMI/IRQ acceptance, EI-delay, HALT wake-up
//!
//! # References
//! - Zilog Z80 CPU User Manual

use super::*;
use crate::bus::Bus;
use std::rc::Rc;


/// A `Bus` over a flat 64 KiB cartridge image, no BIOS, cartridge RAM
/// enabled. Good enough for exercising the CPU in isolation: writes below
/// 0x0400 land on ROM and are silently dropped, so tests that need scratch
/// memory use the 0xC000+ system RAM window.
fn test_bus() -> Bus {
    let cart: Rc<[u8]> = Rc::from(vec![0u8; 0x10000].into_boxed_slice());
    Bus::new(cart, None, true)
}

fn assert_flags(cpu: &Cpu, expected: u8, context: &str) {
    assert_eq!(
        cpu.f, expected,
        "{}: flags mismatch. Expected {:08b}, got {:08b} (S={} Z={} F5={} H={} F3={} PV={} N={} C={})",
        context,
        expected,
        cpu.f,
        if cpu.flag_s() { 1 } else { 0 },
        if cpu.flag_z() { 1 } else { 0 },
        if cpu.f & flags::F5 != 0 { 1 } else { 0 },
        if cpu.flag_h() { 1 } else { 0 },
        if cpu.f & flags::F3 != 0 { 1 } else { 0 },
        if cpu.flag_pv() { 1 } else { 0 },
        if cpu.flag_n() { 1 } else { 0 },
        if cpu.flag_c() { 1 } else { 0 },
    );
}
