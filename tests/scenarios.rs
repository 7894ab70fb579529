//! Concrete end-to-end scenarios exercising CPU/Bus/VDP/PSG integration.
//!
//! Each test here is a self-contained seed program or device sequence; where
//! a device can be driven directly (VDP/PSG protocol bytes) it is, since
//! that's the more precise way to pin exact timing than routing everything
//! through hand-assembled opcodes.

use std::rc::Rc;

use sms_core::bus::Bus;
use sms_core::cpu::Cpu;
use sms_core::psg::Psg;
use sms_core::vdp::Vdp;
use sms_core::{Machine, MachineConfig};

fn cart_bank() -> Vec<u8> {
    vec![0u8; 0x4000]
}

/// Write `bytes` at Z80 address `addr` into a single 0x4000-byte cart bank,
/// accounting for the bus's per-window bank offset (bank 0 is selected by
/// default in all three slots, so 0x0000-0x3FFF reads `cart[addr]` directly,
/// 0x4000-0x7FFF reads `cart[addr - 0x4000]`, and 0x8000-0xBFFF reads
/// `cart[addr - 0x8000]`).
fn place(cart: &mut [u8], addr: u16, bytes: &[u8]) {
    let base = match addr {
        0x0000..=0x3FFF => 0,
        0x4000..=0x7FFF => 0x4000,
        _ => 0x8000,
    };
    let offset = (addr - base) as usize;
    cart[offset..offset + bytes.len()].copy_from_slice(bytes);
}

#[test]
fn call_ret_stack_sequence() {
    let mut cart = cart_bank();
    place(&mut cart, 0x0000, &[0x31, 0xF0, 0xDF]); // LD SP,0xDFF0
    place(&mut cart, 0x0003, &[0xC3, 0xA7, 0x7D]); // JP 0x7DA7
    place(&mut cart, 0x7DA7, &[0xCD, 0x02, 0x9E, 0x00]); // CALL 0x9E02 ; NOP
    place(&mut cart, 0x9E02, &[0xC9]); // RET

    let mut machine = Machine::new(MachineConfig {
        cart,
        use_manual_init: true,
        ..Default::default()
    })
    .unwrap();

    machine.run_cycles(1).unwrap(); // LD SP,0xDFF0
    assert_eq!(machine.cpu().sp, 0xDFF0);

    machine.run_cycles(1).unwrap(); // JP 0x7DA7
    assert_eq!(machine.cpu().pc, 0x7DA7);

    machine.run_cycles(1).unwrap(); // CALL 0x9E02
    assert_eq!(machine.cpu().pc, 0x9E02);
    assert_eq!(machine.cpu().sp, 0xDFEE);
    let state = machine.get_state();
    assert_eq!(state.bus.system_ram[0x1FEE], 0xAA);
    assert_eq!(state.bus.system_ram[0x1FEF], 0x7D);

    machine.run_cycles(1).unwrap(); // RET
    assert_eq!(machine.cpu().pc, 0x7DAA);
    assert_eq!(machine.cpu().sp, 0xDFF0);
}

#[test]
fn vblank_irq_wakes_halted_cpu() {
    let mut cart = cart_bank();
    place(&mut cart, 0x0000, &[0xFB, 0x76]); // EI ; HALT

    let mut machine = Machine::new(MachineConfig {
        cart,
        use_manual_init: true,
        ..Default::default()
    })
    .unwrap();

    let mut state = machine.get_state();
    state.vdp.regs[1] = 0x20; // VBlank IRQ enable only
    machine.set_state(state);

    machine.run_cycles(192 * 228).unwrap();
    machine.run_cycles(1).unwrap(); // one more step accepts the now-pending IRQ

    assert_eq!(machine.cpu().pc, 0x0038);
    assert!(!machine.cpu().halted);
}

#[test]
fn status_read_clears_vblank_and_reasserts_next_frame() {
    let mut vdp = Vdp::new();
    vdp.write_control(0x20);
    vdp.write_control(0x81); // R1 = 0x20 (VBlank IRQ enable)

    vdp.tick_cycles(228 * 192);
    assert!(vdp.has_irq());
    let status = vdp.read_status();
    assert_eq!(status & 0x80, 0x80);
    assert!(!vdp.has_irq());

    vdp.tick_cycles(228 * 10);
    assert!(!vdp.has_irq(), "no reassert within the same VBlank");

    vdp.tick_cycles(228 * (262 - 202 + 192));
    assert!(vdp.has_irq(), "reasserts at next frame's VBlank start");
}

#[test]
fn line_irq_fires_and_reloads_counter() {
    let mut vdp = Vdp::new();
    vdp.write_control(0x10);
    vdp.write_control(0x80); // R0 = 0x10 (line IRQ enable)
    vdp.write_control(0x01);
    vdp.write_control(0x8A); // R10 = 1 (reload value)

    vdp.tick_cycles(228 * 2);
    assert!(vdp.has_irq());
    let status = vdp.read_status();
    assert_eq!(status & 0x20, 0x20);
    assert!(!vdp.has_irq());

    // Counter reloads to R10 (1) each time it fires, so the next line IRQ
    // is again two lines away.
    vdp.tick_cycles(228 * 2);
    assert!(vdp.has_irq(), "line IRQ counter reloads and fires again");
}

#[test]
fn dd_66_d_updates_ixh_leaves_ixl_in_19_cycles() {
    let mut cart_vec = vec![0u8; 0x4000];
    cart_vec[0x1234] = 0xA5; // IX+0 lands in the cartridge's direct-mapped bank0 window
    let cart: Rc<[u8]> = Rc::from(cart_vec.into_boxed_slice());
    let mut bus = Bus::new(cart, None, true);
    let mut cpu = Cpu::new();
    cpu.ix = 0x1234;
    bus.write_byte(0xC000, 0xDD);
    bus.write_byte(0xC001, 0x66);
    bus.write_byte(0xC002, 0x00);
    cpu.pc = 0xC000;

    let result = cpu.step_one(&mut bus).unwrap();
    assert_eq!(cpu.ix, 0xA534);
    assert_eq!(result.cycles, 19);
}

#[test]
fn psg_latch_sequences_set_tone_and_noise_registers() {
    let mut psg = Psg::new();
    psg.write(0x85); // latch tone0, low nibble 0x5
    psg.write(0x2A); // continuation data byte (bit7 clear): high 6 bits 0x2A
    let state = psg.get_state();
    assert_eq!(state.tone_periods[0], (0x2A << 4) | 0x05);

    psg.write(0xE0 | 0x0B);
    let state = psg.get_state();
    assert_eq!(state.noise_control & 0x03, 3);
    assert_eq!(state.noise_control & 0x04, 0x04);

    psg.write(0xF0 | 0x0A);
    let state = psg.get_state();
    assert_eq!(state.noise_attenuation, 0x0A);
}

#[test]
fn bios_overlay_covers_0x0400_through_0x3fff_and_disables_one_way() {
    let mut bios = vec![0u8; 0x4000];
    bios[0x0400] = 0xA1;
    let mut cart = vec![0u8; 0x8000];
    cart[0x0000] = 0x55; // slot2 window (0x8000-0xBFFF) reads cart[addr-0x8000]
    let bus_cart: Rc<[u8]> = Rc::from(cart.into_boxed_slice());
    let bios_rc: Rc<[u8]> = Rc::from(bios.into_boxed_slice());
    let mut bus = Bus::new(bus_cart, Some(bios_rc), true);

    assert_eq!(bus.read_byte(0x0400), 0xA1, "BIOS overlay active over 0x0400-0x3FFF");
    assert_eq!(bus.read_byte(0x8000), 0x55, "slot2 window reads cartridge bank2");

    bus.io_write(0x3E, 0x04);
    assert_ne!(bus.read_byte(0x0400), 0xA1, "overlay disabled, falls through to cart");

    bus.write_byte(0xFFFC, 0x00);
    assert_ne!(bus.read_byte(0x0400), 0xA1, "disable is one-way, not re-armed by a clear write");
}
