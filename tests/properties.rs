//! Universal properties that should hold for any input, not just the
//! hand-picked scenarios in `scenarios.rs`.

use std::rc::Rc;

use proptest::prelude::*;

use sms_core::bus::Bus;
use sms_core::cpu::Cpu;
use sms_core::psg::{Psg, PsgState};
use sms_core::vdp::Vdp;
use sms_core::{Machine, MachineConfig};

fn cart_bank() -> Vec<u8> {
    vec![0u8; 0x4000]
}

// ---- Round-trip --------------------------------------------------------

#[test]
fn machine_state_round_trips_through_get_set() {
    let mut cart = cart_bank();
    cart[0] = 0x3E; // LD A,0x42
    cart[1] = 0x42;
    cart[2] = 0x76; // HALT

    let mut machine = Machine::new(MachineConfig {
        cart,
        use_manual_init: true,
        ..Default::default()
    })
    .unwrap();

    machine.run_cycles(8).unwrap();

    let s1 = machine.get_state();
    machine.set_state(s1.clone());
    let s2 = machine.get_state();
    assert_eq!(s1, s2);
}

// ---- Idempotent masking -------------------------------------------------

#[test]
fn psg_set_state_masks_out_of_range_bits_idempotently() {
    let mut psg = Psg::new();
    let dirty = PsgState {
        tone_periods: [0xFFFF, 0xFFFF, 0xFFFF],
        tone_counters: [0, 0, 0],
        tone_outputs: [false, false, false],
        tone_attenuations: [0xFF, 0xFF, 0xFF],
        noise_control: 0xFF,
        noise_counter: 0,
        noise_output: false,
        noise_attenuation: 0xFF,
        noise_lfsr: 0xFFFF,
        clock_accum: 0,
    };
    psg.set_state(dirty);
    let masked_once = psg.get_state();
    psg.set_state(masked_once.clone());
    let masked_twice = psg.get_state();

    assert_eq!(masked_once, masked_twice);
    assert_eq!(masked_once.tone_periods[0], 0x03FF);
    assert_eq!(masked_once.tone_attenuations[0], 0x0F);
    assert_eq!(masked_once.noise_control, 0xFF & 0x07);
}

// ---- Status clear --------------------------------------------------------

#[test]
fn status_read_clears_all_three_bits_and_irq() {
    let mut vdp = Vdp::new();
    let mut state = vdp.get_state();
    state.regs[0] = 0x10; // line IRQ enable
    state.regs[1] = 0x20; // VBlank IRQ enable
    state.regs[10] = 1; // reload value
    for i in 0..9usize {
        state.vram[i] = 0; // sprite Y (screen row 1 for every sprite's first row)
        state.vram[0x80 + i * 2] = 0; // X
        state.vram[0x80 + i * 2 + 1] = 0; // tile
    }
    vdp.set_state(state);

    vdp.tick_cycles(228 * 192);
    vdp.render_frame();

    let status = vdp.read_status();
    assert_eq!(status & 0x80, 0x80, "vblank bit set");
    assert_eq!(status & 0x40, 0x40, "overflow bit set from the 9th sprite on one line");
    assert_eq!(status & 0x20, 0x20, "line-irq-pending bit set");

    let status_again = vdp.read_status();
    assert_eq!(status_again & 0xE0, 0, "all three status bits clear on next read");
    assert!(!vdp.has_irq());
}

// ---- One-way BIOS disable -----------------------------------------------

#[test]
fn bios_disable_cannot_be_reversed_by_any_later_write() {
    let mut bios = vec![0u8; 0x4000];
    bios[0x0400] = 0xA1;
    let cart = vec![0u8; 0x4000];
    let bus_cart: Rc<[u8]> = Rc::from(cart.into_boxed_slice());
    let bios_rc: Rc<[u8]> = Rc::from(bios.into_boxed_slice());
    let mut bus = Bus::new(bus_cart, Some(bios_rc), true);

    bus.io_write(0x3E, 0x04);
    assert_ne!(bus.read_byte(0x0400), 0xA1);

    for val in [0x00u8, 0xFFu8, 0x04u8, 0xFBu8] {
        bus.write_byte(0xFFFC, val);
        assert_ne!(bus.read_byte(0x0400), 0xA1, "overlay never comes back, value {val:#x}");
    }
}

// ---- EI delay, generalized ------------------------------------------------

#[test]
fn ei_delay_gates_interrupt_acceptance_for_exactly_one_instruction() {
    let mut cart = cart_bank();
    cart[0] = 0xFB; // EI
    cart[1] = 0x00; // NOP
    cart[2] = 0x00; // NOP
    let cart_rc: Rc<[u8]> = Rc::from(cart.into_boxed_slice());
    let mut bus = Bus::new(cart_rc, None, true);
    let mut cpu = Cpu::new();
    cpu.iff1 = false;
    cpu.iff2 = false;
    cpu.request_irq();

    cpu.step_one(&mut bus).unwrap(); // EI
    let r = cpu.step_one(&mut bus).unwrap(); // NOP, still inside the EI delay window
    assert!(!r.irq_accepted);
    assert_eq!(cpu.pc, 2);

    let r2 = cpu.step_one(&mut bus).unwrap(); // IRQ now accepted instead of the 2nd NOP
    assert!(r2.irq_accepted);
}

// ---- VBlank edge, generalized ---------------------------------------------

#[test]
fn enabling_vblank_irq_mask_while_status_already_set_asserts_without_a_new_edge() {
    let mut vdp = Vdp::new();
    vdp.tick_cycles(228 * 192);
    assert!(!vdp.has_irq());

    let mut state = vdp.get_state();
    state.regs[1] = 0x20;
    vdp.set_state(state);

    assert!(vdp.has_irq());
}

// ---- Mapper mirror --------------------------------------------------------

#[test]
fn single_bank_cart_mirrors_across_all_three_cpu_windows() {
    let mut cart = vec![0u8; 0x4000];
    cart[0x0500] = 0x7E;
    let cart_rc: Rc<[u8]> = Rc::from(cart.into_boxed_slice());
    let mut bus = Bus::new(cart_rc, None, true);

    assert_eq!(bus.read_byte(0x0500), 0x7E);
    assert_eq!(bus.read_byte(0x4500), 0x7E);
    assert_eq!(bus.read_byte(0x8500), 0x7E);
}

// ---- Flag invariants (proptest) -------------------------------------------

fn expected_add_flags(a: u8, n: u8) -> u8 {
    let result16 = a as u16 + n as u16;
    let result = result16 as u8;
    let half = (a & 0x0F) + (n & 0x0F) > 0x0F;
    let overflow = ((a ^ n) & 0x80 == 0) && ((a ^ result) & 0x80 != 0);

    let mut f = 0u8;
    if result & 0x80 != 0 {
        f |= 0x80; // S
    }
    if result == 0 {
        f |= 0x40; // Z
    }
    f |= result & 0x28; // F5/F3 copied straight from the result
    if half {
        f |= 0x10; // H
    }
    if overflow {
        f |= 0x04; // P/V
    }
    if result16 > 0xFF {
        f |= 0x01; // C
    }
    f
}

proptest! {
    #[test]
    fn add_a_n_matches_closed_form_flags(a in any::<u8>(), n in any::<u8>()) {
        let mut cart = cart_bank();
        cart[0] = 0xC6; // ADD A,n
        cart[1] = n;
        let cart_rc: Rc<[u8]> = Rc::from(cart.into_boxed_slice());
        let mut bus = Bus::new(cart_rc, None, true);
        let mut cpu = Cpu::new();
        cpu.a = a;
        cpu.f = 0;

        cpu.step_one(&mut bus).unwrap();

        let expected_result = a.wrapping_add(n);
        prop_assert_eq!(cpu.a, expected_result);
        prop_assert_eq!(cpu.f, expected_add_flags(a, n));
    }
}

// ---- PSG determinism (proptest) -------------------------------------------

proptest! {
    #[test]
    fn psg_replay_is_deterministic(writes in prop::collection::vec(any::<u8>(), 0..24)) {
        let run = || {
            let mut psg = Psg::new();
            let mut samples = Vec::new();
            for (i, byte) in writes.iter().enumerate() {
                psg.write(*byte);
                if i % 3 == 0 {
                    psg.tick_cycles(16);
                }
                samples.push((psg.get_sample(), psg.get_state()));
            }
            samples
        };
        prop_assert_eq!(run(), run());
    }
}

// ---- Scheduler determinism (proptest) -------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn machine_replay_is_deterministic(
        program in prop::collection::vec(any::<u8>(), 64..256),
        cycles in 50u32..2000,
    ) {
        let run = || {
            let mut cart = cart_bank();
            cart[..program.len()].copy_from_slice(&program);
            let mut machine = Machine::new(MachineConfig {
                cart,
                use_manual_init: true,
                ..Default::default()
            })
            .unwrap();
            machine.run_cycles(cycles).unwrap();
            machine.get_state()
        };
        prop_assert_eq!(run(), run());
    }
}
