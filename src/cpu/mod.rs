//! Z80 CPU implementation for the Sega Master System
//!
//! # Module Organization
//!
//! - `flags`: Flag bit constants for the F register
//! - `helpers`: Helper functions (register access, fetch, push/pop, ALU, flags)
//! - `execute`: Instruction execution functions (execute_x0, execute_cb, execute_ed, etc.)
//!
//! # Register Set
//!
//! This is a plain 16-bit Z80: no ADL/MBASE extended addressing, no suffix
//! opcodes, no prefetch buffer. Every register pair is a `u16`.
//!
//! # References
//! - Zilog Z80 CPU User Manual

use crate::bus::Bus;
use thiserror::Error;

// Module declarations
mod execute;
pub mod flags;
mod helpers;

#[cfg(test)]
mod tests;

// Re-exports for API compatibility
pub use flags::*;

/// Interrupt modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptMode {
    /// Mode 0: execute an instruction supplied on the data bus
    #[default]
    Mode0,
    /// Mode 1: fixed call to 0x0038
    Mode1,
    /// Mode 2: vectored via the I register and a byte on the data bus
    Mode2,
}

/// Per-access wait-state accounting.
#[derive(Debug, Clone, Copy)]
pub struct WaitConfig {
    /// Whether the SMS VDP-port wait model is active.
    pub sms_model: bool,
    /// If true, wait cycles are folded into the value `step_one` returns.
    /// If false, they're only observable via `get_last_wait_cycles`.
    pub include_wait_in_cycles: bool,
    /// Extra cycles charged for an IO access to a VDP port.
    pub vdp_penalty: u32,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            sms_model: true,
            include_wait_in_cycles: false,
            vdp_penalty: 4,
        }
    }
}

/// A single executed-instruction or accepted-interrupt trace record.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub pc_before: u16,
    pub opcode: Option<u8>,
    pub bytes: Vec<u8>,
    pub text: Option<String>,
    pub cycles: u32,
    pub irq_accepted: bool,
    pub nmi_accepted: bool,
    pub regs: Option<CpuState>,
}

/// Trace configuration, including the optional structured callback.
#[derive(Default)]
pub struct TraceConfig {
    pub on_trace: Option<Box<dyn FnMut(TraceEvent)>>,
    pub trace_disasm: bool,
    pub trace_regs: bool,
}

impl std::fmt::Debug for TraceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceConfig")
            .field("on_trace", &self.on_trace.is_some())
            .field("trace_disasm", &self.trace_disasm)
            .field("trace_regs", &self.trace_regs)
            .finish()
    }
}

/// Pure-observer debug hooks: the core must behave identically whether
/// these are set or not.
#[derive(Default)]
pub struct CpuDebugHooks {
    pub on_io_read: Option<Box<dyn FnMut(u16, u8)>>,
    pub on_io_write: Option<Box<dyn FnMut(u16, u8)>>,
    pub on_memory_read: Option<Box<dyn FnMut(u16, u8)>>,
    pub on_memory_write: Option<Box<dyn FnMut(u16, u8)>>,
    pub on_iff_change: Option<Box<dyn FnMut(bool, bool)>>,
}

impl std::fmt::Debug for CpuDebugHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuDebugHooks")
            .field("on_io_read", &self.on_io_read.is_some())
            .field("on_io_write", &self.on_io_write.is_some())
            .field("on_memory_read", &self.on_memory_read.is_some())
            .field("on_memory_write", &self.on_memory_write.is_some())
            .field("on_iff_change", &self.on_iff_change.is_some())
            .finish()
    }
}

/// The one runtime-fatal condition the interpreter can hit.
#[derive(Debug, Error)]
pub enum CpuError {
    #[error("unimplemented opcode {opcode:#04x} (prefix {prefix:?}) at pc {pc:#06x}")]
    UnimplementedOpcode {
        pc: u16,
        opcode: u8,
        prefix: Option<u8>,
    },
}

/// Result of a single `step_one` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepResult {
    pub cycles: u32,
    pub irq_accepted: bool,
    pub nmi_accepted: bool,
}

/// Plain, `Clone`-able snapshot of CPU state for `get_state`/`set_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CpuState {
    pub a: u8,
    pub f: u8,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub a_prime: u8,
    pub f_prime: u8,
    pub bc_prime: u16,
    pub de_prime: u16,
    pub hl_prime: u16,
    pub ix: u16,
    pub iy: u16,
    pub sp: u16,
    pub pc: u16,
    pub i: u8,
    pub r: u8,
    pub iff1: bool,
    pub iff2: bool,
    pub im: u8,
    pub halted: bool,
    pub ei_delay: u8,
    pub irq_pending: bool,
    pub nmi_pending: bool,
}

/// Z80 CPU state
pub struct Cpu {
    pub a: u8,
    pub f: u8,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,

    pub a_prime: u8,
    pub f_prime: u8,
    pub bc_prime: u16,
    pub de_prime: u16,
    pub hl_prime: u16,

    pub ix: u16,
    pub iy: u16,

    pub sp: u16,
    pub pc: u16,
    /// Interrupt vector base, used as the high byte of the IM2 pointer table.
    pub i: u8,
    /// Refresh register (bit 7 preserved across refresh increments)
    pub r: u8,

    pub iff1: bool,
    pub iff2: bool,
    pub im: InterruptMode,
    pub halted: bool,

    irq_pending: bool,
    irq_im0_opcode: Option<u8>,
    nmi_pending: bool,
    /// EI enables interrupts after the instruction following EI completes.
    ei_delay: u8,
    /// PC pushed at the most recent interrupt acceptance, consumed by a
    /// matching RET for the `compat_ret_restores_iff1` behavior.
    pending_return_pc: Option<u16>,

    /// Gates the RET-restores-IFF1 compatibility behavior.
    pub compat_ret_restores_iff1: bool,

    /// When set, a repeating block instruction (LDIR/CPIR/INIR/OTIR/...)
    /// runs every iteration in a single `step_one` call instead of backing
    /// PC up and returning one iteration's cost at a time. Every iteration
    /// still does exactly the same per-iteration work (refresh bump
    /// included), so the two modes are observationally identical.
    pub fast_blocks: bool,

    pub wait: WaitConfig,
    last_wait_cycles: u32,

    pub hooks: CpuDebugHooks,
    pub trace: TraceConfig,
}

impl Cpu {
    /// Create a new CPU in post-reset state (PC=0, SP=0, IM1, interrupts disabled).
    pub fn new() -> Self {
        let mut cpu = Self {
            a: 0,
            f: 0,
            bc: 0,
            de: 0,
            hl: 0,
            a_prime: 0,
            f_prime: 0,
            bc_prime: 0,
            de_prime: 0,
            hl_prime: 0,
            ix: 0,
            iy: 0,
            sp: 0,
            pc: 0,
            i: 0,
            r: 0,
            iff1: false,
            iff2: false,
            im: InterruptMode::Mode1,
            halted: false,
            irq_pending: false,
            irq_im0_opcode: None,
            nmi_pending: false,
            ei_delay: 0,
            pending_return_pc: None,
            compat_ret_restores_iff1: true,
            fast_blocks: false,
            wait: WaitConfig::default(),
            last_wait_cycles: 0,
            hooks: CpuDebugHooks::default(),
            trace: TraceConfig::default(),
        };
        cpu.reset();
        cpu
    }

    /// Reset to the BIOS-path post-reset state: PC=0, SP=0, IM1, IFF1=IFF2=false.
    /// The manual-init path (no BIOS present) is handled by `Machine`, which
    /// calls `set_state` afterward to install the post-BIOS-equivalent register
    /// values.
    pub fn reset(&mut self) {
        self.a = 0;
        self.f = 0;
        self.bc = 0;
        self.de = 0;
        self.hl = 0;
        self.a_prime = 0;
        self.f_prime = 0;
        self.bc_prime = 0;
        self.de_prime = 0;
        self.hl_prime = 0;
        self.ix = 0;
        self.iy = 0;
        self.sp = 0;
        self.pc = 0;
        self.i = 0;
        self.r = 0;
        self.iff1 = false;
        self.iff2 = false;
        self.im = InterruptMode::Mode1;
        self.halted = false;
        self.irq_pending = false;
        self.irq_im0_opcode = None;
        self.nmi_pending = false;
        self.ei_delay = 0;
        self.pending_return_pc = None;
        self.last_wait_cycles = 0;
    }

    /// Post an edge-triggered maskable interrupt request with an explicit IM0
    /// opcode. Idempotent until accepted.
    pub fn request_irq_im0(&mut self, opcode: u8) {
        self.irq_pending = true;
        self.irq_im0_opcode = Some(opcode);
    }

    /// Post an edge-triggered maskable interrupt request with no IM0 opcode
    /// supplied; falls back to RST 0x38 if accepted while in IM0.
    pub fn request_irq(&mut self) {
        self.irq_pending = true;
    }

    /// Post an edge-triggered non-maskable interrupt request.
    pub fn request_nmi(&mut self) {
        self.nmi_pending = true;
    }

    /// Wait cycles charged by the most recently executed access, independent
    /// of whether they were folded into the instruction's returned cycles.
    pub fn get_last_wait_cycles(&self) -> u32 {
        self.last_wait_cycles
    }

    pub(super) fn add_wait_cycles(&mut self, n: u32) {
        self.last_wait_cycles += n;
    }

    fn set_iff(&mut self, iff1: bool, iff2: bool) {
        if self.iff1 != iff1 || self.iff2 != iff2 {
            if let Some(hook) = self.hooks.on_iff_change.as_mut() {
                hook(iff1, iff2);
            }
        }
        self.iff1 = iff1;
        self.iff2 = iff2;
    }

    pub fn get_state(&self) -> CpuState {
        CpuState {
            a: self.a,
            f: self.f,
            bc: self.bc,
            de: self.de,
            hl: self.hl,
            a_prime: self.a_prime,
            f_prime: self.f_prime,
            bc_prime: self.bc_prime,
            de_prime: self.de_prime,
            hl_prime: self.hl_prime,
            ix: self.ix,
            iy: self.iy,
            sp: self.sp,
            pc: self.pc,
            i: self.i,
            r: self.r,
            iff1: self.iff1,
            iff2: self.iff2,
            im: match self.im {
                InterruptMode::Mode0 => 0,
                InterruptMode::Mode1 => 1,
                InterruptMode::Mode2 => 2,
            },
            halted: self.halted,
            ei_delay: self.ei_delay,
            irq_pending: self.irq_pending,
            nmi_pending: self.nmi_pending,
        }
    }

    pub fn set_state(&mut self, state: &CpuState) {
        self.a = state.a;
        self.f = state.f;
        self.bc = state.bc;
        self.de = state.de;
        self.hl = state.hl;
        self.a_prime = state.a_prime;
        self.f_prime = state.f_prime;
        self.bc_prime = state.bc_prime;
        self.de_prime = state.de_prime;
        self.hl_prime = state.hl_prime;
        self.ix = state.ix;
        self.iy = state.iy;
        self.sp = state.sp;
        self.pc = state.pc;
        self.i = state.i;
        self.r = state.r;
        self.iff1 = state.iff1;
        self.iff2 = state.iff2;
        self.im = match state.im {
            0 => InterruptMode::Mode0,
            1 => InterruptMode::Mode1,
            _ => InterruptMode::Mode2,
        };
        self.halted = state.halted;
        self.ei_delay = state.ei_delay;
        self.irq_pending = state.irq_pending;
        self.nmi_pending = state.nmi_pending;
        self.pending_return_pc = None;
    }

    /// Execute exactly one instruction, or accept one pending interrupt in
    /// place of an instruction.
    pub fn step_one(&mut self, bus: &mut Bus) -> Result<StepResult, CpuError> {
        self.last_wait_cycles = 0;

        // EI-delay commits one instruction after EI, before interrupts are checked.
        if self.ei_delay > 0 {
            self.ei_delay -= 1;
            if self.ei_delay == 0 {
                self.set_iff(true, true);
            }
        }

        if self.nmi_pending {
            self.nmi_pending = false;
            let cycles = self.handle_nmi(bus);
            self.emit_trace(None, self.pc, cycles, false, true);
            return Ok(StepResult {
                cycles,
                irq_accepted: false,
                nmi_accepted: true,
            });
        }

        if self.irq_pending && self.iff1 && self.ei_delay == 0 {
            self.irq_pending = false;
            let opcode = self.irq_im0_opcode.take();
            let cycles = self.handle_irq(bus, opcode);
            self.emit_trace(None, self.pc, cycles, true, false);
            return Ok(StepResult {
                cycles,
                irq_accepted: true,
                nmi_accepted: false,
            });
        }

        if self.halted {
            self.r = (self.r & 0x80) | (self.r.wrapping_add(1) & 0x7F);
            return Ok(StepResult {
                cycles: 4,
                irq_accepted: false,
                nmi_accepted: false,
            });
        }

        let pc_before = self.pc;
        let opcode = self.fetch_byte(bus);

        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;
        let p = (y >> 1) & 0x03;
        let q = y & 0x01;

        let mut cycles = match x {
            0 => self.execute_x0(bus, y, z, p, q),
            1 => {
                if y == 6 && z == 6 {
                    self.halted = true;
                    4
                } else {
                    let val = self.get_reg8(z, bus);
                    self.set_reg8(y, val, bus);
                    if y == 6 || z == 6 {
                        7
                    } else {
                        4
                    }
                }
            }
            2 => {
                let val = self.get_reg8(z, bus);
                self.execute_alu(y, val);
                if z == 6 {
                    7
                } else {
                    4
                }
            }
            3 => self.execute_x3(bus, y, z, p, q),
            _ => unreachable!("x is a 2-bit field"),
        };

        // "Included" wait accounting folds the charged wait cycles into the
        // instruction's own cycle count; "reported-only" leaves them visible
        // solely through `get_last_wait_cycles`.
        if self.wait.include_wait_in_cycles {
            cycles += self.last_wait_cycles;
        }

        self.emit_trace(Some(opcode), pc_before, cycles, false, false);

        Ok(StepResult {
            cycles,
            irq_accepted: false,
            nmi_accepted: false,
        })
    }

    fn emit_trace(
        &mut self,
        opcode: Option<u8>,
        pc_before: u16,
        cycles: u32,
        irq_accepted: bool,
        nmi_accepted: bool,
    ) {
        log::trace!(
            target: "sms_core::trace",
            "pc={:#06x} opcode={:?} cycles={} irq={} nmi={}",
            pc_before,
            opcode,
            cycles,
            irq_accepted,
            nmi_accepted
        );
        if self.trace.on_trace.is_some() {
            let regs = if self.trace.trace_regs {
                Some(self.get_state())
            } else {
                None
            };
            let event = TraceEvent {
                pc_before,
                opcode,
                bytes: Vec::new(),
                text: None,
                cycles,
                irq_accepted,
                nmi_accepted,
                regs,
            };
            if let Some(hook) = self.trace.on_trace.as_mut() {
                hook(event);
            }
        }
    }

    /// NMI: highest priority, always accepted; jumps to 0x0066.
    fn handle_nmi(&mut self, bus: &mut Bus) -> u32 {
        self.halted = false;
        let prior_iff1 = self.iff1;
        self.set_iff(false, prior_iff1);
        self.pending_return_pc = Some(self.pc);
        self.push_word(bus, self.pc);
        self.pc = 0x0066;
        11
    }

    /// Maskable interrupt acceptance, dispatched on the current interrupt mode.
    ///
    /// Unlike the eZ80 this was adapted from, IM2 here is genuinely
    /// vectored through the I register; IM0 executes whatever RST-style
    /// opcode the interrupt source supplied (falling back to RST 0x38 if
    /// none was given), and IM1 is the fixed 0x0038 vector.
    fn handle_irq(&mut self, bus: &mut Bus, im0_opcode: Option<u8>) -> u32 {
        self.halted = false;
        self.set_iff(false, false);

        match self.im {
            InterruptMode::Mode0 => {
                let opcode = im0_opcode.unwrap_or(0xFF);
                self.pending_return_pc = Some(self.pc);
                self.push_word(bus, self.pc);
                if (opcode & 0xC7) == 0xC7 {
                    let y = (opcode >> 3) & 0x07;
                    self.pc = (y as u16) * 8;
                } else {
                    self.pc = 0x0038;
                }
                13 + 2
            }
            InterruptMode::Mode1 => {
                self.pending_return_pc = Some(self.pc);
                self.push_word(bus, self.pc);
                self.pc = 0x0038;
                13
            }
            InterruptMode::Mode2 => {
                let bus_value = im0_opcode.unwrap_or(0xFF);
                let vector_addr = ((self.i as u16) << 8) | bus_value as u16;
                let lo = bus.read_byte(vector_addr) as u16;
                let hi = bus.read_byte(vector_addr.wrapping_add(1)) as u16;
                self.pending_return_pc = Some(self.pc);
                self.push_word(bus, self.pc);
                self.pc = lo | (hi << 8);
                19
            }
        }
    }

    /// Used by RETI/RETN and the RET-restores-IFF1 compatibility path.
    pub(super) fn restore_iff1_from_iff2(&mut self) {
        let iff2 = self.iff2;
        self.set_iff(iff2, iff2);
    }

    /// True if `pc` is exactly the PC pushed at the most recent interrupt
    /// acceptance; consumes the record so it only fires once.
    pub(super) fn returned_to_pending_pc(&mut self, pc: u16) -> bool {
        if self.pending_return_pc == Some(pc) {
            self.pending_return_pc = None;
            true
        } else {
            false
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
