//! Top-level machine: owns the CPU and Bus, and drives device timing from
//! consumed CPU cycles.
//!
//! Replaces the teacher's `emu.rs` (orchestrator shape) and `scheduler.rs`
//! (cycle-forwarding contract), simplified from the teacher's general
//! multi-clock-domain scheduler down to the single CPU-cycle-driven model
//! this spec needs (see DESIGN.md).

use std::rc::Rc;

use log::{error, info};
use thiserror::Error;

use crate::bus::{Bus, BusState, ControllerState};
use crate::cpu::{Cpu, CpuDebugHooks, CpuError, CpuState, StepResult, TraceConfig, WaitConfig};
use crate::psg::PsgState;
use crate::vdp::VdpState;

/// Fatal construction-time configuration errors (§7/§11).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cartridge ROM too small: {size} bytes (minimum one 16 KiB bank)")]
    RomTooSmall { size: usize },
    #[error("BIOS image size {size} is not one of 8/16/32 KiB")]
    InvalidBiosSize { size: usize },
    #[error("cartridge RAM bank {bank} out of range")]
    CartRamBankOutOfRange { bank: u8 },
}

/// Wait-state accounting configuration (§4.1/§12).
#[derive(Debug, Clone, Copy)]
pub struct WaitConfigOpt {
    pub sms_model: bool,
    pub include_wait_in_cycles: bool,
    pub vdp_penalty: u32,
}

impl Default for WaitConfigOpt {
    fn default() -> Self {
        Self {
            sms_model: true,
            include_wait_in_cycles: false,
            vdp_penalty: 4,
        }
    }
}

/// Full machine configuration, §6/§12.
pub struct MachineConfig {
    pub cart: Vec<u8>,
    pub bios: Option<Vec<u8>>,
    pub allow_cart_ram: bool,
    pub use_manual_init: bool,
    pub wait: WaitConfigOpt,
    pub fast_blocks: bool,
    pub trace: TraceConfig,
    pub cpu_debug_hooks: CpuDebugHooks,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            cart: Vec::new(),
            bios: None,
            allow_cart_ram: true,
            use_manual_init: false,
            wait: WaitConfigOpt::default(),
            fast_blocks: false,
            trace: TraceConfig::default(),
            cpu_debug_hooks: CpuDebugHooks::default(),
        }
    }
}

/// Plain, `Clone`-able snapshot of the whole machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineState {
    pub cpu: CpuState,
    pub vdp: VdpState,
    pub psg: PsgState,
    pub bus: BusState,
}

/// Owns CPU, Bus (which in turn owns VDP and PSG), and runs the
/// cycle-forwarding scheduler described in §4.5.
pub struct Machine {
    cpu: Cpu,
    bus: Bus,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Result<Self, ConfigError> {
        if config.cart.len() < crate::bus::CART_BANK_SIZE {
            return Err(ConfigError::RomTooSmall { size: config.cart.len() });
        }
        if let Some(bios) = &config.bios {
            if !matches!(bios.len(), 0x2000 | 0x4000 | 0x8000) {
                return Err(ConfigError::InvalidBiosSize { size: bios.len() });
            }
        }

        let cart: Rc<[u8]> = Rc::from(config.cart.into_boxed_slice());
        let bios: Option<Rc<[u8]>> = config.bios.map(|b| Rc::from(b.into_boxed_slice()));
        let mut bus = Bus::new(cart, bios.clone(), config.allow_cart_ram);

        let mut cpu = Cpu::new();
        cpu.compat_ret_restores_iff1 = true;
        cpu.fast_blocks = config.fast_blocks;
        cpu.wait = WaitConfig {
            sms_model: config.wait.sms_model,
            include_wait_in_cycles: config.wait.include_wait_in_cycles,
            vdp_penalty: config.wait.vdp_penalty,
        };
        cpu.trace = config.trace;
        cpu.hooks = config.cpu_debug_hooks;

        if bios.is_none() || config.use_manual_init {
            Self::manual_init(&mut cpu, &mut bus);
            info!("machine: manual-init path (no BIOS or use_manual_init requested)");
        } else {
            cpu.reset();
            info!("machine: BIOS-init path, overlay enabled at reset");
        }

        Ok(Self { cpu, bus })
    }

    /// Programs CPU flags and VDP registers to mimic a post-BIOS machine
    /// state, per §3's manual-init lifecycle path.
    fn manual_init(cpu: &mut Cpu, bus: &mut Bus) {
        cpu.reset();
        cpu.iff1 = true;
        cpu.iff2 = true;
        bus.vdp.manual_init();
    }

    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.reset();
    }

    pub fn set_controller_state(&mut self, which: u8, state: ControllerState) {
        self.bus.set_controller_state(which, state);
    }

    /// Advance the CPU until at least `target` cycles have been consumed,
    /// forwarding each instruction's cycles to VDP then PSG and raising an
    /// IRQ from the VDP's line whenever it is asserted and not already
    /// latched on the CPU (§4.5).
    pub fn run_cycles(&mut self, target: u32) -> Result<u32, CpuError> {
        let mut consumed = 0u32;
        while consumed < target {
            let StepResult { cycles, .. } = match self.cpu.step_one(&mut self.bus) {
                Ok(result) => result,
                Err(err) => {
                    error!("machine: fatal CPU error: {err}");
                    return Err(err);
                }
            };
            consumed += cycles;

            self.bus.vdp.tick_cycles(cycles);
            self.bus.psg.tick_cycles(cycles);

            if self.bus.vdp.has_irq() {
                self.cpu.request_irq();
            }
        }
        Ok(consumed)
    }

    pub fn render_frame(&mut self) -> Vec<u8> {
        self.bus.vdp.render_frame()
    }

    pub fn get_sample(&self) -> i16 {
        self.bus.psg.get_sample()
    }

    pub fn get_state(&self) -> MachineState {
        MachineState {
            cpu: self.cpu.get_state(),
            vdp: self.bus.vdp.get_state(),
            psg: self.bus.psg.get_state(),
            bus: self.bus.get_state(),
        }
    }

    pub fn set_state(&mut self, state: MachineState) {
        self.cpu.set_state(&state.cpu);
        self.bus.vdp.set_state(state.vdp);
        self.bus.psg.set_state(state.psg);
        self.bus.set_state(state.bus);
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn fast_blocks(&self) -> bool {
        self.cpu.fast_blocks
    }
}
