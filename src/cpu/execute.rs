//! Instruction execution for the Z80 interpreter
//!
//! Organized by the x/y/z/p/q opcode decomposition documented in the Zilog
//! user manual appendix: `x = opcode[7:6]`, `y = opcode[5:3]`, `z = opcode[2:0]`,
//! `p = y[2:1]`, `q = y[0]`.

use super::flags;
use super::Cpu;
use crate::bus::Bus;

impl Cpu {
    // ========== 16-bit ALU (ADD/ADC/SBC HL,rp and ADD IX/IY,rp) ==========

    /// ADD HL,rp / ADD IX,rp: only H, N, C are affected; S, Z, P/V untouched.
    pub(super) fn add16(&mut self, x: u16, y: u16) -> u16 {
        let result = x as u32 + y as u32;
        let half = ((x & 0x0FFF) + (y & 0x0FFF)) > 0x0FFF;
        let r16 = result as u16;
        self.set_flag_h(half);
        self.set_flag_n(false);
        self.set_flag_c(result > 0xFFFF);
        self.f = (self.f & !(flags::F5 | flags::F3)) | (((r16 >> 8) as u8) & (flags::F5 | flags::F3));
        r16
    }

    /// ADC HL,rp: full flag set (S, Z, H, P/V, N, C).
    pub(super) fn adc16(&mut self, x: u16, y: u16) -> u16 {
        let c = if self.flag_c() { 1u32 } else { 0 };
        let result = x as u32 + y as u32 + c;
        let half = ((x & 0x0FFF) + (y & 0x0FFF) + c as u16) > 0x0FFF;
        let r16 = result as u16;
        let overflow = ((x ^ y) & 0x8000 == 0) && ((x ^ r16) & 0x8000 != 0);
        self.f = 0;
        self.set_flag_s(r16 & 0x8000 != 0);
        self.set_flag_z(r16 == 0);
        self.f |= ((r16 >> 8) as u8) & (flags::F5 | flags::F3);
        self.set_flag_h(half);
        self.set_flag_pv(overflow);
        self.set_flag_n(false);
        self.set_flag_c(result > 0xFFFF);
        r16
    }

    /// SBC HL,rp: full flag set (S, Z, H, P/V, N, C).
    pub(super) fn sbc16(&mut self, x: u16, y: u16) -> u16 {
        let c = if self.flag_c() { 1i32 } else { 0 };
        let raw = x as i32 - y as i32 - c;
        let r16 = (raw & 0xFFFF) as u16;
        let half = (x & 0x0FFF) < (y & 0x0FFF) + c as u16;
        let overflow = ((x ^ y) & 0x8000 != 0) && ((x ^ r16) & 0x8000 != 0);
        self.f = 0;
        self.set_flag_s(r16 & 0x8000 != 0);
        self.set_flag_z(r16 == 0);
        self.f |= ((r16 >> 8) as u8) & (flags::F5 | flags::F3);
        self.set_flag_h(half);
        self.set_flag_pv(overflow);
        self.set_flag_n(true);
        self.set_flag_c(raw < 0);
        r16
    }

    fn daa(&mut self) {
        let a = self.a;
        let n = self.flag_n();
        let h = self.flag_h();
        let c = self.flag_c();
        let mut correction: u8 = 0;
        let mut carry = c;
        if h || (a & 0x0F) > 9 {
            correction |= 0x06;
        }
        if c || a > 0x99 {
            correction |= 0x60;
            carry = true;
        }
        let result = if n {
            a.wrapping_sub(correction)
        } else {
            a.wrapping_add(correction)
        };
        let half = if n {
            h && (a & 0x0F) < 6
        } else {
            (a & 0x0F) + (correction & 0x06) > 0x0F
        };
        self.a = result;
        self.set_sz_flags(result);
        self.set_flag_h(half);
        self.set_flag_pv(Self::parity(result));
        self.set_flag_n(n);
        self.set_flag_c(carry);
    }

    // ========== x=0 block: 0x00-0x3F ==========

    pub(super) fn execute_x0(&mut self, bus: &mut Bus, y: u8, z: u8, p: u8, q: u8) -> u32 {
        match z {
            0 => match y {
                0 => 4, // NOP
                1 => {
                    self.ex_af();
                    4
                }
                2 => {
                    // DJNZ d
                    let d = self.fetch_byte(bus) as i8;
                    self.set_b(self.b().wrapping_sub(1));
                    if self.b() != 0 {
                        self.pc = self.pc.wrapping_add(d as i16 as u16);
                        13
                    } else {
                        8
                    }
                }
                3 => {
                    let d = self.fetch_byte(bus) as i8;
                    self.pc = self.pc.wrapping_add(d as i16 as u16);
                    12
                }
                _ => {
                    // JR cc,d (y=4..7 -> NZ,Z,NC,C)
                    let d = self.fetch_byte(bus) as i8;
                    if self.check_cc(y - 4) {
                        self.pc = self.pc.wrapping_add(d as i16 as u16);
                        12
                    } else {
                        7
                    }
                }
            },
            1 => {
                if q == 0 {
                    let nn = self.fetch_word(bus);
                    self.set_rp(p, nn);
                    10
                } else {
                    let hl = self.hl;
                    let rp = self.get_rp(p);
                    self.hl = self.add16(hl, rp);
                    11
                }
            }
            2 => {
                if q == 0 {
                    match p {
                        0 => {
                            bus.write_byte(self.bc, self.a);
                            7
                        }
                        1 => {
                            bus.write_byte(self.de, self.a);
                            7
                        }
                        2 => {
                            let addr = self.fetch_word(bus);
                            bus.write_byte(addr, self.hl as u8);
                            bus.write_byte(addr.wrapping_add(1), (self.hl >> 8) as u8);
                            16
                        }
                        _ => {
                            let addr = self.fetch_word(bus);
                            bus.write_byte(addr, self.a);
                            13
                        }
                    }
                } else {
                    match p {
                        0 => {
                            self.a = bus.read_byte(self.bc);
                            7
                        }
                        1 => {
                            self.a = bus.read_byte(self.de);
                            7
                        }
                        2 => {
                            let addr = self.fetch_word(bus);
                            let lo = bus.read_byte(addr) as u16;
                            let hi = bus.read_byte(addr.wrapping_add(1)) as u16;
                            self.hl = lo | (hi << 8);
                            16
                        }
                        _ => {
                            let addr = self.fetch_word(bus);
                            self.a = bus.read_byte(addr);
                            13
                        }
                    }
                }
            }
            3 => {
                let val = self.get_rp(p);
                let result = if q == 0 {
                    val.wrapping_add(1)
                } else {
                    val.wrapping_sub(1)
                };
                self.set_rp(p, result);
                6
            }
            4 => {
                let val = self.get_reg8(y, bus);
                let result = self.alu_inc(val);
                self.set_reg8(y, result, bus);
                if y == 6 {
                    11
                } else {
                    4
                }
            }
            5 => {
                let val = self.get_reg8(y, bus);
                let result = self.alu_dec(val);
                self.set_reg8(y, result, bus);
                if y == 6 {
                    11
                } else {
                    4
                }
            }
            6 => {
                let n = self.fetch_byte(bus);
                self.set_reg8(y, n, bus);
                if y == 6 {
                    10
                } else {
                    7
                }
            }
            _ => {
                match y {
                    0 => {
                        // RLCA
                        let c = self.a & 0x80 != 0;
                        self.a = self.a.rotate_left(1);
                        self.f = (self.f & (flags::S | flags::Z | flags::PV))
                            | (self.a & (flags::F5 | flags::F3));
                        self.set_flag_c(c);
                    }
                    1 => {
                        // RRCA
                        let c = self.a & 0x01 != 0;
                        self.a = self.a.rotate_right(1);
                        self.f = (self.f & (flags::S | flags::Z | flags::PV))
                            | (self.a & (flags::F5 | flags::F3));
                        self.set_flag_c(c);
                    }
                    2 => {
                        // RLA
                        let c_in = self.flag_c();
                        let c = self.a & 0x80 != 0;
                        self.a = (self.a << 1) | (c_in as u8);
                        self.f = (self.f & (flags::S | flags::Z | flags::PV))
                            | (self.a & (flags::F5 | flags::F3));
                        self.set_flag_c(c);
                    }
                    3 => {
                        // RRA
                        let c_in = self.flag_c();
                        let c = self.a & 0x01 != 0;
                        self.a = (self.a >> 1) | ((c_in as u8) << 7);
                        self.f = (self.f & (flags::S | flags::Z | flags::PV))
                            | (self.a & (flags::F5 | flags::F3));
                        self.set_flag_c(c);
                    }
                    4 => self.daa(),
                    5 => {
                        // CPL
                        self.a = !self.a;
                        self.f = (self.f & (flags::S | flags::Z | flags::PV))
                            | (self.a & (flags::F5 | flags::F3))
                            | flags::H
                            | flags::N;
                    }
                    6 => {
                        // SCF
                        self.f = (self.f & (flags::S | flags::Z | flags::PV))
                            | (self.a & (flags::F5 | flags::F3))
                            | flags::C;
                    }
                    _ => {
                        // CCF
                        let old_c = self.flag_c();
                        self.f = (self.f & (flags::S | flags::Z | flags::PV))
                            | (self.a & (flags::F5 | flags::F3));
                        self.set_flag_h(old_c);
                        self.set_flag_c(!old_c);
                    }
                }
                4
            }
        }
    }

    // ========== x=2 block: ALU A,r ==========

    pub(super) fn execute_alu(&mut self, y: u8, val: u8) {
        match y {
            0 => {
                self.a = self.alu_add(val, false);
            }
            1 => {
                self.a = self.alu_add(val, true);
            }
            2 => {
                self.a = self.alu_sub(val, false, true);
            }
            3 => {
                self.a = self.alu_sub(val, true, true);
            }
            4 => self.alu_and(val),
            5 => self.alu_xor(val),
            6 => self.alu_or(val),
            _ => {
                self.alu_sub(val, false, false);
            }
        }
    }

    // ========== x=3 block: 0xC0-0xFF ==========

    pub(super) fn execute_x3(&mut self, bus: &mut Bus, y: u8, z: u8, p: u8, q: u8) -> u32 {
        match z {
            0 => {
                if self.check_cc(y) {
                    let addr = self.pop_word(bus);
                    self.pc = addr;
                    if self.compat_ret_restores_iff1 && self.returned_to_pending_pc(addr) {
                        self.restore_iff1_from_iff2();
                    }
                    11
                } else {
                    5
                }
            }
            1 => {
                if q == 0 {
                    let val = self.pop_word(bus);
                    self.set_rp2(p, val);
                    10
                } else {
                    match p {
                        0 => {
                            let addr = self.pop_word(bus);
                            self.pc = addr;
                            if self.compat_ret_restores_iff1 && self.returned_to_pending_pc(addr) {
                                self.restore_iff1_from_iff2();
                            }
                            10
                        }
                        1 => {
                            self.exx();
                            4
                        }
                        2 => {
                            self.pc = self.hl;
                            4
                        }
                        _ => {
                            self.sp = self.hl;
                            6
                        }
                    }
                }
            }
            2 => {
                let addr = self.fetch_word(bus);
                if self.check_cc(y) {
                    self.pc = addr;
                }
                10
            }
            3 => match y {
                0 => {
                    self.pc = self.fetch_word(bus);
                    10
                }
                1 => self.execute_cb(bus),
                2 => {
                    let n = self.fetch_byte(bus);
                    let port = ((self.a as u16) << 8) | n as u16;
                    let a = self.a;
                    self.io_out(bus, port, a);
                    11
                }
                3 => {
                    let n = self.fetch_byte(bus);
                    let port = ((self.a as u16) << 8) | n as u16;
                    self.a = self.io_in(bus, port);
                    11
                }
                4 => {
                    let lo = bus.read_byte(self.sp);
                    let hi = bus.read_byte(self.sp.wrapping_add(1));
                    let mem_val = lo as u16 | ((hi as u16) << 8);
                    bus.write_byte(self.sp, self.hl as u8);
                    bus.write_byte(self.sp.wrapping_add(1), (self.hl >> 8) as u8);
                    self.hl = mem_val;
                    19
                }
                5 => {
                    self.ex_de_hl();
                    4
                }
                6 => {
                    self.ei_delay = 0;
                    self.set_iff(false, false);
                    4
                }
                _ => {
                    self.ei_delay = 2;
                    4
                }
            },
            4 => {
                let addr = self.fetch_word(bus);
                if self.check_cc(y) {
                    self.push_word(bus, self.pc);
                    self.pc = addr;
                    17
                } else {
                    10
                }
            }
            5 => {
                if q == 0 {
                    let val = self.get_rp2(p);
                    self.push_word(bus, val);
                    11
                } else {
                    match p {
                        0 => {
                            let addr = self.fetch_word(bus);
                            self.push_word(bus, self.pc);
                            self.pc = addr;
                            17
                        }
                        1 => self.execute_index(bus, true),
                        2 => self.execute_ed(bus),
                        _ => self.execute_index(bus, false),
                    }
                }
            }
            6 => {
                let n = self.fetch_byte(bus);
                self.execute_alu(y, n);
                7
            }
            _ => {
                self.push_word(bus, self.pc);
                self.pc = (y as u16) * 8;
                11
            }
        }
    }

    // ========== CB-prefixed: rotate/shift, BIT, RES, SET ==========

    pub(super) fn execute_rot(&mut self, op: u8, val: u8) -> u8 {
        let (result, carry) = match op {
            0 => (val.rotate_left(1), val & 0x80 != 0),
            1 => (val.rotate_right(1), val & 0x01 != 0),
            2 => {
                let c_in = self.flag_c();
                ((val << 1) | (c_in as u8), val & 0x80 != 0)
            }
            3 => {
                let c_in = self.flag_c();
                ((val >> 1) | ((c_in as u8) << 7), val & 0x01 != 0)
            }
            4 => (val << 1, val & 0x80 != 0),
            5 => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
            6 => ((val << 1) | 1, val & 0x80 != 0), // undocumented SLL
            _ => (val >> 1, val & 0x01 != 0),
        };
        self.f = 0;
        self.set_sz_flags(result);
        self.set_flag_h(false);
        self.set_flag_n(false);
        self.set_flag_pv(Self::parity(result));
        self.set_flag_c(carry);
        result
    }

    fn execute_bit(&mut self, b: u8, val: u8, f3f5_source: u8) {
        let bit_set = val & (1 << b) != 0;
        self.set_flag_z(!bit_set);
        self.set_flag_s(b == 7 && bit_set);
        self.set_flag_h(true);
        self.set_flag_n(false);
        self.set_flag_pv(!bit_set);
        self.f = (self.f & !(flags::F5 | flags::F3)) | (f3f5_source & (flags::F5 | flags::F3));
    }

    pub(super) fn execute_cb(&mut self, bus: &mut Bus) -> u32 {
        let opcode = self.fetch_byte(bus);
        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;
        let val = self.get_reg8(z, bus);

        match x {
            0 => {
                let result = self.execute_rot(y, val);
                self.set_reg8(z, result, bus);
                if z == 6 {
                    15
                } else {
                    8
                }
            }
            1 => {
                let f3f5_source = if z == 6 { (self.hl >> 8) as u8 } else { val };
                self.execute_bit(y, val, f3f5_source);
                if z == 6 {
                    12
                } else {
                    8
                }
            }
            2 => {
                let result = val & !(1 << y);
                self.set_reg8(z, result, bus);
                if z == 6 {
                    15
                } else {
                    8
                }
            }
            _ => {
                let result = val | (1 << y);
                self.set_reg8(z, result, bus);
                if z == 6 {
                    15
                } else {
                    8
                }
            }
        }
    }

    // ========== ED-prefixed ==========

    pub(super) fn execute_ed(&mut self, bus: &mut Bus) -> u32 {
        let opcode = self.fetch_byte(bus);
        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;

        match x {
            1 => self.execute_ed_x1(bus, y, z),
            2 if y >= 4 && z <= 3 => self.execute_bli(bus, y, z),
            _ => 8, // undefined ED opcode: documented as a no-op (NONI)
        }
    }

    pub(super) fn execute_ed_x1(&mut self, bus: &mut Bus, y: u8, z: u8) -> u32 {
        let p = (y >> 1) & 0x03;
        let q = y & 0x01;

        match z {
            0 => {
                let port = self.bc;
                let val = self.io_in(bus, port);
                if y != 6 {
                    self.set_reg8(y, val, bus);
                }
                let old_c = self.flag_c();
                self.f = 0;
                self.set_sz_flags(val);
                self.set_flag_h(false);
                self.set_flag_pv(Self::parity(val));
                self.set_flag_n(false);
                self.set_flag_c(old_c);
                12
            }
            1 => {
                let port = self.bc;
                let val = if y == 6 { 0 } else { self.get_reg8(y, bus) };
                self.io_out(bus, port, val);
                12
            }
            2 => {
                let hl = self.hl;
                let rp = self.get_rp(p);
                self.hl = if q == 0 {
                    self.sbc16(hl, rp)
                } else {
                    self.adc16(hl, rp)
                };
                15
            }
            3 => {
                let addr = self.fetch_word(bus);
                if q == 0 {
                    let val = self.get_rp(p);
                    bus.write_byte(addr, val as u8);
                    bus.write_byte(addr.wrapping_add(1), (val >> 8) as u8);
                } else {
                    let lo = bus.read_byte(addr) as u16;
                    let hi = bus.read_byte(addr.wrapping_add(1)) as u16;
                    self.set_rp(p, lo | (hi << 8));
                }
                20
            }
            4 => {
                // NEG
                let a = self.a;
                let result = 0u8.wrapping_sub(a);
                self.f = 0;
                self.set_sz_flags(result);
                self.set_flag_h((a & 0x0F) != 0);
                self.set_flag_pv(a == 0x80);
                self.set_flag_n(true);
                self.set_flag_c(a != 0);
                self.a = result;
                8
            }
            5 => {
                // RETN (y!=1) / RETI (y==1): both restore IFF1 from IFF2
                let addr = self.pop_word(bus);
                self.pc = addr;
                self.restore_iff1_from_iff2();
                14
            }
            6 => {
                self.im = match y {
                    2 | 6 => super::InterruptMode::Mode1,
                    3 | 7 => super::InterruptMode::Mode2,
                    _ => super::InterruptMode::Mode0,
                };
                8
            }
            _ => match y {
                0 => {
                    self.i = self.a;
                    9
                }
                1 => {
                    self.r = self.a;
                    9
                }
                2 => {
                    let val = self.i;
                    let old_c = self.flag_c();
                    let iff2 = self.iff2;
                    self.a = val;
                    self.f = 0;
                    self.set_sz_flags(val);
                    self.set_flag_h(false);
                    self.set_flag_pv(iff2);
                    self.set_flag_n(false);
                    self.set_flag_c(old_c);
                    9
                }
                3 => {
                    let val = self.r;
                    let old_c = self.flag_c();
                    let iff2 = self.iff2;
                    self.a = val;
                    self.f = 0;
                    self.set_sz_flags(val);
                    self.set_flag_h(false);
                    self.set_flag_pv(iff2);
                    self.set_flag_n(false);
                    self.set_flag_c(old_c);
                    9
                }
                4 => {
                    // RRD
                    let mem = bus.read_byte(self.hl);
                    let new_mem = (mem >> 4) | ((self.a & 0x0F) << 4);
                    let new_a = (self.a & 0xF0) | (mem & 0x0F);
                    bus.write_byte(self.hl, new_mem);
                    let old_c = self.flag_c();
                    self.a = new_a;
                    self.f = 0;
                    self.set_sz_flags(new_a);
                    self.set_flag_h(false);
                    self.set_flag_pv(Self::parity(new_a));
                    self.set_flag_n(false);
                    self.set_flag_c(old_c);
                    18
                }
                5 => {
                    // RLD
                    let mem = bus.read_byte(self.hl);
                    let new_mem = ((mem << 4) & 0xF0) | (self.a & 0x0F);
                    let new_a = (self.a & 0xF0) | ((mem >> 4) & 0x0F);
                    bus.write_byte(self.hl, new_mem);
                    let old_c = self.flag_c();
                    self.a = new_a;
                    self.f = 0;
                    self.set_sz_flags(new_a);
                    self.set_flag_h(false);
                    self.set_flag_pv(Self::parity(new_a));
                    self.set_flag_n(false);
                    self.set_flag_c(old_c);
                    18
                }
                _ => 8,
            },
        }
    }

    // ========== Block instructions (LDI/LDD/CPI/CPD/INI/IND/OUTI/OUTD + repeats) ==========

    pub(super) fn execute_bli(&mut self, bus: &mut Bus, y: u8, z: u8) -> u32 {
        match z {
            0 => self.bli_ld(bus, y),
            1 => self.bli_cp(bus, y),
            2 => self.bli_in(bus, y),
            _ => self.bli_out(bus, y),
        }
    }

    /// Bumps R the same way a real M1 refresh cycle would for one repeat
    /// iteration of a block instruction.
    fn bump_r_for_block_repeat(&mut self) {
        self.r = (self.r & 0x80) | ((self.r.wrapping_add(2)) & 0x7F);
    }

    fn bli_ld(&mut self, bus: &mut Bus, y: u8) -> u32 {
        let inc = y == 4 || y == 6;
        let repeating = y >= 6;
        let mut total = 0;
        loop {
            let val = bus.read_byte(self.hl);
            bus.write_byte(self.de, val);
            self.hl = if inc {
                self.hl.wrapping_add(1)
            } else {
                self.hl.wrapping_sub(1)
            };
            self.de = if inc {
                self.de.wrapping_add(1)
            } else {
                self.de.wrapping_sub(1)
            };
            self.bc = self.bc.wrapping_sub(1);

            let n = val.wrapping_add(self.a);
            let old_s = self.flag_s();
            let old_z = self.flag_z();
            let old_c = self.flag_c();
            self.f = 0;
            self.set_flag_s(old_s);
            self.set_flag_z(old_z);
            self.set_flag_h(false);
            self.f |= (n << 4) & flags::F5; // bit 1 of n -> F5
            self.f |= n & flags::F3; // bit 3 of n -> F3
            self.set_flag_pv(self.bc != 0);
            self.set_flag_n(false);
            self.set_flag_c(old_c);

            if repeating && self.bc != 0 {
                self.bump_r_for_block_repeat();
                total += 21;
                if self.fast_blocks {
                    continue;
                }
                self.pc = self.pc.wrapping_sub(2);
            } else {
                total += 16;
            }
            return total;
        }
    }

    fn bli_cp(&mut self, bus: &mut Bus, y: u8) -> u32 {
        let inc = y == 4 || y == 6;
        let repeating = y >= 6;
        let mut total = 0;
        loop {
            let val = bus.read_byte(self.hl);
            self.hl = if inc {
                self.hl.wrapping_add(1)
            } else {
                self.hl.wrapping_sub(1)
            };
            self.bc = self.bc.wrapping_sub(1);

            let result = self.a.wrapping_sub(val);
            let half = (self.a & 0x0F) < (val & 0x0F);
            let n = result.wrapping_sub(if half { 1 } else { 0 });

            let old_c = self.flag_c();
            self.f = 0;
            self.set_sz_flags(result);
            self.f &= !(flags::F5 | flags::F3);
            self.f |= (n << 4) & flags::F5;
            self.f |= n & flags::F3;
            self.set_flag_h(half);
            self.set_flag_pv(self.bc != 0);
            self.set_flag_n(true);
            self.set_flag_c(old_c);

            let should_repeat = repeating && self.bc != 0 && result != 0;
            if should_repeat {
                self.bump_r_for_block_repeat();
                total += 21;
                if self.fast_blocks {
                    continue;
                }
                self.pc = self.pc.wrapping_sub(2);
            } else {
                total += 16;
            }
            return total;
        }
    }

    fn bli_in(&mut self, bus: &mut Bus, y: u8) -> u32 {
        let inc = y == 4 || y == 6;
        let repeating = y >= 6;
        let mut total = 0;
        loop {
            let port = self.bc;
            let val = self.io_in(bus, port);
            bus.write_byte(self.hl, val);
            self.hl = if inc {
                self.hl.wrapping_add(1)
            } else {
                self.hl.wrapping_sub(1)
            };
            let c_adj = if inc {
                self.c().wrapping_add(1)
            } else {
                self.c().wrapping_sub(1)
            };
            self.set_b(self.b().wrapping_sub(1));

            let hc = val as u16 + c_adj as u16;
            self.f = 0;
            self.set_flag_s(self.b() & 0x80 != 0);
            self.set_flag_z(self.b() == 0);
            self.set_flag_h(hc > 0xFF);
            self.set_flag_pv(Self::parity(((hc as u8) & 0x07) ^ self.b()));
            self.set_flag_n(val & 0x80 != 0);
            self.set_flag_c(hc > 0xFF);

            if repeating && self.b() != 0 {
                self.bump_r_for_block_repeat();
                total += 21;
                if self.fast_blocks {
                    continue;
                }
                self.pc = self.pc.wrapping_sub(2);
            } else {
                total += 16;
            }
            return total;
        }
    }

    fn bli_out(&mut self, bus: &mut Bus, y: u8) -> u32 {
        let inc = y == 4 || y == 6;
        let repeating = y >= 6;
        let mut total = 0;
        loop {
            self.set_b(self.b().wrapping_sub(1));
            let val = bus.read_byte(self.hl);
            let port = self.bc;
            self.io_out(bus, port, val);
            self.hl = if inc {
                self.hl.wrapping_add(1)
            } else {
                self.hl.wrapping_sub(1)
            };

            let hc = val as u16 + self.l() as u16;
            self.f = 0;
            self.set_flag_s(self.b() & 0x80 != 0);
            self.set_flag_z(self.b() == 0);
            self.set_flag_h(hc > 0xFF);
            self.set_flag_pv(Self::parity(((hc as u8) & 0x07) ^ self.b()));
            self.set_flag_n(val & 0x80 != 0);
            self.set_flag_c(hc > 0xFF);

            if repeating && self.b() != 0 {
                self.bump_r_for_block_repeat();
                total += 21;
                if self.fast_blocks {
                    continue;
                }
                self.pc = self.pc.wrapping_sub(2);
            } else {
                total += 16;
            }
            return total;
        }
    }

    // ========== DD/FD-prefixed (IX/IY) ==========

    // H/L occurrences remap to IXH/IXL (or IYH/IYL) unconditionally under a
    // DD/FD prefix, even in an opcode that also addresses (IX+d)/(IY+d) --
    // e.g. `DD 66 d` ("LD H,(HL)" unprefixed) becomes `LD IXH,(IX+d)`, not
    // "LD H,(IX+d)". Only the literal (HL) operand slot (idx==6) becomes
    // displaced memory addressing.
    fn idx_get_r(&mut self, idx: u8, use_ix: bool, bus: &mut Bus) -> u8 {
        match idx {
            4 => {
                if use_ix {
                    self.ixh()
                } else {
                    self.iyh()
                }
            }
            5 => {
                if use_ix {
                    self.ixl()
                } else {
                    self.iyl()
                }
            }
            6 => {
                let d = self.fetch_byte(bus) as i8;
                let base = if use_ix { self.ix } else { self.iy };
                let addr = base.wrapping_add(d as i16 as u16);
                bus.read_byte(addr)
            }
            _ => self.get_reg8(idx, bus),
        }
    }

    fn idx_set_r(&mut self, idx: u8, use_ix: bool, val: u8, bus: &mut Bus) {
        match idx {
            4 => {
                if use_ix {
                    self.set_ixh(val)
                } else {
                    self.set_iyh(val)
                }
            }
            5 => {
                if use_ix {
                    self.set_ixl(val)
                } else {
                    self.set_iyl(val)
                }
            }
            6 => {
                let d = self.fetch_byte(bus) as i8;
                let base = if use_ix { self.ix } else { self.iy };
                let addr = base.wrapping_add(d as i16 as u16);
                bus.write_byte(addr, val);
            }
            _ => self.set_reg8(idx, val, bus),
        }
    }

    pub(super) fn execute_index(&mut self, bus: &mut Bus, use_ix: bool) -> u32 {
        let opcode = self.fetch_byte(bus);

        // A chained prefix: only the last one before the opcode has effect.
        match opcode {
            0xDD => return 4 + self.execute_index(bus, true),
            0xFD => return 4 + self.execute_index(bus, false),
            0xED => return 4 + self.execute_ed(bus),
            0xCB => return self.execute_index_cb(bus, use_ix),
            _ => {}
        }

        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;
        let p = (y >> 1) & 0x03;
        let q = y & 0x01;
        let idx_reg = if use_ix { self.ix } else { self.iy };

        // Every arm below already returns the complete, documented total for
        // the instruction (prefix byte included) except where noted; only
        // the passthrough arms that don't touch IX/IY need the `4 +` for the
        // otherwise-redundant prefix fetch.
        match x {
            0 => match z {
                1 if q == 0 && p == 2 => {
                    let nn = self.fetch_word(bus);
                    if use_ix {
                        self.ix = nn;
                    } else {
                        self.iy = nn;
                    }
                    14
                }
                1 if q == 1 => {
                    let operand = if p == 2 { idx_reg } else { self.get_rp(p) };
                    let result = self.add16(idx_reg, operand);
                    if use_ix {
                        self.ix = result;
                    } else {
                        self.iy = result;
                    }
                    15
                }
                2 if p == 2 => {
                    let addr = self.fetch_word(bus);
                    if q == 0 {
                        bus.write_byte(addr, idx_reg as u8);
                        bus.write_byte(addr.wrapping_add(1), (idx_reg >> 8) as u8);
                    } else {
                        let lo = bus.read_byte(addr) as u16;
                        let hi = bus.read_byte(addr.wrapping_add(1)) as u16;
                        let val = lo | (hi << 8);
                        if use_ix {
                            self.ix = val;
                        } else {
                            self.iy = val;
                        }
                    }
                    20
                }
                3 if p == 2 => {
                    let result = if q == 0 {
                        idx_reg.wrapping_add(1)
                    } else {
                        idx_reg.wrapping_sub(1)
                    };
                    if use_ix {
                        self.ix = result;
                    } else {
                        self.iy = result;
                    }
                    10
                }
                4 if y == 4 => {
                    let v = if use_ix { self.ixh() } else { self.iyh() };
                    let r = self.alu_inc(v);
                    if use_ix {
                        self.set_ixh(r)
                    } else {
                        self.set_iyh(r)
                    }
                    8
                }
                4 if y == 5 => {
                    let v = if use_ix { self.ixl() } else { self.iyl() };
                    let r = self.alu_inc(v);
                    if use_ix {
                        self.set_ixl(r)
                    } else {
                        self.set_iyl(r)
                    }
                    8
                }
                4 if y == 6 => {
                    let d = self.fetch_byte(bus) as i8;
                    let addr = idx_reg.wrapping_add(d as i16 as u16);
                    let v = bus.read_byte(addr);
                    let r = self.alu_inc(v);
                    bus.write_byte(addr, r);
                    23
                }
                5 if y == 4 => {
                    let v = if use_ix { self.ixh() } else { self.iyh() };
                    let r = self.alu_dec(v);
                    if use_ix {
                        self.set_ixh(r)
                    } else {
                        self.set_iyh(r)
                    }
                    8
                }
                5 if y == 5 => {
                    let v = if use_ix { self.ixl() } else { self.iyl() };
                    let r = self.alu_dec(v);
                    if use_ix {
                        self.set_ixl(r)
                    } else {
                        self.set_iyl(r)
                    }
                    8
                }
                5 if y == 6 => {
                    let d = self.fetch_byte(bus) as i8;
                    let addr = idx_reg.wrapping_add(d as i16 as u16);
                    let v = bus.read_byte(addr);
                    let r = self.alu_dec(v);
                    bus.write_byte(addr, r);
                    23
                }
                6 if y == 4 => {
                    let n = self.fetch_byte(bus);
                    if use_ix {
                        self.set_ixh(n)
                    } else {
                        self.set_iyh(n)
                    }
                    11
                }
                6 if y == 5 => {
                    let n = self.fetch_byte(bus);
                    if use_ix {
                        self.set_ixl(n)
                    } else {
                        self.set_iyl(n)
                    }
                    11
                }
                6 if y == 6 => {
                    let d = self.fetch_byte(bus) as i8;
                    let n = self.fetch_byte(bus);
                    let addr = idx_reg.wrapping_add(d as i16 as u16);
                    bus.write_byte(addr, n);
                    19
                }
                _ => 4 + self.execute_x0(bus, y, z, p, q),
            },
            1 => {
                if y == 6 && z == 6 {
                    self.halted = true;
                    8
                } else {
                    let involves_mem = y == 6 || z == 6;
                    let val = self.idx_get_r(z, use_ix, bus);
                    self.idx_set_r(y, use_ix, val, bus);
                    if involves_mem {
                        19
                    } else {
                        8
                    }
                }
            }
            2 => {
                let involves_mem = z == 6;
                let val = self.idx_get_r(z, use_ix, bus);
                self.execute_alu(y, val);
                if involves_mem {
                    19
                } else {
                    8
                }
            }
            _ => match z {
                1 if q == 0 && p == 2 => {
                    let val = self.pop_word(bus);
                    if use_ix {
                        self.ix = val;
                    } else {
                        self.iy = val;
                    }
                    14
                }
                1 if q == 1 && p == 2 => {
                    self.pc = idx_reg;
                    8
                }
                1 if q == 1 && p == 3 => {
                    self.sp = idx_reg;
                    10
                }
                3 if y == 4 => {
                    let lo = bus.read_byte(self.sp);
                    let hi = bus.read_byte(self.sp.wrapping_add(1));
                    let mem_val = lo as u16 | ((hi as u16) << 8);
                    bus.write_byte(self.sp, idx_reg as u8);
                    bus.write_byte(self.sp.wrapping_add(1), (idx_reg >> 8) as u8);
                    if use_ix {
                        self.ix = mem_val;
                    } else {
                        self.iy = mem_val;
                    }
                    23
                }
                5 if q == 0 && p == 2 => {
                    self.push_word(bus, idx_reg);
                    15
                }
                _ => 4 + self.execute_x3(bus, y, z, p, q),
            },
        }
    }

    pub(super) fn execute_index_cb(&mut self, bus: &mut Bus, use_ix: bool) -> u32 {
        let d = self.fetch_byte(bus) as i8;
        let opcode = self.fetch_byte(bus);
        let base = if use_ix { self.ix } else { self.iy };
        let addr = base.wrapping_add(d as i16 as u16);

        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;
        let val = bus.read_byte(addr);

        if x == 1 {
            self.execute_bit(y, val, (addr >> 8) as u8);
            return 20;
        }

        let result = match x {
            0 => self.execute_rot(y, val),
            2 => val & !(1 << y),
            _ => val | (1 << y),
        };
        bus.write_byte(addr, result);
        if z != 6 {
            self.set_reg8(z, result, bus);
        }
        23
    }
}
