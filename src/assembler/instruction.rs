use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::assembler::buffer::CodeWriter;

/// The 6502 addressing modes, in instruction table column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrMode {
    Accumulator,
    Immediate,
    Implied,
    Relative,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Indirect,
    IndexedIndirect,
    IndirectIndexed,
}

pub const ADDR_MODE_COUNT: usize = 13;

/// Index register applied to a direct or indirect operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexRegister {
    #[default]
    None,
    X,
    Y,
}

pub fn absolute_mode(index: IndexRegister) -> AddrMode {
    match index {
        IndexRegister::None => AddrMode::Absolute,
        IndexRegister::X => AddrMode::AbsoluteX,
        IndexRegister::Y => AddrMode::AbsoluteY,
    }
}

pub fn zero_page_mode(index: IndexRegister) -> AddrMode {
    match index {
        IndexRegister::None => AddrMode::ZeroPage,
        IndexRegister::X => AddrMode::ZeroPageX,
        IndexRegister::Y => AddrMode::ZeroPageY,
    }
}

pub fn indirect_mode(index: IndexRegister) -> AddrMode {
    match index {
        IndexRegister::None => AddrMode::Indirect,
        IndexRegister::X => AddrMode::IndexedIndirect,
        IndexRegister::Y => AddrMode::IndirectIndexed,
    }
}

type Opcode = i16;

/// One instruction with its opcode for every addressing mode it supports.
///
/// Each `encode_*` method returns the number of bytes the operation takes,
/// writing them out when a writer is supplied; `None` means the instruction
/// does not support the requested mode. Passing no writer turns the encoders
/// into pure sizing functions for the definition pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    name: &'static str,
    opcodes: [Opcode; ADDR_MODE_COUNT],
}

impl Instruction {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn opcode(&self, mode: AddrMode) -> Option<u8> {
        let opcode = self.opcodes[mode as usize];
        if opcode >= 0 {
            Some(opcode as u8)
        } else {
            None
        }
    }

    pub fn supports(&self, mode: AddrMode) -> bool {
        self.opcode(mode).is_some()
    }

    /// True for the branch family, which only encodes relative.
    pub fn is_relative(&self) -> bool {
        self.supports(AddrMode::Relative)
    }

    pub fn encode_implied(&self, writer: Option<&mut CodeWriter>) -> Option<usize> {
        let opcode = self.opcode(AddrMode::Implied)?;
        if let Some(writer) = writer {
            writer.byte(opcode);
        }
        Some(1)
    }

    pub fn encode_accumulator(&self, writer: Option<&mut CodeWriter>) -> Option<usize> {
        let opcode = self.opcode(AddrMode::Accumulator)?;
        if let Some(writer) = writer {
            writer.byte(opcode);
        }
        Some(1)
    }

    pub fn encode_immediate(&self, writer: Option<&mut CodeWriter>, value: u8) -> Option<usize> {
        let opcode = self.opcode(AddrMode::Immediate)?;
        if let Some(writer) = writer {
            writer.byte(opcode);
            writer.byte(value);
        }
        Some(2)
    }

    /// Encodes a direct operand, preferring zero page over absolute when the
    /// address fits, the zero-page variant exists, and absolute isn't forced.
    pub fn encode_direct(
        &self,
        mut writer: Option<&mut CodeWriter>,
        addr: u16,
        index: IndexRegister,
        force_absolute: bool,
    ) -> Option<usize> {
        if addr < 0x100 && !force_absolute {
            if let Some(opcode) = self.opcode(zero_page_mode(index)) {
                if let Some(writer) = writer.as_deref_mut() {
                    writer.byte(opcode);
                    writer.byte(addr as u8);
                }
                return Some(2);
            }
        }
        let opcode = self.opcode(absolute_mode(index))?;
        if let Some(writer) = writer {
            writer.byte(opcode);
            writer.word(addr);
        }
        Some(3)
    }

    /// Encodes `(a)`, `(a,X)` or `(a),Y`; the indexed forms take one byte
    /// of operand, so the address must fit in it.
    pub fn encode_indirect(
        &self,
        writer: Option<&mut CodeWriter>,
        addr: u16,
        index: IndexRegister,
    ) -> Option<usize> {
        let mode = indirect_mode(index);
        let opcode = self.opcode(mode)?;

        if mode == AddrMode::Indirect {
            if let Some(writer) = writer {
                writer.byte(opcode);
                writer.word(addr);
            }
            return Some(3);
        }

        if addr > 0xff {
            return None;
        }
        if let Some(writer) = writer {
            writer.byte(opcode);
            writer.byte(addr as u8);
        }
        Some(2)
    }

    /// Encodes a branch target as a signed delta from `from + 2`.
    pub fn encode_relative(
        &self,
        writer: Option<&mut CodeWriter>,
        from: u16,
        to: u16,
    ) -> Option<usize> {
        let opcode = self.opcode(AddrMode::Relative)?;
        let delta = to as i32 - (from as i32 + 2);
        if !(-128..=127).contains(&delta) {
            return None;
        }
        if let Some(writer) = writer {
            writer.byte(opcode);
            writer.byte(delta as u8);
        }
        Some(2)
    }
}

#[rustfmt::skip]
static TABLE: [(&str, [Opcode; ADDR_MODE_COUNT]); 56] = [
    //          Accum  Immed  Imply  Rel    Abs    AbsX   AbsY   zp     zp,x   zp,y   Indir  (a,x)  (a),y
    ("adc",    [  -1,  0x69,    -1,    -1,  0x6d,  0x7d,  0x79,  0x65,  0x75,    -1,    -1,  0x61,  0x71]),
    ("and",    [  -1,  0x29,    -1,    -1,  0x2d,  0x3d,  0x39,  0x25,  0x35,    -1,    -1,  0x21,  0x31]),
    ("asl",    [0x0a,    -1,    -1,    -1,  0x0e,  0x1e,    -1,  0x06,  0x16,    -1,    -1,    -1,    -1]),
    ("bcc",    [  -1,    -1,    -1,  0x90,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("bcs",    [  -1,    -1,    -1,  0xb0,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("beq",    [  -1,    -1,    -1,  0xf0,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("bit",    [  -1,    -1,    -1,    -1,  0x2c,    -1,    -1,  0x24,    -1,    -1,    -1,    -1,    -1]),
    ("bmi",    [  -1,    -1,    -1,  0x30,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("bne",    [  -1,    -1,    -1,  0xd0,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("bpl",    [  -1,    -1,    -1,  0x10,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("brk",    [  -1,    -1,  0x00,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("bvc",    [  -1,    -1,    -1,  0x50,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("bvs",    [  -1,    -1,    -1,  0x70,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("clc",    [  -1,    -1,  0x18,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("cld",    [  -1,    -1,  0xd8,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("cli",    [  -1,    -1,  0x58,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("clv",    [  -1,    -1,  0xb8,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("cmp",    [  -1,  0xc9,    -1,    -1,  0xcd,  0xdd,  0xd9,  0xc5,  0xd5,    -1,    -1,  0xc1,  0xd1]),
    ("cpx",    [  -1,  0xe0,    -1,    -1,  0xec,    -1,    -1,  0xe4,    -1,    -1,    -1,    -1,    -1]),
    ("cpy",    [  -1,  0xc0,    -1,    -1,  0xcc,    -1,    -1,  0xc4,    -1,    -1,    -1,    -1,    -1]),
    ("dec",    [  -1,    -1,    -1,    -1,  0xce,  0xde,    -1,  0xc6,  0xd6,    -1,    -1,    -1,    -1]),
    ("dex",    [  -1,    -1,  0xca,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("dey",    [  -1,    -1,  0x88,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("eor",    [  -1,  0x49,    -1,    -1,  0x4d,  0x5d,  0x59,  0x45,  0x55,    -1,    -1,  0x41,  0x51]),
    ("inc",    [  -1,    -1,    -1,    -1,  0xee,  0xfe,    -1,  0xe6,  0xf6,    -1,    -1,    -1,    -1]),
    ("inx",    [  -1,    -1,  0xe8,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("iny",    [  -1,    -1,  0xc8,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("jmp",    [  -1,    -1,    -1,    -1,  0x4c,    -1,    -1,    -1,    -1,    -1,  0x6c,    -1,    -1]),
    ("jsr",    [  -1,    -1,    -1,    -1,  0x20,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("lda",    [  -1,  0xa9,    -1,    -1,  0xad,  0xbd,  0xb9,  0xa5,  0xb5,    -1,    -1,  0xa1,  0xb1]),
    ("ldx",    [  -1,  0xa2,    -1,    -1,  0xae,    -1,  0xbe,  0xa6,    -1,  0xb6,    -1,    -1,    -1]),
    ("ldy",    [  -1,  0xa0,    -1,    -1,  0xac,  0xbc,    -1,  0xa4,  0xb4,    -1,    -1,    -1,    -1]),
    ("lsr",    [0x4a,    -1,    -1,    -1,  0x4e,  0x5e,    -1,  0x46,  0x56,    -1,    -1,    -1,    -1]),
    ("nop",    [  -1,    -1,  0xea,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("ora",    [  -1,  0x09,    -1,    -1,  0x0d,  0x1d,  0x19,  0x05,  0x15,    -1,    -1,  0x01,  0x11]),
    ("pha",    [  -1,    -1,  0x48,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("php",    [  -1,    -1,  0x08,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("pla",    [  -1,    -1,  0x68,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("plp",    [  -1,    -1,  0x28,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("rol",    [0x2a,    -1,    -1,    -1,  0x2e,  0x3e,    -1,  0x26,  0x36,    -1,    -1,    -1,    -1]),
    ("ror",    [0x6a,    -1,    -1,    -1,  0x6e,  0x7e,    -1,  0x66,  0x76,    -1,    -1,    -1,    -1]),
    ("rti",    [  -1,    -1,  0x40,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("rts",    [  -1,    -1,  0x60,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("sbc",    [  -1,  0xe9,    -1,    -1,  0xed,  0xfd,  0xf9,  0xe5,  0xf5,    -1,    -1,  0xe1,  0xf1]),
    ("sec",    [  -1,    -1,  0x38,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("sed",    [  -1,    -1,  0xf8,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("sei",    [  -1,    -1,  0x78,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("sta",    [  -1,    -1,    -1,    -1,  0x8d,  0x9d,  0x99,  0x85,  0x95,    -1,    -1,  0x81,  0x91]),
    ("stx",    [  -1,    -1,    -1,    -1,  0x8e,    -1,    -1,  0x86,    -1,  0x96,    -1,    -1,    -1]),
    ("sty",    [  -1,    -1,    -1,    -1,  0x8c,    -1,    -1,  0x84,  0x94,    -1,    -1,    -1,    -1]),
    ("tax",    [  -1,    -1,  0xaa,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("tay",    [  -1,    -1,  0xa8,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("tsx",    [  -1,    -1,  0xba,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("txa",    [  -1,    -1,  0x8a,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("txs",    [  -1,    -1,  0x9a,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
    ("tya",    [  -1,    -1,  0x98,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1,    -1]),
];

lazy_static! {
    static ref INSTRUCTION_SET: HashMap<&'static str, Instruction> = {
        let mut map = HashMap::new();
        for &(name, opcodes) in TABLE.iter() {
            map.insert(name, Instruction { name, opcodes });
        }
        map
    };
}

/// Looks up an instruction by mnemonic, case-insensitively.
pub fn instruction_named(name: &str) -> Option<&'static Instruction> {
    INSTRUCTION_SET.get(name.to_ascii_lowercase().as_str())
}
