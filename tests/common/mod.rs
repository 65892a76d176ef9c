//! Hand-rolled ELF64 image builder for loader tests.
//!
//! `object::write` refuses to emit broken images, so the malformed-input
//! tests assemble section tables by hand. Little-endian ELF64 only, which
//! matches every host these tests run on.

#![allow(dead_code)]

use ext_loader::abi::{SHT_NOBITS, SHT_PROGBITS, SHT_STRTAB, SHT_SYMTAB};

pub const A: u64 = ext_loader::abi::SHF_ALLOC as u64;
pub const AW: u64 = (ext_loader::abi::SHF_ALLOC | ext_loader::abi::SHF_WRITE) as u64;
pub const AX: u64 = (ext_loader::abi::SHF_ALLOC | ext_loader::abi::SHF_EXECINSTR) as u64;
pub const AWX: u64 = (ext_loader::abi::SHF_ALLOC
    | ext_loader::abi::SHF_WRITE
    | ext_loader::abi::SHF_EXECINSTR) as u64;

pub const ET_REL: u16 = 1;
pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;

const EHDR_SIZE: usize = 64;
const SHDR_SIZE: usize = 64;
const SYM_SIZE: usize = 24;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One section of the image under construction.
pub struct Sec {
    name: &'static str,
    sh_type: u32,
    sh_flags: u64,
    data: Vec<u8>,
    size: Option<u64>,
    offset: Option<u64>,
    addr: u64,
    entsize: u64,
    addralign: u64,
}

impl Sec {
    pub fn new(name: &'static str, sh_type: u32, sh_flags: u64, data: &[u8]) -> Self {
        Self {
            name,
            sh_type,
            sh_flags,
            data: data.to_vec(),
            size: None,
            offset: None,
            addr: 0,
            entsize: 0,
            addralign: 8,
        }
    }

    /// Overrides `sh_size` (e.g. for NOBITS sections carrying no data).
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Overrides `sh_offset`, detaching the header from where the data was
    /// actually written. Used to fabricate overlapping or aliased layouts.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn addr(mut self, addr: u64) -> Self {
        self.addr = addr;
        self
    }

    pub fn entsize(mut self, entsize: u64) -> Self {
        self.entsize = entsize;
        self
    }
}

pub struct SymSpec {
    name: &'static str,
    info: u8,
    shndx: u16,
    value: u64,
}

/// Builds a minimal relocatable or shared ELF image. Section index 0 is the
/// null section; user sections follow in insertion order; `.symtab`,
/// `.strtab` and `.shstrtab` are appended automatically.
pub struct ElfBuilder {
    e_type: u16,
    symtab_type: u32,
    sections: Vec<Sec>,
    syms: Vec<SymSpec>,
}

impl ElfBuilder {
    pub fn rel() -> Self {
        Self {
            e_type: ET_REL,
            symtab_type: SHT_SYMTAB,
            sections: Vec::new(),
            syms: Vec::new(),
        }
    }

    pub fn dyn_object() -> Self {
        Self {
            e_type: ET_DYN,
            symtab_type: ext_loader::abi::SHT_DYNSYM,
            sections: Vec::new(),
            syms: Vec::new(),
        }
    }

    /// Overrides the type emitted for the symbol table section.
    pub fn symtab_type(mut self, sh_type: u32) -> Self {
        self.symtab_type = sh_type;
        self
    }

    /// Adds a section and returns its index in the final image.
    pub fn add(&mut self, sec: Sec) -> u16 {
        self.sections.push(sec);
        self.sections.len() as u16
    }

    pub fn progbits(&mut self, name: &'static str, sh_flags: u64, data: &[u8]) -> u16 {
        self.add(Sec::new(name, SHT_PROGBITS, sh_flags, data))
    }

    pub fn nobits(&mut self, name: &'static str, sh_flags: u64, size: u64) -> u16 {
        self.add(Sec::new(name, SHT_NOBITS, sh_flags, &[]).size(size))
    }

    pub fn func(&mut self, name: &'static str, shndx: u16, value: u64) {
        // STB_GLOBAL << 4 | STT_FUNC
        self.sym(name, 0x12, shndx, value);
    }

    pub fn object_sym(&mut self, name: &'static str, shndx: u16, value: u64) {
        // STB_GLOBAL << 4 | STT_OBJECT
        self.sym(name, 0x11, shndx, value);
    }

    pub fn local_func(&mut self, name: &'static str, shndx: u16, value: u64) {
        // STB_LOCAL << 4 | STT_FUNC
        self.sym(name, 0x02, shndx, value);
    }

    pub fn sym(&mut self, name: &'static str, info: u8, shndx: u16, value: u64) {
        self.syms.push(SymSpec {
            name,
            info,
            shndx,
            value,
        });
    }

    /// Index the symbol table will get in the built image.
    pub fn symtab_ndx(&self) -> u16 {
        self.sections.len() as u16 + 1
    }

    pub fn build(&self) -> Vec<u8> {
        fn addstr(tab: &mut Vec<u8>, s: &str) -> u32 {
            let off = tab.len() as u32;
            tab.extend_from_slice(s.as_bytes());
            tab.push(0);
            off
        }

        fn align_to(img: &mut Vec<u8>, align: usize) {
            while img.len() % align != 0 {
                img.push(0);
            }
        }

        let nsec = self.sections.len();
        let strtab_ndx = nsec + 2;
        let shstrtab_ndx = nsec + 3;
        let shnum = nsec + 4;

        let mut shstr = vec![0u8];
        let sec_names: Vec<u32> = self
            .sections
            .iter()
            .map(|sec| addstr(&mut shstr, sec.name))
            .collect();
        let symtab_name = addstr(&mut shstr, ".symtab");
        let strtab_name = addstr(&mut shstr, ".strtab");
        let shstrtab_name = addstr(&mut shstr, ".shstrtab");

        let mut strtab = vec![0u8];
        let mut symtab = vec![0u8; SYM_SIZE]; // index-0 dummy entry
        for sym in &self.syms {
            let name_off = addstr(&mut strtab, sym.name);
            symtab.extend_from_slice(&name_off.to_le_bytes());
            symtab.push(sym.info);
            symtab.push(0);
            symtab.extend_from_slice(&sym.shndx.to_le_bytes());
            symtab.extend_from_slice(&sym.value.to_le_bytes());
            symtab.extend_from_slice(&0u64.to_le_bytes());
        }

        let mut img = vec![0u8; EHDR_SIZE];

        // User section data, 16-aligned so region alignment demands hold.
        let mut placed = Vec::new();
        for sec in &self.sections {
            align_to(&mut img, 16);
            let real_off = img.len() as u64;
            img.extend_from_slice(&sec.data);
            placed.push((
                sec.offset.unwrap_or(real_off),
                sec.size.unwrap_or(sec.data.len() as u64),
            ));
        }

        align_to(&mut img, 8);
        let symtab_off = img.len() as u64;
        img.extend_from_slice(&symtab);
        let strtab_off = img.len() as u64;
        img.extend_from_slice(&strtab);
        let shstrtab_off = img.len() as u64;
        img.extend_from_slice(&shstr);

        align_to(&mut img, 8);
        let shoff = img.len() as u64;

        #[allow(clippy::too_many_arguments)]
        fn shdr(
            img: &mut Vec<u8>,
            name: u32,
            sh_type: u32,
            flags: u64,
            addr: u64,
            off: u64,
            size: u64,
            link: u32,
            align: u64,
            entsize: u64,
        ) {
            img.extend_from_slice(&name.to_le_bytes());
            img.extend_from_slice(&sh_type.to_le_bytes());
            img.extend_from_slice(&flags.to_le_bytes());
            img.extend_from_slice(&addr.to_le_bytes());
            img.extend_from_slice(&off.to_le_bytes());
            img.extend_from_slice(&size.to_le_bytes());
            img.extend_from_slice(&link.to_le_bytes());
            img.extend_from_slice(&0u32.to_le_bytes()); // sh_info
            img.extend_from_slice(&align.to_le_bytes());
            img.extend_from_slice(&entsize.to_le_bytes());
        }

        shdr(&mut img, 0, 0, 0, 0, 0, 0, 0, 0, 0);
        for (i, sec) in self.sections.iter().enumerate() {
            let (off, size) = placed[i];
            shdr(
                &mut img,
                sec_names[i],
                sec.sh_type,
                sec.sh_flags,
                sec.addr,
                off,
                size,
                0,
                sec.addralign,
                sec.entsize,
            );
        }
        shdr(
            &mut img,
            symtab_name,
            self.symtab_type,
            0,
            0,
            symtab_off,
            symtab.len() as u64,
            strtab_ndx as u32,
            8,
            SYM_SIZE as u64,
        );
        shdr(
            &mut img,
            strtab_name,
            SHT_STRTAB,
            0,
            0,
            strtab_off,
            strtab.len() as u64,
            0,
            1,
            0,
        );
        shdr(
            &mut img,
            shstrtab_name,
            SHT_STRTAB,
            0,
            0,
            shstrtab_off,
            shstr.len() as u64,
            0,
            1,
            0,
        );

        // ELF header.
        img[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        img[4] = 2; // ELFCLASS64
        img[5] = 1; // ELFDATA2LSB
        img[6] = 1; // EV_CURRENT
        img[16..18].copy_from_slice(&self.e_type.to_le_bytes());
        img[18..20].copy_from_slice(&ext_loader::EM_ARCH.to_le_bytes());
        img[20..24].copy_from_slice(&1u32.to_le_bytes());
        img[40..48].copy_from_slice(&shoff.to_le_bytes());
        img[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        img[58..60].copy_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
        img[60..62].copy_from_slice(&(shnum as u16).to_le_bytes());
        img[62..64].copy_from_slice(&(shstrtab_ndx as u16).to_le_bytes());
        img
    }
}

/// A minimal relocatable object with one section of each basic kind and a
/// single global function symbol at `entry_off` into `.text`.
pub struct StandardObject {
    pub image: Vec<u8>,
    pub text_ndx: u16,
}

pub fn standard_object(entry_off: u64) -> StandardObject {
    let mut b = ElfBuilder::rel();
    let text_ndx = b.progbits(".text", AX, &[0x90; 64]);
    b.progbits(".rodata", A, b"constant data here..............");
    b.progbits(".data", AW, &[0xaa; 32]);
    b.nobits(".bss", AW, 48);
    b.func("entry", text_ndx, entry_off);
    StandardObject {
        image: b.build(),
        text_ndx,
    }
}
