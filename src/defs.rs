//! Native ELF class selection and small format helpers.
//!
//! The `elf` crate provides both the ABI constants and the raw header
//! structures; a `cfg-if` switch picks the variant matching the target
//! pointer width, so the rest of the crate works with a single set of
//! `Ehdr`/`Shdr`/`Sym` aliases.

use bitflags::bitflags;
use elf::abi::{SHF_ALLOC, SHF_EXECINSTR, SHF_WRITE, SHT_NULL};

cfg_if::cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        pub(crate) const E_CLASS: u8 = elf::abi::ELFCLASS64;
        /// Raw ELF file header in the native class.
        pub type Ehdr = elf::file::Elf64_Ehdr;
        /// Raw ELF section header in the native class.
        pub type Shdr = elf::section::Elf64_Shdr;
        pub(crate) type Sym = elf::symbol::Elf64_Sym;
    } else {
        pub(crate) const E_CLASS: u8 = elf::abi::ELFCLASS32;
        /// Raw ELF file header in the native class.
        pub type Ehdr = elf::file::Elf32_Ehdr;
        /// Raw ELF section header in the native class.
        pub type Shdr = elf::section::Elf32_Shdr;
        pub(crate) type Sym = Elf32Sym;
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_endian = "little")] {
        pub(crate) const E_DATA: u8 = elf::abi::ELFDATA2LSB;
    } else {
        pub(crate) const E_DATA: u8 = elf::abi::ELFDATA2MSB;
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// ELF machine id matching the compilation target.
        pub const EM_ARCH: u16 = elf::abi::EM_X86_64;
    } else if #[cfg(target_arch = "x86")] {
        /// ELF machine id matching the compilation target.
        pub const EM_ARCH: u16 = elf::abi::EM_386;
    } else if #[cfg(target_arch = "aarch64")] {
        /// ELF machine id matching the compilation target.
        pub const EM_ARCH: u16 = elf::abi::EM_AARCH64;
    } else if #[cfg(target_arch = "arm")] {
        /// ELF machine id matching the compilation target.
        pub const EM_ARCH: u16 = elf::abi::EM_ARM;
    } else if #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))] {
        /// ELF machine id matching the compilation target.
        pub const EM_ARCH: u16 = elf::abi::EM_RISCV;
    } else {
        compile_error!("unsupported architecture");
    }
}

/// 32-bit ELF symbol table entry.
///
/// The `elf` crate does not expose a raw `Elf32_Sym`; for 64-bit targets
/// the `Sym` alias points to `elf::symbol::Elf64_Sym` instead.
#[allow(unused)]
#[repr(C)]
pub(crate) struct Elf32Sym {
    pub st_name: u32,
    pub st_value: u32,
    pub st_size: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
}

pub(crate) const SHDR_SIZE: usize = size_of::<Shdr>();
pub(crate) const SYM_SIZE: usize = size_of::<Sym>();

/// Section name that force-classifies a section into the EXPORT region.
pub const EXPORT_SECTION_NAME: &str = ".exported_sym";

bitflags! {
    /// Basic section attribute mask (`SHF_WRITE | SHF_ALLOC | SHF_EXECINSTR`)
    /// used for region classification and merge compatibility.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct SectionFlags: u64 {
        const WRITE = SHF_WRITE as u64;
        const ALLOC = SHF_ALLOC as u64;
        const EXECINSTR = SHF_EXECINSTR as u64;
    }
}

impl SectionFlags {
    /// Keeps only the basic attribute bits of a raw `sh_flags` value.
    #[inline]
    pub fn basic(sh_flags: impl Into<u64>) -> Self {
        Self::from_bits_truncate(sh_flags.into())
    }
}

#[inline]
pub(crate) fn st_bind(st_info: u8) -> u8 {
    st_info >> 4
}

#[inline]
pub(crate) fn st_type(st_info: u8) -> u8 {
    st_info & 0xf
}

/// Field-by-field copy; the raw `elf` structs do not implement `Clone`.
pub(crate) fn copy_shdr(shdr: &Shdr) -> Shdr {
    Shdr {
        sh_name: shdr.sh_name,
        sh_type: shdr.sh_type,
        sh_flags: shdr.sh_flags,
        sh_addr: shdr.sh_addr,
        sh_offset: shdr.sh_offset,
        sh_size: shdr.sh_size,
        sh_link: shdr.sh_link,
        sh_info: shdr.sh_info,
        sh_addralign: shdr.sh_addralign,
        sh_entsize: shdr.sh_entsize,
    }
}

/// All-zero section header, the initial state of every region descriptor.
pub(crate) fn null_shdr() -> Shdr {
    Shdr {
        sh_name: 0,
        sh_type: SHT_NULL,
        sh_flags: 0,
        sh_addr: 0,
        sh_offset: 0,
        sh_size: 0,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: 0,
        sh_entsize: 0,
    }
}

/// Views a POD value as a mutable byte buffer for loader reads.
///
/// Sound for the raw ELF structures used here: every field is an integer,
/// so any byte pattern is a valid value.
pub(crate) fn pod_bytes_mut<T>(value: &mut T) -> &mut [u8] {
    unsafe { core::slice::from_raw_parts_mut((value as *mut T).cast(), size_of::<T>()) }
}

/// Views a POD slice as a mutable byte buffer for loader reads.
pub(crate) fn slice_bytes_mut<T>(slice: &mut [T]) -> &mut [u8] {
    unsafe {
        core::slice::from_raw_parts_mut(slice.as_mut_ptr().cast(), core::mem::size_of_val(slice))
    }
}

/// Reinterprets peeked bytes as a section header table.
///
/// Returns `None` when the backing storage is not sufficiently aligned for
/// the header type; callers then fall back to a heap copy.
pub(crate) fn cast_shdrs(bytes: &[u8], count: usize) -> Option<&[Shdr]> {
    if bytes.len() < count * SHDR_SIZE || bytes.as_ptr().align_offset(align_of::<Shdr>()) != 0 {
        return None;
    }
    Some(unsafe { core::slice::from_raw_parts(bytes.as_ptr().cast(), count) })
}
