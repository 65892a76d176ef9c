//! ELF file header acquisition and validation.

use crate::{
    Result,
    defs::{self, E_CLASS, E_DATA, EM_ARCH, Ehdr, SHDR_SIZE},
    error::{format_error, not_supported_error},
    loader::ExtensionLoader,
};
use core::ops::Deref;
use elf::abi::{EI_CLASS, EI_DATA, EI_VERSION, ELFMAGIC, ET_DYN, ET_REL, EV_CURRENT};

/// Validated ELF header of the image being loaded.
pub(crate) struct ElfHeader {
    ehdr: Ehdr,
}

impl Deref for ElfHeader {
    type Target = Ehdr;

    fn deref(&self) -> &Ehdr {
        &self.ehdr
    }
}

impl ElfHeader {
    /// Reads the header from offset zero and validates it.
    pub(crate) fn read_from(ldr: &mut dyn ExtensionLoader<'_>) -> Result<Self> {
        ldr.seek(0)?;
        let mut ehdr: Ehdr = unsafe { core::mem::zeroed() };
        ldr.read(defs::pod_bytes_mut(&mut ehdr))?;
        let this = Self { ehdr };
        this.validate()?;
        Ok(this)
    }

    fn validate(&self) -> Result<()> {
        if self.e_ident[0..4] != ELFMAGIC {
            log::error!("invalid ELF, magic does not match");
            return Err(format_error("invalid ELF, magic does not match"));
        }
        if self.e_ident[EI_CLASS] != E_CLASS {
            return Err(format_error("ELF class mismatch"));
        }
        if self.e_ident[EI_DATA] != E_DATA {
            return Err(format_error("ELF data encoding mismatch"));
        }
        if self.e_ident[EI_VERSION] != EV_CURRENT {
            return Err(format_error("invalid ELF version"));
        }
        if self.e_machine != EM_ARCH {
            return Err(format_error("ELF machine mismatch"));
        }
        match self.e_type {
            ET_REL => log::debug!("loading relocatable ELF"),
            ET_DYN => log::debug!("loading shared ELF"),
            other => {
                log::error!("unsupported ELF file type {other:#x}");
                return Err(not_supported_error("unsupported ELF file type"));
            }
        }
        // The on-disk entry size must match this build's structure layout.
        if self.e_shentsize as usize != SHDR_SIZE {
            log::error!("invalid section header size {}", self.e_shentsize);
            return Err(format_error("invalid section header size"));
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn is_rel(&self) -> bool {
        self.ehdr.e_type == ET_REL
    }

    #[inline]
    pub(crate) fn e_shnum(&self) -> usize {
        self.ehdr.e_shnum as usize
    }

    #[inline]
    pub(crate) fn e_shoff(&self) -> usize {
        self.ehdr.e_shoff as usize
    }

    #[inline]
    pub(crate) fn e_shstrndx(&self) -> usize {
        self.ehdr.e_shstrndx as usize
    }
}
