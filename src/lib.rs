//! # ext_loader
//! Runtime loading of firmware extensions from relocatable (`ET_REL`) or
//! shared (`ET_DYN`) ELF objects, without reflashing the base image.
//!
//! The pipeline parses the image structure, merges its sections into a
//! fixed set of memory regions under strict non-overlap rules, builds the
//! symbol and export tables used for later cross-extension linking, and
//! guarantees that a failure at any stage leaves no leaked allocation and
//! no partially-initialized extension behind.
//!
//! The byte source ([`ExtensionLoader`]) and the relocation engine
//! ([`Relocator`]) are pluggable seams; [`ElfBinary`] covers the common
//! case of an image already resident in memory.
//!
//! ## Example
//! ```no_run
//! use ext_loader::{ElfBinary, LoadParam, Loader};
//!
//! let image: &[u8] = &[];
//! let mut loader = Loader::new();
//! let ext = loader.load(ElfBinary::new(image), &LoadParam::DEFAULT).unwrap();
//! let entry = unsafe { ext.get::<fn() -> i32>("entry").unwrap() };
//! ```
#![no_std]
extern crate alloc;

mod defs;
mod ehdr;
mod error;
mod load;
mod loader;
mod map;
mod mem;
mod region;
mod symtab;

pub use defs::{EM_ARCH, EXPORT_SECTION_NAME, Ehdr, SectionFlags, Shdr};
pub use elf::abi;
pub use error::{Error, Result};
pub use load::{LinkContext, LoadParam, Loader, Relocator};
pub use loader::{ElfBinary, ExtensionLoader};
pub use region::{Region, RegionMem, SectionMapEntry};
pub use symtab::{ExtSymbol, SymbolTable};

use crate::error::{fault_error, no_memory_error};
use alloc::boxed::Box;
use core::marker::PhantomData;
use load::LoadContext;
use region::ShdrTable;

/// A loaded extension: the materialized region buffers, the export table
/// and, on request, the full symbol table and section layout.
///
/// Created zero-initialized by the loader and handed to the caller only
/// once fully populated; dropping it releases every owned buffer.
pub struct Extension<'data> {
    pub(crate) mem: [RegionMem<'data>; Region::COUNT],
    pub(crate) alloc_size: usize,
    pub(crate) sect_cnt: usize,
    pub(crate) sym_tab: Option<SymbolTable>,
    pub(crate) exp_tab: SymbolTable,
    pub(crate) section_info: Option<SectionInfo<'data>>,
}

// The raw name pointers inside the tables reference memory owned by the
// extension itself or by the backing image, both stable for its lifetime.
unsafe impl Send for Extension<'_> {}
unsafe impl Sync for Extension<'_> {}

impl<'data> Extension<'data> {
    pub(crate) fn new(sect_cnt: usize) -> Self {
        Self {
            mem: core::array::from_fn(|_| RegionMem::Empty),
            alloc_size: 0,
            sect_cnt,
            sym_tab: None,
            exp_tab: SymbolTable::empty(),
            section_info: None,
        }
    }

    pub(crate) fn set_region(&mut self, region: Region, mem: RegionMem<'data>) {
        if let RegionMem::Owned(buf) = &mem {
            self.alloc_size += buf.len();
        }
        self.mem[region.idx()] = mem;
    }

    pub(crate) fn note_alloc(&mut self, bytes: usize) {
        self.alloc_size += bytes;
    }

    /// Base address of the materialized section, through the section map.
    pub(crate) fn loaded_sect_ptr(
        &self,
        ctx: &LoadContext<'_>,
        shndx: usize,
    ) -> Option<*const u8> {
        let entry = &ctx.sect_map[shndx];
        let region = entry.region?;
        let mem = &self.mem[region.idx()];
        if mem.is_empty() {
            return None;
        }
        Some((mem.as_slice().as_ptr() as usize).wrapping_add(entry.offset) as *const u8)
    }

    /// Bytes of a materialized region; empty for absent regions.
    #[inline]
    pub fn region(&self, region: Region) -> &[u8] {
        self.mem[region.idx()].as_slice()
    }

    /// Mutable bytes of an owned region, for relocation engines.
    pub fn region_mut(&mut self, region: Region) -> Option<&mut [u8]> {
        self.mem[region.idx()].as_mut_slice()
    }

    /// Size of a region in bytes.
    #[inline]
    pub fn region_size(&self, region: Region) -> usize {
        self.mem[region.idx()].len()
    }

    /// Total bytes of heap currently owned by this extension.
    #[inline]
    pub fn alloc_size(&self) -> usize {
        self.alloc_size
    }

    /// Number of sections in the image.
    #[inline]
    pub fn sect_cnt(&self) -> usize {
        self.sect_cnt
    }

    /// The full symbol table, present only when its retention was
    /// requested.
    pub fn symbol_table(&self) -> Option<&SymbolTable> {
        self.sym_tab.as_ref()
    }

    /// The symbols this extension publishes.
    pub fn exports(&self) -> &SymbolTable {
        &self.exp_tab
    }

    /// Retained section layout, present when `keep_section_info` was set.
    pub fn section_info(&self) -> Option<&SectionInfo<'data>> {
        self.section_info.as_ref()
    }

    /// Looks up an exported symbol's address by name.
    ///
    /// # Safety
    /// Export names must be resolvable, i.e. the image was relocated or
    /// loaded pre-located; see [`ExtSymbol::name`].
    pub unsafe fn symbol(&self, name: &str) -> Option<*const ()> {
        unsafe { self.exp_tab.find(name) }.map(|sym| sym.addr())
    }

    /// Gets a pointer to an exported function or static variable by symbol
    /// name.
    ///
    /// # Safety
    /// Same requirements as [`Extension::symbol`], and the caller must
    /// specify the correct type of the function or variable loaded.
    ///
    /// # Examples
    /// ```no_run
    /// # use ext_loader::{ElfBinary, LoadParam, Loader, Symbol};
    /// # let mut loader = Loader::new();
    /// # let ext = loader.load(ElfBinary::new(&[]), &LoadParam::DEFAULT).unwrap();
    /// unsafe {
    ///     let entry: Symbol<fn() -> i32> = ext.get("entry").unwrap();
    ///     entry();
    /// }
    /// ```
    pub unsafe fn get<'lib, T>(&'lib self, name: &str) -> Option<Symbol<'lib, T>> {
        unsafe { self.symbol(name) }.map(|ptr| Symbol {
            ptr: ptr as *mut (),
            pd: PhantomData,
        })
    }

    /// Byte size of the bringup (PREINIT followed by INIT) or teardown
    /// (FINI) function table.
    pub fn fn_table_size(&self, bringup: bool) -> usize {
        if bringup {
            self.region_size(Region::Preinit) + self.region_size(Region::Init)
        } else {
            self.region_size(Region::Fini)
        }
    }

    /// Copies the bringup or teardown function table into `buf` and returns
    /// the number of entries written.
    ///
    /// Pointers in these tables must map inside the text region; anything
    /// else means relocation went wrong and surfaces as [`Error::Fault`].
    pub fn fn_table(&self, bringup: bool, buf: &mut [*const ()]) -> Result<usize> {
        let table_size = self.fn_table_size(bringup);
        let count = table_size / size_of::<*const ()>();
        if buf.len() < count {
            return Err(no_memory_error("function table buffer too small"));
        }

        let regions: &[Region] = if bringup {
            &[Region::Preinit, Region::Init]
        } else {
            &[Region::Fini]
        };
        let mut n = 0;
        for region in regions {
            for chunk in self.region(*region).chunks_exact(size_of::<usize>()) {
                buf[n] = usize::from_ne_bytes(chunk.try_into().unwrap()) as *const ();
                n += 1;
            }
        }

        let text = self.region(Region::Text);
        let start = text.as_ptr() as usize;
        let end = start + text.len();
        for (i, ptr) in buf[..n].iter().enumerate() {
            let addr = *ptr as usize;
            if addr < start || addr >= end {
                log::error!(
                    "{} function {i} ({addr:#x}) outside text region",
                    if bringup { "bringup" } else { "teardown" },
                );
                return Err(fault_error("function table pointer outside text region"));
            }
        }
        Ok(n)
    }
}

/// Section layout retained from a load with `keep_section_info` set:
/// the raw section headers, the section-to-region map and the synthetic
/// region descriptors.
pub struct SectionInfo<'data> {
    pub(crate) shdrs: ShdrTable<'data>,
    pub(crate) sect_map: Box<[SectionMapEntry]>,
    pub(crate) regions: [Shdr; Region::COUNT],
}

impl SectionInfo<'_> {
    /// All section headers of the image.
    pub fn shdrs(&self) -> &[Shdr] {
        &self.shdrs
    }

    /// The section-to-region map.
    pub fn sect_map(&self) -> &[SectionMapEntry] {
        &self.sect_map
    }

    /// Synthetic header describing one region.
    pub fn region_header(&self, region: Region) -> &Shdr {
        &self.regions[region.idx()]
    }
}

/// A typed handle to an exported symbol.
#[derive(Debug, Clone)]
pub struct Symbol<'lib, T: 'lib> {
    ptr: *mut (),
    pd: PhantomData<&'lib T>,
}

impl<'lib, T> core::ops::Deref for Symbol<'lib, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*(&self.ptr as *const *mut _ as *const T) }
    }
}

impl<'lib, T> Symbol<'lib, T> {
    /// Consumes the handle, returning the raw address.
    pub fn into_raw(self) -> *const () {
        self.ptr
    }
}
