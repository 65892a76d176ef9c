//! Symbol and export table construction.
//!
//! The symbol pass walks the ELF symbol table once, collecting every
//! global function or data symbol with a resolvable address into an
//! exact-length table. The export pass publishes either that whole table
//! or the dedicated export region, depending on the load parameters.

use crate::{
    Extension, Result,
    defs::{SYM_SIZE, Sym, pod_bytes_mut, st_bind, st_type},
    error::{format_error, no_memory_error, not_supported_error},
    load::{LoadContext, LoadParam},
    loader::ExtensionLoader,
    mem,
    region::Region,
};
use alloc::{boxed::Box, vec::Vec};
use core::ffi::CStr;
use elf::abi::{SHN_UNDEF, STB_GLOBAL, STT_FUNC, STT_OBJECT};

/// One resolvable symbol: a name in a string-table region and the resolved
/// runtime address.
///
/// The layout matches the export-table entries embedded in extension
/// images: two pointer-sized words.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ExtSymbol {
    pub(crate) name: *const u8,
    pub(crate) addr: *const (),
}

impl ExtSymbol {
    /// Raw pointer to the NUL-terminated symbol name.
    #[inline]
    pub fn name_ptr(&self) -> *const u8 {
        self.name
    }

    /// Resolved address of the symbol.
    #[inline]
    pub fn addr(&self) -> *const () {
        self.addr
    }

    /// Returns the symbol name.
    ///
    /// # Safety
    /// The name pointer must reference a NUL-terminated UTF-8 string. That
    /// holds for tables the loader built from in-range string-table
    /// offsets, but not for export entries of an image that still awaits
    /// relocation.
    pub unsafe fn name(&self) -> &str {
        unsafe { core::str::from_utf8_unchecked(CStr::from_ptr(self.name.cast()).to_bytes()) }
    }
}

/// An exact-length table of symbols. Once built it never grows.
pub struct SymbolTable {
    syms: Box<[ExtSymbol]>,
}

impl SymbolTable {
    pub(crate) fn empty() -> Self {
        Self { syms: Box::new([]) }
    }

    pub(crate) fn from_vec(syms: Vec<ExtSymbol>) -> Self {
        Self {
            syms: syms.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.syms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.syms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtSymbol> {
        self.syms.iter()
    }

    pub(crate) fn heap_size(&self) -> usize {
        self.syms.len() * size_of::<ExtSymbol>()
    }

    /// Linear lookup by name.
    ///
    /// # Safety
    /// Every entry's name pointer must be valid; see [`ExtSymbol::name`].
    pub unsafe fn find(&self, name: &str) -> Option<&ExtSymbol> {
        self.syms.iter().find(|sym| unsafe { sym.name() } == name)
    }
}

/// Walks the ELF symbol table and collects every global function or data
/// symbol that is defined in a real section.
pub(crate) fn collect_symbols<'data>(
    ldr: &mut dyn ExtensionLoader<'data>,
    ctx: &LoadContext<'data>,
    ext: &Extension<'data>,
    param: &LoadParam,
) -> Result<SymbolTable> {
    let symtab = &ctx.regions[Region::Symtab.idx()];
    let ent_size = symtab.sh_entsize as usize;
    if ent_size != SYM_SIZE {
        log::error!("invalid symbol entry size {ent_size}");
        return Err(format_error("invalid symbol entry size"));
    }
    let sym_cnt = symtab.sh_size as usize / SYM_SIZE;
    log::debug!("symbol count {sym_cnt}");

    let mut syms = Vec::new();
    let mut pos = symtab.sh_offset as usize;
    for i in 0..sym_cnt {
        if i == 0 {
            // The index-0 dummy entry.
            pos = pos.wrapping_add(ent_size);
            continue;
        }
        ldr.seek(pos)?;
        let mut sym: Sym = unsafe { core::mem::zeroed() };
        ldr.read(pod_bytes_mut(&mut sym))?;
        pos = pos.wrapping_add(ent_size);

        let stt = st_type(sym.st_info);
        let stb = st_bind(sym.st_info);
        let shndx = sym.st_shndx as usize;

        // Reserved indices (SHN_ABS, SHN_COMMON, ...) do not resolve into
        // any region and are excluded together with undefined symbols.
        if (stt != STT_FUNC && stt != STT_OBJECT)
            || stb != STB_GLOBAL
            || sym.st_shndx == SHN_UNDEF
            || shndx >= ctx.shdrs.len()
        {
            log::debug!("unhandled symbol {i}, type {stt}, bind {stb}, sect {shndx}");
            continue;
        }

        let name = mem::str_at(ext, Region::Strtab, sym.st_name as usize)?;
        let addr = resolve_addr(ldr, ctx, ext, &sym, shndx, param)?;
        log::debug!("symbol {i} name {name} addr {addr:p}");
        syms.push(ExtSymbol {
            name: name.as_ptr(),
            addr,
        });
    }
    Ok(SymbolTable::from_vec(syms))
}

fn resolve_addr<'data>(
    ldr: &mut dyn ExtensionLoader<'data>,
    ctx: &LoadContext<'data>,
    ext: &Extension<'data>,
    sym: &Sym,
    shndx: usize,
    param: &LoadParam,
) -> Result<*const ()> {
    let shdr = &ctx.shdrs[shndx];
    let section_addr = shdr.sh_addr as usize;
    let detached = param.section_detached.is_some_and(|f| f(shdr));

    if param.pre_located && !detached {
        // Addresses were fixed at an earlier static-link stage; relocatable
        // objects still carry section-relative values.
        let addr = (sym.st_value as usize)
            .wrapping_add(if ctx.ehdr.is_rel() { section_addr } else { 0 });
        return Ok(addr as *const ());
    }

    let base = match ext.loaded_sect_ptr(ctx, shndx) {
        Some(base) => base,
        None => {
            // Not materialized into any region; peeking the file is the
            // last resort for data the mapper skipped.
            match ldr.peek(shdr.sh_offset as usize, shdr.sh_size as usize) {
                Some(bytes) => {
                    log::debug!("section {shndx} peeked at {:p}", bytes.as_ptr());
                    bytes.as_ptr()
                }
                None => {
                    log::error!("no data for section {shndx}");
                    return Err(not_supported_error("no data for symbol section"));
                }
            }
        }
    };
    let addr = (base as usize)
        .wrapping_add(sym.st_value as usize)
        .wrapping_sub(if ctx.ehdr.is_rel() { 0 } else { section_addr });
    Ok(addr as *const ())
}

/// Builds the table of symbols this extension publishes.
pub(crate) fn export_symbols<'data>(
    ldr: &mut dyn ExtensionLoader<'data>,
    ctx: &LoadContext<'data>,
    ext: &Extension<'data>,
    sym_tab: &SymbolTable,
    param: &LoadParam,
) -> Result<SymbolTable> {
    if param.export_all {
        // Republish the globals the symbol pass already resolved.
        let mut syms = Vec::new();
        syms.try_reserve_exact(sym_tab.len())
            .map_err(|_| no_memory_error("export table allocation failed"))?;
        syms.extend(sym_tab.iter().copied());
        return Ok(SymbolTable::from_vec(syms));
    }

    let export = &ctx.regions[Region::Export.idx()];
    let count = export.sh_size as usize / size_of::<ExtSymbol>();
    if count == 0 || ext.mem[Region::Export.idx()].is_empty() {
        // No symbols exported.
        return Ok(SymbolTable::empty());
    }

    let bytes = ext.region(Region::Export);
    let mut syms = Vec::new();
    syms.try_reserve_exact(count)
        .map_err(|_| no_memory_error("export table allocation failed"))?;
    for i in 0..count {
        // The region buffer carries no alignment guarantee when borrowed
        // straight from the byte source.
        let entry = unsafe {
            bytes
                .as_ptr()
                .add(i * size_of::<ExtSymbol>())
                .cast::<ExtSymbol>()
                .read_unaligned()
        };

        // Pre-located images bake absolute name addresses in at static-link
        // time; translate them back through the file to find the string.
        // The terminator is validated by whoever consumes the name.
        let name = if param.pre_located
            && let Some(offset) = mem::file_offset(ctx, entry.name as usize)
            && let Some(peeked) = ldr.peek(offset, 1)
        {
            peeked.as_ptr()
        } else {
            entry.name
        };
        log::debug!("export sym {:p} name {name:p}", entry.addr);
        syms.push(ExtSymbol {
            name,
            addr: entry.addr,
        });
    }
    Ok(SymbolTable::from_vec(syms))
}
