//! The loading pipeline orchestrator.
//!
//! Sequencing and cleanup discipline live here and nowhere else: the
//! individual pipeline steps never free resources owned by another step.
//! Scratch state sits in [`LoadContext`] and is dropped when loading ends;
//! extension-lifetime buffers sit in [`Extension`](crate::Extension) and a
//! failed load returns before the caller ever sees the partial object, so
//! its drop glue rolls everything back.

use crate::{
    Extension, Result, SectionInfo,
    defs::{SHDR_SIZE, Shdr, cast_shdrs, null_shdr, slice_bytes_mut},
    ehdr::ElfHeader,
    loader::ExtensionLoader,
    map, mem,
    region::{Region, SectionMapEntry, ShdrTable},
    symtab::{self, SymbolTable},
};
use alloc::{boxed::Box, vec, vec::Vec};

/// Parameters of one load operation.
#[derive(Clone, Copy)]
pub struct LoadParam {
    /// Invoke the relocation engine inline after the symbol pass.
    pub relocate_local: bool,
    /// Symbol and export addresses are absolute, computed at an earlier
    /// static-link stage rather than at load time.
    pub pre_located: bool,
    /// Retain the section map and headers for later inspection.
    pub keep_section_info: bool,
    /// Retain the full symbol table after loading. Post-load consumers
    /// normally use only the export table.
    pub keep_symbol_table: bool,
    /// Publish every discovered global instead of the export section.
    pub export_all: bool,
    /// Marks sections that must not be merged into the main regions,
    /// e.g. code placed in a separate slow-memory bank.
    pub section_detached: Option<fn(&Shdr) -> bool>,
}

impl LoadParam {
    /// All options off.
    pub const DEFAULT: Self = Self {
        relocate_local: false,
        pre_located: false,
        keep_section_info: false,
        keep_symbol_table: false,
        export_all: false,
        section_detached: None,
    };
}

impl Default for LoadParam {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Scratch state of one load: the validated header, the section header
/// table, the section-to-region map and the region descriptors.
pub(crate) struct LoadContext<'data> {
    pub(crate) ehdr: ElfHeader,
    pub(crate) shdrs: ShdrTable<'data>,
    pub(crate) sect_map: Box<[SectionMapEntry]>,
    pub(crate) regions: [Shdr; Region::COUNT],
}

impl<'data> LoadContext<'data> {
    /// Acquires the section header table, zero-copy when the source allows
    /// it, and the all-unmapped section map.
    fn new(ldr: &mut dyn ExtensionLoader<'data>, ehdr: ElfHeader) -> Result<Self> {
        let sect_cnt = ehdr.e_shnum();
        let sect_map = vec![SectionMapEntry::UNMAPPED; sect_cnt].into_boxed_slice();

        let shdrs = match ldr
            .peek(ehdr.e_shoff(), sect_cnt * SHDR_SIZE)
            .and_then(|bytes| cast_shdrs(bytes, sect_cnt))
        {
            Some(shdrs) => ShdrTable::Borrowed(shdrs),
            None => {
                let mut shdrs: Vec<Shdr> = (0..sect_cnt).map(|_| null_shdr()).collect();
                ldr.seek(ehdr.e_shoff())?;
                ldr.read(slice_bytes_mut(&mut shdrs))?;
                ShdrTable::Owned(shdrs.into_boxed_slice())
            }
        };

        Ok(Self {
            ehdr,
            shdrs,
            sect_map,
            regions: core::array::from_fn(|_| null_shdr()),
        })
    }
}

/// Hook invoked between the symbol pass and export construction when
/// [`LoadParam::relocate_local`] is set.
///
/// The actual relocation engine is supplied by the integrator; the loader
/// only hands it everything it needs through [`LinkContext`].
pub trait Relocator<'data> {
    /// Applies relocations to the materialized regions.
    fn relocate(&mut self, ctx: LinkContext<'_, 'data>) -> Result<()>;
}

/// No-op relocator for images that need no local fixups.
impl<'data> Relocator<'data> for () {
    fn relocate(&mut self, _ctx: LinkContext<'_, 'data>) -> Result<()> {
        Ok(())
    }
}

/// Everything a relocation engine needs: the byte source (for reading
/// relocation sections), the section layout and the materialized
/// extension.
pub struct LinkContext<'a, 'data> {
    pub(crate) ldr: &'a mut dyn ExtensionLoader<'data>,
    pub(crate) load: &'a LoadContext<'data>,
    pub(crate) ext: &'a mut Extension<'data>,
    pub(crate) sym_tab: &'a SymbolTable,
    pub(crate) param: &'a LoadParam,
}

impl<'a, 'data> LinkContext<'a, 'data> {
    /// The byte source.
    pub fn loader(&mut self) -> &mut (dyn ExtensionLoader<'data> + 'a) {
        &mut *self.ldr
    }

    /// All section headers of the image.
    pub fn shdrs(&self) -> &[Shdr] {
        &self.load.shdrs
    }

    /// True for relocatable objects, false for shared objects.
    pub fn is_rel(&self) -> bool {
        self.load.ehdr.is_rel()
    }

    /// Region and intra-region offset of a section, if it was mapped.
    pub fn section_placement(&self, shndx: usize) -> Option<(Region, usize)> {
        let entry = self.load.sect_map.get(shndx)?;
        entry.region.map(|region| (region, entry.offset))
    }

    /// Synthetic header describing a whole region.
    pub fn region_header(&self, region: Region) -> &Shdr {
        &self.load.regions[region.idx()]
    }

    /// The extension being loaded.
    pub fn extension(&mut self) -> &mut Extension<'data> {
        self.ext
    }

    /// The symbols collected from the image.
    pub fn symbols(&self) -> &SymbolTable {
        self.sym_tab
    }

    /// The active load parameters.
    pub fn param(&self) -> &LoadParam {
        self.param
    }
}

/// Orchestrates the loading of extension images.
///
/// # Examples
/// ```no_run
/// use ext_loader::{ElfBinary, LoadParam, Loader};
///
/// let image: &[u8] = &[];
/// let mut loader = Loader::new();
/// let ext = loader.load(ElfBinary::new(image), &LoadParam::DEFAULT).unwrap();
/// ```
pub struct Loader<R = ()> {
    relocator: R,
}

impl Loader<()> {
    /// Creates a loader without a relocation engine.
    pub fn new() -> Self {
        Self { relocator: () }
    }
}

impl Default for Loader<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Loader<R> {
    /// Returns a loader that relocates images with the given engine.
    pub fn with_relocator<N>(self, relocator: N) -> Loader<N> {
        Loader { relocator }
    }

    /// Loads one extension from `source`.
    ///
    /// On failure every allocation made along the way is released before
    /// the error is returned, and the source's `finalize` runs on every
    /// exit path.
    pub fn load<'data, L>(&mut self, mut source: L, param: &LoadParam) -> Result<Extension<'data>>
    where
        L: ExtensionLoader<'data>,
        R: Relocator<'data>,
    {
        let ret = self.do_load(&mut source, param);
        if let Err(err) = &ret {
            log::debug!("failed to load extension: {err}");
        }
        source.finalize();
        ret
    }

    fn do_load<'data>(
        &mut self,
        source: &mut dyn ExtensionLoader<'data>,
        param: &LoadParam,
    ) -> Result<Extension<'data>>
    where
        R: Relocator<'data>,
    {
        source.prepare().inspect_err(|err| {
            log::error!("failed to prepare the loader: {err}");
        })?;

        log::debug!("loading ELF data...");
        let ehdr = ElfHeader::read_from(source)?;
        let mut ctx = LoadContext::new(source, ehdr)?;
        let mut ext = Extension::new(ctx.shdrs.len());

        log::debug!("finding ELF tables...");
        map::find_tables(&mut ctx)?;

        log::debug!("allocating and copying strings...");
        mem::copy_strings(source, &ctx, &mut ext, param)?;

        log::debug!("mapping ELF sections...");
        map::map_sections(&mut ctx, &ext, param)?;

        log::debug!("allocating and copying regions...");
        mem::copy_regions(source, &ctx, &mut ext, param)?;

        log::debug!("collecting symbols...");
        let sym_tab = symtab::collect_symbols(source, &ctx, &ext, param)?;

        if param.relocate_local {
            log::debug!("linking ELF...");
            self.relocator.relocate(LinkContext {
                ldr: &mut *source,
                load: &ctx,
                ext: &mut ext,
                sym_tab: &sym_tab,
                param,
            })?;
        }

        log::debug!("exporting symbols...");
        let exp_tab = symtab::export_symbols(source, &ctx, &ext, &sym_tab, param)?;
        ext.note_alloc(exp_tab.heap_size());
        ext.exp_tab = exp_tab;

        // The symbol table is only useful to post-load debugging; unless
        // its retention was requested it goes away with the scratch state.
        if param.keep_symbol_table {
            ext.note_alloc(sym_tab.heap_size());
            ext.sym_tab = Some(sym_tab);
        }

        if param.keep_section_info {
            let LoadContext {
                shdrs,
                sect_map,
                regions,
                ..
            } = ctx;
            ext.note_alloc(shdrs.heap_size() + sect_map.len() * size_of::<SectionMapEntry>());
            ext.section_info = Some(SectionInfo {
                shdrs,
                sect_map,
                regions,
            });
        }

        log::debug!(
            "loaded extension, text at {:p}, rodata at {:p}",
            ext.region(Region::Text).as_ptr(),
            ext.region(Region::Rodata).as_ptr(),
        );
        Ok(ext)
    }
}
