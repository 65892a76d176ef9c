//! Section classification: the table finder, the section-to-region mapper,
//! the pairwise overlap check and the per-section offset pass.

use crate::{
    Extension, Result,
    defs::{EXPORT_SECTION_NAME, SectionFlags, Shdr, copy_shdr},
    error::{format_error, not_supported_error},
    load::{LoadContext, LoadParam},
    mem,
    region::Region,
};
use elf::abi::{
    SHT_DYNSYM, SHT_FINI_ARRAY, SHT_INIT_ARRAY, SHT_NOBITS, SHT_NULL, SHT_PREINIT_ARRAY,
    SHT_PROGBITS, SHT_STRTAB, SHT_SYMTAB,
};

/// Locates the symbol table and the two string tables in a single scan,
/// terminating early once all three are found.
///
/// The symbol table is matched by type: `SHT_SYMTAB` for relocatable
/// objects, `SHT_DYNSYM` for shared objects. The companion string table
/// index comes from the symbol table's link field, so a string table that
/// precedes its symbol table is not recognized.
pub(crate) fn find_tables(ctx: &mut LoadContext<'_>) -> Result<()> {
    let shstrtab_ndx = ctx.ehdr.e_shstrndx();
    let mut strtab_ndx = usize::MAX;
    let mut table_cnt = 0;

    for i in 0..ctx.shdrs.len() {
        if table_cnt >= 3 {
            break;
        }
        let shdr = copy_shdr(&ctx.shdrs[i]);
        log::debug!(
            "section {i} at {:#x}: name {}, type {}, flags {:#x}, addr {:#x}, size {}, link {}",
            shdr.sh_offset,
            shdr.sh_name,
            shdr.sh_type,
            shdr.sh_flags,
            shdr.sh_addr,
            shdr.sh_size,
            shdr.sh_link,
        );

        if shdr.sh_type == SHT_SYMTAB && ctx.ehdr.is_rel() {
            log::debug!("symtab at {i}");
            strtab_ndx = shdr.sh_link as usize;
            ctx.sect_map[i].region = Some(Region::Symtab);
            ctx.regions[Region::Symtab.idx()] = shdr;
            table_cnt += 1;
        } else if shdr.sh_type == SHT_DYNSYM && !ctx.ehdr.is_rel() {
            log::debug!("dynsym at {i}");
            strtab_ndx = shdr.sh_link as usize;
            ctx.sect_map[i].region = Some(Region::Symtab);
            ctx.regions[Region::Symtab.idx()] = shdr;
            table_cnt += 1;
        } else if shdr.sh_type == SHT_STRTAB && i == shstrtab_ndx {
            log::debug!("shstrtab at {i}");
            ctx.sect_map[i].region = Some(Region::Shstrtab);
            ctx.regions[Region::Shstrtab.idx()] = shdr;
            table_cnt += 1;
        } else if shdr.sh_type == SHT_STRTAB && i == strtab_ndx {
            log::debug!("strtab at {i}");
            ctx.sect_map[i].region = Some(Region::Strtab);
            ctx.regions[Region::Strtab.idx()] = shdr;
            table_cnt += 1;
        }
    }

    if ctx.regions[Region::Symtab.idx()].sh_type == SHT_NULL
        || ctx.regions[Region::Strtab.idx()].sh_type == SHT_NULL
        || ctx.regions[Region::Shstrtab.idx()].sh_type == SHT_NULL
    {
        log::error!("some sections are missing or present multiple times");
        return Err(format_error("required ELF tables missing"));
    }
    Ok(())
}

/// Classifies a section into a region by type and flags. The reserved
/// export-table name wins over the type-based classification.
fn classify(shdr: &Shdr, name: &str) -> Option<Region> {
    if name == EXPORT_SECTION_NAME {
        return Some(Region::Export);
    }
    match shdr.sh_type {
        SHT_NOBITS => Some(Region::Bss),
        SHT_PROGBITS => {
            let flags = SectionFlags::basic(shdr.sh_flags);
            if flags.contains(SectionFlags::EXECINSTR) {
                Some(Region::Text)
            } else if flags.contains(SectionFlags::WRITE) {
                Some(Region::Data)
            } else {
                Some(Region::Rodata)
            }
        }
        SHT_PREINIT_ARRAY => Some(Region::Preinit),
        SHT_INIT_ARRAY => Some(Region::Init),
        SHT_FINI_ARRAY => Some(Region::Fini),
        _ => None,
    }
}

/// Maps every unmapped section into a region, widening region descriptors
/// as sections merge, then verifies the resulting layout and computes each
/// section's offset inside its region.
pub(crate) fn map_sections(
    ctx: &mut LoadContext<'_>,
    ext: &Extension<'_>,
    param: &LoadParam,
) -> Result<()> {
    for i in 0..ctx.shdrs.len() {
        let shdr = copy_shdr(&ctx.shdrs[i]);
        let name = mem::str_at(ext, Region::Shstrtab, shdr.sh_name as usize)?;

        if let Some(region) = ctx.sect_map[i].region {
            log::debug!("section {i} name {name} already mapped to region {region:?}");
            continue;
        }

        let Some(region) = classify(&shdr, name) else {
            log::debug!("section {i} name {name} skipped");
            continue;
        };
        if !SectionFlags::basic(shdr.sh_flags).contains(SectionFlags::ALLOC) || shdr.sh_size == 0 {
            log::debug!("section {i} name {name} skipped");
            continue;
        }

        // Init/fini arrays hold function pointers; a stray entry size would
        // corrupt the bringup tables derived from them later.
        if matches!(region, Region::Preinit | Region::Init | Region::Fini)
            && (shdr.sh_entsize as usize != size_of::<usize>()
                || (shdr.sh_size % shdr.sh_entsize) != 0)
        {
            log::error!("invalid {name} array in section {i}");
            return Err(format_error("invalid init/fini array entry size"));
        }

        log::debug!("section {i} name {name} maps to region {region:?}");
        ctx.sect_map[i].region = Some(region);

        // Detached sections keep their own placement, e.g. code destined
        // for a slower memory bank; never merge them into the main regions.
        if let Some(detached) = param.section_detached
            && detached(&shdr)
        {
            continue;
        }

        merge_into_region(ctx, &shdr, name, region)?;
    }

    check_overlaps(ctx)?;

    // Offsets are computed as a separate pass so the final region ranges
    // are already settled.
    for i in 0..ctx.shdrs.len() {
        if let Some(region) = ctx.sect_map[i].region {
            let sh_offset = ctx.shdrs[i].sh_offset as u64;
            ctx.sect_map[i].offset =
                sh_offset.wrapping_sub(ctx.regions[region.idx()].sh_offset as u64) as usize;
        }
    }
    Ok(())
}

fn merge_into_region(
    ctx: &mut LoadContext<'_>,
    shdr: &Shdr,
    name: &str,
    region: Region,
) -> Result<()> {
    let is_rel = ctx.ehdr.is_rel();
    let desc = &mut ctx.regions[region.idx()];

    if desc.sh_type == SHT_NULL {
        // First section assigned: the section becomes the region.
        *desc = copy_shdr(shdr);
        return Ok(());
    }

    if SectionFlags::basic(shdr.sh_flags) != SectionFlags::basic(desc.sh_flags) {
        log::error!(
            "unsupported section flags {:#x} / {:#x} for {name} (region {region:?})",
            shdr.sh_flags,
            desc.sh_flags,
        );
        return Err(format_error("incompatible section flags"));
    }

    match region {
        Region::Bss => {
            // NOBITS sections use no space in the file, so the offset
            // arithmetic below cannot merge them.
            log::error!("multiple SHT_NOBITS sections are not supported");
            return Err(not_supported_error("multiple SHT_NOBITS sections"));
        }
        Region::Preinit | Region::Init | Region::Fini => {
            log::error!("region {region:?} redefined");
            return Err(format_error("init/fini region redefined"));
        }
        _ => {}
    }

    if !is_rel {
        // In shared objects sh_addr is the VMA; merging requires the VMA
        // delta to match the file-offset delta.
        if (shdr.sh_addr as u64).wrapping_sub(desc.sh_addr as u64)
            != (shdr.sh_offset as u64).wrapping_sub(desc.sh_offset as u64)
        {
            log::error!("incompatible section addresses for {name} (region {region:?})");
            return Err(format_error("inconsistent section layout"));
        }
    }

    // Extend the region to the union of both ranges; overlaps between
    // regions are detected later.
    let address = (desc.sh_addr as u64).min(shdr.sh_addr as u64);
    let bot_ofs = (desc.sh_offset as u64).min(shdr.sh_offset as u64);
    let top_ofs = (desc.sh_offset as u64)
        .saturating_add(desc.sh_size as u64)
        .max((shdr.sh_offset as u64).saturating_add(shdr.sh_size as u64));
    desc.sh_addr = address as _;
    desc.sh_offset = bot_ofs as _;
    desc.sh_size = (top_ofs - bot_ofs) as _;
    Ok(())
}

fn ranges_overlap(x_start: u64, x_size: u64, y_start: u64, y_size: u64) -> bool {
    (x_start <= y_start && x_start.saturating_add(x_size) > y_start)
        || (y_start <= x_start && y_start.saturating_add(y_size) > x_start)
}

/// Pairwise overlap detection over the finished region descriptors.
///
/// Interleaved sections of different kinds would otherwise end up copied
/// twice into different regions, or worse, relocated twice.
fn check_overlaps(ctx: &LoadContext<'_>) -> Result<()> {
    for (n, &i) in Region::ALL.iter().enumerate() {
        for &j in &Region::ALL[n + 1..] {
            let x = &ctx.regions[i.idx()];
            let y = &ctx.regions[j.idx()];

            if x.sh_type == SHT_NULL || x.sh_size == 0 || y.sh_type == SHT_NULL || y.sh_size == 0 {
                continue;
            }

            // The export table commonly lives inside a data section; these
            // two pairings are the only sanctioned overlaps.
            if matches!(
                (i, j),
                (Region::Rodata | Region::Data, Region::Export)
                    | (Region::Export, Region::Rodata | Region::Data)
            ) {
                continue;
            }

            if !ctx.ehdr.is_rel()
                && SectionFlags::basic(x.sh_flags).contains(SectionFlags::ALLOC)
                && SectionFlags::basic(y.sh_flags).contains(SectionFlags::ALLOC)
                && ranges_overlap(
                    x.sh_addr as u64,
                    x.sh_size as u64,
                    y.sh_addr as u64,
                    y.sh_size as u64,
                )
            {
                log::error!(
                    "region {i:?} VMA range ({:#x} +{}) overlaps with {j:?} ({:#x} +{})",
                    x.sh_addr,
                    x.sh_size,
                    y.sh_addr,
                    y.sh_size,
                );
                return Err(format_error("region VMA ranges overlap"));
            }

            // BSS stores no data in the file; checking its file range would
            // only produce false positives.
            if i == Region::Bss || j == Region::Bss {
                continue;
            }

            if ranges_overlap(
                x.sh_offset as u64,
                x.sh_size as u64,
                y.sh_offset as u64,
                y.sh_size as u64,
            ) {
                log::error!(
                    "region {i:?} ELF file range ({:#x} +{}) overlaps with {j:?} ({:#x} +{})",
                    x.sh_offset,
                    x.sh_size,
                    y.sh_offset,
                    y.sh_size,
                );
                return Err(format_error("region file ranges overlap"));
            }
        }
    }
    Ok(())
}
