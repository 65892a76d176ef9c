//! Region buffer materialization and string-table access.

use crate::{
    Extension, Result,
    defs::SectionFlags,
    error::format_error,
    load::{LoadContext, LoadParam},
    loader::ExtensionLoader,
    region::{AlignedBuf, Region, RegionMem},
};
use core::ffi::CStr;
use elf::abi::{SHT_NOBITS, SHT_NULL};

/// Materializes the two string-table regions.
///
/// These must be in place before section mapping, which resolves section
/// names through the section-name string table.
pub(crate) fn copy_strings<'data>(
    ldr: &mut dyn ExtensionLoader<'data>,
    ctx: &LoadContext<'data>,
    ext: &mut Extension<'data>,
    param: &LoadParam,
) -> Result<()> {
    for region in [Region::Strtab, Region::Shstrtab] {
        materialize(ldr, ctx, ext, region, param)?;
    }
    Ok(())
}

/// Materializes every remaining non-empty region.
pub(crate) fn copy_regions<'data>(
    ldr: &mut dyn ExtensionLoader<'data>,
    ctx: &LoadContext<'data>,
    ext: &mut Extension<'data>,
    param: &LoadParam,
) -> Result<()> {
    for region in Region::ALL {
        if matches!(ext.mem[region.idx()], RegionMem::Empty) {
            materialize(ldr, ctx, ext, region, param)?;
        }
    }
    Ok(())
}

fn materialize<'data>(
    ldr: &mut dyn ExtensionLoader<'data>,
    ctx: &LoadContext<'data>,
    ext: &mut Extension<'data>,
    region: Region,
    param: &LoadParam,
) -> Result<()> {
    let desc = &ctx.regions[region.idx()];
    let size = desc.sh_size as usize;
    if desc.sh_type == SHT_NULL || size == 0 {
        return Ok(());
    }

    if desc.sh_type == SHT_NOBITS {
        let buf = AlignedBuf::new_zeroed(size, desc.sh_addralign as usize)?;
        ext.set_region(region, RegionMem::Owned(buf));
        return Ok(());
    }

    // Zero-copy is only sound when nothing will later write to the region:
    // pre-located objects are finished images, and read-only regions stay
    // untouched unless local relocation was requested.
    let writable = SectionFlags::basic(desc.sh_flags).contains(SectionFlags::WRITE);
    if (param.pre_located || (!writable && !param.relocate_local))
        && let Some(bytes) = ldr.peek(desc.sh_offset as usize, size)
    {
        log::debug!("region {region:?} peeked at {:p}", bytes.as_ptr());
        ext.set_region(region, RegionMem::Borrowed(bytes));
        return Ok(());
    }

    let mut buf = AlignedBuf::new_zeroed(size, desc.sh_addralign as usize)?;
    ldr.seek(desc.sh_offset as usize)?;
    ldr.read(buf.as_mut_slice())?;
    log::debug!("region {region:?} copied, size {size}");
    ext.set_region(region, RegionMem::Owned(buf));
    Ok(())
}

/// Reads a NUL-terminated string out of a materialized region.
///
/// Offsets come from untrusted symbol and section headers, so the access
/// is bounds-checked against the region buffer.
pub(crate) fn str_at<'ext>(
    ext: &'ext Extension<'_>,
    region: Region,
    offset: usize,
) -> Result<&'ext str> {
    let bytes = ext.region(region);
    let tail = bytes
        .get(offset..)
        .ok_or_else(|| format_error("string offset out of range"))?;
    let cstr =
        CStr::from_bytes_until_nul(tail).map_err(|_| format_error("unterminated string"))?;
    core::str::from_utf8(cstr.to_bytes()).map_err(|_| format_error("malformed string"))
}

/// Maps a virtual address back to its file offset using the region layout.
///
/// Pre-located images bake absolute addresses in at static-link time; this
/// reverse lookup recovers the file bytes behind such an address.
pub(crate) fn file_offset(ctx: &LoadContext<'_>, addr: usize) -> Option<usize> {
    for region in Region::ALL {
        if region == Region::Bss {
            continue;
        }
        let desc = &ctx.regions[region.idx()];
        if desc.sh_type == SHT_NULL || desc.sh_size == 0 {
            continue;
        }
        let start = desc.sh_addr as usize;
        if addr >= start && addr - start < desc.sh_size as usize {
            return Some(desc.sh_offset as usize + (addr - start));
        }
    }
    None
}
