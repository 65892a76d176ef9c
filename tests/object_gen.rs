#![cfg(target_pointer_width = "64")]

//! End-to-end load of an image produced by the `object` crate's ELF
//! writer, the closest stand-in for a real toolchain-generated extension.

mod common;

use ext_loader::{ElfBinary, LoadParam, Loader, Region};
use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};

fn host_arch() -> Architecture {
    if cfg!(target_arch = "x86_64") {
        Architecture::X86_64
    } else if cfg!(target_arch = "aarch64") {
        Architecture::Aarch64
    } else {
        panic!("unsupported architecture for the object-generated test");
    }
}

#[test]
fn toolchain_generated_object_loads() {
    common::init_logger();
    let mut obj = Object::new(BinaryFormat::Elf, host_arch(), Endianness::Little);
    let text = obj.section_id(StandardSection::Text);
    obj.append_section_data(text, &[0x90; 32], 16);
    let rodata = obj.section_id(StandardSection::ReadOnlyData);
    obj.append_section_data(rodata, b"fixed table data", 8);
    let data = obj.section_id(StandardSection::Data);
    obj.append_section_data(data, &[0u8; 16], 8);
    obj.add_symbol(Symbol {
        name: b"entry".to_vec(),
        value: 8,
        size: 16,
        kind: SymbolKind::Text,
        scope: SymbolScope::Dynamic,
        weak: false,
        section: SymbolSection::Section(text),
        flags: SymbolFlags::None,
    });
    let image = obj.write().unwrap();

    let param = LoadParam {
        keep_symbol_table: true,
        export_all: true,
        ..LoadParam::DEFAULT
    };
    let mut loader = Loader::new();
    let ext = loader.load(ElfBinary::new(&image), &param).unwrap();

    assert_eq!(ext.region_size(Region::Text), 32);
    assert_eq!(ext.region_size(Region::Data), 16);

    let syms = ext.symbol_table().unwrap();
    assert_eq!(syms.len(), 1);
    assert_eq!(ext.exports().len(), syms.len());

    let base = ext.region(Region::Text).as_ptr() as usize;
    let addr = unsafe { ext.symbol("entry") }.unwrap() as usize;
    assert!(addr >= base && addr < base + 32);
    assert_eq!(addr, base + 8);
}
