//! End-to-end scenarios over synthesized images: minimal PE32/PE32+ files
//! are built in memory, parsed, edited through the public API, rebuilt, and
//! parsed again.

use bytemuck::bytes_of;
use pe_forge::coff::CoffFileHeader;
use pe_forge::dos::ImageDosHeader;
use pe_forge::export::{get_export_ordinal_limits, ExportedFunction, ImageExportDirectory};
use pe_forge::import::{ImportLibrary, ImportRebuilderSettings, ImportedFunction};
use pe_forge::optional::{
    DataDirectory, OptionalHeader32, OptionalHeader64, DIRECTORY_ENTRY_BASERELOC,
    DIRECTORY_ENTRY_EXPORT,
};
use pe_forge::pe::{
    calculate_checksum, parse_pe, FileOffset, PeFile, PortableExecutable, RebuildOptions, Rva,
    SectionDataType,
};
use pe_forge::arch::Pe32;
use pe_forge::relocation::{BaseRelocationType, RelocationEntry, RelocationTable};
use pe_forge::resource::{
    ResourceDataEntry, ResourceDirectory, ResourceDirectoryEntry, ResourceType,
};
use pe_forge::resource_manager::{IconPlaceMode, ResourceManager};
use pe_forge::resource_viewer::{IcoHeader, IconDirEntry, ResourceViewer};
use pe_forge::section::{Section, SectionFlags, SectionHeader};

const SECTION_ALIGNMENT: u32 = 0x1000;
const FILE_ALIGNMENT: u32 = 0x200;
const IMAGE_BASE: u32 = 0x1000_0000;

struct SectionSpec {
    name: &'static str,
    data: Vec<u8>,
    virtual_size: u32,
}

fn align_to(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Assembles a well-formed PE32 DLL from section specs and data-directory
/// entries.
fn build_pe32(sections: &[SectionSpec], directories: &[(usize, u32, u32)]) -> Vec<u8> {
    let mut dos = ImageDosHeader::default();
    dos.e_lfanew = 64;

    let number_of_sections = sections.len() as u16;
    let coff = CoffFileHeader {
        machine: 0x14c,
        number_of_sections,
        time_date_stamp: 0,
        pointer_to_symbol_table: 0,
        number_of_symbols: 0,
        size_of_optional_header: (core::mem::size_of::<OptionalHeader32>() + 16 * 8) as u16,
        characteristics: 0x2102, // EXECUTABLE_IMAGE | 32BIT_MACHINE | DLL
    };

    // Section placement: RVAs stack from 0x1000, raw data from SizeOfHeaders.
    let mut section_headers = Vec::new();
    let mut rva = SECTION_ALIGNMENT;
    let mut raw_pointer = FILE_ALIGNMENT;
    for spec in sections {
        let raw_size = align_to(spec.data.len() as u32, FILE_ALIGNMENT);
        let mut header = SectionHeader {
            virtual_size: spec.virtual_size,
            virtual_address: rva,
            size_of_raw_data: raw_size,
            pointer_to_raw_data: raw_pointer,
            characteristics: (SectionFlags::IMAGE_SCN_MEM_READ
                | SectionFlags::IMAGE_SCN_CNT_INITIALIZED_DATA)
                .bits(),
            ..Default::default()
        };
        header.name = [0; 8];
        for (slot, byte) in header.name.iter_mut().zip(spec.name.bytes()) {
            *slot = byte;
        }
        section_headers.push(header);
        rva += align_to(spec.virtual_size.max(raw_size), SECTION_ALIGNMENT);
        raw_pointer += raw_size;
    }

    let optional = OptionalHeader32 {
        magic: 0x10b,
        image_base: IMAGE_BASE,
        section_alignment: SECTION_ALIGNMENT,
        file_alignment: FILE_ALIGNMENT,
        size_of_image: rva,
        size_of_headers: FILE_ALIGNMENT,
        subsystem: 2,
        number_of_rva_and_sizes: 16,
        ..Default::default()
    };

    let mut file = Vec::new();
    file.extend_from_slice(bytes_of(&dos));
    file.extend_from_slice(&0x0000_4550u32.to_le_bytes());
    file.extend_from_slice(bytes_of(&coff));
    file.extend_from_slice(bytes_of(&optional));
    for index in 0..16usize {
        let entry = directories
            .iter()
            .find(|(slot, _, _)| *slot == index)
            .map(|&(_, rva, size)| DataDirectory {
                virtual_address: rva,
                size,
            })
            .unwrap_or_default();
        file.extend_from_slice(bytes_of(&entry));
    }
    for header in &section_headers {
        file.extend_from_slice(bytes_of(header));
    }

    for (spec, header) in sections.iter().zip(&section_headers) {
        file.resize(header.pointer_to_raw_data as usize, 0);
        file.extend_from_slice(&spec.data);
        file.resize(
            (header.pointer_to_raw_data + header.size_of_raw_data) as usize,
            0,
        );
    }
    file
}

/// Section data carrying an export directory with one named function at
/// ordinal 1, plus a relocatable dword at section offset 0x500.
fn export_section_data(section_va: u32) -> Vec<u8> {
    let mut data = vec![0u8; 0x600];
    let directory = ImageExportDirectory {
        name: section_va + 64,
        base: 1,
        number_of_functions: 1,
        number_of_names: 1,
        address_of_functions: section_va + 40,
        address_of_names: section_va + 44,
        address_of_name_ordinals: section_va + 48,
        ..Default::default()
    };
    data[..40].copy_from_slice(bytes_of(&directory));
    data[40..44].copy_from_slice(&0x1500u32.to_le_bytes()); // function RVA
    data[44..48].copy_from_slice(&(section_va + 50).to_le_bytes()); // name RVA
    data[48..50].copy_from_slice(&0u16.to_le_bytes()); // name ordinal
    data[50..59].copy_from_slice(b"func_one\0");
    data[64..72].copy_from_slice(b"one.dll\0");
    // An absolute pointer for the rebase scenario.
    data[0x500..0x504].copy_from_slice(&(IMAGE_BASE + 0x1234).to_le_bytes());
    data
}

fn minimal_export_dll() -> Vec<u8> {
    build_pe32(
        &[SectionSpec {
            name: ".edata",
            data: export_section_data(0x1000),
            virtual_size: 0x600,
        }],
        &[(DIRECTORY_ENTRY_EXPORT, 0x1000, 128)],
    )
}

fn parse32(binary: &[u8]) -> PortableExecutable<Pe32> {
    PortableExecutable::<Pe32>::parse(binary).expect("image should parse")
}

fn ico_file(count: u16) -> Vec<u8> {
    let mut file = Vec::new();
    file.extend_from_slice(bytes_of(&IcoHeader {
        reserved: 0,
        image_type: 1,
        count,
    }));
    let headers = 6 + count as usize * core::mem::size_of::<IconDirEntry>();
    for i in 0..count {
        let entry = IconDirEntry {
            width: 32,
            height: 32,
            color_count: 0,
            reserved: 0,
            planes: 1,
            bit_count: 32,
            size_in_bytes: 16,
            image_offset: (headers + i as usize * 16) as u32,
        };
        file.extend_from_slice(bytes_of(&entry));
    }
    for i in 0..count {
        file.extend_from_slice(&[0x40 + i as u8; 16]);
    }
    file
}

#[test]
fn s1_round_trip_minimal_dll() {
    let binary = minimal_export_dll();
    let mut image = parse32(&binary);

    let (exports, info) = image.get_exported_functions_with_info().unwrap();
    assert_eq!(info.name, "one.dll");
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].ordinal, 1);
    assert_eq!(exports[0].name.as_deref(), Some("func_one"));
    assert_eq!(exports[0].rva, Rva(0x1500));
    assert!(!exports[0].is_forwarded());

    let rebuilt = image.rebuild_pe(RebuildOptions::default()).unwrap();
    let reparsed = parse32(&rebuilt);
    assert_eq!(reparsed.sections().len(), 1);
    assert_eq!(reparsed.sections()[0].get_name(), ".edata");
    assert_eq!(reparsed.get_exported_functions().unwrap(), exports);
    assert_eq!(reparsed.image_base(), image.image_base());
    assert_eq!(reparsed.size_of_image(), image.size_of_image());
}

#[test]
fn s2_add_exported_function() {
    let binary = minimal_export_dll();
    let mut image = parse32(&binary);

    let (mut exports, info) = image.get_exported_functions_with_info().unwrap();
    exports.push(ExportedFunction {
        ordinal: 2,
        rva: Rva(0x1000),
        name: Some("Foo".to_string()),
        ..Default::default()
    });

    let mut section = Section::new(
        "new_exp",
        SectionFlags::IMAGE_SCN_MEM_READ | SectionFlags::IMAGE_SCN_CNT_INITIALIZED_DATA,
    );
    section.set_raw_data(vec![0u8; 0x200]);
    let index = image.add_section(section).unwrap();

    let directory = image
        .rebuild_exports(&info, exports, index, 0, true, true)
        .unwrap();
    assert_eq!(image.directory_rva(DIRECTORY_ENTRY_EXPORT), directory.rva.0);

    let rebuilt_exports = image.get_exported_functions().unwrap();
    assert_eq!(rebuilt_exports.len(), 2);
    assert_eq!(get_export_ordinal_limits(&rebuilt_exports), (1, 2));
    assert_eq!(rebuilt_exports[0].name.as_deref(), Some("func_one"));
    assert_eq!(rebuilt_exports[1].name.as_deref(), Some("Foo"));

    // Survives a full re-emit.
    let rebuilt = image.rebuild_pe(RebuildOptions::default()).unwrap();
    let reparsed = parse32(&rebuilt);
    assert_eq!(reparsed.get_exported_functions().unwrap(), rebuilt_exports);
}

#[test]
fn s3_add_import_library() {
    let binary = minimal_export_dll();
    let mut image = parse32(&binary);

    let library = ImportLibrary {
        name: "kernel32.dll".to_string(),
        functions: vec![
            ImportedFunction {
                name: Some("GetLastError".to_string()),
                hint: 0,
                ..Default::default()
            },
            ImportedFunction {
                ordinal: 5,
                ..Default::default()
            },
        ],
        ..Default::default()
    };

    let mut section = Section::new(
        "new_imp",
        SectionFlags::IMAGE_SCN_MEM_READ | SectionFlags::IMAGE_SCN_CNT_INITIALIZED_DATA,
    );
    section.set_raw_data(vec![0u8; 0x10]);
    let index = image.add_section(section).unwrap();

    let settings = ImportRebuilderSettings {
        save_iat_and_original_iat_rvas: false,
        build_original_iat: true,
        ..Default::default()
    };
    image
        .rebuild_imports(&[library], index, &settings)
        .unwrap();

    let libraries = image.get_imported_functions().unwrap();
    assert_eq!(libraries.len(), 1);
    let library = &libraries[0];
    assert_eq!(library.name, "kernel32.dll");
    assert_ne!(library.rva_to_iat, 0);
    assert_ne!(library.rva_to_original_iat, 0);
    assert_eq!(library.functions.len(), 2);
    assert_eq!(library.functions[0].name.as_deref(), Some("GetLastError"));
    assert_eq!(library.functions[0].hint, 0);
    assert!(!library.functions[1].has_name());
    assert_eq!(library.functions[1].ordinal, 5);

    // The ordinal thunk carries the PE32 ordinal flag on disk.
    let thunk = image
        .slice_at_rva(
            Rva(library.rva_to_original_iat + 4),
            4,
            SectionDataType::Raw,
            false,
        )
        .unwrap();
    let raw_thunk = u32::from_le_bytes(thunk.as_ref().try_into().unwrap());
    assert_eq!(raw_thunk, 0x8000_0000 | 5);
}

#[test]
fn s4_relocation_expand() {
    let binary = minimal_export_dll();
    let mut image = parse32(&binary);

    let mut tables = image.get_relocations(true).unwrap();
    let original_count = tables.len();

    let mut table = RelocationTable::new(Rva(0x5000));
    table.add_relocation(RelocationEntry {
        rrva: 0x10,
        relocation_type: BaseRelocationType::HighLow as u16,
    });
    tables.push(table);

    let mut section = Section::new("reloc", SectionFlags::IMAGE_SCN_MEM_READ);
    section.set_raw_data(vec![0u8; 0x10]);
    let index = image.add_section(section).unwrap();
    let directory = image
        .rebuild_relocations(&tables, index, 0, true, true)
        .unwrap();

    // 8-byte header + one entry + one absolute pad entry.
    assert_eq!(directory.size, 12);

    let reread = image.get_relocations(false).unwrap();
    assert_eq!(reread.len(), original_count + 1);
    let block = reread.last().unwrap();
    assert_eq!(block.rva, Rva(0x5000));
    assert_eq!(block.relocations.len(), 1);
    assert_eq!(block.relocations[0].rrva, 0x10);

    // With absolute entries listed, the pad entry shows up.
    let with_absolute = image.get_relocations(true).unwrap();
    assert_eq!(with_absolute.last().unwrap().relocations.len(), 2);
}

#[test]
fn s5_rebase() {
    let binary = minimal_export_dll();
    let mut image = parse32(&binary);
    assert_eq!(image.image_base(), IMAGE_BASE as u64);

    let mut table = RelocationTable::new(Rva(0x1000));
    table.add_relocation(RelocationEntry {
        rrva: 0x500,
        relocation_type: BaseRelocationType::HighLow as u16,
    });

    image.rebase_image(&[table.clone()], 0x2000_0000).unwrap();
    assert_eq!(image.image_base(), 0x2000_0000);
    let patched = image
        .slice_at_rva(Rva(0x1500), 4, SectionDataType::Raw, false)
        .unwrap();
    assert_eq!(
        u32::from_le_bytes(patched.as_ref().try_into().unwrap()),
        0x2000_1234
    );

    // Rebasing twice lands where a single rebase to the final base would.
    image.rebase_image(&[table], 0x3000_0000).unwrap();
    let patched = image
        .slice_at_rva(Rva(0x1500), 4, SectionDataType::Raw, false)
        .unwrap();
    assert_eq!(
        u32::from_le_bytes(patched.as_ref().try_into().unwrap()),
        0x3000_1234
    );
}

#[test]
fn s6_resource_add_remove_rebuild() {
    let binary = minimal_export_dll();
    let mut image = parse32(&binary);

    // Seed a CUSTOM/100/0 subtree and emit it.
    let mut root = ResourceDirectory::default();
    let mut languages = ResourceDirectory::default();
    languages.add_entry(ResourceDirectoryEntry::id_data(
        0,
        ResourceDataEntry::new(b"custom-data".to_vec(), 1252),
    ));
    let mut ids = ResourceDirectory::default();
    ids.add_entry(ResourceDirectoryEntry::id_directory(100, languages));
    root.add_entry(ResourceDirectoryEntry::named_directory("CUSTOM", ids));

    let mut section = Section::new("rsrc1", SectionFlags::IMAGE_SCN_MEM_READ);
    section.set_raw_data(vec![0u8; 0x10]);
    let index = image.add_section(section).unwrap();
    image
        .rebuild_resources(&mut root, index, 0, true, true)
        .unwrap();

    let rebuilt = image.rebuild_pe(RebuildOptions::default()).unwrap();
    let mut image = parse32(&rebuilt);
    let mut tree = image.get_resources().unwrap();
    {
        let custom = tree.entry_by_name("CUSTOM").unwrap();
        let data = custom
            .get_resource_directory()
            .unwrap()
            .entry_by_id(100)
            .unwrap()
            .get_resource_directory()
            .unwrap()
            .entry_by_id(0)
            .unwrap()
            .get_data_entry()
            .unwrap();
        assert_eq!(data.data, b"custom-data");
        assert_eq!(data.codepage, 1252);
    }

    // Remove the whole CUSTOM subtree, add an icon group, re-emit.
    assert!(tree.remove_entry(&ResourceManager::name_key("CUSTOM")));
    let ids = {
        let mut manager = ResourceManager::new(&mut tree);
        manager
            .add_icon(
                &ico_file(2),
                ResourceManager::name_key("MAIN_ICON"),
                1033,
                IconPlaceMode::AfterMaxId,
                0,
                0,
            )
            .unwrap()
    };
    assert_eq!(ids, vec![1, 2]);

    let mut section = Section::new("rsrc2", SectionFlags::IMAGE_SCN_MEM_READ);
    section.set_raw_data(vec![0u8; 0x10]);
    let index = image.add_section(section).unwrap();
    image
        .rebuild_resources(&mut tree, index, 0, true, true)
        .unwrap();
    let rebuilt = image.rebuild_pe(RebuildOptions::default()).unwrap();
    let image = parse32(&rebuilt);

    let final_tree = image.get_resources().unwrap();
    assert!(final_tree.entry_by_name("CUSTOM").is_err());
    let viewer = ResourceViewer::new(&final_tree);
    let types = viewer.list_resource_types();
    assert!(types.contains(&(ResourceType::Icon as u32)));
    assert!(types.contains(&(ResourceType::IconGroup as u32)));
    assert_eq!(viewer.list_resource_ids(ResourceType::Icon as u32).unwrap(), vec![1, 2]);

    let ico = viewer.get_icon_by_name_lang(1033, "MAIN_ICON").unwrap();
    assert_eq!(&ico[..6], &ico_file(2)[..6]);
}

#[test]
fn address_translations_round_trip() {
    let binary = minimal_export_dll();
    let image = parse32(&binary);

    let offset = image.rva_to_file_offset(Rva(0x1234)).unwrap();
    assert_eq!(offset, FileOffset(0x200 + 0x234));
    assert_eq!(image.file_offset_to_rva(offset).unwrap(), Rva(0x1234));

    let va = image.rva_to_va(Rva(0x1500));
    assert_eq!(va.0, IMAGE_BASE as u64 + 0x1500);
    assert_eq!(image.va_to_rva(va, true).unwrap(), Rva(0x1500));
    assert!(image.va_to_rva(pe_forge::pe::Va(0x1), true).is_err());

    // Window lengths bound every slice request.
    let remaining = image
        .length_remaining_from_rva(Rva(0x1100), Rva(0x1100), SectionDataType::Raw, false)
        .unwrap();
    assert!(image
        .slice_at_rva(Rva(0x1100), remaining as usize, SectionDataType::Raw, false)
        .is_ok());
    assert!(image
        .slice_at_rva(
            Rva(0x1100),
            remaining as usize + 1,
            SectionDataType::Raw,
            false
        )
        .is_err());
}

#[test]
fn add_section_keeps_virtual_space_contiguous() {
    let binary = minimal_export_dll();
    let mut image = parse32(&binary);
    let before = image.sections().len();

    let mut section = Section::new("extra", SectionFlags::IMAGE_SCN_MEM_READ);
    section.set_raw_data(vec![0xaa; 0x333]);
    image.add_section(section).unwrap();

    assert_eq!(image.sections().len(), before + 1);
    let last = image.sections().last().unwrap();
    assert_eq!(
        image.size_of_image(),
        last.virtual_address() + last.virtual_size_aligned()
    );
    for pair in image.sections().windows(2) {
        assert_eq!(
            pair[1].virtual_address(),
            pair[0].virtual_address() + pair[0].virtual_size_aligned()
        );
    }
}

#[test]
fn checksum_ignores_its_own_field() {
    let binary = minimal_export_dll();
    let mut image = parse32(&binary);

    image.optional_header_mut().check_sum = 0;
    let without = image.rebuild_pe(RebuildOptions::default()).unwrap();
    image.optional_header_mut().check_sum = 0xdead_beef;
    let with = image.rebuild_pe(RebuildOptions::default()).unwrap();

    assert_eq!(
        calculate_checksum(&without).unwrap(),
        calculate_checksum(&with).unwrap()
    );
}

#[test]
fn factory_dispatches_on_magic() {
    let binary = minimal_export_dll();
    match parse_pe(&binary).unwrap() {
        PeFile::Pe32(image) => assert_eq!(image.sections().len(), 1),
        PeFile::Pe64(_) => panic!("PE32 image classified as PE32+"),
    }

    let binary64 = build_minimal_pe64();
    match parse_pe(&binary64).unwrap() {
        PeFile::Pe64(image) => {
            assert_eq!(image.image_base(), 0x1_4000_0000);
            assert_eq!(image.sections().len(), 1);
        }
        PeFile::Pe32(_) => panic!("PE32+ image classified as PE32"),
    }
}

fn build_minimal_pe64() -> Vec<u8> {
    let mut dos = ImageDosHeader::default();
    dos.e_lfanew = 64;

    let coff = CoffFileHeader {
        machine: 0x8664,
        number_of_sections: 1,
        size_of_optional_header: (core::mem::size_of::<OptionalHeader64>() + 16 * 8) as u16,
        characteristics: 0x2022, // EXECUTABLE_IMAGE | LARGE_ADDRESS_AWARE | DLL
        ..Default::default()
    };
    let optional = OptionalHeader64 {
        magic: 0x20b,
        image_base: 0x1_4000_0000,
        section_alignment: SECTION_ALIGNMENT,
        file_alignment: FILE_ALIGNMENT,
        size_of_image: 0x2000,
        size_of_headers: FILE_ALIGNMENT,
        subsystem: 2,
        number_of_rva_and_sizes: 16,
        ..Default::default()
    };
    let mut header = SectionHeader {
        virtual_size: 0x100,
        virtual_address: 0x1000,
        size_of_raw_data: 0x200,
        pointer_to_raw_data: 0x200,
        characteristics: (SectionFlags::IMAGE_SCN_MEM_READ
            | SectionFlags::IMAGE_SCN_CNT_INITIALIZED_DATA)
            .bits(),
        ..Default::default()
    };
    header.name[..5].copy_from_slice(b".data");

    let mut file = Vec::new();
    file.extend_from_slice(bytes_of(&dos));
    file.extend_from_slice(&0x0000_4550u32.to_le_bytes());
    file.extend_from_slice(bytes_of(&coff));
    file.extend_from_slice(bytes_of(&optional));
    file.extend_from_slice(&[0u8; 16 * 8]);
    file.extend_from_slice(bytes_of(&header));
    file.resize(0x200, 0);
    file.extend_from_slice(&[0x11; 0x200]);
    file
}

#[test]
fn tls_directory_round_trips_through_parse() {
    // Build the TLS struct in a section by hand, then read it back.
    let binary = minimal_export_dll();
    let mut image = parse32(&binary);

    let info = pe_forge::tls::TlsInfo {
        start_rva: Rva(0x1100),
        end_rva: Rva(0x1108),
        index_rva: Rva(0x1200),
        callbacks_rva: Rva(0x1300),
        size_of_zero_fill: 16,
        characteristics: 0,
        raw_data: vec![1, 2, 3, 4, 5, 6, 7, 8],
        callbacks: vec![Rva(0x1500)],
    };

    let mut section = Section::new("tls", SectionFlags::IMAGE_SCN_MEM_READ);
    section.set_raw_data(vec![0u8; 0x10]);
    let index = image.add_section(section).unwrap();
    image
        .rebuild_tls(
            &info,
            index,
            0,
            true,
            true,
            pe_forge::pe::SectionExpandType::Raw,
            true,
            true,
        )
        .unwrap();

    let parsed = image.get_tls_info().unwrap();
    assert_eq!(parsed.start_rva, info.start_rva);
    assert_eq!(parsed.end_rva, info.end_rva);
    assert_eq!(parsed.index_rva, info.index_rva);
    assert_eq!(parsed.callbacks_rva, info.callbacks_rva);
    assert_eq!(parsed.size_of_zero_fill, 16);
    assert_eq!(parsed.raw_data, info.raw_data);
    assert_eq!(parsed.callbacks, info.callbacks);
}

#[test]
fn export_info_survives_reemission() {
    // Invariant 1 at the header level: parse(rebuild(image)) preserves the
    // structural fields.
    let binary = minimal_export_dll();
    let mut image = parse32(&binary);
    let rebuilt = image.rebuild_pe(RebuildOptions::default()).unwrap();
    let reparsed = parse32(&rebuilt);

    assert_eq!(reparsed.coff_header().machine, image.coff_header().machine);
    assert_eq!(
        reparsed.coff_header().characteristics,
        image.coff_header().characteristics
    );
    assert_eq!(
        reparsed.directory_rva(DIRECTORY_ENTRY_EXPORT),
        image.directory_rva(DIRECTORY_ENTRY_EXPORT)
    );
    assert_eq!(reparsed.directory_rva(DIRECTORY_ENTRY_BASERELOC), 0);
    assert_eq!(
        reparsed.optional_header().section_alignment,
        image.optional_header().section_alignment
    );
}
