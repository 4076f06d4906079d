use bytemuck::{Pod, Zeroable};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use bitflags::bitflags;
use core::{fmt, str};
use crate::scribe::Scribe;
use crate::{Error, Result};

/// Magic values that determine if an Optional Header is
/// PE32 (32-bit) or PE32+ (64-bit)
#[derive(FromPrimitive, Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u16)]
pub enum Magic {
    /// Magic value for 32-bit PEs
    PE32 = 0x10b,
    /// Magic value for 64-bit PEs (PE32+)
    PE64 = 0x20b,
}

/// Index of the export table in the data-directory array.
pub const DIRECTORY_ENTRY_EXPORT: usize = 0;
/// Index of the import table.
pub const DIRECTORY_ENTRY_IMPORT: usize = 1;
/// Index of the resource table.
pub const DIRECTORY_ENTRY_RESOURCE: usize = 2;
/// Index of the exception table.
pub const DIRECTORY_ENTRY_EXCEPTION: usize = 3;
/// Index of the attribute certificate table. Its address is a file offset
/// and its contents are opaque to this crate.
pub const DIRECTORY_ENTRY_SECURITY: usize = 4;
/// Index of the base relocation table.
pub const DIRECTORY_ENTRY_BASERELOC: usize = 5;
/// Index of the debug directory.
pub const DIRECTORY_ENTRY_DEBUG: usize = 6;
/// Index of the architecture-specific data entry. Reserved, must be zero.
pub const DIRECTORY_ENTRY_ARCHITECTURE: usize = 7;
/// Index of the global pointer register entry.
pub const DIRECTORY_ENTRY_GLOBALPTR: usize = 8;
/// Index of the thread local storage table.
pub const DIRECTORY_ENTRY_TLS: usize = 9;
/// Index of the load configuration table.
pub const DIRECTORY_ENTRY_LOAD_CONFIG: usize = 10;
/// Index of the bound import directory. Its address is a file offset.
pub const DIRECTORY_ENTRY_BOUND_IMPORT: usize = 11;
/// Index of the import address table.
pub const DIRECTORY_ENTRY_IAT: usize = 12;
/// Index of the delay import descriptor.
pub const DIRECTORY_ENTRY_DELAY_IMPORT: usize = 13;
/// Index of the CLR runtime (COM descriptor) header.
pub const DIRECTORY_ENTRY_COM_DESCRIPTOR: usize = 14;

/// Number of slots in the data-directory array.
pub const NUMBER_OF_DIRECTORY_ENTRIES: usize = 16;

/// Each data directory gives the address and size of a table or string that
/// Windows uses. A data directory is an 8-byte field.
#[derive(Copy, Clone, Pod, Zeroable, Default, PartialEq, Eq, Debug)]
#[repr(C)]
pub struct DataDirectory {
    /// RVA of the table, relative to the base address of the image when the
    /// table is loaded. (For the security and bound-import entries this is a
    /// file offset instead.)
    pub virtual_address: u32,
    /// Size of the table in bytes.
    pub size: u32,
}

/// The 16-slot data-directory array stored at the end of the optional header.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct DataDirectories {
    /// The export table (.edata) address and size.
    pub export_table: DataDirectory,
    /// The import table (.idata) address and size.
    pub import_table: DataDirectory,
    /// The resource table (.rsrc) address and size.
    pub resource_table: DataDirectory,
    /// The exception table (.pdata) address and size.
    pub exception_table: DataDirectory,
    /// The attribute certificate table file offset and size.
    pub certificate_table: DataDirectory,
    /// The base relocation table (.reloc) address and size.
    pub base_relocation_table: DataDirectory,
    /// The debug data (.debug) starting address and size.
    pub debug: DataDirectory,
    /// Reserved, must be 0.
    pub architecture: DataDirectory,
    /// The RVA of the value to be stored in the global pointer register.
    pub global_ptr: DataDirectory,
    /// The thread local storage (TLS) table (.tls) address and size.
    pub tls_table: DataDirectory,
    /// The load configuration table address and size.
    pub load_config_table: DataDirectory,
    /// The bound import table file offset and size.
    pub bound_import: DataDirectory,
    /// The import address table address and size.
    pub import_address_table: DataDirectory,
    /// The delay import descriptor address and size.
    pub delay_import_descriptor: DataDirectory,
    /// The CLR runtime header (.cormeta) address and size.
    pub clr_runtime_header: DataDirectory,
    /// Reserved, must be zero.
    pub reserved: DataDirectory,
}

impl DataDirectories {
    /// Returns the directory at `index`, or `None` past the 16-entry array.
    pub fn entry(&self, index: usize) -> Option<&DataDirectory> {
        let entries: &[&DataDirectory; NUMBER_OF_DIRECTORY_ENTRIES] = &[
            &self.export_table,
            &self.import_table,
            &self.resource_table,
            &self.exception_table,
            &self.certificate_table,
            &self.base_relocation_table,
            &self.debug,
            &self.architecture,
            &self.global_ptr,
            &self.tls_table,
            &self.load_config_table,
            &self.bound_import,
            &self.import_address_table,
            &self.delay_import_descriptor,
            &self.clr_runtime_header,
            &self.reserved,
        ];
        entries.get(index).copied()
    }

    /// Returns a mutable reference to the directory at `index`.
    pub fn entry_mut(&mut self, index: usize) -> Option<&mut DataDirectory> {
        match index {
            DIRECTORY_ENTRY_EXPORT => Some(&mut self.export_table),
            DIRECTORY_ENTRY_IMPORT => Some(&mut self.import_table),
            DIRECTORY_ENTRY_RESOURCE => Some(&mut self.resource_table),
            DIRECTORY_ENTRY_EXCEPTION => Some(&mut self.exception_table),
            DIRECTORY_ENTRY_SECURITY => Some(&mut self.certificate_table),
            DIRECTORY_ENTRY_BASERELOC => Some(&mut self.base_relocation_table),
            DIRECTORY_ENTRY_DEBUG => Some(&mut self.debug),
            DIRECTORY_ENTRY_ARCHITECTURE => Some(&mut self.architecture),
            DIRECTORY_ENTRY_GLOBALPTR => Some(&mut self.global_ptr),
            DIRECTORY_ENTRY_TLS => Some(&mut self.tls_table),
            DIRECTORY_ENTRY_LOAD_CONFIG => Some(&mut self.load_config_table),
            DIRECTORY_ENTRY_BOUND_IMPORT => Some(&mut self.bound_import),
            DIRECTORY_ENTRY_IAT => Some(&mut self.import_address_table),
            DIRECTORY_ENTRY_DELAY_IMPORT => Some(&mut self.delay_import_descriptor),
            DIRECTORY_ENTRY_COM_DESCRIPTOR => Some(&mut self.clr_runtime_header),
            15 => Some(&mut self.reserved),
            _ => None,
        }
    }
}

impl fmt::Display for DataDirectories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Data Directories")?;
        writeln!(f, "----------------")?;
        writeln!(f, "Export Table:            {:#010x} ({})", self.export_table.virtual_address, self.export_table.size)?;
        writeln!(f, "Import Table:            {:#010x} ({})", self.import_table.virtual_address, self.import_table.size)?;
        writeln!(f, "Resource Table:          {:#010x} ({})", self.resource_table.virtual_address, self.resource_table.size)?;
        writeln!(f, "Exception Table:         {:#010x} ({})", self.exception_table.virtual_address, self.exception_table.size)?;
        writeln!(f, "Certificate Table:       {:#010x} ({})", self.certificate_table.virtual_address, self.certificate_table.size)?;
        writeln!(f, "Base Relocation Table:   {:#010x} ({})", self.base_relocation_table.virtual_address, self.base_relocation_table.size)?;
        writeln!(f, "Debug:                   {:#010x} ({})", self.debug.virtual_address, self.debug.size)?;
        writeln!(f, "Architecture:            {:#010x} ({})", self.architecture.virtual_address, self.architecture.size)?;
        writeln!(f, "Global Pointer:          {:#010x} ({})", self.global_ptr.virtual_address, self.global_ptr.size)?;
        writeln!(f, "TLS Table:               {:#010x} ({})", self.tls_table.virtual_address, self.tls_table.size)?;
        writeln!(f, "Load Config Table:       {:#010x} ({})", self.load_config_table.virtual_address, self.load_config_table.size)?;
        writeln!(f, "Bound Import:            {:#010x} ({})", self.bound_import.virtual_address, self.bound_import.size)?;
        writeln!(f, "Import Address Table:    {:#010x} ({})", self.import_address_table.virtual_address, self.import_address_table.size)?;
        writeln!(f, "Delay Import Descriptor: {:#010x} ({})", self.delay_import_descriptor.virtual_address, self.delay_import_descriptor.size)?;
        writeln!(f, "CLR Runtime Header:      {:#010x} ({})", self.clr_runtime_header.virtual_address, self.clr_runtime_header.size)?;
        writeln!(f, "Reserved:                {:#010x} ({})", self.reserved.virtual_address, self.reserved.size)?;
        Ok(())
    }
}

/// PE32 Optional Header, without the trailing data-directory array.
///
/// The directory array is kept apart because `NumberOfRvaAndSizes` governs
/// how many of its entries exist on disk.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct OptionalHeader32 {
    /// Identifies the state of the image file. 0x10B for PE32.
    pub magic: u16,
    /// The linker major version number.
    pub major_linker_version: u8,
    /// The linker minor version number.
    pub minor_linker_version: u8,
    /// The size of the code (text) section, or the sum of all code sections.
    pub size_of_code: u32,
    /// The size of the initialized data section(s).
    pub size_of_initialized_data: u32,
    /// The size of the uninitialized data section(s) (BSS).
    pub size_of_uninitialized_data: u32,
    /// The address of the entry point relative to the image base.
    pub address_of_entry_point: u32,
    /// RVA of the beginning-of-code section.
    pub base_of_code: u32,
    /// RVA of the beginning-of-data section. PE32 only.
    pub base_of_data: u32,
    /// The preferred address of the first byte of image when loaded into
    /// memory; must be a multiple of 64 K.
    pub image_base: u32,
    /// The alignment (in bytes) of sections when they are loaded into memory.
    /// Must be greater than or equal to `file_alignment`.
    pub section_alignment: u32,
    /// The alignment factor (in bytes) used to align the raw data of sections
    /// in the image file. A power of 2 between 512 and 64 K.
    pub file_alignment: u32,
    /// The major version number of the required operating system.
    pub major_operating_system_version: u16,
    /// The minor version number of the required operating system.
    pub minor_operating_system_version: u16,
    /// The major version number of the image.
    pub major_image_version: u16,
    /// The minor version number of the image.
    pub minor_image_version: u16,
    /// The major version number of the subsystem.
    pub major_subsystem_version: u16,
    /// The minor version number of the subsystem.
    pub minor_subsystem_version: u16,
    /// Reserved, must be zero.
    pub win32_version_value: u32,
    /// The size (in bytes) of the image as loaded in memory, including all
    /// headers. A multiple of `section_alignment`.
    pub size_of_image: u32,
    /// The combined size of the MS-DOS stub, PE header, and section headers
    /// rounded up to a multiple of `file_alignment`.
    pub size_of_headers: u32,
    /// The image file checksum.
    pub check_sum: u32,
    /// The subsystem that is required to run this image.
    pub subsystem: u16,
    /// Bitflag characteristics that describe how a DLL should be loaded.
    pub dll_characteristics: u16,
    /// The size of the stack to reserve.
    pub size_of_stack_reserve: u32,
    /// The size of the stack to commit.
    pub size_of_stack_commit: u32,
    /// The size of the local heap space to reserve.
    pub size_of_heap_reserve: u32,
    /// The size of the local heap space to commit.
    pub size_of_heap_commit: u32,
    /// Reserved, must be zero.
    pub loader_flags: u32,
    /// The number of data-directory entries in the remainder of the header.
    pub number_of_rva_and_sizes: u32,
}

/// PE32+ Optional Header, without the trailing data-directory array.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct OptionalHeader64 {
    /// Identifies the state of the image file. 0x20B for PE32+.
    pub magic: u16,
    /// The linker major version number.
    pub major_linker_version: u8,
    /// The linker minor version number.
    pub minor_linker_version: u8,
    /// The size of the code (text) section, or the sum of all code sections.
    pub size_of_code: u32,
    /// The size of the initialized data section(s).
    pub size_of_initialized_data: u32,
    /// The size of the uninitialized data section(s) (BSS).
    pub size_of_uninitialized_data: u32,
    /// The address of the entry point relative to the image base.
    pub address_of_entry_point: u32,
    /// RVA of the beginning-of-code section.
    pub base_of_code: u32,
    /// The preferred address of the first byte of image when loaded into
    /// memory; must be a multiple of 64 K.
    pub image_base: u64,
    /// The alignment (in bytes) of sections when they are loaded into memory.
    pub section_alignment: u32,
    /// The alignment factor (in bytes) used to align the raw data of sections.
    pub file_alignment: u32,
    /// The major version number of the required operating system.
    pub major_operating_system_version: u16,
    /// The minor version number of the required operating system.
    pub minor_operating_system_version: u16,
    /// The major version number of the image.
    pub major_image_version: u16,
    /// The minor version number of the image.
    pub minor_image_version: u16,
    /// The major version number of the subsystem.
    pub major_subsystem_version: u16,
    /// The minor version number of the subsystem.
    pub minor_subsystem_version: u16,
    /// Reserved, must be zero.
    pub win32_version_value: u32,
    /// The size (in bytes) of the image as loaded in memory.
    pub size_of_image: u32,
    /// The combined size of the MS-DOS stub, PE header, and section headers
    /// rounded up to a multiple of `file_alignment`.
    pub size_of_headers: u32,
    /// The image file checksum.
    pub check_sum: u32,
    /// The subsystem that is required to run this image.
    pub subsystem: u16,
    /// Bitflag characteristics that describe how a DLL should be loaded.
    pub dll_characteristics: u16,
    /// The size of the stack to reserve.
    pub size_of_stack_reserve: u64,
    /// The size of the stack to commit.
    pub size_of_stack_commit: u64,
    /// The size of the local heap space to reserve.
    pub size_of_heap_reserve: u64,
    /// The size of the local heap space to commit.
    pub size_of_heap_commit: u64,
    /// Reserved, must be zero.
    pub loader_flags: u32,
    /// The number of data-directory entries in the remainder of the header.
    pub number_of_rva_and_sizes: u32,
}

/// The following values defined for the Subsystem field of the optional header
/// determine which Windows subsystem (if any) is required to run the image.
#[derive(FromPrimitive, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Subsystem {
    /// An unknown subsystem
    Unknown = 0,
    /// Device drivers and native Windows processes
    Native = 1,
    /// The Windows graphical user interface (GUI) subsystem
    WindowsGUI = 2,
    /// The Windows character subsystem
    WindowsCUI = 3,
    /// The OS/2 character subsystem
    OS2CUI = 5,
    /// The Posix character subsystem
    PosixCUI = 7,
    /// Native Win9x driver
    NativeWindows = 8,
    /// Windows CE
    WindowsCEGUI = 9,
    /// An Extensible Firmware Interface (EFI) application
    EFIApplication = 10,
    /// An EFI driver with boot services
    EFIBootServiceDriver = 11,
    /// An EFI driver with run-time services
    EFIRuntimeDriver = 12,
    /// An EFI ROM image
    EFIROM = 13,
    /// XBOX
    XBOX = 14,
    /// Windows boot application
    WindowsBootApplication = 16,
}

bitflags! {
    /// Bitflags that contain various information about
    /// how a given DLL should be loaded.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct DllCharacteristics: u16 {
        /// Image can handle a high entropy 64-bit virtual address space.
        const IMAGE_DLLCHARACTERISTICS_HIGH_ENTROPY_VA = 0x0020;
        /// DLL can be relocated at load time.
        const IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE = 0x0040;
        /// Code Integrity checks are enforced.
        const IMAGE_DLLCHARACTERISTICS_FORCE_INTEGRITY = 0x0080;
        /// Image is NX compatible.
        const IMAGE_DLLCHARACTERISTICS_NX_COMPAT = 0x0100;
        /// Isolation aware, but do not isolate the image.
        const IMAGE_DLLCHARACTERISTICS_NO_ISOLATION = 0x0200;
        /// Does not use structured exception (SE) handling.
        const IMAGE_DLLCHARACTERISTICS_NO_SEH = 0x0400;
        /// Do not bind the image.
        const IMAGE_DLLCHARACTERISTICS_NO_BIND = 0x0800;
        /// Image must execute in an AppContainer.
        const IMAGE_DLLCHARACTERISTICS_APPCONTAINER = 0x1000;
        /// A WDM driver.
        const IMAGE_DLLCHARACTERISTICS_WDM_DRIVER = 0x2000;
        /// Image supports Control Flow Guard.
        const IMAGE_DLLCHARACTERISTICS_GUARD_CF = 0x4000;
        /// Terminal Server aware.
        const IMAGE_DLLCHARACTERISTICS_TERMINAL_SERVER_AWARE = 0x8000;
    }
}

// Allow DLL Characteristics flags to be easily printed
impl fmt::Debug for DllCharacteristics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for DllCharacteristics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl str::FromStr for DllCharacteristics {
    type Err = bitflags::parser::ParseError;

    fn from_str(flags: &str) -> core::result::Result<Self, Self::Err> {
        Ok(Self(flags.parse()?))
    }
}

/// Width-neutral access to the optional header. The two implementors differ
/// in the magic value, the width of `ImageBase` and the stack/heap fields,
/// and the presence of `BaseOfData`; everything else is shared through this
/// trait so the image container can stay generic.
pub trait Optional: Pod + Default {
    /// The magic value this header variant must carry.
    const MAGIC: u16;

    /// Parses the fixed part of the optional header at `offset`, advancing it.
    fn parse_optional_header(binary: &[u8], offset: &mut usize) -> Result<Self> {
        let header: Self = binary.read_pod(*offset).map_err(|_| Error::ErrorReadingImageNtHeaders)?;
        *offset += core::mem::size_of::<Self>();
        Ok(header)
    }

    /// Returns the raw magic field.
    fn magic(&self) -> u16;
    /// Returns the preferred load address.
    fn image_base(&self) -> u64;
    /// Sets the preferred load address. On PE32 the value is truncated to 32 bits.
    fn set_image_base(&mut self, base: u64);
    /// Returns the entry point RVA.
    fn address_of_entry_point(&self) -> u32;
    /// Sets the entry point RVA.
    fn set_address_of_entry_point(&mut self, ep: u32);
    /// Returns the section alignment.
    fn section_alignment(&self) -> u32;
    /// Returns the file alignment.
    fn file_alignment(&self) -> u32;
    /// Sets the file alignment without validation.
    fn set_file_alignment_unchecked(&mut self, alignment: u32);
    /// Returns `SizeOfImage`.
    fn size_of_image(&self) -> u32;
    /// Sets `SizeOfImage`.
    fn set_size_of_image(&mut self, size: u32);
    /// Returns `SizeOfHeaders`.
    fn size_of_headers(&self) -> u32;
    /// Sets `SizeOfHeaders`.
    fn set_size_of_headers(&mut self, size: u32);
    /// Returns the header checksum field.
    fn checksum(&self) -> u32;
    /// Sets the header checksum field.
    fn set_checksum(&mut self, checksum: u32);
    /// Returns `NumberOfRvaAndSizes`.
    fn number_of_rva_and_sizes(&self) -> u32;
    /// Sets `NumberOfRvaAndSizes`.
    fn set_number_of_rva_and_sizes(&mut self, number: u32);
    /// Returns the subsystem field.
    fn subsystem(&self) -> u16;
    /// Returns the DLL characteristics field.
    fn dll_characteristics(&self) -> u16;
    /// Sets `BaseOfCode`. A no-op on PE32+, which has no such field.
    fn set_base_of_code(&mut self, base: u32);
    /// Returns the stack reserve size.
    fn stack_size_reserve(&self) -> u64;
    /// Sets the stack reserve size.
    fn set_stack_size_reserve(&mut self, size: u64);
    /// Returns the stack commit size.
    fn stack_size_commit(&self) -> u64;
    /// Sets the stack commit size.
    fn set_stack_size_commit(&mut self, size: u64);
    /// Returns the heap reserve size.
    fn heap_size_reserve(&self) -> u64;
    /// Sets the heap reserve size.
    fn set_heap_size_reserve(&mut self, size: u64);
    /// Returns the heap commit size.
    fn heap_size_commit(&self) -> u64;
    /// Sets the heap commit size.
    fn set_heap_size_commit(&mut self, size: u64);

    /// Returns the subsystem as an enum
    fn get_subsystem(&self) -> Option<Subsystem> {
        Subsystem::from_u16(self.subsystem())
    }

    /// Returns the DLL Characteristics as bitflags
    fn get_dll_characteristics(&self) -> Option<DllCharacteristics> {
        DllCharacteristics::from_bits(self.dll_characteristics())
    }
}

macro_rules! forward_optional_accessors {
    () => {
        fn magic(&self) -> u16 {
            self.magic
        }
        fn address_of_entry_point(&self) -> u32 {
            self.address_of_entry_point
        }
        fn set_address_of_entry_point(&mut self, ep: u32) {
            self.address_of_entry_point = ep;
        }
        fn section_alignment(&self) -> u32 {
            self.section_alignment
        }
        fn file_alignment(&self) -> u32 {
            self.file_alignment
        }
        fn set_file_alignment_unchecked(&mut self, alignment: u32) {
            self.file_alignment = alignment;
        }
        fn size_of_image(&self) -> u32 {
            self.size_of_image
        }
        fn set_size_of_image(&mut self, size: u32) {
            self.size_of_image = size;
        }
        fn size_of_headers(&self) -> u32 {
            self.size_of_headers
        }
        fn set_size_of_headers(&mut self, size: u32) {
            self.size_of_headers = size;
        }
        fn checksum(&self) -> u32 {
            self.check_sum
        }
        fn set_checksum(&mut self, checksum: u32) {
            self.check_sum = checksum;
        }
        fn number_of_rva_and_sizes(&self) -> u32 {
            self.number_of_rva_and_sizes
        }
        fn set_number_of_rva_and_sizes(&mut self, number: u32) {
            self.number_of_rva_and_sizes = number;
        }
        fn subsystem(&self) -> u16 {
            self.subsystem
        }
        fn dll_characteristics(&self) -> u16 {
            self.dll_characteristics
        }
    };
}

impl Optional for OptionalHeader32 {
    const MAGIC: u16 = Magic::PE32 as u16;

    forward_optional_accessors!();

    fn image_base(&self) -> u64 {
        self.image_base.into()
    }
    fn set_image_base(&mut self, base: u64) {
        self.image_base = base as u32;
    }
    fn set_base_of_code(&mut self, base: u32) {
        self.base_of_code = base;
    }
    fn stack_size_reserve(&self) -> u64 {
        self.size_of_stack_reserve.into()
    }
    fn set_stack_size_reserve(&mut self, size: u64) {
        self.size_of_stack_reserve = size as u32;
    }
    fn stack_size_commit(&self) -> u64 {
        self.size_of_stack_commit.into()
    }
    fn set_stack_size_commit(&mut self, size: u64) {
        self.size_of_stack_commit = size as u32;
    }
    fn heap_size_reserve(&self) -> u64 {
        self.size_of_heap_reserve.into()
    }
    fn set_heap_size_reserve(&mut self, size: u64) {
        self.size_of_heap_reserve = size as u32;
    }
    fn heap_size_commit(&self) -> u64 {
        self.size_of_heap_commit.into()
    }
    fn set_heap_size_commit(&mut self, size: u64) {
        self.size_of_heap_commit = size as u32;
    }
}

impl Optional for OptionalHeader64 {
    const MAGIC: u16 = Magic::PE64 as u16;

    forward_optional_accessors!();

    fn image_base(&self) -> u64 {
        self.image_base
    }
    fn set_image_base(&mut self, base: u64) {
        self.image_base = base;
    }
    fn set_base_of_code(&mut self, base: u32) {
        self.base_of_code = base;
    }
    fn stack_size_reserve(&self) -> u64 {
        self.size_of_stack_reserve
    }
    fn set_stack_size_reserve(&mut self, size: u64) {
        self.size_of_stack_reserve = size;
    }
    fn stack_size_commit(&self) -> u64 {
        self.size_of_stack_commit
    }
    fn set_stack_size_commit(&mut self, size: u64) {
        self.size_of_stack_commit = size;
    }
    fn heap_size_reserve(&self) -> u64 {
        self.size_of_heap_reserve
    }
    fn set_heap_size_reserve(&mut self, size: u64) {
        self.size_of_heap_reserve = size;
    }
    fn heap_size_commit(&self) -> u64 {
        self.size_of_heap_commit
    }
    fn set_heap_size_commit(&mut self, size: u64) {
        self.size_of_heap_commit = size;
    }
}

impl fmt::Display for OptionalHeader32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optional Header")?;
        writeln!(f, "---------------")?;
        writeln!(f, "Magic:                      PE32")?;
        writeln!(f, "Linker Version:             {}.{}", self.major_linker_version, self.minor_linker_version)?;
        writeln!(f, "Address of Entry Point:     {:#010x}", self.address_of_entry_point)?;
        writeln!(f, "Image Base:                 {:#010x}", self.image_base)?;
        writeln!(f, "Section Alignment:          {}", self.section_alignment)?;
        writeln!(f, "File Alignment:             {}", self.file_alignment)?;
        writeln!(f, "Size of Image:              {}", self.size_of_image)?;
        writeln!(f, "Size of Headers:            {}", self.size_of_headers)?;
        writeln!(f, "CheckSum:                   {:#010x}", self.check_sum)?;
        writeln!(f, "Subsystem:                  {:?}", self.get_subsystem())?;
        writeln!(f, "Number of RVA and Sizes:    {}", self.number_of_rva_and_sizes)?;
        Ok(())
    }
}

impl fmt::Display for OptionalHeader64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optional Header")?;
        writeln!(f, "---------------")?;
        writeln!(f, "Magic:                      PE32+")?;
        writeln!(f, "Linker Version:             {}.{}", self.major_linker_version, self.minor_linker_version)?;
        writeln!(f, "Address of Entry Point:     {:#010x}", self.address_of_entry_point)?;
        writeln!(f, "Image Base:                 {:#018x}", self.image_base)?;
        writeln!(f, "Section Alignment:          {}", self.section_alignment)?;
        writeln!(f, "File Alignment:             {}", self.file_alignment)?;
        writeln!(f, "Size of Image:              {}", self.size_of_image)?;
        writeln!(f, "Size of Headers:            {}", self.size_of_headers)?;
        writeln!(f, "CheckSum:                   {:#010x}", self.check_sum)?;
        writeln!(f, "Subsystem:                  {:?}", self.get_subsystem())?;
        writeln!(f, "Number of RVA and Sizes:    {}", self.number_of_rva_and_sizes)?;
        Ok(())
    }
}
