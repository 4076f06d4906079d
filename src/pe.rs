use crate::arch::{ImageArch, Pe32, Pe64};
use crate::coff::{Characteristics, CoffFileHeader};
use crate::dos::{self, ImageDosHeader, RichRecord, DOS_MAGIC};
use crate::optional::{
    DataDirectories, DataDirectory, Magic, Optional, DIRECTORY_ENTRY_BOUND_IMPORT,
    DIRECTORY_ENTRY_DEBUG, NUMBER_OF_DIRECTORY_ENTRIES,
};
use crate::scribe::{align_down, align_up, is_power_of_two, is_sum_safe, Scribe};
use crate::section::Section;
use crate::{Error, Result};
use bytemuck::bytes_of;
use num_traits::FromPrimitive;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// A relative virtual address: an offset from the image's load base.
///
/// The three PE coordinate systems ([`Rva`], [`Va`], [`FileOffset`]) are
/// deliberately distinct types; conversions between them live on
/// [`PortableExecutable`] and nowhere else.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Rva(pub u32);

/// An absolute virtual address: `ImageBase + RVA`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Va(pub u64);

/// A byte offset from the start of the on-disk image.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct FileOffset(pub u32);

impl fmt::Display for Rva {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Display for Va {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for FileOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Which view of a section a data window refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SectionDataType {
    /// The bytes stored in the file.
    Raw,
    /// The raw bytes zero-padded up to the aligned virtual size.
    Virtual,
}

/// Which dimension of a section to grow when expanding it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SectionExpandType {
    /// Grow the raw data buffer.
    Raw,
    /// Grow the declared virtual size.
    Virtual,
}

/// Location of a rebuilt directory: the (rva, size) pair that belongs in the
/// data-directory array.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageDirectory {
    /// RVA of the rebuilt data.
    pub rva: Rva,
    /// Size in bytes of the rebuilt data.
    pub size: u32,
}

/// Options accepted by [`PortableExecutable::rebuild_pe`].
#[derive(Copy, Clone, Debug)]
pub struct RebuildOptions {
    /// Emit only the first 16 bytes of the DOS header and drop the stub
    /// overlay. The NT headers then start at offset 16.
    pub strip_dos_header: bool,
    /// Recompute `SizeOfHeaders` from the emitted header area.
    pub change_size_of_headers: bool,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        RebuildOptions {
            strip_dos_header: false,
            change_size_of_headers: true,
        }
    }
}

/// Hard cap on the number of sections an image may carry.
pub const MAXIMUM_NUMBER_OF_SECTIONS: usize = 96;

const MINIMUM_FILE_ALIGNMENT: u32 = 512;
const TWO_GB: u32 = 0x8000_0000;
const NT_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const SIZE_OF_DOS_HEADER: usize = core::mem::size_of::<ImageDosHeader>();
const SIZE_OF_FILE_HEADER: usize = core::mem::size_of::<CoffFileHeader>();
const SIZE_OF_DATA_DIRECTORY: usize = core::mem::size_of::<DataDirectory>();
const SIZE_OF_SECTION_HEADER: usize = 40;

/// A fully parsed PE32 or PE32+ image.
///
/// The type parameter fixes the width-dependent parts of the format at
/// compile time; use [`parse_pe`] when the variant is not known up front.
pub struct PortableExecutable<A: ImageArch> {
    pub(crate) dos_header: ImageDosHeader,
    pub(crate) rich_overlay: Vec<u8>,
    pub(crate) coff: CoffFileHeader,
    pub(crate) optional: A::OptionalHeader,
    pub(crate) directories: DataDirectories,
    pub(crate) sections: Vec<Section>,
    pub(crate) full_headers_data: Vec<u8>,
    pub(crate) bound_import_data: Vec<u8>,
    pub(crate) debug_data: BTreeMap<u32, Vec<u8>>,
    pub(crate) has_overlay: bool,
    _arch: PhantomData<A>,
}

impl<A: ImageArch> PortableExecutable<A> {
    /// Parses an image, capturing bound-import and debug raw payloads.
    pub fn parse(binary: &[u8]) -> Result<Self> {
        Self::parse_with_options(binary, true, true)
    }

    /// Parses an image. `read_bound_import_raw_data` and `read_debug_raw_data`
    /// control whether the out-of-section payloads those directories reference
    /// are captured for later inspection.
    pub fn parse_with_options(
        binary: &[u8],
        read_bound_import_raw_data: bool,
        read_debug_raw_data: bool,
    ) -> Result<Self> {
        let dos_header: ImageDosHeader =
            binary.read_pod(0).map_err(|_| Error::BadDosHeader)?;
        if dos_header.e_magic != DOS_MAGIC {
            return Err(Error::BadDosHeader);
        }
        if dos_header.e_lfanew % 4 != 0 {
            return Err(Error::BadDosHeader);
        }
        let lfanew = dos_header.e_lfanew as usize;
        if lfanew >= binary.len() {
            return Err(Error::ImageNtHeadersNotFound);
        }

        if binary
            .read_u32(lfanew)
            .map_err(|_| Error::ErrorReadingImageNtHeaders)?
            != NT_SIGNATURE
        {
            return Err(Error::BadPeSignature);
        }

        let coff: CoffFileHeader = binary
            .read_pod(lfanew + 4)
            .map_err(|_| Error::ErrorReadingImageNtHeaders)?;

        let optional_offset = lfanew + 4 + SIZE_OF_FILE_HEADER;
        let magic = binary
            .read_u16(optional_offset)
            .map_err(|_| Error::ErrorReadingImageNtHeaders)?;
        if magic != A::MAGIC {
            return Err(Error::BadPeSignature);
        }
        let mut optional: A::OptionalHeader = binary
            .read_pod(optional_offset)
            .map_err(|_| Error::ErrorReadingImageNtHeaders)?;

        // NumberOfRvaAndSizes is silently clamped to the 16-slot array.
        if optional.number_of_rva_and_sizes() > NUMBER_OF_DIRECTORY_ENTRIES as u32 {
            optional.set_number_of_rva_and_sizes(NUMBER_OF_DIRECTORY_ENTRIES as u32);
        }

        let mut directories = DataDirectories::default();
        let directories_offset = optional_offset + core::mem::size_of::<A::OptionalHeader>();
        for index in 0..optional.number_of_rva_and_sizes() as usize {
            let entry: DataDirectory = binary
                .read_pod(directories_offset + index * SIZE_OF_DATA_DIRECTORY)
                .map_err(|_| Error::ErrorReadingImageNtHeaders)?;
            if let Some(slot) = directories.entry_mut(index) {
                *slot = entry;
            }
        }

        if coff.number_of_sections as usize > MAXIMUM_NUMBER_OF_SECTIONS {
            return Err(Error::ImageSectionTableIncorrect);
        }

        let section_alignment = optional.section_alignment();
        let file_alignment = optional.file_alignment();
        if !is_power_of_two(section_alignment) {
            return Err(Error::IncorrectSectionAlignment);
        }
        if !is_power_of_two(file_alignment) {
            return Err(Error::IncorrectFileAlignment);
        }
        if file_alignment != section_alignment
            && (file_alignment < MINIMUM_FILE_ALIGNMENT || file_alignment > section_alignment)
        {
            return Err(Error::IncorrectFileAlignment);
        }
        if align_up(optional.size_of_image(), section_alignment)? == 0 {
            return Err(Error::IncorrectSizeOfImage);
        }

        let rich_overlay = if lfanew > SIZE_OF_DOS_HEADER {
            binary
                .get(SIZE_OF_DOS_HEADER..lfanew)
                .ok_or(Error::ErrorReadingOverlay)?
                .to_vec()
        } else {
            Vec::new()
        };

        let aligned_size_of_image = align_up(optional.size_of_image(), section_alignment)?;
        let mut sections = Vec::with_capacity(coff.number_of_sections as usize);
        let mut section_header_offset =
            lfanew + 4 + SIZE_OF_FILE_HEADER + coff.size_of_optional_header as usize;
        let mut last_raw_size = 0u32;

        for _ in 0..coff.number_of_sections {
            if section_header_offset + SIZE_OF_SECTION_HEADER > binary.len() {
                return Err(Error::ImageSectionHeadersNotFound);
            }
            let mut section = Section::default();
            section.header = binary
                .read_pod(section_header_offset)
                .map_err(|_| Error::ErrorReadingSectionHeader)?;
            section_header_offset += SIZE_OF_SECTION_HEADER;

            if section.header.size_of_raw_data == 0 && section.header.virtual_size == 0 {
                return Err(Error::ZeroSectionSizes);
            }
            if !is_sum_safe(section.header.virtual_address, section.header.virtual_size)
                || section.header.virtual_size > TWO_GB
                || !is_sum_safe(
                    section.header.pointer_to_raw_data,
                    section.header.size_of_raw_data,
                )
                || section.header.size_of_raw_data > TWO_GB
            {
                return Err(Error::SectionIncorrectAddrOrSize);
            }

            if section.header.size_of_raw_data != 0 {
                last_raw_size = section.header.size_of_raw_data;
                // Raw size past the virtual extent is clamped on load.
                if align_up(section.header.size_of_raw_data, file_alignment)?
                    > align_up(section.header.virtual_size, section_alignment)?
                {
                    section.header.size_of_raw_data = section.header.virtual_size;
                }

                let raw_start = align_down(section.header.pointer_to_raw_data, file_alignment)?;
                if section.header.virtual_address
                    + align_up(section.header.virtual_size, section_alignment)?
                    > aligned_size_of_image
                    || raw_start as u64 + section.header.size_of_raw_data as u64
                        > binary.len() as u64
                {
                    return Err(Error::SectionIncorrectAddrOrSize);
                }

                section.virtual_size_aligned = if section.header.virtual_size == 0 {
                    align_up(section.header.size_of_raw_data, section_alignment)?
                } else {
                    align_up(section.header.virtual_size, section_alignment)?
                };
                section.raw_size_aligned =
                    align_up(section.header.size_of_raw_data, file_alignment)?;

                let raw_start = raw_start as usize;
                let raw_end = raw_start + section.header.size_of_raw_data as usize;
                section.raw_data = binary
                    .get(raw_start..raw_end)
                    .ok_or(Error::ImageSectionDataNotFound)?
                    .to_vec();
            } else {
                section.raw_size_aligned = 0;
                section.virtual_size_aligned =
                    align_up(section.header.virtual_size, section_alignment)?;
            }

            if section.header.virtual_address as u64 + section.virtual_size_aligned as u64
                > aligned_size_of_image as u64
            {
                return Err(Error::SectionIncorrectAddrOrSize);
            }

            sections.push(section);
        }

        if let Some(first) = sections.first() {
            if optional.size_of_headers() > first.header.virtual_address {
                return Err(Error::IncorrectSizeOfHeaders);
            }
        }
        for pair in sections.windows(2) {
            if pair[1].header.virtual_address
                != pair[0].header.virtual_address + pair[0].virtual_size_aligned
            {
                return Err(Error::ImageSectionTableIncorrect);
            }
        }

        let has_overlay = sections.last().map_or(false, |last| {
            binary.len() as u64 > last.header.pointer_to_raw_data as u64 + last_raw_size as u64
        });

        if (optional.size_of_headers() as usize) > binary.len() {
            return Err(Error::StreamIsBad);
        }
        let full_headers_data = binary[..optional.size_of_headers() as usize].to_vec();

        let mut image = PortableExecutable {
            dos_header,
            rich_overlay,
            coff,
            optional,
            directories,
            sections,
            full_headers_data,
            bound_import_data: Vec::new(),
            debug_data: BTreeMap::new(),
            has_overlay,
            _arch: PhantomData,
        };

        // The bound import directory's address field is a file offset, so its
        // bytes are unreachable through section windows and are captured now.
        if read_bound_import_raw_data && image.has_bound_import() {
            let offset = image.directory_rva(DIRECTORY_ENTRY_BOUND_IMPORT) as usize;
            let size = image.directory_size(DIRECTORY_ENTRY_BOUND_IMPORT) as usize;
            match binary.get(offset..offset.saturating_add(size)) {
                Some(data) => image.bound_import_data = data.to_vec(),
                None => {
                    log::warn!("bound import raw data escapes the file, deferring the error");
                }
            }
        }

        if read_debug_raw_data && image.has_debug() {
            image.read_debug_payloads(binary);
        }

        log::debug!(
            "parsed {} image: {} sections, image base {:#x}",
            if A::IS_64 { "PE32+" } else { "PE32" },
            image.sections.len(),
            image.image_base(),
        );
        Ok(image)
    }

    /// Captures the file bytes referenced by CodeView/Misc/COFF debug entries.
    /// Corruption here is non-fatal: entries simply lose their advanced info.
    fn read_debug_payloads(&mut self, binary: &[u8]) {
        const SIZE_OF_DEBUG_DIRECTORY: u32 = 28;
        const DEBUG_TYPE_COFF: u32 = 1;
        const DEBUG_TYPE_CODEVIEW: u32 = 2;
        const DEBUG_TYPE_MISC: u32 = 4;

        let dir_rva = self.directory_rva(DIRECTORY_ENTRY_DEBUG);
        let dir_size = self.directory_size(DIRECTORY_ENTRY_DEBUG);
        let mut current = dir_rva;
        loop {
            if current >= dir_rva.saturating_add(dir_size) {
                break;
            }
            let window = match self.section_window(Rva(current), SectionDataType::Virtual, true) {
                Ok(window) => window,
                Err(_) => {
                    log::warn!("debug directory escapes its section, stopping payload capture");
                    break;
                }
            };
            let type_field = match window.read_u32(12) {
                Ok(value) => value,
                Err(_) => break,
            };
            let size_of_data = window.read_u32(16).unwrap_or(0);
            let pointer_to_raw = window.read_u32(24).unwrap_or(0);
            if pointer_to_raw == 0 {
                break;
            }
            if matches!(type_field, DEBUG_TYPE_COFF | DEBUG_TYPE_CODEVIEW | DEBUG_TYPE_MISC)
                && size_of_data != 0
            {
                let start = pointer_to_raw as usize;
                match binary.get(start..start.saturating_add(size_of_data as usize)) {
                    Some(data) => {
                        self.debug_data.insert(pointer_to_raw, data.to_vec());
                    }
                    None => log::warn!("debug payload escapes the file, skipping entry"),
                }
            }
            current = current.saturating_add(SIZE_OF_DEBUG_DIRECTORY);
        }
    }
}

impl<A: ImageArch> PortableExecutable<A> {
    /// The DOS header of the image.
    pub fn dos_header(&self) -> &ImageDosHeader {
        &self.dos_header
    }

    /// The COFF file header of the image.
    pub fn coff_header(&self) -> &CoffFileHeader {
        &self.coff
    }

    /// The fixed part of the optional header.
    pub fn optional_header(&self) -> &A::OptionalHeader {
        &self.optional
    }

    /// Mutable access to the fixed part of the optional header.
    pub fn optional_header_mut(&mut self) -> &mut A::OptionalHeader {
        &mut self.optional
    }

    /// The 16-slot data-directory array.
    pub fn data_directories(&self) -> &DataDirectories {
        &self.directories
    }

    /// The parsed image sections, in ascending RVA order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Mutable access to the image sections.
    pub fn sections_mut(&mut self) -> &mut [Section] {
        &mut self.sections
    }

    /// The raw stub overlay between the DOS header and the NT headers.
    pub fn stub_overlay(&self) -> &[u8] {
        &self.rich_overlay
    }

    /// Drops the stub overlay.
    pub fn strip_stub_overlay(&mut self) {
        self.rich_overlay.clear();
    }

    /// Overwrites every stub overlay byte with `value`.
    pub fn fill_stub_overlay(&mut self, value: u8) {
        self.rich_overlay.iter_mut().for_each(|b| *b = value);
    }

    /// Decodes the "Rich" records from the stub overlay. Corruption yields an
    /// empty list.
    pub fn get_rich_data(&self) -> Vec<RichRecord> {
        dos::decode_rich_overlay(&self.rich_overlay)
    }

    /// True if file data follows the last section's raw bytes.
    pub fn has_overlay(&self) -> bool {
        self.has_overlay
    }

    /// The captured bytes of the header area, `[0, SizeOfHeaders)`.
    pub fn full_headers_data(&self) -> &[u8] {
        &self.full_headers_data
    }

    /// The raw bound-import blob captured at parse time.
    pub fn bound_import_raw_data(&self) -> &[u8] {
        &self.bound_import_data
    }

    /// The debug payloads captured at parse time, keyed by file offset.
    pub fn debug_raw_data(&self) -> &BTreeMap<u32, Vec<u8>> {
        &self.debug_data
    }

    /// The preferred load address.
    pub fn image_base(&self) -> u64 {
        self.optional.image_base()
    }

    /// Sets the preferred load address field. Use
    /// [`rebase_image`](Self::rebase_image) to also fix up relocated values.
    pub fn set_image_base(&mut self, base: u64) {
        self.optional.set_image_base(base);
    }

    /// The entry point RVA.
    pub fn entry_point(&self) -> Rva {
        Rva(self.optional.address_of_entry_point())
    }

    /// Sets the entry point RVA.
    pub fn set_entry_point(&mut self, ep: Rva) {
        self.optional.set_address_of_entry_point(ep.0);
    }

    /// The section alignment.
    pub fn section_alignment(&self) -> u32 {
        self.optional.section_alignment()
    }

    /// The file alignment.
    pub fn file_alignment(&self) -> u32 {
        self.optional.file_alignment()
    }

    /// Sets the file alignment after validating it is a power of two, at
    /// least 512, and no larger than the section alignment.
    pub fn set_file_alignment(&mut self, alignment: u32) -> Result<()> {
        if alignment < MINIMUM_FILE_ALIGNMENT
            || !is_power_of_two(alignment)
            || alignment > self.section_alignment()
        {
            return Err(Error::IncorrectFileAlignment);
        }
        self.optional.set_file_alignment_unchecked(alignment);
        Ok(())
    }

    /// `SizeOfImage` from the optional header.
    pub fn size_of_image(&self) -> u32 {
        self.optional.size_of_image()
    }

    /// `SizeOfHeaders` from the optional header.
    pub fn size_of_headers(&self) -> u32 {
        self.optional.size_of_headers()
    }

    /// The COFF characteristics field.
    pub fn characteristics(&self) -> u16 {
        self.coff.characteristics
    }

    /// True if every given characteristics flag is set.
    pub fn check_characteristics_flag(&self, flag: Characteristics) -> bool {
        self.coff.characteristics & flag.bits() == flag.bits()
    }

    /// Sets the given characteristics flags.
    pub fn set_characteristics_flags(&mut self, flags: Characteristics) {
        self.coff.characteristics |= flags.bits();
    }

    /// Clears the given characteristics flags.
    pub fn clear_characteristics_flags(&mut self, flags: Characteristics) {
        self.coff.characteristics &= !flags.bits();
    }

    /// True if the subsystem is the Windows character subsystem.
    pub fn is_console(&self) -> bool {
        self.optional.subsystem() == 3
    }

    /// True if the subsystem is the Windows GUI subsystem.
    pub fn is_gui(&self) -> bool {
        self.optional.subsystem() == 2
    }

    // --- data directories ---

    /// RVA of the directory at `id`, zero when absent.
    pub fn directory_rva(&self, id: usize) -> u32 {
        self.directories
            .entry(id)
            .map_or(0, |entry| entry.virtual_address)
    }

    /// Size of the directory at `id`, zero when absent.
    pub fn directory_size(&self, id: usize) -> u32 {
        self.directories.entry(id).map_or(0, |entry| entry.size)
    }

    /// Sets the RVA of the directory at `id`. Only the header value changes;
    /// no data moves.
    pub fn set_directory_rva(&mut self, id: usize, rva: Rva) {
        if let Some(entry) = self.directories.entry_mut(id) {
            entry.virtual_address = rva.0;
        }
    }

    /// Sets the size of the directory at `id`.
    pub fn set_directory_size(&mut self, id: usize, size: u32) {
        if let Some(entry) = self.directories.entry_mut(id) {
            entry.size = size;
        }
    }

    /// True if the directory at `id` has a non-zero address.
    pub fn directory_exists(&self, id: usize) -> bool {
        self.directory_rva(id) != 0
    }

    /// Zeroes the directory entry at `id`.
    pub fn remove_directory(&mut self, id: usize) {
        if let Some(entry) = self.directories.entry_mut(id) {
            *entry = DataDirectory::default();
        }
    }

    /// Strips trailing all-zero data-directory entries down to at most
    /// `min_count` and lowers `NumberOfRvaAndSizes`. Returns the new count.
    pub fn strip_data_directories(&mut self, min_count: u32) -> u32 {
        let mut count = self.optional.number_of_rva_and_sizes();
        while count > min_count {
            match self.directories.entry(count as usize - 1) {
                Some(entry) if entry.virtual_address == 0 && entry.size == 0 => count -= 1,
                _ => break,
            }
        }
        self.optional.set_number_of_rva_and_sizes(count);
        count
    }

    /// True if the image has an import directory.
    pub fn has_imports(&self) -> bool {
        self.directory_exists(crate::optional::DIRECTORY_ENTRY_IMPORT)
    }

    /// True if the image has an export directory.
    pub fn has_exports(&self) -> bool {
        self.directory_exists(crate::optional::DIRECTORY_ENTRY_EXPORT)
    }

    /// True if the image has a resource directory.
    pub fn has_resources(&self) -> bool {
        self.directory_exists(crate::optional::DIRECTORY_ENTRY_RESOURCE)
    }

    /// True if the image has a security (certificate) directory.
    pub fn has_security(&self) -> bool {
        self.directory_exists(crate::optional::DIRECTORY_ENTRY_SECURITY)
    }

    /// True if the image has base relocations that have not been stripped.
    pub fn has_reloc(&self) -> bool {
        self.directory_exists(crate::optional::DIRECTORY_ENTRY_BASERELOC)
            && !self.check_characteristics_flag(Characteristics::IMAGE_FILE_RELOCS_STRIPPED)
    }

    /// True if the image has a TLS directory.
    pub fn has_tls(&self) -> bool {
        self.directory_exists(crate::optional::DIRECTORY_ENTRY_TLS)
    }

    /// True if the image has a load-configuration directory.
    pub fn has_config(&self) -> bool {
        self.directory_exists(crate::optional::DIRECTORY_ENTRY_LOAD_CONFIG)
    }

    /// True if the image has a bound-import directory.
    pub fn has_bound_import(&self) -> bool {
        self.directory_exists(DIRECTORY_ENTRY_BOUND_IMPORT)
    }

    /// True if the image has a delay-import directory.
    pub fn has_delay_import(&self) -> bool {
        self.directory_exists(crate::optional::DIRECTORY_ENTRY_DELAY_IMPORT)
    }

    /// True if the image carries a .NET (COR20) header.
    pub fn is_dotnet(&self) -> bool {
        self.directory_exists(crate::optional::DIRECTORY_ENTRY_COM_DESCRIPTOR)
    }

    /// True if the image has an exception directory.
    pub fn has_exception_directory(&self) -> bool {
        self.directory_exists(crate::optional::DIRECTORY_ENTRY_EXCEPTION)
    }

    /// True if the image has a debug directory.
    pub fn has_debug(&self) -> bool {
        self.directory_exists(DIRECTORY_ENTRY_DEBUG)
    }

    // --- address model ---

    /// Translates a VA to an RVA. With `bound_check` set, underflow and
    /// results past `SizeOfImage` are rejected.
    pub fn va_to_rva(&self, va: Va, bound_check: bool) -> Result<Rva> {
        let base = self.image_base();
        if bound_check {
            let rva = va.0.checked_sub(base).ok_or(Error::RvaNotExists)?;
            if rva > self.size_of_image() as u64 {
                return Err(Error::RvaNotExists);
            }
            Ok(Rva(rva as u32))
        } else {
            Ok(Rva(va.0.wrapping_sub(base) as u32))
        }
    }

    /// Translates an RVA to a VA.
    pub fn rva_to_va(&self, rva: Rva) -> Va {
        Va(self.image_base().wrapping_add(rva.0 as u64))
    }

    /// Translates an RVA to the file offset of the same byte.
    pub fn rva_to_file_offset(&self, rva: Rva) -> Result<FileOffset> {
        let section = self.section_from_rva(rva)?;
        Ok(FileOffset(
            section.header.pointer_to_raw_data + (rva.0 - section.header.virtual_address),
        ))
    }

    /// Translates a file offset back to an RVA, selecting the section whose
    /// raw range contains the offset.
    pub fn file_offset_to_rva(&self, offset: FileOffset) -> Result<Rva> {
        let section = self.section_from_file_offset(offset)?;
        Ok(Rva(
            offset.0 - section.header.pointer_to_raw_data + section.header.virtual_address,
        ))
    }

    /// Finds the section whose aligned virtual range contains `rva`.
    pub fn section_from_rva(&self, rva: Rva) -> Result<&Section> {
        self.sections
            .iter()
            .find(|section| section.contains_rva(rva.0))
            .ok_or(Error::NoSectionFound)
    }

    /// Mutable variant of [`section_from_rva`](Self::section_from_rva).
    pub fn section_from_rva_mut(&mut self, rva: Rva) -> Result<&mut Section> {
        self.sections
            .iter_mut()
            .find(|section| section.contains_rva(rva.0))
            .ok_or(Error::NoSectionFound)
    }

    /// Finds the section whose aligned virtual range contains `va`.
    pub fn section_from_va(&self, va: Va) -> Result<&Section> {
        let rva = self.va_to_rva(va, true)?;
        self.section_from_rva(rva)
    }

    /// Finds the section whose raw file range contains `offset`.
    pub fn section_from_file_offset(&self, offset: FileOffset) -> Result<&Section> {
        self.sections
            .iter()
            .find(|section| {
                offset.0 >= section.header.pointer_to_raw_data
                    && ((offset.0 - section.header.pointer_to_raw_data) as usize)
                        < section.raw_data.len()
            })
            .ok_or(Error::NoSectionFound)
    }

    /// Finds the section containing the directory at `id`.
    pub fn section_from_directory(&self, id: usize) -> Result<&Section> {
        self.section_from_rva(Rva(self.directory_rva(id)))
    }

    /// Index of the section whose aligned virtual range contains `rva`.
    pub fn section_index_from_rva(&self, rva: Rva) -> Result<usize> {
        self.sections
            .iter()
            .position(|section| section.contains_rva(rva.0))
            .ok_or(Error::NoSectionFound)
    }

    /// RVA of `offset` bytes into the raw data of section `index`.
    pub fn rva_from_section_offset(&self, index: usize, offset: u32) -> Result<Rva> {
        let section = self.sections.get(index).ok_or(Error::NoSectionFound)?;
        if !is_sum_safe(section.header.virtual_address, offset) {
            return Err(Error::RvaNotExists);
        }
        Ok(Rva(section.header.virtual_address + offset))
    }

    /// Returns the window of bytes from `rva` to the end of the containing
    /// section in the chosen view. With `include_headers`, RVAs below
    /// `SizeOfHeaders` resolve into the captured header prefix instead.
    pub fn section_window(
        &self,
        rva: Rva,
        data_type: SectionDataType,
        include_headers: bool,
    ) -> Result<Cow<'_, [u8]>> {
        if include_headers && (rva.0 as usize) < self.full_headers_data.len() {
            return Ok(Cow::Borrowed(&self.full_headers_data[rva.0 as usize..]));
        }
        let section = self.section_from_rva(rva)?;
        let offset = (rva.0 - section.header.virtual_address) as usize;
        match data_type {
            SectionDataType::Raw => {
                if offset >= section.raw_data.len() {
                    return Ok(Cow::Borrowed(&[]));
                }
                Ok(Cow::Borrowed(&section.raw_data[offset..]))
            }
            SectionDataType::Virtual => match section.virtual_data() {
                Cow::Borrowed(data) => Ok(Cow::Borrowed(&data[offset..])),
                Cow::Owned(mut data) => {
                    data.drain(..offset);
                    Ok(Cow::Owned(data))
                }
            },
        }
    }

    /// Returns a window of exactly `n` bytes starting at `rva` in the chosen
    /// view; fails `RvaNotExists` if the window escapes the containing section
    /// (or the header prefix).
    pub fn slice_at_rva(
        &self,
        rva: Rva,
        n: usize,
        data_type: SectionDataType,
        include_headers: bool,
    ) -> Result<Cow<'_, [u8]>> {
        let window = self.section_window(rva, data_type, include_headers)?;
        if window.len() < n {
            return Err(Error::RvaNotExists);
        }
        match window {
            Cow::Borrowed(data) => Ok(Cow::Borrowed(&data[..n])),
            Cow::Owned(mut data) => {
                data.truncate(n);
                Ok(Cow::Owned(data))
            }
        }
    }

    /// Reads the NUL-terminated byte string at `rva` out of the virtual view
    /// and decodes it as 8-bit text.
    pub fn string_at_rva(&self, rva: Rva) -> Result<String> {
        let window = self.section_window(rva, SectionDataType::Virtual, true)?;
        let bytes = window.read_cstr(0, window.len())?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Bytes from `rva_ref` to the end of the section containing `rva_start`,
    /// saturating at zero.
    pub fn length_remaining_from_rva(
        &self,
        rva_start: Rva,
        rva_ref: Rva,
        data_type: SectionDataType,
        include_headers: bool,
    ) -> Result<u32> {
        if include_headers
            && (rva_start.0 as usize) < self.full_headers_data.len()
            && (rva_ref.0 as usize) < self.full_headers_data.len()
        {
            return Ok((self.full_headers_data.len() - rva_ref.0 as usize) as u32);
        }
        let section = self.section_from_rva(rva_start)?;
        let total = match data_type {
            SectionDataType::Raw => section.raw_data.len() as i64,
            SectionDataType::Virtual => section.virtual_size_aligned as i64,
        };
        let remaining = total + section.header.virtual_address as i64 - rva_ref.0 as i64;
        Ok(remaining.max(0) as u32)
    }

    /// Mutable raw-data window of exactly `n` bytes at `rva`.
    pub fn section_data_mut(&mut self, rva: Rva, n: usize) -> Result<&mut [u8]> {
        let section = self.section_from_rva_mut(rva)?;
        if section.raw_data.is_empty() {
            return Err(Error::SectionIsEmpty);
        }
        let offset = (rva.0 - section.header.virtual_address) as usize;
        section
            .raw_data
            .get_mut(offset..offset + n)
            .ok_or(Error::RvaNotExists)
    }

    // --- section table operations ---

    /// Computes the aligned sizes of a section from its current buffer and
    /// declared virtual size.
    fn prepare_section(&self, section: &mut Section) -> Result<()> {
        let file_alignment = self.file_alignment();
        let section_alignment = self.section_alignment();

        section.header.size_of_raw_data =
            align_up(section.raw_data.len() as u32, file_alignment)?;
        section.raw_size_aligned = section.header.size_of_raw_data;

        if section.header.size_of_raw_data == 0 && section.header.virtual_size == 0 {
            return Err(Error::ZeroSectionSizes);
        }

        if section.header.virtual_size == 0 {
            section.virtual_size_aligned =
                align_up(section.header.size_of_raw_data, section_alignment)?;
            section.header.virtual_size = section.header.size_of_raw_data;
        } else {
            section.virtual_size_aligned = core::cmp::max(
                align_up(section.header.size_of_raw_data, file_alignment)?,
                align_up(section.header.virtual_size, section_alignment)?,
            );
        }
        Ok(())
    }

    /// Attaches a detached section to the end of the image, assigning its RVA
    /// and aligned sizes and growing `SizeOfImage`. Returns its index.
    pub fn add_section(&mut self, mut section: Section) -> Result<usize> {
        if self.sections.len() >= MAXIMUM_NUMBER_OF_SECTIONS {
            return Err(Error::NoMoreSectionsCanBeAdded);
        }
        self.prepare_section(&mut section)?;

        let section_alignment = self.section_alignment();
        let file_alignment = self.file_alignment();
        if let Some(last) = self.sections.last_mut() {
            section.header.virtual_address = align_up(
                last.header.virtual_address + last.virtual_size_aligned,
                section_alignment,
            )?;
            // The previous last section's buffer may end unaligned.
            last.header.size_of_raw_data =
                align_up(last.raw_data.len() as u32, file_alignment)?;
            last.raw_size_aligned = last.header.size_of_raw_data;
        } else {
            section.header.virtual_address = if section.header.virtual_address == 0 {
                align_up(self.size_of_headers(), section_alignment)?
            } else {
                align_up(section.header.virtual_address, section_alignment)?
            };
        }

        let virtual_size_aligned = section.virtual_size_aligned;
        self.sections.push(section);
        self.coff.number_of_sections = self.sections.len() as u16;
        let new_size = self.size_of_image() + virtual_size_aligned;
        self.optional.set_size_of_image(new_size);
        Ok(self.sections.len() - 1)
    }

    /// Changes the declared virtual size of the last section and updates
    /// `SizeOfImage`. Only the last section of an image can change its
    /// virtual size; detached sections can be edited directly before
    /// attachment.
    pub fn set_section_virtual_size(&mut self, index: usize, virtual_size: u32) -> Result<()> {
        if index + 1 != self.sections.len() {
            return Err(Error::ErrorChangingSectionVirtualSize);
        }
        let section_alignment = self.section_alignment();
        let section = self
            .sections
            .get_mut(index)
            .ok_or(Error::NoSectionFound)?;
        if virtual_size == 0 {
            section.virtual_size_aligned =
                align_up(section.header.size_of_raw_data, section_alignment)?;
            section.header.virtual_size = section.header.size_of_raw_data;
        } else {
            section.virtual_size_aligned = align_up(virtual_size, section_alignment)?;
            section.header.virtual_size = section.virtual_size_aligned;
        }
        self.update_image_size();
        Ok(())
    }

    /// Grows the section at `index` so the window `[rva, rva + size)` fits in
    /// the chosen dimension. Returns true if the section grew. Only the last
    /// section can be expanded.
    pub fn expand_section(
        &mut self,
        index: usize,
        rva: Rva,
        size: u32,
        expand: SectionExpandType,
    ) -> Result<bool> {
        if index + 1 != self.sections.len() {
            return Err(Error::ErrorChangingSectionVirtualSize);
        }
        let section = self.sections.get(index).ok_or(Error::NoSectionFound)?;
        if !section.contains_rva(rva.0) {
            return Err(Error::RvaNotExists);
        }
        let offset = rva.0 - section.header.virtual_address;
        match expand {
            SectionExpandType::Raw => {
                let available = (section.raw_data.len() as u32).saturating_sub(offset);
                if available < size {
                    let new_len = (offset + size) as usize;
                    self.sections[index].raw_data.resize(new_len, 0);
                    return Ok(true);
                }
            }
            SectionExpandType::Virtual => {
                let available = section.virtual_size_aligned.saturating_sub(offset);
                if available < size {
                    self.set_section_virtual_size(index, offset + size)?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Strips trailing null bytes from the section at `index` and re-rounds
    /// its raw size. Non-last sections are padded back up to the file
    /// alignment; the last section keeps the stripped length on disk.
    pub fn realign_section(&mut self, index: usize) -> Result<()> {
        let file_alignment = self.file_alignment();
        let is_last = index + 1 == self.sections.len();
        let section = self
            .sections
            .get_mut(index)
            .ok_or(Error::NoSectionFound)?;

        let stripped_len = {
            let data = &section.raw_data;
            let mut len = data.len();
            while len > 0 && data[len - 1] == 0 {
                len -= 1;
            }
            len
        };

        section.raw_size_aligned = align_up(stripped_len as u32, file_alignment)?;
        if is_last {
            section.header.size_of_raw_data = stripped_len as u32;
            section.raw_data.truncate(stripped_len);
        } else {
            section.header.size_of_raw_data = section.raw_size_aligned;
            section.raw_data.resize(section.raw_size_aligned as usize, 0);
        }
        Ok(())
    }

    /// Realigns every section. See [`realign_section`](Self::realign_section).
    pub fn realign_all_sections(&mut self) -> Result<()> {
        for index in 0..self.sections.len() {
            self.realign_section(index)?;
        }
        Ok(())
    }

    /// Writes `SizeOfImage` from the last section's extent.
    fn update_image_size(&mut self) {
        if let Some(last) = self.sections.last() {
            let size = last.header.virtual_address + last.virtual_size_aligned;
            self.optional.set_size_of_image(size);
        }
    }

    /// Reconciles a section's aligned sizes after a codec wrote into it, and
    /// optionally strips the last section's trailing nulls.
    pub(crate) fn recalculate_section_sizes(
        &mut self,
        index: usize,
        auto_strip_last_section: bool,
    ) -> Result<()> {
        let mut section = std::mem::take(
            self.sections
                .get_mut(index)
                .ok_or(Error::NoSectionFound)?,
        );
        let prepare_result = self.prepare_section(&mut section);
        self.sections[index] = section;
        prepare_result?;

        let is_last = index + 1 == self.sections.len();
        if auto_strip_last_section && is_last {
            let section = &mut self.sections[index];
            let mut len = section.raw_data.len();
            while len > 1 && section.raw_data[len - 1] == 0 {
                len -= 1;
            }
            section.raw_data.truncate(len);
            section.header.size_of_raw_data = len as u32;
        }

        let section_alignment = self.section_alignment();
        let file_alignment = self.file_alignment();
        let section = &self.sections[index];
        if align_up(section.header.virtual_size, section_alignment)?
            < align_up(section.header.size_of_raw_data, file_alignment)?
        {
            let new_virtual = align_up(section.header.size_of_raw_data, section_alignment)?;
            if is_last {
                self.set_section_virtual_size(index, new_virtual)?;
            }
        }
        self.update_image_size();
        Ok(())
    }

    /// Verifies a rebuild target section exists and has room for
    /// `end_offset` bytes, growing the buffer of the last section on demand.
    pub(crate) fn reserve_space_in_section(&mut self, index: usize, end_offset: u32) -> Result<()> {
        if index >= self.sections.len() {
            return Err(Error::SectionIsNotAttached);
        }
        let is_last = index + 1 == self.sections.len();
        let file_alignment = self.file_alignment();
        let section = &mut self.sections[index];
        if !is_last
            && (section.raw_data.is_empty()
                || align_up(section.header.size_of_raw_data, file_alignment)? < end_offset)
        {
            return Err(Error::InsufficientSpace);
        }
        if (section.raw_data.len() as u32) < end_offset {
            section.raw_data.resize(end_offset as usize, 0);
        }
        Ok(())
    }

    // --- rebuild ---

    /// Recomputes the header layout and emits the whole image as bytes.
    ///
    /// Section raw pointers are reassigned from the emitted header area, so
    /// the output is self-consistent regardless of prior edits.
    pub fn rebuild_pe(&mut self, options: RebuildOptions) -> Result<Vec<u8>> {
        self.dos_header.e_lfanew = (SIZE_OF_DOS_HEADER + self.rich_overlay.len()) as u32;

        if options.strip_dos_header {
            // The first 16 DOS bytes stay; BaseOfCode doubles as e_lfanew
            // because offset 0x3c then lands inside the optional header.
            self.optional.set_base_of_code(16);
            self.strip_stub_overlay();
        }

        let number_of_dirs = self
            .optional
            .number_of_rva_and_sizes()
            .min(NUMBER_OF_DIRECTORY_ENTRIES as u32) as usize;
        let dos_emit_len = if options.strip_dos_header { 16 } else { SIZE_OF_DOS_HEADER };
        let header_area = dos_emit_len
            + self.rich_overlay.len()
            + 4
            + SIZE_OF_FILE_HEADER
            + core::mem::size_of::<A::OptionalHeader>()
            + SIZE_OF_DATA_DIRECTORY * number_of_dirs
            + SIZE_OF_SECTION_HEADER * self.sections.len();
        let mut ptr_to_section_data = align_up(header_area as u32, self.file_alignment())?;

        if !self.sections.is_empty() && options.change_size_of_headers {
            let first_va = self.sections[0].header.virtual_address;
            self.optional
                .set_size_of_headers(ptr_to_section_data.min(first_va));
        }
        self.coff.size_of_optional_header = (core::mem::size_of::<A::OptionalHeader>()
            + SIZE_OF_DATA_DIRECTORY * number_of_dirs)
            as u16;
        self.coff.number_of_sections = self.sections.len() as u16;

        for section in &mut self.sections {
            section.header.pointer_to_raw_data = ptr_to_section_data;
            ptr_to_section_data = ptr_to_section_data
                .checked_add(section.raw_size_aligned)
                .ok_or(Error::StreamIsBad)?;
        }

        let mut out = Vec::with_capacity(ptr_to_section_data as usize);
        out.extend_from_slice(&bytes_of(&self.dos_header)[..dos_emit_len]);
        out.extend_from_slice(&self.rich_overlay);
        out.extend_from_slice(&NT_SIGNATURE.to_le_bytes());
        out.extend_from_slice(bytes_of(&self.coff));
        out.extend_from_slice(bytes_of(&self.optional));
        for index in 0..number_of_dirs {
            let entry = self.directories.entry(index).copied().unwrap_or_default();
            out.extend_from_slice(bytes_of(&entry));
        }
        for (index, section) in self.sections.iter().enumerate() {
            if index + 1 == self.sections.len() {
                // The file ends cleanly at the last data byte.
                let mut header = section.header;
                header.size_of_raw_data = section.raw_data.len() as u32;
                out.extend_from_slice(bytes_of(&header));
            } else {
                out.extend_from_slice(bytes_of(&section.header));
            }
        }
        for section in &self.sections {
            let target = section.header.pointer_to_raw_data as usize;
            if out.len() < target {
                out.resize(target, 0);
            }
            out.extend_from_slice(&section.raw_data);
        }

        Ok(out)
    }
}

impl<A: ImageArch> fmt::Display for PortableExecutable<A>
where
    A::OptionalHeader: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.coff)?;
        writeln!(f, "{}", self.optional)?;
        writeln!(f, "{}", self.directories)?;
        for section in &self.sections {
            writeln!(f, "{}", section)?;
        }
        Ok(())
    }
}

/// A parsed image of either width, as produced by [`parse_pe`].
pub enum PeFile {
    /// A 32-bit (PE32) image.
    Pe32(PortableExecutable<Pe32>),
    /// A 64-bit (PE32+) image.
    Pe64(PortableExecutable<Pe64>),
}

impl PeFile {
    /// True if this is a PE32+ image.
    pub fn is_64(&self) -> bool {
        matches!(self, PeFile::Pe64(_))
    }

    /// The parsed sections, regardless of width.
    pub fn sections(&self) -> &[Section] {
        match self {
            PeFile::Pe32(image) => image.sections(),
            PeFile::Pe64(image) => image.sections(),
        }
    }

    /// The preferred load address, regardless of width.
    pub fn image_base(&self) -> u64 {
        match self {
            PeFile::Pe32(image) => image.image_base(),
            PeFile::Pe64(image) => image.image_base(),
        }
    }
}

/// Peeks at the DOS header and optional-header magic of `binary` and parses
/// it as the matching PE variant.
pub fn parse_pe(binary: &[u8]) -> Result<PeFile> {
    match peek_magic(binary)? {
        Magic::PE32 => Ok(PeFile::Pe32(PortableExecutable::parse(binary)?)),
        Magic::PE64 => Ok(PeFile::Pe64(PortableExecutable::parse(binary)?)),
    }
}

/// Reads just enough of `binary` to classify it as PE32 or PE32+.
pub fn peek_magic(binary: &[u8]) -> Result<Magic> {
    let dos_header: ImageDosHeader = binary.read_pod(0).map_err(|_| Error::BadDosHeader)?;
    if dos_header.e_magic != DOS_MAGIC {
        return Err(Error::BadDosHeader);
    }
    let lfanew = dos_header.e_lfanew as usize;
    if lfanew >= binary.len() {
        return Err(Error::ImageNtHeadersNotFound);
    }
    if binary
        .read_u32(lfanew)
        .map_err(|_| Error::ErrorReadingImageNtHeaders)?
        != NT_SIGNATURE
    {
        return Err(Error::BadPeSignature);
    }
    let magic = binary
        .read_u16(lfanew + 4 + SIZE_OF_FILE_HEADER)
        .map_err(|_| Error::ErrorReadingImageNtHeaders)?;
    Magic::from_u16(magic).ok_or(Error::BadPeSignature)
}

/// Computes the PE checksum of a whole image file: a 16-bit end-around-carry
/// sum over every dword except the optional header's own checksum field,
/// plus the file length. The image's fields are never touched.
pub fn calculate_checksum(data: &[u8]) -> Result<u32> {
    let dos_header: ImageDosHeader = data.read_pod(0).map_err(|_| Error::BadDosHeader)?;
    if dos_header.e_magic != DOS_MAGIC {
        return Err(Error::BadDosHeader);
    }

    // The CheckSum field sits 64 bytes into the optional header for both
    // PE32 and PE32+.
    let checksum_pos =
        dos_header.e_lfanew as u64 + 4 + SIZE_OF_FILE_HEADER as u64 + 64;

    let top: u64 = 0x1_0000_0000;
    let mut checksum: u64 = 0;
    for (index, chunk) in data.chunks(4).enumerate() {
        if (index as u64) * 4 == checksum_pos {
            continue;
        }
        let mut dword = [0u8; 4];
        dword[..chunk.len()].copy_from_slice(chunk);
        checksum = (checksum & 0xffff_ffff) + u32::from_le_bytes(dword) as u64 + (checksum >> 32);
        if checksum > top {
            checksum = (checksum & 0xffff_ffff) + (checksum >> 32);
        }
    }
    checksum = (checksum & 0xffff) + (checksum >> 16);
    checksum += checksum >> 16;
    checksum &= 0xffff;
    checksum += data.len() as u64;
    Ok(checksum as u32)
}
