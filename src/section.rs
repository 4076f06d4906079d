use bytemuck::{Pod, Zeroable};
use bitflags::bitflags;
use core::{fmt, str};
use std::borrow::Cow;

/// On-disk section header: 40 bytes in the section table that immediately
/// follows the optional header.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct SectionHeader {
    /// An 8-byte, null-padded UTF-8 encoded string.
    /// If the string is exactly 8 characters long, there is no terminating null.
    pub name: [u8; 8],
    /// The total size of the section when loaded into memory.
    /// If this value is greater than `size_of_raw_data`, the section is zero-padded.
    pub virtual_size: u32,
    /// The address of the first byte of the section relative to the image base
    /// when the section is loaded into memory.
    pub virtual_address: u32,
    /// The size of the initialized data on disk. Must be a multiple of
    /// `file_alignment`; if less than `virtual_size` the remainder is zero-filled.
    pub size_of_raw_data: u32,
    /// The file pointer to the first page of the section within the file.
    /// Must be a multiple of `file_alignment`.
    pub pointer_to_raw_data: u32,
    /// The file pointer to the beginning of relocation entries for the section.
    /// Zero for executable images.
    pub pointer_to_relocations: u32,
    /// The file pointer to the beginning of line-number entries for the section.
    /// COFF debugging information is deprecated; zero for images.
    pub pointer_to_linenumbers: u32,
    /// The number of relocation entries for the section. Zero for images.
    pub number_of_relocations: u16,
    /// The number of line-number entries for the section. Zero for images.
    pub number_of_linenumbers: u16,
    /// The flags that describe the characteristics of the section.
    pub characteristics: u32,
}

bitflags! {
    /// Bitflags that contain various information about
    /// how a section should be loaded
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        /// The section contains executable code.
        const IMAGE_SCN_CNT_CODE = 0x00000020;
        /// The section contains initialized data.
        const IMAGE_SCN_CNT_INITIALIZED_DATA = 0x00000040;
        /// The section contains uninitialized data.
        const IMAGE_SCN_CNT_UNINITIALIZED_DATA = 0x00000080;
        /// The section contains data referenced through the global pointer (GP).
        const IMAGE_SCN_GPREL = 0x00008000;
        /// The section contains extended relocations.
        const IMAGE_SCN_LNK_NRELOC_OVFL = 0x01000000;
        /// The section can be discarded as needed.
        const IMAGE_SCN_MEM_DISCARDABLE = 0x02000000;
        /// The section cannot be cached.
        const IMAGE_SCN_MEM_NOT_CACHED = 0x04000000;
        /// The section is not pageable.
        const IMAGE_SCN_MEM_NOT_PAGED = 0x08000000;
        /// The section can be shared in memory.
        const IMAGE_SCN_MEM_SHARED = 0x10000000;
        /// The section can be executed as code.
        const IMAGE_SCN_MEM_EXECUTE = 0x20000000;
        /// The section can be read.
        const IMAGE_SCN_MEM_READ = 0x40000000;
        /// The section can be written to.
        const IMAGE_SCN_MEM_WRITE = 0x80000000;
    }
}

// Allow SectionFlags flags to be easily printed
impl fmt::Debug for SectionFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for SectionFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl str::FromStr for SectionFlags {
    type Err = bitflags::parser::ParseError;

    fn from_str(flags: &str) -> core::result::Result<Self, Self::Err> {
        Ok(Self(flags.parse()?))
    }
}

/// One image section: its header plus the owned raw data buffer and the two
/// alignment-rounded sizes the image keeps in sync with it.
///
/// The raw buffer holds file bytes only; the virtual tail (the zero-filled
/// span up to the aligned virtual size) is materialized on demand by
/// [`Section::virtual_data`] and never stored.
#[derive(Clone, Default)]
pub struct Section {
    /// The 40-byte on-disk header of this section.
    pub header: SectionHeader,
    pub(crate) raw_data: Vec<u8>,
    pub(crate) raw_size_aligned: u32,
    pub(crate) virtual_size_aligned: u32,
}

impl Section {
    /// Creates a detached section with the given name and characteristics.
    /// Sizes and addresses are assigned when the section is attached to an
    /// image with `add_section`.
    pub fn new(name: &str, characteristics: SectionFlags) -> Self {
        let mut section = Section::default();
        section.set_name(name);
        section.header.characteristics = characteristics.bits();
        section
    }

    /// Get the name of a section as a string, with zero padding removed.
    pub fn get_name(&self) -> String {
        let end = self
            .header
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.header.name.len());
        String::from_utf8_lossy(&self.header.name[..end]).into_owned()
    }

    /// Sets the section name. Longer names are truncated to 8 bytes.
    pub fn set_name(&mut self, name: &str) {
        self.header.name = [0; 8];
        for (slot, byte) in self.header.name.iter_mut().zip(name.bytes()) {
            *slot = byte;
        }
    }

    /// Returns the Section Characteristics as bitflags
    pub fn get_characteristics(&self) -> Option<SectionFlags> {
        SectionFlags::from_bits(self.header.characteristics)
    }

    /// True if the section has no raw data.
    pub fn empty(&self) -> bool {
        self.raw_data.is_empty()
    }

    /// The raw (file) view of the section data.
    pub fn data(&self) -> &[u8] {
        &self.raw_data
    }

    /// Mutable access to the raw data buffer. Aligned sizes are reconciled by
    /// the owning image on the next rebuild or realign.
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.raw_data
    }

    /// Replaces the raw data buffer.
    pub fn set_raw_data(&mut self, data: Vec<u8>) {
        self.raw_data = data;
    }

    /// Sets the declared virtual size of a detached section. Attached
    /// sections go through the image, which keeps the aligned sizes and
    /// `SizeOfImage` in step.
    pub fn set_virtual_size(&mut self, virtual_size: u32) {
        self.header.virtual_size = virtual_size;
    }

    /// The virtual (memory) view: the raw data zero-padded up to the aligned
    /// virtual size. Borrows when no padding is needed.
    pub fn virtual_data(&self) -> Cow<'_, [u8]> {
        let virtual_len = self.virtual_size_aligned as usize;
        if self.raw_data.len() >= virtual_len {
            Cow::Borrowed(&self.raw_data[..virtual_len])
        } else {
            let mut padded = self.raw_data.clone();
            padded.resize(virtual_len, 0);
            Cow::Owned(padded)
        }
    }

    /// Raw size rounded up to the file alignment.
    pub fn raw_size_aligned(&self) -> u32 {
        self.raw_size_aligned
    }

    /// Virtual size rounded up to the section alignment.
    pub fn virtual_size_aligned(&self) -> u32 {
        self.virtual_size_aligned
    }

    /// RVA of the first byte of this section.
    pub fn virtual_address(&self) -> u32 {
        self.header.virtual_address
    }

    /// Declared (unaligned) virtual size.
    pub fn virtual_size(&self) -> u32 {
        self.header.virtual_size
    }

    /// Declared raw data size.
    pub fn size_of_raw_data(&self) -> u32 {
        self.header.size_of_raw_data
    }

    /// File offset of the section's raw data.
    pub fn pointer_to_raw_data(&self) -> u32 {
        self.header.pointer_to_raw_data
    }

    /// True if `rva` lies inside the aligned virtual range of this section.
    pub fn contains_rva(&self, rva: u32) -> bool {
        rva >= self.header.virtual_address
            && (rva - self.header.virtual_address) < self.virtual_size_aligned
    }

    /// True if the section is mapped readable.
    pub fn readable(&self) -> bool {
        self.header.characteristics & SectionFlags::IMAGE_SCN_MEM_READ.bits() != 0
    }

    /// True if the section is mapped writeable.
    pub fn writeable(&self) -> bool {
        self.header.characteristics & SectionFlags::IMAGE_SCN_MEM_WRITE.bits() != 0
    }

    /// True if the section is mapped executable.
    pub fn executable(&self) -> bool {
        self.header.characteristics & SectionFlags::IMAGE_SCN_MEM_EXECUTE.bits() != 0
    }

    /// Sets or clears the readable flag, builder style.
    pub fn set_readable(mut self, readable: bool) -> Self {
        self.toggle_flag(SectionFlags::IMAGE_SCN_MEM_READ, readable);
        self
    }

    /// Sets or clears the writeable flag, builder style.
    pub fn set_writeable(mut self, writeable: bool) -> Self {
        self.toggle_flag(SectionFlags::IMAGE_SCN_MEM_WRITE, writeable);
        self
    }

    /// Sets or clears the executable flag, builder style.
    pub fn set_executable(mut self, executable: bool) -> Self {
        self.toggle_flag(SectionFlags::IMAGE_SCN_MEM_EXECUTE, executable);
        self
    }

    fn toggle_flag(&mut self, flag: SectionFlags, set: bool) {
        if set {
            self.header.characteristics |= flag.bits();
        } else {
            self.header.characteristics &= !flag.bits();
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Section Header")?;
        writeln!(f, "--------------")?;
        writeln!(f, "Name:                    {}", self.get_name())?;
        writeln!(f, "Virtual Size:            {}", self.header.virtual_size)?;
        writeln!(f, "Virtual Address:         {:#010x}", self.header.virtual_address)?;
        writeln!(f, "Size of Raw Data:        {}", self.header.size_of_raw_data)?;
        writeln!(f, "Pointer to Raw Data:     {}", self.header.pointer_to_raw_data)?;
        match self.get_characteristics() {
            Some(flags) => writeln!(f, "Characteristics:         {}", flags)?,
            None => writeln!(f, "Characteristics:         {:#010x}", self.header.characteristics)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips_through_padding() {
        let mut section = Section::new(".text", SectionFlags::IMAGE_SCN_MEM_READ);
        assert_eq!(section.get_name(), ".text");
        section.set_name("exactly8");
        assert_eq!(section.get_name(), "exactly8");
        section.set_name("morethan8bytes");
        assert_eq!(section.get_name(), "morethan");
    }

    #[test]
    fn virtual_view_pads_with_zeros() {
        let mut section = Section::new(".data", SectionFlags::IMAGE_SCN_MEM_READ);
        section.set_raw_data(vec![1, 2, 3]);
        section.virtual_size_aligned = 8;
        assert_eq!(section.virtual_data().as_ref(), &[1, 2, 3, 0, 0, 0, 0, 0]);
        assert_eq!(section.data(), &[1, 2, 3]);
    }

    #[test]
    fn access_flags() {
        let section = Section::new(".x", SectionFlags::empty())
            .set_readable(true)
            .set_executable(true);
        assert!(section.readable());
        assert!(section.executable());
        assert!(!section.writeable());
    }
}
