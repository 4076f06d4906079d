use crate::arch::ImageArch;
use crate::optional::DIRECTORY_ENTRY_BASERELOC;
use crate::pe::{ImageDirectory, PortableExecutable, Rva, SectionDataType};
use crate::scribe::{align_up, is_sum_safe, put_pod, put_u16, put_u32, put_u64, Scribe};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// On-disk header of one base-relocation block. `(size_of_block - 8) / 2`
/// 16-bit entries follow it.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ImageBaseRelocation {
    /// Page RVA the block's entries are relative to.
    pub virtual_address: u32,
    /// Total block size in bytes, including this header. 4-byte aligned.
    pub size_of_block: u32,
}

/// Base relocation type indicators, stored in the high nibble of each entry.
#[derive(FromPrimitive, Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u16)]
pub enum BaseRelocationType {
    /// The relocation is skipped; used to pad blocks to a 4-byte boundary.
    Absolute = 0x0,
    /// The high 16 bits of a 32-bit address.
    High = 0x1,
    /// The low 16 bits of a 32-bit address.
    Low = 0x2,
    /// A full 32-bit address.
    HighLow = 0x3,
    /// The high 16 bits of a 32-bit address, adjusted for sign extension.
    HighAdj = 0x4,
    /// Machine-specific relocation (MIPS jump / ARM MOV32 / RISC-V high20).
    MachineSpecific5 = 0x5,
    /// Machine-specific relocation (Thumb MOV32 / RISC-V low12i).
    MachineSpecific7 = 0x7,
    /// RISC-V low12s relocation.
    MachineSpecific8 = 0x8,
    /// MIPS16 jump instruction relocation.
    MachineSpecific9 = 0x9,
    /// A full 64-bit address.
    Dir64 = 0xa,
}

/// One relocation: a 12-bit offset into the owning block's page plus a 4-bit
/// type.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RelocationEntry {
    /// Offset from the block's page RVA, 12 bits.
    pub rrva: u16,
    /// Relocation type, 4 bits.
    pub relocation_type: u16,
}

impl RelocationEntry {
    /// Decodes a packed 16-bit relocation item.
    pub fn from_item(item: u16) -> Self {
        RelocationEntry {
            rrva: item & ((1 << 12) - 1),
            relocation_type: item >> 12,
        }
    }

    /// Packs the entry back into its 16-bit on-disk form.
    pub fn to_item(self) -> u16 {
        (self.rrva & ((1 << 12) - 1)) | (self.relocation_type << 12)
    }

    /// The relocation type as an enum, when it is a known value.
    pub fn get_type(&self) -> Option<BaseRelocationType> {
        BaseRelocationType::from_u16(self.relocation_type)
    }
}

/// One base-relocation block: a page RVA and its ordered entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelocationTable {
    /// Page RVA of the block.
    pub rva: Rva,
    /// Entries of the block, in on-disk order.
    pub relocations: Vec<RelocationEntry>,
}

impl RelocationTable {
    /// Creates an empty block for the given page.
    pub fn new(rva: Rva) -> Self {
        RelocationTable {
            rva,
            relocations: Vec::new(),
        }
    }

    /// Appends one relocation to the block.
    pub fn add_relocation(&mut self, entry: RelocationEntry) {
        self.relocations.push(entry);
    }
}

const SIZE_OF_BASE_RELOCATION: u32 = core::mem::size_of::<ImageBaseRelocation>() as u32;

impl<A: ImageArch> PortableExecutable<A> {
    /// Lists the base-relocation blocks of the image. With
    /// `list_absolute_entries` the padding `Absolute` entries are reported
    /// too; otherwise they are filtered out.
    pub fn get_relocations(&self, list_absolute_entries: bool) -> Result<Vec<RelocationTable>> {
        let mut tables = Vec::new();
        if !self.has_reloc() {
            return Ok(tables);
        }

        let dir_rva = self.directory_rva(DIRECTORY_ENTRY_BASERELOC);
        let dir_size = self.directory_size(DIRECTORY_ENTRY_BASERELOC);
        if self.length_remaining_from_rva(
            Rva(dir_rva),
            Rva(dir_rva),
            SectionDataType::Virtual,
            true,
        )? < SIZE_OF_BASE_RELOCATION
        {
            return Err(Error::IncorrectRelocationDirectory);
        }

        let mut current_pos = dir_rva;
        let mut read_size = 0u32;
        while read_size < dir_size {
            let window = self.section_window(Rva(current_pos), SectionDataType::Virtual, true)?;
            let header: ImageBaseRelocation = match window.read_pod(0) {
                Ok(header) => header,
                Err(_) => break,
            };
            if header.size_of_block == 0 {
                break;
            }
            if header.size_of_block % 2 != 0
                || header.size_of_block < SIZE_OF_BASE_RELOCATION
                || !is_sum_safe(current_pos, header.size_of_block)
            {
                return Err(Error::IncorrectRelocationDirectory);
            }

            let mut table = RelocationTable::new(Rva(header.virtual_address));
            let mut offset = SIZE_OF_BASE_RELOCATION;
            while offset < header.size_of_block {
                let item = window
                    .read_u16(offset as usize)
                    .map_err(|_| Error::IncorrectRelocationDirectory)?;
                let entry = RelocationEntry::from_item(item);
                if list_absolute_entries
                    || entry.get_type() != Some(BaseRelocationType::Absolute)
                {
                    table.add_relocation(entry);
                }
                offset += 2;
            }

            tables.push(table);
            current_pos += header.size_of_block;
            read_size += header.size_of_block;
        }

        Ok(tables)
    }

    /// Rebuilds the base-relocation directory inside the section at
    /// `section_index`. Entries are written exactly as supplied; blocks with
    /// an odd entry count are padded with one `Absolute` entry so each
    /// block's size stays 4-byte aligned.
    ///
    /// To keep a working image working, pass back every block obtained from
    /// [`get_relocations`](Self::get_relocations) (with absolute entries
    /// listed) plus whatever is being added.
    pub fn rebuild_relocations(
        &mut self,
        tables: &[RelocationTable],
        section_index: usize,
        offset_from_section_start: u32,
        save_to_pe_header: bool,
        auto_strip_last_section: bool,
    ) -> Result<ImageDirectory> {
        if section_index >= self.sections().len() {
            return Err(Error::SectionIsNotAttached);
        }

        let start_pos = align_up(offset_from_section_start, 4)?;
        let mut needed_size = 0u32;
        for table in tables {
            needed_size += SIZE_OF_BASE_RELOCATION + table.relocations.len() as u32 * 2;
            if (table.relocations.len() * 2) % 4 != 0 {
                needed_size += 2;
            }
        }

        self.reserve_space_in_section(section_index, start_pos + needed_size)?;

        let raw_data = self.sections_mut()[section_index].data_mut();
        let mut current = start_pos;
        for table in tables {
            let mut size_of_block =
                SIZE_OF_BASE_RELOCATION + table.relocations.len() as u32 * 2;
            if (table.relocations.len() * 2) % 4 != 0 {
                size_of_block += 2;
            }
            let header = ImageBaseRelocation {
                virtual_address: table.rva.0,
                size_of_block,
            };
            put_pod(raw_data, current as usize, &header)?;
            current += SIZE_OF_BASE_RELOCATION;

            for entry in &table.relocations {
                put_u16(raw_data, current as usize, entry.to_item())?;
                current += 2;
            }
            if current % 4 != 0 {
                // Pad with one absolute entry.
                put_u16(raw_data, current as usize, 0)?;
                current += 2;
            }
        }

        self.recalculate_section_sizes(section_index, auto_strip_last_section)?;

        let result = ImageDirectory {
            rva: self.rva_from_section_offset(section_index, start_pos)?,
            size: needed_size,
        };

        if save_to_pe_header {
            self.set_directory_rva(DIRECTORY_ENTRY_BASERELOC, result.rva);
            self.set_directory_size(DIRECTORY_ENTRY_BASERELOC, result.size);
        }

        Ok(result)
    }

    /// Moves the image to `new_base`: every `HighLow` or `Dir64` relocation
    /// target is rewritten to `old_value - old_base + new_base`, then the
    /// optional header's `ImageBase` is updated.
    ///
    /// Relocations fix absolute pointers. If a relocatable structure has
    /// already been moved, its recorded fixups target the bytes at the old
    /// location, so rebase before any structural moves.
    pub fn rebase_image(&mut self, tables: &[RelocationTable], new_base: u64) -> Result<()> {
        let old_base = self.image_base();
        for table in tables {
            for entry in &table.relocations {
                let target = Rva(table.rva.0.wrapping_add(entry.rrva as u32));
                match entry.get_type() {
                    Some(BaseRelocationType::HighLow) => {
                        let slot = self.section_data_mut(target, 4)?;
                        let value = slot
                            .read_u32(0)
                            .map_err(|_| Error::IncorrectRelocationDirectory)?;
                        let rebased = (value as u64)
                            .wrapping_sub(old_base)
                            .wrapping_add(new_base) as u32;
                        put_u32(slot, 0, rebased)?;
                    }
                    Some(BaseRelocationType::Dir64) => {
                        let slot = self.section_data_mut(target, 8)?;
                        let value = slot
                            .read_u64(0)
                            .map_err(|_| Error::IncorrectRelocationDirectory)?;
                        let rebased = value.wrapping_sub(old_base).wrapping_add(new_base);
                        put_u64(slot, 0, rebased)?;
                    }
                    _ => {}
                }
            }
        }
        self.set_image_base(new_base);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relocation_item_round_trips() {
        let entry = RelocationEntry {
            rrva: 0x123,
            relocation_type: BaseRelocationType::HighLow as u16,
        };
        assert_eq!(RelocationEntry::from_item(entry.to_item()), entry);
        assert_eq!(entry.to_item(), 0x3123);
        assert_eq!(entry.get_type(), Some(BaseRelocationType::HighLow));
    }

    #[test]
    fn absolute_entry_packs_to_zero() {
        let entry = RelocationEntry::default();
        assert_eq!(entry.to_item(), 0);
        assert_eq!(entry.get_type(), Some(BaseRelocationType::Absolute));
    }
}
