use crate::arch::ImageArch;
use crate::optional::DIRECTORY_ENTRY_EXPORT;
use crate::pe::{ImageDirectory, PortableExecutable, Rva, SectionDataType};
use crate::scribe::{align_up, is_sum_safe, put_bytes, put_pod, put_u16, put_u32, Scribe};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use std::collections::{BTreeMap, BTreeSet};

/// On-disk `IMAGE_EXPORT_DIRECTORY` header.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ImageExportDirectory {
    /// Reserved, must be zero.
    pub characteristics: u32,
    /// When the export data was created.
    pub time_date_stamp: u32,
    /// Major version number set by the user.
    pub major_version: u16,
    /// Minor version number set by the user.
    pub minor_version: u16,
    /// RVA of the exporting module's name string.
    pub name: u32,
    /// Starting ordinal number.
    pub base: u32,
    /// Number of entries in the address table.
    pub number_of_functions: u32,
    /// Number of entries in the name and name-ordinal tables.
    pub number_of_names: u32,
    /// RVA of the export address table.
    pub address_of_functions: u32,
    /// RVA of the name-pointer table.
    pub address_of_names: u32,
    /// RVA of the name-ordinal table.
    pub address_of_name_ordinals: u32,
}

/// Summary fields of the export directory, apart from the function list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportInfo {
    /// Reserved field, usually zero.
    pub characteristics: u32,
    /// When the export data was created.
    pub timestamp: u32,
    /// Major version number.
    pub major_version: u16,
    /// Minor version number.
    pub minor_version: u16,
    /// The exporting module's name.
    pub name: String,
    /// Starting ordinal number.
    pub ordinal_base: u32,
    /// Number of address-table entries, as stored in the header.
    pub number_of_functions: u32,
    /// Number of named exports, as stored in the header.
    pub number_of_names: u32,
    /// RVA of the export address table.
    pub rva_of_functions: u32,
    /// RVA of the name-pointer table.
    pub rva_of_names: u32,
    /// RVA of the name-ordinal table.
    pub rva_of_name_ordinals: u32,
}

impl ExportInfo {
    /// Returns the Unix epoch timestamp as a `DateTime<Utc>`
    #[cfg(feature = "chrono")]
    pub fn get_time_date_stamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.timestamp.into(), 0)
    }
}

/// One exported function. It either points at code inside the image or
/// forwards to another module's export by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportedFunction {
    /// Export ordinal, unique within one export table.
    pub ordinal: u16,
    /// RVA of the function, or of the forwarder string after a rebuild.
    pub rva: Rva,
    /// Export name, if the function is exported by name.
    pub name: Option<String>,
    /// Index into the name-ordinal table, recomputed on rebuild.
    pub name_ordinal: Option<u16>,
    /// Forward target ("module.function"), if this export is a forwarder.
    pub forwarded_name: Option<String>,
}

impl ExportedFunction {
    /// True if the function is exported by name.
    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }

    /// True if the function forwards to another module.
    pub fn is_forwarded(&self) -> bool {
        self.forwarded_name.is_some()
    }
}

/// Returns `(ordinal_base, max_ordinal)` over the given exports,
/// or `(0, 0)` when the list is empty.
pub fn get_export_ordinal_limits(exports: &[ExportedFunction]) -> (u16, u16) {
    if exports.is_empty() {
        return (0, 0);
    }
    let mut base = u16::MAX;
    let mut max = 0u16;
    for export in exports {
        base = base.min(export.ordinal);
        max = max.max(export.ordinal);
    }
    (base, max)
}

/// True if any export in the list carries the given name.
pub fn exported_name_exists(name: &str, exports: &[ExportedFunction]) -> bool {
    exports
        .iter()
        .any(|export| export.name.as_deref() == Some(name))
}

/// True if any export in the list carries the given ordinal.
pub fn exported_ordinal_exists(ordinal: u16, exports: &[ExportedFunction]) -> bool {
    exports.iter().any(|export| export.ordinal == ordinal)
}

const SIZE_OF_EXPORT_DIRECTORY: u32 = core::mem::size_of::<ImageExportDirectory>() as u32;

impl<A: ImageArch> PortableExecutable<A> {
    /// Lists the exported functions of the image.
    pub fn get_exported_functions(&self) -> Result<Vec<ExportedFunction>> {
        Ok(self.read_exports()?.0)
    }

    /// Lists the exported functions along with the export-directory fields.
    pub fn get_exported_functions_with_info(&self) -> Result<(Vec<ExportedFunction>, ExportInfo)> {
        self.read_exports()
    }

    fn read_exports(&self) -> Result<(Vec<ExportedFunction>, ExportInfo)> {
        let mut functions = Vec::new();
        let mut info = ExportInfo::default();

        if !self.has_exports() {
            return Ok((functions, info));
        }

        let dir_rva = self.directory_rva(DIRECTORY_ENTRY_EXPORT);
        let dir_size = self.directory_size(DIRECTORY_ENTRY_EXPORT);
        if self.length_remaining_from_rva(
            Rva(dir_rva),
            Rva(dir_rva),
            SectionDataType::Virtual,
            true,
        )? < SIZE_OF_EXPORT_DIRECTORY
        {
            return Err(Error::IncorrectExportDirectory);
        }

        let exports: ImageExportDirectory = self
            .section_window(Rva(dir_rva), SectionDataType::Virtual, true)?
            .read_pod(0)
            .map_err(|_| Error::IncorrectExportDirectory)?;

        info.characteristics = exports.characteristics;
        info.timestamp = exports.time_date_stamp;
        info.major_version = exports.major_version;
        info.minor_version = exports.minor_version;
        info.ordinal_base = exports.base;
        info.number_of_functions = exports.number_of_functions;
        info.number_of_names = exports.number_of_names;
        info.rva_of_functions = exports.address_of_functions;
        info.rva_of_names = exports.address_of_names;
        info.rva_of_name_ordinals = exports.address_of_name_ordinals;
        if exports.name != 0 {
            info.name = self
                .string_at_rva(Rva(exports.name))
                .map_err(|_| Error::IncorrectExportDirectory)?;
        }

        if exports.number_of_functions == 0 {
            return Ok((functions, info));
        }

        if exports.number_of_names > exports.number_of_functions {
            return Err(Error::IncorrectExportDirectory);
        }
        if (exports.address_of_name_ordinals == 0) != (exports.address_of_names == 0)
            || exports.address_of_functions == 0
            || exports.number_of_functions >= u32::MAX / 4
            || exports.number_of_names > u32::MAX / 4
            || !is_sum_safe(exports.address_of_functions, exports.number_of_functions * 4)
            || !is_sum_safe(exports.address_of_names, exports.number_of_names * 4)
            || !is_sum_safe(exports.address_of_name_ordinals, exports.number_of_functions * 4)
            || !is_sum_safe(dir_rva, dir_size)
        {
            return Err(Error::IncorrectExportDirectory);
        }

        if self.length_remaining_from_rva(
            Rva(exports.address_of_functions),
            Rva(exports.address_of_functions),
            SectionDataType::Virtual,
            true,
        )? < exports.number_of_functions * 4
        {
            return Err(Error::IncorrectExportDirectory);
        }
        if exports.address_of_names != 0 {
            if self.length_remaining_from_rva(
                Rva(exports.address_of_name_ordinals),
                Rva(exports.address_of_name_ordinals),
                SectionDataType::Virtual,
                true,
            )? < exports.number_of_names * 2
                || self.length_remaining_from_rva(
                    Rva(exports.address_of_names),
                    Rva(exports.address_of_names),
                    SectionDataType::Virtual,
                    true,
                )? < exports.number_of_names * 4
            {
                return Err(Error::IncorrectExportDirectory);
            }
        }

        let address_table =
            self.section_window(Rva(exports.address_of_functions), SectionDataType::Virtual, true)?;
        let mut name_ordinal_table = Vec::new();
        let mut name_rva_table = Vec::new();
        if exports.address_of_names != 0 {
            let ordinals_window = self.section_window(
                Rva(exports.address_of_name_ordinals),
                SectionDataType::Virtual,
                true,
            )?;
            let names_window =
                self.section_window(Rva(exports.address_of_names), SectionDataType::Virtual, true)?;
            for i in 0..exports.number_of_names as usize {
                name_ordinal_table.push(
                    ordinals_window
                        .read_u16(i * 2)
                        .map_err(|_| Error::IncorrectExportDirectory)?,
                );
                name_rva_table.push(
                    names_window
                        .read_u32(i * 4)
                        .map_err(|_| Error::IncorrectExportDirectory)?,
                );
            }
        }

        for index in 0..exports.number_of_functions {
            let rva = address_table
                .read_u32(index as usize * 4)
                .map_err(|_| Error::IncorrectExportDirectory)?;
            if rva == 0 {
                continue;
            }

            if !is_sum_safe(exports.base, index) || exports.base + index > u16::MAX as u32 {
                return Err(Error::IncorrectExportDirectory);
            }

            let mut function = ExportedFunction {
                ordinal: (exports.base + index) as u16,
                rva: Rva(rva),
                ..Default::default()
            };

            if let Some(position) = name_ordinal_table
                .iter()
                .position(|&name_ordinal| name_ordinal as u32 == index)
            {
                function.name = Some(
                    self.string_at_rva(Rva(name_rva_table[position]))
                        .map_err(|_| Error::IncorrectExportDirectory)?,
                );
                function.name_ordinal = Some(name_ordinal_table[position]);
            }

            // An address inside the export directory itself is a forwarder
            // string, not code.
            if rva >= dir_rva && rva < dir_rva + dir_size {
                function.forwarded_name = Some(
                    self.string_at_rva(Rva(rva))
                        .map_err(|_| Error::IncorrectExportDirectory)?,
                );
            }

            functions.push(function);
        }

        Ok((functions, info))
    }

    /// Rebuilds the export directory inside the section at `section_index`,
    /// starting `offset_from_section_start` bytes in.
    ///
    /// `number_of_functions` and `number_of_names` in `info` are ignored and
    /// recomputed; name ordinals are reassigned. With `save_to_pe_header` the
    /// export data-directory entry is pointed at the new data.
    pub fn rebuild_exports(
        &mut self,
        info: &ExportInfo,
        mut exports: Vec<ExportedFunction>,
        section_index: usize,
        offset_from_section_start: u32,
        save_to_pe_header: bool,
        auto_strip_last_section: bool,
    ) -> Result<ImageDirectory> {
        if section_index >= self.sections().len() {
            return Err(Error::SectionIsNotAttached);
        }

        let mut needed_size_for_strings = info.name.len() as u32 + 1;
        let mut needed_size_for_function_names = 0u32;
        let mut needed_size_for_function_forwards = 0u32;
        let mut number_of_names = 0u32;
        let mut max_ordinal = 0u32;
        let mut ordinal_base = u32::MAX;

        if exports.is_empty() {
            ordinal_base = info.ordinal_base;
        }

        {
            let mut used_names = BTreeSet::new();
            let mut used_ordinals = BTreeSet::new();
            for export in &exports {
                max_ordinal = max_ordinal.max(export.ordinal as u32);
                ordinal_base = ordinal_base.min(export.ordinal as u32);
                if !used_ordinals.insert(export.ordinal) {
                    return Err(Error::DuplicateExportedFunctionOrdinal);
                }
                if let Some(name) = &export.name {
                    number_of_names += 1;
                    needed_size_for_function_names += name.len() as u32 + 1;
                    if !used_names.insert(name.clone()) {
                        return Err(Error::DuplicateExportedFunctionName);
                    }
                }
                if let Some(forwarded) = &export.forwarded_name {
                    needed_size_for_function_forwards += forwarded.len() as u32 + 1;
                }
            }
        }

        exports.sort_by_key(|export| export.ordinal);

        needed_size_for_strings += needed_size_for_function_names;
        needed_size_for_strings += needed_size_for_function_forwards;
        let needed_size_for_function_name_ordinals = number_of_names * 2;
        let needed_size_for_function_name_rvas = number_of_names * 4;
        let function_slots = if exports.is_empty() {
            0
        } else {
            max_ordinal - ordinal_base + 1
        };
        let needed_size_for_function_addresses = function_slots * 4;

        // One extra dword covers the alignment of the directory start.
        let needed_size = SIZE_OF_EXPORT_DIRECTORY
            + 4
            + needed_size_for_function_name_ordinals
            + needed_size_for_function_addresses
            + needed_size_for_strings
            + needed_size_for_function_name_rvas;

        self.reserve_space_in_section(section_index, needed_size + offset_from_section_start)?;

        let directory_pos = align_up(offset_from_section_start, 4)?;
        let mut names_pos = directory_pos + SIZE_OF_EXPORT_DIRECTORY + info.name.len() as u32 + 1;
        let mut name_ordinals_pos = names_pos + needed_size_for_function_names;
        let mut forwards_pos = name_ordinals_pos + needed_size_for_function_name_ordinals;
        let mut addresses_pos = forwards_pos + needed_size_for_function_forwards;
        let mut name_rvas_pos = addresses_pos + needed_size_for_function_addresses;

        let directory = ImageExportDirectory {
            characteristics: info.characteristics,
            time_date_stamp: info.timestamp,
            major_version: info.major_version,
            minor_version: info.minor_version,
            name: self
                .rva_from_section_offset(section_index, directory_pos + SIZE_OF_EXPORT_DIRECTORY)?
                .0,
            base: ordinal_base,
            number_of_functions: function_slots,
            number_of_names,
            address_of_functions: self.rva_from_section_offset(section_index, addresses_pos)?.0,
            address_of_names: self.rva_from_section_offset(section_index, name_rvas_pos)?.0,
            address_of_name_ordinals: self
                .rva_from_section_offset(section_index, name_ordinals_pos)?
                .0,
        };
        let section_va = self.sections()[section_index].virtual_address();

        let raw_data = self.sections_mut()[section_index].data_mut();
        put_pod(raw_data, directory_pos as usize, &directory)?;
        put_bytes(
            raw_data,
            (directory_pos + SIZE_OF_EXPORT_DIRECTORY) as usize,
            info.name.as_bytes(),
        )?;
        raw_data[(directory_pos + SIZE_OF_EXPORT_DIRECTORY) as usize + info.name.len()] = 0;

        // Sorted alphabetically: the loader binary-searches this table.
        let mut named_functions: BTreeMap<String, u16> = BTreeMap::new();

        let mut last_ordinal = ordinal_base;
        for export in &exports {
            if export.ordinal as u32 > last_ordinal {
                // Zero-fill the address slots of skipped ordinals.
                let gap = 4 * (export.ordinal as u32 - last_ordinal - 1);
                for byte in raw_data
                    .get_mut(addresses_pos as usize..(addresses_pos + gap) as usize)
                    .ok_or(Error::OffsetOutOfRange)?
                {
                    *byte = 0;
                }
                addresses_pos += gap;
                last_ordinal = export.ordinal as u32;
            }

            if let Some(name) = &export.name {
                named_functions.insert(name.clone(), (export.ordinal as u32 - ordinal_base) as u16);
            }

            if let Some(forwarded) = &export.forwarded_name {
                let forward_rva = section_va + forwards_pos;
                put_u32(raw_data, addresses_pos as usize, forward_rva)?;
                addresses_pos += 4;
                put_bytes(raw_data, forwards_pos as usize, forwarded.as_bytes())?;
                raw_data[forwards_pos as usize + forwarded.len()] = 0;
                forwards_pos += forwarded.len() as u32 + 1;
            } else {
                put_u32(raw_data, addresses_pos as usize, export.rva.0)?;
                addresses_pos += 4;
            }
        }

        for (name, name_ordinal) in &named_functions {
            let name_rva = section_va + names_pos;
            put_u32(raw_data, name_rvas_pos as usize, name_rva)?;
            name_rvas_pos += 4;

            put_bytes(raw_data, names_pos as usize, name.as_bytes())?;
            raw_data[names_pos as usize + name.len()] = 0;
            names_pos += name.len() as u32 + 1;

            put_u16(raw_data, name_ordinals_pos as usize, *name_ordinal)?;
            name_ordinals_pos += 2;
        }

        self.recalculate_section_sizes(section_index, auto_strip_last_section)?;

        let result = ImageDirectory {
            rva: self.rva_from_section_offset(section_index, directory_pos)?,
            size: needed_size,
        };

        if save_to_pe_header {
            self.set_directory_rva(DIRECTORY_ENTRY_EXPORT, result.rva);
            self.set_directory_size(DIRECTORY_ENTRY_EXPORT, result.size);
        }

        Ok(result)
    }
}
