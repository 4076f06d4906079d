use crate::arch::ImageArch;
use crate::optional::{DIRECTORY_ENTRY_IAT, DIRECTORY_ENTRY_IMPORT};
use crate::pe::{ImageDirectory, PortableExecutable, Rva, SectionDataType};
use crate::scribe::{align_up, put_bytes, put_pod, put_u16, put_u32, put_u64, Scribe};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};

/// On-disk `IMAGE_IMPORT_DESCRIPTOR`: one record per imported library,
/// terminated by an all-zero record.
#[derive(Copy, Clone, Pod, Zeroable, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ImageImportDescriptor {
    /// RVA of the original (hint/name) thunk array, zero if absent.
    pub original_first_thunk: u32,
    /// Zero until bound; then the timestamp of the bound DLL.
    pub time_date_stamp: u32,
    /// Index of the first forwarder reference, -1 if none.
    pub forwarder_chain: u32,
    /// RVA of the library name string.
    pub name: u32,
    /// RVA of the import address table, overwritten by the loader.
    pub first_thunk: u32,
}

/// One imported function: either by name with a lookup hint, or by ordinal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportedFunction {
    /// Function name, when importing by name.
    pub name: Option<String>,
    /// Index hint into the exporting module's name table.
    pub hint: u16,
    /// Import ordinal, when importing by ordinal.
    pub ordinal: u16,
    /// Content of the IAT slot at parse time; meaningful for bound images
    /// that carry both an IAT and an original IAT.
    pub iat_va: u64,
}

impl ImportedFunction {
    /// True if the function is imported by name.
    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }
}

/// One imported library and its ordered function list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportLibrary {
    /// Library file name.
    pub name: String,
    /// Bound timestamp from the descriptor.
    pub timestamp: u32,
    /// RVA of the import address table, zero if not yet placed.
    pub rva_to_iat: u32,
    /// RVA of the original (hint/name) thunk array, zero if absent.
    pub rva_to_original_iat: u32,
    /// The imported functions, in IAT order.
    pub functions: Vec<ImportedFunction>,
}

impl ImportLibrary {
    /// Returns the Unix epoch timestamp as a `DateTime<Utc>`
    #[cfg(feature = "chrono")]
    pub fn get_time_date_stamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.timestamp.into(), 0)
    }
}

/// Knobs of [`PortableExecutable::rebuild_imports`].
///
/// The defaults keep a loadable image loadable: thunk arrays stay at their
/// original RVAs (so loader-resolved layouts survive) and the new descriptor
/// list is written to the headers.
#[derive(Copy, Clone, Debug)]
pub struct ImportRebuilderSettings {
    /// Offset inside the target section where directory data begins.
    pub offset_from_section_start: u32,
    /// Emit a hint/name thunk array distinct from the IAT.
    pub build_original_iat: bool,
    /// Keep each library's thunk arrays at the non-zero RVAs it already
    /// carries instead of allocating new ones.
    pub save_iat_and_original_iat_rvas: bool,
    /// When thunk arrays are kept in place, overwrite their bytes with
    /// freshly built thunks.
    pub rewrite_iat_and_original_iat_contents: bool,
    /// When thunk arrays are kept in place but a library lacks an original
    /// IAT, synthesize one in the target section.
    pub fill_missing_original_iats: bool,
    /// Update the import data-directory entry after rebuilding.
    pub set_to_pe_headers: bool,
    /// Clear the IAT data-directory entry (index 12) after rebuilding.
    pub zero_directory_entry_iat: bool,
    /// Strip the last section after the rebuild if the imports landed there.
    pub auto_strip_last_section: bool,
}

impl Default for ImportRebuilderSettings {
    fn default() -> Self {
        ImportRebuilderSettings {
            offset_from_section_start: 0,
            build_original_iat: true,
            save_iat_and_original_iat_rvas: true,
            rewrite_iat_and_original_iat_contents: false,
            fill_missing_original_iats: false,
            set_to_pe_headers: true,
            zero_directory_entry_iat: false,
            auto_strip_last_section: true,
        }
    }
}

const SIZE_OF_IMPORT_DESCRIPTOR: u32 = core::mem::size_of::<ImageImportDescriptor>() as u32;

#[derive(Default)]
struct LibraryLayout {
    name_pos: u32,
    hint_name_pos: Vec<u32>,
    iat_pos: Option<u32>,
    original_iat_pos: Option<u32>,
    iat_rva: u32,
    original_iat_rva: u32,
    rewrite_iat_in_place: bool,
    rewrite_original_iat_in_place: bool,
}

impl<A: ImageArch> PortableExecutable<A> {
    /// Lists the imported libraries and their functions.
    ///
    /// Thunks are read from the original (hint/name) array when present,
    /// falling back to the IAT; a thunk with the width-specific high bit set
    /// imports by ordinal.
    pub fn get_imported_functions(&self) -> Result<Vec<ImportLibrary>> {
        let mut libraries = Vec::new();
        if !self.has_imports() {
            return Ok(libraries);
        }

        let dir_rva = self.directory_rva(DIRECTORY_ENTRY_IMPORT);
        let mut descriptor_pos = dir_rva;
        loop {
            let descriptor: ImageImportDescriptor = self
                .section_window(Rva(descriptor_pos), SectionDataType::Virtual, true)?
                .read_pod(0)
                .map_err(|_| Error::IncorrectImportDirectory)?;
            if descriptor == ImageImportDescriptor::default() {
                break;
            }
            if descriptor.name == 0 {
                return Err(Error::IncorrectImportDirectory);
            }

            let mut library = ImportLibrary {
                name: self
                    .string_at_rva(Rva(descriptor.name))
                    .map_err(|_| Error::IncorrectImportDirectory)?,
                timestamp: descriptor.time_date_stamp,
                rva_to_iat: descriptor.first_thunk,
                rva_to_original_iat: descriptor.original_first_thunk,
                functions: Vec::new(),
            };

            let lookup_rva = if descriptor.original_first_thunk != 0 {
                descriptor.original_first_thunk
            } else {
                descriptor.first_thunk
            };
            if lookup_rva == 0 {
                return Err(Error::IncorrectImportDirectory);
            }

            let has_both = descriptor.original_first_thunk != 0 && descriptor.first_thunk != 0;
            let mut index = 0u32;
            loop {
                let thunk = self
                    .read_thunk(Rva(lookup_rva + index * A::THUNK_SIZE))
                    .map_err(|_| Error::IncorrectImportDirectory)?;
                if thunk == 0 {
                    break;
                }

                let mut function = ImportedFunction::default();
                if thunk & A::ORDINAL_FLAG != 0 {
                    function.ordinal = thunk as u16;
                } else {
                    let hint_name_rva = thunk as u32;
                    let window = self
                        .section_window(Rva(hint_name_rva), SectionDataType::Virtual, true)
                        .map_err(|_| Error::IncorrectImportDirectory)?;
                    function.hint = window
                        .read_u16(0)
                        .map_err(|_| Error::IncorrectImportDirectory)?;
                    let name = window
                        .read_cstr(2, window.len().saturating_sub(2))
                        .map_err(|_| Error::IncorrectImportDirectory)?;
                    function.name = Some(String::from_utf8_lossy(name).into_owned());
                }
                if has_both {
                    function.iat_va = self
                        .read_thunk(Rva(descriptor.first_thunk + index * A::THUNK_SIZE))
                        .unwrap_or(0);
                }
                library.functions.push(function);
                index += 1;
            }

            libraries.push(library);
            descriptor_pos += SIZE_OF_IMPORT_DESCRIPTOR;
        }

        Ok(libraries)
    }

    fn read_thunk(&self, rva: Rva) -> Result<u64> {
        let window = self.section_window(rva, SectionDataType::Virtual, true)?;
        if A::IS_64 {
            window.read_u64(0)
        } else {
            window.read_u32(0).map(u64::from)
        }
    }

    fn thunk_value_for(&self, function: &ImportedFunction, hint_name_rva: u32) -> u64 {
        if function.has_name() {
            hint_name_rva as u64
        } else {
            A::ORDINAL_FLAG | function.ordinal as u64
        }
    }

    fn write_thunk_at(buf: &mut [u8], offset: usize, value: u64, is_64: bool) -> Result<()> {
        if is_64 {
            put_u64(buf, offset, value)
        } else {
            put_u32(buf, offset, value as u32)
        }
    }

    /// Rebuilds the import directory inside the section at `section_index`.
    ///
    /// Produces a zero-terminated descriptor list, per-library name strings
    /// and hint/name records, and thunk arrays placed according to
    /// `settings`. Do not append new functions to a library whose thunk
    /// arrays are kept in place: the loader-resolved layout has no room for
    /// them. Adding whole new libraries is always safe.
    pub fn rebuild_imports(
        &mut self,
        imports: &[ImportLibrary],
        section_index: usize,
        settings: &ImportRebuilderSettings,
    ) -> Result<ImageDirectory> {
        if section_index >= self.sections().len() {
            return Err(Error::SectionIsNotAttached);
        }

        let thunk_size = A::THUNK_SIZE;
        let descriptors_pos = align_up(settings.offset_from_section_start, 4)?;
        let mut current = descriptors_pos + SIZE_OF_IMPORT_DESCRIPTOR * (imports.len() as u32 + 1);
        let mut layouts = Vec::with_capacity(imports.len());

        for library in imports {
            let mut layout = LibraryLayout {
                name_pos: current,
                ..Default::default()
            };
            current += library.name.len() as u32 + 1;

            for function in &library.functions {
                if function.has_name() {
                    current = align_up(current, 2)?;
                    layout.hint_name_pos.push(current);
                    let name_len = function.name.as_deref().unwrap_or("").len() as u32;
                    current += 2 + name_len + 1;
                } else {
                    layout.hint_name_pos.push(0);
                }
            }

            let slots = (library.functions.len() as u32 + 1) * thunk_size;

            if settings.save_iat_and_original_iat_rvas && library.rva_to_iat != 0 {
                layout.iat_rva = library.rva_to_iat;
                layout.rewrite_iat_in_place = settings.rewrite_iat_and_original_iat_contents;
            } else {
                current = align_up(current, thunk_size)?;
                layout.iat_pos = Some(current);
                current += slots;
            }

            if settings.build_original_iat {
                if settings.save_iat_and_original_iat_rvas && library.rva_to_iat != 0 {
                    if library.rva_to_original_iat != 0 {
                        layout.original_iat_rva = library.rva_to_original_iat;
                        layout.rewrite_original_iat_in_place =
                            settings.rewrite_iat_and_original_iat_contents;
                    } else if settings.fill_missing_original_iats {
                        current = align_up(current, thunk_size)?;
                        layout.original_iat_pos = Some(current);
                        current += slots;
                    }
                } else {
                    current = align_up(current, thunk_size)?;
                    layout.original_iat_pos = Some(current);
                    current += slots;
                }
            }

            layouts.push(layout);
        }

        let needed_size = current - settings.offset_from_section_start;
        self.reserve_space_in_section(
            section_index,
            needed_size + settings.offset_from_section_start,
        )?;

        // Resolve section-relative positions to RVAs before writing.
        for layout in &mut layouts {
            if let Some(pos) = layout.iat_pos {
                layout.iat_rva = self.rva_from_section_offset(section_index, pos)?.0;
            }
            if let Some(pos) = layout.original_iat_pos {
                layout.original_iat_rva = self.rva_from_section_offset(section_index, pos)?.0;
            }
        }
        let section_va = self.sections()[section_index].virtual_address();

        // In-place thunk rewrites target existing image memory, outside the
        // section being filled.
        for (library, layout) in imports.iter().zip(&layouts) {
            for target in [
                (layout.rewrite_iat_in_place, library.rva_to_iat),
                (
                    layout.rewrite_original_iat_in_place,
                    library.rva_to_original_iat,
                ),
            ] {
                let (rewrite, base_rva) = target;
                if !rewrite || base_rva == 0 {
                    continue;
                }
                for (index, function) in library.functions.iter().enumerate() {
                    let hint_name_rva = match layout.hint_name_pos.get(index) {
                        Some(&pos) if pos != 0 => section_va + pos,
                        _ => 0,
                    };
                    let value = self.thunk_value_for(function, hint_name_rva);
                    let slot_rva = Rva(base_rva + index as u32 * thunk_size);
                    let slot = self.section_data_mut(slot_rva, thunk_size as usize)?;
                    Self::write_thunk_at(slot, 0, value, A::IS_64)?;
                }
                let terminator_rva =
                    Rva(base_rva + library.functions.len() as u32 * thunk_size);
                let slot = self.section_data_mut(terminator_rva, thunk_size as usize)?;
                Self::write_thunk_at(slot, 0, 0, A::IS_64)?;
            }
        }

        let raw_data = self.sections_mut()[section_index].data_mut();
        for (library_index, (library, layout)) in imports.iter().zip(&layouts).enumerate() {
            let descriptor = ImageImportDescriptor {
                original_first_thunk: layout.original_iat_rva,
                time_date_stamp: library.timestamp,
                forwarder_chain: 0,
                name: section_va + layout.name_pos,
                first_thunk: layout.iat_rva,
            };
            put_pod(
                raw_data,
                (descriptors_pos + library_index as u32 * SIZE_OF_IMPORT_DESCRIPTOR) as usize,
                &descriptor,
            )?;

            put_bytes(raw_data, layout.name_pos as usize, library.name.as_bytes())?;
            raw_data[layout.name_pos as usize + library.name.len()] = 0;

            for (index, function) in library.functions.iter().enumerate() {
                let hint_name_pos = layout.hint_name_pos[index];
                if let Some(name) = &function.name {
                    put_u16(raw_data, hint_name_pos as usize, function.hint)?;
                    put_bytes(raw_data, hint_name_pos as usize + 2, name.as_bytes())?;
                    raw_data[hint_name_pos as usize + 2 + name.len()] = 0;
                }

                let hint_name_rva = if hint_name_pos != 0 {
                    section_va + hint_name_pos
                } else {
                    0
                };
                let value = if function.has_name() {
                    hint_name_rva as u64
                } else {
                    A::ORDINAL_FLAG | function.ordinal as u64
                };
                for pos in [layout.iat_pos, layout.original_iat_pos].into_iter().flatten() {
                    Self::write_thunk_at(
                        raw_data,
                        (pos + index as u32 * thunk_size) as usize,
                        value,
                        A::IS_64,
                    )?;
                }
            }
            // Thunk arrays end with a zero slot; the buffer was zero-filled
            // on reservation, but the section may hold stale bytes.
            for pos in [layout.iat_pos, layout.original_iat_pos].into_iter().flatten() {
                Self::write_thunk_at(
                    raw_data,
                    (pos + library.functions.len() as u32 * thunk_size) as usize,
                    0,
                    A::IS_64,
                )?;
            }
        }
        let terminator = ImageImportDescriptor::default();
        put_pod(
            raw_data,
            (descriptors_pos + imports.len() as u32 * SIZE_OF_IMPORT_DESCRIPTOR) as usize,
            &terminator,
        )?;

        self.recalculate_section_sizes(section_index, settings.auto_strip_last_section)?;

        let result = ImageDirectory {
            rva: self.rva_from_section_offset(section_index, descriptors_pos)?,
            size: SIZE_OF_IMPORT_DESCRIPTOR * (imports.len() as u32 + 1),
        };

        if settings.set_to_pe_headers {
            self.set_directory_rva(DIRECTORY_ENTRY_IMPORT, result.rva);
            self.set_directory_size(DIRECTORY_ENTRY_IMPORT, result.size);
            if settings.zero_directory_entry_iat {
                self.remove_directory(DIRECTORY_ENTRY_IAT);
            }
        }

        Ok(result)
    }
}
