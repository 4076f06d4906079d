use crate::arch::ImageArch;
use crate::optional::DIRECTORY_ENTRY_DEBUG;
use crate::pe::{PortableExecutable, Rva, SectionDataType};
use crate::scribe::{is_sum_safe, utf16_to_string, Scribe};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use core::fmt;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// On-disk `IMAGE_DEBUG_DIRECTORY` record.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ImageDebugDirectory {
    /// Reserved, must be zero.
    pub characteristics: u32,
    /// When the debug data was created.
    pub time_date_stamp: u32,
    /// Major version number of the debug-data format.
    pub major_version: u16,
    /// Minor version number of the debug-data format.
    pub minor_version: u16,
    /// Format of the debug data.
    pub debug_type: u32,
    /// Size of the debug data, excluding the debug directory itself.
    pub size_of_data: u32,
    /// RVA of the debug data when mapped, or zero.
    pub address_of_raw_data: u32,
    /// File offset of the debug data.
    pub pointer_to_raw_data: u32,
}

/// Debug-data format selectors for `IMAGE_DEBUG_DIRECTORY::debug_type`.
#[derive(FromPrimitive, Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u32)]
pub enum DebugInfoType {
    /// Unknown value, ignored by all tools.
    Unknown = 0,
    /// COFF debug information.
    Coff = 1,
    /// CodeView debug information.
    CodeView = 2,
    /// Frame pointer omission information.
    Fpo = 3,
    /// Miscellaneous information.
    Misc = 4,
    /// Exception information.
    Exception = 5,
    /// Fixup information.
    Fixup = 6,
    /// The mapping from an RVA in image to an RVA in source image.
    OmapToSrc = 7,
    /// The mapping from an RVA in source image to an RVA in image.
    OmapFromSrc = 8,
    /// Borland debug information.
    Borland = 9,
    /// Reserved.
    Reserved10 = 10,
    /// Reserved (CLSID).
    Clsid = 11,
}

/// A 16-byte GUID as stored in RSDS CodeView records.
#[derive(Copy, Clone, Pod, Zeroable, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Guid {
    /// First component, 32 bits.
    pub data1: u32,
    /// Second component, 16 bits.
    pub data2: u16,
    /// Third component, 16 bits.
    pub data3: u16,
    /// Final 8 bytes.
    pub data4: [u8; 8],
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// One COFF debug symbol with its resolved name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoffSymbol {
    /// Index of the symbol in the symbol table.
    pub index: u32,
    /// Storage class of the symbol.
    pub storage_class: u8,
    /// Type field of the symbol.
    pub symbol_type: u16,
    /// Section the symbol belongs to.
    pub section_number: i16,
    /// RVA of the symbol.
    pub rva: u32,
    /// Resolved symbol or file name.
    pub name: String,
    /// True when the symbol names a source file.
    pub is_file: bool,
}

/// Parsed COFF debug information: the header fields plus the symbols.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoffDebugInfo {
    /// Number of symbols in the table.
    pub number_of_symbols: u32,
    /// Offset of the first symbol from the start of the debug data.
    pub lva_to_first_symbol: u32,
    /// Number of line-number entries.
    pub number_of_linenumbers: u32,
    /// Offset of the first line-number entry.
    pub lva_to_first_linenumber: u32,
    /// RVA of the first code byte.
    pub rva_to_first_byte_of_code: u32,
    /// RVA past the last code byte.
    pub rva_to_last_byte_of_code: u32,
    /// RVA of the first data byte.
    pub rva_to_first_byte_of_data: u32,
    /// RVA past the last data byte.
    pub rva_to_last_byte_of_data: u32,
    /// The symbols that passed name resolution.
    pub symbols: Vec<CoffSymbol>,
}

/// Advanced (format-specific) payload of one debug entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdvancedDebugInfo {
    /// PDB 7.0 ("RSDS") CodeView record.
    PdbRsds {
        /// GUID of the matching PDB.
        guid: Guid,
        /// Incremented each time the PDB is written.
        age: u32,
        /// Path of the PDB file.
        pdb_file_name: String,
    },
    /// PDB 2.0 ("NB10") CodeView record.
    PdbNb10 {
        /// Timestamp signature of the matching PDB.
        signature: u32,
        /// Incremented each time the PDB is written.
        age: u32,
        /// Path of the PDB file.
        pdb_file_name: String,
    },
    /// CodeView 4.0 ("NB09"), no structures available.
    CodeView4_0,
    /// CodeView 5.0 ("NB11"), no structures available.
    CodeView5_0,
    /// Other CodeView ("NB05"), no structures available.
    CodeView,
    /// IMAGE_DEBUG_MISC record.
    Misc {
        /// Record data type; 1 names the image file.
        data_type: u32,
        /// True if the text is UTF-16.
        unicode: bool,
        /// The record text.
        data: String,
    },
    /// COFF symbol information.
    Coff(CoffDebugInfo),
}

/// One debug-directory entry: the raw record fields plus any decoded
/// advanced payload.
#[derive(Clone, Debug, Default)]
pub struct DebugInfo {
    /// Reserved field.
    pub characteristics: u32,
    /// When the debug data was created.
    pub timestamp: u32,
    /// Major format version.
    pub major_version: u16,
    /// Minor format version.
    pub minor_version: u16,
    /// Raw type selector.
    pub debug_type: u32,
    /// Size of the referenced data.
    pub size_of_data: u32,
    /// RVA of the data when mapped, or zero.
    pub address_of_raw_data: u32,
    /// File offset of the data.
    pub pointer_to_raw_data: u32,
    /// Decoded payload, when the type is known and the data was captured
    /// and intact.
    pub advanced: Option<AdvancedDebugInfo>,
}

impl DebugInfo {
    /// Returns the type selector as an enum.
    pub fn get_type(&self) -> Option<DebugInfoType> {
        DebugInfoType::from_u32(self.debug_type)
    }

    /// Returns the advanced payload or fails if there is none.
    pub fn get_advanced_debug_info(&self) -> Result<&AdvancedDebugInfo> {
        self.advanced
            .as_ref()
            .ok_or(Error::AdvancedDebugInformationRequestError)
    }

    /// Returns the Unix epoch timestamp as a `DateTime<Utc>`
    #[cfg(feature = "chrono")]
    pub fn get_time_date_stamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.timestamp.into(), 0)
    }
}

const SIZE_OF_DEBUG_DIRECTORY: u32 = core::mem::size_of::<ImageDebugDirectory>() as u32;
const SIZE_OF_IMAGE_SYMBOL: usize = 18;
const IMAGE_SYM_CLASS_EXTERNAL: u8 = 2;
const IMAGE_SYM_CLASS_STATIC: u8 = 3;
const IMAGE_SYM_CLASS_FILE: u8 = 103;

impl<A: ImageArch> PortableExecutable<A> {
    /// Lists the debug directory. Entries whose raw payload was captured at
    /// parse time and whose type is CodeView, MISC, or COFF also carry
    /// decoded advanced information; a corrupt payload downgrades that entry
    /// to its basic fields.
    pub fn get_debug_information(&self) -> Result<Vec<DebugInfo>> {
        let mut entries = Vec::new();
        if !self.has_debug() {
            return Ok(entries);
        }

        let dir_rva = self.directory_rva(DIRECTORY_ENTRY_DEBUG);
        let dir_size = self.directory_size(DIRECTORY_ENTRY_DEBUG);
        if !is_sum_safe(dir_rva, dir_size) {
            return Err(Error::IncorrectDebugDirectory);
        }
        if self.length_remaining_from_rva(
            Rva(dir_rva),
            Rva(dir_rva),
            SectionDataType::Virtual,
            true,
        )? < SIZE_OF_DEBUG_DIRECTORY
        {
            return Err(Error::IncorrectDebugDirectory);
        }

        let mut current_pos = dir_rva;
        while current_pos < dir_rva + dir_size {
            let directory: ImageDebugDirectory = self
                .section_window(Rva(current_pos), SectionDataType::Virtual, true)?
                .read_pod(0)
                .map_err(|_| Error::IncorrectDebugDirectory)?;
            if directory.pointer_to_raw_data == 0 {
                break;
            }

            let mut info = DebugInfo {
                characteristics: directory.characteristics,
                timestamp: directory.time_date_stamp,
                major_version: directory.major_version,
                minor_version: directory.minor_version,
                debug_type: directory.debug_type,
                size_of_data: directory.size_of_data,
                address_of_raw_data: directory.address_of_raw_data,
                pointer_to_raw_data: directory.pointer_to_raw_data,
                advanced: None,
            };

            if let Some(data) = self.debug_raw_data().get(&directory.pointer_to_raw_data) {
                match parse_advanced_debug_info(directory.debug_type, data) {
                    Ok(advanced) => info.advanced = advanced,
                    Err(_) => {
                        log::warn!(
                            "corrupt debug payload at file offset {:#x}, keeping basic fields",
                            directory.pointer_to_raw_data
                        );
                    }
                }
            }

            entries.push(info);
            if !is_sum_safe(current_pos, SIZE_OF_DEBUG_DIRECTORY) {
                return Err(Error::IncorrectDebugDirectory);
            }
            current_pos += SIZE_OF_DEBUG_DIRECTORY;
        }

        Ok(entries)
    }
}

fn parse_advanced_debug_info(
    debug_type: u32,
    data: &[u8],
) -> Result<Option<AdvancedDebugInfo>> {
    match DebugInfoType::from_u32(debug_type) {
        Some(DebugInfoType::CodeView) => parse_codeview(data).map(Some),
        Some(DebugInfoType::Misc) => parse_misc(data).map(Some),
        Some(DebugInfoType::Coff) => parse_coff(data).map(|coff| Some(AdvancedDebugInfo::Coff(coff))),
        _ => Ok(None),
    }
}

fn parse_codeview(data: &[u8]) -> Result<AdvancedDebugInfo> {
    let signature = data
        .get(..4)
        .ok_or(Error::IncorrectDebugDirectory)?;
    match signature {
        b"RSDS" => {
            // CV_INFO_PDB70: signature, GUID, age, path.
            let guid: Guid = data.read_pod(4)?;
            let age = data.read_u32(20)?;
            let name = data.read_cstr(24, data.len().saturating_sub(24))?;
            Ok(AdvancedDebugInfo::PdbRsds {
                guid,
                age,
                pdb_file_name: String::from_utf8_lossy(name).into_owned(),
            })
        }
        b"NB10" => {
            // CV_INFO_PDB20: header (signature, offset), timestamp, age, path.
            let signature = data.read_u32(8)?;
            let age = data.read_u32(12)?;
            let name = data.read_cstr(16, data.len().saturating_sub(16))?;
            Ok(AdvancedDebugInfo::PdbNb10 {
                signature,
                age,
                pdb_file_name: String::from_utf8_lossy(name).into_owned(),
            })
        }
        b"NB09" => Ok(AdvancedDebugInfo::CodeView4_0),
        b"NB11" => Ok(AdvancedDebugInfo::CodeView5_0),
        b"NB05" => Ok(AdvancedDebugInfo::CodeView),
        _ => Err(Error::IncorrectDebugDirectory),
    }
}

fn parse_misc(data: &[u8]) -> Result<AdvancedDebugInfo> {
    // IMAGE_DEBUG_MISC: DataType, Length, Unicode, Reserved[3], Data.
    let data_type = data.read_u32(0)?;
    let length = data.read_u32(4)? as usize;
    let unicode = data.read_u8(8)? != 0;
    if length > data.len() || length < 12 {
        return Err(Error::IncorrectDebugDirectory);
    }
    let payload = &data[12..length];
    let text = if unicode {
        let units: Vec<u16> = payload
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        utf16_to_string(&units)
    } else {
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        String::from_utf8_lossy(&payload[..end]).into_owned()
    };
    Ok(AdvancedDebugInfo::Misc {
        data_type,
        unicode,
        data: text,
    })
}

fn parse_coff(data: &[u8]) -> Result<CoffDebugInfo> {
    let mut coff = CoffDebugInfo {
        number_of_symbols: data.read_u32(0)?,
        lva_to_first_symbol: data.read_u32(4)?,
        number_of_linenumbers: data.read_u32(8)?,
        lva_to_first_linenumber: data.read_u32(12)?,
        rva_to_first_byte_of_code: data.read_u32(16)?,
        rva_to_last_byte_of_code: data.read_u32(20)?,
        rva_to_first_byte_of_data: data.read_u32(24)?,
        rva_to_last_byte_of_data: data.read_u32(28)?,
        symbols: Vec::new(),
    };

    let symbols_bytes = (coff.number_of_symbols as usize)
        .checked_mul(SIZE_OF_IMAGE_SYMBOL)
        .ok_or(Error::IncorrectDebugDirectory)?;
    let first_symbol = coff.lva_to_first_symbol as usize;
    let string_table_start = first_symbol
        .checked_add(symbols_bytes)
        .ok_or(Error::IncorrectDebugDirectory)?;
    if data.len() < string_table_start {
        return Err(Error::IncorrectDebugDirectory);
    }

    let mut index = 0u32;
    while index < coff.number_of_symbols {
        let offset = first_symbol + index as usize * SIZE_OF_IMAGE_SYMBOL;
        let value = data.read_u32(offset + 8)?;
        let section_number = data.read_u16(offset + 12)? as i16;
        let symbol_type = data.read_u16(offset + 14)?;
        let storage_class = data.read_u8(offset + 16)?;
        let aux_count = data.read_u8(offset + 17)? as u32;

        if index.checked_add(aux_count).is_none()
            || index + aux_count > coff.number_of_symbols
            || data.len()
                < first_symbol + (index as usize + 1 + aux_count as usize) * SIZE_OF_IMAGE_SYMBOL
        {
            return Err(Error::IncorrectDebugDirectory);
        }

        if storage_class == IMAGE_SYM_CLASS_FILE {
            // The file name occupies the auxiliary symbol records.
            let name_start = first_symbol + (index as usize + 1) * SIZE_OF_IMAGE_SYMBOL;
            let name_len = aux_count as usize * SIZE_OF_IMAGE_SYMBOL;
            let raw_name = &data[name_start..name_start + name_len];
            let end = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
            coff.symbols.push(CoffSymbol {
                index,
                storage_class,
                symbol_type,
                section_number,
                rva: 0,
                name: String::from_utf8_lossy(&raw_name[..end]).into_owned(),
                is_file: true,
            });
            index += aux_count + 1;
            continue;
        }

        let is_function = symbol_type & 0xf0 == 0x20;
        if (storage_class == IMAGE_SYM_CLASS_STATIC && aux_count == 0 && section_number == 1)
            || (storage_class == IMAGE_SYM_CLASS_EXTERNAL && is_function && section_number > 0)
        {
            let short_name = data.read_u32(offset)?;
            let name = if short_name != 0 {
                let raw_name = &data[offset..offset + 8];
                let end = raw_name.iter().position(|&b| b == 0).unwrap_or(8);
                String::from_utf8_lossy(&raw_name[..end]).into_owned()
            } else {
                let long_offset = data.read_u32(offset + 4)? as usize;
                let name_pos = string_table_start
                    .checked_add(long_offset)
                    .ok_or(Error::IncorrectDebugDirectory)?;
                let raw_name = data.read_cstr(name_pos, data.len().saturating_sub(name_pos))?;
                String::from_utf8_lossy(raw_name).into_owned()
            };
            coff.symbols.push(CoffSymbol {
                index,
                storage_class,
                symbol_type,
                section_number,
                rva: value,
                name,
                is_file: false,
            });
        }

        index += aux_count + 1;
    }

    Ok(coff)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsds_record_decodes() {
        let mut data = Vec::new();
        data.extend_from_slice(b"RSDS");
        let guid = Guid {
            data1: 0x11223344,
            data2: 0x5566,
            data3: 0x7788,
            data4: [1, 2, 3, 4, 5, 6, 7, 8],
        };
        data.extend_from_slice(bytemuck::bytes_of(&guid));
        data.extend_from_slice(&9u32.to_le_bytes());
        data.extend_from_slice(b"out.pdb\0");
        match parse_codeview(&data).unwrap() {
            AdvancedDebugInfo::PdbRsds {
                guid: parsed,
                age,
                pdb_file_name,
            } => {
                assert_eq!(parsed, guid);
                assert_eq!(age, 9);
                assert_eq!(pdb_file_name, "out.pdb");
            }
            other => panic!("wrong payload: {:?}", other),
        }
    }

    #[test]
    fn misc_ansi_record_decodes() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&20u32.to_le_bytes());
        data.push(0);
        data.extend_from_slice(&[0, 0, 0]);
        data.extend_from_slice(b"image.exe\0\0\0");
        match parse_misc(&data).unwrap() {
            AdvancedDebugInfo::Misc {
                data_type,
                unicode,
                data,
            } => {
                assert_eq!(data_type, 1);
                assert!(!unicode);
                assert_eq!(data, "image.exe");
            }
            other => panic!("wrong payload: {:?}", other),
        }
    }

    #[test]
    fn unknown_codeview_signature_is_an_error() {
        assert!(parse_codeview(b"XXXX____").is_err());
    }
}
