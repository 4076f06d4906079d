use crate::scribe::{utf16_to_string, Scribe};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use std::collections::{BTreeMap, BTreeSet};

/// On-disk `VS_FIXEDFILEINFO`, the binary value of the root
/// `VS_VERSION_INFO` block.
#[derive(Copy, Clone, Pod, Zeroable, Default, PartialEq, Eq, Debug)]
#[repr(C)]
pub struct VsFixedFileInfo {
    /// Magic signature, 0xFEEF04BD.
    pub signature: u32,
    /// Structure version, 0x00010000.
    pub struc_version: u32,
    /// High half of the binary file version.
    pub file_version_ms: u32,
    /// Low half of the binary file version.
    pub file_version_ls: u32,
    /// High half of the binary product version.
    pub product_version_ms: u32,
    /// Low half of the binary product version.
    pub product_version_ls: u32,
    /// Which bits of `file_flags` are valid.
    pub file_flags_mask: u32,
    /// Build attribute flags.
    pub file_flags: u32,
    /// Operating system the file was designed for.
    pub file_os: u32,
    /// General file type.
    pub file_type: u32,
    /// Sub-type of the general type.
    pub file_subtype: u32,
    /// High half of the binary creation date.
    pub file_date_ms: u32,
    /// Low half of the binary creation date.
    pub file_date_ls: u32,
}

/// Expected `VS_FIXEDFILEINFO::signature` value.
pub const VS_FFI_SIGNATURE: u32 = 0xfeef_04bd;
/// Expected `VS_FIXEDFILEINFO::struc_version` value.
pub const VS_FFI_STRUCVERSION: u32 = 0x0001_0000;

/// String tables of a version resource: translation key (8 hex digits:
/// language then codepage) to property-name/value pairs.
pub type LangStringValuesMap = BTreeMap<String, BTreeMap<String, String>>;

/// `(language, codepage)` pairs from the `Translation` block.
pub type TranslationValuesSet = BTreeSet<(u16, u16)>;

/// Fixed (binary) version information of an image.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FileVersionInfo {
    /// The underlying fixed-info structure.
    pub fixed: VsFixedFileInfo,
}

impl FileVersionInfo {
    /// Wraps a parsed fixed-info structure.
    pub fn new(fixed: VsFixedFileInfo) -> Self {
        FileVersionInfo { fixed }
    }

    /// The file version as "major.minor.build.revision".
    pub fn file_version_string(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.fixed.file_version_ms >> 16,
            self.fixed.file_version_ms & 0xffff,
            self.fixed.file_version_ls >> 16,
            self.fixed.file_version_ls & 0xffff,
        )
    }

    /// The product version as "major.minor.build.revision".
    pub fn product_version_string(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.fixed.product_version_ms >> 16,
            self.fixed.product_version_ms & 0xffff,
            self.fixed.product_version_ls >> 16,
            self.fixed.product_version_ls & 0xffff,
        )
    }

    /// Sets both halves of the binary file version.
    pub fn set_file_version(&mut self, major: u16, minor: u16, build: u16, revision: u16) {
        self.fixed.file_version_ms = (major as u32) << 16 | minor as u32;
        self.fixed.file_version_ls = (build as u32) << 16 | revision as u32;
    }

    /// Sets both halves of the binary product version.
    pub fn set_product_version(&mut self, major: u16, minor: u16, build: u16, revision: u16) {
        self.fixed.product_version_ms = (major as u32) << 16 | minor as u32;
        self.fixed.product_version_ls = (build as u32) << 16 | revision as u32;
    }
}

const BLOCK_HEADER_WORDS: usize = 3;

fn throw_incorrect() -> Error {
    Error::ResourceIncorrectVersionInfo
}

// Aligned position of a block's value, past its header and key string.
fn version_block_value_pos(base_pos: usize, key_units: usize) -> Result<usize> {
    let pos = BLOCK_HEADER_WORDS * 2 + base_pos + (key_units + 1) * 2;
    Ok((pos + 3) & !3)
}

fn version_block_first_child_pos(
    base_pos: usize,
    value_length: usize,
    key_units: usize,
) -> Result<usize> {
    let value_pos = version_block_value_pos(base_pos, key_units)?;
    Ok(value_pos + ((value_length + 3) & !3))
}

struct VersionBlock {
    length: usize,
    value_length: usize,
    key: Vec<u16>,
}

fn read_version_block(data: &[u8], pos: usize) -> Result<VersionBlock> {
    let length = data.read_u16(pos).map_err(|_| throw_incorrect())? as usize;
    let value_length = data.read_u16(pos + 2).map_err(|_| throw_incorrect())? as usize;
    let key = data
        .read_utf16_cstr(pos + 6, (data.len().saturating_sub(pos + 6)) / 2)
        .map_err(|_| throw_incorrect())?;
    if length == 0 {
        return Err(throw_incorrect());
    }
    Ok(VersionBlock {
        length,
        value_length,
        key,
    })
}

/// Parses a `VS_VERSION_INFO` resource: the fixed file info, the
/// `StringFileInfo` tables, and the `VarFileInfo` translation list.
pub fn parse_version_info(
    data: &[u8],
) -> Result<(FileVersionInfo, LangStringValuesMap, TranslationValuesSet)> {
    let mut strings = LangStringValuesMap::new();
    let mut translations = TranslationValuesSet::new();

    let root = read_version_block(data, 0)?;
    if utf16_to_string(&root.key) != "VS_VERSION_INFO" {
        return Err(throw_incorrect());
    }

    let mut info = FileVersionInfo::default();
    if root.value_length != 0 {
        let value_pos = version_block_value_pos(0, root.key.len())?;
        let fixed: VsFixedFileInfo = data.read_pod(value_pos).map_err(|_| throw_incorrect())?;
        if fixed.signature != VS_FFI_SIGNATURE || fixed.struc_version != VS_FFI_STRUCVERSION {
            return Err(throw_incorrect());
        }
        info = FileVersionInfo::new(fixed);
    }

    let mut child_pos = version_block_first_child_pos(0, root.value_length, root.key.len())?;
    while child_pos < root.length {
        let block = read_version_block(data, child_pos)?;
        let block_key = utf16_to_string(&block.key);

        match block_key.as_str() {
            "StringFileInfo" => {
                let mut table_pos =
                    version_block_first_child_pos(child_pos, block.value_length, block.key.len())?;
                while table_pos - child_pos < block.length {
                    let table = read_version_block(data, table_pos)?;
                    let mut values = BTreeMap::new();

                    let mut string_pos = version_block_first_child_pos(
                        table_pos,
                        table.value_length,
                        table.key.len(),
                    )?;
                    while string_pos - table_pos < table.length {
                        let string_block = read_version_block(data, string_pos)?;
                        let mut value = String::new();
                        if string_block.value_length != 0 {
                            let value_pos =
                                version_block_value_pos(string_pos, string_block.key.len())?;
                            // ValueLength counts UTF-16 units for text values.
                            let units = data
                                .read_utf16(value_pos, string_block.value_length)
                                .map_err(|_| throw_incorrect())?;
                            let trimmed: Vec<u16> =
                                units.into_iter().take_while(|&unit| unit != 0).collect();
                            value = utf16_to_string(&trimmed);
                        }
                        values.insert(utf16_to_string(&string_block.key), value);
                        string_pos += (string_block.length + 3) & !3;
                    }

                    strings.insert(utf16_to_string(&table.key), values);
                    table_pos += (table.length + 3) & !3;
                }
            }
            "VarFileInfo" => {
                let mut var_pos =
                    version_block_first_child_pos(child_pos, block.value_length, block.key.len())?;
                while var_pos - child_pos < block.length {
                    let var_block = read_version_block(data, var_pos)?;
                    if utf16_to_string(&var_block.key) == "Translation"
                        && var_block.value_length != 0
                    {
                        let value_pos = version_block_value_pos(var_pos, var_block.key.len())?;
                        if data.len() < value_pos + var_block.value_length {
                            return Err(throw_incorrect());
                        }
                        let mut offset = 0;
                        while offset + 4 <= var_block.value_length {
                            let language = data
                                .read_u16(value_pos + offset)
                                .map_err(|_| throw_incorrect())?;
                            let codepage = data
                                .read_u16(value_pos + offset + 2)
                                .map_err(|_| throw_incorrect())?;
                            translations.insert((language, codepage));
                            offset += 4;
                        }
                    }
                    var_pos += (var_block.length + 3) & !3;
                }
            }
            _ => return Err(throw_incorrect()),
        }

        child_pos += (block.length + 3) & !3;
    }

    Ok((info, strings, translations))
}

fn push_utf16_cstr(out: &mut Vec<u8>, text: &str) {
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&0u16.to_le_bytes());
}

fn align4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn begin_block(out: &mut Vec<u8>, value_length: u16, block_type: u16, key: &str) -> usize {
    let start = out.len();
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&value_length.to_le_bytes());
    out.extend_from_slice(&block_type.to_le_bytes());
    push_utf16_cstr(out, key);
    align4(out);
    start
}

fn end_block(out: &mut Vec<u8>, start: usize) {
    let length = (out.len() - start) as u16;
    out[start..start + 2].copy_from_slice(&length.to_le_bytes());
}

/// Serializes a `VS_VERSION_INFO` block from the fixed info, the string
/// tables, and the translation list. Both halves of the file and product
/// versions come from their own fields.
pub fn build_version_info(
    info: &FileVersionInfo,
    strings: &LangStringValuesMap,
    translations: &TranslationValuesSet,
) -> Vec<u8> {
    let mut out = Vec::new();

    let mut fixed = info.fixed;
    fixed.signature = VS_FFI_SIGNATURE;
    fixed.struc_version = VS_FFI_STRUCVERSION;

    let root = begin_block(
        &mut out,
        core::mem::size_of::<VsFixedFileInfo>() as u16,
        0,
        "VS_VERSION_INFO",
    );
    out.extend_from_slice(bytemuck::bytes_of(&fixed));

    if !strings.is_empty() {
        align4(&mut out);
        let string_file_info = begin_block(&mut out, 0, 1, "StringFileInfo");
        for (translation_key, values) in strings {
            let table = begin_block(&mut out, 0, 1, translation_key);
            for (name, value) in values {
                align4(&mut out);
                let value_units = value.encode_utf16().count() as u16 + 1;
                let string_block = begin_block(&mut out, value_units, 1, name);
                push_utf16_cstr(&mut out, value);
                end_block(&mut out, string_block);
            }
            end_block(&mut out, table);
            align4(&mut out);
        }
        end_block(&mut out, string_file_info);
    }

    if !translations.is_empty() {
        align4(&mut out);
        let var_file_info = begin_block(&mut out, 0, 1, "VarFileInfo");
        let translation = begin_block(&mut out, translations.len() as u16 * 4, 0, "Translation");
        for (language, codepage) in translations {
            out.extend_from_slice(&language.to_le_bytes());
            out.extend_from_slice(&codepage.to_le_bytes());
        }
        end_block(&mut out, translation);
        end_block(&mut out, var_file_info);
    }

    end_block(&mut out, root);
    out
}

/// The translation key the viewer and editor fall back to when none is
/// given: language 0x0419 with codepage 0x04b0.
pub const DEFAULT_LANGUAGE_TRANSLATION: &str = "041904b0";

/// Formats a `(language, codepage)` pair as an 8-hex-digit translation key.
pub fn translation_to_string(language: u16, codepage: u16) -> String {
    format!("{:04x}{:04x}", language, codepage)
}

/// Splits an 8-hex-digit translation key back into language and codepage.
pub fn translation_from_string(translation: &str) -> Result<(u16, u16)> {
    if translation.len() != 8 {
        return Err(Error::ResourceIncorrectVersionInfo);
    }
    let language = u16::from_str_radix(&translation[..4], 16)
        .map_err(|_| Error::ResourceIncorrectVersionInfo)?;
    let codepage = u16::from_str_radix(&translation[4..], 16)
        .map_err(|_| Error::ResourceIncorrectVersionInfo)?;
    Ok((language, codepage))
}

/// Read-only access to the named string properties of a version resource.
pub struct VersionInfoViewer<'a> {
    strings: &'a LangStringValuesMap,
    translations: &'a TranslationValuesSet,
}

impl<'a> VersionInfoViewer<'a> {
    /// Creates a viewer over parsed version-info maps.
    pub fn new(strings: &'a LangStringValuesMap, translations: &'a TranslationValuesSet) -> Self {
        VersionInfoViewer {
            strings,
            translations,
        }
    }

    /// The `(language, codepage)` translation pairs.
    pub fn get_translation_list(&self) -> Vec<(u16, u16)> {
        self.translations.iter().copied().collect()
    }

    /// A named property, looked up in the given translation's table, or in
    /// the first table when no translation is given.
    pub fn get_property(&self, name: &str, translation: Option<&str>) -> Result<String> {
        let table = match translation {
            Some(key) => self.strings.get(key),
            None => self.strings.values().next(),
        };
        table
            .and_then(|values| values.get(name))
            .cloned()
            .ok_or(Error::VersionInfoStringDoesNotExist)
    }

    /// The "CompanyName" property.
    pub fn get_company_name(&self, translation: Option<&str>) -> Result<String> {
        self.get_property("CompanyName", translation)
    }

    /// The "FileDescription" property.
    pub fn get_file_description(&self, translation: Option<&str>) -> Result<String> {
        self.get_property("FileDescription", translation)
    }

    /// The "FileVersion" property.
    pub fn get_file_version(&self, translation: Option<&str>) -> Result<String> {
        self.get_property("FileVersion", translation)
    }

    /// The "InternalName" property.
    pub fn get_internal_name(&self, translation: Option<&str>) -> Result<String> {
        self.get_property("InternalName", translation)
    }

    /// The "LegalCopyright" property.
    pub fn get_legal_copyright(&self, translation: Option<&str>) -> Result<String> {
        self.get_property("LegalCopyright", translation)
    }

    /// The "OriginalFilename" property.
    pub fn get_original_filename(&self, translation: Option<&str>) -> Result<String> {
        self.get_property("OriginalFilename", translation)
    }

    /// The "ProductName" property.
    pub fn get_product_name(&self, translation: Option<&str>) -> Result<String> {
        self.get_property("ProductName", translation)
    }

    /// The "ProductVersion" property.
    pub fn get_product_version(&self, translation: Option<&str>) -> Result<String> {
        self.get_property("ProductVersion", translation)
    }
}

/// Mutating access to the string properties and translations of a version
/// resource. Serialize the result with [`build_version_info`] or
/// [`set_version_info`](crate::resource_manager::ResourceManager::set_version_info).
pub struct VersionInfoEditor<'a> {
    strings: &'a mut LangStringValuesMap,
    translations: &'a mut TranslationValuesSet,
}

impl<'a> VersionInfoEditor<'a> {
    /// Creates an editor over parsed version-info maps.
    pub fn new(
        strings: &'a mut LangStringValuesMap,
        translations: &'a mut TranslationValuesSet,
    ) -> Self {
        VersionInfoEditor {
            strings,
            translations,
        }
    }

    /// Sets a named property in the given translation's table (the default
    /// translation when none is given), creating table and translation
    /// entries as needed.
    pub fn set_property(
        &mut self,
        name: &str,
        value: &str,
        translation: Option<&str>,
    ) -> Result<()> {
        let key = translation.unwrap_or(DEFAULT_LANGUAGE_TRANSLATION);
        let (language, codepage) = translation_from_string(key)?;
        self.strings
            .entry(key.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
        self.translations.insert((language, codepage));
        Ok(())
    }

    /// Removes a named property from the given translation's table.
    pub fn remove_property(&mut self, name: &str, translation: Option<&str>) -> Result<()> {
        let key = translation.unwrap_or(DEFAULT_LANGUAGE_TRANSLATION);
        match self.strings.get_mut(key) {
            Some(values) => {
                values.remove(name);
                Ok(())
            }
            None => Err(Error::VersionInfoStringDoesNotExist),
        }
    }

    /// Adds a `(language, codepage)` pair to the translation list.
    pub fn add_translation(&mut self, language: u16, codepage: u16) {
        self.translations.insert((language, codepage));
    }

    /// Removes a `(language, codepage)` pair from the translation list.
    pub fn remove_translation(&mut self, language: u16, codepage: u16) {
        self.translations.remove(&(language, codepage));
    }

    /// Sets the "CompanyName" property.
    pub fn set_company_name(&mut self, value: &str, translation: Option<&str>) -> Result<()> {
        self.set_property("CompanyName", value, translation)
    }

    /// Sets the "FileDescription" property.
    pub fn set_file_description(&mut self, value: &str, translation: Option<&str>) -> Result<()> {
        self.set_property("FileDescription", value, translation)
    }

    /// Sets the "FileVersion" property.
    pub fn set_file_version(&mut self, value: &str, translation: Option<&str>) -> Result<()> {
        self.set_property("FileVersion", value, translation)
    }

    /// Sets the "InternalName" property.
    pub fn set_internal_name(&mut self, value: &str, translation: Option<&str>) -> Result<()> {
        self.set_property("InternalName", value, translation)
    }

    /// Sets the "LegalCopyright" property.
    pub fn set_legal_copyright(&mut self, value: &str, translation: Option<&str>) -> Result<()> {
        self.set_property("LegalCopyright", value, translation)
    }

    /// Sets the "OriginalFilename" property.
    pub fn set_original_filename(&mut self, value: &str, translation: Option<&str>) -> Result<()> {
        self.set_property("OriginalFilename", value, translation)
    }

    /// Sets the "ProductName" property.
    pub fn set_product_name(&mut self, value: &str, translation: Option<&str>) -> Result<()> {
        self.set_property("ProductName", value, translation)
    }

    /// Sets the "ProductVersion" property.
    pub fn set_product_version(&mut self, value: &str, translation: Option<&str>) -> Result<()> {
        self.set_property("ProductVersion", value, translation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_maps() -> (FileVersionInfo, LangStringValuesMap, TranslationValuesSet) {
        let mut info = FileVersionInfo::default();
        info.set_file_version(1, 2, 3, 4);
        info.set_product_version(5, 6, 7, 8);

        let mut strings = LangStringValuesMap::new();
        let mut editor_translations = TranslationValuesSet::new();
        {
            let mut editor = VersionInfoEditor::new(&mut strings, &mut editor_translations);
            editor.set_company_name("ACME", Some("040904b0")).unwrap();
            editor
                .set_property("FileVersion", "1.2.3.4", Some("040904b0"))
                .unwrap();
        }
        (info, strings, editor_translations)
    }

    #[test]
    fn version_info_round_trips() {
        let (info, strings, translations) = sample_maps();
        let block = build_version_info(&info, &strings, &translations);
        let (parsed_info, parsed_strings, parsed_translations) =
            parse_version_info(&block).unwrap();

        assert_eq!(parsed_info.file_version_string(), "1.2.3.4");
        assert_eq!(parsed_info.product_version_string(), "5.6.7.8");
        assert_eq!(parsed_strings, strings);
        assert_eq!(parsed_translations, translations);
    }

    #[test]
    fn file_and_product_versions_stay_separate() {
        // Both halves of each version must come from their own fields.
        let (info, strings, translations) = sample_maps();
        let block = build_version_info(&info, &strings, &translations);
        let (parsed, _, _) = parse_version_info(&block).unwrap();
        assert_eq!(parsed.fixed.file_version_ls, (3 << 16) | 4);
        assert_eq!(parsed.fixed.product_version_ls, (7 << 16) | 8);
        assert_ne!(parsed.fixed.file_version_ls, parsed.fixed.product_version_ls);
    }

    #[test]
    fn viewer_reads_properties() {
        let (_, strings, translations) = sample_maps();
        let viewer = VersionInfoViewer::new(&strings, &translations);
        assert_eq!(viewer.get_company_name(Some("040904b0")).unwrap(), "ACME");
        assert_eq!(viewer.get_company_name(None).unwrap(), "ACME");
        assert_eq!(
            viewer.get_product_name(Some("040904b0")),
            Err(Error::VersionInfoStringDoesNotExist)
        );
        assert_eq!(viewer.get_translation_list(), vec![(0x0409, 0x04b0)]);
    }

    #[test]
    fn translation_key_round_trips() {
        assert_eq!(translation_from_string("041904b0").unwrap(), (0x0419, 0x04b0));
        assert_eq!(translation_to_string(0x0419, 0x04b0), "041904b0");
        assert!(translation_from_string("nonsense").is_err());
    }

    #[test]
    fn corrupt_root_key_is_rejected() {
        let mut block = build_version_info(
            &FileVersionInfo::default(),
            &LangStringValuesMap::new(),
            &TranslationValuesSet::new(),
        );
        block[6] = b'X'; // first key character
        assert_eq!(
            parse_version_info(&block),
            Err(Error::ResourceIncorrectVersionInfo)
        );
    }
}
