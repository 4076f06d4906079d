use crate::resource::{ResourceDataEntry, ResourceDirectory, ResourceType};
use crate::scribe::{utf16_to_string, Scribe};
use crate::version_info::{
    parse_version_info, FileVersionInfo, LangStringValuesMap, TranslationValuesSet,
};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use std::collections::BTreeMap;

/// Header of an `.ico`/`.cur` file and of icon/cursor group resources.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct IcoHeader {
    /// Reserved, must be zero.
    pub reserved: u16,
    /// 1 for icons, 2 for cursors.
    pub image_type: u16,
    /// Number of images in the group.
    pub count: u16,
}

/// One image record of an `.ico` file.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct IconDirEntry {
    /// Image width in pixels; 0 means 256.
    pub width: u8,
    /// Image height in pixels; 0 means 256.
    pub height: u8,
    /// Number of palette colors, zero for truecolor.
    pub color_count: u8,
    /// Reserved.
    pub reserved: u8,
    /// Color planes.
    pub planes: u16,
    /// Bits per pixel.
    pub bit_count: u16,
    /// Size of the image bytes.
    pub size_in_bytes: u32,
    /// Offset of the image bytes from the start of the file.
    pub image_offset: u32,
}

/// One image record of a `.cur` file: the plane/bit-count slots hold the
/// hotspot instead.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct CursorDirEntry {
    /// Image width in pixels.
    pub width: u8,
    /// Image height in pixels.
    pub height: u8,
    /// Number of palette colors, zero for truecolor.
    pub color_count: u8,
    /// Reserved.
    pub reserved: u8,
    /// Horizontal hotspot coordinate.
    pub hotspot_x: u16,
    /// Vertical hotspot coordinate.
    pub hotspot_y: u16,
    /// Size of the image bytes.
    pub size_in_bytes: u32,
    /// Offset of the image bytes from the start of the file.
    pub image_offset: u32,
}

/// In-resource icon group entry (14 bytes, packed).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IconGroupEntry {
    /// Image width in pixels.
    pub width: u8,
    /// Image height in pixels.
    pub height: u8,
    /// Number of palette colors.
    pub color_count: u8,
    /// Reserved.
    pub reserved: u8,
    /// Color planes.
    pub planes: u16,
    /// Bits per pixel.
    pub bit_count: u16,
    /// Size of the referenced icon resource.
    pub size_in_bytes: u32,
    /// Resource id of the referenced `RT_ICON` entry.
    pub number: u16,
}

/// In-resource cursor group entry (14 bytes, packed).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CursorGroupEntry {
    /// Cursor width in pixels.
    pub width: u16,
    /// Stored cursor height; twice the pixel height.
    pub height: u16,
    /// Color planes.
    pub planes: u16,
    /// Bits per pixel.
    pub bit_count: u16,
    /// Size of the referenced cursor resource, including its hotspot prefix.
    pub size_in_bytes: u32,
    /// Resource id of the referenced `RT_CURSOR` entry.
    pub number: u16,
}

/// One decoded message-table string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageTableItem {
    /// True if the on-disk text was UTF-16.
    pub unicode: bool,
    /// The message text.
    pub text: String,
}

/// Size of the packed in-resource group entries.
pub const SIZE_OF_GROUP_ENTRY: usize = 14;
const SIZE_OF_ICO_HEADER: usize = core::mem::size_of::<IcoHeader>();
const SIZE_OF_ICONDIRENTRY: usize = core::mem::size_of::<IconDirEntry>();
const SIZE_OF_CURSORDIRENTRY: usize = core::mem::size_of::<CursorDirEntry>();
const SIZE_OF_BITMAPFILEHEADER: usize = 14;
const SIZE_OF_BITMAPINFOHEADER: usize = 40;

pub(crate) fn read_icon_group_entry(data: &[u8], offset: usize) -> Result<IconGroupEntry> {
    Ok(IconGroupEntry {
        width: data.read_u8(offset)?,
        height: data.read_u8(offset + 1)?,
        color_count: data.read_u8(offset + 2)?,
        reserved: data.read_u8(offset + 3)?,
        planes: data.read_u16(offset + 4)?,
        bit_count: data.read_u16(offset + 6)?,
        size_in_bytes: data.read_u32(offset + 8)?,
        number: data.read_u16(offset + 12)?,
    })
}

pub(crate) fn write_icon_group_entry(out: &mut Vec<u8>, entry: &IconGroupEntry) {
    out.push(entry.width);
    out.push(entry.height);
    out.push(entry.color_count);
    out.push(entry.reserved);
    out.extend_from_slice(&entry.planes.to_le_bytes());
    out.extend_from_slice(&entry.bit_count.to_le_bytes());
    out.extend_from_slice(&entry.size_in_bytes.to_le_bytes());
    out.extend_from_slice(&entry.number.to_le_bytes());
}

pub(crate) fn read_cursor_group_entry(data: &[u8], offset: usize) -> Result<CursorGroupEntry> {
    Ok(CursorGroupEntry {
        width: data.read_u16(offset)?,
        height: data.read_u16(offset + 2)?,
        planes: data.read_u16(offset + 4)?,
        bit_count: data.read_u16(offset + 6)?,
        size_in_bytes: data.read_u32(offset + 8)?,
        number: data.read_u16(offset + 12)?,
    })
}

pub(crate) fn write_cursor_group_entry(out: &mut Vec<u8>, entry: &CursorGroupEntry) {
    out.extend_from_slice(&entry.width.to_le_bytes());
    out.extend_from_slice(&entry.height.to_le_bytes());
    out.extend_from_slice(&entry.planes.to_le_bytes());
    out.extend_from_slice(&entry.bit_count.to_le_bytes());
    out.extend_from_slice(&entry.size_in_bytes.to_le_bytes());
    out.extend_from_slice(&entry.number.to_le_bytes());
}

/// Read-only, format-aware view over a parsed resource tree.
///
/// The viewer borrows the root directory returned by
/// [`get_resources`](crate::pe::PortableExecutable::get_resources); lookups
/// address resources by type, then name or id, then language or positional
/// index.
pub struct ResourceViewer<'a> {
    root: &'a ResourceDirectory,
}

impl<'a> ResourceViewer<'a> {
    /// Creates a viewer over a resource tree root.
    pub fn new(root: &'a ResourceDirectory) -> Self {
        ResourceViewer { root }
    }

    /// The viewed root directory.
    pub fn root(&self) -> &ResourceDirectory {
        self.root
    }

    fn type_directory(&self, resource_type: u32) -> Result<&'a ResourceDirectory> {
        self.root.entry_by_id(resource_type)?.get_resource_directory()
    }

    /// Lists the id-keyed resource types present in the image.
    pub fn list_resource_types(&self) -> Vec<u32> {
        self.root
            .entries
            .iter()
            .filter_map(|entry| entry.get_id())
            .collect()
    }

    /// True if the given resource type exists.
    pub fn resource_exists(&self, resource_type: ResourceType) -> bool {
        self.root.entry_by_id(resource_type as u32).is_ok()
    }

    /// Lists the names of the name-keyed resources of one type.
    pub fn list_resource_names(&self, resource_type: u32) -> Result<Vec<String>> {
        Ok(self
            .type_directory(resource_type)?
            .entries
            .iter()
            .filter_map(|entry| entry.get_name())
            .collect())
    }

    /// Lists the ids of the id-keyed resources of one type.
    pub fn list_resource_ids(&self, resource_type: u32) -> Result<Vec<u32>> {
        Ok(self
            .type_directory(resource_type)?
            .entries
            .iter()
            .filter_map(|entry| entry.get_id())
            .collect())
    }

    /// Number of language entries under a resource selected by id.
    pub fn get_language_count_by_id(&self, resource_type: u32, id: u32) -> Result<usize> {
        Ok(self
            .type_directory(resource_type)?
            .entry_by_id(id)?
            .get_resource_directory()?
            .entries
            .len())
    }

    /// Number of language entries under a resource selected by name.
    pub fn get_language_count_by_name(&self, resource_type: u32, name: &str) -> Result<usize> {
        Ok(self
            .type_directory(resource_type)?
            .entry_by_name(name)?
            .get_resource_directory()?
            .entries
            .len())
    }

    /// Lists the languages of a resource selected by id.
    pub fn list_resource_languages(&self, resource_type: u32, id: u32) -> Result<Vec<u32>> {
        Ok(self
            .type_directory(resource_type)?
            .entry_by_id(id)?
            .get_resource_directory()?
            .entries
            .iter()
            .filter_map(|entry| entry.get_id())
            .collect())
    }

    /// Resource data selected by type, id, and positional index in the
    /// language directory.
    pub fn get_resource_data_by_id(
        &self,
        resource_type: u32,
        id: u32,
        index: usize,
    ) -> Result<&'a ResourceDataEntry> {
        let languages = self
            .type_directory(resource_type)?
            .entry_by_id(id)?
            .get_resource_directory()?;
        languages
            .entries
            .get(index)
            .ok_or(Error::ResourceDataEntryNotFound)?
            .get_data_entry()
    }

    /// Resource data selected by type, id, and language.
    pub fn get_resource_data_by_id_lang(
        &self,
        language: u32,
        resource_type: u32,
        id: u32,
    ) -> Result<&'a ResourceDataEntry> {
        self.type_directory(resource_type)?
            .entry_by_id(id)?
            .get_resource_directory()?
            .entry_by_id(language)
            .map_err(|_| Error::ResourceDataEntryNotFound)?
            .get_data_entry()
    }

    /// Resource data selected by type, name, and positional index.
    pub fn get_resource_data_by_name(
        &self,
        resource_type: u32,
        name: &str,
        index: usize,
    ) -> Result<&'a ResourceDataEntry> {
        let languages = self
            .type_directory(resource_type)?
            .entry_by_name(name)?
            .get_resource_directory()?;
        languages
            .entries
            .get(index)
            .ok_or(Error::ResourceDataEntryNotFound)?
            .get_data_entry()
    }

    /// Resource data selected by type, name, and language.
    pub fn get_resource_data_by_name_lang(
        &self,
        language: u32,
        resource_type: u32,
        name: &str,
    ) -> Result<&'a ResourceDataEntry> {
        self.type_directory(resource_type)?
            .entry_by_name(name)?
            .get_resource_directory()?
            .entry_by_id(language)
            .map_err(|_| Error::ResourceDataEntryNotFound)?
            .get_data_entry()
    }

    // --- bitmaps ---

    /// Reconstructs a `.bmp` file from a bitmap resource: the stored bytes
    /// begin at the `BITMAPINFOHEADER`, so a file header is prepended with
    /// the bit offset accounting for any color table.
    fn create_bitmap(resource_data: &[u8]) -> Result<Vec<u8>> {
        if resource_data.len() < SIZE_OF_BITMAPINFOHEADER {
            return Err(Error::ResourceIncorrectBitmap);
        }
        let bit_count = resource_data.read_u16(14)?;
        let clr_used = resource_data.read_u32(32)?;

        let mut off_bits = (SIZE_OF_BITMAPFILEHEADER + SIZE_OF_BITMAPINFOHEADER) as u32;
        if clr_used != 0 {
            off_bits += 4 * clr_used;
        } else if bit_count <= 8 {
            off_bits += 4 * (1u32 << bit_count);
        }

        let mut file = Vec::with_capacity(SIZE_OF_BITMAPFILEHEADER + resource_data.len());
        file.extend_from_slice(b"BM");
        file.extend_from_slice(
            &((SIZE_OF_BITMAPFILEHEADER + resource_data.len()) as u32).to_le_bytes(),
        );
        file.extend_from_slice(&0u16.to_le_bytes());
        file.extend_from_slice(&0u16.to_le_bytes());
        file.extend_from_slice(&off_bits.to_le_bytes());
        file.extend_from_slice(resource_data);
        Ok(file)
    }

    /// Bitmap file selected by id and positional index.
    pub fn get_bitmap_by_id(&self, id: u32, index: usize) -> Result<Vec<u8>> {
        Self::create_bitmap(&self.get_resource_data_by_id(ResourceType::Bitmap as u32, id, index)?.data)
    }

    /// Bitmap file selected by id and language.
    pub fn get_bitmap_by_id_lang(&self, language: u32, id: u32) -> Result<Vec<u8>> {
        Self::create_bitmap(
            &self
                .get_resource_data_by_id_lang(language, ResourceType::Bitmap as u32, id)?
                .data,
        )
    }

    /// Bitmap file selected by name and positional index.
    pub fn get_bitmap_by_name(&self, name: &str, index: usize) -> Result<Vec<u8>> {
        Self::create_bitmap(
            &self
                .get_resource_data_by_name(ResourceType::Bitmap as u32, name, index)?
                .data,
        )
    }

    /// Bitmap file selected by name and language.
    pub fn get_bitmap_by_name_lang(&self, language: u32, name: &str) -> Result<Vec<u8>> {
        Self::create_bitmap(
            &self
                .get_resource_data_by_name_lang(language, ResourceType::Bitmap as u32, name)?
                .data,
        )
    }

    // --- icons ---

    /// Emits the `.ico` header and directory entries for a group resource.
    /// Image offsets accumulate past the directory; returns the icon count.
    fn format_icon_headers(ico_data: &mut Vec<u8>, resource_data: &[u8]) -> Result<u16> {
        if resource_data.len() < SIZE_OF_ICO_HEADER {
            return Err(Error::ResourceIncorrectIcon);
        }
        let header: IcoHeader = resource_data.read_pod(0)?;
        if resource_data.len()
            < SIZE_OF_ICO_HEADER + header.count as usize * SIZE_OF_GROUP_ENTRY
        {
            return Err(Error::ResourceIncorrectIcon);
        }

        ico_data.extend_from_slice(bytemuck::bytes_of(&header));

        let mut offset =
            (SIZE_OF_ICO_HEADER + SIZE_OF_ICONDIRENTRY * header.count as usize) as u32;
        for i in 0..header.count as usize {
            let group =
                read_icon_group_entry(resource_data, SIZE_OF_ICO_HEADER + i * SIZE_OF_GROUP_ENTRY)?;
            let entry = IconDirEntry {
                width: group.width,
                height: group.height,
                color_count: group.color_count,
                reserved: group.reserved,
                planes: group.planes,
                bit_count: group.bit_count,
                size_in_bytes: group.size_in_bytes,
                image_offset: offset,
            };
            ico_data.extend_from_slice(bytemuck::bytes_of(&entry));
            offset += group.size_in_bytes;
        }

        Ok(header.count)
    }

    fn assemble_icon(
        &self,
        group_data: &[u8],
        lookup: impl Fn(u32) -> Result<&'a ResourceDataEntry>,
    ) -> Result<Vec<u8>> {
        let mut file = Vec::new();
        let count = Self::format_icon_headers(&mut file, group_data)?;
        for i in 0..count as usize {
            let group =
                read_icon_group_entry(group_data, SIZE_OF_ICO_HEADER + i * SIZE_OF_GROUP_ENTRY)?;
            file.extend_from_slice(&lookup(group.number as u32)?.data);
        }
        Ok(file)
    }

    /// `.ico` file selected by group id and language.
    pub fn get_icon_by_id_lang(&self, language: u32, id: u32) -> Result<Vec<u8>> {
        let group = self.get_resource_data_by_id_lang(language, ResourceType::IconGroup as u32, id)?;
        self.assemble_icon(&group.data, |number| {
            self.get_resource_data_by_id_lang(language, ResourceType::Icon as u32, number)
        })
    }

    /// `.ico` file selected by group id and positional index.
    pub fn get_icon_by_id(&self, id: u32, index: usize) -> Result<Vec<u8>> {
        let group = self.get_resource_data_by_id(ResourceType::IconGroup as u32, id, index)?;
        self.assemble_icon(&group.data, |number| {
            self.get_resource_data_by_id(ResourceType::Icon as u32, number, index)
        })
    }

    /// `.ico` file selected by group name and language.
    pub fn get_icon_by_name_lang(&self, language: u32, name: &str) -> Result<Vec<u8>> {
        let group =
            self.get_resource_data_by_name_lang(language, ResourceType::IconGroup as u32, name)?;
        self.assemble_icon(&group.data, |number| {
            self.get_resource_data_by_id_lang(language, ResourceType::Icon as u32, number)
        })
    }

    /// `.ico` file selected by group name and positional index.
    pub fn get_icon_by_name(&self, name: &str, index: usize) -> Result<Vec<u8>> {
        let group = self.get_resource_data_by_name(ResourceType::IconGroup as u32, name, index)?;
        self.assemble_icon(&group.data, |number| {
            self.get_resource_data_by_id(ResourceType::Icon as u32, number, index)
        })
    }

    // --- cursors ---

    fn assemble_cursor(
        &self,
        group_data: &[u8],
        lookup: impl Fn(u32) -> Result<&'a ResourceDataEntry>,
    ) -> Result<Vec<u8>> {
        if group_data.len() < SIZE_OF_ICO_HEADER {
            return Err(Error::ResourceIncorrectCursor);
        }
        let header: IcoHeader = group_data.read_pod(0)?;
        if group_data.len() < SIZE_OF_ICO_HEADER + header.count as usize * SIZE_OF_GROUP_ENTRY {
            return Err(Error::ResourceIncorrectCursor);
        }

        let mut file = Vec::new();
        file.extend_from_slice(bytemuck::bytes_of(&header));

        // The two hotspot words live at the head of each cursor resource;
        // the exported entries carry them in the directory instead.
        let mut offset =
            (SIZE_OF_ICO_HEADER + SIZE_OF_CURSORDIRENTRY * header.count as usize) as u32;
        let mut images = Vec::with_capacity(header.count as usize);
        for i in 0..header.count as usize {
            let group =
                read_cursor_group_entry(group_data, SIZE_OF_ICO_HEADER + i * SIZE_OF_GROUP_ENTRY)?;
            let cursor = lookup(group.number as u32)?;
            if cursor.data.len() < 4 {
                return Err(Error::ResourceIncorrectCursor);
            }
            let entry = CursorDirEntry {
                width: group.width as u8,
                height: (group.height / 2) as u8,
                color_count: 0,
                reserved: 0,
                hotspot_x: cursor.data.read_u16(0)?,
                hotspot_y: cursor.data.read_u16(2)?,
                size_in_bytes: group.size_in_bytes.saturating_sub(4),
                image_offset: offset,
            };
            file.extend_from_slice(bytemuck::bytes_of(&entry));
            offset += group.size_in_bytes;
            images.push(&cursor.data[4..]);
        }
        for image in images {
            file.extend_from_slice(image);
        }
        Ok(file)
    }

    /// `.cur` file selected by group id and language.
    pub fn get_cursor_by_id_lang(&self, language: u32, id: u32) -> Result<Vec<u8>> {
        let group =
            self.get_resource_data_by_id_lang(language, ResourceType::CursorGroup as u32, id)?;
        self.assemble_cursor(&group.data, |number| {
            self.get_resource_data_by_id_lang(language, ResourceType::Cursor as u32, number)
        })
    }

    /// `.cur` file selected by group id and positional index.
    pub fn get_cursor_by_id(&self, id: u32, index: usize) -> Result<Vec<u8>> {
        let group = self.get_resource_data_by_id(ResourceType::CursorGroup as u32, id, index)?;
        self.assemble_cursor(&group.data, |number| {
            self.get_resource_data_by_id(ResourceType::Cursor as u32, number, index)
        })
    }

    /// `.cur` file selected by group name and language.
    pub fn get_cursor_by_name_lang(&self, language: u32, name: &str) -> Result<Vec<u8>> {
        let group =
            self.get_resource_data_by_name_lang(language, ResourceType::CursorGroup as u32, name)?;
        self.assemble_cursor(&group.data, |number| {
            self.get_resource_data_by_id_lang(language, ResourceType::Cursor as u32, number)
        })
    }

    /// `.cur` file selected by group name and positional index.
    pub fn get_cursor_by_name(&self, name: &str, index: usize) -> Result<Vec<u8>> {
        let group = self.get_resource_data_by_name(ResourceType::CursorGroup as u32, name, index)?;
        self.assemble_cursor(&group.data, |number| {
            self.get_resource_data_by_id(ResourceType::Cursor as u32, number, index)
        })
    }

    // --- string tables ---

    /// Decodes a string-table resource: exactly 16 length-prefixed UTF-16
    /// strings. String `N` lives in table `(N >> 4) + 1` at position `N & 15`.
    pub(crate) fn parse_string_list(
        table_id: u32,
        resource_data: &[u8],
    ) -> Result<BTreeMap<u16, String>> {
        let mut strings = BTreeMap::new();
        let mut passed_bytes = 0usize;
        for position in 0..16u32 {
            let length = resource_data
                .read_u16(passed_bytes)
                .map_err(|_| Error::ResourceIncorrectStringTable)? as usize;
            passed_bytes += 2;
            let units = resource_data
                .read_utf16(passed_bytes, length)
                .map_err(|_| Error::ResourceIncorrectStringTable)?;
            if length != 0 {
                let string_id = ((table_id - 1) << 4) + position;
                strings.insert(string_id as u16, utf16_to_string(&units));
            }
            passed_bytes += length * 2;
        }
        Ok(strings)
    }

    /// String table selected by table id and positional index.
    pub fn get_string_table_by_id(&self, id: u32, index: usize) -> Result<BTreeMap<u16, String>> {
        Self::parse_string_list(
            id,
            &self
                .get_resource_data_by_id(ResourceType::String as u32, id, index)?
                .data,
        )
    }

    /// String table selected by table id and language.
    pub fn get_string_table_by_id_lang(
        &self,
        language: u32,
        id: u32,
    ) -> Result<BTreeMap<u16, String>> {
        Self::parse_string_list(
            id,
            &self
                .get_resource_data_by_id_lang(language, ResourceType::String as u32, id)?
                .data,
        )
    }

    /// One string selected by string id and positional index.
    pub fn get_string_by_id(&self, id: u16, index: usize) -> Result<String> {
        let strings = self.get_string_table_by_id((id as u32 >> 4) + 1, index)?;
        strings
            .get(&id)
            .cloned()
            .ok_or(Error::ResourceStringNotFound)
    }

    /// One string selected by string id and language.
    pub fn get_string_by_id_lang(&self, language: u32, id: u16) -> Result<String> {
        let strings = self.get_string_table_by_id_lang(language, (id as u32 >> 4) + 1)?;
        strings
            .get(&id)
            .cloned()
            .ok_or(Error::ResourceStringNotFound)
    }

    // --- message tables ---

    /// Decodes a message-table resource into id-to-text entries.
    pub(crate) fn parse_message_list(resource_data: &[u8]) -> Result<BTreeMap<u32, MessageTableItem>> {
        let mut messages = BTreeMap::new();
        let number_of_blocks = resource_data
            .read_u32(0)
            .map_err(|_| Error::ResourceIncorrectMessageTable)?;
        if number_of_blocks as usize * 12 + 4 > resource_data.len() {
            return Err(Error::ResourceIncorrectMessageTable);
        }

        for block_index in 0..number_of_blocks as usize {
            let block_offset = 4 + block_index * 12;
            let low_id = resource_data
                .read_u32(block_offset)
                .map_err(|_| Error::ResourceIncorrectMessageTable)?;
            let high_id = resource_data
                .read_u32(block_offset + 4)
                .map_err(|_| Error::ResourceIncorrectMessageTable)?;
            let offset_to_entries = resource_data
                .read_u32(block_offset + 8)
                .map_err(|_| Error::ResourceIncorrectMessageTable)?
                as usize;
            if low_id > high_id {
                return Err(Error::ResourceIncorrectMessageTable);
            }

            let mut current = 0usize;
            for id in low_id..=high_id {
                let entry_offset = offset_to_entries
                    .checked_add(current)
                    .ok_or(Error::ResourceIncorrectMessageTable)?;
                let length = resource_data
                    .read_u16(entry_offset)
                    .map_err(|_| Error::ResourceIncorrectMessageTable)?
                    as usize;
                let flags = resource_data
                    .read_u16(entry_offset + 2)
                    .map_err(|_| Error::ResourceIncorrectMessageTable)?;
                if length < 4 || entry_offset + length > resource_data.len() {
                    return Err(Error::ResourceIncorrectMessageTable);
                }
                let payload = &resource_data[entry_offset + 4..entry_offset + length];

                let unicode = flags & 1 != 0;
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
                messages.insert(id, MessageTableItem { unicode, text });
                current += length;
            }
        }

        Ok(messages)
    }

    /// Message table selected by id and positional index.
    pub fn get_message_table_by_id(
        &self,
        id: u32,
        index: usize,
    ) -> Result<BTreeMap<u32, MessageTableItem>> {
        Self::parse_message_list(
            &self
                .get_resource_data_by_id(ResourceType::MessageTable as u32, id, index)?
                .data,
        )
    }

    /// Message table selected by id and language.
    pub fn get_message_table_by_id_lang(
        &self,
        language: u32,
        id: u32,
    ) -> Result<BTreeMap<u32, MessageTableItem>> {
        Self::parse_message_list(
            &self
                .get_resource_data_by_id_lang(language, ResourceType::MessageTable as u32, id)?
                .data,
        )
    }

    // --- version info ---

    /// Full version information selected by positional index in the language
    /// directory of the `VS_VERSION_INFO` resource (id 1).
    pub fn get_version_info(
        &self,
        index: usize,
    ) -> Result<(FileVersionInfo, LangStringValuesMap, TranslationValuesSet)> {
        let data = self.get_resource_data_by_id(ResourceType::Version as u32, 1, index)?;
        parse_version_info(&data.data)
    }

    /// Full version information selected by language.
    pub fn get_version_info_by_lang(
        &self,
        language: u32,
    ) -> Result<(FileVersionInfo, LangStringValuesMap, TranslationValuesSet)> {
        let data = self.get_resource_data_by_id_lang(language, ResourceType::Version as u32, 1)?;
        parse_version_info(&data.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceDataEntry, ResourceDirectory, ResourceDirectoryEntry};

    fn tree_with(resource_type: u32, id: u32, language: u32, data: Vec<u8>) -> ResourceDirectory {
        let mut languages = ResourceDirectory::default();
        languages.add_entry(ResourceDirectoryEntry::id_data(
            language,
            ResourceDataEntry::new(data, 0),
        ));
        let mut ids = ResourceDirectory::default();
        ids.add_entry(ResourceDirectoryEntry::id_directory(id, languages));
        let mut root = ResourceDirectory::default();
        root.add_entry(ResourceDirectoryEntry::id_directory(resource_type, ids));
        root
    }

    #[test]
    fn string_table_id_arithmetic() {
        // Table 2 holds string ids 16..=31.
        let mut data = Vec::new();
        for position in 0..16u16 {
            if position == 3 {
                let text: Vec<u16> = "hi".encode_utf16().collect();
                data.extend_from_slice(&(text.len() as u16).to_le_bytes());
                for unit in text {
                    data.extend_from_slice(&unit.to_le_bytes());
                }
            } else {
                data.extend_from_slice(&0u16.to_le_bytes());
            }
        }
        let root = tree_with(ResourceType::String as u32, 2, 1033, data);
        let viewer = ResourceViewer::new(&root);
        assert_eq!(viewer.get_string_by_id_lang(1033, 19).unwrap(), "hi");
        assert_eq!(
            viewer.get_string_by_id_lang(1033, 20),
            Err(Error::ResourceStringNotFound)
        );
    }

    #[test]
    fn message_table_decodes_ansi_and_unicode() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes()); // one block
        data.extend_from_slice(&10u32.to_le_bytes()); // low id
        data.extend_from_slice(&11u32.to_le_bytes()); // high id
        data.extend_from_slice(&16u32.to_le_bytes()); // offset to entries
        // entry 10: ANSI "ok"
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(b"ok\0\0");
        // entry 11: UTF-16 "no"
        data.extend_from_slice(&10u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        for unit in "no".encode_utf16() {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        data.extend_from_slice(&[0, 0]);

        let root = tree_with(ResourceType::MessageTable as u32, 1, 1033, data);
        let viewer = ResourceViewer::new(&root);
        let messages = viewer.get_message_table_by_id_lang(1033, 1).unwrap();
        assert_eq!(messages[&10].text, "ok");
        assert!(!messages[&10].unicode);
        assert_eq!(messages[&11].text, "no");
        assert!(messages[&11].unicode);
    }

    #[test]
    fn bitmap_gains_a_file_header() {
        let mut info_header = vec![0u8; 40];
        info_header[0] = 40; // biSize
        info_header[14] = 24; // biBitCount, truecolor
        let root = tree_with(ResourceType::Bitmap as u32, 5, 1033, info_header);
        let viewer = ResourceViewer::new(&root);
        let bitmap = viewer.get_bitmap_by_id_lang(1033, 5).unwrap();
        assert_eq!(&bitmap[..2], b"BM");
        assert_eq!(bitmap.len(), 14 + 40);
        // Offset to bits: no color table for 24bpp.
        assert_eq!(u32::from_le_bytes(bitmap[10..14].try_into().unwrap()), 54);
    }
}
