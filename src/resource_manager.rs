use crate::resource::{
    ResourceDataEntry, ResourceDirectory, ResourceDirectoryEntry, ResourceKey, ResourcePayload,
    ResourceType,
};
use crate::resource_viewer::{
    read_cursor_group_entry, read_icon_group_entry, write_cursor_group_entry,
    write_icon_group_entry, CursorDirEntry, CursorGroupEntry, IcoHeader, IconDirEntry,
    IconGroupEntry, ResourceViewer, SIZE_OF_GROUP_ENTRY,
};
use crate::scribe::{string_to_utf16, Scribe};
use crate::version_info::{
    build_version_info, FileVersionInfo, LangStringValuesMap, TranslationValuesSet,
};
use crate::{Error, Result};

const SIZE_OF_ICO_HEADER: usize = core::mem::size_of::<IcoHeader>();
const SIZE_OF_ICONDIRENTRY: usize = core::mem::size_of::<IconDirEntry>();
const SIZE_OF_CURSORDIRENTRY: usize = core::mem::size_of::<CursorDirEntry>();
const SIZE_OF_BITMAPFILEHEADER: usize = 14;

/// How icon and cursor ids are assigned when images are added.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IconPlaceMode {
    /// Assign ids starting just past the largest existing id.
    AfterMaxId,
    /// Reuse the smallest unused ids first, continuing past the maximum once
    /// the gaps run out.
    FillGaps,
}

/// Editing operations over a resource tree. Wraps the same root directory a
/// [`ResourceViewer`] reads; rebuild the directory into a section afterwards
/// with [`rebuild_resources`](crate::pe::PortableExecutable::rebuild_resources).
pub struct ResourceManager<'a> {
    root: &'a mut ResourceDirectory,
}

impl<'a> ResourceManager<'a> {
    /// Creates a manager over a resource tree root.
    pub fn new(root: &'a mut ResourceDirectory) -> Self {
        ResourceManager { root }
    }

    /// A read-only viewer over the same tree.
    pub fn viewer(&self) -> ResourceViewer<'_> {
        ResourceViewer::new(self.root)
    }

    /// Adds (or replaces) the resource `type/key/language`, stamping the
    /// root directory timestamp.
    pub fn add_resource(
        &mut self,
        data: Vec<u8>,
        resource_type: u32,
        key: ResourceKey,
        language: u32,
        codepage: u32,
        timestamp: u32,
    ) -> Result<()> {
        self.root.timestamp = timestamp;

        if self.root.entry_by_id(resource_type).is_err() {
            self.root.add_entry(ResourceDirectoryEntry::id_directory(
                resource_type,
                ResourceDirectory::default(),
            ));
        }
        let type_directory = self
            .root
            .entry_by_id_mut(resource_type)?
            .get_resource_directory_mut()?;

        if type_directory.entry_by_key(&key).is_err() {
            type_directory.add_entry(ResourceDirectoryEntry {
                key: key.clone(),
                payload: ResourcePayload::Directory(ResourceDirectory::default()),
            });
        }
        let language_directory = type_directory
            .entry_by_key_mut(&key)?
            .get_resource_directory_mut()?;

        language_directory.remove_entry(&ResourceKey::Id(language));
        language_directory.add_entry(ResourceDirectoryEntry::id_data(
            language,
            ResourceDataEntry::new(data, codepage),
        ));
        Ok(())
    }

    /// Removes the resource `type/key/language`. Empty name and type levels
    /// are pruned. Returns true if a resource was removed.
    pub fn remove_resource_by_lang(
        &mut self,
        resource_type: u32,
        key: &ResourceKey,
        language: u32,
    ) -> bool {
        self.remove_resource_inner(resource_type, key, |languages| {
            languages.remove_entry(&ResourceKey::Id(language))
        })
    }

    /// Removes the resource at positional `index` under `type/key`. Supports
    /// images whose language ids are unknown to the caller.
    pub fn remove_resource_by_index(
        &mut self,
        resource_type: u32,
        key: &ResourceKey,
        index: usize,
    ) -> bool {
        self.remove_resource_inner(resource_type, key, |languages| {
            if index < languages.entries.len() {
                languages.entries.remove(index);
                true
            } else {
                false
            }
        })
    }

    fn remove_resource_inner(
        &mut self,
        resource_type: u32,
        key: &ResourceKey,
        remove: impl FnOnce(&mut ResourceDirectory) -> bool,
    ) -> bool {
        let Ok(type_entry) = self.root.entry_by_id_mut(resource_type) else {
            return false;
        };
        let Ok(type_directory) = type_entry.get_resource_directory_mut() else {
            return false;
        };
        let Ok(name_entry) = type_directory.entry_by_key_mut(key) else {
            return false;
        };
        let Ok(languages) = name_entry.get_resource_directory_mut() else {
            return false;
        };

        let removed = remove(&mut *languages);
        if removed {
            if languages.entries.is_empty() {
                type_directory.remove_entry(key);
            }
            if type_directory.entries.is_empty() {
                self.root.remove_entry(&ResourceKey::Id(resource_type));
            }
        }
        removed
    }

    /// Removes a whole resource-type subtree. Returns true if it existed.
    pub fn remove_resource_type(&mut self, resource_type: u32) -> bool {
        self.root.remove_entry(&ResourceKey::Id(resource_type))
    }

    // --- bitmaps ---

    /// Adds a bitmap from `.bmp` file bytes, stripping the 14-byte file
    /// header.
    pub fn add_bitmap(
        &mut self,
        bitmap_file: &[u8],
        key: ResourceKey,
        language: u32,
        codepage: u32,
        timestamp: u32,
    ) -> Result<()> {
        if bitmap_file.len() < SIZE_OF_BITMAPFILEHEADER {
            return Err(Error::ResourceIncorrectBitmap);
        }
        self.add_resource(
            bitmap_file[SIZE_OF_BITMAPFILEHEADER..].to_vec(),
            ResourceType::Bitmap as u32,
            key,
            language,
            codepage,
            timestamp,
        )
    }

    /// Removes a bitmap by key and language.
    pub fn remove_bitmap(&mut self, key: &ResourceKey, language: u32) -> bool {
        self.remove_resource_by_lang(ResourceType::Bitmap as u32, key, language)
    }

    // --- icon and cursor id assignment ---

    /// Picks `count` free ids for new icon or cursor resources of
    /// `resource_type`, following `mode`.
    pub fn get_icon_or_cursor_free_id_list(
        &self,
        resource_type: u32,
        mode: IconPlaceMode,
        count: u16,
    ) -> Vec<u16> {
        let mut free_ids = Vec::with_capacity(count as usize);
        let mut id_list = self
            .viewer()
            .list_resource_ids(resource_type)
            .unwrap_or_default();
        id_list.sort_unstable();

        if mode == IconPlaceMode::FillGaps {
            let mut expected = 1u32;
            for &id in &id_list {
                while expected < id && free_ids.len() < count as usize {
                    free_ids.push(expected as u16);
                    expected += 1;
                }
                expected = id + 1;
                if free_ids.len() == count as usize {
                    break;
                }
            }
        }

        let mut max_id = id_list.last().copied().unwrap_or(0);
        while free_ids.len() < count as usize {
            max_id += 1;
            free_ids.push(max_id as u16);
        }
        free_ids
    }

    // --- icons ---

    fn check_ico_file(file: &[u8], entry_size: usize, error: Error) -> Result<IcoHeader> {
        if file.len() < SIZE_OF_ICO_HEADER {
            return Err(error);
        }
        let header: IcoHeader = file.read_pod(0).map_err(|_| error)?;
        let headers_size = SIZE_OF_ICO_HEADER + header.count as usize * entry_size;
        if header.count == 0 || file.len() < headers_size {
            return Err(error);
        }
        Ok(header)
    }

    /// Adds every image of an `.ico` file as an `RT_ICON` resource and
    /// creates (or extends) the `RT_GROUP_ICON` directory under `key`.
    /// Returns the ids assigned to the images.
    pub fn add_icon(
        &mut self,
        icon_file: &[u8],
        key: ResourceKey,
        language: u32,
        mode: IconPlaceMode,
        codepage: u32,
        timestamp: u32,
    ) -> Result<Vec<u16>> {
        let header = Self::check_ico_file(icon_file, SIZE_OF_ICONDIRENTRY, Error::ResourceIncorrectIcon)?;

        let mut entries = Vec::with_capacity(header.count as usize);
        for i in 0..header.count as usize {
            let entry: IconDirEntry = icon_file
                .read_pod(SIZE_OF_ICO_HEADER + i * SIZE_OF_ICONDIRENTRY)
                .map_err(|_| Error::ResourceIncorrectIcon)?;
            let start = entry.image_offset as usize;
            let end = start
                .checked_add(entry.size_in_bytes as usize)
                .ok_or(Error::ResourceIncorrectIcon)?;
            if entry.size_in_bytes == 0 || end > icon_file.len() {
                return Err(Error::ResourceIncorrectIcon);
            }
            entries.push(entry);
        }

        // Start from the existing group when extending it.
        let mut group_data = match self.existing_group_data(ResourceType::IconGroup as u32, &key, language)
        {
            Some(data) => {
                Self::check_ico_file(&data, SIZE_OF_GROUP_ENTRY, Error::ResourceIncorrectIcon)?;
                data
            }
            None => {
                let mut data = Vec::new();
                data.extend_from_slice(bytemuck::bytes_of(&IcoHeader {
                    reserved: 0,
                    image_type: 1,
                    count: 0,
                }));
                data
            }
        };

        let ids = self.get_icon_or_cursor_free_id_list(
            ResourceType::Icon as u32,
            mode,
            header.count,
        );

        for (entry, &id) in entries.iter().zip(&ids) {
            let image = &icon_file
                [entry.image_offset as usize..(entry.image_offset + entry.size_in_bytes) as usize];
            self.add_resource(
                image.to_vec(),
                ResourceType::Icon as u32,
                ResourceKey::Id(id as u32),
                language,
                codepage,
                timestamp,
            )?;

            write_icon_group_entry(
                &mut group_data,
                &IconGroupEntry {
                    width: entry.width,
                    height: entry.height,
                    color_count: entry.color_count,
                    reserved: entry.reserved,
                    planes: entry.planes,
                    bit_count: entry.bit_count,
                    size_in_bytes: entry.size_in_bytes,
                    number: id,
                },
            );
        }

        let total = group_data.read_u16(4)? + header.count;
        group_data[4..6].copy_from_slice(&total.to_le_bytes());

        self.add_resource(
            group_data,
            ResourceType::IconGroup as u32,
            key,
            language,
            codepage,
            timestamp,
        )?;
        Ok(ids)
    }

    /// Removes an icon group and every `RT_ICON` it references.
    pub fn remove_icon_group(&mut self, key: &ResourceKey, language: u32) -> Result<()> {
        self.remove_group(
            ResourceType::IconGroup as u32,
            ResourceType::Icon as u32,
            key,
            language,
            Error::ResourceIncorrectIcon,
        )
    }

    // --- cursors ---

    /// Adds every image of a `.cur` file as an `RT_CURSOR` resource (each
    /// prefixed with its 4-byte hotspot) and creates (or extends) the
    /// `RT_GROUP_CURSOR` directory under `key`. Returns the assigned ids.
    pub fn add_cursor(
        &mut self,
        cursor_file: &[u8],
        key: ResourceKey,
        language: u32,
        mode: IconPlaceMode,
        codepage: u32,
        timestamp: u32,
    ) -> Result<Vec<u16>> {
        let header =
            Self::check_ico_file(cursor_file, SIZE_OF_CURSORDIRENTRY, Error::ResourceIncorrectCursor)?;

        let mut entries = Vec::with_capacity(header.count as usize);
        for i in 0..header.count as usize {
            let entry: CursorDirEntry = cursor_file
                .read_pod(SIZE_OF_ICO_HEADER + i * SIZE_OF_CURSORDIRENTRY)
                .map_err(|_| Error::ResourceIncorrectCursor)?;
            let start = entry.image_offset as usize;
            let end = start
                .checked_add(entry.size_in_bytes as usize)
                .ok_or(Error::ResourceIncorrectCursor)?;
            if entry.size_in_bytes == 0 || end > cursor_file.len() {
                return Err(Error::ResourceIncorrectCursor);
            }
            entries.push(entry);
        }

        let mut group_data = match self
            .existing_group_data(ResourceType::CursorGroup as u32, &key, language)
        {
            Some(data) => {
                Self::check_ico_file(&data, SIZE_OF_GROUP_ENTRY, Error::ResourceIncorrectCursor)?;
                data
            }
            None => {
                let mut data = Vec::new();
                data.extend_from_slice(bytemuck::bytes_of(&IcoHeader {
                    reserved: 0,
                    image_type: 2,
                    count: 0,
                }));
                data
            }
        };

        let ids = self.get_icon_or_cursor_free_id_list(
            ResourceType::Cursor as u32,
            mode,
            header.count,
        );

        for (entry, &id) in entries.iter().zip(&ids) {
            // Cursor resources carry the hotspot in their first two words.
            let mut image = Vec::with_capacity(entry.size_in_bytes as usize + 4);
            image.extend_from_slice(&entry.hotspot_x.to_le_bytes());
            image.extend_from_slice(&entry.hotspot_y.to_le_bytes());
            image.extend_from_slice(
                &cursor_file[entry.image_offset as usize
                    ..(entry.image_offset + entry.size_in_bytes) as usize],
            );
            self.add_resource(
                image,
                ResourceType::Cursor as u32,
                ResourceKey::Id(id as u32),
                language,
                codepage,
                timestamp,
            )?;

            write_cursor_group_entry(
                &mut group_data,
                &CursorGroupEntry {
                    width: entry.width as u16,
                    height: entry.height as u16 * 2,
                    planes: 1,
                    bit_count: Self::cursor_bit_count(entry, cursor_file),
                    size_in_bytes: entry.size_in_bytes + 4,
                    number: id,
                },
            );
        }

        let total = group_data.read_u16(4)? + header.count;
        group_data[4..6].copy_from_slice(&total.to_le_bytes());

        self.add_resource(
            group_data,
            ResourceType::CursorGroup as u32,
            key,
            language,
            codepage,
            timestamp,
        )?;
        Ok(ids)
    }

    // Bits per pixel from the image's own BITMAPINFOHEADER when available.
    fn cursor_bit_count(entry: &CursorDirEntry, cursor_file: &[u8]) -> u16 {
        cursor_file
            .read_u16(entry.image_offset as usize + 14)
            .unwrap_or(1)
    }

    /// Removes a cursor group and every `RT_CURSOR` it references.
    pub fn remove_cursor_group(&mut self, key: &ResourceKey, language: u32) -> Result<()> {
        self.remove_group(
            ResourceType::CursorGroup as u32,
            ResourceType::Cursor as u32,
            key,
            language,
            Error::ResourceIncorrectCursor,
        )
    }

    fn existing_group_data(
        &self,
        group_type: u32,
        key: &ResourceKey,
        language: u32,
    ) -> Option<Vec<u8>> {
        let viewer = self.viewer();
        let data = match key {
            ResourceKey::Id(id) => {
                viewer.get_resource_data_by_id_lang(language, group_type, *id)
            }
            ResourceKey::Name(units) => viewer.get_resource_data_by_name_lang(
                language,
                group_type,
                &crate::scribe::utf16_to_string(units),
            ),
        };
        data.ok().map(|entry| entry.data.clone())
    }

    fn remove_group(
        &mut self,
        group_type: u32,
        member_type: u32,
        key: &ResourceKey,
        language: u32,
        error: Error,
    ) -> Result<()> {
        let group_data = self
            .existing_group_data(group_type, key, language)
            .ok_or(Error::ResourceDirectoryEntryNotFound)?;
        let header = Self::check_ico_file(&group_data, SIZE_OF_GROUP_ENTRY, error)?;

        for i in 0..header.count as usize {
            let number = if member_type == ResourceType::Icon as u32 {
                read_icon_group_entry(&group_data, SIZE_OF_ICO_HEADER + i * SIZE_OF_GROUP_ENTRY)?
                    .number
            } else {
                read_cursor_group_entry(&group_data, SIZE_OF_ICO_HEADER + i * SIZE_OF_GROUP_ENTRY)?
                    .number
            };
            let member_key = ResourceKey::Id(number as u32);
            // Member images normally share the group's language; fall back to
            // removing the bare id when that lookup misses.
            if !self.remove_resource_by_lang(member_type, &member_key, language) {
                self.remove_resource_by_index(member_type, &member_key, 0);
            }
        }

        self.remove_resource_by_lang(group_type, key, language);
        Ok(())
    }

    // --- version info ---

    /// Serializes version information into the `VS_VERSION_INFO` resource
    /// (id 1) for the given language.
    pub fn set_version_info(
        &mut self,
        info: &FileVersionInfo,
        strings: &LangStringValuesMap,
        translations: &TranslationValuesSet,
        language: u32,
        codepage: u32,
        timestamp: u32,
    ) -> Result<()> {
        let block = build_version_info(info, strings, translations);
        self.add_resource(
            block,
            ResourceType::Version as u32,
            ResourceKey::Id(1),
            language,
            codepage,
            timestamp,
        )
    }

    /// Convenience constructor for a name key.
    pub fn name_key(name: &str) -> ResourceKey {
        ResourceKey::Name(string_to_utf16(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn icon_file(count: u16) -> Vec<u8> {
        let mut file = Vec::new();
        file.extend_from_slice(bytemuck::bytes_of(&IcoHeader {
            reserved: 0,
            image_type: 1,
            count,
        }));
        let headers = SIZE_OF_ICO_HEADER + count as usize * SIZE_OF_ICONDIRENTRY;
        for i in 0..count {
            let entry = IconDirEntry {
                width: 16,
                height: 16,
                color_count: 0,
                reserved: 0,
                planes: 1,
                bit_count: 32,
                size_in_bytes: 8,
                image_offset: (headers + i as usize * 8) as u32,
            };
            file.extend_from_slice(bytemuck::bytes_of(&entry));
        }
        for i in 0..count {
            file.extend_from_slice(&[i as u8; 8]);
        }
        file
    }

    #[test]
    fn add_icon_assigns_sequential_ids_after_max() {
        let mut root = ResourceDirectory::default();
        {
            let mut manager = ResourceManager::new(&mut root);
            // Pre-existing icon with id 5.
            manager
                .add_resource(
                    vec![0u8; 4],
                    ResourceType::Icon as u32,
                    ResourceKey::Id(5),
                    1033,
                    0,
                    0,
                )
                .unwrap();
            let ids = manager
                .add_icon(
                    &icon_file(2),
                    ResourceManager::name_key("MAIN_ICON"),
                    1033,
                    IconPlaceMode::AfterMaxId,
                    0,
                    0,
                )
                .unwrap();
            assert_eq!(ids, vec![6, 7]);
        }

        let viewer = ResourceViewer::new(&root);
        let types = viewer.list_resource_types();
        assert!(types.contains(&(ResourceType::Icon as u32)));
        assert!(types.contains(&(ResourceType::IconGroup as u32)));
        let ico = viewer.get_icon_by_name_lang(1033, "MAIN_ICON").unwrap();
        // header + 2 entries + 2 images of 8 bytes
        assert_eq!(
            ico.len(),
            SIZE_OF_ICO_HEADER + 2 * SIZE_OF_ICONDIRENTRY + 16
        );
    }

    #[test]
    fn fill_gaps_mode_reuses_holes() {
        let mut root = ResourceDirectory::default();
        let mut manager = ResourceManager::new(&mut root);
        for id in [1u32, 3, 4, 7] {
            manager
                .add_resource(
                    vec![0u8; 4],
                    ResourceType::Icon as u32,
                    ResourceKey::Id(id),
                    1033,
                    0,
                    0,
                )
                .unwrap();
        }
        let ids = manager.get_icon_or_cursor_free_id_list(
            ResourceType::Icon as u32,
            IconPlaceMode::FillGaps,
            5,
        );
        assert_eq!(ids, vec![2, 5, 6, 8, 9]);
    }

    #[test]
    fn remove_icon_group_removes_members() {
        let mut root = ResourceDirectory::default();
        let mut manager = ResourceManager::new(&mut root);
        manager
            .add_icon(
                &icon_file(2),
                ResourceKey::Id(100),
                1033,
                IconPlaceMode::AfterMaxId,
                0,
                0,
            )
            .unwrap();
        manager
            .remove_icon_group(&ResourceKey::Id(100), 1033)
            .unwrap();
        assert!(root.entries.is_empty());
    }

    #[test]
    fn removing_last_language_prunes_parents() {
        let mut root = ResourceDirectory::default();
        let mut manager = ResourceManager::new(&mut root);
        manager
            .add_resource(
                vec![1, 2, 3],
                ResourceType::RcData as u32,
                ResourceKey::Id(100),
                0,
                0,
                0,
            )
            .unwrap();
        assert!(manager.remove_resource_by_lang(
            ResourceType::RcData as u32,
            &ResourceKey::Id(100),
            0
        ));
        assert!(root.entries.is_empty());
    }
}
