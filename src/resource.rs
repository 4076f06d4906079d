use crate::arch::ImageArch;
use crate::optional::DIRECTORY_ENTRY_RESOURCE;
use crate::pe::{ImageDirectory, PortableExecutable, Rva, SectionDataType};
use crate::scribe::{align_up, is_sum_safe, put_pod, put_u16, string_to_utf16, utf16_to_string, Scribe};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use num_derive::FromPrimitive;
use std::collections::BTreeSet;

/// Well-known resource type ids (the first level of the resource tree).
#[derive(FromPrimitive, Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u32)]
pub enum ResourceType {
    /// Hardware-dependent cursor image.
    Cursor = 1,
    /// Bitmap, stored without its file header.
    Bitmap = 2,
    /// Hardware-dependent icon image.
    Icon = 3,
    /// Menu template.
    Menu = 4,
    /// Dialog template.
    Dialog = 5,
    /// Table of 16 strings.
    String = 6,
    /// Font directory.
    FontDir = 7,
    /// Font.
    Font = 8,
    /// Accelerator table.
    Accelerator = 9,
    /// Application-defined raw data.
    RcData = 10,
    /// Message table.
    MessageTable = 11,
    /// Cursor group directory.
    CursorGroup = 12,
    /// Icon group directory.
    IconGroup = 14,
    /// Version information.
    Version = 16,
    /// Dialog include file name.
    DlgInclude = 17,
    /// Plug and play resource.
    PlugPlay = 19,
    /// VXD resource.
    Vxd = 20,
    /// Animated cursor.
    AniCursor = 21,
    /// Animated icon.
    AniIcon = 22,
    /// HTML document.
    Html = 23,
    /// Side-by-side assembly manifest.
    Manifest = 24,
}

/// On-disk `IMAGE_RESOURCE_DIRECTORY` header.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ImageResourceDirectory {
    /// Reserved, must be zero.
    pub characteristics: u32,
    /// When the resource data was created.
    pub time_date_stamp: u32,
    /// Major version set by the user.
    pub major_version: u16,
    /// Minor version set by the user.
    pub minor_version: u16,
    /// Number of entries keyed by name.
    pub number_of_named_entries: u16,
    /// Number of entries keyed by id.
    pub number_of_id_entries: u16,
}

/// On-disk `IMAGE_RESOURCE_DIRECTORY_ENTRY`. Bit 31 of `name` selects a
/// string name; bit 31 of `offset_to_data` selects a subdirectory.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ImageResourceDirectoryEntry {
    /// Resource id, or offset of a length-prefixed UTF-16 name.
    pub name: u32,
    /// Offset of a child directory or of a data-entry record.
    pub offset_to_data: u32,
}

/// On-disk `IMAGE_RESOURCE_DATA_ENTRY`: a terminal leaf of the tree.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ImageResourceDataEntry {
    /// RVA of the resource bytes (an RVA, not a tree-relative offset).
    pub offset_to_data: u32,
    /// Size of the resource bytes.
    pub size: u32,
    /// Codepage used to decode the bytes.
    pub code_page: u32,
    /// Reserved, must be zero.
    pub reserved: u32,
}

const HIGH_BIT: u32 = 0x8000_0000;
const SIZE_OF_RESOURCE_DIRECTORY: u32 = core::mem::size_of::<ImageResourceDirectory>() as u32;
const SIZE_OF_RESOURCE_ENTRY: u32 = core::mem::size_of::<ImageResourceDirectoryEntry>() as u32;
const SIZE_OF_RESOURCE_DATA_ENTRY: u32 = core::mem::size_of::<ImageResourceDataEntry>() as u32;

/// A terminal resource: codepage-tagged raw bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceDataEntry {
    /// Codepage used to decode the bytes.
    pub codepage: u32,
    /// The resource bytes.
    pub data: Vec<u8>,
}

impl ResourceDataEntry {
    /// Creates a data entry from bytes and a codepage.
    pub fn new(data: Vec<u8>, codepage: u32) -> Self {
        ResourceDataEntry { codepage, data }
    }
}

/// Key of one directory entry: a UTF-16 name or a 32-bit id, never both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceKey {
    /// A UTF-16 name, stored as raw units.
    Name(Vec<u16>),
    /// A numeric id.
    Id(u32),
}

/// Payload of one directory entry: a subdirectory or a data leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourcePayload {
    /// A nested directory.
    Directory(ResourceDirectory),
    /// A terminal data entry.
    Data(ResourceDataEntry),
}

/// One entry of a resource directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceDirectoryEntry {
    /// The entry's key.
    pub key: ResourceKey,
    /// The entry's payload.
    pub payload: ResourcePayload,
}

impl ResourceDirectoryEntry {
    /// Creates an id-keyed entry holding a subdirectory.
    pub fn id_directory(id: u32, directory: ResourceDirectory) -> Self {
        ResourceDirectoryEntry {
            key: ResourceKey::Id(id),
            payload: ResourcePayload::Directory(directory),
        }
    }

    /// Creates a name-keyed entry holding a subdirectory.
    pub fn named_directory(name: &str, directory: ResourceDirectory) -> Self {
        ResourceDirectoryEntry {
            key: ResourceKey::Name(string_to_utf16(name)),
            payload: ResourcePayload::Directory(directory),
        }
    }

    /// Creates an id-keyed entry holding a data leaf.
    pub fn id_data(id: u32, data: ResourceDataEntry) -> Self {
        ResourceDirectoryEntry {
            key: ResourceKey::Id(id),
            payload: ResourcePayload::Data(data),
        }
    }

    /// Creates a name-keyed entry holding a data leaf.
    pub fn named_data(name: &str, data: ResourceDataEntry) -> Self {
        ResourceDirectoryEntry {
            key: ResourceKey::Name(string_to_utf16(name)),
            payload: ResourcePayload::Data(data),
        }
    }

    /// True if the entry is keyed by name.
    pub fn is_named(&self) -> bool {
        matches!(self.key, ResourceKey::Name(_))
    }

    /// The id, if the entry is id-keyed.
    pub fn get_id(&self) -> Option<u32> {
        match self.key {
            ResourceKey::Id(id) => Some(id),
            ResourceKey::Name(_) => None,
        }
    }

    /// The name decoded to a host string, if the entry is name-keyed.
    pub fn get_name(&self) -> Option<String> {
        match &self.key {
            ResourceKey::Name(units) => Some(utf16_to_string(units)),
            ResourceKey::Id(_) => None,
        }
    }

    /// True if the entry holds a data leaf rather than a subdirectory.
    pub fn includes_data(&self) -> bool {
        matches!(self.payload, ResourcePayload::Data(_))
    }

    /// The child directory, or an error if the entry holds data.
    pub fn get_resource_directory(&self) -> Result<&ResourceDirectory> {
        match &self.payload {
            ResourcePayload::Directory(directory) => Ok(directory),
            ResourcePayload::Data(_) => Err(Error::ResourceDirectoryEntryError),
        }
    }

    /// Mutable access to the child directory.
    pub fn get_resource_directory_mut(&mut self) -> Result<&mut ResourceDirectory> {
        match &mut self.payload {
            ResourcePayload::Directory(directory) => Ok(directory),
            ResourcePayload::Data(_) => Err(Error::ResourceDirectoryEntryError),
        }
    }

    /// The data leaf, or an error if the entry holds a subdirectory.
    pub fn get_data_entry(&self) -> Result<&ResourceDataEntry> {
        match &self.payload {
            ResourcePayload::Data(data) => Ok(data),
            ResourcePayload::Directory(_) => Err(Error::ResourceDirectoryEntryError),
        }
    }

    /// Mutable access to the data leaf.
    pub fn get_data_entry_mut(&mut self) -> Result<&mut ResourceDataEntry> {
        match &mut self.payload {
            ResourcePayload::Data(data) => Ok(data),
            ResourcePayload::Directory(_) => Err(Error::ResourceDirectoryEntryError),
        }
    }
}

/// One level of the resource tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceDirectory {
    /// Reserved characteristics field.
    pub characteristics: u32,
    /// When the resource data was created.
    pub timestamp: u32,
    /// Major version set by the user.
    pub major_version: u16,
    /// Minor version set by the user.
    pub minor_version: u16,
    /// The entries of this level.
    pub entries: Vec<ResourceDirectoryEntry>,
}

impl ResourceDirectory {
    /// Number of name-keyed entries.
    pub fn number_of_named_entries(&self) -> u16 {
        self.entries.iter().filter(|entry| entry.is_named()).count() as u16
    }

    /// Number of id-keyed entries.
    pub fn number_of_id_entries(&self) -> u16 {
        self.entries.iter().filter(|entry| !entry.is_named()).count() as u16
    }

    /// Appends an entry to this directory.
    pub fn add_entry(&mut self, entry: ResourceDirectoryEntry) {
        self.entries.push(entry);
    }

    /// Finds an entry by id.
    pub fn entry_by_id(&self, id: u32) -> Result<&ResourceDirectoryEntry> {
        self.entries
            .iter()
            .find(|entry| entry.get_id() == Some(id))
            .ok_or(Error::ResourceDirectoryEntryNotFound)
    }

    /// Finds an entry by id, mutably.
    pub fn entry_by_id_mut(&mut self, id: u32) -> Result<&mut ResourceDirectoryEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.get_id() == Some(id))
            .ok_or(Error::ResourceDirectoryEntryNotFound)
    }

    /// Finds an entry by name.
    pub fn entry_by_name(&self, name: &str) -> Result<&ResourceDirectoryEntry> {
        let units = string_to_utf16(name);
        self.entries
            .iter()
            .find(|entry| matches!(&entry.key, ResourceKey::Name(n) if *n == units))
            .ok_or(Error::ResourceDirectoryEntryNotFound)
    }

    /// Finds an entry by name, mutably.
    pub fn entry_by_name_mut(&mut self, name: &str) -> Result<&mut ResourceDirectoryEntry> {
        let units = string_to_utf16(name);
        self.entries
            .iter_mut()
            .find(|entry| matches!(&entry.key, ResourceKey::Name(n) if *n == units))
            .ok_or(Error::ResourceDirectoryEntryNotFound)
    }

    /// Finds an entry by key.
    pub fn entry_by_key(&self, key: &ResourceKey) -> Result<&ResourceDirectoryEntry> {
        self.entries
            .iter()
            .find(|entry| entry.key == *key)
            .ok_or(Error::ResourceDirectoryEntryNotFound)
    }

    /// Finds an entry by key, mutably.
    pub fn entry_by_key_mut(&mut self, key: &ResourceKey) -> Result<&mut ResourceDirectoryEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.key == *key)
            .ok_or(Error::ResourceDirectoryEntryNotFound)
    }

    /// Removes the entry with the given key. Returns true if one was removed.
    pub fn remove_entry(&mut self, key: &ResourceKey) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.key != *key);
        self.entries.len() != before
    }

    /// Sorts the entries into emission order: named entries first in UTF-16
    /// code-point order, then id entries in ascending numeric order.
    pub fn sort_entries(&mut self) {
        self.entries.sort_by(|a, b| match (&a.key, &b.key) {
            (ResourceKey::Name(left), ResourceKey::Name(right)) => left.cmp(right),
            (ResourceKey::Id(left), ResourceKey::Id(right)) => left.cmp(right),
            (ResourceKey::Name(_), ResourceKey::Id(_)) => core::cmp::Ordering::Less,
            (ResourceKey::Id(_), ResourceKey::Name(_)) => core::cmp::Ordering::Greater,
        });
    }
}

struct PendingDirectory {
    offset_to_directory: u32,
    parent: Option<(usize, usize)>, // node index, entry slot
}

impl<A: ImageArch> PortableExecutable<A> {
    /// Parses the whole resource tree. Returns an empty root when the image
    /// has no resource directory; fails `IncorrectResourceDirectory` on
    /// malformed data or directory cycles.
    pub fn get_resources(&self) -> Result<ResourceDirectory> {
        if !self.has_resources() {
            return Ok(ResourceDirectory::default());
        }

        let res_rva = self.directory_rva(DIRECTORY_ENTRY_RESOURCE);
        let mut visited: BTreeSet<u32> = BTreeSet::new();
        let mut nodes: Vec<ResourceDirectory> = Vec::new();
        let mut parents: Vec<Option<(usize, usize)>> = Vec::new();
        let mut work = vec![PendingDirectory {
            offset_to_directory: 0,
            parent: None,
        }];

        // The tree is walked with an explicit stack: nesting depth is
        // attacker-controlled and must not consume call stack.
        while let Some(pending) = work.pop() {
            if !visited.insert(pending.offset_to_directory) {
                return Err(Error::IncorrectResourceDirectory);
            }
            if !is_sum_safe(res_rva, pending.offset_to_directory) {
                return Err(Error::IncorrectResourceDirectory);
            }

            let dir_rva = res_rva + pending.offset_to_directory;
            let header: ImageResourceDirectory = self
                .section_window(Rva(dir_rva), SectionDataType::Virtual, true)
                .and_then(|window| window.read_pod(0))
                .map_err(|_| Error::IncorrectResourceDirectory)?;

            let entry_count =
                header.number_of_named_entries as u32 + header.number_of_id_entries as u32;
            if !is_sum_safe(
                pending.offset_to_directory,
                SIZE_OF_RESOURCE_DIRECTORY + entry_count * SIZE_OF_RESOURCE_ENTRY,
            ) || !is_sum_safe(
                res_rva,
                pending.offset_to_directory
                    + SIZE_OF_RESOURCE_DIRECTORY
                    + entry_count * SIZE_OF_RESOURCE_ENTRY,
            ) {
                return Err(Error::IncorrectResourceDirectory);
            }

            let node_index = nodes.len();
            nodes.push(ResourceDirectory {
                characteristics: header.characteristics,
                timestamp: header.time_date_stamp,
                major_version: header.major_version,
                minor_version: header.minor_version,
                entries: Vec::with_capacity(entry_count as usize),
            });
            parents.push(pending.parent);

            for entry_index in 0..entry_count {
                let entry_rva = dir_rva
                    + SIZE_OF_RESOURCE_DIRECTORY
                    + entry_index * SIZE_OF_RESOURCE_ENTRY;
                let raw_entry: ImageResourceDirectoryEntry = self
                    .section_window(Rva(entry_rva), SectionDataType::Virtual, true)
                    .and_then(|window| window.read_pod(0))
                    .map_err(|_| Error::IncorrectResourceDirectory)?;

                let key = if raw_entry.name & HIGH_BIT != 0 {
                    let name_offset = raw_entry.name & !HIGH_BIT;
                    if !is_sum_safe(res_rva + 2, name_offset) {
                        return Err(Error::IncorrectResourceDirectory);
                    }
                    let name_rva = res_rva + name_offset;
                    let name_length = self
                        .section_window(Rva(name_rva), SectionDataType::Virtual, true)
                        .and_then(|window| window.read_u16(0))
                        .map_err(|_| Error::IncorrectResourceDirectory)?;
                    let units = self
                        .section_window(Rva(name_rva + 2), SectionDataType::Virtual, true)
                        .and_then(|window| window.read_utf16(0, name_length as usize))
                        .map_err(|_| Error::IncorrectResourceDirectory)?;
                    ResourceKey::Name(units)
                } else {
                    ResourceKey::Id(raw_entry.name)
                };

                if raw_entry.offset_to_data & HIGH_BIT != 0 {
                    // Subdirectory: queue it and leave a placeholder so the
                    // on-disk entry order is preserved.
                    let slot = nodes[node_index].entries.len();
                    nodes[node_index].entries.push(ResourceDirectoryEntry {
                        key,
                        payload: ResourcePayload::Directory(ResourceDirectory::default()),
                    });
                    work.push(PendingDirectory {
                        offset_to_directory: raw_entry.offset_to_data & !HIGH_BIT,
                        parent: Some((node_index, slot)),
                    });
                } else {
                    if !is_sum_safe(res_rva, raw_entry.offset_to_data) {
                        return Err(Error::IncorrectResourceDirectory);
                    }
                    let data_entry: ImageResourceDataEntry = self
                        .section_window(
                            Rva(res_rva + raw_entry.offset_to_data),
                            SectionDataType::Virtual,
                            true,
                        )
                        .and_then(|window| window.read_pod(0))
                        .map_err(|_| Error::IncorrectResourceDirectory)?;
                    if self.length_remaining_from_rva(
                        Rva(data_entry.offset_to_data),
                        Rva(data_entry.offset_to_data),
                        SectionDataType::Virtual,
                        true,
                    )? < data_entry.size
                    {
                        return Err(Error::IncorrectResourceDirectory);
                    }
                    let data = self
                        .slice_at_rva(
                            Rva(data_entry.offset_to_data),
                            data_entry.size as usize,
                            SectionDataType::Virtual,
                            true,
                        )?
                        .into_owned();
                    nodes[node_index].entries.push(ResourceDirectoryEntry {
                        key,
                        payload: ResourcePayload::Data(ResourceDataEntry {
                            codepage: data_entry.code_page,
                            data,
                        }),
                    });
                }
            }
        }

        // Children were created after their parents, so attaching in reverse
        // creation order fills every placeholder exactly once.
        for index in (1..nodes.len()).rev() {
            let node = nodes.pop().unwrap_or_default();
            if let Some((parent_index, slot)) = parents[index] {
                nodes[parent_index].entries[slot].payload = ResourcePayload::Directory(node);
            }
        }

        Ok(nodes.pop().unwrap_or_default())
    }

    /// Rebuilds the resource tree inside the section at `section_index`.
    ///
    /// The layout follows the platform convention: all directory structures
    /// first, then the name strings, then the 4-byte-aligned data region.
    /// Every directory's entries are sorted (named first, each group
    /// ordered); data-entry addresses are written as RVAs. The tree is
    /// mutated by the sort.
    pub fn rebuild_resources(
        &mut self,
        info: &mut ResourceDirectory,
        section_index: usize,
        offset_from_section_start: u32,
        save_to_pe_header: bool,
        auto_strip_last_section: bool,
    ) -> Result<ImageDirectory> {
        if section_index >= self.sections().len() {
            return Err(Error::SectionIsNotAttached);
        }
        if info.entries.is_empty() {
            return Err(Error::IncorrectResourceDirectory);
        }

        let mut needed_size_for_structures = 0u32;
        let mut needed_size_for_strings = 0u32;
        let mut needed_size_for_data = 0u32;
        calculate_resource_data_space(
            info,
            &mut needed_size_for_structures,
            &mut needed_size_for_strings,
            &mut needed_size_for_data,
        );

        // One dword of slack covers the alignment of the directory start.
        let needed_size =
            4 + needed_size_for_structures + needed_size_for_strings + needed_size_for_data;
        let aligned_offset = align_up(offset_from_section_start, 4)?;

        self.reserve_space_in_section(section_index, aligned_offset + needed_size)?;

        let section_va = self.sections()[section_index].virtual_address();
        let mut cursors = ResourceCursors {
            structures: aligned_offset,
            strings: aligned_offset + needed_size_for_structures,
            data: aligned_offset + needed_size_for_structures + needed_size_for_strings,
        };

        let raw_data = self.sections_mut()[section_index].data_mut();
        write_resource_directory(raw_data, info, &mut cursors, aligned_offset, section_va)?;

        self.recalculate_section_sizes(section_index, auto_strip_last_section)?;

        let result = ImageDirectory {
            rva: self.rva_from_section_offset(section_index, aligned_offset)?,
            size: needed_size - 4,
        };

        if save_to_pe_header {
            self.set_directory_rva(DIRECTORY_ENTRY_RESOURCE, result.rva);
            self.set_directory_size(DIRECTORY_ENTRY_RESOURCE, result.size);
        }

        Ok(result)
    }
}

fn calculate_resource_data_space(
    root: &ResourceDirectory,
    structures: &mut u32,
    strings: &mut u32,
    data: &mut u32,
) {
    // Depth-first over an explicit stack; the tree shape is caller-supplied.
    let mut stack = vec![root];
    while let Some(directory) = stack.pop() {
        *structures += SIZE_OF_RESOURCE_DIRECTORY;
        for entry in &directory.entries {
            *structures += SIZE_OF_RESOURCE_ENTRY;
            if let ResourceKey::Name(units) = &entry.key {
                *strings += (units.len() as u32 + 1) * 2 + 2;
            }
            match &entry.payload {
                ResourcePayload::Data(leaf) => {
                    *data += leaf.data.len() as u32 + SIZE_OF_RESOURCE_DATA_ENTRY + 4;
                }
                ResourcePayload::Directory(child) => stack.push(child),
            }
        }
    }
}

struct ResourceCursors {
    structures: u32,
    strings: u32,
    data: u32,
}

fn write_resource_directory(
    raw_data: &mut [u8],
    root: &mut ResourceDirectory,
    cursors: &mut ResourceCursors,
    base_offset: u32,
    section_va: u32,
) -> Result<()> {
    root.sort_entries();

    let header = ImageResourceDirectory {
        characteristics: root.characteristics,
        time_date_stamp: root.timestamp,
        major_version: root.major_version,
        minor_version: root.minor_version,
        number_of_named_entries: root.number_of_named_entries(),
        number_of_id_entries: root.number_of_id_entries(),
    };
    put_pod(raw_data, cursors.structures as usize, &header)?;
    cursors.structures += SIZE_OF_RESOURCE_DIRECTORY;

    let mut entry_slot = cursors.structures;
    cursors.structures += SIZE_OF_RESOURCE_ENTRY * root.entries.len() as u32;

    for entry in &mut root.entries {
        let name_field = match &entry.key {
            ResourceKey::Name(units) => {
                let name_offset = HIGH_BIT | (cursors.strings - base_offset);
                put_u16(raw_data, cursors.strings as usize, units.len() as u16)?;
                cursors.strings += 2;
                for unit in units {
                    put_u16(raw_data, cursors.strings as usize, *unit)?;
                    cursors.strings += 2;
                }
                put_u16(raw_data, cursors.strings as usize, 0)?;
                cursors.strings += 2;
                name_offset
            }
            ResourceKey::Id(id) => *id,
        };

        match &mut entry.payload {
            ResourcePayload::Data(leaf) => {
                cursors.data = align_up(cursors.data, 4)?;
                let data_entry = ImageResourceDataEntry {
                    offset_to_data: section_va + cursors.data + SIZE_OF_RESOURCE_DATA_ENTRY,
                    size: leaf.data.len() as u32,
                    code_page: leaf.codepage,
                    reserved: 0,
                };
                let raw_entry = ImageResourceDirectoryEntry {
                    name: name_field,
                    offset_to_data: cursors.data - base_offset,
                };
                put_pod(raw_data, entry_slot as usize, &raw_entry)?;
                entry_slot += SIZE_OF_RESOURCE_ENTRY;

                put_pod(raw_data, cursors.data as usize, &data_entry)?;
                cursors.data += SIZE_OF_RESOURCE_DATA_ENTRY;
                crate::scribe::put_bytes(raw_data, cursors.data as usize, &leaf.data)?;
                cursors.data += leaf.data.len() as u32;
            }
            ResourcePayload::Directory(child) => {
                let raw_entry = ImageResourceDirectoryEntry {
                    name: name_field,
                    offset_to_data: HIGH_BIT | (cursors.structures - base_offset),
                };
                put_pod(raw_data, entry_slot as usize, &raw_entry)?;
                entry_slot += SIZE_OF_RESOURCE_ENTRY;

                write_resource_directory(raw_data, child, cursors, base_offset, section_va)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_puts_named_entries_first() {
        let mut directory = ResourceDirectory::default();
        directory.add_entry(ResourceDirectoryEntry::id_data(
            5,
            ResourceDataEntry::default(),
        ));
        directory.add_entry(ResourceDirectoryEntry::named_data(
            "BETA",
            ResourceDataEntry::default(),
        ));
        directory.add_entry(ResourceDirectoryEntry::id_data(
            2,
            ResourceDataEntry::default(),
        ));
        directory.add_entry(ResourceDirectoryEntry::named_data(
            "ALPHA",
            ResourceDataEntry::default(),
        ));
        directory.sort_entries();

        assert_eq!(directory.entries[0].get_name().as_deref(), Some("ALPHA"));
        assert_eq!(directory.entries[1].get_name().as_deref(), Some("BETA"));
        assert_eq!(directory.entries[2].get_id(), Some(2));
        assert_eq!(directory.entries[3].get_id(), Some(5));
        assert_eq!(directory.number_of_named_entries(), 2);
        assert_eq!(directory.number_of_id_entries(), 2);
    }

    #[test]
    fn remove_entry_reports_outcome() {
        let mut directory = ResourceDirectory::default();
        directory.add_entry(ResourceDirectoryEntry::id_data(
            7,
            ResourceDataEntry::default(),
        ));
        assert!(directory.remove_entry(&ResourceKey::Id(7)));
        assert!(!directory.remove_entry(&ResourceKey::Id(7)));
        assert!(directory.entries.is_empty());
    }
}
