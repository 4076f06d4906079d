use crate::arch::ImageArch;
use crate::optional::DIRECTORY_ENTRY_LOAD_CONFIG;
use crate::pe::{ImageDirectory, PortableExecutable, Rva, SectionDataType, Va};
use crate::scribe::{align_up, put_pod, put_u32, put_u64, Scribe};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};

/// On-disk `IMAGE_LOAD_CONFIG_DIRECTORY32` (classic layout, up to the SE
/// handler table).
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct LoadConfigDirectory32 {
    /// Size of this structure.
    pub size: u32,
    /// When the structure was created.
    pub time_date_stamp: u32,
    /// Major version number.
    pub major_version: u16,
    /// Minor version number.
    pub minor_version: u16,
    /// Global flags to clear at load time.
    pub global_flags_clear: u32,
    /// Global flags to set at load time.
    pub global_flags_set: u32,
    /// Default critical-section timeout.
    pub critical_section_default_timeout: u32,
    /// Free-block decommit threshold.
    pub de_commit_free_block_threshold: u32,
    /// Total decommit threshold.
    pub de_commit_total_free_threshold: u32,
    /// VA of the lock prefix table.
    pub lock_prefix_table: u32,
    /// Maximum allocation size.
    pub maximum_allocation_size: u32,
    /// Virtual memory threshold.
    pub virtual_memory_threshold: u32,
    /// Process heap flags.
    pub process_heap_flags: u32,
    /// Process affinity mask.
    pub process_affinity_mask: u32,
    /// Service pack version.
    pub csd_version: u16,
    /// Reserved.
    pub reserved1: u16,
    /// Reserved edit list VA.
    pub edit_list: u32,
    /// VA of the security cookie.
    pub security_cookie: u32,
    /// VA of the SE handler table.
    pub se_handler_table: u32,
    /// Number of SE handlers.
    pub se_handler_count: u32,
}

/// On-disk `IMAGE_LOAD_CONFIG_DIRECTORY64` (classic layout, up to the SE
/// handler table).
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct LoadConfigDirectory64 {
    /// Size of this structure.
    pub size: u32,
    /// When the structure was created.
    pub time_date_stamp: u32,
    /// Major version number.
    pub major_version: u16,
    /// Minor version number.
    pub minor_version: u16,
    /// Global flags to clear at load time.
    pub global_flags_clear: u32,
    /// Global flags to set at load time.
    pub global_flags_set: u32,
    /// Default critical-section timeout.
    pub critical_section_default_timeout: u32,
    /// Free-block decommit threshold.
    pub de_commit_free_block_threshold: u64,
    /// Total decommit threshold.
    pub de_commit_total_free_threshold: u64,
    /// VA of the lock prefix table.
    pub lock_prefix_table: u64,
    /// Maximum allocation size.
    pub maximum_allocation_size: u64,
    /// Virtual memory threshold.
    pub virtual_memory_threshold: u64,
    /// Process affinity mask.
    pub process_affinity_mask: u64,
    /// Process heap flags.
    pub process_heap_flags: u32,
    /// Service pack version.
    pub csd_version: u16,
    /// Reserved.
    pub reserved1: u16,
    /// Reserved edit list VA.
    pub edit_list: u64,
    /// VA of the security cookie.
    pub security_cookie: u64,
    /// VA of the SE handler table.
    pub se_handler_table: u64,
    /// Number of SE handlers.
    pub se_handler_count: u64,
}

/// Width-neutral view of a load-configuration directory structure.
pub trait LoadConfigRepr: Pod + Default {
    /// Reads every field into the width-neutral [`ImageConfigInfo`] shape.
    fn to_info(&self) -> ImageConfigInfo;
    /// Builds the on-disk structure back from width-neutral values.
    fn from_info(info: &ImageConfigInfo) -> Self;
}

macro_rules! load_config_repr {
    ($type:ty) => {
        impl LoadConfigRepr for $type {
            fn to_info(&self) -> ImageConfigInfo {
                ImageConfigInfo {
                    size: self.size,
                    timestamp: self.time_date_stamp,
                    major_version: self.major_version,
                    minor_version: self.minor_version,
                    global_flags_clear: self.global_flags_clear,
                    global_flags_set: self.global_flags_set,
                    critical_section_default_timeout: self.critical_section_default_timeout,
                    de_commit_free_block_threshold: self.de_commit_free_block_threshold as u64,
                    de_commit_total_free_threshold: self.de_commit_total_free_threshold as u64,
                    lock_prefix_table_va: self.lock_prefix_table as u64,
                    maximum_allocation_size: self.maximum_allocation_size as u64,
                    virtual_memory_threshold: self.virtual_memory_threshold as u64,
                    process_affinity_mask: self.process_affinity_mask as u64,
                    process_heap_flags: self.process_heap_flags,
                    csd_version: self.csd_version,
                    edit_list_va: self.edit_list as u64,
                    security_cookie_va: self.security_cookie as u64,
                    se_handler_table_va: self.se_handler_table as u64,
                    se_handler_count: self.se_handler_count as u64,
                    se_handler_rvas: Vec::new(),
                    lock_prefix_rvas: Vec::new(),
                }
            }

            fn from_info(info: &ImageConfigInfo) -> Self {
                let mut directory = <$type>::default();
                directory.size = info.size;
                directory.time_date_stamp = info.timestamp;
                directory.major_version = info.major_version;
                directory.minor_version = info.minor_version;
                directory.global_flags_clear = info.global_flags_clear;
                directory.global_flags_set = info.global_flags_set;
                directory.critical_section_default_timeout =
                    info.critical_section_default_timeout;
                directory.de_commit_free_block_threshold =
                    info.de_commit_free_block_threshold as _;
                directory.de_commit_total_free_threshold =
                    info.de_commit_total_free_threshold as _;
                directory.lock_prefix_table = info.lock_prefix_table_va as _;
                directory.maximum_allocation_size = info.maximum_allocation_size as _;
                directory.virtual_memory_threshold = info.virtual_memory_threshold as _;
                directory.process_affinity_mask = info.process_affinity_mask as _;
                directory.process_heap_flags = info.process_heap_flags;
                directory.csd_version = info.csd_version;
                directory.edit_list = info.edit_list_va as _;
                directory.security_cookie = info.security_cookie_va as _;
                directory.se_handler_table = info.se_handler_table_va as _;
                directory.se_handler_count = info.se_handler_count as _;
                directory
            }
        }
    };
}

load_config_repr!(LoadConfigDirectory32);
load_config_repr!(LoadConfigDirectory64);

/// Parsed load-configuration directory with the SE-handler and lock-prefix
/// tables resolved to RVA lists.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageConfigInfo {
    /// Size of the on-disk structure.
    pub size: u32,
    /// When the structure was created.
    pub timestamp: u32,
    /// Major version number.
    pub major_version: u16,
    /// Minor version number.
    pub minor_version: u16,
    /// Global flags to clear at load time.
    pub global_flags_clear: u32,
    /// Global flags to set at load time.
    pub global_flags_set: u32,
    /// Default critical-section timeout.
    pub critical_section_default_timeout: u32,
    /// Free-block decommit threshold.
    pub de_commit_free_block_threshold: u64,
    /// Total decommit threshold.
    pub de_commit_total_free_threshold: u64,
    /// VA of the lock prefix table.
    pub lock_prefix_table_va: u64,
    /// Maximum allocation size.
    pub maximum_allocation_size: u64,
    /// Virtual memory threshold.
    pub virtual_memory_threshold: u64,
    /// Process affinity mask.
    pub process_affinity_mask: u64,
    /// Process heap flags.
    pub process_heap_flags: u32,
    /// Service pack version.
    pub csd_version: u16,
    /// Reserved edit list VA.
    pub edit_list_va: u64,
    /// VA of the security cookie.
    pub security_cookie_va: u64,
    /// VA of the SE handler table.
    pub se_handler_table_va: u64,
    /// Number of SE handlers.
    pub se_handler_count: u64,
    /// Resolved SE handler RVAs.
    pub se_handler_rvas: Vec<Rva>,
    /// Resolved lock-prefix RVAs.
    pub lock_prefix_rvas: Vec<Rva>,
}

impl<A: ImageArch> PortableExecutable<A> {
    /// Parses the load-configuration directory, resolving the SE-handler
    /// table and the zero-terminated lock-prefix VA list. Fails if the image
    /// has none.
    pub fn get_image_config(&self) -> Result<ImageConfigInfo> {
        if !self.has_config() {
            return Err(Error::IncorrectConfigDirectory);
        }

        let dir_rva = self.directory_rva(DIRECTORY_ENTRY_LOAD_CONFIG);
        let directory: A::LoadConfigDirectory = self
            .section_window(Rva(dir_rva), SectionDataType::Virtual, true)?
            .read_pod(0)
            .map_err(|_| Error::IncorrectConfigDirectory)?;
        let mut info = directory.to_info();

        if info.se_handler_table_va != 0 {
            let table_rva = self
                .va_to_rva(Va(info.se_handler_table_va), true)
                .map_err(|_| Error::IncorrectConfigDirectory)?;
            let window = self
                .section_window(table_rva, SectionDataType::Virtual, true)
                .map_err(|_| Error::IncorrectConfigDirectory)?;
            for index in 0..info.se_handler_count {
                let rva = window
                    .read_u32(index as usize * 4)
                    .map_err(|_| Error::IncorrectConfigDirectory)?;
                info.se_handler_rvas.push(Rva(rva));
            }
        }

        if info.lock_prefix_table_va != 0 {
            let table_rva = self
                .va_to_rva(Va(info.lock_prefix_table_va), true)
                .map_err(|_| Error::IncorrectConfigDirectory)?;
            let window = self
                .section_window(table_rva, SectionDataType::Virtual, true)
                .map_err(|_| Error::IncorrectConfigDirectory)?;
            let mut index = 0usize;
            loop {
                let va = if A::IS_64 {
                    window.read_u64(index * 8)
                } else {
                    window.read_u32(index * 4).map(u64::from)
                }
                .map_err(|_| Error::IncorrectConfigDirectory)?;
                if va == 0 {
                    break;
                }
                info.lock_prefix_rvas.push(
                    self.va_to_rva(Va(va), true)
                        .map_err(|_| Error::IncorrectConfigDirectory)?,
                );
                index += 1;
            }
        }

        Ok(info)
    }

    /// Rebuilds the load-configuration directory inside the section at
    /// `section_index`. With `write_se_handlers` / `write_lock_prefixes` the
    /// resolved lists are appended right after the structure and the
    /// structure's table VAs are repointed at them.
    pub fn rebuild_image_config(
        &mut self,
        info: &ImageConfigInfo,
        section_index: usize,
        offset_from_section_start: u32,
        write_se_handlers: bool,
        write_lock_prefixes: bool,
        save_to_pe_header: bool,
        auto_strip_last_section: bool,
    ) -> Result<ImageDirectory> {
        if section_index >= self.sections().len() {
            return Err(Error::SectionIsNotAttached);
        }

        let directory_pos = align_up(offset_from_section_start, 4)?;
        let directory_size = core::mem::size_of::<A::LoadConfigDirectory>() as u32;

        let mut adjusted = info.clone();
        let mut current = directory_pos + directory_size;

        let se_handlers_pos = if write_se_handlers {
            let pos = current;
            current += adjusted.se_handler_rvas.len() as u32 * 4;
            adjusted.se_handler_count = adjusted.se_handler_rvas.len() as u64;
            let table_rva = self.rva_from_section_offset(section_index, pos)?;
            adjusted.se_handler_table_va = self.rva_to_va(table_rva).0;
            Some(pos)
        } else {
            None
        };

        let lock_prefixes_pos = if write_lock_prefixes {
            current = align_up(current, A::THUNK_SIZE)?;
            let pos = current;
            current += (adjusted.lock_prefix_rvas.len() as u32 + 1) * A::THUNK_SIZE;
            let table_rva = self.rva_from_section_offset(section_index, pos)?;
            adjusted.lock_prefix_table_va = self.rva_to_va(table_rva).0;
            Some(pos)
        } else {
            None
        };

        self.reserve_space_in_section(section_index, current)?;

        adjusted.size = directory_size;
        let directory = A::LoadConfigDirectory::from_info(&adjusted);
        let lock_prefix_vas: Vec<u64> = adjusted
            .lock_prefix_rvas
            .iter()
            .map(|&rva| self.rva_to_va(rva).0)
            .collect();

        let raw_data = self.sections_mut()[section_index].data_mut();
        put_pod(raw_data, directory_pos as usize, &directory)?;

        if let Some(pos) = se_handlers_pos {
            for (index, rva) in adjusted.se_handler_rvas.iter().enumerate() {
                put_u32(raw_data, pos as usize + index * 4, rva.0)?;
            }
        }

        if let Some(pos) = lock_prefixes_pos {
            for (index, va) in lock_prefix_vas.iter().chain([&0u64]).enumerate() {
                let offset = pos as usize + index * A::THUNK_SIZE as usize;
                if A::IS_64 {
                    put_u64(raw_data, offset, *va)?;
                } else {
                    put_u32(raw_data, offset, *va as u32)?;
                }
            }
        }

        self.recalculate_section_sizes(section_index, auto_strip_last_section)?;

        let result = ImageDirectory {
            rva: self.rva_from_section_offset(section_index, directory_pos)?,
            size: directory_size,
        };

        if save_to_pe_header {
            self.set_directory_rva(DIRECTORY_ENTRY_LOAD_CONFIG, result.rva);
            self.set_directory_size(DIRECTORY_ENTRY_LOAD_CONFIG, result.size);
        }

        Ok(result)
    }
}
