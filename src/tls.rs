use crate::arch::ImageArch;
use crate::optional::DIRECTORY_ENTRY_TLS;
use crate::pe::{
    ImageDirectory, PortableExecutable, Rva, SectionDataType, SectionExpandType, Va,
};
use crate::scribe::{align_up, put_pod, Scribe};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};

/// On-disk `IMAGE_TLS_DIRECTORY32`.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct TlsDirectory32 {
    /// VA of the start of the TLS template data.
    pub start_address_of_raw_data: u32,
    /// VA one past the end of the TLS template data.
    pub end_address_of_raw_data: u32,
    /// VA of the slot receiving the TLS index.
    pub address_of_index: u32,
    /// VA of the zero-terminated array of callback VAs.
    pub address_of_callbacks: u32,
    /// Bytes to zero-fill past the template.
    pub size_of_zero_fill: u32,
    /// Reserved alignment flags.
    pub characteristics: u32,
}

/// On-disk `IMAGE_TLS_DIRECTORY64`.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct TlsDirectory64 {
    /// VA of the start of the TLS template data.
    pub start_address_of_raw_data: u64,
    /// VA one past the end of the TLS template data.
    pub end_address_of_raw_data: u64,
    /// VA of the slot receiving the TLS index.
    pub address_of_index: u64,
    /// VA of the zero-terminated array of callback VAs.
    pub address_of_callbacks: u64,
    /// Bytes to zero-fill past the template.
    pub size_of_zero_fill: u32,
    /// Reserved alignment flags.
    pub characteristics: u32,
}

/// Width-neutral view of a TLS directory structure.
pub trait TlsDirectoryRepr: Pod + Default {
    /// VA of the start of the template.
    fn start_address_of_raw_data(&self) -> u64;
    /// VA one past the end of the template.
    fn end_address_of_raw_data(&self) -> u64;
    /// VA of the index slot.
    fn address_of_index(&self) -> u64;
    /// VA of the callbacks array.
    fn address_of_callbacks(&self) -> u64;
    /// Zero-fill size.
    fn size_of_zero_fill(&self) -> u32;
    /// Characteristics field.
    fn characteristics(&self) -> u32;
    /// Builds the on-disk structure from width-neutral values.
    fn assemble(
        start: u64,
        end: u64,
        index: u64,
        callbacks: u64,
        size_of_zero_fill: u32,
        characteristics: u32,
    ) -> Self;
}

impl TlsDirectoryRepr for TlsDirectory32 {
    fn start_address_of_raw_data(&self) -> u64 {
        self.start_address_of_raw_data.into()
    }
    fn end_address_of_raw_data(&self) -> u64 {
        self.end_address_of_raw_data.into()
    }
    fn address_of_index(&self) -> u64 {
        self.address_of_index.into()
    }
    fn address_of_callbacks(&self) -> u64 {
        self.address_of_callbacks.into()
    }
    fn size_of_zero_fill(&self) -> u32 {
        self.size_of_zero_fill
    }
    fn characteristics(&self) -> u32 {
        self.characteristics
    }
    fn assemble(
        start: u64,
        end: u64,
        index: u64,
        callbacks: u64,
        size_of_zero_fill: u32,
        characteristics: u32,
    ) -> Self {
        TlsDirectory32 {
            start_address_of_raw_data: start as u32,
            end_address_of_raw_data: end as u32,
            address_of_index: index as u32,
            address_of_callbacks: callbacks as u32,
            size_of_zero_fill,
            characteristics,
        }
    }
}

impl TlsDirectoryRepr for TlsDirectory64 {
    fn start_address_of_raw_data(&self) -> u64 {
        self.start_address_of_raw_data
    }
    fn end_address_of_raw_data(&self) -> u64 {
        self.end_address_of_raw_data
    }
    fn address_of_index(&self) -> u64 {
        self.address_of_index
    }
    fn address_of_callbacks(&self) -> u64 {
        self.address_of_callbacks
    }
    fn size_of_zero_fill(&self) -> u32 {
        self.size_of_zero_fill
    }
    fn characteristics(&self) -> u32 {
        self.characteristics
    }
    fn assemble(
        start: u64,
        end: u64,
        index: u64,
        callbacks: u64,
        size_of_zero_fill: u32,
        characteristics: u32,
    ) -> Self {
        TlsDirectory64 {
            start_address_of_raw_data: start,
            end_address_of_raw_data: end,
            address_of_index: index,
            address_of_callbacks: callbacks,
            size_of_zero_fill,
            characteristics,
        }
    }
}

/// Parsed TLS directory: addresses are held as RVAs, the template as bytes,
/// and the callbacks as an ordered RVA list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsInfo {
    /// RVA of the template start, zero if absent.
    pub start_rva: Rva,
    /// RVA one past the template end.
    pub end_rva: Rva,
    /// RVA of the index slot.
    pub index_rva: Rva,
    /// RVA of the callbacks array, zero if absent.
    pub callbacks_rva: Rva,
    /// Bytes to zero-fill past the template.
    pub size_of_zero_fill: u32,
    /// Characteristics field.
    pub characteristics: u32,
    /// The template bytes, `end_rva - start_rva` long.
    pub raw_data: Vec<u8>,
    /// Callback routines as RVAs, in call order.
    pub callbacks: Vec<Rva>,
}

impl<A: ImageArch> PortableExecutable<A> {
    /// Parses the TLS directory. Fails if the image has none.
    pub fn get_tls_info(&self) -> Result<TlsInfo> {
        if !self.has_tls() {
            return Err(Error::IncorrectTlsDirectory);
        }

        let dir_rva = self.directory_rva(DIRECTORY_ENTRY_TLS);
        let directory: A::TlsDirectory = self
            .section_window(Rva(dir_rva), SectionDataType::Virtual, true)?
            .read_pod(0)
            .map_err(|_| Error::IncorrectTlsDirectory)?;

        let mut info = TlsInfo {
            size_of_zero_fill: directory.size_of_zero_fill(),
            characteristics: directory.characteristics(),
            ..Default::default()
        };

        if directory.start_address_of_raw_data() != 0 {
            info.start_rva = self
                .va_to_rva(Va(directory.start_address_of_raw_data()), true)
                .map_err(|_| Error::IncorrectTlsDirectory)?;
        }
        if directory.end_address_of_raw_data() != 0 {
            info.end_rva = self
                .va_to_rva(Va(directory.end_address_of_raw_data()), true)
                .map_err(|_| Error::IncorrectTlsDirectory)?;
        }
        if directory.address_of_index() != 0 {
            info.index_rva = self
                .va_to_rva(Va(directory.address_of_index()), true)
                .map_err(|_| Error::IncorrectTlsDirectory)?;
        }

        if directory.address_of_callbacks() != 0 {
            info.callbacks_rva = self
                .va_to_rva(Va(directory.address_of_callbacks()), true)
                .map_err(|_| Error::IncorrectTlsDirectory)?;
            let mut index = 0u32;
            loop {
                let slot = Rva(info.callbacks_rva.0 + index * A::THUNK_SIZE);
                let window = self
                    .section_window(slot, SectionDataType::Virtual, true)
                    .map_err(|_| Error::IncorrectTlsDirectory)?;
                let va = if A::IS_64 {
                    window.read_u64(0)
                } else {
                    window.read_u32(0).map(u64::from)
                }
                .map_err(|_| Error::IncorrectTlsDirectory)?;
                if va == 0 {
                    break;
                }
                info.callbacks.push(
                    self.va_to_rva(Va(va), true)
                        .map_err(|_| Error::IncorrectTlsDirectory)?,
                );
                index += 1;
            }
        }

        if info.end_rva.0 > info.start_rva.0 && info.start_rva.0 != 0 {
            let template_len = (info.end_rva.0 - info.start_rva.0) as usize;
            info.raw_data = self
                .slice_at_rva(info.start_rva, template_len, SectionDataType::Virtual, true)
                .map_err(|_| Error::IncorrectTlsDirectory)?
                .into_owned();
        }

        Ok(info)
    }

    /// Rebuilds the TLS directory structure inside the section at
    /// `section_index`, and optionally rewrites the template bytes and the
    /// callback array at the RVAs `info` names.
    ///
    /// Only `end_rva - start_rva` template bytes are written, regardless of
    /// the buffer length. `expand` picks which dimension of the containing
    /// section grows when the template or callback array does not fit; growth
    /// is skipped when that section cannot legally grow.
    #[allow(clippy::too_many_arguments)]
    pub fn rebuild_tls(
        &mut self,
        info: &TlsInfo,
        section_index: usize,
        offset_from_section_start: u32,
        write_tls_callbacks: bool,
        write_tls_data: bool,
        expand: SectionExpandType,
        save_to_pe_header: bool,
        auto_strip_last_section: bool,
    ) -> Result<ImageDirectory> {
        if section_index >= self.sections().len() {
            return Err(Error::SectionIsNotAttached);
        }

        let directory_pos = align_up(offset_from_section_start, 4)?;
        let directory_size = core::mem::size_of::<A::TlsDirectory>() as u32;
        self.reserve_space_in_section(section_index, directory_pos + directory_size)?;

        let to_va = |rva: Rva, image: &Self| -> u64 {
            if rva.0 == 0 {
                0
            } else {
                image.rva_to_va(rva).0
            }
        };
        let directory = A::TlsDirectory::assemble(
            to_va(info.start_rva, self),
            to_va(info.end_rva, self),
            to_va(info.index_rva, self),
            to_va(info.callbacks_rva, self),
            info.size_of_zero_fill,
            info.characteristics,
        );

        {
            let raw_data = self.sections_mut()[section_index].data_mut();
            put_pod(raw_data, directory_pos as usize, &directory)?;
        }

        if write_tls_data && info.start_rva.0 != 0 && info.end_rva.0 > info.start_rva.0 {
            let template_len =
                ((info.end_rva.0 - info.start_rva.0) as usize).min(info.raw_data.len());
            if template_len > 0 {
                self.grow_for_write(info.start_rva, template_len as u32, expand)?;
                // A virtual-only expansion leaves no raw room; write what fits.
                let available = self.length_remaining_from_rva(
                    info.start_rva,
                    info.start_rva,
                    SectionDataType::Raw,
                    false,
                )? as usize;
                let write_len = template_len.min(available);
                if write_len > 0 {
                    let slot = self.section_data_mut(info.start_rva, write_len)?;
                    slot.copy_from_slice(&info.raw_data[..write_len]);
                }
            }
        }

        if write_tls_callbacks && info.callbacks_rva.0 != 0 {
            let array_len = (info.callbacks.len() as u32 + 1) * A::THUNK_SIZE;
            self.grow_for_write(info.callbacks_rva, array_len, expand)?;
            let callback_vas: Vec<u64> = info
                .callbacks
                .iter()
                .map(|&rva| self.rva_to_va(rva).0)
                .collect();
            let slot = self.section_data_mut(info.callbacks_rva, array_len as usize)?;
            for (index, va) in callback_vas.iter().chain([&0u64]).enumerate() {
                let offset = index * A::THUNK_SIZE as usize;
                if A::IS_64 {
                    crate::scribe::put_u64(slot, offset, *va)?;
                } else {
                    crate::scribe::put_u32(slot, offset, *va as u32)?;
                }
            }
        }

        self.recalculate_section_sizes(section_index, auto_strip_last_section)?;

        let result = ImageDirectory {
            rva: self.rva_from_section_offset(section_index, directory_pos)?,
            size: directory_size,
        };

        if save_to_pe_header {
            self.set_directory_rva(DIRECTORY_ENTRY_TLS, result.rva);
            self.set_directory_size(DIRECTORY_ENTRY_TLS, result.size);
        }

        Ok(result)
    }

    /// Grows the section containing `rva` so `size` raw bytes fit there,
    /// when that section is allowed to grow.
    fn grow_for_write(&mut self, rva: Rva, size: u32, expand: SectionExpandType) -> Result<()> {
        let index = self.section_index_from_rva(rva)?;
        match self.expand_section(index, rva, size, expand) {
            Ok(_) => Ok(()),
            // Only the last section may grow; existing space must do.
            Err(Error::ErrorChangingSectionVirtualSize) => Ok(()),
            Err(error) => Err(error),
        }
    }
}
