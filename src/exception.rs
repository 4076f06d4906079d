use crate::arch::Pe64;
use crate::optional::DIRECTORY_ENTRY_EXCEPTION;
use crate::pe::{PortableExecutable, Rva, SectionDataType};
use crate::scribe::Scribe;
use crate::{Error, Result};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

/// On-disk `IMAGE_RUNTIME_FUNCTION_ENTRY` in the exception directory.
#[derive(Copy, Clone, Pod, Zeroable, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RuntimeFunctionEntry {
    /// RVA of the function start.
    pub begin_address: u32,
    /// RVA one past the function end.
    pub end_address: u32,
    /// RVA of the function's `UNWIND_INFO`.
    pub unwind_info_address: u32,
}

/// Packed `UNWIND_INFO` header: 3-bit version and 5-bit flags in the first
/// byte, 4-bit frame register and offset in the last.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct UnwindInfoHeader {
    /// Version (low 3 bits) and flags (high 5 bits).
    pub version_and_flags: u8,
    /// Size of the function prolog in bytes.
    pub size_of_prolog: u8,
    /// Number of unwind-code slots.
    pub count_of_codes: u8,
    /// Frame register (low nibble) and scaled frame offset (high nibble).
    pub frame_register_and_offset: u8,
}

bitflags! {
    /// Flags of an `UNWIND_INFO` header.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct UnwindFlags: u8 {
        /// The function has an exception handler.
        const UNW_FLAG_EHANDLER = 0x01;
        /// The function has a termination handler.
        const UNW_FLAG_UHANDLER = 0x02;
        /// This unwind info is chained to a previous entry.
        const UNW_FLAG_CHAININFO = 0x04;
    }
}

/// One parsed exception-directory entry with its decoded unwind header.
/// Unwind opcodes are not listed; their format is subject to change.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// RVA of the function start.
    pub begin_address: Rva,
    /// RVA one past the function end.
    pub end_address: Rva,
    /// RVA of the unwind information.
    pub unwind_info_address: Rva,
    /// Unwind info format version (3 bits).
    pub unwind_info_version: u8,
    /// Unwind flags (5 bits).
    pub flags: u8,
    /// Size of the function prolog.
    pub size_of_prolog: u8,
    /// Number of unwind-code slots.
    pub count_of_codes: u8,
    /// Nonvolatile register used as the frame pointer, zero if none.
    pub frame_register: u8,
    /// Scaled offset from RSP applied to the frame register.
    pub frame_offset: u8,
}

impl ExceptionEntry {
    /// True if the function has an exception handler.
    pub fn has_exception_handler(&self) -> bool {
        self.flags & UnwindFlags::UNW_FLAG_EHANDLER.bits() != 0
    }

    /// True if the function has a termination handler.
    pub fn has_termination_handler(&self) -> bool {
        self.flags & UnwindFlags::UNW_FLAG_UHANDLER.bits() != 0
    }

    /// True if this unwind info chains to another entry.
    pub fn is_chaininfo(&self) -> bool {
        self.flags & UnwindFlags::UNW_FLAG_CHAININFO.bits() != 0
    }

    /// True if the function uses a frame pointer.
    pub fn uses_frame_pointer(&self) -> bool {
        self.frame_register != 0
    }
}

const SIZE_OF_RUNTIME_FUNCTION: u32 = core::mem::size_of::<RuntimeFunctionEntry>() as u32;

// The exception directory carries unwind data only in PE32+ images.
impl PortableExecutable<Pe64> {
    /// Lists the exception-directory entries with their unwind headers.
    pub fn get_exception_directory(&self) -> Result<Vec<ExceptionEntry>> {
        let mut entries = Vec::new();
        if !self.has_exception_directory() {
            return Ok(entries);
        }

        let dir_rva = self.directory_rva(DIRECTORY_ENTRY_EXCEPTION);
        if dir_rva % 4 != 0 {
            return Err(Error::IncorrectExceptionDirectory);
        }
        if self.length_remaining_from_rva(
            Rva(dir_rva),
            Rva(dir_rva),
            SectionDataType::Virtual,
            true,
        )? < SIZE_OF_RUNTIME_FUNCTION
        {
            return Err(Error::IncorrectExceptionDirectory);
        }

        let mut current_pos = dir_rva;
        loop {
            let function: RuntimeFunctionEntry = match self
                .section_window(Rva(current_pos), SectionDataType::Virtual, true)
                .and_then(|window| window.read_pod(0))
            {
                Ok(function) => function,
                Err(_) => break,
            };
            if function.begin_address == 0 {
                break;
            }
            if function.begin_address > function.end_address {
                return Err(Error::IncorrectExceptionDirectory);
            }

            let unwind: UnwindInfoHeader = self
                .section_window(Rva(function.unwind_info_address), SectionDataType::Virtual, true)?
                .read_pod(0)
                .map_err(|_| Error::IncorrectExceptionDirectory)?;

            entries.push(ExceptionEntry {
                begin_address: Rva(function.begin_address),
                end_address: Rva(function.end_address),
                unwind_info_address: Rva(function.unwind_info_address),
                unwind_info_version: unwind.version_and_flags & 0x07,
                flags: unwind.version_and_flags >> 3,
                size_of_prolog: unwind.size_of_prolog,
                count_of_codes: unwind.count_of_codes,
                frame_register: unwind.frame_register_and_offset & 0x0f,
                frame_offset: unwind.frame_register_and_offset >> 4,
            });

            current_pos += SIZE_OF_RUNTIME_FUNCTION;
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwind_bitfields_decode() {
        // Version 1, flags EHANDLER; frame register 5, offset 2.
        let header = UnwindInfoHeader {
            version_and_flags: 0x01 | (0x01 << 3),
            size_of_prolog: 8,
            count_of_codes: 2,
            frame_register_and_offset: 0x25,
        };
        assert_eq!(header.version_and_flags & 0x07, 1);
        assert_eq!(header.version_and_flags >> 3, 1);
        assert_eq!(header.frame_register_and_offset & 0x0f, 5);
        assert_eq!(header.frame_register_and_offset >> 4, 2);
    }
}
