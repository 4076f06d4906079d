use crate::arch::ImageArch;
use crate::optional::{DataDirectory, DIRECTORY_ENTRY_COM_DESCRIPTOR};
use crate::pe::{PortableExecutable, Rva, SectionDataType};
use crate::scribe::Scribe;
use crate::{Error, Result};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use core::{fmt, str};

/// On-disk `IMAGE_COR20_HEADER`, the .NET runtime header.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct ImageCor20Header {
    /// Size of this structure.
    pub cb: u32,
    /// Minimum major runtime version.
    pub major_runtime_version: u16,
    /// Minimum minor runtime version.
    pub minor_runtime_version: u16,
    /// Metadata tables and startup information.
    pub meta_data: DataDirectory,
    /// Runtime flags.
    pub flags: u32,
    /// Entry point token, or entry point RVA when the entry point is native.
    pub entry_point_token: u32,
    /// Managed resources.
    pub resources: DataDirectory,
    /// Strong name signature hash.
    pub strong_name_signature: DataDirectory,
    /// Deprecated code manager table.
    pub code_manager_table: DataDirectory,
    /// VTable fixups for unmanaged exports.
    pub vtable_fixups: DataDirectory,
    /// Deprecated export address table jumps.
    pub export_address_table_jumps: DataDirectory,
    /// Precompiled-image native header, for internal use.
    pub managed_native_header: DataDirectory,
}

bitflags! {
    /// `IMAGE_COR20_HEADER` runtime flags.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct ComImageFlags: u32 {
        /// The image contains IL code only.
        const COMIMAGE_FLAGS_ILONLY = 0x00000001;
        /// The image can only be loaded into a 32-bit process.
        const COMIMAGE_FLAGS_32BITREQUIRED = 0x00000002;
        /// The image is an IL library.
        const COMIMAGE_FLAGS_IL_LIBRARY = 0x00000004;
        /// The image is strong-name signed.
        const COMIMAGE_FLAGS_STRONGNAMESIGNED = 0x00000008;
        /// The entry point token is a native entry point RVA.
        const COMIMAGE_FLAGS_NATIVE_ENTRYPOINT = 0x00000010;
        /// Debugging is tracked by the runtime.
        const COMIMAGE_FLAGS_TRACKDEBUGDATA = 0x00010000;
    }
}

// Allow COM image flags to be easily printed
impl fmt::Debug for ComImageFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for ComImageFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl str::FromStr for ComImageFlags {
    type Err = bitflags::parser::ParseError;

    fn from_str(flags: &str) -> core::result::Result<Self, Self::Err> {
        Ok(Self(flags.parse()?))
    }
}

/// Basic information from the .NET runtime header. The metadata tables
/// themselves are not parsed.
#[derive(Copy, Clone, Default)]
pub struct BasicDotnetInfo {
    header: ImageCor20Header,
}

impl BasicDotnetInfo {
    /// The raw COR20 header.
    pub fn header(&self) -> &ImageCor20Header {
        &self.header
    }

    /// Minimum major runtime version.
    pub fn major_runtime_version(&self) -> u16 {
        self.header.major_runtime_version
    }

    /// Minimum minor runtime version.
    pub fn minor_runtime_version(&self) -> u16 {
        self.header.minor_runtime_version
    }

    /// Runtime flags as bitflags.
    pub fn get_flags(&self) -> Option<ComImageFlags> {
        ComImageFlags::from_bits(self.header.flags)
    }

    /// True if the image contains IL code only.
    pub fn is_il_only(&self) -> bool {
        self.header.flags & ComImageFlags::COMIMAGE_FLAGS_ILONLY.bits() != 0
    }

    /// True if the entry point token is a native entry point RVA.
    pub fn is_native_entry_point(&self) -> bool {
        self.header.flags & ComImageFlags::COMIMAGE_FLAGS_NATIVE_ENTRYPOINT.bits() != 0
    }

    /// True if the image can only be loaded into a 32-bit process.
    pub fn is_32bit_required(&self) -> bool {
        self.header.flags & ComImageFlags::COMIMAGE_FLAGS_32BITREQUIRED.bits() != 0
    }

    /// True if the image is an IL library.
    pub fn is_il_library(&self) -> bool {
        self.header.flags & ComImageFlags::COMIMAGE_FLAGS_IL_LIBRARY.bits() != 0
    }

    /// Entry point RVA when native, or the managed entry point token.
    pub fn entry_point_rva_or_token(&self) -> u32 {
        self.header.entry_point_token
    }

    /// The metadata directory as an (rva, size) pair.
    pub fn metadata(&self) -> DataDirectory {
        self.header.meta_data
    }

    /// The managed-resources directory.
    pub fn resources(&self) -> DataDirectory {
        self.header.resources
    }

    /// The strong-name-signature directory.
    pub fn strong_name_signature(&self) -> DataDirectory {
        self.header.strong_name_signature
    }

    /// The code-manager-table directory.
    pub fn code_manager_table(&self) -> DataDirectory {
        self.header.code_manager_table
    }

    /// The vtable-fixups directory.
    pub fn vtable_fixups(&self) -> DataDirectory {
        self.header.vtable_fixups
    }

    /// The export-address-table-jumps directory.
    pub fn export_address_table_jumps(&self) -> DataDirectory {
        self.header.export_address_table_jumps
    }

    /// The managed-native-header directory.
    pub fn managed_native_header(&self) -> DataDirectory {
        self.header.managed_native_header
    }
}

impl<A: ImageArch> PortableExecutable<A> {
    /// Reads the COR20 header. Fails if the image carries no managed code.
    pub fn get_basic_dotnet_info(&self) -> Result<BasicDotnetInfo> {
        if !self.is_dotnet() {
            return Err(Error::ImageDoesNotHaveManagedCode);
        }
        let dir_rva = self.directory_rva(DIRECTORY_ENTRY_COM_DESCRIPTOR);
        let header: ImageCor20Header = self
            .section_window(Rva(dir_rva), SectionDataType::Virtual, true)?
            .read_pod(0)
            .map_err(|_| Error::ImageDoesNotHaveManagedCode)?;
        Ok(BasicDotnetInfo { header })
    }
}
