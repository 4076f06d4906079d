use core::fmt;

/// Every failure the library can report. Each variant is raised by exactly
/// one layer; see the operation docs for which variants they produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The supplied byte stream is too short or otherwise unusable.
    StreamIsBad,
    /// The DOS header is missing, truncated, or its magic is not "MZ".
    BadDosHeader,
    /// The NT signature or the optional-header magic is wrong.
    BadPeSignature,
    /// `e_lfanew` points past the end of the file.
    ImageNtHeadersNotFound,
    /// The NT headers could not be read in full.
    ErrorReadingImageNtHeaders,
    /// `SectionAlignment` is not a power of two.
    IncorrectSectionAlignment,
    /// `FileAlignment` is not a power of two, below 512, or above `SectionAlignment`.
    IncorrectFileAlignment,
    /// `SizeOfImage` is zero after alignment.
    IncorrectSizeOfImage,
    /// The stub overlay between the DOS header and `e_lfanew` could not be read.
    ErrorReadingOverlay,
    /// The section header table lies past the end of the file.
    ImageSectionHeadersNotFound,
    /// A section header could not be read in full.
    ErrorReadingSectionHeader,
    /// A section declares both `VirtualSize` and `SizeOfRawData` as zero.
    ZeroSectionSizes,
    /// A section's address or size overflows or escapes the image/file.
    SectionIncorrectAddrOrSize,
    /// A section's raw data lies past the end of the file.
    ImageSectionDataNotFound,
    /// Sections are not contiguous in ascending-RVA order.
    ImageSectionTableIncorrect,
    /// `SizeOfHeaders` is larger than the first section's RVA.
    IncorrectSizeOfHeaders,
    /// No section matched the given index or name.
    NoSectionFound,
    /// An RVA does not fall inside any section (or the header prefix).
    RvaNotExists,
    /// The 96-section limit has been reached.
    NoMoreSectionsCanBeAdded,
    /// The section has no raw data to read or modify.
    SectionIsEmpty,
    /// Virtual size can only be changed for the last or a detached section.
    ErrorChangingSectionVirtualSize,
    /// The export directory is malformed.
    IncorrectExportDirectory,
    /// Two exported functions carry the same ordinal.
    DuplicateExportedFunctionOrdinal,
    /// Two exported functions carry the same name.
    DuplicateExportedFunctionName,
    /// The import directory is malformed.
    IncorrectImportDirectory,
    /// A non-last section has no room for the directory being rebuilt.
    InsufficientSpace,
    /// The target section is not attached to this image.
    SectionIsNotAttached,
    /// The base-relocation directory is malformed.
    IncorrectRelocationDirectory,
    /// The TLS directory is malformed.
    IncorrectTlsDirectory,
    /// The load-configuration directory is malformed.
    IncorrectConfigDirectory,
    /// The bound-import directory is malformed.
    IncorrectBoundImportDirectory,
    /// The resource directory is malformed or cyclic.
    IncorrectResourceDirectory,
    /// A resource directory entry holds the wrong payload kind for the request.
    ResourceDirectoryEntryError,
    /// No resource directory entry matched the given name or id.
    ResourceDirectoryEntryNotFound,
    /// No resource data entry exists at the given index or language.
    ResourceDataEntryNotFound,
    /// A bitmap resource is too short to carry a `BITMAPINFOHEADER`.
    ResourceIncorrectBitmap,
    /// An icon or icon-group resource is malformed.
    ResourceIncorrectIcon,
    /// A cursor or cursor-group resource is malformed.
    ResourceIncorrectCursor,
    /// A string-table resource is malformed.
    ResourceIncorrectStringTable,
    /// A message-table resource is malformed.
    ResourceIncorrectMessageTable,
    /// A version-info resource block is malformed.
    ResourceIncorrectVersionInfo,
    /// The requested string id is absent from its string table.
    ResourceStringNotFound,
    /// The requested version-info property does not exist.
    VersionInfoStringDoesNotExist,
    /// The exception directory is malformed.
    IncorrectExceptionDirectory,
    /// The debug directory is malformed.
    IncorrectDebugDirectory,
    /// The debug entry carries no advanced payload of the requested kind.
    AdvancedDebugInformationRequestError,
    /// The image has no .NET (COR20) header.
    ImageDoesNotHaveManagedCode,
    /// An operation was asked to work on zero bytes.
    DataIsEmpty,
    /// An alignment value is zero or not a power of two, or a string is not
    /// null-terminated within its window.
    IncorrectAlignment,
    /// A read or computed offset escapes the buffer it refers to.
    OffsetOutOfRange,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Error::StreamIsBad => "stream is bad",
            Error::BadDosHeader => "IMAGE_DOS_HEADER is incorrect",
            Error::BadPeSignature => "incorrect PE signature",
            Error::ImageNtHeadersNotFound => "cannot reach IMAGE_NT_HEADERS",
            Error::ErrorReadingImageNtHeaders => "error reading IMAGE_NT_HEADERS",
            Error::IncorrectSectionAlignment => "incorrect section alignment",
            Error::IncorrectFileAlignment => "incorrect file alignment",
            Error::IncorrectSizeOfImage => "incorrect size of image",
            Error::ErrorReadingOverlay => "error reading DOS stub overlay",
            Error::ImageSectionHeadersNotFound => "cannot reach section headers",
            Error::ErrorReadingSectionHeader => "error reading section header",
            Error::ZeroSectionSizes => {
                "virtual and physical sizes of section can't be 0 at the same time"
            }
            Error::SectionIncorrectAddrOrSize => "incorrect section address or size",
            Error::ImageSectionDataNotFound => "cannot reach section data",
            Error::ImageSectionTableIncorrect => "section table is incorrect",
            Error::IncorrectSizeOfHeaders => "incorrect size of headers",
            Error::NoSectionFound => "no section found by presented address",
            Error::RvaNotExists => "RVA not found inside any section",
            Error::NoMoreSectionsCanBeAdded => "maximum number of sections has been reached",
            Error::SectionIsEmpty => "section raw data is empty",
            Error::ErrorChangingSectionVirtualSize => {
                "can't change virtual size of any section, except the last one"
            }
            Error::IncorrectExportDirectory => "incorrect export directory",
            Error::DuplicateExportedFunctionOrdinal => "duplicate exported function ordinal",
            Error::DuplicateExportedFunctionName => "duplicate exported function name",
            Error::IncorrectImportDirectory => "incorrect import directory",
            Error::InsufficientSpace => "insufficient space inside section",
            Error::SectionIsNotAttached => "section must be attached to the PE image",
            Error::IncorrectRelocationDirectory => "incorrect relocation directory",
            Error::IncorrectTlsDirectory => "incorrect TLS directory",
            Error::IncorrectConfigDirectory => "incorrect load configuration directory",
            Error::IncorrectBoundImportDirectory => "incorrect bound import directory",
            Error::IncorrectResourceDirectory => "incorrect resource directory",
            Error::ResourceDirectoryEntryError => "resource directory entry has wrong kind",
            Error::ResourceDirectoryEntryNotFound => "resource directory entry not found",
            Error::ResourceDataEntryNotFound => "resource data entry not found",
            Error::ResourceIncorrectBitmap => "incorrect resource bitmap",
            Error::ResourceIncorrectIcon => "incorrect resource icon",
            Error::ResourceIncorrectCursor => "incorrect resource cursor",
            Error::ResourceIncorrectStringTable => "incorrect resource string table",
            Error::ResourceIncorrectMessageTable => "incorrect resource message table",
            Error::ResourceIncorrectVersionInfo => "incorrect resource version info",
            Error::ResourceStringNotFound => "resource string not found",
            Error::VersionInfoStringDoesNotExist => "version info property does not exist",
            Error::IncorrectExceptionDirectory => "incorrect exception directory",
            Error::IncorrectDebugDirectory => "incorrect debug directory",
            Error::AdvancedDebugInformationRequestError => {
                "debug entry has no advanced information of the requested kind"
            }
            Error::ImageDoesNotHaveManagedCode => "image does not have managed code",
            Error::DataIsEmpty => "data length is zero",
            Error::IncorrectAlignment => "incorrect alignment",
            Error::OffsetOutOfRange => "offset is out of range",
        };
        f.write_str(message)
    }
}

impl std::error::Error for Error {}

/// Shorthand used by every fallible operation in the crate.
pub type Result<T> = core::result::Result<T, Error>;
