use crate::load_config::{LoadConfigDirectory32, LoadConfigDirectory64, LoadConfigRepr};
use crate::optional::{Magic, Optional, OptionalHeader32, OptionalHeader64};
use crate::tls::{TlsDirectory32, TlsDirectory64, TlsDirectoryRepr};

/// Compile-time description of a PE variant. `Pe32` and `Pe64` are the only
/// implementors; everything width-dependent in the format hangs off this
/// trait so the rest of the crate can stay generic:
/// the optional-header layout, the import thunk width and its ordinal flag
/// bit, and the TLS / load-config structure layouts.
pub trait ImageArch: Sized + Copy + 'static {
    /// Optional-header magic for this variant.
    const MAGIC: u16;
    /// High bit of an import thunk that selects import-by-ordinal.
    const ORDINAL_FLAG: u64;
    /// True for PE32+.
    const IS_64: bool;
    /// Size in bytes of one IAT thunk.
    const THUNK_SIZE: u32;

    /// Fixed optional-header layout for this variant.
    type OptionalHeader: Optional;
    /// TLS directory layout for this variant.
    type TlsDirectory: TlsDirectoryRepr;
    /// Load-configuration directory layout for this variant.
    type LoadConfigDirectory: LoadConfigRepr;
}

/// Marker for 32-bit (PE32) images.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Pe32;

/// Marker for 64-bit (PE32+) images.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Pe64;

impl ImageArch for Pe32 {
    const MAGIC: u16 = Magic::PE32 as u16;
    const ORDINAL_FLAG: u64 = 0x8000_0000;
    const IS_64: bool = false;
    const THUNK_SIZE: u32 = 4;

    type OptionalHeader = OptionalHeader32;
    type TlsDirectory = TlsDirectory32;
    type LoadConfigDirectory = LoadConfigDirectory32;
}

impl ImageArch for Pe64 {
    const MAGIC: u16 = Magic::PE64 as u16;
    const ORDINAL_FLAG: u64 = 0x8000_0000_0000_0000;
    const IS_64: bool = true;
    const THUNK_SIZE: u32 = 8;

    type OptionalHeader = OptionalHeader64;
    type TlsDirectory = TlsDirectory64;
    type LoadConfigDirectory = LoadConfigDirectory64;
}
