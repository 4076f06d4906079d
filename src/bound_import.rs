use crate::arch::ImageArch;
use crate::pe::PortableExecutable;
use crate::scribe::{is_sum_safe, Scribe};
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};

/// On-disk `IMAGE_BOUND_IMPORT_DESCRIPTOR`. Name offsets are relative to the
/// start of the bound-import data, and the list ends at a descriptor whose
/// name offset is zero.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct BoundImportDescriptor {
    /// Timestamp the library was bound against.
    pub time_date_stamp: u32,
    /// Offset of the module name from the directory start.
    pub offset_module_name: u16,
    /// Number of forwarder-reference records that follow this descriptor.
    pub number_of_module_forwarder_refs: u16,
}

/// On-disk `IMAGE_BOUND_FORWARDER_REF`, stored right after its parent
/// descriptor.
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
pub struct BoundForwarderRef {
    /// Timestamp the forwarded module was bound against.
    pub time_date_stamp: u32,
    /// Offset of the forwarded module name from the directory start.
    pub offset_module_name: u16,
    /// Reserved.
    pub reserved: u16,
}

/// One forwarded-module reference of a bound import.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoundImportRef {
    /// Forwarded module name.
    pub name: String,
    /// Timestamp the forwarded module was bound against.
    pub timestamp: u32,
}

/// One bound imported module and its forwarder references.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoundImport {
    /// Module name.
    pub name: String,
    /// Timestamp the module was bound against.
    pub timestamp: u32,
    /// Forwarded-module references, in on-disk order.
    pub module_refs: Vec<BoundImportRef>,
}

impl BoundImport {
    /// Returns the Unix epoch timestamp as a `DateTime<Utc>`
    #[cfg(feature = "chrono")]
    pub fn get_time_date_stamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.timestamp.into(), 0)
    }
}

const SIZE_OF_BOUND_DESCRIPTOR: usize = core::mem::size_of::<BoundImportDescriptor>();
const SIZE_OF_FORWARDER_REF: usize = core::mem::size_of::<BoundForwarderRef>();

impl<A: ImageArch> PortableExecutable<A> {
    /// Lists the bound imported modules.
    ///
    /// The bound-import directory's address field is a raw file offset, so
    /// this walks the blob captured while parsing; a parse with
    /// `read_bound_import_raw_data` disabled yields the malformed-directory
    /// error here.
    pub fn get_bound_import_module_list(&self) -> Result<Vec<BoundImport>> {
        let mut modules = Vec::new();
        if !self.has_bound_import() {
            return Ok(modules);
        }

        let data = self.bound_import_raw_data();
        if data.len() < SIZE_OF_BOUND_DESCRIPTOR {
            return Err(Error::IncorrectBoundImportDirectory);
        }

        let mut current_pos = 0usize;
        loop {
            let descriptor: BoundImportDescriptor = data
                .read_pod(current_pos)
                .map_err(|_| Error::IncorrectBoundImportDirectory)?;
            if descriptor.offset_module_name == 0 {
                break;
            }
            if descriptor.offset_module_name as usize >= data.len() {
                return Err(Error::IncorrectBoundImportDirectory);
            }

            let name = data
                .read_cstr(
                    descriptor.offset_module_name as usize,
                    data.len() - descriptor.offset_module_name as usize,
                )
                .map_err(|_| Error::IncorrectBoundImportDirectory)?;
            let mut module = BoundImport {
                name: String::from_utf8_lossy(name).into_owned(),
                timestamp: descriptor.time_date_stamp,
                module_refs: Vec::new(),
            };

            let refs_bytes = descriptor.number_of_module_forwarder_refs as u32
                * SIZE_OF_FORWARDER_REF as u32;
            if !is_sum_safe(
                current_pos as u32,
                2 * SIZE_OF_BOUND_DESCRIPTOR as u32 + refs_bytes,
            ) {
                return Err(Error::IncorrectBoundImportDirectory);
            }

            current_pos += SIZE_OF_BOUND_DESCRIPTOR;
            for _ in 0..descriptor.number_of_module_forwarder_refs {
                if current_pos + SIZE_OF_FORWARDER_REF > data.len() {
                    return Err(Error::IncorrectBoundImportDirectory);
                }
                let forwarder: BoundForwarderRef = data
                    .read_pod(current_pos)
                    .map_err(|_| Error::IncorrectBoundImportDirectory)?;
                if forwarder.offset_module_name as usize >= data.len() {
                    return Err(Error::IncorrectBoundImportDirectory);
                }
                let ref_name = data
                    .read_cstr(
                        forwarder.offset_module_name as usize,
                        data.len() - forwarder.offset_module_name as usize,
                    )
                    .map_err(|_| Error::IncorrectBoundImportDirectory)?;
                module.module_refs.push(BoundImportRef {
                    name: String::from_utf8_lossy(ref_name).into_owned(),
                    timestamp: forwarder.time_date_stamp,
                });
                current_pos += SIZE_OF_FORWARDER_REF;
            }

            if current_pos + SIZE_OF_BOUND_DESCRIPTOR > data.len() {
                return Err(Error::IncorrectBoundImportDirectory);
            }
            modules.push(module);
        }

        Ok(modules)
    }
}
