use bytemuck::{Pod, Zeroable};
use core::fmt;
use crate::scribe::Scribe;

/// The "MZ" magic at the start of every DOS header.
pub const DOS_MAGIC: u16 = 0x5a4d;

/// DOS .EXE header, the first 64 bytes of every PE image.
#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
pub struct ImageDosHeader {
    /// Magic number, "MZ".
    pub e_magic: u16,
    /// Bytes on last page of file.
    pub e_cblp: u16,
    /// Pages in file.
    pub e_cp: u16,
    /// Relocations.
    pub e_crlc: u16,
    /// Size of header in paragraphs.
    pub e_cparhdr: u16,
    /// Minimum extra paragraphs needed.
    pub e_minalloc: u16,
    /// Maximum extra paragraphs needed.
    pub e_maxalloc: u16,
    /// Initial (relative) SS value.
    pub e_ss: u16,
    /// Initial SP value.
    pub e_sp: u16,
    /// Checksum.
    pub e_csum: u16,
    /// Initial IP value.
    pub e_ip: u16,
    /// Initial (relative) CS value.
    pub e_cs: u16,
    /// File address of relocation table.
    pub e_lfarlc: u16,
    /// Overlay number.
    pub e_ovno: u16,
    /// Reserved words.
    pub e_res: [u16; 4],
    /// OEM identifier.
    pub e_oemid: u16,
    /// OEM information.
    pub e_oeminfo: u16,
    /// Reserved words.
    pub e_res2: [u16; 10],
    /// File address of the NT headers.
    pub e_lfanew: u32,
}

impl Default for ImageDosHeader {
    fn default() -> Self {
        let mut header: ImageDosHeader = Zeroable::zeroed();
        header.e_magic = DOS_MAGIC;
        header.e_lfanew = core::mem::size_of::<ImageDosHeader>() as u32;
        header
    }
}

/// One decoded record of the "Rich" linker overlay. Informational only:
/// corruption yields an empty record list, never an error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct RichRecord {
    /// Build/tool identifier (high half of the first XOR-ed dword).
    pub number: u32,
    /// Tool version (low half of the first XOR-ed dword).
    pub version: u32,
    /// How many objects this tool contributed.
    pub times: u32,
}

impl fmt::Display for RichRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id {} version {} times {}",
            self.number, self.version, self.times
        )
    }
}

const RICH_TAG: u32 = 0x6863_6952; // "Rich"
const DANS_TAG: u32 = 0x536e_6144; // "DanS"

/// Decodes the "Rich" records hidden in the stub overlay between the DOS
/// header and `e_lfanew`.
///
/// The literal `"Rich"` tag is located first; the XOR key follows it. The
/// overlay is then rescanned for the key-masked `"DanS"` marker, and the
/// dwords between the two markers decode as (number, version, times)
/// triples. Any corruption makes the overlay count as having no rich data.
pub fn decode_rich_overlay(overlay: &[u8]) -> Vec<RichRecord> {
    let mut records = Vec::new();

    if overlay.len() < 4 {
        return records;
    }

    let rich_pos = match (0..=overlay.len() - 4).find(|&i| overlay.read_u32(i) == Ok(RICH_TAG)) {
        Some(pos) => pos,
        None => return records,
    };

    let xor_key = match overlay.read_u32(rich_pos + 4) {
        Ok(key) => key,
        Err(_) => {
            log::warn!("rich overlay truncated after the Rich tag");
            return records;
        }
    };

    let dans_pos = match (0..=overlay.len() - 4)
        .find(|&i| overlay.read_u32(i).map(|v| v ^ xor_key) == Ok(DANS_TAG))
    {
        Some(pos) => pos,
        None => {
            log::warn!("rich overlay has no DanS marker, treating as absent");
            return records;
        }
    };

    // Three masked padding dwords follow the DanS marker.
    let mut pos = dans_pos + 4 * 4;
    while pos + 8 <= rich_pos {
        let first = match overlay.read_u32(pos) {
            Ok(value) => value ^ xor_key,
            Err(_) => break,
        };
        let times = match overlay.read_u32(pos + 4) {
            Ok(value) => value ^ xor_key,
            Err(_) => break,
        };
        records.push(RichRecord {
            number: first >> 16,
            version: first & 0xffff,
            times,
        });
        pos += 8;
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_overlay(key: u32, entries: &[(u32, u32, u32)]) -> Vec<u8> {
        let mut overlay = Vec::new();
        overlay.extend_from_slice(&(DANS_TAG ^ key).to_le_bytes());
        for _ in 0..3 {
            overlay.extend_from_slice(&key.to_le_bytes());
        }
        for &(number, version, times) in entries {
            overlay.extend_from_slice(&(((number << 16) | version) ^ key).to_le_bytes());
            overlay.extend_from_slice(&(times ^ key).to_le_bytes());
        }
        overlay.extend_from_slice(&RICH_TAG.to_le_bytes());
        overlay.extend_from_slice(&key.to_le_bytes());
        overlay
    }

    #[test]
    fn decodes_well_formed_overlay() {
        let overlay = build_overlay(0xdead_beef, &[(0x5d, 0x1c83, 7), (0x01, 0x0000, 12)]);
        let records = decode_rich_overlay(&overlay);
        assert_eq!(
            records,
            vec![
                RichRecord { number: 0x5d, version: 0x1c83, times: 7 },
                RichRecord { number: 0x01, version: 0, times: 12 },
            ]
        );
    }

    #[test]
    fn corrupt_overlay_is_empty() {
        assert!(decode_rich_overlay(b"garbage that is not rich").is_empty());
        assert!(decode_rich_overlay(&[]).is_empty());
        // Rich tag present but no DanS marker.
        let mut overlay = RICH_TAG.to_le_bytes().to_vec();
        overlay.extend_from_slice(&[0u8; 4]);
        assert!(decode_rich_overlay(&overlay).is_empty());
    }
}
