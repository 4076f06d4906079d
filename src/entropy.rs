use crate::arch::ImageArch;
use crate::pe::PortableExecutable;
use crate::section::Section;
use crate::{Error, Result};

/// Shannon entropy of a byte slice, in bits per byte.
pub fn calculate_entropy(data: &[u8]) -> Result<f64> {
    if data.is_empty() {
        return Err(Error::DataIsEmpty);
    }
    let mut byte_count = [0u64; 256];
    for &byte in data {
        byte_count[byte as usize] += 1;
    }
    Ok(entropy_from_counts(&byte_count, data.len() as u64))
}

/// Shannon entropy of a section's raw data.
pub fn calculate_section_entropy(section: &Section) -> Result<f64> {
    if section.empty() {
        return Err(Error::SectionIsEmpty);
    }
    calculate_entropy(section.data())
}

fn entropy_from_counts(byte_count: &[u64; 256], total: u64) -> f64 {
    let mut entropy = 0f64;
    for &count in byte_count {
        if count == 0 {
            continue;
        }
        let p = count as f64 / total as f64;
        entropy += (p * p.log2()).abs();
    }
    entropy
}

impl<A: ImageArch> PortableExecutable<A> {
    /// Shannon entropy over the concatenation of all section raw buffers.
    pub fn calculate_entropy(&self) -> Result<f64> {
        let mut byte_count = [0u64; 256];
        let mut total = 0u64;
        for section in self.sections() {
            for &byte in section.data() {
                byte_count[byte as usize] += 1;
            }
            total += section.data().len() as u64;
        }
        if total == 0 {
            return Err(Error::DataIsEmpty);
        }
        Ok(entropy_from_counts(&byte_count, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_bytes_have_zero_entropy() {
        assert_eq!(calculate_entropy(&[7u8; 1024]).unwrap(), 0.0);
    }

    #[test]
    fn all_byte_values_reach_eight_bits() {
        let data: Vec<u8> = (0..=255u8).collect();
        let entropy = calculate_entropy(&data).unwrap();
        assert!((entropy - 8.0).abs() < 1e-9);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(calculate_entropy(&[]), Err(Error::DataIsEmpty));
    }
}
