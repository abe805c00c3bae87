// ==============================================================================
// validator.rs - Analysis Request Validation
// ==============================================================================
// Description: Validates an uploaded VCF and drug list before any parsing
//              (size, filename, extension, gzip decoding, drug normalisation)
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-02-09
// Version: 2.0.0
// Security: Size cap checked first, decompression bounded, upload text wiped
//           on drop
// ==============================================================================

use chrono::{DateTime, Utc};
use flate2::read::MultiGzDecoder;
use sha2::{Digest, Sha256};
use std::io::Read;
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Maximum accepted upload size (5 MB)
pub const MAX_FILE_SIZE: usize = 5 * 1024 * 1024;

/// Maximum size of a decompressed upload (64 MB)
pub const MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024 * 1024;

/// Gzip and BGZF members both start with these bytes
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const ALLOWED_EXTENSIONS: [&str; 4] = ["vcf", "vcf.gz", "vcf.bgz", "txt"];

/// Fatal request errors; everything else degrades inside the report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("No VCF file provided")]
    MissingFile,

    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    #[error("Decompressed VCF exceeds {max} bytes")]
    DecompressedTooLarge { max: u64 },

    #[error("No drugs specified")]
    NoDrugs,
}

/// Upload that passed validation
#[derive(Debug)]
pub struct ValidatedInput {
    pub original_name: String,
    pub safe_name: String,
    pub extension: String,
    /// Upload size in bytes, as received
    pub size: u64,
    pub hash_sha256: String,
    pub compressed: bool,
    /// Decoded document bytes (wiped on drop)
    pub document: Zeroizing<Vec<u8>>,
    /// Normalised drug names, first occurrence order
    pub drugs: Vec<String>,
    /// Non-fatal findings carried into the parse warnings
    pub warnings: Vec<String>,
    pub validated_at: DateTime<Utc>,
}

pub struct InputValidator {
    max_file_size: usize,
    max_decompressed_size: u64,
}

impl InputValidator {
    pub fn new() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            max_decompressed_size: MAX_DECOMPRESSED_SIZE,
        }
    }

    pub fn with_max_file_size(mut self, max: usize) -> Self {
        self.max_file_size = max;
        self
    }

    pub fn with_max_decompressed_size(mut self, max: u64) -> Self {
        self.max_decompressed_size = max;
        self
    }

    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    /// Validate one analysis request
    pub fn validate<S: AsRef<str>>(
        &self,
        file_name: Option<&str>,
        bytes: &[u8],
        drugs: &[S],
    ) -> Result<ValidatedInput, InputError> {
        // 1. Size check, before anything reads the content
        if bytes.len() > self.max_file_size {
            return Err(InputError::FileTooLarge {
                size: bytes.len(),
                max: self.max_file_size,
            });
        }
        if bytes.is_empty() {
            return Err(InputError::MissingFile);
        }
        debug!("Size check passed: {} bytes", bytes.len());

        // 2. Drug list
        let drugs = normalize_drugs(drugs);
        if drugs.is_empty() {
            return Err(InputError::NoDrugs);
        }

        let mut warnings = Vec::new();

        // 3. Filename sanitisation and extension (advisory only)
        let original_name = file_name.unwrap_or("upload.vcf").to_string();
        let safe_name = self.sanitize_filename(&original_name);
        let extension = self.get_extension(&safe_name);
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            warn!("Unexpected file extension '{}' for {}", extension, safe_name);
            warnings.push(format!(
                "Unexpected file extension '.{}'; content parsed as VCF",
                extension
            ));
        }

        // 4. Gzip detection by magic number
        let compressed = bytes.starts_with(&GZIP_MAGIC);
        let document = if compressed {
            self.decompress(bytes, &mut warnings)?
        } else {
            Zeroizing::new(bytes.to_vec())
        };

        // 5. Hash for the audit trail
        let hash_sha256 = compute_sha256(bytes);

        info!(
            "Validated {} ({} bytes{}, {} drug(s))",
            safe_name,
            bytes.len(),
            if compressed { ", gzip" } else { "" },
            drugs.len()
        );

        Ok(ValidatedInput {
            original_name,
            safe_name,
            extension,
            size: bytes.len() as u64,
            hash_sha256,
            compressed,
            document,
            drugs,
            warnings,
            validated_at: Utc::now(),
        })
    }

    /// Decompress gzip/BGZF; corrupt streams yield an empty document and a warning
    fn decompress(&self, bytes: &[u8], warnings: &mut Vec<String>) -> Result<Zeroizing<Vec<u8>>, InputError> {
        let mut out = Zeroizing::new(Vec::new());
        let mut decoder = MultiGzDecoder::new(bytes).take(self.max_decompressed_size + 1);

        match decoder.read_to_end(&mut out) {
            Ok(n) if n as u64 > self.max_decompressed_size => Err(InputError::DecompressedTooLarge {
                max: self.max_decompressed_size,
            }),
            Ok(n) => {
                debug!("Decompressed {} bytes to {}", bytes.len(), n);
                Ok(out)
            }
            Err(e) => {
                warn!("Corrupt gzip stream: {}", e);
                warnings.push(format!("Corrupt gzip stream: {}", e));
                Ok(Zeroizing::new(Vec::new()))
            }
        }
    }

    fn sanitize_filename(&self, name: &str) -> String {
        // Remove path separators, null bytes, control characters
        let safe: String = name
            .replace(['/', '\\', '\0'], "_")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.' || *c == '-')
            .take(255)
            .collect();

        if safe.is_empty() {
            "upload.vcf".to_string()
        } else {
            safe
        }
    }

    fn get_extension(&self, filename: &str) -> String {
        let lower = filename.to_ascii_lowercase();
        for compound in ["vcf.gz", "vcf.bgz"] {
            if lower.ends_with(&format!(".{}", compound)) {
                return compound.to_string();
            }
        }

        match lower.rsplit_once('.') {
            Some((_, ext)) => ext.to_string(),
            None => String::new(),
        }
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Trim, upper-case, split on commas, drop empties, de-duplicate keeping
/// the first occurrence
pub fn normalize_drugs<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut drugs: Vec<String> = Vec::new();
    for entry in raw {
        for name in entry.as_ref().split(',') {
            let name = name.trim().to_ascii_uppercase();
            if !name.is_empty() && !drugs.contains(&name) {
                drugs.push(name);
            }
        }
    }
    drugs
}

pub fn compute_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const VCF: &[u8] = b"##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_sanitize_filename() {
        let validator = InputValidator::new();

        assert_eq!(validator.sanitize_filename("patient.vcf"), "patient.vcf");
        assert_eq!(validator.sanitize_filename("../../../etc/passwd"), ".._.._.._etc_passwd");
        assert_eq!(validator.sanitize_filename("file\0with\nnull.vcf"), "file_withnull.vcf");
        assert_eq!(validator.sanitize_filename("\n\t"), "upload.vcf");
    }

    #[test]
    fn test_get_extension() {
        let validator = InputValidator::new();

        assert_eq!(validator.get_extension("sample.VCF.GZ"), "vcf.gz");
        assert_eq!(validator.get_extension("sample.vcf.bgz"), "vcf.bgz");
        assert_eq!(validator.get_extension("sample.vcf"), "vcf");
        assert_eq!(validator.get_extension("sample"), "");
    }

    #[test]
    fn test_normalize_drugs() {
        let drugs = normalize_drugs(&["warfarin, Codeine", " WARFARIN ", "", "clopidogrel,,codeine"]);
        assert_eq!(drugs, vec!["WARFARIN", "CODEINE", "CLOPIDOGREL"]);
    }

    #[test]
    fn test_oversized_file_rejected_first() {
        let validator = InputValidator::new().with_max_file_size(16);
        let err = validator.validate::<&str>(Some("a.vcf"), &[b'#'; 17], &[]).unwrap_err();

        // Size wins over the empty drug list
        assert_eq!(err, InputError::FileTooLarge { size: 17, max: 16 });
    }

    #[test]
    fn test_missing_file_and_drugs() {
        let validator = InputValidator::new();

        assert_eq!(
            validator.validate(Some("a.vcf"), b"", &["WARFARIN"]).unwrap_err(),
            InputError::MissingFile
        );
        assert_eq!(
            validator.validate(Some("a.vcf"), VCF, &[" , "]).unwrap_err(),
            InputError::NoDrugs
        );
    }

    #[test]
    fn test_plain_upload() {
        let validated = InputValidator::new()
            .validate(Some("patient.vcf"), VCF, &["warfarin"])
            .unwrap();

        assert!(!validated.compressed);
        assert_eq!(validated.document.as_slice(), VCF);
        assert_eq!(validated.drugs, vec!["WARFARIN"]);
        assert_eq!(validated.hash_sha256.len(), 64);
        assert!(validated.warnings.is_empty());
    }

    #[test]
    fn test_gzip_upload_is_decompressed() {
        let compressed = gzip(VCF);
        let validated = InputValidator::new()
            .validate(Some("patient.vcf.gz"), &compressed, &["CODEINE"])
            .unwrap();

        assert!(validated.compressed);
        assert_eq!(validated.document.as_slice(), VCF);
        assert_eq!(validated.size, compressed.len() as u64);
    }

    #[test]
    fn test_decompression_bomb_rejected() {
        let compressed = gzip(&vec![b'A'; 4096]);
        let err = InputValidator::new()
            .with_max_decompressed_size(1024)
            .validate(Some("bomb.vcf.gz"), &compressed, &["CODEINE"])
            .unwrap_err();

        assert_eq!(err, InputError::DecompressedTooLarge { max: 1024 });
    }

    #[test]
    fn test_corrupt_gzip_degrades() {
        // Gzip magic with an invalid compression method byte
        let corrupt = vec![0x1f, 0x8b, 0x00, 0x00, 0, 0, 0, 0, 0, 0xff, 1, 2, 3];

        let validated = InputValidator::new()
            .validate(Some("broken.vcf.gz"), &corrupt, &["CODEINE"])
            .unwrap();

        assert!(validated.document.is_empty());
        assert!(validated.warnings[0].starts_with("Corrupt gzip stream"));
    }

    #[test]
    fn test_unexpected_extension_warns() {
        let validated = InputValidator::new()
            .validate(Some("patient.csv"), VCF, &["CODEINE"])
            .unwrap();

        assert_eq!(validated.extension, "csv");
        assert_eq!(validated.warnings.len(), 1);
    }
}
