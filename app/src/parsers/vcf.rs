// ==============================================================================
// parsers/vcf.rs - VCF file parser
// ==============================================================================
// Description: Tolerant parser for pharmacogenomic VCF v4.x documents
//              annotated with GENE / STAR / RS INFO tags, built on noodles-vcf
// Author: Matt Barham
// Created: 2026-02-02
// Modified: 2026-02-12
// Version: 1.1.0
// ==============================================================================
// References:
// - VCF 4.2 Spec: https://samtools.github.io/hts-specs/VCFv4.2.pdf
// - noodles-vcf: https://docs.rs/noodles-vcf/0.81.0
// ==============================================================================
// Format:
//   ##fileformat=VCFv4.2
//   #CHROM  POS       ID         REF  ALT  QUAL  FILTER  INFO                         FORMAT  SAMPLE
//   10      94942290  rs1799853  C    T    .     PASS    GENE=CYP2C9;STAR=*2;RS=1799853  GT      0/1
// ==============================================================================
// The text is split into header and data lines first. Data lines are then
// read by noodles under a minimal header declaring the tags consumed here.
// A record or field error skips and counts that line only.
// ==============================================================================

use noodles_vcf as vcf;
use noodles_vcf::variant::record::info::field::Value as InfoValue;
use noodles_vcf::variant::record::samples::series::value::genotype::Phasing;
use noodles_vcf::variant::record::samples::series::value::Genotype;
use noodles_vcf::variant::record::samples::series::Value as SampleValue;
use noodles_vcf::variant::record::samples::Series as SeriesTrait;
use noodles_vcf::variant::record::{AlternateBases as _, Ids as _, Info as _};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{normalize_star, VariantRecord, Zygosity};

/// Minimum number of columns on a data line (CHROM..INFO)
const MIN_DATA_COLUMNS: usize = 8;

/// Meta lines of the header handed to noodles
const READER_META: &str = "##fileformat=VCFv4.2\n\
##INFO=<ID=GENE,Number=1,Type=String,Description=\"Gene symbol\">\n\
##INFO=<ID=STAR,Number=1,Type=String,Description=\"Star allele\">\n\
##INFO=<ID=RS,Number=1,Type=String,Description=\"dbSNP identifier\">\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n";

/// Per-line VCF parsing errors
///
/// These never abort a parse: the offending line is skipped and counted.
#[derive(Error, Debug)]
pub enum VcfParseError {
    #[error("Line {line}: expected at least 8 columns, found {found}")]
    TooFewColumns { line: usize, found: usize },

    #[error("Line {line}: invalid position '{value}'")]
    InvalidPosition { line: usize, value: String },

    #[error("Line {line}: missing required field {field}")]
    MissingField { line: usize, field: &'static str },

    #[error("Line {line}: malformed record: {message}")]
    Malformed { line: usize, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl VcfParseError {
    fn malformed(line: usize, err: io::Error) -> Self {
        Self::Malformed {
            line,
            message: err.to_string(),
        }
    }
}

/// Result of parsing one VCF document
#[derive(Debug, Clone, Default)]
pub struct ParsedVcf {
    /// Structurally valid data lines, in file order
    pub records: Vec<VariantRecord>,

    /// Value of the ##fileformat meta line, if present
    pub file_format: Option<String>,

    /// Sample column names from the #CHROM header
    pub sample_names: Vec<String>,

    /// Number of non-header, non-blank lines seen
    pub data_lines: usize,

    /// Number of data lines skipped as malformed
    pub skipped_lines: usize,

    /// Human-readable parse warnings (bounded)
    pub warnings: Vec<String>,
}

impl ParsedVcf {
    /// Parsing succeeds when at least one valid record was extracted
    pub fn parse_success(&self) -> bool {
        !self.records.is_empty()
    }

    /// Empty result carrying a single warning (used for undecodable input)
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            warnings: vec![reason.into()],
            ..Self::default()
        }
    }
}

/// VCF parser with configuration options
#[derive(Debug, Clone)]
pub struct VcfParser {
    /// Maximum number of warnings retained in the result
    pub max_warnings: usize,
}

impl Default for VcfParser {
    fn default() -> Self {
        Self { max_warnings: 25 }
    }
}

impl VcfParser {
    /// Create new VCF parser with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum retained warnings
    pub fn with_max_warnings(mut self, max: usize) -> Self {
        self.max_warnings = max;
        self
    }

    /// Parse an in-memory VCF document
    ///
    /// Malformed data lines are skipped and counted; the call itself never
    /// fails. Identical input always yields identical output.
    ///
    /// # Example
    /// ```
    /// use pgx_processor::parsers::VcfParser;
    ///
    /// let vcf = "##fileformat=VCFv4.2\n\
    ///            #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
    ///            10\t94942290\trs1799853\tC\tT\t.\tPASS\tGENE=CYP2C9;STAR=*2\n";
    /// let parsed = VcfParser::new().parse_str(vcf);
    /// assert!(parsed.parse_success());
    /// assert_eq!(parsed.records[0].star.as_deref(), Some("*2"));
    /// ```
    pub fn parse_str(&self, text: &str) -> ParsedVcf {
        let mut state = ParseState::new(self.max_warnings);
        for (idx, line) in text.lines().enumerate() {
            state.feed(idx + 1, line);
        }
        state.finish()
    }

    /// Parse raw bytes, replacing invalid UTF-8 sequences
    pub fn parse_bytes(&self, bytes: &[u8]) -> ParsedVcf {
        self.parse_str(&String::from_utf8_lossy(bytes))
    }

    /// Parse a plain-text VCF file from disk
    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<ParsedVcf, VcfParseError> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(self.parse_bytes(&bytes))
    }
}

/// A data line queued for the noodles reader
struct QueuedLine {
    line_number: usize,
    position: String,
}

/// Parse state shared by the string and file entry points
struct ParseState {
    parsed: ParsedVcf,
    max_warnings: usize,
    saw_column_header: bool,
    body: String,
    queued: Vec<QueuedLine>,
    line_errors: Vec<(usize, String)>,
}

impl ParseState {
    fn new(max_warnings: usize) -> Self {
        Self {
            parsed: ParsedVcf::default(),
            max_warnings,
            saw_column_header: false,
            body: String::new(),
            queued: Vec::new(),
            line_errors: Vec::new(),
        }
    }

    fn skip(&mut self, line_number: usize, err: VcfParseError) {
        debug!("Skipping VCF line: {}", err);
        self.parsed.skipped_lines += 1;
        self.line_errors.push((line_number, err.to_string()));
    }

    fn feed(&mut self, line_number: usize, raw: &str) {
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return;
        }

        if let Some(meta) = line.strip_prefix("##") {
            if let Some(version) = meta.strip_prefix("fileformat=") {
                self.parsed.file_format = Some(version.trim().to_string());
            }
            return;
        }

        if line.starts_with("#CHROM") {
            self.saw_column_header = true;
            let mut names: Vec<String> = Vec::new();
            for name in line.split('\t').skip(9).map(str::trim) {
                if !name.is_empty() && !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
            self.parsed.sample_names = names;
            return;
        }

        if line.starts_with('#') {
            return;
        }

        self.parsed.data_lines += 1;
        let columns = split_columns(line);
        if columns.len() < MIN_DATA_COLUMNS {
            let found = columns.len();
            self.skip(line_number, VcfParseError::TooFewColumns { line: line_number, found });
            return;
        }

        self.queued.push(QueuedLine {
            line_number,
            position: columns[1].trim().to_string(),
        });
        self.body.push_str(&columns.join("\t"));
        self.body.push('\n');
    }

    /// Header handed to noodles: fixed meta lines plus the file's samples
    fn reader_header(&self) -> String {
        let mut header = String::from(READER_META);
        header.push_str("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO");
        if !self.parsed.sample_names.is_empty() {
            header.push_str("\tFORMAT");
            for name in &self.parsed.sample_names {
                header.push('\t');
                header.push_str(name);
            }
        }
        header.push('\n');
        header
    }

    fn read_records(&mut self) {
        let mut document = self.reader_header();
        document.push_str(&self.body);

        let mut reader = vcf::io::Reader::new(document.as_bytes());
        let header = match reader.read_header() {
            Ok(header) => header,
            Err(e) => {
                warn!("VCF reader rejected the header: {}", e);
                for queued in std::mem::take(&mut self.queued) {
                    let err = VcfParseError::Malformed {
                        line: queued.line_number,
                        message: format!("VCF header rejected: {}", e),
                    };
                    self.skip(queued.line_number, err);
                }
                return;
            }
        };

        let queued = std::mem::take(&mut self.queued);
        let mut read = 0;
        for (result, line) in reader.records().zip(&queued) {
            read += 1;
            let outcome = result
                .map_err(|e| VcfParseError::malformed(line.line_number, e))
                .and_then(|record| convert_record(&record, &header, line));
            match outcome {
                Ok(record) => self.parsed.records.push(record),
                Err(e) => self.skip(line.line_number, e),
            }
        }

        // Lines the reader never yielded are still accounted for
        for line in &queued[read..] {
            let err = VcfParseError::Malformed {
                line: line.line_number,
                message: "record not returned by the VCF reader".to_string(),
            };
            self.skip(line.line_number, err);
        }
    }

    fn finish(mut self) -> ParsedVcf {
        self.read_records();

        let mut warnings: Vec<String> = Vec::new();
        self.line_errors.sort_by_key(|(line, _)| *line);
        warnings.extend(self.line_errors.drain(..).map(|(_, message)| message));

        match self.parsed.file_format.as_deref() {
            None => warnings.push("Missing ##fileformat meta line".to_string()),
            Some(v) if !v.starts_with("VCFv4.") => {
                warnings.push(format!("Unexpected file format '{}' (expected VCFv4.x)", v))
            }
            Some(_) => {}
        }
        if !self.saw_column_header {
            warnings.push("Missing #CHROM column header line".to_string());
        }

        let suppressed = warnings.len().saturating_sub(self.max_warnings);
        warnings.truncate(self.max_warnings);
        if suppressed > 0 {
            // Appended past the cap so the count is never lost
            warnings.push(format!("{} further warnings suppressed", suppressed));
        }
        self.parsed.warnings = warnings;

        if self.parsed.records.is_empty() {
            warn!(
                "VCF parse produced no valid records ({} data lines, {} skipped)",
                self.parsed.data_lines, self.parsed.skipped_lines
            );
        } else {
            info!(
                "Parsed {} VCF records ({} skipped)",
                self.parsed.records.len(),
                self.parsed.skipped_lines
            );
        }

        self.parsed
    }
}

/// Split a data line into columns, tolerating space-delimited files
fn split_columns(line: &str) -> Vec<&str> {
    let tabbed: Vec<&str> = line.split('\t').collect();
    if tabbed.len() >= MIN_DATA_COLUMNS {
        tabbed
    } else {
        line.split_whitespace().collect()
    }
}

/// Convert one noodles record into the service's variant record
fn convert_record(
    record: &vcf::Record,
    header: &vcf::Header,
    line: &QueuedLine,
) -> Result<VariantRecord, VcfParseError> {
    let line_number = line.line_number;
    let malformed = |e: io::Error| VcfParseError::malformed(line_number, e);

    let chromosome = record.reference_sequence_name().trim();
    if chromosome.is_empty() {
        return Err(VcfParseError::MissingField { line: line_number, field: "CHROM" });
    }

    // POS 0 reads as None
    let position = match record.variant_start() {
        Some(Ok(pos)) => pos.get() as u64,
        _ => {
            return Err(VcfParseError::InvalidPosition {
                line: line_number,
                value: line.position.clone(),
            })
        }
    };

    let ref_allele = record.reference_bases().to_string();
    if ref_allele.trim().is_empty() {
        return Err(VcfParseError::MissingField { line: line_number, field: "REF" });
    }

    let alternate_bases = record.alternate_bases();
    let alternates = alternate_bases
        .iter()
        .collect::<io::Result<Vec<&str>>>()
        .map_err(malformed)?;
    // A lone "." (reference-only site) reads as no alternates
    let alt_allele = if alternates.is_empty() {
        ".".to_string()
    } else {
        alternates.join(",")
    };

    let record_info = record.info();
    let tag = |key: &str| -> Result<Option<String>, VcfParseError> {
        match record_info.get(header, key) {
            None => Ok(None),
            Some(value) => Ok(value.map_err(malformed)?.and_then(info_value_to_string)),
        }
    };
    let gene = tag("GENE")?
        .map(|g| g.trim().to_ascii_uppercase())
        .filter(|g| !g.is_empty());
    let star = tag("STAR")?.and_then(|s| normalize_star(&s));
    let rs = tag("RS")?;

    let mut info = BTreeMap::new();
    for field in record_info.iter(header) {
        match field {
            Ok((key, value)) => {
                let value = value.and_then(info_value_to_string).unwrap_or_default();
                info.insert(key.to_string(), value);
            }
            Err(e) => debug!("Line {}: dropping unreadable INFO field: {}", line_number, e),
        }
    }

    let rsid = extract_rsid(record, rs.as_deref());

    let genotype = extract_genotype(record, header).map_err(malformed)?;
    let zygosity = genotype
        .as_deref()
        .map(Zygosity::from_gt)
        .unwrap_or(Zygosity::Unknown);

    Ok(VariantRecord {
        chromosome: chromosome.to_string(),
        position,
        rsid,
        ref_allele,
        alt_allele,
        genotype,
        zygosity,
        gene,
        star,
        info,
    })
}

/// Render an INFO value as text; flags become an empty string
fn info_value_to_string(value: InfoValue<'_>) -> Option<String> {
    match value {
        InfoValue::String(s) => Some(s.trim().to_string()),
        InfoValue::Integer(n) => Some(n.to_string()),
        InfoValue::Float(n) => Some(n.to_string()),
        InfoValue::Character(c) => Some(c.to_string()),
        InfoValue::Flag => Some(String::new()),
        _ => None,
    }
}

/// rsID from the ID column, else from INFO RS (numeric dbSNP form accepted)
fn extract_rsid(record: &vcf::Record, rs_tag: Option<&str>) -> Option<String> {
    let ids = record.ids();
    let from_id = ids
        .iter()
        .map(str::trim)
        .find(|id| id.to_ascii_lowercase().starts_with("rs"));
    if let Some(id) = from_id {
        return Some(id.to_ascii_lowercase());
    }

    let rs = rs_tag?.trim();
    if rs.is_empty() || rs == "." {
        None
    } else if rs.chars().all(|c| c.is_ascii_digit()) {
        Some(format!("rs{}", rs))
    } else {
        Some(rs.to_ascii_lowercase())
    }
}

/// GT value of the first sample, if the FORMAT declares one
fn extract_genotype(record: &vcf::Record, header: &vcf::Header) -> io::Result<Option<String>> {
    let samples = record.samples();
    let Some(series) = samples.select("GT") else {
        return Ok(None);
    };

    let result = match SeriesTrait::iter(&series, header).next() {
        Some(Ok(Some(SampleValue::Genotype(genotype)))) => {
            format_genotype(&*genotype).map(|gt| Some(gt).filter(|gt| !gt.is_empty()))
        }
        Some(Ok(Some(SampleValue::String(gt)))) => {
            Ok(Some(gt.trim().to_string()).filter(|gt| !gt.is_empty()))
        }
        Some(Ok(_)) | None => Ok(None),
        Some(Err(e)) => Err(e),
    };
    result
}

/// Write a genotype back in VCF notation ("0/1", "1|1", "./.")
fn format_genotype(genotype: &dyn Genotype) -> io::Result<String> {
    let mut gt = String::new();
    for (idx, allele) in genotype.iter().enumerate() {
        let (position, phasing) = allele?;
        if idx > 0 {
            gt.push(if matches!(phasing, Phasing::Phased) { '|' } else { '/' });
        }
        match position {
            Some(p) => gt.push_str(&p.to_string()),
            None => gt.push('.'),
        }
    }
    Ok(gt)
}
