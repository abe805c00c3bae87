// ==============================================================================
// parsers/mod.rs - File parser modules
// ==============================================================================
// Description: Parsers for genetic data file formats
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-02-09
// Version: 2.0.0
// ==============================================================================

pub mod vcf;

pub use vcf::{ParsedVcf, VcfParseError, VcfParser};
