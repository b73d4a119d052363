// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 1BitSquared <info@1bitsquared.com>
// SPDX-FileContributor: Written by Rachel Mant <git@dragonmux.network>

//! Intel HEX record codec for bulk memory transfers.
//!
//! The debugger's `restore` and `dump ihex memory` commands move blocks of
//! target memory through files of `:LLAAAATT<data><CC>` records. The encode
//! side always produces valid checksums. The decode side recomputes the
//! checksum but reports it rather than failing on it: on read-back the
//! authoritative check is content equality against what was written, and a
//! bad checksum is only diagnostic information.

use crate::error::HarnessError;

/// A data record as stored in target memory during transfer verification
pub const RECORD_DATA: u8 = 0x00;
/// The end-of-file record closing every encoded image
pub const RECORD_EOF: u8 = 0x01;

/// A contiguous run of target memory, transient and test-scoped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock
{
	pub base: u64,
	pub data: Vec<u8>,
}

/// One decoded record line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record
{
	pub record_type: u8,
	pub address: u16,
	pub data: Vec<u8>,
	/// Whether the checksum on the wire matched the recomputed one
	pub checksum_valid: bool,
}

fn checksum(address: u16, record_type: u8, data: &[u8]) -> u8
{
	let mut check = data.len() as u32;
	check += u32::from(address >> 8);
	check += u32::from(address & 0xff);
	check += u32::from(record_type);
	for byte in data {
		check += u32::from(*byte);
	}
	// Two's complement of the running sum, modulo 256
	((256 - (check % 256)) % 256) as u8
}

/// Encode a single record line, without the trailing newline
pub fn encode_record(address: u16, record_type: u8, data: &[u8]) -> String
{
	// The length field is a single byte with the top bit never legal
	assert!(data.len() < 128);
	let mut line = format!(":{:02X}{:04X}{:02X}", data.len(), address, record_type);
	for byte in data {
		line.push_str(&format!("{:02X}", byte));
	}
	line.push_str(&format!("{:02X}", checksum(address, record_type, data)));
	line
}

/// Encode a full image as 16-byte data records followed by the EOF record
pub fn encode_image(data: &[u8]) -> String
{
	const LINE_LENGTH: usize = 16;

	let mut image = String::new();
	for (index, chunk) in data.chunks(LINE_LENGTH).enumerate() {
		image.push_str(&encode_record((index * LINE_LENGTH) as u16, RECORD_DATA, chunk));
		image.push('\n');
	}
	image.push_str(&encode_record(0, RECORD_EOF, &[]));
	image.push('\n');
	image
}

fn hex_field(line: &str, range: std::ops::Range<usize>, detail: &'static str) -> Result<u16, HarnessError>
{
	line.get(range)
		.and_then(|field| u16::from_str_radix(field, 16).ok())
		.ok_or_else(|| HarnessError::MalformedRecord {
			line: line.to_string(),
			detail,
		})
}

/// Decode a single record line
pub fn parse_record(line: &str) -> Result<Record, HarnessError>
{
	let line = line.trim_end();
	let Some(body) = line.strip_prefix(':') else {
		return Err(HarnessError::MalformedRecord {
			line: line.to_string(),
			detail: "missing record marker",
		});
	};

	let length = hex_field(body, 0..2, "length field is not hexadecimal")? as usize;
	let address = hex_field(body, 2..6, "address field is not hexadecimal")?;
	let record_type = hex_field(body, 6..8, "record type field is not hexadecimal")? as u8;

	if body.len() < 10 + 2 * length {
		return Err(HarnessError::MalformedRecord {
			line: line.to_string(),
			detail: "record shorter than its length field claims",
		});
	}

	let mut data = Vec::with_capacity(length);
	for index in 0..length {
		let offset = 8 + 2 * index;
		data.push(hex_field(body, offset..offset + 2, "data byte is not hexadecimal")? as u8);
	}
	let stored_checksum = hex_field(body, 8 + 2 * length..10 + 2 * length, "checksum is not hexadecimal")? as u8;

	let checksum_valid = stored_checksum == checksum(address, record_type, &data);
	Ok(Record {
		record_type,
		address,
		data,
		checksum_valid,
	})
}

/// Decode every record in an encoded image, one record per line
pub fn parse_image(image: &str) -> Result<Vec<Record>, HarnessError>
{
	image
		.lines()
		.filter(|line| !line.trim().is_empty())
		.map(parse_record)
		.collect()
}

#[cfg(test)]
mod tests
{
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn record_round_trip()
	{
		let data: Vec<u8> = (0u8..16).collect();
		let line = encode_record(0x1234, RECORD_DATA, &data);
		let record = parse_record(&line).unwrap();

		assert_eq!(record.record_type, RECORD_DATA);
		assert_eq!(record.address, 0x1234);
		assert_eq!(record.data, data);
		assert!(record.checksum_valid);
	}

	#[test]
	fn image_round_trip()
	{
		let data: Vec<u8> = (0u8..=255).collect();
		let records = parse_image(&encode_image(&data)).unwrap();

		// 16 data records and the closing EOF record
		assert_eq!(records.len(), 17);
		assert_eq!(records.last().unwrap().record_type, RECORD_EOF);

		let mut recovered = Vec::new();
		for record in records.iter().filter(|record| record.record_type == RECORD_DATA) {
			assert_eq!(record.address as usize, recovered.len());
			assert!(record.checksum_valid);
			recovered.extend_from_slice(&record.data);
		}
		assert_eq!(recovered, data);
	}

	#[test]
	fn corrupt_checksum_is_detected_but_not_fatal()
	{
		let line = encode_record(0x0040, RECORD_DATA, &[0xde, 0xad, 0xbe, 0xef]);
		// Flip one bit in the checksum byte
		let mut corrupted = line.clone().into_bytes();
		let last = corrupted.len() - 1;
		corrupted[last] = if corrupted[last] == b'0' { b'1' } else { b'0' };
		let corrupted = String::from_utf8(corrupted).unwrap();

		let record = parse_record(&corrupted).unwrap();
		assert!(!record.checksum_valid);
		// The content itself still decodes
		assert_eq!(record.data, vec![0xde, 0xad, 0xbe, 0xef]);
	}

	#[test]
	fn missing_marker_is_malformed()
	{
		let result = parse_record("10004000DEADBEEF00");
		assert!(matches!(result, Err(HarnessError::MalformedRecord { detail, .. })
			if detail == "missing record marker"));
	}

	#[test]
	fn non_hex_length_is_malformed()
	{
		let result = parse_record(":ZZ0040000");
		assert!(matches!(result, Err(HarnessError::MalformedRecord { detail, .. })
			if detail == "length field is not hexadecimal"));
	}

	#[test]
	fn truncated_record_is_malformed()
	{
		let result = parse_record(":10004000DEAD");
		assert!(matches!(result, Err(HarnessError::MalformedRecord { detail, .. })
			if detail == "record shorter than its length field claims"));
	}
}
