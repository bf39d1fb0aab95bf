//! Metadata extraction from uploaded DICOM files.
//!
//! Reads a fixed set of attributes into a flat [`DicomMetadata`] record.
//! Every attribute is optional; a missing tag yields `None` instead of an
//! error. The only failure mode is input that is not a DICOM stream at all.

use dicom::core::Tag;
use dicom::object::{FileDicomObject, InMemDicomObject, ReadError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
pub const MODALITY: Tag = Tag(0x0008, 0x0060);
pub const STUDY_DATE: Tag = Tag(0x0008, 0x0020);
pub const BODY_PART_EXAMINED: Tag = Tag(0x0018, 0x0015);
pub const INSTITUTION_NAME: Tag = Tag(0x0008, 0x0080);
pub const ROWS: Tag = Tag(0x0028, 0x0010);
pub const COLUMNS: Tag = Tag(0x0028, 0x0011);
pub const PIXEL_SPACING: Tag = Tag(0x0028, 0x0030);
pub const SLICE_THICKNESS: Tag = Tag(0x0018, 0x0050);
pub const NUMBER_OF_SLICES: Tag = Tag(0x0054, 0x0081);
pub const SERIES_DESCRIPTION: Tag = Tag(0x0008, 0x103E);
pub const STUDY_DESCRIPTION: Tag = Tag(0x0008, 0x1030);
pub const TRIGGER_SOURCE_OR_TYPE: Tag = Tag(0x0018, 0x1061);
pub const TRIGGER_DELAY_TIME: Tag = Tag(0x0020, 0x9153);
pub const HEART_RATE: Tag = Tag(0x0018, 0x1088);
pub const MANUFACTURER: Tag = Tag(0x0008, 0x0070);
pub const MANUFACTURER_MODEL_NAME: Tag = Tag(0x0008, 0x1090);

/// Flat metadata record for a single DICOM instance.
///
/// Field names follow the JSON contract of the HTTP API. Absent attributes
/// are serialized as explicit nulls rather than being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DicomMetadata {
	pub patient_id: Option<String>,
	pub modality: Option<String>,
	pub study_date: Option<String>,
	pub body_part: Option<String>,
	pub institution: Option<String>,
	pub rows: Option<u16>,
	pub columns: Option<u16>,
	pub pixel_spacing: Option<String>,
	pub slice_thickness: Option<String>,
	pub number_of_slices: Option<String>,
	pub series_description: Option<String>,
	pub study_description: Option<String>,
	pub cardiac_trigger: Option<String>,
	pub trigger_delay: Option<String>,
	pub heart_rate: Option<String>,
	pub manufacturer: Option<String>,
	pub manufacturer_model: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
	#[error("not a valid DICOM stream: {0}")]
	Read(#[from] ReadError),
}

/// Extracts the declared metadata fields from the raw bytes of a DICOM file.
///
/// # Errors
/// Fails only if the bytes cannot be parsed as a DICOM stream.
pub fn extract_metadata(bytes: &[u8]) -> Result<DicomMetadata, ExtractError> {
	let object = FileDicomObject::from_reader(strip_preamble(bytes))?;

	Ok(DicomMetadata {
		patient_id: string_value(&object, PATIENT_ID),
		modality: string_value(&object, MODALITY),
		study_date: string_value(&object, STUDY_DATE),
		body_part: string_value(&object, BODY_PART_EXAMINED),
		institution: string_value(&object, INSTITUTION_NAME),
		rows: int_value(&object, ROWS),
		columns: int_value(&object, COLUMNS),
		pixel_spacing: string_value(&object, PIXEL_SPACING),
		slice_thickness: string_value(&object, SLICE_THICKNESS),
		number_of_slices: string_value(&object, NUMBER_OF_SLICES),
		series_description: string_value(&object, SERIES_DESCRIPTION),
		study_description: string_value(&object, STUDY_DESCRIPTION),
		cardiac_trigger: string_value(&object, TRIGGER_SOURCE_OR_TYPE),
		trigger_delay: string_value(&object, TRIGGER_DELAY_TIME),
		heart_rate: string_value(&object, HEART_RATE),
		manufacturer: string_value(&object, MANUFACTURER),
		manufacturer_model: string_value(&object, MANUFACTURER_MODEL_NAME),
	})
}

/// A Part 10 file starts with a 128-byte preamble followed by "DICM".
/// The parser expects to be positioned at the magic code, so skip the
/// preamble when it is present.
fn strip_preamble(bytes: &[u8]) -> &[u8] {
	if bytes.len() >= 132 && &bytes[128..132] == b"DICM" {
		&bytes[128..]
	} else {
		bytes
	}
}

fn string_value(object: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<String> {
	object
		.element(tag)
		.ok()
		.and_then(|element| element.to_str().ok())
		.map(|value| value.trim().to_string())
}

fn int_value(object: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<u16> {
	object
		.element(tag)
		.ok()
		.and_then(|element| element.to_int::<u16>().ok())
}
