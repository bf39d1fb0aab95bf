//! Mapping of extracted metadata to a FHIR ImagingStudy resource.
//!
//! The transform is pure and deterministic. Absent source fields lead to
//! omitted elements (FHIR JSON does not allow explicit nulls), never to
//! errors.

use crate::extract::DicomMetadata;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::warn;

pub const DCM_ONTOLOGY_SYSTEM: &str = "http://dicom.nema.org/resources/ontology/DCM";
pub const SOP_CLASS_SYSTEM: &str = "urn:ietf:rfc:3986";
/// Computed Radiography Image Storage, attached to every mapped instance.
pub const SOP_CLASS_CODE: &str = "urn:oid:1.2.840.10008.5.1.4.1.1.1";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagingStudy {
	pub resource_type: &'static str,
	pub status: &'static str,
	pub subject: Reference,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub started: Option<String>,
	pub number_of_series: u32,
	pub number_of_instances: u32,
	pub series: Vec<Series>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub meta: Option<Meta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
	pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
	pub modality: Coding,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub body_site: Option<Display>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub performer: Vec<Performer>,
	pub instance: Vec<Instance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coding {
	pub system: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub display: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Display {
	pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Performer {
	pub actor: Display,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
	pub sop_class: Coding,
	pub number: u32,
	pub extension: Vec<Extension>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
	pub url: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub value_integer: Option<u16>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub value_string: Option<String>,
}

impl Extension {
	fn integer(url: &'static str, value: u16) -> Self {
		Self {
			url,
			value_integer: Some(value),
			value_string: None,
		}
	}

	fn string(url: &'static str, value: String) -> Self {
		Self {
			url,
			value_integer: None,
			value_string: Some(value),
		}
	}
}

/// Maps a metadata record to an ImagingStudy document.
pub fn to_imaging_study(metadata: &DicomMetadata) -> ImagingStudy {
	let subject = Reference {
		reference: metadata
			.patient_id
			.as_deref()
			.map_or_else(|| "Patient/unknown".to_string(), |id| format!("Patient/{id}")),
	};

	let mut extension = Vec::new();
	if let Some(rows) = metadata.rows {
		extension.push(Extension::integer("rows", rows));
	}
	if let Some(columns) = metadata.columns {
		extension.push(Extension::integer("columns", columns));
	}
	for (url, value) in [
		("pixelSpacing", &metadata.pixel_spacing),
		("sliceThickness", &metadata.slice_thickness),
		("cardiacTrigger", &metadata.cardiac_trigger),
		("triggerDelay", &metadata.trigger_delay),
		("heartRate", &metadata.heart_rate),
	] {
		if let Some(value) = value {
			extension.push(Extension::string(url, value.clone()));
		}
	}

	let series = Series {
		modality: Coding {
			system: DCM_ONTOLOGY_SYSTEM,
			code: metadata.modality.clone(),
			display: metadata.modality.clone(),
		},
		body_site: metadata
			.body_part
			.clone()
			.map(|display| Display { display }),
		performer: metadata
			.institution
			.clone()
			.map(|display| Performer {
				actor: Display { display },
			})
			.into_iter()
			.collect(),
		instance: vec![Instance {
			sop_class: Coding {
				system: SOP_CLASS_SYSTEM,
				code: Some(SOP_CLASS_CODE.to_string()),
				display: None,
			},
			number: 1,
			extension,
		}],
	};

	let meta = metadata.manufacturer.as_deref().map(|manufacturer| Meta {
		source: match metadata.manufacturer_model.as_deref() {
			Some(model) => format!("{manufacturer} {model}"),
			None => manufacturer.to_string(),
		},
	});

	ImagingStudy {
		resource_type: "ImagingStudy",
		status: "available",
		subject,
		started: metadata.study_date.as_deref().map(format_study_date),
		number_of_series: 1,
		number_of_instances: 1,
		series: vec![series],
		meta,
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Meta {
	pub source: String,
}

/// Reformats a DICOM DA value (YYYYMMDD) to the hyphenated FHIR form.
/// Values that are not a valid calendar date pass through unchanged.
fn format_study_date(raw: &str) -> String {
	match NaiveDate::parse_from_str(raw, "%Y%m%d") {
		Ok(date) => date.format("%Y-%m-%d").to_string(),
		Err(_) => {
			warn!(study_date = raw, "StudyDate is not in YYYYMMDD form, passing through unchanged");
			raw.to_string()
		}
	}
}
