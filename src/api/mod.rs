use crate::AppState;
use axum::Router;

pub mod dicom;
mod health;

pub fn routes() -> Router<AppState> {
	Router::new()
		.merge(health::routes())
		.nest("/dicom", dicom::routes())
}
