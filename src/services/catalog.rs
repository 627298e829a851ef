use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{CateringPackage, MenuItem, Principal, Role, Service, ServiceCategory};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDraft {
    pub name: String,
    pub category: ServiceCategory,
    pub price: i64,
    pub capacity: u32,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub catering_packages: Vec<CateringPackage>,
    #[serde(default)]
    pub catering_menu: Vec<MenuItem>,
}

/// Register the calling vendor's service. A vendor owns at most one.
pub fn create_service(
    state: &AppState,
    principal: &Principal,
    draft: ServiceDraft,
) -> Result<Service, AppError> {
    principal.require(Role::Vendor)?;

    let service = Service {
        id: Uuid::new_v4().to_string(),
        vendor_id: principal.id.clone(),
        name: draft.name.trim().to_string(),
        category: draft.category,
        price: draft.price,
        capacity: draft.capacity,
        duration: draft.duration,
        catering_packages: draft.catering_packages,
        catering_menu: draft.catering_menu,
        created_at: Utc::now().naive_utc(),
    };
    service.check_catalog().map_err(AppError::Validation)?;

    let conn = state.conn()?;
    if queries::get_service_by_vendor(&conn, &principal.id)?.is_some() {
        return Err(AppError::Validation(
            "vendor already has a registered service".to_string(),
        ));
    }
    queries::create_service(&conn, &service)?;

    tracing::info!(service_id = %service.id, vendor_id = %service.vendor_id, "service registered");
    Ok(service)
}

pub fn get_service(state: &AppState, id: &str) -> Result<Service, AppError> {
    let conn = state.conn()?;
    queries::get_service(&conn, id)?.ok_or_else(|| AppError::NotFound(format!("service {id}")))
}
