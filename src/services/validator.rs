use std::collections::{BTreeMap, HashSet};

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;

use crate::db::queries;
use crate::models::period::{normalize_day, periods_to_string};
use crate::models::{CateringSelection, Period, PeriodSet, SectionItemKey, Service};
use crate::services::availability::{self, BlockingScope};
use crate::services::pricing;

#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("periods already booked: {}", periods_to_string(.0))]
    Conflict(PeriodSet),

    #[error("service {0} not found")]
    ServiceNotFound(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

fn invalid(reason: impl Into<String>) -> ReservationError {
    ReservationError::Invalid(reason.into())
}

#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub service_id: String,
    pub date: String,
    pub periods: Vec<Period>,
    pub catering: Option<CateringSelection>,
}

/// A request that passed every check, with the server-computed fields filled in.
#[derive(Debug, Clone)]
pub struct ValidatedReservation {
    pub service: Service,
    pub date: NaiveDate,
    pub periods: PeriodSet,
    pub catering: Option<CateringSelection>,
    pub total_price: i64,
}

pub fn validate_reservation(
    conn: &Connection,
    request: &ReservationRequest,
) -> Result<ValidatedReservation, ReservationError> {
    if request.periods.is_empty() {
        return Err(invalid("at least one period is required"));
    }
    let periods: PeriodSet = request.periods.iter().copied().collect();
    if periods.len() != request.periods.len() {
        return Err(invalid("periods must not repeat"));
    }

    let service = queries::get_service(conn, &request.service_id)?
        .ok_or_else(|| ReservationError::ServiceNotFound(request.service_id.clone()))?;

    let date = normalize_day(&request.date).map_err(|e| invalid(e.to_string()))?;
    if date < Utc::now().date_naive() {
        return Err(invalid("cannot book a date in the past"));
    }

    let booked = availability::booked_periods(conn, &service.id, &date, BlockingScope::Blocking)?;
    let conflicting: PeriodSet = periods.intersection(&booked).copied().collect();
    if !conflicting.is_empty() {
        tracing::info!(
            service_id = %service.id,
            date = %date,
            conflicting = %periods_to_string(&conflicting),
            "reservation conflicts with existing bookings"
        );
        return Err(ReservationError::Conflict(conflicting));
    }

    if let Some(selection) = &request.catering {
        validate_catering(&service, selection)?;
    }

    let total_price = pricing::compute_total(&service, &periods, request.catering.as_ref())
        .map_err(|e| invalid(e.to_string()))?;

    Ok(ValidatedReservation {
        service,
        date,
        periods,
        catering: request.catering.clone(),
        total_price,
    })
}

/// Check a catering selection against the package it names.
pub fn validate_catering(
    service: &Service,
    selection: &CateringSelection,
) -> Result<(), ReservationError> {
    let package = service.package(&selection.package_id).ok_or_else(|| {
        invalid(format!(
            "catering package {} is not offered by this service",
            selection.package_id
        ))
    })?;

    if selection.guest_count < package.min_guests || selection.guest_count > package.max_guests {
        return Err(invalid(format!(
            "guest count must be between {} and {} for {}",
            package.min_guests, package.max_guests, package.name
        )));
    }

    let mut seen = HashSet::new();
    let mut section_counts: BTreeMap<(usize, usize), u32> = BTreeMap::new();

    for item in &selection.selected_items {
        if !seen.insert(item.menu_item_id.as_str()) {
            return Err(invalid(format!(
                "menu item {} is selected more than once",
                item.menu_item_id
            )));
        }
        if item.quantity == 0 {
            return Err(invalid(format!(
                "quantity for {} must be at least 1",
                item.menu_item_id
            )));
        }

        if item.is_section_item || item.menu_item_id.starts_with("section-") {
            let key = SectionItemKey::parse(&item.menu_item_id)
                .filter(|key| package.section_group(key).is_some())
                .ok_or_else(|| invalid(format!("unknown menu choice {}", item.menu_item_id)))?;
            *section_counts.entry(key.group_id()).or_default() += 1;
            continue;
        }

        if package.included_item(&item.menu_item_id).is_some() {
            continue;
        }

        match package.optional_item(&item.menu_item_id) {
            Some(optional) => {
                if optional.max_selection > 0 && item.quantity > optional.max_selection {
                    return Err(invalid(format!(
                        "at most {} of {} may be selected",
                        optional.max_selection, item.menu_item_id
                    )));
                }
            }
            None => {
                return Err(invalid(format!(
                    "menu item {} is not part of {}",
                    item.menu_item_id, package.name
                )));
            }
        }
    }

    for ((section, group), count) in section_counts {
        let Some(group) = package
            .menu_sections
            .get(section)
            .and_then(|s| s.groups.get(group))
        else {
            continue;
        };
        if group.max_selection > 0 && count > group.max_selection {
            return Err(invalid(format!(
                "choose at most {} from {}",
                group.max_selection, group.name
            )));
        }
    }

    Ok(())
}
