use crate::models::service::MAX_AMOUNT;
use crate::models::{CateringSelection, PeriodSet, Service};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("total price exceeds the supported maximum of {MAX_AMOUNT}")]
pub struct PriceOverflow;

/// Authoritative total for a reservation.
///
/// The service price is flat per period. Catering adds the package price per
/// guest plus every priced menu item times its quantity; unpriced items and
/// free-text section choices add nothing. Assumes the selection has already
/// been validated against the service. Totals above [`MAX_AMOUNT`] are
/// refused rather than wrapped.
pub fn compute_total(
    service: &Service,
    periods: &PeriodSet,
    catering: Option<&CateringSelection>,
) -> Result<i64, PriceOverflow> {
    let mut total = service
        .price
        .checked_mul(periods.len() as i64)
        .ok_or(PriceOverflow)?;

    if let Some(selection) = catering {
        if let Some(package) = service.package(&selection.package_id) {
            let per_guest = package
                .base_price
                .checked_mul(i64::from(selection.guest_count))
                .ok_or(PriceOverflow)?;
            total = total.checked_add(per_guest).ok_or(PriceOverflow)?;
        }

        for item in selection.selected_items.iter().filter(|i| !i.is_section_item) {
            let Some(menu) = service.menu_item(&item.menu_item_id).filter(|m| m.price > 0) else {
                continue;
            };
            let line = menu
                .price
                .checked_mul(i64::from(item.quantity))
                .ok_or(PriceOverflow)?;
            total = total.checked_add(line).ok_or(PriceOverflow)?;
        }
    }

    if total > MAX_AMOUNT {
        return Err(PriceOverflow);
    }
    Ok(total)
}
